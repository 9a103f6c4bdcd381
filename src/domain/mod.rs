//! Domain layer: the trace divergence engine.
//!
//! Pure data model and algorithms; no file or network IO lives here.

pub mod callgraph;
pub mod detector;
pub mod divergence;
pub mod identifier;
pub mod matcher;
pub mod method_data;
pub mod metrics;
pub mod ranking;
pub mod syntax_change;
pub mod trace;
