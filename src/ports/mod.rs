use crate::domain::callgraph::CallGraph;
use crate::domain::matcher::TraceMatch;
use crate::domain::ranking::TestingTarget;
use crate::domain::syntax_change::ChangeSet;
use crate::domain::trace::Trace;
use anyhow::Result;
use std::path::Path;

pub mod report_renderer;

/// Imports all observed-trace files of one version. A single malformed
/// trace file is skipped with a warning, never an error for the version.
pub trait TraceImporter {
    fn import_traces(&self, dir: &Path, version: &str) -> Result<Vec<Trace>>;
}

/// Imports one version's syntax-change data.
pub trait ChangeImporter {
    fn import_changes(&self, path: &Path) -> Result<ChangeSet>;
}

/// Imports one version's static call graph.
pub trait CallGraphImporter {
    fn import_callgraph(&self, path: &Path) -> Result<CallGraph>;
}

/// Loads the optional user-supplied trace matching file. A malformed or
/// absent file yields `None` (fall back to default matching), not an error.
pub trait MatchingImporter {
    fn import_matching(&self, path: &Path) -> Option<Vec<TraceMatch>>;
}

/// Writes the ranked testing-target list of one version pair.
pub trait ReportExporter {
    fn export(&self, version: &str, targets: &[TestingTarget], path: &Path) -> Result<()>;
}
