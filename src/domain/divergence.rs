//! Trace Divergences
//!
//! Typed records of one detected behavioral difference between two matched
//! traces. A closed enum, so every reduction over divergences is checked
//! for exhaustiveness by the compiler.

use crate::domain::identifier::MethodIdentifier;
use crate::domain::method_data::NodeId;
use crate::domain::trace::Value;
use serde::{Deserialize, Serialize};

/// Flat classification of divergence kinds, used for grouping and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceType {
    ReturnValue,
    Parameter,
    MethodCall,
    Coverage,
    TraceDistance,
    DivergentSections,
}

/// Scalar metrics computed once per compared method pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Edit distance over the two instruction sequences.
    TraceDistance,
    /// Number of contiguous runs of differing coverage offsets.
    DivergentSections,
}

/// How a call-sequence divergence manifested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallDivergence {
    /// Callee present in the new trace but absent from the old at the
    /// corresponding call-site position.
    Additional { callee: MethodIdentifier },
    /// Callee present in the old trace but absent from the new.
    NotCalled { callee: MethodIdentifier },
    /// Same call-site position, different callee; both identifiers kept.
    Different {
        old_callee: MethodIdentifier,
        new_callee: MethodIdentifier,
    },
}

/// One detected difference, anchored at the new-trace method where it was
/// observed.
///
/// Cardinality per anchor per comparison: `ReturnValue` at most once and
/// each `MetricKind` at most once; `Parameter`, `MethodCall` and `Coverage`
/// may repeat (per parameter index, per distinct call, per instruction
/// offset).
#[derive(Debug, Clone, PartialEq)]
pub enum TraceDivergence {
    ReturnValue {
        anchor: NodeId,
        old: Value,
        new: Value,
    },
    Parameter {
        anchor: NodeId,
        /// The callee node when the divergence is about a parameter of a
        /// call rather than of the anchor method itself.
        counterpart: Option<NodeId>,
        index: usize,
        old: Value,
        new: Value,
    },
    MethodCall {
        anchor: NodeId,
        call: CallDivergence,
    },
    Coverage {
        anchor: NodeId,
        offset: u32,
        old_count: u32,
        new_count: u32,
    },
    Metric {
        anchor: NodeId,
        kind: MetricKind,
        value: f64,
    },
}

impl TraceDivergence {
    /// The new-tree node where the difference was observed.
    pub fn anchor(&self) -> NodeId {
        match self {
            TraceDivergence::ReturnValue { anchor, .. }
            | TraceDivergence::Parameter { anchor, .. }
            | TraceDivergence::MethodCall { anchor, .. }
            | TraceDivergence::Coverage { anchor, .. }
            | TraceDivergence::Metric { anchor, .. } => *anchor,
        }
    }

    pub fn divergence_type(&self) -> DivergenceType {
        match self {
            TraceDivergence::ReturnValue { .. } => DivergenceType::ReturnValue,
            TraceDivergence::Parameter { .. } => DivergenceType::Parameter,
            TraceDivergence::MethodCall { .. } => DivergenceType::MethodCall,
            TraceDivergence::Coverage { .. } => DivergenceType::Coverage,
            TraceDivergence::Metric { kind, .. } => match kind {
                MetricKind::TraceDistance => DivergenceType::TraceDistance,
                MetricKind::DivergentSections => DivergenceType::DivergentSections,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_and_type() {
        let d = TraceDivergence::Coverage {
            anchor: NodeId(3),
            offset: 12,
            old_count: 1,
            new_count: 2,
        };
        assert_eq!(d.anchor(), NodeId(3));
        assert_eq!(d.divergence_type(), DivergenceType::Coverage);

        let m = TraceDivergence::Metric {
            anchor: NodeId(0),
            kind: MetricKind::DivergentSections,
            value: 2.0,
        };
        assert_eq!(m.divergence_type(), DivergenceType::DivergentSections);
    }
}
