//! Method Data
//!
//! Comparison-oriented facade over an observed call tree: one flat arena per
//! trace, each node pairing an invocation with the syntax-change metadata of
//! its owning version. The detector and aggregator work exclusively on this
//! representation.

use crate::domain::identifier::MethodIdentifier;
use crate::domain::syntax_change::{ChangeSet, SyntaxChange};
use crate::domain::trace::{ObservedMethod, Trace, Value};
use std::collections::BTreeMap;

/// Index of a node in a [`MethodDataTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// One invocation plus the syntax-change view of its owning version.
///
/// The caller link is a plain arena index, never an owning reference; the
/// tree stays a clean ownership tree with weak back-references.
#[derive(Debug, Clone)]
pub struct MethodData {
    pub id: NodeId,
    pub caller: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub identifier: MethodIdentifier,
    pub parameters: Vec<Value>,
    pub return_value: Value,
    /// Bytecode offset -> execution count.
    pub coverage: BTreeMap<u32, u32>,
    /// Opcode sequence of raw instructions, for the trace-distance metric.
    pub opcodes: Vec<u16>,
    /// Whether this method was syntactically modified in its version.
    pub modified: bool,
    /// The syntax changes applicable to this method. May be empty.
    pub changes: Vec<SyntaxChange>,
}

impl MethodData {
    /// Structural method identity, ignoring which version created the nodes.
    pub fn same_method(&self, other: &MethodData) -> bool {
        self.identifier == other.identifier
    }

    pub fn param_count(&self) -> usize {
        self.parameters.len()
    }
}

/// Flattened call tree for one trace of one version.
#[derive(Debug, Clone)]
pub struct MethodDataTree {
    pub trace_id: String,
    nodes: Vec<MethodData>,
}

impl MethodDataTree {
    /// Build the arena from an imported trace and the owning version's
    /// change set. Preorder: index 0 is always the entry method.
    pub fn from_trace(trace: &Trace, changes: &ChangeSet) -> Self {
        let mut tree = Self {
            trace_id: trace.id.clone(),
            nodes: Vec::with_capacity(trace.root.subtree_size()),
        };
        tree.flatten(&trace.root, None, changes);
        tree
    }

    fn flatten(
        &mut self,
        observed: &ObservedMethod,
        caller: Option<NodeId>,
        changes: &ChangeSet,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        let applicable = changes.changes_for_method(&observed.identifier);
        self.nodes.push(MethodData {
            id,
            caller,
            children: Vec::with_capacity(observed.children.len()),
            identifier: observed.identifier.clone(),
            parameters: observed.parameters.clone(),
            return_value: observed.return_value.clone(),
            coverage: observed.coverage(),
            opcodes: observed.opcode_sequence(),
            modified: !applicable.is_empty(),
            changes: applicable,
        });
        for child in &observed.children {
            let child_id = self.flatten(child, Some(id), changes);
            self.nodes[id.0].children.push(child_id);
        }
        id
    }

    pub fn entry(&self) -> &MethodData {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> &MethodData {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MethodData> {
        self.nodes.iter()
    }

    /// Whether `node` is reachable from the entry method via caller hops.
    pub fn reachable_from_entry(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id.0 == 0 {
                return true;
            }
            current = self.nodes[node_id.0].caller;
        }
        false
    }
}
