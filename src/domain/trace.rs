//! Observed Method Tree
//!
//! Runtime call-tree model: one `ObservedMethod` per dynamic invocation,
//! built by the recorder while the instrumented program runs and frozen
//! once imported from a trace file.

use crate::domain::identifier::MethodIdentifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// A recorded parameter or return value.
///
/// `NotReturned` doubles as the "return value not yet set" sentinel during
/// recording and as the marker for methods that never returned (e.g. the
/// observed program threw past them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Value {
    Null,
    /// A primitive-typed value, e.g. `{ type_tag: "I", repr: "42" }`.
    Primitive { type_tag: String, repr: String },
    /// A boxed object: class name, `toString()` form, and identity hash.
    Object {
        class: String,
        string_form: String,
        hash: i64,
    },
    NotReturned,
}

impl Value {
    /// True for `Object` string forms that are just `Class@hexhash` identity
    /// output. Those vary run to run and can be filtered from comparison.
    pub fn is_identity_string(&self) -> bool {
        match self {
            Value::Object { string_form, .. } => string_form.starts_with('@'),
            _ => false,
        }
    }
}

/// How the invocation was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationKind {
    Method,
    Constructor,
    StaticInitializer,
}

/// One entry in a method's ordered event buffer: either a raw executed
/// instruction or a marker that a nested call happened here, referencing
/// the child by position in `children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Instruction { opcode: u16, offset: u32 },
    Call { child: usize },
}

/// One dynamic invocation: identity, parameters, event buffer, return value,
/// and child calls in call order. Child order is significant for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedMethod {
    pub kind: InvocationKind,
    pub identifier: MethodIdentifier,
    pub parameters: Vec<Value>,
    pub events: Vec<TraceEvent>,
    pub return_value: Value,
    pub children: Vec<ObservedMethod>,
}

impl ObservedMethod {
    pub fn new(kind: InvocationKind, identifier: MethodIdentifier, parameters: Vec<Value>) -> Self {
        Self {
            kind,
            identifier,
            parameters,
            events: Vec::new(),
            return_value: Value::NotReturned,
            children: Vec::new(),
        }
    }

    /// Append an executed-instruction record.
    pub fn record_instruction(&mut self, opcode: u16, offset: u32) {
        self.events.push(TraceEvent::Instruction { opcode, offset });
    }

    /// Append a child invocation and a call marker at the current position
    /// in the event buffer. Returns a mutable handle to the child.
    pub fn record_call(&mut self, child: ObservedMethod) -> &mut ObservedMethod {
        let idx = self.children.len();
        self.children.push(child);
        self.events.push(TraceEvent::Call { child: idx });
        &mut self.children[idx]
    }

    /// Set the return value. Setting it twice is a protocol violation in the
    /// instrumented program; the first value wins and the violation is
    /// reported back to the caller so it can be recorded as an anomaly.
    pub fn set_return_value(&mut self, value: Value) -> Result<(), DoubleReturn> {
        if self.return_value != Value::NotReturned {
            warn!(
                method = %self.identifier,
                "return value set twice; keeping the first"
            );
            return Err(DoubleReturn {
                identifier: self.identifier.clone(),
            });
        }
        self.return_value = value;
        Ok(())
    }

    /// Per-instruction coverage: bytecode offset -> execution count,
    /// derived from the event buffer.
    pub fn coverage(&self) -> BTreeMap<u32, u32> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            if let TraceEvent::Instruction { offset, .. } = event {
                *counts.entry(*offset).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Opcode sequence of the raw instructions, in execution order.
    /// Used for the trace-distance metric.
    pub fn opcode_sequence(&self) -> Vec<u16> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Instruction { opcode, .. } => Some(*opcode),
                TraceEvent::Call { .. } => None,
            })
            .collect()
    }

    /// Total number of invocations in this subtree, self included.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_size()).sum::<usize>()
    }
}

/// Non-fatal protocol violation: a method's return value was set twice.
#[derive(Debug, Clone)]
pub struct DoubleReturn {
    pub identifier: MethodIdentifier,
}

/// One root-to-leaves execution starting at an entry method, as imported
/// from a trace file. Identified by a version-scoped trace id (not globally
/// unique). Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Version-scoped identifier, typically the trace file stem.
    pub id: String,
    pub root: ObservedMethod,
    /// Free-text runtime errors reported by the instrumented run.
    pub runtime_errors: Vec<String>,
}

impl Trace {
    pub fn new(id: impl Into<String>, root: ObservedMethod) -> Self {
        Self {
            id: id.into(),
            root,
            runtime_errors: Vec::new(),
        }
    }

    pub fn entry_identifier(&self) -> &MethodIdentifier {
        &self.root.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> ObservedMethod {
        ObservedMethod::new(InvocationKind::Method, MethodIdentifier::new(id), vec![])
    }

    #[test]
    fn test_return_value_set_once() {
        let mut m = leaf("Foo.bar()I");
        assert!(m
            .set_return_value(Value::Primitive {
                type_tag: "I".to_string(),
                repr: "5".to_string(),
            })
            .is_ok());

        // Second set must be rejected and the first value kept.
        let second = m.set_return_value(Value::Null);
        assert!(second.is_err());
        assert_eq!(
            m.return_value,
            Value::Primitive {
                type_tag: "I".to_string(),
                repr: "5".to_string(),
            }
        );
    }

    #[test]
    fn test_coverage_counts_repeats() {
        let mut m = leaf("Foo.loop()V");
        m.record_instruction(0x15, 0);
        m.record_instruction(0x84, 4);
        m.record_instruction(0x15, 0);
        m.record_instruction(0x15, 0);

        let cov = m.coverage();
        assert_eq!(cov.get(&0), Some(&3));
        assert_eq!(cov.get(&4), Some(&1));
    }

    #[test]
    fn test_call_marker_references_child_by_position() {
        let mut m = leaf("Foo.outer()V");
        m.record_instruction(0x2a, 0);
        m.record_call(leaf("Foo.inner()V"));
        m.record_instruction(0xb1, 8);

        assert_eq!(m.children.len(), 1);
        assert_eq!(m.events[1], TraceEvent::Call { child: 0 });
        // Call markers do not contribute to coverage.
        assert_eq!(m.coverage().len(), 2);
    }

    #[test]
    fn test_subtree_size() {
        let mut root = leaf("A.a()V");
        let child = root.record_call(leaf("B.b()V"));
        child.record_call(leaf("C.c()V"));
        root.record_call(leaf("D.d()V"));
        assert_eq!(root.subtree_size(), 4);
    }
}
