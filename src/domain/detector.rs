//! Divergence Detector
//!
//! The recursive tree-diff at the heart of the analysis: walks a matched
//! old/new pair of method-data trees in lock-step and emits typed
//! divergence records for the new-trace side. Never mutates its inputs.

use crate::domain::divergence::{CallDivergence, MetricKind, TraceDivergence};
use crate::domain::method_data::{MethodData, MethodDataTree, NodeId};
use crate::domain::trace::Value;
use tracing::{debug, warn};

/// Which optional comparisons the detector performs.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Treat `@`-prefixed object string forms as volatile identity output
    /// and exclude them (and their identity hashes) from value comparison.
    pub filter_identity_strings: bool,
    /// Emit the coverage-based divergent-sections metric per method pair.
    pub coverage_metrics: bool,
    /// Emit the instruction-sequence trace-distance metric per method pair.
    pub trace_distance_metrics: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            filter_identity_strings: true,
            coverage_metrics: true,
            trace_distance_metrics: true,
        }
    }
}

pub struct DivergenceDetector {
    config: DetectorConfig,
}

impl DivergenceDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Compare a matched trace pair and produce the ordered divergence list
    /// for the new side. Comparing unrelated entry methods is meaningless:
    /// that case aborts with a diagnostic and an empty list.
    pub fn compare(&self, old: &MethodDataTree, new: &MethodDataTree) -> Vec<TraceDivergence> {
        let old_entry = old.entry();
        let new_entry = new.entry();

        if !old_entry.same_method(new_entry) {
            warn!(
                old = %old_entry.identifier,
                new = %new_entry.identifier,
                "entry methods differ; skipping comparison"
            );
            return Vec::new();
        }

        self.advisory_entry_checks(old_entry, new_entry);

        let mut divergences = Vec::new();
        self.walk(old, new, old_entry.id, new_entry.id, &mut divergences);
        divergences
    }

    /// Non-fatal hints that the trace pair may be a poor comparison basis.
    /// These guide the user toward better trace generation; they are not
    /// divergences.
    fn advisory_entry_checks(&self, old_entry: &MethodData, new_entry: &MethodData) {
        if new_entry.modified {
            warn!(
                entry = %new_entry.identifier,
                "entry method itself was syntactically modified"
            );
        }
        if old_entry.param_count() != new_entry.param_count() {
            warn!(
                entry = %new_entry.identifier,
                old = old_entry.param_count(),
                new = new_entry.param_count(),
                "entry invocations had different parameter counts"
            );
            return;
        }
        for (index, (old_param, new_param)) in old_entry
            .parameters
            .iter()
            .zip(new_entry.parameters.iter())
            .enumerate()
        {
            if self.values_differ(old_param, new_param) {
                warn!(
                    entry = %new_entry.identifier,
                    index,
                    "entry invocations had differing parameter values"
                );
            }
        }
    }

    fn walk(
        &self,
        old_tree: &MethodDataTree,
        new_tree: &MethodDataTree,
        old_id: NodeId,
        new_id: NodeId,
        out: &mut Vec<TraceDivergence>,
    ) {
        let old_node = old_tree.node(old_id);
        let new_node = new_tree.node(new_id);

        self.compare_return_values(old_node, new_node, out);
        self.compare_children(old_tree, new_tree, old_node, new_node, out);
        self.compare_coverage(old_node, new_node, out);
        self.compute_metrics(old_node, new_node, out);
    }

    /// At most one ReturnValue divergence per method pair.
    fn compare_return_values(
        &self,
        old_node: &MethodData,
        new_node: &MethodData,
        out: &mut Vec<TraceDivergence>,
    ) {
        if self.values_differ(&old_node.return_value, &new_node.return_value) {
            out.push(TraceDivergence::ReturnValue {
                anchor: new_node.id,
                old: old_node.return_value.clone(),
                new: new_node.return_value.clone(),
            });
        }
    }

    /// Ordered child-call alignment: recurse on same-identifier pairs and
    /// classify the rest as additional / not-called / different.
    fn compare_children(
        &self,
        old_tree: &MethodDataTree,
        new_tree: &MethodDataTree,
        old_node: &MethodData,
        new_node: &MethodData,
        out: &mut Vec<TraceDivergence>,
    ) {
        let old_children = &old_node.children;
        let new_children = &new_node.children;
        let (mut i, mut j) = (0usize, 0usize);

        while i < old_children.len() && j < new_children.len() {
            let old_child = old_tree.node(old_children[i]);
            let new_child = new_tree.node(new_children[j]);

            if old_child.same_method(new_child) {
                self.compare_call_parameters(new_node, old_child, new_child, out);
                self.walk(old_tree, new_tree, old_child.id, new_child.id, out);
                i += 1;
                j += 1;
                continue;
            }

            // Does either side's callee reappear later on the other side?
            let old_resumes = new_children[j + 1..]
                .iter()
                .any(|&c| new_tree.node(c).identifier == old_child.identifier);
            let new_resumes = old_children[i + 1..]
                .iter()
                .any(|&c| old_tree.node(c).identifier == new_child.identifier);

            if old_resumes && !new_resumes {
                // The new call is an insertion before the common suffix.
                out.push(TraceDivergence::MethodCall {
                    anchor: new_node.id,
                    call: CallDivergence::Additional {
                        callee: new_child.identifier.clone(),
                    },
                });
                j += 1;
            } else if new_resumes && !old_resumes {
                out.push(TraceDivergence::MethodCall {
                    anchor: new_node.id,
                    call: CallDivergence::NotCalled {
                        callee: old_child.identifier.clone(),
                    },
                });
                i += 1;
            } else {
                out.push(TraceDivergence::MethodCall {
                    anchor: new_node.id,
                    call: CallDivergence::Different {
                        old_callee: old_child.identifier.clone(),
                        new_callee: new_child.identifier.clone(),
                    },
                });
                i += 1;
                j += 1;
            }
        }

        for &remaining in &old_children[i..] {
            out.push(TraceDivergence::MethodCall {
                anchor: new_node.id,
                call: CallDivergence::NotCalled {
                    callee: old_tree.node(remaining).identifier.clone(),
                },
            });
        }
        for &remaining in &new_children[j..] {
            out.push(TraceDivergence::MethodCall {
                anchor: new_node.id,
                call: CallDivergence::Additional {
                    callee: new_tree.node(remaining).identifier.clone(),
                },
            });
        }
    }

    /// Parameter comparison for one matched call pair, anchored at the
    /// caller with the callee as counterpart. One divergence per differing
    /// parameter index.
    fn compare_call_parameters(
        &self,
        caller: &MethodData,
        old_callee: &MethodData,
        new_callee: &MethodData,
        out: &mut Vec<TraceDivergence>,
    ) {
        if old_callee.param_count() != new_callee.param_count() {
            debug!(
                callee = %new_callee.identifier,
                old = old_callee.param_count(),
                new = new_callee.param_count(),
                "call parameter counts differ; comparing common prefix"
            );
        }
        for (index, (old_param, new_param)) in old_callee
            .parameters
            .iter()
            .zip(new_callee.parameters.iter())
            .enumerate()
        {
            if self.values_differ(old_param, new_param) {
                out.push(TraceDivergence::Parameter {
                    anchor: caller.id,
                    counterpart: Some(new_callee.id),
                    index,
                    old: old_param.clone(),
                    new: new_param.clone(),
                });
            }
        }
    }

    /// One Coverage divergence per instruction offset recorded on both
    /// sides whose execution count differs. This can be many per method.
    fn compare_coverage(
        &self,
        old_node: &MethodData,
        new_node: &MethodData,
        out: &mut Vec<TraceDivergence>,
    ) {
        for (offset, new_count) in &new_node.coverage {
            if let Some(old_count) = old_node.coverage.get(offset) {
                if old_count != new_count {
                    out.push(TraceDivergence::Coverage {
                        anchor: new_node.id,
                        offset: *offset,
                        old_count: *old_count,
                        new_count: *new_count,
                    });
                }
            }
        }
    }

    /// At most one Metric divergence of each enabled kind per method pair.
    fn compute_metrics(
        &self,
        old_node: &MethodData,
        new_node: &MethodData,
        out: &mut Vec<TraceDivergence>,
    ) {
        if self.config.coverage_metrics {
            let sections = divergent_sections(old_node, new_node);
            if sections > 0 {
                out.push(TraceDivergence::Metric {
                    anchor: new_node.id,
                    kind: MetricKind::DivergentSections,
                    value: sections as f64,
                });
            }
        }
        if self.config.trace_distance_metrics {
            let distance = seq_edit_distance(&old_node.opcodes, &new_node.opcodes);
            if distance > 0 {
                out.push(TraceDivergence::Metric {
                    anchor: new_node.id,
                    kind: MetricKind::TraceDistance,
                    value: distance as f64,
                });
            }
        }
    }

    /// Whether two recorded values differ by class name, string form, or
    /// hash. With identity filtering on, two identity-form objects are
    /// compared by class name only.
    fn values_differ(&self, old: &Value, new: &Value) -> bool {
        match (old, new) {
            (
                Value::Object {
                    class: old_class,
                    string_form: old_string,
                    hash: old_hash,
                },
                Value::Object {
                    class: new_class,
                    string_form: new_string,
                    hash: new_hash,
                },
            ) => {
                if self.config.filter_identity_strings
                    && old.is_identity_string()
                    && new.is_identity_string()
                {
                    return old_class != new_class;
                }
                old_class != new_class || old_string != new_string || old_hash != new_hash
            }
            _ => old != new,
        }
    }
}

/// Number of contiguous runs of differing coverage counts over the offsets
/// recorded on both sides, in offset order.
fn divergent_sections(old_node: &MethodData, new_node: &MethodData) -> usize {
    let mut sections = 0usize;
    let mut in_section = false;
    for (offset, new_count) in &new_node.coverage {
        let Some(old_count) = old_node.coverage.get(offset) else {
            continue;
        };
        if old_count != new_count {
            if !in_section {
                sections += 1;
                in_section = true;
            }
        } else {
            in_section = false;
        }
    }
    sections
}

/// Two-row Levenshtein over instruction sequences.
fn seq_edit_distance(a: &[u16], b: &[u16]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::divergence::DivergenceType;
    use crate::domain::identifier::MethodIdentifier;
    use crate::domain::syntax_change::ChangeSet;
    use crate::domain::trace::{InvocationKind, ObservedMethod, Trace};

    fn method(id: &str) -> ObservedMethod {
        ObservedMethod::new(InvocationKind::Method, MethodIdentifier::new(id), vec![])
    }

    fn int_return(repr: &str) -> Value {
        Value::Object {
            class: "java.lang.Integer".to_string(),
            string_form: repr.to_string(),
            hash: repr.parse().unwrap(),
        }
    }

    fn tree(root: ObservedMethod) -> MethodDataTree {
        MethodDataTree::from_trace(&Trace::new("t", root), &ChangeSet::new())
    }

    fn detector() -> DivergenceDetector {
        DivergenceDetector::new(DetectorConfig::default())
    }

    #[test]
    fn test_identical_traces_produce_no_divergences() {
        let build = || {
            let mut root = method("Main.run()V");
            root.record_instruction(0x2a, 0);
            let child = root.record_call(method("Util.step()I"));
            child.record_instruction(0x04, 0);
            child.set_return_value(int_return("5")).unwrap();
            root.record_instruction(0xb1, 4);
            root
        };
        let old = tree(build());
        let new = tree(build());

        assert!(detector().compare(&old, &new).is_empty());
    }

    #[test]
    fn test_mismatched_entries_abort_with_empty_list() {
        let old = tree(method("A.main()V"));
        let new = tree(method("B.main()V"));
        assert!(detector().compare(&old, &new).is_empty());
    }

    #[test]
    fn test_single_additional_call() {
        let mut old_root = method("Main.run()V");
        old_root.record_call(method("Util.step()V"));

        let mut new_root = method("Main.run()V");
        new_root.record_call(method("Util.step()V"));
        new_root.record_call(method("Foo.bar()V"));

        let divergences = detector().compare(&tree(old_root), &tree(new_root));
        assert_eq!(divergences.len(), 1);
        match &divergences[0] {
            TraceDivergence::MethodCall {
                call: CallDivergence::Additional { callee },
                ..
            } => assert_eq!(callee.as_str(), "Foo.bar()V"),
            other => panic!("expected Additional, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_different_calls() {
        let mut old_root = method("Main.run()V");
        old_root.record_call(method("A.a()V"));
        old_root.record_call(method("B.b()V"));

        let mut new_root = method("Main.run()V");
        new_root.record_call(method("C.c()V"));
        new_root.record_call(method("B.b()V"));

        let divergences = detector().compare(&tree(old_root), &tree(new_root));
        assert_eq!(divergences.len(), 1);
        match &divergences[0] {
            TraceDivergence::MethodCall {
                call:
                    CallDivergence::Different {
                        old_callee,
                        new_callee,
                    },
                ..
            } => {
                assert_eq!(old_callee.as_str(), "A.a()V");
                assert_eq!(new_callee.as_str(), "C.c()V");
            }
            other => panic!("expected Different, got {:?}", other),
        }
    }

    #[test]
    fn test_not_called_method() {
        let mut old_root = method("Main.run()V");
        old_root.record_call(method("A.a()V"));
        old_root.record_call(method("B.b()V"));

        let mut new_root = method("Main.run()V");
        new_root.record_call(method("B.b()V"));

        let divergences = detector().compare(&tree(old_root), &tree(new_root));
        assert_eq!(divergences.len(), 1);
        assert!(matches!(
            &divergences[0],
            TraceDivergence::MethodCall {
                call: CallDivergence::NotCalled { callee },
                ..
            } if callee.as_str() == "A.a()V"
        ));
    }

    #[test]
    fn test_return_value_divergence_once() {
        let mut old_root = method("M.m()I");
        old_root.set_return_value(int_return("5")).unwrap();
        let mut new_root = method("M.m()I");
        new_root.set_return_value(int_return("6")).unwrap();

        let divergences = detector().compare(&tree(old_root), &tree(new_root));
        let returns: Vec<_> = divergences
            .iter()
            .filter(|d| d.divergence_type() == DivergenceType::ReturnValue)
            .collect();
        assert_eq!(returns.len(), 1);
        match returns[0] {
            TraceDivergence::ReturnValue { old, new, .. } => {
                assert_eq!(
                    old,
                    &int_return("5"),
                    "old string form must be retained"
                );
                assert_eq!(new, &int_return("6"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_identity_strings_filtered() {
        let identity = |hash: i64| Value::Object {
            class: "com.example.Widget".to_string(),
            string_form: format!("@{hash:x}"),
            hash,
        };
        let mut old_root = method("M.m()Ljava/lang/Object;");
        old_root.set_return_value(identity(0x1234)).unwrap();
        let mut new_root = method("M.m()Ljava/lang/Object;");
        new_root.set_return_value(identity(0x9999)).unwrap();

        assert!(detector().compare(&tree(old_root.clone()), &tree(new_root.clone())).is_empty());

        // With filtering off, the differing hash counts as a divergence.
        let strict = DivergenceDetector::new(DetectorConfig {
            filter_identity_strings: false,
            ..DetectorConfig::default()
        });
        assert_eq!(strict.compare(&tree(old_root), &tree(new_root)).len(), 1);
    }

    #[test]
    fn test_coverage_divergence_per_offset() {
        let mut old_root = method("M.m()V");
        old_root.record_instruction(0x15, 0);
        old_root.record_instruction(0x15, 4);

        let mut new_root = method("M.m()V");
        new_root.record_instruction(0x15, 0);
        new_root.record_instruction(0x15, 0);
        new_root.record_instruction(0x15, 4);
        // Offset 8 only exists on the new side: no Coverage divergence.
        new_root.record_instruction(0x15, 8);

        let plain = DivergenceDetector::new(DetectorConfig {
            coverage_metrics: false,
            trace_distance_metrics: false,
            ..DetectorConfig::default()
        });
        let divergences = plain.compare(&tree(old_root), &tree(new_root));
        assert_eq!(divergences.len(), 1);
        assert!(matches!(
            &divergences[0],
            TraceDivergence::Coverage {
                offset: 0,
                old_count: 1,
                new_count: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_metric_cardinality_per_pair() {
        let mut old_root = method("M.m()V");
        old_root.record_instruction(0x10, 0);
        old_root.record_instruction(0x10, 0);
        let mut new_root = method("M.m()V");
        new_root.record_instruction(0x10, 0);

        let divergences = detector().compare(&tree(old_root), &tree(new_root));
        let sections = divergences
            .iter()
            .filter(|d| d.divergence_type() == DivergenceType::DivergentSections)
            .count();
        let distances = divergences
            .iter()
            .filter(|d| d.divergence_type() == DivergenceType::TraceDistance)
            .count();
        assert_eq!(sections, 1);
        assert_eq!(distances, 1);
    }

    #[test]
    fn test_parameter_divergence_on_matched_call() {
        let param = |v: &str| Value::Primitive {
            type_tag: "I".to_string(),
            repr: v.to_string(),
        };
        let mut old_root = method("Main.run()V");
        old_root.children.push(ObservedMethod::new(
            InvocationKind::Method,
            MethodIdentifier::new("Util.calc(I)I"),
            vec![param("1")],
        ));
        let mut new_root = method("Main.run()V");
        new_root.children.push(ObservedMethod::new(
            InvocationKind::Method,
            MethodIdentifier::new("Util.calc(I)I"),
            vec![param("2")],
        ));

        let divergences = detector().compare(&tree(old_root), &tree(new_root));
        assert_eq!(divergences.len(), 1);
        match &divergences[0] {
            TraceDivergence::Parameter {
                counterpart, index, ..
            } => {
                assert_eq!(*index, 0);
                assert!(counterpart.is_some());
            }
            other => panic!("expected Parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_anchors_reachable_from_entry() {
        let mut old_root = method("Main.run()V");
        let old_mid = old_root.record_call(method("Mid.step()V"));
        old_mid.record_call(method("Leaf.a()V"));

        let mut new_root = method("Main.run()V");
        let new_mid = new_root.record_call(method("Mid.step()V"));
        new_mid.record_call(method("Leaf.b()V"));

        let new_tree = tree(new_root);
        let divergences = detector().compare(&tree(old_root), &new_tree);
        assert!(!divergences.is_empty());
        for divergence in &divergences {
            assert!(new_tree.reachable_from_entry(divergence.anchor()));
        }
    }

    #[test]
    fn test_divergent_sections_counts_runs() {
        let mut old_root = method("M.m()V");
        let mut new_root = method("M.m()V");
        // Offsets 0,4 differ (one run), 8 equal, 12 differs (second run).
        for offset in [0, 4, 8, 12] {
            old_root.record_instruction(0x1, offset);
            new_root.record_instruction(0x1, offset);
        }
        new_root.record_instruction(0x1, 0);
        new_root.record_instruction(0x1, 4);
        new_root.record_instruction(0x1, 12);

        let old_tree = tree(old_root);
        let new_tree = tree(new_root);
        assert_eq!(divergent_sections(old_tree.entry(), new_tree.entry()), 2);
    }

    #[test]
    fn test_seq_edit_distance() {
        assert_eq!(seq_edit_distance(&[], &[]), 0);
        assert_eq!(seq_edit_distance(&[1, 2, 3], &[1, 2, 3]), 0);
        assert_eq!(seq_edit_distance(&[1, 2, 3], &[1, 3]), 1);
        assert_eq!(seq_edit_distance(&[1, 2], &[3, 4]), 2);
    }
}
