//! Metric Aggregation & Target Ranking
//!
//! Reduces raw divergences plus syntax-change data into per-target scaled
//! scores and a total order over testing targets. Non-local impact is
//! weighted by call-graph distance from the syntax-change site.

use crate::domain::callgraph::CallGraph;
use crate::domain::divergence::TraceDivergence;
use crate::domain::identifier::MethodIdentifier;
use crate::domain::metrics::{raw_contribution, MetricChannel, ScalingPolicy};
use crate::domain::method_data::MethodDataTree;
use crate::domain::syntax_change::{ChangeKind, ChangeSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Scores closer than this are considered equal when ranking; guards
/// against floating-point jitter producing an unstable order.
pub const SCORE_EPSILON: f64 = 0.01;

/// One matched trace pair's comparison output: the new-side tree and the
/// divergences the detector produced for it.
#[derive(Debug)]
pub struct Comparison {
    pub tree: MethodDataTree,
    pub divergences: Vec<TraceDivergence>,
}

/// Final ranked output unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target_kind", rename_all = "snake_case")]
pub enum TestingTarget {
    /// A syntax change no trace ever exercised or propagated to.
    SyntaxOnly {
        identifier: String,
        change_count: usize,
        score: f64,
    },
    /// A diverging method with no matching syntax change reachable.
    TraceOnly { identifier: String, score: f64 },
    /// A syntax change with measured divergence.
    Impact {
        identifier: String,
        score: f64,
        /// True when the changed code itself executed and diverged
        /// (local impact), as opposed to impact observed only downstream.
        exercised: bool,
        change_count: usize,
        affected_methods: Vec<String>,
    },
}

impl TestingTarget {
    pub fn identifier(&self) -> &str {
        match self {
            TestingTarget::SyntaxOnly { identifier, .. }
            | TestingTarget::TraceOnly { identifier, .. }
            | TestingTarget::Impact { identifier, .. } => identifier,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            TestingTarget::SyntaxOnly { score, .. }
            | TestingTarget::TraceOnly { score, .. }
            | TestingTarget::Impact { score, .. } => *score,
        }
    }

    /// Impact targets outrank everything; among them, exercised change
    /// sites outrank unexercised ones regardless of score. Syntax-only and
    /// trace-only targets share the lowest class.
    fn rank_class(&self) -> u8 {
        match self {
            TestingTarget::Impact {
                exercised: true, ..
            } => 3,
            TestingTarget::Impact { .. } => 2,
            TestingTarget::SyntaxOnly { .. } | TestingTarget::TraceOnly { .. } => 1,
        }
    }

    /// Scores quantized at [`SCORE_EPSILON`]; quantizing (rather than an
    /// epsilon band) keeps the comparator a strict weak ordering.
    fn quantized_score(&self) -> i64 {
        (self.score() / SCORE_EPSILON).round() as i64
    }

    /// Total order, most test-worthy first.
    pub fn compare(&self, other: &TestingTarget) -> Ordering {
        other
            .rank_class()
            .cmp(&self.rank_class())
            .then_with(|| other.quantized_score().cmp(&self.quantized_score()))
            .then_with(|| self.identifier().cmp(other.identifier()))
    }
}

/// Per-method accumulation of raw channel values across all comparisons.
#[derive(Debug, Default)]
struct MethodAccumulator {
    /// Anchored at a syntactically changed method.
    local: bool,
    /// Change sites this method's own changes belong to (local only).
    sites: Vec<String>,
    raw: HashMap<MetricChannel, Vec<f64>>,
}

impl MethodAccumulator {
    fn channel_average(&self, channel: MetricChannel) -> f64 {
        match self.raw.get(&channel) {
            Some(values) if !values.is_empty() => {
                values.iter().sum::<f64>() / values.len() as f64
            }
            // Zero occurrences contribute zero, not an error.
            _ => 0.0,
        }
    }

    /// The method's six scaled channel averages summed. `distance` carries
    /// the linear hop term for non-local methods; it is added to channels
    /// that actually occurred, before scaling.
    fn scaled_sum(&self, policy: &ScalingPolicy, distance: Option<u32>) -> f64 {
        let sections_avg = self.channel_average(MetricChannel::DivergentSections);
        let mut total = 0.0;
        for channel in MetricChannel::ALL {
            let mut value = self.channel_average(channel);
            if value == 0.0 {
                continue;
            }
            if let Some(hops) = distance {
                value += policy.distance_term(hops);
            }
            total += value * policy.channel_scale(channel, self.local, sections_avg);
        }
        total
    }
}

/// Collects divergences and syntax changes into ranked testing targets.
pub struct MetricAggregator<'a> {
    policy: &'a ScalingPolicy,
    callgraph: &'a CallGraph,
    changes: &'a ChangeSet,
}

impl<'a> MetricAggregator<'a> {
    pub fn new(
        policy: &'a ScalingPolicy,
        callgraph: &'a CallGraph,
        changes: &'a ChangeSet,
    ) -> Self {
        Self {
            policy,
            callgraph,
            changes,
        }
    }

    /// Reduce all comparisons of one version pair into a ranked target list.
    pub fn aggregate(&self, comparisons: &[Comparison]) -> Vec<TestingTarget> {
        let methods = self.accumulate(comparisons);

        // Partition: local methods feed their own change site; non-local
        // methods are attributed to the nearest reachable site.
        let mut site_local: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut non_local: Vec<&MethodIdentifier> = Vec::new();

        for (identifier, acc) in &methods {
            if acc.local {
                let sum = acc.scaled_sum(self.policy, None);
                let mut sites = acc.sites.clone();
                sites.sort_unstable();
                sites.dedup();
                for site in sites {
                    site_local.entry(site).or_default().push(sum);
                }
            } else {
                non_local.push(identifier);
            }
        }

        let attribution = self.attribute_non_local(&non_local);
        let mut site_non_local: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
        let mut trace_only: Vec<&MethodIdentifier> = Vec::new();
        for identifier in non_local {
            match attribution.get(identifier) {
                Some((site, hops)) => {
                    let sum = methods[identifier].scaled_sum(self.policy, Some(*hops));
                    site_non_local
                        .entry(site.clone())
                        .or_default()
                        .push((identifier.access_string().to_string(), sum));
                }
                None => trace_only.push(identifier),
            }
        }

        let mut targets = Vec::new();

        for site in self.changes.change_sites() {
            let syntax_score = self.syntax_score(site);
            let local = site_local.get(site);
            let site_nl = site_non_local.get(site);

            match (local, site_nl) {
                (None, None) => targets.push(TestingTarget::SyntaxOnly {
                    identifier: site.to_string(),
                    change_count: self.changes.changes_for(site).len(),
                    score: syntax_score,
                }),
                (local, site_nl) => {
                    let local_sum = local.map(|v| average(v)).unwrap_or(0.0);
                    let (non_local_sum, affected) = match site_nl {
                        Some(entries) => {
                            let values: Vec<f64> =
                                entries.iter().map(|(_, v)| *v).collect();
                            let mut names: Vec<String> =
                                entries.iter().map(|(n, _)| n.clone()).collect();
                            names.sort_unstable();
                            names.dedup();
                            let count_term = names.len() as f64
                                * self.policy.affected_method_count;
                            (average(&values) + count_term, names)
                        }
                        None => (0.0, Vec::new()),
                    };
                    targets.push(TestingTarget::Impact {
                        identifier: site.to_string(),
                        score: syntax_score + local_sum + non_local_sum,
                        exercised: local.is_some(),
                        change_count: self.changes.changes_for(site).len(),
                        affected_methods: affected,
                    });
                }
            }
        }

        // Diverging methods no change site can reach: still worth attention.
        for identifier in trace_only {
            let score = methods[identifier].scaled_sum(self.policy, None);
            debug!(method = %identifier, score, "divergence with no reachable change site");
            targets.push(TestingTarget::TraceOnly {
                identifier: identifier.access_string().to_string(),
                score,
            });
        }

        targets.sort_by(|a, b| a.compare(b));
        targets
    }

    fn accumulate(
        &self,
        comparisons: &[Comparison],
    ) -> BTreeMap<MethodIdentifier, MethodAccumulator> {
        let mut methods: BTreeMap<MethodIdentifier, MethodAccumulator> = BTreeMap::new();
        for comparison in comparisons {
            for divergence in &comparison.divergences {
                let anchor = comparison.tree.node(divergence.anchor());
                let acc = methods.entry(anchor.identifier.clone()).or_default();
                if anchor.modified {
                    acc.local = true;
                    for change in &anchor.changes {
                        if !acc.sites.contains(&change.unique_access) {
                            acc.sites.push(change.unique_access.clone());
                        }
                    }
                }
                let (channel, value) = raw_contribution(divergence);
                acc.raw.entry(channel).or_default().push(value);
            }
        }
        methods
    }

    /// Nearest reachable change site per non-local method, by BFS hop count
    /// from the site's methods. Methods unreachable from every site get no
    /// attribution.
    fn attribute_non_local(
        &self,
        methods: &[&MethodIdentifier],
    ) -> HashMap<MethodIdentifier, (String, u32)> {
        let mut best: HashMap<MethodIdentifier, (String, u32)> = HashMap::new();
        if methods.is_empty() {
            return best;
        }
        let targets: Vec<MethodIdentifier> =
            methods.iter().map(|&m| m.clone()).collect();

        for site in self.changes.change_sites() {
            // A site names a class or a class.method; every graph method
            // under that access string is a BFS origin.
            let origins: Vec<MethodIdentifier> = self
                .callgraph
                .identifiers()
                .filter(|id| {
                    id.access_string() == site || id.class_name() == site
                })
                .cloned()
                .collect();
            for origin in origins {
                let distances = self.callgraph.distance_to(&origin, &targets);
                for (target, hops) in distances {
                    let Some(hops) = hops else { continue };
                    match best.get(&target) {
                        Some((_, current)) if *current <= hops => {}
                        _ => {
                            best.insert(target, (site.to_string(), hops));
                        }
                    }
                }
            }
        }
        best
    }

    fn syntax_score(&self, site: &str) -> f64 {
        self.changes
            .changes_for(site)
            .iter()
            .map(|change| match change.kind {
                ChangeKind::NewClass => self.policy.new_class_change_count,
                _ => self.policy.syntax_change_count,
            })
            .sum()
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
