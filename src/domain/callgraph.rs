//! Static Call Graph
//!
//! Version-wide "method A can call method B" relation built from bytecode
//! call instructions. Immutable after construction; supports breadth-first
//! shortest-path distance queries.

use crate::domain::identifier::MethodIdentifier;
use std::collections::{HashMap, VecDeque};

/// Array-backed adjacency over interned method identifiers.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    ids: Vec<MethodIdentifier>,
    index: HashMap<MethodIdentifier, usize>,
    adjacency: Vec<Vec<usize>>,
}

impl CallGraph {
    /// Build from an externally produced method -> callee-list mapping.
    /// Callees that never appear as keys still get interned so they are
    /// addressable as BFS targets.
    pub fn from_edges<I, C>(edges: I) -> Self
    where
        I: IntoIterator<Item = (MethodIdentifier, C)>,
        C: IntoIterator<Item = MethodIdentifier>,
    {
        let mut graph = CallGraph::default();
        for (caller, callees) in edges {
            let from = graph.intern(caller);
            for callee in callees {
                let to = graph.intern(callee);
                if !graph.adjacency[from].contains(&to) {
                    graph.adjacency[from].push(to);
                }
            }
        }
        graph
    }

    fn intern(&mut self, id: MethodIdentifier) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id.clone(), idx);
        self.ids.push(id);
        self.adjacency.push(Vec::new());
        idx
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &MethodIdentifier) -> bool {
        self.index.contains_key(id)
    }

    /// All interned identifiers, in insertion order.
    pub fn identifiers(&self) -> impl Iterator<Item = &MethodIdentifier> {
        self.ids.iter()
    }

    /// Breadth-first shortest-path hop counts from `from` to each target.
    /// Every requested target is present in the result; unreachable targets
    /// (and an unknown `from`) map to `None`. `from == target` yields
    /// `Some(0)`. Terminates on cyclic graphs via the visited set.
    pub fn distance_to(
        &self,
        from: &MethodIdentifier,
        targets: &[MethodIdentifier],
    ) -> HashMap<MethodIdentifier, Option<u32>> {
        let mut result: HashMap<MethodIdentifier, Option<u32>> =
            targets.iter().map(|t| (t.clone(), None)).collect();

        let Some(&start) = self.index.get(from) else {
            return result;
        };

        let mut remaining: HashMap<usize, Vec<&MethodIdentifier>> = HashMap::new();
        for target in targets {
            if let Some(&idx) = self.index.get(target) {
                remaining.entry(idx).or_default().push(target);
            }
        }

        // Plain queue-of-(node, distance) BFS; no manual frontier counters.
        let mut visited = vec![false; self.ids.len()];
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back((start, 0u32));

        while let Some((node, dist)) = queue.pop_front() {
            if let Some(found) = remaining.remove(&node) {
                for target in found {
                    result.insert(target.clone(), Some(dist));
                }
                if remaining.is_empty() {
                    break;
                }
            }
            for &next in &self.adjacency[node] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back((next, dist + 1));
                }
            }
        }

        result
    }

    /// Single-target convenience wrapper. Returns `None` immediately when
    /// `from` has no outgoing edges recorded (dead-end optimization), unless
    /// the query is trivially `from == to`.
    pub fn distance_to_caller(
        &self,
        from: &MethodIdentifier,
        to: &MethodIdentifier,
    ) -> Option<u32> {
        if from == to {
            return Some(0);
        }
        let start = *self.index.get(from)?;
        if self.adjacency[start].is_empty() {
            return None;
        }
        self.distance_to(from, std::slice::from_ref(to))
            .remove(to)
            .flatten()
    }
}
