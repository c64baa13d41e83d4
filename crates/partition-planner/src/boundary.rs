// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sub-graph boundary extraction.
//!
//! Slicing `[start, end]` out of a graph with skip connections leaves
//! tensors that cross the cut. The ones flowing in must be materialised as
//! engine inputs, the ones flowing out as engine outputs. [`SubgraphBoundary`]
//! finds both, together with the element count of every crossing edge.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use model_ir::graph::GraphState;
use model_ir::{DependencyMap, LayerGraph};

use crate::PlannerError;

/// A producer → consumer edge crossing a slice boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub producer: usize,
    /// `None` when the producer is a network output.
    pub consumer: Option<usize>,
}

impl Edge {
    pub fn new(producer: usize, consumer: usize) -> Self {
        Self {
            producer,
            consumer: Some(consumer),
        }
    }

    pub fn network_output(producer: usize) -> Self {
        Self {
            producer,
            consumer: None,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.consumer {
            Some(c) => write!(f, "{} -> {}", self.producer, c),
            None => write!(f, "{} -> out", self.producer),
        }
    }
}

/// Tensors crossing the edges of the contiguous range `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubgraphBoundary {
    pub start: usize,
    pub end: usize,
    /// Layers outside the range whose output the range reads.
    pub inputs: BTreeSet<usize>,
    /// Incoming edges with the producer's element count (`c * h * w`).
    pub input_edges: BTreeMap<Edge, usize>,
    /// Outgoing edges with the producer's element count.
    pub output_edges: BTreeMap<Edge, usize>,
}

impl SubgraphBoundary {
    /// Computes the boundary of `[start, end]`.
    ///
    /// Layer `start - 1` is the sequential predecessor. When it also feeds
    /// the range through skip edges, only its first in-range consumer edge is
    /// recorded and no separate sequential edge is added. A single-member,
    /// ungrouped Route at `start - 1` is looked through: its member, which
    /// the dependency map already wires to `start`, is the real input.
    ///
    /// Layer `end` is always an output, as is every final layer in range
    /// and every layer whose out-of-sequence consumers lie past `end`.
    pub fn extract<S: GraphState>(
        graph: &LayerGraph<S>,
        deps: &DependencyMap,
        start: usize,
        end: usize,
    ) -> Result<Self, PlannerError> {
        let n = graph.num_layers();
        if n == 0 {
            return Err(PlannerError::EmptyGraph);
        }
        if start > end || end >= n {
            return Err(PlannerError::InvalidRange {
                start,
                end,
                num_layers: n,
            });
        }
        let size = |id: usize| graph.layer(id).map_or(0, |l| l.output_dim.tot());

        let mut inputs = BTreeSet::new();
        let mut input_edges = BTreeMap::new();
        let mut predecessor_seen = false;

        for producer in 0..start {
            for consumer in deps.consumers(producer) {
                if consumer < start || consumer > end {
                    continue;
                }
                if producer + 1 == start {
                    if !predecessor_seen {
                        inputs.insert(producer);
                        input_edges.insert(Edge::new(producer, consumer), size(producer));
                        predecessor_seen = true;
                    }
                } else {
                    inputs.insert(producer);
                    input_edges
                        .entry(Edge::new(producer, consumer))
                        .or_insert_with(|| size(producer));
                }
            }
        }

        if start > 0 {
            let before = start - 1;
            let fused = graph.layer(before).is_some_and(|l| l.is_passthrough_route());
            if !fused && !predecessor_seen {
                inputs.insert(before);
                input_edges.insert(Edge::new(before, start), size(before));
            }
        }

        let mut output_edges = BTreeMap::new();
        for id in start..=end {
            for consumer in deps.consumers(id).filter(|&c| c > end) {
                output_edges.insert(Edge::new(id, consumer), size(id));
            }
            let is_final = graph.layer(id).is_some_and(|l| l.is_final);
            if is_final || id + 1 == n {
                output_edges.insert(Edge::network_output(id), size(id));
            }
        }
        if end + 1 < n {
            output_edges.insert(Edge::new(end, end + 1), size(end));
        }

        tracing::debug!(
            start,
            end,
            inputs = inputs.len(),
            outputs = output_edges.len(),
            "extracted sub-graph boundary"
        );

        Ok(Self {
            start,
            end,
            inputs,
            input_edges,
            output_edges,
        })
    }

    /// Layers inside the range whose output leaves it.
    pub fn outputs(&self) -> BTreeSet<usize> {
        self.output_edges.keys().map(|e| e.producer).collect()
    }

    /// Number of layers in the range.
    pub fn num_layers(&self) -> usize {
        self.end - self.start + 1
    }

    /// Total elements read across the boundary per batch item.
    pub fn input_elements(&self) -> usize {
        self.input_edges.values().sum()
    }

    /// Total elements written across the boundary per batch item.
    pub fn output_elements(&self) -> usize {
        self.output_edges.values().sum()
    }
}

impl fmt::Display for SubgraphBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "layers [{}, {}]", self.start, self.end)?;
        for (edge, size) in &self.input_edges {
            writeln!(f, "  in  {edge} ({size} elements)")?;
        }
        for (edge, size) in &self.output_edges {
            writeln!(f, "  out {edge} ({size} elements)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Conv2d, LayerKind, Route, Shortcut};
    use tensor_core::Dims;

    fn conv() -> LayerKind {
        LayerKind::Conv2d(Conv2d::square(4, 4, 3, 1, 1))
    }

    fn shortcut(back_layer: usize) -> LayerKind {
        LayerKind::Shortcut(Shortcut { back_layer, mul: false })
    }

    fn graph(kinds: Vec<LayerKind>) -> LayerGraph<model_ir::graph::Validated> {
        let mut g = LayerGraph::new("t", Dims::chw(4, 8, 8));
        for kind in kinds {
            g.push(kind).unwrap();
        }
        g.validate().unwrap()
    }

    fn extract(g: &LayerGraph<model_ir::graph::Validated>, s: usize, e: usize) -> SubgraphBoundary {
        SubgraphBoundary::extract(g, &g.dependency_map(), s, e).unwrap()
    }

    #[test]
    fn test_sequential_graph_every_range() {
        let g = graph((0..5).map(|_| conv()).collect());
        for start in 0..5 {
            for end in start..5 {
                let b = extract(&g, start, end);
                let expected_in: BTreeSet<usize> = start.checked_sub(1).into_iter().collect();
                assert_eq!(b.inputs, expected_in, "[{start}, {end}]");
                assert_eq!(b.outputs(), BTreeSet::from([end]), "[{start}, {end}]");
                if start > 0 {
                    assert_eq!(b.input_edges[&Edge::new(start - 1, start)], 256);
                }
            }
        }
    }

    #[test]
    fn test_whole_graph_reports_finals_and_last() {
        let mut g = LayerGraph::new("t", Dims::chw(4, 8, 8));
        for _ in 0..4 {
            g.push(conv()).unwrap();
        }
        g.set_final(1).unwrap();
        let g = g.validate().unwrap();
        let b = extract(&g, 0, 3);
        assert!(b.inputs.is_empty());
        assert_eq!(b.outputs(), BTreeSet::from([1, 3]));
        assert!(b.output_edges.contains_key(&Edge::network_output(1)));
        assert!(b.output_edges.contains_key(&Edge::network_output(3)));
    }

    #[test]
    fn test_shortcut_back_layer_is_input() {
        // 0 conv, 1 conv, 2 conv, 3 shortcut(1)
        let g = graph(vec![conv(), conv(), conv(), shortcut(1)]);
        let b = extract(&g, 2, 3);
        assert_eq!(b.inputs, BTreeSet::from([1]));
        assert_eq!(b.outputs(), BTreeSet::from([3]));
        // The skip edge was seen first, so the sequential edge is not added.
        assert_eq!(b.input_edges.keys().copied().collect::<Vec<_>>(), vec![Edge::new(1, 3)]);
    }

    #[test]
    fn test_predecessor_counted_once_across_skip_edges() {
        // 0 conv, 1 conv, 2 conv, 3 shortcut(1), 4 route[1, 3]
        let route = LayerKind::Route(Route { layers: vec![1, 3], groups: 1, group_id: 0 });
        let g = graph(vec![conv(), conv(), conv(), shortcut(1), route]);
        let b = extract(&g, 2, 4);
        assert_eq!(b.inputs, BTreeSet::from([1]));
        assert_eq!(b.input_edges.len(), 1);
        assert!(b.input_edges.contains_key(&Edge::new(1, 3)));
        assert!(!b.input_edges.contains_key(&Edge::new(1, 4)));
        assert!(!b.input_edges.contains_key(&Edge::new(1, 2)));
    }

    #[test]
    fn test_far_skip_plus_sequential_predecessor() {
        // 0..3 conv, 4 shortcut(0)
        let g = graph(vec![conv(), conv(), conv(), conv(), shortcut(0)]);
        let b = extract(&g, 2, 4);
        assert_eq!(b.inputs, BTreeSet::from([0, 1]));
        assert_eq!(
            b.input_edges.keys().copied().collect::<Vec<_>>(),
            vec![Edge::new(0, 4), Edge::new(1, 2)]
        );
        assert_eq!(b.input_elements(), 512);
    }

    #[test]
    fn test_passthrough_route_before_start_is_looked_through() {
        // 0 conv, 1 conv, 2 route[0], 3 conv
        let route = LayerKind::Route(Route { layers: vec![0], groups: 1, group_id: 0 });
        let g = graph(vec![conv(), conv(), route, conv()]);
        let b = extract(&g, 3, 3);
        assert_eq!(b.inputs, BTreeSet::from([0]));
        assert!(b.input_edges.contains_key(&Edge::new(0, 3)));
    }

    #[test]
    fn test_skip_past_end_is_output() {
        // 0..3 conv, 4 shortcut(1)
        let g = graph(vec![conv(), conv(), conv(), conv(), shortcut(1)]);
        let b = extract(&g, 0, 2);
        assert_eq!(b.outputs(), BTreeSet::from([1, 2]));
        assert!(b.output_edges.contains_key(&Edge::new(1, 4)));
        assert!(b.output_edges.contains_key(&Edge::new(2, 3)));
        assert!(b.to_string().contains("out 1 -> 4"));
    }

    #[test]
    fn test_invalid_range() {
        let g = graph(vec![conv(), conv()]);
        let deps = g.dependency_map();
        assert!(SubgraphBoundary::extract(&g, &deps, 1, 0).is_err());
        assert!(matches!(
            SubgraphBoundary::extract(&g, &deps, 0, 2),
            Err(PlannerError::InvalidRange { num_layers: 2, .. })
        ));
    }
}
