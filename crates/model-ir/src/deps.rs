// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Out-of-sequence dependency analysis.
//!
//! The graph stores its edges implicitly: layer `i` reads layer `i - 1`
//! unless it is a Route or a Shortcut. [`DependencyMap`] reconstructs the
//! explicit edges so slicing and device placement can reason about them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::graph::{GraphState, LayerGraph};
use crate::LayerKind;

/// Producer id → sorted consumer ids for every non-sequential edge.
///
/// Built once from a graph and never edited afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMap {
    edges: BTreeMap<usize, BTreeSet<usize>>,
}

impl DependencyMap {
    /// Scans `graph` in id order and records its skip and concat edges.
    ///
    /// A single-member, ungrouped Route is fused away: its member is recorded
    /// as feeding the layer after the Route. When that Route is the last
    /// layer, no edge is recorded.
    pub fn build<S: GraphState>(graph: &LayerGraph<S>) -> Self {
        let mut edges: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        let n = graph.num_layers();
        for layer in graph.iter_layers() {
            match &layer.kind {
                LayerKind::Shortcut(s) => {
                    edges.entry(s.back_layer).or_default().insert(layer.id);
                }
                LayerKind::Route(r) if r.is_passthrough() => {
                    if layer.id + 1 < n {
                        edges.entry(r.layers[0]).or_default().insert(layer.id + 1);
                    }
                }
                LayerKind::Route(r) => {
                    for &member in &r.layers {
                        edges.entry(member).or_default().insert(layer.id);
                    }
                }
                _ => {}
            }
        }
        tracing::debug!(producers = edges.len(), "built dependency map");
        Self { edges }
    }

    /// Consumers of `producer`, ascending; empty when it has none.
    pub fn consumers(&self, producer: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .get(&producer)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// True if `producer → consumer` is recorded.
    pub fn has_edge(&self, producer: usize, consumer: usize) -> bool {
        self.edges
            .get(&producer)
            .is_some_and(|set| set.contains(&consumer))
    }

    /// Number of producers with at least one recorded consumer.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All `(producer, consumers)` pairs in producer order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeSet<usize>)> {
        self.edges.iter().map(|(p, c)| (*p, c))
    }
}

impl fmt::Display for DependencyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (producer, consumers) in &self.edges {
            let list: Vec<String> = consumers.iter().map(ToString::to_string).collect();
            writeln!(f, "{producer:>4} -> {}", list.join(", "))?;
        }
        Ok(())
    }
}
