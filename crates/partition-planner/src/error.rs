// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the partition planner.

/// Errors that can occur during sub-graph extraction and slice planning.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The layer graph is empty.
    #[error("cannot partition an empty layer graph")]
    EmptyGraph,

    /// The requested layer range is reversed or runs past the graph.
    #[error("invalid layer range [{start}, {end}] for a graph of {num_layers} layers")]
    InvalidRange {
        start: usize,
        end: usize,
        num_layers: usize,
    },

    /// The chosen strategy cannot satisfy the given constraints.
    #[error("strategy '{strategy}' failed: {detail}")]
    StrategyFailed { strategy: String, detail: String },
}
