// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slicing strategies.
//!
//! A strategy decides where to cut the graph; the plan builder computes the
//! boundary of every resulting slice.

pub mod even;
pub mod split;
pub mod whole;

use model_ir::graph::Validated;
use model_ir::LayerGraph;

use crate::{PlannerError, SlicePlan};

/// Decides how a validated graph is cut into contiguous slices.
pub trait SliceStrategy: Send + Sync {
    /// Human-readable name of this strategy.
    fn name(&self) -> &str;

    /// Produces a slice plan for the given graph.
    fn plan(&self, graph: &LayerGraph<Validated>) -> Result<SlicePlan, PlannerError>;
}
