// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slice plan: the output of a slicing strategy.
//!
//! A plan cuts the graph into contiguous slices, each compiled into its own
//! engine and optionally placed on a different device. Together the slices
//! cover every layer exactly once, in order. The plan is the contract
//! between the planner and the compiler.

use model_ir::graph::Validated;
use model_ir::{DependencyMap, LayerGraph};

use crate::{PlannerError, SubgraphBoundary};

/// Device a slice prefers to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceDevice {
    /// General-purpose accelerator only.
    #[default]
    Gpu,
    /// Fixed-function accelerator with general-purpose fallback.
    Dla,
}

impl SliceDevice {
    pub fn as_str(self) -> &'static str {
        match self {
            SliceDevice::Gpu => "gpu",
            SliceDevice::Dla => "dla",
        }
    }
}

/// One contiguous range of layers compiled as a unit.
#[derive(Debug, Clone)]
pub struct Slice {
    /// Position of this slice in the plan.
    pub index: usize,
    pub device: SliceDevice,
    pub boundary: SubgraphBoundary,
}

impl Slice {
    pub fn start(&self) -> usize {
        self.boundary.start
    }

    pub fn end(&self) -> usize {
        self.boundary.end
    }
}

/// The complete plan produced by a [`crate::SliceStrategy`].
#[derive(Debug, Clone)]
pub struct SlicePlan {
    /// Strategy name that produced this plan.
    pub strategy_name: String,
    /// Number of layers in the planned graph.
    pub num_layers: usize,
    /// Ordered slices.
    pub slices: Vec<Slice>,
}

impl SlicePlan {
    /// Returns the total number of slices.
    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    /// Validates the plan.
    ///
    /// Checks:
    /// - Plan is non-empty.
    /// - Slice indices are consecutive starting from 0.
    /// - Each slice starts right after the previous one ends.
    /// - The last slice ends at the last layer.
    pub fn validate(&self) -> Result<(), PlannerError> {
        let fail = |detail: String| PlannerError::StrategyFailed {
            strategy: self.strategy_name.clone(),
            detail,
        };

        if self.slices.is_empty() {
            return Err(PlannerError::EmptyGraph);
        }

        let mut expected_start = 0;
        for (i, slice) in self.slices.iter().enumerate() {
            if slice.index != i {
                return Err(fail(format!("expected slice index {i}, got {}", slice.index)));
            }
            if slice.start() != expected_start {
                return Err(fail(format!(
                    "slice {i} starts at layer {}, expected {expected_start}",
                    slice.start()
                )));
            }
            if slice.end() < slice.start() {
                return Err(fail(format!("slice {i} is empty")));
            }
            expected_start = slice.end() + 1;
        }

        if expected_start != self.num_layers {
            return Err(fail(format!(
                "slices cover {expected_start} of {} layers",
                self.num_layers
            )));
        }
        Ok(())
    }

    /// Returns a human-readable summary of the plan.
    pub fn summary(&self) -> String {
        let ranges: Vec<String> = self
            .slices
            .iter()
            .map(|s| {
                format!(
                    "[{}-{}]@{} ({} in, {} out)",
                    s.start(),
                    s.end(),
                    s.device.as_str(),
                    s.boundary.inputs.len(),
                    s.boundary.output_edges.len()
                )
            })
            .collect();
        format!(
            "Plan '{}': {} slices over {} layers: {}",
            self.strategy_name,
            self.num_slices(),
            self.num_layers,
            ranges.join(", "),
        )
    }
}

/// Builder helper for constructing a `SlicePlan` incrementally.
///
/// Used internally by strategy implementations.
pub(crate) struct PlanBuilder<'g> {
    strategy_name: String,
    graph: &'g LayerGraph<Validated>,
    deps: DependencyMap,
    slices: Vec<Slice>,
}

impl<'g> PlanBuilder<'g> {
    /// Creates a new builder.
    pub fn new(strategy_name: &str, graph: &'g LayerGraph<Validated>) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            graph,
            deps: graph.dependency_map(),
            slices: Vec::new(),
        }
    }

    /// Adds the slice `[start, end]`.
    pub fn add_slice(
        &mut self,
        start: usize,
        end: usize,
        device: SliceDevice,
    ) -> Result<(), PlannerError> {
        let boundary = SubgraphBoundary::extract(self.graph, &self.deps, start, end)?;
        self.slices.push(Slice {
            index: self.slices.len(),
            device,
            boundary,
        });
        Ok(())
    }

    /// Consumes the builder, validates and returns the finished plan.
    pub fn build(self) -> Result<SlicePlan, PlannerError> {
        let plan = SlicePlan {
            strategy_name: self.strategy_name,
            num_layers: self.graph.num_layers(),
            slices: self.slices,
        };
        plan.validate()?;
        tracing::info!("{}", plan.summary());
        Ok(plan)
    }
}
