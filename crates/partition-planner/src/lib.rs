// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # partition-planner
//!
//! Cuts a validated `LayerGraph` into contiguous slices and works out which
//! tensors cross each cut.
//!
//! - [`SubgraphBoundary`]: boundary inputs, input edges and output edges of
//!   one layer range, computed from the graph's `DependencyMap`.
//! - [`SlicePlan`]: an ordered, gap-free cover of the graph by slices,
//!   each with a preferred device.
//!
//! # Strategies
//!
//! | Strategy | Slices |
//! |---|---|
//! | [`WholeGraph`] | one |
//! | [`SplitAt`] | cut before each listed layer id |
//! | [`EvenSplit`] | `n` slices of near-equal length |
//!
//! # Example
//! ```no_run
//! use partition_planner::{SliceStrategy, SplitAt};
//! use model_ir::ModelLoader;
//! use std::path::Path;
//!
//! let graph = ModelLoader::load(Path::new("./model")).unwrap();
//! let plan = SplitAt::new(vec![10]).plan(&graph).unwrap();
//! println!("{}", plan.summary());
//! ```

mod boundary;
mod error;
pub(crate) mod plan;
pub mod strategy;

pub use boundary::{Edge, SubgraphBoundary};
pub use error::PlannerError;
pub use plan::{Slice, SliceDevice, SlicePlan};
pub use strategy::even::EvenSplit;
pub use strategy::split::SplitAt;
pub use strategy::whole::WholeGraph;
pub use strategy::SliceStrategy;
