// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! The in-memory description of a convolutional network as the compiler
//! sees it:
//!
//! - [`Layer`] / [`LayerKind`]: one stage of the network; the kind is a
//!   closed enum so every consumer matches it exhaustively.
//! - [`LayerGraph`]: the ordered, capacity-bounded layer list, with a
//!   **type-state pattern** (`Loaded` → `Validated`).
//! - [`DependencyMap`]: the skip and concat edges the flat list leaves
//!   implicit.
//! - [`ModelLoader`] / [`ModelManifest`]: build a graph from a JSON
//!   manifest and an optional SafeTensors weight file.
//!
//! # Example
//! ```
//! use model_ir::{Conv2d, LayerGraph, LayerKind, Shortcut};
//! use tensor_core::Dims;
//!
//! let mut graph = LayerGraph::new("residual", Dims::chw(8, 32, 32));
//! graph.push(LayerKind::Conv2d(Conv2d::square(8, 8, 3, 1, 1))).unwrap();
//! graph.push(LayerKind::Conv2d(Conv2d::square(8, 8, 3, 1, 1))).unwrap();
//! graph.push(LayerKind::Shortcut(Shortcut { back_layer: 0, mul: false })).unwrap();
//!
//! let graph = graph.validate().unwrap();
//! assert!(graph.dependency_map().has_edge(0, 2));
//! ```

mod deps;
mod error;
pub mod graph;
mod layer;
mod loader;
pub mod manifest;

pub use deps::DependencyMap;
pub use error::ModelError;
pub use graph::{LayerGraph, MAX_LAYERS};
pub use layer::{
    window_extent, ActivationMode, BatchNorm, Conv2d, DeformConv2d, Dense, Layer, LayerKind,
    Pooling, PoolingMode, Region, ResizeMode, Route, Shortcut, Yolo,
};
pub use loader::ModelLoader;
pub use manifest::ModelManifest;
