// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph construction and model loading.

/// Errors that can occur when building or loading a layer graph.
///
/// All of them describe a malformed network: nothing downstream can
/// compile a graph that produced one.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model manifest file could not be read.
    #[error("failed to read manifest: {0}")]
    ManifestReadError(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParseError(#[from] serde_json::Error),

    /// The SafeTensors file could not be loaded or holds an unusable tensor.
    #[error("failed to load SafeTensors: {0}")]
    SafeTensorsError(String),

    /// A layer definition is invalid (e.g., wrong weight count).
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// A Route or Shortcut refers to a layer that is missing or not earlier.
    #[error("layer {layer} references layer {target}, which does not precede it")]
    DanglingReference { layer: usize, target: usize },

    /// The graph already holds the maximum number of layers.
    #[error("layer graph is full ({capacity} layers)")]
    CapacityExceeded { capacity: usize },

    /// The graph is otherwise malformed.
    #[error("invalid layer graph: {0}")]
    InvalidGraph(String),
}
