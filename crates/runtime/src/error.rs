// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for compilation, persistence and execution.

/// Errors that can occur while compiling, loading or running an engine.
///
/// None of these is retried internally; a failed compilation produces no
/// engine and no file.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The layer graph is malformed.
    #[error("model error: {0}")]
    Model(#[from] model_ir::ModelError),

    /// The sub-graph range or slice plan is invalid.
    #[error("planner error: {0}")]
    Planner(#[from] partition_planner::PlannerError),

    /// A custom operator record failed to encode or decode.
    #[error("plugin error: {0}")]
    Plugin(#[from] plugin_registry::PluginError),

    /// A host tensor is inconsistent with its declared shape.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The graph cannot be turned into a network definition.
    #[error("structural error: {0}")]
    Structural(String),

    /// A layer reads a tensor that no processed layer produced.
    #[error("missing tensor for layer {layer} (referenced by {consumer})")]
    MissingTensor { layer: usize, consumer: String },

    /// A layer configuration the compiler does not emit.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A persisted engine file is damaged or from an incompatible build.
    #[error("corrupt engine: {0}")]
    CorruptEngine(String),

    /// A fixed capacity or the compiled batch limit would be exceeded.
    #[error("resource limit: {0}")]
    ResourceLimit(String),

    /// An inference input does not match the engine's input binding.
    #[error("binding '{binding}' expects {expected}, got {actual}")]
    BindingMismatch {
        binding: String,
        expected: String,
        actual: String,
    },

    /// The execution stream worker is gone.
    #[error("execution stream closed")]
    StreamClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
