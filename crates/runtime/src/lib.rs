// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Compiles a validated `LayerGraph` from `model-ir`, or a contiguous
//! slice of it chosen by `partition-planner`, into an executable engine.
//!
//! ```text
//! LayerGraph ─► CompilationSession ─► NetworkDefinition ─► EngineBuilder ─► Engine ─► file
//!                     │                                          ▲
//!                     └── Platform (fp16 / int8 / DLA)          CalibrationTable
//! ```
//!
//! Engines are cached on disk under `<name>[_dla]_<precision>.rt`; a build
//! whose file already exists loads it instead of compiling. Custom
//! operators are stored through the `plugin-registry` codecs.
//!
//! # Type-State Pipeline
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Built> → InferenceEngine<Ready>
//! ```
//! Transitions are compile-time checked.
//!
//! # Async Execution
//! Inference requests go through a single ordered [`ExecutionStream`];
//! `infer().await` resolves once the request has drained from it.

mod buffers;
mod builder;
mod calibration;
mod compiler;
mod config;
mod engine;
mod error;
mod executor;
mod network;
mod persist;
mod platform;
mod report;
mod slices;
mod stream;

pub use buffers::{BufferTable, DeviceBuffer, MAX_BUFFERS};
pub use builder::{Binding, Engine, EngineBuilder, EngineLayer};
pub use calibration::{
    calibrate, CalibrationSource, CalibrationTable, RawFileBatches, TensorBatches,
};
pub use compiler::{CompilationSession, CompiledNetwork, ResolvedPolicy};
pub use config::{
    calibration_table_path, engine_file_name, DevicePolicy, Precision, RuntimeConfig,
    ENV_BATCH_SIZE, ENV_CALIB_IMAGES, ENV_CALIB_LABELS,
};
pub use engine::{Built, EngineState, Idle, InferenceEngine, Ready};
pub use error::RuntimeError;
pub use executor::{Executor, ZeroFillExecutor};
pub use network::{
    ActivationType, Device, ElementWiseOp, NetworkDefinition, NetworkTensor, OpId, OpKind,
    Operation, PoolType, ResizeKind, TensorId, Window,
};
pub use platform::{Platform, ReferencePlatform};
pub use report::{BuildOutcome, BuildReport};
pub use slices::compile_plan;
pub use stream::ExecutionStream;
