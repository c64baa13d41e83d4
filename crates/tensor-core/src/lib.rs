// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Shape, element-type and buffer primitives shared by the layer graph,
//! the compiler and the execution engine.
//!
//! This crate provides:
//! - [`Dims`]: the (batch, channels, height, width) descriptor every layer
//!   declares for its input and output.
//! - [`DType`]: the element types an engine binding can carry.
//! - [`Weights`]: layer parameters held in both full- and half-precision
//!   copies so the compiler can pick either without reconverting.
//! - [`Tensor`]: an owned host buffer used for inference input and output.

mod dtype;
mod error;
mod shape;
mod tensor;
mod weights;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::Dims;
pub use tensor::Tensor;
pub use weights::Weights;
