// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer parameter buffers.

use half::f16;

use crate::DType;

/// A layer parameter buffer held in full and half precision.
///
/// The half copy is derived once at construction so that compiling the same
/// graph at different precisions never reconverts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Weights {
    full: Vec<f32>,
    half: Vec<f16>,
}

impl Weights {
    /// Builds both copies from full-precision values.
    pub fn new(values: Vec<f32>) -> Self {
        let half = values.iter().copied().map(f16::from_f32).collect();
        Self { full: values, half }
    }

    /// A buffer of `len` copies of `value`.
    pub fn filled(len: usize, value: f32) -> Self {
        Self::new(vec![value; len])
    }

    /// A buffer of `len` zeros.
    pub fn zeros(len: usize) -> Self {
        Self::filled(len, 0.0)
    }

    pub fn len(&self) -> usize {
        self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }

    /// Full-precision values.
    pub fn as_f32(&self) -> &[f32] {
        &self.full
    }

    /// Half-precision values.
    pub fn as_f16(&self) -> &[f16] {
        &self.half
    }

    /// Little-endian bytes of the copy matching `dtype`.
    ///
    /// Quantised compilation keeps full-precision weights; the engine
    /// quantises them with its calibration scales.
    pub fn bytes(&self, dtype: DType) -> Vec<u8> {
        match dtype {
            DType::F16 => self.half.iter().flat_map(|v| v.to_le_bytes()).collect(),
            DType::F32 | DType::I8 => self.full.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }
}

impl From<Vec<f32>> for Weights {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}
