// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Owned host tensors used at the inference boundary.

use crate::{DType, Dims, TensorError};

/// An owned, batched tensor stored as a flat little-endian byte buffer.
///
/// `Tensor` carries inference input into an engine and results back out.
/// The buffer always holds `dims.n * dims.tot()` elements of `dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dims: Dims,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// Creates a new tensor filled with zeros.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, Dims, Tensor};
    /// let t = Tensor::zeros(Dims::new(2, 3, 1, 1), DType::F32);
    /// assert_eq!(t.size_bytes(), 24);
    /// ```
    pub fn zeros(dims: Dims, dtype: DType) -> Self {
        let size = Self::expected_bytes(dims, dtype);
        Self {
            dims,
            dtype,
            data: vec![0u8; size],
        }
    }

    /// Creates a tensor from raw bytes.
    ///
    /// Returns an error if the buffer size does not match the shape and dtype.
    pub fn from_bytes(dims: Dims, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = Self::expected_bytes(dims, dtype);
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dims, dtype, data })
    }

    /// Creates an `F32` tensor from a slice of values.
    pub fn from_f32(dims: Dims, values: &[f32]) -> Result<Self, TensorError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(dims, DType::F32, data)
    }

    fn expected_bytes(dims: Dims, dtype: DType) -> usize {
        dims.n * dims.tot() * dtype.size_bytes()
    }

    /// Returns the tensor's shape.
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Returns the batch size.
    pub fn batch(&self) -> usize {
        self.dims.n
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the raw byte slice backing this tensor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns a mutable reference to the raw byte buffer.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Returns the memory footprint of this tensor in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Decodes the buffer as `f32` values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        match self.dtype {
            DType::F32 => Ok(self
                .data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()),
            DType::F16 => Ok(self
                .data
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect()),
            other => Err(TensorError::UnsupportedDType {
                op: "to_f32_vec",
                dtype: other,
            }),
        }
    }
}
