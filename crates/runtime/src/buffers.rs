// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-binding I/O buffers sized for the engine's maximum batch.

use tensor_core::{Dims, Tensor};

use crate::builder::{Binding, Engine};
use crate::RuntimeError;

/// Fixed capacity of the buffer table.
pub const MAX_BUFFERS: usize = 10;

/// Storage for one binding.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    pub binding: Binding,
    data: Vec<u8>,
}

impl DeviceBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// One buffer per engine binding, in binding order.
#[derive(Debug, Clone)]
pub struct BufferTable {
    buffers: Vec<DeviceBuffer>,
    max_batch_size: usize,
}

impl BufferTable {
    /// Allocates `max_batch_size` items for every binding of `engine`.
    pub fn allocate(engine: &Engine) -> Result<Self, RuntimeError> {
        if engine.num_bindings() > MAX_BUFFERS {
            return Err(RuntimeError::ResourceLimit(format!(
                "engine '{}' has {} bindings, buffer table holds {MAX_BUFFERS}",
                engine.name,
                engine.num_bindings()
            )));
        }
        let buffers = engine
            .bindings
            .iter()
            .map(|b| {
                let bytes = b.item_bytes().saturating_mul(engine.max_batch_size);
                tracing::debug!(binding = %b.name, bytes, "buffer allocated");
                DeviceBuffer {
                    binding: b.clone(),
                    data: vec![0; bytes],
                }
            })
            .collect();
        Ok(Self {
            buffers,
            max_batch_size: engine.max_batch_size,
        })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceBuffer> {
        self.buffers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DeviceBuffer> {
        self.buffers.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceBuffer> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceBuffer> {
        self.buffers.iter_mut()
    }

    fn slot(&mut self, index: usize) -> Result<&mut DeviceBuffer, RuntimeError> {
        let len = self.buffers.len();
        self.buffers
            .get_mut(index)
            .ok_or_else(|| RuntimeError::ResourceLimit(format!("binding {index} out of {len}")))
    }

    /// Copies `input` into the front of buffer `index`.
    pub fn write(&mut self, index: usize, input: &Tensor) -> Result<(), RuntimeError> {
        let max = self.max_batch_size;
        let buffer = self.slot(index)?;
        let b = &buffer.binding;
        if input.batch() == 0 || input.batch() > max {
            return Err(RuntimeError::ResourceLimit(format!(
                "batch {} outside 1..={max}",
                input.batch()
            )));
        }
        if input.dtype() != b.dtype || !input.dims().same_chw(&b.dims) {
            return Err(RuntimeError::BindingMismatch {
                binding: b.name.clone(),
                expected: format!("{} {}", b.dims, b.dtype.as_str()),
                actual: format!("{} {}", input.dims(), input.dtype().as_str()),
            });
        }
        let bytes = input.as_bytes();
        buffer.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the first `batch` items of buffer `index` out.
    pub fn read(&self, index: usize, batch: usize) -> Result<Tensor, RuntimeError> {
        let buffer = self
            .buffers
            .get(index)
            .ok_or_else(|| RuntimeError::ResourceLimit(format!("binding {index} out of {}", self.len())))?;
        let b = &buffer.binding;
        let dims = Dims::new(batch, b.dims.c, b.dims.h, b.dims.w);
        let bytes = b.item_bytes() * batch;
        if bytes > buffer.data.len() {
            return Err(RuntimeError::ResourceLimit(format!(
                "batch {batch} exceeds buffer '{}'",
                b.name
            )));
        }
        Ok(Tensor::from_bytes(dims, b.dtype, buffer.data[..bytes].to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DevicePolicy, Precision};
    use std::collections::BTreeMap;
    use tensor_core::DType;

    fn engine(bindings: usize, max_batch: usize) -> Engine {
        Engine {
            name: "buffers".into(),
            precision: Precision::Fp32,
            device: DevicePolicy::Gpu,
            dla_core: 0,
            max_batch_size: max_batch,
            bindings: (0..bindings)
                .map(|i| Binding {
                    name: format!("b{i}"),
                    dims: Dims::chw(2, 2, 2),
                    dtype: DType::F32,
                    is_input: i == 0,
                })
                .collect(),
            layers: Vec::new(),
            dynamic_ranges: BTreeMap::new(),
        }
    }

    #[test]
    fn test_capacity_limit() {
        assert!(BufferTable::allocate(&engine(MAX_BUFFERS, 1)).is_ok());
        assert!(matches!(
            BufferTable::allocate(&engine(MAX_BUFFERS + 1, 1)),
            Err(RuntimeError::ResourceLimit(_))
        ));
    }

    #[test]
    fn test_sized_for_max_batch() {
        let table = BufferTable::allocate(&engine(2, 3)).unwrap();
        assert_eq!(table.get(1).unwrap().capacity(), 3 * 8 * 4);
    }

    #[test]
    fn test_write_then_read() {
        let mut table = BufferTable::allocate(&engine(2, 2)).unwrap();
        let dims = Dims::new(2, 2, 2, 2);
        let values: Vec<f32> = (0..16).map(|v| v as f32).collect();
        table.write(0, &Tensor::from_f32(dims, &values).unwrap()).unwrap();
        assert_eq!(table.read(0, 2).unwrap().to_f32_vec().unwrap(), values);
    }

    #[test]
    fn test_write_rejects_mismatch() {
        let mut table = BufferTable::allocate(&engine(2, 1)).unwrap();
        let wrong = Tensor::zeros(Dims::new(1, 3, 2, 2), DType::F32);
        assert!(matches!(table.write(0, &wrong), Err(RuntimeError::BindingMismatch { .. })));
        let too_many = Tensor::zeros(Dims::new(2, 2, 2, 2), DType::F32);
        assert!(matches!(table.write(0, &too_many), Err(RuntimeError::ResourceLimit(_))));
    }
}
