// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backend hook that runs a built engine over its buffers.

use crate::buffers::BufferTable;
use crate::builder::Engine;
use crate::RuntimeError;

/// Executes an engine's layers for `batch` items, reading inputs from and
/// writing outputs to `buffers`.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, engine: &Engine, buffers: &mut BufferTable, batch: usize) -> Result<(), RuntimeError>;
}

/// Writes zeros to the first `batch` items of every output binding.
///
/// Stands in where no kernel backend is linked; it exercises the buffer
/// and stream plumbing with deterministic results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroFillExecutor;

impl Executor for ZeroFillExecutor {
    fn name(&self) -> &str {
        "zero-fill"
    }

    fn execute(&self, engine: &Engine, buffers: &mut BufferTable, batch: usize) -> Result<(), RuntimeError> {
        if batch > engine.max_batch_size {
            return Err(RuntimeError::ResourceLimit(format!(
                "batch {batch} exceeds engine maximum {}",
                engine.max_batch_size
            )));
        }
        for buffer in buffers.iter_mut().filter(|b| !b.binding.is_input) {
            let used = (buffer.binding.item_bytes() * batch).min(buffer.capacity());
            buffer.as_bytes_mut()[..used].fill(0);
        }
        tracing::trace!(engine = %engine.name, batch, layers = engine.layers.len(), "executed");
        Ok(())
    }
}
