// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `edge-rtc run`: one zero-input inference through an engine file.
//!
//! Demonstrates the type-state pipeline:
//! ```text
//! InferenceEngine<Idle> → load → <Built> → prepare → <Ready> → infer
//! ```

use std::path::PathBuf;
use std::time::Instant;

use runtime::{InferenceEngine, RuntimeConfig};
use tensor_core::Tensor;

pub async fn execute(config: RuntimeConfig, engine: PathBuf, batch: usize) -> anyhow::Result<()> {
    let mut ready = InferenceEngine::new(config).load(&engine)?.prepare()?;

    let binding = ready
        .engine()
        .input_index()
        .and_then(|i| ready.engine().binding(i))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("engine has no input binding"))?;
    let input = Tensor::zeros(binding.dims.with_batch(batch), binding.dtype);

    let started = Instant::now();
    let output = ready.infer(&input).await?;
    let elapsed = started.elapsed();

    println!("  Engine:  {}", ready.engine().name);
    println!("  Input:   {} {} ({})", binding.name, input.dims(), binding.dtype.as_str());
    println!("  Output:  {} ({})", output.dims(), output.dtype().as_str());
    println!("  Latency: {elapsed:.2?} for batch {batch}");
    Ok(())
}
