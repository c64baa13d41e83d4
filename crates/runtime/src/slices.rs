// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One engine per slice of a [`SlicePlan`].
//!
//! Slice `k` of network `net` is written to
//! `<engine_dir>/net_s<k>[_dla]_<precision>.rt`; consecutive engines meet
//! at the reduced-precision boundary tensors the compiler declares.

use std::sync::Arc;

use model_ir::graph::Validated;
use model_ir::LayerGraph;
use partition_planner::{SliceDevice, SlicePlan};
use plugin_registry::PluginRegistry;

use crate::config::{engine_file_name, DevicePolicy, RuntimeConfig};
use crate::engine::{Built, InferenceEngine};
use crate::platform::Platform;
use crate::RuntimeError;

/// Builds (or loads) the engine of every slice in `plan`, in order.
pub fn compile_plan(
    graph: &LayerGraph<Validated>,
    plan: &SlicePlan,
    config: &RuntimeConfig,
    platform: Arc<dyn Platform>,
    registry: Arc<PluginRegistry>,
) -> Result<Vec<InferenceEngine<Built>>, RuntimeError> {
    plan.validate()?;
    if plan.num_layers != graph.num_layers() {
        return Err(RuntimeError::Structural(format!(
            "plan covers {} layers, graph '{}' has {}",
            plan.num_layers,
            graph.name,
            graph.num_layers()
        )));
    }
    tracing::info!("{}", plan.summary());

    let mut engines = Vec::with_capacity(plan.num_slices());
    for slice in &plan.slices {
        let mut slice_config = config.clone();
        slice_config.device = match slice.device {
            SliceDevice::Gpu => DevicePolicy::Gpu,
            SliceDevice::Dla => DevicePolicy::Dla,
        };
        let name = format!("{}_s{}", graph.name, slice.index);
        let path = config
            .engine_dir
            .join(engine_file_name(&name, slice_config.precision, slice_config.device));
        tracing::info!(slice = slice.index, start = slice.start(), end = slice.end(), path = %path.display(), "building slice");

        let built = InferenceEngine::new(slice_config)
            .with_platform(Arc::clone(&platform))
            .with_registry(Arc::clone(&registry))
            .build(graph, Some((slice.start(), slice.end())), &path)?;
        engines.push(built);
    }
    Ok(engines)
}
