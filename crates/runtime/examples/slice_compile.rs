// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: compile a detector-shaped network whole and in slices.
//!
//! Shows the boundary tensors each slice exchanges and how operations are
//! placed when a slice targets the DLA.
//!
//! ```bash
//! cargo run -p runtime --example slice_compile
//! ```

use std::sync::Arc;

use model_ir::graph::Validated;
use model_ir::{ActivationMode, BatchNorm, Conv2d, LayerGraph, LayerKind, Route, Shortcut};
use partition_planner::{EvenSplit, SliceDevice, SliceStrategy, SplitAt, WholeGraph};
use plugin_registry::PluginRegistry;
use runtime::{compile_plan, ReferencePlatform, RuntimeConfig};
use tensor_core::Dims;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let graph = build_graph()?;
    println!("{}\n", graph.summary());

    let engine_dir = std::env::temp_dir().join("edge-rt-slice-compile");
    let platform = Arc::new(ReferencePlatform::jetson());
    let registry = Arc::new(PluginRegistry::with_builtin());

    let strategies: Vec<Box<dyn SliceStrategy>> = vec![
        Box::new(WholeGraph::new(SliceDevice::Gpu)),
        Box::new(SplitAt::new(vec![6]).with_devices(vec![SliceDevice::Dla, SliceDevice::Gpu])),
        Box::new(EvenSplit::new(3)),
    ];

    for strategy in &strategies {
        let plan = strategy.plan(&graph)?;
        println!("── {} ({} slices)", strategy.name(), plan.num_slices());
        let config = RuntimeConfig {
            engine_dir: engine_dir.join(strategy.name()),
            ..Default::default()
        };
        let engines = compile_plan(&graph, &plan, &config, platform.clone(), registry.clone())?;
        for built in &engines {
            println!("{}\n", built.engine());
        }
    }

    std::fs::remove_dir_all(&engine_dir)?;
    Ok(())
}

/// Two residual stages joined by a route, as in small detectors.
fn build_graph() -> Result<LayerGraph<Validated>, model_ir::ModelError> {
    let mut g = LayerGraph::new("tiny-detector", Dims::chw(3, 32, 32));
    let mut channels = 3;
    for _ in 0..2 {
        let mut conv = Conv2d::square(channels, 16, 3, 1, 1);
        conv.batchnorm = Some(BatchNorm::identity(16));
        let block = g.push(LayerKind::Conv2d(conv))?;
        let act = g.push(LayerKind::Activation(ActivationMode::Leaky { slope: 0.1 }))?;
        g.push(LayerKind::Conv2d(Conv2d::square(16, 16, 3, 1, 1)))?;
        g.push(LayerKind::Shortcut(Shortcut {
            back_layer: act,
            mul: false,
        }))?;
        g.push(LayerKind::Route(Route {
            layers: vec![block, act + 2],
            groups: 1,
            group_id: 0,
        }))?;
        channels = 32;
    }
    g.push(LayerKind::Upsample { stride: 2 })?;
    let last = g.push(LayerKind::Conv2d(Conv2d::square(32, 8, 1, 1, 0)))?;
    g.set_final(last)?;
    g.validate()
}
