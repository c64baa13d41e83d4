// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `edge-rtc plan`: one engine per slice.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use partition_planner::{SliceDevice, SliceStrategy, SplitAt};
use plugin_registry::PluginRegistry;
use runtime::{compile_plan, ReferencePlatform, RuntimeConfig};

pub fn execute(
    config: RuntimeConfig,
    model: PathBuf,
    split: String,
    devices: Option<String>,
) -> anyhow::Result<()> {
    let points = split
        .split(',')
        .map(|p| p.trim().parse::<usize>().with_context(|| format!("bad split point '{p}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let devices = devices
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|d| !d.trim().is_empty())
        .map(|d| match d.trim() {
            "gpu" => Ok(SliceDevice::Gpu),
            "dla" => Ok(SliceDevice::Dla),
            other => anyhow::bail!("unknown device '{other}'; expected 'gpu' or 'dla'"),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let graph = super::load_graph(&model)?;
    let plan = SplitAt::new(points).with_devices(devices).plan(&graph)?;
    println!("{}", plan.summary());

    let engines = compile_plan(
        &graph,
        &plan,
        &config,
        Arc::new(ReferencePlatform::default()),
        Arc::new(PluginRegistry::with_builtin()),
    )?;
    for built in &engines {
        println!("{}", built.report().summary());
        println!();
    }
    Ok(())
}
