// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `edge-rtc info`: describe an engine file.

use std::path::PathBuf;

use anyhow::Context;
use plugin_registry::PluginRegistry;
use runtime::Engine;

pub fn execute(path: PathBuf) -> anyhow::Result<()> {
    let registry = PluginRegistry::with_builtin();
    let engine = Engine::load(&path, &registry)
        .with_context(|| format!("failed to load engine '{}'", path.display()))?;

    println!("{engine}");
    println!();
    println!(
        "  {:<4} {:<28} {:<16} {:<4} {:<5} {:>10}",
        "Idx", "Operation", "Type", "Dev", "Prec", "Weights"
    );
    println!("  {}", "-".repeat(72));
    for (i, layer) in engine.layers.iter().enumerate() {
        println!(
            "  {:<4} {:<28} {:<16} {:<4} {:<5} {:>8} B",
            i,
            layer.name,
            layer.op_type,
            layer.device,
            layer.precision.map_or("-", |d| d.as_str()),
            layer.weights.len()
        );
    }

    let plugins: Vec<_> = engine.plugins().collect();
    if !plugins.is_empty() {
        println!();
        println!("  Plugins:");
        for (name, record) in plugins {
            println!("   {name:<28} {record:?}");
        }
    }
    if !engine.dynamic_ranges.is_empty() {
        println!();
        println!("  {} calibrated tensors", engine.dynamic_ranges.len());
    }
    Ok(())
}
