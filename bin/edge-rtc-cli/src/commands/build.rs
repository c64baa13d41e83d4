// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `edge-rtc build`: compile or load one engine.

use std::path::PathBuf;

use runtime::{DevicePolicy, InferenceEngine, Precision, RuntimeConfig};

pub fn execute(
    mut config: RuntimeConfig,
    model: PathBuf,
    range: Option<String>,
    precision: Option<String>,
    dla: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(p) = precision {
        config.precision = p.parse::<Precision>()?;
    }
    if dla {
        config.device = DevicePolicy::Dla;
    }
    let range = range.as_deref().map(super::parse_range).transpose()?;
    let graph = super::load_graph(&model)?;
    let path = output.unwrap_or_else(|| config.engine_path(&graph.name));

    let built = InferenceEngine::new(config).build(&graph, range, &path)?;
    println!("{}", built.report().summary());
    for (name, record) in built.plugins() {
        println!("  plugin {name:<24} {}", record.kind());
    }
    Ok(())
}
