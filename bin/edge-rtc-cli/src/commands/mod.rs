// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommand implementations and shared helpers.

pub mod build;
pub mod info;
pub mod inspect;
pub mod plan;
pub mod run;

use std::path::Path;

use anyhow::Context;
use model_ir::graph::Validated;
use model_ir::LayerGraph;
use runtime::RuntimeConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over the `-v` count.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// The configuration file if given, else defaults; environment overrides
/// applied on top.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let mut config = match path {
        Some(p) => RuntimeConfig::from_file(p)?,
        None => RuntimeConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

pub fn load_graph(model: &Path) -> anyhow::Result<LayerGraph<Validated>> {
    model_ir::ModelLoader::load(model)
        .with_context(|| format!("failed to load model from '{}'", model.display()))
}

/// Parses `start:end` (inclusive).
pub fn parse_range(raw: &str) -> anyhow::Result<(usize, usize)> {
    let (start, end) = raw
        .split_once(':')
        .with_context(|| format!("range '{raw}' is not 'start:end'"))?;
    let start = start.trim().parse().with_context(|| format!("bad range start in '{raw}'"))?;
    let end = end.trim().parse().with_context(|| format!("bad range end in '{raw}'"))?;
    anyhow::ensure!(start <= end, "range '{raw}' is empty");
    Ok((start, end))
}
