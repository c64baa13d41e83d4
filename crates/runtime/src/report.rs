// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Build summaries.

use std::path::PathBuf;
use std::time::Duration;

use crate::builder::Engine;
use crate::config::{DevicePolicy, Precision};
use crate::network::Device;

/// How an engine was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    /// Compiled from the layer graph and written out.
    Compiled,
    /// Read back from an existing engine file.
    Loaded,
}

/// What a build produced and what it had to give up.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildReport {
    pub engine: String,
    pub path: PathBuf,
    pub outcome: BuildOutcome,
    pub requested_precision: Precision,
    pub precision: Precision,
    pub requested_device: DevicePolicy,
    pub device: DevicePolicy,
    pub gpu_layers: usize,
    pub dla_layers: usize,
    pub plugins: usize,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub weight_bytes: usize,
    pub duration: Duration,
}

impl BuildReport {
    pub fn new(
        engine: &Engine,
        path: PathBuf,
        outcome: BuildOutcome,
        requested: (Precision, DevicePolicy),
        duration: Duration,
    ) -> Self {
        Self {
            engine: engine.name.clone(),
            path,
            outcome,
            requested_precision: requested.0,
            precision: engine.precision,
            requested_device: requested.1,
            device: engine.device,
            gpu_layers: engine.layers_on(Device::Gpu),
            dla_layers: engine.layers_on(Device::Dla),
            plugins: engine.plugins().count(),
            inputs: engine.inputs().map(|b| b.name.clone()).collect(),
            outputs: engine.outputs().map(|b| b.name.clone()).collect(),
            weight_bytes: engine.weight_bytes(),
            duration,
        }
    }

    pub fn downgraded(&self) -> bool {
        self.requested_precision != self.precision || self.requested_device != self.device
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "Engine '{}' {} in {:.2?} → {}\n",
            self.engine,
            match self.outcome {
                BuildOutcome::Compiled => "compiled",
                BuildOutcome::Loaded => "loaded",
            },
            self.duration,
            self.path.display()
        );
        s.push_str(&format!(
            "  precision: {} (requested {})\n  device:    {} (requested {})\n",
            self.precision, self.requested_precision, self.device, self.requested_device
        ));
        s.push_str(&format!(
            "  layers:    {} GPU, {} DLA, {} plugins, {:.1} KB weights\n",
            self.gpu_layers,
            self.dla_layers,
            self.plugins,
            self.weight_bytes as f64 / 1024.0
        ));
        s.push_str(&format!("  inputs:    {}\n", self.inputs.join(", ")));
        s.push_str(&format!("  outputs:   {}", self.outputs.join(", ")));
        s
    }
}
