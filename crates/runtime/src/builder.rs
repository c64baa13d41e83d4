// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Network definition → executable engine.
//!
//! An [`Engine`] is the self-contained result of a build: bindings, layers
//! with their weights in the build precision, custom operator records, and
//! (in quantised mode) per-tensor dynamic ranges. It is what gets persisted.

use std::collections::BTreeMap;
use std::fmt;

use plugin_registry::PluginRecord;
use tensor_core::{DType, Dims};
use tracing::info;

use crate::calibration::CalibrationTable;
use crate::compiler::CompiledNetwork;
use crate::config::{DevicePolicy, Precision};
use crate::network::Device;
use crate::RuntimeError;

/// A named I/O slot of an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    /// Per-item shape; `n` is always 1.
    pub dims: Dims,
    pub dtype: DType,
    pub is_input: bool,
}

impl Binding {
    /// Bytes one batch item occupies.
    pub fn item_bytes(&self) -> usize {
        self.dims.tot() * self.dtype.size_bytes()
    }
}

/// One operation of a built engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineLayer {
    pub name: String,
    pub op_type: String,
    pub device: Device,
    pub precision: Option<DType>,
    pub inputs: Vec<String>,
    pub output: String,
    /// Weight buffers concatenated in the engine's weight type.
    pub weights: Vec<u8>,
    pub plugin: Option<PluginRecord>,
}

/// A built engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    pub name: String,
    pub precision: Precision,
    pub device: DevicePolicy,
    pub dla_core: u32,
    pub max_batch_size: usize,
    /// Inputs in declaration order, then outputs in marking order.
    pub bindings: Vec<Binding>,
    pub layers: Vec<EngineLayer>,
    /// Tensor name → symmetric dynamic range, quantised mode only.
    pub dynamic_ranges: BTreeMap<String, f32>,
}

impl Engine {
    pub fn num_bindings(&self) -> usize {
        self.bindings.len()
    }

    pub fn binding(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }

    pub fn binding_index(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.name == name)
    }

    /// The binding inference writes to: `data`, else the first input.
    pub fn input_index(&self) -> Option<usize> {
        self.binding_index("data")
            .filter(|&i| self.bindings[i].is_input)
            .or_else(|| self.bindings.iter().position(|b| b.is_input))
    }

    /// The binding inference reads from: `out`, else the last output.
    pub fn output_index(&self) -> Option<usize> {
        self.binding_index("out")
            .filter(|&i| !self.bindings[i].is_input)
            .or_else(|| self.bindings.iter().rposition(|b| !b.is_input))
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| b.is_input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(|b| !b.is_input)
    }

    /// Custom operators as `(operation name, record)`.
    pub fn plugins(&self) -> impl Iterator<Item = (&str, &PluginRecord)> {
        self.layers
            .iter()
            .filter_map(|l| l.plugin.as_ref().map(|p| (l.name.as_str(), p)))
    }

    pub fn layers_on(&self, device: Device) -> usize {
        self.layers.iter().filter(|l| l.device == device).count()
    }

    pub fn weight_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.weights.len()).sum()
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Engine '{}' ({}, {}, max batch {})",
            self.name, self.precision, self.device, self.max_batch_size
        )?;
        for (i, b) in self.bindings.iter().enumerate() {
            let dir = if b.is_input { "in " } else { "out" };
            writeln!(f, "  [{i}] {dir} {:<24} {} {}", b.name, b.dims, b.dtype.as_str())?;
        }
        write!(
            f,
            "  {} layers ({} GPU, {} DLA), {} plugins, {} weight bytes",
            self.layers.len(),
            self.layers_on(Device::Gpu),
            self.layers_on(Device::Dla),
            self.plugins().count(),
            self.weight_bytes()
        )
    }
}

/// Builds [`Engine`]s from compiled networks.
#[derive(Debug, Clone, Copy)]
pub struct EngineBuilder {
    max_batch_size: usize,
}

impl EngineBuilder {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Builds an engine named `name`. Quantised networks need `calibration`.
    pub fn build(
        &self,
        name: &str,
        compiled: &CompiledNetwork,
        calibration: Option<&CalibrationTable>,
    ) -> Result<Engine, RuntimeError> {
        if self.max_batch_size == 0 {
            return Err(RuntimeError::Config("max_batch_size must be at least 1".into()));
        }
        let policy = compiled.policy;
        let net = &compiled.network;

        let dynamic_ranges = match (policy.is_int8(), calibration) {
            (true, Some(table)) => net
                .tensors()
                .iter()
                .filter_map(|t| table.dynamic_range(&t.name).map(|r| (t.name.clone(), r)))
                .collect(),
            (true, None) => {
                return Err(RuntimeError::Config(
                    "int8 build without a calibration table".into(),
                ))
            }
            (false, _) => BTreeMap::new(),
        };

        let bindings = net
            .inputs()
            .iter()
            .chain(net.outputs())
            .map(|&t| {
                let t = net.tensor(t);
                Binding {
                    name: t.name.clone(),
                    dims: t.dims,
                    dtype: t.dtype,
                    is_input: t.is_input,
                }
            })
            .collect();

        let layers = net
            .ops()
            .iter()
            .map(|op| {
                let weights = op
                    .kind
                    .weights()
                    .into_iter()
                    .flat_map(|w| w.bytes(policy.weight_dtype))
                    .collect();
                let plugin = match &op.kind {
                    crate::network::OpKind::Plugin(record) => Some(record.clone()),
                    _ => None,
                };
                EngineLayer {
                    name: op.name.clone(),
                    op_type: op.kind.type_name().to_string(),
                    device: op.device,
                    precision: op.precision,
                    inputs: op.inputs.iter().map(|&t| net.tensor(t).name.clone()).collect(),
                    output: net.tensor(op.output).name.clone(),
                    weights,
                    plugin,
                }
            })
            .collect();

        let engine = Engine {
            name: name.to_string(),
            precision: policy.precision,
            device: policy.device,
            dla_core: policy.dla_core,
            max_batch_size: self.max_batch_size,
            bindings,
            layers,
            dynamic_ranges,
        };
        info!(
            engine = %engine.name,
            bindings = engine.num_bindings(),
            layers = engine.layers.len(),
            dla_layers = engine.layers_on(Device::Dla),
            "engine built"
        );
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilationSession, ResolvedPolicy};
    use crate::config::RuntimeConfig;
    use crate::platform::ReferencePlatform;
    use model_ir::{Conv2d, LayerGraph, LayerKind};
    use plugin_registry::PluginRegistry;

    fn compiled(precision: Precision, calibrated: bool) -> CompiledNetwork {
        let mut g = LayerGraph::new("tiny", Dims::chw(3, 4, 4));
        g.push(LayerKind::Conv2d(Conv2d::square(3, 2, 1, 1, 0))).unwrap();
        g.push(LayerKind::Upsample { stride: 2 }).unwrap();
        let g = g.validate().unwrap();
        let platform = ReferencePlatform::jetson();
        let config = RuntimeConfig {
            precision,
            ..Default::default()
        };
        let policy = ResolvedPolicy::resolve(&config, &platform, calibrated);
        CompilationSession::new(&g, &platform, &PluginRegistry::with_builtin(), policy)
            .compile_all()
            .unwrap()
    }

    #[test]
    fn test_bindings_and_weights() {
        let engine = EngineBuilder::new(4).build("tiny", &compiled(Precision::Fp16, false), None).unwrap();
        assert_eq!(engine.num_bindings(), 2);
        assert_eq!(engine.input_index(), Some(0));
        assert_eq!(engine.output_index(), Some(1));
        assert_eq!(engine.bindings[1].name, "out");
        assert_eq!(engine.bindings[1].dims, Dims::chw(2, 8, 8));
        // 3*2 weights + 2 bias, two bytes each.
        assert_eq!(engine.layers[0].weights.len(), 16);
        assert_eq!(engine.plugins().count(), 1);
    }

    #[test]
    fn test_int8_requires_table() {
        let c = compiled(Precision::Int8, true);
        assert!(EngineBuilder::new(1).build("tiny", &c, None).is_err());

        let mut table = CalibrationTable::new();
        table.insert("data", 1.0 / 127.0);
        let engine = EngineBuilder::new(1).build("tiny", &c, Some(&table)).unwrap();
        assert_eq!(engine.precision, Precision::Int8);
        assert!((engine.dynamic_ranges["data"] - 1.0).abs() < 1e-6);
    }
}
