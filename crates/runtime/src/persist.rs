// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Engine file format.
//!
//! ```text
//! magic "ERTE"  version u32
//! header        name, precision u8, device u8, dla_core u32, max_batch u32
//! bindings      count, then name, is_input, c, h, w, dtype
//! layers        count, then name, type, device, precision, inputs, output, weights
//! ranges        count, then name, range f32
//! plugins       count, then operation name and encoded record (length-prefixed)
//! ```
//!
//! All integers are little-endian. Plugin records are decoded through the
//! registry by the operation name's prefix; a record whose decoder does not
//! consume exactly its declared length is rejected.

use std::collections::BTreeMap;
use std::path::Path;

use plugin_registry::{ByteReader, ByteWriter, PluginError, PluginRegistry};
use tensor_core::{DType, Dims};
use tracing::info;

use crate::builder::{Binding, Engine, EngineLayer};
use crate::config::{DevicePolicy, Precision};
use crate::network::Device;
use crate::RuntimeError;

const MAGIC: &[u8; 4] = b"ERTE";
const VERSION: u32 = 1;
const NO_PRECISION: i32 = -1;

fn corrupt(e: PluginError) -> RuntimeError {
    RuntimeError::CorruptEngine(e.to_string())
}

fn len_u32(len: usize, what: &str) -> Result<u32, RuntimeError> {
    u32::try_from(len).map_err(|_| RuntimeError::ResourceLimit(format!("{what} count {len} too large")))
}

impl Engine {
    /// Serialises the engine, encoding plugin records through `registry`.
    pub fn serialize(&self, registry: &PluginRegistry) -> Result<Vec<u8>, RuntimeError> {
        let mut w = ByteWriter::new();
        w.write_raw(MAGIC);
        w.write_u32(VERSION);

        w.write_str(&self.name);
        w.write_u8(self.precision.code());
        w.write_u8(match self.device {
            DevicePolicy::Gpu => 0,
            DevicePolicy::Dla => 1,
        });
        w.write_u32(self.dla_core);
        w.write_u32(len_u32(self.max_batch_size, "batch")?);

        w.write_u32(len_u32(self.bindings.len(), "binding")?);
        for b in &self.bindings {
            w.write_str(&b.name);
            w.write_bool(b.is_input);
            w.write_u32(len_u32(b.dims.c, "channel")?);
            w.write_u32(len_u32(b.dims.h, "height")?);
            w.write_u32(len_u32(b.dims.w, "width")?);
            w.write_i32(b.dtype.wire_code());
        }

        w.write_u32(len_u32(self.layers.len(), "layer")?);
        for l in &self.layers {
            w.write_str(&l.name);
            w.write_str(&l.op_type);
            w.write_u8(match l.device {
                Device::Gpu => 0,
                Device::Dla => 1,
            });
            w.write_i32(l.precision.map_or(NO_PRECISION, DType::wire_code));
            w.write_u32(len_u32(l.inputs.len(), "input")?);
            for input in &l.inputs {
                w.write_str(input);
            }
            w.write_str(&l.output);
            w.write_bytes(&l.weights);
        }

        w.write_u32(len_u32(self.dynamic_ranges.len(), "range")?);
        for (name, range) in &self.dynamic_ranges {
            w.write_str(name);
            w.write_f32(*range);
        }

        let plugins: Vec<_> = self.plugins().collect();
        w.write_u32(len_u32(plugins.len(), "plugin")?);
        for (name, record) in plugins {
            w.write_str(name);
            w.write_bytes(&registry.encode(record)?);
        }
        Ok(w.into_bytes())
    }

    /// Reconstructs an engine written by [`Engine::serialize`].
    pub fn deserialize(bytes: &[u8], registry: &PluginRegistry) -> Result<Self, RuntimeError> {
        let mut r = ByteReader::new(bytes);
        let mut magic = [0u8; 4];
        for b in &mut magic {
            *b = r.read_u8().map_err(corrupt)?;
        }
        if &magic != MAGIC {
            return Err(RuntimeError::CorruptEngine(format!("bad magic {magic:?}")));
        }
        let version = r.read_u32().map_err(corrupt)?;
        if version != VERSION {
            return Err(RuntimeError::CorruptEngine(format!(
                "unsupported version {version}, expected {VERSION}"
            )));
        }

        let name = r.read_str().map_err(corrupt)?;
        let code = r.read_u8().map_err(corrupt)?;
        let precision = Precision::from_code(code)
            .ok_or_else(|| RuntimeError::CorruptEngine(format!("unknown precision code {code}")))?;
        let device = match r.read_u8().map_err(corrupt)? {
            0 => DevicePolicy::Gpu,
            1 => DevicePolicy::Dla,
            other => return Err(RuntimeError::CorruptEngine(format!("unknown device code {other}"))),
        };
        let dla_core = r.read_u32().map_err(corrupt)?;
        let max_batch_size = r.read_u32().map_err(corrupt)? as usize;

        let mut bindings = Vec::new();
        for _ in 0..r.read_u32().map_err(corrupt)? {
            let name = r.read_str().map_err(corrupt)?;
            let is_input = r.read_bool().map_err(corrupt)?;
            let c = r.read_u32().map_err(corrupt)? as usize;
            let h = r.read_u32().map_err(corrupt)? as usize;
            let w = r.read_u32().map_err(corrupt)? as usize;
            let dtype = DType::from_wire_code(r.read_i32().map_err(corrupt)?)?;
            bindings.push(Binding {
                name,
                dims: Dims::chw(c, h, w),
                dtype,
                is_input,
            });
        }

        let mut layers = Vec::new();
        for _ in 0..r.read_u32().map_err(corrupt)? {
            let name = r.read_str().map_err(corrupt)?;
            let op_type = r.read_str().map_err(corrupt)?;
            let device = match r.read_u8().map_err(corrupt)? {
                0 => Device::Gpu,
                1 => Device::Dla,
                other => {
                    return Err(RuntimeError::CorruptEngine(format!(
                        "layer '{name}': unknown device code {other}"
                    )))
                }
            };
            let precision = match r.read_i32().map_err(corrupt)? {
                NO_PRECISION => None,
                code => Some(DType::from_wire_code(code)?),
            };
            let mut inputs = Vec::new();
            for _ in 0..r.read_u32().map_err(corrupt)? {
                inputs.push(r.read_str().map_err(corrupt)?);
            }
            let output = r.read_str().map_err(corrupt)?;
            let weights = r.read_bytes().map_err(corrupt)?.to_vec();
            layers.push(EngineLayer {
                name,
                op_type,
                device,
                precision,
                inputs,
                output,
                weights,
                plugin: None,
            });
        }

        let mut dynamic_ranges = BTreeMap::new();
        for _ in 0..r.read_u32().map_err(corrupt)? {
            let name = r.read_str().map_err(corrupt)?;
            let range = r.read_f32().map_err(corrupt)?;
            dynamic_ranges.insert(name, range);
        }

        for _ in 0..r.read_u32().map_err(corrupt)? {
            let op = r.read_str().map_err(corrupt)?;
            let payload = r.read_bytes().map_err(corrupt)?;
            let record = registry.decode_named(&op, payload)?;
            let layer = layers
                .iter_mut()
                .find(|l| l.name == op)
                .ok_or_else(|| RuntimeError::CorruptEngine(format!("plugin '{op}' has no layer")))?;
            layer.plugin = Some(record);
        }
        r.finish("engine").map_err(corrupt)?;

        if let Some(l) = layers.iter().find(|l| l.op_type == "Plugin" && l.plugin.is_none()) {
            return Err(RuntimeError::CorruptEngine(format!(
                "plugin layer '{}' has no record",
                l.name
            )));
        }

        Ok(Engine {
            name,
            precision,
            device,
            dla_core,
            max_batch_size,
            bindings,
            layers,
            dynamic_ranges,
        })
    }

    /// Writes the serialised engine to `path`, creating parent directories.
    pub fn save(&self, path: &Path, registry: &PluginRegistry) -> Result<(), RuntimeError> {
        let bytes = self.serialize(registry)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        info!(path = %path.display(), bytes = bytes.len(), "engine saved");
        Ok(())
    }

    pub fn load(path: &Path, registry: &PluginRegistry) -> Result<Self, RuntimeError> {
        let bytes = std::fs::read(path)?;
        let engine = Self::deserialize(&bytes, registry)?;
        info!(path = %path.display(), engine = %engine.name, "engine loaded");
        Ok(engine)
    }
}
