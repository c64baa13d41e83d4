// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! precision = "fp16"
//! device = "dla"
//! dla_core = 0
//! max_batch_size = 4
//! calib_image_list = "./calib/images.txt"
//! num_calib_images = 100
//! engine_dir = "./engines"
//! ```
//!
//! Unset fields take their defaults. [`RuntimeConfig::apply_env`] then lets
//! `EDGE_RT_BATCHSIZE`, `EDGE_RT_CALIB_IMG_PATH` and
//! `EDGE_RT_CALIB_LABEL_PATH` override the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tensor_core::DType;

use crate::RuntimeError;

pub const ENV_BATCH_SIZE: &str = "EDGE_RT_BATCHSIZE";
pub const ENV_CALIB_IMAGES: &str = "EDGE_RT_CALIB_IMG_PATH";
pub const ENV_CALIB_LABELS: &str = "EDGE_RT_CALIB_LABEL_PATH";

/// Requested arithmetic precision of the compiled engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp32,
    #[default]
    Fp16,
    Int8,
}

impl Precision {
    pub fn as_str(self) -> &'static str {
        match self {
            Precision::Fp32 => "fp32",
            Precision::Fp16 => "fp16",
            Precision::Int8 => "int8",
        }
    }

    /// Element type used for weights and activations at this precision.
    pub fn dtype(self) -> DType {
        match self {
            Precision::Fp32 => DType::F32,
            Precision::Fp16 => DType::F16,
            Precision::Int8 => DType::I8,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Precision::Fp32 => 0,
            Precision::Fp16 => 1,
            Precision::Int8 => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Precision::Fp32),
            1 => Some(Precision::Fp16),
            2 => Some(Precision::Int8),
            _ => None,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fp32" | "float" => Ok(Precision::Fp32),
            "fp16" | "half" => Ok(Precision::Fp16),
            "int8" => Ok(Precision::Int8),
            other => Err(RuntimeError::Config(format!(
                "unknown precision '{other}'; expected 'fp32', 'fp16' or 'int8'"
            ))),
        }
    }
}

/// Requested device placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePolicy {
    /// Everything on the general-purpose accelerator.
    #[default]
    Gpu,
    /// Offer every operation to the fixed-function accelerator, with GPU
    /// fallback.
    Dla,
}

impl DevicePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DevicePolicy::Gpu => "gpu",
            DevicePolicy::Dla => "dla",
        }
    }
}

impl fmt::Display for DevicePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for engine compilation and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub precision: Precision,
    #[serde(default)]
    pub device: DevicePolicy,
    /// Fixed-function accelerator core used in `dla` mode.
    #[serde(default)]
    pub dla_core: u32,
    #[serde(default = "default_batch")]
    pub max_batch_size: usize,
    /// List file with one raw calibration image path per line.
    #[serde(default)]
    pub calib_image_list: Option<PathBuf>,
    /// List file with one label path per line, parallel to the images.
    #[serde(default)]
    pub calib_label_list: Option<PathBuf>,
    #[serde(default = "default_calib_images")]
    pub num_calib_images: usize,
    /// Directory engine files are written to and loaded from.
    #[serde(default = "default_engine_dir")]
    pub engine_dir: PathBuf,
}

fn default_batch() -> usize {
    1
}

fn default_calib_images() -> usize {
    100
}

fn default_engine_dir() -> PathBuf {
    PathBuf::from(".")
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| RuntimeError::Config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::Config(format!("TOML serialise error: {e}")))
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_batch_size == 0 {
            return Err(RuntimeError::Config("max_batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Applies the process environment overrides.
    pub fn apply_env(&mut self) -> Result<(), RuntimeError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), RuntimeError> {
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            let batch: usize = raw.trim().parse().map_err(|_| {
                RuntimeError::Config(format!("{ENV_BATCH_SIZE}='{raw}' is not a batch size"))
            })?;
            self.max_batch_size = batch;
            tracing::info!(batch, "batch size overridden from environment");
        }
        if let Some(path) = lookup(ENV_CALIB_IMAGES) {
            self.calib_image_list = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_CALIB_LABELS) {
            self.calib_label_list = Some(PathBuf::from(path));
        }
        self.validate()
    }

    /// Path of the engine file for network `name` under this configuration.
    pub fn engine_path(&self, name: &str) -> PathBuf {
        self.engine_dir
            .join(engine_file_name(name, self.precision, self.device))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            precision: Precision::default(),
            device: DevicePolicy::default(),
            dla_core: 0,
            max_batch_size: default_batch(),
            calib_image_list: None,
            calib_label_list: None,
            num_calib_images: default_calib_images(),
            engine_dir: default_engine_dir(),
        }
    }
}

/// `<name>[_dla]_<precision>.rt`
pub fn engine_file_name(name: &str, precision: Precision, device: DevicePolicy) -> String {
    match device {
        DevicePolicy::Gpu => format!("{name}_{precision}.rt"),
        DevicePolicy::Dla => format!("{name}_dla_{precision}.rt"),
    }
}

/// Companion calibration table: the engine file name up to its last `.`,
/// plus `-calibration.table`.
pub fn calibration_table_path(engine_path: &Path) -> PathBuf {
    let file = engine_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match file.rfind('.') {
        Some(dot) => &file[..dot],
        None => file.as_str(),
    };
    engine_path.with_file_name(format!("{stem}-calibration.table"))
}
