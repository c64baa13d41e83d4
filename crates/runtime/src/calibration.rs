// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Quantised-mode calibration.
//!
//! A [`CalibrationSource`] yields preprocessed input batches; calibration
//! consumes it once and produces a [`CalibrationTable`] of per-tensor
//! scales. The table is written next to the engine and reused by later
//! compilations instead of reading the source again.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tensor_core::{DType, Dims, Tensor};
use tracing::{debug, info};

use crate::network::NetworkDefinition;
use crate::RuntimeError;

const TABLE_HEADER: &str = "EDGE-RT-EntropyCalibration";

/// Largest magnitude representable in 8-bit symmetric quantisation.
const INT8_MAX: f32 = 127.0;

/// Sequence of calibration batches, consumed read-only and once.
pub trait CalibrationSource {
    /// Shape of every batch.
    fn batch_dims(&self) -> Dims;

    /// Number of batches the source will yield.
    fn num_batches(&self) -> usize;

    /// The next batch, or `None` once exhausted.
    fn next_batch(&mut self) -> Result<Option<Tensor>, RuntimeError>;
}

/// In-memory batches.
#[derive(Debug, Clone)]
pub struct TensorBatches {
    dims: Dims,
    batches: VecDeque<Tensor>,
}

impl TensorBatches {
    /// Fails when a batch does not have shape `dims`.
    pub fn new(dims: Dims, batches: Vec<Tensor>) -> Result<Self, RuntimeError> {
        if let Some(bad) = batches.iter().find(|t| t.dims() != dims) {
            return Err(RuntimeError::BindingMismatch {
                binding: "calibration".into(),
                expected: dims.to_string(),
                actual: bad.dims().to_string(),
            });
        }
        Ok(Self {
            dims,
            batches: batches.into(),
        })
    }
}

impl CalibrationSource for TensorBatches {
    fn batch_dims(&self) -> Dims {
        self.dims
    }

    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn next_batch(&mut self) -> Result<Option<Tensor>, RuntimeError> {
        Ok(self.batches.pop_front())
    }
}

/// Raw little-endian f32 images listed one path per line, one image per
/// batch.
#[derive(Debug, Clone)]
pub struct RawFileBatches {
    dims: Dims,
    images: VecDeque<PathBuf>,
    labels: Vec<PathBuf>,
}

impl RawFileBatches {
    /// Reads at most `max_images` entries from `image_list`.
    ///
    /// When `label_list` is given it must name a label for every image used.
    pub fn from_lists(
        image_list: &Path,
        label_list: Option<&Path>,
        dims: Dims,
        max_images: usize,
    ) -> Result<Self, RuntimeError> {
        let images: VecDeque<PathBuf> = read_list(image_list)?.into_iter().take(max_images).collect();
        let labels = match label_list {
            Some(path) => {
                let labels: Vec<PathBuf> = read_list(path)?.into_iter().take(images.len()).collect();
                if labels.len() < images.len() {
                    return Err(RuntimeError::Config(format!(
                        "label list '{}' has {} entries for {} images",
                        path.display(),
                        labels.len(),
                        images.len()
                    )));
                }
                labels
            }
            None => Vec::new(),
        };
        info!(
            images = images.len(),
            list = %image_list.display(),
            "calibration image list loaded"
        );
        Ok(Self {
            dims: dims.with_batch(1),
            images,
            labels,
        })
    }

    /// Label paths parallel to the images, empty when none were given.
    pub fn labels(&self) -> &[PathBuf] {
        &self.labels
    }
}

fn read_list(path: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RuntimeError::Config(format!("cannot read list '{}': {e}", path.display()))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

impl CalibrationSource for RawFileBatches {
    fn batch_dims(&self) -> Dims {
        self.dims
    }

    fn num_batches(&self) -> usize {
        self.images.len()
    }

    fn next_batch(&mut self) -> Result<Option<Tensor>, RuntimeError> {
        let Some(path) = self.images.pop_front() else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path)?;
        debug!(image = %path.display(), bytes = bytes.len(), "calibration batch");
        Ok(Some(Tensor::from_bytes(self.dims, DType::F32, bytes)?))
    }
}

/// Per-tensor quantisation scales, keyed by tensor name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    scales: BTreeMap<String, f32>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tensor: impl Into<String>, scale: f32) {
        self.scales.insert(tensor.into(), scale);
    }

    pub fn scale(&self, tensor: &str) -> Option<f32> {
        self.scales.get(tensor).copied()
    }

    /// Dynamic range `[-r, r]` implied by a tensor's scale.
    pub fn dynamic_range(&self, tensor: &str) -> Option<f32> {
        self.scale(tensor).map(|s| s * INT8_MAX)
    }

    pub fn len(&self) -> usize {
        self.scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.scales.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Parses the text form: a header line, then `name: <f32 bits in hex>`.
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        let mut lines = text.lines();
        match lines.next() {
            Some(h) if h.trim() == TABLE_HEADER => {}
            other => {
                return Err(RuntimeError::Config(format!(
                    "calibration table header {other:?} is not '{TABLE_HEADER}'"
                )))
            }
        }
        let mut table = Self::new();
        for line in lines.map(str::trim).filter(|l| !l.is_empty()) {
            let (name, hex) = line.rsplit_once(':').ok_or_else(|| {
                RuntimeError::Config(format!("malformed calibration entry '{line}'"))
            })?;
            let bits = u32::from_str_radix(hex.trim(), 16).map_err(|_| {
                RuntimeError::Config(format!("malformed calibration scale in '{line}'"))
            })?;
            table.insert(name.trim(), f32::from_bits(bits));
        }
        Ok(table)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from(TABLE_HEADER);
        out.push('\n');
        for (name, scale) in &self.scales {
            let _ = writeln!(out, "{name}: {:08x}", scale.to_bits());
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), RuntimeError> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }
}

/// Runs calibration for `net` over every batch of `source`.
///
/// The reference backend has no kernels to observe intermediate
/// activations, so the input range seen across all batches is assigned to
/// every tensor of the network.
pub fn calibrate(
    net: &NetworkDefinition,
    source: &mut dyn CalibrationSource,
) -> Result<CalibrationTable, RuntimeError> {
    let expected = source.num_batches();
    let mut amax = 0.0f32;
    let mut seen = 0usize;
    while let Some(batch) = source.next_batch()? {
        for v in batch.to_f32_vec()? {
            if v.is_finite() {
                amax = amax.max(v.abs());
            }
        }
        seen += 1;
    }
    if seen == 0 {
        return Err(RuntimeError::Config("calibration source yielded no batches".into()));
    }
    let scale = if amax > 0.0 { amax / INT8_MAX } else { 1.0 / INT8_MAX };
    let mut table = CalibrationTable::new();
    for t in net.tensors() {
        table.insert(t.name.clone(), scale);
    }
    info!(batches = seen, expected, amax, tensors = table.len(), "calibration complete");
    Ok(table)
}
