// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON network manifest parsing.
//!
//! The manifest (`model.json`) describes the network layer by layer in the
//! darknet style: Route and Shortcut references may be negative, meaning
//! "relative to this layer".
//!
//! # Format
//! ```json
//! {
//!   "name": "yolo-tiny",
//!   "input": { "c": 3, "h": 416, "w": 416 },
//!   "weights": "model.safetensors",
//!   "layers": [
//!     { "type": "conv", "filters": 16, "size": 3, "stride": 1, "pad": 1, "batch_normalize": true },
//!     { "type": "activation", "mode": "leaky" },
//!     { "type": "maxpool", "size": 2, "stride": 2 },
//!     { "type": "route", "layers": [-1], "groups": 2, "group_id": 1 },
//!     { "type": "shortcut", "from": -3 },
//!     { "type": "yolo", "classes": 80, "num": 6, "mask": [3, 4, 5], "final": true }
//!   ]
//! }
//! ```

use std::path::Path;

use crate::ModelError;

/// Top-level network manifest, deserialized from `model.json`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    /// Network name (e.g., `"yolo4tiny"`).
    pub name: String,
    /// Shape of the network input.
    pub input: InputSpec,
    /// SafeTensors file, relative to the manifest directory.
    #[serde(default)]
    pub weights: Option<String>,
    /// Layers in execution order.
    pub layers: Vec<ManifestLayer>,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct InputSpec {
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

/// A single layer entry in the manifest.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestLayer {
    #[serde(flatten)]
    pub spec: LayerSpec,
    /// Marks a network output.
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationName {
    Relu,
    Sigmoid,
    Leaky,
    ReluCeiling,
    Mish,
    Logistic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeName {
    #[default]
    Nearest,
    Linear,
}

/// Per-kind layer parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        outputs: usize,
    },
    Conv {
        filters: usize,
        size: usize,
        #[serde(default = "one")]
        stride: usize,
        #[serde(default)]
        pad: usize,
        #[serde(default = "one")]
        groups: usize,
        #[serde(default)]
        batch_normalize: bool,
        #[serde(default)]
        additional_bias: bool,
    },
    Deconv {
        filters: usize,
        size: usize,
        #[serde(default = "one")]
        stride: usize,
        #[serde(default)]
        pad: usize,
    },
    Maxpool {
        size: usize,
        #[serde(default = "one")]
        stride: usize,
        #[serde(default)]
        pad: usize,
        /// Keep the spatial size (padding of `size - 1`).
        #[serde(default)]
        fixed_size: bool,
    },
    Avgpool {
        size: usize,
        #[serde(default = "one")]
        stride: usize,
        #[serde(default)]
        pad: usize,
        #[serde(default)]
        exclude_padding: bool,
    },
    Activation {
        mode: ActivationName,
        #[serde(default = "default_slope")]
        slope: f32,
        #[serde(default = "default_ceiling")]
        ceiling: f32,
    },
    Softmax,
    Route {
        layers: Vec<i64>,
        #[serde(default = "one")]
        groups: usize,
        #[serde(default)]
        group_id: usize,
    },
    Shortcut {
        from: i64,
        #[serde(default)]
        mul: bool,
    },
    Flatten,
    Reshape {
        c: usize,
        h: usize,
        w: usize,
    },
    Resize {
        h: usize,
        w: usize,
        #[serde(default)]
        mode: ResizeName,
    },
    Reorg {
        stride: usize,
    },
    Region {
        classes: usize,
        coords: usize,
        num: usize,
    },
    Yolo {
        classes: usize,
        num: usize,
        mask: Vec<usize>,
        #[serde(default)]
        anchors: Vec<f32>,
        #[serde(default = "one_f32")]
        scale_xy: f32,
        #[serde(default = "default_nms")]
        nms_thresh: f32,
        #[serde(default)]
        nms_kind: i32,
        #[serde(default)]
        new_coords: i32,
        #[serde(default)]
        names: Vec<String>,
    },
    Upsample {
        stride: usize,
    },
    Deformable {
        filters: usize,
        size: usize,
        #[serde(default = "one")]
        stride: usize,
        #[serde(default)]
        pad: usize,
        #[serde(default = "one")]
        deformable_group: usize,
    },
}

fn one() -> usize {
    1
}

fn one_f32() -> f32 {
    1.0
}

fn default_slope() -> f32 {
    0.1
}

fn default_ceiling() -> f32 {
    6.0
}

fn default_nms() -> f32 {
    0.45
}

impl ModelManifest {
    /// Loads a manifest from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let manifest: Self = serde_json::from_str(json)?;
        Ok(manifest)
    }

    /// Validates that the manifest is internally consistent.
    ///
    /// Checks:
    /// - At least one layer is defined.
    /// - The input shape is non-empty.
    /// - Every Route and Shortcut reference resolves to an earlier layer.
    /// - Strides and kernel sizes are non-zero.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph("manifest contains no layers".into()));
        }
        if self.input.c * self.input.h * self.input.w == 0 {
            return Err(ModelError::InvalidGraph("manifest input has zero elements".into()));
        }

        for (index, layer) in self.layers.iter().enumerate() {
            let invalid = |detail: String| ModelError::InvalidLayer {
                layer: format!("#{index}"),
                detail,
            };
            match &layer.spec {
                LayerSpec::Route { layers, .. } => {
                    if layers.is_empty() {
                        return Err(invalid("empty route set".into()));
                    }
                    for &r in layers {
                        resolve_reference(index, r)?;
                    }
                }
                LayerSpec::Shortcut { from, .. } => {
                    resolve_reference(index, *from)?;
                }
                LayerSpec::Conv { size, stride, .. }
                | LayerSpec::Deconv { size, stride, .. }
                | LayerSpec::Maxpool { size, stride, .. }
                | LayerSpec::Avgpool { size, stride, .. }
                | LayerSpec::Deformable { size, stride, .. } => {
                    if *size == 0 || *stride == 0 {
                        return Err(invalid("size and stride must be non-zero".into()));
                    }
                }
                LayerSpec::Reorg { stride } | LayerSpec::Upsample { stride } => {
                    if *stride == 0 {
                        return Err(invalid("stride must be non-zero".into()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Resolves a darknet-style reference made by layer `index`.
///
/// Negative values are relative to `index`; the result must be earlier.
pub fn resolve_reference(index: usize, reference: i64) -> Result<usize, ModelError> {
    let absolute = if reference < 0 {
        index as i64 + reference
    } else {
        reference
    };
    if absolute < 0 || absolute >= index as i64 {
        return Err(ModelError::DanglingReference {
            layer: index,
            target: absolute.max(0) as usize,
        });
    }
    Ok(absolute as usize)
}
