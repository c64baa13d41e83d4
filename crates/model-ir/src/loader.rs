// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Network loading from a manifest plus an optional SafeTensors file.
//!
//! The loader reads a model directory containing:
//! - `model.json`: the layer manifest (see [`ModelManifest`]).
//! - `model.safetensors`: optional weights, keyed `<layer index>.<param>`
//!   (`0.weight`, `0.bias`, `0.bn.scales`, `0.bn.mean`, `0.bn.variance`,
//!   `0.bn.power`, `0.bias2`, `0.preconv.weight`, `0.preconv.bias`).
//!
//! Entries missing from the weight file, or the whole file when absent, are
//! synthesized: zeros for weights and biases, ones for scales, variances
//! and powers. Shape-only graphs are enough to compile and inspect engines.

use std::path::Path;

use safetensors::SafeTensors;
use tensor_core::{Dims, Weights};

use crate::graph::{LayerGraph, Validated};
use crate::layer::{
    ActivationMode, BatchNorm, Conv2d, DeformConv2d, Dense, Pooling, PoolingMode, Region,
    ResizeMode, Route, Shortcut, Yolo,
};
use crate::manifest::{resolve_reference, ActivationName, LayerSpec, ResizeName};
use crate::{LayerKind, ModelError, ModelManifest};

/// Default manifest filename.
const MANIFEST_FILE: &str = "model.json";

/// Default SafeTensors filename.
const WEIGHTS_FILE: &str = "model.safetensors";

/// Loads a network from disk into a validated [`LayerGraph`].
///
/// # Example
/// ```no_run
/// use model_ir::ModelLoader;
/// use std::path::Path;
///
/// let graph = ModelLoader::load(Path::new("./models/yolo4tiny")).unwrap();
/// println!("Loaded {} layers", graph.num_layers());
/// ```
pub struct ModelLoader;

impl ModelLoader {
    /// Loads and validates a network from the given directory.
    pub fn load(model_dir: &Path) -> Result<LayerGraph<Validated>, ModelError> {
        let manifest = ModelManifest::from_file(&model_dir.join(MANIFEST_FILE))?;
        manifest.validate()?;

        let weights_path =
            model_dir.join(manifest.weights.as_deref().unwrap_or(WEIGHTS_FILE));
        if !weights_path.exists() {
            tracing::info!(
                path = %weights_path.display(),
                "no weight file, using synthetic weights"
            );
            return Self::build(&manifest, &WeightSource::Synthetic);
        }

        let file = std::fs::File::open(&weights_path).map_err(|e| {
            ModelError::SafeTensorsError(format!("cannot open '{}': {e}", weights_path.display()))
        })?;

        // SAFETY: the mapping is read-only and lives only for this call.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| ModelError::SafeTensorsError(format!("mmap failed: {e}")))?;

        let tensors = SafeTensors::deserialize(&mmap)
            .map_err(|e| ModelError::SafeTensorsError(format!("SafeTensors parse error: {e}")))?;

        Self::build(&manifest, &WeightSource::File(&tensors))
    }

    /// Builds a graph from a manifest with synthetic weights.
    pub fn from_manifest(manifest: &ModelManifest) -> Result<LayerGraph<Validated>, ModelError> {
        manifest.validate()?;
        Self::build(manifest, &WeightSource::Synthetic)
    }

    fn build(
        manifest: &ModelManifest,
        source: &WeightSource<'_>,
    ) -> Result<LayerGraph<Validated>, ModelError> {
        let input = Dims::chw(manifest.input.c, manifest.input.h, manifest.input.w);
        let mut graph = LayerGraph::new(manifest.name.clone(), input);

        for (index, entry) in manifest.layers.iter().enumerate() {
            let kind = layer_kind(index, &entry.spec, graph.output_dim(), source)?;
            let id = graph.push(kind)?;
            if entry.is_final {
                graph.set_final(id)?;
            }
        }

        let graph = graph.validate()?;
        tracing::info!("{}", graph.summary());
        Ok(graph)
    }
}

/// Where layer parameters come from.
enum WeightSource<'a> {
    File(&'a SafeTensors<'a>),
    Synthetic,
}

impl WeightSource<'_> {
    /// Reads `key`, or `len` copies of `fill` when it is not available.
    fn fetch(&self, key: &str, len: usize, fill: f32) -> Result<Weights, ModelError> {
        let WeightSource::File(tensors) = self else {
            return Ok(Weights::filled(len, fill));
        };
        let Ok(view) = tensors.tensor(key) else {
            tracing::debug!(key, "weight entry missing, synthesizing");
            return Ok(Weights::filled(len, fill));
        };
        let values: Vec<f32> = match view.dtype() {
            safetensors::Dtype::F32 => view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            safetensors::Dtype::F16 => view
                .data()
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            other => {
                return Err(ModelError::SafeTensorsError(format!(
                    "'{key}' has unsupported dtype {other:?}"
                )))
            }
        };
        if values.len() != len {
            return Err(ModelError::InvalidLayer {
                layer: key.to_string(),
                detail: format!("expected {len} values, file holds {}", values.len()),
            });
        }
        Ok(Weights::new(values))
    }

    fn batchnorm(&self, index: usize, channels: usize) -> Result<BatchNorm, ModelError> {
        Ok(BatchNorm {
            scales: self.fetch(&format!("{index}.bn.scales"), channels, 1.0)?,
            mean: self.fetch(&format!("{index}.bn.mean"), channels, 0.0)?,
            variance: self.fetch(&format!("{index}.bn.variance"), channels, 1.0)?,
            power: self.fetch(&format!("{index}.bn.power"), channels, 1.0)?,
        })
    }
}

/// Translates one manifest entry given the shape feeding it.
fn layer_kind(
    index: usize,
    spec: &LayerSpec,
    input: Dims,
    source: &WeightSource<'_>,
) -> Result<LayerKind, ModelError> {
    let key = |param: &str| format!("{index}.{param}");
    let kind = match spec {
        LayerSpec::Dense { outputs } => LayerKind::Dense(Dense {
            outputs: *outputs,
            weights: source.fetch(&key("weight"), input.tot() * outputs, 0.0)?,
            bias: source.fetch(&key("bias"), *outputs, 0.0)?,
        }),
        LayerSpec::Conv {
            filters,
            size,
            stride,
            pad,
            groups,
            batch_normalize,
            additional_bias,
        } => {
            let mut conv = Conv2d::square(input.c, *filters, *size, *stride, *pad);
            conv.groups = *groups;
            conv.weights = source.fetch(&key("weight"), conv.expected_weights(input.c), 0.0)?;
            conv.bias = source.fetch(&key("bias"), *filters, 0.0)?;
            if *batch_normalize {
                conv.batchnorm = Some(source.batchnorm(index, *filters)?);
            }
            if *additional_bias {
                conv.additional_bias = Some(source.fetch(&key("bias2"), *filters, 0.0)?);
            }
            LayerKind::Conv2d(conv)
        }
        LayerSpec::Deconv {
            filters,
            size,
            stride,
            pad,
        } => {
            let mut conv = Conv2d::square(input.c, *filters, *size, *stride, *pad);
            conv.deconv = true;
            conv.weights = source.fetch(&key("weight"), conv.expected_weights(input.c), 0.0)?;
            conv.bias = source.fetch(&key("bias"), *filters, 0.0)?;
            LayerKind::Conv2d(conv)
        }
        LayerSpec::Maxpool {
            size,
            stride,
            pad,
            fixed_size,
        } => LayerKind::Pooling(Pooling {
            mode: if *fixed_size {
                PoolingMode::MaxFixedSize
            } else {
                PoolingMode::Max
            },
            win_h: *size,
            win_w: *size,
            stride_h: *stride,
            stride_w: *stride,
            padding_h: *pad,
            padding_w: *pad,
        }),
        LayerSpec::Avgpool {
            size,
            stride,
            pad,
            exclude_padding,
        } => LayerKind::Pooling(Pooling {
            mode: if *exclude_padding {
                PoolingMode::AverageExcludePadding
            } else {
                PoolingMode::Average
            },
            win_h: *size,
            win_w: *size,
            stride_h: *stride,
            stride_w: *stride,
            padding_h: *pad,
            padding_w: *pad,
        }),
        LayerSpec::Activation {
            mode,
            slope,
            ceiling,
        } => LayerKind::Activation(match mode {
            ActivationName::Relu => ActivationMode::Relu,
            ActivationName::Sigmoid => ActivationMode::Sigmoid,
            ActivationName::Leaky => ActivationMode::Leaky { slope: *slope },
            ActivationName::ReluCeiling => ActivationMode::ClippedRelu { ceiling: *ceiling },
            ActivationName::Mish => ActivationMode::Mish,
            ActivationName::Logistic => ActivationMode::Logistic,
        }),
        LayerSpec::Softmax => LayerKind::Softmax,
        LayerSpec::Route {
            layers,
            groups,
            group_id,
        } => LayerKind::Route(Route {
            layers: layers
                .iter()
                .map(|&r| resolve_reference(index, r))
                .collect::<Result<_, _>>()?,
            groups: *groups,
            group_id: *group_id,
        }),
        LayerSpec::Shortcut { from, mul } => LayerKind::Shortcut(Shortcut {
            back_layer: resolve_reference(index, *from)?,
            mul: *mul,
        }),
        LayerSpec::Flatten => LayerKind::Flatten,
        LayerSpec::Reshape { c, h, w } => LayerKind::Reshape {
            c: *c,
            h: *h,
            w: *w,
        },
        LayerSpec::Resize { h, w, mode } => LayerKind::Resize {
            h: *h,
            w: *w,
            mode: match mode {
                ResizeName::Nearest => ResizeMode::Nearest,
                ResizeName::Linear => ResizeMode::Linear,
            },
        },
        LayerSpec::Reorg { stride } => LayerKind::Reorg { stride: *stride },
        LayerSpec::Region {
            classes,
            coords,
            num,
        } => LayerKind::Region(Region {
            classes: *classes,
            coords: *coords,
            num: *num,
        }),
        LayerSpec::Yolo {
            classes,
            num,
            mask,
            anchors,
            scale_xy,
            nms_thresh,
            nms_kind,
            new_coords,
            names,
        } => {
            let bias = if anchors.is_empty() {
                vec![0.0; mask.len() * 2 * num]
            } else {
                anchors.clone()
            };
            LayerKind::Yolo(Yolo {
                classes: *classes,
                num: *num,
                mask: mask.iter().map(|&m| m as f32).collect(),
                bias,
                scale_xy: *scale_xy,
                nms_thresh: *nms_thresh,
                nms_kind: *nms_kind,
                new_coords: *new_coords,
                class_names: names.clone(),
            })
        }
        LayerSpec::Upsample { stride } => LayerKind::Upsample { stride: *stride },
        LayerSpec::Deformable {
            filters,
            size,
            stride,
            pad,
            deformable_group,
        } => {
            let taps = size * size;
            let pre_outputs = DeformConv2d::preconv_outputs(*size, *size, *deformable_group);
            let mut preconv = Conv2d::square(input.c, pre_outputs, *size, *stride, *pad);
            preconv.weights = source.fetch(&key("preconv.weight"), input.c * pre_outputs * taps, 0.0)?;
            preconv.bias = source.fetch(&key("preconv.bias"), pre_outputs, 0.0)?;
            LayerKind::DeformConv2d(DeformConv2d {
                outputs: *filters,
                kernel_h: *size,
                kernel_w: *size,
                stride_h: *stride,
                stride_w: *stride,
                padding_h: *pad,
                padding_w: *pad,
                deformable_group: *deformable_group,
                weights: source.fetch(&key("weight"), input.c * filters * taps, 0.0)?,
                bias2: source.fetch(&key("bias2"), *filters, 0.0)?,
                bias: source.fetch(&key("bias"), *filters, 0.0)?,
                batchnorm: source.batchnorm(index, *filters)?,
                preconv,
            })
        }
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DependencyMap;

    const TINY: &str = r#"{
        "name": "tiny",
        "input": { "c": 3, "h": 16, "w": 16 },
        "layers": [
            { "type": "conv", "filters": 8, "size": 3, "pad": 1, "batch_normalize": true },
            { "type": "activation", "mode": "leaky" },
            { "type": "maxpool", "size": 2, "stride": 2 },
            { "type": "conv", "filters": 8, "size": 1 },
            { "type": "shortcut", "from": -2 },
            { "type": "route", "layers": [-1, -3] },
            { "type": "conv", "filters": 18, "size": 1 },
            { "type": "yolo", "classes": 1, "num": 3, "mask": [0, 1, 2], "final": true }
        ]
    }"#;

    #[test]
    fn test_from_manifest_shapes() {
        let m = ModelManifest::from_json(TINY).unwrap();
        let g = ModelLoader::from_manifest(&m).unwrap();
        assert_eq!(g.num_layers(), 8);
        assert_eq!(g.layer(2).unwrap().output_dim, Dims::chw(8, 8, 8));
        assert_eq!(g.layer(5).unwrap().output_dim, Dims::chw(16, 8, 8));
        assert_eq!(g.last().output_dim, Dims::chw(18, 8, 8));
        assert!(g.last().is_final);

        let deps = DependencyMap::build(&g);
        assert!(deps.has_edge(2, 4));
        assert!(deps.has_edge(4, 5));
        assert!(deps.has_edge(2, 5));
    }

    #[test]
    fn test_synthetic_batchnorm_is_identity() {
        let m = ModelManifest::from_json(TINY).unwrap();
        let g = ModelLoader::from_manifest(&m).unwrap();
        match &g.layer(0).unwrap().kind {
            LayerKind::Conv2d(c) => {
                let bn = c.batchnorm.as_ref().unwrap();
                assert!(bn.variance.as_f32().iter().all(|&v| v == 1.0));
                assert!(bn.mean.as_f32().iter().all(|&v| v == 0.0));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_load_directory_with_weights() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = r#"{
            "name": "one",
            "input": { "c": 1, "h": 2, "w": 2 },
            "layers": [ { "type": "conv", "filters": 1, "size": 1 } ]
        }"#;
        std::fs::write(dir.path().join("model.json"), manifest).unwrap();

        let weight = 2.5f32.to_le_bytes();
        let view = safetensors::tensor::TensorView::new(
            safetensors::Dtype::F32,
            vec![1],
            &weight,
        )
        .unwrap();
        let bytes = safetensors::serialize(vec![("0.weight", view)], &None).unwrap();
        std::fs::write(dir.path().join("model.safetensors"), bytes).unwrap();

        let g = ModelLoader::load(dir.path()).unwrap();
        match &g.layer(0).unwrap().kind {
            LayerKind::Conv2d(c) => {
                assert_eq!(c.weights.as_f32(), &[2.5]);
                assert_eq!(c.bias.as_f32(), &[0.0]);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_load_rejects_wrong_weight_count() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = r#"{
            "name": "bad",
            "input": { "c": 1, "h": 2, "w": 2 },
            "layers": [ { "type": "conv", "filters": 2, "size": 1 } ]
        }"#;
        std::fs::write(dir.path().join("model.json"), manifest).unwrap();
        let weight = 1.0f32.to_le_bytes();
        let view = safetensors::tensor::TensorView::new(
            safetensors::Dtype::F32,
            vec![1],
            &weight,
        )
        .unwrap();
        let bytes = safetensors::serialize(vec![("0.weight", view)], &None).unwrap();
        std::fs::write(dir.path().join("model.safetensors"), bytes).unwrap();

        assert!(matches!(
            ModelLoader::load(dir.path()),
            Err(ModelError::InvalidLayer { .. })
        ));
    }
}
