// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer definitions for the network graph.
//!
//! A [`Layer`] couples the attributes every stage shares (id, shapes, the
//! `final` flag) with a [`LayerKind`] carrying only what that kind needs.
//! Route and Shortcut refer back to earlier layers by id; those ids are
//! checked when the graph is validated.

use tensor_core::{Dims, Weights};

use crate::ModelError;

/// Fully connected layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub outputs: usize,
    /// `inputs * outputs` values, where `inputs` is the input's `tot()`.
    pub weights: Weights,
    pub bias: Weights,
}

/// Folded batch normalisation parameters, one value per output channel.
///
/// Applied as two per-channel affine stages: `(mean, variance)` then
/// `(bias, scales)`, both raised to `power`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    pub scales: Weights,
    pub mean: Weights,
    pub variance: Weights,
    pub power: Weights,
}

impl BatchNorm {
    /// Identity normalisation for `channels` channels.
    pub fn identity(channels: usize) -> Self {
        Self {
            scales: Weights::filled(channels, 1.0),
            mean: Weights::zeros(channels),
            variance: Weights::filled(channels, 1.0),
            power: Weights::filled(channels, 1.0),
        }
    }

    fn lengths(&self) -> [usize; 4] {
        [
            self.scales.len(),
            self.mean.len(),
            self.variance.len(),
            self.power.len(),
        ]
    }
}

/// 2-D convolution or transposed convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2d {
    pub deconv: bool,
    pub outputs: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding_h: usize,
    pub padding_w: usize,
    pub groups: usize,
    /// `(inputs / groups) * outputs * kernel_h * kernel_w` values.
    pub weights: Weights,
    pub bias: Weights,
    pub batchnorm: Option<BatchNorm>,
    /// Bias kept on the convolution itself when batch normalisation is fused.
    pub additional_bias: Option<Weights>,
}

impl Conv2d {
    /// A square, ungrouped convolution with zeroed weights.
    pub fn square(inputs: usize, outputs: usize, kernel: usize, stride: usize, padding: usize) -> Self {
        Self {
            deconv: false,
            outputs,
            kernel_h: kernel,
            kernel_w: kernel,
            stride_h: stride,
            stride_w: stride,
            padding_h: padding,
            padding_w: padding,
            groups: 1,
            weights: Weights::zeros(inputs * outputs * kernel * kernel),
            bias: Weights::zeros(outputs),
            batchnorm: None,
            additional_bias: None,
        }
    }

    /// Output shape for a given input shape.
    pub fn output_dims(&self, input: Dims) -> Dims {
        let (h, w) = if self.deconv {
            (
                deconv_extent(input.h, self.kernel_h, self.stride_h, self.padding_h),
                deconv_extent(input.w, self.kernel_w, self.stride_w, self.padding_w),
            )
        } else {
            (
                window_extent(input.h, self.kernel_h, self.stride_h, 2 * self.padding_h),
                window_extent(input.w, self.kernel_w, self.stride_w, 2 * self.padding_w),
            )
        };
        Dims::new(input.n, self.outputs, h, w)
    }

    /// Expected weight count for `input_channels` input channels.
    pub fn expected_weights(&self, input_channels: usize) -> usize {
        input_channels / self.groups.max(1) * self.outputs * self.kernel_h * self.kernel_w
    }
}

/// Pooling reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    Max,
    Average,
    /// Average that ignores padded cells.
    AverageExcludePadding,
    /// Max pooling that keeps the spatial size (padding of `win - 1`).
    MaxFixedSize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pooling {
    pub mode: PoolingMode,
    pub win_h: usize,
    pub win_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding_h: usize,
    pub padding_w: usize,
}

impl Pooling {
    pub fn output_dims(&self, input: Dims) -> Dims {
        let (pad_h, pad_w) = match self.mode {
            PoolingMode::MaxFixedSize => (self.win_h.saturating_sub(1), self.win_w.saturating_sub(1)),
            _ => (2 * self.padding_h, 2 * self.padding_w),
        };
        Dims::new(
            input.n,
            input.c,
            window_extent(input.h, self.win_h, self.stride_h, pad_h),
            window_extent(input.w, self.win_w, self.stride_w, pad_w),
        )
    }
}

/// Element-wise activation function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationMode {
    Relu,
    Sigmoid,
    Leaky { slope: f32 },
    /// ReLU clipped at `ceiling`.
    ClippedRelu { ceiling: f32 },
    Mish,
    Logistic,
}

/// Concatenation of earlier layer outputs along channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Referenced layer ids, in concatenation order.
    pub layers: Vec<usize>,
    pub groups: usize,
    pub group_id: usize,
}

impl Route {
    /// A single member, ungrouped route only forwards its member's tensor.
    pub fn is_passthrough(&self) -> bool {
        self.layers.len() == 1 && self.groups == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    Nearest,
    Linear,
}

/// Residual combination with an earlier layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub back_layer: usize,
    /// Element-wise product instead of sum.
    pub mul: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub classes: usize,
    pub coords: usize,
    pub num: usize,
}

/// Detection head.
#[derive(Debug, Clone, PartialEq)]
pub struct Yolo {
    pub classes: usize,
    pub num: usize,
    /// Anchor indices used by this head; its length is the mask count.
    pub mask: Vec<f32>,
    /// `mask.len() * 2 * num` anchor values.
    pub bias: Vec<f32>,
    pub scale_xy: f32,
    pub nms_thresh: f32,
    pub nms_kind: i32,
    pub new_coords: i32,
    pub class_names: Vec<String>,
}

impl Yolo {
    pub fn n_masks(&self) -> usize {
        self.mask.len()
    }
}

/// Modulated deformable convolution.
///
/// `preconv` produces the offsets and modulation mask consumed by the
/// deformable stage; normalisation always follows.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformConv2d {
    pub outputs: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding_h: usize,
    pub padding_w: usize,
    pub deformable_group: usize,
    /// `inputs * outputs * kernel_h * kernel_w` values.
    pub weights: Weights,
    pub bias2: Weights,
    pub bias: Weights,
    pub batchnorm: BatchNorm,
    pub preconv: Conv2d,
}

impl DeformConv2d {
    /// Channels the offset/mask pre-convolution must produce.
    pub fn preconv_outputs(kernel_h: usize, kernel_w: usize, deformable_group: usize) -> usize {
        3 * kernel_h * kernel_w * deformable_group
    }

    pub fn output_dims(&self, input: Dims) -> Dims {
        Dims::new(
            input.n,
            self.outputs,
            window_extent(input.h, self.kernel_h, self.stride_h, 2 * self.padding_h),
            window_extent(input.w, self.kernel_w, self.stride_w, 2 * self.padding_w),
        )
    }

    /// Length of one offset/mask chunk: one entry per kernel tap per output cell.
    pub fn chunk_dim(&self, output: Dims) -> usize {
        self.kernel_h * self.kernel_w * output.h * output.w
    }
}

/// Every layer kind the compiler understands.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Dense(Dense),
    Conv2d(Conv2d),
    Pooling(Pooling),
    Activation(ActivationMode),
    Softmax,
    Route(Route),
    Flatten,
    /// Reinterpret as the given (c, h, w).
    Reshape { c: usize, h: usize, w: usize },
    Resize { h: usize, w: usize, mode: ResizeMode },
    Reorg { stride: usize },
    Region(Region),
    Shortcut(Shortcut),
    Yolo(Yolo),
    Upsample { stride: usize },
    DeformConv2d(DeformConv2d),
}

impl LayerKind {
    /// Display name, also the prefix of every runtime tensor and operation
    /// produced for the layer.
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Dense(_) => "Dense",
            LayerKind::Conv2d(c) if c.deconv => "DeConv2d",
            LayerKind::Conv2d(_) => "Conv2d",
            LayerKind::Pooling(_) => "Pooling",
            LayerKind::Activation(ActivationMode::Leaky { .. }) => "ActivationLeaky",
            LayerKind::Activation(ActivationMode::ClippedRelu { .. }) => "ActivationCReLU",
            LayerKind::Activation(ActivationMode::Mish) => "ActivationMish",
            LayerKind::Activation(ActivationMode::Logistic) => "ActivationLogistic",
            LayerKind::Activation(_) => "Activation",
            LayerKind::Softmax => "Softmax",
            LayerKind::Route(_) => "Route",
            LayerKind::Flatten => "Flatten",
            LayerKind::Reshape { .. } => "Reshape",
            LayerKind::Resize { .. } => "Resize",
            LayerKind::Reorg { .. } => "Reorg",
            LayerKind::Region(_) => "Region",
            LayerKind::Shortcut(_) => "Shortcut",
            LayerKind::Yolo(_) => "Yolo",
            LayerKind::Upsample { .. } => "Upsample",
            LayerKind::DeformConv2d(_) => "DeformConv2d",
        }
    }

    /// Ids of earlier layers this kind reads besides its sequential input.
    pub fn back_references(&self) -> Vec<usize> {
        match self {
            LayerKind::Route(r) => r.layers.clone(),
            LayerKind::Shortcut(s) => vec![s.back_layer],
            _ => Vec::new(),
        }
    }

    /// Infers the output shape from the sequential input shape.
    ///
    /// `earlier` holds the output shapes of every layer already in the
    /// graph, indexed by id, for kinds that read back-references.
    pub fn infer_output(&self, input: Dims, earlier: &[Dims]) -> Result<Dims, ModelError> {
        let dims = match self {
            LayerKind::Dense(d) => Dims::new(input.n, d.outputs, 1, 1),
            LayerKind::Conv2d(c) => c.output_dims(input),
            LayerKind::Pooling(p) => p.output_dims(input),
            LayerKind::Activation(_)
            | LayerKind::Softmax
            | LayerKind::Region(_)
            | LayerKind::Yolo(_)
            | LayerKind::Shortcut(_) => input,
            LayerKind::Route(r) => {
                let mut members = Vec::with_capacity(r.layers.len());
                for &id in &r.layers {
                    let dims = earlier.get(id).ok_or_else(|| ModelError::DanglingReference {
                        layer: earlier.len(),
                        target: id,
                    })?;
                    members.push(*dims);
                }
                let first = members.first().ok_or_else(|| ModelError::InvalidLayer {
                    layer: format!("Route{}", earlier.len()),
                    detail: "empty route set".into(),
                })?;
                if let Some(bad) = members.iter().find(|d| d.h != first.h || d.w != first.w) {
                    return Err(ModelError::InvalidLayer {
                        layer: format!("Route{}", earlier.len()),
                        detail: format!("spatial mismatch between {first} and {bad}"),
                    });
                }
                let channels: usize = members.iter().map(|d| d.c).sum();
                Dims::new(input.n, channels / r.groups.max(1), first.h, first.w)
            }
            LayerKind::Flatten => Dims::new(input.n, input.tot(), 1, 1),
            LayerKind::Reshape { c, h, w } => Dims::new(input.n, *c, *h, *w),
            LayerKind::Resize { h, w, .. } => Dims::new(input.n, input.c, *h, *w),
            LayerKind::Reorg { stride } => {
                let s = self.checked_stride(*stride, earlier.len())?;
                let c = s
                    .checked_mul(s)
                    .and_then(|area| input.c.checked_mul(area))
                    .ok_or_else(|| self.overflow(earlier.len()))?;
                Dims::new(input.n, c, input.h / s, input.w / s)
            }
            LayerKind::Upsample { stride } => {
                let s = self.checked_stride(*stride, earlier.len())?;
                let (h, w) = input
                    .h
                    .checked_mul(s)
                    .zip(input.w.checked_mul(s))
                    .ok_or_else(|| self.overflow(earlier.len()))?;
                Dims::new(input.n, input.c, h, w)
            }
            LayerKind::DeformConv2d(d) => d.output_dims(input),
        };
        Ok(dims)
    }

    fn checked_stride(&self, stride: usize, id: usize) -> Result<usize, ModelError> {
        if stride == 0 {
            return Err(ModelError::InvalidLayer {
                layer: format!("{}{id}", self.name()),
                detail: "stride must be at least 1".into(),
            });
        }
        Ok(stride)
    }

    fn overflow(&self, id: usize) -> ModelError {
        ModelError::InvalidLayer {
            layer: format!("{}{id}", self.name()),
            detail: "output shape overflows".into(),
        }
    }
}

/// One stage of the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Position in the graph, assigned on insertion.
    pub id: usize,
    pub input_dim: Dims,
    pub output_dim: Dims,
    /// Marks a network output.
    pub is_final: bool,
    pub kind: LayerKind,
}

impl Layer {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// `<Kind><id>`, the name given to the layer's runtime operation.
    pub fn runtime_name(&self) -> String {
        format!("{}{}", self.name(), self.id)
    }

    /// `<Kind><id>_out`, the name given to the layer's output tensor.
    pub fn output_name(&self) -> String {
        format!("{}{}_out", self.name(), self.id)
    }

    /// True for a Route that only forwards a single, ungrouped member.
    pub fn is_passthrough_route(&self) -> bool {
        matches!(&self.kind, LayerKind::Route(r) if r.is_passthrough())
    }

    /// Number of learned parameters.
    pub fn param_count(&self) -> usize {
        let bn = |b: &BatchNorm| b.lengths().iter().sum::<usize>();
        match &self.kind {
            LayerKind::Dense(d) => d.weights.len() + d.bias.len(),
            LayerKind::Conv2d(c) => {
                c.weights.len()
                    + c.bias.len()
                    + c.batchnorm.as_ref().map_or(0, bn)
                    + c.additional_bias.as_ref().map_or(0, Weights::len)
            }
            LayerKind::DeformConv2d(d) => {
                d.weights.len()
                    + d.bias.len()
                    + d.bias2.len()
                    + bn(&d.batchnorm)
                    + d.preconv.weights.len()
                    + d.preconv.bias.len()
            }
            _ => 0,
        }
    }

    /// Multiply-accumulate estimate for one batch item.
    pub fn macc(&self) -> usize {
        let out = self.output_dim;
        match &self.kind {
            LayerKind::Dense(d) => self.input_dim.tot() * d.outputs,
            LayerKind::Conv2d(c) if c.deconv => {
                c.expected_weights(self.input_dim.c) * self.input_dim.h * self.input_dim.w
            }
            LayerKind::Conv2d(c) => c.expected_weights(self.input_dim.c) * out.h * out.w,
            LayerKind::DeformConv2d(d) => {
                self.input_dim.c * d.outputs * d.kernel_h * d.kernel_w * out.h * out.w
            }
            _ => 0,
        }
    }

    /// Checks weight buffer lengths against the layer's shapes.
    pub fn check_weights(&self) -> Result<(), ModelError> {
        let expect = |what: &str, got: usize, want: usize| {
            if got == want {
                Ok(())
            } else {
                Err(ModelError::InvalidLayer {
                    layer: self.runtime_name(),
                    detail: format!("{what}: expected {want} values, got {got}"),
                })
            }
        };
        match &self.kind {
            LayerKind::Dense(d) => {
                expect("weights", d.weights.len(), self.input_dim.tot() * d.outputs)?;
                expect("bias", d.bias.len(), d.outputs)
            }
            LayerKind::Conv2d(c) => {
                expect("weights", c.weights.len(), c.expected_weights(self.input_dim.c))?;
                expect("bias", c.bias.len(), c.outputs)?;
                if let Some(bn) = &c.batchnorm {
                    for len in bn.lengths() {
                        expect("batchnorm", len, c.outputs)?;
                    }
                }
                if let Some(extra) = &c.additional_bias {
                    expect("additional bias", extra.len(), c.outputs)?;
                }
                Ok(())
            }
            LayerKind::DeformConv2d(d) => {
                let taps = d.kernel_h * d.kernel_w;
                expect("weights", d.weights.len(), self.input_dim.c * d.outputs * taps)?;
                expect("bias2", d.bias2.len(), d.outputs)?;
                expect("bias", d.bias.len(), d.outputs)?;
                for len in d.batchnorm.lengths() {
                    expect("batchnorm", len, d.outputs)?;
                }
                expect(
                    "preconv weights",
                    d.preconv.weights.len(),
                    d.preconv.expected_weights(self.input_dim.c),
                )
            }
            LayerKind::Yolo(y) => {
                expect("anchors", y.bias.len(), y.n_masks() * 2 * y.num)?;
                if y.class_names.is_empty() {
                    Ok(())
                } else {
                    expect("class names", y.class_names.len(), y.classes)
                }
            }
            _ => Ok(()),
        }
    }
}

/// Extent of a sliding window along one axis; `pad` is the total padding.
pub fn window_extent(size: usize, window: usize, stride: usize, pad: usize) -> usize {
    (size + pad).saturating_sub(window) / stride.max(1) + 1
}

fn deconv_extent(size: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    ((size.saturating_sub(1)) * stride + kernel).saturating_sub(2 * padding)
}
