// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer graph → backend network definition.
//!
//! A [`CompilationSession`] owns the producer → tensor map for exactly one
//! compilation of a contiguous layer range `[start, end]`:
//!
//! ```text
//!  0 .. start-1      materialise boundary inputs read by the range
//!  start ..= end     convert each layer (exhaustive match on LayerKind)
//!  end+1 .. N-1      mark range tensors still read downstream as outputs
//! ```
//!
//! Boundary tensors that cross a slice edge use the reduced type (`F16`, or
//! `I8` in quantised mode); only the true network input `data` and the
//! true network output `out` stay in full precision.

use std::collections::BTreeMap;

use model_ir::graph::Validated;
use model_ir::{
    ActivationMode, BatchNorm, Conv2d, DependencyMap, Layer, LayerGraph, LayerKind, PoolingMode,
    ResizeMode,
};
use partition_planner::PlannerError;
use plugin_registry::{DeformableRecord, PluginRecord, PluginRegistry, YoloRecord};
use tensor_core::{DType, Dims};
use tracing::{debug, info, warn};

use crate::config::{DevicePolicy, Precision, RuntimeConfig};
use crate::network::{
    ActivationType, Device, ElementWiseOp, NetworkDefinition, OpId, OpKind, PoolType, ResizeKind,
    TensorId, Window,
};
use crate::platform::Platform;
use crate::RuntimeError;

// ── Precision / device policy ──────────────────────────────────

/// Precision and placement after checking the request against the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub requested_precision: Precision,
    pub precision: Precision,
    pub requested_device: DevicePolicy,
    pub device: DevicePolicy,
    pub dla_core: u32,
    /// Element type weights are stored in.
    pub weight_dtype: DType,
}

impl ResolvedPolicy {
    /// Downgrades what the platform cannot honour:
    ///
    /// - `int8` needs fast int8 and a calibration source, else `fp16` or `fp32`;
    /// - `fp16` needs fast fp16, else `fp32`;
    /// - `dla` needs at least one DLA core, else `gpu`. DLA runs in half
    ///   precision, so a DLA build never stays in `fp32`.
    pub fn resolve(config: &RuntimeConfig, platform: &dyn Platform, has_calibration: bool) -> Self {
        let requested_precision = config.precision;
        let requested_device = config.device;

        let mut device = requested_device;
        if device == DevicePolicy::Dla && platform.dla_cores() == 0 {
            warn!(platform = platform.name(), "no DLA cores, falling back to GPU");
            device = DevicePolicy::Gpu;
        }
        let dla_core = if device == DevicePolicy::Dla && config.dla_core >= platform.dla_cores() {
            warn!(core = config.dla_core, available = platform.dla_cores(), "DLA core out of range, using core 0");
            0
        } else {
            config.dla_core
        };

        let half_or_full = || {
            if platform.has_fast_fp16() {
                Precision::Fp16
            } else {
                Precision::Fp32
            }
        };
        let mut precision = match requested_precision {
            Precision::Int8 if platform.has_fast_int8() && has_calibration => Precision::Int8,
            Precision::Int8 => {
                let fallback = half_or_full();
                warn!(
                    fast_int8 = platform.has_fast_int8(),
                    has_calibration,
                    %fallback,
                    "int8 unavailable, downgrading"
                );
                fallback
            }
            Precision::Fp16 => {
                let chosen = half_or_full();
                if chosen != Precision::Fp16 {
                    warn!(platform = platform.name(), "no fast fp16, downgrading to fp32");
                }
                chosen
            }
            Precision::Fp32 => Precision::Fp32,
        };
        if device == DevicePolicy::Dla && precision == Precision::Fp32 {
            precision = Precision::Fp16;
        }
        let weight_dtype = if precision == Precision::Fp16 || device == DevicePolicy::Dla {
            DType::F16
        } else {
            DType::F32
        };

        Self {
            requested_precision,
            precision,
            requested_device,
            device,
            dla_core,
            weight_dtype,
        }
    }

    pub fn is_int8(&self) -> bool {
        self.precision == Precision::Int8
    }

    pub fn is_dla(&self) -> bool {
        self.device == DevicePolicy::Dla
    }

    /// Element type of tensors crossing a slice edge.
    pub fn boundary_dtype(&self) -> DType {
        if self.is_int8() {
            DType::I8
        } else {
            DType::F16
        }
    }

    /// True when any part of the request was downgraded.
    pub fn downgraded(&self) -> bool {
        self.requested_precision != self.precision || self.requested_device != self.device
    }
}

// ── Compilation result ─────────────────────────────────────────

/// The network definition produced by one session.
#[derive(Debug, Clone)]
pub struct CompiledNetwork {
    pub name: String,
    pub network: NetworkDefinition,
    pub policy: ResolvedPolicy,
    pub start: usize,
    pub end: usize,
    /// Layer id → the tensor standing for its output.
    pub layer_tensors: BTreeMap<usize, TensorId>,
}

impl CompiledNetwork {
    pub fn tensor_for(&self, layer: usize) -> Option<TensorId> {
        self.layer_tensors.get(&layer).copied()
    }
}

// ── Session ────────────────────────────────────────────────────

/// One compilation of one layer range.
pub struct CompilationSession<'a> {
    graph: &'a LayerGraph<Validated>,
    deps: DependencyMap,
    platform: &'a dyn Platform,
    registry: &'a PluginRegistry,
    policy: ResolvedPolicy,
    net: NetworkDefinition,
    tensors: BTreeMap<usize, TensorId>,
    start: usize,
}

impl<'a> CompilationSession<'a> {
    pub fn new(
        graph: &'a LayerGraph<Validated>,
        platform: &'a dyn Platform,
        registry: &'a PluginRegistry,
        policy: ResolvedPolicy,
    ) -> Self {
        Self {
            graph,
            deps: graph.dependency_map(),
            platform,
            registry,
            policy,
            net: NetworkDefinition::new(),
            tensors: BTreeMap::new(),
            start: 0,
        }
    }

    /// Compiles the whole graph.
    pub fn compile_all(self) -> Result<CompiledNetwork, RuntimeError> {
        let end = self.graph.num_layers().saturating_sub(1);
        self.compile(0, end)
    }

    /// Compiles layers `[start, end]`.
    pub fn compile(mut self, start: usize, end: usize) -> Result<CompiledNetwork, RuntimeError> {
        let graph = self.graph;
        let n = graph.num_layers();
        if n == 0 {
            return Err(PlannerError::EmptyGraph.into());
        }
        if start > end || end >= n {
            return Err(PlannerError::InvalidRange {
                start,
                end,
                num_layers: n,
            }
            .into());
        }
        self.net = NetworkDefinition::new();
        self.tensors.clear();
        self.start = start;
        info!(
            network = %graph.name,
            start,
            end,
            precision = %self.policy.precision,
            device = %self.policy.device,
            "compiling"
        );

        let predecessor = self.materialise_boundary_inputs(start, end);
        let mut input = self.range_input(start, predecessor)?;

        for id in start..=end {
            let layer = layer_at(graph, id)?;
            let out = self.convert(layer, input)?;
            if layer.is_final {
                self.net.mark_output(out);
            }
            self.tensors.insert(id, out);
            input = out;
        }

        if self.net.num_ops() == 0 {
            return Err(RuntimeError::Structural(format!(
                "layers [{start}, {end}] emit no operations"
            )));
        }

        self.mark_downstream_outputs(end);

        if end + 1 >= n {
            self.net.tensor_mut(input).name = "out".to_string();
        } else {
            self.net.tensor_mut(input).dtype = self.policy.boundary_dtype();
        }
        self.net.mark_output(input);

        info!(
            ops = self.net.num_ops(),
            inputs = self.net.inputs().len(),
            outputs = self.net.outputs().len(),
            "network definition complete"
        );
        Ok(CompiledNetwork {
            name: graph.name.clone(),
            network: self.net,
            policy: self.policy,
            start,
            end,
            layer_tensors: self.tensors,
        })
    }

    // ── Range edges ────────────────────────────────────────────

    /// Declares an input for every layer before `start` read inside the
    /// range. The sequential predecessor `start - 1` is declared at most
    /// once and returned.
    fn materialise_boundary_inputs(&mut self, start: usize, end: usize) -> Option<TensorId> {
        let graph = self.graph;
        let dtype = self.policy.boundary_dtype();
        let mut predecessor = None;
        for layer in graph.iter_layers().take(start) {
            let feeds_range = self
                .deps
                .consumers(layer.id)
                .any(|c| c >= start && c <= end);
            if !feeds_range {
                continue;
            }
            if layer.id + 1 == start {
                if predecessor.is_none() {
                    let t = self.net.add_input(layer.output_name(), dtype, layer.output_dim);
                    self.tensors.insert(layer.id, t);
                    predecessor = Some(t);
                }
            } else if !self.tensors.contains_key(&layer.id) {
                let t = self.net.add_input(layer.output_name(), dtype, layer.output_dim);
                self.tensors.insert(layer.id, t);
            }
            debug!(layer = layer.id, "boundary input");
        }
        predecessor
    }

    /// The tensor the first layer of the range reads.
    fn range_input(&mut self, start: usize, predecessor: Option<TensorId>) -> Result<TensorId, RuntimeError> {
        if start == 0 {
            return Ok(self.net.add_input("data", DType::F32, self.graph.input_dim()));
        }
        let before = layer_at(self.graph, start - 1)?;
        let t = match (&before.kind, predecessor) {
            (LayerKind::Route(r), _) if r.is_passthrough() => self.lookup(r.layers[0], before)?,
            (_, Some(t)) => t,
            (_, None) => {
                let dtype = self.policy.boundary_dtype();
                self.net.add_input(before.output_name(), dtype, before.output_dim)
            }
        };
        self.tensors.insert(before.id, t);
        Ok(t)
    }

    /// Marks tensors produced in the range that layers after `end` read,
    /// following the same dependency-map edges the boundary report uses.
    fn mark_downstream_outputs(&mut self, end: usize) {
        let dtype = self.policy.boundary_dtype();
        for producer in self.start..=end {
            let Some(consumer) = self.deps.consumers(producer).find(|&c| c > end) else {
                continue;
            };
            let Some(&t) = self.tensors.get(&producer) else {
                continue;
            };
            if self.net.tensor(t).is_input {
                continue;
            }
            self.net.tensor_mut(t).dtype = dtype;
            self.net.mark_output(t);
            debug!(producer, consumer, "boundary output");
        }
    }

    // ── Emission helpers ───────────────────────────────────────

    fn lookup(&self, producer: usize, consumer: &Layer) -> Result<TensorId, RuntimeError> {
        self.tensors
            .get(&producer)
            .copied()
            .ok_or_else(|| RuntimeError::MissingTensor {
                layer: producer,
                consumer: consumer.runtime_name(),
            })
    }

    fn dims_of(&self, t: TensorId) -> Dims {
        self.net.tensor(t).dims
    }

    /// Appends an operation, applying the precision tag and DLA placement.
    fn emit(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: Vec<TensorId>,
        dims: Dims,
    ) -> Result<OpId, RuntimeError> {
        let op = self.net.add_op(name, kind, inputs, dims)?;
        if self.policy.is_int8() {
            self.net.op_mut(op).precision = Some(DType::I8);
        }
        if self.policy.is_dla() && self.platform.can_run_on_dla(self.net.op(op)) {
            self.net.op_mut(op).device = Device::Dla;
        }
        let emitted = self.net.op(op);
        debug!(op = %emitted.name, kind = emitted.kind.type_name(), device = %emitted.device, "emitted");
        Ok(op)
    }

    fn emit_plugin(
        &mut self,
        name: impl Into<String>,
        record: PluginRecord,
        inputs: Vec<TensorId>,
        dims: Dims,
    ) -> Result<OpId, RuntimeError> {
        let kind = record.kind();
        if !self.registry.is_compilation_target(kind) {
            return Err(RuntimeError::Unsupported(format!(
                "plugin kind {kind} is not a compilation target"
            )));
        }
        self.registry.encode(&record)?;
        self.emit(name, OpKind::Plugin(record), inputs, dims)
    }

    fn identity_max_pool(&mut self, name: String, input: TensorId) -> Result<TensorId, RuntimeError> {
        let dims = self.dims_of(input);
        let op = self.emit(
            name,
            OpKind::Pooling {
                pool: PoolType::Max,
                window: Window::identity(),
            },
            vec![input],
            dims,
        )?;
        Ok(self.net.output_of(op))
    }

    // ── Layer conversion ───────────────────────────────────────

    /// Converts one layer and returns the tensor standing for its output.
    fn convert(&mut self, layer: &Layer, input: TensorId) -> Result<TensorId, RuntimeError> {
        let name = layer.runtime_name();
        let out_dims = layer.output_dim;
        let (c, h, w) = wire_chw(self.dims_of(input))?;
        let op = match &layer.kind {
            LayerKind::Dense(d) => self.emit(
                name,
                OpKind::FullyConnected {
                    outputs: d.outputs,
                    weights: d.weights.clone(),
                    bias: d.bias.clone(),
                },
                vec![input],
                out_dims,
            )?,
            LayerKind::Conv2d(conv) => self.convert_conv(&name, conv, input)?,
            LayerKind::Pooling(p) => match p.mode {
                PoolingMode::MaxFixedSize => {
                    let (oc, oh, ow) = wire_chw(out_dims)?;
                    let record = PluginRecord::max_pool_fixed(
                        oc,
                        oh,
                        ow,
                        wire(out_dims.n)?,
                        wire(p.stride_h)?,
                        wire(p.stride_w)?,
                        wire(p.win_h)?,
                    );
                    self.emit_plugin(name, record, vec![input], out_dims)?
                }
                mode => {
                    let pool = match mode {
                        PoolingMode::Max | PoolingMode::MaxFixedSize => PoolType::Max,
                        PoolingMode::Average => PoolType::Average,
                        PoolingMode::AverageExcludePadding => PoolType::MaxAverageBlend,
                    };
                    let window = Window {
                        kernel: (p.win_h, p.win_w),
                        stride: (p.stride_h, p.stride_w),
                        padding: (p.padding_h, p.padding_w),
                    };
                    self.emit(name, OpKind::Pooling { pool, window }, vec![input], out_dims)?
                }
            },
            LayerKind::Activation(mode) => {
                let size = c * h * w;
                match *mode {
                    ActivationMode::Relu => {
                        self.emit(name, OpKind::Activation(ActivationType::Relu), vec![input], out_dims)?
                    }
                    ActivationMode::Sigmoid => {
                        self.emit(name, OpKind::Activation(ActivationType::Sigmoid), vec![input], out_dims)?
                    }
                    ActivationMode::Leaky { slope } => self.emit(
                        name,
                        OpKind::Activation(ActivationType::LeakyRelu { alpha: slope }),
                        vec![input],
                        out_dims,
                    )?,
                    ActivationMode::ClippedRelu { ceiling } => self.emit_plugin(
                        name,
                        PluginRecord::ActivationCRelu { ceiling, size },
                        vec![input],
                        out_dims,
                    )?,
                    ActivationMode::Mish => self.emit_plugin(
                        name,
                        PluginRecord::ActivationMish { size },
                        vec![input],
                        out_dims,
                    )?,
                    ActivationMode::Logistic => self.emit_plugin(
                        name,
                        PluginRecord::ActivationLogistic { size },
                        vec![input],
                        out_dims,
                    )?,
                }
            }
            LayerKind::Softmax => self.emit(name, OpKind::SoftMax, vec![input], out_dims)?,
            LayerKind::Route(route) => {
                if route.is_passthrough() {
                    return self.lookup(route.layers[0], layer);
                }
                if route.groups > 1 {
                    return Err(RuntimeError::Unsupported(format!(
                        "{name}: grouped route ({} groups, group {}) has no compiled form",
                        route.groups, route.group_id
                    )));
                }
                let mut members = Vec::with_capacity(route.layers.len());
                for (i, &member) in route.layers.iter().enumerate() {
                    let mut t = self.lookup(member, layer)?;
                    if self.policy.is_dla() && route.layers.len() > 1 {
                        t = self.dla_route_passthrough(&name, i, member, t)?;
                    }
                    members.push(t);
                }
                self.emit(name, OpKind::Concatenation, members, out_dims)?
            }
            LayerKind::Flatten => {
                self.emit_plugin(name, PluginRecord::flatten(c, h, w), vec![input], out_dims)?
            }
            LayerKind::Reshape { .. } => {
                let (oc, oh, ow) = wire_chw(out_dims)?;
                let record = PluginRecord::Reshape {
                    n: wire(out_dims.n)?,
                    c: oc,
                    h: oh,
                    w: ow,
                };
                self.emit_plugin(name, record, vec![input], out_dims)?
            }
            LayerKind::Resize { mode, .. } => {
                let mode = match mode {
                    ResizeMode::Nearest => ResizeKind::Nearest,
                    ResizeMode::Linear => ResizeKind::Linear,
                };
                self.emit(name, OpKind::Resize { mode }, vec![input], out_dims)?
            }
            LayerKind::Reorg { stride } => {
                let record = PluginRecord::Reorg {
                    stride: wire(*stride)?,
                    c,
                    h,
                    w,
                };
                self.emit_plugin(name, record, vec![input], out_dims)?
            }
            LayerKind::Region(r) => {
                let record = PluginRecord::Region {
                    classes: wire(r.classes)?,
                    coords: wire(r.coords)?,
                    num: wire(r.num)?,
                    c,
                    h,
                    w,
                };
                self.emit_plugin(name, record, vec![input], out_dims)?
            }
            LayerKind::Shortcut(s) => {
                let mut back = self.lookup(s.back_layer, layer)?;
                let back_dims = layer_at(self.graph, s.back_layer)?.output_dim;
                if back_dims.c == out_dims.c && !s.mul {
                    if self.policy.is_dla() && s.back_layer >= self.start {
                        back = self.identity_max_pool(format!("{name}_pool"), back)?;
                    }
                    self.emit(
                        name,
                        OpKind::ElementWise(ElementWiseOp::Sum),
                        vec![input, back],
                        out_dims,
                    )?
                } else {
                    let (back_c, back_h, back_w) = wire_chw(back_dims)?;
                    let record = PluginRecord::Shortcut {
                        back_c,
                        back_h,
                        back_w,
                        mul: s.mul,
                        c,
                        h,
                        w,
                        dtype: self.policy.weight_dtype,
                    };
                    self.emit_plugin(name, record, vec![input, back], out_dims)?
                }
            }
            LayerKind::Yolo(y) => {
                let mut class_names = y.class_names.clone();
                class_names.resize(y.classes, String::new());
                let record = PluginRecord::Yolo(YoloRecord {
                    classes: wire(y.classes)?,
                    num: wire(y.num)?,
                    scale_xy: y.scale_xy,
                    nms_thresh: y.nms_thresh,
                    nms_kind: y.nms_kind,
                    new_coords: y.new_coords,
                    c,
                    h,
                    w,
                    mask: y.mask.clone(),
                    bias: y.bias.clone(),
                    class_names,
                });
                self.emit_plugin(name, record, vec![input], out_dims)?
            }
            LayerKind::Upsample { stride } => {
                let record = PluginRecord::Upsample {
                    stride: wire(*stride)?,
                    c,
                    h,
                    w,
                };
                self.emit_plugin(name, record, vec![input], out_dims)?
            }
            LayerKind::DeformConv2d(d) => {
                let preconv = self.convert_conv(&format!("{name}_preconv"), &d.preconv, input)?;
                let offsets = self.net.output_of(preconv);
                let mut record = DeformableRecord {
                    chunk_dim: wire(d.chunk_dim(out_dims))?,
                    kernel_h: wire(d.kernel_h)?,
                    kernel_w: wire(d.kernel_w)?,
                    stride_h: wire(d.stride_h)?,
                    stride_w: wire(d.stride_w)?,
                    padding_h: wire(d.padding_h)?,
                    padding_w: wire(d.padding_w)?,
                    deformable_group: wire(d.deformable_group)?,
                    i_n: wire(layer.input_dim.n)?,
                    i_c: wire(layer.input_dim.c)?,
                    i_h: wire(layer.input_dim.h)?,
                    i_w: wire(layer.input_dim.w)?,
                    o_n: wire(out_dims.n)?,
                    o_c: wire(out_dims.c)?,
                    o_h: wire(out_dims.h)?,
                    o_w: wire(out_dims.w)?,
                    offset: Vec::new(),
                    mask: Vec::new(),
                    data: d.weights.as_f32().to_vec(),
                    bias2: d.bias2.as_f32().to_vec(),
                    ones1: Vec::new(),
                    ones2: Vec::new(),
                };
                let lengths = record.lengths()?;
                record.offset = vec![0.0; lengths.offset];
                record.mask = vec![0.0; lengths.mask];
                record.ones1 = vec![1.0; lengths.ones1];
                record.ones2 = vec![1.0; lengths.ones2];
                let deform = self.emit_plugin(
                    format!("Deformable{}", layer.id),
                    PluginRecord::Deformable(record),
                    vec![input, offsets],
                    out_dims,
                )?;
                let deformed = self.net.output_of(deform);
                self.batchnorm(&name, &d.batchnorm, &d.bias, deformed, out_dims)?
            }
        };
        Ok(self.net.output_of(op))
    }

    /// Convolution, then the two batch-norm scales when present. The last
    /// operation is named `prefix`.
    fn convert_conv(&mut self, prefix: &str, conv: &Conv2d, input: TensorId) -> Result<OpId, RuntimeError> {
        let dims = conv.output_dims(self.dims_of(input));
        let window = Window {
            kernel: (conv.kernel_h, conv.kernel_w),
            stride: (conv.stride_h, conv.stride_w),
            padding: (conv.padding_h, conv.padding_w),
        };
        let bias = match conv.batchnorm {
            None => Some(conv.bias.clone()),
            Some(_) => conv.additional_bias.clone(),
        };
        let make = |deconv: bool| {
            let weights = conv.weights.clone();
            if deconv {
                OpKind::Deconvolution {
                    outputs: conv.outputs,
                    window,
                    groups: conv.groups,
                    weights,
                    bias,
                }
            } else {
                OpKind::Convolution {
                    outputs: conv.outputs,
                    window,
                    groups: conv.groups,
                    weights,
                    bias,
                }
            }
        };
        match &conv.batchnorm {
            None => self.emit(prefix, make(conv.deconv), vec![input], dims),
            Some(bn) => {
                let op = self.emit(format!("{prefix}_conv"), make(conv.deconv), vec![input], dims)?;
                let out = self.net.output_of(op);
                self.batchnorm(prefix, bn, &conv.bias, out, dims)
            }
        }
    }

    /// `(x - mean) / variance`, then `x * scales + bias`, as two scale
    /// operations; the second is named `prefix`.
    fn batchnorm(
        &mut self,
        prefix: &str,
        bn: &BatchNorm,
        bias: &tensor_core::Weights,
        input: TensorId,
        dims: Dims,
    ) -> Result<OpId, RuntimeError> {
        let first = self.emit(
            format!("{prefix}_scale"),
            OpKind::Scale {
                shift: bn.mean.clone(),
                scale: bn.variance.clone(),
                power: bn.power.clone(),
            },
            vec![input],
            dims,
        )?;
        let scaled = self.net.output_of(first);
        self.emit(
            prefix,
            OpKind::Scale {
                shift: bias.clone(),
                scale: bn.scales.clone(),
                power: bn.power.clone(),
            },
            vec![scaled],
            dims,
        )
    }

    /// Inserts the identity operation a DLA concatenation needs in front of
    /// member `index`, produced by layer `member`.
    fn dla_route_passthrough(
        &mut self,
        route_name: &str,
        index: usize,
        member: usize,
        t: TensorId,
    ) -> Result<TensorId, RuntimeError> {
        let producer = layer_at(self.graph, member)?;
        match &producer.kind {
            LayerKind::Activation(_) => {
                let dims = self.dims_of(t);
                let op = self.emit(
                    format!("{route_name}_act{index}"),
                    OpKind::Activation(ActivationType::Relu),
                    vec![t],
                    dims,
                )?;
                Ok(self.net.output_of(op))
            }
            LayerKind::Route(_) => self.identity_max_pool(format!("{route_name}_pool{index}"), t),
            LayerKind::Pooling(p) if p.stride_h > 1 && p.stride_w > 1 => {
                self.identity_max_pool(format!("{route_name}_pool{index}"), t)
            }
            _ => Ok(t),
        }
    }
}

fn layer_at(graph: &LayerGraph<Validated>, id: usize) -> Result<&Layer, RuntimeError> {
    graph
        .layer(id)
        .ok_or_else(|| RuntimeError::Structural(format!("layer {id} not found")))
}

fn wire(v: usize) -> Result<i32, RuntimeError> {
    i32::try_from(v).map_err(|_| RuntimeError::Structural(format!("value {v} does not fit a plugin field")))
}

fn wire_chw(d: Dims) -> Result<(i32, i32, i32), RuntimeError> {
    Ok((wire(d.c)?, wire(d.h)?, wire(d.w)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ReferencePlatform;
    use model_ir::{Pooling, Route, Shortcut};

    fn policy(precision: Precision, device: DevicePolicy, platform: &dyn Platform, cal: bool) -> ResolvedPolicy {
        let config = RuntimeConfig {
            precision,
            device,
            ..Default::default()
        };
        ResolvedPolicy::resolve(&config, platform, cal)
    }

    fn conv(inputs: usize, outputs: usize) -> LayerKind {
        LayerKind::Conv2d(Conv2d::square(inputs, outputs, 3, 1, 1))
    }

    fn compile(graph: &LayerGraph<Validated>, start: usize, end: usize, p: ResolvedPolicy) -> CompiledNetwork {
        let platform = ReferencePlatform::jetson();
        let registry = PluginRegistry::with_builtin();
        CompilationSession::new(graph, &platform, &registry, p)
            .compile(start, end)
            .unwrap()
    }

    fn fp16() -> ResolvedPolicy {
        policy(Precision::Fp16, DevicePolicy::Gpu, &ReferencePlatform::jetson(), false)
    }

    /// conv(0) conv(1) conv(2) shortcut(3 -> 1) conv(4)
    fn residual_graph() -> LayerGraph<Validated> {
        let mut g = LayerGraph::new("res", Dims::chw(3, 8, 8));
        g.push(conv(3, 4)).unwrap();
        g.push(conv(4, 4)).unwrap();
        g.push(conv(4, 4)).unwrap();
        g.push(LayerKind::Shortcut(Shortcut {
            back_layer: 1,
            mul: false,
        }))
        .unwrap();
        g.push(conv(4, 2)).unwrap();
        g.validate().unwrap()
    }

    #[test]
    fn test_policy_downgrades() {
        let old = ReferencePlatform::fp32_only();
        let p = policy(Precision::Fp16, DevicePolicy::Dla, &old, false);
        assert_eq!(p.precision, Precision::Fp32);
        assert_eq!(p.device, DevicePolicy::Gpu);
        assert_eq!(p.weight_dtype, DType::F32);
        assert!(p.downgraded());

        let jetson = ReferencePlatform::jetson();
        let p = policy(Precision::Int8, DevicePolicy::Gpu, &jetson, false);
        assert_eq!(p.precision, Precision::Fp16);

        let p = policy(Precision::Int8, DevicePolicy::Gpu, &jetson, true);
        assert_eq!(p.precision, Precision::Int8);
        assert_eq!(p.boundary_dtype(), DType::I8);

        let p = policy(Precision::Fp32, DevicePolicy::Dla, &jetson, false);
        assert_eq!(p.precision, Precision::Fp16);
        assert!(p.is_dla());
    }

    #[test]
    fn test_whole_graph_names_and_output() {
        let g = residual_graph();
        let c = compile(&g, 0, 4, fp16());
        let net = &c.network;
        let data = net.inputs()[0];
        assert_eq!(net.tensor(data).name, "data");
        assert_eq!(net.tensor(data).dtype, DType::F32);
        assert_eq!(net.num_ops(), 5);
        assert_eq!(net.op(0).name, "Conv2d0");
        assert_eq!(net.op(3).name, "Shortcut3");
        let out = net.outputs()[0];
        assert_eq!(net.tensor(out).name, "out");
        assert_eq!(net.tensor(out).dtype, DType::F32);
        assert_eq!(net.outputs().len(), 1);
    }

    #[test]
    fn test_shortcut_sum_operand_order() {
        let g = residual_graph();
        let c = compile(&g, 0, 4, fp16());
        let sum = c.network.op(3);
        assert_eq!(sum.kind, OpKind::ElementWise(ElementWiseOp::Sum));
        assert_eq!(sum.inputs, vec![c.tensor_for(2).unwrap(), c.tensor_for(1).unwrap()]);
    }

    #[test]
    fn test_slice_materialises_skip_input() {
        let g = residual_graph();
        // [2, 3]: predecessor 1 feeds layer 2 sequentially and 3 via the skip.
        let c = compile(&g, 2, 3, fp16());
        let net = &c.network;
        assert_eq!(net.inputs().len(), 1);
        let input = net.tensor(net.inputs()[0]);
        assert_eq!(input.name, "Conv2d1_out");
        assert_eq!(input.dtype, DType::F16);
        let out = net.tensor(net.outputs()[0]);
        assert_eq!(out.name, "Shortcut3_out");
        assert_eq!(out.dtype, DType::F16);
    }

    #[test]
    fn test_slice_marks_downstream_skip_source() {
        let g = residual_graph();
        // [0, 1]: layer 1 is read by the shortcut at 3.
        let c = compile(&g, 0, 1, fp16());
        let net = &c.network;
        let outs: Vec<&str> = net.outputs().iter().map(|&t| net.tensor(t).name.as_str()).collect();
        assert_eq!(outs, vec!["Conv2d1_out"]);
        // [0, 2]: layer 1 is a side output, layer 2 the sequential one.
        let c = compile(&g, 0, 2, fp16());
        let net = &c.network;
        let outs: Vec<&str> = net.outputs().iter().map(|&t| net.tensor(t).name.as_str()).collect();
        assert_eq!(outs, vec!["Conv2d1_out", "Conv2d2_out"]);
        assert!(net.outputs().iter().all(|&t| net.tensor(t).dtype == DType::F16));
    }

    #[test]
    fn test_downstream_outputs_match_boundary_report() {
        // Layer 3 forwards layer 0 to layer 4.
        let mut g = LayerGraph::new("forward", Dims::chw(3, 8, 8));
        g.push(conv(3, 4)).unwrap();
        g.push(conv(4, 4)).unwrap();
        g.push(conv(4, 4)).unwrap();
        g.push(LayerKind::Route(Route {
            layers: vec![0],
            groups: 1,
            group_id: 0,
        }))
        .unwrap();
        g.push(conv(4, 2)).unwrap();
        let g = g.validate().unwrap();
        let deps = g.dependency_map();

        for (start, end) in [(0, 1), (0, 2), (1, 2)] {
            let c = compile(&g, start, end, fp16());
            let net = &c.network;
            let mut compiled: Vec<String> = net.outputs().iter().map(|&t| net.tensor(t).name.clone()).collect();
            compiled.sort();
            let boundary = partition_planner::SubgraphBoundary::extract(&g, &deps, start, end).unwrap();
            let mut reported: Vec<String> = boundary
                .outputs()
                .into_iter()
                .map(|id| g.layer(id).unwrap().output_name())
                .collect();
            reported.sort();
            assert_eq!(compiled, reported, "[{start}, {end}]");
        }
        let c = compile(&g, 0, 2, fp16());
        let net = &c.network;
        let outs: Vec<&str> = net.outputs().iter().map(|&t| net.tensor(t).name.as_str()).collect();
        assert_eq!(outs, vec!["Conv2d0_out", "Conv2d2_out"]);
    }

    #[test]
    fn test_trailing_passthrough_route_adds_no_output() {
        let mut g = LayerGraph::new("tail", Dims::chw(3, 8, 8));
        g.push(conv(3, 4)).unwrap();
        g.push(conv(4, 4)).unwrap();
        g.push(LayerKind::Route(Route {
            layers: vec![0],
            groups: 1,
            group_id: 0,
        }))
        .unwrap();
        let g = g.validate().unwrap();
        let c = compile(&g, 0, 1, fp16());
        let net = &c.network;
        let outs: Vec<&str> = net.outputs().iter().map(|&t| net.tensor(t).name.as_str()).collect();
        assert_eq!(outs, vec!["Conv2d1_out"]);
    }

    #[test]
    fn test_batchnorm_expands_to_three_ops() {
        let mut g = LayerGraph::new("bn", Dims::chw(3, 4, 4));
        let mut c = Conv2d::square(3, 8, 3, 1, 1);
        c.batchnorm = Some(BatchNorm::identity(8));
        g.push(LayerKind::Conv2d(c)).unwrap();
        let g = g.validate().unwrap();
        let compiled = compile(&g, 0, 0, fp16());
        let names: Vec<&str> = compiled.network.ops().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Conv2d0_conv", "Conv2d0_scale", "Conv2d0"]);
        match &compiled.network.op(0).kind {
            OpKind::Convolution { bias, .. } => assert!(bias.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_int8_tags_every_op() {
        let g = residual_graph();
        let p = policy(Precision::Int8, DevicePolicy::Gpu, &ReferencePlatform::jetson(), true);
        let c = compile(&g, 0, 4, p);
        assert!(c.network.ops().iter().all(|o| o.precision == Some(DType::I8)));
    }

    #[test]
    fn test_dla_shortcut_inserts_pool() {
        let g = residual_graph();
        let p = policy(Precision::Fp16, DevicePolicy::Dla, &ReferencePlatform::jetson(), false);
        let c = compile(&g, 0, 4, p);
        let names: Vec<&str> = c.network.ops().iter().map(|o| o.name.as_str()).collect();
        assert!(names.contains(&"Shortcut3_pool"));
        assert!(c.network.ops().iter().all(|o| o.device == Device::Dla));
    }

    #[test]
    fn test_dla_route_passthroughs() {
        let mut g = LayerGraph::new("route", Dims::chw(4, 8, 8));
        g.push(LayerKind::Activation(ActivationMode::Relu)).unwrap();
        g.push(LayerKind::Pooling(Pooling {
            mode: PoolingMode::Max,
            win_h: 2,
            win_w: 2,
            stride_h: 1,
            stride_w: 1,
            padding_h: 0,
            padding_w: 0,
        }))
        .unwrap();
        g.push(LayerKind::Route(Route {
            layers: vec![0, 0],
            groups: 1,
            group_id: 0,
        }))
        .unwrap();
        let g = g.validate().unwrap();
        let p = policy(Precision::Fp16, DevicePolicy::Dla, &ReferencePlatform::jetson(), false);
        let c = compile(&g, 0, 2, p);
        let names: Vec<&str> = c.network.ops().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Activation0", "Pooling1", "Route2_act0", "Route2_act1", "Route2"]);
    }

    #[test]
    fn test_grouped_route_unsupported() {
        let mut g = LayerGraph::new("grouped", Dims::chw(4, 8, 8));
        g.push(conv(4, 8)).unwrap();
        g.push(LayerKind::Route(Route {
            layers: vec![0],
            groups: 2,
            group_id: 1,
        }))
        .unwrap();
        let g = g.validate().unwrap();
        let platform = ReferencePlatform::jetson();
        let registry = PluginRegistry::with_builtin();
        let err = CompilationSession::new(&g, &platform, &registry, fp16())
            .compile_all()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported(_)));
    }

    #[test]
    fn test_invalid_range() {
        let g = residual_graph();
        let platform = ReferencePlatform::jetson();
        let registry = PluginRegistry::with_builtin();
        let err = CompilationSession::new(&g, &platform, &registry, fp16())
            .compile(3, 9)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Planner(PlannerError::InvalidRange { .. })));
    }

    #[test]
    fn test_plugin_layers() {
        let mut g = LayerGraph::new("plugins", Dims::chw(4, 8, 8));
        g.push(LayerKind::Activation(ActivationMode::Mish)).unwrap();
        g.push(LayerKind::Upsample { stride: 2 }).unwrap();
        g.push(LayerKind::Flatten).unwrap();
        let g = g.validate().unwrap();
        let c = compile(&g, 0, 2, fp16());
        let ops = c.network.ops();
        assert_eq!(ops[0].kind, OpKind::Plugin(PluginRecord::ActivationMish { size: 256 }));
        assert_eq!(
            ops[1].kind,
            OpKind::Plugin(PluginRecord::Upsample {
                stride: 2,
                c: 4,
                h: 8,
                w: 8
            })
        );
        assert_eq!(ops[2].kind, OpKind::Plugin(PluginRecord::flatten(4, 16, 16)));
    }
}
