// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Backend network definition: an arena of named tensors and operations.
//!
//! The compiler appends operations in execution order. Tensors are addressed
//! by index into the arena; an operation reads any number of tensors and
//! produces exactly one.

use std::fmt;

use plugin_registry::PluginRecord;
use tensor_core::{DType, Dims, Weights};

use crate::RuntimeError;

pub type TensorId = usize;
pub type OpId = usize;

/// Where an operation executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Gpu,
    Dla,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Gpu => "GPU",
            Device::Dla => "DLA",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    Max,
    Average,
    MaxAverageBlend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationType {
    Relu,
    Sigmoid,
    LeakyRelu { alpha: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementWiseOp {
    Sum,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeKind {
    Nearest,
    Linear,
}

/// Spatial window parameters shared by convolution and pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl Window {
    /// 1x1 window, stride 1, no padding.
    pub fn identity() -> Self {
        Self {
            kernel: (1, 1),
            stride: (1, 1),
            padding: (0, 0),
        }
    }
}

/// A backend operation and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    FullyConnected {
        outputs: usize,
        weights: Weights,
        bias: Weights,
    },
    Convolution {
        outputs: usize,
        window: Window,
        groups: usize,
        weights: Weights,
        bias: Option<Weights>,
    },
    Deconvolution {
        outputs: usize,
        window: Window,
        groups: usize,
        weights: Weights,
        bias: Option<Weights>,
    },
    /// Per-channel `(x * scale + shift) ^ power`.
    Scale {
        shift: Weights,
        scale: Weights,
        power: Weights,
    },
    Pooling { pool: PoolType, window: Window },
    Activation(ActivationType),
    SoftMax,
    Concatenation,
    ElementWise(ElementWiseOp),
    Resize { mode: ResizeKind },
    Plugin(PluginRecord),
}

impl OpKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            OpKind::FullyConnected { .. } => "FullyConnected",
            OpKind::Convolution { .. } => "Convolution",
            OpKind::Deconvolution { .. } => "Deconvolution",
            OpKind::Scale { .. } => "Scale",
            OpKind::Pooling { .. } => "Pooling",
            OpKind::Activation(_) => "Activation",
            OpKind::SoftMax => "SoftMax",
            OpKind::Concatenation => "Concatenation",
            OpKind::ElementWise(_) => "ElementWise",
            OpKind::Resize { .. } => "Resize",
            OpKind::Plugin(_) => "Plugin",
        }
    }

    pub fn is_plugin(&self) -> bool {
        matches!(self, OpKind::Plugin(_))
    }

    /// Weight buffers in the order the engine stores them.
    pub fn weights(&self) -> Vec<&Weights> {
        match self {
            OpKind::FullyConnected { weights, bias, .. } => vec![weights, bias],
            OpKind::Convolution { weights, bias, .. } | OpKind::Deconvolution { weights, bias, .. } => {
                let mut all = vec![weights];
                all.extend(bias.as_ref());
                all
            }
            OpKind::Scale { shift, scale, power } => vec![shift, scale, power],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTensor {
    pub name: String,
    /// Per-item shape; `n` is always 1.
    pub dims: Dims,
    pub dtype: DType,
    pub is_input: bool,
    pub is_output: bool,
    pub producer: Option<OpId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub output: TensorId,
    /// Explicit compute precision, when one was requested.
    pub precision: Option<DType>,
    pub device: Device,
}

/// The tensors and operations of one compilation.
#[derive(Debug, Clone, Default)]
pub struct NetworkDefinition {
    tensors: Vec<NetworkTensor>,
    ops: Vec<Operation>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl NetworkDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a network input.
    pub fn add_input(&mut self, name: impl Into<String>, dtype: DType, dims: Dims) -> TensorId {
        let id = self.tensors.len();
        self.tensors.push(NetworkTensor {
            name: name.into(),
            dims: dims.with_batch(1),
            dtype,
            is_input: true,
            is_output: false,
            producer: None,
        });
        self.inputs.push(id);
        id
    }

    /// Appends an operation producing one `F32` tensor of shape `dims`.
    pub fn add_op(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: Vec<TensorId>,
        dims: Dims,
    ) -> Result<OpId, RuntimeError> {
        let name = name.into();
        if let Some(&bad) = inputs.iter().find(|&&t| t >= self.tensors.len()) {
            return Err(RuntimeError::Structural(format!(
                "operation '{name}' reads unknown tensor #{bad}"
            )));
        }
        let op = self.ops.len();
        let output = self.tensors.len();
        self.tensors.push(NetworkTensor {
            name: format!("{name}_out"),
            dims: dims.with_batch(1),
            dtype: DType::F32,
            is_input: false,
            is_output: false,
            producer: Some(op),
        });
        self.ops.push(Operation {
            name,
            kind,
            inputs,
            output,
            precision: None,
            device: Device::Gpu,
        });
        Ok(op)
    }

    /// Marks a tensor as a network output. Marking twice is a no-op.
    pub fn mark_output(&mut self, id: TensorId) {
        if let Some(t) = self.tensors.get_mut(id) {
            if !t.is_output {
                t.is_output = true;
                self.outputs.push(id);
            }
        }
    }

    pub fn tensor(&self, id: TensorId) -> &NetworkTensor {
        &self.tensors[id]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut NetworkTensor {
        &mut self.tensors[id]
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id]
    }

    pub fn output_of(&self, op: OpId) -> TensorId {
        self.ops[op].output
    }

    pub fn tensors(&self) -> &[NetworkTensor] {
        &self.tensors
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Input tensors in declaration order.
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    /// Output tensors in marking order.
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn find_tensor(&self, name: &str) -> Option<TensorId> {
        self.tensors.iter().position(|t| t.name == name)
    }
}
