// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Target hardware capabilities.
//!
//! The compiler asks the platform which precisions run fast and whether the
//! fixed-function accelerator (DLA) accepts a given operation. Requests the
//! platform cannot honour are downgraded, never rejected.

use crate::network::{ActivationType, OpKind, Operation, PoolType};

/// Largest convolution kernel side the DLA accepts.
const DLA_MAX_KERNEL: usize = 32;
/// Largest pooling window side the DLA accepts.
const DLA_MAX_POOL_WINDOW: usize = 8;

/// Capabilities of the device an engine is compiled for.
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    fn has_fast_fp16(&self) -> bool;

    fn has_fast_int8(&self) -> bool;

    /// Number of fixed-function accelerator cores; 0 when absent.
    fn dla_cores(&self) -> u32;

    /// Whether the fixed-function accelerator can execute `op`.
    fn can_run_on_dla(&self, op: &Operation) -> bool;
}

/// Capability table for the supported device classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePlatform {
    pub name: String,
    pub fast_fp16: bool,
    pub fast_int8: bool,
    pub dla_cores: u32,
}

impl ReferencePlatform {
    /// Embedded module with two DLA cores.
    pub fn jetson() -> Self {
        Self {
            name: "jetson-xavier".into(),
            fast_fp16: true,
            fast_int8: true,
            dla_cores: 2,
        }
    }

    /// Discrete GPU, no DLA.
    pub fn discrete_gpu() -> Self {
        Self {
            name: "discrete-gpu".into(),
            fast_fp16: true,
            fast_int8: true,
            dla_cores: 0,
        }
    }

    /// Older embedded GPU: full precision only.
    pub fn fp32_only() -> Self {
        Self {
            name: "fp32-gpu".into(),
            fast_fp16: false,
            fast_int8: false,
            dla_cores: 0,
        }
    }
}

impl Default for ReferencePlatform {
    fn default() -> Self {
        Self::jetson()
    }
}

impl Platform for ReferencePlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_fast_fp16(&self) -> bool {
        self.fast_fp16
    }

    fn has_fast_int8(&self) -> bool {
        self.fast_int8
    }

    fn dla_cores(&self) -> u32 {
        self.dla_cores
    }

    fn can_run_on_dla(&self, op: &Operation) -> bool {
        if self.dla_cores == 0 {
            return false;
        }
        match &op.kind {
            OpKind::Convolution { window, .. } | OpKind::Deconvolution { window, .. } => {
                window.kernel.0 <= DLA_MAX_KERNEL && window.kernel.1 <= DLA_MAX_KERNEL
            }
            OpKind::Pooling { pool, window } => {
                *pool != PoolType::MaxAverageBlend
                    && window.kernel.0 <= DLA_MAX_POOL_WINDOW
                    && window.kernel.1 <= DLA_MAX_POOL_WINDOW
            }
            OpKind::Activation(
                ActivationType::Relu | ActivationType::Sigmoid | ActivationType::LeakyRelu { .. },
            ) => true,
            OpKind::FullyConnected { .. }
            | OpKind::Scale { .. }
            | OpKind::Concatenation
            | OpKind::ElementWise(_) => true,
            OpKind::SoftMax | OpKind::Resize { .. } | OpKind::Plugin(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Device, Window};
    use plugin_registry::PluginRecord;

    fn op(kind: OpKind) -> Operation {
        Operation {
            name: "op".into(),
            kind,
            inputs: vec![0],
            output: 1,
            precision: None,
            device: Device::Gpu,
        }
    }

    #[test]
    fn test_dla_accepts_small_pooling() {
        let p = ReferencePlatform::jetson();
        let pool = op(OpKind::Pooling {
            pool: PoolType::Max,
            window: Window::identity(),
        });
        assert!(p.can_run_on_dla(&pool));
    }

    #[test]
    fn test_dla_rejects_plugins_and_softmax() {
        let p = ReferencePlatform::jetson();
        assert!(!p.can_run_on_dla(&op(OpKind::SoftMax)));
        assert!(!p.can_run_on_dla(&op(OpKind::Plugin(PluginRecord::ActivationMish { size: 4 }))));
    }

    #[test]
    fn test_no_dla_cores_rejects_everything() {
        let p = ReferencePlatform::discrete_gpu();
        assert!(!p.can_run_on_dla(&op(OpKind::Concatenation)));
    }
}
