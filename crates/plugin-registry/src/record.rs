// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Custom operator kinds and the parameters each one persists.
//!
//! Integer fields are kept as `i32` because that is how they are laid out
//! in the engine file. Array fields carry their own lengths here; on the
//! wire the lengths are implied by earlier header fields.

use std::fmt;

use tensor_core::DType;

use crate::PluginError;

/// Width in bytes of one persisted YOLO class name.
pub const CLASS_NAME_WIDTH: usize = 256;

/// Maximum number of inputs a legacy concatenation record describes.
pub const ROUTE_MAX_INPUTS: usize = 4;

/// Every custom operator kind an engine can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    ActivationLeaky,
    ActivationMish,
    ActivationLogistic,
    ActivationCRelu,
    Region,
    Reorg,
    Shortcut,
    MaxPoolFixedSize,
    Resize,
    FlattenConcat,
    Reshape,
    Yolo,
    Upsample,
    Route,
    Deformable,
}

impl PluginKind {
    pub const ALL: [PluginKind; 15] = [
        PluginKind::ActivationLeaky,
        PluginKind::ActivationMish,
        PluginKind::ActivationLogistic,
        PluginKind::ActivationCRelu,
        PluginKind::Region,
        PluginKind::Reorg,
        PluginKind::Shortcut,
        PluginKind::MaxPoolFixedSize,
        PluginKind::Resize,
        PluginKind::FlattenConcat,
        PluginKind::Reshape,
        PluginKind::Yolo,
        PluginKind::Upsample,
        PluginKind::Route,
        PluginKind::Deformable,
    ];

    /// Operator-name prefix that identifies this kind in a persisted engine.
    pub fn prefix(self) -> &'static str {
        match self {
            PluginKind::ActivationLeaky => "ActivationLeaky",
            PluginKind::ActivationMish => "ActivationMish",
            PluginKind::ActivationLogistic => "ActivationLogistic",
            PluginKind::ActivationCRelu => "ActivationCReLU",
            PluginKind::Region => "Region",
            PluginKind::Reorg => "Reorg",
            PluginKind::Shortcut => "Shortcut",
            PluginKind::MaxPoolFixedSize => "Pooling",
            PluginKind::Resize => "Resize",
            PluginKind::FlattenConcat => "Flatten",
            PluginKind::Reshape => "Reshape",
            PluginKind::Yolo => "Yolo",
            PluginKind::Upsample => "Upsample",
            PluginKind::Route => "Route",
            PluginKind::Deformable => "Deformable",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// YOLO detection head parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct YoloRecord {
    pub classes: i32,
    pub num: i32,
    pub scale_xy: f32,
    pub nms_thresh: f32,
    pub nms_kind: i32,
    pub new_coords: i32,
    pub c: i32,
    pub h: i32,
    pub w: i32,
    /// `n_masks` anchor indices.
    pub mask: Vec<f32>,
    /// `n_masks * 2 * num` anchor sizes.
    pub bias: Vec<f32>,
    /// `classes` names.
    pub class_names: Vec<String>,
}

impl YoloRecord {
    pub fn n_masks(&self) -> usize {
        self.mask.len()
    }

    pub(crate) fn check(&self) -> Result<(), PluginError> {
        let num = non_negative("num", self.num)?;
        let classes = non_negative("classes", self.classes)?;
        check_len("bias", self.bias.len(), self.n_masks().saturating_mul(2).saturating_mul(num))?;
        check_len("class_names", self.class_names.len(), classes)
    }
}

/// Deformable convolution parameters and weights.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformableRecord {
    pub chunk_dim: i32,
    pub kernel_h: i32,
    pub kernel_w: i32,
    pub stride_h: i32,
    pub stride_w: i32,
    pub padding_h: i32,
    pub padding_w: i32,
    pub deformable_group: i32,
    pub i_n: i32,
    pub i_c: i32,
    pub i_h: i32,
    pub i_w: i32,
    pub o_n: i32,
    pub o_c: i32,
    pub o_h: i32,
    pub o_w: i32,
    /// `2 * chunk_dim` values.
    pub offset: Vec<f32>,
    /// `chunk_dim` values.
    pub mask: Vec<f32>,
    /// `i_c * o_c * kernel_h * kernel_w` values.
    pub data: Vec<f32>,
    /// `o_c` values.
    pub bias2: Vec<f32>,
    /// `height_ones * width_ones` values.
    pub ones1: Vec<f32>,
    /// `i_c * kernel_h * kernel_w * height_ones * width_ones` values.
    pub ones2: Vec<f32>,
}

/// Expected lengths of every array field of a [`DeformableRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeformableLengths {
    pub offset: usize,
    pub mask: usize,
    pub data: usize,
    pub bias2: usize,
    pub ones1: usize,
    pub ones2: usize,
}

impl DeformableRecord {
    /// Derives array lengths from the header fields.
    pub fn lengths(&self) -> Result<DeformableLengths, PluginError> {
        let chunk = non_negative("chunk_dim", self.chunk_dim)?;
        let kh = non_negative("kernel_h", self.kernel_h)?;
        let kw = non_negative("kernel_w", self.kernel_w)?;
        let i_c = non_negative("i_c", self.i_c)?;
        let o_c = non_negative("o_c", self.o_c)?;
        let height_ones = ones_extent("stride_h", self.i_h, self.padding_h, self.kernel_h, self.stride_h)?;
        let width_ones = ones_extent("stride_w", self.i_w, self.padding_w, self.kernel_w, self.stride_w)?;
        let window = kh.saturating_mul(kw);
        let ones1 = height_ones.saturating_mul(width_ones);
        Ok(DeformableLengths {
            offset: chunk.saturating_mul(2),
            mask: chunk,
            data: i_c.saturating_mul(o_c).saturating_mul(window),
            bias2: o_c,
            ones1,
            ones2: i_c.saturating_mul(window).saturating_mul(ones1),
        })
    }

    pub(crate) fn check(&self) -> Result<(), PluginError> {
        let l = self.lengths()?;
        check_len("offset", self.offset.len(), l.offset)?;
        check_len("mask", self.mask.len(), l.mask)?;
        check_len("data", self.data.len(), l.data)?;
        check_len("bias2", self.bias2.len(), l.bias2)?;
        check_len("ones1", self.ones1.len(), l.ones1)?;
        check_len("ones2", self.ones2.len(), l.ones2)
    }
}

/// The persisted parameters of one custom operator instance.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginRecord {
    ActivationLeaky { slope: f32, size: i32 },
    ActivationMish { size: i32 },
    ActivationLogistic { size: i32 },
    ActivationCRelu { ceiling: f32, size: i32 },
    Region {
        classes: i32,
        coords: i32,
        num: i32,
        c: i32,
        h: i32,
        w: i32,
    },
    Reorg { stride: i32, c: i32, h: i32, w: i32 },
    Shortcut {
        back_c: i32,
        back_h: i32,
        back_w: i32,
        mul: bool,
        c: i32,
        h: i32,
        w: i32,
        dtype: DType,
    },
    /// `c`, `h`, `w` are the output dimensions.
    MaxPoolFixedSize {
        c: i32,
        h: i32,
        w: i32,
        n: i32,
        stride_h: i32,
        stride_w: i32,
        win_size: i32,
        padding: i32,
    },
    Resize {
        o_c: i32,
        o_h: i32,
        o_w: i32,
        i_c: i32,
        i_h: i32,
        i_w: i32,
    },
    FlattenConcat {
        c: i32,
        h: i32,
        w: i32,
        rows: i32,
        cols: i32,
    },
    Reshape { n: i32, c: i32, h: i32, w: i32 },
    Yolo(YoloRecord),
    Upsample { stride: i32, c: i32, h: i32, w: i32 },
    Route {
        groups: i32,
        group_id: i32,
        inputs: i32,
        c_in: [i32; ROUTE_MAX_INPUTS],
        c: i32,
        h: i32,
        w: i32,
        dtype: DType,
    },
    Deformable(DeformableRecord),
}

impl PluginRecord {
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginRecord::ActivationLeaky { .. } => PluginKind::ActivationLeaky,
            PluginRecord::ActivationMish { .. } => PluginKind::ActivationMish,
            PluginRecord::ActivationLogistic { .. } => PluginKind::ActivationLogistic,
            PluginRecord::ActivationCRelu { .. } => PluginKind::ActivationCRelu,
            PluginRecord::Region { .. } => PluginKind::Region,
            PluginRecord::Reorg { .. } => PluginKind::Reorg,
            PluginRecord::Shortcut { .. } => PluginKind::Shortcut,
            PluginRecord::MaxPoolFixedSize { .. } => PluginKind::MaxPoolFixedSize,
            PluginRecord::Resize { .. } => PluginKind::Resize,
            PluginRecord::FlattenConcat { .. } => PluginKind::FlattenConcat,
            PluginRecord::Reshape { .. } => PluginKind::Reshape,
            PluginRecord::Yolo(_) => PluginKind::Yolo,
            PluginRecord::Upsample { .. } => PluginKind::Upsample,
            PluginRecord::Route { .. } => PluginKind::Route,
            PluginRecord::Deformable(_) => PluginKind::Deformable,
        }
    }

    /// Flattening record for a `c x h x w` input.
    pub fn flatten(c: i32, h: i32, w: i32) -> Self {
        PluginRecord::FlattenConcat {
            c,
            h,
            w,
            rows: c,
            cols: h * w,
        }
    }

    /// Fixed-size max pooling record; `c`, `h`, `w` are output dimensions.
    pub fn max_pool_fixed(c: i32, h: i32, w: i32, n: i32, stride_h: i32, stride_w: i32, win_size: i32) -> Self {
        PluginRecord::MaxPoolFixedSize {
            c,
            h,
            w,
            n,
            stride_h,
            stride_w,
            win_size,
            padding: win_size - 1,
        }
    }
}

pub(crate) fn non_negative(field: &'static str, v: i32) -> Result<usize, PluginError> {
    usize::try_from(v).map_err(|_| PluginError::InvalidValue {
        field,
        value: i64::from(v),
    })
}

pub(crate) fn check_len(field: &'static str, actual: usize, expected: usize) -> Result<(), PluginError> {
    if actual == expected {
        Ok(())
    } else {
        Err(PluginError::ArrayLength {
            field,
            expected,
            actual,
        })
    }
}

fn ones_extent(field: &'static str, size: i32, pad: i32, kernel: i32, stride: i32) -> Result<usize, PluginError> {
    if stride <= 0 {
        return Err(PluginError::InvalidValue {
            field,
            value: i64::from(stride),
        });
    }
    let span = i64::from(size) + 2 * i64::from(pad) - i64::from(kernel);
    if span < 0 {
        return Ok(0);
    }
    Ok((span / i64::from(stride)) as usize + 1)
}
