// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-kind field layouts.
//!
//! Each kind has one encode and one decode function; the registry pairs
//! them. All values are little-endian, integers are 4 bytes, booleans 1.

use tensor_core::DType;

use crate::cursor::{ByteReader, ByteWriter};
use crate::record::{non_negative, DeformableRecord, YoloRecord, CLASS_NAME_WIDTH, ROUTE_MAX_INPUTS};
use crate::{PluginError, PluginKind, PluginRecord};

pub type EncodeFn = fn(&PluginRecord, &mut ByteWriter) -> Result<(), PluginError>;
pub type DecodeFn = fn(&mut ByteReader<'_>) -> Result<PluginRecord, PluginError>;

/// An encode/decode pair for one kind.
#[derive(Clone, Copy)]
pub struct Codec {
    pub encode: EncodeFn,
    pub decode: DecodeFn,
    /// `false` for kinds kept only to read engines built by older versions.
    pub compilation_target: bool,
}

impl Codec {
    pub fn new(encode: EncodeFn, decode: DecodeFn) -> Self {
        Self {
            encode,
            decode,
            compilation_target: true,
        }
    }

    pub fn legacy(encode: EncodeFn, decode: DecodeFn) -> Self {
        Self {
            encode,
            decode,
            compilation_target: false,
        }
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("compilation_target", &self.compilation_target)
            .finish_non_exhaustive()
    }
}

/// The codec each built-in kind uses.
pub fn builtin(kind: PluginKind) -> Codec {
    match kind {
        PluginKind::ActivationLeaky => Codec::legacy(encode_leaky, decode_leaky),
        PluginKind::ActivationMish => Codec::new(encode_mish, decode_mish),
        PluginKind::ActivationLogistic => Codec::new(encode_logistic, decode_logistic),
        PluginKind::ActivationCRelu => Codec::new(encode_crelu, decode_crelu),
        PluginKind::Region => Codec::new(encode_region, decode_region),
        PluginKind::Reorg => Codec::new(encode_reorg, decode_reorg),
        PluginKind::Shortcut => Codec::new(encode_shortcut, decode_shortcut),
        PluginKind::MaxPoolFixedSize => Codec::new(encode_max_pool, decode_max_pool),
        PluginKind::Resize => Codec::legacy(encode_resize, decode_resize),
        PluginKind::FlattenConcat => Codec::new(encode_flatten, decode_flatten),
        PluginKind::Reshape => Codec::new(encode_reshape, decode_reshape),
        PluginKind::Yolo => Codec::new(encode_yolo, decode_yolo),
        PluginKind::Upsample => Codec::new(encode_upsample, decode_upsample),
        PluginKind::Route => Codec::legacy(encode_route, decode_route),
        PluginKind::Deformable => Codec::new(encode_deformable, decode_deformable),
    }
}

fn mismatch(expected: PluginKind, record: &PluginRecord) -> PluginError {
    PluginError::KindMismatch {
        expected,
        found: record.kind(),
    }
}

fn write_ints(w: &mut ByteWriter, values: &[i32]) {
    for &v in values {
        w.write_i32(v);
    }
}

// ── Activations ──────────────────────────────────────────────

fn encode_leaky(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::ActivationLeaky { slope, size } = rec else {
        return Err(mismatch(PluginKind::ActivationLeaky, rec));
    };
    w.write_f32(*slope);
    w.write_i32(*size);
    Ok(())
}

fn decode_leaky(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::ActivationLeaky {
        slope: r.read_f32()?,
        size: r.read_i32()?,
    })
}

fn encode_mish(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::ActivationMish { size } = rec else {
        return Err(mismatch(PluginKind::ActivationMish, rec));
    };
    w.write_i32(*size);
    Ok(())
}

fn decode_mish(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::ActivationMish { size: r.read_i32()? })
}

fn encode_logistic(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::ActivationLogistic { size } = rec else {
        return Err(mismatch(PluginKind::ActivationLogistic, rec));
    };
    w.write_i32(*size);
    Ok(())
}

fn decode_logistic(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::ActivationLogistic { size: r.read_i32()? })
}

fn encode_crelu(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::ActivationCRelu { ceiling, size } = rec else {
        return Err(mismatch(PluginKind::ActivationCRelu, rec));
    };
    w.write_f32(*ceiling);
    w.write_i32(*size);
    Ok(())
}

fn decode_crelu(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::ActivationCRelu {
        ceiling: r.read_f32()?,
        size: r.read_i32()?,
    })
}

// ── Detection heads ──────────────────────────────────────────

fn encode_region(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Region {
        classes,
        coords,
        num,
        c,
        h,
        w: width,
    } = rec
    else {
        return Err(mismatch(PluginKind::Region, rec));
    };
    write_ints(w, &[*classes, *coords, *num, *c, *h, *width]);
    Ok(())
}

fn decode_region(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::Region {
        classes: r.read_i32()?,
        coords: r.read_i32()?,
        num: r.read_i32()?,
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
    })
}

fn encode_yolo(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Yolo(y) = rec else {
        return Err(mismatch(PluginKind::Yolo, rec));
    };
    y.check()?;
    w.write_i32(y.classes);
    w.write_i32(y.num);
    w.write_i32(y.n_masks() as i32);
    w.write_f32(y.scale_xy);
    w.write_f32(y.nms_thresh);
    w.write_i32(y.nms_kind);
    w.write_i32(y.new_coords);
    write_ints(w, &[y.c, y.h, y.w]);
    w.write_f32_array(&y.mask);
    w.write_f32_array(&y.bias);
    for name in &y.class_names {
        w.write_fixed_str(name, CLASS_NAME_WIDTH);
    }
    Ok(())
}

fn decode_yolo(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    let classes = r.read_i32()?;
    let num = r.read_i32()?;
    let n_masks = r.read_count("n_masks")?;
    let scale_xy = r.read_f32()?;
    let nms_thresh = r.read_f32()?;
    let nms_kind = r.read_i32()?;
    let new_coords = r.read_i32()?;
    let (c, h, w) = (r.read_i32()?, r.read_i32()?, r.read_i32()?);
    let mask = r.read_f32_array(n_masks)?;
    let bias = r.read_f32_array(n_masks.saturating_mul(2).saturating_mul(non_negative("num", num)?))?;
    let class_count = non_negative("classes", classes)?;
    let mut class_names = Vec::with_capacity(class_count.min(r.remaining() / CLASS_NAME_WIDTH));
    for _ in 0..class_count {
        class_names.push(r.read_fixed_str(CLASS_NAME_WIDTH)?);
    }
    Ok(PluginRecord::Yolo(YoloRecord {
        classes,
        num,
        scale_xy,
        nms_thresh,
        nms_kind,
        new_coords,
        c,
        h,
        w,
        mask,
        bias,
        class_names,
    }))
}

// ── Shape operators ──────────────────────────────────────────

fn encode_reorg(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Reorg { stride, c, h, w: width } = rec else {
        return Err(mismatch(PluginKind::Reorg, rec));
    };
    write_ints(w, &[*stride, *c, *h, *width]);
    Ok(())
}

fn decode_reorg(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::Reorg {
        stride: r.read_i32()?,
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
    })
}

fn encode_upsample(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Upsample { stride, c, h, w: width } = rec else {
        return Err(mismatch(PluginKind::Upsample, rec));
    };
    write_ints(w, &[*stride, *c, *h, *width]);
    Ok(())
}

fn decode_upsample(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::Upsample {
        stride: r.read_i32()?,
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
    })
}

fn encode_reshape(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Reshape { n, c, h, w: width } = rec else {
        return Err(mismatch(PluginKind::Reshape, rec));
    };
    write_ints(w, &[*n, *c, *h, *width]);
    Ok(())
}

fn decode_reshape(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::Reshape {
        n: r.read_i32()?,
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
    })
}

fn encode_flatten(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::FlattenConcat {
        c,
        h,
        w: width,
        rows,
        cols,
    } = rec
    else {
        return Err(mismatch(PluginKind::FlattenConcat, rec));
    };
    write_ints(w, &[*c, *h, *width, *rows, *cols]);
    Ok(())
}

fn decode_flatten(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::FlattenConcat {
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
        rows: r.read_i32()?,
        cols: r.read_i32()?,
    })
}

fn encode_resize(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Resize {
        o_c,
        o_h,
        o_w,
        i_c,
        i_h,
        i_w,
    } = rec
    else {
        return Err(mismatch(PluginKind::Resize, rec));
    };
    write_ints(w, &[*o_c, *o_h, *o_w, *i_c, *i_h, *i_w]);
    Ok(())
}

fn decode_resize(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::Resize {
        o_c: r.read_i32()?,
        o_h: r.read_i32()?,
        o_w: r.read_i32()?,
        i_c: r.read_i32()?,
        i_h: r.read_i32()?,
        i_w: r.read_i32()?,
    })
}

// ── Pooling and merging ──────────────────────────────────────

fn encode_max_pool(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::MaxPoolFixedSize {
        c,
        h,
        w: width,
        n,
        stride_h,
        stride_w,
        win_size,
        padding,
    } = rec
    else {
        return Err(mismatch(PluginKind::MaxPoolFixedSize, rec));
    };
    write_ints(w, &[*c, *h, *width, *n, *stride_h, *stride_w, *win_size, *padding]);
    Ok(())
}

fn decode_max_pool(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::MaxPoolFixedSize {
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
        n: r.read_i32()?,
        stride_h: r.read_i32()?,
        stride_w: r.read_i32()?,
        win_size: r.read_i32()?,
        padding: r.read_i32()?,
    })
}

fn encode_shortcut(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Shortcut {
        back_c,
        back_h,
        back_w,
        mul,
        c,
        h,
        w: width,
        dtype,
    } = rec
    else {
        return Err(mismatch(PluginKind::Shortcut, rec));
    };
    write_ints(w, &[*back_c, *back_h, *back_w]);
    w.write_bool(*mul);
    write_ints(w, &[*c, *h, *width, dtype.wire_code()]);
    Ok(())
}

fn decode_shortcut(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    Ok(PluginRecord::Shortcut {
        back_c: r.read_i32()?,
        back_h: r.read_i32()?,
        back_w: r.read_i32()?,
        mul: r.read_bool()?,
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
        dtype: DType::from_wire_code(r.read_i32()?)?,
    })
}

fn encode_route(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Route {
        groups,
        group_id,
        inputs,
        c_in,
        c,
        h,
        w: width,
        dtype,
    } = rec
    else {
        return Err(mismatch(PluginKind::Route, rec));
    };
    write_ints(w, &[*groups, *group_id, *inputs]);
    write_ints(w, c_in);
    write_ints(w, &[*c, *h, *width, dtype.wire_code()]);
    Ok(())
}

fn decode_route(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    let groups = r.read_i32()?;
    let group_id = r.read_i32()?;
    let inputs = r.read_i32()?;
    let mut c_in = [0i32; ROUTE_MAX_INPUTS];
    for slot in c_in.iter_mut() {
        *slot = r.read_i32()?;
    }
    Ok(PluginRecord::Route {
        groups,
        group_id,
        inputs,
        c_in,
        c: r.read_i32()?,
        h: r.read_i32()?,
        w: r.read_i32()?,
        dtype: DType::from_wire_code(r.read_i32()?)?,
    })
}

// ── Deformable convolution ───────────────────────────────────

fn encode_deformable(rec: &PluginRecord, w: &mut ByteWriter) -> Result<(), PluginError> {
    let PluginRecord::Deformable(d) = rec else {
        return Err(mismatch(PluginKind::Deformable, rec));
    };
    d.check()?;
    write_ints(
        w,
        &[
            d.chunk_dim,
            d.kernel_h,
            d.kernel_w,
            d.stride_h,
            d.stride_w,
            d.padding_h,
            d.padding_w,
            d.deformable_group,
            d.i_n,
            d.i_c,
            d.i_h,
            d.i_w,
            d.o_n,
            d.o_c,
            d.o_h,
            d.o_w,
        ],
    );
    w.write_f32_array(&d.offset);
    w.write_f32_array(&d.mask);
    w.write_f32_array(&d.data);
    w.write_f32_array(&d.bias2);
    w.write_f32_array(&d.ones1);
    w.write_f32_array(&d.ones2);
    Ok(())
}

fn decode_deformable(r: &mut ByteReader<'_>) -> Result<PluginRecord, PluginError> {
    let mut header = [0i32; 16];
    for slot in header.iter_mut() {
        *slot = r.read_i32()?;
    }
    let [chunk_dim, kernel_h, kernel_w, stride_h, stride_w, padding_h, padding_w, deformable_group, i_n, i_c, i_h, i_w, o_n, o_c, o_h, o_w] =
        header;
    let mut rec = DeformableRecord {
        chunk_dim,
        kernel_h,
        kernel_w,
        stride_h,
        stride_w,
        padding_h,
        padding_w,
        deformable_group,
        i_n,
        i_c,
        i_h,
        i_w,
        o_n,
        o_c,
        o_h,
        o_w,
        offset: Vec::new(),
        mask: Vec::new(),
        data: Vec::new(),
        bias2: Vec::new(),
        ones1: Vec::new(),
        ones2: Vec::new(),
    };
    let l = rec.lengths()?;
    rec.offset = r.read_f32_array(l.offset)?;
    rec.mask = r.read_f32_array(l.mask)?;
    rec.data = r.read_f32_array(l.data)?;
    rec.bias2 = r.read_f32_array(l.bias2)?;
    rec.ones1 = r.read_f32_array(l.ones1)?;
    rec.ones2 = r.read_f32_array(l.ones2)?;
    Ok(PluginRecord::Deformable(rec))
}
