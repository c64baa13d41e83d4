// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Little-endian serialization cursor.
//!
//! Records are written as flat field sequences with no tags and no length
//! prefix; the reader must consume the fields in exactly the order the
//! writer produced them. [`ByteReader::finish`] then asserts that the cursor
//! landed on the declared end of the payload.

use crate::PluginError;

/// Appends fields to a growing buffer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// One byte, `0` or `1`.
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Writes each value in order, without a count.
    pub fn write_f32_array(&mut self, values: &[f32]) {
        for &v in values {
            self.write_f32(v);
        }
    }

    /// Exactly `width` bytes: the string truncated to at most `width - 1`
    /// bytes on a character boundary and NUL padded, so a reader always
    /// finds a terminator.
    pub fn write_fixed_str(&mut self, s: &str, width: usize) {
        let mut len = s.len().min(width.saturating_sub(1));
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.extend_from_slice(&s.as_bytes()[..len]);
        self.buf.resize(self.buf.len() + (width - len), 0);
    }

    /// A `u32` length followed by the bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// A `u32` length followed by UTF-8 bytes.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Appends bytes with no length.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Consumes fields from a borrowed buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PluginError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(PluginError::Truncated {
                needed: n,
                offset: self.pos,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PluginError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, PluginError> {
        Ok(self.take(1)?[0])
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool, PluginError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, PluginError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, PluginError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, PluginError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, PluginError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Reads `count` values. Fails before allocating if they cannot fit.
    pub fn read_f32_array(&mut self, count: usize) -> Result<Vec<f32>, PluginError> {
        let bytes = self.take(count.saturating_mul(4))?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Reads `width` bytes and returns the text before the first NUL.
    pub fn read_fixed_str(&mut self, width: usize) -> Result<String, PluginError> {
        let bytes = self.take(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..end].to_vec()).map_err(|_| PluginError::InvalidString)
    }

    /// Reads a `u32`-length-prefixed byte slice.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], PluginError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Reads a `u32`-length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, PluginError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PluginError::InvalidString)
    }

    /// Reads a count field written as `i32`; negative values are rejected.
    pub fn read_count(&mut self, field: &'static str) -> Result<usize, PluginError> {
        let v = self.read_i32()?;
        usize::try_from(v).map_err(|_| PluginError::InvalidValue {
            field,
            value: i64::from(v),
        })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Asserts that every byte of the payload was consumed.
    pub fn finish(self, kind: &'static str) -> Result<(), PluginError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(PluginError::LengthMismatch {
                kind,
                consumed: self.pos,
                declared: self.buf.len(),
            })
        }
    }
}
