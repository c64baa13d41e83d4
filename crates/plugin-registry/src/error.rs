// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for plugin serialization.

use crate::PluginKind;

/// Errors raised while encoding or decoding custom operator records.
///
/// Every decode error means the persisted engine is corrupt or was written
/// by an incompatible version; none of them is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The payload ended before a field could be read.
    #[error("truncated payload: needed {needed} bytes at offset {offset}, {remaining} left")]
    Truncated {
        needed: usize,
        offset: usize,
        remaining: usize,
    },

    /// A decoder stopped before or after the declared payload length.
    #[error("{kind} payload length mismatch: consumed {consumed} of {declared} bytes")]
    LengthMismatch {
        kind: &'static str,
        consumed: usize,
        declared: usize,
    },

    /// No registered prefix matches an operator name.
    #[error("cannot deserialize plugin '{0}': no registered kind matches")]
    UnknownPlugin(String),

    /// The kind has no codec in this registry.
    #[error("no codec registered for {0:?}")]
    Unregistered(PluginKind),

    /// An encoder received a record of another kind.
    #[error("codec for {expected:?} cannot encode a {found:?} record")]
    KindMismatch {
        expected: PluginKind,
        found: PluginKind,
    },

    /// A decoded field holds a value no encoder could have written.
    #[error("invalid value {value} for field '{field}'")]
    InvalidValue { field: &'static str, value: i64 },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidString,

    /// An array field does not hold the number of values its header implies.
    #[error("field '{field}' holds {actual} values, expected {expected}")]
    ArrayLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Tensor(#[from] tensor_core::TensorError),
}
