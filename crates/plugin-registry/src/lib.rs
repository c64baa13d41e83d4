// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # plugin-registry
//!
//! Custom operators that the compiled engine carries alongside the native
//! ones, and the byte layouts used to persist them.
//!
//! # Key Components
//!
//! - [`PluginKind`] and [`PluginRecord`]: the closed set of custom operator
//!   kinds and the parameters each persists.
//! - [`ByteWriter`] / [`ByteReader`]: a little-endian cursor. Every decode
//!   ends with [`ByteReader::finish`], which rejects a payload that was not
//!   consumed to the exact byte.
//! - [`PluginRegistry`]: maps each kind to a [`Codec`] and resolves the
//!   operator names found in a persisted engine back to kinds.
//!
//! Some kinds (`ActivationLeaky`, `Resize`, `Route`) are only decoded, so
//! engines written by earlier builds keep loading; the compiler never emits
//! them.

mod codec;
mod cursor;
mod error;
mod record;
mod registry;

pub use codec::{Codec, DecodeFn, EncodeFn};
pub use cursor::{ByteReader, ByteWriter};
pub use error::PluginError;
pub use record::{
    DeformableLengths, DeformableRecord, PluginKind, PluginRecord, YoloRecord, CLASS_NAME_WIDTH,
    ROUTE_MAX_INPUTS,
};
pub use registry::PluginRegistry;
