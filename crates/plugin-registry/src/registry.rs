// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kind-to-codec registry and the name-prefix lookup used on load.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::{self, Codec};
use crate::cursor::{ByteReader, ByteWriter};
use crate::{PluginError, PluginKind, PluginRecord};

/// Maps each plugin kind to its encode/decode pair.
///
/// Persisted engines name their custom operators `<Prefix><layer id>`; on
/// load the registry resolves a name to a kind by longest matching prefix
/// and dispatches to that kind's decoder.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    codecs: BTreeMap<PluginKind, Codec>,
    /// Sorted longest prefix first.
    prefixes: Vec<(&'static str, PluginKind)>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in kind.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for kind in PluginKind::ALL {
            registry.register(kind, codec::builtin(kind));
        }
        registry
    }

    /// Registers (or replaces) the codec for `kind`.
    pub fn register(&mut self, kind: PluginKind, codec: Codec) {
        if self.codecs.insert(kind, codec).is_none() {
            self.prefixes.push((kind.prefix(), kind));
            self.prefixes
                .sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.0.cmp(b.0)));
        }
    }

    pub fn codec(&self, kind: PluginKind) -> Result<&Codec, PluginError> {
        self.codecs.get(&kind).ok_or(PluginError::Unregistered(kind))
    }

    pub fn contains(&self, kind: PluginKind) -> bool {
        self.codecs.contains_key(&kind)
    }

    /// Whether the compiler may emit new instances of `kind`.
    pub fn is_compilation_target(&self, kind: PluginKind) -> bool {
        self.codecs
            .get(&kind)
            .map(|c| c.compilation_target)
            .unwrap_or(false)
    }

    pub fn kinds(&self) -> impl Iterator<Item = PluginKind> + '_ {
        self.codecs.keys().copied()
    }

    /// Serializes a record with its kind's codec.
    pub fn encode(&self, record: &PluginRecord) -> Result<Vec<u8>, PluginError> {
        let codec = self.codec(record.kind())?;
        let mut w = ByteWriter::new();
        (codec.encode)(record, &mut w)?;
        Ok(w.into_bytes())
    }

    /// Decodes a payload of known kind. The decoder must consume exactly
    /// `bytes.len()` bytes.
    pub fn decode(&self, kind: PluginKind, bytes: &[u8]) -> Result<PluginRecord, PluginError> {
        let codec = self.codec(kind)?;
        let mut r = ByteReader::new(bytes);
        let record = (codec.decode)(&mut r)?;
        r.finish(kind.prefix())?;
        Ok(record)
    }

    /// Resolves an operator name to a kind by longest registered prefix.
    pub fn kind_for_name(&self, name: &str) -> Option<PluginKind> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| name.starts_with(*prefix))
            .map(|&(_, kind)| kind)
    }

    /// Decodes the payload of the operator called `name`.
    pub fn decode_named(&self, name: &str, bytes: &[u8]) -> Result<PluginRecord, PluginError> {
        let kind = self
            .kind_for_name(name)
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))?;
        debug!(plugin = name, %kind, len = bytes.len(), "decoding plugin");
        self.decode(kind, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeformableRecord, YoloRecord};
    use tensor_core::DType;

    fn sample_yolo() -> PluginRecord {
        PluginRecord::Yolo(YoloRecord {
            classes: 2,
            num: 9,
            scale_xy: 1.05,
            nms_thresh: 0.45,
            nms_kind: 1,
            new_coords: 0,
            c: 21,
            h: 13,
            w: 13,
            mask: vec![6.0, 7.0, 8.0],
            bias: (0..54).map(|i| i as f32).collect(),
            class_names: vec!["person".to_string(), "bicycle".to_string()],
        })
    }

    fn sample_deformable() -> PluginRecord {
        let mut rec = DeformableRecord {
            chunk_dim: 4 * 2 * 2,
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 1,
            stride_w: 1,
            padding_h: 0,
            padding_w: 0,
            deformable_group: 1,
            i_n: 1,
            i_c: 2,
            i_h: 3,
            i_w: 3,
            o_n: 1,
            o_c: 2,
            o_h: 2,
            o_w: 2,
            offset: vec![],
            mask: vec![],
            data: vec![],
            bias2: vec![],
            ones1: vec![],
            ones2: vec![],
        };
        let l = rec.lengths().unwrap();
        rec.offset = vec![0.1; l.offset];
        rec.mask = vec![0.2; l.mask];
        rec.data = vec![0.3; l.data];
        rec.bias2 = vec![0.4; l.bias2];
        rec.ones1 = vec![1.0; l.ones1];
        rec.ones2 = vec![1.0; l.ones2];
        PluginRecord::Deformable(rec)
    }

    /// One representative record per kind.
    fn sample(kind: PluginKind) -> PluginRecord {
        match kind {
            PluginKind::ActivationLeaky => PluginRecord::ActivationLeaky { slope: 0.1, size: 4096 },
            PluginKind::ActivationMish => PluginRecord::ActivationMish { size: 2048 },
            PluginKind::ActivationLogistic => PluginRecord::ActivationLogistic { size: 169 },
            PluginKind::ActivationCRelu => PluginRecord::ActivationCRelu {
                ceiling: 6.0,
                size: 1024,
            },
            PluginKind::Region => PluginRecord::Region {
                classes: 20,
                coords: 4,
                num: 5,
                c: 125,
                h: 13,
                w: 13,
            },
            PluginKind::Reorg => PluginRecord::Reorg { stride: 2, c: 64, h: 26, w: 26 },
            PluginKind::Shortcut => PluginRecord::Shortcut {
                back_c: 32,
                back_h: 104,
                back_w: 104,
                mul: false,
                c: 32,
                h: 104,
                w: 104,
                dtype: DType::F32,
            },
            PluginKind::MaxPoolFixedSize => PluginRecord::max_pool_fixed(512, 13, 13, 1, 1, 1, 2),
            PluginKind::Resize => PluginRecord::Resize {
                o_c: 128,
                o_h: 26,
                o_w: 26,
                i_c: 128,
                i_h: 13,
                i_w: 13,
            },
            PluginKind::FlattenConcat => PluginRecord::flatten(16, 5, 5),
            PluginKind::Reshape => PluginRecord::Reshape { n: 1, c: 3, h: 85, w: 169 },
            PluginKind::Yolo => sample_yolo(),
            PluginKind::Upsample => PluginRecord::Upsample { stride: 2, c: 128, h: 13, w: 13 },
            PluginKind::Route => PluginRecord::Route {
                groups: 2,
                group_id: 1,
                inputs: 2,
                c_in: [32, 32, 0, 0],
                c: 32,
                h: 52,
                w: 52,
                dtype: DType::F16,
            },
            PluginKind::Deformable => sample_deformable(),
        }
    }

    #[test]
    fn test_every_kind_roundtrips() {
        let registry = PluginRegistry::with_builtin();
        for (layer, kind) in PluginKind::ALL.into_iter().enumerate() {
            let rec = sample(kind);
            assert_eq!(rec.kind(), kind);
            let bytes = registry.encode(&rec).unwrap();
            let name = format!("{}{layer}", kind.prefix());
            let decoded = registry.decode_named(&name, &bytes).unwrap();
            assert_eq!(decoded, rec, "{kind}");
            // Bit-exact: re-encoding reproduces the same payload.
            assert_eq!(registry.encode(&decoded).unwrap(), bytes, "{kind}");
        }
    }

    #[test]
    fn test_yolo_long_multibyte_name_reloads() {
        let registry = PluginRegistry::with_builtin();
        let PluginRecord::Yolo(mut y) = sample_yolo() else {
            unreachable!()
        };
        y.class_names[1] = format!("{}é", "a".repeat(254));
        let bytes = registry.encode(&PluginRecord::Yolo(y)).unwrap();
        match registry.decode_named("Yolo3", &bytes).unwrap() {
            PluginRecord::Yolo(decoded) => {
                assert_eq!(decoded.class_names[0], "person");
                assert_eq!(decoded.class_names[1], "a".repeat(254));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_builtin_covers_every_kind() {
        let registry = PluginRegistry::with_builtin();
        assert_eq!(registry.kinds().count(), PluginKind::ALL.len());
    }

    #[test]
    fn test_legacy_kinds_are_not_compilation_targets() {
        let registry = PluginRegistry::with_builtin();
        assert!(!registry.is_compilation_target(PluginKind::ActivationLeaky));
        assert!(!registry.is_compilation_target(PluginKind::Resize));
        assert!(!registry.is_compilation_target(PluginKind::Route));
        assert!(registry.is_compilation_target(PluginKind::Yolo));
        assert!(registry.is_compilation_target(PluginKind::Shortcut));
    }

    #[test]
    fn test_leaky_byte_layout() {
        let registry = PluginRegistry::with_builtin();
        let bytes = registry
            .encode(&PluginRecord::ActivationLeaky { slope: 0.1, size: 4096 })
            .unwrap();
        let mut expected = 0.1f32.to_le_bytes().to_vec();
        expected.extend_from_slice(&4096i32.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_shortcut_layout_has_one_byte_bool() {
        let registry = PluginRegistry::with_builtin();
        let rec = PluginRecord::Shortcut {
            back_c: 64,
            back_h: 52,
            back_w: 52,
            mul: true,
            c: 64,
            h: 52,
            w: 52,
            dtype: DType::F16,
        };
        let bytes = registry.encode(&rec).unwrap();
        assert_eq!(bytes.len(), 3 * 4 + 1 + 4 * 4);
        assert_eq!(bytes[12], 1);
        assert_eq!(registry.decode(PluginKind::Shortcut, &bytes).unwrap(), rec);
    }

    #[test]
    fn test_yolo_roundtrip_and_size() {
        let registry = PluginRegistry::with_builtin();
        let rec = sample_yolo();
        let bytes = registry.encode(&rec).unwrap();
        assert_eq!(bytes.len(), 10 * 4 + 3 * 4 + 54 * 4 + 2 * 256);
        assert_eq!(registry.decode_named("Yolo30", &bytes).unwrap(), rec);
    }

    #[test]
    fn test_yolo_rejects_inconsistent_bias() {
        let registry = PluginRegistry::with_builtin();
        let PluginRecord::Yolo(mut y) = sample_yolo() else {
            unreachable!()
        };
        y.bias.pop();
        assert!(matches!(
            registry.encode(&PluginRecord::Yolo(y)),
            Err(PluginError::ArrayLength { field: "bias", .. })
        ));
    }

    #[test]
    fn test_deformable_roundtrip() {
        let registry = PluginRegistry::with_builtin();
        let rec = sample_deformable();
        let bytes = registry.encode(&rec).unwrap();
        // header + offset 32 + mask 16 + data 16 + bias2 2 + ones1 4 + ones2 32
        assert_eq!(bytes.len(), 16 * 4 + (32 + 16 + 16 + 2 + 4 + 32) * 4);
        assert_eq!(registry.decode(PluginKind::Deformable, &bytes).unwrap(), rec);
    }

    #[test]
    fn test_legacy_route_decodes() {
        let registry = PluginRegistry::with_builtin();
        let rec = PluginRecord::Route {
            groups: 2,
            group_id: 1,
            inputs: 1,
            c_in: [64, 0, 0, 0],
            c: 32,
            h: 26,
            w: 26,
            dtype: DType::F32,
        };
        let bytes = registry.encode(&rec).unwrap();
        assert_eq!(bytes.len(), 11 * 4);
        assert_eq!(registry.decode_named("Route12", &bytes).unwrap(), rec);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let registry = PluginRegistry::with_builtin();
        let mut bytes = registry
            .encode(&PluginRecord::Upsample { stride: 2, c: 128, h: 13, w: 13 })
            .unwrap();
        bytes.push(0);
        assert!(matches!(
            registry.decode(PluginKind::Upsample, &bytes),
            Err(PluginError::LengthMismatch {
                kind: "Upsample",
                consumed: 16,
                declared: 17
            })
        ));
    }

    #[test]
    fn test_short_payload_rejected() {
        let registry = PluginRegistry::with_builtin();
        let bytes = [0u8; 12];
        assert!(matches!(
            registry.decode(PluginKind::Reorg, &bytes),
            Err(PluginError::Truncated { .. })
        ));
    }

    #[test]
    fn test_name_resolution() {
        let registry = PluginRegistry::with_builtin();
        assert_eq!(registry.kind_for_name("Pooling7"), Some(PluginKind::MaxPoolFixedSize));
        assert_eq!(registry.kind_for_name("Flatten3"), Some(PluginKind::FlattenConcat));
        assert_eq!(registry.kind_for_name("ActivationCReLU2"), Some(PluginKind::ActivationCRelu));
        assert_eq!(registry.kind_for_name("Softmax4"), None);
        assert!(matches!(
            registry.decode_named("Softmax4", &[]),
            Err(PluginError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn test_unregistered_kind() {
        let mut registry = PluginRegistry::new();
        registry.register(PluginKind::Reshape, codec::builtin(PluginKind::Reshape));
        assert!(matches!(
            registry.encode(&PluginRecord::ActivationMish { size: 8 }),
            Err(PluginError::Unregistered(PluginKind::ActivationMish))
        ));
        assert!(registry
            .encode(&PluginRecord::Reshape { n: 1, c: 4, h: 2, w: 2 })
            .is_ok());
    }
}
