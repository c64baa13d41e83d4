// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: graph → compile → persist → load → infer.
//!
//! These tests exercise the complete flow across the five library crates
//! and check the type-state transitions end-to-end.

use std::sync::Arc;

use model_ir::graph::Validated;
use model_ir::{
    ActivationMode, BatchNorm, Conv2d, LayerGraph, LayerKind, Route, Shortcut, Yolo,
};
use partition_planner::{SliceDevice, SliceStrategy, SplitAt};
use plugin_registry::{PluginRecord, PluginRegistry};
use runtime::{
    compile_plan, BuildOutcome, CompilationSession, Device, DevicePolicy, ElementWiseOp,
    InferenceEngine, OpKind, Precision, ReferencePlatform, ResolvedPolicy, RuntimeConfig,
    RuntimeError, TensorBatches, MAX_BUFFERS,
};
use tensor_core::{DType, Dims, Tensor};

// ── Helpers ────────────────────────────────────────────────────

fn conv(inputs: usize, outputs: usize) -> LayerKind {
    LayerKind::Conv2d(Conv2d::square(inputs, outputs, 3, 1, 1))
}

fn conv_bn(inputs: usize, outputs: usize) -> LayerKind {
    let mut c = Conv2d::square(inputs, outputs, 3, 1, 1);
    c.batchnorm = Some(BatchNorm::identity(outputs));
    LayerKind::Conv2d(c)
}

/// A small detector-shaped network: conv/bn blocks, a residual, a route
/// back to an earlier block, upsampling and a yolo head.
fn detector() -> LayerGraph<Validated> {
    let mut g = LayerGraph::new("detector", Dims::chw(3, 16, 16));
    g.push(conv_bn(3, 8)).unwrap(); // 0
    g.push(LayerKind::Activation(ActivationMode::Leaky { slope: 0.1 })).unwrap(); // 1
    g.push(conv_bn(8, 8)).unwrap(); // 2
    g.push(LayerKind::Activation(ActivationMode::Mish)).unwrap(); // 3
    g.push(LayerKind::Shortcut(Shortcut {
        back_layer: 1,
        mul: false,
    }))
    .unwrap(); // 4
    g.push(LayerKind::Route(Route {
        layers: vec![1, 4],
        groups: 1,
        group_id: 0,
    }))
    .unwrap(); // 5
    g.push(LayerKind::Conv2d(Conv2d::square(16, 18, 1, 1, 0))).unwrap(); // 6
    g.push(LayerKind::Yolo(Yolo {
        classes: 1,
        num: 3,
        mask: vec![0.0, 1.0, 2.0],
        bias: vec![10.0, 14.0, 23.0, 27.0, 37.0, 58.0, 81.0, 82.0, 135.0, 169.0, 344.0, 319.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        scale_xy: 1.05,
        nms_thresh: 0.45,
        nms_kind: 0,
        new_coords: 0,
        class_names: vec!["object".into()],
    }))
    .unwrap(); // 7
    g.set_final(7).unwrap();
    g.validate().unwrap()
}

fn fp16_policy() -> ResolvedPolicy {
    ResolvedPolicy::resolve(&RuntimeConfig::default(), &ReferencePlatform::jetson(), false)
}

fn config_in(dir: &std::path::Path) -> RuntimeConfig {
    RuntimeConfig {
        engine_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

// ── Compilation ────────────────────────────────────────────────

#[test]
fn test_passthrough_route_reuses_member_tensor() {
    let mut g = LayerGraph::new("passthrough", Dims::chw(3, 8, 8));
    g.push(conv(3, 4)).unwrap();
    g.push(LayerKind::Route(Route {
        layers: vec![0],
        groups: 1,
        group_id: 0,
    }))
    .unwrap();
    g.push(conv(4, 2)).unwrap();
    let g = g.validate().unwrap();

    let platform = ReferencePlatform::jetson();
    let registry = PluginRegistry::with_builtin();
    let compiled = CompilationSession::new(&g, &platform, &registry, fp16_policy())
        .compile_all()
        .unwrap();
    let net = &compiled.network;
    assert_eq!(net.num_ops(), 2);
    assert_eq!(compiled.tensor_for(1), compiled.tensor_for(0));
    assert_eq!(net.op(1).inputs, vec![compiled.tensor_for(0).unwrap()]);
}

#[test]
fn test_residual_sum_reads_sequential_then_skip() {
    let g = detector();
    let platform = ReferencePlatform::jetson();
    let registry = PluginRegistry::with_builtin();
    let compiled = CompilationSession::new(&g, &platform, &registry, fp16_policy())
        .compile_all()
        .unwrap();
    let net = &compiled.network;
    let sum = net
        .ops()
        .iter()
        .find(|o| o.name == "Shortcut4")
        .unwrap();
    assert_eq!(sum.kind, OpKind::ElementWise(ElementWiseOp::Sum));
    assert_eq!(
        sum.inputs,
        vec![compiled.tensor_for(3).unwrap(), compiled.tensor_for(1).unwrap()]
    );
}

#[test]
fn test_grouped_route_rejected() {
    let mut g = LayerGraph::new("grouped", Dims::chw(4, 8, 8));
    g.push(conv(4, 8)).unwrap();
    g.push(LayerKind::Route(Route {
        layers: vec![0],
        groups: 2,
        group_id: 0,
    }))
    .unwrap();
    let g = g.validate().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grouped_fp16.rt");
    let err = InferenceEngine::new(config_in(dir.path()))
        .build(&g, None, &path)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Unsupported(_)));
    assert!(!path.exists());
}

// ── Persistence ────────────────────────────────────────────────

#[test]
fn test_build_then_rebuild_loads_identical_engine() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let path = config.engine_path(&g.name);
    assert!(path.ends_with("detector_fp16.rt"));

    let first = InferenceEngine::new(config.clone()).build(&g, None, &path).unwrap();
    assert_eq!(first.outcome(), BuildOutcome::Compiled);
    let second = InferenceEngine::new(config).build(&g, None, &path).unwrap();
    assert_eq!(second.outcome(), BuildOutcome::Loaded);

    let (a, b) = (first.engine(), second.engine());
    assert_eq!(a.bindings, b.bindings);
    assert_eq!(a.precision, b.precision);
    assert_eq!(a.max_batch_size, b.max_batch_size);
    assert_eq!(a, b);
}

#[test]
fn test_plugins_survive_persistence() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let path = config.engine_path(&g.name);
    InferenceEngine::new(config.clone()).build(&g, None, &path).unwrap();
    let loaded = InferenceEngine::new(config).build(&g, None, &path).unwrap();

    let plugins = loaded.plugins();
    let names: Vec<&str> = plugins.iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["ActivationMish3", "Yolo7"]);
    match plugins[1].1 {
        PluginRecord::Yolo(y) => {
            assert_eq!(y.class_names, vec!["object".to_string()]);
            assert_eq!((y.c, y.h, y.w), (18, 16, 16));
        }
        other => panic!("unexpected record {other:?}"),
    }
}

#[test]
fn test_corrupt_engine_file_rejected() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detector_fp16.rt");
    std::fs::write(&path, b"not an engine").unwrap();
    let err = InferenceEngine::new(config_in(dir.path()))
        .build(&g, None, &path)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::CorruptEngine(_)));
}

// ── Inference ──────────────────────────────────────────────────

#[tokio::test]
async fn test_infer_within_batch_limit() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_batch_size = 2;
    let path = config.engine_path(&g.name);
    let mut engine = InferenceEngine::new(config)
        .build(&g, None, &path)
        .unwrap()
        .prepare()
        .unwrap();

    let out = engine
        .infer(&Tensor::zeros(Dims::new(2, 3, 16, 16), DType::F32))
        .await
        .unwrap();
    assert_eq!(out.dims(), Dims::new(2, 18, 16, 16));

    let err = engine
        .infer(&Tensor::zeros(Dims::new(3, 3, 16, 16), DType::F32))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ResourceLimit(_)));
}

#[test]
fn test_binding_capacity_enforced() {
    // Eleven activations all read by one route: slicing before the route
    // leaves eleven outputs plus the input.
    let mut g = LayerGraph::new("wide", Dims::chw(1, 4, 4));
    for _ in 0..11 {
        g.push(LayerKind::Activation(ActivationMode::Relu)).unwrap();
    }
    g.push(LayerKind::Route(Route {
        layers: (0..11).collect(),
        groups: 1,
        group_id: 0,
    }))
    .unwrap();
    let g = g.validate().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide_fp16.rt");
    let built = InferenceEngine::new(config_in(dir.path()))
        .build(&g, Some((0, 10)), &path)
        .unwrap();
    assert!(built.engine().num_bindings() > MAX_BUFFERS);
    assert!(matches!(built.prepare(), Err(RuntimeError::ResourceLimit(_))));
}

// ── Slicing ────────────────────────────────────────────────────

#[test]
fn test_sliced_engines_meet_at_boundary() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let plan = SplitAt::new(vec![4])
        .with_devices(vec![SliceDevice::Gpu, SliceDevice::Dla])
        .plan(&g)
        .unwrap();
    let engines = compile_plan(
        &g,
        &plan,
        &config,
        Arc::new(ReferencePlatform::jetson()),
        Arc::new(PluginRegistry::with_builtin()),
    )
    .unwrap();
    assert_eq!(engines.len(), 2);
    assert!(engines[0].path().ends_with("detector_s0_fp16.rt"));
    assert!(engines[1].path().ends_with("detector_s1_dla_fp16.rt"));

    let front = engines[0].engine();
    let outs: Vec<&str> = front.outputs().map(|b| b.name.as_str()).collect();
    assert_eq!(outs, vec!["Activation1_out", "Activation3_out"]);
    assert!(front.outputs().all(|b| b.dtype == DType::F16));

    let back = engines[1].engine();
    let ins: Vec<&str> = back.inputs().map(|b| b.name.as_str()).collect();
    assert_eq!(ins, vec!["Activation1_out", "Activation3_out"]);
    assert!(back.inputs().all(|b| b.dtype == DType::F16));
    assert_eq!(back.output_index().map(|i| back.bindings[i].name.as_str()), Some("out"));
    assert!(back.layers_on(Device::Dla) > 0);
}

// ── Precision and placement ────────────────────────────────────

#[test]
fn test_int8_build_calibrates_and_tags() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.precision = Precision::Int8;
    let path = config.engine_path(&g.name);
    let dims = Dims::new(1, 3, 16, 16);
    let batches = vec![Tensor::from_f32(dims, &vec![0.5; dims.tot() * dims.n]).unwrap()];
    let source = TensorBatches::new(dims, batches).unwrap();

    let built = InferenceEngine::new(config)
        .with_calibration(Box::new(source))
        .build(&g, None, &path)
        .unwrap();
    let engine = built.engine();
    assert_eq!(engine.precision, Precision::Int8);
    assert!(engine.layers.iter().all(|l| l.precision == Some(DType::I8)));
    assert!(!engine.dynamic_ranges.is_empty());
    assert!(dir.path().join("detector_int8-calibration.table").exists());
}

#[test]
fn test_int8_without_calibration_downgrades() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.precision = Precision::Int8;
    let path = config.engine_path(&g.name);
    let built = InferenceEngine::new(config).build(&g, None, &path).unwrap();
    assert_eq!(built.engine().precision, Precision::Fp16);
    assert!(built.report().downgraded());
}

#[test]
fn test_dla_placement_and_fallback() {
    let g = detector();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.device = DevicePolicy::Dla;
    let path = config.engine_path(&g.name);
    assert!(path.ends_with("detector_dla_fp16.rt"));

    let built = InferenceEngine::new(config.clone()).build(&g, None, &path).unwrap();
    let engine = built.engine();
    assert_eq!(engine.device, DevicePolicy::Dla);
    assert!(engine.layers_on(Device::Dla) > 0);
    // Plugins never run on the DLA.
    assert!(engine
        .layers
        .iter()
        .filter(|l| l.plugin.is_some())
        .all(|l| l.device == Device::Gpu));
    // The route concatenation gets identity passthroughs for its inputs.
    assert!(engine.layers.iter().any(|l| l.name == "Route5_act0"));

    let other = dir.path().join("gpu_only.rt");
    let built = InferenceEngine::new(config)
        .with_platform(Arc::new(ReferencePlatform::discrete_gpu()))
        .build(&g, None, &other)
        .unwrap();
    assert_eq!(built.engine().device, DevicePolicy::Gpu);
    assert_eq!(built.engine().layers_on(Device::Dla), 0);
    assert!(built.report().downgraded());
}
