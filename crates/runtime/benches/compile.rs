// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for compilation, engine building and persistence.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use model_ir::graph::Validated;
use model_ir::{ActivationMode, BatchNorm, Conv2d, DependencyMap, LayerGraph, LayerKind, Shortcut};
use plugin_registry::PluginRegistry;
use runtime::{CompilationSession, Engine, EngineBuilder, ReferencePlatform, ResolvedPolicy, RuntimeConfig};
use tensor_core::Dims;

fn residual_stack(blocks: usize) -> LayerGraph<Validated> {
    let mut g = LayerGraph::new("bench", Dims::chw(16, 32, 32));
    for _ in 0..blocks {
        let mut conv = Conv2d::square(16, 16, 3, 1, 1);
        conv.batchnorm = Some(BatchNorm::identity(16));
        let start = g.push(LayerKind::Conv2d(conv)).unwrap();
        g.push(LayerKind::Activation(ActivationMode::Mish)).unwrap();
        g.push(LayerKind::Shortcut(Shortcut {
            back_layer: start,
            mul: false,
        }))
        .unwrap();
    }
    g.validate().unwrap()
}

fn compile(graph: &LayerGraph<Validated>, start: usize, end: usize) -> Engine {
    let platform = ReferencePlatform::jetson();
    let registry = PluginRegistry::with_builtin();
    let policy = ResolvedPolicy::resolve(&RuntimeConfig::default(), &platform, false);
    let compiled = CompilationSession::new(graph, &platform, &registry, policy)
        .compile(start, end)
        .unwrap();
    EngineBuilder::new(1).build(&graph.name, &compiled, None).unwrap()
}

fn bench_dependency_map(c: &mut Criterion) {
    let graph = residual_stack(64);
    c.bench_function("dependency_map_192_layers", |b| {
        b.iter(|| DependencyMap::build(&graph))
    });
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for blocks in [8, 32, 64] {
        let graph = residual_stack(blocks);
        let n = graph.num_layers();
        group.bench_with_input(BenchmarkId::new("whole", n), &graph, |b, g| {
            b.iter(|| compile(g, 0, n - 1))
        });
        group.bench_with_input(BenchmarkId::new("second_half", n), &graph, |b, g| {
            b.iter(|| compile(g, n / 2, n - 1))
        });
    }
    group.finish();
}

fn bench_persistence(c: &mut Criterion) {
    let graph = residual_stack(32);
    let engine = compile(&graph, 0, graph.num_layers() - 1);
    let registry = PluginRegistry::with_builtin();
    let bytes = engine.serialize(&registry).unwrap();
    c.bench_function("serialize_96_layers", |b| {
        b.iter(|| engine.serialize(&registry).unwrap())
    });
    c.bench_function("deserialize_96_layers", |b| {
        b.iter(|| Engine::deserialize(&bytes, &registry).unwrap())
    });
}

criterion_group!(benches, bench_dependency_map, bench_compile, bench_persistence);
criterion_main!(benches);
