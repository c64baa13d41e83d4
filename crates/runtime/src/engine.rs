// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The inference engine with type-state–enforced pipeline.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .build(graph, range, path)    compile + save, or load the file
//!     ▼
//! InferenceEngine<Built>
//!     │  .prepare()                    buffers + execution stream
//!     ▼
//! InferenceEngine<Ready>
//!     │  .infer(&input)
//!     ▼
//!   Tensor
//! ```
//!
//! Each state transition consumes the old value and returns a new one,
//! making invalid state sequences a compile error.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use model_ir::graph::Validated;
use model_ir::LayerGraph;
use plugin_registry::{PluginRecord, PluginRegistry};
use tensor_core::Tensor;

use crate::buffers::BufferTable;
use crate::builder::{Engine, EngineBuilder};
use crate::calibration::{calibrate, CalibrationSource, CalibrationTable, RawFileBatches};
use crate::compiler::{CompilationSession, ResolvedPolicy};
use crate::config::{calibration_table_path, DevicePolicy, Precision, RuntimeConfig};
use crate::executor::{Executor, ZeroFillExecutor};
use crate::platform::{Platform, ReferencePlatform};
use crate::report::{BuildOutcome, BuildReport};
use crate::stream::ExecutionStream;
use crate::RuntimeError;

// ── Type-state markers ─────────────────────────────────────────

/// Engine is configured but nothing is built.
#[derive(Debug)]
pub struct Idle {
    calibration: Option<Box<dyn CalibrationSource + Send>>,
}

/// An engine exists in memory and on disk.
#[derive(Debug)]
pub struct Built {
    engine: Arc<Engine>,
    report: BuildReport,
}

/// Buffers and the execution stream are set up.
#[derive(Debug)]
pub struct Ready {
    engine: Arc<Engine>,
    report: BuildReport,
    buffers: Arc<Mutex<BufferTable>>,
    stream: ExecutionStream,
    input: usize,
    output: usize,
}

/// Sealed trait for engine states.
pub trait EngineState: std::fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Built {}
impl EngineState for Ready {}

impl std::fmt::Debug for dyn CalibrationSource + Send {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationSource")
            .field("batches", &self.num_batches())
            .finish()
    }
}

// ── Engine ─────────────────────────────────────────────────────

/// The primary inference engine.
///
/// `S` is a type-state marker that enforces the pipeline ordering at
/// compile time. You cannot call `.infer()` on an `Idle` engine or
/// `.build()` on a `Ready` engine.
///
/// # Example
/// ```no_run
/// use runtime::{InferenceEngine, RuntimeConfig};
/// use model_ir::ModelLoader;
/// use tensor_core::{DType, Tensor};
///
/// # async fn example() -> Result<(), runtime::RuntimeError> {
/// let graph = ModelLoader::load("models/yolo4tiny".as_ref())?;
/// let mut engine = InferenceEngine::new(RuntimeConfig::default())
///     .build(&graph, None, "yolo4tiny_fp16.rt".as_ref())?
///     .prepare()?;
/// let input = Tensor::zeros(graph.input_dim(), DType::F32);
/// let output = engine.infer(&input).await?;
/// println!("{}", output.dims());
/// # Ok(())
/// # }
/// ```
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    platform: Arc<dyn Platform>,
    registry: Arc<PluginRegistry>,
    executor: Arc<dyn Executor>,
    state: S,
}

impl<S: EngineState> InferenceEngine<S> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    fn transition<T: EngineState>(self, state: T) -> InferenceEngine<T> {
        InferenceEngine {
            config: self.config,
            platform: self.platform,
            registry: self.registry,
            executor: self.executor,
            state,
        }
    }
}

// ── Idle → Built ───────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates an engine for the reference platform with the built-in
    /// plugin registry.
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(
            precision = %config.precision,
            device = %config.device,
            max_batch = config.max_batch_size,
            "engine created"
        );
        Self {
            config,
            platform: Arc::new(ReferencePlatform::default()),
            registry: Arc::new(PluginRegistry::with_builtin()),
            executor: Arc::new(ZeroFillExecutor),
            state: Idle { calibration: None },
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Calibration batches for quantised builds. Without one, the image
    /// list from the configuration is used, if any.
    pub fn with_calibration(mut self, source: Box<dyn CalibrationSource + Send>) -> Self {
        self.state.calibration = Some(source);
        self
    }

    /// Loads the engine at `path` if the file exists; otherwise compiles
    /// layers `range` (the whole graph when `None`), writes the engine to
    /// `path`, and reads it back.
    pub fn build(
        mut self,
        graph: &LayerGraph<Validated>,
        range: Option<(usize, usize)>,
        path: &Path,
    ) -> Result<InferenceEngine<Built>, RuntimeError> {
        let started = Instant::now();
        let requested = (self.config.precision, self.config.device);

        let outcome = if path.exists() {
            tracing::info!(path = %path.display(), "engine file exists, skipping compilation");
            BuildOutcome::Loaded
        } else {
            self.compile_to(graph, range, path)?;
            BuildOutcome::Compiled
        };

        self.finish(path, outcome, Some(requested), started)
    }

    /// Loads an existing engine file without a layer graph.
    pub fn load(self, path: &Path) -> Result<InferenceEngine<Built>, RuntimeError> {
        self.finish(path, BuildOutcome::Loaded, None, Instant::now())
    }

    fn finish(
        self,
        path: &Path,
        outcome: BuildOutcome,
        requested: Option<(Precision, DevicePolicy)>,
        started: Instant,
    ) -> Result<InferenceEngine<Built>, RuntimeError> {
        let engine = Engine::load(path, &self.registry)?;
        let requested = requested.unwrap_or((engine.precision, engine.device));
        let report = BuildReport::new(&engine, path.to_path_buf(), outcome, requested, started.elapsed());
        if report.downgraded() {
            tracing::warn!(
                requested_precision = %report.requested_precision,
                precision = %report.precision,
                requested_device = %report.requested_device,
                device = %report.device,
                "build downgraded"
            );
        }
        tracing::info!("{}", report.summary());
        Ok(self.transition(Built {
            engine: Arc::new(engine),
            report,
        }))
    }

    fn compile_to(
        &mut self,
        graph: &LayerGraph<Validated>,
        range: Option<(usize, usize)>,
        path: &Path,
    ) -> Result<(), RuntimeError> {
        let (start, end) = range.unwrap_or((0, graph.num_layers().saturating_sub(1)));
        let table_path = calibration_table_path(path);
        let wants_int8 = self.config.precision == Precision::Int8;
        let mut source = if wants_int8 && !table_path.exists() {
            self.calibration_source(graph)?
        } else {
            None
        };
        let has_calibration = table_path.exists() || source.is_some();

        let policy = ResolvedPolicy::resolve(&self.config, self.platform.as_ref(), has_calibration);
        let compiled = CompilationSession::new(graph, self.platform.as_ref(), &self.registry, policy)
            .compile(start, end)?;

        let table = match (policy.is_int8(), source.as_mut()) {
            (false, _) => None,
            (true, _) if table_path.exists() => {
                tracing::info!(table = %table_path.display(), "reusing calibration table");
                Some(CalibrationTable::load(&table_path)?)
            }
            (true, Some(source)) => {
                let table = calibrate(&compiled.network, &mut **source)?;
                table.save(&table_path)?;
                Some(table)
            }
            (true, None) => {
                return Err(RuntimeError::Config("int8 build without calibration data".into()))
            }
        };

        let engine = EngineBuilder::new(self.config.max_batch_size).build(
            &engine_name(graph, range),
            &compiled,
            table.as_ref(),
        )?;
        engine.save(path, &self.registry)
    }

    fn calibration_source(
        &mut self,
        graph: &LayerGraph<Validated>,
    ) -> Result<Option<Box<dyn CalibrationSource + Send>>, RuntimeError> {
        if let Some(source) = self.state.calibration.take() {
            return Ok(Some(source));
        }
        match &self.config.calib_image_list {
            Some(list) => Ok(Some(Box::new(RawFileBatches::from_lists(
                list,
                self.config.calib_label_list.as_deref(),
                graph.input_dim(),
                self.config.num_calib_images,
            )?))),
            None => Ok(None),
        }
    }
}

fn engine_name(graph: &LayerGraph<Validated>, range: Option<(usize, usize)>) -> String {
    match range {
        Some((start, end)) if start > 0 || end + 1 < graph.num_layers() => {
            format!("{}[{start}..={end}]", graph.name)
        }
        _ => graph.name.clone(),
    }
}

// ── Built → Ready ──────────────────────────────────────────────

impl InferenceEngine<Built> {
    pub fn engine(&self) -> &Engine {
        &self.state.engine
    }

    pub fn report(&self) -> &BuildReport {
        &self.state.report
    }

    pub fn outcome(&self) -> BuildOutcome {
        self.state.report.outcome
    }

    pub fn path(&self) -> &Path {
        &self.state.report.path
    }

    /// Custom operators in the engine, as `(operation name, record)`.
    pub fn plugins(&self) -> Vec<(&str, &PluginRecord)> {
        self.state.engine.plugins().collect()
    }

    /// Allocates binding buffers and starts the execution stream.
    pub fn prepare(self) -> Result<InferenceEngine<Ready>, RuntimeError> {
        let engine = Arc::clone(&self.state.engine);
        let buffers = BufferTable::allocate(&engine)?;
        let input = engine
            .input_index()
            .ok_or_else(|| RuntimeError::Structural(format!("engine '{}' has no input", engine.name)))?;
        let output = engine
            .output_index()
            .ok_or_else(|| RuntimeError::Structural(format!("engine '{}' has no output", engine.name)))?;
        let stream = ExecutionStream::new(&engine.name)?;
        tracing::info!(
            engine = %engine.name,
            buffers = buffers.len(),
            input = %engine.bindings[input].name,
            output = %engine.bindings[output].name,
            executor = self.executor.name(),
            "engine ready"
        );
        let report = self.state.report.clone();
        Ok(self.transition(Ready {
            engine,
            report,
            buffers: Arc::new(Mutex::new(buffers)),
            stream,
            input,
            output,
        }))
    }
}

// ── Ready: run inference ───────────────────────────────────────

impl InferenceEngine<Ready> {
    pub fn engine(&self) -> &Engine {
        &self.state.engine
    }

    pub fn report(&self) -> &BuildReport {
        &self.state.report
    }

    pub fn plugins(&self) -> Vec<(&str, &PluginRecord)> {
        self.state.engine.plugins().collect()
    }

    /// Queues one inference of `input` on the stream without waiting.
    pub fn enqueue(&mut self, input: &Tensor) -> Result<(), RuntimeError> {
        let engine = &self.state.engine;
        let batch = input.batch();
        if batch == 0 || batch > engine.max_batch_size {
            return Err(RuntimeError::ResourceLimit(format!(
                "batch {batch} exceeds compiled maximum {}",
                engine.max_batch_size
            )));
        }
        let binding = &engine.bindings[self.state.input];
        if input.dtype() != binding.dtype || !input.dims().same_chw(&binding.dims) {
            return Err(RuntimeError::BindingMismatch {
                binding: binding.name.clone(),
                expected: format!("{} {}", binding.dims, binding.dtype.as_str()),
                actual: format!("{} {}", input.dims(), input.dtype().as_str()),
            });
        }

        let engine = Arc::clone(engine);
        let buffers = Arc::clone(&self.state.buffers);
        let executor = Arc::clone(&self.executor);
        let index = self.state.input;
        let input = input.clone();
        self.state.stream.enqueue(move || {
            let mut table = buffers.lock().map_err(|_| RuntimeError::StreamClosed)?;
            table.write(index, &input)?;
            executor.execute(&engine, &mut table, batch)
        })
    }

    /// Copies the first `batch` items of the output binding.
    pub fn output(&self, batch: usize) -> Result<Tensor, RuntimeError> {
        let table = self.state.buffers.lock().map_err(|_| RuntimeError::StreamClosed)?;
        table.read(self.state.output, batch)
    }

    /// Waits until all queued inferences have finished.
    pub async fn synchronize(&self) -> Result<(), RuntimeError> {
        self.state.stream.synchronize().await
    }

    /// Runs one inference and returns the output binding.
    pub async fn infer(&mut self, input: &Tensor) -> Result<Tensor, RuntimeError> {
        let started = Instant::now();
        self.enqueue(input)?;
        self.synchronize().await?;
        let out = self.output(input.batch())?;
        tracing::debug!(batch = input.batch(), elapsed = ?started.elapsed(), "inference complete");
        Ok(out)
    }

    /// Blocking form of [`InferenceEngine::infer`]. Must not be called from
    /// inside an async runtime.
    pub fn infer_blocking(&mut self, input: &Tensor) -> Result<Tensor, RuntimeError> {
        self.enqueue(input)?;
        self.state.stream.synchronize_blocking()?;
        self.output(input.batch())
    }
}

impl<S: EngineState> std::fmt::Debug for InferenceEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &std::any::type_name::<S>())
            .field("precision", &self.config.precision)
            .field("device", &self.config.device)
            .field("platform", &self.platform.name())
            .field("executor", &self.executor.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Conv2d, LayerKind};
    use tensor_core::{DType, Dims};

    fn graph() -> LayerGraph<Validated> {
        let mut g = LayerGraph::new("engine", Dims::chw(3, 8, 8));
        g.push(LayerKind::Conv2d(Conv2d::square(3, 4, 3, 1, 1))).unwrap();
        g.push(LayerKind::Conv2d(Conv2d::square(4, 2, 1, 1, 0))).unwrap();
        g.validate().unwrap()
    }

    #[tokio::test]
    async fn test_build_prepare_infer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_fp16.rt");
        let config = RuntimeConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let built = InferenceEngine::new(config).build(&graph(), None, &path).unwrap();
        assert_eq!(built.outcome(), BuildOutcome::Compiled);
        assert!(path.exists());

        let mut ready = built.prepare().unwrap();
        let out = ready
            .infer(&Tensor::zeros(Dims::new(2, 3, 8, 8), DType::F32))
            .await
            .unwrap();
        assert_eq!(out.dims(), Dims::new(2, 2, 8, 8));
    }

    #[test]
    fn test_second_build_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_fp16.rt");
        let g = graph();
        let first = InferenceEngine::new(RuntimeConfig::default())
            .build(&g, None, &path)
            .unwrap();
        let second = InferenceEngine::new(RuntimeConfig::default())
            .build(&g, None, &path)
            .unwrap();
        assert_eq!(second.outcome(), BuildOutcome::Loaded);
        assert_eq!(first.engine(), second.engine());
    }

    #[test]
    fn test_blocking_infer_rejects_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_fp16.rt");
        let mut ready = InferenceEngine::new(RuntimeConfig::default())
            .build(&graph(), None, &path)
            .unwrap()
            .prepare()
            .unwrap();
        let wrong = Tensor::zeros(Dims::new(1, 3, 4, 4), DType::F32);
        assert!(matches!(
            ready.infer_blocking(&wrong),
            Err(RuntimeError::BindingMismatch { .. })
        ));
        let right = Tensor::zeros(Dims::new(1, 3, 8, 8), DType::F32);
        assert!(ready.infer_blocking(&right).is_ok());
    }
}
