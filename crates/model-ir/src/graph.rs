// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer graph: the network as an ordered, capacity-bounded list of layers.
//!
//! # Type-State Pattern
//!
//! The graph transitions through states enforced at compile time:
//!
//! ```text
//! LayerGraph<Loaded>   : layers appended, references not yet checked.
//!       │  .validate()
//!       ▼
//! LayerGraph<Validated>: references and weights verified, ready to compile.
//! ```
//!
//! Layers can only be appended in the `Loaded` state, so nothing can grow
//! the graph once it has been handed to the compiler.

use std::fmt;
use std::fmt::Write as _;

use tensor_core::Dims;

use crate::{DependencyMap, Layer, LayerKind, ModelError};

/// Maximum number of layers a graph can hold.
pub const MAX_LAYERS: usize = 256;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph is being built and has not been validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and is ready for compilation.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── LayerGraph ─────────────────────────────────────────────────────

/// The network as an ordered sequence of layers.
///
/// Insertion order is execution order and ids equal positions. The generic
/// parameter `S` encodes the validation state at compile time.
#[derive(Debug, Clone)]
pub struct LayerGraph<S: GraphState = Loaded> {
    /// Network name, used to derive engine file names.
    pub name: String,
    input_dim: Dims,
    layers: Vec<Layer>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl LayerGraph<Loaded> {
    /// Creates an empty graph fed by an input of `input_dim`.
    pub fn new(name: impl Into<String>, input_dim: Dims) -> Self {
        Self {
            name: name.into(),
            input_dim,
            layers: Vec::new(),
            _state: std::marker::PhantomData,
        }
    }

    /// Appends a layer whose input is the previous layer's output and whose
    /// output shape is inferred from its kind. Returns the assigned id.
    pub fn push(&mut self, kind: LayerKind) -> Result<usize, ModelError> {
        let input = self.output_dim();
        let earlier: Vec<Dims> = self.layers.iter().map(|l| l.output_dim).collect();
        let output = kind.infer_output(input, &earlier)?;
        self.push_with_dims(kind, input, output)
    }

    /// Appends a layer with explicit shapes. Returns the assigned id.
    pub fn push_with_dims(
        &mut self,
        kind: LayerKind,
        input_dim: Dims,
        output_dim: Dims,
    ) -> Result<usize, ModelError> {
        if self.layers.len() == MAX_LAYERS {
            return Err(ModelError::CapacityExceeded { capacity: MAX_LAYERS });
        }
        let id = self.layers.len();
        self.layers.push(Layer {
            id,
            input_dim,
            output_dim,
            is_final: false,
            kind,
        });
        Ok(id)
    }

    /// Marks layer `id` as a network output.
    pub fn set_final(&mut self, id: usize) -> Result<(), ModelError> {
        let layer = self
            .layers
            .get_mut(id)
            .ok_or_else(|| ModelError::InvalidGraph(format!("no layer with id {id}")))?;
        layer.is_final = true;
        Ok(())
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - The graph is non-empty.
    /// - Layer ids are consecutive starting from 0.
    /// - Back-references point to strictly earlier layers.
    /// - Route sets are non-empty and `group_id < groups`.
    /// - No shape has zero elements and weight lengths match the shapes.
    pub fn validate(self) -> Result<LayerGraph<Validated>, ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::InvalidGraph("layer graph contains no layers".into()));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            if layer.id != i {
                return Err(ModelError::InvalidLayer {
                    layer: layer.runtime_name(),
                    detail: format!("expected id {i}, got {}", layer.id),
                });
            }

            for target in layer.kind.back_references() {
                if target >= layer.id {
                    return Err(ModelError::DanglingReference {
                        layer: layer.id,
                        target,
                    });
                }
            }

            if let LayerKind::Route(route) = &layer.kind {
                if route.layers.is_empty() {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.runtime_name(),
                        detail: "empty route set".into(),
                    });
                }
                if route.groups == 0 || route.group_id >= route.groups {
                    return Err(ModelError::InvalidLayer {
                        layer: layer.runtime_name(),
                        detail: format!(
                            "group {} out of range for {} groups",
                            route.group_id, route.groups
                        ),
                    });
                }
            }

            if layer.input_dim.tot() == 0 || layer.output_dim.tot() == 0 {
                return Err(ModelError::InvalidLayer {
                    layer: layer.runtime_name(),
                    detail: "shape has zero elements".into(),
                });
            }

            layer.check_weights()?;
        }

        tracing::debug!(name = %self.name, layers = self.layers.len(), "layer graph validated");

        Ok(LayerGraph {
            name: self.name,
            input_dim: self.input_dim,
            layers: self.layers,
            _state: std::marker::PhantomData,
        })
    }
}

// ── Validated state ────────────────────────────────────────────────

impl LayerGraph<Validated> {
    /// Builds the out-of-sequence dependency map.
    pub fn dependency_map(&self) -> DependencyMap {
        DependencyMap::build(self)
    }

    /// Returns the last layer. A validated graph is never empty.
    pub fn last(&self) -> &Layer {
        &self.layers[self.layers.len() - 1]
    }
}

// ── Shared implementations ─────────────────────────────────────────

impl<S: GraphState> LayerGraph<S> {
    /// Shape of the true network input.
    pub fn input_dim(&self) -> Dims {
        self.input_dim
    }

    /// Output shape of the last layer, or the input shape when empty.
    pub fn output_dim(&self) -> Dims {
        self.layers.last().map_or(self.input_dim, |l| l.output_dim)
    }

    /// Returns the total number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Returns a reference to a layer by id.
    pub fn layer(&self, id: usize) -> Option<&Layer> {
        self.layers.get(id)
    }

    /// Returns an iterator over the layers in execution order.
    pub fn iter_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// Total learned parameters.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Total multiply-accumulate estimate.
    pub fn macc(&self) -> usize {
        self.layers.iter().map(Layer::macc).sum()
    }

    /// Live activation elements per layer.
    ///
    /// A layer holds its input and output; a shortcut additionally keeps its
    /// back layer's output alive across every layer in between.
    pub fn feature_map_sizes(&self) -> Result<Vec<usize>, ModelError> {
        let mut sizes: Vec<usize> = self
            .layers
            .iter()
            .map(|l| l.input_dim.tot() + l.output_dim.tot())
            .collect();
        for layer in &self.layers {
            if let LayerKind::Shortcut(s) = &layer.kind {
                let back = self
                    .layers
                    .get(s.back_layer)
                    .filter(|b| b.id < layer.id)
                    .ok_or_else(|| {
                        ModelError::InvalidGraph(format!(
                            "shortcut {} cannot locate layer {}",
                            layer.id, s.back_layer
                        ))
                    })?;
                for size in &mut sizes[back.id + 1..layer.id] {
                    *size += back.output_dim.tot();
                }
            }
        }
        Ok(sizes)
    }

    /// Returns a summary string describing the graph.
    pub fn summary(&self) -> String {
        format!(
            "Network '{}': {} layers, input {}, output {}, {} params",
            self.name,
            self.num_layers(),
            self.input_dim,
            self.output_dim(),
            self.param_count(),
        )
    }

    /// Layer table plus parameter, feature-map and MACC totals.
    pub fn report(&self) -> Result<String, ModelError> {
        let sizes = self.feature_map_sizes()?;
        let mut out = String::new();
        let rule = "=".repeat(68);
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "{:>4} {:<20} {:>20}     {:>20}",
            "N.", "Layer type", "input (H*W,CH)", "output (H*W,CH)"
        );
        for layer in &self.layers {
            let (i, o) = (layer.input_dim, layer.output_dim);
            let _ = writeln!(
                out,
                "{:>4} {:<20} {:>5} x {:>5}, {:>5}  ->  {:>5} x {:>5}, {:>5}{}",
                layer.id,
                layer.name(),
                i.h,
                i.w,
                i.c,
                o.h,
                o.w,
                o.c,
                if layer.is_final { "  (final)" } else { "" },
            );
        }
        let _ = writeln!(out, "{rule}");
        let max_fm = sizes.iter().copied().max().unwrap_or(0);
        let _ = writeln!(
            out,
            "params: {}, max feature map: {} elements, MACC: {}",
            self.param_count(),
            max_fm,
            self.macc(),
        );
        Ok(out)
    }
}

impl<S: GraphState> fmt::Display for LayerGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "LayerGraph '{}' ({} layers):", self.name, self.layers.len())?;
        for layer in &self.layers {
            writeln!(f, "  [{}] {} {} -> {}", layer.id, layer.name(), layer.input_dim, layer.output_dim)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActivationMode, Conv2d, Route, Shortcut};

    fn conv(ch: usize) -> LayerKind {
        LayerKind::Conv2d(Conv2d::square(ch, ch, 3, 1, 1))
    }

    /// Helper: `n` same-shape convolutions.
    fn make_graph(n: usize) -> LayerGraph<Loaded> {
        let mut g = LayerGraph::new("test", Dims::chw(4, 8, 8));
        for _ in 0..n {
            g.push(conv(4)).unwrap();
        }
        g
    }

    #[test]
    fn test_push_assigns_sequential_ids() {
        let mut g = make_graph(2);
        let id = g.push(LayerKind::Activation(ActivationMode::Relu)).unwrap();
        assert_eq!(id, 2);
        assert_eq!(g.layer(2).unwrap().input_dim, Dims::chw(4, 8, 8));
    }

    #[test]
    fn test_capacity() {
        let mut g = LayerGraph::new("full", Dims::chw(1, 1, 1));
        for _ in 0..MAX_LAYERS {
            g.push(LayerKind::Softmax).unwrap();
        }
        assert!(matches!(
            g.push(LayerKind::Softmax),
            Err(ModelError::CapacityExceeded { capacity: MAX_LAYERS })
        ));
    }

    #[test]
    fn test_validate_ok() {
        let validated = make_graph(4).validate().unwrap();
        assert_eq!(validated.num_layers(), 4);
        assert_eq!(validated.last().id, 3);
    }

    #[test]
    fn test_validate_empty() {
        assert!(LayerGraph::new("empty", Dims::chw(1, 1, 1)).validate().is_err());
    }

    #[test]
    fn test_validate_forward_reference() {
        let mut g = make_graph(2);
        let out = g.output_dim();
        g.push_with_dims(
            LayerKind::Shortcut(Shortcut { back_layer: 2, mul: false }),
            out,
            out,
        )
        .unwrap();
        assert!(matches!(
            g.validate(),
            Err(ModelError::DanglingReference { layer: 2, target: 2 })
        ));
    }

    #[test]
    fn test_validate_bad_group() {
        let mut g = make_graph(1);
        let out = g.output_dim();
        g.push_with_dims(
            LayerKind::Route(Route { layers: vec![0], groups: 2, group_id: 2 }),
            out,
            out,
        )
        .unwrap();
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_set_final() {
        let mut g = make_graph(2);
        g.set_final(0).unwrap();
        assert!(g.set_final(9).is_err());
        let v = g.validate().unwrap();
        assert!(v.layer(0).unwrap().is_final);
        assert!(!v.layer(1).unwrap().is_final);
    }

    #[test]
    fn test_feature_map_sizes_with_shortcut() {
        let mut g = make_graph(3);
        g.push(LayerKind::Shortcut(Shortcut { back_layer: 0, mul: false })).unwrap();
        let sizes = g.feature_map_sizes().unwrap();
        let plain = 2 * 4 * 8 * 8;
        assert_eq!(sizes, vec![plain, plain + 256, plain + 256, plain]);
    }

    #[test]
    fn test_feature_map_sizes_missing_back_layer() {
        let mut g = make_graph(1);
        let out = g.output_dim();
        g.push_with_dims(
            LayerKind::Shortcut(Shortcut { back_layer: 5, mul: false }),
            out,
            out,
        )
        .unwrap();
        assert!(matches!(g.feature_map_sizes(), Err(ModelError::InvalidGraph(_))));
    }

    #[test]
    fn test_report_and_summary() {
        let mut g = make_graph(2);
        g.set_final(1).unwrap();
        let v = g.validate().unwrap();
        let report = v.report().unwrap();
        assert!(report.contains("Conv2d"));
        assert!(report.contains("(final)"));
        assert!(report.contains(&format!("params: {}", v.param_count())));
        assert!(v.summary().contains("2 layers"));
        assert!(format!("{v}").contains("[1] Conv2d"));
    }
}
