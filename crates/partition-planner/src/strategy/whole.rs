// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A single slice covering the whole graph.

use model_ir::graph::Validated;
use model_ir::LayerGraph;

use crate::plan::{PlanBuilder, SliceDevice};
use crate::strategy::SliceStrategy;
use crate::{PlannerError, SlicePlan};

/// Compiles the whole graph as one engine.
#[derive(Debug, Clone, Default)]
pub struct WholeGraph {
    pub device: SliceDevice,
}

impl WholeGraph {
    pub fn new(device: SliceDevice) -> Self {
        Self { device }
    }
}

impl SliceStrategy for WholeGraph {
    fn name(&self) -> &str {
        "whole"
    }

    fn plan(&self, graph: &LayerGraph<Validated>) -> Result<SlicePlan, PlannerError> {
        let mut builder = PlanBuilder::new(self.name(), graph);
        builder.add_slice(0, graph.num_layers() - 1, self.device)?;
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::LayerKind;
    use tensor_core::Dims;

    #[test]
    fn test_whole_graph_single_slice() {
        let mut g = LayerGraph::new("w", Dims::chw(4, 1, 1));
        g.push(LayerKind::Softmax).unwrap();
        g.push(LayerKind::Softmax).unwrap();
        let g = g.validate().unwrap();
        let plan = WholeGraph::default().plan(&g).unwrap();
        assert_eq!(plan.num_slices(), 1);
        assert!(plan.slices[0].boundary.inputs.is_empty());
        assert_eq!(plan.slices[0].end(), 1);
    }
}
