// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Equal-length slices.

use model_ir::graph::Validated;
use model_ir::LayerGraph;

use crate::plan::{PlanBuilder, SliceDevice};
use crate::strategy::SliceStrategy;
use crate::{PlannerError, SlicePlan};

/// Cuts the graph into `parts` slices whose lengths differ by at most one.
///
/// The earlier slices take the remainder. All slices share one device.
#[derive(Debug, Clone)]
pub struct EvenSplit {
    pub parts: usize,
    pub device: SliceDevice,
}

impl EvenSplit {
    pub fn new(parts: usize) -> Self {
        Self {
            parts,
            device: SliceDevice::Gpu,
        }
    }
}

impl SliceStrategy for EvenSplit {
    fn name(&self) -> &str {
        "even"
    }

    fn plan(&self, graph: &LayerGraph<Validated>) -> Result<SlicePlan, PlannerError> {
        let n = graph.num_layers();
        if self.parts == 0 || self.parts > n {
            return Err(PlannerError::StrategyFailed {
                strategy: self.name().to_string(),
                detail: format!("cannot cut {n} layers into {} slices", self.parts),
            });
        }

        let base = n / self.parts;
        let extra = n % self.parts;
        let mut builder = PlanBuilder::new(self.name(), graph);
        let mut start = 0;
        for i in 0..self.parts {
            let len = base + usize::from(i < extra);
            builder.add_slice(start, start + len - 1, self.device)?;
            start += len;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::LayerKind;
    use tensor_core::Dims;

    fn make_graph(n: usize) -> LayerGraph<Validated> {
        let mut g = LayerGraph::new("e", Dims::chw(3, 1, 1));
        for _ in 0..n {
            g.push(LayerKind::Softmax).unwrap();
        }
        g.validate().unwrap()
    }

    #[test]
    fn test_even_lengths() {
        let plan = EvenSplit::new(3).plan(&make_graph(7)).unwrap();
        let lens: Vec<_> = plan.slices.iter().map(|s| s.boundary.num_layers()).collect();
        assert_eq!(lens, vec![3, 2, 2]);
    }

    #[test]
    fn test_too_many_parts() {
        assert!(EvenSplit::new(4).plan(&make_graph(3)).is_err());
        assert!(EvenSplit::new(0).plan(&make_graph(3)).is_err());
    }
}
