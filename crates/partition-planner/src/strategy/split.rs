// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slices cut at explicit layer ids.

use model_ir::graph::Validated;
use model_ir::LayerGraph;

use crate::plan::{PlanBuilder, SliceDevice};
use crate::strategy::SliceStrategy;
use crate::{PlannerError, SlicePlan};

/// Cuts the graph before each listed layer id.
///
/// `SplitAt::new(vec![10, 20])` on a 30-layer graph yields `[0-9]`,
/// `[10-19]` and `[20-29]`. Devices are assigned per slice in order;
/// slices beyond the list run on the GPU.
#[derive(Debug, Clone, Default)]
pub struct SplitAt {
    pub points: Vec<usize>,
    pub devices: Vec<SliceDevice>,
}

impl SplitAt {
    pub fn new(points: Vec<usize>) -> Self {
        Self {
            points,
            devices: Vec::new(),
        }
    }

    /// Assigns devices to slices in order.
    pub fn with_devices(mut self, devices: Vec<SliceDevice>) -> Self {
        self.devices = devices;
        self
    }
}

impl SliceStrategy for SplitAt {
    fn name(&self) -> &str {
        "split"
    }

    fn plan(&self, graph: &LayerGraph<Validated>) -> Result<SlicePlan, PlannerError> {
        let n = graph.num_layers();
        let mut points = self.points.clone();
        points.sort_unstable();
        points.dedup();
        if let Some(&bad) = points.iter().find(|&&p| p == 0 || p >= n) {
            return Err(PlannerError::StrategyFailed {
                strategy: self.name().to_string(),
                detail: format!("split point {bad} outside 1..{n}"),
            });
        }

        let mut builder = PlanBuilder::new(self.name(), graph);
        let mut start = 0;
        for (i, end_exclusive) in points.into_iter().chain(std::iter::once(n)).enumerate() {
            let device = self.devices.get(i).copied().unwrap_or_default();
            builder.add_slice(start, end_exclusive - 1, device)?;
            start = end_exclusive;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{Conv2d, LayerKind, Shortcut};
    use std::collections::BTreeSet;
    use tensor_core::Dims;

    fn make_graph() -> LayerGraph<Validated> {
        let mut g = LayerGraph::new("s", Dims::chw(2, 4, 4));
        for _ in 0..4 {
            g.push(LayerKind::Conv2d(Conv2d::square(2, 2, 1, 1, 0))).unwrap();
        }
        g.push(LayerKind::Shortcut(Shortcut { back_layer: 1, mul: false })).unwrap();
        g.validate().unwrap()
    }

    #[test]
    fn test_split_points() {
        let g = make_graph();
        let plan = SplitAt::new(vec![3, 2])
            .with_devices(vec![SliceDevice::Dla])
            .plan(&g)
            .unwrap();
        let ranges: Vec<_> = plan.slices.iter().map(|s| (s.start(), s.end())).collect();
        assert_eq!(ranges, vec![(0, 1), (2, 2), (3, 4)]);
        assert_eq!(plan.slices[0].device, SliceDevice::Dla);
        assert_eq!(plan.slices[2].device, SliceDevice::Gpu);
        // Layer 1 leaves slice 0 both sequentially and toward the shortcut.
        assert_eq!(plan.slices[0].boundary.outputs(), BTreeSet::from([1]));
        assert_eq!(plan.slices[0].boundary.output_edges.len(), 2);
        assert_eq!(plan.slices[2].boundary.inputs, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_split_point_out_of_range() {
        let g = make_graph();
        assert!(SplitAt::new(vec![0]).plan(&g).is_err());
        assert!(SplitAt::new(vec![5]).plan(&g).is_err());
    }
}
