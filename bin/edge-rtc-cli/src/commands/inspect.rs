// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `edge-rtc inspect`: layer report, dependency map and slice boundary.

use std::path::PathBuf;

use partition_planner::SubgraphBoundary;

pub fn execute(model: PathBuf, range: Option<String>) -> anyhow::Result<()> {
    let graph = super::load_graph(&model)?;

    println!("{}", graph.report()?);
    println!();

    let deps = graph.dependency_map();
    if deps.is_empty() {
        println!("  No out-of-sequence dependencies.");
    } else {
        println!("  Dependencies ({} producers):", deps.len());
        print!("{deps}");
    }
    println!();

    if let Some(raw) = range {
        let (start, end) = super::parse_range(&raw)?;
        let boundary = SubgraphBoundary::extract(&graph, &deps, start, end)?;
        print!("{boundary}");
        println!(
            "  {} layers, {} boundary inputs ({} elements), {} outputs ({} elements)",
            boundary.num_layers(),
            boundary.inputs.len(),
            boundary.input_elements(),
            boundary.outputs().len(),
            boundary.output_elements()
        );
    }
    Ok(())
}
