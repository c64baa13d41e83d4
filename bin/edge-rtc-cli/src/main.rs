// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # edge-rtc
//!
//! Command-line interface for the edge-rtc layer graph compiler.
//!
//! ## Usage
//! ```bash
//! # Inspect a model and the boundary of a layer range
//! edge-rtc inspect --model ./models/yolo4tiny --range 10:20
//!
//! # Build (or load) an engine
//! edge-rtc build --model ./models/yolo4tiny --precision int8 --dla
//!
//! # Compile one engine per slice
//! edge-rtc plan --model ./models/yolo4tiny --split 10,20 --devices dla,gpu
//!
//! # Inspect and run an engine file
//! edge-rtc info --engine yolo4tiny_fp16.rt
//! edge-rtc run --engine yolo4tiny_fp16.rt --batch 2
//! ```

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "edge-rtc",
    about = "Layer graph compiler and engine cache for edge accelerators",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the layer report, dependency map and slice boundary.
    Inspect {
        /// Path to the model directory.
        #[arg(short, long)]
        model: PathBuf,

        /// Layer range to analyse, as `start:end` (inclusive).
        #[arg(short, long)]
        range: Option<String>,
    },

    /// Compile a model (or a layer range) to an engine, or load it if the
    /// engine file already exists.
    Build {
        /// Path to the model directory.
        #[arg(short, long)]
        model: PathBuf,

        /// Layer range to compile, as `start:end` (inclusive).
        #[arg(short, long)]
        range: Option<String>,

        /// Precision: fp32, fp16 or int8.
        #[arg(short, long)]
        precision: Option<String>,

        /// Offer operations to the DLA.
        #[arg(long)]
        dla: bool,

        /// Engine file; defaults to `<engine_dir>/<name>[_dla]_<precision>.rt`.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile one engine per slice, cutting before each split point.
    Plan {
        /// Path to the model directory.
        #[arg(short, long)]
        model: PathBuf,

        /// Comma-separated layer ids to cut before (e.g. "10,20").
        #[arg(short, long)]
        split: String,

        /// Comma-separated devices per slice (gpu or dla).
        #[arg(short, long)]
        devices: Option<String>,
    },

    /// Print bindings, operations and plugins of an engine file.
    Info {
        /// Path to the engine file.
        #[arg(short, long)]
        engine: PathBuf,
    },

    /// Run one zero-input inference through an engine file.
    Run {
        /// Path to the engine file.
        #[arg(short, long)]
        engine: PathBuf,

        /// Batch size.
        #[arg(short, long, default_value_t = 1)]
        batch: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { model, range } => commands::inspect::execute(model, range),
        Commands::Build {
            model,
            range,
            precision,
            dla,
            output,
        } => commands::build::execute(config, model, range, precision, dla, output),
        Commands::Plan {
            model,
            split,
            devices,
        } => commands::plan::execute(config, model, split, devices),
        Commands::Info { engine } => commands::info::execute(engine),
        Commands::Run { engine, batch } => commands::run::execute(config, engine, batch).await,
    }
}
