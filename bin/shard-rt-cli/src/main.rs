// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # shard-rt
//!
//! Command-line harness for the batch-sharded inference backend.
//!
//! ## Usage
//! ```bash
//! # Run one batch of 8 over 4 shards and verify every output
//! shard-rt run --batch-size 8 --shards 4
//!
//! # Pipelined: 3 fast slots plus 1 slow slot
//! shard-rt run --mode pipelined --batch-size 32 --fast-slots 3 --slow-slots 1
//!
//! # Compare sharding and slot plans across batch sizes
//! shard-rt benchmark --batch-sizes 4,16,64
//!
//! # Show a model signature and how a configuration lays it out
//! shard-rt inspect --signature ./model.json --batch-size 8
//! ```

mod commands;

use clap::{Parser, Subcommand};

use commands::BackendArgs;

#[derive(Parser)]
#[command(
    name = "shard-rt",
    about = "Batch-sharded inference backend harness",
    version,
    author
)]
struct Cli {
    /// Path to a TOML backend configuration (CLI options override it).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Path to a JSON model signature (defaults to the built-in demo model).
    #[arg(short, long, global = true)]
    signature: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run batches through the synthetic unit and verify every output.
    Run {
        #[command(flatten)]
        backend: BackendArgs,

        /// Number of batches to run.
        #[arg(long, default_value_t = 1)]
        batches: usize,

        /// Print the last batch's metrics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Compare static sharding against pipelined slot plans.
    Benchmark {
        /// Comma-separated batch sizes to sweep (e.g., "4,16,64").
        #[arg(long, default_value = "4,16,64")]
        batch_sizes: String,

        /// Comma-separated shard counts for sharded mode.
        #[arg(long, default_value = "1,2,4")]
        shards: String,

        /// Comma-separated fast+slow slot plans for pipelined mode.
        #[arg(long, default_value = "2+0,2+1,4+1")]
        slots: String,

        /// Timed batches per configuration.
        #[arg(long, default_value_t = 5)]
        iterations: usize,

        /// Per-invoke delay of fast units, in microseconds.
        #[arg(long, default_value_t = 500)]
        fast_delay_us: u64,

        /// Per-invoke delay of slow units, in microseconds.
        #[arg(long, default_value_t = 1500)]
        slow_delay_us: u64,
    },

    /// Inspect a model signature and the resolved batch layout.
    Inspect {
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);

    let base = commands::load_config(cli.config.as_deref())?;
    let signature = commands::load_signature(cli.signature.as_deref())?;

    match cli.command {
        Commands::Run {
            backend,
            batches,
            json,
        } => commands::run::execute(backend.apply(base)?, signature, batches, json).await,
        Commands::Benchmark {
            batch_sizes,
            shards,
            slots,
            iterations,
            fast_delay_us,
            slow_delay_us,
        } => {
            let sweep = commands::benchmark::Sweep::parse(&batch_sizes, &shards, &slots)?;
            let delays = (fast_delay_us, slow_delay_us);
            commands::benchmark::execute(base, signature, sweep, iterations, delays).await
        }
        Commands::Inspect { backend } => commands::inspect::execute(backend.apply(base)?, signature),
    }
}
