// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share.

pub mod benchmark;
pub mod inspect;
pub mod run;

use std::path::Path;

use anyhow::Context;
use exec_unit::synthetic::{demo_signature, transform};
use exec_unit::ModelSignature;
use runtime::{Backend, BackendConfig, ExecutionMode};
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<BackendConfig> {
    match path {
        Some(path) => BackendConfig::from_file(path)
            .with_context(|| format!("loading config '{}'", path.display())),
        None => Ok(BackendConfig::default()),
    }
}

pub fn load_signature(path: Option<&Path>) -> anyhow::Result<ModelSignature> {
    match path {
        Some(path) => ModelSignature::from_file(path)
            .with_context(|| format!("loading signature '{}'", path.display())),
        None => Ok(demo_signature()),
    }
}

/// Backend options shared by `run` and `inspect`.
#[derive(clap::Args, Debug, Default)]
pub struct BackendArgs {
    /// Samples per batch.
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Explicit shard count (sharded mode).
    #[arg(long)]
    pub shards: Option<usize>,

    /// Execution mode: sharded or pipelined.
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Accelerator requested from the unit factory.
    #[arg(short, long)]
    pub accelerator: Option<String>,

    /// Intra-op threads per unit.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Fast-class slots (pipelined mode).
    #[arg(long)]
    pub fast_slots: Option<usize>,

    /// Slow-class slots (pipelined mode).
    #[arg(long)]
    pub slow_slots: Option<usize>,

    /// Admission policy: fast-first or weighted-round-robin.
    #[arg(long)]
    pub admission: Option<String>,

    /// Batch deadline for pipelined polling, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Memory budget (e.g., "256M", "1G").
    #[arg(long)]
    pub memory_budget: Option<String>,
}

impl BackendArgs {
    /// Overlays the options that were given onto `config`.
    pub fn apply(self, mut config: BackendConfig) -> anyhow::Result<BackendConfig> {
        if let Some(mode) = &self.mode {
            config.mode = ExecutionMode::parse(mode)?;
        }
        if let Some(b) = self.batch_size {
            config.batch_size = b;
        }
        if self.shards.is_some() {
            config.shards_num = self.shards;
        }
        if let Some(a) = self.accelerator {
            config.accelerator = a;
        }
        if self.threads.is_some() {
            config.num_threads = self.threads;
        }
        if let Some(n) = self.fast_slots {
            config.fast_slots = n;
        }
        if let Some(n) = self.slow_slots {
            config.slow_slots = n;
        }
        if let Some(a) = self.admission {
            config.admission = a;
        }
        if let Some(t) = self.timeout_ms {
            config.poll_timeout_ms = t;
        }
        if let Some(m) = self.memory_budget {
            config.memory_budget = m;
        }
        Ok(config)
    }
}

/// Writes a deterministic batch; returns the bytes written per sample and input.
pub fn fill_batch(backend: &mut Backend, seed: u8) -> anyhow::Result<Vec<Vec<Vec<u8>>>> {
    let batch = backend.config().batch_size;
    let mut written = Vec::with_capacity(batch);
    for i in 0..batch {
        let mut sample = Vec::with_capacity(backend.input_count());
        for t in 0..backend.input_count() {
            let info = backend.input_type(t as i32)?;
            let len = info.elements * info.dtype.size_bytes();
            let data: Vec<u8> = (0..len)
                .map(|j| seed.wrapping_add((i * 31 + t * 7 + j) as u8))
                .collect();
            backend.try_set_input(i as u32, t as i32, &data)?;
            sample.push(data);
        }
        written.push(sample);
    }
    Ok(written)
}

/// Checks every output against the synthetic transform; returns mismatches.
pub fn verify_outputs(backend: &Backend, inputs: &[Vec<Vec<u8>>]) -> anyhow::Result<usize> {
    let mut mismatches = 0;
    for (i, sample) in inputs.iter().enumerate() {
        let views: Vec<&[u8]> = sample.iter().map(Vec::as_slice).collect();
        for t in 0..backend.output_count() {
            let got = backend.get_output(i as u32, t as i32)?;
            if got != transform(&views, t, got.len()).as_slice() {
                tracing::warn!("sample {i} output {t} does not match its input");
                mismatches += 1;
            }
        }
    }
    Ok(mismatches)
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
