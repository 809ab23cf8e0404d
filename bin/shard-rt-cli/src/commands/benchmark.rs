// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `shard-rt benchmark` command: sweep batch sizes across shard counts and
//! slot plans.
//!
//! Runs every configuration with the synthetic unit (per-class invoke
//! delays stand in for fast and slow hardware) and prints a comparison
//! table of latency, throughput and how samples split between classes.

use std::time::Duration;

use anyhow::Context;
use exec_unit::synthetic::SyntheticFactory;
use exec_unit::{DeviceClass, ModelSignature};
use runtime::{Backend, BackendConfig, ExecutionMode, HostContext};

use super::fill_batch;

/// What to sweep.
#[derive(Debug, Clone)]
pub struct Sweep {
    pub batch_sizes: Vec<usize>,
    pub shards: Vec<usize>,
    pub slots: Vec<(usize, usize)>,
}

impl Sweep {
    pub fn parse(batch_sizes: &str, shards: &str, slots: &str) -> anyhow::Result<Self> {
        let numbers = |list: &str| -> anyhow::Result<Vec<usize>> {
            list.split(',')
                .map(|s| {
                    s.trim()
                        .parse::<usize>()
                        .with_context(|| format!("invalid number '{}'", s.trim()))
                })
                .collect()
        };
        let slots = slots
            .split(',')
            .map(|plan| {
                let (fast, slow) = plan
                    .trim()
                    .split_once('+')
                    .with_context(|| format!("slot plan '{plan}' must look like FAST+SLOW"))?;
                Ok((fast.trim().parse::<usize>()?, slow.trim().parse::<usize>()?))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            batch_sizes: numbers(batch_sizes)?,
            shards: numbers(shards)?,
            slots,
        })
    }

    fn configs(&self, base: &BackendConfig) -> Vec<(String, BackendConfig)> {
        let mut out = Vec::new();
        for &batch in &self.batch_sizes {
            for &shards in self.shards.iter().filter(|&&k| k > 0 && batch % k == 0) {
                let config = BackendConfig {
                    mode: ExecutionMode::Sharded,
                    batch_size: batch,
                    shards_num: Some(shards),
                    ..base.clone()
                };
                out.push((format!("B={batch} sharded K={shards}"), config));
            }
            for &(fast, slow) in &self.slots {
                let config = BackendConfig {
                    mode: ExecutionMode::Pipelined,
                    batch_size: batch,
                    shards_num: None,
                    fast_slots: fast,
                    slow_slots: slow,
                    ..base.clone()
                };
                out.push((format!("B={batch} pipelined {fast}+{slow}"), config));
            }
        }
        out
    }
}

#[derive(Debug)]
struct BenchResult {
    label: String,
    mean_ms: f64,
    samples_per_sec: f64,
    peak_mb: f64,
    fast_samples: usize,
    slow_samples: usize,
}

pub async fn execute(
    base: BackendConfig,
    signature: ModelSignature,
    sweep: Sweep,
    iterations: usize,
    delays_us: (u64, u64),
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             shard-rt · Benchmark Suite              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();
    println!("  Batch sizes: {:?}", sweep.batch_sizes);
    println!("  Shards:      {:?}", sweep.shards);
    println!("  Slot plans:  {:?}", sweep.slots);
    println!(
        "  Invoke delay: fast {} us, slow {} us",
        delays_us.0, delays_us.1
    );
    println!();

    let factory = SyntheticFactory::new(signature)
        .with_class_delay(DeviceClass::Fast, Duration::from_micros(delays_us.0))
        .with_class_delay(DeviceClass::Slow, Duration::from_micros(delays_us.1));
    let configs = sweep.configs(&base);
    let iterations = iterations.max(1);

    let results = tokio::task::spawn_blocking(move || {
        let ctx = HostContext::new();
        configs
            .into_iter()
            .map(|(label, config)| {
                let result = run_single(&ctx, &factory, &label, config, iterations);
                (label, result)
            })
            .collect::<Vec<_>>()
    })
    .await?;

    // ── Results Table ──────────────────────────────────────────
    println!(
        "  {:<28} {:>10} {:>12} {:>10} {:>11}",
        "Configuration", "Mean ms", "Samples/s", "Peak MB", "Fast/Slow",
    );
    println!("  {}", "-".repeat(76));

    let mut ok = Vec::new();
    for (label, result) in results {
        match result {
            Ok(r) => {
                println!(
                    "  {:<28} {:>10.2} {:>12.1} {:>10.2} {:>5}/{:<5}",
                    r.label, r.mean_ms, r.samples_per_sec, r.peak_mb, r.fast_samples, r.slow_samples,
                );
                ok.push(r);
            }
            Err(e) => println!("  {label:<28}     FAILED: {e:#}"),
        }
    }
    println!();

    // ── Summary ────────────────────────────────────────────────
    let best = ok
        .iter()
        .max_by(|a, b| a.samples_per_sec.total_cmp(&b.samples_per_sec));
    match best {
        Some(best) => println!(
            "  Highest throughput: {} ({:.1} samples/s)",
            best.label, best.samples_per_sec
        ),
        None => println!("  No successful benchmark runs."),
    }
    println!();
    Ok(())
}

fn run_single(
    ctx: &HostContext,
    factory: &SyntheticFactory,
    label: &str,
    config: BackendConfig,
    iterations: usize,
) -> anyhow::Result<BenchResult> {
    let batch = config.batch_size;
    let mut backend = Backend::create(ctx, factory, config)?;

    // Warm up: the first batch resizes units and fills the free lists.
    fill_batch(&mut backend, 0)?;
    backend.try_issue_query()?;

    let mut total = Duration::ZERO;
    let mut split = (0, 0);
    for n in 0..iterations {
        fill_batch(&mut backend, n as u8)?;
        backend.try_issue_query()?;
        let metrics = backend
            .metrics()
            .context("batch finished without metrics")?;
        total += metrics.total_duration;
        for timing in &metrics.invocations {
            match timing.class {
                DeviceClass::Fast => split.0 += timing.samples,
                DeviceClass::Slow => split.1 += timing.samples,
            }
        }
    }

    let mean = total / iterations as u32;
    Ok(BenchResult {
        label: label.to_string(),
        mean_ms: mean.as_secs_f64() * 1000.0,
        samples_per_sec: batch as f64 / mean.as_secs_f64().max(f64::EPSILON),
        peak_mb: backend.memory_stats().peak_allocated_bytes as f64 / (1024.0 * 1024.0),
        fast_samples: split.0 / iterations,
        slow_samples: split.1 / iterations,
    })
}
