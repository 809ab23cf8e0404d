// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `shard-rt run` command: drive batches through the backend.
//!
//! Follows the harness call sequence for each batch:
//! ```text
//! create → set_input × (B × inputs) → issue_query → get_output × (B × outputs)
//! ```
//! and checks every output against the synthetic unit's transform.

use exec_unit::synthetic::SyntheticFactory;
use exec_unit::ModelSignature;
use runtime::{Backend, BackendConfig, BatchMetrics, HostContext};

use super::{fill_batch, verify_outputs};

pub async fn execute(
    config: BackendConfig,
    signature: ModelSignature,
    batches: usize,
    json: bool,
) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             shard-rt · Batch Runner                 ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    println!("  Config:");
    println!("   Model:       {}", signature.name);
    println!("   Mode:        {}", config.mode);
    println!("   Batch size:  {}", config.batch_size);
    println!("   Accelerator: {}", config.accelerator);
    println!("   Budget:      {}", config.memory_budget);
    println!();

    // The backend blocks in join barriers and poll loops; keep it off the
    // async workers.
    let report = tokio::task::spawn_blocking(move || run_batches(config, signature, batches)).await??;

    println!();
    if let Some(metrics) = &report.metrics {
        println!("  Last batch: {}", metrics.summary());
        if json {
            println!("{}", serde_json::to_string_pretty(metrics)?);
        }
    }
    println!("  Pool: {}", report.pool_summary);
    if report.mismatches > 0 {
        anyhow::bail!("{} output(s) did not match their inputs", report.mismatches);
    }
    Ok(())
}

struct Report {
    metrics: Option<BatchMetrics>,
    pool_summary: String,
    mismatches: usize,
}

fn run_batches(config: BackendConfig, signature: ModelSignature, batches: usize) -> anyhow::Result<Report> {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(signature);
    let mut backend = Backend::create(&ctx, &factory, config)?;
    println!(
        "  Backend: {} ({}) on '{}'",
        backend.name(),
        backend.vendor(),
        backend.accelerator_name()
    );
    if let Some(slots) = backend.slots() {
        println!("  Slots:   {}", slots.len());
    }
    if let Some(policy) = backend.admission_policy() {
        println!("  Policy:  {policy}");
    }
    println!();

    let mut mismatches = 0;
    for n in 0..batches {
        let inputs = fill_batch(&mut backend, n as u8)?;
        backend.try_issue_query()?;
        let bad = verify_outputs(&backend, &inputs)?;
        mismatches += bad;

        if let Some(m) = backend.metrics() {
            println!(
                "  [{}/{}] {:>8.2} ms  {:>9.1} samples/s  {}",
                n + 1,
                batches,
                m.total_duration.as_secs_f64() * 1000.0,
                m.samples_per_second(),
                if bad == 0 { "ok" } else { "MISMATCH" },
            );
        }
    }

    Ok(Report {
        metrics: backend.metrics().cloned(),
        pool_summary: backend.memory_stats().summary(),
        mismatches,
    })
}
