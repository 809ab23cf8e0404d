// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `shard-rt inspect` command: display a model signature and how a
//! configuration maps a batch onto execution units.

use exec_unit::ModelSignature;
use runtime::{BackendConfig, ExecutionMode};
use tensor_core::TensorSpec;

use super::truncate;

pub fn execute(config: BackendConfig, signature: ModelSignature) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             shard-rt · Model Inspector              ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    println!("  Model: {}", signature.name);
    println!();
    print_tensors("Inputs", &signature.inputs);
    print_tensors("Outputs", &signature.outputs);

    // ── Layout ─────────────────────────────────────────────────
    if let Err(e) = config.validate() {
        println!("  Configuration rejected: {e}");
        return Ok(());
    }
    let batch = config.batch_size;
    println!("  Layout ({} mode):", config.mode);
    match config.mode {
        ExecutionMode::Sharded => {
            let layout = config.layout()?;
            println!("   {}", layout.summary());
            for shard in 0..layout.shard_count() {
                let range = layout.shard_range(shard);
                println!(
                    "   shard {shard:<3} samples {:>4}..{:<4} ({})",
                    range.start,
                    range.end,
                    if shard == 0 { "inline" } else { "worker" },
                );
            }
        }
        ExecutionMode::Pipelined => {
            let plan = config.slot_plan()?;
            println!(
                "   {} sample(s) over {} fast + {} slow slot(s), admission '{}'",
                batch, plan.fast_slots, plan.slow_slots, config.admission,
            );
            println!("   poll deadline: {} ms", config.poll_timeout_ms);
        }
    }

    let per_sample: usize = signature
        .inputs
        .iter()
        .chain(&signature.outputs)
        .map(TensorSpec::sample_bytes)
        .sum();
    println!();
    println!(
        "  Batch data: {:.2} KB ({} B per sample), budget {}",
        (per_sample * batch) as f64 / 1024.0,
        per_sample,
        config.memory_budget,
    );
    println!();
    Ok(())
}

fn print_tensors(title: &str, tensors: &[TensorSpec]) {
    println!("  {title}:");
    println!(
        "   {:<4} {:<24} {:<6} {:<18} {:>10}",
        "Idx", "Name", "Type", "Shape", "B/sample",
    );
    println!("   {}", "-".repeat(66));
    for (i, spec) in tensors.iter().enumerate() {
        println!(
            "   {:<4} {:<24} {:<6} {:<18} {:>10}",
            i,
            truncate(&spec.name, 24),
            spec.dtype.as_str(),
            spec.shape.to_string(),
            spec.sample_bytes(),
        );
    }
    println!();
}
