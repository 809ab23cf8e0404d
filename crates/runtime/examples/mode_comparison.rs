// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Example: Compare static sharding and pipelined slots on one batch.
//!
//! Runs the same 24-sample batch through several shard counts and slot
//! plans with a synthetic unit that is slower on the slow class, then
//! prints wall time, throughput and where the samples went.
//!
//! ```bash
//! cargo run -p runtime --example mode_comparison
//! ```

use std::time::Duration;

use exec_unit::synthetic::{demo_signature, SyntheticFactory};
use exec_unit::DeviceClass;
use runtime::{Backend, BackendConfig, ExecutionMode, HostContext};

const BATCH: usize = 24;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let factory = SyntheticFactory::new(demo_signature())
        .with_class_delay(DeviceClass::Fast, Duration::from_millis(2))
        .with_class_delay(DeviceClass::Slow, Duration::from_millis(6));

    let mut configs = Vec::new();
    for shards in [1, 2, 4, 8] {
        configs.push(BackendConfig {
            batch_size: BATCH,
            shards_num: Some(shards),
            ..BackendConfig::default()
        });
    }
    for (fast, slow, admission) in [
        (2, 0, "fast-first"),
        (2, 1, "fast-first"),
        (2, 1, "weighted-round-robin"),
        (4, 2, "fast-first"),
    ] {
        configs.push(BackendConfig {
            mode: ExecutionMode::Pipelined,
            batch_size: BATCH,
            fast_slots: fast,
            slow_slots: slow,
            admission: admission.into(),
            ..BackendConfig::default()
        });
    }

    println!(
        "{:<34} {:>10} {:>12} {:>10}",
        "Configuration", "Wall ms", "Samples/s", "Fast/Slow",
    );
    println!("{}", "-".repeat(70));

    let ctx = HostContext::new();
    for config in configs {
        let label = match config.mode {
            ExecutionMode::Sharded => format!("sharded K={}", config.layout()?.shard_count()),
            ExecutionMode::Pipelined => format!(
                "pipelined {}+{} {}",
                config.fast_slots, config.slow_slots, config.admission
            ),
        };
        let mut backend = Backend::create(&ctx, &factory, config)?;
        for i in 0..BATCH as u32 {
            for t in 0..backend.input_count() as i32 {
                let info = backend.input_type(t)?;
                let data = vec![i as u8; info.elements * info.dtype.size_bytes()];
                backend.try_set_input(i, t, &data)?;
            }
        }
        backend.try_issue_query()?;

        if let Some(metrics) = backend.metrics() {
            let count = |class| {
                metrics
                    .invocations
                    .iter()
                    .filter(|t| t.class == class)
                    .map(|t| t.samples)
                    .sum::<usize>()
            };
            println!(
                "{:<34} {:>10.2} {:>12.1} {:>5}/{:<4}",
                label,
                metrics.total_duration.as_secs_f64() * 1000.0,
                metrics.samples_per_second(),
                count(DeviceClass::Fast),
                count(DeviceClass::Slow),
            );
        }
    }

    Ok(())
}
