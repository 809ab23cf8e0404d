// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end batches through the public backend API.
//!
//! These tests drive `Backend` with the synthetic execution unit, whose
//! outputs depend only on the matching input sample, so any shard offset
//! or slot routing mistake shows up as a byte mismatch.

use std::time::Duration;

use exec_unit::synthetic::{demo_signature, transform, FaultPlan, Probe, SyntheticFactory};
use exec_unit::{DeviceClass, ModelSignature};
use runtime::{
    Backend, BackendConfig, BatchPhase, DispatchEvent, Entry, ExecutionMode, HostContext,
    RuntimeError,
};

// ── Helpers ────────────────────────────────────────────────────

fn sharded(batch: usize, shards: Option<usize>) -> BackendConfig {
    BackendConfig {
        batch_size: batch,
        shards_num: shards,
        num_threads: Some(1),
        memory_budget: "32M".into(),
        ..BackendConfig::default()
    }
}

fn pipelined(batch: usize, fast: usize, slow: usize, timeout_ms: u64) -> BackendConfig {
    BackendConfig {
        mode: ExecutionMode::Pipelined,
        batch_size: batch,
        fast_slots: fast,
        slow_slots: slow,
        poll_timeout_ms: timeout_ms,
        num_threads: Some(1),
        memory_budget: "32M".into(),
        ..BackendConfig::default()
    }
}

/// Distinct bytes per (batch, sample, tensor).
fn sample_bytes(seed: u8, sample: usize, tensor: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|j| seed.wrapping_add((sample * 37 + tensor * 11 + j) as u8))
        .collect()
}

/// Writes every input of every sample; returns what was written.
fn fill(backend: &mut Backend, seed: u8) -> Vec<Vec<Vec<u8>>> {
    let signature = demo_signature();
    (0..backend.config().batch_size)
        .map(|i| {
            signature
                .inputs
                .iter()
                .enumerate()
                .map(|(t, spec)| {
                    let data = sample_bytes(seed, i, t, spec.sample_bytes());
                    assert!(backend.set_input(i as u32, t as i32, &data).is_success());
                    data
                })
                .collect()
        })
        .collect()
}

fn expected_output(signature: &ModelSignature, inputs: &[Vec<u8>], tensor: usize) -> Vec<u8> {
    let views: Vec<&[u8]> = inputs.iter().map(Vec::as_slice).collect();
    transform(&views, tensor, signature.outputs[tensor].sample_bytes())
}

fn assert_outputs(backend: &Backend, inputs: &[Vec<Vec<u8>>]) {
    let signature = demo_signature();
    for (i, sample) in inputs.iter().enumerate() {
        for t in 0..signature.outputs.len() {
            assert_eq!(
                backend.get_output(i as u32, t as i32).unwrap(),
                expected_output(&signature, sample, t).as_slice(),
                "sample {i} output {t}"
            );
        }
    }
}

// ── Scenarios ──────────────────────────────────────────────────

#[test]
fn test_scenario_a_single_sample_identity() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let mut backend = Backend::create(&ctx, &factory, sharded(1, None)).unwrap();

    let inputs = fill(&mut backend, 3);
    assert!(backend.issue_query().is_success());
    assert_outputs(&backend, &inputs);

    let metrics = backend.metrics().unwrap();
    assert_eq!(metrics.invocations.len(), 1);
    assert_eq!(metrics.submission_order(), vec![0]);
}

#[test]
fn test_scenario_b_two_shards_join() {
    let ctx = HostContext::new();
    let probe = Probe::new();
    let factory = SyntheticFactory::new(demo_signature()).with_probe(probe.clone());
    let mut backend = Backend::create(&ctx, &factory, sharded(4, Some(2))).unwrap();

    let inputs = fill(&mut backend, 9);
    assert!(backend.issue_query().is_success());

    // Shard 1 (samples 2..4) is handed to the pool before shard 0 runs inline.
    let metrics = backend.metrics().unwrap();
    assert_eq!(metrics.submission_order(), vec![2, 0]);
    assert_eq!(metrics.invocations.len(), 2);
    assert!(metrics.invocations.iter().all(|t| t.samples == 2));
    assert_eq!(probe.invocations(), 2);
    assert_eq!(probe.in_flight(), 0);
    assert_outputs(&backend, &inputs);
}

#[test]
fn test_scenario_c_fifo_refill() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let mut backend = Backend::create(&ctx, &factory, pipelined(10, 3, 0, 5_000)).unwrap();

    let inputs = fill(&mut backend, 1);
    assert!(backend.issue_query().is_success());
    assert_outputs(&backend, &inputs);

    let metrics = backend.metrics().unwrap();
    assert_eq!(metrics.submission_order(), (0..10).collect::<Vec<_>>());

    let position = |wanted: &dyn Fn(&DispatchEvent) -> bool| {
        metrics.trace.iter().position(|e| wanted(e)).unwrap()
    };
    let first_completion = position(&|e| matches!(e, DispatchEvent::Completed { .. }));
    let submit_3 = position(&|e| matches!(e, DispatchEvent::Submitted { sample: 3, .. }));
    let submit_9 = position(&|e| matches!(e, DispatchEvent::Submitted { sample: 9, .. }));
    assert!(first_completion < submit_3);
    assert!(submit_3 < submit_9);
}

#[test]
fn test_scenario_d_allocate_failure_aborts_batch() {
    let ctx = HostContext::new();
    let probe = Probe::new();
    let factory = SyntheticFactory::new(demo_signature())
        .with_probe(probe.clone())
        .with_fault(1, FaultPlan::none().fail_allocate_on(1));
    let mut backend = Backend::create(&ctx, &factory, sharded(4, Some(2))).unwrap();

    let signature = demo_signature();
    let mut statuses = Vec::new();
    for i in 0..4u32 {
        for (t, spec) in signature.inputs.iter().enumerate() {
            statuses.push(backend.set_input(i, t as i32, &vec![1; spec.sample_bytes()]));
        }
    }
    assert!(statuses.iter().any(|s| !s.is_success()));

    assert!(!backend.issue_query().is_success());
    assert_eq!(backend.phase(), BatchPhase::Failed);
    assert_eq!(probe.invocations(), 0, "no shard may run after a finalize failure");
    assert!(matches!(backend.get_output(0, 0), Err(RuntimeError::NoResults)));
}

#[test]
fn test_scenario_e_timeout_leaves_slots_occupied() {
    let ctx = HostContext::new();
    let slow = FaultPlan::none().with_delay(Duration::from_millis(500));
    let factory = SyntheticFactory::new(demo_signature())
        .with_fault(8, slow.clone())
        .with_fault(9, slow);
    let mut backend = Backend::create(&ctx, &factory, pipelined(10, 10, 0, 100)).unwrap();

    fill(&mut backend, 5);
    let err = backend.try_issue_query().unwrap_err();
    assert!(
        matches!(err, RuntimeError::PollTimeout { completed: 8, outstanding: 2, .. }),
        "{err}"
    );
    assert_eq!(backend.occupied_slots(), 2);
    assert_eq!(backend.scoreboard().copied_count(), 8);
    assert!(backend.get_output(0, 0).is_err(), "completed outputs must stay hidden");

    // Once the late invocations finish, the next batch reclaims both slots.
    std::thread::sleep(Duration::from_millis(700));
    fill(&mut backend, 6);
    let err = backend.try_issue_query().unwrap_err();
    assert!(
        matches!(err, RuntimeError::PollTimeout { completed: 8, outstanding: 2, .. }),
        "slots 8 and 9 were refilled and are slow again: {err}"
    );
    let metrics = backend.metrics().unwrap();
    for slot in [8, 9] {
        assert!(metrics
            .trace
            .iter()
            .any(|e| *e == DispatchEvent::Submitted { slot, sample: slot }));
    }
}

// ── Properties ─────────────────────────────────────────────────

#[test]
fn test_coverage_no_mixing_sharded() {
    for (batch, shards) in [(1, 1), (2, 1), (2, 2), (4, 2), (6, 3), (6, 2), (8, 4), (9, 3)] {
        let ctx = HostContext::new();
        let factory = SyntheticFactory::new(demo_signature());
        let mut backend = Backend::create(&ctx, &factory, sharded(batch, Some(shards))).unwrap();

        let inputs = fill(&mut backend, batch as u8);
        assert!(backend.issue_query().is_success(), "B={batch} K={shards}");
        assert_eq!(backend.scoreboard().copied_count(), batch);
        assert!((0..batch).all(|i| backend.scoreboard().entry(i) == Some(Entry::Copied)));
        assert_outputs(&backend, &inputs);
    }
}

#[test]
fn test_coverage_no_mixing_pipelined() {
    for (batch, fast, slow) in [(1, 1, 0), (5, 2, 1), (9, 3, 2), (16, 4, 1)] {
        let ctx = HostContext::new();
        let factory = SyntheticFactory::new(demo_signature())
            .with_class_delay(DeviceClass::Slow, Duration::from_millis(2));
        let config = pipelined(batch, fast, slow, 5_000);
        let mut backend = Backend::create(&ctx, &factory, config).unwrap();

        let inputs = fill(&mut backend, 40);
        assert!(backend.issue_query().is_success(), "B={batch} P={fast}+{slow}");
        assert!(backend.scoreboard().is_complete());
        assert_outputs(&backend, &inputs);

        let mut done = backend.metrics().unwrap().completion_order();
        done.sort_unstable();
        assert_eq!(done, (0..batch).collect::<Vec<_>>());
    }
}

#[test]
fn test_out_of_order_writes() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let mut backend = Backend::create(&ctx, &factory, sharded(6, Some(3))).unwrap();
    let signature = demo_signature();

    let mut inputs = vec![Vec::new(); 6];
    for i in [5usize, 0, 3, 1, 4, 2] {
        inputs[i] = signature
            .inputs
            .iter()
            .enumerate()
            .map(|(t, spec)| {
                let data = sample_bytes(77, i, t, spec.sample_bytes());
                assert!(backend.set_input(i as u32, t as i32, &data).is_success());
                data
            })
            .collect();
    }
    assert!(backend.issue_query().is_success());
    assert_outputs(&backend, &inputs);
}

/// Batch 1 writes one index twice; batch 2 writes only sample 0.
fn check_overwrite_and_fresh_batch(config: BackendConfig) {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let mut backend = Backend::create(&ctx, &factory, config).unwrap();
    let signature = demo_signature();
    let batch = backend.config().batch_size;

    // The second value wins.
    let mut inputs = fill(&mut backend, 20);
    let second = sample_bytes(99, 1, 0, signature.inputs[0].sample_bytes());
    assert!(backend.set_input(1, 0, &second).is_success());
    inputs[1][0] = second;
    assert!(backend.issue_query().is_success());
    assert_outputs(&backend, &inputs);

    // Nothing from batch 1 survives; unwritten samples read as zeros.
    let fresh: Vec<Vec<u8>> = signature
        .inputs
        .iter()
        .enumerate()
        .map(|(t, spec)| {
            let data = sample_bytes(50, 0, t, spec.sample_bytes());
            assert!(backend.set_input(0, t as i32, &data).is_success());
            data
        })
        .collect();
    assert!(backend.issue_query().is_success());

    let zeros: Vec<Vec<u8>> = signature
        .inputs
        .iter()
        .map(|spec| vec![0; spec.sample_bytes()])
        .collect();
    let mut expected = vec![zeros; batch];
    expected[0] = fresh;
    assert_outputs(&backend, &expected);
}

#[test]
fn test_overwrite_idempotence() {
    check_overwrite_and_fresh_batch(sharded(4, Some(2)));
}

#[test]
fn test_overwrite_idempotence_pipelined() {
    check_overwrite_and_fresh_batch(pipelined(4, 2, 1, 5_000));
}

#[test]
fn test_bounded_occupancy_and_progress() {
    let ctx = HostContext::new();
    let probe = Probe::new();
    let factory = SyntheticFactory::new(demo_signature())
        .with_probe(probe.clone())
        .with_class_delay(DeviceClass::Fast, Duration::from_millis(3))
        .with_class_delay(DeviceClass::Slow, Duration::from_millis(9));
    let mut backend = Backend::create(&ctx, &factory, pipelined(24, 3, 1, 10_000)).unwrap();

    fill(&mut backend, 8);
    assert!(backend.issue_query().is_success());
    assert!(probe.peak_in_flight() <= 4);

    let metrics = backend.metrics().unwrap();
    assert!(metrics.peak_occupancy <= 4);
    let mut occupied = 0usize;
    let mut completed = 0usize;
    for event in &metrics.trace {
        match event {
            DispatchEvent::Submitted { .. } => occupied += 1,
            DispatchEvent::Completed { .. } => {
                occupied -= 1;
                completed += 1;
            }
        }
        assert!(occupied <= 4);
    }
    assert_eq!(completed, 24);
    assert_eq!(occupied, 0);
}

#[test]
fn test_weighted_round_robin_uses_both_classes() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature())
        .with_class_delay(DeviceClass::Fast, Duration::from_millis(2));
    let config = BackendConfig {
        admission: "weighted-round-robin".into(),
        ..pipelined(12, 2, 1, 5_000)
    };
    let mut backend = Backend::create(&ctx, &factory, config).unwrap();

    let inputs = fill(&mut backend, 2);
    assert!(backend.issue_query().is_success());
    assert_outputs(&backend, &inputs);
    let classes: Vec<DeviceClass> = backend
        .metrics()
        .unwrap()
        .invocations
        .iter()
        .map(|t| t.class)
        .collect();
    assert!(classes.contains(&DeviceClass::Fast));
    assert!(classes.contains(&DeviceClass::Slow));
}

// ── Lifecycle ──────────────────────────────────────────────────

#[test]
fn test_single_active_backend() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let first = Backend::create(&ctx, &factory, sharded(2, None)).unwrap();
    assert!(matches!(
        Backend::create(&ctx, &factory, sharded(2, None)),
        Err(RuntimeError::BackendActive)
    ));
    drop(first);
    assert!(Backend::create(&ctx, &factory, sharded(2, None)).is_ok());
}

#[test]
fn test_accelerator_fallback_to_cpu() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature()).reject_accelerator("npu");
    let config = BackendConfig {
        accelerator: "npu".into(),
        ..sharded(4, None)
    };
    let mut backend = Backend::create(&ctx, &factory, config).unwrap();
    assert_eq!(backend.accelerator_name(), "cpu");

    let inputs = fill(&mut backend, 4);
    assert!(backend.issue_query().is_success());
    assert_outputs(&backend, &inputs);
}

#[test]
fn test_indivisible_batch_rejected_at_create() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let err = Backend::create(&ctx, &factory, sharded(5, Some(2))).unwrap_err();
    assert!(matches!(err, RuntimeError::PlannerError(_)), "{err}");
    assert!(!ctx.is_active());
}

#[test]
fn test_config_from_pairs_drives_backend() {
    let config = BackendConfig::from_pairs(&[
        ("batch_size", "8"),
        ("shards_num", "4"),
        ("num_threads", "1"),
        ("accelerator", "cpu"),
    ])
    .unwrap();
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let mut backend = Backend::create(&ctx, &factory, config).unwrap();

    let inputs = fill(&mut backend, 12);
    assert!(backend.issue_query().is_success());
    assert_eq!(backend.metrics().unwrap().invocations.len(), 4);
    assert_outputs(&backend, &inputs);
}

#[test]
fn test_repeated_batches_return_memory() {
    let ctx = HostContext::new();
    let factory = SyntheticFactory::new(demo_signature());
    let mut backend = Backend::create(&ctx, &factory, sharded(8, Some(2))).unwrap();

    fill(&mut backend, 0);
    assert!(backend.issue_query().is_success());
    let steady = backend.memory_in_use();
    for seed in 1..5 {
        let inputs = fill(&mut backend, seed);
        assert!(backend.issue_query().is_success());
        assert_outputs(&backend, &inputs);
    }
    assert_eq!(backend.memory_in_use(), steady);
}

#[tokio::test]
async fn test_backend_on_blocking_pool() {
    let handle = tokio::task::spawn_blocking(|| {
        let ctx = HostContext::new();
        let factory = SyntheticFactory::new(demo_signature());
        let mut backend = Backend::create(&ctx, &factory, pipelined(6, 2, 1, 5_000)).unwrap();
        let inputs = fill(&mut backend, 61);
        assert!(backend.issue_query().is_success());
        assert_outputs(&backend, &inputs);
        backend.metrics().unwrap().clone()
    });
    let metrics = handle.await.unwrap();
    assert_eq!(metrics.batch_size, 6);
    assert!(metrics.samples_per_second() > 0.0);
}
