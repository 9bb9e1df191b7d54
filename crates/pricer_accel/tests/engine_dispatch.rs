//! Dispatch tests against the counting mock binding.
//!
//! # Test Categories
//!
//! 1. **Round structure**: barrier count, slot assignment, result order
//! 2. **Failure isolation**: write, launch and read failures stay per asset
//! 3. **Validation**: rejected calls never reach the device
//! 4. **Timing and seeds**: run timer and per-launch seed behaviour

mod common;

use std::time::Duration;

use common::{engine_with_mock, fixed, indexed_specs, Event, Faults};
use pricer_accel::{
    AccelError, AssetColumns, BindingStatus, ComputeError, ConvergenceCriterion, OptionSpec,
    OptionType, ValidationError,
};
use proptest::prelude::*;

fn sync_count(events: &[Event]) -> usize {
    events.iter().filter(|e| **e == Event::Synchronize).count()
}

// ============================================================================
// Round structure
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_results_in_order_one_barrier_per_round(
        num_kernels in prop::sample::select(vec![1usize, 2, 4]),
        num_assets in 0usize..=13,
    ) {
        let (mut engine, mock) = engine_with_mock(num_kernels, 16, Faults::default());
        let results = engine
            .run_batch(&indexed_specs(num_assets), &fixed(num_assets, 64))
            .unwrap();

        prop_assert_eq!(results.len(), num_assets);
        for (i, result) in results.iter().enumerate() {
            prop_assert!(result.is_ok());
            prop_assert_eq!(result.option_price, i as f64 + 1.0);
        }

        let l = mock.ledger();
        prop_assert_eq!(sync_count(&l.events), num_assets.div_ceil(num_kernels));
        prop_assert_eq!(l.launches().len(), num_assets);
    }
}

#[test]
fn test_five_assets_on_four_slots() {
    let (mut engine, mock) = engine_with_mock(4, 16, Faults::default());
    let results = engine.run_batch(&indexed_specs(5), &fixed(5, 64)).unwrap();

    let prices: Vec<f64> = results.iter().map(|r| r.option_price).collect();
    assert_eq!(prices, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    let l = mock.ledger();
    assert_eq!(sync_count(&l.events), 2);

    let launches = l.launches();
    // Round 0 fills all four slots, round 1 only slot 0
    let offsets: Vec<(usize, usize)> = launches
        .iter()
        .map(|a| (a.output_offset, a.seed_offset))
        .collect();
    // max_assets_per_slot = ceil(16 / 4) = 4
    assert_eq!(offsets, vec![(0, 0), (0, 4), (0, 8), (0, 12), (1, 1)]);
    assert_eq!(launches[4].output_buffer, launches[0].output_buffer);
}

#[test]
fn test_outputs_read_only_after_barrier() {
    let (mut engine, mock) = engine_with_mock(2, 16, Faults::default());
    engine.run_batch(&indexed_specs(3), &fixed(3, 64)).unwrap();

    let l = mock.ledger();
    let kinds: Vec<&str> = l
        .events
        .iter()
        .skip_while(|e| !matches!(e, Event::Write { .. }))
        .map(|e| match e {
            Event::Write { .. } => "write",
            Event::Launch(_) => "launch",
            Event::Synchronize => "sync",
            Event::Read { .. } => "read",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "write", "launch", "write", "launch", "sync", "read", "read", // round 0
            "write", "launch", "sync", "read", // round 1
        ]
    );
}

#[test]
fn test_empty_batch_makes_no_device_calls() {
    let (mut engine, mock) = engine_with_mock(2, 16, Faults::default());
    let before = mock.ledger().events.len();

    let results = engine.run_batch(&[], &[]).unwrap();

    assert!(results.is_empty());
    assert_eq!(mock.ledger().events.len(), before);
}

#[test]
fn test_criterion_reaches_kernel_arguments() {
    let (mut engine, mock) = engine_with_mock(1, 16, Faults::default());
    let spec = OptionSpec::put(100.0, 90.0, 0.01, 0.0, 0.3, 0.25);

    engine.run_tolerance(spec, 0.05).unwrap();
    engine.run_samples(spec, 5000).unwrap();

    let l = mock.ledger();
    let launches = l.launches();
    assert_eq!(launches.len(), 2);

    assert_eq!(launches[0].criterion, ConvergenceCriterion::Tolerance(0.05));
    assert_eq!(launches[0].required_tolerance(), 0.05);
    assert_eq!(launches[0].required_samples(), 0);

    assert_eq!(launches[1].criterion, ConvergenceCriterion::FixedSamples(5000));
    assert_eq!(launches[1].required_samples(), 5000);
    assert_eq!(launches[1].option.option_type, OptionType::Put);
}

#[test]
fn test_column_batch_matches_spec_batch() {
    let (mut engine, _mock) = engine_with_mock(2, 16, Faults::default());
    let types = [OptionType::Call, OptionType::Put, OptionType::Call];
    let spot = [10.0, 20.0, 30.0];
    let strike = [100.0; 3];
    let rate = [0.05; 3];
    let dividend = [0.0; 3];
    let vol = [0.2; 3];
    let maturity = [1.0; 3];
    let columns = AssetColumns {
        option_type: &types,
        stock_price: &spot,
        strike_price: &strike,
        risk_free_rate: &rate,
        dividend_yield: &dividend,
        volatility: &vol,
        time_to_maturity: &maturity,
    };

    let results = engine
        .run_batch_tolerance(&columns, &[0.1, 0.2, 0.3], 3)
        .unwrap();
    let prices: Vec<f64> = results.iter().map(|r| r.option_price).collect();
    assert_eq!(prices, vec![10.0, 20.0, 30.0]);
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_launch_failure_is_isolated() {
    let (mut engine, _mock) = engine_with_mock(
        2,
        16,
        Faults {
            launch_at: Some(1),
            ..Faults::default()
        },
    );
    let results = engine.run_batch(&indexed_specs(4), &fixed(4, 64)).unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(
        results[1].error,
        Some(ComputeError::KernelFailed {
            asset: 1,
            status: BindingStatus::FAILED,
        })
    );
    assert!(results[1].option_price.is_nan());
    assert_eq!(results[0].option_price, 1.0);
    assert_eq!(results[2].option_price, 3.0);
    assert_eq!(results[3].option_price, 4.0);
}

#[test]
fn test_seed_write_failure_skips_launch() {
    let (mut engine, mock) = engine_with_mock(
        2,
        16,
        Faults {
            write_at: Some(2),
            ..Faults::default()
        },
    );
    let results = engine.run_batch(&indexed_specs(4), &fixed(4, 64)).unwrap();

    assert_eq!(
        results[2].error,
        Some(ComputeError::TransferFailed {
            asset: 2,
            status: BindingStatus::FAILED,
        })
    );
    assert_eq!(results[3].option_price, 4.0);
    assert_eq!(mock.ledger().launches().len(), 3);
}

#[test]
fn test_readback_failure_is_isolated() {
    let (mut engine, _mock) = engine_with_mock(
        2,
        16,
        Faults {
            read_at: Some(0),
            ..Faults::default()
        },
    );
    let results = engine.run_batch(&indexed_specs(3), &fixed(3, 64)).unwrap();

    assert!(matches!(
        results[0].error,
        Some(ComputeError::TransferFailed { asset: 0, .. })
    ));
    assert_eq!(results[1].option_price, 2.0);
    assert_eq!(results[2].option_price, 3.0);
}

#[test]
fn test_round_with_no_launch_skips_barrier() {
    let (mut engine, mock) = engine_with_mock(
        1,
        16,
        Faults {
            launch_at: Some(0),
            ..Faults::default()
        },
    );
    let results = engine.run_batch(&indexed_specs(2), &fixed(2, 64)).unwrap();

    assert!(!results[0].is_ok());
    assert!(results[1].is_ok());
    assert_eq!(sync_count(&mock.ledger().events), 1);
}

#[test]
fn test_single_asset_failure_surfaces_as_error() {
    let (mut engine, _mock) = engine_with_mock(
        1,
        16,
        Faults {
            launch_at: Some(0),
            ..Faults::default()
        },
    );
    let err = engine
        .run_samples(OptionSpec::call(100.0, 100.0, 0.05, 0.0, 0.2, 1.0), 64)
        .unwrap_err();
    assert_eq!(
        err,
        AccelError::Compute(ComputeError::KernelFailed {
            asset: 0,
            status: BindingStatus::FAILED,
        })
    );
}

#[test]
fn test_barrier_failure_aborts_call() {
    let (mut engine, mock) = engine_with_mock(
        2,
        16,
        Faults {
            synchronize: true,
            ..Faults::default()
        },
    );
    let err = engine
        .run_batch(&indexed_specs(4), &fixed(4, 64))
        .unwrap_err();

    assert_eq!(
        err,
        AccelError::SynchronizeFailed {
            round: 0,
            status: BindingStatus::FAILED,
        }
    );
    assert_eq!(mock.ledger().count(|e| matches!(e, Event::Read { .. })), 0);
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_oversized_batch_rejected_without_device_calls() {
    let (mut engine, mock) = engine_with_mock(2, 4, Faults::default());
    let before = mock.ledger().events.len();

    let err = engine
        .run_batch(&indexed_specs(5), &fixed(5, 64))
        .unwrap_err();

    assert_eq!(
        err,
        AccelError::Validation(ValidationError::BatchSizeExceeded {
            requested: 5,
            max: 4,
        })
    );
    assert_eq!(mock.ledger().events.len(), before);
}

#[test]
fn test_column_length_mismatch_rejected_without_device_calls() {
    let (mut engine, mock) = engine_with_mock(2, 16, Faults::default());
    let before = mock.ledger().events.len();

    let types = [OptionType::Call; 3];
    let short = [1.0; 2];
    let full = [1.0; 3];
    let columns = AssetColumns {
        option_type: &types,
        stock_price: &full,
        strike_price: &full,
        risk_free_rate: &full,
        dividend_yield: &full,
        volatility: &short,
        time_to_maturity: &full,
    };
    let err = engine
        .run_batch_samples(&columns, &[64; 3], 3)
        .unwrap_err();

    assert_eq!(
        err,
        AccelError::Validation(ValidationError::ArrayLengthMismatch {
            field: "volatility",
            expected: 3,
            actual: 2,
        })
    );
    assert_eq!(mock.ledger().events.len(), before);
}

#[test]
fn test_zero_samples_rejected() {
    let (mut engine, mock) = engine_with_mock(1, 16, Faults::default());
    let err = engine
        .run_samples(OptionSpec::call(100.0, 100.0, 0.05, 0.0, 0.2, 1.0), 0)
        .unwrap_err();

    assert!(matches!(
        err,
        AccelError::Validation(ValidationError::InvalidCriterion { asset: 0, .. })
    ));
    assert!(mock.ledger().launches().is_empty());
}

// ============================================================================
// Timing and seeds
// ============================================================================

#[test]
fn test_last_run_time_tracks_most_recent_run() {
    let (mut engine, mock) = engine_with_mock(1, 16, Faults::default());
    assert_eq!(engine.last_run_time(), Duration::ZERO);

    mock.ledger().sync_delay = Duration::from_millis(30);
    engine.run_batch(&indexed_specs(1), &fixed(1, 64)).unwrap();
    let slow = engine.last_run_time();
    assert!(slow >= Duration::from_millis(30));
    assert!(slow < Duration::from_secs(5));

    mock.ledger().sync_delay = Duration::from_millis(1);
    engine.run_batch(&indexed_specs(1), &fixed(1, 64)).unwrap();
    let fast = engine.last_run_time();
    assert!(fast >= Duration::from_millis(1));
    assert!(fast < slow);
    assert_eq!(engine.last_run_micros(), fast.as_micros());
}

#[test]
fn test_every_launch_gets_a_fresh_seed() {
    let (mut engine, mock) = engine_with_mock(2, 16, Faults::default());
    engine.run_batch(&indexed_specs(4), &fixed(4, 64)).unwrap();
    engine.run_batch(&indexed_specs(4), &fixed(4, 64)).unwrap();

    let seeds = mock.ledger().written_seeds();
    assert_eq!(seeds.len(), 8);
    // Two runs of the same batch hit the same slots but not the same seeds
    assert_ne!(seeds[..4], seeds[4..]);
}

#[test]
fn test_seed_written_at_launch_offset() {
    let (mut engine, mock) = engine_with_mock(2, 8, Faults::default());
    engine.run_batch(&indexed_specs(3), &fixed(3, 64)).unwrap();

    let l = mock.ledger();
    let write_offsets: Vec<usize> = l
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Write { offset, seeds } => {
                assert_eq!(seeds.len(), 1);
                Some(*offset)
            }
            _ => None,
        })
        .collect();
    let launch_offsets: Vec<usize> = l.launches().iter().map(|a| a.seed_offset).collect();
    assert_eq!(write_offsets, launch_offsets);
    // max_assets_per_slot = 4: slot 1 starts at word 4
    assert_eq!(write_offsets, vec![0, 4, 1]);
}
