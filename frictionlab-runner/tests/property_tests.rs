//! Property tests for fold layout and grid expansion.
//!
//! Uses proptest to verify:
//! 1. Walk-forward OOS windows are contiguous, non-overlapping and in bounds
//! 2. IS windows end where their OOS window starts (anchored or rolling)
//! 3. Too little data is rejected instead of producing short folds
//! 4. A grid expands to exactly `size()` distinct points drawn from its values

use std::collections::BTreeSet;

use proptest::prelude::*;

use frictionlab_runner::{
    create_folds, ParamGrid, WalkForwardConfig, WalkForwardError, WindowMode, SWEEPABLE_PARAMS,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_window() -> impl Strategy<Value = WindowMode> {
    prop_oneof![Just(WindowMode::Anchored), Just(WindowMode::Rolling)]
}

fn arb_grid() -> impl Strategy<Value = ParamGrid> {
    prop::sample::subsequence(SWEEPABLE_PARAMS.to_vec(), 0..=4).prop_flat_map(|keys| {
        let n = keys.len();
        prop::collection::vec(prop::collection::btree_set(0u32..1_000, 1..4), n).prop_map(
            move |value_sets| {
                keys.iter()
                    .zip(value_sets)
                    .fold(ParamGrid::new(), |grid, (key, values)| {
                        grid.with(*key, values.into_iter().map(f64::from).collect())
                    })
            },
        )
    })
}

fn wf_config(n_folds: usize, min_is: usize, min_oos: usize, window: WindowMode) -> WalkForwardConfig {
    WalkForwardConfig {
        n_folds,
        min_is_bars: min_is,
        min_oos_bars: min_oos,
        window,
        ..WalkForwardConfig::default()
    }
}

// ── Fold layout ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn oos_windows_tile_the_data(
        n_folds in 1usize..8,
        min_is in 1usize..120,
        min_oos in 1usize..40,
        extra in 0usize..200,
        window in arb_window(),
    ) {
        let total = min_is + n_folds * min_oos + extra;
        let folds = create_folds(total, &wf_config(n_folds, min_is, min_oos, window)).unwrap();

        prop_assert_eq!(folds.len(), n_folds);
        prop_assert_eq!(folds[0].oos_start, min_is);
        for (i, fold) in folds.iter().enumerate() {
            prop_assert_eq!(fold.fold_index, i);
            prop_assert_eq!(fold.is_end, fold.oos_start);
            prop_assert!(fold.oos_end - fold.oos_start >= min_oos);
            prop_assert!(fold.oos_end <= total);
            match window {
                WindowMode::Anchored => prop_assert_eq!(fold.is_start, 0),
                WindowMode::Rolling => prop_assert_eq!(fold.is_end - fold.is_start, min_is),
            }
        }
        for pair in folds.windows(2) {
            prop_assert_eq!(pair[0].oos_end, pair[1].oos_start);
        }
    }

    #[test]
    fn short_data_is_rejected(
        n_folds in 1usize..8,
        min_is in 1usize..120,
        min_oos in 1usize..40,
        shortfall in 1usize..50,
    ) {
        let needed = min_is + n_folds * min_oos;
        let total = needed.saturating_sub(shortfall);
        let result = create_folds(total, &wf_config(n_folds, min_is, min_oos, WindowMode::Anchored));
        let is_insufficient = matches!(
            result,
            Err(WalkForwardError::InsufficientData { min_bars, .. }) if min_bars == needed
        );
        prop_assert!(is_insufficient);
    }
}

// ── Grid expansion ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn grid_points_match_size(grid in arb_grid()) {
        let points = grid.points();
        prop_assert_eq!(points.len(), grid.size());

        let distinct: BTreeSet<Vec<u64>> = points
            .iter()
            .map(|p| p.values().map(|v| v.to_bits()).collect())
            .collect();
        prop_assert_eq!(distinct.len(), points.len());

        for point in &points {
            prop_assert_eq!(point.len(), grid.params().len());
            for (key, value) in point {
                prop_assert!(grid.params()[key].contains(value));
            }
        }
    }
}
