//! Property-based tests for grid enumeration, identities and invocations.
//!
//! - Cartesian enumeration visits every combination exactly once
//! - Identities are injective, or the grid is rejected as ambiguous
//! - Paths reach the engine as single, untouched arguments

use proptest::prelude::*;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use topic_sweep::{
    Dimension, GridPoint, HyperparameterGrid, ParamValue, RunArtifactSet, Sweep, SweepConfig,
    derive_all,
};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Distinct positive values for one dimension.
fn arb_axis() -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::btree_set(1u64..5000, 1..5).prop_map(|s| s.into_iter().collect())
}

/// A grid of one to four integer dimensions.
fn arb_grid() -> impl Strategy<Value = HyperparameterGrid> {
    proptest::collection::vec(arb_axis(), 1..=4).prop_map(|axes| {
        let dims = axes
            .into_iter()
            .enumerate()
            .map(|(i, values)| {
                Dimension::new(
                    format!("dim{i}"),
                    format!("--dim-{i}"),
                    format!("d{i}"),
                    values.into_iter().map(ParamValue::Int).collect(),
                )
            })
            .collect();
        HyperparameterGrid::new(dims).unwrap()
    })
}

/// Integers, floats (some integral, so `5.0` renders like `5`) and short
/// texts that may contain the `-` separator. Small ranges make aliasing
/// common.
fn arb_mixed_value() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        (0u64..12).prop_map(ParamValue::Int),
        (0u64..12).prop_map(|v| ParamValue::Float(v as f64)),
        (0u64..12, 1u64..4).prop_map(|(v, q)| ParamValue::Float(v as f64 + q as f64 / 4.0)),
        "[0-9ab]{1,2}(-[0-9ab]{1,2})?".prop_map(ParamValue::Text),
    ]
}

/// Suffixes, empty or containing the separator included.
fn arb_suffix() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), "[ab-]{1,2}"]
}

/// A grid of one to three dimensions with mixed value types.
fn arb_mixed_grid() -> impl Strategy<Value = HyperparameterGrid> {
    proptest::collection::vec(
        (proptest::collection::vec(arb_mixed_value(), 1..4), arb_suffix()),
        1..=3,
    )
    .prop_map(|axes| {
        let dims = axes
            .into_iter()
            .enumerate()
            .map(|(i, (values, suffix))| {
                Dimension::new(format!("dim{i}"), format!("--dim-{i}"), suffix, values)
            })
            .collect();
        HyperparameterGrid::new(dims).unwrap()
    })
}

/// The identity template written out independently: `{value}{suffix}`
/// joined with `-`.
fn render(point: &GridPoint, grid: &HyperparameterGrid) -> String {
    grid.dimensions()
        .iter()
        .map(|d| format!("{}{}", point.get(&d.name).unwrap(), d.suffix))
        .collect::<Vec<_>>()
        .join("-")
}

/// Path segments with shell metacharacters, spaces and quotes.
fn arb_hostile_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ;&|$`'\"()<>*?~!#-]{1,24}"
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the number of points is the product of the axis lengths
    #[test]
    fn prop_grid_visits_product_of_sizes(grid in arb_grid()) {
        let expected: usize = grid.dimensions().iter().map(|d| d.values.len()).product();
        prop_assert_eq!(grid.size(), expected);
        prop_assert_eq!(grid.points().count(), expected);
        prop_assert_eq!(grid.points().len(), expected);
    }

    /// Property: every combination appears exactly once
    #[test]
    fn prop_grid_points_are_distinct(grid in arb_grid()) {
        let rendered: HashSet<String> = grid.points().map(|p| p.to_string()).collect();
        prop_assert_eq!(rendered.len(), grid.size());
    }

    /// Property: the last dimension varies fastest
    #[test]
    fn prop_last_dimension_fastest(grid in arb_grid()) {
        let last = grid.dimensions().last().unwrap();
        let first_values: Vec<ParamValue> = grid
            .points()
            .take(last.values.len())
            .map(|p| p.get(&last.name).unwrap().clone())
            .collect();
        prop_assert_eq!(&first_values, &last.values);
    }

    /// Property: identities are distinct whenever the grid is accepted, and
    /// the grid is rejected exactly when two points render alike
    #[test]
    fn prop_identities_injective_or_rejected(grid in arb_mixed_grid()) {
        let rendered: HashSet<String> = grid.points().map(|p| render(&p, &grid)).collect();
        let aliased = rendered.len() < grid.size();

        match derive_all(&grid) {
            Ok(planned) => {
                prop_assert!(!aliased);
                prop_assert_eq!(planned.len(), grid.size());
                let ids: HashSet<&str> = planned.iter().map(|(_, id)| id.as_str()).collect();
                prop_assert_eq!(ids.len(), grid.size());

                let mut paths = HashSet::new();
                for (_, identity) in &planned {
                    let set = RunArtifactSet::new(Path::new("/models"), identity, None, true);
                    for path in set.paths() {
                        prop_assert!(paths.insert(path.to_path_buf()), "shared path {:?}", path);
                    }
                }
            }
            Err(err) => {
                prop_assert!(aliased, "rejected a grid without aliases: {}", err);
                prop_assert_eq!(err.error_code(), "AMBIGUOUS_IDENTITY");
            }
        }
    }

    /// Property: a repeated value is reported as an ambiguous identity
    #[test]
    fn prop_repeated_value_is_ambiguous(
        mut topics in arb_axis(),
        pick in any::<prop::sample::Index>(),
    ) {
        let dup = topics[pick.index(topics.len())];
        topics.push(dup);
        let grid = HyperparameterGrid::standard(&topics, &[100], &[10]).unwrap();
        let err = derive_all(&grid).unwrap_err();
        prop_assert_eq!(err.error_code(), "AMBIGUOUS_IDENTITY");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: hostile paths are passed through as single arguments
    #[test]
    fn prop_paths_are_single_arguments(
        engine_dir in arb_hostile_segment(),
        model_dir in arb_hostile_segment(),
    ) {
        let engine = PathBuf::from("/opt").join(&engine_dir).join("mallet");
        let corpus = PathBuf::from("/data").join(&model_dir).join("corpus.mallet");
        let config = SweepConfig::builder()
            .engine_path(&engine)
            .corpus_file(&corpus)
            .model_dir(PathBuf::from("/data").join(&model_dir))
            .num_topics(vec![10, 20])
            .num_iterations(vec![100])
            .optimize_intervals(vec![10])
            .build()
            .unwrap();
        let sweep = Sweep::builder().config(config).without_result_log().build().unwrap();

        let plan = sweep.plan().unwrap();
        prop_assert_eq!(plan.len(), 2);
        let arg_counts: HashSet<usize> = plan.iter().map(|r| r.invocation.args().len()).collect();
        prop_assert_eq!(arg_counts.len(), 1);
        for run in &plan {
            prop_assert_eq!(run.invocation.program(), engine.as_path());
            prop_assert_eq!(run.invocation.value_of("--input"), Some(corpus.as_os_str()));
            let keys = run.invocation.value_of("--output-topic-keys").unwrap();
            let expected = PathBuf::from("/data")
                .join(&model_dir)
                .join(format!("topics-with-words_{}.csv", run.identity));
            prop_assert_eq!(keys, expected.as_os_str());
            prop_assert!(run.invocation.args().iter().all(|a| a != OsStr::new(";")));
        }
    }
}
