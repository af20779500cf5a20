//! Policy selection, nomination and hypothesis management through the grid.

use approx::assert_relative_eq;
use cube_core::{Extractor, Grid, CubeError, Params, ParamsBuilder, SurfaceKind};
use rstest::rstest;

const NO_DATA: f32 = 1.0e6;

fn params(extractor: Extractor) -> Params {
    ParamsBuilder::new()
        .median_length(3)
        .extractor(extractor)
        .context(1.0, 3.0)
        .build(1.0, 1.0, NO_DATA)
        .unwrap()
}

/// 5x5 grid with a contested center node: two seeded tracks at -10 m and
/// -30 m, one sample each.
fn contested_grid() -> Grid {
    let mut g = Grid::new(5, 5, 1.0, 1.0, SurfaceKind::Depth).unwrap();
    g.add_hypothesis(2, 2, -10.0, 0.01).unwrap();
    g.add_hypothesis(2, 2, -30.0, 0.01).unwrap();
    g
}

#[test]
fn prior_tie_goes_to_the_oldest_track() {
    let p = params(Extractor::Prior);
    let mut g = Grid::new(3, 3, 1.0, 1.0, SurfaceKind::Depth).unwrap();
    g.add_hypothesis(1, 1, -30.0, 0.01).unwrap();
    g.add_hypothesis(1, 1, -10.0, 0.01).unwrap();
    let depth = g.surface(SurfaceKind::Depth, &p);
    // Equal single-sample counts: the older track (-30 m) wins the tie
    assert_relative_eq!(depth[4], -30.0);
}

#[rstest]
#[case(Extractor::Likelihood)]
#[case(Extractor::Posterior)]
fn guide_search_steers_contested_nodes(#[case] extractor: Extractor) {
    let p = params(extractor);
    let mut g = contested_grid();
    // Single-hypothesis guide two rings out
    g.add_hypothesis(2, 0, -30.0, 0.01).unwrap();
    let depth = g.surface(SurfaceKind::Depth, &p);
    assert_relative_eq!(depth[2 * 5 + 2], -30.0, epsilon = 1e-6);
}

#[test]
fn first_annulus_with_a_guide_wins() {
    let p = params(Extractor::Likelihood);
    let mut g = contested_grid();
    // Ring 1 guide says -10, ring 2 guide says -30: the closer ring decides
    g.add_hypothesis(1, 2, -10.0, 0.01).unwrap();
    g.add_hypothesis(2, 4, -30.0, 0.01).unwrap();
    let depth = g.surface(SurfaceKind::Depth, &p);
    assert_relative_eq!(depth[2 * 5 + 2], -10.0, epsilon = 1e-6);
}

#[test]
fn no_guide_in_range_falls_back_to_prior() {
    let p = params(Extractor::Likelihood);
    let mut g = Grid::new(3, 3, 1.0, 1.0, SurfaceKind::Depth).unwrap();
    g.add_hypothesis(1, 1, -30.0, 0.01).unwrap();
    g.add_hypothesis(1, 1, -10.0, 0.01).unwrap();
    let depth = g.surface(SurfaceKind::Depth, &p);
    // Tie on samples resolves to the older -30 m track, as PRIOR would
    assert_relative_eq!(depth[4], -30.0);
}

#[test]
fn predsurf_uses_the_nodes_own_prior_as_guide() {
    let p = params(Extractor::PredSurf);
    let mut g = Grid::new(3, 3, 1.0, 1.0, SurfaceKind::Depth).unwrap();
    let data = vec![
        NO_DATA, NO_DATA, NO_DATA, //
        NO_DATA, -11.0, NO_DATA, //
        NO_DATA, NO_DATA, NO_DATA,
    ];
    g.initialise(&data, cube_core::PriorUncertainty::FixedSdev(1.0), None, 3, &p)
        .unwrap();
    g.add_hypothesis(1, 1, -30.0, 0.01).unwrap();
    g.add_hypothesis(1, 1, -10.0, 0.01).unwrap();
    let depth = g.surface(SurfaceKind::Depth, &p);
    assert_relative_eq!(depth[4], -10.0, epsilon = 1e-6);
}

#[test]
fn nomination_overrides_every_policy_until_reset() {
    let p = params(Extractor::Likelihood);
    let mut g = contested_grid();
    g.nominate(2, 2, -30.0).unwrap();
    let depth = g.surface(SurfaceKind::Depth, &p);
    assert_relative_eq!(depth[12], -30.0);
    let ratio = g.surface(SurfaceKind::StrengthRatio, &p);
    assert_eq!(ratio[12], 0.0);

    g.unnominate(2, 2).unwrap();
    let node = g.hypotheses_at(2, 2, 0.0, 0.0, &p).unwrap();
    assert_eq!(node.nominated, None);
}

#[test]
fn renomination_is_equivalent_to_a_fresh_nomination() {
    let p = params(Extractor::Likelihood);
    let mut g = contested_grid();
    g.nominate(2, 2, -10.0).unwrap();
    g.unnominate(2, 2).unwrap();
    g.nominate(2, 2, -30.0).unwrap();
    let direct = g.hypotheses_at(2, 2, 0.0, 0.0, &p).unwrap().nominated;

    let mut fresh = contested_grid();
    fresh.nominate(2, 2, -30.0).unwrap();
    let once = fresh.hypotheses_at(2, 2, 0.0, 0.0, &p).unwrap().nominated;
    assert_eq!(direct, once);
}

#[test]
fn removal_errors_are_typed() {
    let mut g = Grid::new(2, 2, 1.0, 1.0, SurfaceKind::Depth).unwrap();
    g.add_hypothesis(0, 0, -10.0, 0.01).unwrap();
    assert!(matches!(
        g.remove_hypothesis(0, 0, -12.0),
        Err(CubeError::NotFound { .. })
    ));
    g.add_hypothesis(0, 0, -10.004, 0.01).unwrap();
    assert!(matches!(
        g.remove_hypothesis(0, 0, -10.0),
        Err(CubeError::AmbiguousMatch { .. })
    ));
}

#[test]
fn count_surface_reports_reportable_tracks() {
    let p = params(Extractor::Prior);
    let mut g = Grid::new(2, 1, 1.0, 1.0, SurfaceKind::HypothesisCount).unwrap();
    g.add_hypothesis(0, 0, -10.0, 0.01).unwrap();
    g.add_hypothesis(0, 0, -30.0, 0.01).unwrap();
    let count = g.surface(SurfaceKind::HypothesisCount, &p);
    assert_eq!(count, vec![2.0, NO_DATA]);
    // Cached kind matches: a second read serves the cache
    let again = g.surface(SurfaceKind::HypothesisCount, &p);
    assert_eq!(count, again);
}

#[test]
fn triple_extraction_matches_single_scalar_reads() {
    let p = params(Extractor::Likelihood);
    let mut g = contested_grid();
    g.add_hypothesis(2, 0, -30.0, 0.01).unwrap();
    let all = g.surfaces(&p);
    let depth = g.surface(SurfaceKind::Depth, &p);
    let unct = g.surface(SurfaceKind::Uncertainty, &p);
    let ratio = g.surface(SurfaceKind::StrengthRatio, &p);
    assert_eq!(all.depth, depth);
    assert_eq!(all.uncertainty, unct);
    assert_eq!(all.ratio, ratio);

    let (d2, u2) = g.depth_and_uncertainty(&p);
    assert_eq!(d2, depth);
    assert_eq!(u2, unct);
}
