use approx::assert_abs_diff_eq;
use chrono::{TimeDelta, TimeZone, Utc};
use ndarray::{Array, ArrayD, IxDyn};

use whitcube::{
    params, whittaker, ApplyConfig, Cadence, Coord, Cube, CubeApplier, Dimension, Error, ErrorKind, Estimator,
    FailureMode, FitOptions, Pipeline, Step, TemporalOutliers, TimeAxis, Timestamp, Whittaker, WhittakerConfig,
};

fn days(offsets: &[i64]) -> Vec<Timestamp> {
    let t0 = Utc.with_ymd_and_hms(2023, 3, 15, 0, 0, 0).unwrap();
    offsets.iter().map(|&d| t0 + TimeDelta::days(d)).collect()
}

const KNOTS: [i64; 8] = [0, 3, 4, 7, 10, 14, 17, 20];

/// `(band, t, x)` cube; band 1 / x 2 is entirely missing.
fn cube() -> Cube {
    let data = Array::from_shape_fn(IxDyn(&[2, KNOTS.len(), 3]), |ix| {
        let (b, t, x) = (ix[0], ix[1], ix[2]);
        if b == 1 && x == 2 {
            f64::NAN
        } else {
            let d = KNOTS[t] as f64;
            (0.3 * d + x as f64).sin() + 0.1 * b as f64 + if t % 2 == 0 { 0.05 } else { -0.05 }
        }
    });
    Cube::new(
        vec![
            Dimension::labels("band", ["red", "nir"]),
            Dimension::time("t", days(&KNOTS)),
            Dimension::labels("x", ["a", "b", "c"]),
        ],
        data,
    )
    .unwrap()
}

fn kernel() -> WhittakerConfig {
    WhittakerConfig::builder().smoothing_lambda(5.0).build().unwrap()
}

#[test]
fn lenient_mode_isolates_failing_series() {
    let c = cube();
    let out = whittaker(&c, None, kernel(), ApplyConfig::default()).unwrap();

    assert_eq!(out.diagnostics.len(), 1);
    assert_eq!(out.diagnostics[&vec![1, 2]], ErrorKind::InsufficientData);
    assert!(c.select(1, &[1, 2]).unwrap().iter().all(|v| v.is_nan()));
    assert!(out.cube.select(1, &[1, 2]).unwrap().iter().all(|v| v.is_nan()));

    // Every other series matches a standalone fit bit for bit.
    let axis = TimeAxis::new(days(&KNOTS)).unwrap();
    let w = Whittaker::new(kernel()).unwrap();
    for b in 0..2 {
        for x in 0..3 {
            if (b, x) == (1, 2) {
                continue;
            }
            let series = c.select(1, &[b, x]).unwrap().to_vec();
            let alone = w.fit_transform(&axis, &series, None, &FitOptions::default()).unwrap();
            assert_eq!(out.cube.select(1, &[b, x]).unwrap().to_vec(), alone.values);
        }
    }
}

#[test]
fn strict_mode_reports_the_failing_index() {
    let cfg = ApplyConfig::default().with_failure_mode(FailureMode::Strict).with_chunk_size(1);
    match whittaker(&cube(), None, kernel(), cfg) {
        Err(Error::Series { index, source }) => {
            assert_eq!(index, vec![1, 2]);
            assert_eq!(source.kind(), ErrorKind::InsufficientData);
        }
        other => panic!("expected a series error, got {other:?}"),
    }
}

#[test]
fn non_time_coordinates_are_preserved() {
    let c = cube();
    let out = whittaker(&c, None, kernel(), ApplyConfig::default().with_cadence(Cadence::days(5))).unwrap();
    assert_eq!(out.cube.dims()[0], c.dims()[0]);
    assert_eq!(out.cube.dims()[2], c.dims()[2]);
    assert_eq!(out.cube.dims()[1].name, "t");
    assert_eq!(out.cube.shape(), &[2, 5, 3]);
    assert_eq!(out.cube.dims()[1].coord, Coord::Time(days(&[0, 5, 10, 15, 20])));
}

#[test]
fn every_cadence_is_a_subsample_of_the_same_curve() {
    let c = cube();
    let native = whittaker(&c, None, kernel(), ApplyConfig::default()).unwrap();
    let daily = whittaker(&c, None, kernel(), ApplyConfig::default().with_cadence(Cadence::days(1))).unwrap();
    let five = whittaker(&c, None, kernel(), ApplyConfig::default().with_cadence(Cadence::days(5))).unwrap();
    let weekly = whittaker(&c, None, kernel(), ApplyConfig::default().with_cadence(Cadence::days(7))).unwrap();
    assert_eq!(daily.cube.shape()[1], 21);
    assert_eq!(five.cube.shape()[1], 5);
    assert_eq!(weekly.cube.shape()[1], 3);

    for (b, x) in [(0, 0), (0, 1), (1, 1)] {
        let n = native.cube.select(1, &[b, x]).unwrap();
        let d = daily.cube.select(1, &[b, x]).unwrap();
        let f = five.cube.select(1, &[b, x]).unwrap();
        let w = weekly.cube.select(1, &[b, x]).unwrap();
        for (k, &day) in KNOTS.iter().enumerate() {
            assert_eq!(n[k], d[day as usize]);
        }
        // Days 5 and 15 are not knots.
        for k in 0..5 {
            assert_eq!(f[k], d[5 * k]);
        }
        for k in 0..3 {
            assert_eq!(w[k], d[7 * k]);
        }
    }
}

#[test]
fn duplicate_timestamps_keep_the_first_observation() {
    let times = days(&[0, 1, 1, 2, 3, 4]);
    let values = [1.0, 2.0, 100.0, 3.0, 4.0, 5.0];
    let data = ArrayD::from_shape_vec(IxDyn(&[1, 6]), values.to_vec()).unwrap();
    let c = Cube::new(vec![Dimension::values("pixel", vec![0.0]), Dimension::time("time", times)], data).unwrap();
    let out = whittaker(&c, None, kernel(), ApplyConfig::default().with_time_dimension("time")).unwrap();
    assert_eq!(out.cube.shape(), &[1, 5]);
    for (z, y) in out.cube.data().iter().zip([1.0, 2.0, 3.0, 4.0, 5.0]) {
        assert_abs_diff_eq!(*z, y, epsilon = 1e-6);
    }
}

#[test]
fn decreasing_timestamps_are_rejected_up_front() {
    let data = ArrayD::zeros(IxDyn(&[3, 2]));
    let c = Cube::new(vec![Dimension::time("t", days(&[0, 2, 1])), Dimension::labels("x", ["a", "b"])], data).unwrap();
    assert!(matches!(whittaker(&c, None, kernel(), ApplyConfig::default()), Err(Error::InvalidInput(_))));
}

#[test]
fn zero_weight_equals_missing_value() {
    let c = cube();
    let mut weights = ArrayD::from_elem(IxDyn(c.shape()), 1.0);
    weights[IxDyn(&[0, 3, 0])] = 0.0;
    let wcube = Cube::new(c.dims().to_vec(), weights).unwrap();
    let weighted = whittaker(&c, Some(&wcube), kernel(), ApplyConfig::default()).unwrap();

    let (dims, mut data) = c.clone().into_parts();
    data[IxDyn(&[0, 3, 0])] = f64::NAN;
    let masked = whittaker(&Cube::new(dims, data).unwrap(), None, kernel(), ApplyConfig::default()).unwrap();
    assert_eq!(weighted.cube.select(1, &[0, 0]).unwrap(), masked.cube.select(1, &[0, 0]).unwrap());
}

#[test]
fn singular_series_is_recorded_and_isolated() {
    let c = cube();
    let (dims, mut data) = c.into_parts();
    let mut weights = ArrayD::from_elem(IxDyn(data.shape()), 1.0);
    // Finite inputs whose product overflows the right-hand side.
    data[IxDyn(&[0, 3, 1])] = 1e300;
    weights[IxDyn(&[0, 3, 1])] = 1e300;
    let c = Cube::new(dims.clone(), data).unwrap();
    let wcube = Cube::new(dims, weights).unwrap();

    let out = whittaker(&c, Some(&wcube), kernel(), ApplyConfig::default().with_chunk_size(2)).unwrap();
    assert_eq!(out.diagnostics.len(), 2);
    assert_eq!(out.diagnostics[&vec![0, 1]], ErrorKind::SingularSystem);
    assert_eq!(out.diagnostics[&vec![1, 2]], ErrorKind::InsufficientData);
    assert!(out.cube.select(1, &[0, 1]).unwrap().iter().all(|v| v.is_nan()));
    for ix in [[0usize, 0], [0, 2], [1, 0], [1, 1]] {
        assert!(out.cube.select(1, &ix).unwrap().iter().all(|v| v.is_finite()));
    }

    let strict = ApplyConfig::default().with_failure_mode(FailureMode::Strict);
    match whittaker(&c, Some(&wcube), kernel(), strict) {
        Err(Error::Series { index, source }) => {
            assert_eq!(index, vec![0, 1]);
            assert_eq!(source.kind(), ErrorKind::SingularSystem);
        }
        other => panic!("expected a series error, got {other:?}"),
    }
}

#[test]
fn pipeline_runs_through_the_applier() {
    let pipeline = Pipeline::new(vec![
        ("outliers", Step::from(TemporalOutliers::new("P6D", 2.0).unwrap())),
        ("smooth", Step::from(Whittaker::new(kernel()).unwrap())),
    ])
    .unwrap();
    let pipeline = pipeline.with_params(&params([("smooth__smoothing_lambda", 50.0)])).unwrap();
    let applier = CubeApplier::new(pipeline, ApplyConfig::default().with_cadence(Cadence::days(5))).unwrap();
    let out = applier.apply(&cube(), None).unwrap();
    assert_eq!(out.cube.shape(), &[2, 5, 3]);
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.cube.select(1, &[0, 0]).unwrap().iter().all(|v| v.is_finite()));
}
