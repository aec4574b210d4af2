use interval_math::bootstrap::BootstrapResiduals;
use interval_math::{validate_intervals, IntervalGenerator, MathError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn noisy_fit(seed: u64, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let y_pred: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
    let y_true = y_pred.iter().map(|p| p + noise.sample(&mut rng)).collect();
    (y_true, y_pred)
}

#[test]
fn test_seeded_runs_are_reproducible() {
    let (y_true, y_pred) = noisy_fit(1, 200);

    let mut a = BootstrapResiduals::new(vec![80, 95]).unwrap().with_seed(42);
    let mut b = BootstrapResiduals::new(vec![80, 95]).unwrap().with_seed(42);
    a.fit(&y_true, &y_pred).unwrap();
    b.fit(&y_true, &y_pred).unwrap();

    let forecasts = [120.0, 121.0, 122.0];
    assert_eq!(a.generate(&forecasts).unwrap(), b.generate(&forecasts).unwrap());
}

#[test]
fn test_intervals_bracket_forecast() {
    let (y_true, y_pred) = noisy_fit(2, 500);
    let mut bootstrap = BootstrapResiduals::new(vec![95]).unwrap().with_seed(3);
    bootstrap.fit(&y_true, &y_pred).unwrap();

    let forecasts = [50.0, 60.0];
    let intervals = bootstrap.generate(&forecasts).unwrap();
    let bounds = intervals.bounds(95).unwrap();

    for (i, f) in forecasts.iter().enumerate() {
        assert!(bounds.lower[i] < *f && *f < bounds.upper[i]);
        // roughly ±1.96 sigma for unit normal noise
        let width = bounds.upper[i] - bounds.lower[i];
        assert!(width > 2.5 && width < 5.5, "width {}", width);
    }
}

#[test]
fn test_coverage_on_fresh_noise() {
    let (y_true, y_pred) = noisy_fit(4, 1000);
    let mut bootstrap = BootstrapResiduals::new(vec![90])
        .unwrap()
        .with_iterations(2000)
        .unwrap()
        .with_seed(9);
    bootstrap.fit(&y_true, &y_pred).unwrap();

    let (fresh_true, fresh_pred) = noisy_fit(5, 400);
    let intervals = bootstrap.generate(&fresh_pred).unwrap();
    let bounds = intervals.bounds(90).unwrap();

    let validation = validate_intervals(&fresh_true, &bounds.lower, &bounds.upper, 90).unwrap();
    assert!(validation.calibration_error < 6.0, "{:?}", validation);
}

#[test]
fn test_fit_validation() {
    let mut bootstrap = BootstrapResiduals::new(vec![95]).unwrap();
    assert!(matches!(
        bootstrap.fit(&[1.0, 2.0], &[1.0]),
        Err(MathError::InvalidInput(_))
    ));
    assert!(matches!(
        bootstrap.fit(&[], &[]),
        Err(MathError::InsufficientData(_))
    ));
    assert!(BootstrapResiduals::new(vec![95]).unwrap().with_iterations(0).is_err());
}
