// Copyright © 2025 Hs293Go
//
// Permission is hereby granted, free of charge, to any person obtaining
// a copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included
// in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES
// OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT.
// IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM,
// DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT,
// TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE
// OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use fixtures::test_twiddle;

use twiddle_pid::pid::{Gain, Gains};
use twiddle_pid::twiddle::*;

mod test_twiddle_config {

    use core::f64;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = TwiddleConfig::<f64>::default();
        assert_eq!(config.run_length(), 100);
        assert_eq!(config.initial_magnitudes(), Gains::new(1.0, 1.0, 1.0));
        assert_eq!(config.tolerance(), 0.2);
        assert_eq!(config.divergence(), None);
        assert_eq!(config.growth_factor(), GROWTH_FACTOR);
        assert_eq!(config.shrink_factor(), SHRINK_FACTOR);
    }

    #[test]
    fn test_run_length() {
        let mut config = TwiddleConfig::<f64>::default();
        assert!(config.set_run_length(700).is_ok());
        assert_eq!(config.run_length(), 700);

        assert_eq!(
            config.set_run_length(0),
            Err(TwiddleConfigError::InvalidRunLength)
        );
        assert_eq!(config.run_length(), 700);

        assert_eq!(
            TwiddleConfigBuilder::<f64>::default()
                .run_length(0)
                .build()
                .map(|_| ()),
            Err(TwiddleConfigError::InvalidRunLength)
        );
    }

    const INVALID_MAGNITUDES: &[f64; 4] = &[0.0, -0.1, f64::INFINITY, f64::NAN];

    #[test]
    fn test_initial_magnitudes() {
        let mut config = TwiddleConfig::<f64>::default();
        assert!(config.set_initial_magnitudes(0.1, 0.001, 1.0).is_ok());
        assert_eq!(config.initial_magnitudes(), Gains::new(0.1, 0.001, 1.0));

        for it in INVALID_MAGNITUDES {
            assert_eq!(
                config.set_initial_magnitudes(0.1, *it, 1.0),
                Err(TwiddleConfigError::InvalidPerturbation)
            );
            assert_eq!(config.initial_magnitudes(), Gains::new(0.1, 0.001, 1.0));

            assert_eq!(
                TwiddleConfigBuilder::default()
                    .initial_magnitudes(*it, 1.0, 1.0)
                    .build()
                    .map(|_| ()),
                Err(TwiddleConfigError::InvalidPerturbation)
            );
        }
    }

    #[test]
    fn test_tolerance() {
        let mut config = TwiddleConfig::<f64>::default();
        assert!(config.set_tolerance(0.0).is_ok());
        assert!(config.set_tolerance(f64::INFINITY).is_ok());
        for it in [-0.1, f64::NAN] {
            assert_eq!(
                config.set_tolerance(it),
                Err(TwiddleConfigError::InvalidTolerance)
            );
        }
        assert_eq!(config.tolerance(), f64::INFINITY);
    }

    #[test]
    fn test_divergence() {
        let built = TwiddleConfigBuilder::default().divergence(50, 3.0).build();
        assert_eq!(
            built.map(|config| config.divergence()),
            Ok(Some(Divergence {
                grace_samples: 50,
                threshold: 3.0
            }))
        );

        for it in [0.0, -1.0, f64::NAN] {
            assert_eq!(
                TwiddleConfigBuilder::default()
                    .divergence(50, it)
                    .build()
                    .map(|_| ()),
                Err(TwiddleConfigError::InvalidDivergenceThreshold)
            );
        }

        let mut config = built.unwrap();
        assert!(config.set_divergence(None).is_ok());
        assert_eq!(config.divergence(), None);
    }

    #[test]
    fn test_growth_and_shrink_factors() {
        for it in [1.0, 0.5, f64::INFINITY, f64::NAN] {
            assert_eq!(
                TwiddleConfigBuilder::default()
                    .growth_factor(it)
                    .build()
                    .map(|_| ()),
                Err(TwiddleConfigError::InvalidGrowthFactor)
            );
        }
        for it in [0.0, 1.0, 1.5, f64::NAN] {
            assert_eq!(
                TwiddleConfigBuilder::default()
                    .shrink_factor(it)
                    .build()
                    .map(|_| ()),
                Err(TwiddleConfigError::InvalidShrinkFactor)
            );
        }

        let config = TwiddleConfigBuilder::default()
            .growth_factor(1.5)
            .shrink_factor(0.5)
            .build()
            .unwrap();
        assert_eq!(config.growth_factor(), 1.5);
        assert_eq!(config.shrink_factor(), 0.5);
    }
}

mod test_run_boundary {

    use super::test_twiddle::make_tuner;
    use super::*;

    #[test]
    fn test_run_ends_after_run_length() {
        let mut tw = make_tuner(10);

        for i in 1..=10 {
            let done = tw.observe(5.0);
            assert_eq!(tw.samples_in_run(), i);
            assert_eq!(done, i == 10);
        }

        assert_eq!(tw.accumulated_squared_error(), 250.0);
        assert_eq!(tw.average_error(), Some(2.5));
    }

    #[test]
    fn test_boundary_triggers_exactly_once_per_run() {
        let mut tw = make_tuner(10);
        let mut gains = Gains::default();

        let reports: Vec<_> = (1..=25)
            .filter_map(|i| tw.update(5.0, &mut gains).map(|report| (i, report)))
            .collect();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, 10);
        assert_eq!(reports[1].0, 20);
        for (_, report) in &reports {
            assert_eq!(report.samples, 10);
            assert_eq!(report.average_error, 2.5);
        }
        assert_eq!(reports[0].1.iteration, 0);
        assert_eq!(reports[1].1.iteration, 1);
        assert_eq!(tw.iteration_count(), 2);

        // The third run is under way
        assert_eq!(tw.samples_in_run(), 5);
        assert_eq!(tw.accumulated_squared_error(), 125.0);
    }

    #[test]
    fn test_counters_reset_between_runs() {
        let mut tw = make_tuner(4);
        let mut gains = Gains::default();
        for _ in 0..4 {
            tw.update(2.0, &mut gains);
        }
        assert_eq!(tw.samples_in_run(), 0);
        assert_eq!(tw.accumulated_squared_error(), 0.0);
        assert_eq!(tw.average_error(), None);
    }

    #[test]
    fn test_divergence_ends_run_early() {
        let config = TwiddleConfigBuilder::default()
            .run_length(100)
            .divergence(5, 2.0)
            .build()
            .unwrap();
        let mut tw = Twiddle::new(config);

        // The grace period shields the first samples
        for _ in 0..5 {
            assert!(!tw.observe(3.0));
        }
        assert!(tw.observe(-3.0));

        let mut gains = Gains::default();
        let report = tw.complete_run(&mut gains).unwrap();
        assert_eq!(report.samples, 6);
        assert_eq!(report.average_error, 54.0 / 36.0);
    }

    #[test]
    fn test_small_errors_do_not_diverge() {
        let config = TwiddleConfigBuilder::default()
            .run_length(20)
            .divergence(5, 2.0)
            .build()
            .unwrap();
        let mut tw = Twiddle::new(config);

        for i in 1..=20 {
            assert_eq!(tw.observe(1.9), i == 20);
        }
    }

    #[test]
    fn test_empty_run_is_a_no_op() {
        let mut tw = make_tuner(10);
        let mut gains = Gains::new(0.1, 0.2, 0.3);

        assert!(tw.complete_run(&mut gains).is_none());
        assert_eq!(gains, Gains::new(0.1, 0.2, 0.3));
        assert_eq!(tw.phase(), Phase::Baseline);
        assert_eq!(tw.iteration_count(), 0);
        assert_eq!(tw.best_error(), f64::INFINITY);
    }
}

mod test_search {

    use super::test_twiddle::make_tuner;
    use super::*;

    use approx::assert_relative_eq;

    /// Starts a tuner from zero gains and completes its baseline run.
    fn baselined(best_error: f64) -> (Twiddle<f64>, Gains<f64>) {
        let mut tw = make_tuner(10);
        let mut gains = Gains::default();
        assert_eq!(tw.search_step(best_error, &mut gains), Verdict::Baseline);
        (tw, gains)
    }

    #[test]
    fn test_baseline_run() {
        let mut tw = make_tuner(10);
        let mut gains = Gains::default();
        assert_eq!(tw.phase(), Phase::Baseline);
        assert!(!tw.is_initialized());
        assert_eq!(tw.best_error(), f64::INFINITY);
        assert_eq!(tw.best_gains(), None);

        let report = (0..10).find_map(|_| tw.update(5.0, &mut gains)).unwrap();

        assert_eq!(report.verdict, Verdict::Baseline);
        assert_eq!(report.gain, Gain::Kp);
        assert!(tw.is_initialized());
        assert_eq!(tw.best_error(), 2.5);
        assert_eq!(tw.best_gains(), Some(Gains::new(0.0, 0.0, 0.0)));

        // Nothing reversed or shrunk
        for p in tw.perturbations() {
            assert_eq!(p.magnitude(), 1.0);
            assert_eq!(p.direction(), Direction::Forward);
        }

        // The first forward trial is applied for the next run
        assert_eq!(tw.phase(), Phase::ForwardTry);
        assert_eq!(tw.active_gain(), Gain::Kp);
        assert_eq!(gains, Gains::new(1.0, 0.0, 0.0));
        assert_eq!(report.gains, gains);
    }

    #[test]
    fn test_forward_improvement_is_accepted() {
        let (mut tw, mut gains) = baselined(2.5);

        assert_eq!(tw.search_step(1.0, &mut gains), Verdict::Accept);

        assert_eq!(tw.best_error(), 1.0);
        assert_eq!(tw.best_gains(), Some(Gains::new(1.0, 0.0, 0.0)));
        assert_relative_eq!(tw.perturbation(Gain::Kp).magnitude(), 1.1);
        assert_eq!(tw.perturbation(Gain::Kp).direction(), Direction::Forward);

        // Kp keeps its step, Ki starts its forward trial
        assert_eq!(tw.active_gain(), Gain::Ki);
        assert_eq!(tw.phase(), Phase::ForwardTry);
        assert_eq!(gains, Gains::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_backward_improvement_is_accepted() {
        let (mut tw, mut gains) = baselined(2.5);

        assert_eq!(tw.search_step(3.0, &mut gains), Verdict::Reverse);
        assert_eq!(tw.phase(), Phase::BackwardTry);
        assert_eq!(tw.perturbation(Gain::Kp).direction(), Direction::Backward);
        assert_eq!(gains, Gains::new(-1.0, 0.0, 0.0));
        // A failed forward trial neither grows nor shrinks the step
        assert_eq!(tw.perturbation(Gain::Kp).magnitude(), 1.0);
        assert_eq!(tw.best_error(), 2.5);

        assert_eq!(tw.search_step(2.0, &mut gains), Verdict::Accept);
        assert_eq!(tw.best_error(), 2.0);
        assert_relative_eq!(tw.perturbation(Gain::Kp).magnitude(), 1.1);
        assert_eq!(tw.perturbation(Gain::Kp).direction(), Direction::Forward);
        assert_eq!(tw.active_gain(), Gain::Ki);
        assert_eq!(gains, Gains::new(-1.0, 1.0, 0.0));
    }

    #[test]
    fn test_both_directions_failing_restores_gain() {
        let mut tw = make_tuner(10);
        let mut gains = Gains::new(0.2, 0.004, 3.0);
        tw.search_step(2.5, &mut gains);
        let sum_before = tw.magnitude_sum();

        assert_eq!(tw.search_step(3.0, &mut gains), Verdict::Reverse);
        assert_eq!(tw.search_step(2.6, &mut gains), Verdict::Reject);

        // Net zero change on Kp, and its step shrunk by exactly the shrink factor
        assert_relative_eq!(gains.kp, 0.2, epsilon = 1e-12);
        assert_eq!(tw.perturbation(Gain::Kp).magnitude(), 1.0 * SHRINK_FACTOR);
        assert_eq!(tw.perturbation(Gain::Kp).direction(), Direction::Forward);
        assert!(tw.magnitude_sum() < sum_before);
        assert_eq!(tw.best_error(), 2.5);
        assert_eq!(tw.best_gains(), Some(Gains::new(0.2, 0.004, 3.0)));

        // Ki starts its forward trial
        assert_eq!(tw.active_gain(), Gain::Ki);
        assert_relative_eq!(gains.ki, 1.004, epsilon = 1e-12);
        assert_eq!(gains.kd, 3.0);
    }

    #[test]
    fn test_dimensions_cycle() {
        let (mut tw, mut gains) = baselined(2.5);
        let mut visited = vec![];
        let mut best = 2.5;
        for _ in 0..6 {
            visited.push(tw.active_gain());
            best /= 2.0;
            assert_eq!(tw.search_step(best, &mut gains), Verdict::Accept);
        }
        assert_eq!(
            visited,
            vec![Gain::Kp, Gain::Ki, Gain::Kd, Gain::Kp, Gain::Ki, Gain::Kd]
        );
    }

    #[test]
    fn test_best_error_is_non_increasing() {
        let (mut tw, mut gains) = baselined(1.0);
        let errors = [
            1.2, 0.9, 0.95, 0.91, 0.7, 0.8, 0.75, 0.69, 0.72, 0.74, 0.5, 0.6, 0.6, 0.4,
        ];

        let mut best = tw.best_error();
        for error in errors {
            let verdict = tw.search_step(error, &mut gains);
            if verdict == Verdict::Accept {
                assert!(tw.best_error() < best);
            } else {
                assert_eq!(tw.best_error(), best);
            }
            best = tw.best_error();
        }
        assert_eq!(tw.best_error(), 0.4);
    }

    #[test]
    fn test_rejections_shrink_until_converged() {
        let config = TwiddleConfigBuilder::default()
            .initial_magnitudes(0.1, 0.001, 1.0)
            .tolerance(0.2)
            .build()
            .unwrap();
        let mut tw = Twiddle::new(config);
        let start = Gains::new(0.2, 0.004, 3.0);
        let mut gains = start;
        tw.search_step(1.0, &mut gains);

        let mut sum = tw.magnitude_sum();
        let mut rejections = 0;
        while !tw.converged() {
            // Nothing ever beats the baseline
            if tw.search_step(2.0, &mut gains) == Verdict::Reject {
                rejections += 1;
                assert!(tw.magnitude_sum() < sum);
                sum = tw.magnitude_sum();
            }
            assert!(rejections < 1000, "Expected the search to converge");
        }

        assert!(tw.magnitude_sum() < 0.2);
        // Only the pending forward trial separates the gains from where they started
        let active = tw.active_gain();
        let mut expected = start;
        expected[active] = expected[active] + tw.perturbation(active).magnitude();
        assert_relative_eq!(gains.kp, expected.kp, epsilon = 1e-9);
        assert_relative_eq!(gains.ki, expected.ki, epsilon = 1e-9);
        assert_relative_eq!(gains.kd, expected.kd, epsilon = 1e-9);
        assert_eq!(tw.best_gains(), Some(start));
    }

    #[test]
    fn test_single_precision_tuner() {
        let mut tw = Twiddle::<f32>::new(TwiddleConfig::default());
        let mut gains = Gains::<f32>::default();
        tw.search_step(2.5, &mut gains);
        tw.search_step(3.0, &mut gains);
        tw.search_step(3.0, &mut gains);
        assert_eq!(gains.kp, 0.0);
        assert_eq!(tw.perturbation(Gain::Kp).magnitude(), 0.9f32);
    }
}
