// Online coordinate-descent (Twiddle) tuning of PID gains
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

use core::fmt::Debug;

use log::{debug, info, trace};
use num_traits::float::FloatCore;

use crate::pid::{Gain, Gains};

/// Factor applied to a perturbation magnitude after a trial improved the best error.
pub const GROWTH_FACTOR: f64 = 1.1;

/// Factor applied to a perturbation magnitude after both trial directions failed.
pub const SHRINK_FACTOR: f64 = 0.9;

/// Converts an `f64` constant into `F`. Every `FloatCore` type in practice (`f32`, `f64`) can
/// represent these constants; anything else degrades to NaN rather than panicking.
#[inline]
fn constant<F: FloatCore>(value: f64) -> F {
    F::from(value).unwrap_or_else(F::nan)
}

/// Errors raised when validating a [`TwiddleConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum TwiddleConfigError {
    /// The run length is zero.
    #[cfg_attr(feature = "std", error("Run length must be at least one sample"))]
    InvalidRunLength,

    /// An initial perturbation magnitude is not strictly positive and finite.
    #[cfg_attr(
        feature = "std",
        error("Initial perturbation magnitudes must be positive and finite")
    )]
    InvalidPerturbation,

    /// The convergence tolerance is negative or NaN.
    #[cfg_attr(feature = "std", error("Tolerance must be non-negative"))]
    InvalidTolerance,

    /// The divergence threshold is not strictly positive, or is NaN.
    #[cfg_attr(feature = "std", error("Divergence threshold must be positive"))]
    InvalidDivergenceThreshold,

    /// The growth factor is not finite and greater than one.
    #[cfg_attr(feature = "std", error("Growth factor must be finite and greater than one"))]
    InvalidGrowthFactor,

    /// The shrink factor is not strictly between zero and one.
    #[cfg_attr(feature = "std", error("Shrink factor must lie strictly between zero and one"))]
    InvalidShrinkFactor,
}

/// Early termination of a run once the vehicle has clearly left the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divergence<F: FloatCore = f64> {
    /// Number of samples a run must exceed before the divergence check applies.
    pub grace_samples: usize,
    /// Absolute cross-track error beyond which the run is abandoned.
    pub threshold: F,
}

/// Configuration of the [`Twiddle`] tuner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwiddleConfig<F: FloatCore = f64> {
    /// Samples per run. Defaults to 100.
    run_length: usize,

    /// Starting perturbation magnitude of each gain. Defaults to 1.0 for each gain.
    initial_magnitudes: Gains<F>,

    /// The search is considered converged once the magnitudes sum below this value.
    /// Defaults to 0.2.
    tolerance: F,

    /// Optional early termination of diverging runs. Disabled by default.
    divergence: Option<Divergence<F>>,

    /// Defaults to [`GROWTH_FACTOR`].
    growth_factor: F,

    /// Defaults to [`SHRINK_FACTOR`].
    shrink_factor: F,
}

impl<F: FloatCore> Default for TwiddleConfig<F> {
    fn default() -> Self {
        Self {
            run_length: 100,
            initial_magnitudes: Gains::new(F::one(), F::one(), F::one()),
            tolerance: constant(0.2),
            divergence: None,
            growth_factor: constant(GROWTH_FACTOR),
            shrink_factor: constant(SHRINK_FACTOR),
        }
    }
}

impl<F: FloatCore> TwiddleConfig<F> {
    /// Returns the number of samples per run.
    pub fn run_length(&self) -> usize {
        self.run_length
    }

    /// Returns the starting perturbation magnitude of each gain.
    pub fn initial_magnitudes(&self) -> Gains<F> {
        self.initial_magnitudes
    }

    /// Returns the convergence tolerance.
    pub fn tolerance(&self) -> F {
        self.tolerance
    }

    /// Returns the divergence check, if enabled.
    pub fn divergence(&self) -> Option<Divergence<F>> {
        self.divergence
    }

    /// Returns the factor applied to a magnitude after an improvement.
    pub fn growth_factor(&self) -> F {
        self.growth_factor
    }

    /// Returns the factor applied to a magnitude after both directions failed.
    pub fn shrink_factor(&self) -> F {
        self.shrink_factor
    }

    /// Sets the number of samples per run.
    ///
    /// # Returns
    /// - `Err(TwiddleConfigError::InvalidRunLength)` if `run_length` is zero.
    pub fn set_run_length(&mut self, run_length: usize) -> Result<(), TwiddleConfigError> {
        if run_length == 0 {
            return Err(TwiddleConfigError::InvalidRunLength);
        }
        self.run_length = run_length;
        Ok(())
    }

    /// Sets the starting perturbation magnitudes.
    ///
    /// # Returns
    /// - `Err(TwiddleConfigError::InvalidPerturbation)` if any magnitude is not positive or not
    ///   finite.
    pub fn set_initial_magnitudes(&mut self, kp: F, ki: F, kd: F) -> Result<(), TwiddleConfigError> {
        let valid = |m: F| m > F::zero() && m.is_finite();
        if !(valid(kp) && valid(ki) && valid(kd)) {
            return Err(TwiddleConfigError::InvalidPerturbation);
        }
        self.initial_magnitudes = Gains::new(kp, ki, kd);
        Ok(())
    }

    /// Sets the convergence tolerance. Infinity is allowed and makes the search converge
    /// immediately.
    ///
    /// # Returns
    /// - `Err(TwiddleConfigError::InvalidTolerance)` if `tolerance` is negative or NaN.
    pub fn set_tolerance(&mut self, tolerance: F) -> Result<(), TwiddleConfigError> {
        if tolerance.is_nan() || tolerance < F::zero() {
            return Err(TwiddleConfigError::InvalidTolerance);
        }
        self.tolerance = tolerance;
        Ok(())
    }

    /// Enables or disables the divergence check.
    ///
    /// # Returns
    /// - `Err(TwiddleConfigError::InvalidDivergenceThreshold)` if the threshold is not positive.
    pub fn set_divergence(
        &mut self,
        divergence: Option<Divergence<F>>,
    ) -> Result<(), TwiddleConfigError> {
        if let Some(Divergence { threshold, .. }) = divergence {
            if threshold.is_nan() || threshold <= F::zero() {
                return Err(TwiddleConfigError::InvalidDivergenceThreshold);
            }
        }
        self.divergence = divergence;
        Ok(())
    }

    /// Sets the factor applied to a magnitude after an improvement.
    pub fn set_growth_factor(&mut self, growth_factor: F) -> Result<(), TwiddleConfigError> {
        if !growth_factor.is_finite() || growth_factor <= F::one() {
            return Err(TwiddleConfigError::InvalidGrowthFactor);
        }
        self.growth_factor = growth_factor;
        Ok(())
    }

    /// Sets the factor applied to a magnitude after both directions failed.
    pub fn set_shrink_factor(&mut self, shrink_factor: F) -> Result<(), TwiddleConfigError> {
        if shrink_factor.is_nan() || shrink_factor <= F::zero() || shrink_factor >= F::one() {
            return Err(TwiddleConfigError::InvalidShrinkFactor);
        }
        self.shrink_factor = shrink_factor;
        Ok(())
    }
}

/// Builder for [`TwiddleConfig`]. Values are validated all at once in
/// [`TwiddleConfigBuilder::build`].
#[derive(Debug, Clone, Copy)]
pub struct TwiddleConfigBuilder<F: FloatCore = f64> {
    config: TwiddleConfig<F>,
    initial_magnitudes: Gains<F>,
    run_length: usize,
    tolerance: F,
    divergence: Option<Divergence<F>>,
    growth_factor: F,
    shrink_factor: F,
}

impl<F: FloatCore> Default for TwiddleConfigBuilder<F> {
    fn default() -> Self {
        let config = TwiddleConfig::default();
        Self {
            config,
            initial_magnitudes: config.initial_magnitudes,
            run_length: config.run_length,
            tolerance: config.tolerance,
            divergence: config.divergence,
            growth_factor: config.growth_factor,
            shrink_factor: config.shrink_factor,
        }
    }
}

impl<F: FloatCore> TwiddleConfigBuilder<F> {
    /// Sets the number of samples per run.
    pub fn run_length(mut self, run_length: usize) -> Self {
        self.run_length = run_length;
        self
    }

    /// Sets the starting perturbation magnitude of each gain.
    pub fn initial_magnitudes(mut self, kp: F, ki: F, kd: F) -> Self {
        self.initial_magnitudes = Gains::new(kp, ki, kd);
        self
    }

    /// Sets the convergence tolerance.
    pub fn tolerance(mut self, tolerance: F) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Abandons a run once it has more than `grace_samples` samples and the absolute
    /// cross-track error exceeds `threshold`.
    pub fn divergence(mut self, grace_samples: usize, threshold: F) -> Self {
        self.divergence = Some(Divergence {
            grace_samples,
            threshold,
        });
        self
    }

    /// Sets the factor applied to a magnitude after an improvement.
    pub fn growth_factor(mut self, growth_factor: F) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Sets the factor applied to a magnitude after both directions failed.
    pub fn shrink_factor(mut self, shrink_factor: F) -> Self {
        self.shrink_factor = shrink_factor;
        self
    }

    /// Validates the collected values and produces a [`TwiddleConfig`].
    pub fn build(self) -> Result<TwiddleConfig<F>, TwiddleConfigError> {
        let mut config = self.config;
        config.set_run_length(self.run_length)?;
        let (kp, ki, kd) = self.initial_magnitudes.as_tuple();
        config.set_initial_magnitudes(kp, ki, kd)?;
        config.set_tolerance(self.tolerance)?;
        config.set_divergence(self.divergence)?;
        config.set_growth_factor(self.growth_factor)?;
        config.set_shrink_factor(self.shrink_factor)?;
        Ok(config)
    }
}

/// Which way the current trial of a gain is being stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The gain is (or is about to be) raised by the perturbation magnitude.
    Forward,
    /// The forward step failed and the gain now sits one magnitude below its baseline.
    Backward,
}

/// Step magnitude and trial direction of one gain dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perturbation<F: FloatCore = f64> {
    magnitude: F,
    direction: Direction,
}

impl<F: FloatCore> Perturbation<F> {
    fn new(magnitude: F) -> Self {
        Self {
            magnitude,
            direction: Direction::Forward,
        }
    }

    /// The current step magnitude. Always positive.
    pub fn magnitude(&self) -> F {
        self.magnitude
    }

    /// The current trial direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Where the search stands with respect to the active gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No run has completed yet; the next run measures the starting gains.
    Baseline,
    /// The active gain is raised by its magnitude.
    ForwardTry,
    /// The active gain is lowered by its magnitude after the forward trial failed.
    BackwardTry,
}

/// Outcome of judging one completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The run established the reference error.
    Baseline,
    /// The trial improved the best error; the step is kept and grown.
    Accept,
    /// The forward trial failed; the backward trial is next.
    Reverse,
    /// Both trials failed; the gain is restored and the step shrunk.
    Reject,
}

/// The search transition table: what to do with a finished run in `phase`, given whether it
/// beat the best error so far.
pub fn judge(phase: Phase, improved: bool) -> Verdict {
    match (phase, improved) {
        (Phase::Baseline, _) => Verdict::Baseline,
        (Phase::ForwardTry, true) | (Phase::BackwardTry, true) => Verdict::Accept,
        (Phase::ForwardTry, false) => Verdict::Reverse,
        (Phase::BackwardTry, false) => Verdict::Reject,
    }
}

/// Summary of one completed run, returned by [`Twiddle::update`] and [`Twiddle::complete_run`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport<F: FloatCore = f64> {
    /// Zero-based index of the run.
    pub iteration: usize,
    /// Samples the run lasted.
    pub samples: usize,
    /// Windowed average error of the run.
    pub average_error: F,
    /// Gain the decision applied to.
    pub gain: Gain,
    /// Decision taken for the run.
    pub verdict: Verdict,
    /// Best error after the decision.
    pub best_error: F,
    /// Gains to be used for the next run.
    pub gains: Gains<F>,
}

/// Online Twiddle tuner for the gains of a [`PidController`](crate::pid::PidController).
///
/// The tuner measures each run (a fixed number of samples, optionally cut short when the vehicle
/// diverges) by its windowed average error and walks one gain at a time: it tries raising the
/// gain by its perturbation magnitude, then lowering it, keeping whichever beats the best error
/// so far. Successful steps grow by the growth factor, failed ones shrink by the shrink factor.
///
/// The first completed run only records the reference error for the starting gains; the first
/// forward trial is applied right after it.
///
/// The tuner never owns the controller: the gains to mutate are passed in on every call.
#[derive(Debug, Clone)]
pub struct Twiddle<F: FloatCore = f64> {
    config: TwiddleConfig<F>,
    perturbations: [Perturbation<F>; 3],
    active: Gain,
    best_error: F,
    best_gains: Option<Gains<F>>,
    samples_in_run: usize,
    accumulated_squared_error: F,
    initialized: bool,
    iteration_count: usize,
}

impl<F: FloatCore + Debug> Twiddle<F> {
    /// Creates a tuner that has not measured any run yet.
    pub fn new(config: TwiddleConfig<F>) -> Self {
        let magnitudes = config.initial_magnitudes();
        Self {
            config,
            perturbations: Gain::ALL.map(|gain| Perturbation::new(magnitudes[gain])),
            active: Gain::Kp,
            best_error: F::infinity(),
            best_gains: None,
            samples_in_run: 0,
            accumulated_squared_error: F::zero(),
            initialized: false,
            iteration_count: 0,
        }
    }

    /// Accounts for one sample and, if it ends the current run, performs one search step on
    /// `gains`.
    ///
    /// Returns the report of the completed run, or `None` while the run is still in progress.
    pub fn update(&mut self, cte: F, gains: &mut Gains<F>) -> Option<RunReport<F>> {
        if self.observe(cte) {
            self.complete_run(gains)
        } else {
            None
        }
    }

    /// Accumulates one sample into the current run.
    ///
    /// Returns `true` if the run boundary has been reached: either the run length is exhausted,
    /// or the divergence check is enabled, its grace period has passed and `|cte|` exceeds its
    /// threshold.
    pub fn observe(&mut self, cte: F) -> bool {
        self.samples_in_run += 1;
        self.accumulated_squared_error = self.accumulated_squared_error + cte * cte;

        if self.samples_in_run >= self.config.run_length {
            return true;
        }
        match self.config.divergence {
            Some(Divergence {
                grace_samples,
                threshold,
            }) => self.samples_in_run > grace_samples && cte.abs() > threshold,
            None => false,
        }
    }

    /// Closes the current run: judges it, mutates `gains` accordingly and starts a new run.
    ///
    /// A run without any sample is not judged and leaves everything untouched.
    pub fn complete_run(&mut self, gains: &mut Gains<F>) -> Option<RunReport<F>> {
        let average_error = self.average_error()?;
        let samples = self.samples_in_run;
        let gain = self.active;

        let verdict = self.search_step(average_error, gains);

        self.samples_in_run = 0;
        self.accumulated_squared_error = F::zero();
        let iteration = self.iteration_count;
        self.iteration_count += 1;

        debug!(
            "Run {iteration}: average error {average_error:?} over {samples} samples, \
             gains {:?}, steps {:?}",
            gains.as_tuple(),
            self.magnitudes().as_tuple(),
        );

        Some(RunReport {
            iteration,
            samples,
            average_error,
            gain,
            verdict,
            best_error: self.best_error,
            gains: *gains,
        })
    }

    /// One step of the search given the average error of the run just finished.
    ///
    /// This is the whole decision logic of the tuner, independent of how runs are measured.
    pub fn search_step(&mut self, average_error: F, gains: &mut Gains<F>) -> Verdict {
        let gain = self.active;
        let verdict = judge(self.phase(), average_error < self.best_error);
        let growth = self.config.growth_factor;
        let shrink = self.config.shrink_factor;
        let perturbation = &mut self.perturbations[gain.index()];
        let magnitude = perturbation.magnitude;

        match verdict {
            Verdict::Baseline => {
                self.best_error = average_error;
                self.best_gains = Some(*gains);
                self.initialized = true;
                info!("Baseline error {average_error:?}, {gain} optimization begins");
                self.apply_forward(gains);
            }
            Verdict::Accept => {
                self.best_error = average_error;
                self.best_gains = Some(*gains);
                perturbation.magnitude = magnitude * growth;
                perturbation.direction = Direction::Forward;
                info!(
                    "New best error {average_error:?} with gains {:?}",
                    gains.as_tuple()
                );
                self.advance(gains);
            }
            Verdict::Reverse => {
                trace!("{gain} did not improve going forward, trying backward");
                gains[gain] = gains[gain] - (magnitude + magnitude);
                perturbation.direction = Direction::Backward;
            }
            Verdict::Reject => {
                trace!("{gain} did not improve in either direction, resetting it");
                gains[gain] = gains[gain] + magnitude;
                perturbation.magnitude = magnitude * shrink;
                perturbation.direction = Direction::Forward;
                self.advance(gains);
            }
        }
        verdict
    }

    /// Moves on to the next gain and starts its trial.
    fn advance(&mut self, gains: &mut Gains<F>) {
        self.active = self.active.next();
        self.apply_forward(gains);
    }

    /// Raises the active gain by its magnitude, unless its backward trial is still pending.
    fn apply_forward(&self, gains: &mut Gains<F>) {
        let perturbation = self.perturbations[self.active.index()];
        if perturbation.direction == Direction::Forward {
            gains[self.active] = gains[self.active] + perturbation.magnitude;
        }
    }

    /// Windowed average error of the run so far: the sum of squared errors divided by the square
    /// of the sample count. `None` before the first sample of a run.
    pub fn average_error(&self) -> Option<F> {
        if self.samples_in_run == 0 {
            return None;
        }
        let n = F::from(self.samples_in_run)?;
        Some(self.accumulated_squared_error / (n * n))
    }

    /// Sum of all perturbation magnitudes.
    pub fn magnitude_sum(&self) -> F {
        self.perturbations
            .iter()
            .fold(F::zero(), |sum, p| sum + p.magnitude)
    }

    /// Whether the magnitudes have shrunk below the tolerance. The search itself never stops;
    /// callers use this to stop calling the tuner.
    pub fn converged(&self) -> bool {
        self.magnitude_sum() < self.config.tolerance
    }

    /// Where the search stands for the active gain.
    pub fn phase(&self) -> Phase {
        if !self.initialized {
            return Phase::Baseline;
        }
        match self.perturbations[self.active.index()].direction {
            Direction::Forward => Phase::ForwardTry,
            Direction::Backward => Phase::BackwardTry,
        }
    }

    /// The tuner's configuration.
    pub fn config(&self) -> &TwiddleConfig<F> {
        &self.config
    }

    /// The gain currently being tuned.
    pub fn active_gain(&self) -> Gain {
        self.active
    }

    /// Perturbation of each gain, in [`Gain::ALL`] order.
    pub fn perturbations(&self) -> &[Perturbation<F>; 3] {
        &self.perturbations
    }

    /// Perturbation of one gain.
    pub fn perturbation(&self, gain: Gain) -> Perturbation<F> {
        self.perturbations[gain.index()]
    }

    /// Perturbation magnitudes laid out like the gains they apply to.
    pub fn magnitudes(&self) -> Gains<F> {
        let [kp, ki, kd] = self.perturbations.map(|p| p.magnitude);
        Gains::new(kp, ki, kd)
    }

    /// Lowest average error seen so far; infinity until the baseline run completes.
    pub fn best_error(&self) -> F {
        self.best_error
    }

    /// Gains that produced [`best_error`](Twiddle::best_error), without any pending trial
    /// applied. `None` until the baseline run completes.
    pub fn best_gains(&self) -> Option<Gains<F>> {
        self.best_gains
    }

    /// Samples observed in the current run.
    pub fn samples_in_run(&self) -> usize {
        self.samples_in_run
    }

    /// Sum of squared cross-track errors in the current run.
    pub fn accumulated_squared_error(&self) -> F {
        self.accumulated_squared_error
    }

    /// Whether the baseline run has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of runs completed so far.
    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }
}
