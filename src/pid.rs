use core::ops::{Index, IndexMut};

use num_traits::float::FloatCore;

/// Clamps `value` into `[lo, hi]` while letting NaN through untouched.
///
/// `FloatCore::max`/`min` would silently replace a NaN with a bound, hiding a broken input.
#[inline]
pub(crate) fn clamp<F: FloatCore>(value: F, lo: F, hi: F) -> F {
    if value > hi {
        hi
    } else if value < lo {
        lo
    } else {
        value
    }
}

/// Errors raised when validating a [`PidConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum PidConfigError {
    /// A proportional, integral or derivative gain is not finite.
    #[cfg_attr(feature = "std", error("PID gains must be finite"))]
    InvalidGain,

    /// The lower output limit is not strictly below the upper one, or either limit is NaN.
    #[cfg_attr(
        feature = "std",
        error("Output limits must satisfy min < max and neither may be NaN")
    )]
    InvalidOutputLimits,
}

/// Identifies one of the three gain dimensions of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Gain {
    /// Proportional gain
    Kp,
    /// Integral gain
    Ki,
    /// Derivative gain
    Kd,
}

impl Gain {
    /// All gain dimensions in the order the tuner visits them.
    pub const ALL: [Gain; 3] = [Gain::Kp, Gain::Ki, Gain::Kd];

    /// Position of this gain in [`Gain::ALL`].
    pub fn index(self) -> usize {
        match self {
            Gain::Kp => 0,
            Gain::Ki => 1,
            Gain::Kd => 2,
        }
    }

    /// The gain visited after this one, wrapping around after `Kd`.
    pub fn next(self) -> Gain {
        Gain::ALL[(self.index() + 1) % Gain::ALL.len()]
    }
}

impl core::fmt::Display for Gain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Gain::Kp => "Kp",
            Gain::Ki => "Ki",
            Gain::Kd => "Kd",
        };
        f.write_str(name)
    }
}

/// The three gains of a PID controller.
///
/// Any real value is accepted here, including zero and negative gains: the tuner freely walks
/// the gain space and may step a gain below zero while searching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains<F: FloatCore = f64> {
    /// Proportional gain
    pub kp: F,
    /// Integral gain
    pub ki: F,
    /// Derivative gain
    pub kd: F,
}

impl<F: FloatCore> Gains<F> {
    /// Bundles the three gains together.
    pub fn new(kp: F, ki: F, kd: F) -> Self {
        Self { kp, ki, kd }
    }

    /// Returns the gains as a `(kp, ki, kd)` tuple.
    pub fn as_tuple(&self) -> (F, F, F) {
        (self.kp, self.ki, self.kd)
    }

    fn is_finite(&self) -> bool {
        self.kp.is_finite() && self.ki.is_finite() && self.kd.is_finite()
    }
}

impl<F: FloatCore> Default for Gains<F> {
    fn default() -> Self {
        Self::new(F::zero(), F::zero(), F::zero())
    }
}

impl<F: FloatCore> Index<Gain> for Gains<F> {
    type Output = F;

    fn index(&self, gain: Gain) -> &F {
        match gain {
            Gain::Kp => &self.kp,
            Gain::Ki => &self.ki,
            Gain::Kd => &self.kd,
        }
    }
}

impl<F: FloatCore> IndexMut<Gain> for Gains<F> {
    fn index_mut(&mut self, gain: Gain) -> &mut F {
        match gain {
            Gain::Kp => &mut self.kp,
            Gain::Ki => &mut self.ki,
            Gain::Kd => &mut self.kd,
        }
    }
}

/// Startup configuration of a [`PidController`]: the initial gains and the output limits.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PidConfig<F: FloatCore = f64> {
    /// Gains loaded by [`PidController::new`] and by [`PidController::reinitialize`].
    /// Defaults to all zeros.
    gains: Gains<F>,

    /// Minimum output value of the PID controller; also the lower bound of the integral error.
    /// Defaults to -1.0, the simulator's full left steering.
    output_min: F,

    /// Maximum output value of the PID controller; also the upper bound of the integral error.
    /// Defaults to 1.0, the simulator's full right steering.
    output_max: F,
}

impl<F: FloatCore> Default for PidConfig<F> {
    fn default() -> Self {
        PidConfig {
            gains: Gains::default(),
            output_min: -F::one(),
            output_max: F::one(),
        }
    }
}

impl<F: FloatCore> PidConfig<F> {
    /// Returns the proportional gain.
    pub fn kp(&self) -> F {
        self.gains.kp
    }

    /// Returns the integral gain.
    pub fn ki(&self) -> F {
        self.gains.ki
    }

    /// Returns the derivative gain.
    pub fn kd(&self) -> F {
        self.gains.kd
    }

    /// Returns the initial gains together.
    pub fn gains(&self) -> Gains<F> {
        self.gains
    }

    /// Returns the minimum output limit.
    pub fn output_min(&self) -> F {
        self.output_min
    }

    /// Returns the maximum output limit.
    pub fn output_max(&self) -> F {
        self.output_max
    }

    /// Sets the initial gains.
    ///
    /// # Returns
    /// - `Ok(())` if all three gains are finite.
    /// - `Err(PidConfigError::InvalidGain)` otherwise; the stored gains are left unchanged.
    pub fn set_gains(&mut self, kp: F, ki: F, kd: F) -> Result<(), PidConfigError> {
        let gains = Gains::new(kp, ki, kd);
        if !gains.is_finite() {
            return Err(PidConfigError::InvalidGain);
        }
        self.gains = gains;
        Ok(())
    }

    /// Sets the minimum and maximum output limits for the PID controller.
    ///
    /// These limits may be set to infinity to disable clamping.
    ///
    /// # Returns
    /// - `Ok(())` if the limits were set successfully.
    /// - `Err(PidConfigError::InvalidOutputLimits)` if the minimum limit is greater than or
    ///   equal to the maximum limit, or either limit is NaN.
    pub fn set_output_limits(&mut self, output_min: F, output_max: F) -> Result<(), PidConfigError> {
        if output_min.is_nan() || output_max.is_nan() || output_min >= output_max {
            return Err(PidConfigError::InvalidOutputLimits);
        }
        self.output_min = output_min;
        self.output_max = output_max;
        Ok(())
    }
}

/// Builder for [`PidConfig`]. Values are validated all at once in [`PidConfigBuilder::build`].
#[derive(Copy, Clone, Debug)]
pub struct PidConfigBuilder<F: FloatCore = f64> {
    gains: Gains<F>,
    output_limits: (F, F),
}

impl<F: FloatCore> Default for PidConfigBuilder<F> {
    fn default() -> Self {
        let config = PidConfig::default();
        Self {
            gains: config.gains,
            output_limits: (config.output_min, config.output_max),
        }
    }
}

impl<F: FloatCore> PidConfigBuilder<F> {
    /// Sets the initial proportional gain.
    pub fn kp(mut self, kp: F) -> Self {
        self.gains.kp = kp;
        self
    }

    /// Sets the initial integral gain.
    pub fn ki(mut self, ki: F) -> Self {
        self.gains.ki = ki;
        self
    }

    /// Sets the initial derivative gain.
    pub fn kd(mut self, kd: F) -> Self {
        self.gains.kd = kd;
        self
    }

    /// Sets the output limits, which also bound the integral error.
    pub fn output_limits(mut self, output_min: F, output_max: F) -> Self {
        self.output_limits = (output_min, output_max);
        self
    }

    /// Validates the collected values and produces a [`PidConfig`].
    pub fn build(self) -> Result<PidConfig<F>, PidConfigError> {
        let mut config = PidConfig::default();
        config.set_gains(self.gains.kp, self.gains.ki, self.gains.kd)?;
        config.set_output_limits(self.output_limits.0, self.output_limits.1)?;
        Ok(config)
    }
}

/// A cross-track-error PID controller with anti-windup.
///
/// The controller works on a single scalar error signal. Each call to
/// [`update_error`](PidController::update_error) shifts the proportional, integral and derivative
/// error terms, and [`total_error`](PidController::total_error) combines them with the current
/// gains. Both the integral error and the combined output are clamped into the configured output
/// limits, so a sustained one-sided error (e.g. a long curve) cannot wind the integrator up.
///
/// The gains are exposed through [`gains_mut`](PidController::gains_mut) so that a tuner can
/// adjust them between runs without resetting the error terms.
#[derive(Copy, Clone, Debug)]
pub struct PidController<F: FloatCore = f64> {
    config: PidConfig<F>,
    gains: Gains<F>,
    p_error: F,
    i_error: F,
    d_error: F,
}

impl<F: FloatCore> PidController<F> {
    /// Creates a controller loaded with the configured initial gains and zeroed error terms.
    pub fn new(config: PidConfig<F>) -> Self {
        let mut pid = Self {
            config,
            gains: config.gains(),
            p_error: F::zero(),
            i_error: F::zero(),
            d_error: F::zero(),
        };
        pid.reinitialize();
        pid
    }

    /// Sets the gains and zeros all three error terms.
    ///
    /// May be called any number of times; gains are taken as given, without validation.
    pub fn initialize(&mut self, kp: F, ki: F, kd: F) {
        self.gains = Gains::new(kp, ki, kd);
        self.p_error = F::zero();
        self.i_error = F::zero();
        self.d_error = F::zero();
    }

    /// Restores the configured initial gains and zeros all three error terms.
    pub fn reinitialize(&mut self) {
        let (kp, ki, kd) = self.config.gains().as_tuple();
        self.initialize(kp, ki, kd);
    }

    /// Feeds the latest cross-track error into the controller.
    pub fn update_error(&mut self, cte: F) {
        // p_error still holds the previous cte at this point
        self.d_error = cte - self.p_error;
        self.p_error = cte;
        self.i_error = clamp(
            self.i_error + cte,
            self.config.output_min,
            self.config.output_max,
        );
    }

    /// Combines the error terms with the current gains, clamped into the output limits.
    pub fn total_error(&self) -> F {
        let output =
            self.gains.kp * self.p_error + self.gains.ki * self.i_error + self.gains.kd * self.d_error;
        clamp(output, self.config.output_min, self.config.output_max)
    }

    /// The configuration the controller was built from.
    pub fn config(&self) -> &PidConfig<F> {
        &self.config
    }

    /// Mutable access to the configuration. Changed output limits apply from the next update;
    /// changed initial gains apply from the next [`reinitialize`](PidController::reinitialize).
    pub fn config_mut(&mut self) -> &mut PidConfig<F> {
        &mut self.config
    }

    /// Returns the gains currently in use.
    pub fn gains(&self) -> Gains<F> {
        self.gains
    }

    /// Mutable access to the gains currently in use. The error terms are left untouched.
    pub fn gains_mut(&mut self) -> &mut Gains<F> {
        &mut self.gains
    }

    /// The latest cross-track error.
    pub fn p_error(&self) -> F {
        self.p_error
    }

    /// The clamped running sum of cross-track errors.
    pub fn i_error(&self) -> F {
        self.i_error
    }

    /// The difference between the latest and the previous cross-track error.
    pub fn d_error(&self) -> F {
        self.d_error
    }
}
