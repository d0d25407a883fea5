// Per-sample glue between telemetry frames, the controller and its tuner
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

use log::{debug, info};
use num_traits::float::FloatCore;

use crate::pid::{PidConfig, PidController};
use crate::twiddle::{RunReport, Twiddle, TwiddleConfig};

/// Errors raised when validating a [`SessionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum SessionConfigError {
    /// The throttle is not finite or lies outside `[-1, 1]`.
    #[cfg_attr(feature = "std", error("Throttle must be finite and within [-1, 1]"))]
    InvalidThrottle,
}

/// Per-session driving policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig<F: FloatCore = f64> {
    /// Constant cruise throttle sent with every steering command. Defaults to 0.3.
    throttle: F,

    /// Whether the gains are tuned at all. Defaults to true.
    tuning: bool,

    /// Whether tuning stops for good once the tuner has converged. Defaults to true.
    stop_when_converged: bool,
}

impl<F: FloatCore> Default for SessionConfig<F> {
    fn default() -> Self {
        Self {
            throttle: F::from(0.3).unwrap_or_else(F::zero),
            tuning: true,
            stop_when_converged: true,
        }
    }
}

impl<F: FloatCore> SessionConfig<F> {
    /// Cruise throttle.
    pub fn throttle(&self) -> F {
        self.throttle
    }

    /// Whether the gains are tuned at all.
    pub fn tuning(&self) -> bool {
        self.tuning
    }

    /// Whether tuning stops once converged.
    pub fn stop_when_converged(&self) -> bool {
        self.stop_when_converged
    }

    /// Sets the cruise throttle.
    ///
    /// # Returns
    /// - `Err(SessionConfigError::InvalidThrottle)` if `throttle` is not finite or outside
    ///   `[-1, 1]`.
    pub fn set_throttle(&mut self, throttle: F) -> Result<(), SessionConfigError> {
        if !throttle.is_finite() || throttle.abs() > F::one() {
            return Err(SessionConfigError::InvalidThrottle);
        }
        self.throttle = throttle;
        Ok(())
    }

    /// Enables or disables tuning.
    pub fn set_tuning(&mut self, tuning: bool) {
        self.tuning = tuning;
    }

    /// Sets whether tuning stops once converged.
    pub fn set_stop_when_converged(&mut self, stop_when_converged: bool) {
        self.stop_when_converged = stop_when_converged;
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionConfigBuilder<F: FloatCore = f64> {
    throttle: F,
    tuning: bool,
    stop_when_converged: bool,
}

impl<F: FloatCore> Default for SessionConfigBuilder<F> {
    fn default() -> Self {
        let config = SessionConfig::default();
        Self {
            throttle: config.throttle,
            tuning: config.tuning,
            stop_when_converged: config.stop_when_converged,
        }
    }
}

impl<F: FloatCore> SessionConfigBuilder<F> {
    /// Sets the cruise throttle.
    pub fn throttle(mut self, throttle: F) -> Self {
        self.throttle = throttle;
        self
    }

    /// Enables or disables tuning.
    pub fn tuning(mut self, tuning: bool) -> Self {
        self.tuning = tuning;
        self
    }

    /// Sets whether tuning stops once converged.
    pub fn stop_when_converged(mut self, stop_when_converged: bool) -> Self {
        self.stop_when_converged = stop_when_converged;
        self
    }

    /// Validates the settings and builds the config.
    ///
    /// # Returns
    /// - `Err(SessionConfigError::InvalidThrottle)` if the throttle is invalid.
    pub fn build(self) -> Result<SessionConfig<F>, SessionConfigError> {
        let mut config = SessionConfig::default();
        config.set_throttle(self.throttle)?;
        config.set_tuning(self.tuning);
        config.set_stop_when_converged(self.stop_when_converged);
        Ok(config)
    }
}

/// One telemetry sample reported by the simulator. Only `cte` drives the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry<F: FloatCore = f64> {
    /// Cross-track error
    pub cte: F,
    /// Vehicle speed, as reported.
    pub speed: F,
    /// Steering angle currently applied by the simulator.
    pub steering_angle: F,
}

/// An inbound frame, already decoded by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame<F: FloatCore = f64> {
    /// A telemetry sample.
    Telemetry(Telemetry<F>),
    /// A frame without usable telemetry.
    Empty,
}

/// A command for the transport layer to send to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command<F: FloatCore = f64> {
    /// Steer and drive on.
    Steer {
        /// Normalized steering angle, the negated controller output.
        steering_angle: F,
        /// Cruise throttle.
        throttle: F,
    },
    /// Restart the driving segment from its initial state.
    ResetRun,
    /// Hand control back to manual driving.
    Manual,
}

/// What one sample produced: the steering angle, and the report of the run it completed if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOutput<F: FloatCore = f64> {
    /// Steering angle for this sample.
    pub steering_angle: F,
    /// Report of the run this sample completed.
    pub run: Option<RunReport<F>>,
}

/// Processes one cross-track error sample.
///
/// The tuner, if given, sees the sample first. When the sample completes a run the tuner adjusts
/// the controller's gains right away, so the steering angle for this very sample already uses the
/// gains of the next run. The controller is then updated and its negated output is the steering
/// angle.
pub fn process_sample<F: FloatCore + Debug>(
    pid: &mut PidController<F>,
    tuner: Option<&mut Twiddle<F>>,
    cte: F,
) -> SampleOutput<F> {
    let run = tuner.and_then(|tuner| tuner.update(cte, pid.gains_mut()));
    SampleOutput {
        steering_angle: steer(pid, cte),
        run,
    }
}

fn steer<F: FloatCore>(pid: &mut PidController<F>, cte: F) -> F {
    pid.update_error(cte);
    -pid.total_error()
}

/// The reply to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response<F: FloatCore = f64> {
    /// Report of the run this frame completed. When present, a [`Command::ResetRun`] precedes
    /// `command`.
    pub run: Option<RunReport<F>>,
    /// [`Command::Steer`] for telemetry, [`Command::Manual`] otherwise.
    pub command: Command<F>,
}

impl<F: FloatCore> Response<F> {
    /// The commands to send, in order.
    pub fn commands(&self) -> impl Iterator<Item = Command<F>> {
        let reset = self.run.map(|_| Command::ResetRun);
        reset.into_iter().chain(core::iter::once(self.command))
    }
}

/// A controller and its tuner, driven by the frames of one simulator connection.
///
/// Every connection owns its own session; nothing is shared between sessions.
#[derive(Debug, Clone)]
pub struct Session<F: FloatCore = f64> {
    config: SessionConfig<F>,
    pid: PidController<F>,
    twiddle: Twiddle<F>,
    tuning: bool,
}

impl<F: FloatCore + Debug> Session<F> {
    /// Creates a session with fresh error terms and an untrained tuner.
    pub fn new(
        config: SessionConfig<F>,
        pid_config: PidConfig<F>,
        twiddle_config: TwiddleConfig<F>,
    ) -> Self {
        Self {
            config,
            pid: PidController::new(pid_config),
            twiddle: Twiddle::new(twiddle_config),
            tuning: config.tuning(),
        }
    }

    /// Answers one inbound frame.
    pub fn handle(&mut self, frame: Frame<F>) -> Response<F> {
        match frame {
            Frame::Telemetry(telemetry) => self.handle_telemetry(telemetry),
            Frame::Empty => {
                debug!("No telemetry in frame, switching to manual");
                Response {
                    run: None,
                    command: Command::Manual,
                }
            }
        }
    }

    fn handle_telemetry(&mut self, telemetry: Telemetry<F>) -> Response<F> {
        let run = if self.tuning {
            self.twiddle.update(telemetry.cte, self.pid.gains_mut())
        } else {
            None
        };

        // Settling swaps the gains, so it has to happen before this sample is steered
        if run.is_some() && self.config.stop_when_converged() && self.twiddle.converged() {
            self.settle();
        }
        let steering_angle = steer(&mut self.pid, telemetry.cte);

        Response {
            run,
            command: Command::Steer {
                steering_angle,
                throttle: self.config.throttle(),
            },
        }
    }

    /// Stops tuning and keeps the best gains found, dropping any trial still pending.
    fn settle(&mut self) {
        self.tuning = false;
        if let Some(best) = self.twiddle.best_gains() {
            *self.pid.gains_mut() = best;
        }
        info!(
            "Tuning converged after {} runs, best error {:?} with gains {:?}",
            self.twiddle.iteration_count(),
            self.twiddle.best_error(),
            self.pid.gains().as_tuple(),
        );
    }

    /// Zeros the controller's error terms, keeping the gains currently in use.
    pub fn reinitialize(&mut self) {
        let (kp, ki, kd) = self.pid.gains().as_tuple();
        self.pid.initialize(kp, ki, kd);
    }

    /// Whether the tuner is still being fed samples.
    pub fn is_tuning(&self) -> bool {
        self.tuning
    }

    /// Session policy.
    pub fn config(&self) -> &SessionConfig<F> {
        &self.config
    }

    /// The controller.
    pub fn pid(&self) -> &PidController<F> {
        &self.pid
    }

    /// Mutable access to the controller.
    pub fn pid_mut(&mut self) -> &mut PidController<F> {
        &mut self.pid
    }

    /// The tuner.
    pub fn twiddle(&self) -> &Twiddle<F> {
        &self.twiddle
    }
}
