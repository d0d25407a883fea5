#![warn(missing_docs)]

//! # Twiddle-tuned Steering PID
//!
//! This library steers a simulated car along a road from its cross-track error (cte), and tunes
//! the controller's gains online while it drives.
//!
//! ## Features
//!
//! - A cross-track-error PID controller:
//!   - Anti reset-windup: the integral error and the output share one set of output limits.
//!   - Gains can be changed between samples without disturbing the error terms.
//!
//! - An online Twiddle tuner:
//!   - Coordinate descent over (Kp, Ki, Kd), one gain per run, forward then backward.
//!   - Runs end after a fixed number of samples, or early once the car diverges from the road.
//!   - A tolerance on the summed step sizes signals convergence.
//!
//! - A session layer mapping decoded simulator frames to steer, reset and manual commands. The
//!   transport itself (framing, encoding, connections) is left to the caller.
//!
//! ## Usage
//!
//! ### Controller only
//!
//! ```rust
//! use twiddle_pid::pid::{PidConfigBuilder, PidController};
//!
//! let config = PidConfigBuilder::default()
//!     .kp(0.2)
//!     .ki(0.004)
//!     .kd(3.0)
//!     .output_limits(-1.0, 1.0)
//!     .build()
//!     .expect("Invalid PID config");
//! let mut pid = PidController::new(config);
//!
//! pid.update_error(0.76);
//! let steering_angle = -pid.total_error();
//! assert!((-1.0..=1.0).contains(&steering_angle));
//! ```
//!
//! ### Controller and tuner
//!
//! The tuner never owns the controller. Hand both to [`session::process_sample`] once per sample;
//! a sample that completes a run carries a report, and the caller should restart the segment.
//!
//! ```rust
//! use twiddle_pid::pid::{PidConfig, PidController};
//! use twiddle_pid::session::process_sample;
//! use twiddle_pid::twiddle::{Twiddle, TwiddleConfigBuilder};
//!
//! let mut pid = PidController::new(PidConfig::default());
//! let config = TwiddleConfigBuilder::default()
//!     .run_length(10)
//!     .build()
//!     .expect("Invalid Twiddle config");
//! let mut tuner = Twiddle::new(config);
//!
//! for _ in 0..10 {
//!     let output = process_sample(&mut pid, Some(&mut tuner), 0.5);
//!     if output.run.is_some() {
//!         // Restart the driving segment here
//!     }
//! }
//! assert!(tuner.is_initialized());
//! ```
//!
//! ### Sessions
//!
//! ```rust
//! use twiddle_pid::session::{Command, Frame, Session, SessionConfig, Telemetry};
//!
//! let mut session = Session::<f64>::new(
//!     SessionConfig::default(),
//!     Default::default(),
//!     Default::default(),
//! );
//!
//! let telemetry = Telemetry { cte: 0.3, speed: 20.0, steering_angle: 0.0 };
//! for command in session.handle(Frame::Telemetry(telemetry)).commands() {
//!     match command {
//!         Command::Steer { .. } => { /* send "steer" */ }
//!         Command::ResetRun => { /* send "reset" */ }
//!         Command::Manual => { /* send "manual" */ }
//!     }
//! }
//! ```
//!
//! ## License
//!
#![no_std]

#[cfg(feature = "std")]
extern crate std;

/// The cross-track-error PID controller.
pub mod pid;

/// The Twiddle gain tuner.
pub mod twiddle;

/// Per-sample glue between simulator frames, the controller and the tuner.
pub mod session;

#[doc(hidden)]
#[cfg(feature = "simulation")]
pub mod sim;
