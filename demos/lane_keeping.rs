//! Tunes the steering gains of a simulated car driving a curvy road.
//! This example requires the `--features simulation` flag to be enabled.
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

#[cfg(feature = "simulation")]
pub fn main() {
    use twiddle_pid::pid::PidConfigBuilder;
    use twiddle_pid::session::{Command, Frame, Session, SessionConfigBuilder, Telemetry};
    use twiddle_pid::sim::{LaneKeepingModel, Road, RoadShape, Track};
    use twiddle_pid::twiddle::TwiddleConfigBuilder;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    const FIXED_STEP_SIZE_S: f64 = 0.05;
    const MAX_SAMPLES: usize = 400_000;

    let model = LaneKeepingModel {
        speed: 2.0,
        wheelbase: 2.5,
        max_steering_angle: 25.0_f64.to_radians(),
        road: Road::new(RoadShape::Sine, 0.04, 60.0),
    };
    let mut track = Track::new(model, FIXED_STEP_SIZE_S, 0.76);

    let pid_config = PidConfigBuilder::default()
        .kp(0.1)
        .kd(1.0)
        .output_limits(-1.0, 1.0)
        .build()
        .expect("Invalid PID config");
    let twiddle_config = TwiddleConfigBuilder::default()
        .run_length(400)
        .initial_magnitudes(0.1, 0.001, 1.0)
        .tolerance(0.05)
        .divergence(100, 3.0)
        .build()
        .expect("Invalid Twiddle config");
    let session_config = SessionConfigBuilder::default()
        .throttle(0.3)
        .build()
        .expect("Invalid session config");

    let mut session = Session::new(session_config, pid_config, twiddle_config);

    for _ in 0..MAX_SAMPLES {
        let frame = Frame::Telemetry(Telemetry {
            cte: track.cte(),
            speed: track.speed(),
            steering_angle: 0.0,
        });
        for command in session.handle(frame).commands() {
            match command {
                Command::ResetRun => track.reset(),
                Command::Steer { steering_angle, .. } => {
                    track.step(steering_angle);
                }
                Command::Manual => {}
            }
        }
        if !session.is_tuning() {
            break;
        }
    }

    let (kp, ki, kd) = session.pid().gains().as_tuple();
    println!(
        "After {} runs: Kp = {kp:.4}, Ki = {ki:.5}, Kd = {kd:.4}, best error {:.3e}",
        session.twiddle().iteration_count(),
        session.twiddle().best_error(),
    );
}

#[cfg(not(feature = "simulation"))]
fn main() {
    eprintln!("This example requires `--features simulation` to run.");
}
