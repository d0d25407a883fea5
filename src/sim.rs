use nalgebra as na;

/// Shape of the road's curvature along the distance travelled.
pub enum RoadShape {
    Straight,
    Sine,
    Square,
}

/// Curvature profile of the reference path, as a function of the distance travelled.
pub struct Road {
    fcn: fn(f64) -> f64,
    amplitude: f64,
    wavelength: f64,
}

impl Road {
    /// `amplitude` is the peak curvature in 1/m, `wavelength` the distance in m over which the
    /// profile repeats.
    pub fn new(shape: RoadShape, amplitude: f64, wavelength: f64) -> Self {
        Self {
            fcn: match shape {
                RoadShape::Straight => |_| 0.0,
                RoadShape::Sine => f64::sin,
                RoadShape::Square => |x| x.sin().signum(),
            },
            amplitude,
            wavelength,
        }
    }

    pub fn straight() -> Self {
        Self::new(RoadShape::Straight, 0.0, 1.0)
    }

    pub fn curvature(&self, distance: f64) -> f64 {
        self.amplitude * (self.fcn)(2.0 * core::f64::consts::PI * distance / self.wavelength)
    }
}

/// Kinematic bicycle model of a car following a road at constant speed.
///
/// The state is `[y, ψ, s]`: lateral offset from the road (the cross-track error), heading
/// relative to the road, and distance travelled along it.
pub struct LaneKeepingModel {
    pub speed: f64,
    pub wheelbase: f64,
    /// Wheel angle in rad produced by a normalized steering command of 1.
    pub max_steering_angle: f64,
    pub road: Road,
}

impl LaneKeepingModel {
    /// ```text
    /// y' = v sin ψ
    /// ψ' = v / L · tan(δ) − v κ(s)
    /// s' = v
    /// ```
    /// where `δ` is the normalized steering command `u` scaled by the maximum wheel angle.
    pub fn f(&self, x: na::Vector3<f64>, u: f64) -> na::Vector3<f64> {
        let v = self.speed;
        let delta = u.clamp(-1.0, 1.0) * self.max_steering_angle;
        na::vector![
            v * x[1].sin(),
            v / self.wheelbase * delta.tan() - v * self.road.curvature(x[2]),
            v
        ]
    }

    pub fn h(&self, x: na::Vector3<f64>) -> f64 {
        x[0]
    }
}

/// One classic fourth-order Runge-Kutta step of `x' = f(x)`.
pub fn rk4_step<F>(f: F, x: na::Vector3<f64>, dt: f64) -> na::Vector3<f64>
where
    F: Fn(na::Vector3<f64>) -> na::Vector3<f64>,
{
    let k1 = f(x);
    let k2 = f(x + k1 * (dt / 2.0));
    let k3 = f(x + k2 * (dt / 2.0));
    let k4 = f(x + k3 * dt);
    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// A resettable driving segment: the model, its current state and the state runs start from.
pub struct Track {
    pub model: LaneKeepingModel,
    pub dt: f64,
    initial_state: na::Vector3<f64>,
    state: na::Vector3<f64>,
}

impl Track {
    pub fn new(model: LaneKeepingModel, dt: f64, initial_offset: f64) -> Self {
        let initial_state = na::vector![initial_offset, 0.0, 0.0];
        Self {
            model,
            dt,
            initial_state,
            state: initial_state,
        }
    }

    /// Puts the car back at the start of the segment.
    pub fn reset(&mut self) {
        self.state = self.initial_state;
    }

    /// Current cross-track error.
    pub fn cte(&self) -> f64 {
        self.model.h(self.state)
    }

    /// Current vehicle speed.
    pub fn speed(&self) -> f64 {
        self.model.speed
    }

    /// Applies a normalized steering command for one time step and returns the new cross-track
    /// error.
    pub fn step(&mut self, steering: f64) -> f64 {
        let model = &self.model;
        self.state = rk4_step(|x| model.f(x, steering), self.state, self.dt);
        self.cte()
    }
}
