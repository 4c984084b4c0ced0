// plotter_shared/src/kinematics.rs - Travel time estimation for trapezoidal velocity profiles

use crate::Position;
use std::f64::consts::FRAC_PI_4;

/// Acceleration (mm/s²) and maximum speed (mm/s) of one axis group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub acceleration: f64,
    pub max_speed: f64,
}

impl AxisLimits {
    pub fn new(acceleration: f64, max_speed: f64) -> Self {
        Self { acceleration, max_speed }
    }
}

/// Time in seconds to cover `distance` mm starting and ending at rest.
///
/// When the move is too short to reach cruise speed the profile is triangular,
/// otherwise it accelerates to `max_speed`, cruises, and decelerates.
pub fn axis_travel_duration(distance: f64, acceleration: f64, max_speed: f64) -> f64 {
    if distance <= 0.0 || acceleration <= 0.0 || max_speed <= 0.0 {
        return 0.0;
    }
    let cruise_distance = 0.5 * max_speed * max_speed / acceleration;
    if distance < 2.0 * cruise_distance {
        2.0 * (distance / acceleration).sqrt()
    } else {
        2.0 * max_speed / acceleration + (distance - 2.0 * cruise_distance) / max_speed
    }
}

/// Duration in seconds of a move from `start` to `end`.
///
/// Axes move concurrently, so the slowest axis wins. On a CoreXY machine both
/// motors contribute to any XY displacement: the planar distance is projected
/// onto the motor diagonals and the XY speed scaled by the same factor.
pub fn xyz_travel_duration(start: Position, end: Position, xy: AxisLimits, z: AxisLimits, core_xy: bool) -> f64 {
    let dx = (end[0] - start[0]).abs();
    let dy = (end[1] - start[1]).abs();
    let dz = (end[2] - start[2]).abs();

    let mut dist_x = dx;
    let mut dist_y = dy;
    let mut speed_xy = xy.max_speed;
    if core_xy && (dx > 0.0 || dy > 0.0) {
        let angle = dy.atan2(dx);
        let alpha = (angle - FRAC_PI_4).cos();
        dist_x = dx / alpha + dy / alpha;
        dist_y = 0.0;
        speed_xy /= alpha;
    }

    let t_x = axis_travel_duration(dist_x, xy.acceleration, speed_xy);
    let t_y = axis_travel_duration(dist_y, xy.acceleration, speed_xy);
    let t_z = axis_travel_duration(dz, z.acceleration, z.max_speed);
    t_x.max(t_y).max(t_z)
}

/// Convert a speed in mm/s to a G-code feedrate in mm/min.
pub fn speed_to_feedrate(speed: f64, core_xy: bool) -> f64 {
    let feedrate = speed * 60.0;
    if core_xy { feedrate / FRAC_PI_4.cos() } else { feedrate }
}
