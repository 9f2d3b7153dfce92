//! Speed, duty and distance conversions.
//!
//! Speeds are percentages in `[0, 100]`; duties are 16-bit PWM values where
//! `65535` is fully on. Distances are centimeters.
//!
//! # Example
//! ```rust
//! use oar_core::utils::math::speed::{adaptive_speed, speed_to_duty};
//! assert_eq!(speed_to_duty(100.0), 65535);
//! assert_eq!(adaptive_speed(45.0, 30.0, 45.0, 60.0), 60.0);
//! ```

/// Full-scale PWM duty.
pub const MAX_DUTY: u16 = u16::MAX;

/// Speed of sound in centimeters per microsecond.
pub const SPEED_OF_SOUND_CM_PER_US: f32 = 0.0343;

/// Lowest speed adaptive slowdown will command, keeping some control authority.
pub const MIN_ADAPTIVE_SPEED_PCT: f32 = 20.0;

/// Clamp a speed request into `[0, 100]`; NaN counts as a stop.
pub fn clamp_speed(speed_pct: f32) -> f32 {
    if speed_pct.is_nan() {
        0.0
    } else {
        speed_pct.clamp(0.0, 100.0)
    }
}

/// Convert a speed percentage to a duty, `round(pct / 100 * 65535)`.
pub fn speed_to_duty(speed_pct: f32) -> u16 {
    libm::roundf(clamp_speed(speed_pct) / 100.0 * MAX_DUTY as f32) as u16
}

/// Convert an echo pulse width to a one-way distance.
pub fn echo_to_cm(elapsed_us: u64) -> f32 {
    elapsed_us as f32 * SPEED_OF_SOUND_CM_PER_US / 2.0
}

/// Forward speed inside the adaptive band.
///
/// Interpolates linearly from the floor at `threshold_cm` up to
/// `cruise_speed_pct` at `adaptive_threshold_cm`, then clamps into
/// `[floor, cruise]`. The floor never exceeds the cruise speed.
pub fn adaptive_speed(
    distance_cm: f32,
    threshold_cm: f32,
    adaptive_threshold_cm: f32,
    cruise_speed_pct: f32,
) -> f32 {
    let span = adaptive_threshold_cm - threshold_cm;
    if span <= 0.0 {
        return cruise_speed_pct;
    }
    let factor = (distance_cm - threshold_cm) / span;
    let floor = MIN_ADAPTIVE_SPEED_PCT.min(cruise_speed_pct);
    (cruise_speed_pct * factor).max(floor).min(cruise_speed_pct)
}
