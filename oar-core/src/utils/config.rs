//! Drive tunables.
//!
//! A [`DriveConfig`] is read once at startup and never mutated afterwards.
//! It deserializes from JSON; absent fields keep their defaults.
//!
//! ```rust
//! use oar_core::utils::config::DriveConfig;
//! let cfg = DriveConfig::from_json(br#"{ "threshold_cm": 30.0 }"#).unwrap();
//! assert_eq!(cfg.adaptive_threshold_cm(), 45.0);
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::sensors::ultrasonic::TRIGGER_PULSE_US;

/// Errors produced while loading or checking a [`DriveConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Parse { line: usize, column: usize },
    /// A value is outside its allowed range.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ConfigError::Parse { line, column } => {
                write!(f, "malformed drive config at {}:{}", line, column)
            }
            ConfigError::Invalid(reason) => write!(f, "invalid drive config: {}", reason),
        }
    }
}

impl core::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Distance below which avoidance triggers (cm).
    pub threshold_cm: f32,
    /// Multiplier on `threshold_cm` marking where proportional slowdown starts.
    pub adaptive_threshold_mult: f32,
    /// Nominal forward speed (%).
    pub cruise_speed_pct: f32,
    /// Speed while reversing away from an obstacle (%).
    pub reverse_speed_pct: f32,
    /// Ramp duration for ordinary speed changes (ms).
    pub ramp_time_ms: u32,
    /// Faster ramp used when an obstacle is first detected (ms).
    pub decel_ramp_ms: u32,
    /// Ramp duration when pulling away from a full stop (ms).
    pub resume_ramp_ms: u32,
    /// How long the in-place turn is held (ms).
    pub turn_duration_ms: u32,
    /// Wheel speed during the in-place turn (%).
    pub turn_speed_pct: f32,
    /// Ceiling on the reverse-until-safe phase (ms).
    pub max_reverse_ms: u32,
    /// Delay between supervisor cycles (ms).
    pub loop_delay_ms: u32,
    /// Pause before changing direction for a reverse or a turn (ms).
    pub settle_ms: u32,
    /// Pause after the deceleration ramp (ms).
    pub decel_pause_ms: u32,
    /// Upper bound on each echo edge wait (us).
    pub echo_timeout_us: u32,
    /// Low time before the trigger pulse (us).
    pub trigger_settle_us: u32,
    pub pwm_frequency_hz: u32,
    /// Total run time; `None` runs until shutdown is requested.
    pub max_runtime_ms: Option<u64>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            threshold_cm: 50.0,
            adaptive_threshold_mult: 1.5,
            cruise_speed_pct: 60.0,
            reverse_speed_pct: 50.0,
            ramp_time_ms: 200,
            decel_ramp_ms: 150,
            resume_ramp_ms: 250,
            turn_duration_ms: 400,
            turn_speed_pct: 55.0,
            max_reverse_ms: 3_000,
            loop_delay_ms: 60,
            settle_ms: 50,
            decel_pause_ms: 100,
            echo_timeout_us: 30_000,
            trigger_settle_us: 200,
            pwm_frequency_hz: 10_000,
            max_runtime_ms: None,
        }
    }
}

impl DriveConfig {
    /// Parse a JSON document and validate the result.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes).map_err(|e| ConfigError::Parse {
            line: e.line(),
            column: e.column(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Distance at which proportional slowdown begins.
    pub fn adaptive_threshold_cm(&self) -> f32 {
        self.threshold_cm * self.adaptive_threshold_mult
    }

    /// Worst-case duration of one ultrasonic reading (ms, rounded up): the
    /// trigger settle and pulse plus a full wait on each echo edge.
    pub fn ranging_budget_ms(&self) -> u64 {
        let us = 2 * u64::from(self.echo_timeout_us)
            + u64::from(self.trigger_settle_us)
            + u64::from(TRIGGER_PULSE_US);
        us.div_ceil(1_000)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold_cm > 0.0) {
            return Err(ConfigError::Invalid("threshold_cm must be positive"));
        }
        if !(self.adaptive_threshold_mult > 1.0) {
            return Err(ConfigError::Invalid(
                "adaptive_threshold_mult must be greater than 1",
            ));
        }
        let speeds = [
            ("cruise_speed_pct must be within 0..=100", self.cruise_speed_pct),
            ("reverse_speed_pct must be within 0..=100", self.reverse_speed_pct),
            ("turn_speed_pct must be within 0..=100", self.turn_speed_pct),
        ];
        for (reason, speed) in speeds {
            if !(0.0..=100.0).contains(&speed) {
                return Err(ConfigError::Invalid(reason));
            }
        }
        if self.echo_timeout_us == 0 {
            return Err(ConfigError::Invalid("echo_timeout_us must be non-zero"));
        }
        if self.pwm_frequency_hz == 0 {
            return Err(ConfigError::Invalid("pwm_frequency_hz must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = DriveConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.adaptive_threshold_cm(), 75.0);
    }

    #[test]
    fn ranging_budget_covers_both_echo_edges() {
        // 2 x 30 ms echo waits plus 210 us of trigger, rounded up
        assert_eq!(DriveConfig::default().ranging_budget_ms(), 61);

        let cfg = DriveConfig {
            echo_timeout_us: 5_000,
            trigger_settle_us: 0,
            ..DriveConfig::default()
        };
        assert_eq!(cfg.ranging_budget_ms(), 11);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = DriveConfig::from_json(
            br#"{ "threshold_cm": 30.0, "cruise_speed_pct": 70.0, "max_runtime_ms": 5000 }"#,
        )
        .unwrap();
        assert_eq!(cfg.threshold_cm, 30.0);
        assert_eq!(cfg.cruise_speed_pct, 70.0);
        assert_eq!(cfg.max_runtime_ms, Some(5_000));
        assert_eq!(cfg.max_reverse_ms, 3_000);
        assert_eq!(cfg.adaptive_threshold_cm(), 45.0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = DriveConfig::from_json(br#"{ "treshold_cm": 30.0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn malformed_json_reports_position() {
        let err = DriveConfig::from_json(b"{\n  \"threshold_cm\": ,\n}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }));
    }

    #[test]
    fn out_of_range_values_are_invalid() {
        let err = DriveConfig::from_json(br#"{ "cruise_speed_pct": 120.0 }"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid("cruise_speed_pct must be within 0..=100")
        );

        let cfg = DriveConfig {
            adaptive_threshold_mult: 1.0,
            ..DriveConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DriveConfig {
            threshold_cm: f32::NAN,
            ..DriveConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = DriveConfig {
            echo_timeout_us: 0,
            ..DriveConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
