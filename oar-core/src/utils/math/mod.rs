//! Math utilities for the obstacle-avoiding robot.
//!
//! This module provides duty-cycle, echo-timing and adaptive-speed conversions.

pub mod speed;
