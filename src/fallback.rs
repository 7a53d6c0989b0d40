//! # Fallback Climate Model
//!
//! This module provides a synthetic air reading for when the single-wire
//! sensor cannot be read and no recent good reading is available to hold.
//!
//! ## Model Characteristics
//!
//! ### Diurnal Pattern
//! Air in a small greenhouse follows the sun with a lag of a few hours:
//! - **Temperature**: 22 °C mean, ±4 °C, warmest at 15:00 local time
//! - **Humidity**: 60 % mean, ±12 %, in anti-phase with temperature
//!
//! ### Accuracy Trade-offs
//! - ✅ **Always in range**: 18–26 °C and 48–72 % sit inside every acceptance band
//! - ✅ **Continuous**: consecutive calls drift smoothly, so control loops do not chatter
//! - ❌ **No weather**: cloud cover, irrigation and venting are ignored
//!
//! Snapshots built from this model are tagged [`AirSource::Synthetic`] so the
//! display and telemetry never pass it off as a measurement.
//!
//! [`AirSource::Synthetic`]: crate::AirSource::Synthetic

use crate::Reading;
use chrono::{DateTime, Local, Timelike};

const MEAN_TEMPERATURE_C: f32 = 22.0;
const TEMPERATURE_SWING_C: f32 = 4.0;
const MEAN_HUMIDITY_PCT: f32 = 60.0;
const HUMIDITY_SWING_PCT: f32 = 12.0;
/// Hour of the daily temperature peak
const PEAK_HOUR: f32 = 15.0;

/// Approximate the current greenhouse air.
/// If `now` is `None`, fall back to `Local::now()`.
pub fn approximate(now: Option<DateTime<Local>>) -> Reading {
    let now = now.unwrap_or_else(Local::now);
    let hour = now.hour() as f32 + now.minute() as f32 / 60.0 + now.second() as f32 / 3600.0;

    let phase = (hour - PEAK_HOUR) / 24.0 * std::f32::consts::TAU;
    let swing = phase.cos();

    Reading {
        temperature_c: MEAN_TEMPERATURE_C + TEMPERATURE_SWING_C * swing,
        humidity_pct: MEAN_HUMIDITY_PCT - HUMIDITY_SWING_PCT * swing,
    }
}
