//! # Greenhouse Monitor Core Library
//!
//! This library provides the data structures, sensor acquisition and control
//! logic for a single-board-computer greenhouse monitor. It is written for a
//! Raspberry Pi class target: a handful of sensors polled every few seconds,
//! two actuators, a small status screen and an optional telemetry push.
//!
//! ## Design Philosophy
//!
//! ### Hardware at the edges
//! Every piece of hardware is reached through a narrow trait:
//! - [`dht::DigitalLine`] for the bit-banged humidity/temperature sensor
//! - [`sensors::AnalogInput`] for the ADC channels (soil moisture, light)
//! - [`control::PwmChannel`] for the fan and the vent servo
//! - [`renderer::BufferedDisplay`] for the status screen
//!
//! The binary wires real GPIO/I²C implementations behind the `hardware`
//! feature; everything in this crate runs and is tested on a desktop.
//!
//! ### Acquisition is bounded
//! The single-wire sensor is read with monotonic-clock bounded waits at every
//! edge. A disconnected sensor costs a few milliseconds per attempt, never a
//! hung thread. Only exhaustion of the retry budget is reported upward; the
//! [`collector`] decides what to show instead.
//!
//! ### Data Flow
//! 1. **Acquire**: wake pulse → handshake → 40 bit pulses → checksum → range check
//! 2. **Collect**: air reading (live, held or synthetic) + soil + light → [`SensorSnapshot`]
//! 3. **Act**: fan speed and vent angle from the snapshot
//! 4. **Report**: status screen, snapshot cache, history log, optional telemetry push
//!
//! ## Core Types
//! - [`Reading`]: one accepted air temperature/humidity pair
//! - [`SensorSnapshot`]: the latest value of every sensor with its provenance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod cache;
pub mod collector;
pub mod config;
pub mod control;
pub mod dht;
pub mod fallback;
pub mod renderer;
pub mod sensors;
pub mod telemetry;

/// An accepted air temperature and relative humidity pair.
///
/// Produced either from a validated sensor frame or from the synthetic
/// fallback model. The single-wire sensor family reports whole units only,
/// so live readings always carry integral values.
///
/// # Example
/// ```
/// use greenhouse_lib::Reading;
///
/// let reading = Reading { temperature_c: 25.0, humidity_pct: 36.0 };
/// assert!(reading.is_plausible((0.0, 50.0)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Air temperature in degrees Celsius
    pub temperature_c: f32,
    /// Relative humidity in percent (0-100)
    pub humidity_pct: f32,
}

impl Reading {
    /// True when humidity is within 0-100 % and temperature is inside the
    /// inclusive `(min, max)` band.
    pub fn is_plausible(&self, temperature_band: (f32, f32)) -> bool {
        (0.0..=100.0).contains(&self.humidity_pct)
            && (temperature_band.0..=temperature_band.1).contains(&self.temperature_c)
    }
}

/// Where the air reading of a snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AirSource {
    /// Acquired from the sensor during this collection round
    Live,
    /// Last known good reading reused after acquisition was exhausted
    Held,
    /// Generated by [`fallback::approximate`]
    Synthetic,
}

/// Latest value of every greenhouse sensor.
///
/// The collector replaces a field only when the corresponding sensor delivers
/// a new value, so a failing soil probe keeps showing its last reading while
/// the rest of the snapshot stays current.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use greenhouse_lib::{AirSource, SensorSnapshot};
///
/// let snapshot = SensorSnapshot::empty(Utc::now());
/// assert_eq!(snapshot.air_source, AirSource::Synthetic);
/// assert_eq!(snapshot.light_intensity, 0.0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Air temperature in °C
    pub air_temperature: f32,
    /// Air relative humidity in %
    pub air_humidity: f32,
    /// Soil moisture in % (0-100)
    pub soil_moisture: f32,
    /// Soil temperature in °C
    pub soil_temperature: f32,
    /// Light intensity in lux
    pub light_intensity: f32,
    /// Provenance of the air temperature/humidity pair
    pub air_source: AirSource,
    /// Time of the collection round that produced this snapshot
    pub timestamp: DateTime<Utc>,
}

impl SensorSnapshot {
    /// A zeroed snapshot, used before the first collection round completes.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        SensorSnapshot {
            air_temperature: 0.0,
            air_humidity: 0.0,
            soil_moisture: 0.0,
            soil_temperature: 0.0,
            light_intensity: 0.0,
            air_source: AirSource::Synthetic,
            timestamp,
        }
    }

    /// The air temperature/humidity pair as a [`Reading`].
    pub fn air_reading(&self) -> Reading {
        Reading {
            temperature_c: self.air_temperature,
            humidity_pct: self.air_humidity,
        }
    }
}
