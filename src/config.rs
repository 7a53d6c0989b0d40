//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! greenhouse-config.toml file. It provides a centralized way to configure GPIO
//! pin assignments, sensor timing, control thresholds and runtime intervals.

use crate::dht::AcquisitionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file name, relative to the working directory
pub const CONFIG_FILE: &str = "greenhouse-config.toml";

/// Application configuration loaded from greenhouse-config.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// GPIO and I²C wiring
    pub gpio: GpioConfig,
    /// Single-wire sensor timing and retry policy
    pub dht: DhtConfig,
    /// Actuator control thresholds
    pub thresholds: ThresholdConfig,
    /// Loop intervals, cache and fallback policy
    pub system: SystemConfig,
    /// Optional telemetry push
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Fixed actuator settings for manual mode
    #[serde(default)]
    pub manual: ManualConfig,
}

/// Pin assignments (BCM numbering)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GpioConfig {
    /// Data line of the humidity/temperature sensor
    pub dht_pin: u8,
    /// Fan PWM output
    pub fan_pin: u8,
    /// Vent servo PWM output
    pub servo_pin: u8,
    /// I²C address of the ADS1115 ADC (soil moisture on A0, light on A1)
    pub adc_address: u16,
    /// I²C address of the 128×64 SSD1306 status screen
    #[serde(default = "default_oled_address")]
    pub oled_address: u8,
}

fn default_oled_address() -> u8 {
    0x3C
}

/// Timing of the single-wire protocol.
///
/// `bit_threshold_us` is the most sensitive value here: high pulses longer
/// than it decode as 1. Nominal pulses are ~26 µs for 0 and ~70 µs for 1.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DhtConfig {
    pub bit_threshold_us: u64,
    /// Host-driven low pulse that wakes the sensor
    pub wake_pulse_ms: u64,
    /// Bound for each acknowledgement edge
    pub response_timeout_us: u64,
    /// Bound for each phase of a data bit
    pub bit_timeout_us: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Readings outside this band are rejected as malformed
    pub temperature_min: f32,
    pub temperature_max: f32,
}

impl DhtConfig {
    /// Driver parameters for this configuration.
    pub fn acquisition(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            bit_threshold: Duration::from_micros(self.bit_threshold_us),
            wake_pulse: Duration::from_millis(self.wake_pulse_ms),
            release_hold: Duration::ZERO,
            response_timeout: Duration::from_micros(self.response_timeout_us),
            bit_timeout: Duration::from_micros(self.bit_timeout_us),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            temperature_range: (self.temperature_min, self.temperature_max),
        }
    }
}

/// Control and display thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThresholdConfig {
    /// Fan stops below this temperature (°C)
    pub temp_min: f32,
    /// Fan starts above this temperature (°C)
    pub temp_max: f32,
    /// Vent fully open below this light level (lux)
    pub light_min: f32,
    /// Vent fully closed above this light level (lux)
    pub light_max: f32,
    pub humidity_min: f32,
    pub humidity_max: f32,
    pub soil_moisture_min: f32,
    pub soil_moisture_max: f32,
}

/// Runtime intervals and fallback policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Sensor collection interval
    pub reading_interval_ms: u64,
    /// Actuator control interval
    pub control_interval_ms: u64,
    /// Minimum time between vent movements
    pub vent_update_secs: u64,
    /// How often the snapshot cache is written
    pub save_interval_secs: u64,
    /// How long a last good air reading may stand in after exhaustion
    pub hold_last_good_secs: u64,
    /// Snapshot cache location
    pub cache_path: String,
    /// Append-only reading history, one JSON snapshot per line
    #[serde(default = "default_history_path")]
    pub history_path: String,
    /// Cache TTL in minutes
    pub cache_ttl_minutes: u64,
    /// Kernel 1-Wire device directory
    pub w1_devices_dir: String,
    /// Start with automatic control enabled
    pub auto_mode: bool,
}

fn default_history_path() -> String {
    "data/greenhouse_history.jsonl".to_string()
}

/// Actuator settings applied when automatic control is off.
///
/// Unset fields leave the actuator where startup parked it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ManualConfig {
    /// Fan speed in percent
    pub fan_speed: Option<u8>,
    /// Vent opening in percent
    pub vent_position: Option<u8>,
}

/// Remote telemetry endpoint
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// POST target; telemetry is disabled when absent
    pub endpoint: Option<String>,
    pub device_id: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            endpoint: None,
            device_id: "greenhouse-01".to_string(),
            interval_secs: 60,
            timeout_secs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gpio: GpioConfig {
                dht_pin: 4,
                fan_pin: 18,
                servo_pin: 12,
                adc_address: 0x48,
                oled_address: default_oled_address(),
            },
            dht: DhtConfig {
                bit_threshold_us: 40,
                wake_pulse_ms: 25,
                response_timeout_us: 1000,
                bit_timeout_us: 500,
                max_attempts: 15,
                retry_delay_ms: 500,
                temperature_min: 0.0,
                temperature_max: 50.0,
            },
            thresholds: ThresholdConfig {
                temp_min: 25.0,
                temp_max: 28.0,
                light_min: 2000.0,
                light_max: 8000.0,
                humidity_min: 40.0,
                humidity_max: 70.0,
                soil_moisture_min: 30.0,
                soil_moisture_max: 70.0,
            },
            system: SystemConfig {
                reading_interval_ms: 2000,
                control_interval_ms: 5000,
                vent_update_secs: 30,
                save_interval_secs: 300,
                hold_last_good_secs: 60,
                cache_path: "/tmp/greenhouse_snapshot.json".to_string(),
                history_path: default_history_path(),
                cache_ttl_minutes: 30,
                w1_devices_dir: "/sys/bus/w1/devices".to_string(),
                auto_mode: true,
            },
            telemetry: TelemetryConfig::default(),
            manual: ManualConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from greenhouse-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file format, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }

    /// Save current configuration to greenhouse-config.toml
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to_path(CONFIG_FILE)
    }
}
