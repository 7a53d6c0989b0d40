//! # Analog and 1-Wire Sensors
//!
//! The slow sensors of the greenhouse: soil moisture and light through an ADC,
//! soil temperature through the kernel's 1-Wire driver. None of these need
//! precise timing, so they are read on the collector thread after the air
//! sensor transaction has finished.

pub mod ds18b20;

pub use ds18b20::Ds18b20;

use thiserror::Error;

/// Full-scale supply voltage of the analog sensors
pub const SUPPLY_VOLTAGE: f32 = 3.3;
/// Light level reported at full-scale voltage
pub const FULL_SCALE_LUX: f32 = 10_000.0;

/// Errors from the slow sensors.
#[derive(Error, Debug)]
pub enum SensorError {
    /// ADC communication failed
    #[error("ADC error: {0}")]
    Adc(String),

    /// 1-Wire device file could not be read
    #[error("1-Wire IO: {0}")]
    Io(#[from] std::io::Error),

    /// The 1-Wire driver reported a CRC failure or unexpected content
    #[error("1-Wire read invalid: {0}")]
    InvalidW1Data(String),

    /// No `28-*` device is present
    #[error("no DS18B20 device found")]
    NoDevice,
}

/// ADC input assignments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalogChannel {
    SoilMoisture,
    Light,
}

impl AnalogChannel {
    /// Single-ended ADC input the channel is wired to.
    pub fn index(self) -> u8 {
        match self {
            AnalogChannel::SoilMoisture => 0,
            AnalogChannel::Light => 1,
        }
    }
}

/// A multi-channel ADC.
pub trait AnalogInput {
    fn read_voltage(&mut self, channel: AnalogChannel) -> Result<f32, SensorError>;
}

impl<T: AnalogInput + ?Sized> AnalogInput for Box<T> {
    fn read_voltage(&mut self, channel: AnalogChannel) -> Result<f32, SensorError> {
        (**self).read_voltage(channel)
    }
}

/// Soil moisture in percent: 0 V is dry, full supply is saturated.
pub fn soil_moisture_percent(voltage: f32) -> f32 {
    (voltage / SUPPLY_VOLTAGE * 100.0).clamp(0.0, 100.0)
}

/// Light intensity in lux, linear in the sensor voltage.
pub fn light_lux(voltage: f32) -> f32 {
    voltage.max(0.0) * FULL_SCALE_LUX / SUPPLY_VOLTAGE
}

/// An ADC stand-in that reports fixed voltages, for simulation.
#[derive(Clone, Copy, Debug)]
pub struct FixedVoltages {
    pub soil_moisture: f32,
    pub light: f32,
}

impl AnalogInput for FixedVoltages {
    fn read_voltage(&mut self, channel: AnalogChannel) -> Result<f32, SensorError> {
        Ok(match channel {
            AnalogChannel::SoilMoisture => self.soil_moisture,
            AnalogChannel::Light => self.light,
        })
    }
}
