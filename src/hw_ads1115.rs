// src/hw_ads1115.rs
//! ADS1115 16-bit ADC over the kernel I²C driver (rppal).

use greenhouse_lib::sensors::{AnalogChannel, AnalogInput, SensorError};
use rppal::i2c::I2c;
use std::thread;
use std::time::Duration;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;
/// ±4.096 V full scale
const FULL_SCALE_VOLTS: f32 = 4.096;
/// One conversion at 128 SPS plus margin
const CONVERSION_TIME: Duration = Duration::from_millis(9);

pub struct Ads1115 {
    i2c: I2c,
}

impl Ads1115 {
    pub fn new(address: u16) -> Result<Self, SensorError> {
        let mut i2c = I2c::new().map_err(|e| SensorError::Adc(e.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|e| SensorError::Adc(e.to_string()))?;
        Ok(Self { i2c })
    }
}

/// Single-shot, single-ended config word for input `index` (0-3).
fn config_word(index: u8) -> u16 {
    let os = 1 << 15; // start conversion
    let mux = u16::from(4 + index.min(3)) << 12; // AINx vs GND
    let pga = 0b001 << 9; // ±4.096 V
    let mode = 1 << 8; // single-shot
    let rate = 0b100 << 5; // 128 SPS
    let comparator_off = 0b11;
    os | mux | pga | mode | rate | comparator_off
}

impl AnalogInput for Ads1115 {
    fn read_voltage(&mut self, channel: AnalogChannel) -> Result<f32, SensorError> {
        let [msb, lsb] = config_word(channel.index()).to_be_bytes();
        self.i2c
            .write(&[REG_CONFIG, msb, lsb])
            .map_err(|e| SensorError::Adc(e.to_string()))?;
        thread::sleep(CONVERSION_TIME);

        let mut raw = [0u8; 2];
        self.i2c
            .write_read(&[REG_CONVERSION], &mut raw)
            .map_err(|e| SensorError::Adc(e.to_string()))?;

        let counts = i16::from_be_bytes(raw);
        Ok(f32::from(counts) * FULL_SCALE_VOLTS / 32768.0)
    }
}
