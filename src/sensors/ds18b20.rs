//! DS18B20 soil probe via the kernel `w1-therm` driver.
//!
//! The driver exposes each probe as `<w1 dir>/28-<serial>/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line must end in `YES` (CRC ok); `t=` is millidegrees Celsius.

use super::SensorError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Family code prefix of DS18B20 devices
const FAMILY_PREFIX: &str = "28-";

/// One DS18B20 probe.
#[derive(Clone, Debug)]
pub struct Ds18b20 {
    device_file: PathBuf,
}

impl Ds18b20 {
    pub fn new(device_file: PathBuf) -> Self {
        Ds18b20 { device_file }
    }

    /// First DS18B20 under the 1-Wire device directory.
    pub fn discover<P: AsRef<Path>>(devices_dir: P) -> Result<Self, SensorError> {
        let mut candidates: Vec<PathBuf> = fs::read_dir(devices_dir.as_ref())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(FAMILY_PREFIX))
            .map(|entry| entry.path().join("w1_slave"))
            .collect();
        candidates.sort();

        let device_file = candidates.into_iter().next().ok_or(SensorError::NoDevice)?;
        debug!(path = %device_file.display(), "found DS18B20 probe");
        Ok(Ds18b20 { device_file })
    }

    pub fn device_file(&self) -> &Path {
        &self.device_file
    }

    /// Soil temperature in °C.
    pub fn read_celsius(&self) -> Result<f32, SensorError> {
        let contents = fs::read_to_string(&self.device_file)?;
        parse_w1_slave(&contents)
    }
}

/// Parse the contents of a `w1_slave` file into °C.
pub fn parse_w1_slave(contents: &str) -> Result<f32, SensorError> {
    let mut lines = contents.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| SensorError::InvalidW1Data("empty device file".to_string()))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(SensorError::InvalidW1Data("CRC check failed".to_string()));
    }

    let data_line = lines
        .next()
        .ok_or_else(|| SensorError::InvalidW1Data("missing data line".to_string()))?;
    let (_, millis) = data_line
        .split_once("t=")
        .ok_or_else(|| SensorError::InvalidW1Data("missing t= field".to_string()))?;
    let millis: f32 = millis
        .trim()
        .parse()
        .map_err(|_| SensorError::InvalidW1Data(format!("bad temperature {:?}", millis.trim())))?;

    Ok(millis / 1000.0)
}
