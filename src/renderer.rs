//! # Status Rendering
//!
//! This module renders the latest snapshot to the 128×64 status screen and to
//! an ASCII panel on stdout for development on desktop systems.
//!
//! The screen shows six 10 px rows in the 6×10 font; the ASCII panel adds the
//! actuator state and flags readings outside the configured bands.
//!
//! Buffered displays such as the SSD1306 only change once their frame buffer
//! is flushed; [`Screen`] pairs drawing with the flush and is what the
//! collector redraws after every round.

use crate::config::ThresholdConfig;
use crate::control::DeviceStatus;
use crate::{AirSource, SensorSnapshot};
use chrono::Local;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use std::fmt;
use thiserror::Error;

/// Height of one screen row in pixels
const ROW_HEIGHT: i32 = 10;

/// The six lines shown on the status screen.
pub fn render_lines(snapshot: &SensorSnapshot) -> Vec<String> {
    let time = snapshot.timestamp.with_timezone(&Local);
    vec![
        format!("Temp: {:.1}C", snapshot.air_temperature),
        format!("Humi: {:.1}%", snapshot.air_humidity),
        format!("Soil M: {:.1}%", snapshot.soil_moisture),
        format!("Soil T: {:.1}C", snapshot.soil_temperature),
        format!("Light: {:.0} lux", snapshot.light_intensity),
        time.format("%H:%M:%S").to_string(),
    ]
}

/// Render the status lines onto any monochrome draw target.
pub fn draw_status<D>(snapshot: &SensorSnapshot, display: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    display.clear(BinaryColor::Off)?;
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    for (row, line) in (0..).zip(render_lines(snapshot)) {
        Text::with_baseline(&line, Point::new(0, row * ROW_HEIGHT), style, Baseline::Top)
            .draw(display)?;
    }
    Ok(())
}

/// Clear the screen and show a single message in the top row.
pub fn draw_message<D>(message: &str, display: &mut D) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    display.clear(BinaryColor::Off)?;
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);
    Text::with_baseline(message, Point::zero(), style, Baseline::Top).draw(display)?;
    Ok(())
}

#[derive(Error, Debug)]
#[error("status screen: {0}")]
pub struct ScreenError(pub String);

/// Where the collector shows each new snapshot.
pub trait StatusScreen: Send {
    fn show_status(&mut self, snapshot: &SensorSnapshot) -> Result<(), ScreenError>;
    fn show_message(&mut self, message: &str) -> Result<(), ScreenError>;
}

impl<T: StatusScreen + ?Sized> StatusScreen for Box<T> {
    fn show_status(&mut self, snapshot: &SensorSnapshot) -> Result<(), ScreenError> {
        (**self).show_status(snapshot)
    }

    fn show_message(&mut self, message: &str) -> Result<(), ScreenError> {
        (**self).show_message(message)
    }
}

/// A monochrome display whose frame buffer is sent by an explicit flush.
pub trait BufferedDisplay: DrawTarget<Color = BinaryColor> {
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// [`StatusScreen`] over a [`BufferedDisplay`]: draw, then flush.
pub struct Screen<D>(pub D);

impl<D> Screen<D>
where
    D: BufferedDisplay,
    D::Error: fmt::Debug,
{
    fn present(
        &mut self,
        draw: impl FnOnce(&mut D) -> Result<(), D::Error>,
    ) -> Result<(), ScreenError> {
        draw(&mut self.0)
            .and_then(|()| self.0.flush())
            .map_err(|e| ScreenError(format!("{e:?}")))
    }
}

impl<D> StatusScreen for Screen<D>
where
    D: BufferedDisplay + Send,
    D::Error: fmt::Debug,
{
    fn show_status(&mut self, snapshot: &SensorSnapshot) -> Result<(), ScreenError> {
        self.present(|display| draw_status(snapshot, display))
    }

    fn show_message(&mut self, message: &str) -> Result<(), ScreenError> {
        self.present(|display| draw_message(message, display))
    }
}

/// Where a value sits relative to its configured band.
fn band_flag(value: f32, min: f32, max: f32) -> &'static str {
    if value < min {
        "  LOW"
    } else if value > max {
        "  HIGH"
    } else {
        ""
    }
}

/// Build the ASCII panel.
pub fn format_ascii(
    snapshot: &SensorSnapshot,
    status: &DeviceStatus,
    thresholds: &ThresholdConfig,
) -> String {
    let lines = render_lines(snapshot);
    let mut out = String::new();

    match snapshot.air_source {
        AirSource::Live => {}
        AirSource::Held => out.push_str("⚠ SENSOR STALE (holding last reading)\n\n"),
        AirSource::Synthetic => out.push_str("⚠ SENSOR OFFLINE (estimated air values)\n\n"),
    }

    let flags = [
        band_flag(snapshot.air_temperature, thresholds.temp_min, thresholds.temp_max),
        band_flag(snapshot.air_humidity, thresholds.humidity_min, thresholds.humidity_max),
        band_flag(
            snapshot.soil_moisture,
            thresholds.soil_moisture_min,
            thresholds.soil_moisture_max,
        ),
        "",
        band_flag(snapshot.light_intensity, thresholds.light_min, thresholds.light_max),
        "",
    ];

    out.push_str("┌──────────────────────────┐\n");
    for (line, flag) in lines.iter().zip(flags) {
        out.push_str(&format!("│ {:<24} │{}\n", line, flag));
    }
    out.push_str("└──────────────────────────┘\n");

    let fan = if status.fan_on {
        format!("ON {}%", status.fan_speed)
    } else {
        "OFF".to_string()
    };
    let vent = if status.vent_available {
        format!("{}° ({}% open)", status.vent_angle, status.vent_position_pct())
    } else {
        "unavailable".to_string()
    };
    let mode = if status.auto_mode { "auto" } else { "manual" };
    out.push_str(&format!("Fan: {}  Vent: {}  Mode: {}\n", fan, vent, mode));
    out
}
