//! # Monitor Scenario Tests
//!
//! These tests run the collector, the acquisition driver and the controller
//! together over simulated devices, the way the binary wires them.

use crate::{build_collector, history_json, preview_panel, simulated_devices};
use chrono::{DateTime, Utc};
use greenhouse_lib::collector::{Collector, CollectorConfig};
use greenhouse_lib::config::Config;
use greenhouse_lib::cache::HistoryLog;
use greenhouse_lib::control::{ActuatorError, Controller, PwmChannel, SimulatedPwm};
use greenhouse_lib::dht::sim::{SimClock, SimLine, SimTime, Waveform};
use greenhouse_lib::dht::{
    AcquisitionConfig, AcquisitionDriver, DigitalLine, Level, LineError, LineMode, SensorFrame,
    SharedAirSensor, IDLE_MODE,
};
use greenhouse_lib::{AirSource, SensorSnapshot};
use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn quick_config() -> AcquisitionConfig {
    AcquisitionConfig {
        max_attempts: 3,
        retry_delay: Duration::from_millis(500),
        ..AcquisitionConfig::default()
    }
}

fn frame(humidity: u8, temperature: u8) -> Waveform {
    Waveform::for_frame(&SensorFrame::new(humidity, 0, temperature, 0))
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000 + secs, 0).unwrap()
}

/// Config whose cache and 1-Wire directory live in `dir`.
fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.system.cache_path = dir.path().join("snapshot.json").display().to_string();
    config.system.history_path = dir.path().join("history.jsonl").display().to_string();
    config.system.w1_devices_dir = dir.path().display().to_string();
    config
}

/// The simulated devices answer with frames that pass every validation step.
#[test]
fn simulated_sensor_produces_live_readings() {
    let dir = TempDir::new().unwrap();
    let devices = simulated_devices(&config_in(&dir));

    for _ in 0..3 {
        let reading = devices.air.acquire().expect("simulated sensor should never fail");
        assert!(
            reading.is_plausible((0.0, 50.0)),
            "implausible simulated reading {reading:?}"
        );
        assert_eq!(reading.temperature_c.fract(), 0.0);
    }
}

/// One round through the binary's wiring fills every snapshot field.
#[test]
fn simulated_round_fills_snapshot() {
    let dir = TempDir::new().unwrap();
    let probe_dir = dir.path().join("28-00000a1b2c3d");
    fs::create_dir(&probe_dir).unwrap();
    fs::write(
        probe_dir.join("w1_slave"),
        "50 01 4b 46 7f ff 0c 10 1c : crc=1c YES\n50 01 4b 46 7f ff 0c 10 1c t=21000\n",
    )
    .unwrap();

    let config = config_in(&dir);
    let mut devices = simulated_devices(&config);
    let mut collector = build_collector(&config, &mut devices);
    let snapshot = collector.collect_once(Utc::now());

    assert_eq!(snapshot.air_source, AirSource::Live);
    assert!((snapshot.soil_moisture - 1.4 / 3.3 * 100.0).abs() < 0.01);
    assert!((snapshot.light_intensity - 5000.0).abs() < 0.5);
    assert!((snapshot.soil_temperature - 21.0).abs() < 1e-4);
    assert!(
        dir.path().join("snapshot.json").exists(),
        "first round should write the cache"
    );
    let history = HistoryLog::new(&config.system.history_path);
    assert_eq!(history.history(snapshot.timestamp).unwrap(), vec![snapshot]);
}

/// PWM output that records every duty cycle written to it.
#[derive(Clone, Default)]
struct RecordingPwm {
    writes: Arc<Mutex<Vec<f64>>>,
}

impl PwmChannel for RecordingPwm {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        self.writes.lock().unwrap().push(percent);
        Ok(())
    }
}

/// The ASCII preview never drives the fan or the servo.
#[test]
fn preview_leaves_actuators_alone() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let fan = RecordingPwm::default();
    let vent = RecordingPwm::default();
    let mut devices = simulated_devices(&config);
    devices.fan = Box::new(fan.clone());
    devices.vent = Some(Box::new(vent.clone()));

    let panel = preview_panel(&config, &mut devices, false);

    assert!(fan.writes.lock().unwrap().is_empty());
    assert!(vent.writes.lock().unwrap().is_empty());
    assert!(panel.contains("Fan: OFF  Vent: 90° (50% open)  Mode: manual"));
    assert!(panel.contains("Temp: "));
}

/// `--history` prints the saved window as a JSON array.
#[test]
fn history_window_as_json() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let log = HistoryLog::new(&config.system.history_path);
    let mut old = SensorSnapshot::empty(Utc::now() - chrono::Duration::hours(30));
    old.air_temperature = 18.0;
    let mut recent = SensorSnapshot::empty(Utc::now() - chrono::Duration::hours(1));
    recent.air_temperature = 24.5;
    log.append(&old).unwrap();
    log.append(&recent).unwrap();

    let json = history_json(&config, 24).unwrap();
    let parsed: Vec<SensorSnapshot> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, vec![recent]);
    assert_eq!(history_json(&config, 48).unwrap().matches("air_temperature").count(), 2);
}

/// A sensor that drops out degrades live → held → synthetic, and the fan
/// keeps reacting to whatever the snapshot carries.
#[test]
fn sensor_dropout_degrades_gracefully() {
    let time = SimTime::new();
    let line = SimLine::scripted(time.clone(), vec![frame(40, 30)]);
    let air = SharedAirSensor::new(AcquisitionDriver::new(
        line,
        SimClock::new(time.clone()),
        quick_config(),
    ));
    let mut collector = Collector::new(
        air,
        CollectorConfig {
            reading_interval: Duration::from_secs(2),
            hold_last_good: Duration::from_secs(60),
            save_interval: Duration::from_secs(300),
        },
    );
    let mut controller = Controller::new(
        SimulatedPwm::new("fan"),
        Some(SimulatedPwm::new("vent")),
        SimClock::new(time),
        Config::default().thresholds,
        Duration::from_secs(30),
        true,
    );

    let live = collector.collect_once(at(0));
    assert_eq!(live.air_source, AirSource::Live);
    controller.tick(&live);
    assert_eq!(controller.status().fan_speed, 100, "30 °C must start the fan");

    let held = collector.collect_once(at(20));
    assert_eq!(held.air_source, AirSource::Held);
    assert_eq!(held.air_temperature, 30.0);
    controller.tick(&held);
    assert_eq!(controller.status().fan_speed, 100);

    let synthetic = collector.collect_once(at(120));
    assert_eq!(synthetic.air_source, AirSource::Synthetic);
    assert!(synthetic.air_reading().is_plausible((0.0, 50.0)));
}

/// Exhaustion costs bounded simulated time: three attempts and two retry
/// delays, never a hang.
#[test]
fn dead_sensor_blocks_for_bounded_time() {
    let time = SimTime::new();
    let line = SimLine::scripted(time.clone(), Vec::new());
    let air = SharedAirSensor::new(AcquisitionDriver::new(
        line,
        SimClock::new(time.clone()),
        quick_config(),
    ));

    assert!(air.acquire().is_err());
    let elapsed = Duration::from_micros(time.now_us());
    // 3 × (25 ms wake + ~1 ms response wait) + 2 × 500 ms
    assert!(elapsed >= Duration::from_millis(1075));
    assert!(elapsed < Duration::from_millis(1100), "took {elapsed:?}");
}

/// Coarser polling still separates 26 µs zeros from 70 µs ones at the
/// 40 µs threshold.
#[test]
fn slow_polling_still_decodes() {
    let time = SimTime::new();
    let line = SimLine::scripted(time.clone(), vec![frame(36, 25)])
        .with_poll_cost(Duration::from_micros(10));
    let mut driver = AcquisitionDriver::new(line, SimClock::new(time), quick_config());

    let reading = driver.acquire().unwrap();
    assert_eq!(reading.humidity_pct, 36.0);
    assert_eq!(reading.temperature_c, 25.0);
}

/// Line that panics on the first read, recording every mode change.
struct PanickingLine {
    inner: SimLine,
    panic_next_read: bool,
    modes: Arc<Mutex<Vec<LineMode>>>,
}

impl DigitalLine for PanickingLine {
    fn set_mode(&mut self, mode: LineMode) -> Result<(), LineError> {
        self.modes.lock().unwrap().push(mode);
        self.inner.set_mode(mode)
    }

    fn write(&mut self, level: Level) -> Result<(), LineError> {
        self.inner.write(level)
    }

    fn read(&mut self) -> Result<Level, LineError> {
        if self.panic_next_read {
            self.panic_next_read = false;
            panic!("GPIO driver fault");
        }
        self.inner.read()
    }
}

/// A panic mid-transaction still releases the line, and the shared sensor
/// stays usable for the next caller.
#[test]
fn panic_during_transaction_releases_line() {
    let time = SimTime::new();
    let modes = Arc::new(Mutex::new(Vec::new()));
    let line = PanickingLine {
        inner: SimLine::scripted(time.clone(), vec![frame(50, 20), frame(50, 20)]),
        panic_next_read: true,
        modes: Arc::clone(&modes),
    };
    let air = SharedAirSensor::new(AcquisitionDriver::new(
        line,
        SimClock::new(time),
        quick_config(),
    ));

    let worker = {
        let air = air.clone();
        thread::spawn(move || air.acquire())
    };
    assert!(worker.join().is_err(), "transaction should have panicked");
    assert_eq!(modes.lock().unwrap().last(), Some(&IDLE_MODE));

    let reading = air.acquire().expect("sensor should recover after a panic");
    assert_eq!(reading.temperature_c, 20.0);
}
