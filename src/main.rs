//! # Greenhouse Monitor Application Entry Point
//!
//! This binary crate wires the library to real or simulated devices and runs
//! the monitor: the collector thread, the control loop and the optional
//! telemetry push. It supports production mode (GPIO/I²C hardware) and
//! development modes (`--simulate`, `--stdout`) that run on any desktop.
//!
//! ```text
//! greenhouse-monitor [--stdout] [--simulate] [--manual] [--verbose]
//!                    [--config PATH] [--history HOURS]
//! ```

// Test modules
#[cfg(test)]
mod tests;

#[cfg(all(target_os = "linux", feature = "hardware"))]
mod gpio_rppal;
#[cfg(all(target_os = "linux", feature = "hardware"))]
mod hw_ads1115;
#[cfg(all(target_os = "linux", feature = "hardware"))]
mod hw_ssd1306;

use anyhow::Context;
use chrono::Utc;
use greenhouse_lib::cache::{HistoryLog, SnapshotCache};
use greenhouse_lib::collector::{Collector, CollectorConfig};
use greenhouse_lib::config::Config;
use greenhouse_lib::control::{Controller, DeviceStatus, PwmChannel, SimulatedPwm};
use greenhouse_lib::dht::sim::{SimClock, SimLine, SimTime, Waveform};
use greenhouse_lib::dht::{AcquisitionDriver, MonotonicClock, SensorFrame, SharedAirSensor};
use greenhouse_lib::renderer::{format_ascii, StatusScreen};
use greenhouse_lib::sensors::{AnalogInput, Ds18b20, FixedVoltages};
use greenhouse_lib::telemetry::TelemetryClient;
use greenhouse_lib::{fallback, SensorSnapshot};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{error, info, warn, Level};

type Actuator = Box<dyn PwmChannel + Send>;
type MonitorController = Controller<Actuator, Actuator, MonotonicClock>;

const USAGE: &str = "usage: greenhouse-monitor [--stdout] [--simulate] [--manual] [--verbose] [--config PATH] [--history HOURS]";

/// Command line options.
#[derive(Debug, Default, PartialEq)]
struct Options {
    /// One collection round rendered as ASCII, then exit
    stdout: bool,
    /// Use simulated devices even when hardware support is compiled in
    simulate: bool,
    /// Start with automatic control off, whatever the config says
    manual: bool,
    verbose: bool,
    config_path: Option<PathBuf>,
    /// Print the saved readings of the last N hours as JSON, then exit
    history_hours: Option<u32>,
}

fn parse_args<I>(args: I) -> anyhow::Result<Options>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdout" => options.stdout = true,
            "--simulate" => options.simulate = true,
            "--manual" => options.manual = true,
            "--verbose" | "-v" => options.verbose = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                options.config_path = Some(PathBuf::from(path));
            }
            "--history" => {
                let hours = args.next().context("--history needs a number of hours")?;
                let hours = hours
                    .parse()
                    .with_context(|| format!("invalid --history value {hours:?}"))?;
                options.history_hours = Some(hours);
            }
            other => anyhow::bail!("unknown argument {other:?}\n{USAGE}"),
        }
    }
    Ok(options)
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Everything the monitor talks to.
struct Devices {
    air: SharedAirSensor,
    analog: Option<Box<dyn AnalogInput + Send>>,
    soil_probe: Option<Ds18b20>,
    fan: Actuator,
    vent: Option<Actuator>,
    screen: Option<Box<dyn StatusScreen>>,
}

/// Devices backed by the simulated sensor line: every transaction replays a
/// frame of the diurnal fallback model.
fn simulated_devices(config: &Config) -> Devices {
    let time = SimTime::new();
    let line = SimLine::new(time.clone(), || {
        let reading = fallback::approximate(None);
        Waveform::for_frame(&SensorFrame::from_reading(&reading))
    });
    let driver = AcquisitionDriver::new(line, SimClock::new(time), config.dht.acquisition());

    Devices {
        air: SharedAirSensor::new(driver),
        analog: Some(Box::new(FixedVoltages {
            soil_moisture: 1.4,
            light: 1.65,
        })),
        soil_probe: find_soil_probe(config),
        fan: Box::new(SimulatedPwm::new("fan")),
        vent: Some(Box::new(SimulatedPwm::new("vent"))),
        screen: None,
    }
}

fn find_soil_probe(config: &Config) -> Option<Ds18b20> {
    match Ds18b20::discover(&config.system.w1_devices_dir) {
        Ok(probe) => Some(probe),
        Err(e) => {
            warn!(error = %e, "soil temperature probe unavailable");
            None
        }
    }
}

/// Devices on the Pi's GPIO header and I²C bus.
///
/// The sensor line and the fan are required; the vent servo, the ADC and the
/// status screen are optional and only logged when missing.
#[cfg(all(target_os = "linux", feature = "hardware"))]
fn hardware_devices(config: &Config) -> anyhow::Result<Devices> {
    use crate::gpio_rppal::{RppalLine, RppalPwm, FAN_PWM_HZ, SERVO_PWM_HZ};
    use crate::hw_ads1115::Ads1115;
    use crate::hw_ssd1306::Oled;
    use greenhouse_lib::renderer::Screen;
    use rppal::gpio::Gpio;

    let gpio = Gpio::new().context("open GPIO")?;
    let pins = &config.gpio;
    info!(
        dht = pins.dht_pin,
        fan = pins.fan_pin,
        servo = pins.servo_pin,
        adc = %format!("{:#04x}", pins.adc_address),
        "GPIO pin configuration"
    );

    let line = RppalLine::new(&gpio, pins.dht_pin).context("claim sensor line")?;
    let driver = AcquisitionDriver::new(line, MonotonicClock::new(), config.dht.acquisition());
    let fan = RppalPwm::new(&gpio, pins.fan_pin, FAN_PWM_HZ).context("claim fan output")?;

    let vent: Option<Actuator> = match RppalPwm::new(&gpio, pins.servo_pin, SERVO_PWM_HZ) {
        Ok(servo) => Some(Box::new(servo)),
        Err(e) => {
            warn!(error = %e, "vent servo unavailable");
            None
        }
    };
    let analog: Option<Box<dyn AnalogInput + Send>> = match Ads1115::new(pins.adc_address) {
        Ok(adc) => Some(Box::new(adc)),
        Err(e) => {
            warn!(error = %e, "ADC unavailable, soil moisture and light disabled");
            None
        }
    };
    let screen: Option<Box<dyn StatusScreen>> = match Oled::new(pins.oled_address) {
        Ok(oled) => {
            let mut screen = Screen(oled);
            if let Err(e) = screen.show_message("System Starting...") {
                warn!(error = %e, "status screen did not accept the first frame");
            }
            Some(Box::new(screen))
        }
        Err(e) => {
            warn!(error = %e, "status screen unavailable");
            None
        }
    };

    Ok(Devices {
        air: SharedAirSensor::new(driver),
        analog,
        soil_probe: find_soil_probe(config),
        fan: Box::new(fan),
        vent,
        screen,
    })
}

#[cfg(not(all(target_os = "linux", feature = "hardware")))]
fn hardware_devices(_config: &Config) -> anyhow::Result<Devices> {
    anyhow::bail!("hardware support not compiled in; rebuild with --features hardware on Linux")
}

fn build_collector(config: &Config, devices: &mut Devices) -> Collector {
    let cache = SnapshotCache::new(
        &config.system.cache_path,
        Duration::from_secs(config.system.cache_ttl_minutes * 60),
    );
    let mut collector = Collector::new(devices.air.clone(), CollectorConfig::from(&config.system))
        .with_cache(cache)
        .with_history(HistoryLog::new(&config.system.history_path));
    if let Some(adc) = devices.analog.take() {
        collector = collector.with_analog(adc);
    }
    if let Some(probe) = devices.soil_probe.take() {
        collector = collector.with_soil_probe(probe);
    }
    if let Some(screen) = devices.screen.take() {
        collector = collector.with_screen(screen);
    }
    collector
}

/// One collection round rendered as the ASCII panel.
///
/// The actuators are left untouched; the panel shows them as startup would
/// leave them.
fn preview_panel(config: &Config, devices: &mut Devices, auto_mode: bool) -> String {
    let mut collector = build_collector(config, devices);
    let snapshot = collector.collect_once(Utc::now());
    let status = DeviceStatus::parked(devices.vent.is_some(), auto_mode);
    format_ascii(&snapshot, &status, &config.thresholds)
}

/// Saved snapshots of the last `hours` hours as a JSON array.
fn history_json(config: &Config, hours: u32) -> anyhow::Result<String> {
    let log = HistoryLog::new(&config.system.history_path);
    let since = Utc::now() - chrono::Duration::hours(i64::from(hours));
    let snapshots = log
        .history(since)
        .with_context(|| format!("read history from {}", log.path().display()))?;
    Ok(serde_json::to_string_pretty(&snapshots)?)
}

fn lock(controller: &Mutex<MonitorController>) -> MutexGuard<'_, MonitorController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_snapshot(snapshot: &RwLock<SensorSnapshot>) -> SensorSnapshot {
    snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Control and telemetry loop; returns on Ctrl-C.
async fn run(
    config: &Config,
    snapshot: Arc<RwLock<SensorSnapshot>>,
    controller: Arc<Mutex<MonitorController>>,
    telemetry: Option<TelemetryClient>,
) {
    let mut control_tick =
        tokio::time::interval(Duration::from_millis(config.system.control_interval_ms.max(1)));
    let mut telemetry_tick =
        tokio::time::interval(Duration::from_secs(config.telemetry.interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for Ctrl-C");
                }
                info!("shutdown requested");
                break;
            }
            _ = control_tick.tick() => {
                let current = read_snapshot(&snapshot);
                let controller = Arc::clone(&controller);
                // Servo moves sleep between steps; keep them off the async workers.
                let round = tokio::task::spawn_blocking(move || lock(&controller).tick(&current));
                if let Err(e) = round.await {
                    error!(error = %e, "control round failed");
                }
            }
            _ = telemetry_tick.tick(), if telemetry.is_some() => {
                if let Some(client) = &telemetry {
                    let current = read_snapshot(&snapshot);
                    let status = lock(&controller).status();
                    if let Err(e) = client.push(&current, &status).await {
                        warn!(error = %e, endpoint = client.endpoint(), "telemetry push failed");
                    }
                }
            }
        }
    }
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    let options = parse_args(env::args().skip(1))?;
    init_logging(options.verbose);

    let config = match &options.config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    if let Some(hours) = options.history_hours {
        println!("{}", history_json(&config, hours)?);
        return Ok(());
    }

    let hardware_available = cfg!(all(target_os = "linux", feature = "hardware"));
    let mut devices = if options.simulate || !hardware_available {
        info!("running with simulated devices");
        simulated_devices(&config)
    } else {
        hardware_devices(&config)?
    };

    // Development mode: one round as ASCII output
    if options.stdout {
        let auto_mode = config.system.auto_mode && !options.manual;
        print!("{}", preview_panel(&config, &mut devices, auto_mode));
        return Ok(());
    }

    let collector = build_collector(&config, &mut devices);
    let mut controller = Controller::new(
        devices.fan,
        devices.vent,
        MonotonicClock::new(),
        config.thresholds.clone(),
        Duration::from_secs(config.system.vent_update_secs),
        config.system.auto_mode,
    );
    if options.manual {
        controller.set_auto_mode(false);
    }
    if !controller.status().auto_mode {
        if let Err(e) = controller.apply_manual(&config.manual) {
            error!(error = %e, "failed to apply manual settings");
        }
    }

    let telemetry = TelemetryClient::from_config(&config.telemetry).context("build telemetry client")?;
    if let Some(client) = &telemetry {
        info!(endpoint = client.endpoint(), "telemetry enabled");
    }

    let running = Arc::new(AtomicBool::new(true));
    let snapshot = collector.snapshot_handle();
    let worker = collector
        .spawn(Arc::clone(&running))
        .context("spawn collector thread")?;
    let controller = Arc::new(Mutex::new(controller));

    // Create Tokio runtime for the control loop and telemetry
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(&config, snapshot, Arc::clone(&controller), telemetry));

    running.store(false, Ordering::SeqCst);
    match worker.join() {
        Ok(mut collector) => collector.show_message("System Shutdown"),
        Err(_) => error!("collector thread panicked"),
    }
    lock(&controller).shutdown();
    info!("greenhouse monitor stopped");
    Ok(())
}
