//! # Sensor Collector
//!
//! Runs one collection round every `reading_interval` on a dedicated thread
//! and publishes the result as the shared [`SensorSnapshot`].
//!
//! ## Air reading fallback
//! When acquisition is exhausted the collector does not leave the air fields
//! empty:
//! 1. a last good reading younger than `hold_last_good` is repeated, tagged
//!    [`AirSource::Held`]
//! 2. otherwise the diurnal model in [`fallback`] fills in, tagged
//!    [`AirSource::Synthetic`]
//!
//! The slow sensors keep their previous value on error; the failure is logged
//! and the round continues.
//!
//! After publishing, the snapshot is drawn to the status screen when one is
//! attached. Every `save_interval` it is written to the cache and appended to
//! the history log.

use crate::cache::{HistoryLog, SnapshotCache};
use crate::config::SystemConfig;
use crate::dht::SharedAirSensor;
use crate::fallback;
use crate::renderer::StatusScreen;
use crate::sensors::{light_lux, soil_moisture_percent, AnalogChannel, AnalogInput, Ds18b20};
use crate::{AirSource, Reading, SensorSnapshot};
use chrono::{DateTime, Local, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing::{debug, info, warn};

/// Longest single sleep of the collector thread, so a stop request is
/// noticed promptly.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Collection intervals and the hold policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollectorConfig {
    pub reading_interval: Duration,
    pub hold_last_good: Duration,
    pub save_interval: Duration,
}

impl From<&SystemConfig> for CollectorConfig {
    fn from(system: &SystemConfig) -> Self {
        CollectorConfig {
            reading_interval: Duration::from_millis(system.reading_interval_ms),
            hold_last_good: Duration::from_secs(system.hold_last_good_secs),
            save_interval: Duration::from_secs(system.save_interval_secs),
        }
    }
}

pub struct Collector {
    air: SharedAirSensor,
    analog: Option<Box<dyn AnalogInput + Send>>,
    soil_probe: Option<Ds18b20>,
    cache: Option<SnapshotCache>,
    history: Option<HistoryLog>,
    screen: Option<Box<dyn StatusScreen>>,
    config: CollectorConfig,
    snapshot: Arc<RwLock<SensorSnapshot>>,
    last_good: Option<(Reading, DateTime<Utc>)>,
    last_save: Option<DateTime<Utc>>,
}

impl Collector {
    pub fn new(air: SharedAirSensor, config: CollectorConfig) -> Self {
        Collector {
            air,
            analog: None,
            soil_probe: None,
            cache: None,
            history: None,
            screen: None,
            config,
            snapshot: Arc::new(RwLock::new(SensorSnapshot::empty(Utc::now()))),
            last_good: None,
            last_save: None,
        }
    }

    /// Read soil moisture and light from `adc`.
    pub fn with_analog(mut self, adc: impl AnalogInput + Send + 'static) -> Self {
        self.analog = Some(Box::new(adc));
        self
    }

    pub fn with_soil_probe(mut self, probe: Ds18b20) -> Self {
        self.soil_probe = Some(probe);
        self
    }

    /// Persist snapshots to `cache`, seeding the published snapshot and the
    /// last good air reading from it when it is still fresh.
    pub fn with_cache(mut self, cache: SnapshotCache) -> Self {
        match cache.load() {
            Ok(snapshot) => {
                info!(path = %cache.path().display(), "restored snapshot from cache");
                if snapshot.air_source == AirSource::Live {
                    self.last_good = Some((snapshot.air_reading(), snapshot.timestamp));
                }
                self.publish(snapshot);
            }
            Err(e) => debug!(error = %e, "no usable snapshot cache"),
        }
        self.cache = Some(cache);
        self
    }

    /// Append every saved snapshot to `history`.
    pub fn with_history(mut self, history: HistoryLog) -> Self {
        self.history = Some(history);
        self
    }

    /// Redraw `screen` after every round.
    pub fn with_screen(mut self, screen: impl StatusScreen + 'static) -> Self {
        self.screen = Some(Box::new(screen));
        self
    }

    /// Show `message` on the status screen, if there is one.
    pub fn show_message(&mut self, message: &str) {
        if let Some(screen) = self.screen.as_mut() {
            if let Err(e) = screen.show_message(message) {
                warn!(error = %e, "status screen update failed");
            }
        }
    }

    /// Shared handle to the published snapshot.
    pub fn snapshot_handle(&self) -> Arc<RwLock<SensorSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn latest(&self) -> SensorSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one collection round as of `now` and publish the result.
    pub fn collect_once(&mut self, now: DateTime<Utc>) -> SensorSnapshot {
        let mut snapshot = self.latest();
        snapshot.timestamp = now;

        let (reading, source) = self.air_reading(now);
        snapshot.air_temperature = reading.temperature_c;
        snapshot.air_humidity = reading.humidity_pct;
        snapshot.air_source = source;

        if let Some(adc) = self.analog.as_mut() {
            match adc.read_voltage(AnalogChannel::SoilMoisture) {
                Ok(v) => snapshot.soil_moisture = soil_moisture_percent(v),
                Err(e) => warn!(error = %e, "soil moisture read failed"),
            }
            match adc.read_voltage(AnalogChannel::Light) {
                Ok(v) => snapshot.light_intensity = light_lux(v),
                Err(e) => warn!(error = %e, "light read failed"),
            }
        }

        if let Some(probe) = &self.soil_probe {
            match probe.read_celsius() {
                Ok(t) => snapshot.soil_temperature = t,
                Err(e) => warn!(error = %e, "soil temperature read failed"),
            }
        }

        self.publish(snapshot.clone());
        if let Some(screen) = self.screen.as_mut() {
            if let Err(e) = screen.show_status(&snapshot) {
                warn!(error = %e, "status screen update failed");
            }
        }
        self.maybe_save(now, &snapshot);
        snapshot
    }

    /// Run [`collect_once`](Self::collect_once) every `reading_interval`
    /// until `running` is cleared. The thread hands the collector back when
    /// it stops.
    ///
    /// The thread asks for the highest scheduling priority the OS grants, to
    /// keep preemption out of the bit sampling loop.
    pub fn spawn(mut self, running: Arc<AtomicBool>) -> io::Result<thread::JoinHandle<Self>> {
        thread::Builder::new()
            .name("collector".to_string())
            .spawn(move || {
                if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
                    debug!(error = ?e, "collector runs at normal priority");
                }
                info!(interval = ?self.config.reading_interval, "collector started");
                while running.load(Ordering::SeqCst) {
                    let round = Instant::now();
                    self.collect_once(Utc::now());

                    while running.load(Ordering::SeqCst) {
                        let remaining = self.config.reading_interval.saturating_sub(round.elapsed());
                        if remaining.is_zero() {
                            break;
                        }
                        thread::sleep(remaining.min(STOP_POLL));
                    }
                }
                info!("collector stopped");
                self
            })
    }

    fn air_reading(&mut self, now: DateTime<Utc>) -> (Reading, AirSource) {
        match self.air.acquire() {
            Ok(reading) => {
                self.last_good = Some((reading, now));
                (reading, AirSource::Live)
            }
            Err(e) => {
                if let Some((reading, at)) = self.last_good {
                    let fresh = (now - at)
                        .to_std()
                        .is_ok_and(|age| age <= self.config.hold_last_good);
                    if fresh {
                        warn!(error = %e, "holding last good air reading");
                        return (reading, AirSource::Held);
                    }
                }
                warn!(error = %e, "using synthetic air reading");
                let local = now.with_timezone(&Local);
                (fallback::approximate(Some(local)), AirSource::Synthetic)
            }
        }
    }

    fn publish(&self, snapshot: SensorSnapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    fn maybe_save(&mut self, now: DateTime<Utc>, snapshot: &SensorSnapshot) {
        if self.cache.is_none() && self.history.is_none() {
            return;
        }
        let due = self.last_save.map_or(true, |last| {
            (now - last)
                .to_std()
                .is_ok_and(|since| since >= self.config.save_interval)
        });
        if !due {
            return;
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save(snapshot) {
                warn!(error = %e, "failed to write snapshot cache");
            }
        }
        if let Some(history) = &self.history {
            if let Err(e) = history.append(snapshot) {
                warn!(error = %e, "failed to append to history");
            }
        }
        self.last_save = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::sim::{SimClock, SimLine, SimTime, Waveform};
    use crate::dht::{AcquisitionConfig, AcquisitionDriver, SensorFrame};
    use crate::renderer::test_support::RecordingDisplay;
    use crate::renderer::Screen;
    use crate::sensors::{FixedVoltages, SensorError};
    use tempfile::TempDir;

    fn sensor(waveforms: Vec<Waveform>) -> SharedAirSensor {
        let time = SimTime::new();
        let config = AcquisitionConfig {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            ..AcquisitionConfig::default()
        };
        SharedAirSensor::new(AcquisitionDriver::new(
            SimLine::scripted(time.clone(), waveforms),
            SimClock::new(time),
            config,
        ))
    }

    fn frame(humidity: u8, temperature: u8) -> Waveform {
        Waveform::for_frame(&SensorFrame::new(humidity, 0, temperature, 0))
    }

    fn config() -> CollectorConfig {
        CollectorConfig {
            reading_interval: Duration::from_millis(10),
            hold_last_good: Duration::from_secs(60),
            save_interval: Duration::from_secs(300),
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000 + secs, 0).unwrap()
    }

    /// ADC whose first `good_reads` reads succeed.
    struct FlakyAdc {
        reads: usize,
        good_reads: usize,
    }

    impl AnalogInput for FlakyAdc {
        fn read_voltage(&mut self, channel: AnalogChannel) -> Result<f32, SensorError> {
            self.reads += 1;
            if self.reads > self.good_reads {
                return Err(SensorError::Adc("bus error".to_string()));
            }
            Ok(match channel {
                AnalogChannel::SoilMoisture => 1.65,
                AnalogChannel::Light => 3.3,
            })
        }
    }

    #[test]
    fn test_live_reading() {
        let mut collector = Collector::new(sensor(vec![frame(45, 23)]), config()).with_analog(
            FixedVoltages {
                soil_moisture: 1.65,
                light: 0.66,
            },
        );

        let snapshot = collector.collect_once(at(0));
        assert_eq!(snapshot.air_source, AirSource::Live);
        assert_eq!(snapshot.air_temperature, 23.0);
        assert_eq!(snapshot.air_humidity, 45.0);
        assert!((snapshot.soil_moisture - 50.0).abs() < 0.01);
        assert!((snapshot.light_intensity - 2000.0).abs() < 0.1);
        assert_eq!(snapshot.timestamp, at(0));
    }

    #[test]
    fn test_holds_recent_reading_after_exhaustion() {
        let mut collector = Collector::new(sensor(vec![frame(45, 23)]), config());
        collector.collect_once(at(0));

        let snapshot = collector.collect_once(at(30));
        assert_eq!(snapshot.air_source, AirSource::Held);
        assert_eq!(snapshot.air_temperature, 23.0);
    }

    #[test]
    fn test_synthetic_once_hold_expires() {
        let mut collector = Collector::new(sensor(vec![frame(45, 23)]), config());
        collector.collect_once(at(0));

        let snapshot = collector.collect_once(at(61));
        assert_eq!(snapshot.air_source, AirSource::Synthetic);
        assert!(snapshot.air_reading().is_plausible((0.0, 50.0)));
    }

    #[test]
    fn test_synthetic_without_any_good_reading() {
        let mut collector = Collector::new(sensor(Vec::new()), config());
        let snapshot = collector.collect_once(at(0));
        assert_eq!(snapshot.air_source, AirSource::Synthetic);
    }

    #[test]
    fn test_recovers_to_live() {
        let mut collector = Collector::new(
            sensor(vec![Waveform::silent(), frame(50, 21)]),
            config(),
        );
        assert_eq!(collector.collect_once(at(0)).air_source, AirSource::Synthetic);
        assert_eq!(collector.collect_once(at(2)).air_source, AirSource::Live);
    }

    #[test]
    fn test_failed_analog_keeps_previous_values() {
        let mut collector = Collector::new(sensor(Vec::new()), config()).with_analog(FlakyAdc {
            reads: 0,
            good_reads: 2,
        });

        let first = collector.collect_once(at(0));
        let second = collector.collect_once(at(2));
        assert!((first.soil_moisture - 50.0).abs() < 0.01);
        assert_eq!(second.soil_moisture, first.soil_moisture);
        assert_eq!(second.light_intensity, first.light_intensity);
        assert_eq!(second.timestamp, at(2));
    }

    #[test]
    fn test_publishes_to_shared_handle() {
        let mut collector = Collector::new(sensor(vec![frame(40, 20)]), config());
        let handle = collector.snapshot_handle();
        collector.collect_once(at(0));
        assert_eq!(handle.read().unwrap().air_temperature, 20.0);
    }

    #[test]
    fn test_cache_is_written_and_seeds_hold() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join("snapshot.json"), Duration::from_secs(1800));

        let mut first = Collector::new(sensor(vec![frame(44, 24)]), config()).with_cache(cache.clone());
        first.collect_once(Utc::now());
        assert_eq!(cache.load().unwrap().air_temperature, 24.0);

        // A restarted collector with a dead sensor holds the cached reading.
        let mut second = Collector::new(sensor(Vec::new()), config()).with_cache(cache);
        assert_eq!(second.latest().air_temperature, 24.0);
        let snapshot = second.collect_once(Utc::now());
        assert_eq!(snapshot.air_source, AirSource::Held);
        assert_eq!(snapshot.air_humidity, 44.0);
    }

    #[test]
    fn test_cache_write_is_rate_limited() {
        let dir = TempDir::new().unwrap();
        let cache = SnapshotCache::new(dir.path().join("snapshot.json"), Duration::from_secs(1800));
        let mut collector =
            Collector::new(sensor(vec![frame(44, 24), frame(44, 30)]), config()).with_cache(cache.clone());

        collector.collect_once(at(0));
        collector.collect_once(at(10));
        assert_eq!(cache.load().unwrap().air_temperature, 24.0);
    }

    #[test]
    fn test_history_appended_at_save_interval() {
        let dir = TempDir::new().unwrap();
        let history = HistoryLog::new(dir.path().join("history.jsonl"));
        let mut collector = Collector::new(
            sensor(vec![frame(44, 24), frame(44, 25), frame(44, 26)]),
            config(),
        )
        .with_history(history.clone());

        collector.collect_once(at(0));
        collector.collect_once(at(10));
        collector.collect_once(at(300));

        let saved = history.history(at(0)).unwrap();
        let temperatures: Vec<f32> = saved.iter().map(|s| s.air_temperature).collect();
        assert_eq!(temperatures, vec![24.0, 26.0]);
        assert_eq!(history.history(at(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_screen_redrawn_every_round() {
        let (display, frames) = RecordingDisplay::new();
        let mut collector =
            Collector::new(sensor(vec![frame(45, 23)]), config()).with_screen(Screen(display));

        collector.collect_once(at(0));
        collector.collect_once(at(2));
        assert_eq!(frames.lock().unwrap().len(), 2);
        assert!(frames.lock().unwrap().iter().all(|&lit| lit > 0));

        collector.show_message("System Shutdown");
        assert_eq!(frames.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_show_message_without_screen_is_noop() {
        let mut collector = Collector::new(sensor(Vec::new()), config());
        collector.show_message("System Shutdown");
    }

    #[test]
    fn test_spawned_collector_stops() {
        let collector = Collector::new(sensor(vec![frame(40, 20)]), config());
        let handle = collector.snapshot_handle();
        let running = Arc::new(AtomicBool::new(true));

        let worker = collector.spawn(Arc::clone(&running)).unwrap();
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
        let collector = worker.join().unwrap();

        assert_ne!(handle.read().unwrap().air_source, AirSource::Synthetic);
        assert_eq!(collector.latest(), *handle.read().unwrap());
    }
}
