//! # Simulated Sensor Line
//!
//! A deterministic stand-in for the GPIO pin and the clock, used by the test
//! suite and by the binary's `--simulate` mode.
//!
//! [`SimClock`] and [`SimLine`] share one [`SimTime`]. Time only moves when
//! the driver sleeps or polls the line (each poll costs a fixed number of
//! microseconds), so a transaction plays out identically on every run and on
//! any machine, however loaded.
//!
//! When the driver releases the line (output → input) the line starts
//! replaying the next [`Waveform`] from its source.

use super::clock::Clock;
use super::frame::SensorFrame;
use super::line::{DigitalLine, Level, LineError, LineMode, Pull, IDLE_MODE};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared simulated time in microseconds.
#[derive(Clone, Debug, Default)]
pub struct SimTime(Arc<AtomicU64>);

impl SimTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.0.fetch_add(micros, Ordering::SeqCst);
    }
}

/// [`Clock`] over a [`SimTime`]; sleeping advances the shared time instantly.
#[derive(Clone, Debug)]
pub struct SimClock {
    time: SimTime,
}

impl SimClock {
    pub fn new(time: SimTime) -> Self {
        SimClock { time }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.time.now_us())
    }

    fn sleep(&mut self, duration: Duration) {
        self.time.advance(duration);
    }
}

/// What the sensor does to the line after the host releases it: a list of
/// `(level, microseconds)` segments, then `trailing` forever.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Waveform {
    segments: Vec<(Level, u64)>,
    trailing: Level,
}

impl Waveform {
    /// Delay between release and the sensor pulling the line low.
    pub const RESPONSE_DELAY_US: u64 = 30;
    pub const RESPONSE_LOW_US: u64 = 80;
    pub const RESPONSE_HIGH_US: u64 = 80;
    /// Low phase preceding every data bit.
    pub const BIT_LOW_US: u64 = 50;
    pub const ZERO_HIGH_US: u64 = 26;
    pub const ONE_HIGH_US: u64 = 70;

    pub fn new(segments: Vec<(Level, u64)>, trailing: Level) -> Self {
        Waveform { segments, trailing }
    }

    /// A disconnected sensor: the pull-up holds the line high forever.
    pub fn silent() -> Self {
        Waveform::new(Vec::new(), Level::High)
    }

    /// Handshake followed by the given bits. Fewer than 40 bits models a
    /// sensor that stops transmitting mid-frame.
    pub fn from_bits(bits: &[u8]) -> Self {
        let mut segments = vec![
            (Level::High, Self::RESPONSE_DELAY_US),
            (Level::Low, Self::RESPONSE_LOW_US),
            (Level::High, Self::RESPONSE_HIGH_US),
        ];
        for &bit in bits {
            let high = if bit == 1 {
                Self::ONE_HIGH_US
            } else {
                Self::ZERO_HIGH_US
            };
            segments.push((Level::Low, Self::BIT_LOW_US));
            segments.push((Level::High, high));
        }
        segments.push((Level::Low, Self::BIT_LOW_US));
        Waveform::new(segments, Level::High)
    }

    pub fn for_frame(frame: &SensorFrame) -> Self {
        Self::from_bits(&frame.to_bits())
    }

    /// Level `elapsed_us` microseconds after release.
    pub fn level_at(&self, elapsed_us: u64) -> Level {
        let mut end = 0u64;
        for &(level, duration) in &self.segments {
            end = end.saturating_add(duration);
            if elapsed_us < end {
                return level;
            }
        }
        self.trailing
    }
}

type WaveformSource = Box<dyn FnMut() -> Waveform + Send>;

/// Simulated single-wire sensor attached to a GPIO pin.
pub struct SimLine {
    time: SimTime,
    source: WaveformSource,
    mode: LineMode,
    driven: Level,
    active: Option<(Waveform, u64)>,
    poll_cost: Duration,
    transactions: usize,
}

impl SimLine {
    /// Cost of one `read()` in simulated time.
    pub const DEFAULT_POLL_COST: Duration = Duration::from_micros(1);

    /// A line whose sensor answers each transaction with `source()`.
    pub fn new(time: SimTime, source: impl FnMut() -> Waveform + Send + 'static) -> Self {
        SimLine {
            time,
            source: Box::new(source),
            mode: IDLE_MODE,
            driven: Level::High,
            active: None,
            poll_cost: Self::DEFAULT_POLL_COST,
            transactions: 0,
        }
    }

    /// A line that replays `waveforms` in order, then stays silent.
    pub fn scripted(time: SimTime, waveforms: Vec<Waveform>) -> Self {
        let mut queue = VecDeque::from(waveforms);
        Self::new(time, move || queue.pop_front().unwrap_or_else(Waveform::silent))
    }

    pub fn with_poll_cost(mut self, poll_cost: Duration) -> Self {
        self.poll_cost = poll_cost;
        self
    }

    pub fn mode(&self) -> LineMode {
        self.mode
    }

    /// Number of times the host released the line to the sensor.
    pub fn transactions(&self) -> usize {
        self.transactions
    }
}

impl DigitalLine for SimLine {
    fn set_mode(&mut self, mode: LineMode) -> Result<(), LineError> {
        match mode {
            LineMode::Output => self.active = None,
            LineMode::Input(_) if self.mode == LineMode::Output => {
                self.active = Some(((self.source)(), self.time.now_us()));
                self.transactions += 1;
            }
            LineMode::Input(_) => {}
        }
        self.mode = mode;
        Ok(())
    }

    fn write(&mut self, level: Level) -> Result<(), LineError> {
        self.driven = level;
        Ok(())
    }

    fn read(&mut self) -> Result<Level, LineError> {
        let pull = match self.mode {
            LineMode::Output => return Ok(self.driven),
            LineMode::Input(pull) => pull,
        };
        self.time.advance(self.poll_cost);
        Ok(match &self.active {
            Some((waveform, started)) => waveform.level_at(self.time.now_us() - started),
            None if pull == Pull::Down => Level::Low,
            None => Level::High,
        })
    }
}
