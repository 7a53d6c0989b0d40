//! # Acquisition Driver
//!
//! Runs one complete acquisition transaction against the single-wire sensor
//! and retries until a reading is accepted or the attempt budget is spent.
//!
//! ## Transaction
//! ```text
//! Idle → Requesting → AwaitingResponse → Sampling → Validating → Accepted
//!            ▲                                          │
//!            └──────────────── Retrying ◄───────────────┘ → Exhausted
//! ```
//!
//! 1. **Requesting**: drive the line low for the wake pulse, then high.
//! 2. **AwaitingResponse**: release the line (input, pull-up) and wait for the
//!    sensor's acknowledgement: high → low → high → low.
//! 3. **Sampling**: 40 times, wait out the low phase and time the high phase.
//! 4. **Validating**: decode, verify the checksum, check the physical range.
//!
//! Every wait is bounded by elapsed monotonic time. A bound that expires
//! aborts the transaction with [`AcquisitionOutcome::Timeout`] naming the
//! stage; a partially captured frame is discarded, never decoded.
//!
//! The line is held through a [`LineGuard`], so it returns to idle on every
//! exit path. The sampling loop polls without yielding.

use super::clock::Clock;
use super::frame::{decode_bits, sample_bit, FrameError, RawFrame, FRAME_BITS};
use super::line::{DigitalLine, EdgeEvent, Level, LineError, LineGuard, LineMode, IDLE_MODE};
use crate::Reading;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Timing and retry parameters of the acquisition driver.
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionConfig {
    /// High pulses longer than this are 1 bits
    pub bit_threshold: Duration,
    /// How long the host holds the line low to wake the sensor
    pub wake_pulse: Duration,
    /// How long the host drives the line high before releasing it
    pub release_hold: Duration,
    /// Bound for each acknowledgement wait
    pub response_timeout: Duration,
    /// Bound for each phase of a data bit
    pub bit_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Accepted temperature band in °C, inclusive
    pub temperature_range: (f32, f32),
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            bit_threshold: Duration::from_micros(40),
            wake_pulse: Duration::from_millis(25),
            release_hold: Duration::ZERO,
            response_timeout: Duration::from_micros(1000),
            bit_timeout: Duration::from_micros(500),
            max_attempts: 15,
            retry_delay: Duration::from_millis(500),
            temperature_range: (0.0, 50.0),
        }
    }
}

/// Wait point at which a transaction timed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Line never pulled low after release
    AwaitResponse,
    /// Acknowledgement low phase never ended
    ResponseLow,
    /// Acknowledgement high phase never ended
    ResponseHigh,
    /// Low phase of data bit `n` never ended
    BitLow(u8),
    /// High phase of data bit `n` never ended
    BitHigh(u8),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::AwaitResponse => f.write_str("await_response"),
            Stage::ResponseLow => f.write_str("response_low"),
            Stage::ResponseHigh => f.write_str("response_high"),
            Stage::BitLow(i) | Stage::BitHigh(i) => write!(f, "bit_{i}"),
        }
    }
}

/// Why a decoded frame was rejected without a checksum failure.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum Malformed {
    #[error(transparent)]
    Frame(FrameError),

    #[error("reading out of range ({}°C, {}%)", .0.temperature_c, .0.humidity_pct)]
    OutOfRange(Reading),
}

/// Result of one acquisition transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionOutcome {
    Ok(Reading),
    Timeout(Stage),
    ChecksumMismatch { expected: u8, actual: u8 },
    MalformedFrame(Malformed),
    /// The GPIO layer itself failed
    Line(LineError),
}

impl fmt::Display for AcquisitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionOutcome::Ok(r) => {
                write!(f, "ok ({}°C, {}%)", r.temperature_c, r.humidity_pct)
            }
            AcquisitionOutcome::Timeout(stage) => write!(f, "timeout at {stage}"),
            AcquisitionOutcome::ChecksumMismatch { expected, actual } => write!(
                f,
                "checksum mismatch (expected {expected:#04x}, found {actual:#04x})"
            ),
            AcquisitionOutcome::MalformedFrame(reason) => write!(f, "{reason}"),
            AcquisitionOutcome::Line(e) => write!(f, "{e}"),
        }
    }
}

/// The only failure surfaced to callers of [`AcquisitionDriver::acquire`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("sensor acquisition exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Driver state, observable between calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Requesting,
    AwaitingResponse,
    Sampling,
    Validating,
    Accepted,
    Retrying,
    Exhausted,
}

/// Reasons a transaction stopped before a full frame was captured.
enum Abort {
    Timeout(Stage),
    Line(LineError),
}

impl From<LineError> for Abort {
    fn from(e: LineError) -> Self {
        Abort::Line(e)
    }
}

/// Something that yields air readings, one blocking transaction at a time.
pub trait AirSensor {
    fn acquire(&mut self) -> Result<Reading, AcquisitionError>;
}

/// Owns the sensor line and runs acquisition transactions over it.
pub struct AcquisitionDriver<L, C> {
    line: L,
    clock: C,
    config: AcquisitionConfig,
    state: DriverState,
}

impl<L: DigitalLine, C: Clock> AcquisitionDriver<L, C> {
    pub fn new(line: L, clock: C, config: AcquisitionConfig) -> Self {
        AcquisitionDriver {
            line,
            clock,
            config,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    /// Acquire a reading, retrying up to `max_attempts` times.
    ///
    /// Blocks for at most roughly
    /// `max_attempts × (wake_pulse + waits) + (max_attempts - 1) × retry_delay`.
    pub fn acquire(&mut self) -> Result<Reading, AcquisitionError> {
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.attempt() {
                AcquisitionOutcome::Ok(reading) => {
                    debug!(
                        attempt,
                        temperature = reading.temperature_c,
                        humidity = reading.humidity_pct,
                        "sensor reading accepted"
                    );
                    return Ok(reading);
                }
                outcome => {
                    debug!(attempt, %outcome, "sensor acquisition attempt failed");
                    if attempt < attempts {
                        self.clock.sleep(self.config.retry_delay);
                    }
                }
            }
        }

        self.state = DriverState::Exhausted;
        warn!(attempts, "sensor acquisition exhausted");
        Err(AcquisitionError::Exhausted { attempts })
    }

    /// Run exactly one transaction and report how it ended.
    ///
    /// A failed transaction leaves the driver in [`DriverState::Retrying`].
    pub fn attempt(&mut self) -> AcquisitionOutcome {
        let outcome = self.transact();
        if !matches!(outcome, AcquisitionOutcome::Ok(_)) {
            self.state = DriverState::Retrying;
        }
        outcome
    }

    fn transact(&mut self) -> AcquisitionOutcome {
        let frame = match self.capture() {
            Ok(frame) => frame,
            Err(Abort::Timeout(stage)) => return AcquisitionOutcome::Timeout(stage),
            Err(Abort::Line(e)) => return AcquisitionOutcome::Line(e),
        };

        self.state = DriverState::Validating;
        let reading = match decode_bits(frame.bits()) {
            Ok(decoded) => decoded.reading(),
            Err(FrameError::ChecksumMismatch { expected, actual }) => {
                return AcquisitionOutcome::ChecksumMismatch { expected, actual };
            }
            Err(e) => return AcquisitionOutcome::MalformedFrame(Malformed::Frame(e)),
        };

        if !reading.is_plausible(self.config.temperature_range) {
            return AcquisitionOutcome::MalformedFrame(Malformed::OutOfRange(reading));
        }

        self.state = DriverState::Accepted;
        AcquisitionOutcome::Ok(reading)
    }

    /// Wake the sensor, follow the handshake and capture all 40 bits.
    fn capture(&mut self) -> Result<RawFrame, Abort> {
        self.state = DriverState::Requesting;
        let mut line = LineGuard::new(&mut self.line);

        line.set_mode(LineMode::Output)?;
        line.write(Level::Low)?;
        self.clock.sleep(self.config.wake_pulse);
        line.write(Level::High)?;
        if !self.config.release_hold.is_zero() {
            self.clock.sleep(self.config.release_hold);
        }
        line.set_mode(IDLE_MODE)?;

        self.state = DriverState::AwaitingResponse;
        let limit = self.config.response_timeout;
        wait_while(&mut *line, &self.clock, Level::High, limit, Stage::AwaitResponse)?;
        wait_while(&mut *line, &self.clock, Level::Low, limit, Stage::ResponseLow)?;
        wait_while(&mut *line, &self.clock, Level::High, limit, Stage::ResponseHigh)?;

        self.state = DriverState::Sampling;
        let limit = self.config.bit_timeout;
        let mut bits = [0u8; FRAME_BITS];
        for (i, bit) in (0u8..).zip(bits.iter_mut()) {
            wait_while(&mut *line, &self.clock, Level::Low, limit, Stage::BitLow(i))?;
            let pulse = wait_while(&mut *line, &self.clock, Level::High, limit, Stage::BitHigh(i))?;
            *bit = sample_bit(pulse.held, self.config.bit_threshold);
        }

        Ok(RawFrame::new(bits))
    }
}

impl<L: DigitalLine, C: Clock> AirSensor for AcquisitionDriver<L, C> {
    fn acquire(&mut self) -> Result<Reading, AcquisitionError> {
        AcquisitionDriver::acquire(self)
    }
}

/// Poll until the line leaves `level`, giving up once `limit` has elapsed.
fn wait_while<L: DigitalLine + ?Sized, C: Clock>(
    line: &mut L,
    clock: &C,
    level: Level,
    limit: Duration,
    stage: Stage,
) -> Result<EdgeEvent, Abort> {
    let start = clock.now();
    loop {
        let observed = line.read()?;
        let held = clock.now().saturating_sub(start);
        if observed != level {
            return Ok(EdgeEvent { from: level, held });
        }
        if held > limit {
            return Err(Abort::Timeout(stage));
        }
    }
}

/// Cloneable handle that serializes transactions against one sensor.
///
/// At most one acquisition runs at a time; other callers block on the lock.
#[derive(Clone)]
pub struct SharedAirSensor {
    inner: Arc<Mutex<Box<dyn AirSensor + Send>>>,
}

impl SharedAirSensor {
    pub fn new(sensor: impl AirSensor + Send + 'static) -> Self {
        SharedAirSensor {
            inner: Arc::new(Mutex::new(Box::new(sensor))),
        }
    }

    pub fn acquire(&self) -> Result<Reading, AcquisitionError> {
        // The line guard restores the pin during unwinding, so a poisoned
        // driver is still in a usable state.
        let mut sensor = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        sensor.acquire()
    }
}
