//! GPIO line abstraction for the single-wire sensor.

use std::ops::{Deref, DerefMut};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Electrical level of the data line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Internal bias resistor applied while the line is an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineMode {
    /// Driven by the host
    Output,
    /// Sampled by the host, driven by the sensor
    Input(Pull),
}

/// Mode the line is returned to after every transaction: released with the
/// pull-up holding it high, which is the bus idle state.
pub const IDLE_MODE: LineMode = LineMode::Input(Pull::Up);

/// GPIO failure reported by a [`DigitalLine`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("GPIO line error: {0}")]
pub struct LineError(pub String);

/// A single bidirectional GPIO pin.
pub trait DigitalLine {
    fn set_mode(&mut self, mode: LineMode) -> Result<(), LineError>;
    /// Drive the line. Only meaningful in [`LineMode::Output`].
    fn write(&mut self, level: Level) -> Result<(), LineError>;
    fn read(&mut self) -> Result<Level, LineError>;
}

impl<T: DigitalLine + ?Sized> DigitalLine for Box<T> {
    fn set_mode(&mut self, mode: LineMode) -> Result<(), LineError> {
        (**self).set_mode(mode)
    }
    fn write(&mut self, level: Level) -> Result<(), LineError> {
        (**self).write(level)
    }
    fn read(&mut self) -> Result<Level, LineError> {
        (**self).read()
    }
}

/// A transition observed on the line, with how long the line sat at the
/// level it just left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Level before the transition
    pub from: Level,
    /// Time spent at `from`
    pub held: Duration,
}

/// Exclusive borrow of a line for one transaction.
///
/// Dropping the guard puts the line back into [`IDLE_MODE`], whichever way
/// the transaction ended (success, timeout, I/O error or unwind).
pub struct LineGuard<'a, L: DigitalLine> {
    line: &'a mut L,
}

impl<'a, L: DigitalLine> LineGuard<'a, L> {
    pub fn new(line: &'a mut L) -> Self {
        LineGuard { line }
    }
}

impl<L: DigitalLine> Deref for LineGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.line
    }
}

impl<L: DigitalLine> DerefMut for LineGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut L {
        self.line
    }
}

impl<L: DigitalLine> Drop for LineGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.line.set_mode(IDLE_MODE) {
            warn!(error = %e, "failed to return sensor line to idle");
        }
    }
}
