//! # Single-Wire Humidity/Temperature Sensor
//!
//! Bit-banged acquisition for the DHT11 family: the host wakes the sensor on a
//! shared data line, the sensor answers with a handshake and 40 pulse-width
//! encoded bits.
//!
//! - [`frame`]: pure decoding of 40 bits into a checksum-validated frame
//! - [`driver`]: the handshake/sampling/retry state machine
//! - [`line`] and [`clock`]: the hardware seams the driver is generic over
//! - [`sim`]: a deterministic simulated sensor for tests and `--simulate`

pub mod clock;
pub mod driver;
pub mod frame;
pub mod line;
pub mod sim;

pub use clock::{Clock, MonotonicClock};
pub use driver::{
    AcquisitionConfig, AcquisitionDriver, AcquisitionError, AcquisitionOutcome, AirSensor,
    DriverState, Malformed, SharedAirSensor, Stage,
};
pub use frame::{decode_bits, sample_bit, FrameError, RawFrame, SensorFrame, FRAME_BITS};
pub use line::{DigitalLine, EdgeEvent, Level, LineError, LineGuard, LineMode, Pull, IDLE_MODE};
