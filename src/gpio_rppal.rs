// src/gpio_rppal.rs
//! rppal-backed GPIO: the bit-banged sensor line and software PWM outputs.

use greenhouse_lib::control::{ActuatorError, PwmChannel};
use greenhouse_lib::dht::{DigitalLine, Level, LineError, LineMode, Pull, IDLE_MODE};
use rppal::gpio::{self, Gpio, IoPin, Mode, OutputPin, PullUpDown};

/// Fan PWM frequency
pub const FAN_PWM_HZ: f64 = 100.0;
/// Hobby servo frame rate
pub const SERVO_PWM_HZ: f64 = 50.0;

pub struct RppalLine {
    pin: IoPin,
}

impl RppalLine {
    pub fn new(gpio: &Gpio, bcm_pin: u8) -> Result<Self, LineError> {
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| LineError(e.to_string()))?
            .into_io(Mode::Input);
        let mut line = Self { pin };
        line.set_mode(IDLE_MODE)?;
        Ok(line)
    }
}

impl DigitalLine for RppalLine {
    fn set_mode(&mut self, mode: LineMode) -> Result<(), LineError> {
        match mode {
            LineMode::Output => self.pin.set_mode(Mode::Output),
            LineMode::Input(pull) => {
                self.pin.set_mode(Mode::Input);
                self.pin.set_pullupdown(match pull {
                    Pull::None => PullUpDown::Off,
                    Pull::Up => PullUpDown::PullUp,
                    Pull::Down => PullUpDown::PullDown,
                });
            }
        }
        Ok(())
    }

    fn write(&mut self, level: Level) -> Result<(), LineError> {
        self.pin.write(match level {
            Level::Low => gpio::Level::Low,
            Level::High => gpio::Level::High,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Level, LineError> {
        Ok(Level::from(self.pin.read() == gpio::Level::High))
    }
}

/// Software PWM on an output pin.
pub struct RppalPwm {
    pin: OutputPin,
    frequency: f64,
}

impl RppalPwm {
    pub fn new(gpio: &Gpio, bcm_pin: u8, frequency: f64) -> Result<Self, ActuatorError> {
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| ActuatorError::Pwm(e.to_string()))?
            .into_output_low();
        Ok(Self { pin, frequency })
    }
}

impl PwmChannel for RppalPwm {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        if percent <= 0.0 {
            self.pin
                .clear_pwm()
                .map_err(|e| ActuatorError::Pwm(e.to_string()))?;
            self.pin.set_low();
            return Ok(());
        }
        self.pin
            .set_pwm_frequency(self.frequency, (percent / 100.0).min(1.0))
            .map_err(|e| ActuatorError::Pwm(e.to_string()))
    }
}
