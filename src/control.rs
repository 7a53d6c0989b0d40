//! # Actuator Control
//!
//! Drives the fan and the vent servo from the latest sensor snapshot.
//!
//! ## Fan
//! Hysteresis between `temp_min` and `temp_max`: above the upper threshold the
//! fan runs, below the lower one it stops, in between it keeps its speed.
//!
//! ## Vent
//! The vent doubles as a shade. Bright light closes it (0°), dim light opens
//! it (180°), and in between the angle is linear in the light level. The servo
//! is moved in small steps to limit current spikes, then its PWM is released
//! so it does not jitter while holding. Moves smaller than
//! [`MIN_VENT_DELTA_DEG`] are skipped and moves are rate limited, because the
//! light level flickers with passing clouds.
//!
//! ## Manual mode
//! With auto mode off, control rounds do nothing and the actuators follow the
//! `[manual]` config section ([`Controller::apply_manual`]). The individual
//! setters are also public for callers that embed the controller.

use crate::config::{ManualConfig, ThresholdConfig};
use crate::dht::Clock;
use crate::SensorSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Servo angle the vent rests at on startup and shutdown
pub const NEUTRAL_ANGLE_DEG: u8 = 90;
/// Vent moves smaller than this are skipped
pub const MIN_VENT_DELTA_DEG: u8 = 5;
const VENT_STEP_DEG: i16 = 2;
const VENT_STEP_DELAY: Duration = Duration::from_millis(20);
const VENT_SETTLE: Duration = Duration::from_millis(50);
const VENT_STARTUP_SETTLE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("PWM output error: {0}")]
    Pwm(String),

    #[error("manual control is disabled while auto mode is on")]
    AutoModeActive,

    #[error("vent servo is unavailable")]
    VentUnavailable,
}

/// A PWM output; duty cycle in percent (0-100).
pub trait PwmChannel {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError>;
}

impl<T: PwmChannel + ?Sized> PwmChannel for Box<T> {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        (**self).set_duty_cycle(percent)
    }
}

/// PWM output that only logs, for running without actuators attached.
#[derive(Debug)]
pub struct SimulatedPwm {
    name: &'static str,
    duty: f64,
}

impl SimulatedPwm {
    pub fn new(name: &'static str) -> Self {
        SimulatedPwm { name, duty: 0.0 }
    }

    pub fn duty(&self) -> f64 {
        self.duty
    }
}

impl PwmChannel for SimulatedPwm {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
        self.duty = percent;
        debug!(output = self.name, duty = percent, "simulated PWM");
        Ok(())
    }
}

/// Fan speed for `temperature`, or `None` to keep the current speed.
pub fn fan_speed_for(temperature: f32, thresholds: &ThresholdConfig) -> Option<u8> {
    if temperature > thresholds.temp_max {
        let range = thresholds.temp_max - thresholds.temp_min;
        if range > 0.0 {
            let percent = (temperature - thresholds.temp_min) / range * 100.0;
            Some(percent.clamp(0.0, 100.0) as u8)
        } else {
            Some(100)
        }
    } else if temperature < thresholds.temp_min {
        Some(0)
    } else {
        None
    }
}

/// Vent angle for the given light level.
pub fn vent_angle_for(lux: f32, thresholds: &ThresholdConfig) -> u8 {
    if lux > thresholds.light_max {
        0
    } else if lux < thresholds.light_min {
        180
    } else {
        let range = thresholds.light_max - thresholds.light_min;
        if range > 0.0 {
            let fraction = (lux - thresholds.light_min) / range;
            (180.0 * (1.0 - fraction)) as u8
        } else {
            NEUTRAL_ANGLE_DEG
        }
    }
}

/// Servo duty cycle at 50 Hz: 1 ms pulse at 0°, 2 ms at 180°.
pub fn servo_duty_cycle(angle: u8) -> f64 {
    let pulse_ms = 1.0 + f64::from(angle.min(180)) / 180.0;
    pulse_ms / 20.0 * 100.0
}

/// Actuator state as shown on the dashboard and in telemetry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub fan_on: bool,
    /// Percent (0-100)
    pub fan_speed: u8,
    pub vent_available: bool,
    /// Degrees (0 closed, 180 open)
    pub vent_angle: u8,
    pub auto_mode: bool,
}

impl DeviceStatus {
    /// Status right after startup: fan stopped, vent at neutral.
    pub fn parked(vent_available: bool, auto_mode: bool) -> Self {
        DeviceStatus {
            fan_on: false,
            fan_speed: 0,
            vent_available,
            vent_angle: NEUTRAL_ANGLE_DEG,
            auto_mode,
        }
    }

    /// Vent opening in percent.
    pub fn vent_position_pct(&self) -> u8 {
        (f32::from(self.vent_angle) / 1.8).round() as u8
    }
}

/// Owns the fan and vent outputs and applies the control policy.
pub struct Controller<F, V, C> {
    fan: F,
    vent: Option<V>,
    clock: C,
    thresholds: ThresholdConfig,
    vent_update: Duration,
    step_delay: Duration,
    status: DeviceStatus,
    last_vent_move: Option<Duration>,
}

impl<F: PwmChannel, V: PwmChannel, C: Clock> Controller<F, V, C> {
    /// Stop the fan and park the vent at [`NEUTRAL_ANGLE_DEG`].
    ///
    /// A vent output that fails during parking is marked unavailable; the
    /// controller keeps running the fan alone.
    pub fn new(
        fan: F,
        vent: Option<V>,
        clock: C,
        thresholds: ThresholdConfig,
        vent_update: Duration,
        auto_mode: bool,
    ) -> Self {
        let mut controller = Controller {
            fan,
            vent,
            clock,
            thresholds,
            vent_update,
            step_delay: VENT_STEP_DELAY,
            status: DeviceStatus::parked(false, auto_mode),
            last_vent_move: None,
        };

        if let Err(e) = controller.apply_fan(0) {
            error!(error = %e, "failed to stop fan");
        }
        controller.status.vent_available = match controller.park_vent() {
            Ok(available) => available,
            Err(e) => {
                error!(error = %e, "vent servo initialization failed");
                false
            }
        };
        controller
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.clone()
    }

    pub fn set_auto_mode(&mut self, auto_mode: bool) {
        self.status.auto_mode = auto_mode;
        info!(auto_mode, "control mode changed");
    }

    /// One control round. Does nothing in manual mode.
    pub fn tick(&mut self, snapshot: &SensorSnapshot) {
        if !self.status.auto_mode {
            return;
        }

        if let Some(speed) = fan_speed_for(snapshot.air_temperature, &self.thresholds) {
            if speed != self.status.fan_speed {
                if let Err(e) = self.apply_fan(speed) {
                    error!(error = %e, "failed to set fan speed");
                }
            }
        }

        if !self.status.vent_available {
            return;
        }
        let now = self.clock.now();
        let due = self
            .last_vent_move
            .map_or(true, |last| now.saturating_sub(last) >= self.vent_update);
        if !due {
            return;
        }

        let target = vent_angle_for(snapshot.light_intensity, &self.thresholds);
        if self.status.vent_angle.abs_diff(target) > MIN_VENT_DELTA_DEG {
            match self.move_vent(target) {
                Ok(()) => self.last_vent_move = Some(now),
                Err(e) => error!(error = %e, "failed to move vent"),
            }
        }
    }

    /// Manually set the fan speed (percent, clamped to 100).
    pub fn set_fan_speed(&mut self, percent: u8) -> Result<(), ActuatorError> {
        self.ensure_manual()?;
        self.apply_fan(percent.min(100))
    }

    /// Manually set the vent angle (degrees, clamped to 180).
    pub fn set_vent_angle(&mut self, angle: u8) -> Result<(), ActuatorError> {
        self.ensure_manual()?;
        self.move_vent(angle)
    }

    /// Manually set the vent opening in percent.
    pub fn set_vent_position(&mut self, percent: u8) -> Result<(), ActuatorError> {
        let angle = (f32::from(percent.min(100)) * 1.8).round() as u8;
        self.set_vent_angle(angle)
    }

    /// Apply the configured manual settings. Rejected in auto mode.
    pub fn apply_manual(&mut self, manual: &ManualConfig) -> Result<(), ActuatorError> {
        self.ensure_manual()?;
        if let Some(speed) = manual.fan_speed {
            self.set_fan_speed(speed)?;
        }
        if let Some(position) = manual.vent_position {
            self.set_vent_position(position)?;
        }
        info!(fan = ?manual.fan_speed, vent = ?manual.vent_position, "manual settings applied");
        Ok(())
    }

    /// Stop the fan and return the vent to neutral.
    pub fn shutdown(&mut self) {
        info!("parking actuators");
        if let Err(e) = self.apply_fan(0) {
            error!(error = %e, "failed to stop fan on shutdown");
        }
        if self.status.vent_available {
            if let Err(e) = self.move_vent(NEUTRAL_ANGLE_DEG) {
                error!(error = %e, "failed to park vent on shutdown");
            }
        }
    }

    fn ensure_manual(&self) -> Result<(), ActuatorError> {
        if self.status.auto_mode {
            warn!("manual control rejected in auto mode");
            return Err(ActuatorError::AutoModeActive);
        }
        Ok(())
    }

    fn apply_fan(&mut self, percent: u8) -> Result<(), ActuatorError> {
        self.fan.set_duty_cycle(f64::from(percent))?;
        self.status.fan_speed = percent;
        self.status.fan_on = percent > 0;
        debug!(speed = percent, "fan speed set");
        Ok(())
    }

    /// Drive the servo straight to neutral. Returns whether a vent exists.
    fn park_vent(&mut self) -> Result<bool, ActuatorError> {
        let Some(vent) = self.vent.as_mut() else {
            return Ok(false);
        };
        vent.set_duty_cycle(servo_duty_cycle(NEUTRAL_ANGLE_DEG))?;
        self.clock.sleep(VENT_STARTUP_SETTLE);
        vent.set_duty_cycle(0.0)?;
        self.status.vent_angle = NEUTRAL_ANGLE_DEG;
        Ok(true)
    }

    fn move_vent(&mut self, target: u8) -> Result<(), ActuatorError> {
        if !self.status.vent_available {
            return Err(ActuatorError::VentUnavailable);
        }
        let vent = self.vent.as_mut().ok_or(ActuatorError::VentUnavailable)?;
        let target = target.min(180);
        if self.status.vent_angle == target {
            return Ok(());
        }

        let goal = i16::from(target);
        let mut current = i16::from(self.status.vent_angle);
        let step = if goal > current {
            VENT_STEP_DEG
        } else {
            -VENT_STEP_DEG
        };
        while (current - goal).abs() > 1 {
            current += step;
            vent.set_duty_cycle(servo_duty_cycle(current as u8))?;
            self.clock.sleep(self.step_delay);
        }

        vent.set_duty_cycle(servo_duty_cycle(target))?;
        self.clock.sleep(VENT_SETTLE);
        vent.set_duty_cycle(0.0)?;

        self.status.vent_angle = target;
        debug!(angle = target, "vent moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dht::sim::{SimClock, SimTime};
    use crate::AirSource;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingPwm {
        history: Arc<Mutex<Vec<f64>>>,
    }

    impl RecordingPwm {
        fn history(&self) -> Vec<f64> {
            self.history.lock().unwrap().clone()
        }
    }

    impl PwmChannel for RecordingPwm {
        fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ActuatorError> {
            self.history.lock().unwrap().push(percent);
            Ok(())
        }
    }

    struct FailingPwm;

    impl PwmChannel for FailingPwm {
        fn set_duty_cycle(&mut self, _percent: f64) -> Result<(), ActuatorError> {
            Err(ActuatorError::Pwm("servo disconnected".to_string()))
        }
    }

    fn thresholds() -> ThresholdConfig {
        Config::default().thresholds
    }

    fn snapshot(temperature: f32, lux: f32) -> SensorSnapshot {
        SensorSnapshot {
            air_temperature: temperature,
            air_humidity: 50.0,
            soil_moisture: 40.0,
            soil_temperature: 20.0,
            light_intensity: lux,
            air_source: AirSource::Live,
            timestamp: Utc::now(),
        }
    }

    fn controller(
        auto_mode: bool,
    ) -> (
        Controller<RecordingPwm, RecordingPwm, SimClock>,
        RecordingPwm,
        RecordingPwm,
        SimTime,
    ) {
        let fan = RecordingPwm::default();
        let vent = RecordingPwm::default();
        let time = SimTime::new();
        let controller = Controller::new(
            fan.clone(),
            Some(vent.clone()),
            SimClock::new(time.clone()),
            thresholds(),
            Duration::from_secs(30),
            auto_mode,
        );
        (controller, fan, vent, time)
    }

    #[test]
    fn test_fan_speed_hysteresis() {
        let th = thresholds();
        assert_eq!(fan_speed_for(29.0, &th), Some(100));
        assert_eq!(fan_speed_for(24.9, &th), Some(0));
        assert_eq!(fan_speed_for(26.5, &th), None);
        assert_eq!(fan_speed_for(28.0, &th), None);
    }

    #[test]
    fn test_fan_speed_proportional_with_wide_band() {
        let th = ThresholdConfig {
            temp_min: 20.0,
            temp_max: 22.0,
            ..thresholds()
        };
        assert_eq!(fan_speed_for(23.0, &th), Some(100));
        let degenerate = ThresholdConfig {
            temp_min: 30.0,
            temp_max: 30.0,
            ..thresholds()
        };
        assert_eq!(fan_speed_for(31.0, &degenerate), Some(100));
    }

    #[test]
    fn test_vent_angle_policy() {
        let th = thresholds();
        assert_eq!(vent_angle_for(9000.0, &th), 0);
        assert_eq!(vent_angle_for(1000.0, &th), 180);
        assert_eq!(vent_angle_for(5000.0, &th), 90);
        assert_eq!(vent_angle_for(2000.0, &th), 180);
        assert_eq!(vent_angle_for(8000.0, &th), 0);
    }

    #[test]
    fn test_servo_duty_cycle() {
        assert!((servo_duty_cycle(0) - 5.0).abs() < 1e-9);
        assert!((servo_duty_cycle(90) - 7.5).abs() < 1e-9);
        assert!((servo_duty_cycle(180) - 10.0).abs() < 1e-9);
        assert!((servo_duty_cycle(255) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_startup_parks_actuators() {
        let (controller, fan, vent, _) = controller(true);
        assert_eq!(fan.history(), vec![0.0]);
        assert_eq!(vent.history(), vec![7.5, 0.0]);
        let status = controller.status();
        assert!(status.vent_available);
        assert_eq!(status.vent_angle, 90);
        assert!(!status.fan_on);
    }

    #[test]
    fn test_tick_drives_fan_and_vent() {
        let (mut controller, fan, vent, _) = controller(true);
        controller.tick(&snapshot(30.0, 9000.0));

        let status = controller.status();
        assert_eq!(status.fan_speed, 100);
        assert!(status.fan_on);
        assert_eq!(status.vent_angle, 0);
        assert_eq!(fan.history().last(), Some(&100.0));
        // The servo is released after every move.
        assert_eq!(vent.history().last(), Some(&0.0));
    }

    #[test]
    fn test_vent_moves_in_small_steps() {
        let (mut controller, _, vent, _) = controller(true);
        controller.tick(&snapshot(26.0, 9000.0));

        let moves = vent.history();
        // Skip the two parking writes; then 45 steps from 90° to 0°, final pulse, release.
        let stepping = &moves[2..moves.len() - 2];
        assert_eq!(stepping.len(), 45);
        for pair in stepping.windows(2) {
            assert!(pair[1] < pair[0]);
        }
    }

    #[test]
    fn test_vent_is_rate_limited() {
        let (mut controller, _, _, time) = controller(true);
        controller.tick(&snapshot(26.0, 9000.0));
        assert_eq!(controller.status().vent_angle, 0);

        controller.tick(&snapshot(26.0, 1000.0));
        assert_eq!(controller.status().vent_angle, 0, "moved before interval");

        time.advance(Duration::from_secs(30));
        controller.tick(&snapshot(26.0, 1000.0));
        assert_eq!(controller.status().vent_angle, 180);
    }

    #[test]
    fn test_small_vent_changes_are_skipped() {
        let (mut controller, _, vent, _) = controller(true);
        let before = vent.history().len();
        // 4900 lux maps to about 93°, within the dead band of the parked 90°.
        controller.tick(&snapshot(26.0, 4900.0));
        assert_eq!(vent.history().len(), before);
    }

    #[test]
    fn test_manual_control_rejected_in_auto_mode() {
        let (mut controller, _, _, _) = controller(true);
        assert!(matches!(
            controller.set_fan_speed(50),
            Err(ActuatorError::AutoModeActive)
        ));

        controller.set_auto_mode(false);
        controller.set_fan_speed(50).unwrap();
        controller.set_vent_position(50).unwrap();
        let status = controller.status();
        assert_eq!(status.fan_speed, 50);
        assert_eq!(status.vent_angle, 90);
        assert_eq!(status.vent_position_pct(), 50);
    }

    #[test]
    fn test_apply_manual_settings() {
        let (mut controller, fan, _, _) = controller(false);
        let manual = ManualConfig {
            fan_speed: Some(150),
            vent_position: Some(100),
        };
        controller.apply_manual(&manual).unwrap();

        let status = controller.status();
        assert_eq!(status.fan_speed, 100);
        assert_eq!(status.vent_angle, 180);
        assert_eq!(fan.history().last(), Some(&100.0));

        // Unset fields leave the actuators alone.
        controller.apply_manual(&ManualConfig::default()).unwrap();
        assert_eq!(controller.status(), status);
    }

    #[test]
    fn test_apply_manual_rejected_in_auto_mode() {
        let (mut controller, fan, _, _) = controller(true);
        let manual = ManualConfig {
            fan_speed: Some(60),
            vent_position: None,
        };
        assert!(matches!(
            controller.apply_manual(&manual),
            Err(ActuatorError::AutoModeActive)
        ));
        assert_eq!(fan.history(), vec![0.0]);
    }

    #[test]
    fn test_parked_status() {
        let status = DeviceStatus::parked(true, false);
        assert!(!status.fan_on);
        assert_eq!(status.vent_position_pct(), 50);
        assert!(!status.auto_mode);
    }

    #[test]
    fn test_manual_mode_ignores_ticks() {
        let (mut controller, fan, _, _) = controller(false);
        controller.tick(&snapshot(35.0, 9000.0));
        assert_eq!(fan.history(), vec![0.0]);
    }

    #[test]
    fn test_failed_vent_is_marked_unavailable() {
        let mut controller = Controller::new(
            RecordingPwm::default(),
            Some(FailingPwm),
            SimClock::new(SimTime::new()),
            thresholds(),
            Duration::from_secs(30),
            false,
        );
        assert!(!controller.status().vent_available);
        assert!(matches!(
            controller.set_vent_angle(10),
            Err(ActuatorError::VentUnavailable)
        ));
    }

    #[test]
    fn test_shutdown_parks_vent() {
        let (mut controller, fan, _, _) = controller(true);
        controller.tick(&snapshot(30.0, 9000.0));
        controller.shutdown();
        let status = controller.status();
        assert_eq!(status.vent_angle, 90);
        assert_eq!(status.fan_speed, 0);
        assert_eq!(fan.history().last(), Some(&0.0));
    }
}
