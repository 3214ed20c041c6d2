//! Open-loop six-step motor controller

use core::fmt;

use crate::config::{ConfigError, MotorConfig};
use crate::driver::MotorDriver;
use crate::hall::{HallCode, PhasePattern};

/// Why a controller could not be brought up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError<E> {
    /// Tunables rejected before touching hardware
    Config(ConfigError),
    /// Power stage or Hall inputs could not be configured
    Driver(E),
}

impl<E: fmt::Debug> fmt::Display for InitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid motor config: {}", e),
            Self::Driver(e) => write!(f, "hardware initialization failed: {:?}", e),
        }
    }
}

/// Caller-facing motor commands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Start,
    Stop,
    SetSpeed(u16),
}

/// Outcome of one commutation step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Commutation {
    /// Motor stopped, nothing written
    Idle,
    /// Valid code, `pattern` driven at `duty`
    Driven {
        code: HallCode,
        pattern: PhasePattern,
        duty: u16,
    },
    /// Invalid code, all phases written to zero
    Fault(HallCode),
}

/// Consistent snapshot of the controller state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorStatus {
    pub running: bool,
    /// Commanded speed in RPM
    pub speed: u16,
    pub duty: u16,
    /// Last sampled Hall code
    pub hall: Option<HallCode>,
    /// Running on an invalid Hall code
    pub hall_fault: bool,
    /// Number of entries into an invalid Hall code
    pub hall_faults: u32,
}

/// Hall-sensored six-step controller owning its driver
///
/// Only constructible through [`MotorController::init`], so a controller
/// whose hardware failed to initialise never exists.
pub struct MotorController<D> {
    driver: D,
    config: MotorConfig,
    speed: u16,
    duty: u16,
    running: bool,
    hall: Option<HallCode>,
    hall_faults: u32,
}

impl<D: MotorDriver> MotorController<D> {
    /// Configure the driver and enter the stopped state
    pub fn init(mut driver: D, config: MotorConfig) -> Result<Self, InitError<D::Error>> {
        config.validate().map_err(InitError::Config)?;
        driver.init(&config).map_err(InitError::Driver)?;

        let mut ctrl = Self {
            driver,
            config,
            speed: 0,
            duty: 0,
            running: false,
            hall: None,
            hall_faults: 0,
        };
        ctrl.stop();

        log::info!(
            "Motor init: max_rpm={} pwm_range={} poles={} pwm_freq={}Hz",
            config.max_rpm,
            config.pwm_range,
            config.pole_count,
            config.pwm_frequency_hz
        );
        Ok(ctrl)
    }

    /// Set the commanded speed, capping it at `max_rpm`
    ///
    /// Takes effect immediately while running.
    pub fn set_speed(&mut self, rpm: u16) {
        let clamped = self.config.clamp_speed(rpm);
        if clamped != rpm {
            log::debug!("Speed {} RPM capped to {} RPM", rpm, clamped);
        }
        self.speed = clamped;
        self.duty = self.config.duty_for(clamped);
        log::debug!("Motor speed set: {} RPM, duty={}", self.speed, self.duty);

        if self.running {
            self.update();
        }
    }

    /// Enable commutation and drive the current sector
    pub fn start(&mut self) {
        self.running = true;
        log::info!("Motor started: {} RPM, duty={}", self.speed, self.duty);
        self.update();
    }

    /// Disable commutation and de-energize every phase
    pub fn stop(&mut self) {
        self.running = false;
        self.driver.de_energize();
        log::info!("Motor stopped");
    }

    /// Commanded speed in RPM
    pub fn speed(&self) -> u16 {
        self.speed
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn hall(&self) -> Option<HallCode> {
        self.hall
    }

    /// Running on an invalid Hall code
    ///
    /// A stopped motor samples nothing, so a stale invalid code is not a fault.
    pub fn hall_fault(&self) -> bool {
        self.running && self.last_code_invalid()
    }

    fn last_code_invalid(&self) -> bool {
        self.hall.is_some_and(|c| !c.is_valid())
    }

    pub fn hall_faults(&self) -> u32 {
        self.hall_faults
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    pub fn status(&self) -> MotorStatus {
        MotorStatus {
            running: self.running,
            speed: self.speed,
            duty: self.duty,
            hall: self.hall,
            hall_fault: self.hall_fault(),
            hall_faults: self.hall_faults,
        }
    }

    pub fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::SetSpeed(rpm) => self.set_speed(rpm),
        }
    }

    /// Sample the Hall sensors and drive the matching phases
    ///
    /// Does nothing while stopped. Repeating it with unchanged sensor input
    /// rewrites the same outputs.
    pub fn update(&mut self) -> Commutation {
        if !self.running {
            return Commutation::Idle;
        }

        let code = self.driver.read_hall().code();
        let pattern = code.pattern();
        self.driver.apply(pattern, self.duty);

        let was_fault = self.last_code_invalid();
        self.hall = Some(code);

        if !code.is_valid() {
            if !was_fault {
                self.hall_faults = self.hall_faults.saturating_add(1);
                log::warn!(
                    "Hall fault: invalid code {}, phases de-energized (faults={})",
                    code.as_u8(),
                    self.hall_faults
                );
            }
            return Commutation::Fault(code);
        }

        if was_fault {
            log::info!("Hall code {} valid again", code.as_u8());
        }

        Commutation::Driven {
            code,
            pattern,
            duty: self.duty,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// De-energize and hand the driver back
    pub fn release(mut self) -> D {
        self.stop();
        self.driver
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;
    use crate::hall::{HallLevels, Phase};

    /// Driver with settable Hall input that records every phase write
    struct MockDriver {
        hall: HallLevels,
        duties: [u16; 3],
        writes: Vec<(Phase, u16)>,
        fail: bool,
    }

    impl MockDriver {
        fn new(code: u8) -> Self {
            Self {
                hall: HallCode::new(code).into(),
                duties: [0; 3],
                writes: Vec::new(),
                fail: false,
            }
        }
    }

    impl MotorDriver for MockDriver {
        type Error = &'static str;

        fn init(&mut self, _config: &MotorConfig) -> Result<(), Self::Error> {
            if self.fail { Err("no gpio") } else { Ok(()) }
        }

        fn set_phase_duty(&mut self, phase: Phase, duty: u16) {
            self.duties[phase as usize] = duty;
            self.writes.push((phase, duty));
        }

        fn read_hall(&mut self) -> HallLevels {
            self.hall
        }
    }

    fn controller(code: u8) -> MotorController<MockDriver> {
        MotorController::init(MockDriver::new(code), MotorConfig::default()).unwrap()
    }

    #[test]
    fn test_init_stopped_and_zeroed() {
        let ctrl = controller(3);
        assert!(!ctrl.is_running());
        assert_eq!(ctrl.speed(), 0);
        assert_eq!(ctrl.duty(), 0);
        assert_eq!(ctrl.driver().duties, [0, 0, 0]);
        assert_eq!(ctrl.driver().writes.len(), 3);
        assert_eq!(ctrl.hall(), None);
    }

    #[test]
    fn test_init_failure_surfaces() {
        let mut drv = MockDriver::new(3);
        drv.fail = true;
        let err = MotorController::init(drv, MotorConfig::default()).err();
        assert_eq!(err, Some(InitError::Driver("no gpio")));

        let cfg = MotorConfig { max_rpm: 0, ..Default::default() };
        let err = MotorController::init(MockDriver::new(3), cfg).err();
        assert_eq!(err, Some(InitError::Config(ConfigError::ZeroMaxRpm)));
    }

    #[test]
    fn test_speed_clamped() {
        let mut ctrl = controller(3);
        ctrl.set_speed(9000);
        assert_eq!(ctrl.speed(), 5000);
        assert_eq!(ctrl.duty(), 1024);
        ctrl.set_speed(2500);
        assert_eq!(ctrl.speed(), 2500);
        assert_eq!(ctrl.duty(), 512);
    }

    #[test]
    fn test_set_speed_while_stopped_writes_nothing() {
        let mut ctrl = controller(3);
        let before = ctrl.driver().writes.len();
        ctrl.set_speed(3000);
        assert_eq!(ctrl.driver().writes.len(), before);
        assert!(!ctrl.is_running());
    }

    #[test]
    fn test_start_code_3() {
        let mut ctrl = controller(3);
        ctrl.set_speed(2500);
        ctrl.start();
        assert_eq!(ctrl.driver().duties, [512, 512, 0]);
    }

    #[test]
    fn test_start_without_speed_runs_at_zero_duty() {
        let mut ctrl = controller(3);
        ctrl.start();
        assert!(ctrl.is_running());
        assert_eq!(ctrl.driver().duties, [0, 0, 0]);
        assert_eq!(ctrl.hall(), Some(HallCode::new(3)));
    }

    #[test]
    fn test_set_speed_while_running_applies_immediately() {
        let mut ctrl = controller(6);
        ctrl.start();
        ctrl.set_speed(5000);
        assert_eq!(ctrl.driver().duties, [0, 1024, 1024]);
    }

    #[test]
    fn test_stop_from_any_state() {
        let mut ctrl = controller(5);
        ctrl.stop();
        assert_eq!(ctrl.driver().duties, [0, 0, 0]);

        ctrl.set_speed(4000);
        ctrl.start();
        assert_ne!(ctrl.driver().duties, [0, 0, 0]);
        ctrl.stop();
        assert!(!ctrl.is_running());
        assert_eq!(ctrl.driver().duties, [0, 0, 0]);
        assert_eq!(ctrl.speed(), 4000);

        // stopped motor ignores updates
        assert_eq!(ctrl.update(), Commutation::Idle);
        assert_eq!(ctrl.driver().duties, [0, 0, 0]);
    }

    #[test]
    fn test_invalid_codes_fail_safe() {
        for raw in [0, 7] {
            let mut ctrl = controller(3);
            ctrl.set_speed(5000);
            ctrl.start();
            ctrl.driver_mut().hall = HallCode::new(raw).into();
            assert_eq!(ctrl.update(), Commutation::Fault(HallCode::new(raw)));
            assert_eq!(ctrl.driver().duties, [0, 0, 0]);
            assert!(ctrl.is_running());
            assert!(ctrl.hall_fault());
            assert_eq!(ctrl.hall_faults(), 1);
        }
    }

    #[test]
    fn test_fault_counted_once_per_entry() {
        let mut ctrl = controller(7);
        ctrl.start();
        ctrl.update();
        ctrl.update();
        assert_eq!(ctrl.hall_faults(), 1);

        ctrl.driver_mut().hall = HallCode::new(1).into();
        ctrl.update();
        assert!(!ctrl.hall_fault());

        ctrl.driver_mut().hall = HallCode::new(0).into();
        ctrl.update();
        assert_eq!(ctrl.hall_faults(), 2);
        assert!(ctrl.status().hall_fault);
    }

    #[test]
    fn test_stop_clears_fault_keeps_code() {
        let mut ctrl = controller(3);
        ctrl.set_speed(2000);
        ctrl.start();
        ctrl.driver_mut().hall = HallCode::new(7).into();
        ctrl.update();
        assert!(ctrl.hall_fault());

        // sensor reconnected while stopped, nothing samples it
        ctrl.driver_mut().hall = HallCode::new(3).into();
        ctrl.stop();
        let s = ctrl.status();
        assert!(!s.running);
        assert!(!s.hall_fault);
        assert_eq!(s.hall, Some(HallCode::new(7)));
        assert_eq!(s.hall_faults, 1);

        ctrl.start();
        assert!(!ctrl.hall_fault());
        assert_eq!(ctrl.hall(), Some(HallCode::new(3)));
        assert_eq!(ctrl.hall_faults(), 1);
    }

    #[test]
    fn test_update_idempotent() {
        let mut ctrl = controller(4);
        ctrl.set_speed(1234);
        ctrl.start();

        let n = ctrl.driver().writes.len();
        let first = ctrl.update();
        let out1 = ctrl.driver().writes[n..].to_vec();
        let second = ctrl.update();
        let out2 = ctrl.driver().writes[n + 3..].to_vec();

        assert_eq!(first, second);
        assert_eq!(out1, out2);
        assert_eq!(ctrl.status().hall_faults, 0);
    }

    #[test]
    fn test_reference_scenario_code_5() {
        let mut ctrl = controller(5);
        ctrl.set_speed(1000);
        ctrl.start();
        assert_eq!(ctrl.driver().duties, [204, 0, 204]);

        let result = ctrl.update();
        assert_eq!(
            result,
            Commutation::Driven {
                code: HallCode::new(5),
                pattern: PhasePattern::new(true, false, true),
                duty: 204,
            }
        );
    }

    #[test]
    fn test_execute_and_release() {
        let mut ctrl = controller(2);
        ctrl.execute(Command::SetSpeed(2500));
        ctrl.execute(Command::Start);
        assert_eq!(ctrl.driver().duties, [0, 512, 0]);
        ctrl.execute(Command::Stop);
        assert!(!ctrl.is_running());

        ctrl.execute(Command::Start);
        let drv = ctrl.release();
        assert_eq!(drv.duties, [0, 0, 0]);
    }
}
