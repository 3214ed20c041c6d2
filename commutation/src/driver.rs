//! Phase actuator and Hall sensor collaborator

use crate::config::MotorConfig;
use crate::hall::{HallLevels, Phase, PhasePattern};

/// Power stage plus Hall inputs of one motor
///
/// Writes and reads are synchronous and infallible once `init` succeeded.
pub trait MotorDriver {
    type Error;

    /// Configure phase outputs for PWM and the Hall inputs with pull-ups
    fn init(&mut self, config: &MotorConfig) -> Result<(), Self::Error>;

    /// Drive one phase with `duty` in `[0, config.pwm_range]`
    fn set_phase_duty(&mut self, phase: Phase, duty: u16);

    /// Sample the three Hall lines
    fn read_hall(&mut self) -> HallLevels;

    /// Write `duty` to every enabled phase of `pattern` and 0 to the rest
    fn apply(&mut self, pattern: PhasePattern, duty: u16) {
        for phase in Phase::ALL {
            let d = if pattern.is_enabled(phase) { duty } else { 0 };
            self.set_phase_duty(phase, d);
        }
    }

    /// Zero duty on all phases
    fn de_energize(&mut self) {
        self.apply(PhasePattern::OFF, 0);
    }
}

impl<T: MotorDriver + ?Sized> MotorDriver for &mut T {
    type Error = T::Error;

    fn init(&mut self, config: &MotorConfig) -> Result<(), Self::Error> {
        T::init(self, config)
    }

    fn set_phase_duty(&mut self, phase: Phase, duty: u16) {
        T::set_phase_duty(self, phase, duty)
    }

    fn read_hall(&mut self) -> HallLevels {
        T::read_hall(self)
    }
}
