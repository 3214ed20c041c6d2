//! Simulated power stage and rotor for bench runs without hardware
//!
//! Open-loop model: while any phase is energized the rotor turns at
//! `max_rpm * duty / pwm_range` and the Hall code walks the forward
//! sequence, `pole_pairs * 6` codes per mechanical revolution.

use core::fmt;

use crate::config::MotorConfig;
use crate::driver::MotorDriver;
use crate::hall::{FORWARD_SEQUENCE, HallCode, HallLevels, Phase};

/// Micro-sector units per sector: `rpm * pole_pairs * dt_us` accumulates
/// 10^7 per Hall sector.
const SECTOR_UNITS: u64 = 10_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SimError {
    /// Simulated missing hardware
    Unavailable,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("simulated power stage unavailable")
    }
}

#[derive(Clone, Debug)]
pub struct SimDriver {
    config: Option<MotorConfig>,
    duties: [u16; 3],
    sector: usize,
    acc: u64,
    travelled: u64,
    hall_disconnected: bool,
    fail_init: bool,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDriver {
    /// Rotor parked in the first sector of the forward sequence
    pub fn new() -> Self {
        Self {
            config: None,
            duties: [0; 3],
            sector: 0,
            acc: 0,
            travelled: 0,
            hall_disconnected: false,
            fail_init: false,
        }
    }

    /// Rotor parked where the sensors read `code`; invalid codes park at sector 0
    pub fn parked_at(code: HallCode) -> Self {
        Self {
            sector: code.sector().unwrap_or(0),
            ..Self::new()
        }
    }

    /// Make `init` fail as if the platform had no PWM/GPIO access
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Pulled-up inputs with the sensor cable unplugged all read high
    pub fn disconnect_hall(&mut self, disconnected: bool) {
        self.hall_disconnected = disconnected;
    }

    pub fn duties(&self) -> [u16; 3] {
        self.duties
    }

    /// Code the sensors would report, ignoring a disconnect
    pub fn rotor_code(&self) -> HallCode {
        FORWARD_SEQUENCE[self.sector]
    }

    /// Hall sectors passed since power-up
    pub fn sectors_travelled(&self) -> u64 {
        self.travelled
    }

    /// Mechanical speed produced by the applied duty
    pub fn rotor_rpm(&self) -> u16 {
        let Some(cfg) = self.config else {
            return 0;
        };
        let duty = self.duties.iter().copied().max().unwrap_or(0);
        (duty.min(cfg.pwm_range) as u32 * cfg.max_rpm as u32 / cfg.pwm_range as u32) as u16
    }

    /// Integrate `dt_us` microseconds of rotation, returning the sectors passed
    pub fn advance(&mut self, dt_us: u32) -> u32 {
        let Some(cfg) = self.config else {
            return 0;
        };
        let rpm = self.rotor_rpm() as u64;
        if rpm == 0 {
            return 0;
        }

        self.acc += rpm * cfg.pole_pairs() as u64 * dt_us as u64;
        let steps = self.acc / SECTOR_UNITS;
        self.acc %= SECTOR_UNITS;

        self.sector = (self.sector + (steps % 6) as usize) % 6;
        self.travelled += steps;
        steps as u32
    }
}

impl MotorDriver for SimDriver {
    type Error = SimError;

    fn init(&mut self, config: &MotorConfig) -> Result<(), Self::Error> {
        if self.fail_init {
            return Err(SimError::Unavailable);
        }
        self.config = Some(*config);
        self.duties = [0; 3];
        self.acc = 0;
        Ok(())
    }

    fn set_phase_duty(&mut self, phase: Phase, duty: u16) {
        self.duties[phase as usize] = duty;
    }

    fn read_hall(&mut self) -> HallLevels {
        if self.hall_disconnected {
            HallLevels::new(true, true, true)
        } else {
            self.rotor_code().into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parked_until_energized() {
        let mut sim = SimDriver::parked_at(HallCode::new(2));
        sim.init(&MotorConfig::default()).unwrap();
        assert_eq!(sim.advance(1_000_000), 0);
        assert_eq!(sim.read_hall().code(), HallCode::new(2));
    }

    #[test]
    fn test_sector_rate() {
        let mut sim = SimDriver::new();
        sim.init(&MotorConfig::default()).unwrap();
        sim.set_phase_duty(Phase::A, 1024);
        // 5000 RPM, 4 pole pairs: 2000 sectors per second
        assert_eq!(sim.rotor_rpm(), 5000);
        assert_eq!(sim.advance(1_000), 2);
        assert_eq!(sim.rotor_code(), HallCode::new(2));
        assert_eq!(sim.sectors_travelled(), 2);
    }

    #[test]
    fn test_disconnected_reads_code_7() {
        let mut sim = SimDriver::new();
        sim.disconnect_hall(true);
        assert_eq!(sim.read_hall().code(), HallCode::new(7));
        sim.disconnect_hall(false);
        assert_eq!(sim.read_hall().code(), HallCode::new(1));
    }

    #[test]
    fn test_failing_init() {
        let mut sim = SimDriver::new().failing_init();
        assert_eq!(sim.init(&MotorConfig::default()), Err(SimError::Unavailable));
    }
}
