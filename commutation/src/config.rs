//! Motor and PWM tunables

use core::fmt;

/// Motor supply voltage in volts (informational)
pub const MOTOR_VOLTAGE: u16 = 24;
/// Maximum commanded speed in RPM
pub const MOTOR_MAX_RPM: u16 = 5000;
/// Number of rotor poles
pub const NUM_POLES: u8 = 8;
/// PWM carrier frequency in Hz
pub const PWM_FREQUENCY_HZ: u32 = 20_000;
/// Duty resolution: a phase driven at `PWM_RANGE` is fully on
pub const PWM_RANGE: u16 = 1024;

/// Rejected tunables
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ZeroMaxRpm,
    ZeroPwmRange,
    /// Pole count must be even and non-zero
    InvalidPoleCount(u8),
    ZeroPwmFrequency,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroMaxRpm => f.write_str("max_rpm must be greater than zero"),
            Self::ZeroPwmRange => f.write_str("pwm_range must be greater than zero"),
            Self::InvalidPoleCount(n) => write!(f, "pole_count {} is not a positive even number", n),
            Self::ZeroPwmFrequency => f.write_str("pwm_frequency_hz must be greater than zero"),
        }
    }
}

/// Motor physical and drive parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MotorConfig {
    /// Speed mapped to full duty
    pub max_rpm: u16,
    /// Duty value of a fully-on phase
    pub pwm_range: u16,
    /// Rotor poles (informational, used by the bench model)
    pub pole_count: u8,
    /// Carrier frequency handed to the driver
    pub pwm_frequency_hz: u32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            max_rpm: MOTOR_MAX_RPM,
            pwm_range: PWM_RANGE,
            pole_count: NUM_POLES,
            pwm_frequency_hz: PWM_FREQUENCY_HZ,
        }
    }
}

impl MotorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rpm == 0 {
            return Err(ConfigError::ZeroMaxRpm);
        }
        if self.pwm_range == 0 {
            return Err(ConfigError::ZeroPwmRange);
        }
        if self.pole_count == 0 || self.pole_count % 2 != 0 {
            return Err(ConfigError::InvalidPoleCount(self.pole_count));
        }
        if self.pwm_frequency_hz == 0 {
            return Err(ConfigError::ZeroPwmFrequency);
        }
        Ok(())
    }

    pub fn pole_pairs(&self) -> u8 {
        self.pole_count / 2
    }

    /// Cap a speed command at `max_rpm`
    pub fn clamp_speed(&self, rpm: u16) -> u16 {
        rpm.min(self.max_rpm)
    }

    /// Duty for a speed command, truncating: `rpm * pwm_range / max_rpm`
    pub fn duty_for(&self, rpm: u16) -> u16 {
        if self.max_rpm == 0 {
            return 0;
        }
        let rpm = self.clamp_speed(rpm) as u32;
        // rpm <= max_rpm, so the quotient never exceeds pwm_range
        (rpm * self.pwm_range as u32 / self.max_rpm as u32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_mapping() {
        let cfg = MotorConfig::default();
        assert_eq!(cfg.duty_for(0), 0);
        assert_eq!(cfg.duty_for(2500), 512);
        assert_eq!(cfg.duty_for(1000), 204);
        assert_eq!(cfg.duty_for(5000), 1024);
        assert_eq!(cfg.duty_for(u16::MAX), 1024);
        // 1 * 1024 / 5000 truncates to zero
        assert_eq!(cfg.duty_for(1), 0);
    }

    #[test]
    fn test_duty_mapping_exhaustive() {
        let cfg = MotorConfig::default();
        for rpm in 0..=cfg.max_rpm {
            let expected = (rpm as u32 * 1024 / 5000) as u16;
            assert_eq!(cfg.duty_for(rpm), expected);
        }
    }

    #[test]
    fn test_validate() {
        assert_eq!(MotorConfig::default().validate(), Ok(()));
        let cfg = MotorConfig { max_rpm: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroMaxRpm));
        let cfg = MotorConfig { pole_count: 7, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidPoleCount(7)));
        let cfg = MotorConfig { pwm_range: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPwmRange));
        assert_eq!(MotorConfig::default().pole_pairs(), 4);
    }
}
