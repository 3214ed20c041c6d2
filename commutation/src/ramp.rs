//! Stepped ramp-up / hold / ramp-down speed profile for bench runs

/// Ramp test parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RampConfig {
    /// Speed held at the top of the ramp
    pub max_rpm: u16,
    /// Increment between steps
    pub step_rpm: u16,
    /// Time spent on each up/down step
    pub step_dwell_ms: u32,
    /// Time spent at `max_rpm`
    pub hold_ms: u32,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            max_rpm: crate::config::MOTOR_MAX_RPM,
            step_rpm: 100,
            step_dwell_ms: 500,
            hold_ms: 5000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampStage {
    Up,
    Hold,
    Down,
}

/// One speed command of the profile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RampStep {
    pub rpm: u16,
    /// How long to stay on this step before the next one
    pub dwell_ms: u32,
    pub stage: RampStage,
}

/// Iterator over the ramp test steps
///
/// Up: `0, step, 2*step, ..` while below `max_rpm`. Hold: `max_rpm`.
/// Down: the last up speed back to `0`.
#[derive(Clone, Debug)]
pub struct RampTest {
    config: RampConfig,
    stage: Option<RampStage>,
    rpm: u32,
}

impl RampTest {
    pub fn new(config: RampConfig) -> Self {
        let stage = if config.step_rpm == 0 {
            RampStage::Hold
        } else {
            RampStage::Up
        };
        Self {
            config,
            stage: Some(stage),
            rpm: 0,
        }
    }

    pub fn config(&self) -> &RampConfig {
        &self.config
    }

    /// Total duration of the remaining profile
    pub fn remaining_ms(&self) -> u64 {
        self.clone().map(|s| s.dwell_ms as u64).sum()
    }
}

impl Iterator for RampTest {
    type Item = RampStep;

    fn next(&mut self) -> Option<RampStep> {
        let cfg = self.config;
        let step = cfg.step_rpm as u32;

        match self.stage? {
            RampStage::Up => {
                if self.rpm >= cfg.max_rpm as u32 {
                    self.stage = Some(RampStage::Hold);
                    return self.next();
                }
                let rpm = self.rpm as u16;
                self.rpm += step;
                Some(RampStep {
                    rpm,
                    dwell_ms: cfg.step_dwell_ms,
                    stage: RampStage::Up,
                })
            }
            RampStage::Hold => {
                self.stage = if step == 0 { None } else { Some(RampStage::Down) };
                Some(RampStep {
                    rpm: cfg.max_rpm,
                    dwell_ms: cfg.hold_ms,
                    stage: RampStage::Hold,
                })
            }
            RampStage::Down => {
                if self.rpm == 0 {
                    self.stage = None;
                    return None;
                }
                self.rpm = self.rpm.saturating_sub(step);
                Some(RampStep {
                    rpm: self.rpm as u16,
                    dwell_ms: cfg.step_dwell_ms,
                    stage: RampStage::Down,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;

    #[test]
    fn test_default_profile() {
        let steps: Vec<_> = RampTest::new(RampConfig::default()).collect();

        let up: Vec<u16> = steps.iter().filter(|s| s.stage == RampStage::Up).map(|s| s.rpm).collect();
        let down: Vec<u16> = steps.iter().filter(|s| s.stage == RampStage::Down).map(|s| s.rpm).collect();
        let hold: Vec<_> = steps.iter().filter(|s| s.stage == RampStage::Hold).collect();

        assert_eq!(up, (0..5000).step_by(100).collect::<Vec<u16>>());
        assert_eq!(down, (0..5000).step_by(100).rev().collect::<Vec<u16>>());
        assert_eq!(hold.len(), 1);
        assert_eq!(hold[0].rpm, 5000);
        assert_eq!(hold[0].dwell_ms, 5000);
        assert_eq!(steps.last().map(|s| s.rpm), Some(0));
    }

    #[test]
    fn test_uneven_step() {
        let cfg = RampConfig {
            max_rpm: 1000,
            step_rpm: 300,
            ..Default::default()
        };
        let rpms: Vec<u16> = RampTest::new(cfg).map(|s| s.rpm).collect();
        assert_eq!(rpms, [0, 300, 600, 900, 1000, 900, 600, 300, 0]);
    }

    #[test]
    fn test_zero_step_only_holds() {
        let cfg = RampConfig {
            step_rpm: 0,
            ..Default::default()
        };
        let steps: Vec<_> = RampTest::new(cfg).collect();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].stage, RampStage::Hold);
    }

    #[test]
    fn test_remaining_duration() {
        let ramp = RampTest::new(RampConfig::default());
        // 50 up + 50 down steps at 500 ms, plus the 5 s hold
        assert_eq!(ramp.remaining_ms(), 100 * 500 + 5000);
    }
}
