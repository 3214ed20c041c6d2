//! Hall-sensored six-step commutation for 3-phase BLDC motors
//!
//! The [`hall`] table maps a 3-bit Hall code to the phases to energize,
//! [`MotorController`] turns a speed command into PWM duty and drives those
//! phases through a [`MotorDriver`]. Timing is up to the caller: run
//! [`MotorController::update`] from a periodic or Hall-edge task.

#![no_std]

pub mod config;
pub mod controller;
pub mod driver;
pub mod hall;
pub mod ramp;
pub mod shared;
#[cfg(feature = "sim")]
pub mod sim;

pub use config::{ConfigError, MotorConfig};
pub use controller::{Command, Commutation, InitError, MotorController, MotorStatus};
pub use driver::MotorDriver;
pub use hall::{HallCode, HallLevels, Phase, PhasePattern};
pub use ramp::{RampConfig, RampStage, RampStep, RampTest};
pub use shared::SharedMotor;
