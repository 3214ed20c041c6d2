#![no_std]

use ergot::endpoint;
use heapless::String;
use postcard_schema::Schema;
use serde::{Deserialize, Serialize};

/// Button events from the B-G431B-ESC1 board
#[derive(Clone, Schema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonEvent {
    SingleClick,
    DoubleClick,
    Hold,
}

endpoint!(ButtonEndpoint, ButtonEvent, (), "event/button");

/// Basic device info returned on request
#[derive(Clone, Schema, Serialize, Deserialize, Debug)]
pub struct DeviceInfo {
    pub hw: String<32>,
    pub sw: String<32>,
}

// Host -> Device info query (unit request, returns DeviceInfo)
endpoint!(InfoEndpoint, (), DeviceInfo, "req/device_info");

/// Motor control commands
#[derive(Clone, Schema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorCommand {
    Stop,
    Start,
    /// Speed in RPM, capped at the device's max RPM
    SetSpeed { rpm: u16 },
    /// Query only, changes nothing
    Status,
}

/// Motor operational state
#[derive(Clone, Copy, Schema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotorState {
    Stopped,
    Running,
    /// Running, but the Hall code is invalid and all phases are off
    Fault,
}

/// Motor status response
#[derive(Clone, Schema, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorStatus {
    pub state: MotorState,
    pub rpm: u16,           // Commanded speed
    pub duty: u16,          // 0..=pwm_range
    pub hall: u8,           // Last Hall code (0-7), 0 before the first sample
    pub hall_faults: u32,   // Entries into an invalid Hall code
}

impl MotorState {
    /// Stopped wins over a fault flag
    pub fn from_flags(running: bool, hall_fault: bool) -> Self {
        match (running, hall_fault) {
            (false, _) => MotorState::Stopped,
            (true, false) => MotorState::Running,
            (true, true) => MotorState::Fault,
        }
    }
}

impl From<&oxihall_commutation::MotorStatus> for MotorStatus {
    fn from(s: &oxihall_commutation::MotorStatus) -> Self {
        Self {
            state: MotorState::from_flags(s.running, s.hall_fault),
            rpm: s.speed,
            duty: s.duty,
            hall: s.hall.map_or(0, |c| c.as_u8()),
            hall_faults: s.hall_faults,
        }
    }
}

// Host -> Device motor control (command in, status out)
endpoint!(MotorEndpoint, MotorCommand, MotorStatus, "cmd/motor");
