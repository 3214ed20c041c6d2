//! Motor control for the B-G431B-ESC1 with a Hall-sensored BLDC motor
//!
//! The controller lives in a [`SharedMotor`] so the commutation ticker,
//! the ergot command server, the button handler and the ramp runner all
//! see one consistent speed/run/duty state.

pub mod bridge;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Ticker, Timer};
use oxihall_commutation::{self as commutation, Command, RampConfig, RampTest, SharedMotor};
use oxihall_protocol::{MotorCommand, MotorStatus};

use self::bridge::HallBridge;

pub type Motor = SharedMotor<CriticalSectionRawMutex, HallBridge<'static>>;

/// Commutation cadence: one Hall sample per PWM period at 20 kHz
pub const COMMUTATION_PERIOD: Duration = Duration::from_micros(50);

/// Speed used when the button starts a motor that has no speed command yet
pub const BUTTON_START_RPM: u16 = 1000;

static RAMP_START: Signal<CriticalSectionRawMutex, RampConfig> = Signal::new();
static RAMP_CANCEL: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Handle a motor command from the host
pub fn handle_command(motor: &Motor, cmd: &MotorCommand) -> MotorStatus {
    let status = match cmd {
        MotorCommand::Stop => {
            defmt::info!("Motor command: STOP");
            stop(motor)
        }
        MotorCommand::Start => {
            defmt::info!("Motor command: START");
            motor.apply(Command::Start)
        }
        MotorCommand::SetSpeed { rpm } => {
            defmt::info!("Motor command: SET_SPEED rpm={}", rpm);
            motor.apply(Command::SetSpeed(*rpm))
        }
        MotorCommand::Status => motor.status(),
    };
    MotorStatus::from(&status)
}

/// Stop the motor and abort a running ramp test
pub fn stop(motor: &Motor) -> commutation::MotorStatus {
    RAMP_CANCEL.signal(());
    motor.apply(Command::Stop)
}

/// Toggle run state from the button
pub fn toggle(motor: &Motor) {
    let running = motor.lock(|m| m.is_running());
    if running {
        stop(motor);
    } else {
        motor.lock(|m| {
            if m.speed() == 0 {
                m.set_speed(BUTTON_START_RPM);
            }
            m.start();
        });
    }
}

pub fn request_ramp(config: RampConfig) {
    RAMP_START.signal(config);
}

/// Periodic commutation: sample Hall sensors and drive phases
#[embassy_executor::task]
pub async fn commutation_task(motor: &'static Motor) {
    defmt::info!("Commutation task started, period={}us", COMMUTATION_PERIOD.as_micros());

    let mut ticker = Ticker::every(COMMUTATION_PERIOD);
    let mut faults = 0;

    loop {
        let (outcome, status) = motor.lock(|m| (m.update(), m.status()));

        if status.hall_faults != faults {
            faults = status.hall_faults;
            if let commutation::Commutation::Fault(code) = outcome {
                defmt::warn!("Hall fault: code={} faults={}", code.as_u8(), faults);
            }
        }

        ticker.next().await;
    }
}

/// Runs the ramp-up / hold / ramp-down test when requested
#[embassy_executor::task]
pub async fn ramp_runner(motor: &'static Motor) {
    defmt::info!("Ramp runner started");

    loop {
        let config = RAMP_START.wait().await;
        RAMP_CANCEL.reset();

        let ramp = RampTest::new(config);
        defmt::info!("Ramp test: {}", ramp.config());
        motor.start();

        let mut aborted = false;
        for step in ramp {
            motor.set_speed(step.rpm);
            defmt::info!("Ramp {}: {} RPM", step.stage, step.rpm);

            let dwell = Timer::after(Duration::from_millis(step.dwell_ms as u64));
            if let Either::Second(()) = select(dwell, RAMP_CANCEL.wait()).await {
                aborted = true;
                break;
            }
        }

        motor.stop();
        if aborted {
            defmt::warn!("Ramp test aborted");
        } else {
            defmt::info!("Ramp test complete");
        }
    }
}
