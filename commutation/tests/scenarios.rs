#![cfg(feature = "sim")]

use oxihall_commutation::sim::{SimDriver, SimError};
use oxihall_commutation::{
    Commutation, HallCode, InitError, MotorConfig, MotorController, RampConfig, RampStage,
    RampTest,
};

/// Commutation tick used by the bench loop
const TICK_US: u32 = 100;

fn run(ctrl: &mut MotorController<SimDriver>, ticks: u32) {
    for _ in 0..ticks {
        ctrl.update();
        ctrl.driver_mut().advance(TICK_US);
    }
}

#[test]
fn rotor_follows_forward_sequence_while_running() {
    let mut ctrl = MotorController::init(SimDriver::new(), MotorConfig::default()).unwrap();
    ctrl.set_speed(2500);
    ctrl.start();

    let mut seen = Vec::new();
    for _ in 0..200 {
        if let Commutation::Driven { code, pattern, duty } = ctrl.update() {
            assert_eq!(duty, 512);
            assert_eq!(pattern, code.pattern());
            assert!(pattern.enabled_count() >= 1);
            if seen.last() != Some(&code) {
                seen.push(code);
            }
        } else {
            panic!("unexpected outcome");
        }
        ctrl.driver_mut().advance(TICK_US);
    }

    // 2500 RPM, 4 pole pairs: 1000 sectors/s, one sector every 10 ticks
    assert!(seen.len() >= 12);
    for pair in seen.windows(2) {
        assert_eq!(pair[0].next_forward(), Some(pair[1]));
    }
    assert_eq!(ctrl.hall_faults(), 0);
}

#[test]
fn stopped_motor_does_not_turn() {
    let mut ctrl = MotorController::init(SimDriver::new(), MotorConfig::default()).unwrap();
    ctrl.set_speed(5000);
    run(&mut ctrl, 100);
    assert_eq!(ctrl.driver().sectors_travelled(), 0);

    ctrl.start();
    run(&mut ctrl, 100);
    let travelled = ctrl.driver().sectors_travelled();
    assert!(travelled > 0);

    ctrl.stop();
    run(&mut ctrl, 100);
    assert_eq!(ctrl.driver().sectors_travelled(), travelled);
    assert_eq!(ctrl.driver().duties(), [0, 0, 0]);
}

#[test]
fn unplugged_sensor_cuts_torque_and_is_reported() {
    let mut ctrl = MotorController::init(SimDriver::new(), MotorConfig::default()).unwrap();
    ctrl.set_speed(3000);
    ctrl.start();
    run(&mut ctrl, 50);

    ctrl.driver_mut().disconnect_hall(true);
    assert_eq!(ctrl.update(), Commutation::Fault(HallCode::new(7)));
    let parked = ctrl.driver().sectors_travelled();
    run(&mut ctrl, 50);

    let status = ctrl.status();
    assert!(status.running);
    assert!(status.hall_fault);
    assert_eq!(status.hall_faults, 1);
    assert_eq!(ctrl.driver().duties(), [0, 0, 0]);
    assert_eq!(ctrl.driver().sectors_travelled(), parked);

    ctrl.driver_mut().disconnect_hall(false);
    run(&mut ctrl, 50);
    assert!(!ctrl.hall_fault());
    assert!(ctrl.driver().sectors_travelled() > parked);
}

#[test]
fn hardware_failure_blocks_controller() {
    let err = MotorController::init(SimDriver::new().failing_init(), MotorConfig::default()).err();
    assert_eq!(err, Some(InitError::Driver(SimError::Unavailable)));
}

#[test]
fn ramp_test_ends_stopped() {
    let mut ctrl = MotorController::init(SimDriver::new(), MotorConfig::default()).unwrap();
    ctrl.start();

    let mut peak = 0;
    for step in RampTest::new(RampConfig::default()) {
        ctrl.set_speed(step.rpm);
        if step.stage == RampStage::Hold {
            assert_eq!(ctrl.speed(), 5000);
            assert_eq!(ctrl.duty(), 1024);
        }
        run(&mut ctrl, 10);
        peak = peak.max(ctrl.driver().rotor_rpm());
    }
    ctrl.stop();

    assert_eq!(peak, 5000);
    assert_eq!(ctrl.speed(), 0);
    assert!(!ctrl.is_running());
    assert_eq!(ctrl.driver().duties(), [0, 0, 0]);
}
