//! Ramp test against the simulated rotor, no hardware needed

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use oxihall_commutation::sim::SimDriver;
use oxihall_commutation::{RampTest, SharedMotor};
use tracing::{info, warn};

use crate::config::{BenchConfig, HostConfig};
use crate::signal::Shutdown;

pub type BenchMotor = SharedMotor<CriticalSectionRawMutex, SimDriver>;

/// Wall-clock interval between simulation batches
const BATCH: Duration = Duration::from_millis(1);

/// Drives `update()` and the rotor model on the bench clock
pub struct Commutator {
    motor: Arc<BenchMotor>,
    tick_us: u32,
    clock_us: u64,
    dropout: Option<Range<u64>>,
}

impl Commutator {
    pub fn new(motor: Arc<BenchMotor>, config: &BenchConfig) -> Self {
        let dropout = config
            .hall_dropout_at_ms
            .map(|at| at * 1000..(at + config.hall_dropout_ms) * 1000);
        Self {
            motor,
            tick_us: config.tick_us.max(1),
            clock_us: 0,
            dropout,
        }
    }

    /// Simulate `dt_us` of bench time, one commutation update per tick
    pub fn run_for(&mut self, dt_us: u64) {
        let end = self.clock_us + dt_us;
        while self.clock_us < end {
            let now = self.clock_us;
            let unplugged = self.dropout.as_ref().is_some_and(|r| r.contains(&now));
            self.motor.lock(|m| {
                m.driver_mut().disconnect_hall(unplugged);
                m.update();
                m.driver_mut().advance(self.tick_us);
            });
            self.clock_us += self.tick_us as u64;
        }
    }

    pub fn clock_us(&self) -> u64 {
        self.clock_us
    }
}

async fn commutate(mut commutator: Commutator) {
    let mut interval = tokio::time::interval(BATCH);
    let mut last = Instant::now();
    loop {
        interval.tick().await;
        let now = Instant::now();
        commutator.run_for((now - last).as_micros() as u64);
        last = now;
    }
}

async fn run_ramp(motor: &BenchMotor, ramp: RampTest) {
    motor.start();
    for step in ramp {
        motor.set_speed(step.rpm);
        tokio::time::sleep(Duration::from_millis(step.dwell_ms as u64)).await;

        let (s, rotor_rpm, sectors) = motor.lock(|m| {
            (m.status(), m.driver().rotor_rpm(), m.driver().sectors_travelled())
        });
        info!(
            "{:?} {} RPM: duty={} rotor={} RPM hall={:?} sectors={} faults={}",
            step.stage,
            s.speed,
            s.duty,
            rotor_rpm,
            s.hall.map(|c| c.as_u8()),
            sectors,
            s.hall_faults
        );
    }
}

pub async fn run(config: &HostConfig) -> Result<()> {
    let motor = BenchMotor::init(SimDriver::new(), config.motor)
        .map_err(|e| anyhow!("Bench init failed: {}", e))?;
    let motor = Arc::new(motor);

    let ramp = RampTest::new(config.ramp());
    info!(
        "Bench ramp test: max={} RPM step={} RPM, ~{} s",
        ramp.config().max_rpm,
        ramp.config().step_rpm,
        ramp.remaining_ms() / 1000
    );

    let mut shutdown = Shutdown::listen()?;
    let commutator = tokio::spawn(commutate(Commutator::new(motor.clone(), &config.bench)));

    let interrupted = tokio::select! {
        _ = run_ramp(&motor, ramp) => {
            info!("Ramp test complete");
            None
        }
        r = shutdown.recv() => Some(r),
    };

    motor.stop();
    commutator.abort();
    if let Some(r) = interrupted {
        warn!("{}, motor stopped", r?);
    }

    let s = motor.status();
    info!(
        "Motor stopped: speed={} RPM running={} hall_faults={}",
        s.speed, s.running, s.hall_faults
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxihall_commutation::{MotorConfig, RampConfig};

    fn bench() -> Arc<BenchMotor> {
        Arc::new(BenchMotor::init(SimDriver::new(), MotorConfig::default()).unwrap())
    }

    #[test]
    fn test_dropout_window() {
        let motor = bench();
        let config = BenchConfig {
            tick_us: 100,
            hall_dropout_at_ms: Some(10),
            hall_dropout_ms: 5,
        };
        let mut c = Commutator::new(motor.clone(), &config);
        motor.set_speed(2000);
        motor.start();

        c.run_for(12_000);
        let s = motor.status();
        assert!(s.hall_fault);
        assert!(s.running);
        assert_eq!(motor.lock(|m| m.driver().duties()), [0, 0, 0]);

        c.run_for(8_000);
        let s = motor.status();
        assert!(!s.hall_fault);
        assert_eq!(s.hall_faults, 1);
        assert_eq!(c.clock_us(), 20_000);
    }

    #[tokio::test]
    async fn test_short_ramp_turns_rotor() {
        let motor = bench();
        let commutator = tokio::spawn(commutate(Commutator::new(motor.clone(), &BenchConfig::default())));

        let ramp = RampTest::new(RampConfig {
            max_rpm: 5000,
            step_rpm: 2500,
            step_dwell_ms: 5,
            hold_ms: 20,
        });
        run_ramp(&motor, ramp).await;
        commutator.abort();

        let sectors = motor.lock(|m| m.driver().sectors_travelled());
        assert!(sectors > 0);
        assert_eq!(motor.speed(), 0);
        assert!(motor.status().running);
        motor.stop();
        assert_eq!(motor.lock(|m| m.driver().duties()), [0, 0, 0]);
    }
}
