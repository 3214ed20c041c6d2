//! Board status LED
//!
//! One pattern per [`Status`], overridden by a fast flicker while the motor
//! reads an invalid Hall code.

use core::sync::atomic::{AtomicU8, Ordering};

use embassy_stm32::gpio::Output;
use embassy_time::{Duration, Timer};

use crate::motor::Motor;

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum Status {
    Boot = 0,
    AwaitingHost = 1,
    HostLinked = 2,
    PowerStageFault = 3,
}

static STATUS: AtomicU8 = AtomicU8::new(Status::Boot as u8);

impl Status {
    pub fn current() -> Self {
        match STATUS.load(Ordering::Relaxed) {
            0 => Status::Boot,
            1 => Status::AwaitingHost,
            2 => Status::HostLinked,
            _ => Status::PowerStageFault,
        }
    }

    pub fn set(self) {
        STATUS.store(self as u8, Ordering::Relaxed);
    }

    /// A host handshake only upgrades a healthy board
    pub fn host_seen() {
        let _ = STATUS.compare_exchange(
            Status::AwaitingHost as u8,
            Status::HostLinked as u8,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    fn blink(self) -> Blink {
        match self {
            Status::Boot => Blink::new(2, 100, 100, 600),
            Status::AwaitingHost => Blink::new(1, 100, 900, 0),
            Status::HostLinked => Blink::new(1, 500, 0, 0),
            Status::PowerStageFault => Blink::new(3, 120, 120, 800),
        }
    }
}

const HALL_FAULT: Blink = Blink::new(1, 50, 50, 0);

/// `pulses` on/off cycles, then `pause_ms` dark
#[derive(Clone, Copy)]
struct Blink {
    pulses: u8,
    on_ms: u64,
    off_ms: u64,
    pause_ms: u64,
}

impl Blink {
    const fn new(pulses: u8, on_ms: u64, off_ms: u64, pause_ms: u64) -> Self {
        Self { pulses, on_ms, off_ms, pause_ms }
    }

    async fn play(self, led: &mut Output<'_>) {
        for _ in 0..self.pulses {
            led.set_high();
            Timer::after(Duration::from_millis(self.on_ms)).await;
            if self.off_ms > 0 {
                led.set_low();
                Timer::after(Duration::from_millis(self.off_ms)).await;
            }
        }
        if self.pause_ms > 0 {
            led.set_low();
            Timer::after(Duration::from_millis(self.pause_ms)).await;
        }
    }
}

/// Drive the LED forever; `motor` is `None` when the power stage failed
pub async fn run(mut led: Output<'static>, motor: Option<&'static Motor>) -> ! {
    loop {
        let hall_fault = motor.is_some_and(|m| m.lock(|c| c.hall_fault()));
        let pattern = if hall_fault { HALL_FAULT } else { Status::current().blink() };
        pattern.play(&mut led).await;
    }
}
