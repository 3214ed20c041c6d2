//! TIM1 complementary PWM bridge and Hall inputs of the B-G431B-ESC1

use embassy_stm32::gpio::{Input, OutputType, Pull};
use embassy_stm32::peripherals::{PA8, PA9, PA10, PA12, PB6, PB7, PB8, PB15, PC13, TIM1};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::Channel;
use embassy_stm32::timer::complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin};
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::PwmPin;
use embassy_stm32::Peri;
use oxihall_commutation::{HallLevels, MotorConfig, MotorDriver, Phase};

/// Carrier frequencies the timer setup supports
const PWM_FREQ_RANGE_HZ: core::ops::RangeInclusive<u32> = 1_000..=100_000;

/// Board-level limits applied below the controller
pub struct BridgeConfig {
    /// Dead time as a fraction of the timer period (max_duty / divisor)
    pub dead_time_divisor: u16,
    /// Hard cap on the high-side duty, 0-100
    pub duty_limit_percent: u8,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dead_time_divisor: 512, // ~2 µs at 20 kHz
            duty_limit_percent: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum BridgeError {
    /// Timer reports no usable duty resolution
    NoResolution,
    UnsupportedFrequency(u32),
}

/// Three half-bridges on TIM1 plus the Hall connector (PB6/PB7/PB8)
pub struct HallBridge<'d> {
    pwm: ComplementaryPwm<'d, TIM1>,
    hall_a: Input<'d>,
    hall_b: Input<'d>,
    hall_c: Input<'d>,
    pwm_freq_hz: u32,
    max_duty: u16,
    duty_limit: u16,
    pwm_range: u16,
    dead_time_divisor: u16,
}

impl<'d> HallBridge<'d> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tim1: Peri<'d, TIM1>,
        pa8: Peri<'d, PA8>,
        pc13: Peri<'d, PC13>,
        pa9: Peri<'d, PA9>,
        pa12: Peri<'d, PA12>,
        pa10: Peri<'d, PA10>,
        pb15: Peri<'d, PB15>,
        pb6: Peri<'d, PB6>,
        pb7: Peri<'d, PB7>,
        pb8: Peri<'d, PB8>,
        motor: &MotorConfig,
        config: BridgeConfig,
    ) -> Self {
        let ch1 = PwmPin::new(pa8, OutputType::PushPull); // Phase A high
        let ch2 = PwmPin::new(pa9, OutputType::PushPull); // Phase B high
        let ch3 = PwmPin::new(pa10, OutputType::PushPull); // Phase C high
        let ch1n = ComplementaryPwmPin::new(pc13, OutputType::PushPull); // Phase A low
        let ch2n = ComplementaryPwmPin::new(pa12, OutputType::PushPull); // Phase B low
        let ch3n = ComplementaryPwmPin::new(pb15, OutputType::PushPull); // Phase C low

        // Out-of-range requests are rejected in init(), keep the timer sane until then
        let freq_hz = motor
            .pwm_frequency_hz
            .clamp(*PWM_FREQ_RANGE_HZ.start(), *PWM_FREQ_RANGE_HZ.end());

        let pwm = ComplementaryPwm::new(
            tim1,
            Some(ch1),
            Some(ch1n),
            Some(ch2),
            Some(ch2n),
            Some(ch3),
            Some(ch3n),
            None,
            None,
            Hertz(freq_hz),
            CountingMode::CenterAlignedBothInterrupts,
        );
        let max_duty = pwm.get_max_duty();
        let duty_limit = (max_duty as u32 * config.duty_limit_percent.min(100) as u32 / 100) as u16;

        Self {
            pwm,
            hall_a: Input::new(pb6, Pull::Up),
            hall_b: Input::new(pb7, Pull::Up),
            hall_c: Input::new(pb8, Pull::Up),
            pwm_freq_hz: motor.pwm_frequency_hz,
            max_duty,
            duty_limit,
            pwm_range: motor.pwm_range,
            dead_time_divisor: config.dead_time_divisor.max(1),
        }
    }

    /// Controller duty `[0, pwm_range]` to timer compare ticks
    fn to_ticks(&self, duty: u16) -> u16 {
        if self.pwm_range == 0 {
            return 0;
        }
        let duty = duty.min(self.pwm_range) as u32;
        let ticks = (duty * self.max_duty as u32 / self.pwm_range as u32) as u16;
        ticks.min(self.duty_limit)
    }

    fn channel(phase: Phase) -> Channel {
        match phase {
            Phase::A => Channel::Ch1,
            Phase::B => Channel::Ch2,
            Phase::C => Channel::Ch3,
        }
    }
}

impl MotorDriver for HallBridge<'_> {
    type Error = BridgeError;

    fn init(&mut self, config: &MotorConfig) -> Result<(), BridgeError> {
        if !PWM_FREQ_RANGE_HZ.contains(&config.pwm_frequency_hz) {
            return Err(BridgeError::UnsupportedFrequency(config.pwm_frequency_hz));
        }
        if self.max_duty == 0 {
            return Err(BridgeError::NoResolution);
        }
        self.pwm_range = config.pwm_range;

        self.pwm.set_dead_time(self.max_duty / self.dead_time_divisor);
        for phase in Phase::ALL {
            let ch = Self::channel(phase);
            self.pwm.set_duty(ch, 0);
            self.pwm.enable(ch);
        }

        defmt::info!(
            "Bridge init: freq={}Hz, max_duty={}, limit={}, range={}",
            self.pwm_freq_hz,
            self.max_duty,
            self.duty_limit,
            self.pwm_range
        );
        Ok(())
    }

    fn set_phase_duty(&mut self, phase: Phase, duty: u16) {
        let ticks = self.to_ticks(duty);
        self.pwm.set_duty(Self::channel(phase), ticks);
    }

    fn read_hall(&mut self) -> HallLevels {
        HallLevels::new(
            self.hall_a.is_high(),
            self.hall_b.is_high(),
            self.hall_c.is_high(),
        )
    }
}
