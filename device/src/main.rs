#![no_std]
#![no_main]

use core::pin::pin;

use embassy_executor::Spawner;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_time::{Duration, with_timeout};
use ergot::{
    Address,
    exports::bbq2::traits::coordination::cas::AtomicCoord,
    toolkits::embedded_io_async_v0_6::{self as kit, tx_worker},
};
use mutex::raw_impls::cs::CriticalSectionRawMutex;
use oxihall_commutation::{MotorConfig, RampConfig};
use oxihall_protocol::{ButtonEndpoint, ButtonEvent, DeviceInfo, InfoEndpoint, MotorCommand, MotorEndpoint};
use rtt_target::{ChannelMode::*, rtt_init};
use static_cell::StaticCell;

mod link;
use link::{LinkRx, LinkTx};

mod motor;
use motor::Motor;
use motor::bridge::{BridgeConfig, HallBridge};

mod status;
use status::Status;

use panic_probe as _;

const OUT_QUEUE_SIZE: usize = 2048;
const MAX_PACKET_SIZE: usize = 512;

type Queue = kit::Queue<OUT_QUEUE_SIZE, AtomicCoord>;
type Stack = kit::Stack<&'static Queue, CriticalSectionRawMutex>;
type RxWorker = kit::RxWorker<&'static Queue, CriticalSectionRawMutex, LinkRx>;

static OUTQ: Queue = kit::Queue::new();
static STACK: Stack = kit::new_target_stack(OUTQ.stream_producer(), MAX_PACKET_SIZE as u16);

static RECV_BUF: StaticCell<[u8; MAX_PACKET_SIZE]> = StaticCell::new();
static SCRATCH_BUF: StaticCell<[u8; 64]> = StaticCell::new();

static RTT_UP_CHANNEL: StaticCell<rtt_target::UpChannel> = StaticCell::new();
static RTT_DOWN_CHANNEL: StaticCell<rtt_target::DownChannel> = StaticCell::new();

static MOTOR: StaticCell<Motor> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // defmt on up channel 0, ergot on up 1 / down 0
    let channels = rtt_init! {
        up: {
            0: { size: 1024, mode: NoBlockSkip, name: "defmt" }
            1: { size: 2048, mode: NoBlockSkip, name: "ergot" }
        }
        down: {
            0: { size: 1024, name: "ergot-down" }
        }
    };
    rtt_target::set_defmt_channel(channels.up.0);

    let rtt_up = RTT_UP_CHANNEL.init_with(|| channels.up.1);
    let rtt_down = RTT_DOWN_CHANNEL.init_with(|| channels.down.0);
    let (link_rx, link_tx) = link::split(rtt_up, rtt_down);

    // HSE 8 MHz -> PLL -> 170 MHz SYSCLK
    let p = {
        let mut config = embassy_stm32::Config::default();
        {
            use embassy_stm32::rcc::*;
            use embassy_stm32::time::Hertz;
            config.rcc.hse = Some(Hse {
                freq: Hertz(8_000_000),
                mode: HseMode::Oscillator,
            });
            // VCO in 4 MHz, VCO 340 MHz, SYSCLK 170 MHz
            config.rcc.pll = Some(Pll {
                source: PllSource::HSE,
                prediv: PllPreDiv::DIV2,
                mul: PllMul::MUL85,
                divp: None,
                divq: None,
                divr: Some(PllRDiv::DIV2),
            });
            config.rcc.sys = Sysclk::PLL1_R;
            // Range1 boost above 150 MHz (RM0440)
            config.rcc.boost = true;
        }
        embassy_stm32::init(config)
    };

    defmt::info!("Oxihall starting - ergot over RTT");

    let rx_worker = RxWorker::new_target(&STACK, link_rx, ());

    // Button: PC10, external pull-up, active-low
    let button = ExtiInput::new(p.PC10, p.EXTI10, Pull::None);
    let led = Output::new(p.PC6, Level::Low, Speed::Low);

    let motor_config = MotorConfig::default();
    let bridge = HallBridge::new(
        p.TIM1,
        p.PA8,  // Phase A high
        p.PC13, // Phase A low
        p.PA9,  // Phase B high
        p.PA12, // Phase B low
        p.PA10, // Phase C high
        p.PB15, // Phase C low
        p.PB6,  // Hall A
        p.PB7,  // Hall B
        p.PB8,  // Hall C
        &motor_config,
        BridgeConfig::default(),
    );

    spawner
        .spawn(run_rx(
            rx_worker,
            RECV_BUF.init_with(|| [0u8; MAX_PACKET_SIZE]),
            SCRATCH_BUF.init_with(|| [0u8; 64]),
        ))
        .unwrap();
    spawner.spawn(run_tx(link_tx)).unwrap();
    spawner.spawn(info_server()).unwrap();

    // Without a working power stage no motor task is spawned
    let motor: Option<&'static Motor> = match Motor::init(bridge, motor_config) {
        Ok(m) => {
            let m = MOTOR.init(m);
            spawner.spawn(motor::commutation_task(m)).unwrap();
            spawner.spawn(motor::ramp_runner(m)).unwrap();
            spawner.spawn(motor_command_server(m)).unwrap();
            spawner.spawn(button_handler(button, m)).unwrap();
            Status::AwaitingHost.set();
            Some(m)
        }
        Err(e) => {
            defmt::error!("Motor init failed: {}", e);
            Status::PowerStageFault.set();
            None
        }
    };

    defmt::info!("All tasks spawned, entering LED status loop");
    status::run(led, motor).await
}

#[embassy_executor::task]
async fn run_rx(mut rcvr: RxWorker, recv_buf: &'static mut [u8], scratch_buf: &'static mut [u8]) {
    loop {
        let _ = rcvr.run(recv_buf, scratch_buf).await;
    }
}

#[embassy_executor::task]
async fn run_tx(mut tx: LinkTx) {
    loop {
        let _ = tx_worker(&mut tx, OUTQ.stream_consumer()).await;
    }
}

/// Single click toggles the motor, double click runs the ramp test, hold stops
#[embassy_executor::task]
async fn button_handler(mut button: ExtiInput<'static>, ctrl: &'static Motor) {
    const DOUBLE_CLICK_DELAY: u64 = 250;
    const HOLD_DELAY: u64 = 1000;

    // Host router at network 1, node 1
    let host_addr = Address {
        network_id: 1,
        node_id: 1,
        port_id: 0,
    };
    let client = STACK
        .endpoints()
        .client::<ButtonEndpoint>(host_addr, Some("button"));

    defmt::info!("Button ready (active-low)");

    loop {
        button.wait_for_falling_edge().await;

        let event = if with_timeout(
            Duration::from_millis(HOLD_DELAY),
            button.wait_for_rising_edge(),
        )
        .await
        .is_err()
        {
            motor::stop(ctrl);
            button.wait_for_rising_edge().await;
            ButtonEvent::Hold
        } else if with_timeout(
            Duration::from_millis(DOUBLE_CLICK_DELAY),
            button.wait_for_falling_edge(),
        )
        .await
        .is_ok()
        {
            motor::request_ramp(RampConfig::default());
            button.wait_for_rising_edge().await;
            ButtonEvent::DoubleClick
        } else {
            motor::toggle(ctrl);
            ButtonEvent::SingleClick
        };

        defmt::info!("Button: {}", event);
        // Host may not be attached; the event is informational
        let _ = client.request(&event).await;
    }
}

/// Respond to info requests from host
#[embassy_executor::task]
async fn info_server() {
    let server = STACK
        .endpoints()
        .bounded_server::<InfoEndpoint, 2>(Some("device_info"));
    let server = pin!(server);
    let mut h = server.attach();
    loop {
        let _ = h
            .serve(|_req: &()| async move {
                Status::host_seen();
                let mut hw: heapless::String<32> = heapless::String::new();
                let mut sw: heapless::String<32> = heapless::String::new();
                let _ = hw.push_str("B-G431B-ESC1");
                let _ = sw.push_str(concat!("oxihall-", env!("CARGO_PKG_VERSION")));
                DeviceInfo { hw, sw }
            })
            .await;
    }
}

/// Motor commands from the host, answered with the resulting status
#[embassy_executor::task]
async fn motor_command_server(ctrl: &'static Motor) {
    defmt::info!("Motor command server started");

    let server = STACK
        .endpoints()
        .bounded_server::<MotorEndpoint, 2>(Some("motor"));
    let server = pin!(server);
    let mut h = server.attach();

    loop {
        let _ = h
            .serve(|cmd: &MotorCommand| {
                let status = motor::handle_command(ctrl, cmd);
                async move { status }
            })
            .await;
    }
}
