//! Ramp test on a probe-attached board: RTT <-> ergot bridge plus defmt logs

use core::pin::pin;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cobs_acc::{CobsAccumulator, FeedResult};
use defmt_decoder::{DecodeError, StreamDecoder, Table};
use ergot::Address;
use ergot::interface_manager::profiles::direct_edge::DirectEdge;
use ergot::interface_manager::profiles::direct_edge::process_frame as ergot_edge_process_frame;
use ergot::interface_manager::utils::cobs_stream::Sink as ErgotSink;
use ergot::interface_manager::utils::std::StdQueue as ErgotStdQueue;
use ergot::interface_manager::utils::std::new_std_queue;
use ergot::interface_manager::{Interface, InterfaceState};
use ergot::net_stack::ArcNetStack;
use mutex::raw_impls::cs::CriticalSectionRawMutex;
use oxihall_commutation::RampTest;
use oxihall_protocol::{
    ButtonEndpoint, ButtonEvent, InfoEndpoint, MotorCommand, MotorEndpoint, MotorState, MotorStatus,
};
use probe_rs::probe::list::Lister;
use probe_rs::rtt::{Rtt, ScanRegion};
use probe_rs::{Core, Permissions, Session};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::signal::Shutdown;

struct RttInterface;
impl Interface for RttInterface {
    type Sink = ErgotSink<ErgotStdQueue>;
}
type EdgeProfile = DirectEdge<RttInterface>;
type EdgeStack = ArcNetStack<CriticalSectionRawMutex, EdgeProfile>;

const ERGOT_MTU: u16 = 1024;
/// Device sits at network 1, node 2 behind our controller node
const DEVICE_ADDR: Address = Address { network_id: 1, node_id: 2, port_id: 0 };
const REQUEST_TIMEOUT: Duration = Duration::from_millis(800);

fn open_session(cfg: &HostConfig) -> Result<Session> {
    let probes = Lister::new().list_all();
    if probes.is_empty() {
        error!("No debug probes found! Make sure ST-Link is connected.");
        return Err(anyhow!("No probes found"));
    }
    info!("Found {} probe(s)", probes.len());

    // "vid:pid[:serial]" in hex, any part may be omitted
    let probe = if let Some(sel) = &cfg.probe {
        let mut parts = sel.split(':');
        let vid = parts.next().and_then(|v| u16::from_str_radix(v, 16).ok());
        let pid = parts.next().and_then(|v| u16::from_str_radix(v, 16).ok());
        let serial = parts.next();
        let chosen = probes
            .iter()
            .find(|p| {
                vid.is_none_or(|v| p.vendor_id == v)
                    && pid.is_none_or(|v| p.product_id == v)
                    && serial.is_none_or(|s| p.serial_number.as_deref() == Some(s))
            })
            .ok_or_else(|| anyhow!("Configured probe not found: {}", sel))?;
        chosen.open().context("Failed to open selected probe")?
    } else {
        probes[0].open().context("Failed to open probe")?
    };

    let target = match cfg.chip.clone() {
        Some(name) => probe_rs::config::TargetSelector::from(name),
        None => probe_rs::config::TargetSelector::Auto,
    };
    probe
        .attach(target, Permissions::default())
        .context("Failed to attach to target")
}

fn load_defmt_table(cfg: &HostConfig) -> Result<Table> {
    let elf_path = cfg.elf.clone().unwrap_or_else(|| {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../device/target/thumbv7em-none-eabihf/release/oxihall")
            .to_string_lossy()
            .into_owned()
    });
    let elf_bytes = fs::read(&elf_path).with_context(|| format!("Failed to read ELF at {}", elf_path))?;
    Table::parse(&elf_bytes)
        .context("Parsing defmt table from ELF failed")?
        .ok_or_else(|| anyhow!("No .defmt section in ELF; build device with defmt"))
}

async fn request(stack: &EdgeStack, cmd: MotorCommand) -> Result<MotorStatus> {
    let fut = stack
        .endpoints()
        .request::<MotorEndpoint>(DEVICE_ADDR, &cmd, Some("motor"));
    match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(e)) => Err(anyhow!("{:?} failed: {:?}", cmd, e)),
        Err(_) => Err(anyhow!("{:?} timed out", cmd)),
    }
}

/// Wait for the device to answer an info request
async fn handshake(stack: &EdgeStack) -> Result<()> {
    let mut backoff = Duration::from_millis(100);
    for attempt in 1..=10u32 {
        let fut = stack
            .endpoints()
            .request::<InfoEndpoint>(DEVICE_ADDR, &(), Some("device_info"));
        match tokio::time::timeout(REQUEST_TIMEOUT, fut).await {
            Ok(Ok(info)) => {
                info!("Device connected: hw='{}' sw='{}'", info.hw.as_str(), info.sw.as_str());
                return Ok(());
            }
            Ok(Err(e)) => warn!("DeviceInfo attempt {} failed: {:?}", attempt, e),
            Err(_) => warn!("DeviceInfo attempt {} timed out", attempt),
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(2));
    }
    Err(anyhow!("Device info not received after retries"))
}

/// Delivers one motor command and returns the device's answer
trait MotorLink {
    fn command(&self, cmd: MotorCommand) -> impl Future<Output = Result<MotorStatus>> + Send;
}

impl MotorLink for EdgeStack {
    fn command(&self, cmd: MotorCommand) -> impl Future<Output = Result<MotorStatus>> + Send {
        request(self, cmd)
    }
}

/// Ramp the device through the profile, reporting what it answers
async fn drive_ramp<L: MotorLink>(link: &L, ramp: RampTest) -> Result<()> {
    link.command(MotorCommand::Start).await?;
    for step in ramp {
        let s = link.command(MotorCommand::SetSpeed { rpm: step.rpm }).await?;
        info!(
            "{:?} {} RPM: state={:?} duty={} hall={} faults={}",
            step.stage, s.rpm, s.state, s.duty, s.hall, s.hall_faults
        );
        if s.state == MotorState::Fault {
            warn!("Device reports a Hall fault, phases de-energized");
        }
        tokio::time::sleep(Duration::from_millis(step.dwell_ms as u64)).await;
    }
    Ok(())
}

/// Best-effort stop; the phases must not stay energized when we leave
async fn stop_motor<L: MotorLink>(link: &L) -> Result<()> {
    match link.command(MotorCommand::Stop).await {
        Ok(s) => {
            info!("Motor stopped: state={:?} faults={}", s.state, s.hall_faults);
            Ok(())
        }
        Err(e) => {
            error!("Stop not confirmed: {:#}", e);
            Err(e)
        }
    }
}

/// Run the ramp, then stop the motor whatever the ramp's outcome
async fn ramp_session<L: MotorLink>(link: &L, ramp: RampTest) -> Result<()> {
    let ramped = drive_ramp(link, ramp).await;
    if let Err(e) = &ramped {
        error!("Ramp test failed: {:#}", e);
    }
    let stopped = stop_motor(link).await;
    ramped.and(stopped)
}

fn spawn_button_server(stack: &EdgeStack) {
    let stack = stack.clone();
    tokio::spawn(async move {
        let server = stack.endpoints().bounded_server::<ButtonEndpoint, 8>(Some("button"));
        let server = pin!(server);
        let mut h = server.attach();
        loop {
            let _ = h
                .serve(|event: &ButtonEvent| {
                    let ev = event.clone();
                    async move { info!("Button on device: {:?}", ev) }
                })
                .await;
        }
    });
}

/// Moves bytes between RTT channels and the ergot stack
struct RttPump<'s> {
    core: Core<'s>,
    rtt: Rtt,
    ergot_up: Option<usize>,
    defmt_up: Option<usize>,
    ergot_down: Option<usize>,
    defmt: Option<Box<dyn StreamDecoder + 's>>,
    cobs: CobsAccumulator<Box<[u8]>>,
    net_id: Option<u16>,
    buf: Vec<u8>,
    defbuf: Vec<u8>,
}

impl RttPump<'_> {
    fn find_up(rtt: &mut Rtt, name: &str) -> Option<usize> {
        rtt.up_channels()
            .iter()
            .position(|ch| ch.name() == Some(name))
    }

    fn find_down(rtt: &mut Rtt, name: &str) -> Option<usize> {
        rtt.down_channels()
            .iter()
            .position(|ch| ch.name() == Some(name))
    }

    fn pump_up(&mut self, stack: &EdgeStack) -> Result<()> {
        if let Some(idx) = self.ergot_up
            && let Some(channel) = self.rtt.up_channels().get_mut(idx)
        {
            let count = channel.read(&mut self.core, &mut self.buf)?;
            let mut window = &mut self.buf[..count];
            while !window.is_empty() {
                window = match self.cobs.feed_raw(window) {
                    FeedResult::Consumed => break,
                    FeedResult::OverFull(rest) => rest,
                    FeedResult::DecodeError(rest) => rest,
                    FeedResult::Success { data, remaining }
                    | FeedResult::SuccessInput { data, remaining } => {
                        ergot_edge_process_frame(&mut self.net_id, data, stack, ());
                        remaining
                    }
                };
            }
        }

        if let (Some(idx), Some(stream)) = (self.defmt_up, self.defmt.as_mut())
            && let Some(channel) = self.rtt.up_channels().get_mut(idx)
        {
            let count = channel.read(&mut self.core, &mut self.defbuf)?;
            if count > 0 {
                stream.received(&self.defbuf[..count]);
                loop {
                    match stream.decode() {
                        Ok(frame) => println!("{}", frame.display(true)),
                        Err(DecodeError::UnexpectedEof) => break,
                        Err(DecodeError::Malformed) => {
                            error!("Malformed defmt frame");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn pump_down(&mut self, queue: &ErgotStdQueue) {
        let Some(idx) = self.ergot_down else { return };
        let Some(channel) = self.rtt.down_channels().get_mut(idx) else { return };
        let consumer = queue.stream_consumer();
        for _ in 0..8 {
            match tokio::time::timeout(Duration::from_millis(1), consumer.wait_read()).await {
                Ok(frame) => {
                    let len = frame.len();
                    if len == 0 {
                        break;
                    }
                    let _ = channel.write(&mut self.core, &frame[..len]);
                    frame.release(len);
                }
                Err(_) => break,
            }
        }
    }
}

pub async fn run(cfg: &HostConfig) -> Result<()> {
    info!("Oxihall Host - RTT (chip={:?}, probe={:?})", cfg.chip, cfg.probe);

    let mut session = open_session(cfg)?;
    let mut core = session.core(0)?;
    let mut rtt = Rtt::attach_region(&mut core, &ScanRegion::Ram).context("Failed to attach RTT")?;
    info!("RTT attached");

    let ergot_up = cfg.stream_ergot().then(|| RttPump::find_up(&mut rtt, "ergot").unwrap_or(1));
    let defmt_up = cfg.stream_defmt().then(|| RttPump::find_up(&mut rtt, "defmt").unwrap_or(0));
    let ergot_down = RttPump::find_down(&mut rtt, "ergot-down").or(Some(0));
    info!("Using channels: ergot={:?}, defmt={:?}, down={:?}", ergot_up, defmt_up, ergot_down);

    let table = match defmt_up {
        Some(_) => Some(load_defmt_table(cfg)?),
        None => None,
    };

    let queue = new_std_queue(4096);
    let stack: EdgeStack = ArcNetStack::new_with_profile(DirectEdge::new_controller(
        ErgotSink::new_from_handle(queue.clone(), ERGOT_MTU),
        InterfaceState::Active { net_id: 1, node_id: 1 },
    ));
    spawn_button_server(&stack);

    let mut pump = RttPump {
        core,
        rtt,
        ergot_up,
        defmt_up,
        ergot_down,
        defmt: table.as_ref().map(|t| t.new_stream_decoder() as Box<dyn StreamDecoder + '_>),
        cobs: CobsAccumulator::new_boxslice(1024 * 4),
        net_id: Some(1),
        buf: vec![0u8; 4096],
        defbuf: vec![0u8; 2048],
    };

    let mut shutdown = Shutdown::listen()?;
    let mut interrupted = pin!(shutdown.recv());

    let session_stack = stack.clone();
    let ramp = RampTest::new(cfg.ramp());
    let mut session = tokio::spawn(async move {
        handshake(&session_stack).await?;
        ramp_session(&session_stack, ramp).await
    });

    // Set once the session is abandoned: the pending stop plus the result to report
    let mut stopping: Option<(tokio::task::JoinHandle<Result<()>>, Result<()>)> = None;

    loop {
        let pumped = pump.pump_up(&stack);
        pump.pump_down(&queue).await;

        match stopping.as_mut() {
            Some((stop, _)) => {
                if let Err(e) = pumped {
                    debug!("RTT read while stopping: {:#}", e);
                }
                if stop.is_finished() {
                    let _ = stop.await;
                    if let Some((_, outcome)) = stopping.take() {
                        return outcome;
                    }
                }
            }
            None => {
                let abandon = if let Err(e) = pumped {
                    error!("RTT read failed: {:#}", e);
                    Some(Err(e))
                } else if session.is_finished() {
                    return (&mut session).await?;
                } else if let Some(r) = poll_now(&mut interrupted).await {
                    Some(r.map(|name| warn!("{}, stopping motor", name)))
                } else {
                    None
                };

                if let Some(outcome) = abandon {
                    session.abort();
                    let stack = stack.clone();
                    let stop = tokio::spawn(async move { stop_motor(&stack).await });
                    stopping = Some((stop, outcome));
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a future once without blocking
async fn poll_now<F: Future + Unpin>(fut: &mut F) -> Option<F::Output> {
    tokio::time::timeout(Duration::ZERO, fut).await.ok()
}
