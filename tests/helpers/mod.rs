/// Test doubles: an in-memory CAN bus pair and a scripted device under test.
use async_trait::async_trait;
use korri_nm_conformance::engine::device_control::DeviceControl;
use korri_nm_conformance::error::ControlError;
use korri_nm_conformance::protocol::managment::address_claiming::{
    build_address_claim_frame, requested_pgn, ClaimAction, ClaimState, ClaimTracker,
};
use korri_nm_conformance::protocol::managment::iso_name::IsoName;
use korri_nm_conformance::protocol::transport::{
    can_frame::CanFrame, can_id::CanId, is_immediately_usable, traits::can_bus::CanBus,
    ADDRESS_GLOBAL, CLAIM_SETTLING_DELAY_MS, PGN_ADDRESS_CLAIMED, PGN_COMMANDED_ADDRESS,
    PGN_REQUEST, PGN_TP_CM, PGN_TP_DT,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep_until, Duration, Instant};

#[derive(Clone)]
#[allow(dead_code)]
/// In-memory CAN bus reproducing the `CanBus` trait behavior.
pub struct MockCanBus {
    tx: mpsc::UnboundedSender<CanFrame>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<CanFrame>>>,
}

#[allow(dead_code)]
impl MockCanBus {
    /// Construct a pair of interconnected buses (harness ↔ device).
    pub fn create_pair() -> (Self, Self) {
        let (harness_tx, device_rx) = mpsc::unbounded_channel();
        let (device_tx, harness_rx) = mpsc::unbounded_channel();

        let harness_bus = Self {
            tx: harness_tx,
            rx: Arc::new(Mutex::new(harness_rx)),
        };

        let device_bus = Self {
            tx: device_tx,
            rx: Arc::new(Mutex::new(device_rx)),
        };

        (harness_bus, device_bus)
    }
}

#[async_trait]
impl CanBus for MockCanBus {
    type Error = ();

    async fn send(&mut self, frame: &CanFrame) -> Result<(), Self::Error> {
        self.tx.send(frame.clone()).map_err(|_| ())
    }

    async fn recv(&mut self) -> Result<CanFrame, Self::Error> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(())
    }
}

#[allow(dead_code)]
/// Utility loop: drain every frame without answering (quiet network).
pub async fn simulate_no_conflict(mut peer: MockCanBus) {
    while let Ok(_frame) = peer.recv().await {}
}

#[allow(dead_code)]
/// Address Claimed frame for `name` from `source`.
pub fn claim_frame(name: u64, source: u8) -> CanFrame {
    build_address_claim_frame(IsoName::from_raw(name), source).unwrap()
}

//==================================================================================DEVICE
#[derive(Debug, Clone)]
#[allow(dead_code)]
/// Behaviour of the simulated device under test.
pub struct DeviceBehaviour {
    pub name: IsoName,
    pub preferred_address: u8,
    /// Raw PGN (with destination byte) of the periodic normal traffic.
    pub traffic_pgn: u32,
    pub traffic_period: Duration,
    pub boot_delay: Duration,
    pub reclaim_interval: Duration,
    /// Never answer claims contesting its address.
    pub ignore_contests: bool,
    /// Start normal traffic right after claiming, whatever the address.
    pub eager_traffic: bool,
    /// Answer every address violation.
    pub no_rate_limit: bool,
}

#[allow(dead_code)]
impl DeviceBehaviour {
    pub fn new(name: u64, preferred_address: u8) -> Self {
        Self {
            name: IsoName::from_raw(name),
            preferred_address,
            traffic_pgn: 0xC0FF,
            traffic_period: Duration::from_millis(100),
            boot_delay: Duration::from_millis(100),
            reclaim_interval: Duration::from_secs(5),
            ignore_contests: false,
            eager_traffic: false,
            no_rate_limit: false,
        }
    }
}

#[allow(dead_code)]
/// Handle on a running simulated device.
#[derive(Clone)]
pub struct DeviceHandle {
    address: Arc<AtomicU8>,
    commands: mpsc::UnboundedSender<()>,
}

#[allow(dead_code)]
impl DeviceHandle {
    /// Address currently held (0xFE while unclaimed or off).
    pub fn address(&self) -> u8 {
        self.address.load(Ordering::SeqCst)
    }

    /// Power control wired to this device.
    pub fn control(&self) -> Arc<dyn DeviceControl> {
        Arc::new(SimulatedPower {
            commands: self.commands.clone(),
        })
    }
}

struct SimulatedPower {
    commands: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl DeviceControl for SimulatedPower {
    async fn power_cycle(&self) -> Result<(), ControlError> {
        self.commands.send(()).map_err(|_| ControlError::InputClosed)
    }
}

#[allow(dead_code)]
/// Power control for tests without a device.
pub struct NoDevice;

#[async_trait]
impl DeviceControl for NoDevice {
    async fn power_cycle(&self) -> Result<(), ControlError> {
        Ok(())
    }
}

#[allow(dead_code)]
/// Spawn a device answering on `bus`; it boots immediately.
pub fn spawn_device(bus: MockCanBus, behaviour: DeviceBehaviour) -> DeviceHandle {
    let (commands, power) = mpsc::unbounded_channel();
    let address = Arc::new(AtomicU8::new(0xFE));
    let device = SimulatedDevice {
        tracker: ClaimTracker::new(behaviour.name, behaviour.preferred_address),
        behaviour,
        bus,
        power,
        address: Arc::clone(&address),
        boot_at: Some(Instant::now()),
        settle_at: None,
        traffic_at: None,
        last_violation_answer: None,
        transfer: None,
    };
    tokio::spawn(device.run());
    DeviceHandle { address, commands }
}

enum Wake {
    Frame(Result<CanFrame, ()>),
    PowerCycle(Option<()>),
    Timer,
}

struct Transfer {
    pgn: u32,
    size: usize,
    data: Vec<u8>,
}

struct SimulatedDevice {
    behaviour: DeviceBehaviour,
    bus: MockCanBus,
    power: mpsc::UnboundedReceiver<()>,
    address: Arc<AtomicU8>,
    tracker: ClaimTracker,
    boot_at: Option<Instant>,
    settle_at: Option<(Instant, u8)>,
    traffic_at: Option<Instant>,
    last_violation_answer: Option<Instant>,
    transfer: Option<Transfer>,
}

impl SimulatedDevice {
    async fn run(mut self) {
        let mut power_connected = true;
        loop {
            let deadline = [self.boot_at, self.settle_at.map(|(at, _)| at), self.traffic_at]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            let wake = tokio::select! {
                frame = self.bus.recv() => Wake::Frame(frame),
                command = self.power.recv(), if power_connected => Wake::PowerCycle(command),
                _ = sleep_until(deadline) => Wake::Timer,
            };

            match wake {
                Wake::Frame(Ok(frame)) => self.on_frame(frame).await,
                Wake::Frame(Err(())) => return,
                Wake::PowerCycle(Some(())) => self.power_off(),
                Wake::PowerCycle(None) => power_connected = false,
                Wake::Timer => self.on_timer().await,
            }
        }
    }

    fn powered(&self) -> bool {
        self.boot_at.is_none()
    }

    fn power_off(&mut self) {
        self.tracker = ClaimTracker::new(self.behaviour.name, self.behaviour.preferred_address);
        self.address.store(0xFE, Ordering::SeqCst);
        self.boot_at = Some(Instant::now() + self.behaviour.boot_delay);
        self.settle_at = None;
        self.traffic_at = None;
        self.last_violation_answer = None;
        self.transfer = None;
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        if self.boot_at.map_or(false, |at| at <= now) {
            self.boot_at = None;
            let action = self.tracker.begin().unwrap();
            self.apply(action).await;
        }
        if let Some((at, address)) = self.settle_at {
            if at <= now {
                self.settle_at = None;
                if self.tracker.settle(address) {
                    self.address.store(address, Ordering::SeqCst);
                }
            }
        }
        if self.traffic_at.map_or(false, |at| at <= now) {
            let source = self.tracker.address();
            let frame = CanFrame::with_payload(
                CanId::from_parts(6, self.behaviour.traffic_pgn, source),
                &[0; 8],
            )
            .unwrap();
            self.send(&frame).await;
            self.traffic_at = Some(now + self.behaviour.traffic_period);
        }
    }

    async fn on_frame(&mut self, frame: CanFrame) {
        if !self.powered() {
            return;
        }
        let pgn = frame.id.pgn();
        let source = frame.id.source_address();
        match pgn {
            PGN_ADDRESS_CLAIMED if frame.len == 8 => {
                if self.behaviour.ignore_contests {
                    return;
                }
                let name = IsoName::from_raw(u64::from_le_bytes(frame.data));
                let action = self.tracker.on_address_claim(name, source).unwrap();
                self.apply(action).await;
            }
            PGN_REQUEST => {
                if let Some(requested) = requested_pgn(frame.payload()) {
                    let destination = frame.id.destination().unwrap_or(ADDRESS_GLOBAL);
                    let action = self.tracker.on_request(requested, destination).unwrap();
                    self.apply(action).await;
                }
            }
            PGN_TP_CM if frame.data[0] == 32 => {
                self.transfer = Some(Transfer {
                    pgn: u32::from_le_bytes([frame.data[5], frame.data[6], frame.data[7], 0]),
                    size: u16::from_le_bytes([frame.data[1], frame.data[2]]) as usize,
                    data: Vec::new(),
                });
            }
            PGN_TP_DT => self.on_data_packet(&frame).await,
            _ if source == self.tracker.address()
                && self.tracker.state() == ClaimState::Claimed =>
            {
                self.on_violation().await;
            }
            _ => {}
        }
    }

    async fn on_data_packet(&mut self, frame: &CanFrame) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        transfer.data.extend_from_slice(&frame.data[1..8]);
        if transfer.data.len() < transfer.size {
            return;
        }
        let Some(transfer) = self.transfer.take() else {
            return;
        };
        if transfer.pgn != PGN_COMMANDED_ADDRESS || transfer.size != 9 {
            return;
        }
        let name = u64::from_le_bytes(transfer.data[..8].try_into().unwrap());
        if name == self.behaviour.name.raw() {
            let new_address = transfer.data[8];
            self.tracker = ClaimTracker::new(self.behaviour.name, new_address);
            let action = self.tracker.begin().unwrap();
            self.apply(action).await;
        }
    }

    async fn on_violation(&mut self) {
        let now = Instant::now();
        let allowed = self.behaviour.no_rate_limit
            || self
                .last_violation_answer
                .map_or(true, |last| now - last >= self.behaviour.reclaim_interval);
        if allowed {
            self.last_violation_answer = Some(now);
            let frame =
                build_address_claim_frame(self.behaviour.name, self.tracker.address()).unwrap();
            self.send(&frame).await;
        }
    }

    async fn apply(&mut self, action: ClaimAction) {
        match &action {
            ClaimAction::Claim(frame) => {
                let address = frame.id.source_address();
                let now = Instant::now();
                self.address.store(0xFE, Ordering::SeqCst);
                self.settle_at = Some((
                    now + Duration::from_millis(CLAIM_SETTLING_DELAY_MS),
                    address,
                ));
                let delay = if self.behaviour.eager_traffic || is_immediately_usable(address) {
                    Duration::ZERO
                } else {
                    Duration::from_millis(CLAIM_SETTLING_DELAY_MS)
                };
                self.traffic_at = Some(now + delay);
            }
            ClaimAction::CannotClaim(_) => {
                self.address.store(0xFE, Ordering::SeqCst);
                self.settle_at = None;
                self.traffic_at = None;
            }
            _ => {}
        }
        if let Some(frame) = action.frame() {
            self.send(frame).await;
        }
    }

    async fn send(&mut self, frame: &CanFrame) {
        let _ = self.bus.send(frame).await;
    }
}
