//! Controller-application adapter: the harness' own node on the bus.
//!
//! [`CaAdapter`] claims and defends a tester address, pumps every inbound
//! frame into the [`Dispatcher`], and transmits scenario stimulus. Scenarios
//! only see it through the [`ControllerApplication`] capability trait.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::engine::dispatcher::{Dispatcher, EventCallback, Subscription};
use crate::engine::event::{CapturedEvent, EventFilter};
use crate::engine::queue::CorrelationQueue;
use crate::error::AdapterError;
use crate::protocol::managment::address_claiming::{
    build_claim_request_frame, requested_pgn, ClaimAction, ClaimState, ClaimTracker,
};
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::transport::bam::BamBuilder;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::traits::can_bus::CanBus;
use crate::protocol::transport::{
    ADDRESS_GLOBAL, BAM_PACKET_GAP_MS, CLAIM_SETTLING_DELAY_MS, NM_PRIORITY, PGN_ADDRESS_CLAIMED,
    PGN_COMMANDED_ADDRESS, PGN_REQUEST,
};

/// Priority of the Commanded Address message.
pub const COMMANDED_ADDRESS_PRIORITY: u8 = 7;

/// Capabilities a scenario needs from the harness node.
#[async_trait]
pub trait ControllerApplication: Send + Sync {
    /// NAME claimed by the harness.
    fn name(&self) -> IsoName;

    /// Address held by the harness (0xFE when none).
    fn current_address(&self) -> u8;

    fn claim_state(&self) -> ClaimState;

    /// Transmit one frame built verbatim from its parts.
    ///
    /// For PDU1 PGNs the PS byte of `pgn` is the destination address.
    async fn send_raw_frame(
        &self,
        priority: u8,
        pgn: u32,
        source: u8,
        payload: &[u8],
    ) -> Result<(), AdapterError>;

    /// Broadcast `payload` from the harness address, through BAM when it
    /// exceeds a single frame.
    async fn send_broadcast(&self, priority: u8, pgn: u32, payload: &[u8])
        -> Result<(), AdapterError>;

    /// Open a correlation queue fed with every inbound event matching `filter`.
    fn subscribe(&self, filter: EventFilter) -> (Arc<CorrelationQueue>, Subscription);

    /// Invoke `callback` from the receive path for events matching `filter`.
    fn subscribe_callback(&self, filter: EventFilter, callback: EventCallback) -> Subscription;

    /// Install (or remove) the hook receiving every inbound address claim.
    fn set_claim_hook(&self, hook: Option<EventCallback>);

    /// Request for Address Claimed, to global (0xFF) or one node.
    async fn send_claim_request(&self, destination: u8) -> Result<(), AdapterError> {
        let frame = build_claim_request_frame(self.current_address(), destination)?;
        debug!(destination, "request for address claimed");
        self.send_raw_frame(
            frame.id.priority(),
            PGN_REQUEST | destination as u32,
            frame.id.source_address(),
            frame.payload(),
        )
        .await
    }

    /// Address Claimed broadcast carrying an arbitrary `identity` from `source`.
    async fn send_identity_claim(&self, identity: IsoName, source: u8) -> Result<(), AdapterError> {
        debug!(identity = %identity, source, "identity claim");
        self.send_raw_frame(
            NM_PRIORITY,
            PGN_ADDRESS_CLAIMED | ADDRESS_GLOBAL as u32,
            source,
            &identity.to_claim_payload(),
        )
        .await
    }

    /// Command the node owning `identity` to move to `new_address`.
    async fn send_commanded_address(
        &self,
        identity: IsoName,
        new_address: u8,
    ) -> Result<(), AdapterError> {
        debug!(identity = %identity, new_address, "commanded address");
        let mut payload = [0u8; 9];
        payload[..8].copy_from_slice(&identity.to_claim_payload());
        payload[8] = new_address;
        self.send_broadcast(COMMANDED_ADDRESS_PRIORITY, PGN_COMMANDED_ADDRESS, &payload)
            .await
    }
}

//==================================================================================CA_ADAPTER
/// Tokio-backed [`ControllerApplication`] over any [`CanBus`].
pub struct CaAdapter<C: CanBus> {
    bus: tokio::sync::Mutex<C>,
    tracker: Arc<Mutex<ClaimTracker>>,
    dispatcher: Arc<Dispatcher>,
    claim_hook: Arc<RwLock<Option<EventCallback>>>,
    packet_gap: Duration,
    pump: JoinHandle<()>,
}

impl<C: CanBus> CaAdapter<C> {
    /// Spawn the receive pump and claim an address for `name`.
    ///
    /// Returns once the claim settled, either Claimed or CannotClaim.
    pub async fn start(bus: C, name: IsoName, preferred_address: u8) -> Result<Self, AdapterError> {
        let tracker = Arc::new(Mutex::new(ClaimTracker::new(name, preferred_address)));
        let dispatcher = Dispatcher::new();
        let claim_hook: Arc<RwLock<Option<EventCallback>>> = Arc::new(RwLock::new(None));

        let pump = tokio::spawn(
            ReceivePump {
                bus: bus.clone(),
                tracker: Arc::clone(&tracker),
                dispatcher: Arc::clone(&dispatcher),
                claim_hook: Arc::clone(&claim_hook),
            }
            .run(),
        );

        let adapter = Self {
            bus: tokio::sync::Mutex::new(bus),
            tracker,
            dispatcher,
            claim_hook,
            packet_gap: Duration::from_millis(BAM_PACKET_GAP_MS),
            pump,
        };
        adapter.claim().await?;
        Ok(adapter)
    }

    /// Override the pause between BAM data packets.
    pub fn with_packet_gap(mut self, gap: Duration) -> Self {
        self.packet_gap = gap;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    async fn claim(&self) -> Result<(), AdapterError> {
        let action = lock(&self.tracker).begin()?;
        if let Some(frame) = action.frame() {
            self.transmit(frame).await?;
        }
        schedule_settle(&self.tracker, lock(&self.tracker).address());

        // Every lost contest moves to a fresh candidate, so the loop is bounded
        // by the candidate list.
        loop {
            sleep(Duration::from_millis(CLAIM_SETTLING_DELAY_MS)).await;
            let (state, address) = {
                let tracker = lock(&self.tracker);
                (tracker.state(), tracker.address())
            };
            match state {
                ClaimState::Claimed => {
                    info!(address, "harness address claimed");
                    return Ok(());
                }
                ClaimState::CannotClaim => {
                    warn!("harness could not claim an address");
                    return Err(AdapterError::NoAddressAvailable);
                }
                ClaimState::Unclaimed if self.pump.is_finished() => {
                    return Err(AdapterError::ReceiveStopped(
                        "receive pump ended during address claim".into(),
                    ));
                }
                ClaimState::Unclaimed => trace!(address, "claim still pending"),
            }
        }
    }

    async fn transmit(&self, frame: &CanFrame) -> Result<(), AdapterError> {
        self.bus
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|err| AdapterError::Send(format!("{err:?}")))
    }
}

#[async_trait]
impl<C: CanBus> ControllerApplication for CaAdapter<C> {
    fn name(&self) -> IsoName {
        lock(&self.tracker).name()
    }

    fn current_address(&self) -> u8 {
        lock(&self.tracker).address()
    }

    fn claim_state(&self) -> ClaimState {
        lock(&self.tracker).state()
    }

    async fn send_raw_frame(
        &self,
        priority: u8,
        pgn: u32,
        source: u8,
        payload: &[u8],
    ) -> Result<(), AdapterError> {
        let frame = CanFrame::with_payload(CanId::from_parts(priority, pgn, source), payload)?;
        trace!(id = frame.id.0, len = frame.len, "raw frame");
        self.transmit(&frame).await
    }

    async fn send_broadcast(
        &self,
        priority: u8,
        pgn: u32,
        payload: &[u8],
    ) -> Result<(), AdapterError> {
        let source = self.current_address();
        let builder = BamBuilder::new(pgn, priority, source, payload);
        let multi_packet = builder.is_multi_packet();

        // One session at a time: packets of two broadcasts must not interleave.
        let mut bus = self.bus.lock().await;
        for (index, frame) in builder.build()?.enumerate() {
            let frame = frame?;
            if multi_packet && index > 0 {
                sleep(self.packet_gap).await;
            }
            bus.send(&frame)
                .await
                .map_err(|err| AdapterError::Send(format!("{err:?}")))?;
        }
        Ok(())
    }

    fn subscribe(&self, filter: EventFilter) -> (Arc<CorrelationQueue>, Subscription) {
        let queue = Arc::new(CorrelationQueue::new(filter));
        let subscription = self.dispatcher.attach(Arc::clone(&queue));
        (queue, subscription)
    }

    fn subscribe_callback(&self, filter: EventFilter, callback: EventCallback) -> Subscription {
        self.dispatcher.attach_callback(filter, callback)
    }

    fn set_claim_hook(&self, hook: Option<EventCallback>) {
        *self
            .claim_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hook;
    }
}

impl<C: CanBus> Drop for CaAdapter<C> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

//==================================================================================RECEIVE_PUMP
/// Receive path: timestamps frames, keeps the harness claim alive, and fans
/// events out. Never waits on a consumer.
struct ReceivePump<C: CanBus> {
    bus: C,
    tracker: Arc<Mutex<ClaimTracker>>,
    dispatcher: Arc<Dispatcher>,
    claim_hook: Arc<RwLock<Option<EventCallback>>>,
}

impl<C: CanBus> ReceivePump<C> {
    async fn run(mut self) {
        loop {
            let frame = match self.bus.recv().await {
                Ok(frame) => frame,
                Err(err) => {
                    error!(?err, "CAN receive failed, stopping receive pump");
                    return;
                }
            };
            let event = CapturedEvent::from_frame(&frame, Instant::now());
            debug!(
                pgn = event.pgn,
                source = event.source,
                destination = event.destination,
                "frame received"
            );

            self.manage_claim(&event).await;

            if event.is_address_claim() {
                let hook = self
                    .claim_hook
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(hook) = hook {
                    hook(&event);
                }
            }
            self.dispatcher.dispatch(&event);
        }
    }

    async fn manage_claim(&mut self, event: &CapturedEvent) {
        let action = {
            let mut tracker = lock(&self.tracker);
            match (event.name, event.pgn) {
                (Some(name), _) if event.is_address_claim() => {
                    tracker.on_address_claim(name, event.source)
                }
                (_, PGN_REQUEST) => match requested_pgn(&event.payload) {
                    Some(pgn) => {
                        tracker.on_request(pgn, event.destination.unwrap_or(ADDRESS_GLOBAL))
                    }
                    None => Ok(ClaimAction::Idle),
                },
                _ => Ok(ClaimAction::Idle),
            }
        };

        let action = match action {
            Ok(action) => action,
            Err(err) => {
                error!(%err, "unable to build address claim frame");
                return;
            }
        };
        if let ClaimAction::Claim(frame) = &action {
            schedule_settle(&self.tracker, frame.id.source_address());
        }
        if let Some(frame) = action.frame() {
            if let Err(err) = self.bus.send(frame).await {
                warn!(?err, "address claim frame not sent");
            }
        }
    }
}

/// Close the contention window of `address` after the settling delay.
fn schedule_settle(tracker: &Arc<Mutex<ClaimTracker>>, address: u8) {
    let tracker = Arc::clone(tracker);
    tokio::spawn(async move {
        sleep(Duration::from_millis(CLAIM_SETTLING_DELAY_MS)).await;
        lock(&tracker).settle(address);
    });
}

fn lock(tracker: &Mutex<ClaimTracker>) -> MutexGuard<'_, ClaimTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}
