//! Captured protocol events and the filters routing them to correlation queues.
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::PGN_ADDRESS_CLAIMED;

/// One inbound frame as observed by the receive path.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    pub priority: u8,
    /// PGN with the destination byte cleared for PDU1 messages.
    pub pgn: u32,
    pub source: u8,
    /// Destination address of PDU1 messages.
    pub destination: Option<u8>,
    /// Arrival time on the receive path.
    pub timestamp: Instant,
    /// Decoded NAME for Address Claimed frames.
    pub name: Option<IsoName>,
    pub payload: Vec<u8>,
}

impl CapturedEvent {
    /// Capture `frame` received at `timestamp`.
    pub fn from_frame(frame: &CanFrame, timestamp: Instant) -> Self {
        let pgn = frame.id.pgn();
        Self {
            priority: frame.id.priority(),
            pgn,
            source: frame.id.source_address(),
            destination: frame.id.destination(),
            timestamp,
            name: IsoName::from_claim(pgn, frame.payload()).ok(),
            payload: frame.payload().to_vec(),
        }
    }

    /// `true` for a well-formed Address Claimed / Cannot Claim frame.
    pub fn is_address_claim(&self) -> bool {
        self.pgn == PGN_ADDRESS_CLAIMED && self.name.is_some()
    }

    /// Time elapsed between `earlier` and this event; `None` if this one arrived first.
    pub fn elapsed_since(&self, earlier: &CapturedEvent) -> Option<Duration> {
        self.timestamp.checked_duration_since(earlier.timestamp)
    }
}

/// Predicate selecting which events a queue receives.
///
/// An empty PGN list accepts every PGN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pgns: Vec<u32>,
    source: Option<u8>,
}

impl EventFilter {
    /// Accept everything.
    pub fn any() -> Self {
        Self::default()
    }

    /// Accept a single PGN.
    pub fn pgn(pgn: u32) -> Self {
        Self {
            pgns: vec![pgn],
            source: None,
        }
    }

    /// Accept any PGN of the list.
    pub fn pgns(pgns: impl IntoIterator<Item = u32>) -> Self {
        Self {
            pgns: pgns.into_iter().collect(),
            source: None,
        }
    }

    /// Address Claimed frames only.
    pub fn address_claims() -> Self {
        Self::pgn(PGN_ADDRESS_CLAIMED)
    }

    /// Restrict to one source address.
    pub fn from_source(mut self, source: u8) -> Self {
        self.source = Some(source);
        self
    }

    pub fn matches(&self, event: &CapturedEvent) -> bool {
        (self.pgns.is_empty() || self.pgns.contains(&event.pgn))
            && self.source.map_or(true, |sa| sa == event.source)
    }
}
