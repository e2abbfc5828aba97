//! SAE J1939-81 address-claim bookkeeping for the harness' own controller
//! application: pick candidate addresses, decide whether a contending claim
//! is won or lost, and build the resulting Address Claimed frames.
//!
//! The tracker is a pure state machine. The adapter feeds it every inbound
//! frame from its receive pump and transmits whatever frame it returns.
use tracing::{debug, info, warn};

use crate::error::CanIdBuildError;
use crate::protocol::managment::iso_name::{Arbitration, IsoName};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::{
    ADDRESS_GLOBAL, ADDRESS_NULL, NM_PRIORITY, PGN_ADDRESS_CLAIMED, PGN_REQUEST,
};

/// Claim status of a controller application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No address held yet (claim in progress or not started).
    Unclaimed,
    /// The address survived the 250 ms contention window.
    Claimed,
    /// Arbitration lost with no alternative: the node announced Cannot Claim.
    CannotClaim,
}

/// Frame the tracker wants on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimAction {
    /// Nothing to transmit.
    Idle,
    /// Re-assert the current address after winning a contest.
    Defend(CanFrame),
    /// Announce a claim for a new candidate address.
    Claim(CanFrame),
    /// Announce that no address could be claimed (source 0xFE).
    CannotClaim(CanFrame),
    /// Answer a Request for Address Claimed.
    Respond(CanFrame),
}

impl ClaimAction {
    /// Frame to transmit, if any.
    pub fn frame(&self) -> Option<&CanFrame> {
        match self {
            ClaimAction::Idle => None,
            ClaimAction::Defend(frame)
            | ClaimAction::Claim(frame)
            | ClaimAction::CannotClaim(frame)
            | ClaimAction::Respond(frame) => Some(frame),
        }
    }
}

/// Address-claim state machine of one controller application.
#[derive(Debug)]
pub struct ClaimTracker {
    name: IsoName,
    candidates: AddressClaimIterator,
    address: u8,
    state: ClaimState,
}

impl ClaimTracker {
    /// Prepare a tracker; nothing is claimed until [`ClaimTracker::begin`].
    pub fn new(name: IsoName, preferred_address: u8) -> Self {
        Self {
            name,
            candidates: AddressClaimIterator::new(
                preferred_address,
                name.is_arbitrary_address_capable(),
            ),
            address: ADDRESS_NULL,
            state: ClaimState::Unclaimed,
        }
    }

    /// NAME announced by this tracker.
    pub fn name(&self) -> IsoName {
        self.name
    }

    /// Address currently claimed or being claimed (`0xFE` when none).
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    /// Start claiming: announce the first candidate address.
    pub fn begin(&mut self) -> Result<ClaimAction, CanIdBuildError> {
        self.advance()
    }

    /// Close the contention window opened for `attempted`.
    ///
    /// Returns `true` when the address is now held; `false` when the attempt
    /// was superseded by a lost contest in the meantime.
    pub fn settle(&mut self, attempted: u8) -> bool {
        if self.state == ClaimState::Unclaimed && self.address == attempted {
            info!(address = attempted, "address claimed");
            self.state = ClaimState::Claimed;
            return true;
        }
        self.state == ClaimState::Claimed && self.address == attempted
    }

    /// Apply the arbitration rules to an Address Claimed frame from another node.
    pub fn on_address_claim(
        &mut self,
        their_name: IsoName,
        source: u8,
    ) -> Result<ClaimAction, CanIdBuildError> {
        if self.state == ClaimState::CannotClaim
            || source != self.address
            || their_name == self.name
        {
            return Ok(ClaimAction::Idle);
        }

        match self.name.compare(&their_name) {
            Arbitration::Lower => {
                info!(address = self.address, their_name = %their_name, "contest won, defending address");
                Ok(ClaimAction::Defend(build_address_claim_frame(
                    self.name,
                    self.address,
                )?))
            }
            Arbitration::Higher => {
                warn!(address = self.address, their_name = %their_name, "contest lost");
                self.advance()
            }
            Arbitration::Equal => Ok(ClaimAction::Idle),
        }
    }

    /// Answer a Request for PGN 0xEE00 addressed to `destination`.
    ///
    /// A node that has not attempted a claim yet stays silent; afterwards it
    /// answers with its current claim, or Cannot Claim from 0xFE.
    pub fn on_request(
        &mut self,
        requested_pgn: u32,
        destination: u8,
    ) -> Result<ClaimAction, CanIdBuildError> {
        let attempted = self.state != ClaimState::Unclaimed || self.address != ADDRESS_NULL;
        if requested_pgn != PGN_ADDRESS_CLAIMED
            || !attempted
            || (destination != ADDRESS_GLOBAL && destination != self.address)
        {
            return Ok(ClaimAction::Idle);
        }
        Ok(ClaimAction::Respond(build_address_claim_frame(
            self.name,
            self.address,
        )?))
    }

    fn advance(&mut self) -> Result<ClaimAction, CanIdBuildError> {
        match self.candidates.next() {
            Some(address) => {
                debug!(address, "trying to claim address");
                self.address = address;
                self.state = ClaimState::Unclaimed;
                Ok(ClaimAction::Claim(build_address_claim_frame(
                    self.name, address,
                )?))
            }
            None => {
                warn!(name = %self.name, "no address left, sending cannot claim");
                self.address = ADDRESS_NULL;
                self.state = ClaimState::CannotClaim;
                Ok(ClaimAction::CannotClaim(build_address_claim_frame(
                    self.name,
                    ADDRESS_NULL,
                )?))
            }
        }
    }
}

//==================================================================================ADDRESS_CLAIM_ITERATOR
/// Generates candidate addresses following the J1939 rules.
#[derive(Debug)]
struct AddressClaimIterator {
    preferred: u8,
    next_arbitrary: u16,
    state: AddressClaimState,
    arbitrary_capable: bool,
}

#[derive(Debug, PartialEq)]
/// Iteration states (preferred address, then AAC range).
enum AddressClaimState {
    TryPreferred,
    TryArbitrary,
    Done,
}

impl AddressClaimIterator {
    fn new(preferred_address: u8, arbitrary_capable: bool) -> Self {
        Self {
            preferred: preferred_address,
            next_arbitrary: 128,
            state: AddressClaimState::TryPreferred,
            arbitrary_capable,
        }
    }
}

impl Iterator for AddressClaimIterator {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                AddressClaimState::TryPreferred => {
                    self.state = if self.arbitrary_capable {
                        AddressClaimState::TryArbitrary
                    } else {
                        // Non-AAC equipment only gets a single attempt.
                        AddressClaimState::Done
                    };

                    if self.preferred <= 253 {
                        return Some(self.preferred);
                    }
                }
                AddressClaimState::TryArbitrary => {
                    if self.next_arbitrary > 247 {
                        self.state = AddressClaimState::Done;
                        continue;
                    }

                    let addr_to_try = self.next_arbitrary as u8;
                    self.next_arbitrary += 1;

                    if addr_to_try == self.preferred {
                        continue;
                    }
                    return Some(addr_to_try);
                }
                AddressClaimState::Done => {
                    return None;
                }
            }
        }
    }
}

//==================================================================================ADDRESS_CLAIM_FRAME
/// Build an Address Claimed frame (PGN 0xEE00 to global) for `name` from `source`.
pub fn build_address_claim_frame(name: IsoName, source: u8) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::builder(PGN_ADDRESS_CLAIMED, source)
        .to_destination(ADDRESS_GLOBAL)
        .with_priority(NM_PRIORITY)
        .build()?;
    Ok(CanFrame {
        id,
        data: name.to_claim_payload(),
        len: 8,
    })
}

/// Build a Request for Address Claimed from `source` to `destination`.
pub fn build_claim_request_frame(source: u8, destination: u8) -> Result<CanFrame, CanIdBuildError> {
    let id = CanId::builder(PGN_REQUEST, source)
        .to_destination(destination)
        .with_priority(NM_PRIORITY)
        .build()?;
    let requested = PGN_ADDRESS_CLAIMED.to_le_bytes();
    let mut data = [0xFF; 8];
    data[..3].copy_from_slice(&requested[..3]);
    Ok(CanFrame { id, data, len: 3 })
}

/// Extracts the requested PGN from a Request payload.
pub fn requested_pgn(payload: &[u8]) -> Option<u32> {
    match payload {
        [lo, mid, hi, ..] => Some(u32::from_le_bytes([*lo, *mid, *hi, 0])),
        _ => None,
    }
}
