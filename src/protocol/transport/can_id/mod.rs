//! Creation and extraction of the 29-bit CAN identifiers used by SAE J1939.
use embedded_can::ExtendedId;

use crate::error::CanIdBuildError;

//==================================================================================CAN_ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Encapsulates an extended CAN identifier (29 bits) and exposes accessors
/// for priority, PGN, destination, and source.
pub struct CanId(pub u32);

impl CanId {
    /// Creates a pre-configured `CanIdBuilder` for a PGN and source address.
    pub fn builder(pgn: u32, source_address: u8) -> CanIdBuilder {
        CanIdBuilder::new(pgn, source_address)
    }

    /// Compose an identifier without validation.
    ///
    /// `pgn` is taken verbatim (18 bits): for PDU1 PGNs its PS byte is the
    /// destination address, e.g. `0xEEFF` for an Address Claimed sent to global.
    pub fn from_parts(priority: u8, pgn: u32, source_address: u8) -> Self {
        CanId(((priority as u32 & 0x07) << 26) | ((pgn & 0x3_FFFF) << 8) | source_address as u32)
    }

    /// Returns the priority (3 bits, value 0-7) encoded in the CAN ID.
    pub fn priority(&self) -> u8 {
        ((self.0 >> 26) & 0x07) as u8
    }

    /// PDU format byte.
    pub fn pdu_format(&self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }

    /// PDU2 (broadcast, PF ≥ 240) identifiers have no explicit destination.
    pub fn is_pdu2(&self) -> bool {
        self.pdu_format() >= 240
    }

    /// Extracts the 18-bit PGN; the destination byte of PDU1 identifiers is cleared.
    pub fn pgn(&self) -> u32 {
        let pgn = (self.0 >> 8) & 0x3_FFFF;
        if self.is_pdu2() {
            pgn
        } else {
            pgn & 0x3_FF00
        }
    }

    /// Returns the destination address (PDU1) when the PGN carries one.
    pub fn destination(&self) -> Option<u8> {
        if self.is_pdu2() {
            None
        } else {
            Some(((self.0 >> 8) & 0xFF) as u8)
        }
    }

    /// Eight-bit source address.
    pub fn source_address(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Convert to the `embedded-can` identifier type.
    pub fn to_extended_id(&self) -> Option<ExtendedId> {
        ExtendedId::new(self.0)
    }
}

impl From<ExtendedId> for CanId {
    fn from(id: ExtendedId) -> Self {
        CanId(id.as_raw())
    }
}

//==================================================================================CAN_ID_BUILDER
#[derive(Debug)]
/// Fluent builder that enforces the PDU1/PDU2 rules.
pub struct CanIdBuilder {
    pub priority: u8,
    pub pgn: u32,
    pub source_address: u8,
    pub destination: Option<u8>,
}

impl CanIdBuilder {
    /// Initializes the builder for a given PGN and source address.
    pub fn new(pgn: u32, source_address: u8) -> Self {
        Self {
            priority: 6, // Default priority
            pgn,
            source_address,
            destination: None,
        }
    }

    /// Sets the priority (3 bits) to use during construction.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x07;
        self
    }

    /// Assigns a destination address (PDU1). Implies a directed message.
    pub fn to_destination(mut self, destination_address: u8) -> Self {
        self.destination = Some(destination_address);
        self
    }

    /// Builds the CAN identifier while applying J1939 rules:
    /// - PF < 240 → addressed message (PDU1): `destination` mandatory and PGN PS byte must be `0`
    /// - PF ≥ 240 → broadcast (PDU2): `destination` must not be provided
    pub fn build(self) -> Result<CanId, CanIdBuildError> {
        let pf = ((self.pgn >> 8) & 0xFF) as u8;
        let ps = (self.pgn & 0xFF) as u8;

        match self.destination {
            None if pf < 240 => Err(CanIdBuildError::InvalidForBroadcast { pf }),
            None => Ok(CanId::from_parts(
                self.priority,
                self.pgn,
                self.source_address,
            )),
            Some(_) if pf >= 240 => Err(CanIdBuildError::InvalidForFocusedMessage { pf }),
            Some(_) if ps != 0 => Err(CanIdBuildError::PsFocusMessageMustBeNull),
            Some(da) => Ok(CanId::from_parts(
                self.priority,
                self.pgn | da as u32,
                self.source_address,
            )),
        }
    }
}
//==================================================================================TESTS
#[cfg(test)]
#[path = "tests.rs"]
mod tests;
