//! In-memory representation of an SAE J1939 CAN frame.
use embedded_can::{Frame, Id};

use crate::error::TransportError;
use crate::protocol::transport::can_id::CanId;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Raw J1939 frame as read from the CAN bus.
pub struct CanFrame {
    /// Full 29-bit CAN identifier stored inside a `u32`.
    pub id: CanId,
    /// Payload buffer. Classic CAN frames always provide eight bytes.
    pub data: [u8; 8],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub len: usize,
}

impl CanFrame {
    /// Build a data frame; unused bytes are padded with `0xFF`.
    pub fn with_payload(id: CanId, payload: &[u8]) -> Result<Self, TransportError> {
        if payload.len() > 8 {
            return Err(TransportError::FrameOverflow { len: payload.len() });
        }
        let mut data = [0xFF; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            data,
            len: payload.len(),
        })
    }

    /// Valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len.min(8)]
    }
}

/// Interoperability with `embedded-can` drivers. Standard (11-bit) and remote
/// frames have no meaning in J1939 and are rejected.
impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        match id.into() {
            Id::Extended(ext) => CanFrame::with_payload(CanId::from(ext), data).ok(),
            Id::Standard(_) => None,
        }
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        true
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        match self.id.to_extended_id() {
            Some(ext) => Id::Extended(ext),
            None => Id::Extended(embedded_can::ExtendedId::MAX),
        }
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}
