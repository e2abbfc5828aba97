//! SAE J1939-21 Broadcast Announce Message (BAM) generator. Payloads up to
//! eight bytes go out as a single frame; larger payloads are announced with a
//! TP.CM frame and streamed as numbered TP.DT packets of seven bytes.
use crate::error::TransportError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::can_id::CanId;
use crate::protocol::transport::{ADDRESS_GLOBAL, PGN_TP_CM, PGN_TP_DT};

/// Control byte identifying a BAM announcement inside TP.CM.
pub const TP_CM_BAM: u8 = 32;

/// Maximum payload a BAM session can carry (255 packets × 7 bytes).
pub const MAX_BAM_PAYLOAD: usize = 1785;

#[derive(Debug)]
/// Parameters shared by every frame of one broadcast message.
pub struct BamBuilder<'a> {
    pgn: u32,
    priority: u8,
    source_address: u8,
    payload: &'a [u8],
}

/// Lazy iterator returning frames one by one as they are encoded.
pub struct BamFrames<'a> {
    builder: BamBuilder<'a>,
    /// 0 = announcement (or single frame), then packet sequence numbers.
    next_packet: usize,
    packet_count: usize,
}

impl<'a> BamBuilder<'a> {
    /// Prepare a broadcast of `payload` for `pgn` from `source_address`.
    pub fn new(pgn: u32, priority: u8, source_address: u8, payload: &'a [u8]) -> Self {
        Self {
            pgn,
            priority,
            source_address,
            payload,
        }
    }

    /// `true` when the payload needs the transport protocol.
    pub fn is_multi_packet(&self) -> bool {
        self.payload.len() > 8
    }

    /// Start the iteration; each call to `next` yields the next frame.
    pub fn build(self) -> Result<BamFrames<'a>, TransportError> {
        if self.payload.len() > MAX_BAM_PAYLOAD {
            return Err(TransportError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_BAM_PAYLOAD,
            });
        }
        let packet_count = if self.is_multi_packet() {
            self.payload.len().div_ceil(7)
        } else {
            0
        };
        Ok(BamFrames {
            builder: self,
            next_packet: 0,
            packet_count,
        })
    }
}

impl BamFrames<'_> {
    fn single_frame(&self) -> Result<CanFrame, TransportError> {
        let b = &self.builder;
        let id = if (b.pgn >> 8) & 0xFF >= 240 {
            CanId::builder(b.pgn, b.source_address)
        } else {
            CanId::builder(b.pgn & 0x3_FF00, b.source_address).to_destination(ADDRESS_GLOBAL)
        }
        .with_priority(b.priority)
        .build()?;
        CanFrame::with_payload(id, b.payload)
    }

    fn announcement(&self) -> Result<CanFrame, TransportError> {
        let b = &self.builder;
        let size = (b.payload.len() as u16).to_le_bytes();
        let pgn = b.pgn.to_le_bytes();
        let id = CanId::builder(PGN_TP_CM, b.source_address)
            .to_destination(ADDRESS_GLOBAL)
            .with_priority(b.priority)
            .build()?;
        CanFrame::with_payload(
            id,
            &[
                TP_CM_BAM,
                size[0],
                size[1],
                self.packet_count as u8,
                0xFF,
                pgn[0],
                pgn[1],
                pgn[2],
            ],
        )
    }

    fn data_packet(&self, sequence: usize) -> Result<CanFrame, TransportError> {
        let b = &self.builder;
        let start = (sequence - 1) * 7;
        let chunk = &b.payload[start..(start + 7).min(b.payload.len())];
        let mut data = [0xFF; 8];
        data[0] = sequence as u8;
        data[1..1 + chunk.len()].copy_from_slice(chunk);
        let id = CanId::builder(PGN_TP_DT, b.source_address)
            .to_destination(ADDRESS_GLOBAL)
            .with_priority(b.priority)
            .build()?;
        // TP.DT frames are always eight bytes long, the last one padded.
        CanFrame::with_payload(id, &data)
    }
}

impl Iterator for BamFrames<'_> {
    type Item = Result<CanFrame, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next_packet;
        if index > self.packet_count {
            return None;
        }
        self.next_packet += 1;
        Some(match (index, self.packet_count) {
            (0, 0) => self.single_frame(),
            (0, _) => self.announcement(),
            (sequence, _) => self.data_packet(sequence),
        })
    }
}
