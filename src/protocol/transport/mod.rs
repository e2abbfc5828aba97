//! J1939 transport layer: CAN frame representation, 29-bit identifier
//! management, BAM multi-packet segmentation, and the bus abstraction trait.
//!
//! ## Network management constants
//!
//! PGNs and reserved addresses used by the address-claim procedure
//! (SAE J1939-81) and the request mechanism (SAE J1939-21).

pub mod bam;
pub mod can_frame;
pub mod can_id;
pub mod traits;

/// Address Claimed / Cannot Claim Address (PGN 60928).
pub const PGN_ADDRESS_CLAIMED: u32 = 0x00EE00;

/// Request (PGN 59904). Payload carries the requested PGN on three bytes.
pub const PGN_REQUEST: u32 = 0x00EA00;

/// Commanded Address (PGN 65240). Nine-byte payload sent with BAM.
pub const PGN_COMMANDED_ADDRESS: u32 = 0x00FED8;

/// Transport Protocol connection management (PGN 60416).
pub const PGN_TP_CM: u32 = 0x00EC00;

/// Transport Protocol data transfer (PGN 60160).
pub const PGN_TP_DT: u32 = 0x00EB00;

/// Global destination address.
pub const ADDRESS_GLOBAL: u8 = 0xFF;

/// NULL address, used as source of the Cannot Claim Address message.
pub const ADDRESS_NULL: u8 = 0xFE;

/// Priority used for network management traffic.
pub const NM_PRIORITY: u8 = 6;

/// Delay a non-exempt CA must observe between its claim and normal traffic (ms).
///
/// Addresses 0-127 and 248-253 may transmit immediately after claiming.
pub const CLAIM_SETTLING_DELAY_MS: u64 = 250;

/// Recommended gap between BAM data packets (ms). J1939-21 allows 50 to 200 ms.
pub const BAM_PACKET_GAP_MS: u64 = 50;

/// Returns `true` when an address may originate traffic right after its claim.
pub const fn is_immediately_usable(address: u8) -> bool {
    matches!(address, 0..=127 | 248..=253)
}
