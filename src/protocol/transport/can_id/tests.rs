//! Unit tests for the `CanId` accessors and builder.
use super::*;

//==================================================================================CAN_ID
#[test]
/// Address Claimed to global from 0x80, priority 6.
fn test_address_claim_identifier() {
    let can_id = CanId(0x18EEFF80);
    assert_eq!(can_id.priority(), 6);
    assert_eq!(can_id.pgn(), 0xEE00);
    assert_eq!(can_id.destination(), Some(0xFF));
    assert_eq!(can_id.source_address(), 0x80);
}

#[test]
/// PDU2 identifiers keep their PS byte inside the PGN.
fn test_pdu2_pgn() {
    let can_id = CanId(0x18FED842);
    assert!(can_id.is_pdu2());
    assert_eq!(can_id.pgn(), 0xFED8);
    assert_eq!(can_id.destination(), None);
}

#[test]
fn test_from_parts_matches_builder() {
    let built = CanId::builder(0xEA00, 0x80)
        .with_priority(6)
        .to_destination(0x25)
        .build()
        .expect("request identifier must build");
    assert_eq!(built, CanId::from_parts(6, 0xEA25, 0x80));
    assert_eq!(built.0, 0x18EA2580);
}
//==================================================================================CAN_ID_BUILDER
#[test]
/// Validates builder scenarios: broadcast, addressed, and error handling.
fn test_builder() {
    // Commanded Address is PDU2: no destination.
    assert!(CanId::builder(0xFED8, 35).with_priority(6).build().is_ok());

    // Request is PDU1: destination mandatory.
    assert_eq!(
        CanId::builder(0xEA00, 35).build(),
        Err(CanIdBuildError::InvalidForBroadcast { pf: 0xEA })
    );

    // PDU2 PGN cannot be addressed.
    assert_eq!(
        CanId::builder(0xFED8, 35).to_destination(80).build(),
        Err(CanIdBuildError::InvalidForFocusedMessage { pf: 0xFE })
    );

    // PDU1 PGN with a non-zero PS byte.
    assert_eq!(
        CanId::builder(0xEAFF, 35).to_destination(80).build(),
        Err(CanIdBuildError::PsFocusMessageMustBeNull)
    );
}

#[test]
/// The priority must be capped to 3 bits to avoid touching the reserved field.
fn test_priority_masks_extra_bits() {
    let can_id = CanId::builder(0xFED8, 35)
        .with_priority(0b1111_0000)
        .build()
        .expect("CanId must build");

    assert_eq!(can_id.0 & (1 << 29), 0, "Bit 29 must remain clear");
    assert_eq!(can_id.priority(), 0);
}

#[test]
fn test_extended_id_round_trip() {
    let can_id = CanId(0x18EEFF80);
    let ext = can_id.to_extended_id().expect("29-bit identifier");
    assert_eq!(CanId::from(ext), can_id);
}
