//! SAE J1939-81 NAME field implementation (64 bits). This field uniquely
//! identifies a controller application on the network and doubles as its
//! arbitration priority during the address-claim procedure: the numerically
//! lower NAME always wins a contested address.
//!
//! # Bit layout (Little Endian order)
//!
//! ```text
//! Bits  0-20  (21 bits) : Identity number
//! Bits 21-31  (11 bits) : Manufacturer code
//! Bits 32-34  ( 3 bits) : ECU instance
//! Bits 35-39  ( 5 bits) : Function instance
//! Bits 40-47  ( 8 bits) : Function
//! Bit  48     ( 1 bit ) : Reserved
//! Bits 49-55  ( 7 bits) : Vehicle system
//! Bits 56-59  ( 4 bits) : Vehicle system instance
//! Bits 60-62  ( 3 bits) : Industry group
//! Bit  63     ( 1 bit ) : Arbitrary Address Capable
//! ```

use core::cmp::Ordering;
use core::fmt;

use crate::error::ExtractionError;
use crate::protocol::transport::PGN_ADDRESS_CLAIMED;

/// Mask keeping every field above the identity number.
///
/// Two claims whose masked values match come from the same logical device,
/// independently of the per-unit identity number.
pub const DEVICE_PREFIX_MASK: u64 = 0xFFFF_FFFF_FFE0_0000;

/// Relative arbitration priority of two NAMEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arbitration {
    /// Numerically lower: wins the contested address.
    Lower,
    /// Numerically higher: loses the contested address.
    Higher,
    /// Same NAME.
    Equal,
}

/// Wrapper around the J1939 NAME field (64 bits).
///
/// # Example
///
/// ```
/// use korri_nm_conformance::protocol::managment::iso_name::{Arbitration, IsoName};
///
/// let name = IsoName::builder()
///     .identity_number(123456)
///     .manufacturer_code(275)
///     .function(130)
///     .arbitrary_address_capable(true)
///     .build();
///
/// assert_eq!(name.identity_number(), 123456);
/// assert!(name.is_arbitrary_address_capable());
/// assert_eq!(name.perturbed(-1).compare(&name), Arbitration::Lower);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoName(u64);

impl IsoName {
    /// Build an `IsoName` from the raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the underlying `u64`.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Create a builder to construct an `IsoName`.
    #[inline]
    pub const fn builder() -> IsoNameBuilder {
        IsoNameBuilder::new()
    }

    /// Arbitration order of `self` against `other`.
    ///
    /// [`Arbitration::Lower`] means `self` wins a contested address.
    pub fn compare(&self, other: &IsoName) -> Arbitration {
        match self.0.cmp(&other.0) {
            Ordering::Less => Arbitration::Lower,
            Ordering::Greater => Arbitration::Higher,
            Ordering::Equal => Arbitration::Equal,
        }
    }

    /// Value with the identity-number bits cleared (see [`DEVICE_PREFIX_MASK`]).
    #[inline]
    pub const fn masked_prefix(&self) -> u64 {
        self.0 & DEVICE_PREFIX_MASK
    }

    /// Returns `true` when both NAMEs designate the same logical device.
    #[inline]
    pub const fn same_device(&self, other: &IsoName) -> bool {
        self.masked_prefix() == other.masked_prefix()
    }

    /// Derive a competing NAME shifted by `delta` (wrapping at the 64-bit bounds).
    ///
    /// `perturbed(-1)` out-prioritises `self`, `perturbed(1)` loses against it.
    #[inline]
    pub const fn perturbed(&self, delta: i64) -> IsoName {
        IsoName(self.0.wrapping_add_signed(delta))
    }

    /// Encode the NAME as the eight-byte Address Claimed payload.
    #[inline]
    pub const fn to_claim_payload(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode an Address Claimed payload.
    pub fn from_claim_payload(payload: &[u8]) -> Result<Self, ExtractionError> {
        let bytes: [u8; 8] = payload
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(ExtractionError::InvalidDataLen {
                len: payload.len(),
            })?;
        Ok(Self(u64::from_le_bytes(bytes)))
    }

    /// Decode the payload of a frame carrying `pgn`; rejects anything but PGN 0xEE00.
    pub fn from_claim(pgn: u32, payload: &[u8]) -> Result<Self, ExtractionError> {
        if pgn != PGN_ADDRESS_CLAIMED {
            return Err(ExtractionError::NotAnAddressClaim { pgn });
        }
        Self::from_claim_payload(payload)
    }

    // Individual accessors for NAME sub-fields.

    /// Identity number (bits 0-20, 21 bits).
    #[inline]
    pub const fn identity_number(&self) -> u32 {
        (self.0 & 0x1F_FFFF) as u32
    }

    /// Manufacturer code (bits 21-31, 11 bits).
    #[inline]
    pub const fn manufacturer_code(&self) -> u16 {
        ((self.0 >> 21) & 0x7FF) as u16
    }

    /// ECU instance (bits 32-34, 3 bits).
    #[inline]
    pub const fn ecu_instance(&self) -> u8 {
        ((self.0 >> 32) & 0x07) as u8
    }

    /// Function instance (bits 35-39, 5 bits).
    #[inline]
    pub const fn function_instance(&self) -> u8 {
        ((self.0 >> 35) & 0x1F) as u8
    }

    /// Function (bits 40-47, 8 bits).
    #[inline]
    pub const fn function(&self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    /// Reserved bit (bit 48).
    #[inline]
    pub const fn reserved(&self) -> bool {
        ((self.0 >> 48) & 0x01) != 0
    }

    /// Vehicle system (bits 49-55, 7 bits).
    #[inline]
    pub const fn vehicle_system(&self) -> u8 {
        ((self.0 >> 49) & 0x7F) as u8
    }

    /// Vehicle system instance (bits 56-59, 4 bits).
    #[inline]
    pub const fn vehicle_system_instance(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Industry group (bits 60-62, 3 bits).
    #[inline]
    pub const fn industry_group(&self) -> u8 {
        ((self.0 >> 60) & 0x07) as u8
    }

    /// Arbitrary Address Capable bit (bit 63).
    ///
    /// Indicates whether the node may pick another address (128-247) after losing arbitration.
    #[inline]
    pub const fn is_arbitrary_address_capable(&self) -> bool {
        ((self.0 >> 63) & 0x01) != 0
    }
}

impl From<u64> for IsoName {
    #[inline]
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<IsoName> for u64 {
    #[inline]
    fn from(name: IsoName) -> Self {
        name.raw()
    }
}

impl fmt::Display for IsoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#018X} {{ id: {}, mfg: {}, func: {}, sys: {}, ecu: {}, aac: {} }}",
            self.0,
            self.identity_number(),
            self.manufacturer_code(),
            self.function(),
            self.vehicle_system(),
            self.ecu_instance(),
            self.is_arbitrary_address_capable()
        )
    }
}

/// Fluent builder used to construct an `IsoName`.
///
/// Setters panic when a value does not fit its field; use
/// [`HarnessConfig`](crate::config::HarnessConfig) to validate untrusted input first.
#[derive(Debug, Clone, Copy)]
pub struct IsoNameBuilder {
    raw: u64,
}

impl IsoNameBuilder {
    /// Initialize the builder with all fields cleared.
    #[inline]
    pub const fn new() -> Self {
        Self { raw: 0 }
    }

    /// Set the identity number (bits 0-20, 21 bits).
    ///
    /// # Panics
    /// Panics when the value does not fit in 21 bits (> 0x1FFFFF).
    #[inline]
    pub const fn identity_number(mut self, value: u32) -> Self {
        assert!(value <= 0x1F_FFFF, "Identity number must fit in 21 bits");
        self.raw = (self.raw & !0x1F_FFFF) | (value as u64 & 0x1F_FFFF);
        self
    }

    /// Set the manufacturer code (bits 21-31, 11 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 11 bits (> 0x7FF).
    #[inline]
    pub const fn manufacturer_code(mut self, value: u16) -> Self {
        assert!(value <= 0x7FF, "Manufacturer code must fit in 11 bits");
        self.raw = (self.raw & !(0x7FF << 21)) | ((value as u64 & 0x7FF) << 21);
        self
    }

    /// Set the ECU instance (bits 32-34, 3 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 3 bits (> 0x07).
    #[inline]
    pub const fn ecu_instance(mut self, value: u8) -> Self {
        assert!(value <= 0x07, "ECU instance must fit in 3 bits");
        self.raw = (self.raw & !(0x07 << 32)) | ((value as u64 & 0x07) << 32);
        self
    }

    /// Set the function instance (bits 35-39, 5 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 5 bits (> 0x1F).
    #[inline]
    pub const fn function_instance(mut self, value: u8) -> Self {
        assert!(value <= 0x1F, "Function instance must fit in 5 bits");
        self.raw = (self.raw & !(0x1F << 35)) | ((value as u64 & 0x1F) << 35);
        self
    }

    /// Set the function (bits 40-47, 8 bits).
    #[inline]
    pub const fn function(mut self, value: u8) -> Self {
        self.raw = (self.raw & !(0xFF << 40)) | ((value as u64) << 40);
        self
    }

    /// Update the reserved bit (bit 48).
    #[inline]
    pub const fn reserved(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(0x01 << 48)) | ((value as u64) << 48);
        self
    }

    /// Set the vehicle system (bits 49-55, 7 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 7 bits (> 0x7F).
    #[inline]
    pub const fn vehicle_system(mut self, value: u8) -> Self {
        assert!(value <= 0x7F, "Vehicle system must fit in 7 bits");
        self.raw = (self.raw & !(0x7F << 49)) | ((value as u64 & 0x7F) << 49);
        self
    }

    /// Set the vehicle system instance (bits 56-59, 4 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 4 bits (> 0x0F).
    #[inline]
    pub const fn vehicle_system_instance(mut self, value: u8) -> Self {
        assert!(value <= 0x0F, "Vehicle system instance must fit in 4 bits");
        self.raw = (self.raw & !(0x0F << 56)) | ((value as u64 & 0x0F) << 56);
        self
    }

    /// Set the industry group (bits 60-62, 3 bits).
    ///
    /// # Panics
    /// Panics when the value exceeds 3 bits (> 0x07).
    #[inline]
    pub const fn industry_group(mut self, value: u8) -> Self {
        assert!(value <= 0x07, "Industry group must fit in 3 bits");
        self.raw = (self.raw & !(0x07 << 60)) | ((value as u64 & 0x07) << 60);
        self
    }

    /// Configure the Arbitrary Address Capable bit (bit 63).
    #[inline]
    pub const fn arbitrary_address_capable(mut self, value: bool) -> Self {
        self.raw = (self.raw & !(0x01 << 63)) | ((value as u64) << 63);
        self
    }

    /// Build the final `IsoName`.
    #[inline]
    pub const fn build(self) -> IsoName {
        IsoName(self.raw)
    }
}

impl Default for IsoNameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
