//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (CAN ID construction, claim
//! payload decoding, bus transmission, configuration, scenario outcome…).
use core::panic::Location;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
/// Errors that can occur while building a 29-bit CAN identifier.
pub enum CanIdBuildError {
    /// Attempt to build a broadcast message (PDU2) with PF < 240.
    #[error("Invalid for broadcast message: PF {pf:#04X} is too low")]
    InvalidForBroadcast { pf: u8 },
    /// Attempt to send an addressed message (PDU1) with PF ≥ 240.
    #[error("Invalid for addressed message: PF is too high: {pf:#04X}")]
    InvalidForFocusedMessage { pf: u8 },
    /// In PDU1 the lower 8 bits of the PGN must remain zero.
    #[error("PDU1 PGNs require PS = 0")]
    PsFocusMessageMustBeNull,
}

#[derive(Debug, Error, PartialEq, Eq)]
/// Failures while extracting a NAME from a captured frame.
pub enum ExtractionError {
    /// The frame is not an Address Claimed frame (PGN 0xEE00).
    #[error("PGN {pgn:#07X} is not an address claim")]
    NotAnAddressClaim { pgn: u32 },
    /// Payload length does not match the eight-byte NAME.
    #[error("Invalid data length for address claim: {len}")]
    InvalidDataLen { len: usize },
}

#[derive(Debug, Error)]
/// Errors raised by the J1939-21 transport protocol segmentation.
pub enum TransportError {
    /// BAM transports at most 1785 bytes (255 packets × 7 bytes).
    #[error("Payload of {len} bytes exceeds the BAM limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
    /// Single frames carry at most eight bytes.
    #[error("Payload of {len} bytes does not fit a single CAN frame")]
    FrameOverflow { len: usize },
    /// CAN identifier could not be built.
    #[error(transparent)]
    Build(#[from] CanIdBuildError),
}

#[derive(Debug, Error)]
/// Errors surfaced by the controller application adapter.
pub enum AdapterError {
    /// CAN layer refused or failed to send the frame (driver error rendered with `Debug`).
    #[error("CAN bus send error: {0}")]
    Send(String),
    /// Frame or multi-packet message could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// CAN identifier could not be built.
    #[error(transparent)]
    Build(#[from] CanIdBuildError),
    /// The receive pump stopped before the harness address was claimed.
    #[error("Receive path stopped: {0}")]
    ReceiveStopped(String),
    /// Every candidate address was taken while claiming the harness address.
    #[error("No address available")]
    NoAddressAvailable,
}

#[derive(Debug, Error)]
/// Errors raised while loading or validating the harness configuration.
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Unable to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The document is not valid JSON for [`HarnessConfig`](crate::config::HarnessConfig).
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// A NAME field does not fit its bit width.
    #[error("Field {field} = {value} exceeds its maximum {max}")]
    FieldOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
    /// The scenario list references an unknown identifier.
    #[error("Unknown scenario id {0:?}")]
    UnknownScenario(String),
}

#[derive(Debug, Error)]
/// Failures of the device-control collaborator (power cycling).
pub enum ControlError {
    /// Console interaction failed.
    #[error("Console interaction failed: {0}")]
    Io(#[from] std::io::Error),
    /// Operator input stream closed before confirmation.
    #[error("Operator input closed before confirmation")]
    InputClosed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
/// No correlated event arrived within the requested window.
#[error("No event received within {waited:?}")]
pub struct TimeoutError {
    pub waited: Duration,
}

#[derive(Debug, Error)]
/// Outcome of a scenario step that did not complete normally.
///
/// The sequencer maps each variant to a [`ScenarioResult`](crate::engine::scenario::ScenarioResult).
pub enum ScenarioError {
    /// Expected event never arrived (device silent).
    #[error("{location}: Timeout on receive queue after {waited:?}")]
    Timeout {
        location: &'static Location<'static>,
        waited: Duration,
    },
    /// A captured event violated a protocol invariant.
    #[error("{location}: {detail}")]
    Mismatch {
        location: &'static Location<'static>,
        detail: String,
    },
    /// Scenario does not apply to the device under test.
    #[error("{0}")]
    Skip(String),
    /// Stimulus could not be transmitted.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// Power cycling the device failed.
    #[error(transparent)]
    Control(#[from] ControlError),
}

impl ScenarioError {
    /// Build a [`ScenarioError::Mismatch`] located at the caller.
    #[track_caller]
    pub fn mismatch(detail: impl Into<String>) -> Self {
        Self::Mismatch {
            location: Location::caller(),
            detail: detail.into(),
        }
    }

    /// Build a [`ScenarioError::Skip`].
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }
}

#[derive(Debug, Error)]
/// Fatal faults aborting the whole run.
pub enum SequencerError {
    /// A scenario could not be prepared.
    #[error("Setup of {scenario:?} failed: {source}")]
    Setup {
        scenario: String,
        source: ScenarioError,
    },
    /// A scenario could not restore the network state.
    #[error("Teardown of {scenario:?} failed: {source}")]
    Teardown {
        scenario: String,
        source: ScenarioError,
    },
}

#[derive(Debug, Error)]
/// Failures of a whole conformance run.
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The harness node could not join the bus.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}
