//! Protocol assertions over captured events.
//!
//! Every helper reports a [`ScenarioError::Mismatch`] located at its caller,
//! carrying both the expected and the captured values.
use core::fmt::Debug;
use std::time::Duration;

use crate::engine::event::CapturedEvent;
use crate::error::ScenarioError;
use crate::protocol::managment::iso_name::IsoName;
use crate::protocol::transport::{is_immediately_usable, ADDRESS_NULL, CLAIM_SETTLING_DELAY_MS};

/// Slack granted to measured intervals (timestamps compared at 0.1 ms resolution).
pub const TIMING_TOLERANCE: Duration = Duration::from_micros(50);

#[track_caller]
pub fn ensure(condition: bool, detail: impl FnOnce() -> String) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::mismatch(detail()))
    }
}

#[track_caller]
pub fn ensure_eq<T: PartialEq + Debug>(
    what: &str,
    expected: T,
    actual: T,
) -> Result<(), ScenarioError> {
    ensure(expected == actual, || {
        format!("{what}: expected {expected:?}, captured {actual:?}")
    })
}

#[track_caller]
pub fn ensure_ne<T: PartialEq + Debug>(
    what: &str,
    unexpected: T,
    actual: T,
) -> Result<(), ScenarioError> {
    ensure(unexpected != actual, || {
        format!("{what}: expected anything but {unexpected:?}")
    })
}

/// The event is an address claim whose masked prefix matches `expected`.
///
/// Returns the captured NAME.
#[track_caller]
pub fn assert_same_device(event: &CapturedEvent, expected: IsoName) -> Result<IsoName, ScenarioError> {
    let Some(name) = event.name else {
        return Err(ScenarioError::mismatch(format!(
            "PGN {:#07X} from {:#04X} carries no NAME",
            event.pgn, event.source
        )));
    };
    ensure(name.same_device(&expected), || {
        format!(
            "device prefix: expected {:#018X}, captured {:#018X}",
            expected.masked_prefix(),
            name.masked_prefix()
        )
    })?;
    Ok(name)
}

/// Outcome of a lost contest at `previous`: a new address for an arbitrary
/// address capable device, Cannot Claim otherwise.
#[track_caller]
pub fn assert_lost_arbitration(
    event: &CapturedEvent,
    previous: u8,
    arbitrary_capable: bool,
) -> Result<(), ScenarioError> {
    if arbitrary_capable {
        ensure(event.source != previous && event.source != ADDRESS_NULL, || {
            format!(
                "arbitration loss: expected a new address, captured {:#04X} (was {previous:#04X})",
                event.source
            )
        })
    } else {
        ensure_eq("cannot claim source", ADDRESS_NULL, event.source)
    }
}

/// A contest won at `address` is answered by a re-claim of the same address.
#[track_caller]
pub fn assert_defended(event: &CapturedEvent, address: u8) -> Result<(), ScenarioError> {
    ensure_eq("defended address", address, event.source)
}

/// Minimum delay between a claim of `address` and the first normal traffic.
pub fn required_claim_gap(address: u8) -> Duration {
    if is_immediately_usable(address) {
        Duration::ZERO
    } else {
        Duration::from_millis(CLAIM_SETTLING_DELAY_MS)
    }
}

/// Normal traffic after `claim` honours the settling delay of the claimed address.
#[track_caller]
pub fn assert_claim_gap(claim: &CapturedEvent, traffic: &CapturedEvent) -> Result<(), ScenarioError> {
    let required = required_claim_gap(claim.source);
    let Some(gap) = traffic.elapsed_since(claim) else {
        return Err(ScenarioError::mismatch(format!(
            "traffic from {:#04X} precedes the claim",
            traffic.source
        )));
    };
    ensure(gap + TIMING_TOLERANCE >= required, || {
        format!(
            "claim of {:#04X} to traffic: expected at least {required:?}, measured {gap:?}",
            claim.source
        )
    })
}

/// `second` arrived at least `interval` after `first`.
#[track_caller]
pub fn assert_min_interval(
    first: &CapturedEvent,
    second: &CapturedEvent,
    interval: Duration,
) -> Result<(), ScenarioError> {
    let spacing = second.elapsed_since(first).unwrap_or(Duration::ZERO);
    ensure(spacing + TIMING_TOLERANCE >= interval, || {
        format!("re-claim spacing: expected at least {interval:?}, measured {spacing:?}")
    })
}

/// Nothing arrived during a quiet window.
#[track_caller]
pub fn assert_silence(outcome: Result<(), CapturedEvent>, what: &str) -> Result<(), ScenarioError> {
    match outcome {
        Ok(()) => Ok(()),
        Err(event) => Err(ScenarioError::mismatch(format!(
            "{what}: unexpected PGN {:#07X} from {:#04X}",
            event.pgn, event.source
        ))),
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::protocol::transport::PGN_ADDRESS_CLAIMED;

    const DUT: IsoName = IsoName::from_raw(0x1122_3344_0000_0000);

    fn claim(name: u64, source: u8, at: Instant) -> CapturedEvent {
        CapturedEvent {
            priority: 6,
            pgn: PGN_ADDRESS_CLAIMED,
            source,
            destination: Some(0xFF),
            timestamp: at,
            name: Some(IsoName::from_raw(name)),
            payload: name.to_le_bytes().to_vec(),
        }
    }

    fn traffic(source: u8, at: Instant) -> CapturedEvent {
        CapturedEvent {
            pgn: 0xC000,
            name: None,
            ..claim(0, source, at)
        }
    }

    #[test]
    fn test_same_device_ignores_identity_number() {
        let now = Instant::now();
        let event = claim(0x1122_3344_001F_FFFF, 0x20, now);
        assert_eq!(
            assert_same_device(&event, DUT).unwrap(),
            IsoName::from_raw(0x1122_3344_001F_FFFF)
        );
    }

    #[test]
    fn test_prefix_mismatch_reports_both_values() {
        let event = claim(0x1122_3345_0000_0001, 0x20, Instant::now());
        let err = assert_same_device(&event, DUT).unwrap_err().to_string();
        assert!(err.contains("0x1122334400000000"), "{err}");
        assert!(err.contains("0x1122334500000000"), "{err}");
        assert!(err.contains("assertions.rs"), "{err}");
    }

    #[test]
    fn test_lost_arbitration_outcomes() {
        let now = Instant::now();
        assert!(assert_lost_arbitration(&claim(1, 0x81, now), 0x80, true).is_ok());
        assert!(assert_lost_arbitration(&claim(1, 0x80, now), 0x80, true).is_err());
        assert!(assert_lost_arbitration(&claim(1, 0xFE, now), 0x80, true).is_err());
        assert!(assert_lost_arbitration(&claim(1, 0xFE, now), 0x80, false).is_ok());
        assert!(assert_lost_arbitration(&claim(1, 0x81, now), 0x80, false).is_err());
    }

    #[test]
    fn test_required_gap_per_range() {
        assert_eq!(required_claim_gap(50), Duration::ZERO);
        assert_eq!(required_claim_gap(250), Duration::ZERO);
        assert_eq!(required_claim_gap(200), Duration::from_millis(250));
        assert_eq!(required_claim_gap(128), Duration::from_millis(250));
    }

    #[test]
    fn test_claim_gap() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        assert!(assert_claim_gap(&claim(1, 50, t0), &traffic(50, t0)).is_ok());
        assert!(assert_claim_gap(&claim(1, 200, t0), &traffic(200, t0 + ms(250))).is_ok());
        assert!(assert_claim_gap(&claim(1, 200, t0), &traffic(200, t0 + ms(249))).is_err());
        assert!(assert_claim_gap(&claim(1, 200, t0 + ms(1)), &traffic(200, t0)).is_err());
    }

    #[test]
    fn test_min_interval_tolerance() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(5);
        let first = claim(1, 0x20, t0);
        let on_time = claim(1, 0x20, t0 + interval - Duration::from_micros(40));
        let early = claim(1, 0x20, t0 + Duration::from_millis(4999));
        assert!(assert_min_interval(&first, &on_time, interval).is_ok());
        assert!(assert_min_interval(&first, &early, interval).is_err());
    }
}
