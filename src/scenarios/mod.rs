//! The J1939-81 network management scenario battery.
//!
//! Every scenario starts from the claims queue opened by the sequencer and
//! talks to the device under test through the harness node only.
use core::fmt;
use core::str::FromStr;

use crate::engine::scenario::Scenario;
use crate::error::ConfigError;

pub mod arbitration;
pub mod commanded;
pub mod identity;
pub mod restore;
pub mod timing;

/// Identifier of a scenario in the configuration (`"nm-1"` …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    CaName,
    SystemInitialization,
    NonConfigurableAddress,
    CommandedAddress,
    SelfConfigurableAddress,
    GlobalRequest,
    SpecificRequest,
    ClaimTiming,
    AddressDefense,
    ArbitrationLoss,
    AddressNotClaimed,
    AddressViolation,
}

impl ScenarioId {
    /// Full battery, in run order.
    pub const ALL: [ScenarioId; 12] = [
        ScenarioId::CaName,
        ScenarioId::SystemInitialization,
        ScenarioId::NonConfigurableAddress,
        ScenarioId::CommandedAddress,
        ScenarioId::SelfConfigurableAddress,
        ScenarioId::GlobalRequest,
        ScenarioId::SpecificRequest,
        ScenarioId::ClaimTiming,
        ScenarioId::AddressDefense,
        ScenarioId::ArbitrationLoss,
        ScenarioId::AddressNotClaimed,
        ScenarioId::AddressViolation,
    ];

    /// Test number in J1939-81 conformance terms.
    pub const fn number(self) -> u8 {
        match self {
            ScenarioId::CaName => 1,
            ScenarioId::SystemInitialization => 2,
            ScenarioId::NonConfigurableAddress => 3,
            ScenarioId::CommandedAddress => 4,
            ScenarioId::SelfConfigurableAddress => 5,
            ScenarioId::GlobalRequest => 7,
            ScenarioId::SpecificRequest => 8,
            ScenarioId::ClaimTiming => 9,
            ScenarioId::AddressDefense => 10,
            ScenarioId::ArbitrationLoss => 11,
            ScenarioId::AddressNotClaimed => 12,
            ScenarioId::AddressViolation => 16,
        }
    }

    pub fn scenario(self) -> Box<dyn Scenario> {
        match self {
            ScenarioId::CaName => Box::new(identity::CaName),
            ScenarioId::SystemInitialization => Box::new(identity::SystemInitialization),
            ScenarioId::NonConfigurableAddress => {
                Box::new(arbitration::NonConfigurableAddress::default())
            }
            ScenarioId::CommandedAddress => Box::new(commanded::CommandedAddress::default()),
            ScenarioId::SelfConfigurableAddress => {
                Box::new(arbitration::SelfConfigurableAddress::default())
            }
            ScenarioId::GlobalRequest => Box::new(identity::GlobalRequest),
            ScenarioId::SpecificRequest => Box::new(identity::SpecificRequest),
            ScenarioId::ClaimTiming => Box::new(timing::ClaimTiming::default()),
            ScenarioId::AddressDefense => Box::new(arbitration::AddressDefense::default()),
            ScenarioId::ArbitrationLoss => Box::new(arbitration::ArbitrationLoss::default()),
            ScenarioId::AddressNotClaimed => Box::new(arbitration::AddressNotClaimed::default()),
            ScenarioId::AddressViolation => Box::new(timing::AddressViolation),
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nm-{}", self.number())
    }
}

impl FromStr for ScenarioId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_lowercase();
        ScenarioId::ALL
            .into_iter()
            .find(|candidate| candidate.to_string() == id)
            .ok_or_else(|| ConfigError::UnknownScenario(s.to_owned()))
    }
}

/// Instantiate the scenarios of `ids`, in order.
pub fn battery(ids: &[ScenarioId]) -> Vec<Box<dyn Scenario>> {
    ids.iter().map(|id| id.scenario()).collect()
}
