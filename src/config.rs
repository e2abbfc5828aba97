//! Harness configuration, loaded from a JSON document.
//!
//! Every field is optional; missing ones take the defaults below.
//!
//! ```json
//! {
//!   "dut": { "manufacturer_code": 1234, "function": 130, "arbitrary_address_capable": true },
//!   "timing": { "reclaim_interval_ms": 5000 },
//!   "scenarios": ["nm-1", "nm-7", "nm-10"]
//! }
//! ```
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::event::EventFilter;
use crate::error::ConfigError;
use crate::protocol::managment::iso_name::IsoName;
use crate::scenarios::ScenarioId;

/// Proprietary A, the default PGN of normal traffic.
pub const DEFAULT_NORMAL_TRAFFIC_PGN: u32 = 0xC000;

/// Default address the device is commanded to.
pub const DEFAULT_RESTORE_ADDRESS: u8 = 0x80;

/// Root of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Heading of the printed report.
    pub title: String,
    /// Expected identity of the device under test. Identity number bits are ignored.
    pub dut: NameFields,
    /// Node the harness claims for itself.
    pub tester: TesterConfig,
    pub timing: TimingConfig,
    /// PGNs counting as normal traffic in timing scenarios.
    pub normal_traffic_pgns: Vec<u32>,
    /// Address the device is commanded to, and back to after it moved.
    pub restore_address: u8,
    /// Scenario ids to run, in order.
    pub scenarios: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            title: "J1939-81 Network Management".to_owned(),
            dut: NameFields::default(),
            tester: TesterConfig::default(),
            timing: TimingConfig::default(),
            normal_traffic_pgns: vec![DEFAULT_NORMAL_TRAFFIC_PGN],
            restore_address: DEFAULT_RESTORE_ADDRESS,
            scenarios: ScenarioId::ALL.iter().map(ToString::to_string).collect(),
        }
    }
}

impl HarnessConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn dut_name(&self) -> Result<IsoName, ConfigError> {
        self.dut.to_iso_name()
    }

    pub fn tester_name(&self) -> Result<IsoName, ConfigError> {
        self.tester.name.to_iso_name()
    }

    /// Parsed scenario list.
    pub fn scenario_ids(&self) -> Result<Vec<ScenarioId>, ConfigError> {
        self.scenarios.iter().map(|id| id.parse()).collect()
    }

    pub fn normal_traffic_filter(&self) -> EventFilter {
        EventFilter::pgns(self.normal_traffic_pgns.iter().copied())
    }
}

/// The nine NAME fields, as plain numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameFields {
    pub arbitrary_address_capable: bool,
    pub industry_group: u8,
    pub vehicle_system_instance: u8,
    pub vehicle_system: u8,
    pub function: u8,
    pub function_instance: u8,
    pub ecu_instance: u8,
    pub manufacturer_code: u16,
    pub identity_number: u32,
}

impl NameFields {
    /// Validate field widths and assemble the NAME.
    pub fn to_iso_name(&self) -> Result<IsoName, ConfigError> {
        check_width("industry_group", self.industry_group as u64, 3)?;
        check_width("vehicle_system_instance", self.vehicle_system_instance as u64, 4)?;
        check_width("vehicle_system", self.vehicle_system as u64, 7)?;
        check_width("function_instance", self.function_instance as u64, 5)?;
        check_width("ecu_instance", self.ecu_instance as u64, 3)?;
        check_width("manufacturer_code", self.manufacturer_code as u64, 11)?;
        check_width("identity_number", self.identity_number as u64, 21)?;

        Ok(IsoName::builder()
            .arbitrary_address_capable(self.arbitrary_address_capable)
            .industry_group(self.industry_group)
            .vehicle_system_instance(self.vehicle_system_instance)
            .vehicle_system(self.vehicle_system)
            .function(self.function)
            .function_instance(self.function_instance)
            .ecu_instance(self.ecu_instance)
            .manufacturer_code(self.manufacturer_code)
            .identity_number(self.identity_number)
            .build())
    }
}

fn check_width(field: &'static str, value: u64, bits: u32) -> Result<(), ConfigError> {
    let max = (1u64 << bits) - 1;
    if value > max {
        return Err(ConfigError::FieldOutOfRange { field, value, max });
    }
    Ok(())
}

/// Identity and preferred address of the harness node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesterConfig {
    pub name: NameFields,
    pub preferred_address: u8,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            name: NameFields {
                arbitrary_address_capable: true,
                function: 129,
                ..NameFields::default()
            },
            preferred_address: 0xF9,
        }
    }
}

/// Timeouts and delays, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait for a claim answering a stimulus.
    pub response_timeout_ms: u64,
    /// Wait for the claim answering the first global request.
    pub name_query_timeout_ms: u64,
    /// Wait for the claim sent at power-up.
    pub power_up_timeout_ms: u64,
    /// Pause after corrective traffic in teardown.
    pub settle_ms: u64,
    /// Pause between the device claim and the first address violation.
    pub violation_settle_ms: u64,
    /// Wait for the claim answering an address violation.
    pub violation_response_ms: u64,
    /// Minimum spacing between two claims answering violations.
    pub reclaim_interval_ms: u64,
    /// Pause between BAM data packets.
    pub tp_packet_gap_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            name_query_timeout_ms: 1250,
            power_up_timeout_ms: 10_000,
            settle_ms: 500,
            violation_settle_ms: 1250,
            violation_response_ms: 250,
            reclaim_interval_ms: 5000,
            tp_packet_gap_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn name_query_timeout(&self) -> Duration {
        Duration::from_millis(self.name_query_timeout_ms)
    }

    pub fn power_up_timeout(&self) -> Duration {
        Duration::from_millis(self.power_up_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn violation_settle(&self) -> Duration {
        Duration::from_millis(self.violation_settle_ms)
    }

    pub fn violation_response(&self) -> Duration {
        Duration::from_millis(self.violation_response_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    pub fn tp_packet_gap(&self) -> Duration {
        Duration::from_millis(self.tp_packet_gap_ms)
    }
}
