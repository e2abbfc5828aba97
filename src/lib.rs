//! `korri-nm-conformance`: a SAE J1939-81 network management conformance
//! engine. It claims its own address on the bus, drives a device under test
//! through a battery of timed address-claim scenarios, and reports
//! pass/fail/skip per scenario.
//!
//! The crate exposes the protocol primitives (NAME, CAN identifiers, BAM),
//! the correlation engine (queues, adapter, sequencer), and the scenarios.
//==================================================================================
use std::sync::Arc;

use tracing::info;

use crate::config::HarnessConfig;
use crate::engine::adapter::CaAdapter;
use crate::engine::device_control::DeviceControl;
use crate::engine::scenario::ScenarioContext;
use crate::engine::sequencer::{Report, Sequencer};
use crate::error::HarnessError;
use crate::protocol::transport::traits::can_bus::CanBus;
//==================================================================================
/// JSON configuration of a conformance run.
pub mod config;
/// Correlation queues, controller-application adapter, assertions and sequencer.
pub mod engine;
/// Domain and low-level errors (CAN identifier construction, claim decoding,
/// transport, configuration, scenario outcomes).
pub mod error;
/// J1939 implementation: CAN transport, BAM, NAME and address claiming.
pub mod protocol;
/// The network management scenario battery.
pub mod scenarios;
//==================================================================================

/// Claim the harness address on `bus` and run the configured scenarios
/// against the device under test.
pub async fn run_conformance<C: CanBus>(
    bus: C,
    control: Arc<dyn DeviceControl>,
    config: &HarnessConfig,
) -> Result<Report, HarnessError> {
    let dut = config.dut_name()?;
    let tester = config.tester_name()?;
    let ids = config.scenario_ids()?;

    let adapter = CaAdapter::start(bus, tester, config.tester.preferred_address)
        .await?
        .with_packet_gap(config.timing.tp_packet_gap());
    info!(dut = %dut, scenarios = ids.len(), "starting conformance run");

    let ctx = ScenarioContext::new(Arc::new(adapter), control, dut, config.timing)
        .with_normal_traffic(config.normal_traffic_filter())
        .with_restore_address(config.restore_address);
    let report = Sequencer::new(config.title.clone(), ctx)
        .run(scenarios::battery(&ids))
        .await?;
    Ok(report)
}
