//! Scenario abstraction: one named conformance check with a setup / run /
//! teardown lifecycle, and the context shared by every scenario of a run.
use core::fmt;
use core::panic::Location;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::config::{TimingConfig, DEFAULT_NORMAL_TRAFFIC_PGN, DEFAULT_RESTORE_ADDRESS};
use crate::engine::adapter::ControllerApplication;
use crate::engine::device_control::DeviceControl;
use crate::engine::dispatcher::Subscription;
use crate::engine::event::EventFilter;
use crate::engine::queue::CorrelationQueue;
use crate::error::{ScenarioError, TimeoutError};
use crate::protocol::managment::iso_name::IsoName;

/// Verdict of one scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioResult {
    Passed,
    /// A protocol invariant was violated.
    Failed(String),
    /// The scenario does not apply to the device under test.
    Skipped(String),
    /// An expected event never arrived, or the harness could not act.
    Errored(String),
}

impl ScenarioResult {
    /// `true` for Failed and Errored.
    pub fn is_failure(&self) -> bool {
        matches!(self, ScenarioResult::Failed(_) | ScenarioResult::Errored(_))
    }
}

impl From<Result<(), ScenarioError>> for ScenarioResult {
    fn from(outcome: Result<(), ScenarioError>) -> Self {
        match outcome {
            Ok(()) => ScenarioResult::Passed,
            Err(ScenarioError::Skip(reason)) => ScenarioResult::Skipped(reason),
            Err(err @ ScenarioError::Mismatch { .. }) => ScenarioResult::Failed(err.to_string()),
            Err(err) => ScenarioResult::Errored(err.to_string()),
        }
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioResult::Passed => write!(f, "PASSED"),
            ScenarioResult::Failed(reason) => write!(f, "FAILED: {reason}"),
            ScenarioResult::Skipped(reason) => write!(f, "SKIPPED: {reason}"),
            ScenarioResult::Errored(reason) => write!(f, "ERRORED: {reason}"),
        }
    }
}

/// Lifecycle position of a scenario inside the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Created,
    SetUp,
    Running,
    TornDown,
}

/// One conformance check.
///
/// `setup` and `teardown` default to no-ops. Subscriptions taken through
/// [`ScenarioContext::subscribe`] are released by the sequencer after
/// `teardown`, whatever the outcome of `run`.
#[async_trait]
pub trait Scenario: Send {
    fn name(&self) -> &str;

    async fn setup(&mut self, _ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        Ok(())
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError>;

    async fn teardown(&mut self, _ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        Ok(())
    }
}

/// Everything a scenario may touch.
pub struct ScenarioContext {
    /// Harness node used for stimulus.
    pub ca: Arc<dyn ControllerApplication>,
    /// Expected identity of the device under test (prefix bits).
    pub dut: IsoName,
    pub timing: TimingConfig,
    /// Frames counting as normal network traffic.
    pub normal_traffic: EventFilter,
    /// Address the device is commanded back to after it moved.
    pub restore_address: u8,
    /// Default correlation queue, fed with every inbound address claim.
    pub claims: Arc<CorrelationQueue>,
    pub control: Arc<dyn DeviceControl>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ScenarioContext {
    pub fn new(
        ca: Arc<dyn ControllerApplication>,
        control: Arc<dyn DeviceControl>,
        dut: IsoName,
        timing: TimingConfig,
    ) -> Self {
        Self {
            ca,
            dut,
            timing,
            normal_traffic: EventFilter::pgn(DEFAULT_NORMAL_TRAFFIC_PGN),
            restore_address: DEFAULT_RESTORE_ADDRESS,
            claims: Arc::new(CorrelationQueue::new(EventFilter::address_claims())),
            control,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_normal_traffic(mut self, filter: EventFilter) -> Self {
        self.normal_traffic = filter;
        self
    }

    pub fn with_restore_address(mut self, address: u8) -> Self {
        self.restore_address = address;
        self
    }

    /// `true` when the expected identity is arbitrary address capable.
    pub fn dut_is_arbitrary_capable(&self) -> bool {
        self.dut.is_arbitrary_address_capable()
    }

    /// Open a queue for the current scenario; it is closed after teardown.
    pub fn subscribe(&self, filter: EventFilter) -> Arc<CorrelationQueue> {
        let (queue, subscription) = self.ca.subscribe(filter);
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscription);
        queue
    }

    /// Power cycle the device under test.
    pub async fn power_cycle(&self) -> Result<(), ScenarioError> {
        self.control.power_cycle().await?;
        Ok(())
    }

    /// Drop every subscription taken during the current scenario.
    pub(crate) fn release_subscriptions(&self) -> usize {
        let released: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        released.len()
    }
}

/// Attach the call site to a queue timeout.
pub trait Located<T> {
    fn located(self) -> Result<T, ScenarioError>;
}

impl<T> Located<T> for Result<T, TimeoutError> {
    #[track_caller]
    fn located(self) -> Result<T, ScenarioError> {
        let location = Location::caller();
        self.map_err(|TimeoutError { waited }| ScenarioError::Timeout { location, waited })
    }
}
