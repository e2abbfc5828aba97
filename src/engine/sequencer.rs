//! Runs an ordered scenario list, isolating each scenario, and aggregates
//! the verdicts into a [`Report`].
use core::fmt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::engine::dispatcher::EventCallback;
use crate::engine::event::CapturedEvent;
use crate::engine::scenario::{Scenario, ScenarioContext, ScenarioResult, ScenarioState};
use crate::error::{ScenarioError, SequencerError};

/// Drives scenarios one at a time over a shared [`ScenarioContext`].
pub struct Sequencer {
    title: String,
    ctx: ScenarioContext,
}

impl Sequencer {
    pub fn new(title: impl Into<String>, ctx: ScenarioContext) -> Self {
        Self {
            title: title.into(),
            ctx,
        }
    }

    pub fn context(&self) -> &ScenarioContext {
        &self.ctx
    }

    /// Run every scenario in order.
    ///
    /// A failing, erroring or panicking `run` only affects its own entry.
    /// A setup or teardown fault aborts the run.
    pub async fn run(&self, scenarios: Vec<Box<dyn Scenario>>) -> Result<Report, SequencerError> {
        let claims = Arc::clone(&self.ctx.claims);
        let hook: EventCallback = Arc::new(move |event: &CapturedEvent| {
            claims.push(event.clone());
        });
        self.ctx.ca.set_claim_hook(Some(hook));

        let mut report = Report::new(self.title.clone());
        let mut outcome = Ok(());
        for mut scenario in scenarios {
            match self.run_one(scenario.as_mut()).await {
                Ok(entry) => report.entries.push(entry),
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        self.ctx.ca.set_claim_hook(None);
        outcome.map(|()| report)
    }

    async fn run_one(&self, scenario: &mut dyn Scenario) -> Result<ReportEntry, SequencerError> {
        let name = scenario.name().to_owned();
        let mut state = ScenarioState::Created;
        info!(scenario = %name, "starting scenario");
        self.ctx.claims.open();

        let result = match scenario.setup(&self.ctx).await {
            Ok(()) => {
                state = ScenarioState::SetUp;
                debug!(scenario = %name, ?state, "setup complete");
                state = ScenarioState::Running;
                match AssertUnwindSafe(scenario.run(&self.ctx)).catch_unwind().await {
                    Ok(outcome) => ScenarioResult::from(outcome),
                    Err(panic) => {
                        error!(scenario = %name, "scenario panicked");
                        ScenarioResult::Failed(format!("panicked: {}", panic_message(&*panic)))
                    }
                }
            }
            Err(ScenarioError::Skip(reason)) => ScenarioResult::Skipped(reason),
            Err(source) => {
                error!(scenario = %name, %source, "setup failed, aborting run");
                if let Err(err) = scenario.teardown(&self.ctx).await {
                    warn!(scenario = %name, %err, "teardown after failed setup also failed");
                }
                self.finish();
                return Err(SequencerError::Setup {
                    scenario: name,
                    source,
                });
            }
        };
        debug!(scenario = %name, ?state, "scenario finished running");

        let reached = state;
        let teardown = scenario.teardown(&self.ctx).await;
        self.finish();
        state = ScenarioState::TornDown;
        debug!(scenario = %name, ?state, "scenario torn down");
        if let Err(source) = teardown {
            error!(scenario = %name, %source, "teardown failed, aborting run");
            return Err(SequencerError::Teardown {
                scenario: name,
                source,
            });
        }

        info!(scenario = %name, %result, "scenario done");
        Ok(ReportEntry {
            name,
            result,
            reached,
        })
    }

    fn finish(&self) {
        let released = self.ctx.release_subscriptions();
        self.ctx.claims.close();
        debug!(released, "scenario queues closed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

//==================================================================================REPORT
/// Verdict of one scenario, in run order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub name: String,
    pub result: ScenarioResult,
    /// Furthest state before teardown: `Created` when setup skipped,
    /// `Running` once `run` was entered.
    pub reached: ScenarioState,
}

/// Ordered verdicts of a sequencer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: Vec::new(),
        }
    }

    /// `true` when nothing Failed or Errored.
    pub fn passed(&self) -> bool {
        !self.entries.iter().any(|entry| entry.result.is_failure())
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    /// Print the summary and terminate the process with [`Report::exit_code`].
    pub fn report_and_exit(&self) -> ! {
        println!("{self}");
        std::process::exit(self.exit_code())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        for entry in &self.entries {
            writeln!(f, "{:<45} {}", entry.name, entry.result)?;
        }
        Ok(())
    }
}
