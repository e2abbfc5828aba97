//! Sequencer lifecycle: isolation of scenario outcomes, teardown guarantees,
//! fatal setup/teardown faults.
mod helpers {
    include!("helpers/mod.rs");
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use helpers::{simulate_no_conflict, MockCanBus, NoDevice};
use korri_nm_conformance::config::TimingConfig;
use korri_nm_conformance::engine::adapter::CaAdapter;
use korri_nm_conformance::engine::event::EventFilter;
use korri_nm_conformance::engine::queue::CorrelationQueue;
use korri_nm_conformance::engine::scenario::{
    Located, Scenario, ScenarioContext, ScenarioResult, ScenarioState,
};
use korri_nm_conformance::engine::sequencer::Sequencer;
use korri_nm_conformance::error::{AdapterError, ControlError, ScenarioError, SequencerError};
use korri_nm_conformance::protocol::managment::iso_name::IsoName;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Script {
    Pass,
    Fail,
    SkipInRun,
    SkipInSetup,
    Panic,
    Timeout,
    FatalSetup,
    FatalTeardown,
}

#[derive(Default)]
struct Calls {
    setup: AtomicUsize,
    run: AtomicUsize,
    teardown: AtomicUsize,
}

struct Scripted {
    name: String,
    script: Script,
    calls: Arc<Calls>,
    opened: Arc<Mutex<Option<Arc<CorrelationQueue>>>>,
}

impl Scripted {
    fn boxed(name: &str, script: Script) -> (Box<dyn Scenario>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let scenario = Scripted {
            name: name.to_owned(),
            script,
            calls: Arc::clone(&calls),
            opened: Arc::new(Mutex::new(None)),
        };
        (Box::new(scenario), calls)
    }
}

#[async_trait]
impl Scenario for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.calls.setup.fetch_add(1, Ordering::SeqCst);
        *self.opened.lock().unwrap() = Some(ctx.subscribe(EventFilter::any()));
        match self.script {
            Script::SkipInSetup => Err(ScenarioError::skip("not applicable")),
            Script::FatalSetup => Err(AdapterError::Send("bus down".into()).into()),
            _ => Ok(()),
        }
    }

    async fn run(&mut self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.calls.run.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Fail => Err(ScenarioError::mismatch("scripted failure")),
            Script::SkipInRun => Err(ScenarioError::skip("skipped mid-run")),
            Script::Panic => panic!("scripted panic"),
            Script::Timeout => {
                ctx.claims.pop(Duration::from_millis(100)).await.located()?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn teardown(&mut self, _ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        self.calls.teardown.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::FatalTeardown => Err(ControlError::InputClosed.into()),
            _ => Ok(()),
        }
    }
}

async fn sequencer() -> Sequencer {
    let (harness_bus, peer) = MockCanBus::create_pair();
    tokio::spawn(simulate_no_conflict(peer));
    let tester = IsoName::from_raw(0x8000_8100_0000_0001);
    let adapter = CaAdapter::start(harness_bus, tester, 0xF9).await.unwrap();
    let ctx = ScenarioContext::new(
        Arc::new(adapter),
        Arc::new(NoDevice),
        IsoName::from_raw(0x1122_3344_0000_0000),
        TimingConfig::default(),
    );
    Sequencer::new("Sequencer", ctx)
}

#[tokio::test(start_paused = true)]
async fn test_teardown_runs_once_whatever_the_outcome() {
    let sequencer = sequencer().await;
    let scripts = [
        ("pass", Script::Pass),
        ("fail", Script::Fail),
        ("skip-run", Script::SkipInRun),
        ("skip-setup", Script::SkipInSetup),
        ("panic", Script::Panic),
        ("timeout", Script::Timeout),
    ];
    let mut scenarios = Vec::new();
    let mut calls = Vec::new();
    for (name, script) in scripts {
        let (scenario, counters) = Scripted::boxed(name, script);
        scenarios.push(scenario);
        calls.push((script, counters));
    }

    let report = sequencer.run(scenarios).await.unwrap();

    assert_eq!(report.entries.len(), 6);
    assert_eq!(report.entries[0].result, ScenarioResult::Passed);
    assert!(matches!(
        &report.entries[1].result,
        ScenarioResult::Failed(reason) if reason.contains("scripted failure")
    ));
    assert_eq!(
        report.entries[2].result,
        ScenarioResult::Skipped("skipped mid-run".into())
    );
    assert_eq!(
        report.entries[3].result,
        ScenarioResult::Skipped("not applicable".into())
    );
    assert_eq!(
        report.entries[4].result,
        ScenarioResult::Failed("panicked: scripted panic".into())
    );
    let ScenarioResult::Errored(reason) = &report.entries[5].result else {
        panic!("timeout must be reported as errored: {:?}", report.entries[5].result);
    };
    assert!(reason.contains("sequencer.rs"), "{reason}");
    assert!(reason.contains("Timeout on receive queue"), "{reason}");

    for (script, counters) in &calls {
        assert_eq!(counters.setup.load(Ordering::SeqCst), 1, "{script:?}");
        assert_eq!(counters.teardown.load(Ordering::SeqCst), 1, "{script:?}");
        let expected_runs = usize::from(*script != Script::SkipInSetup);
        assert_eq!(counters.run.load(Ordering::SeqCst), expected_runs, "{script:?}");
    }
    for (entry, (script, _)) in report.entries.iter().zip(&calls) {
        let expected = if *script == Script::SkipInSetup {
            ScenarioState::Created
        } else {
            ScenarioState::Running
        };
        assert_eq!(entry.reached, expected, "{script:?}");
    }
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queues_are_closed_between_scenarios() {
    let sequencer = sequencer().await;
    let opened = Arc::new(Mutex::new(None));
    let calls = Arc::new(Calls::default());
    let scenario = Scripted {
        name: "pass".into(),
        script: Script::Pass,
        calls: Arc::clone(&calls),
        opened: Arc::clone(&opened),
    };

    let report = sequencer.run(vec![Box::new(scenario)]).await.unwrap();
    assert!(report.passed());

    let queue = opened.lock().unwrap().take().unwrap();
    assert!(!queue.is_live());
    assert!(!sequencer.context().claims.is_live());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_setup_aborts_the_run() {
    let sequencer = sequencer().await;
    let (first, first_calls) = Scripted::boxed("first", Script::Pass);
    let (fatal, fatal_calls) = Scripted::boxed("fatal", Script::FatalSetup);
    let (never, never_calls) = Scripted::boxed("never", Script::Pass);

    let result = sequencer.run(vec![first, fatal, never]).await;

    assert!(matches!(
        result,
        Err(SequencerError::Setup { ref scenario, source: ScenarioError::Adapter(_) })
            if scenario == "fatal"
    ));
    assert_eq!(first_calls.teardown.load(Ordering::SeqCst), 1);
    assert_eq!(fatal_calls.run.load(Ordering::SeqCst), 0);
    assert_eq!(fatal_calls.teardown.load(Ordering::SeqCst), 1);
    assert_eq!(never_calls.setup.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_teardown_aborts_the_run() {
    let sequencer = sequencer().await;
    let (broken, _) = Scripted::boxed("broken", Script::FatalTeardown);
    let (never, never_calls) = Scripted::boxed("never", Script::Pass);

    let result = sequencer.run(vec![broken, never]).await;

    assert!(matches!(
        result,
        Err(SequencerError::Teardown { ref scenario, .. }) if scenario == "broken"
    ));
    assert_eq!(never_calls.setup.load(Ordering::SeqCst), 0);
}
