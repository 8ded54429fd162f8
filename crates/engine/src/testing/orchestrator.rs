//! Sequences one-time setup, per-test setup/sequence/teardown, and one-time
//! teardown for a fixture.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autoflow_types::{TestOutcome, TestResult};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{TestCase, TestFixture, TestReport, TestSelector, TestStage};
use crate::argument::{Scope, ScriptEngine, ScriptError};
use crate::component::{ComponentId, EntityNode};
use crate::context::RunContext;
use crate::processor::{Pacer, ProcessError, RunControl, SequentialProcessor};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("fixture '{0}' is already set up")]
    AlreadySetUp(String),
    #[error("fixture '{0}' is not set up")]
    NotSetUp(String),
    #[error("test '{0}' is not open")]
    UnknownTest(String),
    #[error("test '{0}' is already open")]
    DuplicateTest(String),
    #[error("{stage} stage failed")]
    Stage {
        stage: TestStage,
        #[source]
        source: ProcessError,
    },
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl OrchestratorError {
    fn is_cancelled(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Stage {
                source: ProcessError::Cancelled,
                ..
            }
        )
    }
}

struct OpenTest {
    case: TestCase,
    scope: Option<Scope>,
}

/// Runs a fixture's tests one stage at a time on the calling thread.
pub struct TestOrchestrator {
    fixture: TestFixture,
    processor: SequentialProcessor,
    context: RunContext,
    fixture_scope: Scope,
    tests: IndexMap<String, OpenTest>,
    is_setup_complete: bool,
}

impl TestOrchestrator {
    pub fn new(fixture: TestFixture, scripts: impl ScriptEngine + 'static, processing_delay: Duration) -> Self {
        let fixture_scope = Scope::root(fixture.info.id.clone(), fixture.data_model.clone());
        let processor = SequentialProcessor::new(fixture.info.name.clone(), processing_delay);
        Self {
            context: RunContext::new(fixture_scope.clone(), scripts),
            fixture_scope,
            processor,
            fixture,
            tests: IndexMap::new(),
            is_setup_complete: false,
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.context.pacer = pacer;
        self
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.context.control = control;
        self
    }

    /// Handle that cancels whatever stage is running.
    pub fn control(&self) -> RunControl {
        self.context.control.clone()
    }

    pub fn fixture(&self) -> &TestFixture {
        &self.fixture
    }

    pub fn processor(&self) -> &SequentialProcessor {
        &self.processor
    }

    pub fn fixture_scope(&self) -> &Scope {
        &self.fixture_scope
    }

    pub fn is_setup_complete(&self) -> bool {
        self.is_setup_complete
    }

    pub fn can_set_up(&self) -> bool {
        !self.is_setup_complete
    }

    pub fn can_run_tests(&self) -> bool {
        self.is_setup_complete
    }

    pub fn can_tear_down(&self) -> bool {
        self.is_setup_complete
    }

    pub fn test(&self, test_id: &str) -> Option<&TestCase> {
        self.tests.get(test_id).map(|open| &open.case)
    }

    /// Scope a test's arguments resolve against.
    pub fn test_scope(&self, test_id: &str) -> Option<&Scope> {
        let open = self.tests.get(test_id)?;
        Some(open.scope.as_ref().unwrap_or(&self.fixture_scope))
    }

    /// Runs the fixture script (if any) and the one-time setup stage.
    pub fn set_up(&mut self) -> Result<(), OrchestratorError> {
        if !self.can_set_up() {
            return Err(OrchestratorError::AlreadySetUp(self.fixture.info.id.clone()));
        }
        if self.fixture.info.is_muted {
            info!(fixture = %self.fixture.info.id, "fixture is muted; skipping one-time setup");
            self.is_setup_complete = true;
            return Ok(());
        }
        info!(fixture = %self.fixture.info.id, "setting up fixture");

        if let Some(file) = self.fixture.info.script_file.as_deref() {
            self.context.scripts.execute_script(file, &self.fixture_scope)?;
        }
        self.fixture.one_time_setup.reset_hierarchy();
        let mut stage = StageRunner {
            processor: &self.processor,
            context: &mut self.context,
        };
        stage.run(TestStage::OneTimeSetup, &mut self.fixture.one_time_setup, &self.fixture_scope)?;

        self.is_setup_complete = true;
        Ok(())
    }

    /// Runs one-time teardown. The fixture is no longer set up afterwards,
    /// whether or not teardown succeeded.
    pub fn tear_down(&mut self) -> Result<(), OrchestratorError> {
        if !self.can_tear_down() {
            return Err(OrchestratorError::NotSetUp(self.fixture.info.id.clone()));
        }
        if self.fixture.info.is_muted {
            self.is_setup_complete = false;
            return Ok(());
        }
        info!(fixture = %self.fixture.info.id, "tearing down fixture");

        self.fixture.one_time_teardown.reset_hierarchy();
        let mut stage = StageRunner {
            processor: &self.processor,
            context: &mut self.context,
        };
        let result = stage.run_uncancellable(TestStage::OneTimeTeardown, &mut self.fixture.one_time_teardown, &self.fixture_scope);
        self.is_setup_complete = false;
        result
    }

    /// Attaches a test case to the fixture, giving it an isolated scope when it
    /// declares its own data source.
    pub fn open_test_entity(&mut self, mut case: TestCase) -> Result<(), OrchestratorError> {
        let test_id = case.info.id.clone();
        if self.tests.contains_key(&test_id) {
            return Err(OrchestratorError::DuplicateTest(test_id));
        }

        let scope = case
            .data_source
            .clone()
            .map(|globals| self.fixture_scope.child(test_id.clone(), globals));
        if scope.is_some() {
            self.context.scripts.open_variable_layer(&test_id);
        }
        if let Some(file) = case.info.script_file.as_deref() {
            let target = scope.as_ref().unwrap_or(&self.fixture_scope);
            let layer = scope.is_some().then_some(test_id.as_str());
            self.context.scripts.activate_variable_layer(layer);
            let executed = self.context.scripts.execute_script(file, target);
            self.context.scripts.activate_variable_layer(None);
            if let Err(error) = executed {
                if scope.is_some() {
                    self.context.scripts.close_variable_layer(&test_id);
                }
                return Err(error.into());
            }
        }

        let parent = ComponentId::new(self.fixture.info.id.clone());
        for stage in case.stages_mut() {
            stage.meta.set_parent(Some(parent.clone()));
        }
        debug!(test = %test_id, isolated = scope.is_some(), "opened test entity");
        self.tests.insert(test_id, OpenTest { case, scope });
        Ok(())
    }

    /// Detaches a test case, disposing of its isolated scope.
    pub fn remove_test_entity(&mut self, test_id: &str) -> Option<TestCase> {
        let OpenTest { mut case, scope } = self.tests.shift_remove(test_id)?;
        for stage in case.stages_mut() {
            stage.meta.set_parent(None);
        }
        if let Some(scope) = scope {
            self.context.scripts.close_variable_layer(test_id);
            debug!(test = test_id, scope = scope.name(), "disposed test scope");
        }
        Some(case)
    }

    /// Open, selected test ids ordered by `order`, then priority (high first), then name.
    pub fn ordered_test_ids(&self, selector: &TestSelector) -> Vec<String> {
        let mut selected: Vec<&TestCase> = self
            .tests
            .values()
            .map(|open| &open.case)
            .filter(|case| selector.matches(&case.info, &self.fixture.info))
            .collect();
        selected.sort_by(|left, right| {
            left.info
                .order
                .cmp(&right.info.order)
                .then_with(|| right.info.priority.cmp(&left.info.priority))
                .then_with(|| left.info.name.cmp(&right.info.name))
        });
        selected.into_iter().map(|case| case.info.id.clone()).collect()
    }

    /// Runs setup and sequence, then teardown regardless of how they ended.
    ///
    /// Stage failures become a `Failed` result (or `Aborted` when the run was
    /// cancelled); only misuse of the orchestrator is returned as an error.
    pub fn run_test(&mut self, test_id: &str) -> Result<TestResult, OrchestratorError> {
        if !self.can_run_tests() {
            return Err(OrchestratorError::NotSetUp(self.fixture.info.id.clone()));
        }
        let open = self
            .tests
            .get_mut(test_id)
            .ok_or_else(|| OrchestratorError::UnknownTest(test_id.to_string()))?;
        if self.fixture.info.is_muted || open.case.info.is_muted {
            info!(test = test_id, "skipping muted test");
            return Ok(TestResult::not_run());
        }

        let isolated = open.scope.is_some();
        let scope = open.scope.clone().unwrap_or_else(|| self.fixture_scope.clone());
        let case = &mut open.case;
        for stage in case.stages_mut() {
            stage.reset_hierarchy();
        }

        info!(test = test_id, name = %case.info.name, "running test");
        self.context.scripts.activate_variable_layer(isolated.then_some(test_id));
        let started = Instant::now();
        let mut stage = StageRunner {
            processor: &self.processor,
            context: &mut self.context,
        };
        let body = match stage.run(TestStage::Setup, &mut case.setup, &scope) {
            Ok(()) => stage.run(TestStage::Sequence, &mut case.sequence, &scope),
            Err(error) => Err(error),
        };
        let teardown = stage.run_uncancellable(TestStage::Teardown, &mut case.teardown, &scope);
        let elapsed = started.elapsed();
        self.context.scripts.activate_variable_layer(None);

        let result = match (body, teardown) {
            (Ok(()), Ok(())) => TestResult::success(elapsed),
            (Ok(()), Err(teardown_error)) => TestResult::failed(elapsed, teardown_error.into()),
            (Err(body_error), teardown) => {
                if let Err(teardown_error) = teardown {
                    warn!(test = test_id, error = %teardown_error, "teardown also failed; keeping the earlier failure");
                }
                if body_error.is_cancelled() {
                    TestResult::aborted(elapsed, body_error.into())
                } else {
                    TestResult::failed(elapsed, body_error.into())
                }
            }
        };
        info!(
            test = test_id,
            outcome = ?result.result,
            elapsed_ms = elapsed.as_millis() as u64,
            "test finished"
        );
        Ok(result)
    }

    /// Runs every selected test in order. Muted tests, and tests left over
    /// after a cancellation, are reported without running.
    pub fn run_tests(&mut self, selector: &TestSelector) -> Result<Vec<TestReport>, OrchestratorError> {
        let mut reports = Vec::new();
        for test_id in self.ordered_test_ids(selector) {
            let result = if self.context.control.is_cancelled() {
                TestResult::not_run()
            } else {
                self.run_test(&test_id)?
            };
            if let Some(case) = self.test(&test_id) {
                reports.push(TestReport {
                    test: case.info.clone(),
                    result,
                });
            }
        }
        Ok(reports)
    }
}

impl std::fmt::Debug for TestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestOrchestrator")
            .field("fixture", &self.fixture.info.id)
            .field("tests", &self.tests.keys().collect::<Vec<_>>())
            .field("is_setup_complete", &self.is_setup_complete)
            .finish_non_exhaustive()
    }
}

struct StageRunner<'a> {
    processor: &'a SequentialProcessor,
    context: &'a mut RunContext,
}

impl StageRunner<'_> {
    /// Runs one stage tree against `scope`, restoring the previous scope afterwards.
    fn run(&mut self, stage: TestStage, root: &mut EntityNode, scope: &Scope) -> Result<(), OrchestratorError> {
        debug!(stage = %stage, root = %root.meta.id, "running stage");
        let previous = mem::replace(&mut self.context.scope, scope.clone());
        let outcome = self.processor.process(root, self.context);
        self.context.scope = previous;

        outcome.map_err(|source| {
            match &source {
                ProcessError::Cancelled => warn!(stage = %stage, "stage cancelled"),
                other => error!(stage = %stage, error = %other, "{stage} stage failed"),
            }
            OrchestratorError::Stage { stage, source }
        })
    }

    /// Teardown stages ignore cancellation so cleanup always runs to the end.
    fn run_uncancellable(&mut self, stage: TestStage, root: &mut EntityNode, scope: &Scope) -> Result<(), OrchestratorError> {
        let control = mem::replace(&mut self.context.control, RunControl::new());
        let outcome = self.run(stage, root, scope);
        self.context.control = control;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use autoflow_types::{ArgumentSpec, TestCaseInfo, TestFixtureInfo, TestPriority, ValueType};
    use serde_json::{Map, json};

    use super::*;
    use crate::actors::{AssertActor, AssignActor, FailActor};
    use crate::argument::ScriptSource;
    use crate::argument::InMemoryScriptEngine;
    use crate::component::{Actor, ActorNode};

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl Calls {
        fn step(&self, label: &str) -> ActorNode {
            ActorNode::new(label.to_string(), label.to_string(), Record(self.clone(), label.to_string()))
        }

        fn count(&self, label: &str) -> usize {
            self.0.lock().unwrap().iter().filter(|entry| *entry == label).count()
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Record(Calls, String);

    impl Actor for Record {
        fn act(&mut self, _context: &mut crate::context::RunContext) -> anyhow::Result<()> {
            self.0.0.lock().unwrap().push(self.1.clone());
            Ok(())
        }
    }

    struct Throws;

    impl Actor for Throws {
        fn act(&mut self, _context: &mut crate::context::RunContext) -> anyhow::Result<()> {
            bail!("sequence exploded")
        }
    }

    fn fixture() -> TestFixture {
        let mut data = Map::new();
        data.insert("Person".into(), json!({"Name": "Sheldon"}));
        TestFixture::new(TestFixtureInfo {
            id: "fixture".into(),
            name: "Fixture".into(),
            ..Default::default()
        })
        .with_data_model(data)
    }

    fn orchestrator(fixture: TestFixture) -> TestOrchestrator {
        TestOrchestrator::new(fixture, InMemoryScriptEngine::new(), Duration::from_millis(1))
    }

    #[test]
    fn set_up_and_tear_down_toggle_readiness() {
        let calls = Calls::default();
        let fixture = fixture()
            .with_one_time_setup(EntityNode::new("ots", "OTS").with_child(calls.step("one-time-setup")))
            .with_one_time_teardown(EntityNode::new("ott", "OTT").with_child(calls.step("one-time-teardown")));
        let mut orchestrator = orchestrator(fixture);

        assert!(orchestrator.can_set_up());
        assert!(matches!(orchestrator.run_test("x"), Err(OrchestratorError::NotSetUp(_))));
        orchestrator.set_up().expect("set up");
        assert!(!orchestrator.can_set_up());
        assert!(orchestrator.can_run_tests());
        assert!(matches!(orchestrator.set_up(), Err(OrchestratorError::AlreadySetUp(_))));

        orchestrator.tear_down().expect("tear down");
        assert!(!orchestrator.is_setup_complete());
        assert_eq!(calls.entries(), vec!["one-time-setup", "one-time-teardown"]);
    }

    #[test]
    fn muted_fixture_reports_tests_without_running_anything() {
        let calls = Calls::default();
        let mut fixture = fixture()
            .with_one_time_setup(EntityNode::new("ots", "OTS").with_child(ActorNode::new("throws", "Throws", Throws)))
            .with_one_time_teardown(EntityNode::new("ott", "OTT").with_child(calls.step("one-time-teardown")));
        fixture.info.is_muted = true;
        let mut orchestrator = orchestrator(fixture);
        orchestrator
            .open_test_entity(
                TestCase::new(TestCaseInfo::new("t", "T")).with_sequence(EntityNode::new("body", "Body").with_child(calls.step("body"))),
            )
            .expect("open");

        orchestrator.set_up().expect("muted set up skips the failing stage");
        let reports = orchestrator.run_tests(&TestSelector::all()).expect("run");
        orchestrator.tear_down().expect("tear down");

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result.result, TestOutcome::None);
        assert!(calls.entries().is_empty());
        assert!(!orchestrator.is_setup_complete());
    }

    #[test]
    fn failing_teardown_still_clears_setup_flag() {
        let fixture = fixture().with_one_time_teardown(EntityNode::new("ott", "OTT").with_child(ActorNode::new(
            "fail",
            "Fail",
            FailActor {
                message: "cannot clean".into(),
            },
        )));
        let mut orchestrator = orchestrator(fixture);
        orchestrator.set_up().expect("set up");

        let error = orchestrator.tear_down().expect_err("teardown fails");
        assert!(matches!(
            error,
            OrchestratorError::Stage {
                stage: TestStage::OneTimeTeardown,
                ..
            }
        ));
        assert!(!orchestrator.is_setup_complete());
        assert!(orchestrator.can_set_up());
    }

    #[test]
    fn sequence_failure_still_runs_teardown_once() {
        let calls = Calls::default();
        let case = TestCase::new(TestCaseInfo::new("t1", "Throws"))
            .with_setup(EntityNode::new("s", "S").with_child(calls.step("setup")))
            .with_sequence(EntityNode::new("q", "Q").with_child(ActorNode::new("boom", "Boom", Throws)).with_child(calls.step("unreached")))
            .with_teardown(EntityNode::new("t", "T").with_child(calls.step("teardown")));
        let mut orchestrator = orchestrator(fixture());
        orchestrator.open_test_entity(case).expect("open");
        orchestrator.set_up().expect("set up");

        let result = orchestrator.run_test("t1").expect("result");

        assert_eq!(result.result, TestOutcome::Failed);
        assert!(result.execution_time > Duration::ZERO);
        assert!(result.error.is_some());
        assert_eq!(
            result.error_message.as_deref(),
            Some("sequence stage failed: actor 'Boom' (boom) failed: sequence exploded")
        );
        assert_eq!(calls.count("teardown"), 1);
        assert_eq!(calls.count("unreached"), 0);
    }

    #[test]
    fn earlier_failure_wins_over_teardown_failure() {
        let case = TestCase::new(TestCaseInfo::new("t1", "Both fail"))
            .with_setup(EntityNode::new("s", "S").with_child(ActorNode::new("f1", "Setup fail", FailActor { message: "setup broke".into() })))
            .with_teardown(EntityNode::new("t", "T").with_child(ActorNode::new("f2", "Teardown fail", FailActor { message: "teardown broke".into() })));
        let mut orchestrator = orchestrator(fixture());
        orchestrator.open_test_entity(case).expect("open");
        orchestrator.set_up().expect("set up");

        let result = orchestrator.run_test("t1").expect("result");

        assert_eq!(result.result, TestOutcome::Failed);
        let message = result.error_message.expect("message");
        assert!(message.starts_with("setup stage failed"), "{message}");
        assert!(message.ends_with("setup broke"), "{message}");
    }

    #[test]
    fn teardown_failure_after_clean_body_fails_the_test() {
        let case = TestCase::new(TestCaseInfo::new("t1", "Teardown fails"))
            .with_teardown(EntityNode::new("t", "T").with_child(ActorNode::new("f", "Fail", FailActor { message: "leak".into() })));
        let mut orchestrator = orchestrator(fixture());
        orchestrator.open_test_entity(case).expect("open");
        orchestrator.set_up().expect("set up");

        let result = orchestrator.run_test("t1").expect("result");
        assert_eq!(result.result, TestOutcome::Failed);
        assert!(result.error_message.expect("message").starts_with("teardown stage failed"));
    }

    #[test]
    fn cancelled_test_is_aborted_but_teardown_runs() {
        let calls = Calls::default();
        let case = TestCase::new(TestCaseInfo::new("t1", "Cancelled"))
            .with_sequence(EntityNode::new("q", "Q").with_child(calls.step("body")))
            .with_teardown(EntityNode::new("t", "T").with_child(calls.step("teardown")));
        let mut orchestrator = orchestrator(fixture());
        orchestrator.open_test_entity(case).expect("open");
        orchestrator.set_up().expect("set up");
        orchestrator.control().cancel();

        let result = orchestrator.run_test("t1").expect("result");

        assert_eq!(result.result, TestOutcome::Aborted);
        assert_eq!(calls.entries(), vec!["teardown"]);
    }

    #[test]
    fn isolated_scope_does_not_leak_between_tests() {
        let write = |id: &str, name: &str| {
            let mut data = Map::new();
            data.insert("Local".into(), json!(null));
            TestCase::new(TestCaseInfo::new(id, id)).with_data_source(data).with_sequence(
                EntityNode::new(format!("{id}.body"), "Body")
                    .with_child(ActorNode::new(
                        format!("{id}.rename"),
                        "Rename",
                        AssignActor {
                            source: ArgumentSpec::literal(ValueType::String, json!(name)),
                            target: ArgumentSpec::bound(ValueType::String, "Person.Name"),
                        },
                    )),
            )
        };
        let mut orchestrator = orchestrator(fixture());
        orchestrator.open_test_entity(write("a", "Leonard")).expect("open a");
        orchestrator.open_test_entity(write("b", "Howard")).expect("open b");
        orchestrator.set_up().expect("set up");

        assert!(orchestrator.run_test("a").expect("a").is_success());
        assert!(orchestrator.run_test("b").expect("b").is_success());

        let name_in = |orchestrator: &TestOrchestrator, id: &str| orchestrator.test_scope(id).and_then(|scope| scope.lookup("Person"));
        assert_eq!(name_in(&orchestrator, "a"), Some(json!({"Name": "Leonard"})));
        assert_eq!(name_in(&orchestrator, "b"), Some(json!({"Name": "Howard"})));
        assert_eq!(orchestrator.fixture_scope().lookup("Person"), Some(json!({"Name": "Sheldon"})));

        let removed = orchestrator.remove_test_entity("a").expect("removed");
        assert_eq!(removed.sequence.meta.parent(), None);
        assert!(orchestrator.test_scope("a").is_none());
    }

    #[test]
    fn isolated_tests_keep_their_own_script_variables() {
        let mut scripts = InMemoryScriptEngine::new();
        for (file, who) in [("a.script", "A"), ("b.script", "B")] {
            let mut declarations = Map::new();
            declarations.insert("Who".into(), json!(who));
            scripts.register_script(file, ScriptSource::Declarations(declarations));
        }
        let case = |id: &str, expected: &str| {
            let mut info = TestCaseInfo::new(id, id);
            info.script_file = Some(format!("{id}.script"));
            TestCase::new(info).with_data_source(Map::new()).with_sequence(
                EntityNode::new(format!("{id}.body"), "Body").with_child(ActorNode::new(
                    format!("{id}.check"),
                    "Check",
                    AssertActor {
                        actual: ArgumentSpec::bound(ValueType::String, "Who"),
                        expected: ArgumentSpec::literal(ValueType::String, json!(expected)),
                        message: None,
                    },
                )),
            )
        };
        let mut orchestrator = TestOrchestrator::new(fixture(), scripts, Duration::ZERO);
        orchestrator.open_test_entity(case("a", "A")).expect("open a");
        orchestrator.open_test_entity(case("b", "B")).expect("open b");
        orchestrator.set_up().expect("set up");

        let a = orchestrator.run_test("a").expect("a");
        assert!(a.is_success(), "{:?}", a.error_message);
        let b = orchestrator.run_test("b").expect("b");
        assert!(b.is_success(), "{:?}", b.error_message);

        orchestrator.remove_test_entity("b").expect("removed");
        assert!(orchestrator.run_test("a").expect("a again").is_success());
    }

    #[test]
    fn open_records_fixture_as_parent_and_rejects_duplicates() {
        let mut orchestrator = orchestrator(fixture());
        orchestrator.open_test_entity(TestCase::new(TestCaseInfo::new("t1", "One"))).expect("open");
        let parent = orchestrator.test("t1").and_then(|case| case.setup.meta.parent().cloned());
        assert_eq!(parent, Some(ComponentId::from("fixture")));

        let duplicate = orchestrator.open_test_entity(TestCase::new(TestCaseInfo::new("t1", "Again")));
        assert!(matches!(duplicate, Err(OrchestratorError::DuplicateTest(_))));
    }

    #[test]
    fn batch_runs_follow_order_priority_and_name_and_skip_muted() {
        let calls = Calls::default();
        let make = |id: &str, order: u32, priority: TestPriority, muted: bool| {
            let mut info = TestCaseInfo::new(id, id);
            info.order = order;
            info.priority = priority;
            info.is_muted = muted;
            TestCase::new(info).with_sequence(EntityNode::new(format!("{id}.body"), "Body").with_child(calls.step(id)))
        };
        let mut orchestrator = orchestrator(fixture());
        for case in [
            make("late", 2, TestPriority::High, false),
            make("b-low", 1, TestPriority::Low, false),
            make("a-high", 1, TestPriority::High, false),
            make("muted", 0, TestPriority::Medium, true),
            make("c-high", 1, TestPriority::High, false),
        ] {
            orchestrator.open_test_entity(case).expect("open");
        }
        orchestrator.set_up().expect("set up");

        let reports = orchestrator.run_tests(&TestSelector::all()).expect("reports");

        let order: Vec<&str> = reports.iter().map(|report| report.test.id.as_str()).collect();
        assert_eq!(order, vec!["muted", "a-high", "c-high", "b-low", "late"]);
        assert_eq!(reports[0].result.result, TestOutcome::None);
        assert_eq!(calls.entries(), vec!["a-high", "c-high", "b-low", "late"]);
    }

    #[test]
    fn fixture_script_runs_before_one_time_setup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let mut declarations = Map::new();
        declarations.insert("Ready".into(), json!(true));
        let scripts = InMemoryScriptEngine::new().with_script("fixture.script", crate::argument::ScriptSource::Declarations(declarations));
        let mut fixture = fixture();
        fixture.info.script_file = Some("fixture.script".into());

        struct RequiresReady(Arc<AtomicUsize>);
        impl Actor for RequiresReady {
            fn act(&mut self, context: &mut crate::context::RunContext) -> anyhow::Result<()> {
                let ready: bool = context.resolver().get_value(&ArgumentSpec::bound(ValueType::Bool, "Ready"))?;
                if ready {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        }

        let fixture = fixture.with_one_time_setup(EntityNode::new("ots", "OTS").with_child(ActorNode::new("check", "Check", RequiresReady(seen))));
        let mut orchestrator = TestOrchestrator::new(fixture, scripts, Duration::ZERO);
        orchestrator.set_up().expect("set up");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
