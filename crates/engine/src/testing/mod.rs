//! Test fixtures, test cases, and the orchestrator that runs them.

use std::fmt;

use autoflow_types::{TestCaseInfo, TestFixtureInfo, TestResult};
use indexmap::IndexSet;
use serde_json::{Map, Value};

use crate::component::EntityNode;

mod orchestrator;

pub use orchestrator::{OrchestratorError, TestOrchestrator};

/// Stages a fixture run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStage {
    OneTimeSetup,
    Setup,
    Sequence,
    Teardown,
    OneTimeTeardown,
}

impl fmt::Display for TestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TestStage::OneTimeSetup => "one-time setup",
            TestStage::Setup => "setup",
            TestStage::Sequence => "sequence",
            TestStage::Teardown => "teardown",
            TestStage::OneTimeTeardown => "one-time teardown",
        })
    }
}

/// A test case: metadata plus one component tree per stage.
#[derive(Debug)]
pub struct TestCase {
    pub info: TestCaseInfo,
    /// Globals for an isolated child scope. `None` shares the fixture scope.
    pub data_source: Option<Map<String, Value>>,
    pub setup: EntityNode,
    pub sequence: EntityNode,
    pub teardown: EntityNode,
}

impl TestCase {
    pub fn new(info: TestCaseInfo) -> Self {
        let id = info.id.clone();
        Self {
            setup: EntityNode::new(format!("{id}.setup"), "Setup"),
            sequence: EntityNode::new(format!("{id}.sequence"), "Sequence"),
            teardown: EntityNode::new(format!("{id}.teardown"), "Teardown"),
            data_source: None,
            info,
        }
    }

    pub fn with_data_source(mut self, data_source: Map<String, Value>) -> Self {
        self.data_source = Some(data_source);
        self
    }

    pub fn with_setup(mut self, setup: EntityNode) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_sequence(mut self, sequence: EntityNode) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_teardown(mut self, teardown: EntityNode) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    fn stages_mut(&mut self) -> [&mut EntityNode; 3] {
        [&mut self.setup, &mut self.sequence, &mut self.teardown]
    }
}

/// A fixture: shared data model plus one-time setup and teardown trees.
#[derive(Debug)]
pub struct TestFixture {
    pub info: TestFixtureInfo,
    /// Root properties of the fixture's globals object.
    pub data_model: Map<String, Value>,
    pub one_time_setup: EntityNode,
    pub one_time_teardown: EntityNode,
}

impl TestFixture {
    pub fn new(info: TestFixtureInfo) -> Self {
        let id = info.id.clone();
        Self {
            data_model: Map::new(),
            one_time_setup: EntityNode::new(format!("{id}.one_time_setup"), "One-time setup"),
            one_time_teardown: EntityNode::new(format!("{id}.one_time_teardown"), "One-time teardown"),
            info,
        }
    }

    pub fn with_data_model(mut self, data_model: Map<String, Value>) -> Self {
        self.data_model = data_model;
        self
    }

    pub fn with_one_time_setup(mut self, setup: EntityNode) -> Self {
        self.one_time_setup = setup;
        self
    }

    pub fn with_one_time_teardown(mut self, teardown: EntityNode) -> Self {
        self.one_time_teardown = teardown;
        self
    }
}

/// Chooses which open test cases a batch run executes.
///
/// An empty tag set selects everything; otherwise a test is selected when it
/// (or its fixture) carries at least one of the tags. Tags compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSelector {
    pub tags: IndexSet<String>,
}

impl TestSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, test: &TestCaseInfo, fixture: &TestFixtureInfo) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        test.tags
            .iter()
            .chain(fixture.tags.iter())
            .any(|tag| self.tags.iter().any(|wanted| wanted.eq_ignore_ascii_case(tag)))
    }
}

/// Outcome of one test case within a batch run.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub test: TestCaseInfo,
    pub result: TestResult,
}
