//! Fixture documents: YAML or JSON files describing a fixture, its data model,
//! its scripts, and its test cases.
//!
//! ```yaml
//! fixture:
//!   id: people
//!   name: People
//! data_model:
//!   Person: { Name: Sheldon }
//! variables:
//!   Greeting: Hello
//! scripts:
//!   greeting.script: { template: "${{ Greeting }}, ${{ Person.Name }}" }
//! tests:
//!   - id: greet
//!     name: Greets the person
//!     sequence:
//!       - kind: actor
//!         id: say-hello
//!         action: log
//!         message: { mode: scripted, script_file: greeting.script }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use autoflow_types::{ArgumentSpec, TestCaseInfo, TestFixtureInfo};
use autoflow_util::seconds_to_duration;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actors::{AssertActor, AssignActor, FailActor, LogActor};
use crate::argument::{InMemoryScriptEngine, ScriptSource};
use crate::component::{ActorNode, Component, ComponentMeta, EntityNode, ProcessorNode};
use crate::testing::{OrchestratorError, TestCase, TestFixture, TestOrchestrator};

/// Parsed fixture document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDocument {
    pub fixture: TestFixtureInfo,
    #[serde(default)]
    pub data_model: Map<String, Value>,
    /// Script variables declared before anything runs.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub scripts: IndexMap<String, ScriptDefinition>,
    #[serde(default)]
    pub one_time_setup: Vec<ComponentDefinition>,
    #[serde(default)]
    pub one_time_teardown: Vec<ComponentDefinition>,
    #[serde(default)]
    pub tests: Vec<TestCaseDefinition>,
}

/// A script file body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDefinition {
    /// `${{ path }}` template (getter).
    Template(String),
    /// Reads and writes one script variable.
    Variable(String),
    /// Declares script variables when executed.
    Declare(Map<String, Value>),
}

impl From<ScriptDefinition> for ScriptSource {
    fn from(value: ScriptDefinition) -> Self {
        match value {
            ScriptDefinition::Template(template) => ScriptSource::Template(template),
            ScriptDefinition::Variable(name) => ScriptSource::Variable(name),
            ScriptDefinition::Declare(values) => ScriptSource::Declarations(values),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseDefinition {
    #[serde(flatten)]
    pub info: TestCaseInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<Map<String, Value>>,
    #[serde(default)]
    pub setup: Vec<ComponentDefinition>,
    #[serde(default)]
    pub sequence: Vec<ComponentDefinition>,
    #[serde(default)]
    pub teardown: Vec<ComponentDefinition>,
}

/// One node of a component tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentDefinition {
    Entity(EntityDefinition),
    Processor(ProcessorDefinition),
    Actor(ActorDefinition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub children: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Overrides the run's processing delay for this subtree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_delay_secs: Option<f64>,
    #[serde(default)]
    pub children: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(flatten)]
    pub action: ActionDefinition,
}

/// Built-in actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionDefinition {
    Assign {
        source: ArgumentSpec,
        target: ArgumentSpec,
    },
    Log {
        message: ArgumentSpec,
    },
    Assert {
        actual: ArgumentSpec,
        expected: ArgumentSpec,
        #[serde(default)]
        message: Option<String>,
    },
    Fail {
        message: String,
    },
}

fn enabled_by_default() -> bool {
    true
}

/// Everything needed to run a fixture document.
#[derive(Debug)]
pub struct LoadedFixture {
    pub fixture: TestFixture,
    pub tests: Vec<TestCase>,
    pub scripts: InMemoryScriptEngine,
}

impl LoadedFixture {
    /// Builds an orchestrator with every test case opened.
    pub fn into_orchestrator(self, processing_delay: Duration) -> Result<TestOrchestrator, OrchestratorError> {
        let mut orchestrator = TestOrchestrator::new(self.fixture, self.scripts, processing_delay);
        for case in self.tests {
            orchestrator.open_test_entity(case)?;
        }
        Ok(orchestrator)
    }
}

/// Reads a fixture document from disk. JSON is accepted as a YAML subset.
pub fn load_fixture_file(file_path: impl AsRef<Path>) -> Result<FixtureDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read fixture file: {}", file_path.display()))?;
    parse_fixture_document(&content).with_context(|| format!("Invalid fixture file: {}", file_path.display()))
}

pub fn parse_fixture_document(content: &str) -> Result<FixtureDocument> {
    let document: FixtureDocument = serde_yaml::from_str(content).context("fixture document does not match the expected shape")?;
    document.validate()?;
    Ok(document)
}

impl FixtureDocument {
    /// Rejects documents with blank or duplicate identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.fixture.id.trim().is_empty() {
            bail!("fixture id must not be empty");
        }

        let mut test_ids = HashSet::new();
        for test in &self.tests {
            if test.info.id.trim().is_empty() {
                bail!("test ids must not be empty");
            }
            if !test_ids.insert(test.info.id.as_str()) {
                bail!("duplicate test id '{}'", test.info.id);
            }
        }

        let mut component_ids = HashSet::new();
        let trees = [&self.one_time_setup, &self.one_time_teardown]
            .into_iter()
            .chain(self.tests.iter().flat_map(|test| [&test.setup, &test.sequence, &test.teardown]));
        for tree in trees {
            for definition in tree {
                collect_ids(definition, &mut component_ids)?;
            }
        }
        Ok(())
    }

    /// Builds the component trees and script engine described by the document.
    ///
    /// Processors without their own delay use `processing_delay`.
    pub fn instantiate(&self, processing_delay: Duration) -> Result<LoadedFixture> {
        let mut scripts = InMemoryScriptEngine::new();
        for (name, value) in &self.variables {
            scripts.declare_variable(name.clone(), value.clone());
        }
        for (file, definition) in &self.scripts {
            scripts.register_script(file.clone(), definition.clone().into());
        }

        let fixture_id = &self.fixture.id;
        let fixture = TestFixture::new(self.fixture.clone())
            .with_data_model(self.data_model.clone())
            .with_one_time_setup(build_stage(
                format!("{fixture_id}.one_time_setup"),
                "One-time setup",
                &self.one_time_setup,
                processing_delay,
            ))
            .with_one_time_teardown(build_stage(
                format!("{fixture_id}.one_time_teardown"),
                "One-time teardown",
                &self.one_time_teardown,
                processing_delay,
            ));

        let tests = self
            .tests
            .iter()
            .map(|definition| {
                let id = &definition.info.id;
                let mut case = TestCase::new(definition.info.clone())
                    .with_setup(build_stage(format!("{id}.setup"), "Setup", &definition.setup, processing_delay))
                    .with_sequence(build_stage(format!("{id}.sequence"), "Sequence", &definition.sequence, processing_delay))
                    .with_teardown(build_stage(format!("{id}.teardown"), "Teardown", &definition.teardown, processing_delay));
                case.data_source = definition.data_source.clone();
                case
            })
            .collect();

        Ok(LoadedFixture { fixture, tests, scripts })
    }
}

fn collect_ids<'a>(definition: &'a ComponentDefinition, seen: &mut HashSet<&'a str>) -> Result<()> {
    let (id, children) = match definition {
        ComponentDefinition::Entity(entity) => (entity.id.as_str(), entity.children.as_slice()),
        ComponentDefinition::Processor(processor) => (processor.id.as_str(), processor.children.as_slice()),
        ComponentDefinition::Actor(actor) => (actor.id.as_str(), &[][..]),
    };
    if id.trim().is_empty() {
        bail!("component ids must not be empty");
    }
    if !seen.insert(id) {
        bail!("duplicate component id '{id}'");
    }
    for child in children {
        collect_ids(child, seen)?;
    }
    Ok(())
}

fn build_stage(id: String, name: &str, definitions: &[ComponentDefinition], processing_delay: Duration) -> EntityNode {
    let mut stage = EntityNode::new(id, name);
    for definition in definitions {
        stage.add_child(build_component(definition, processing_delay));
    }
    stage
}

fn build_component(definition: &ComponentDefinition, processing_delay: Duration) -> Component {
    match definition {
        ComponentDefinition::Entity(entity) => {
            let mut node = EntityNode::new(entity.id.clone(), display_name(&entity.id, &entity.name));
            node.meta.enabled = entity.enabled;
            for child in &entity.children {
                node.add_child(build_component(child, processing_delay));
            }
            node.into()
        }
        ComponentDefinition::Processor(processor) => {
            let delay = processor.processing_delay_secs.map(seconds_to_duration).unwrap_or(processing_delay);
            let mut node = ProcessorNode::new(processor.id.clone(), display_name(&processor.id, &processor.name), delay);
            node.entity.meta.enabled = processor.enabled;
            for child in &processor.children {
                node.entity.add_child(build_component(child, processing_delay));
            }
            node.into()
        }
        ComponentDefinition::Actor(actor) => {
            let meta = ComponentMeta::new(actor.id.clone(), display_name(&actor.id, &actor.name));
            let behaviour: Box<dyn crate::component::Actor> = match &actor.action {
                ActionDefinition::Assign { source, target } => Box::new(AssignActor {
                    source: source.clone(),
                    target: target.clone(),
                }),
                ActionDefinition::Log { message } => Box::new(LogActor { message: message.clone() }),
                ActionDefinition::Assert { actual, expected, message } => Box::new(AssertActor {
                    actual: actual.clone(),
                    expected: expected.clone(),
                    message: message.clone(),
                }),
                ActionDefinition::Fail { message } => Box::new(FailActor { message: message.clone() }),
            };
            let mut node = ActorNode::boxed(meta, behaviour).with_continue_on_error(actor.continue_on_error);
            node.meta.enabled = actor.enabled;
            node.into()
        }
    }
}

fn display_name(id: &str, name: &Option<String>) -> String {
    name.clone().unwrap_or_else(|| id.to_string())
}
