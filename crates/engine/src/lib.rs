//! # Autoflow Engine
//!
//! The Autoflow Engine executes trees of automation components and runs them
//! as test fixtures. A tree is made of actors (leaf actions), entities
//! (ordered containers with lifecycle hooks), and processors (entities that
//! run their own subtree).
//!
//! ## Key Features
//!
//! - **Sequential processing**: depth-first execution with paced actors and
//!   guaranteed `on_fault` draining of every open container
//! - **Argument resolution**: literal, data-bound (`Address.City`), and
//!   scripted arguments with typed reads and writes
//! - **Test orchestration**: one-time setup/teardown, per-test setup,
//!   sequence, and teardown stages with isolated data scopes
//! - **Fixture documents**: YAML fixture definitions loaded into a ready
//!   orchestrator
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use autoflow_engine::{TestSelector, parse_fixture_document};
//!
//! let document = parse_fixture_document(r#"
//! fixture:
//!   id: smoke
//! tests:
//!   - id: hello
//!     sequence:
//!       - kind: actor
//!         id: greet
//!         action: log
//!         message: { mode: default, declared_type: string, default_value: "hello" }
//! "#)?;
//!
//! let mut orchestrator = document.instantiate(Duration::ZERO)?.into_orchestrator(Duration::ZERO)?;
//! orchestrator.set_up()?;
//! let reports = orchestrator.run_tests(&TestSelector::all())?;
//! orchestrator.tear_down()?;
//! assert!(reports[0].result.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`component`**: the component tree and its non-recursive traversal
//! - **`processor`**: the sequential processor, pacing, and fault draining
//! - **`argument`**: scopes, script engines, and the argument resolver
//! - **`testing`**: fixtures, test cases, and the test orchestrator
//! - **`document`**: the YAML fixture format
//! - **`runner`**: the asynchronous driver streaming run events

pub mod actors;
pub mod argument;
pub mod component;
pub mod context;
pub mod document;
pub mod processor;
pub mod runner;
pub mod testing;

// Re-export commonly used types for convenience
pub use actors::{AssertActor, AssignActor, FailActor, LogActor};
pub use argument::{ArgumentError, ArgumentResolver, InMemoryScriptEngine, Scope, ScriptEngine, ScriptError};
pub use component::{
    Actor, ActorNode, Component, ComponentId, ComponentMeta, EntityBehavior, EntityNode, Fault, FaultCause, ProcessorNode,
    TraversalCursor, TraversalStep,
};
pub use context::RunContext;
pub use document::{FixtureDocument, LoadedFixture, load_fixture_file, parse_fixture_document};
pub use processor::{Pacer, PauseOutcome, ProcessError, ProcessorState, RunControl, SequentialProcessor, SleepPacer};
pub use runner::drive_fixture_run;
pub use testing::{OrchestratorError, TestCase, TestFixture, TestOrchestrator, TestReport, TestSelector, TestStage};
