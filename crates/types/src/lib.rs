//! Shared type definitions for the autoflow engine, CLI, and document loaders.
//!
//! Everything in this crate is plain data: the persisted argument shape, the
//! per-test result record, test metadata, and the events streamed by the
//! asynchronous fixture driver.

pub mod argument;
pub mod run;
pub mod testing;

pub use argument::{ArgumentMode, ArgumentSpec, TypedValue, ValueType};
pub use run::{FixtureRunControl, FixtureRunEvent, FixtureRunStatus};
pub use testing::{TestCaseInfo, TestFixtureInfo, TestOutcome, TestPriority, TestResult};
