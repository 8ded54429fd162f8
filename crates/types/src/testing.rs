//! Test fixture and test case metadata, plus the per-test result record.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Final state of a single test case run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    /// The test did not run (muted or not yet executed).
    #[default]
    None,
    Success,
    Failed,
    /// The run was cancelled while the test was executing.
    Aborted,
}

/// Relative importance used to order test cases sharing the same `order`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Result captured for one test case: `{result, execution_time, error_message?}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestResult {
    /// Outcome of the run.
    pub result: TestOutcome,
    /// Wall-clock time across setup, sequence, and teardown.
    #[serde(with = "duration_millis")]
    pub execution_time: Duration,
    /// Display form of the captured error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// The captured error itself. Not persisted.
    #[serde(skip)]
    pub error: Option<Arc<anyhow::Error>>,
}

impl TestResult {
    pub fn success(execution_time: Duration) -> Self {
        Self {
            result: TestOutcome::Success,
            execution_time,
            ..Default::default()
        }
    }

    pub fn failed(execution_time: Duration, error: anyhow::Error) -> Self {
        Self::with_error(TestOutcome::Failed, execution_time, error)
    }

    pub fn aborted(execution_time: Duration, error: anyhow::Error) -> Self {
        Self::with_error(TestOutcome::Aborted, execution_time, error)
    }

    /// Result reported for a test that was skipped without running any stage.
    pub fn not_run() -> Self {
        Self::default()
    }

    fn with_error(result: TestOutcome, execution_time: Duration, error: anyhow::Error) -> Self {
        Self {
            result,
            execution_time,
            error_message: Some(format!("{error:#}")),
            error: Some(Arc::new(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == TestOutcome::Success
    }
}

/// Metadata describing a test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TestCaseInfo {
    /// Stable identifier, unique within a fixture.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Primary sort key; lower runs first.
    #[serde(default)]
    pub order: u32,
    /// Secondary sort key; higher runs first.
    #[serde(default)]
    pub priority: TestPriority,
    /// Muted tests are reported but never executed.
    #[serde(default)]
    pub is_muted: bool,
    /// Script file initializing the test's script state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(default)]
    pub tags: IndexSet<String>,
}

impl TestCaseInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Metadata describing a test fixture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TestFixtureInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A muted fixture skips its one-time stages and reports every test as not run.
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(default)]
    pub tags: IndexSet<String>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
