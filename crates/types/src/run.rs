//! Events and control commands exchanged with the asynchronous fixture driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::testing::TestResult;

/// Overall status reported when a fixture run ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FixtureRunStatus {
    /// Every executed test succeeded.
    Succeeded,
    /// One-time setup failed or at least one test failed.
    Failed,
    /// The run was cancelled before it finished.
    Canceled,
}

/// Commands a host can send to a running fixture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FixtureRunControl {
    Cancel,
}

/// Lifecycle events emitted while a fixture runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixtureRunEvent {
    RunStarted {
        fixture_id: String,
        at: DateTime<Utc>,
    },
    /// One-time setup finished successfully.
    SetupCompleted {
        at: DateTime<Utc>,
    },
    /// One-time setup failed; no test will run.
    SetupFailed {
        error: String,
        at: DateTime<Utc>,
    },
    TestStarted {
        index: usize,
        test_id: String,
        name: String,
        started_at: DateTime<Utc>,
    },
    TestFinished {
        test_id: String,
        result: TestResult,
    },
    /// One-time teardown failed. The run still completes.
    TeardownFailed {
        error: String,
    },
    RunCompleted {
        status: FixtureRunStatus,
        finished_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}
