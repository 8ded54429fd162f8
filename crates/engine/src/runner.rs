//! Asynchronous fixture driver that streams lifecycle events and listens for
//! cancellation.
//!
//! The fixture itself runs synchronously on a blocking task; this module only
//! bridges it to Tokio channels. Events are best effort: a dropped receiver does
//! not stop the run.

use std::time::Duration;

use anyhow::{Result, anyhow};
use autoflow_types::{FixtureRunControl, FixtureRunEvent, FixtureRunStatus, TestOutcome, TestResult};
use chrono::Utc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::testing::{TestOrchestrator, TestReport, TestSelector};

/// Runs one-time setup, every selected test, and one-time teardown.
///
/// Returns the per-test reports once the run has completed, been cancelled,
/// or stopped because one-time setup failed. Tests left over after a
/// cancellation still get a `TestFinished` event and a not-run report.
pub async fn drive_fixture_run(
    orchestrator: TestOrchestrator,
    selector: TestSelector,
    mut control_rx: UnboundedReceiver<FixtureRunControl>,
    event_tx: UnboundedSender<FixtureRunEvent>,
) -> Result<Vec<TestReport>> {
    let control = orchestrator.control();
    let listener = tokio::spawn(async move {
        while let Some(command) = control_rx.recv().await {
            match command {
                FixtureRunControl::Cancel => {
                    info!("fixture run cancellation requested");
                    control.cancel();
                    break;
                }
            }
        }
    });

    let outcome = tokio::task::spawn_blocking(move || run_fixture(orchestrator, &selector, &event_tx)).await;
    listener.abort();
    outcome.map_err(|error| anyhow!("fixture run task failed: {error}"))
}

fn run_fixture(mut orchestrator: TestOrchestrator, selector: &TestSelector, event_tx: &UnboundedSender<FixtureRunEvent>) -> Vec<TestReport> {
    let control = orchestrator.control();
    let _ = event_tx.send(FixtureRunEvent::RunStarted {
        fixture_id: orchestrator.fixture().info.id.clone(),
        at: Utc::now(),
    });

    if let Err(error) = orchestrator.set_up() {
        let message = format!("{:#}", anyhow::Error::new(error));
        warn!(error = %message, "one-time setup failed");
        let _ = event_tx.send(FixtureRunEvent::SetupFailed {
            error: message.clone(),
            at: Utc::now(),
        });
        let status = if control.is_cancelled() {
            FixtureRunStatus::Canceled
        } else {
            FixtureRunStatus::Failed
        };
        let _ = event_tx.send(FixtureRunEvent::RunCompleted {
            status,
            finished_at: Utc::now(),
            error: Some(message),
        });
        return Vec::new();
    }
    let _ = event_tx.send(FixtureRunEvent::SetupCompleted { at: Utc::now() });

    let mut reports = Vec::new();
    let mut any_failed = false;
    for (index, test_id) in orchestrator.ordered_test_ids(selector).into_iter().enumerate() {
        let Some(info) = orchestrator.test(&test_id).map(|case| case.info.clone()) else {
            continue;
        };
        if control.is_cancelled() {
            let result = TestResult::not_run();
            let _ = event_tx.send(FixtureRunEvent::TestFinished {
                test_id,
                result: result.clone(),
            });
            reports.push(TestReport { test: info, result });
            continue;
        }
        let _ = event_tx.send(FixtureRunEvent::TestStarted {
            index,
            test_id: test_id.clone(),
            name: info.name.clone(),
            started_at: Utc::now(),
        });

        let result = orchestrator
            .run_test(&test_id)
            .unwrap_or_else(|error| TestResult::failed(Duration::ZERO, error.into()));
        any_failed |= matches!(result.result, TestOutcome::Failed | TestOutcome::Aborted);
        let _ = event_tx.send(FixtureRunEvent::TestFinished {
            test_id,
            result: result.clone(),
        });
        reports.push(TestReport { test: info, result });
    }

    let mut completion_error = None;
    if let Err(error) = orchestrator.tear_down() {
        let message = format!("{:#}", anyhow::Error::new(error));
        warn!(error = %message, "one-time teardown failed");
        let _ = event_tx.send(FixtureRunEvent::TeardownFailed { error: message.clone() });
        completion_error = Some(message);
        any_failed = true;
    }

    let status = if control.is_cancelled() {
        FixtureRunStatus::Canceled
    } else if any_failed {
        FixtureRunStatus::Failed
    } else {
        FixtureRunStatus::Succeeded
    };
    info!(status = ?status, tests = reports.len(), "fixture run completed");
    let _ = event_tx.send(FixtureRunEvent::RunCompleted {
        status,
        finished_at: Utc::now(),
        error: completion_error,
    });
    reports
}
