//! Cancellable pacing between actors.
//!
//! The processing delay is a deliberate throttle, not a timeout. Pauses wait on
//! the run's [`RunControl`] so a cancellation ends them immediately.

use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How a pacing pause ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Elapsed,
    Cancelled,
}

/// Cloneable cancellation handle shared by every processor of a run.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every pending pause.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks for `duration` unless cancellation is requested first.
    ///
    /// Runs on the blocking pool when a Tokio runtime is around and on a
    /// throwaway current-thread runtime otherwise. Must not be called from
    /// async code.
    pub fn wait_for(&self, duration: Duration) -> PauseOutcome {
        if self.token.is_cancelled() {
            return PauseOutcome::Cancelled;
        }
        if duration.is_zero() {
            return PauseOutcome::Elapsed;
        }
        let pause = async {
            tokio::select! {
                _ = self.token.cancelled() => PauseOutcome::Cancelled,
                _ = tokio::time::sleep(duration) => PauseOutcome::Elapsed,
            }
        };
        match Handle::try_current() {
            Ok(handle) => handle.block_on(pause),
            Err(_) => match Builder::new_current_thread().enable_time().build() {
                Ok(runtime) => runtime.block_on(pause),
                Err(error) => {
                    warn!(error = %error, "could not start a pacing runtime; skipping pause");
                    PauseOutcome::Elapsed
                }
            },
        }
    }
}

/// Performs the pause inserted after each actor.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration, control: &RunControl) -> PauseOutcome;
}

/// Default pacer: blocks the calling thread on the run control.
#[derive(Debug, Default, Clone, Copy)]
pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&self, duration: Duration, control: &RunControl) -> PauseOutcome {
        control.wait_for(duration)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_elapses_without_cancellation() {
        let control = RunControl::new();
        let started = Instant::now();
        assert_eq!(control.wait_for(Duration::from_millis(20)), PauseOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_interrupts_a_pending_wait() {
        let control = RunControl::new();
        let remote = control.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let started = Instant::now();
        assert_eq!(control.wait_for(Duration::from_secs(30)), PauseOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(30));
        canceller.join().expect("join canceller");
    }

    #[tokio::test]
    async fn blocking_pool_wait_wakes_on_cancel() {
        let control = RunControl::new();
        let waiting = control.clone();
        let pause = tokio::task::spawn_blocking(move || waiting.wait_for(Duration::from_secs(30)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        assert_eq!(pause.await.expect("join"), PauseOutcome::Cancelled);
    }

    #[test]
    fn cancelled_control_returns_immediately() {
        let control = RunControl::new();
        control.cancel();
        assert!(control.is_cancelled());
        assert_eq!(SleepPacer.pause(Duration::from_secs(30), &control), PauseOutcome::Cancelled);
    }
}
