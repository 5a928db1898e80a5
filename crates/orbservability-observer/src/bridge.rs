//! Execution retry loop
//!
//! Runs the script, drains its results into the table muxer, sleeps, and runs
//! it again. Failed attempts count against an error budget that is never
//! refilled; a compilation error stops the loop at once.

use crate::engine::{ErrorClass, ScriptError, ScriptExecutor, StreamStep};
use crate::mapper::EventSchema;
use crate::mux::TableMux;
use crate::outbound::EventSink;
use crate::telemetry::metrics;
use orbservability_common::ObserverConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Backoff and error budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after every attempt, successful or not
    pub sleep: Duration,
    /// Failed attempts tolerated; reaching it ends the loop
    pub max_errors: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &ObserverConfig) -> Self {
        Self {
            sleep: config.stream_sleep(),
            max_errors: config.max_error_count,
        }
    }
}

/// Error accounting for one bridge run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Attempts started so far
    pub attempts: u64,
    /// Failed attempts. Not reset by a later success.
    pub consecutive_errors: u32,
    pub last_error: Option<ScriptError>,
}

/// Why the bridge stopped for good
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("script cannot run: {0}")]
    Compilation(ScriptError),

    #[error("giving up after {errors} failed executions, last error: {last}")]
    BudgetExhausted { errors: u32, last: ScriptError },
}

enum Attempt {
    Completed,
    Failed(ScriptError),
    Cancelled,
}

/// Repeatedly executes one script and forwards its rows
pub struct Bridge<E: EventSchema> {
    executor: Box<dyn ScriptExecutor>,
    script: String,
    mux: TableMux<E>,
    policy: RetryPolicy,
    state: RetryState,
}

impl<E: EventSchema> Bridge<E> {
    pub fn new(
        executor: Box<dyn ScriptExecutor>,
        script: String,
        sink: Arc<dyn EventSink<E>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            executor,
            script,
            mux: TableMux::new(sink),
            policy,
            state: RetryState::default(),
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Run until cancelled (`Ok`) or terminated (`Err`).
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), BridgeError> {
        info!(
            sleep_secs = self.policy.sleep.as_secs(),
            max_errors = self.policy.max_errors,
            "Starting script execution loop"
        );

        loop {
            self.state.attempts += 1;
            let attempt = self.state.attempts;

            match self.attempt(&cancel).await {
                Attempt::Cancelled => break,
                Attempt::Completed => {
                    metrics::record_attempt("success", self.state.consecutive_errors);
                    info!(
                        attempt,
                        tables = self.mux.tables_accepted(),
                        "Script execution completed"
                    );
                }
                Attempt::Failed(e) if e.class() == ErrorClass::Terminal => {
                    metrics::record_attempt(e.kind(), self.state.consecutive_errors);
                    error!(attempt, error = %e, "Script execution cannot be retried");
                    return Err(BridgeError::Compilation(e));
                }
                Attempt::Failed(e) => {
                    self.state.consecutive_errors += 1;
                    metrics::record_attempt(e.kind(), self.state.consecutive_errors);
                    warn!(
                        attempt,
                        errors = self.state.consecutive_errors,
                        max_errors = self.policy.max_errors,
                        error = %e,
                        "Script execution failed"
                    );
                    self.state.last_error = Some(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.policy.sleep) => {}
            }

            if let Some(last) = &self.state.last_error {
                if self.state.consecutive_errors >= self.policy.max_errors {
                    return Err(BridgeError::BudgetExhausted {
                        errors: self.state.consecutive_errors,
                        last: last.clone(),
                    });
                }
            }
        }

        info!(attempts = self.state.attempts, "Script execution loop stopped");
        Ok(())
    }

    /// One execution: start it, drain it, close it.
    async fn attempt(&mut self, cancel: &CancellationToken) -> Attempt {
        let started = tokio::select! {
            _ = cancel.cancelled() => return Attempt::Cancelled,
            started = self.executor.execute_script(&self.script) => started,
        };
        let mut results = match started {
            Ok(results) => results,
            Err(e) => return Attempt::Failed(e),
        };

        let outcome = loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break Attempt::Cancelled,
                step = results.stream(&mut self.mux) => step,
            };

            match step {
                Ok(StreamStep::Continue) => {}
                Ok(StreamStep::Finished) => break Attempt::Completed,
                Err(e) if e.class() == ErrorClass::Benign => {
                    debug!(error = %e, "Result stream closed");
                    break Attempt::Completed;
                }
                Err(e @ ScriptError::Send(_)) if cancel.is_cancelled() => {
                    debug!(error = %e, "Ignoring send failure during shutdown");
                    break Attempt::Cancelled;
                }
                Err(e) => break Attempt::Failed(e),
            }
        };

        results.close().await;
        outcome
    }
}
