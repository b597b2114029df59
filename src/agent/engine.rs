//! Loop controller: drives plan → act iterations until `done`, a fatal
//! error, the retry budget, the iteration cap, or cancellation.

use std::sync::Arc;

use tokio::sync::watch;

use crate::agent::retry::RetryController;
use crate::config::AgentConfig;
use crate::errors::{PilotError, PilotResult};
use crate::executor::run::{BatchExecutor, BatchOutcome};
use crate::llm::dispatch::Dispatcher;
use crate::session::Session;
use crate::steplog::StepLogger;

pub struct AgentEngine {
    dispatcher: Arc<Dispatcher>,
    executor: Arc<BatchExecutor>,
    config: AgentConfig,
    /// Flips to true exactly once when the session is cancelled.
    cancel: watch::Receiver<bool>,
}

impl AgentEngine {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        executor: Arc<BatchExecutor>,
        config: AgentConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { dispatcher, executor, config, cancel }
    }

    /// Run the session to completion. The step log is flushed on every exit
    /// path, success or not.
    pub async fn run(
        &self,
        provider_id: &str,
        session: &mut Session,
        logger: &mut StepLogger,
    ) -> PilotResult<String> {
        tracing::info!(
            objective = %session.objective,
            provider = %provider_id,
            session_id = %session.id,
            "session started"
        );

        loop {
            if session.loop_count >= self.config.max_iterations {
                if let Err(flush) = logger.finish("failed: iteration limit reached") {
                    tracing::error!(error = %flush, "step log flush failed");
                }
                return Err(PilotError::IterationLimit(self.config.max_iterations));
            }

            let outcome = match self.iteration(provider_id, session, logger).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The session error wins over a flush failure.
                    if let Err(flush) = logger.finish(&format!("failed: {e}")) {
                        tracing::error!(error = %flush, "step log flush failed");
                    }
                    return Err(e);
                }
            };

            if outcome.consumed_iteration {
                session.loop_count += 1;
            }

            if let Some(summary) = outcome.done_summary {
                logger.finish("completed")?;
                tracing::info!(
                    summary = %summary,
                    iterations = session.loop_count,
                    total_secs = session.elapsed_secs(),
                    "session complete"
                );
                return Ok(summary);
            }
        }
    }

    /// One iteration with its own retry budget. Transient failures back off
    /// and re-request a fresh batch; fatal ones propagate immediately.
    async fn iteration(
        &self,
        provider_id: &str,
        session: &mut Session,
        logger: &mut StepLogger,
    ) -> PilotResult<BatchOutcome> {
        let mut retry = RetryController::new(&self.config);
        loop {
            match self.attempt(provider_id, session, logger).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => match retry.note_failure() {
                    Some(delay) => {
                        tracing::warn!(
                            error = %e,
                            failures = retry.failures(),
                            delay_secs = delay.as_secs_f64(),
                            "transient failure, backing off"
                        );
                        self.sleep_or_cancel(delay).await?;
                    }
                    None => {
                        return Err(PilotError::RetriesExhausted {
                            attempts: retry.failures(),
                            last: e.to_string(),
                        })
                    }
                },
            }
        }
    }

    async fn attempt(
        &self,
        provider_id: &str,
        session: &mut Session,
        logger: &mut StepLogger,
    ) -> PilotResult<BatchOutcome> {
        if *self.cancel.borrow() {
            return Err(PilotError::Cancelled);
        }
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.changed() => Err(PilotError::Cancelled),
            result = async {
                let operations = self
                    .dispatcher
                    .resolve_next_action(provider_id, session)
                    .await?;
                self.executor.run_batch(operations, session, logger).await
            } => result,
        }
    }

    async fn sleep_or_cancel(&self, delay: std::time::Duration) -> PilotResult<()> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.changed() => Err(PilotError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
