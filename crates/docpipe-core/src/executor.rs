//! Pipeline executor (C6): runs a per-event step list against the
//! idempotency ledger, never parallelizing steps within one event.

use docpipe_store::PipelineLedger;
use docpipe_types::{RevisionEvent, StepConfig, StepStatus};

use crate::error::PipelineError;
use crate::steps::{StepOutcome, StepRegistry};

#[derive(Debug)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub error: Option<String>,
}

/// The composite disposition returned to the consumer worker, which
/// decides whether the log offset may be committed.
#[derive(Debug)]
pub enum Disposition {
    /// Every step reached a terminal state (ok, skipped, or
    /// failed-non-retryable). The offset may be committed.
    Terminal(Vec<StepResult>),
    /// At least one step returned a retryable failure. The offset must
    /// **not** be committed.
    Retry {
        results: Vec<StepResult>,
        retryable_step: String,
    },
}

pub struct PipelineExecutor<'a> {
    registry: &'a StepRegistry,
    ledger: &'a PipelineLedger,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(registry: &'a StepRegistry, ledger: &'a PipelineLedger) -> Self {
        Self { registry, ledger }
    }

    pub async fn execute(
        &self,
        event: &RevisionEvent,
        steps: &[StepConfig],
    ) -> Result<Disposition, PipelineError> {
        let mut results = Vec::with_capacity(steps.len());

        for step_config in steps {
            let already_done = self
                .ledger
                .is_done(event.document_uuid, &event.content_hash, &step_config.name)
                .await?;

            if already_done {
                results.push(StepResult {
                    step_name: step_config.name.clone(),
                    status: StepStatus::Skipped,
                    error: None,
                });
                continue;
            }

            let step = self.registry.get(&step_config.name).ok_or_else(|| {
                PipelineError::Invariant(format!(
                    "no step registered under name '{}'",
                    step_config.name
                ))
            })?;

            match step.execute(event, &step_config.params).await {
                StepOutcome::Ok { tokens, duration_ms } => {
                    self.ledger
                        .record(
                            event.document_uuid,
                            &event.content_hash,
                            &step_config.name,
                            StepStatus::Ok,
                            None,
                            tokens,
                            Some(duration_ms),
                        )
                        .await?;
                    results.push(StepResult {
                        step_name: step_config.name.clone(),
                        status: StepStatus::Ok,
                        error: None,
                    });
                }
                StepOutcome::Skipped { reason } => {
                    self.ledger
                        .record(
                            event.document_uuid,
                            &event.content_hash,
                            &step_config.name,
                            StepStatus::Skipped,
                            Some(&reason),
                            None,
                            None,
                        )
                        .await?;
                    results.push(StepResult {
                        step_name: step_config.name.clone(),
                        status: StepStatus::Skipped,
                        error: Some(reason),
                    });
                }
                StepOutcome::Failed { error } => {
                    if error.is_retryable() {
                        // Ledger is left unchanged: a retryable failure
                        // must not create a row the later successful
                        // attempt would treat as "already done".
                        results.push(StepResult {
                            step_name: step_config.name.clone(),
                            status: StepStatus::Failed,
                            error: Some(error.to_string()),
                        });
                        return Ok(Disposition::Retry {
                            results,
                            retryable_step: step_config.name.clone(),
                        });
                    }

                    self.ledger
                        .record(
                            event.document_uuid,
                            &event.content_hash,
                            &step_config.name,
                            StepStatus::Failed,
                            Some(&error.to_string()),
                            None,
                            None,
                        )
                        .await?;
                    results.push(StepResult {
                        step_name: step_config.name.clone(),
                        status: StepStatus::Failed,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        Ok(Disposition::Terminal(results))
    }
}
