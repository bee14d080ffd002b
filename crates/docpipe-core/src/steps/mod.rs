pub mod embeddings;
pub mod llm_summary;
pub mod search_index;

use std::collections::HashMap;

use async_trait::async_trait;
use docpipe_types::RevisionEvent;

use crate::error::PipelineError;

/// What a step reported after being invoked once for an event.
#[derive(Debug)]
pub enum StepOutcome {
    Ok {
        tokens: Option<u32>,
        duration_ms: u64,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: PipelineError,
    },
}

/// A registered pipeline step. Adding a step requires no executor changes —
/// just a registration entry here and a config schema (4.7.4).
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, event: &RevisionEvent, config: &serde_json::Value) -> StepOutcome;
}

/// String-keyed step registry, looked up by name from the ruleset's
/// pipeline list.
#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Box<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step: Box<dyn Step>) {
        self.steps.insert(step.name().to_string(), step);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Step> {
        self.steps.get(name).map(|s| s.as_ref())
    }
}
