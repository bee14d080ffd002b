//! First-match-wins ruleset matching (C5).
//!
//! `accumulate` is parsed but rejected at load time rather than silently
//! ignored: a ruleset file authored against a future accumulate-all
//! matcher should fail loudly, not quietly behave as first-match-wins.

use docpipe_types::{RevisionEvent, Ruleset, StepConfig};

use crate::error::PipelineError;

pub struct RulesetMatcher {
    rulesets: Vec<Ruleset>,
}

impl RulesetMatcher {
    pub fn new(rulesets: Vec<Ruleset>) -> Result<Self, PipelineError> {
        if let Some(bad) = rulesets.iter().find(|r| r.accumulate) {
            return Err(PipelineError::Invariant(format!(
                "ruleset '{}' declares accumulate = true, which this matcher does not support (first-match-wins only)",
                bad.name
            )));
        }
        Ok(Self { rulesets })
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, PipelineError> {
        #[derive(serde::Deserialize)]
        struct RulesetFile {
            #[serde(default)]
            rulesets: Vec<Ruleset>,
        }
        let file: RulesetFile = toml::from_str(toml_str)
            .map_err(|e| PipelineError::Invariant(format!("invalid ruleset file: {e}")))?;
        Self::new(file.rulesets)
    }

    /// Evaluate rulesets in declaration order; the first whose condition
    /// matches supplies the pipeline. `None` means acknowledge with no
    /// steps run — a success, not an error.
    pub fn match_event(&self, event: &RevisionEvent) -> Option<&[StepConfig]> {
        self.rulesets
            .iter()
            .find(|ruleset| ruleset.condition.matches(event))
            .map(|ruleset| ruleset.pipeline.as_slice())
    }
}
