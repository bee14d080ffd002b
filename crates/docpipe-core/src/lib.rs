//! docpipe-core: the consumer side of the pipeline — ruleset matching,
//! step execution, the relay, the consumer worker, and the migration
//! sub-core. Everything here is storage/event-log agnostic except through
//! the `docpipe-store`/`docpipe-eventlog` crates it depends on.

pub mod error;
pub mod executor;
pub mod migration;
pub mod ports;
pub mod relay;
pub mod ruleset;
pub mod steps;
pub mod worker;

pub use error::PipelineError;
pub use executor::{Disposition, PipelineExecutor, StepResult};
pub use ruleset::RulesetMatcher;
pub use steps::{Step, StepOutcome, StepRegistry};
