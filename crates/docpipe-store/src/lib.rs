//! Postgres persistence for the outbox, the pipeline execution ledger,
//! derived artifacts, and migration jobs.
//!
//! Every repository here takes a `sqlx::PgPool` (or, for the outbox write
//! path, an open `sqlx::Transaction`) and has no knowledge of the event log
//! or the pipeline executor — those live in `docpipe-eventlog` and
//! `docpipe-core` respectively.

pub mod artifacts;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod outbox;

pub use artifacts::ArtifactStore;
pub use error::StoreError;
pub use ledger::PipelineLedger;
pub use migration::MigrationStore;
pub use outbox::{OutboxRelayRepository, OutboxWriter};

/// Embedded SQL migrations, applied with `sqlx::migrate!` against a fresh
/// or existing database at startup.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("src/migrations");
