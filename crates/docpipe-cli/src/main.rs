use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docpipe_config::DocpipeConfig;
use docpipe_core::relay::{self, RelayConfig};
use docpipe_eventlog::RdKafkaEventLog;
use docpipe_store::{MigrationStore, OutboxRelayRepository, MIGRATOR};
use docpipe_types::MigrationStrategy;
use docpipe_webhook::WebhookConfig;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "docpipe", version)]
#[command(about = "Operator CLI for the docpipe outbox/pipeline stack")]
struct Cli {
    /// Path to docpipe.toml (defaults to ./docpipe.toml, falling back to built-in defaults)
    #[arg(long, default_value = "docpipe.toml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the database migrations (outbox, ledger, artifacts, migration tables).
    Migrate,
    /// Run the relay loop, moving outbox rows onto the event log.
    RelayRun,
    /// Print environment diagnostics: config, database reachability, broker reachability.
    Doctor,
    /// Migration job management.
    #[command(subcommand)]
    Migration(MigrationCommands),
}

#[derive(Subcommand, Debug)]
enum MigrationCommands {
    /// Create a new migration job.
    CreateJob {
        #[arg(long)]
        name: String,
        #[arg(long, value_enum, default_value = "copy")]
        strategy: StrategyArg,
        #[arg(long)]
        ruleset_name: String,
    },
    /// Enqueue a document under an existing job.
    EnqueueItem {
        #[arg(long)]
        job_id: Uuid,
        #[arg(long)]
        document_uuid: Uuid,
        #[arg(long)]
        expected_content_hash: String,
        #[arg(long, default_value_t = 5)]
        max_attempts: i32,
    },
    /// Mark a job as started.
    StartJob {
        #[arg(long)]
        job_id: Uuid,
    },
    /// Print a job's current status and item counts.
    Status {
        #[arg(long)]
        job_id: Uuid,
    },
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum StrategyArg {
    Copy,
    Move,
}

impl From<StrategyArg> for MigrationStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Copy => MigrationStrategy::Copy,
            StrategyArg::Move => MigrationStrategy::Move,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = DocpipeConfig::load_from_file(&cli.config)
        .unwrap_or_else(|_| DocpipeConfig::default());

    match cli.cmd {
        Commands::Migrate => run_migrate(&config).await,
        Commands::RelayRun => run_relay(&config).await,
        Commands::Doctor => run_doctor(&config).await,
        Commands::Migration(cmd) => run_migration_command(&config, cmd).await,
    }
}

async fn connect(config: &DocpipeConfig) -> Result<sqlx::PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .with_context(|| format!("failed to connect to database at {}", config.database.url))
}

async fn run_migrate(config: &DocpipeConfig) -> Result<()> {
    let pool = connect(config).await?;
    MIGRATOR.run(&pool).await.context("failed to run migrations")?;
    println!("migrations applied");
    Ok(())
}

async fn run_relay(config: &DocpipeConfig) -> Result<()> {
    let pool = connect(config).await?;
    let repository = Arc::new(OutboxRelayRepository::new(pool));
    let event_log: Arc<dyn docpipe_eventlog::EventLogClient> = Arc::new(
        RdKafkaEventLog::producer(&config.event_log.bootstrap_servers)
            .context("failed to build kafka producer")?,
    );
    let webhook_config = Arc::new(config.webhook.clone());

    let relay_config = RelayConfig {
        topic: "docpipe.revisions".to_string(),
        batch_size: config.relay.batch_size,
        max_attempts: config.relay.max_attempts,
        poll_interval: config.relay.poll_interval,
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    relay::run_forever(repository, event_log, webhook_config, relay_config, cancel).await;
    Ok(())
}

async fn run_doctor(config: &DocpipeConfig) -> Result<()> {
    println!("database.url: {}", config.database.url);
    match connect(config).await {
        Ok(_) => println!("database: reachable"),
        Err(e) => println!("database: unreachable ({e})"),
    }

    println!("event_log.bootstrap_servers: {}", config.event_log.bootstrap_servers);
    match RdKafkaEventLog::producer(&config.event_log.bootstrap_servers) {
        Ok(_) => println!("event_log: client constructed"),
        Err(e) => println!("event_log: failed to construct client ({e})"),
    }

    println!("webhook.enabled: {}", config.webhook.enabled);
    println!("relay.max_attempts: {}", config.relay.max_attempts);
    println!("worker.dlq_after_attempts: {}", config.worker.dlq_after_attempts);
    println!(
        "ruleset.draft_statuses: {:?}",
        config.ruleset.draft_statuses
    );

    Ok(())
}

async fn run_migration_command(config: &DocpipeConfig, cmd: MigrationCommands) -> Result<()> {
    let pool = connect(config).await?;
    let store = MigrationStore::new(pool);

    match cmd {
        MigrationCommands::CreateJob {
            name,
            strategy,
            ruleset_name,
        } => {
            let job_id = Uuid::new_v4();
            store
                .create_job(job_id, &name, strategy.into(), &ruleset_name)
                .await?;
            println!("job_id: {job_id}");
        }
        MigrationCommands::EnqueueItem {
            job_id,
            document_uuid,
            expected_content_hash,
            max_attempts,
        } => {
            store
                .enqueue_item(job_id, document_uuid, &expected_content_hash, max_attempts)
                .await?;
            println!("enqueued {document_uuid} under job {job_id}");
        }
        MigrationCommands::StartJob { job_id } => {
            store.start_job(job_id).await?;
            println!("job {job_id} started");
        }
        MigrationCommands::Status { job_id } => {
            let job = store
                .get_job(job_id)
                .await?
                .context("job not found")?;
            let open = store.count_open_items(job_id).await?;
            println!("job_id: {}", job.job_id);
            println!("name: {}", job.name);
            println!("status: {:?}", job.status);
            println!(
                "total={} completed={} failed={} skipped={} open={}",
                job.total_items, job.completed_items, job.failed_items, job.skipped_items, open
            );
        }
    }
    Ok(())
}
