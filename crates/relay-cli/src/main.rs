use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use relay_core::impls::{JetStreamSink, PostgresRecordStore};
use relay_core::ports::{DeliverySink, RecordStore};
use relay_core::{
    ClaimPolicy, RelayConfig, RelayError, RelayWorker, ServiceEnvironment, WorkerPool,
    init_tracing, requeue_failed,
};
use tracing::{error, info, warn};

/// Transactional outbox relay (PostgreSQL → NATS JetStream).
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Relay until Ctrl-C / SIGTERM (default)
    Run,
    /// Print record counts per status
    Status,
    /// Reset failed records to pending
    Requeue {
        /// Only these ids (repeatable). Without --id every failed record is requeued.
        #[arg(long = "id")]
        ids: Vec<String>,
    },
}

/// Flags override the JSON file; environment variables stand in for missing flags.
#[derive(Debug, Args)]
struct Settings {
    /// JSON config file
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "SERVICE_NAME")]
    service_name: Option<String>,

    /// dev | test | prod
    #[arg(long, global = true, env = "SERVICE_ENVIRONMENT")]
    service_environment: Option<ServiceEnvironment>,

    #[arg(long, global = true, env = "POSTGRESQL_URL")]
    database_url: Option<String>,

    #[arg(long, global = true, env = "NATS_URL")]
    broker_url: Option<String>,

    #[arg(long, global = true, env = "OUTBOX_TABLE")]
    outbox_table: Option<String>,

    /// Milliseconds between iterations
    #[arg(long, global = true, env = "POLLING_INTERVAL")]
    polling_interval: Option<u64>,

    #[arg(long, global = true, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    #[arg(long, global = true, env = "WORKER_COUNT")]
    worker_count: Option<usize>,

    #[arg(long, global = true, env = "RETRY_LIMIT")]
    retry_limit: Option<u32>,

    /// unpublished | pending_only
    #[arg(long, global = true, env = "CLAIM_POLICY")]
    claim_policy: Option<ClaimPolicy>,
}

impl Settings {
    fn resolve(self) -> Result<RelayConfig, RelayError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_json_file(path)?,
            None => RelayConfig::default(),
        };

        if let Some(v) = self.service_name {
            config.service_name = v;
        }
        if let Some(v) = self.service_environment {
            config.service_environment = v;
        }
        if let Some(v) = self.database_url {
            config.database_url = v;
        }
        if let Some(v) = self.broker_url {
            config.broker_url = v;
        }
        if let Some(v) = self.outbox_table {
            config.outbox_table = v;
        }
        if let Some(v) = self.polling_interval {
            config.polling_interval_ms = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.worker_count {
            config.worker_count = v;
        }
        if let Some(v) = self.retry_limit {
            config.retry_limit = v;
        }
        if let Some(v) = self.claim_policy {
            config.claim_policy = v;
        }

        Ok(config)
    }
}

impl Command {
    /// `run` needs the broker; `status` and `requeue` only touch the table.
    fn validate(&self, config: &RelayConfig) -> Result<(), RelayError> {
        match self {
            Command::Run => config.validate(),
            Command::Status | Command::Requeue { .. } => config.validate_store(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    let cli = Cli::parse();
    let config = cli.settings.resolve()?;
    let command = cli.command.unwrap_or(Command::Run);
    command.validate(&config)?;
    init_tracing(config.service_environment);

    match command {
        Command::Run => run(config).await,
        Command::Status => status(config).await,
        Command::Requeue { ids } => requeue(config, ids).await,
    }
}

async fn connect_store(config: &RelayConfig) -> Result<PostgresRecordStore, RelayError> {
    // ワーカーごとに 1 トランザクション + status 用に 1
    let max_connections = u32::try_from(config.worker_count + 1).unwrap_or(u32::MAX);
    PostgresRecordStore::connect(
        &config.database_url,
        max_connections,
        &config.outbox_table,
        config.claim_policy,
    )
    .await
}

async fn run(config: RelayConfig) -> Result<(), RelayError> {
    info!(
        service = %config.service_name,
        env = %config.service_environment,
        table = %config.outbox_table,
        workers = config.worker_count,
        batch_size = config.batch_size,
        polling_interval_ms = config.polling_interval_ms,
        claim_policy = ?config.claim_policy,
        "starting outbox relay"
    );

    let store = Arc::new(connect_store(&config).await?);
    let sink = Arc::new(JetStreamSink::connect(&config.broker_url, &config.service_name).await?);
    sink.ensure_topic().await?;

    let worker = Arc::new(RelayWorker::new(store, sink, config.batch_size));
    let pool = WorkerPool::spawn(worker, config.worker_count, config.polling_interval());

    shutdown_signal().await;
    info!("shutdown requested, waiting for in-flight iterations");

    let exit = pool.shutdown_and_join().await;
    if !exit.is_clean() {
        warn!(panicked = ?exit.panicked, "some relay workers had died before shutdown");
    }
    Ok(())
}

async fn status(config: RelayConfig) -> Result<(), RelayError> {
    let store = connect_store(&config).await?;
    let counts = store.counts_by_status().await?;

    println!(
        "{}",
        serde_json::json!({
            "service": config.service_name,
            "table": config.outbox_table,
            "pending": counts.pending,
            "published": counts.published,
            "failed": counts.failed,
            "total": counts.total(),
        })
    );
    Ok(())
}

async fn requeue(config: RelayConfig, ids: Vec<String>) -> Result<(), RelayError> {
    let store = Arc::new(connect_store(&config).await?);
    let ids = ids.into_iter().map(Into::into).collect();
    let count = requeue_failed(store, ids).await?;
    println!("requeued {count} record(s)");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_build_a_valid_config() {
        let cli = Cli::try_parse_from([
            "relay",
            "--service-name",
            "orders",
            "--database-url",
            "postgres://localhost/orders",
            "--broker-url",
            "nats://localhost:4222",
            "--worker-count",
            "2",
            "--claim-policy",
            "pending_only",
            "status",
        ])
        .unwrap();

        assert!(matches!(cli.command, Some(Command::Status)));
        let config = cli.settings.resolve().unwrap();
        Command::Run.validate(&config).unwrap();
        assert_eq!(config.service_name, "orders");
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.claim_policy, ClaimPolicy::PendingOnly);
        assert_eq!(config.batch_size, 1000);
    }

    #[test]
    fn operator_commands_do_not_need_a_broker() {
        let cli = Cli::try_parse_from([
            "relay",
            "--service-name",
            "orders",
            "--database-url",
            "postgres://localhost/orders",
            "--broker-url",
            "",
            "status",
        ])
        .unwrap();
        let command = cli.command.unwrap();
        let config = cli.settings.resolve().unwrap();

        command.validate(&config).unwrap();
        Command::Requeue { ids: vec![] }.validate(&config).unwrap();
        assert!(matches!(
            Command::Run.validate(&config),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn requeue_takes_repeated_ids() {
        let cli = Cli::try_parse_from(["relay", "requeue", "--id", "a", "--id", "b"]).unwrap();
        match cli.command {
            Some(Command::Requeue { ids }) => assert_eq!(ids, vec!["a", "b"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
