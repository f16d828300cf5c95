use std::{process, sync::Arc};

use catalog_cache::{
    cache::{
        CacheInvalidator, DistributedTransport, InvalidationEpochs, InvalidationReport,
        LocalCache, RemoteCache, RemoteHealth, SystemClock,
    },
    config::{self, Command, PurgeTarget, Settings},
    infra::{error::InfraError, redis::RedisTransport, telemetry},
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum RunError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("distributed cache unreachable: {0}")]
    Unreachable(String),
    #[error("purge incomplete; surviving entries expire with their TTL")]
    IncompletePurge,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &RunError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), RunError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let remote = connect_remote(&settings).await?;
    match cli_args.command {
        Command::Ping => run_ping(&remote).await,
        Command::Purge(args) => run_purge(&settings, remote, args.target).await,
    }
}

async fn connect_remote(settings: &Settings) -> Result<RemoteCache, RunError> {
    let url = settings.redis.url.as_deref().ok_or_else(|| {
        InfraError::configuration("redis.url is required (set --redis-url or CATALOG_CACHE__REDIS__URL)")
    })?;

    let transport: Arc<dyn DistributedTransport> = Arc::new(RedisTransport::connect(url).await?);
    Ok(RemoteCache::new(transport, &settings.cache))
}

async fn run_ping(remote: &RemoteCache) -> Result<(), RunError> {
    match remote.health().await {
        RemoteHealth::Healthy => {
            info!("Distributed cache reachable");
            Ok(())
        }
        RemoteHealth::Disabled => {
            info!("Distributed cache disabled by configuration");
            Ok(())
        }
        RemoteHealth::Unreachable { reason } => Err(RunError::Unreachable(reason)),
    }
}

async fn run_purge(
    settings: &Settings,
    remote: RemoteCache,
    target: PurgeTarget,
) -> Result<(), RunError> {
    // This process holds no L1 entries of its own; the local tier is a stand-in.
    let local = Arc::new(LocalCache::new(&settings.cache, Arc::new(SystemClock)));
    let invalidator = CacheInvalidator::new(local, remote, Arc::new(InvalidationEpochs::new()));

    let report = match target {
        PurgeTarget::Product { id, slugs } => {
            invalidator.invalidate_product_slugs(id, &slugs).await
        }
        PurgeTarget::Categories => invalidator.invalidate_category_list().await,
        PurgeTarget::All => invalidator.invalidate_all().await,
    };

    finish_purge(&report)
}

fn finish_purge(report: &InvalidationReport) -> Result<(), RunError> {
    if !report.remote_complete {
        return Err(RunError::IncompletePurge);
    }

    info!(removed = report.remote_removed, "Purge finished");
    Ok(())
}
