use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use spatial_store::config::StoreConfig;
use spatial_store::context::NodeContext;
use spatial_store::distribution::{CoordinationService, InMemoryCoordinator, InstanceId};
use spatial_store::error::RecoveryError;
use spatial_store::recovery::{HttpPeerClient, RecoveryService};
use spatial_store::storage::handlers::*;
use spatial_store::storage::protocol::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct GroupArg {
    name: String,
    dimension: usize,
}

fn parse_group(raw: &str) -> anyhow::Result<GroupArg> {
    let (name, dimension) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected <name>:<dimensions>, got {}", raw))?;
    Ok(GroupArg {
        name: name.to_string(),
        dimension: dimension.parse()?,
    })
}

fn next_value<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} needs a value", args[i]))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--config <file>] [--data <dir>]... [--group <name>:<dims>]... [--replica <addr:port>]...",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000 --data /tmp/node1 --group geo:2", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --data /tmp/node2 --group geo:2 --replica 127.0.0.1:5000",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut data_dirs: Vec<PathBuf> = vec![];
    let mut groups: Vec<GroupArg> = vec![];
    let mut replicas: Vec<InstanceId> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(next_value(&args, i)?.parse()?);
                i += 2;
            }
            "--config" => {
                config_file = Some(PathBuf::from(next_value(&args, i)?));
                i += 2;
            }
            "--data" => {
                data_dirs.push(PathBuf::from(next_value(&args, i)?));
                i += 2;
            }
            "--group" => {
                groups.push(parse_group(next_value(&args, i)?)?);
                i += 2;
            }
            "--replica" => {
                replicas.push(InstanceId::new(next_value(&args, i)?));
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;

    // 1. Configuration:
    let mut config = match config_file {
        Some(path) => StoreConfig::from_file(&path)?,
        None => StoreConfig::default(),
    };
    if !data_dirs.is_empty() {
        config.storage_directories = data_dirs;
    }
    config.validate()?;

    let local = InstanceId::new(bind_addr.to_string());
    tracing::info!("Starting node {}", local);
    tracing::info!("Storage directories: {:?}", config.storage_directories);

    // 2. Coordination and storage:
    let coordinator: Arc<dyn CoordinationService> = Arc::new(InMemoryCoordinator::new());
    let ctx = NodeContext::new(local.clone(), config, coordinator)?;

    // 3. Distribution groups:
    let mut group_replicas = vec![local.clone()];
    group_replicas.extend(replicas);

    for group in &groups {
        ctx.create_group(&group.name, group.dimension, group_replicas.clone())?;
        tracing::info!("Serving group {} ({} dimensions)", group.name, group.dimension);
    }

    // 4. Recovery:
    let recovery = RecoveryService::new(ctx.clone(), Arc::new(HttpPeerClient::default()));
    match recovery.run().await {
        Ok(report) => tracing::info!("Recovery finished: {:?}", report),
        Err(e @ RecoveryError::VersionMismatch { .. }) => {
            tracing::error!("Refusing to serve divergent data: {}", e);
            std::process::exit(2);
        }
        Err(e) => tracing::warn!("Recovery incomplete: {}", e),
    }

    // 5. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_PUT, post(handle_put))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(&format!("{}/:table/:key", ENDPOINT_GET), get(handle_get))
        .route(ENDPOINT_QUERY, post(handle_query))
        .route(ENDPOINT_INSERTED_SINCE, post(handle_inserted_since))
        .layer(Extension(ctx.clone()));

    // 6. Spawn compaction:
    let compaction_interval = ctx.config().compaction_interval_ms;
    if compaction_interval > 0 {
        let compaction_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(compaction_interval));

            loop {
                interval.tick().await;
                let registry = compaction_ctx.registry().clone();
                let result = tokio::task::spawn_blocking(move || {
                    for engine in registry.active_engines() {
                        if let Err(e) = engine.compact() {
                            tracing::warn!("Compaction of {} failed: {}", engine.name(), e);
                        }
                    }
                })
                .await;

                if let Err(e) = result {
                    tracing::error!("Compaction task panicked: {}", e);
                }
            }
        });
    }

    // 7. Spawn stats reporter:
    let stats_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;
            let registry = stats_ctx.registry();
            tracing::info!(
                "Storage stats: {} known table(s), {} open",
                registry.all_tables().len(),
                registry.active_engines().len()
            );
        }
    });

    // 8. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Unable to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down storage");
    let shutdown_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || shutdown_ctx.shutdown()).await?;

    Ok(())
}
