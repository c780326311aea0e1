use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use bridge_api::endpoint::EndpointFactory;
use bridge_engine::SessionContext;
use bridge_engine::config::{BridgeConfig, BrokerConfig, BrokerKind};
use broker_kafka::{KafkaEndpointFactory, KafkaOptions};
use broker_memory::{MemoryBroker, MemoryBrokerOptions};

/// How long live sessions get to tear down after the listener stopped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "bridge-server", about = "WebSocket to Kafka topic bridge")]
struct Cli {
    /// Path to TOML configuration file. Defaults apply without one.
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides `bind_address` from the config.
    #[arg(long, env = "BRIDGE_BIND")]
    bind: Option<String>,
}

fn build_factory(broker: &BrokerConfig) -> Arc<dyn EndpointFactory> {
    match broker.kind {
        BrokerKind::Kafka => Arc::new(KafkaEndpointFactory::new(KafkaOptions {
            seed_brokers: broker.seed_brokers.clone(),
            connect_timeout: Duration::from_millis(broker.connect_timeout_ms),
            max_poll_records: broker.max_poll_records,
            send_timeout: Duration::from_millis(broker.send_timeout_ms),
            auto_offset_reset: broker.auto_offset_reset.clone(),
            properties: broker.properties.clone(),
        })),
        BrokerKind::Memory => Arc::new(MemoryBroker::new(MemoryBrokerOptions {
            max_poll_records: broker.max_poll_records,
            start_at_latest: broker.auto_offset_reset == "latest",
            ..Default::default()
        })),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "failed to register SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(config = %path, "loading configuration");
            match BridgeConfig::load(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load config");
                    std::process::exit(1);
                }
            }
        }
        None => BridgeConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }

    tracing::info!(
        bind = %config.bind_address,
        broker = ?config.broker.kind,
        seeds = ?config.broker.seed_brokers,
        "starting bridge"
    );

    let shutdown = CancellationToken::new();
    let ctx = SessionContext {
        shutdown: shutdown.clone(),
        ..SessionContext::new(build_factory(&config.broker))
    };
    let registry = ctx.registry.clone();

    let bind = config.bind_address.clone();
    let mut server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { bridge_api_server::run(&bind, ctx, shutdown).await }
    });

    tracing::info!("bridge-server started, press Ctrl+C to stop");

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutting down...");
        }
        result = &mut server => {
            match result {
                Ok(Ok(())) => tracing::warn!("gateway stopped unexpectedly"),
                Ok(Err(e)) => tracing::error!(error = %e, "gateway failed"),
                Err(e) => tracing::error!(error = %e, "gateway task panicked"),
            }
            shutdown.cancel();
            std::process::exit(1);
        }
    }

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "gateway failed during shutdown"),
        Err(e) => tracing::error!(error = %e, "gateway task panicked"),
    }

    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !registry.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !registry.is_empty() {
        tracing::warn!(sessions = registry.len(), "sessions still open at exit");
    }
    tracing::info!("bridge-server stopped");
}
