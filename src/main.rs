use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use courier::auth::TokenVerifier;
use courier::channel::{KafkaEventPublisher, KafkaEventSource};
use courier::config::Config;
use courier::errors::DeliveryError;
use courier::gateway::{self, GatewayState};
use courier::ingest::Ingest;
use courier::logging::{LogConfig, LogQueue};
use courier::metrics::DeliveryMetrics;
use courier::notify::LogNotifier;
use courier::presence::RedisPresenceStore;
use courier::processor::Processor;
use courier::registry::ConnectionRegistry;
use courier::store::PostgresMessageStore;
use courier::{clog_error, clog_info};

#[tokio::main]
async fn main() -> Result<(), DeliveryError> {
    let config = Config::from_env()?;
    LogQueue::init(LogConfig {
        level: config.log_level,
        ..LogConfig::default()
    });

    let metrics = Arc::new(DeliveryMetrics::new());
    let registry = Arc::new(ConnectionRegistry::new());

    let store = Arc::new(PostgresMessageStore::connect(
        &config.database_url,
        config.db_pool_size,
    )?);
    store.migrate().await?;
    clog_info!("message store ready");

    let presence = Arc::new(RedisPresenceStore::connect(&config.redis_url)?);

    let publisher = Arc::new(KafkaEventPublisher::connect(
        &config.kafka_brokers,
        &config.kafka_topic,
        config.publish_timeout,
    )?);
    let source = KafkaEventSource::connect(
        &config.kafka_brokers,
        &config.kafka_group_id,
        &config.kafka_topic,
        &config.kafka_offset_reset,
    )?;
    clog_info!(
        "durable channel connected ({}, topic {})",
        config.kafka_brokers,
        config.kafka_topic
    );

    let state = Arc::new(GatewayState {
        registry: registry.clone(),
        auth: Arc::new(TokenVerifier::new(&config.jwt_secret)),
        presence: presence.clone(),
        ingest: Arc::new(Ingest::new(publisher, metrics.clone())),
        store: store.clone(),
        metrics: metrics.clone(),
        presence_ttl: config.presence_ttl,
        heartbeat_interval: config.heartbeat_interval,
    });

    let shutdown = CancellationToken::new();

    // The processor shares the in-process registry, so a live push reaches
    // connections owned by this gateway instance.
    let processor = Processor::new(
        store,
        presence,
        registry,
        Arc::new(LogNotifier),
        metrics.clone(),
    );
    let processor_shutdown = shutdown.clone();
    let processor_task = tokio::spawn(async move {
        processor.run(&source, processor_shutdown).await;
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| DeliveryError::Config(format!("bind {}: {}", config.bind_addr, e)))?;
    clog_info!("gateway listening on {}", config.bind_addr);

    let serve_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, gateway::app(state))
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await;
        if let Err(err) = result {
            clog_error!("server error: {}", err);
        }
    });

    shutdown_signal().await;
    clog_info!("shutdown signal received, draining");
    shutdown.cancel();

    let _ = server_task.await;
    let _ = processor_task.await;

    clog_info!("final counters:\n{}", metrics.snapshot().to_string_pretty());
    LogQueue::shutdown();
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
