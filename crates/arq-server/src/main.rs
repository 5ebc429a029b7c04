// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use arq_server::http::{AdminSignal, AdminState, build_admin_app};
use arq_server::{ArqonBusConfig, SocketBus};
use arq_storage::{MessageStorage, StorageConfig, StorageRegistry};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arqonbus", version, about = "ArqonBus real-time message bus")]
struct Args {
    /// Override the bind host (otherwise ARQONBUS_SERVER_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port (otherwise ARQONBUS_SERVER_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("arqonbus=debug,arq_server=debug,arq_routing=debug,arq_storage=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arqonbus=info,arq_server=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ArqonBusConfig::from_environment();
    if let Some(host) = args.host {
        config.server.host = Some(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    config.preflight().context("startup preflight")?;

    let storage = build_storage(&config).await?;
    let bus = SocketBus::new(config.clone(), storage)
        .map_err(|errors| anyhow::anyhow!("invalid CASIL configuration: {}", errors.join("; ")))?;

    let bind_host = config
        .server
        .host
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let bind = format!("{bind_host}:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, infra = ?config.infra_protocol, "arqonbus socket listening");

    let ws_bus = bus.clone();
    let ws_task = tokio::spawn(async move { arq_server::serve(ws_bus, listener).await });

    let (admin_state, mut admin_rx) = AdminState::new(config.http.api_key.clone());
    if config.http.enabled {
        let admin_bind = format!("{}:{}", config.http.host, config.http.port);
        let admin_listener = tokio::net::TcpListener::bind(&admin_bind)
            .await
            .with_context(|| format!("bind admin facade {admin_bind}"))?;
        info!(bind = %admin_bind, "admin facade listening");
        let app = build_admin_app(admin_state);
        tokio::spawn(async move { axum::serve(admin_listener, app).await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
        signal = admin_rx.recv() => {
            match signal {
                Some(AdminSignal::Shutdown) => info!("shutdown requested via admin facade"),
                Some(AdminSignal::Restart) => warn!("restart requested; exiting for the supervisor to relaunch"),
                None => {}
            }
        }
        result = ws_task => {
            match result {
                Ok(Ok(())) => info!("socket server exited"),
                Ok(Err(err)) => warn!(error = %err, "socket server failed"),
                Err(err) => warn!(error = %err, "socket server task failed"),
            }
        }
    }

    bus.shutdown().await;
    info!("arqonbus stopped");
    Ok(())
}

async fn build_storage(config: &ArqonBusConfig) -> Result<Option<MessageStorage>> {
    if !config.storage.enable_persistence {
        return Ok(None);
    }

    let registry = StorageRegistry::with_builtins();
    let backend = registry
        .create_backend(
            &config.storage.backend,
            StorageConfig {
                mode: config.storage.mode,
                max_size: config.storage.max_size,
                postgres_url: config.storage.postgres_url.clone(),
                valkey_url: config.storage.valkey_url.clone(),
            },
        )
        .await
        .with_context(|| format!("create storage backend {}", config.storage.backend))?;

    Ok(Some(MessageStorage::new(backend)))
}
