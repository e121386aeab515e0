use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use podvm_adaptor::config::{Cli, Config};
use podvm_adaptor::sandbox::{
    ForwardingProxyFactory, PassthroughWorkerNode, PodVmService, ProviderRegistry, ServiceSettings,
};
use podvm_adaptor::server;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let config = Config::from_cli(Cli::parse());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("podvm_adaptor=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();

    let _guard = config.sentry_dsn.clone().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.environment.clone().into()),
                traces_sample_rate: 0.2,
                enable_logs: true,
                ..Default::default()
            },
        ))
    });

    tracing::info!(
        backend = %config.backend,
        socket = %config.socket.display(),
        provider = ?config.provider,
        "starting podvm-adaptor"
    );

    let provider = ProviderRegistry::with_builtin()
        .build(&config.backend, config.provider.clone())
        .with_context(|| format!("failed to initialize {} provider", config.backend))?;

    tokio::fs::create_dir_all(&config.pods_dir)
        .await
        .with_context(|| format!("failed to create pods dir {}", config.pods_dir.display()))?;

    let service = PodVmService::new(
        provider,
        Arc::new(PassthroughWorkerNode),
        Arc::new(ForwardingProxyFactory),
        ServiceSettings {
            pods_dir: config.pods_dir.clone(),
            daemon_port: config.daemon_port,
            poll: config.poll.clone(),
            provider: config.provider.clone(),
        },
    )
    .context("failed to construct pod VM service")?;

    let app = server::create_app(server::AppState {
        service: Arc::new(service),
    })
    .layer(SentryHttpLayer::new().enable_transaction())
    .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let listener = bind_socket(&config.socket)?;
    tracing::info!(socket = %config.socket.display(), "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bind the API socket, replacing a stale one left by a previous run.
fn bind_socket(path: &std::path::Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()));
        }
        _ => {}
    }
    UnixListener::bind(path).with_context(|| format!("failed to listen on {}", path.display()))
}
