use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use queuewatch::config::{Overrides, Settings};
use queuewatch::duration::format_duration;
use queuewatch_adapters::rabbitmq::ManagementClient;
use queuewatch_exporter::server::DEFAULT_SHUTDOWN_GRACE;
use queuewatch_exporter::{serve, Poller, PollerConfig, QueueCollector, ServerState, SnapshotCache};

#[derive(Parser, Debug)]
#[command(name = "queuewatch", version)]
#[command(about = "Prometheus exporter for RabbitMQ queue health")]
struct Args {
    /// Path to a YAML config file (default: ./config.yaml or /etc/queuewatch/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RabbitMQ Management API URL (e.g., "http://localhost:15672")
    #[arg(long)]
    rabbitmq_url: Option<String>,

    /// Management API username
    #[arg(short, long)]
    username: Option<String>,

    /// Management API password
    #[arg(short, long)]
    password: Option<String>,

    /// Only export queues from this vhost
    #[arg(long)]
    vhost: Option<String>,

    /// Time between broker polls (e.g., "15s", "1m")
    #[arg(short, long)]
    scrape_interval: Option<String>,

    /// Port to serve /metrics on
    #[arg(long)]
    port: Option<u16>,

    /// Broker request timeout (e.g., "10s", "500ms")
    #[arg(short, long)]
    timeout: Option<String>,

    /// Log level when RUST_LOG is not set (e.g., "info", "queuewatch=debug")
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(self) -> Overrides {
        Overrides {
            config_file: self.config,
            rabbitmq_url: self.rabbitmq_url,
            username: self.username,
            password: self.password,
            vhost: self.vhost,
            scrape_interval: self.scrape_interval,
            listen_port: self.port,
            timeout: self.timeout,
            log_level: self.log_level,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(&args.overrides()).context("Invalid configuration")?;

    init_logging(&settings.log_level)?;
    run(settings).await
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    tracing::info!(
        rabbitmq_url = %settings.rabbitmq_url,
        vhost = settings.vhost.as_deref().unwrap_or("(all)"),
        scrape_interval = %format_duration(settings.scrape_interval),
        timeout = %format_duration(settings.timeout),
        port = settings.listen_port,
        "starting queuewatch"
    );
    tracing::debug!(?settings, "effective settings");

    let mut builder = ManagementClient::builder()
        .endpoint(settings.rabbitmq_url.as_str())
        .credentials(settings.username.as_str(), settings.password.as_str())
        .timeout(settings.timeout);
    if let Some(vhost) = &settings.vhost {
        builder = builder.vhost(vhost.as_str());
    }
    let client = Arc::new(builder.build().context("Failed to create RabbitMQ client")?);

    client
        .health_check(settings.timeout)
        .await
        .with_context(|| format!("Cannot reach RabbitMQ at {}", settings.rabbitmq_url))?;
    tracing::info!("connected to RabbitMQ");

    let cache = Arc::new(SnapshotCache::new());
    let collector = QueueCollector::new(
        cache.clone(),
        client.clone(),
        settings.thresholds.clone(),
        settings.scrape_interval,
    )
    .context("Failed to create metrics")?;
    let registry = Registry::new();
    registry
        .register(Box::new(collector))
        .context("Failed to register metrics")?;

    let poller = Poller::new(
        client.clone(),
        cache,
        PollerConfig {
            interval: settings.scrape_interval,
            ..PollerConfig::default()
        },
    )
    .start();

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.listen_port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            poller.stop().await;
            return Err(err).with_context(|| format!("Failed to listen on {}", addr));
        }
    };

    let state = Arc::new(
        ServerState::new(registry, client.clone()).with_health_timeout(settings.timeout),
    );
    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(
        listener,
        state,
        async move {
            let _ = server_stopped.await;
        },
        DEFAULT_SHUTDOWN_GRACE,
    ));

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    poller.stop().await;
    let _ = stop_server.send(());
    server.await.context("HTTP server task failed")?;

    // Last reference: closes idle pooled connections
    drop(client);
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
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
