use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reportline_core::config::ReportlineConfig;
use reportline_delivery::{
    DeliveryDispatcher, LocalFileSink, LogTransport, MailTransport, RetryPolicy, SmtpTransport,
};
use reportline_scheduler::{EngineSettings, ExecutionEngine, SystemClock, TickLoop};
use tracing::{info, warn};

mod app;
mod generator;
mod http;

/// Reportline gateway: scheduled report exports with an admin HTTP API.
#[derive(Parser, Debug)]
#[command(name = "reportline-gateway", version, about)]
struct Cli {
    /// Configuration file (TOML). Defaults to $REPORTLINE_CONFIG, then
    /// ~/.reportline/reportline.toml.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "reportline_gateway=info,reportline_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > REPORTLINE_CONFIG env > ~/.reportline/reportline.toml
    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("REPORTLINE_CONFIG").ok());
    let config = ReportlineConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ReportlineConfig::default()
    });

    // initialize SQLite database
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let conn = reportline_scheduler::open_shared(db)?;
    info!("database migrations complete");

    let settings = EngineSettings::from(&config.scheduler);
    let generator =
        generator::HttpReportGenerator::new(&config.generator, settings.generation_timeout)?;
    let dispatcher = build_dispatcher(&config)?;

    let engine = Arc::new(ExecutionEngine::new(
        conn,
        Arc::new(generator),
        Arc::new(dispatcher),
        Arc::new(SystemClock),
        settings,
    ));
    engine.recover_interrupted()?;

    let ticker = TickLoop::new(
        Arc::clone(&engine),
        Duration::from_secs(config.scheduler.tick_secs.max(1)),
    )
    .start();

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, engine));
    let router = app::build_router(state);

    info!("Reportline gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // stop scheduling; runs already in flight are not awaited
    ticker.stop().await;
    Ok(())
}

/// Mail goes through SMTP when a relay is configured, otherwise it is only
/// logged.
fn build_dispatcher(config: &ReportlineConfig) -> anyhow::Result<DeliveryDispatcher> {
    let delivery = &config.delivery;
    let mail: Arc<dyn MailTransport> = match delivery.smtp {
        Some(ref smtp) => {
            info!(host = %smtp.host, port = smtp.port, "SMTP delivery enabled");
            Arc::new(SmtpTransport::new(smtp, &delivery.from_address)?)
        }
        None => {
            warn!("no [delivery.smtp] configured; mail will only be logged");
            Arc::new(LogTransport)
        }
    };

    let files = match delivery.output_root {
        Some(ref root) => LocalFileSink::confined_to(root),
        None => LocalFileSink::new(),
    };

    let retry = RetryPolicy {
        attempts: delivery.mail_retry_attempts,
        base_delay: Duration::from_millis(delivery.mail_retry_base_ms),
        ..RetryPolicy::default()
    };

    Ok(DeliveryDispatcher::new(mail, Arc::new(files)).with_retry(retry))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
