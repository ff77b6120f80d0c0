//! rwaf - Main entry point
//!
//! Starts the HTTP surface and the background flushers for bans and
//! journals, and drains them once on shutdown.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rwaf::{bootstrap, routes, Config, Waf};

/// Upper bound for /check payloads; encoded upload bodies can exceed the
/// 10 MiB raw limit they are checked against.
const JSON_BODY_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Debug, Parser)]
#[command(name = "rwaf", about = "WAF decision service", version)]
struct Args {
    /// Path to the JSON config file
    #[arg(long, default_value = "./data/config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = Arc::new(Config::load(&args.config)?);

    bootstrap::ensure_layout(&args.config, &config)
        .with_context(|| format!("failed to prepare data layout under {}", config.base_dir.display()))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rwaf");

    let waf = Arc::new(Waf::new(config.clone()));

    // Background flushers: dirty bans and buffered journal entries land on
    // disk within a couple of seconds of acceptance.
    let bans = waf.bans.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            bans.flush();
        }
    });
    let alerts = waf.alerts.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            alerts.flush();
        }
    });
    let traffic = waf.traffic.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(2));
        loop {
            interval.tick().await;
            traffic.flush();
        }
    });

    let server_addr = config.server_addr();
    info!(address = %server_addr, "Starting HTTP server");

    let app_waf = waf.clone();
    let app_config = config.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::JsonConfig::default().limit(JSON_BODY_LIMIT))
            .app_data(web::Data::from(app_waf.clone()))
            .app_data(web::Data::new((*app_config).clone()))
            .configure(routes::configure)
    })
    .bind(&server_addr)
    .with_context(|| format!("failed to bind {server_addr}"))?
    .shutdown_timeout(30)
    .run()
    .await?;

    // Final drain so nothing buffered is lost on shutdown
    waf.traffic.flush();
    waf.alerts.flush();
    waf.bans.flush();
    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
