//! ongkir-cache: caching front for the RajaOngkir shipping-rate API.
//!
//! Single-binary Tokio application that:
//! 1. Serves cached location and shipping-cost lookups over HTTP
//! 2. Exposes admin endpoints to warm, preload, inspect and sweep the cache
//! 3. Optionally re-warms and sweeps the cache on a fixed schedule

mod api;
mod app;
mod config;

use std::time::Duration;

use clap::{Parser, Subcommand};
use common::config::ServiceConfig;
use common::Error;
use rate_cache::{PreloadOptions, WarmKind};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::AppState;

/// Shipping-rate lookup cache
#[derive(Parser)]
#[command(name = "ongkir-cache", about = "Caching front for the RajaOngkir shipping-rate API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Run one warming pass and print the report.
    Warm {
        /// all, popular, searches or origin.
        #[arg(long, default_value = "all")]
        kind: String,
        /// Origin city for `--kind origin`; defaults to the saved shipping origin.
        #[arg(long)]
        origin_city_id: Option<String>,
    },
    /// Crawl the location tree into the cache.
    Preload {
        #[arg(long)]
        throttle_ms: Option<i64>,
        #[arg(long)]
        depth: Option<i64>,
    },
    /// Delete old entries, or every entry of one key group.
    Clear {
        #[arg(long)]
        days: Option<i64>,
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Print cache statistics.
    Stats,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Re-warm everything, refresh the origin matrix, then sweep old entries.
async fn warm_cycle(state: &AppState) {
    match state.warmer.warm(&WarmKind::All).await {
        Ok(report) => info!("{}", report.message),
        Err(e) => warn!("Scheduled warm failed: {}", e),
    }

    let origin = state.settings.get().await;
    match state.warmer.warm(&WarmKind::Origin(origin.city_id)).await {
        Ok(report) => info!("{}", report.message),
        Err(e) => warn!("Scheduled origin warm failed: {}", e),
    }

    match state.maintenance.clear_older_than(state.retention_days).await {
        Ok(report) => info!(
            deleted = report.deleted_count,
            cutoff = %report.cutoff,
            "Scheduled sweep complete"
        ),
        Err(e) => warn!("Scheduled sweep failed: {}", e),
    }
}

fn spawn_warm_loop(state: AppState, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Warm schedule enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            warm_cycle(&state).await;
        }
    });
}

async fn serve(cfg: &ServiceConfig) -> Result<(), Error> {
    let stores = app::open_stores(cfg)?;
    let api = app::upstream_client(cfg)?;
    let state = app::build_state(cfg, api, stores);

    if cfg.admin_token.is_empty() {
        warn!("ADMIN_TOKEN is not set; privileged endpoints will refuse every request");
    }
    if cfg.warm.interval_secs > 0 {
        spawn_warm_loop(state.clone(), Duration::from_secs(cfg.warm.interval_secs));
    }

    let listener = TcpListener::bind(&cfg.server.bind_addr).await?;
    info!("Listening on {}", cfg.server.bind_addr);
    axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn run(cli: Cli, cfg: ServiceConfig) -> Result<(), Error> {
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cfg).await,
        Command::Warm {
            kind,
            origin_city_id,
        } => {
            let state = app::build_state(&cfg, app::upstream_client(&cfg)?, app::open_stores(&cfg)?);
            let origin = match origin_city_id {
                Some(id) => Some(id),
                None if kind == "origin" => Some(state.settings.get().await.city_id),
                None => None,
            };
            let kind = WarmKind::parse(Some(&kind), origin.as_deref())?;
            print_json(&state.warmer.warm(&kind).await?)
        }
        Command::Preload { throttle_ms, depth } => {
            let options = PreloadOptions::new(throttle_ms, depth, &cfg.preload)?;
            let state = app::build_state(&cfg, app::upstream_client(&cfg)?, app::open_stores(&cfg)?);
            let summary = state.crawler.run(options).await?;
            print_json(&serde_json::json!({"message": "Preload complete", "summary": summary}))
        }
        Command::Clear { days, endpoint } => {
            let stores = app::open_stores(&cfg)?;
            let maintenance = rate_cache::Maintenance::new(stores.cache);
            match endpoint {
                Some(group) => {
                    let deleted = maintenance.clear_group(&group).await?;
                    print_json(&serde_json::json!({"success": true, "deleted_count": deleted, "endpoint": group}))
                }
                None => {
                    let report = maintenance
                        .clear_older_than(days.unwrap_or(i64::from(cfg.cache.retention_days)))
                        .await?;
                    print_json(&serde_json::json!({
                        "success": true,
                        "deleted_count": report.deleted_count,
                        "cutoff_date": report.cutoff,
                    }))
                }
            }
        }
        Command::Stats => {
            let stores = app::open_stores(&cfg)?;
            print_json(&stores.cache.stats(10).await?)
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ongkir_cache=info,rate_cache=info,rajaongkir_client=info,tower_http=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        database = %cfg.database_path,
        stale_on_error = cfg.cache.allow_stale_on_error,
        stale_while_revalidate = cfg.cache.stale_while_revalidate,
        "Configuration loaded"
    );

    if let Err(e) = run(cli, cfg).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
