#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod buffer;
mod cli;
mod config;
mod discord;
mod events;
mod handlers;
mod scheduler;
mod utils;
mod warehouse;
mod web;

use buffer::{AggregationBuffer, FlushGroup};
use cli::Cli;
use config::Config;
use discord::DiscordClient;
use handlers::EventRouter;
use scheduler::{FlushScheduler, Flusher};
use warehouse::TableNames;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    utils::logging::init_tracing(&config.logging)?;

    if cli.check_config {
        info!("configuration at {} is valid", cli.config.display());
        return Ok(());
    }

    info!(
        "community metrics collector starting up for guild {}",
        config.discord.target_guild_id
    );

    let tables = TableNames::new(config.warehouse.table_prefix.as_deref());
    let warehouse = warehouse::open(&config.warehouse.path, tables.clone())
        .await
        .context("failed to prepare warehouse tables")?;

    let buffer = Arc::new(AggregationBuffer::new());
    let router = Arc::new(EventRouter::new(
        config.discord.target_guild_id,
        buffer.clone(),
    ));
    let flusher = Arc::new(Flusher::new(buffer.clone(), warehouse, tables));

    let (stop, shutdown) = watch::channel(false);
    let scheduler =
        tokio::spawn(FlushScheduler::new(flusher, config.schedule.clone()).run(shutdown));

    let web_handle = config.web.enabled.then(|| {
        let web_server = WebServer::new(config.web.clone(), buffer.clone());
        tokio::spawn(async move {
            if let Err(e) = web_server.start().await {
                error!("web server error: {e}");
            }
        })
    });

    let discord = DiscordClient::new(&config.discord, router);
    let (fatal, interrupted) = tokio::select! {
        started = discord.start() => (started.err(), false),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested before discord login completed");
            (None, true)
        }
    };

    if fatal.is_none() && !interrupted {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
    }

    info!("community metrics collector shutting down");
    let _ = stop.send(true);
    let (scheduler_result, discord_result) = futures::join!(scheduler, discord.stop());
    if let Err(err) = scheduler_result {
        error!("flush scheduler task failed: {err}");
    }
    if let Err(err) = discord_result {
        error!("failed to stop discord client: {err}");
    }
    if let Some(handle) = web_handle {
        handle.abort();
    }

    let discarded: usize = FlushGroup::ALL
        .into_iter()
        .map(|group| buffer.clear(group))
        .sum();
    if discarded > 0 {
        warn!("discarded {discarded} unflushed rows on shutdown");
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
