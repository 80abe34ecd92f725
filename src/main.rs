#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

mod bridge;
mod cli;
mod config;
mod discord;
mod logging;
mod store;
mod web;

use bridge::DonationBridge;
use config::Config;
use discord::{DiscordClient, Notifier, Roster};
use store::MembershipStore;
use web::WebServer;

const EVENT_QUEUE_DEPTH: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = Arc::new(Config::load_from_file(&cli.config)?);
    logging::init_tracing(&config.logging);
    info!("kofi-discord donation bridge starting up");

    let membership_store = MembershipStore::new(&config.store.path);
    membership_store.ensure_exists().await?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let discord_client = Arc::new(DiscordClient::new(config.clone(), event_tx.clone()).await?);
    discord_client.start().await?;

    let donation_bridge = Arc::new(DonationBridge::new(
        config.clone(),
        membership_store,
        discord_client.clone() as Arc<dyn Roster>,
        discord_client.clone() as Arc<dyn Notifier>,
    ));
    donation_bridge.announce_connected().await;

    let web_server = WebServer::new(config.clone(), event_tx);
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let sweeper_bridge = donation_bridge.clone();
    let sweep_handle = tokio::spawn(async move {
        bridge::sweeper::run_scheduler(sweeper_bridge).await;
    });

    let dispatch_handle = tokio::spawn(async move {
        donation_bridge.run(event_rx).await;
    });

    tokio::select! {
        _ = web_handle => {},
        _ = sweep_handle => {},
        _ = dispatch_handle => {},
    }

    discord_client.stop().await?;
    info!("kofi-discord donation bridge shutting down");
    Ok(())
}
