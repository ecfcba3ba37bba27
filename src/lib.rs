#![doc = include_str!("../Readme.md")]
#![warn(clippy::all, clippy::pedantic, clippy::cargo, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod anchor;
pub mod app;
pub mod attestation;
pub mod claim;
pub mod config;
pub mod credential;
pub mod database;
pub mod federation;
pub mod identity;
pub mod merkle;
pub mod reputation;
pub mod server;
pub mod shutdown;
pub mod task_monitor;
pub mod utils;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::app::App;
use crate::database::Database;
use crate::shutdown::Shutdown;
use crate::task_monitor::TaskMonitor;

/// Top-level CLI options for the node binary. The config file path is the
/// only thing parsed by hand; every runtime setting lives in [`config::Config`]
/// and is layered in via `POHW__`-prefixed environment variables on top of it.
#[derive(Debug, Clone, Parser)]
pub struct Options {
    #[clap(flatten)]
    pub config: config::Options,
}

/// # Errors
///
/// Will return `Err` if the configuration cannot be loaded, the database
/// cannot be reached or migrated, or the server fails to bind.
pub async fn main(options: Options) -> anyhow::Result<()> {
    let config = config::load_config(options.config.config.as_deref())?;

    let shutdown = Shutdown::spawn(config.service.shutdown_timeout, config.service.shutdown_delay);

    let database = Arc::new(Database::new(&config.database).await?);

    let app = App::new(database, config.clone());

    TaskMonitor::init(app.clone(), shutdown.clone()).await;

    info!("Starting server");
    server::run(app, config.server, shutdown).await?;

    Ok(())
}
