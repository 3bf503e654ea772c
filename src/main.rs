mod config;
mod console;
mod dispatch;
mod engine;
mod error;
mod http;
mod models;
mod resolver;
mod session;
mod store;

use anyhow::Result;
use clap::Parser;
use config::Configuration;
use dispatch::Dispatcher;
use engine::Engine;
use http::HttpClient;
use resolver::MetadataResolver;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the conversation.
    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Cinelist v{}", env!("CARGO_PKG_VERSION"));

    let config = Configuration::load(&cli.config)?;

    let store = store::connect(&config).await?;
    store.init_schema().await?;
    info!("Using {} store", store.backend_name());

    let http_client = HttpClient::new(config.resolver_timeout())?;
    let resolver = MetadataResolver::from_config(&config, http_client);

    let engine = Arc::new(Engine::new(store, Arc::new(resolver)));
    let (dispatcher, outbound) = Dispatcher::new(engine);

    console::run(dispatcher, outbound).await?;

    info!("Shutting down");
    Ok(())
}
