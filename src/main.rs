use clap::Parser;
use tracing_subscriber::EnvFilter;

use tourbook::cli::{self, Cli};
use tourbook::config;

#[tokio::main]
async fn main() {
    // Load .env if present so DATABASE, JWT_SECRET etc. reach the config
    let _ = dotenvy::dotenv();
    let config = config::config().clone();

    let default_level = if config.is_production() { "info" } else { "debug" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("UNCAUGHT PANIC, shutting down: {}", info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();
    if let Err(e) = cli::run(cli, config).await {
        match std::env::var("TOURBOOK_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => tracing::error!("{e:?}"),
            _ => tracing::error!("{e:#}"),
        }
        std::process::exit(1);
    }
}
