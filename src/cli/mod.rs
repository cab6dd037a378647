use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::net::SocketAddr;

use crate::app::{router, AppState};
use crate::config::AppConfig;
use crate::database::models::user::{Role, User};
use crate::database::DatabaseManager;

#[derive(Parser)]
#[command(name = "tourbook")]
#[command(about = "Tourbook - tour booking API server")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Port to listen on (overrides PORT)")]
        port: Option<u16>,
    },

    #[command(about = "Apply pending database migrations")]
    Migrate,

    #[command(about = "Change the role of an existing account")]
    SetRole {
        #[arg(long, help = "Account email")]
        email: String,
        #[arg(long, help = "user, guide, lead-guide or admin")]
        role: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Migrate => migrate(config, output_format).await,
        Commands::SetRole { email, role } => set_role(config, &email, &role, output_format).await,
    }
}

async fn serve(mut config: AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if config.security.jwt_secret.is_empty() {
        return Err(anyhow!("JWT_SECRET must be set"));
    }

    let pool = DatabaseManager::connect(&config.database).await?;
    DatabaseManager::migrate(&pool).await?;

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let environment = config.environment;
    let state = AppState::new(pool, config);
    let cleanup = state
        .limiter
        .spawn_cleanup(std::time::Duration::from_secs(state.config.api.rate_limit_window_secs.max(60)));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Tourbook listening on http://{} ({:?})", bind_addr, environment);

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    cleanup.abort();

    result.context("server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

async fn migrate(config: AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = DatabaseManager::connect(&config.database).await?;
    DatabaseManager::migrate(&pool).await?;

    match output_format {
        OutputFormat::Json => println!("{}", json!({ "migrated": true })),
        OutputFormat::Text => println!("Migrations applied"),
    }
    Ok(())
}

async fn set_role(config: AppConfig, email: &str, role: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let role = Role::parse(role).ok_or_else(|| anyhow!("Unknown role '{}'", role))?;
    let pool = DatabaseManager::connect(&config.database).await?;

    let user = User::set_role(&pool, &email.to_lowercase(), role)
        .await?
        .ok_or_else(|| anyhow!("No user with email {}", email))?;

    match output_format {
        OutputFormat::Json => println!("{}", json!({ "id": user.id, "email": user.email, "role": user.role })),
        OutputFormat::Text => println!("{} is now {}", user.email, user.role),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::parse_from(["tourbook"]);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["tourbook", "serve", "--port", "8080"]);
        assert!(matches!(cli.command, Some(Commands::Serve { port: Some(8080) })));
    }

    #[test]
    fn set_role_takes_email_and_role() {
        let cli = Cli::parse_from(["tourbook", "--json", "set-role", "--email", "a@b.io", "--role", "admin"]);
        assert!(matches!(OutputFormat::from_cli(&cli), OutputFormat::Json));
        match cli.command {
            Some(Commands::SetRole { email, role }) => {
                assert_eq!(email, "a@b.io");
                assert_eq!(role, "admin");
            }
            _ => panic!("expected set-role"),
        }
    }
}
