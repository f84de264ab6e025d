use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use crate::auth::{issue_session_token, JwtVerifier, SessionClaims};
use crate::config::AppConfig;
use crate::database::{MemoryStore, PgStore, Store};
use crate::email::ResendMailer;
use crate::server::app;
use crate::state::AppState;
use crate::webhooks::WebhookVerifier;

#[derive(Parser)]
#[command(name = "mylife-gateway")]
#[command(about = "Mobile backend gateway - entity sync, identity webhooks and email")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Port to bind (overrides PORT)")]
        port: Option<u16>,
    },

    #[command(about = "Mint a session token for local testing (development only)")]
    Token {
        #[arg(help = "Subject (user id) to embed")]
        subject: String,
        #[arg(long, help = "Lifetime in hours")]
        hours: Option<u64>,
    },
}

pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Token { subject, hours } => token(&config, subject, hours),
    }
}

async fn serve(mut config: AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let (store, pg) = match config.database.url.as_deref() {
        Some(url) => {
            let pg = Arc::new(PgStore::connect(url, &config.database).await?);
            (pg.clone() as Arc<dyn Store>, Some(pg))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; using the in-memory store (data is lost on exit)");
            (Arc::new(MemoryStore::new()) as Arc<dyn Store>, None)
        }
    };

    let verifier = JwtVerifier::from_config(&config.security).context("invalid AUTH_SECRET_KEY")?;
    let webhooks = match config.security.webhook_secret.as_deref() {
        Some(secret) => match WebhookVerifier::new(secret) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(error = %e, "WEBHOOK_SECRET is unusable; webhook route will answer 500");
                None
            }
        },
        None => {
            tracing::warn!("WEBHOOK_SECRET is not set; webhook route will answer 500");
            None
        }
    };
    let mailer = ResendMailer::from_config(&config.email);

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let state = AppState::new(config, store, Arc::new(verifier), webhooks, mailer);
    tracing::info!(environment = ?state.config.environment, "Starting gateway");

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(pg) = pg {
        pg.close().await;
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn token(config: &AppConfig, subject: String, hours: Option<u64>) -> anyhow::Result<()> {
    anyhow::ensure!(config.is_development(), "token minting is only available in development");

    let hours = hours.unwrap_or(config.security.session_token_expiry_hours);
    let claims = SessionClaims::new(subject, config.security.auth_issuer.clone(), hours);
    let token = issue_session_token(&config.security.auth_secret_key, &claims)?;
    println!("{}", token);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
