use anyhow::{Context, Result};
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

use crate::auth::Authenticator;
use crate::chat::OpenAiProvider;
use crate::cli::commands::{LoggingOptions, TokenAction};
use crate::config::{self, GatewayConfig, LoggingSettings};
use crate::server::{start_server, ServerState};
use crate::store::{MemoryStore, TokenFile, User};

/// Set up tracing, with `log` records forwarded into it. The returned guard
/// must live as long as file logging is needed.
///
/// Precedence: `--log-filter`, then `-v`, then `RUST_LOG`, then config.
pub fn init_logging(settings: &LoggingSettings, options: &LoggingOptions) -> Result<Option<WorkerGuard>> {
    LogTracer::init().context("Failed to initialize log tracer")?;

    let directives = options
        .log_filter
        .clone()
        .or_else(|| options.verbosity_level().map(|level| format!("memos_gateway={level},{level}")))
        .or_else(|| std::env::var("RUST_LOG").ok())
        .or_else(|| settings.filter.clone())
        .unwrap_or_else(|| settings.level.clone());
    let filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter '{directives}'"))?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    match &settings.directory {
        Some(directory) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, directory, "memos-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = builder.with_writer(writer).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber).context("Failed to initialize logging")?;
            Ok(Some(guard))
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish()).context("Failed to initialize logging")?;
            Ok(None)
        }
    }
}

pub async fn run_server(mut config: GatewayConfig) -> Result<()> {
    if config.ensure_secret() {
        warn!("No auth.secret configured; generated a random one. Access tokens will not survive a restart");
    }

    let addr = config.listen_addr()?;

    let tokens = TokenFile::open(&config.auth.tokens_file)
        .await
        .with_context(|| format!("Failed to open tokens file {}", config.auth.tokens_file.display()))?;
    let store = Arc::new(MemoryStore::from_token_file(&tokens));

    let chat = OpenAiProvider::from_settings(&config.chat).context("Failed to build chat provider")?;

    let state = ServerState::new(config, store, Arc::new(chat)).context("Failed to build server state")?;
    start_server(addr, state).await
}

pub async fn handle_token(config: &GatewayConfig, action: TokenAction) -> Result<()> {
    match action {
        TokenAction::Create {
            user_id,
            username,
            role,
            name,
            expires_days,
        } => {
            let mut tokens = TokenFile::open(&config.auth.tokens_file).await?;
            let user = User::new(user_id, username, role);
            let token = tokens
                .create(&user, &name, expires_days.map(Duration::days))
                .await
                .with_context(|| format!("Failed to create token '{name}'"))?;

            println!("{token}");
            eprintln!("Store this token now; it cannot be shown again.");
        }
        TokenAction::List => {
            let tokens = TokenFile::open(&config.auth.tokens_file).await?;
            let summaries = tokens.list();
            if summaries.is_empty() {
                println!("No tokens in {}", tokens.path().display());
                return Ok(());
            }

            println!("{:<14} {:<8} {:<16} {:<20} {:<26} EXPIRES", "HASH", "USER", "USERNAME", "NAME", "CREATED");
            for s in summaries {
                let expires = s
                    .expires_at
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_else(|| "never".to_owned());
                println!(
                    "{:<14} {:<8} {:<16} {:<20} {:<26} {}",
                    s.hash_prefix,
                    s.user_id,
                    s.username,
                    s.name,
                    s.created_at.to_rfc3339(),
                    expires
                );
            }
        }
        TokenAction::Revoke { user_id, name } => {
            let mut tokens = TokenFile::open(&config.auth.tokens_file).await?;
            let record = tokens
                .revoke_by_name(user_id, &name)
                .await
                .with_context(|| format!("Failed to revoke token '{name}'"))?;
            info!("Revoked token '{}'", record.name);
            println!("Revoked '{}' for user {}", record.name, record.username);
        }
        TokenAction::Sign {
            user_id,
            username,
            role,
            ttl_hours,
        } => {
            if config.auth.secret.is_empty() {
                anyhow::bail!("auth.secret is not configured; a signed token would never verify");
            }
            let authenticator = Authenticator::new(Arc::new(MemoryStore::new()), config.auth.secret.as_bytes());
            let token = authenticator
                .sign_access_token(&User::new(user_id, username, role), Duration::hours(ttl_hours))
                .context("Failed to sign access token")?;
            println!("{token}");
        }
    }

    Ok(())
}

pub fn load_config(args: &config::Args) -> Result<GatewayConfig> {
    GatewayConfig::load(args).context("Failed to load configuration")
}
