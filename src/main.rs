use anyhow::{Context, Result};
use dialoguer::{Input, Password};
use std::sync::Arc;
use std::time::Duration;

use taskdeck_session::auth::{
    AuthClient, RefreshOutcome, SessionManager, SessionStatus, SessionWatcher,
};
use taskdeck_session::config::{Command, Config, LogFormat};
use taskdeck_session::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    init_logging(&config);

    tracing::debug!("API: {}", config.api_url);
    tracing::debug!("Session store: {}", config.store_path.display());

    let store = Arc::new(SqliteStore::open(&config.store_path)?);
    let client = AuthClient::new(
        &config.api_url,
        Duration::from_secs(config.http_request_timeout),
    )
    .context("Failed to create HTTP client")?;
    let manager = SessionManager::new(store, client, config.token_refresh_threshold);

    match command {
        Command::Login { email } => {
            let email = prompt_email(email)?;
            let password = Password::new()
                .with_prompt("Password")
                .interact()
                .context("Failed to read password")?;
            manager
                .login(&email, &password)
                .await
                .context("Login failed")?;
            print_status(&manager);
        }
        Command::Signup { email, name } => {
            let email = prompt_email(email)?;
            let password = Password::new()
                .with_prompt("Choose a password")
                .with_confirmation("Repeat password", "Passwords do not match")
                .interact()
                .context("Failed to read password")?;
            manager
                .signup(&email, &password, name.as_deref())
                .await
                .context("Signup failed")?;
            print_status(&manager);
        }
        Command::SocialLogin { provider, token } => {
            manager
                .social_login(&provider, &token)
                .await
                .with_context(|| format!("Login via {} failed", provider))?;
            print_status(&manager);
        }
        Command::Status => print_status(&manager),
        Command::Token => match manager.get_valid_access_token().await {
            Some(token) => println!("{}", token),
            None => anyhow::bail!("Not signed in; run `taskdeck-session login`"),
        },
        Command::Refresh => match manager.refresh().await {
            RefreshOutcome::Refreshed => print_status(&manager),
            RefreshOutcome::NoSession => anyhow::bail!("Not signed in"),
            other => anyhow::bail!("Refresh failed, session ended: {:?}", other),
        },
        Command::Logout => {
            manager.clear_tokens();
            println!("Signed out");
        }
        Command::Watch => watch(manager, Duration::from_secs(config.check_interval)).await?,
    }

    Ok(())
}

/// Initialize logging with the configured level and format
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_file(true).with_line_number(true).init(),
    }
}

fn prompt_email(email: Option<String>) -> Result<String> {
    match email {
        Some(email) => Ok(email),
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email"),
    }
}

fn print_status(manager: &SessionManager) {
    let Some(session) = manager.snapshot() else {
        println!("Not signed in");
        return;
    };

    let user = session.user();
    println!(
        "  User:     {}",
        user.email.as_deref().unwrap_or("(unknown)")
    );
    if let Some(id) = user.id {
        println!("  User ID:  {}", id);
    }
    if let Some(role) = user.role.as_deref() {
        println!("  Role:     {}", role);
    }
    println!("  Expires:  {}", session.expires_at().to_rfc3339());
    println!(
        "  State:    {}",
        if manager.is_authenticated() {
            "active"
        } else {
            "expired (will refresh on next use)"
        }
    );
}

/// Keep the session alive until Ctrl+C or a terminal sign-out
async fn watch(manager: SessionManager, interval: Duration) -> Result<()> {
    if !manager.has_tokens() {
        anyhow::bail!("Not signed in; run `taskdeck-session login`");
    }

    tracing::info!("Watching session (check every {}s)", interval.as_secs());
    let watcher = SessionWatcher::spawn(manager, interval);
    let mut status = watcher.subscribe();

    let signed_out = async {
        loop {
            if status.changed().await.is_err() {
                break;
            }
            if *status.borrow_and_update() == SessionStatus::SignedOut {
                break;
            }
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = signed_out => {
            tracing::warn!("Session ended; sign in again to continue");
        }
    }

    watcher.shutdown().await;
    tracing::info!("Session watcher shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, stopping...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, stopping...");
        },
    }
}
