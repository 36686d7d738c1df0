use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::auth::{
    DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_REFRESH_THRESHOLD_SECS, MAX_REFRESH_THRESHOLD_SECS,
};

/// Taskdeck session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the Taskdeck API
    #[arg(short = 'u', long, env = "TASKDECK_API_URL")]
    pub api_url: Option<String>,

    /// Path to the session store (SQLite)
    #[arg(short = 's', long, env = "TASKDECK_SESSION_STORE")]
    pub store: Option<String>,

    /// Seconds before expiry at which a token counts as expired
    #[arg(long, env = "TOKEN_REFRESH_THRESHOLD", default_value_t = DEFAULT_REFRESH_THRESHOLD_SECS)]
    pub refresh_threshold: u64,

    /// Seconds between background session checks
    #[arg(long, env = "SESSION_CHECK_INTERVAL", default_value_t = DEFAULT_CHECK_INTERVAL_SECS)]
    pub check_interval: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in with email and password
    Login {
        /// Account email (prompted if omitted)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account and log in
    Signup {
        #[arg(short, long)]
        email: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Log in with an identity-provider token
    SocialLogin {
        /// Provider name (e.g. google, github)
        provider: String,

        /// Provider-issued token
        #[arg(long, env = "SOCIAL_LOGIN_TOKEN")]
        token: String,
    },

    /// Show the current session
    Status,

    /// Print a valid access token, refreshing if needed
    Token,

    /// Force a token refresh
    Refresh,

    /// End the session
    Logout,

    /// Keep the session alive until interrupted
    Watch,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Remote API
    pub api_url: String,
    pub http_request_timeout: u64,

    // Session store
    pub store_path: PathBuf,

    // Session policy
    pub token_refresh_threshold: u64,
    pub check_interval: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration with priority: CLI > ENV (.env included) > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let api_url = args
            .api_url
            .clone()
            .context("TASKDECK_API_URL is required (use -u or set TASKDECK_API_URL env var)")?;

        let store_path = match args.store.as_deref() {
            Some(path) => expand_tilde(path),
            None => default_store_path()?,
        };

        Ok(Config {
            api_url: api_url.trim_end_matches('/').to_string(),
            http_request_timeout: args.http_timeout,
            store_path,
            token_refresh_threshold: args.refresh_threshold,
            check_interval: args.check_interval,
            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!(
                "TASKDECK_API_URL must start with http:// or https://: {}",
                self.api_url
            );
        }

        if self.check_interval == 0 {
            anyhow::bail!("SESSION_CHECK_INTERVAL must be greater than zero");
        }

        if self.token_refresh_threshold > MAX_REFRESH_THRESHOLD_SECS {
            anyhow::bail!(
                "TOKEN_REFRESH_THRESHOLD must be at most {} seconds",
                MAX_REFRESH_THRESHOLD_SECS
            );
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// Default store location under the platform data directory
fn default_store_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context(
        "Could not determine a data directory; set TASKDECK_SESSION_STORE explicitly",
    )?;
    Ok(data_dir.join("taskdeck").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
