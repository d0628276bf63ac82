use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use workbridge::auth::{CredentialStore, HttpTokenEndpoint, TokenRefresher};
use workbridge::config::{Config, CLIENT_SECRET_ENV};
use workbridge::redact::RedactionPipeline;
use workbridge::remote::Sources;
use workbridge::storage::{Database, DatabaseError};
use workbridge::util::{strip_control_chars, truncate_to_width};
use workbridge::{AggregateError, Aggregator, Document, Platform, SearchMode};

/// Get the config directory path (~/.config/workbridge/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("workbridge"))
}

#[derive(Parser, Debug)]
#[command(
    name = "workbridge",
    about = "Search and digest linked Gmail and Google Drive accounts"
)]
struct Args {
    /// Config file (defaults to ~/.config/workbridge/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Credential database (defaults to ~/.config/workbridge/workbridge.db)
    #[arg(long, value_name = "FILE", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Keyword search on one linked account
    Search {
        #[arg(long)]
        user: String,
        #[arg(long)]
        platform: Platform,
        query: String,
        /// Print documents as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Fetch everything new since the last digest, redacted, as JSON
    Digest {
        #[arg(long)]
        user: String,
        #[arg(long)]
        platform: Platform,
        /// Model selector passed through to the summarizer
        #[arg(long, default_value = "default")]
        model: String,
    },
    /// List linked accounts
    Accounts {
        #[arg(long)]
        user: String,
    },
    /// Remove a linked account
    Disconnect {
        #[arg(long)]
        user: String,
        #[arg(long)]
        platform: Platform,
    },
}

/// What the digest command hands to the downstream summarizer.
#[derive(Serialize)]
struct DigestHandoff<'a> {
    model: &'a str,
    documents: &'a [Document],
}

const TITLE_WIDTH: usize = 60;
const AUTHOR_WIDTH: usize = 24;

fn print_table(documents: &[Document]) {
    if documents.is_empty() {
        println!("No results.");
        return;
    }
    for doc in documents {
        let author = strip_control_chars(&doc.author);
        let title = strip_control_chars(&doc.title);
        println!(
            "{}  {:<aw$}  {}",
            doc.date.format("%Y-%m-%d %H:%M"),
            truncate_to_width(&author, AUTHOR_WIDTH),
            truncate_to_width(&title, TITLE_WIDTH),
            aw = AUTHOR_WIDTH,
        );
        println!("{:>18}{}", "", doc.href);
    }
}

fn build_aggregator(config: &Config, db: &Database) -> Result<Aggregator> {
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .timeout(std::time::Duration::from_secs(config.fetch.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let client_secret = config.google.client_secret.clone().unwrap_or_else(|| {
        tracing::debug!(env = CLIENT_SECRET_ENV, "No OAuth client secret configured");
        String::new()
    });
    let endpoint = HttpTokenEndpoint::new(
        client.clone(),
        config.auth.token_url.clone(),
        config.google.client_id.clone(),
        SecretString::from(client_secret),
    )
    .with_timeout(std::time::Duration::from_secs(config.fetch.request_timeout_secs));

    let store: Arc<dyn CredentialStore> = Arc::new(db.clone());
    let refresher = TokenRefresher::new(store.clone(), Arc::new(endpoint))
        .with_skew_ms(config.auth.refresh_skew_ms);
    let sources = Sources::google(
        client,
        &config.google.gmail_base_url,
        &config.google.drive_base_url,
        config.fetch.http_settings(),
    )
    .context("Invalid API base URL in config")?;
    let redactor = RedactionPipeline::new(&config.redaction.patterns);

    Ok(Aggregator::new(store, refresher, sources, redactor).with_limits(config.fetch.page_limits()))
}

/// Turn a retrieval error into a user-facing failure.
fn report(err: AggregateError) -> anyhow::Error {
    if let Some(platform) = err.reauth_platform() {
        tracing::warn!(platform = %platform, "Refresh token rejected");
        return anyhow::anyhow!("{err}. Link your {platform} account again to continue.");
    }
    anyhow::Error::new(err)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries results; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // Holds tokens: user-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .database
        .clone()
        .unwrap_or_else(|| config_dir.join("workbridge.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::Search {
            user,
            platform,
            query,
            json,
        } => {
            let aggregator = build_aggregator(&config, &db)?;
            let documents = aggregator
                .search(&user, platform, &query, SearchMode::Keyword)
                .await
                .map_err(report)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else {
                print_table(&documents);
            }
        }
        Command::Digest {
            user,
            platform,
            model,
        } => {
            let aggregator = build_aggregator(&config, &db)?;
            let documents = aggregator
                .search(&user, platform, "", SearchMode::Incremental)
                .await
                .map_err(report)?;
            let handoff = DigestHandoff {
                model: &model,
                documents: &documents,
            };
            println!("{}", serde_json::to_string_pretty(&handoff)?);
        }
        Command::Accounts { user } => {
            let accounts = db
                .list_credentials(&user)
                .await
                .context("Failed to load linked accounts")?;
            if accounts.is_empty() {
                println!("No linked accounts for {user}.");
            }
            let now = chrono::Utc::now().timestamp_millis();
            for account in accounts {
                let watermark = account
                    .last_sync_watermark
                    .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let expires = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(account.expires_at)
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<6}  {:<30}  {:?}  expires {}  synced {}",
                    account.platform.as_str(),
                    account.auth_user_hint.as_deref().unwrap_or("-"),
                    account.freshness(now, config.auth.refresh_skew_ms),
                    expires,
                    watermark,
                );
            }
        }
        Command::Disconnect { user, platform } => {
            if db.delete_credential(&user, platform).await? {
                println!("Disconnected {platform} for {user}.");
            } else {
                println!("{platform} was not linked for {user}.");
            }
        }
    }

    Ok(())
}
