//! Cookie Catcher proxy daemon and management CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cookie_catcher::{
    init_tracing, CredentialStore, ProxyAddon, ProxyConfig, ProxyServer, SqliteStore,
    UpstreamClient,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::io::{self, BufRead};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cookie-catcher")]
#[command(author, version, about = "Authenticated proxy that captures cookies for watched domains", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy (default)
    Serve,

    /// Manage the watched domain list
    Domains {
        #[command(subcommand)]
        action: DomainsAction,
    },

    /// Manage proxy credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Inspect or delete captured cookies
    Cookies {
        #[command(subcommand)]
        action: CookiesAction,
    },
}

#[derive(Subcommand, Debug)]
enum DomainsAction {
    /// Watch a domain and all of its subdomains
    Add { domain: String },
    /// Stop watching a domain
    Remove { domain: String },
    /// List watched domains
    List,
}

#[derive(Subcommand, Debug)]
enum CredentialsAction {
    /// Set the proxy username and password
    ///
    /// The password is taken from --password-stdin, --password, or
    /// PROXY_PASSWORD, in that order.
    Set {
        #[arg(long)]
        username: String,
        /// Password as an argument (visible in the process list)
        #[arg(long, conflicts_with = "password_stdin")]
        password: Option<String>,
        /// Read the password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },
    /// Show the configured username (never the password)
    Show,
}

#[derive(Subcommand, Debug)]
enum CookiesAction {
    /// List captured cookies, newest first
    List,
    /// Delete one captured cookie by id
    Delete { id: i64 },
    /// Delete all captured cookies
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ProxyConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    let db_path = config.database_path.to_string_lossy().to_string();
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    let result = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store.clone()).await,
        Command::Domains { action } => domains(&store, action).await,
        Command::Credentials { action } => credentials(&store, &config, action).await,
        Command::Cookies { action } => cookies(&store, action).await,
    };

    store.close().await;
    result
}

async fn serve(config: ProxyConfig, store: SqliteStore) -> Result<()> {
    info!(version = cookie_catcher::VERSION, "Starting Cookie Catcher proxy");

    if let Some((username, password)) = config.bootstrap_credentials() {
        store.set_username(username).await?;
        store.set_password(password.expose_secret()).await?;
        info!("Proxy credentials loaded from configuration");
    }

    if !store.credentials_configured().await? {
        warn!("Proxy credentials are not configured, every request will get 503 until `cookie-catcher credentials set` is run");
    }

    let watched = store.watchlist().await?;
    info!(domains = watched.len(), "Watchlist loaded");

    let addon = Arc::new(ProxyAddon::new(Arc::new(store)).with_realm(&config.auth_realm));
    let upstream = UpstreamClient::new(config.connect_timeout(), config.max_response_body_size);
    let server = Arc::new(ProxyServer::new(addon, upstream));

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    server.serve(listener, shutdown_signal()).await?;

    info!("Proxy stopped");
    Ok(())
}

async fn domains(store: &SqliteStore, action: DomainsAction) -> Result<()> {
    match action {
        DomainsAction::Add { domain } => {
            let stored = store.add_domain(&domain).await?;
            print_json(&json!({ "added": stored }))
        }
        DomainsAction::Remove { domain } => {
            let removed = store.remove_domain(&domain).await?;
            print_json(&json!({ "domain": domain, "removed": removed }))
        }
        DomainsAction::List => print_json(&store.watchlist().await?),
    }
}

async fn credentials(store: &SqliteStore, config: &ProxyConfig, action: CredentialsAction) -> Result<()> {
    match action {
        CredentialsAction::Set {
            username,
            password,
            password_stdin,
        } => {
            let password = resolve_password(
                password,
                password_stdin,
                config.bootstrap_password.as_ref(),
                io::stdin().lock(),
            )?;
            if username.is_empty() || password.expose_secret().is_empty() {
                anyhow::bail!("Username and password must both be non-empty");
            }
            store.set_username(&username).await?;
            store.set_password(password.expose_secret()).await?;
            print_json(&json!({ "username": username, "password_set": true }))
        }
        CredentialsAction::Show => {
            let username = store.username().await?;
            let password_set = store.password().await?.is_some_and(|p| !p.is_empty());
            print_json(&json!({ "username": username, "password_set": password_set }))
        }
    }
}

async fn cookies(store: &SqliteStore, action: CookiesAction) -> Result<()> {
    match action {
        CookiesAction::List => print_json(&store.list_cookies().await?),
        CookiesAction::Delete { id } => {
            let deleted = store.delete_cookie(id).await?;
            print_json(&json!({ "id": id, "deleted": deleted }))
        }
        CookiesAction::Clear => {
            let deleted = store.clear_cookies().await?;
            print_json(&json!({ "deleted": deleted }))
        }
    }
}

/// Pick the password for `credentials set`
///
/// `configured` is PROXY_PASSWORD (or the config file's `password`).
fn resolve_password(
    flag: Option<String>,
    from_stdin: bool,
    configured: Option<&SecretString>,
    mut stdin: impl BufRead,
) -> Result<SecretString> {
    if from_stdin {
        let mut line = String::new();
        stdin
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        let password = line.trim_end_matches(['\r', '\n']).to_string();
        return Ok(SecretString::new(password));
    }

    if let Some(password) = flag {
        return Ok(SecretString::new(password));
    }

    match configured {
        Some(password) => Ok(SecretString::new(password.expose_secret().clone())),
        None => anyhow::bail!("No password given: use --password-stdin, --password or PROXY_PASSWORD"),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
