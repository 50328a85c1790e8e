//! SQLite Storage Backend
//!
//! Durable state for the proxy:
//! - Watched domains
//! - Proxy credentials (single global username/password)
//! - Captured cookies, unique per (domain, content)
//!
//! The proxy core only sees the [`CredentialStore`] and [`CookieStore`]
//! traits. The management operations live on [`SqliteStore`] directly.

use crate::matcher::DomainMatcher;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

const USERNAME_KEY: &str = "proxy_username";
const PASSWORD_KEY: &str = "proxy_password";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),
}

/// Source of the live proxy configuration
///
/// Read on every decision so management changes apply immediately.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn username(&self) -> Result<Option<String>, StorageError>;

    async fn password(&self) -> Result<Option<String>, StorageError>;

    /// Normalized watched domains
    async fn watchlist(&self) -> Result<Vec<String>, StorageError>;
}

/// Sink for captured cookies
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Insert a cookie record, or refresh header text and timestamp if the
    /// (domain, content) pair already exists
    async fn upsert_cookie(
        &self,
        domain: &str,
        content: &str,
        full_header: &str,
    ) -> Result<(), StorageError>;
}

/// A captured cookie record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CapturedCookie {
    pub id: i64,
    pub domain: String,
    pub content: String,
    pub full_cookie_header: String,
    /// Unix timestamp in milliseconds (UTC)
    pub last_updated: i64,
}

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub async fn open(db_path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::DatabaseError(sqlx::Error::Io(e)))?;
            }
        }

        let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", db_path)).await?;

        info!(db_path = %db_path, "Connected to SQLite database");

        Self::enable_wal(&pool).await?;
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn enable_wal(pool: &SqlitePool) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
        debug!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                domain TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cookies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL,
                content TEXT NOT NULL,
                full_cookie_header TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                UNIQUE(domain, content)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT value FROM config WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(value,)| value))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_username(&self, username: &str) -> Result<(), StorageError> {
        self.set_config(USERNAME_KEY, username).await?;
        info!(username = %username, "Proxy username updated");
        Ok(())
    }

    pub async fn set_password(&self, password: &str) -> Result<(), StorageError> {
        self.set_config(PASSWORD_KEY, password).await?;
        info!("Proxy password updated");
        Ok(())
    }

    /// True when both username and password are set and non-empty
    pub async fn credentials_configured(&self) -> Result<bool, StorageError> {
        let username = self.get_config(USERNAME_KEY).await?;
        let password = self.get_config(PASSWORD_KEY).await?;
        Ok(username.is_some_and(|u| !u.is_empty()) && password.is_some_and(|p| !p.is_empty()))
    }

    /// Add a domain to the watchlist
    ///
    /// The entry is normalized and lowercased first. Returns the stored domain.
    pub async fn add_domain(&self, raw: &str) -> Result<String, StorageError> {
        let domain = DomainMatcher::canonical_entry(raw);
        if domain.is_empty() {
            return Err(StorageError::InvalidDomain(raw.to_string()));
        }

        sqlx::query("INSERT OR IGNORE INTO domains (domain) VALUES (?)")
            .bind(&domain)
            .execute(&self.pool)
            .await?;

        info!(domain = %domain, "Domain added to watchlist");
        Ok(domain)
    }

    /// Remove a domain from the watchlist. Returns whether it existed.
    pub async fn remove_domain(&self, raw: &str) -> Result<bool, StorageError> {
        let domain = DomainMatcher::canonical_entry(raw);
        let result = sqlx::query("DELETE FROM domains WHERE domain = ?")
            .bind(&domain)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!(domain = %domain, "Domain removed from watchlist");
        }
        Ok(removed)
    }

    /// All captured cookies, most recently updated first
    pub async fn list_cookies(&self) -> Result<Vec<CapturedCookie>, StorageError> {
        let rows = sqlx::query_as::<_, CapturedCookie>(
            r#"
            SELECT id, domain, content, full_cookie_header, last_updated
            FROM cookies
            ORDER BY last_updated DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Retrieved captured cookies");
        Ok(rows)
    }

    /// Delete one cookie record. Returns whether it existed.
    pub async fn delete_cookie(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM cookies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every cookie record. Returns the number removed.
    pub async fn clear_cookies(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM cookies")
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        info!(deleted = deleted, "Cleared captured cookies");
        Ok(deleted)
    }

    pub async fn close(self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn username(&self) -> Result<Option<String>, StorageError> {
        self.get_config(USERNAME_KEY).await
    }

    async fn password(&self) -> Result<Option<String>, StorageError> {
        self.get_config(PASSWORD_KEY).await
    }

    async fn watchlist(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT domain FROM domains ORDER BY domain")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(domain,)| domain).collect())
    }
}

#[async_trait]
impl CookieStore for SqliteStore {
    async fn upsert_cookie(
        &self,
        domain: &str,
        content: &str,
        full_header: &str,
    ) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();

        // Single statement, so the uniqueness constraint arbitrates
        // concurrent captures of the same pair.
        sqlx::query(
            r#"
            INSERT INTO cookies (domain, content, full_cookie_header, last_updated)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(domain, content) DO UPDATE SET
                last_updated = excluded.last_updated,
                full_cookie_header = excluded.full_cookie_header
            "#,
        )
        .bind(domain)
        .bind(content)
        .bind(full_header)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(domain = %domain, "Cookie upserted");
        Ok(())
    }
}
