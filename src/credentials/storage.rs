//! SQLite-backed credential store.

use super::{encryption::SealedToken, CredentialStore, TenantCredential, TokenCipher};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Credential store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     shop               TEXT PRIMARY KEY,
///     access_token       TEXT NOT NULL,   -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     scope              TEXT,
///     installed_at       TEXT NOT NULL,   -- RFC 3339
///     updated_at         TEXT NOT NULL    -- RFC 3339
/// );
/// ```
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl SqliteCredentialStore {
    /// Opens (or creates) the database and ensures the table exists.
    ///
    /// # Arguments
    /// * `db_path` - SQLite file path, or `:memory:`
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher =
            TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;
        let conn = Connection::open(db_path).context("Failed to open credentials database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                shop               TEXT PRIMARY KEY,
                access_token       TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                scope              TEXT,
                installed_at       TEXT NOT NULL,
                updated_at         TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store connection mutex poisoned"))
    }

    fn decode_row(&self, row: &Row<'_>) -> Result<TenantCredential> {
        let shop: String = row.get(0)?;
        let sealed = SealedToken {
            ciphertext: row.get(1)?,
            nonce: row.get(2)?,
        };
        let scope: Option<String> = row.get(3)?;
        let installed_at: String = row.get(4)?;

        let access_token = self
            .cipher
            .open(&sealed)
            .with_context(|| format!("Failed to decrypt access token for {}", shop))?;
        let installed_at = DateTime::parse_from_rfc3339(&installed_at)
            .with_context(|| format!("Failed to parse installed_at for {}", shop))?
            .with_timezone(&Utc);

        Ok(TenantCredential {
            shop,
            access_token,
            scope,
            installed_at,
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn upsert(&self, credential: &TenantCredential) -> Result<()> {
        let sealed = self
            .cipher
            .seal(&credential.access_token)
            .context("Failed to encrypt access token")?;
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO credentials (
                    shop, access_token, access_token_nonce, scope, installed_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(shop) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    scope = excluded.scope,
                    installed_at = excluded.installed_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    credential.shop,
                    sealed.ciphertext,
                    sealed.nonce,
                    credential.scope,
                    credential.installed_at.to_rfc3339(),
                    now,
                ],
            )
            .context("Failed to store credential")?;

        Ok(())
    }

    fn get(&self, shop: &str) -> Result<Option<TenantCredential>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT shop, access_token, access_token_nonce, scope, installed_at
                 FROM credentials WHERE shop = ?1",
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt.query(params![shop]).context("Failed to execute query")?;
        match rows.next().context("Failed to read row")? {
            Some(row) => Ok(Some(self.decode_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_all(&self) -> Result<Vec<TenantCredential>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT shop, access_token, access_token_nonce, scope, installed_at
                 FROM credentials ORDER BY shop",
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt.query([]).context("Failed to execute query")?;
        let mut credentials = Vec::new();
        while let Some(row) = rows.next().context("Failed to read row")? {
            credentials.push(self.decode_row(row)?);
        }
        Ok(credentials)
    }
}
