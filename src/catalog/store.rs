//! Catalog persistence using SQLite.

use super::{CatalogEntry, CatalogRepository};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Stores catalog entries in SQLite.
///
/// `UNIQUE(shop, product_id)` plus `ON CONFLICT DO UPDATE` makes every upsert
/// a single atomic statement.
pub struct SqliteCatalogStore {
    conn: Mutex<Connection>,
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open catalog DB at {}", db_path.display()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS catalog_entries (
                shop        TEXT NOT NULL,
                product_id  INTEGER NOT NULL,
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                synced_at   TEXT NOT NULL,
                UNIQUE(shop, product_id)
            );
            CREATE INDEX IF NOT EXISTS idx_catalog_shop ON catalog_entries(shop);",
        )
        .context("Failed to create catalog_entries table")?;

        register_casefold(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Catalog store connection mutex poisoned"))
    }
}

/// `casefold(text)`: Unicode lower-casing, since `LIKE` only folds ASCII.
fn register_casefold(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: String = ctx.get(0)?;
            Ok(text.to_lowercase())
        },
    )
    .context("Failed to register casefold function")
}

/// Lower-cases the query and escapes LIKE wildcards so it matches literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

impl CatalogRepository for SqliteCatalogStore {
    fn upsert(&self, entry: &CatalogEntry) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO catalog_entries (shop, product_id, title, description, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(shop, product_id) DO UPDATE SET
                     title = excluded.title,
                     description = excluded.description,
                     synced_at = excluded.synced_at",
                params![
                    entry.shop,
                    entry.product_id,
                    entry.title,
                    entry.description,
                    entry.synced_at.to_rfc3339(),
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to upsert catalog entry {}/{}",
                    entry.shop, entry.product_id
                )
            })?;
        Ok(())
    }

    fn count_by_shop(&self, shop: &str) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM catalog_entries WHERE shop = ?1",
                params![shop],
                |row| row.get(0),
            )
            .context("Failed to count catalog entries")?;
        Ok(count.max(0) as u64)
    }

    fn search(&self, shop: &str, query: &str) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT shop, product_id, title, description, synced_at
                 FROM catalog_entries
                 WHERE shop = ?1
                   AND (casefold(title) LIKE ?2 ESCAPE '\\'
                        OR casefold(description) LIKE ?2 ESCAPE '\\')
                 ORDER BY title COLLATE NOCASE ASC, product_id ASC",
            )
            .context("Failed to prepare search query")?;

        let rows = stmt
            .query_map(params![shop, like_pattern(query)], |row| {
                let shop: String = row.get(0)?;
                let product_id: i64 = row.get(1)?;
                let title: String = row.get(2)?;
                let description: String = row.get(3)?;
                let synced_at: String = row.get(4)?;
                Ok((shop, product_id, title, description, synced_at))
            })
            .context("Failed to run search query")?;

        let mut entries = Vec::new();
        for row in rows {
            let (shop, product_id, title, description, synced_at) =
                row.context("Failed to read catalog row")?;
            let synced_at = DateTime::parse_from_rfc3339(&synced_at)
                .with_context(|| format!("Failed to parse synced_at for {}/{}", shop, product_id))?
                .with_timezone(&Utc);
            entries.push(CatalogEntry {
                shop,
                product_id,
                title,
                description,
                synced_at,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_store() -> SqliteCatalogStore {
        SqliteCatalogStore::new(":memory:").expect("in-memory store failed")
    }

    fn entry(shop: &str, product_id: i64, title: &str) -> CatalogEntry {
        CatalogEntry {
            shop: shop.to_string(),
            product_id,
            title: title.to_string(),
            description: String::new(),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_same_key_does_not_duplicate() {
        let store = in_memory_store();
        store.upsert(&entry("acme.example", 1, "Red Shirt")).unwrap();
        store.upsert(&entry("acme.example", 1, "Crimson Shirt")).unwrap();

        assert_eq!(store.count_by_shop("acme.example").unwrap(), 1);
        let found = store.search("acme.example", "crimson").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Crimson Shirt");
    }

    #[test]
    fn test_same_product_id_in_two_shops() {
        let store = in_memory_store();
        store.upsert(&entry("acme.example", 7, "Lamp")).unwrap();
        store.upsert(&entry("other.example", 7, "Lamp")).unwrap();

        assert_eq!(store.count_by_shop("acme.example").unwrap(), 1);
        assert_eq!(store.count_by_shop("other.example").unwrap(), 1);
    }

    #[test]
    fn test_search_is_case_insensitive_and_scoped() {
        let store = in_memory_store();
        store.upsert(&entry("acme.example", 1, "Red Shirt")).unwrap();
        store.upsert(&entry("acme.example", 2, "Blue Hat")).unwrap();
        store.upsert(&entry("other.example", 3, "Green Shirt")).unwrap();

        let found = store.search("acme.example", "SHIRT").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, 1);
    }

    #[test]
    fn test_search_matches_description() {
        let store = in_memory_store();
        let mut e = entry("acme.example", 1, "Tee");
        e.description = "<p>Organic cotton</p>".to_string();
        store.upsert(&e).unwrap();

        assert_eq!(store.search("acme.example", "cotton").unwrap().len(), 1);
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let store = in_memory_store();
        store.upsert(&entry("acme.example", 1, "100% Wool")).unwrap();
        store.upsert(&entry("acme.example", 2, "1000 Wool")).unwrap();

        let found = store.search("acme.example", "0%").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, 1);

        assert!(store.search("acme.example", "_").unwrap().is_empty());
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let store = in_memory_store();
        store.upsert(&entry("acme.example", 1, "Écharpe Rouge")).unwrap();
        store.upsert(&entry("acme.example", 2, "STRAßE Poster")).unwrap();

        let found = store.search("acme.example", "écharpe").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].product_id, 1);

        assert_eq!(store.search("acme.example", "ÉCHARPE").unwrap().len(), 1);
        assert_eq!(store.search("acme.example", "straße").unwrap().len(), 1);
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("a%b_c\\"), "%a\\%b\\_c\\\\%");
        assert_eq!(like_pattern("ÉCHARPE"), "%écharpe%");
    }
}
