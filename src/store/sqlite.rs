use super::{
    hash_pin, insert_error, query, rows_to_items, validate_list_name, validate_pin, validate_title,
    Store, ITEM_COLUMNS, LIST_COLUMNS,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{Item, ItemId, ItemKind, ItemPatch, ItemRow, List, ListId, NewItem, UserId};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        owner_id INTEGER NOT NULL,
        pin_hash TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        UNIQUE (owner_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
        kind TEXT NOT NULL CHECK (kind IN ('movie', 'series')),
        title TEXT NOT NULL,
        title_key TEXT NOT NULL,
        original_title TEXT,
        original_title_key TEXT,
        year TEXT NOT NULL DEFAULT 'unknown',
        genre TEXT,
        kp_rating REAL,
        imdb_rating REAL,
        kp_url TEXT,
        imdb_url TEXT,
        watched BOOLEAN NOT NULL DEFAULT 0,
        comment TEXT,
        created_at DATETIME NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS items_list_kind_title ON items (list_id, kind, title_key)",
    "CREATE INDEX IF NOT EXISTS items_list_kind ON items (list_id, kind)",
];

/// Embedded single-file store.
///
/// The pool holds exactly one connection, so every statement is serialized
/// through it and SQLite's single-writer rule is never contended.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(location: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(&normalize_location(location))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // No idle reaping: an in-memory database lives only as long as its connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn in_memory() -> StoreResult<Self> {
        Self::open(":memory:").await
    }
}

fn normalize_location(location: &str) -> String {
    if location.starts_with("sqlite:") {
        return location.to_string();
    }
    if location == ":memory:" {
        return "sqlite::memory:".to_string();
    }
    format!("sqlite://{}", location)
}

#[async_trait]
impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self))]
    async fn init_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    #[instrument(skip(self, pin))]
    async fn create_list(&self, owner: UserId, name: &str, pin: &str) -> StoreResult<ListId> {
        validate_list_name(name)?;
        validate_pin(pin)?;

        let result = sqlx::query(
            "INSERT INTO lists (name, owner_id, pin_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name.trim())
        .bind(owner)
        .bind(hash_pin(pin))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, StoreError::DuplicateName))?;

        Ok(result.last_insert_rowid())
    }

    async fn lists_for_owner(&self, owner: UserId) -> StoreResult<Vec<List>> {
        let query = format!("SELECT {LIST_COLUMNS} FROM lists WHERE owner_id = ? ORDER BY name");
        let lists = sqlx::query_as::<_, List>(&query)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(lists)
    }

    async fn get_list(&self, id: ListId) -> StoreResult<List> {
        let query = format!("SELECT {LIST_COLUMNS} FROM lists WHERE id = ?");
        sqlx::query_as::<_, List>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self, new_pin))]
    async fn rotate_pin(&self, id: ListId, new_pin: &str) -> StoreResult<bool> {
        validate_pin(new_pin)?;
        let result = sqlx::query("UPDATE lists SET pin_hash = ? WHERE id = ?")
            .bind(hash_pin(new_pin))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, item), fields(title = %item.title))]
    async fn add_item(&self, list_id: ListId, item: &NewItem) -> StoreResult<ItemId> {
        validate_title(&item.title)?;
        let (title_key, original_title_key) =
            query::title_keys(&item.title, item.original_title.as_deref());

        let result = sqlx::query(
            "INSERT INTO items (list_id, kind, title, title_key, original_title, original_title_key, \
             year, genre, kp_rating, imdb_rating, kp_url, imdb_url, watched, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(list_id)
        .bind(item.kind.as_str())
        .bind(item.title.trim())
        .bind(title_key)
        .bind(&item.original_title)
        .bind(original_title_key)
        .bind(item.year_or_unknown())
        .bind(&item.genre)
        .bind(item.kp_rating)
        .bind(item.imdb_rating)
        .bind(&item.kp_url)
        .bind(&item.imdb_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, StoreError::DuplicateItem))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateItem);
        }
        Ok(result.last_insert_rowid())
    }

    async fn items_for_list(&self, list_id: ListId, kind: Option<ItemKind>) -> StoreResult<Vec<Item>> {
        let mut qb = query::items_for_list::<Sqlite>(list_id, kind);
        let rows = qb.build_query_as::<ItemRow>().fetch_all(&self.pool).await?;
        rows_to_items(rows)
    }

    #[instrument(skip(self))]
    async fn search_items(
        &self,
        list_id: ListId,
        term: &str,
        kind: Option<ItemKind>,
        limit: u32,
    ) -> StoreResult<Vec<Item>> {
        let mut qb = query::search_items::<Sqlite>(list_id, term, kind, limit);
        let rows = qb.build_query_as::<ItemRow>().fetch_all(&self.pool).await?;
        debug!("Search matched {} items", rows.len());
        rows_to_items(rows)
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Item> {
        let query = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let row = sqlx::query_as::<_, ItemRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(Item::try_from(row)?)
    }

    #[instrument(skip(self, patch))]
    async fn update_item(&self, id: ItemId, patch: &ItemPatch) -> StoreResult<bool> {
        if patch.is_empty() {
            return Err(StoreError::invalid("empty item patch"));
        }

        let mut qb = query::update_item::<Sqlite>(id, patch);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_item(&self, id: ItemId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
