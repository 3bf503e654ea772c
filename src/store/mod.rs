mod postgres;
mod query;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use crate::config::Configuration;
use crate::error::{StoreError, StoreResult};
use crate::models::{Item, ItemId, ItemKind, ItemPatch, List, ListId, NewItem, UserId};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

pub const ITEM_COLUMNS: &str = "id, list_id, kind, title, original_title, year, genre, \
                                kp_rating, imdb_rating, kp_url, imdb_url, watched, comment, created_at";

pub const LIST_COLUMNS: &str = "id, name, owner_id, pin_hash, created_at";

/// Backend-agnostic CRUD surface over lists and items.
///
/// Implementations own their SQL dialect; callers never learn which backend
/// they are talking to beyond `backend_name` for diagnostics.
#[async_trait]
pub trait Store: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Creates tables and indexes if missing. Never drops or rewrites data.
    async fn init_schema(&self) -> StoreResult<()>;

    async fn create_list(&self, owner: UserId, name: &str, pin: &str) -> StoreResult<ListId>;
    async fn lists_for_owner(&self, owner: UserId) -> StoreResult<Vec<List>>;
    async fn get_list(&self, id: ListId) -> StoreResult<List>;
    async fn rotate_pin(&self, id: ListId, new_pin: &str) -> StoreResult<bool>;

    async fn add_item(&self, list_id: ListId, item: &NewItem) -> StoreResult<ItemId>;
    async fn items_for_list(&self, list_id: ListId, kind: Option<ItemKind>) -> StoreResult<Vec<Item>>;
    async fn search_items(
        &self,
        list_id: ListId,
        term: &str,
        kind: Option<ItemKind>,
        limit: u32,
    ) -> StoreResult<Vec<Item>>;
    async fn get_item(&self, id: ItemId) -> StoreResult<Item>;
    async fn update_item(&self, id: ItemId, patch: &ItemPatch) -> StoreResult<bool>;
    async fn delete_item(&self, id: ItemId) -> StoreResult<bool>;

    /// The owner always passes; anyone else must present the current PIN.
    async fn verify_access(&self, id: ListId, pin: &str, requester: UserId) -> StoreResult<bool> {
        match self.get_list(id).await {
            Ok(list) => Ok(list.owner_id == requester || pin_matches(pin, &list.pin_hash)),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Opens the configured backend.
///
/// A networked DSN is tried first; any failure to reach it degrades to the
/// embedded SQLite file so the bot always starts.
pub async fn connect(config: &Configuration) -> anyhow::Result<Arc<dyn Store>> {
    if let Some(url) = config.database_url() {
        match PostgresStore::connect(&url, config.pool_size(), config.connect_timeout()).await {
            Ok(store) => {
                info!("Connected to PostgreSQL at {}", redact_dsn(&url));
                return Ok(Arc::new(store));
            }
            Err(e) => {
                warn!(
                    "PostgreSQL at {} unavailable ({}), falling back to SQLite",
                    redact_dsn(&url),
                    e
                );
            }
        }
    } else {
        info!("No database URL configured, using SQLite");
    }

    let path = config.sqlite_path();
    let store = SqliteStore::open(&path).await?;
    info!("Opened SQLite store at {}", path);
    Ok(Arc::new(store))
}

/// Strips credentials and query from a DSN so it can be logged.
pub fn redact_dsn(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown-host");
            match url.port() {
                Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
                None => format!("{}://{}{}", url.scheme(), host, url.path()),
            }
        }
        Err(_) => "<unparseable dsn>".to_string(),
    }
}

pub fn is_valid_pin(pin: &str) -> bool {
    (4..=6).contains(&pin.len()) && pin.chars().all(|c| c.is_ascii_digit())
}

pub fn validate_pin(pin: &str) -> StoreResult<()> {
    if is_valid_pin(pin) {
        Ok(())
    } else {
        Err(StoreError::invalid("PIN must be 4 to 6 digits"))
    }
}

pub fn validate_list_name(name: &str) -> StoreResult<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::invalid("list name is empty"));
    }
    if name.chars().count() > 64 {
        return Err(StoreError::invalid("list name is longer than 64 characters"));
    }
    Ok(())
}

pub const MAX_TITLE_CHARS: usize = 255;

pub fn validate_title(title: &str) -> StoreResult<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::invalid("title is empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(StoreError::invalid(format!(
            "title is longer than {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(())
}

/// Unicode case fold used for title uniqueness and search.
pub fn fold_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Salted one-way digest, stored as `<salt>$<hex sha256(salt:pin)>`.
pub fn hash_pin(pin: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, hex::encode(pin_digest(&salt, pin)))
}

pub fn pin_matches(pin: &str, stored: &str) -> bool {
    let Some((salt, expected_hex)) = stored.split_once('$') else {
        return false;
    };
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let actual = pin_digest(salt, pin);
    if expected.len() != actual.len() {
        return false;
    }
    // Fold over every byte so the comparison takes the same time on mismatch.
    expected
        .iter()
        .zip(actual.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn pin_digest(salt: &str, pin: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(pin.as_bytes());
    hasher.finalize().into()
}

/// Lowercased `%term%` with LIKE wildcards escaped by `\`.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in fold_key(term).chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn rows_to_items(rows: Vec<crate::models::ItemRow>) -> StoreResult<Vec<Item>> {
    rows.into_iter()
        .map(|row| Item::try_from(row).map_err(StoreError::from))
        .collect()
}

/// Maps insert failures onto the typed taxonomy.
pub(crate) fn insert_error(err: sqlx::Error, duplicate: StoreError) -> StoreError {
    if StoreError::is_unique_violation(&err) {
        return duplicate;
    }
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound,
        _ => StoreError::Backend(err),
    }
}
