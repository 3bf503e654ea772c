use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = i64;
pub type ListId = i64;
pub type ItemId = i64;

/// Stored in `items.year` when no resolver knew the release year.
pub const YEAR_UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Movie,
    Series,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Series => "series",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(ItemKind::Movie),
            "series" => Ok(ItemKind::Series),
            other => Err(anyhow::anyhow!("unknown item kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub list_id: ListId,
    pub kind: ItemKind,
    pub title: String,
    pub original_title: Option<String>,
    pub year: String,
    pub genre: Option<String>,
    pub kp_rating: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub kp_url: Option<String>,
    pub imdb_url: Option<String>,
    pub watched: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn has_known_year(&self) -> bool {
        !self.year.is_empty() && self.year != YEAR_UNKNOWN
    }
}

/// Raw `items` row as both backends return it; `kind` is still text.
#[derive(Debug, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub list_id: i64,
    pub kind: String,
    pub title: String,
    pub original_title: Option<String>,
    pub year: String,
    pub genre: Option<String>,
    pub kp_rating: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub kp_url: Option<String>,
    pub imdb_url: Option<String>,
    pub watched: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ItemRow> for Item {
    type Error = anyhow::Error;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Item {
            id: row.id,
            list_id: row.list_id,
            kind: row.kind.parse()?,
            title: row.title,
            original_title: row.original_title,
            year: row.year,
            genre: row.genre,
            kp_rating: row.kp_rating,
            imdb_rating: row.imdb_rating,
            kp_url: row.kp_url,
            imdb_url: row.imdb_url,
            watched: row.watched,
            comment: row.comment,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct List {
    pub id: ListId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(skip_serializing)]
    pub pin_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when a new item is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub kind: ItemKind,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub kp_rating: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub kp_url: Option<String>,
    pub imdb_url: Option<String>,
}

impl NewItem {
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        NewItem {
            kind,
            title: title.into(),
            original_title: None,
            year: None,
            genre: None,
            kp_rating: None,
            imdb_rating: None,
            kp_url: None,
            imdb_url: None,
        }
    }

    /// Builds the insert payload from a user-entered title and resolved metadata.
    /// The title is always the one the user typed.
    pub fn from_metadata(kind: ItemKind, title: &str, metadata: Metadata) -> Self {
        NewItem {
            kind,
            title: title.to_string(),
            original_title: metadata.original_title.or(Some(title.to_string())),
            year: metadata.year,
            genre: metadata.genre,
            kp_rating: metadata.kp_rating,
            imdb_rating: metadata.imdb_rating,
            kp_url: metadata.kp_url,
            imdb_url: metadata.imdb_url,
        }
    }

    pub fn year_or_unknown(&self) -> &str {
        self.year.as_deref().unwrap_or(YEAR_UNKNOWN)
    }
}

/// Partial update of the mutable item fields. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub genre: Option<String>,
    pub kp_rating: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub kp_url: Option<String>,
    pub imdb_url: Option<String>,
    pub watched: Option<bool>,
    pub comment: Option<String>,
}

impl ItemPatch {
    pub fn comment(text: impl Into<String>) -> Self {
        ItemPatch {
            comment: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn watched(watched: bool) -> Self {
        ItemPatch {
            watched: Some(watched),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genre.is_none()
            && self.kp_rating.is_none()
            && self.imdb_rating.is_none()
            && self.kp_url.is_none()
            && self.imdb_url.is_none()
            && self.watched.is_none()
            && self.comment.is_none()
    }
}

/// Best-effort lookup result. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub kp_rating: Option<f64>,
    pub imdb_rating: Option<f64>,
    pub kp_url: Option<String>,
    pub imdb_url: Option<String>,
    pub kind: Option<ItemKind>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Metadata::default()
    }

    /// Fills ratings, urls and genre from `other` where this result has none.
    /// Populated fields are never overwritten.
    pub fn merge_missing(&mut self, other: Metadata) {
        if self.kp_rating.is_none() {
            self.kp_rating = other.kp_rating;
        }
        if self.imdb_rating.is_none() {
            self.imdb_rating = other.imdb_rating;
        }
        if self.kp_url.is_none() {
            self.kp_url = other.kp_url;
        }
        if self.imdb_url.is_none() {
            self.imdb_url = other.imdb_url;
        }
        if self.genre.is_none() {
            self.genre = other.genre;
        }
    }
}

/// Rounds a rating to one fractional digit.
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
