//! Item queries shared by both backends.
//!
//! The SQL is dialect-neutral; `QueryBuilder` renders the bind placeholders
//! (`?` or `$n`) for whichever database it is built for.

use super::{fold_key, like_pattern, ITEM_COLUMNS};
use crate::models::{ItemId, ItemKind, ItemPatch, ListId};
use sqlx::{Database, Encode, QueryBuilder, Type};

fn select_in_list<'a, DB>(list_id: ListId, kind: Option<ItemKind>) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut qb = QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items WHERE list_id = "));
    qb.push_bind(list_id);
    if let Some(kind) = kind {
        qb.push(" AND kind = ").push_bind(kind.to_string());
    }
    qb
}

fn push_order<DB: Database>(qb: &mut QueryBuilder<'_, DB>, kind: Option<ItemKind>) {
    qb.push(if kind.is_some() {
        " ORDER BY title_key, id"
    } else {
        " ORDER BY kind, title_key, id"
    });
}

/// Items of one list, optionally one kind, movies before series.
pub(crate) fn items_for_list<'a, DB>(list_id: ListId, kind: Option<ItemKind>) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let mut qb = select_in_list(list_id, kind);
    push_order(&mut qb, kind);
    qb
}

/// Case-insensitive substring match on the folded title columns.
pub(crate) fn search_items<'a, DB>(
    list_id: ListId,
    term: &str,
    kind: Option<ItemKind>,
    limit: u32,
) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
{
    let pattern = like_pattern(term);

    let mut qb = select_in_list(list_id, kind);
    qb.push(" AND (title_key LIKE ")
        .push_bind(pattern.clone())
        .push(" ESCAPE '\\' OR COALESCE(original_title_key, '') LIKE ")
        .push_bind(pattern)
        .push(" ESCAPE '\\')");
    push_order(&mut qb, kind);
    qb.push(" LIMIT ").push_bind(i64::from(limit));
    qb
}

/// `UPDATE` touching only the fields present in `patch`. Callers reject
/// empty patches first.
pub(crate) fn update_item<'a, DB>(id: ItemId, patch: &ItemPatch) -> QueryBuilder<'a, DB>
where
    DB: Database,
    <DB as Database>::Arguments<'a>: Default,
    i64: Encode<'a, DB> + Type<DB>,
    String: Encode<'a, DB> + Type<DB>,
    f64: Encode<'a, DB> + Type<DB>,
    bool: Encode<'a, DB> + Type<DB>,
{
    let mut qb = QueryBuilder::new("UPDATE items SET ");
    let mut set = qb.separated(", ");
    if let Some(genre) = &patch.genre {
        set.push("genre = ").push_bind_unseparated(genre.clone());
    }
    if let Some(rating) = patch.kp_rating {
        set.push("kp_rating = ").push_bind_unseparated(rating);
    }
    if let Some(rating) = patch.imdb_rating {
        set.push("imdb_rating = ").push_bind_unseparated(rating);
    }
    if let Some(url) = &patch.kp_url {
        set.push("kp_url = ").push_bind_unseparated(url.clone());
    }
    if let Some(url) = &patch.imdb_url {
        set.push("imdb_url = ").push_bind_unseparated(url.clone());
    }
    if let Some(watched) = patch.watched {
        set.push("watched = ").push_bind_unseparated(watched);
    }
    if let Some(comment) = &patch.comment {
        set.push("comment = ").push_bind_unseparated(comment.clone());
    }
    qb.push(" WHERE id = ").push_bind(id);
    qb
}

/// Folded keys stored next to the display titles.
pub(crate) fn title_keys(title: &str, original_title: Option<&str>) -> (String, Option<String>) {
    (fold_key(title), original_title.map(fold_key))
}
