//! Message text and keyboards. Nothing here touches state or storage.

use super::action::Action;
use super::event::{Button, Keyboard};
use crate::models::{Item, ItemKind, List, NewItem, UserId, YEAR_UNKNOWN};

pub const MENU_MOVIES: &str = "🎥 Movies";
pub const MENU_SERIES: &str = "🎬 Series";
pub const MENU_ADD: &str = "➕ Add movie or series";
pub const MENU_SEARCH: &str = "🔍 Search";
pub const MENU_STATS: &str = "📊 Statistics";
pub const MENU_LISTS: &str = "📂 My lists";
pub const MENU_NEW_LIST: &str = "🆕 New list";
pub const MENU_OPEN_LIST: &str = "🔑 Open list";

pub const KIND_MOVIE: &str = "Movie";
pub const KIND_SERIES: &str = "Series";
pub const BACK: &str = "↩️ Back";
pub const SKIP_COMMENT: &str = "➡️ Skip comment";
pub const SEARCH_MOVIES: &str = "🎥 Search movies";
pub const SEARCH_SERIES: &str = "🎬 Search series";
pub const SEARCH_ALL: &str = "🔍 Search everywhere";

const MAX_BUTTON_CHARS: usize = 40;

pub const MAIN_MENU_LABELS: [&str; 8] = [
    MENU_MOVIES,
    MENU_SERIES,
    MENU_ADD,
    MENU_SEARCH,
    MENU_STATS,
    MENU_LISTS,
    MENU_NEW_LIST,
    MENU_OPEN_LIST,
];

pub fn main_menu() -> Keyboard {
    Keyboard::Menu(MAIN_MENU_LABELS.iter().map(|l| l.to_string()).collect())
}

pub fn kind_menu() -> Keyboard {
    Keyboard::Menu(vec![KIND_MOVIE.to_string(), KIND_SERIES.to_string(), BACK.to_string()])
}

pub fn kind_buttons() -> Keyboard {
    Keyboard::Inline(vec![
        Button::new(format!("🎥 {}", KIND_MOVIE), Action::ChooseKind(ItemKind::Movie)),
        Button::new(format!("🎬 {}", KIND_SERIES), Action::ChooseKind(ItemKind::Series)),
        Button::new(BACK, Action::BackToMain),
    ])
}

pub fn skip_menu() -> Keyboard {
    Keyboard::Menu(vec![SKIP_COMMENT.to_string()])
}

pub fn search_scope_menu() -> Keyboard {
    Keyboard::Menu(vec![
        SEARCH_MOVIES.to_string(),
        SEARCH_SERIES.to_string(),
        SEARCH_ALL.to_string(),
        BACK.to_string(),
    ])
}

/// Reply-keyboard label to item kind. Accepts the bare words too.
pub fn parse_kind(text: &str) -> Option<ItemKind> {
    match text.trim_start_matches(['🎥', '🎬', ' ']).to_lowercase().as_str() {
        "movie" => Some(ItemKind::Movie),
        "series" => Some(ItemKind::Series),
        _ => None,
    }
}

/// Search scope label. `Some(None)` means both kinds.
pub fn parse_scope(text: &str) -> Option<Option<ItemKind>> {
    match text {
        SEARCH_MOVIES => Some(Some(ItemKind::Movie)),
        SEARCH_SERIES => Some(Some(ItemKind::Series)),
        SEARCH_ALL => Some(None),
        _ => None,
    }
}

/// Labels that belong to a keyboard rather than to a free-text answer.
pub fn is_control_label(text: &str) -> bool {
    MAIN_MENU_LABELS.contains(&text)
        || [SKIP_COMMENT, SEARCH_MOVIES, SEARCH_SERIES, SEARCH_ALL].contains(&text)
}

pub fn noun(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Movie => "movie",
        ItemKind::Series => "series",
    }
}

fn kind_icon(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Movie => "🎥",
        ItemKind::Series => "🎬",
    }
}

fn watched_icon(watched: bool) -> &'static str {
    if watched {
        "✅"
    } else {
        "👁"
    }
}

pub fn truncate_label(label: &str) -> String {
    if label.chars().count() <= MAX_BUTTON_CHARS {
        return label.to_string();
    }
    let head: String = label.chars().take(MAX_BUTTON_CHARS - 3).collect();
    format!("{}...", head)
}

pub fn item_label(item: &Item, with_kind: bool) -> String {
    let mut label = String::new();
    if with_kind {
        label.push_str(kind_icon(item.kind));
    }
    label.push_str(watched_icon(item.watched));
    label.push(' ');
    label.push_str(&item.title);
    if item.has_known_year() {
        label.push_str(&format!(" ({})", item.year));
    }
    truncate_label(&label)
}

pub fn item_buttons(items: &[Item], with_kind: bool) -> Vec<Button> {
    items
        .iter()
        .map(|item| Button::new(item_label(item, with_kind), Action::OpenItem(item.id)))
        .collect()
}

pub fn item_list_header(kind: ItemKind, count: usize, list_name: &str) -> String {
    let title = match kind {
        ItemKind::Movie => "🎥 *Movies*",
        ItemKind::Series => "🎬 *Series*",
    };
    format!("{} in «{}» ({})\n\nTap a title for details.", title, list_name, count)
}

pub fn empty_list(kind: ItemKind, list_name: &str) -> String {
    format!(
        "📭 No {} in «{}» yet.\n\nAdd one with '{}'.",
        noun(kind),
        list_name,
        MENU_ADD
    )
}

pub fn item_details(item: &Item) -> String {
    let mut text = format!(
        "{} *{} #{}*\n\n📌 *{}*\n",
        kind_icon(item.kind),
        noun(item.kind).to_uppercase(),
        item.id,
        item.title
    );

    if let Some(original) = item.original_title.as_deref().filter(|o| *o != item.title) {
        text.push_str(&format!("🌐 *Original title:* {}\n", original));
    }
    text.push_str(&format!("📅 *Year:* {}\n", item.year));
    if let Some(genre) = &item.genre {
        text.push_str(&format!("🎭 *Genre:* {}\n", genre));
    }
    let status = if item.watched {
        "✅ Watched"
    } else {
        "👁 Want to watch"
    };
    text.push_str(&format!("📊 *Status:* {}\n", status));

    let mut ratings = Vec::new();
    if let Some(kp) = item.kp_rating {
        ratings.push(format!("KP: ⭐{}", kp));
    }
    if let Some(imdb) = item.imdb_rating {
        ratings.push(format!("IMDb: ⭐{}", imdb));
    }
    if !ratings.is_empty() {
        text.push_str(&format!("⭐ *Ratings:* {}\n", ratings.join(" | ")));
    }

    let mut links = Vec::new();
    if let Some(url) = &item.kp_url {
        links.push(format!("[Kinopoisk]({})", url));
    }
    if let Some(url) = &item.imdb_url {
        links.push(format!("[IMDb]({})", url));
    }
    if !links.is_empty() {
        text.push_str(&format!("🔗 *Links:* {}\n", links.join(" | ")));
    }

    match &item.comment {
        Some(comment) => text.push_str(&format!("\n💭 *Comment:*\n{}\n", comment)),
        None => text.push_str("\n💭 *Comment:* none\n"),
    }
    text
}

pub fn item_actions(id: i64) -> Keyboard {
    Keyboard::Inline(vec![
        Button::new("✅ Watched", Action::Watch(id)),
        Button::new("👁 Want to watch", Action::Unwatch(id)),
        Button::new("💬 Comment", Action::Comment(id)),
        Button::new("🗑 Delete", Action::Delete(id)),
        Button::new(BACK, Action::BackToMain),
    ])
}

pub fn delete_confirmation(item: &Item) -> (String, Keyboard) {
    let text = format!(
        "🗑 Delete *{}* from your list?\n\nThis cannot be undone.",
        item.title
    );
    let keyboard = Keyboard::Inline(vec![
        Button::new("✅ Yes, delete", Action::ConfirmDelete(item.id)),
        Button::new("❌ No, keep it", Action::OpenItem(item.id)),
    ]);
    (text, keyboard)
}

/// Summary shown right after an item is stored.
pub fn added_summary(item: &NewItem) -> String {
    let mut text = format!("✅ *{}* added to your list!\n\n", item.title);

    if let Some(original) = item.original_title.as_deref().filter(|o| *o != item.title) {
        text.push_str(&format!("🌐 {}\n", original));
    }
    text.push_str(&format!("📅 Year: {}\n", item.year_or_unknown()));
    if let Some(genre) = &item.genre {
        text.push_str(&format!("🎭 Genre: {}\n", genre));
    }
    if let Some(kp) = item.kp_rating {
        text.push_str(&format!("⭐ Kinopoisk: {}\n", kp));
    }
    if let Some(imdb) = item.imdb_rating {
        text.push_str(&format!("⭐ IMDb: {}\n", imdb));
    }

    let mut warnings = Vec::new();
    if item.year_or_unknown() == YEAR_UNKNOWN {
        warnings.push("release year");
    }
    if item.kp_rating.is_none() && item.imdb_rating.is_none() {
        warnings.push("ratings");
    }
    if item.genre.is_none() {
        warnings.push("genre");
    }
    if !warnings.is_empty() {
        text.push_str(&format!("\n⚠️ Could not find: {}\n", warnings.join(", ")));
    }
    text
}

pub fn duplicate_item(title: &str, kind: ItemKind) -> String {
    format!(
        "❌ *'{}'* is already in your list!\n\nTry adding another {}.",
        title,
        noun(kind)
    )
}

pub const SEARCH_PAGE_SIZE: usize = 10;

pub fn search_page(
    results: &[Item],
    term: &str,
    scope: Option<ItemKind>,
    page: usize,
) -> (String, Keyboard) {
    let what = match scope {
        Some(ItemKind::Movie) => "movies",
        Some(ItemKind::Series) => "series",
        None => "results",
    };
    let mut text = format!(
        "🔍 *Search results for '{}'*\n\n📊 *Found {}:* {}\n",
        term,
        what,
        results.len()
    );
    if scope.is_none() {
        let movies = results.iter().filter(|i| i.kind == ItemKind::Movie).count();
        text.push_str(&format!(
            "🎥 Movies: {}\n🎬 Series: {}\n",
            movies,
            results.len() - movies
        ));
    }

    let start = page * SEARCH_PAGE_SIZE;
    let end = (start + SEARCH_PAGE_SIZE).min(results.len());
    if results.len() > SEARCH_PAGE_SIZE {
        text.push_str(&format!(
            "\n⚠️ Showing {}-{} of {}\n",
            start + 1,
            end,
            results.len()
        ));
    }

    let mut buttons = item_buttons(&results[start.min(end)..end], true);
    if page > 0 {
        buttons.push(Button::new("⬅️ Previous", Action::SearchPage(page - 1)));
    }
    if end < results.len() {
        buttons.push(Button::new("➡️ Next", Action::SearchPage(page + 1)));
    }
    buttons.push(Button::new("🔄 New search", Action::NewSearch));
    buttons.push(Button::new(BACK, Action::BackToMain));
    (text, Keyboard::Inline(buttons))
}

pub fn nothing_found(term: &str, scope: Option<ItemKind>) -> String {
    let where_ = match scope {
        Some(ItemKind::Movie) => " among movies",
        Some(ItemKind::Series) => " among series",
        None => "",
    };
    format!("🔍 Nothing matches '{}'{}.\n\nTry another search.", term, where_)
}

pub fn stats(items: &[Item]) -> String {
    let count = |kind: ItemKind| items.iter().filter(|i| i.kind == kind).count();
    let watched = |kind: ItemKind| items.iter().filter(|i| i.kind == kind && i.watched).count();
    let (movies, series) = (count(ItemKind::Movie), count(ItemKind::Series));
    let (watched_movies, watched_series) = (watched(ItemKind::Movie), watched(ItemKind::Series));

    format!(
        "📊 *Your statistics:*\n\n\
         🎥 *Movies:* {} (watched: {})\n\
         🎬 *Series:* {} (watched: {})\n\
         📋 *Total:* {} (watched: {})",
        movies,
        watched_movies,
        series,
        watched_series,
        movies + series,
        watched_movies + watched_series
    )
}

pub fn lists_overview(lists: &[List]) -> (String, Keyboard) {
    let buttons = lists
        .iter()
        .map(|l| Button::new(truncate_label(&format!("📂 {} (#{})", l.name, l.id)), Action::OpenList(l.id)))
        .collect();
    (
        "📂 *Your lists*\n\nShare a list's number and PIN to let someone else open it.".to_string(),
        Keyboard::Inline(buttons),
    )
}

pub fn list_menu(list: &List, viewer: UserId) -> (String, Keyboard) {
    let owned = list.owner_id == viewer;
    let text = format!(
        "📂 *{}* (#{})\n{}",
        list.name,
        list.id,
        if owned { "Your list" } else { "Shared with you" }
    );
    let mut buttons = vec![
        Button::new(MENU_MOVIES, Action::ListItems(list.id, ItemKind::Movie)),
        Button::new(MENU_SERIES, Action::ListItems(list.id, ItemKind::Series)),
        Button::new("➕ Add to this list", Action::AddToList(list.id)),
    ];
    if owned {
        buttons.push(Button::new("🔒 Change PIN", Action::ChangePin(list.id)));
    }
    buttons.push(Button::new(BACK, Action::BackToMain));
    (text, Keyboard::Inline(buttons))
}

pub fn welcome() -> String {
    "🎬 *Cinelist: your personal movie and series list*\n\n\
     I can help you:\n\
     • 📝 Keep track of movies and series\n\
     • ✅ Mark titles as watched or want to watch\n\
     • 💬 Leave comments\n\
     • 🔍 Search your list\n\
     • ⭐ Find ratings and genres automatically\n\
     • 📂 Share lists protected by a PIN\n\n\
     Choose an action below:"
        .to_string()
}
