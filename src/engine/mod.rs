//! Per-user dialogue state machine.
//!
//! Every inbound [`Event`] is handled under the sender's session lock, so two
//! events from one user never interleave. Storage failures inside a step end
//! the flow: the session is dropped and the user is put back on the main menu.

mod action;
mod event;
pub mod render;

pub use action::Action;
pub use event::{Button, Event, Keyboard, MessageRef, Response};

use crate::error::{StoreError, StoreResult};
use crate::models::{Item, ItemId, ItemKind, ItemPatch, ListId, NewItem, UserId};
use crate::resolver::MetadataResolver;
use crate::session::{SessionGuard, SessionState, SessionStore};
use crate::store::{self, Store};
use render::SEARCH_PAGE_SIZE;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Matches fetched per search; the rest are never shown.
pub const SEARCH_FETCH_LIMIT: u32 = 50;

/// Name of the list the main-menu flows work on. Created on first use.
pub const PERSONAL_LIST: &str = "Personal";

const FAILURE: &str = "⚠️ Something went wrong. Please start again from the menu.";
const USE_MENU: &str = "Use the menu buttons 👇";
const RECORD_GONE: &str = "❌ Record not found";
const ADD_PROMPT: &str = "🎬 *What do you want to add?*\n\nYou can type the title in Russian or English.";

type Step = StoreResult<Vec<Response>>;

pub struct Engine {
    store: Arc<dyn Store>,
    resolver: Arc<MetadataResolver>,
    sessions: SessionStore,
    /// Lists opened with a PIN during this process's lifetime.
    grants: RwLock<HashSet<(UserId, ListId)>>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, resolver: Arc<MetadataResolver>) -> Self {
        Self {
            store,
            resolver,
            sessions: SessionStore::new(),
            grants: RwLock::new(HashSet::new()),
        }
    }

    #[instrument(skip_all, fields(user = event.user()))]
    pub async fn handle(&self, event: Event) -> Vec<Response> {
        let user = event.user();
        let mut session = self.sessions.lock(user).await;
        let before = session.state().map(SessionState::tag);

        let outcome = match event {
            Event::Text { text, .. } => self.on_text(&mut session, text.trim()).await,
            Event::Action {
                message, action, ..
            } => self.on_action(&mut session, message, action).await,
        };

        match outcome {
            Ok(responses) => {
                let after = session.state().map(SessionState::tag);
                if before != after {
                    debug!("Session {:?} -> {:?}", before, after);
                }
                responses
            }
            Err(e) => {
                error!("Step for user {} failed in {:?}: {}", user, before, e);
                session.clear();
                vec![Response::send(FAILURE, render::main_menu())]
            }
        }
    }

    async fn on_text(&self, session: &mut SessionGuard, text: &str) -> Step {
        if text == "/start" || text == "/help" {
            session.clear();
            return Ok(vec![Response::send(render::welcome(), render::main_menu())]);
        }
        if is_cancel(text) {
            session.clear();
            return Ok(vec![main_menu_response()]);
        }

        let Some(state) = session.state().cloned() else {
            return self.on_menu(session, text).await;
        };
        let user = session.user();

        match &state {
            SessionState::ChoosingType { list_id } => match render::parse_kind(text) {
                Some(kind) => Ok(advance(
                    session,
                    SessionState::EnteringTitle {
                        list_id: *list_id,
                        kind,
                    },
                )),
                None => Ok(reprompt(&state, "Choose movie or series.")),
            },
            SessionState::AwaitingItemType { list_id } => match render::parse_kind(text) {
                Some(kind) => Ok(advance(
                    session,
                    SessionState::AwaitingItemTitle {
                        list_id: *list_id,
                        kind,
                    },
                )),
                None => Ok(reprompt(&state, "Choose movie or series.")),
            },
            SessionState::EnteringTitle { .. } | SessionState::AwaitingItemTitle { .. }
                if is_free_text(text) && store::validate_title(text).is_err() =>
            {
                Ok(reprompt(
                    &state,
                    &format!("The title must be at most {} characters.", store::MAX_TITLE_CHARS),
                ))
            }
            SessionState::EnteringTitle { list_id, kind } if is_free_text(text) => {
                self.add_title(session, *list_id, *kind, text, true).await
            }
            SessionState::AwaitingItemTitle { list_id, kind } if is_free_text(text) => {
                self.add_title(session, *list_id, *kind, text, false).await
            }
            SessionState::EnteringTitle { .. } | SessionState::AwaitingItemTitle { .. } => {
                Ok(reprompt(&state, "The title can't be empty."))
            }
            SessionState::AddingComment { item_id } if text == render::SKIP_COMMENT => {
                session.clear();
                self.show_item_after("➡️ Comment skipped.", *item_id).await
            }
            SessionState::AddingComment { item_id } if is_free_text(text) => {
                session.clear();
                self.save_comment(*item_id, text, "💬 Comment added!").await
            }
            SessionState::EditingComment { item_id } if is_free_text(text) => {
                session.clear();
                self.save_comment(*item_id, text, "💬 Comment updated!").await
            }
            SessionState::AddingComment { .. } | SessionState::EditingComment { .. } => {
                Ok(reprompt(&state, "Type the comment as plain text."))
            }
            SessionState::ChoosingSearchType { list_id } => match render::parse_scope(text) {
                Some(scope) => Ok(advance(
                    session,
                    SessionState::EnteringSearchTerm {
                        list_id: *list_id,
                        scope,
                    },
                )),
                None => Ok(reprompt(&state, "Choose where to search.")),
            },
            SessionState::EnteringSearchTerm { list_id, scope } if is_free_text(text) => {
                self.run_search(session, *list_id, *scope, text).await
            }
            SessionState::EnteringSearchTerm { .. } => {
                Ok(reprompt(&state, "The search query can't be empty."))
            }
            SessionState::ShowingSearchResults { .. } => Ok(reprompt(
                &state,
                "Pick a result below or tap 🔄 New search.",
            )),
            SessionState::AwaitingListName if is_free_text(text) => {
                match store::validate_list_name(text) {
                    Ok(()) => Ok(advance(
                        session,
                        SessionState::AwaitingListPin {
                            name: text.to_string(),
                        },
                    )),
                    Err(e) => Ok(reprompt(&state, &e.to_string())),
                }
            }
            SessionState::AwaitingListName => Ok(reprompt(&state, "The list name can't be empty.")),
            SessionState::AwaitingListPin { name } => {
                if !store::is_valid_pin(text) {
                    return Ok(reprompt(&state, "The PIN must be 4 to 6 digits."));
                }
                self.create_list(session, name, text).await
            }
            SessionState::AwaitingListId => match text.parse::<ListId>() {
                Ok(list_id) => match self.store.get_list(list_id).await {
                    Ok(_) => Ok(advance(session, SessionState::AwaitingListPinAccess { list_id })),
                    Err(StoreError::NotFound) => {
                        Ok(reprompt(&state, &format!("List #{} not found.", list_id)))
                    }
                    Err(e) => Err(e),
                },
                Err(_) => Ok(reprompt(&state, "The list number must be numeric.")),
            },
            SessionState::AwaitingListPinAccess { list_id } => {
                session.clear();
                self.open_with_pin(user, *list_id, text).await
            }
            SessionState::AwaitingNewPin { list_id } => {
                if !store::is_valid_pin(text) {
                    return Ok(reprompt(&state, "The PIN must be 4 to 6 digits."));
                }
                session.clear();
                self.change_pin(*list_id, text).await
            }
        }
    }

    async fn on_menu(&self, session: &mut SessionGuard, text: &str) -> Step {
        let user = session.user();
        match text {
            render::MENU_MOVIES => self.show_personal(user, ItemKind::Movie).await,
            render::MENU_SERIES => self.show_personal(user, ItemKind::Series).await,
            render::MENU_ADD => {
                let list_id = self.personal_list(user).await?;
                Ok(advance(session, SessionState::ChoosingType { list_id }))
            }
            render::MENU_SEARCH => {
                let list_id = self.personal_list(user).await?;
                Ok(advance(session, SessionState::ChoosingSearchType { list_id }))
            }
            render::MENU_STATS => {
                let list_id = self.personal_list(user).await?;
                let items = self.store.items_for_list(list_id, None).await?;
                Ok(vec![Response::send(render::stats(&items), render::main_menu())])
            }
            render::MENU_LISTS => {
                self.personal_list(user).await?;
                let lists = self.store.lists_for_owner(user).await?;
                let (text, keyboard) = render::lists_overview(&lists);
                Ok(vec![Response::send(text, keyboard)])
            }
            render::MENU_NEW_LIST => Ok(advance(session, SessionState::AwaitingListName)),
            render::MENU_OPEN_LIST => Ok(advance(session, SessionState::AwaitingListId)),
            _ => Ok(vec![Response::send(USE_MENU, render::main_menu())]),
        }
    }

    async fn on_action(
        &self,
        session: &mut SessionGuard,
        message: MessageRef,
        action: Option<Action>,
    ) -> Step {
        let Some(action) = action else {
            return Ok(vec![Response::notice("❓ Unknown action")]);
        };
        if action == Action::BackToMain {
            session.clear();
            return Ok(vec![Response::Delete { message }, main_menu_response()]);
        }

        match session.state().cloned() {
            Some(state) => self.on_flow_action(session, message, state, action).await,
            None => self.on_idle_action(session, message, action).await,
        }
    }

    /// Taps that arrive while a flow is waiting for input.
    async fn on_flow_action(
        &self,
        session: &mut SessionGuard,
        message: MessageRef,
        state: SessionState,
        action: Action,
    ) -> Step {
        match (&state, action) {
            (SessionState::ChoosingType { list_id }, Action::ChooseKind(kind)) => Ok(advance(
                session,
                SessionState::EnteringTitle {
                    list_id: *list_id,
                    kind,
                },
            )),
            (SessionState::AwaitingItemType { list_id }, Action::ChooseKind(kind)) => Ok(advance(
                session,
                SessionState::AwaitingItemTitle {
                    list_id: *list_id,
                    kind,
                },
            )),
            (SessionState::ShowingSearchResults { results, .. }, Action::OpenItem(id))
                if results.iter().any(|item| item.id == id) =>
            {
                session.clear();
                self.open_item(session.user(), message, id).await
            }
            (SessionState::ShowingSearchResults { list_id, .. }, Action::NewSearch) => {
                let mut responses = vec![Response::Delete { message }];
                responses.extend(advance(
                    session,
                    SessionState::ChoosingSearchType { list_id: *list_id },
                ));
                Ok(responses)
            }
            (
                SessionState::ShowingSearchResults {
                    list_id,
                    scope,
                    term,
                    results,
                    ..
                },
                Action::SearchPage(page),
            ) if page * SEARCH_PAGE_SIZE < results.len() => {
                let (text, keyboard) = render::search_page(results, term, *scope, page);
                session.set(SessionState::ShowingSearchResults {
                    list_id: *list_id,
                    scope: *scope,
                    term: term.clone(),
                    results: results.clone(),
                    page,
                });
                Ok(vec![Response::edit(message, text, keyboard)])
            }
            _ => Ok(reprompt(&state, "Finish or cancel the current step first.")),
        }
    }

    async fn on_idle_action(
        &self,
        session: &mut SessionGuard,
        message: MessageRef,
        action: Action,
    ) -> Step {
        let user = session.user();
        match action {
            Action::OpenItem(id) => self.open_item(user, message, id).await,
            Action::Watch(id) => self.mark_watched(user, message, id, true).await,
            Action::Unwatch(id) => self.mark_watched(user, message, id, false).await,
            Action::Comment(id) => {
                let Some(item) = self.accessible_item(user, id).await? else {
                    return Ok(vec![Response::notice(RECORD_GONE)]);
                };
                session.set(SessionState::EditingComment { item_id: id });
                let text = format!(
                    "💭 *Editing comment for {}*\n\nCurrent comment: {}\n\nType the new comment:",
                    item.title,
                    item.comment.as_deref().unwrap_or("none")
                );
                Ok(vec![
                    Response::Delete { message },
                    Response::send(text, Keyboard::ForceReply),
                ])
            }
            Action::Delete(id) => {
                let Some(item) = self.accessible_item(user, id).await? else {
                    return Ok(vec![Response::notice(RECORD_GONE)]);
                };
                let (text, keyboard) = render::delete_confirmation(&item);
                Ok(vec![Response::edit(message, text, keyboard)])
            }
            Action::ConfirmDelete(id) => {
                let Some(item) = self.accessible_item(user, id).await? else {
                    return Ok(vec![Response::notice(RECORD_GONE)]);
                };
                if !self.store.delete_item(id).await? {
                    return Ok(vec![Response::notice(RECORD_GONE)]);
                }
                info!("User {} deleted item {} '{}'", user, id, item.title);
                Ok(vec![
                    Response::edit(
                        message,
                        format!("🗑 *{}* removed from your list.", item.title),
                        Keyboard::None,
                    ),
                    Response::notice("✅ Deleted"),
                ])
            }
            Action::NewSearch => {
                let list_id = self.personal_list(user).await?;
                let mut responses = vec![Response::Delete { message }];
                responses.extend(advance(session, SessionState::ChoosingSearchType { list_id }));
                Ok(responses)
            }
            Action::ChooseKind(_) | Action::SearchPage(_) => {
                Ok(vec![Response::notice("⌛ This button has expired")])
            }
            Action::OpenList(list_id) => {
                if !self.can_access(user, list_id).await? {
                    return Ok(vec![no_access()]);
                }
                let list = self.store.get_list(list_id).await?;
                let (text, keyboard) = render::list_menu(&list, user);
                Ok(vec![Response::edit(message, text, keyboard)])
            }
            Action::ListItems(list_id, kind) => {
                if !self.can_access(user, list_id).await? {
                    return Ok(vec![no_access()]);
                }
                let list = self.store.get_list(list_id).await?;
                let items = self.store.items_for_list(list_id, Some(kind)).await?;
                let back = Button::new(render::BACK, Action::OpenList(list_id));
                let text = if items.is_empty() {
                    render::empty_list(kind, &list.name)
                } else {
                    render::item_list_header(kind, items.len(), &list.name)
                };
                let mut buttons = render::item_buttons(&items, false);
                buttons.push(back);
                Ok(vec![Response::edit(message, text, Keyboard::Inline(buttons))])
            }
            Action::AddToList(list_id) => {
                if !self.can_access(user, list_id).await? {
                    return Ok(vec![no_access()]);
                }
                Ok(advance(session, SessionState::AwaitingItemType { list_id }))
            }
            Action::ChangePin(list_id) => {
                let list = match self.store.get_list(list_id).await {
                    Ok(list) => list,
                    Err(StoreError::NotFound) => return Ok(vec![no_access()]),
                    Err(e) => return Err(e),
                };
                if list.owner_id != user {
                    return Ok(vec![Response::notice("⛔ Only the owner can change the PIN")]);
                }
                Ok(advance(session, SessionState::AwaitingNewPin { list_id }))
            }
            Action::BackToMain => Ok(vec![main_menu_response()]),
        }
    }

    /// Stores a typed title. Metadata lookups degrade to empty data and never fail the step.
    async fn add_title(
        &self,
        session: &mut SessionGuard,
        list_id: ListId,
        kind: ItemKind,
        title: &str,
        ask_comment: bool,
    ) -> Step {
        let existing = self.store.items_for_list(list_id, Some(kind)).await?;
        let needle = store::fold_key(title);
        if existing.iter().any(|item| store::fold_key(&item.title) == needle) {
            session.clear();
            return Ok(vec![Response::send(
                render::duplicate_item(title, kind),
                render::main_menu(),
            )]);
        }

        let metadata = self.resolver.resolve(title).await;
        if let Some(found) = metadata.kind.filter(|found| *found != kind) {
            debug!("'{}' resolved as a {}, keeping the chosen {}", title, found, kind);
        }
        let new_item = NewItem::from_metadata(kind, title, metadata);
        let item_id = match self.store.add_item(list_id, &new_item).await {
            Ok(id) => id,
            Err(StoreError::DuplicateItem) => {
                session.clear();
                return Ok(vec![Response::send(
                    render::duplicate_item(title, kind),
                    render::main_menu(),
                )]);
            }
            Err(e) => return Err(e),
        };
        info!(
            "User {} added {} '{}' as item {} to list {}",
            session.user(),
            kind,
            title,
            item_id,
            list_id
        );

        let summary = render::added_summary(&new_item);
        if ask_comment {
            let mut responses = vec![Response::send(summary, Keyboard::None)];
            responses.extend(advance(session, SessionState::AddingComment { item_id }));
            return Ok(responses);
        }

        session.clear();
        let item = self.store.get_item(item_id).await?;
        Ok(vec![
            Response::send(summary, render::main_menu()),
            Response::send(render::item_details(&item), render::item_actions(item_id)),
        ])
    }

    async fn save_comment(&self, item_id: ItemId, text: &str, note: &str) -> Step {
        if !self.store.update_item(item_id, &ItemPatch::comment(text)).await? {
            return Ok(vec![Response::send(RECORD_GONE, render::main_menu())]);
        }
        self.show_item_after(note, item_id).await
    }

    async fn show_item_after(&self, note: &str, item_id: ItemId) -> Step {
        match self.store.get_item(item_id).await {
            Ok(item) => Ok(vec![
                Response::send(note, render::main_menu()),
                Response::send(render::item_details(&item), render::item_actions(item_id)),
            ]),
            Err(StoreError::NotFound) => Ok(vec![Response::send(RECORD_GONE, render::main_menu())]),
            Err(e) => Err(e),
        }
    }

    async fn run_search(
        &self,
        session: &mut SessionGuard,
        list_id: ListId,
        scope: Option<ItemKind>,
        term: &str,
    ) -> Step {
        let results = self
            .store
            .search_items(list_id, term, scope, SEARCH_FETCH_LIMIT)
            .await?;
        debug!("Search '{}' in list {} matched {}", term, list_id, results.len());

        if results.is_empty() {
            session.clear();
            return Ok(vec![Response::send(
                render::nothing_found(term, scope),
                render::main_menu(),
            )]);
        }
        Ok(advance(
            session,
            SessionState::ShowingSearchResults {
                list_id,
                scope,
                term: term.to_string(),
                results,
                page: 0,
            },
        ))
    }

    async fn create_list(&self, session: &mut SessionGuard, name: &str, pin: &str) -> Step {
        let user = session.user();
        session.clear();
        match self.store.create_list(user, name, pin).await {
            Ok(list_id) => {
                info!("User {} created list {} '{}'", user, list_id, name);
                let list = self.store.get_list(list_id).await?;
                let (text, keyboard) = render::list_menu(&list, user);
                Ok(vec![
                    Response::send(
                        format!(
                            "✅ List «{}» created. Its number is #{}.\n\nShare the number and PIN to give someone access.",
                            name, list_id
                        ),
                        render::main_menu(),
                    ),
                    Response::send(text, keyboard),
                ])
            }
            Err(StoreError::DuplicateName) => Ok(vec![Response::send(
                format!("❌ You already have a list named «{}».", name),
                render::main_menu(),
            )]),
            Err(e) => Err(e),
        }
    }

    async fn open_with_pin(&self, user: UserId, list_id: ListId, pin: &str) -> Step {
        if !self.store.verify_access(list_id, pin, user).await? {
            warn!("User {} supplied a wrong PIN for list {}", user, list_id);
            return Ok(vec![Response::send(
                "⛔ Wrong PIN. Access denied.",
                render::main_menu(),
            )]);
        }

        self.grants.write().await.insert((user, list_id));
        info!("User {} opened list {}", user, list_id);
        let list = self.store.get_list(list_id).await?;
        let (text, keyboard) = render::list_menu(&list, user);
        Ok(vec![
            Response::send("🔓 Access granted.", render::main_menu()),
            Response::send(text, keyboard),
        ])
    }

    async fn change_pin(&self, list_id: ListId, pin: &str) -> Step {
        if !self.store.rotate_pin(list_id, pin).await? {
            return Ok(vec![Response::send("❌ That list no longer exists.", render::main_menu())]);
        }
        // Anyone who opened the list with the old PIN has to enter the new one.
        self.grants.write().await.retain(|(_, granted)| *granted != list_id);
        info!("PIN rotated for list {}", list_id);
        Ok(vec![Response::send(
            "🔒 PIN changed. Others will need the new PIN to open this list.",
            render::main_menu(),
        )])
    }

    async fn open_item(&self, user: UserId, message: MessageRef, id: ItemId) -> Step {
        match self.accessible_item(user, id).await? {
            Some(item) => Ok(vec![Response::edit(
                message,
                render::item_details(&item),
                render::item_actions(id),
            )]),
            None => Ok(vec![Response::notice(RECORD_GONE)]),
        }
    }

    async fn mark_watched(&self, user: UserId, message: MessageRef, id: ItemId, watched: bool) -> Step {
        if self.accessible_item(user, id).await?.is_none()
            || !self.store.update_item(id, &ItemPatch::watched(watched)).await?
        {
            return Ok(vec![Response::notice(RECORD_GONE)]);
        }
        let item = self.store.get_item(id).await?;
        let notice = if watched {
            "✅ Marked as watched"
        } else {
            "👁 Marked as want to watch"
        };
        Ok(vec![
            Response::edit(message, render::item_details(&item), render::item_actions(id)),
            Response::notice(notice),
        ])
    }

    async fn show_personal(&self, user: UserId, kind: ItemKind) -> Step {
        let list_id = self.personal_list(user).await?;
        let items = self.store.items_for_list(list_id, Some(kind)).await?;
        if items.is_empty() {
            return Ok(vec![Response::send(
                render::empty_list(kind, PERSONAL_LIST),
                render::main_menu(),
            )]);
        }
        Ok(vec![Response::send(
            render::item_list_header(kind, items.len(), PERSONAL_LIST),
            Keyboard::Inline(render::item_buttons(&items, false)),
        )])
    }

    /// `None` both when the item is gone and when the user may not see its list.
    async fn accessible_item(&self, user: UserId, id: ItemId) -> StoreResult<Option<Item>> {
        let item = match self.store.get_item(id).await {
            Ok(item) => item,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !self.can_access(user, item.list_id).await? {
            warn!("User {} denied access to item {}", user, id);
            return Ok(None);
        }
        Ok(Some(item))
    }

    async fn can_access(&self, user: UserId, list_id: ListId) -> StoreResult<bool> {
        if self.grants.read().await.contains(&(user, list_id)) {
            return Ok(true);
        }
        match self.store.get_list(list_id).await {
            Ok(list) => Ok(list.owner_id == user),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn personal_list(&self, user: UserId) -> StoreResult<ListId> {
        let lists = self.store.lists_for_owner(user).await?;
        if let Some(list) = lists.iter().find(|l| l.name == PERSONAL_LIST) {
            return Ok(list.id);
        }
        let list_id = self
            .store
            .create_list(user, PERSONAL_LIST, &generated_pin())
            .await?;
        info!("Created personal list {} for user {}", list_id, user);
        Ok(list_id)
    }
}

fn is_cancel(text: &str) -> bool {
    matches!(
        text.to_lowercase().as_str(),
        "back" | "↩️ back" | "cancel" | "/cancel"
    )
}

fn is_free_text(text: &str) -> bool {
    !text.is_empty() && !render::is_control_label(text)
}

fn generated_pin() -> String {
    format!("{:06}", Uuid::new_v4().as_u128() % 1_000_000)
}

fn main_menu_response() -> Response {
    Response::send("Main menu:", render::main_menu())
}

fn no_access() -> Response {
    Response::notice("⛔ You don't have access to that list")
}

/// Instructions for the step a session is waiting on.
fn prompt(state: &SessionState) -> (String, Keyboard) {
    match state {
        SessionState::ChoosingType { .. } => (ADD_PROMPT.to_string(), render::kind_menu()),
        SessionState::AwaitingItemType { .. } => (ADD_PROMPT.to_string(), render::kind_buttons()),
        SessionState::EnteringTitle { kind, .. } | SessionState::AwaitingItemTitle { kind, .. } => (
            format!(
                "🎥 *Enter the {} title:*\n\n\
                 • Russian or English both work\n\
                 • For example 'Интерстеллар' or 'Inception'\n\
                 • I'll look up ratings and genres on Kinopoisk and IMDb",
                render::noun(*kind)
            ),
            Keyboard::Remove,
        ),
        SessionState::AddingComment { .. } => (
            format!(
                "💭 *Want to add a comment?*\n\nType it, or tap '{}'.",
                render::SKIP_COMMENT
            ),
            render::skip_menu(),
        ),
        SessionState::EditingComment { .. } => {
            ("💭 Type the new comment:".to_string(), Keyboard::ForceReply)
        }
        SessionState::ChoosingSearchType { .. } => (
            "🔍 *Search your list*\n\nWhere should I look?".to_string(),
            render::search_scope_menu(),
        ),
        SessionState::EnteringSearchTerm { scope, .. } => {
            let among = match scope {
                Some(kind) => format!(" ({} only)", render::noun(*kind)),
                None => String::new(),
            };
            (
                format!("🔍 Enter a title or part of one{}:", among),
                Keyboard::Remove,
            )
        }
        SessionState::ShowingSearchResults {
            scope,
            term,
            results,
            page,
            ..
        } => render::search_page(results, term, *scope, *page),
        SessionState::AwaitingListName => (
            "🆕 Enter a name for the new list:".to_string(),
            Keyboard::Remove,
        ),
        SessionState::AwaitingListPin { name } => (
            format!("🔒 Choose a PIN for «{}» (4 to 6 digits):", name),
            Keyboard::Remove,
        ),
        SessionState::AwaitingListId => ("🔑 Enter the list number:".to_string(), Keyboard::Remove),
        SessionState::AwaitingListPinAccess { list_id } => (
            format!("🔒 Enter the PIN for list #{}:", list_id),
            Keyboard::Remove,
        ),
        SessionState::AwaitingNewPin { .. } => (
            "🔒 Enter the new PIN (4 to 6 digits):".to_string(),
            Keyboard::Remove,
        ),
    }
}

fn advance(session: &mut SessionGuard, next: SessionState) -> Vec<Response> {
    let (text, keyboard) = prompt(&next);
    session.set(next);
    vec![Response::send(text, keyboard)]
}

fn reprompt(state: &SessionState, problem: &str) -> Vec<Response> {
    let (text, keyboard) = prompt(state);
    vec![Response::send(format!("❌ {}\n\n{}", problem, text), keyboard)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{List, Metadata};
    use crate::resolver::tests::StubSource;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn inception() -> Metadata {
        Metadata {
            title: Some("Inception".to_string()),
            original_title: Some("Inception".to_string()),
            year: Some("2010".to_string()),
            imdb_rating: Some(8.8),
            ..Default::default()
        }
    }

    async fn engine_with(source: StubSource) -> Engine {
        let store = SqliteStore::in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(store);
        let resolver = MetadataResolver::new(Some(Box::new(source)), None, Duration::from_secs(1));
        Engine::new(store, Arc::new(resolver))
    }

    async fn engine() -> Engine {
        engine_with(StubSource::answering(inception())).await
    }

    async fn say(engine: &Engine, user: UserId, text: &str) -> Vec<Response> {
        engine.handle(Event::text(user, text)).await
    }

    async fn tap(engine: &Engine, user: UserId, action: Action) -> Vec<Response> {
        engine.handle(Event::tap(user, 100, action)).await
    }

    fn all_text(responses: &[Response]) -> String {
        responses
            .iter()
            .filter_map(Response::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn actions(responses: &[Response]) -> Vec<Action> {
        responses
            .iter()
            .filter_map(Response::keyboard)
            .flat_map(|keyboard| match keyboard {
                Keyboard::Inline(buttons) => buttons.iter().map(|b| b.action).collect(),
                _ => Vec::new(),
            })
            .collect()
    }

    async fn list_named(engine: &Engine, owner: UserId, name: &str) -> List {
        engine
            .store
            .lists_for_owner(owner)
            .await
            .unwrap()
            .into_iter()
            .find(|l| l.name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_movie_then_skip_comment() {
        let engine = engine().await;

        say(&engine, 1, render::MENU_ADD).await;
        assert!(matches!(
            engine.sessions.get(1).await,
            Some(SessionState::ChoosingType { .. })
        ));

        say(&engine, 1, render::KIND_MOVIE).await;
        let responses = say(&engine, 1, "Inception").await;
        assert!(all_text(&responses).contains("*Inception* added"));

        let Some(SessionState::AddingComment { item_id }) = engine.sessions.get(1).await else {
            panic!("expected the comment prompt");
        };
        let stored = engine.store.get_item(item_id).await.unwrap();
        assert_eq!(stored.kind, ItemKind::Movie);
        assert_eq!(stored.title, "Inception");
        assert_eq!(stored.year, "2010");
        assert_eq!(stored.imdb_rating, Some(8.8));

        let responses = say(&engine, 1, render::SKIP_COMMENT).await;
        assert!(engine.sessions.get(1).await.is_none());
        assert!(all_text(&responses).contains("*Comment:* none"));
        assert!(actions(&responses).contains(&Action::Watch(item_id)));
        assert!(engine.store.get_item(item_id).await.unwrap().comment.is_none());
    }

    #[tokio::test]
    async fn test_comment_is_saved() {
        let engine = engine().await;
        say(&engine, 1, render::MENU_ADD).await;
        say(&engine, 1, render::KIND_MOVIE).await;
        say(&engine, 1, "Inception").await;
        let Some(SessionState::AddingComment { item_id }) = engine.sessions.get(1).await else {
            panic!("expected the comment prompt");
        };

        say(&engine, 1, "Rewatch with friends").await;

        let item = engine.store.get_item(item_id).await.unwrap();
        assert_eq!(item.comment.as_deref(), Some("Rewatch with friends"));
        assert!(engine.sessions.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_title_is_reported() {
        let engine = engine().await;
        for _ in 0..2 {
            say(&engine, 1, render::MENU_ADD).await;
            say(&engine, 1, render::KIND_MOVIE).await;
            say(&engine, 1, "Inception").await;
            say(&engine, 1, "cancel").await;
        }
        say(&engine, 1, render::MENU_ADD).await;
        say(&engine, 1, render::KIND_MOVIE).await;
        let responses = say(&engine, 1, "INCEPTION").await;

        assert!(all_text(&responses).contains("already in your list"));
        assert!(engine.sessions.get(1).await.is_none());
        let list_id = engine.personal_list(1).await.unwrap();
        let items = engine.store.items_for_list(list_id, None).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_still_adds() {
        let mut source = StubSource::answering(inception());
        source.fail = true;
        let engine = engine_with(source).await;

        say(&engine, 1, render::MENU_ADD).await;
        say(&engine, 1, render::KIND_SERIES).await;
        let responses = say(&engine, 1, "Dark").await;

        assert!(all_text(&responses).contains("Could not find"));
        let Some(SessionState::AddingComment { item_id }) = engine.sessions.get(1).await else {
            panic!("expected the comment prompt");
        };
        let item = engine.store.get_item(item_id).await.unwrap();
        assert_eq!(item.kind, ItemKind::Series);
        assert!(!item.has_known_year());
    }

    #[tokio::test]
    async fn test_shared_list_access() {
        let engine = engine().await;

        say(&engine, 1, render::MENU_NEW_LIST).await;
        say(&engine, 1, "Weekend").await;
        let responses = say(&engine, 1, "1234").await;
        assert!(all_text(&responses).contains("created"));
        assert!(engine.sessions.get(1).await.is_none());
        let weekend = list_named(&engine, 1, "Weekend").await;

        say(&engine, 2, render::MENU_OPEN_LIST).await;
        say(&engine, 2, &weekend.id.to_string()).await;
        assert_eq!(
            engine.sessions.get(2).await,
            Some(SessionState::AwaitingListPinAccess { list_id: weekend.id })
        );
        let responses = say(&engine, 2, "1234").await;
        assert!(all_text(&responses).contains("Access granted"));
        assert!(actions(&responses).contains(&Action::AddToList(weekend.id)));
        assert!(!actions(&responses).contains(&Action::ChangePin(weekend.id)));
        assert!(engine.sessions.get(2).await.is_none());

        say(&engine, 3, render::MENU_OPEN_LIST).await;
        say(&engine, 3, &weekend.id.to_string()).await;
        let responses = say(&engine, 3, "0000").await;
        assert!(all_text(&responses).contains("Access denied"));
        assert!(engine.sessions.get(3).await.is_none());
        assert_eq!(
            tap(&engine, 3, Action::OpenList(weekend.id)).await,
            vec![no_access()]
        );
    }

    #[tokio::test]
    async fn test_shared_list_add_and_pin_rotation() {
        let engine = engine().await;
        let list_id = engine.store.create_list(1, "Weekend", "1234").await.unwrap();
        say(&engine, 2, render::MENU_OPEN_LIST).await;
        say(&engine, 2, &list_id.to_string()).await;
        say(&engine, 2, "1234").await;

        tap(&engine, 2, Action::AddToList(list_id)).await;
        tap(&engine, 2, Action::ChooseKind(ItemKind::Movie)).await;
        let responses = say(&engine, 2, "Inception").await;
        assert!(engine.sessions.get(2).await.is_none());
        assert!(all_text(&responses).contains("MOVIE #"));
        assert_eq!(
            engine.store.items_for_list(list_id, None).await.unwrap().len(),
            1
        );

        let responses = tap(&engine, 2, Action::ChangePin(list_id)).await;
        assert!(all_text(&responses).contains("Only the owner"));

        tap(&engine, 1, Action::ChangePin(list_id)).await;
        say(&engine, 1, "98765").await;
        assert!(!engine.store.verify_access(list_id, "1234", 2).await.unwrap());
        assert_eq!(
            tap(&engine, 2, Action::OpenList(list_id)).await,
            vec![no_access()]
        );
    }

    #[tokio::test]
    async fn test_overlong_title_reprompts_without_lookup() {
        let source = StubSource::answering(inception());
        let seen = Arc::clone(&source.seen);
        let engine = engine_with(source).await;
        say(&engine, 1, render::MENU_ADD).await;
        say(&engine, 1, render::KIND_MOVIE).await;

        let long = "Я".repeat(store::MAX_TITLE_CHARS + 1);
        let responses = say(&engine, 1, &long).await;

        assert!(all_text(&responses).contains("at most 255 characters"));
        assert!(matches!(
            engine.sessions.get(1).await,
            Some(SessionState::EnteringTitle { kind: ItemKind::Movie, .. })
        ));
        assert!(seen.lock().unwrap().is_empty());

        let responses = say(&engine, 1, "Inception").await;
        assert!(all_text(&responses).contains("Inception"));
        assert!(matches!(
            engine.sessions.get(1).await,
            Some(SessionState::AddingComment { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_input_reprompts_in_place() {
        let engine = engine().await;
        say(&engine, 1, render::MENU_NEW_LIST).await;
        say(&engine, 1, "Weekend").await;

        let responses = say(&engine, 1, "12ab").await;
        assert!(all_text(&responses).contains("4 to 6 digits"));
        assert_eq!(
            engine.sessions.get(1).await,
            Some(SessionState::AwaitingListPin {
                name: "Weekend".to_string()
            })
        );

        say(&engine, 1, "cancel").await;
        assert!(engine.sessions.get(1).await.is_none());

        say(&engine, 1, render::MENU_OPEN_LIST).await;
        let responses = say(&engine, 1, "nine").await;
        assert!(all_text(&responses).contains("must be numeric"));
        let responses = say(&engine, 1, "424242").await;
        assert!(all_text(&responses).contains("not found"));
        assert_eq!(engine.sessions.get(1).await, Some(SessionState::AwaitingListId));

        say(&engine, 1, "/cancel").await;
        say(&engine, 1, render::MENU_ADD).await;
        let responses = say(&engine, 1, render::MENU_STATS).await;
        assert!(all_text(&responses).contains("Choose movie or series"));
    }

    #[tokio::test]
    async fn test_duplicate_list_name_aborts() {
        let engine = engine().await;
        engine.store.create_list(1, "Weekend", "1234").await.unwrap();

        say(&engine, 1, render::MENU_NEW_LIST).await;
        say(&engine, 1, "Weekend").await;
        let responses = say(&engine, 1, "5555").await;

        assert!(all_text(&responses).contains("already have a list"));
        assert!(engine.sessions.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_search_shows_ten_and_keeps_fifty() {
        let engine = engine().await;
        let list_id = engine.personal_list(1).await.unwrap();
        for i in 0..55 {
            let item = NewItem::new(ItemKind::Movie, format!("Film {:02}", i));
            engine.store.add_item(list_id, &item).await.unwrap();
        }

        say(&engine, 1, render::MENU_SEARCH).await;
        say(&engine, 1, render::SEARCH_ALL).await;
        let responses = say(&engine, 1, "film").await;

        let shown = actions(&responses)
            .into_iter()
            .filter(|a| matches!(a, Action::OpenItem(_)))
            .count();
        assert_eq!(shown, 10);
        let Some(SessionState::ShowingSearchResults { results, .. }) = engine.sessions.get(1).await
        else {
            panic!("expected search results");
        };
        assert_eq!(results.len(), 50);

        let responses = tap(&engine, 1, Action::SearchPage(4)).await;
        assert!(matches!(responses[0], Response::Edit { .. }));
        assert!(!actions(&responses).contains(&Action::SearchPage(5)));

        let responses = tap(&engine, 1, Action::SearchPage(5)).await;
        assert!(all_text(&responses).contains("Finish or cancel"));

        tap(&engine, 1, Action::NewSearch).await;
        assert_eq!(
            engine.sessions.get(1).await,
            Some(SessionState::ChoosingSearchType { list_id })
        );
    }

    #[tokio::test]
    async fn test_search_without_matches_returns_to_menu() {
        let engine = engine().await;
        say(&engine, 1, render::MENU_SEARCH).await;
        say(&engine, 1, render::SEARCH_SERIES).await;
        let responses = say(&engine, 1, "nothing").await;

        assert!(all_text(&responses).contains("Nothing matches"));
        assert!(engine.sessions.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_needs_confirmation() {
        let engine = engine().await;
        let list_id = engine.personal_list(1).await.unwrap();
        let id = engine
            .store
            .add_item(list_id, &NewItem::new(ItemKind::Movie, "Inception"))
            .await
            .unwrap();

        let responses = tap(&engine, 1, Action::Delete(id)).await;
        assert_eq!(
            actions(&responses),
            vec![Action::ConfirmDelete(id), Action::OpenItem(id)]
        );
        assert!(engine.store.get_item(id).await.is_ok());

        tap(&engine, 1, Action::ConfirmDelete(id)).await;
        assert!(matches!(
            engine.store.get_item(id).await,
            Err(StoreError::NotFound)
        ));

        let responses = tap(&engine, 1, Action::ConfirmDelete(id)).await;
        assert_eq!(responses, vec![Response::notice(RECORD_GONE)]);
    }

    #[tokio::test]
    async fn test_other_users_items_are_hidden() {
        let engine = engine().await;
        let list_id = engine.personal_list(1).await.unwrap();
        let id = engine
            .store
            .add_item(list_id, &NewItem::new(ItemKind::Movie, "Inception"))
            .await
            .unwrap();

        assert_eq!(
            tap(&engine, 2, Action::Watch(id)).await,
            vec![Response::notice(RECORD_GONE)]
        );
        assert!(!engine.store.get_item(id).await.unwrap().watched);

        let responses = tap(&engine, 1, Action::Watch(id)).await;
        assert!(all_text(&responses).contains("Marked as watched"));
        assert!(engine.store.get_item(id).await.unwrap().watched);
    }

    #[tokio::test]
    async fn test_edit_comment_from_item_view() {
        let engine = engine().await;
        let list_id = engine.personal_list(1).await.unwrap();
        let id = engine
            .store
            .add_item(list_id, &NewItem::new(ItemKind::Series, "Dark"))
            .await
            .unwrap();

        tap(&engine, 1, Action::Comment(id)).await;
        assert_eq!(
            engine.sessions.get(1).await,
            Some(SessionState::EditingComment { item_id: id })
        );
        let responses = say(&engine, 1, "Season 2 next").await;

        assert!(all_text(&responses).contains("Comment updated"));
        assert_eq!(
            engine.store.get_item(id).await.unwrap().comment.as_deref(),
            Some("Season 2 next")
        );
    }

    #[tokio::test]
    async fn test_rapid_events_are_serialized() {
        let mut source = StubSource::answering(inception());
        source.delay = Some(Duration::from_millis(50));
        let engine = engine_with(source).await;
        say(&engine, 1, render::MENU_ADD).await;
        say(&engine, 1, render::KIND_MOVIE).await;

        // The second message must be read as the comment for the first title.
        tokio::join!(say(&engine, 1, "Inception"), say(&engine, 1, "Interstellar"));

        let list_id = engine.personal_list(1).await.unwrap();
        let items = engine.store.items_for_list(list_id, None).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Inception");
        assert_eq!(items[0].comment.as_deref(), Some("Interstellar"));
        assert!(engine.sessions.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_input() {
        let engine = engine().await;

        let responses = engine.handle(Event::from_token(1, 7, "launch_rockets")).await;
        assert_eq!(responses, vec![Response::notice("❓ Unknown action")]);

        let responses = say(&engine, 1, "hello").await;
        assert!(all_text(&responses).contains(USE_MENU));

        let responses = tap(&engine, 1, Action::SearchPage(2)).await;
        assert!(all_text(&responses).contains("expired"));
    }

    #[tokio::test]
    async fn test_back_and_start_reset_session() {
        let engine = engine().await;
        say(&engine, 1, render::MENU_SEARCH).await;
        let responses = tap(&engine, 1, Action::BackToMain).await;
        assert_eq!(responses[0], Response::Delete { message: 100 });
        assert!(engine.sessions.get(1).await.is_none());

        say(&engine, 1, render::MENU_NEW_LIST).await;
        let responses = say(&engine, 1, "/start").await;
        assert!(all_text(&responses).contains("Cinelist"));
        assert!(engine.sessions.get(1).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_and_lists_overview() {
        let engine = engine().await;
        let list_id = engine.personal_list(1).await.unwrap();
        let id = engine
            .store
            .add_item(list_id, &NewItem::new(ItemKind::Movie, "Inception"))
            .await
            .unwrap();
        engine.store.update_item(id, &ItemPatch::watched(true)).await.unwrap();
        engine.store.create_list(1, "Weekend", "1234").await.unwrap();

        let responses = say(&engine, 1, render::MENU_STATS).await;
        assert!(all_text(&responses).contains("*Movies:* 1 (watched: 1)"));

        let responses = say(&engine, 1, render::MENU_LISTS).await;
        assert_eq!(actions(&responses).len(), 2);

        let responses = say(&engine, 1, render::MENU_SERIES).await;
        assert!(all_text(&responses).contains("No series"));
    }

    /// Store whose every call fails as if the database went away.
    struct BrokenStore;

    fn down<T>() -> StoreResult<T> {
        Err(StoreError::BackendUnavailable("connection reset".to_string()))
    }

    #[async_trait]
    impl Store for BrokenStore {
        fn backend_name(&self) -> &'static str {
            "broken"
        }
        async fn init_schema(&self) -> StoreResult<()> {
            down()
        }
        async fn create_list(&self, _: UserId, _: &str, _: &str) -> StoreResult<ListId> {
            down()
        }
        async fn lists_for_owner(&self, _: UserId) -> StoreResult<Vec<List>> {
            down()
        }
        async fn get_list(&self, _: ListId) -> StoreResult<List> {
            down()
        }
        async fn rotate_pin(&self, _: ListId, _: &str) -> StoreResult<bool> {
            down()
        }
        async fn add_item(&self, _: ListId, _: &NewItem) -> StoreResult<ItemId> {
            down()
        }
        async fn items_for_list(&self, _: ListId, _: Option<ItemKind>) -> StoreResult<Vec<Item>> {
            down()
        }
        async fn search_items(
            &self,
            _: ListId,
            _: &str,
            _: Option<ItemKind>,
            _: u32,
        ) -> StoreResult<Vec<Item>> {
            down()
        }
        async fn get_item(&self, _: ItemId) -> StoreResult<Item> {
            down()
        }
        async fn update_item(&self, _: ItemId, _: &ItemPatch) -> StoreResult<bool> {
            down()
        }
        async fn delete_item(&self, _: ItemId) -> StoreResult<bool> {
            down()
        }
    }

    #[tokio::test]
    async fn test_store_failure_resets_session() {
        let engine = Engine::new(Arc::new(BrokenStore), Arc::new(MetadataResolver::disabled()));

        say(&engine, 1, render::MENU_OPEN_LIST).await;
        let responses = say(&engine, 1, "12").await;

        assert_eq!(responses, vec![Response::send(FAILURE, render::main_menu())]);
        assert!(engine.sessions.get(1).await.is_none());

        let responses = say(&engine, 1, render::MENU_ADD).await;
        assert_eq!(responses, vec![Response::send(FAILURE, render::main_menu())]);
        assert!(engine.sessions.get(1).await.is_none());
    }
}
