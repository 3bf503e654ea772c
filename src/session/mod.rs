//! Per-user conversation state.
//!
//! Each user has at most one [`Session`]. A missing session means the user is
//! idle and driving the bot from the main menu. Sessions live only in memory.

use crate::models::{Item, ItemId, ItemKind, ListId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Where a user is inside a multi-step flow, with the fields that flow has
/// collected so far.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    ChoosingType { list_id: ListId },
    EnteringTitle { list_id: ListId, kind: ItemKind },
    AddingComment { item_id: ItemId },
    EditingComment { item_id: ItemId },
    ChoosingSearchType { list_id: ListId },
    EnteringSearchTerm { list_id: ListId, scope: Option<ItemKind> },
    ShowingSearchResults {
        list_id: ListId,
        scope: Option<ItemKind>,
        term: String,
        results: Vec<Item>,
        page: usize,
    },
    AwaitingListName,
    AwaitingListPin { name: String },
    AwaitingListId,
    AwaitingListPinAccess { list_id: ListId },
    AwaitingNewPin { list_id: ListId },
    AwaitingItemType { list_id: ListId },
    AwaitingItemTitle { list_id: ListId, kind: ItemKind },
}

impl SessionState {
    pub fn tag(&self) -> &'static str {
        match self {
            SessionState::ChoosingType { .. } => "choosing_type",
            SessionState::EnteringTitle { .. } => "entering_title",
            SessionState::AddingComment { .. } => "adding_comment",
            SessionState::EditingComment { .. } => "editing_comment",
            SessionState::ChoosingSearchType { .. } => "choosing_search_type",
            SessionState::EnteringSearchTerm { .. } => "entering_search_term",
            SessionState::ShowingSearchResults { .. } => "showing_search_results",
            SessionState::AwaitingListName => "awaiting_list_name",
            SessionState::AwaitingListPin { .. } => "awaiting_list_pin",
            SessionState::AwaitingListId => "awaiting_list_id",
            SessionState::AwaitingListPinAccess { .. } => "awaiting_list_pin_access",
            SessionState::AwaitingNewPin { .. } => "awaiting_new_pin",
            SessionState::AwaitingItemType { .. } => "awaiting_item_type",
            SessionState::AwaitingItemTitle { .. } => "awaiting_item_title",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<Session>>>;
type Slots = Arc<SyncMutex<HashMap<UserId, Slot>>>;

/// Process-wide session map.
///
/// The map lock is only held long enough to find or drop a user's slot and
/// never across an await. The slot's own mutex is what serializes
/// conversation steps for that user, so a slow step for one user never
/// blocks anyone else. Idle users have no slot.
#[derive(Default)]
pub struct SessionStore {
    slots: Slots,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user: UserId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(user).or_default())
    }

    /// Waits for exclusive access to `user`'s session for one conversation step.
    pub async fn lock(&self, user: UserId) -> SessionGuard {
        let guard = self.slot(user).lock_owned().await;
        SessionGuard {
            user,
            guard,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Snapshot of the current state. Waits for any in-flight step to finish.
    pub async fn get(&self, user: UserId) -> Option<SessionState> {
        self.lock(user).await.state().cloned()
    }

    pub async fn set(&self, user: UserId, state: SessionState) {
        self.lock(user).await.set(state);
    }

    pub async fn clear(&self, user: UserId) {
        self.lock(user).await.clear();
    }
}

/// Exclusive handle on one user's session, released on drop.
pub struct SessionGuard {
    user: UserId,
    guard: OwnedMutexGuard<Option<Session>>,
    slots: Slots,
}

impl SessionGuard {
    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.guard.as_ref().map(|s| &s.state)
    }

    /// Replaces the state. The original start time survives while a flow advances.
    pub fn set(&mut self, state: SessionState) {
        match self.guard.as_mut() {
            Some(session) => session.state = state,
            None => {
                *self.guard = Some(Session {
                    state,
                    started_at: Utc::now(),
                })
            }
        }
    }

    pub fn clear(&mut self) {
        *self.guard = None;
    }
}

impl Drop for SessionGuard {
    /// Forgets the slot of a user who ended up idle, unless someone else is
    /// already waiting on it. Slots are only cloned under the map lock, so the
    /// count seen here is stable.
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held by this guard.
        let unshared = slots
            .get(&self.user)
            .is_some_and(|slot| Arc::strong_count(slot) == 2);
        if unshared {
            slots.remove(&self.user);
        }
    }
}
