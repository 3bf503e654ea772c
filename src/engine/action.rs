use crate::models::{ItemId, ItemKind, ListId};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A button the engine rendered and may later receive back.
///
/// Only the transport sees the string form (`encode` / `FromStr`);
/// everything inside the engine matches on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    OpenItem(ItemId),
    Watch(ItemId),
    Unwatch(ItemId),
    Comment(ItemId),
    Delete(ItemId),
    ConfirmDelete(ItemId),
    ChooseKind(ItemKind),
    SearchPage(usize),
    NewSearch,
    BackToMain,
    OpenList(ListId),
    ListItems(ListId, ItemKind),
    AddToList(ListId),
    ChangePin(ListId),
}

#[derive(Debug, Error, PartialEq)]
#[error("unrecognized action token: {0:?}")]
pub struct ActionParseError(pub String);

impl Action {
    pub fn encode(&self) -> String {
        match self {
            Action::OpenItem(id) => format!("item_{}", id),
            Action::Watch(id) => format!("watch_{}", id),
            Action::Unwatch(id) => format!("unwatch_{}", id),
            Action::Comment(id) => format!("comment_{}", id),
            Action::Delete(id) => format!("delete_{}", id),
            Action::ConfirmDelete(id) => format!("confirm_delete_{}", id),
            Action::ChooseKind(kind) => format!("kind_{}", kind),
            Action::SearchPage(page) => format!("page_{}", page),
            Action::NewSearch => "new_search".to_string(),
            Action::BackToMain => "back_to_main".to_string(),
            Action::OpenList(id) => format!("list_{}", id),
            Action::ListItems(id, kind) => format!("listitems_{}_{}", id, kind),
            Action::AddToList(id) => format!("addto_{}", id),
            Action::ChangePin(id) => format!("changepin_{}", id),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let err = || ActionParseError(token.to_string());
        let id = |raw: &str| raw.parse::<i64>().map_err(|_| err());
        let kind = |raw: &str| raw.parse::<ItemKind>().map_err(|_| err());

        let parts: Vec<&str> = token.split('_').collect();
        let action = match parts.as_slice() {
            ["item", raw] => Action::OpenItem(id(raw)?),
            ["watch", raw] => Action::Watch(id(raw)?),
            ["unwatch", raw] => Action::Unwatch(id(raw)?),
            ["comment", raw] => Action::Comment(id(raw)?),
            ["delete", raw] => Action::Delete(id(raw)?),
            ["confirm", "delete", raw] => Action::ConfirmDelete(id(raw)?),
            ["kind", raw] => Action::ChooseKind(kind(raw)?),
            ["page", raw] => Action::SearchPage(raw.parse().map_err(|_| err())?),
            ["new", "search"] => Action::NewSearch,
            ["back", "to", "main"] => Action::BackToMain,
            ["list", raw] => Action::OpenList(id(raw)?),
            ["listitems", raw_id, raw_kind] => Action::ListItems(id(raw_id)?, kind(raw_kind)?),
            ["addto", raw] => Action::AddToList(id(raw)?),
            ["changepin", raw] => Action::ChangePin(id(raw)?),
            _ => return Err(err()),
        };
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_action_survives_the_transport() {
        let actions = [
            Action::OpenItem(7),
            Action::Watch(7),
            Action::Unwatch(7),
            Action::Comment(7),
            Action::Delete(7),
            Action::ConfirmDelete(7),
            Action::ChooseKind(ItemKind::Series),
            Action::SearchPage(3),
            Action::NewSearch,
            Action::BackToMain,
            Action::OpenList(12),
            Action::ListItems(12, ItemKind::Movie),
            Action::AddToList(12),
            Action::ChangePin(12),
        ];
        for action in actions {
            assert_eq!(action.encode().parse::<Action>(), Ok(action));
        }
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(Action::ConfirmDelete(42).to_string(), "confirm_delete_42");
        assert_eq!(Action::ListItems(3, ItemKind::Series).encode(), "listitems_3_series");
        assert_eq!("item_5".parse::<Action>(), Ok(Action::OpenItem(5)));
    }

    #[test]
    fn test_malformed_tokens_are_errors() {
        for token in ["", "item", "item_", "item_abc", "watch_1_2", "confirm_delete", "kind_show", "page_-1", "bogus_1", "item_99999999999999999999"] {
            assert!(token.parse::<Action>().is_err(), "{token} should not parse");
        }
    }
}
