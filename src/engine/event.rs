use super::action::Action;
use crate::models::UserId;
use tracing::debug;

/// Transport handle of a message the bot sent earlier, used to edit or delete it.
pub type MessageRef = i64;

/// Inbound update from a chat transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text {
        user: UserId,
        text: String,
    },
    /// A button tap. `action` is `None` when the token did not decode.
    Action {
        user: UserId,
        message: MessageRef,
        action: Option<Action>,
    },
}

impl Event {
    pub fn text(user: UserId, text: impl Into<String>) -> Self {
        Event::Text {
            user,
            text: text.into(),
        }
    }

    /// Decodes a raw button token at the transport boundary.
    pub fn from_token(user: UserId, message: MessageRef, token: &str) -> Self {
        let action = match token.parse::<Action>() {
            Ok(action) => Some(action),
            Err(e) => {
                debug!("Dropping undecodable token from user {}: {}", user, e);
                None
            }
        };
        Event::Action {
            user,
            message,
            action,
        }
    }

    pub fn tap(user: UserId, message: MessageRef, action: Action) -> Self {
        Event::Action {
            user,
            message,
            action: Some(action),
        }
    }

    pub fn user(&self) -> UserId {
        match self {
            Event::Text { user, .. } | Event::Action { user, .. } => *user,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub action: Action,
}

impl Button {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    /// Leave whatever keyboard the user has.
    None,
    /// Hide the reply keyboard.
    Remove,
    /// Reply keyboard; tapping a label sends it back as text.
    Menu(Vec<String>),
    /// Buttons attached to the message, one per row.
    Inline(Vec<Button>),
    ForceReply,
}

/// Outbound instruction for the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Send {
        text: String,
        keyboard: Keyboard,
    },
    Edit {
        message: MessageRef,
        text: String,
        keyboard: Keyboard,
    },
    Delete {
        message: MessageRef,
    },
    /// Short toast acknowledging a button tap.
    Notice {
        text: String,
    },
}

impl Response {
    pub fn send(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Response::Send {
            text: text.into(),
            keyboard,
        }
    }

    pub fn edit(message: MessageRef, text: impl Into<String>, keyboard: Keyboard) -> Self {
        Response::Edit {
            message,
            text: text.into(),
            keyboard,
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Response::Notice { text: text.into() }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Response::Send { text, .. } | Response::Edit { text, .. } | Response::Notice { text } => {
                Some(text)
            }
            Response::Delete { .. } => None,
        }
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Response::Send { keyboard, .. } | Response::Edit { keyboard, .. } => Some(keyboard),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_token_becomes_empty_action() {
        assert_eq!(
            Event::from_token(3, 10, "launch_rockets"),
            Event::Action {
                user: 3,
                message: 10,
                action: None
            }
        );
        assert_eq!(
            Event::from_token(3, 10, "watch_8"),
            Event::tap(3, 10, Action::Watch(8))
        );
    }

    #[test]
    fn test_response_accessors() {
        let response = Response::send("hi", Keyboard::Remove);
        assert_eq!(response.text(), Some("hi"));
        assert_eq!(response.keyboard(), Some(&Keyboard::Remove));
        assert!(Response::Delete { message: 1 }.text().is_none());
    }
}
