//! Line-oriented transport over stdin/stdout.
//!
//! Input lines are `<user> <text>` for a message, or `<user> !<token> [message]`
//! for a button tap. Responses are printed with their buttons' tokens so a tap
//! can be replayed by typing it back.

use crate::dispatch::{Dispatcher, Outbound};
use crate::engine::{Event, Keyboard, MessageRef, Response};
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Parses one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Event>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (user, rest) = line
        .split_once(char::is_whitespace)
        .ok_or_else(|| anyhow!("expected '<user> <text>', got {:?}", line))?;
    let user = user
        .parse()
        .with_context(|| format!("user id {:?} is not a number", user))?;
    let rest = rest.trim();

    let Some(tap) = rest.strip_prefix('!') else {
        return Ok(Some(Event::text(user, rest)));
    };
    let mut parts = tap.split_whitespace();
    let token = parts.next().unwrap_or_default();
    let message: MessageRef = match parts.next() {
        Some(raw) => raw
            .trim_start_matches('#')
            .parse()
            .with_context(|| format!("message ref {:?} is not a number", raw))?,
        None => 0,
    };
    Ok(Some(Event::from_token(user, message, token)))
}

/// Renders one batch of responses. Sent messages are numbered from `next_ref`.
pub fn format_outbound(out: &Outbound, next_ref: &mut MessageRef) -> String {
    let mut text = String::new();
    for response in &out.responses {
        match response {
            Response::Send { text: body, keyboard } => {
                *next_ref += 1;
                let _ = writeln!(text, "[#{} -> {}] {}", next_ref, out.user, body);
                format_keyboard(&mut text, keyboard);
            }
            Response::Edit {
                message,
                text: body,
                keyboard,
            } => {
                let _ = writeln!(text, "[edit #{} -> {}] {}", message, out.user, body);
                format_keyboard(&mut text, keyboard);
            }
            Response::Delete { message } => {
                let _ = writeln!(text, "[delete #{} -> {}]", message, out.user);
            }
            Response::Notice { text: body } => {
                let _ = writeln!(text, "[notice -> {}] {}", out.user, body);
            }
        }
    }
    text
}

fn format_keyboard(out: &mut String, keyboard: &Keyboard) {
    match keyboard {
        Keyboard::None => {}
        Keyboard::Remove => out.push_str("  (keyboard removed)\n"),
        Keyboard::ForceReply => out.push_str("  (reply expected)\n"),
        Keyboard::Menu(labels) => {
            let _ = writeln!(out, "  menu: {}", labels.join(" | "));
        }
        Keyboard::Inline(buttons) => {
            for button in buttons {
                let _ = writeln!(out, "  [{}] !{}", button.label, button.action.encode());
            }
        }
    }
}

/// Feeds stdin into the dispatcher until EOF, printing answers as they come.
/// Returns once every queued event has been answered.
pub async fn run(dispatcher: Dispatcher, mut outbound: UnboundedReceiver<Outbound>) -> Result<()> {
    let printer = tokio::spawn(async move {
        let mut next_ref: MessageRef = 0;
        while let Some(out) = outbound.recv().await {
            print!("{}", format_outbound(&out, &mut next_ref));
        }
    });

    info!("Reading events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(Some(event)) => dispatcher.dispatch(event).await,
            Ok(None) => {}
            Err(e) => warn!("Ignoring input line: {}", e),
        }
    }

    info!("Input closed, draining pending events");
    // Workers exit once their queues close, which in turn closes the printer.
    dispatcher.close().await;
    printer.await?;
    Ok(())
}
