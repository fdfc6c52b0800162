//! Streaming sessions.
//!
//! A session owns the conversation of one bidirectional connection. Every
//! inbound payload carries the new messages of a turn; the reply is streamed
//! back fragment by fragment and, once complete, the turn is added to the
//! history. Turns are handled strictly one after another.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::chat::Message;
use crate::resolver::{self, Completion, Constraints, Resolver};

/// A turn, as sent by the client.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Payload {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// What the server sends back: `{"part": ...}` or `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ServerEvent {
    Part(String),
    Error(String),
}

fn attempts_made(err: &resolver::Error) -> usize {
    match err {
        resolver::Error::Exhausted { attempts, .. } => *attempts,
        resolver::Error::Downstream { .. } => 1,
        _ => 0,
    }
}

pub(crate) struct Session {
    resolver: Arc<Resolver>,
    history: Vec<Message>,
}

impl Session {
    pub(crate) fn new(resolver: Arc<Resolver>) -> Session {
        Session {
            resolver,
            history: Vec::new(),
        }
    }

    pub(crate) fn history(&self) -> &[Message] {
        &self.history
    }

    /// Handle one raw inbound payload, sending events to `events`. Malformed
    /// payloads and failed turns are reported as error events and leave the
    /// history untouched.
    pub(crate) async fn handle(
        &mut self,
        raw: &str,
        events: &UnboundedSender<ServerEvent>,
    ) -> Option<Completion> {
        let payload: Payload = match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = events.send(ServerEvent::Error(format!("invalid payload: {}", err)));
                return None;
            }
        };

        if payload.messages.is_empty() {
            let _ = events.send(ServerEvent::Error("payload has no messages".to_string()));
            return None;
        }

        let mut messages = self.history.clone();
        messages.extend(payload.messages.iter().cloned());

        let constraints = Constraints::new(payload.model, payload.provider);

        let result = self
            .resolver
            .stream(&messages, &constraints, |part| {
                let _ = events.send(ServerEvent::Part(part.to_string()));
            })
            .await;

        match result {
            Ok(completion) => {
                self.history.extend(payload.messages);
                self.history
                    .push(Message::assistant(completion.text.clone()));

                Some(completion)
            }
            Err(err) => {
                tracing::warn!("streamed turn failed: {}", err);

                let _ = events.send(ServerEvent::Error(format!(
                    "{} (attempts: {})",
                    err,
                    attempts_made(&err)
                )));

                None
            }
        }
    }
}
