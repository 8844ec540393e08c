//! State shared by all sessions of a dev server.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast, watch};

/// Something the server wants one or more sessions to do.
#[derive(Debug, Clone)]
pub(crate) enum Push {
    /// Deliver a text frame; `None` targets every session.
    Event {
        target: Option<String>,
        text: String,
    },
    /// Close every session of `user_id` with `code`.
    Kick { user_id: String, code: u16 },
    /// Server is stopping.
    Shutdown,
}

/// A message a client sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Received {
    pub user_id: String,
    pub payload: serde_json::Value,
}

pub(crate) struct Hub {
    pushes: broadcast::Sender<Push>,
    sessions: watch::Sender<HashMap<String, usize>>,
    inbox: RwLock<Vec<Received>>,
}

impl Hub {
    pub(crate) fn new() -> Self {
        let (pushes, _) = broadcast::channel(256);
        let (sessions, _) = watch::channel(HashMap::new());
        Self {
            pushes,
            sessions,
            inbox: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Push> {
        self.pushes.subscribe()
    }

    /// Returns how many sessions will see the push.
    pub(crate) fn push(&self, push: Push) -> usize {
        self.pushes.send(push).unwrap_or(0)
    }

    pub(crate) fn join(&self, user_id: &str) {
        self.sessions.send_modify(|sessions| {
            *sessions.entry(user_id.to_string()).or_default() += 1;
        });
    }

    pub(crate) fn leave(&self, user_id: &str) {
        self.sessions.send_modify(|sessions| {
            if let Some(count) = sessions.get_mut(user_id) {
                *count -= 1;
                if *count == 0 {
                    sessions.remove(user_id);
                }
            }
        });
    }

    pub(crate) fn session_count(&self, user_id: &str) -> usize {
        self.sessions.borrow().get(user_id).copied().unwrap_or(0)
    }

    pub(crate) async fn wait_for_sessions(&self, user_id: &str, count: usize) {
        let mut sessions = self.sessions.subscribe();
        // The sender lives as long as the hub, so this only ends on a match.
        let _ = sessions
            .wait_for(|s| s.get(user_id).copied().unwrap_or(0) == count)
            .await;
    }

    pub(crate) async fn record(&self, user_id: &str, payload: serde_json::Value) {
        self.inbox.write().await.push(Received {
            user_id: user_id.to_string(),
            payload,
        });
    }

    pub(crate) async fn inbox(&self) -> Vec<Received> {
        self.inbox.read().await.clone()
    }
}
