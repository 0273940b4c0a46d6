//! In-process registry of live client sessions.
//!
//! One user may hold several concurrent sessions (devices, tabs); the
//! registry keys `user_id -> Vec<Session>` in a `DashMap` so fan-out to one
//! user never waits on connect/disconnect churn for another. A session is
//! handed out by [`SessionRegistry::connect`], lives while its entry is in
//! the map, and is closed for good by disconnect or eviction. A reconnect
//! always mints a fresh session id.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskio_core::metrics;
use taskio_core::models::{SessionId, UserId};

use crate::events::Event;

/// Sender half handed to the registry; the socket task drains the receiver.
pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// One open client session.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub sender: EventSender,
}

/// Registry of live sessions keyed by user.
///
/// Invariant: a `user_id` key exists iff its session list is non-empty.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<UserId, Vec<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Register a new session for `user_id`.
    ///
    /// Returns the session id and the receiver the socket task drains. The
    /// first session for a user creates the presence entry.
    pub fn connect(&self, user_id: UserId) -> (SessionId, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = SessionId::new();

        let session = Session {
            session_id: session_id.clone(),
            sender: tx,
        };
        self.sessions.entry(user_id.clone()).or_default().push(session);

        metrics::sessions::ACTIVE_SESSIONS.inc();
        metrics::sessions::CONNECTED_USERS.set(self.sessions.len() as i64);

        info!(
            user_id = %user_id.as_str(),
            session_id = %session_id.as_str(),
            "Session connected"
        );

        (session_id, rx)
    }

    /// Remove a session. The user entry is dropped entirely once its last
    /// session is gone (no leaked keys).
    pub fn disconnect(&self, user_id: &UserId, session_id: &SessionId) {
        let mut removed = false;
        if let Some(mut sessions) = self.sessions.get_mut(user_id) {
            let before = sessions.len();
            sessions.retain(|s| s.session_id != *session_id);
            removed = sessions.len() < before;
        }

        // Re-checked under the shard lock so a concurrent connect between
        // the retain above and this call is not thrown away.
        self.sessions
            .remove_if(user_id, |_, sessions| sessions.is_empty());

        if removed {
            metrics::sessions::ACTIVE_SESSIONS.dec();
            metrics::sessions::CONNECTED_USERS.set(self.sessions.len() as i64);
            info!(
                user_id = %user_id.as_str(),
                session_id = %session_id.as_str(),
                "Session disconnected"
            );
        } else {
            warn!(
                user_id = %user_id.as_str(),
                session_id = %session_id.as_str(),
                "Attempted to disconnect unknown session"
            );
        }
    }

    /// Deliver an event to every session of one user, returning the number
    /// of sessions reached.
    ///
    /// A session whose channel is gone is evicted on the spot and never
    /// aborts delivery to its siblings. Zero sessions is a no-op.
    pub fn send_to_user(&self, user_id: &UserId, event: &Event) -> usize {
        let mut sent_count = 0;
        let mut failed_sessions = Vec::new();

        if let Some(sessions) = self.sessions.get(user_id) {
            for session in sessions.iter() {
                match session.sender.send(event.clone()) {
                    Ok(()) => {
                        sent_count += 1;
                        debug!(
                            user_id = %user_id.as_str(),
                            session_id = %session.session_id.as_str(),
                            event_type = %event.event_type,
                            "Event sent to session"
                        );
                    }
                    Err(err) => {
                        warn!(
                            user_id = %user_id.as_str(),
                            session_id = %session.session_id.as_str(),
                            error = %err,
                            "Failed to send event to session, marking for cleanup"
                        );
                        failed_sessions.push(session.session_id.clone());
                    }
                }
            }
        }

        // Evict dead sessions outside the read guard.
        let failed_count = failed_sessions.len();
        for session_id in failed_sessions {
            self.disconnect(user_id, &session_id);
        }

        if sent_count > 0 {
            metrics::sessions::EVENTS_DELIVERED
                .with_label_values(&[event.event_type.as_str()])
                .inc_by(sent_count as f64);
        }
        if failed_count > 0 {
            metrics::sessions::EVENTS_DROPPED
                .with_label_values(&["dead_session"])
                .inc_by(failed_count as f64);
        }

        sent_count
    }

    /// Deliver an event to every session of every user, with the same
    /// per-session failure independence as [`Self::send_to_user`].
    pub fn broadcast(&self, event: &Event) -> usize {
        let mut sent_count = 0;
        let mut failed_sessions: Vec<(UserId, SessionId)> = Vec::new();

        for entry in self.sessions.iter() {
            for session in entry.value().iter() {
                match session.sender.send(event.clone()) {
                    Ok(()) => sent_count += 1,
                    Err(err) => {
                        warn!(
                            user_id = %entry.key().as_str(),
                            session_id = %session.session_id.as_str(),
                            error = %err,
                            "Failed to send event to session, marking for cleanup"
                        );
                        failed_sessions.push((entry.key().clone(), session.session_id.clone()));
                    }
                }
            }
        }

        let failed_count = failed_sessions.len();
        for (user_id, session_id) in failed_sessions {
            self.disconnect(&user_id, &session_id);
        }

        if sent_count > 0 {
            metrics::sessions::EVENTS_DELIVERED
                .with_label_values(&[event.event_type.as_str()])
                .inc_by(sent_count as f64);
            debug!(
                sent_count,
                event_type = %event.event_type,
                "Broadcast fanned out to all sessions"
            );
        }
        if failed_count > 0 {
            metrics::sessions::EVENTS_DROPPED
                .with_label_values(&["dead_session"])
                .inc_by(failed_count as f64);
        }

        sent_count
    }

    /// Total open sessions across all users.
    pub fn session_count(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Users with at least one open session.
    pub fn user_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.sessions.contains_key(user_id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("users", &self.sessions.len())
            .finish()
    }
}
