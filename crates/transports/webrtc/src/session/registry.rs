//! Session id to publisher mapping

use crate::media::PublishedTrack;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct SessionEntry {
    publisher_id: String,
    track: Option<PublishedTrack>,
    created_at: SystemTime,
}

/// Outcome of [`SessionRegistry::activate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The session was registered with the requested publisher
    Created,
    /// The session already had a publisher, which was kept
    AlreadyActive { publisher_id: String },
}

/// Snapshot of one active session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub publisher_id: String,
    pub has_track: bool,
    pub created_at: SystemTime,
}

/// Registry of active live sessions
///
/// Every mutation takes the write lock for its whole duration, so a
/// `remove_by_publisher` racing a `set_published_track` for the same
/// publisher either sees the track recorded and drops it with the session,
/// or runs first and leaves nothing to record into.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `publisher_id` as the publisher of `session_id`
    ///
    /// First writer wins: an existing publisher is never replaced.
    pub fn activate(&self, session_id: &str, publisher_id: &str) -> Activation {
        let mut sessions = self.sessions.write();

        if let Some(existing) = sessions.get(session_id) {
            if existing.publisher_id != publisher_id {
                warn!(
                    "Session {} already published by {}, ignoring activation by {}",
                    session_id, existing.publisher_id, publisher_id
                );
            }
            return Activation::AlreadyActive {
                publisher_id: existing.publisher_id.clone(),
            };
        }

        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                publisher_id: publisher_id.to_string(),
                track: None,
                created_at: SystemTime::now(),
            },
        );

        info!("Session {} activated by {}", session_id, publisher_id);
        Activation::Created
    }

    pub fn get_publisher(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.publisher_id.clone())
    }

    /// Record the publisher's audio on every session it publishes
    ///
    /// Returns the number of sessions updated. Zero is not an error: the track
    /// may arrive before activation or after teardown.
    pub fn set_published_track(&self, publisher_id: &str, track: PublishedTrack) -> usize {
        let mut sessions = self.sessions.write();
        let mut updated = 0;

        for (session_id, entry) in sessions.iter_mut() {
            if entry.publisher_id == publisher_id {
                entry.track = Some(track.clone());
                updated += 1;
                info!(
                    "Session {} now carries track {} from {}",
                    session_id,
                    track.track_id(),
                    publisher_id
                );
            }
        }

        if updated == 0 {
            debug!(
                "No active session for publisher {}, track {} not recorded",
                publisher_id,
                track.track_id()
            );
        }

        updated
    }

    pub fn get_published_track(&self, publisher_id: &str) -> Option<PublishedTrack> {
        self.sessions
            .read()
            .values()
            .find(|entry| entry.publisher_id == publisher_id)
            .and_then(|entry| entry.track.clone())
    }

    /// Remove every session published by `publisher_id`
    ///
    /// Returns the removed session ids.
    pub fn remove_by_publisher(&self, publisher_id: &str) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let removed: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.publisher_id == publisher_id)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &removed {
            sessions.remove(session_id);
            info!("Session {} ended with publisher {}", session_id, publisher_id);
        }

        removed
    }

    /// Remove `session_id` if `publisher_id` is its publisher
    pub fn deactivate(&self, session_id: &str, publisher_id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(session_id) {
            Some(entry) if entry.publisher_id == publisher_id => {
                sessions.remove(session_id);
                info!("Session {} left by its publisher {}", session_id, publisher_id);
                true
            }
            _ => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .iter()
            .map(|(id, entry)| SessionInfo {
                session_id: id.clone(),
                publisher_id: entry.publisher_id.clone(),
                has_track: entry.track.is_some(),
                created_at: entry.created_at,
            })
            .collect()
    }
}
