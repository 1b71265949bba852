//! Join flow: attach a publisher's audio to a subscriber

use super::registry::SessionRegistry;
use crate::peer::ConnectionRegistry;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether media was attached during a join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAttachment {
    /// A relay subscription of the publisher's track was attached
    Attached,
    /// The publisher has not produced a track yet; nothing was attached
    Unavailable,
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub session_id: String,
    pub publisher_id: String,
    pub media: MediaAttachment,
}

/// Attaches relay subscriptions onto subscriber connections
pub struct RelayCoordinator {
    sessions: Arc<SessionRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl RelayCoordinator {
    pub fn new(sessions: Arc<SessionRegistry>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            sessions,
            connections,
        }
    }

    /// Join `subscriber_id` to `session_id`
    ///
    /// Succeeds without media when the publisher has no track yet. A later
    /// track is not attached retroactively.
    pub async fn join(&self, session_id: &str, subscriber_id: &str) -> Result<JoinOutcome> {
        let publisher_id = self
            .sessions
            .get_publisher(session_id)
            .filter(|_| !session_id.is_empty())
            .ok_or_else(|| {
                Error::SessionNotActive(format!(
                    "Live session {} not active or no teacher found.",
                    session_id
                ))
            })?;

        let subscriber = self
            .connections
            .get(subscriber_id)
            .await
            .ok_or_else(|| Error::ConnectionNotFound(subscriber_id.to_string()))?;

        let media = match self.sessions.get_published_track(&publisher_id) {
            Some(track) => {
                let _ops = subscriber.lock_ops().await;
                if subscriber.is_closed() {
                    return Err(Error::ConnectionNotFound(subscriber_id.to_string()));
                }
                subscriber.handle().attach_relay(track.subscribe()).await?;
                info!(
                    "{} joined session {}, relaying {} ({} subscribers)",
                    subscriber_id,
                    session_id,
                    track.track_id(),
                    track.subscriber_count()
                );
                MediaAttachment::Attached
            }
            None => {
                debug!(
                    "{} joined session {} before {} published a track",
                    subscriber_id, session_id, publisher_id
                );
                MediaAttachment::Unavailable
            }
        };

        Ok(JoinOutcome {
            session_id: session_id.to_string(),
            publisher_id,
            media,
        })
    }
}
