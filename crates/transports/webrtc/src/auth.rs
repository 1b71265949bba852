//! Role checks at the signaling request boundary

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Application-level role carried by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Publishes audio into a session
    Teacher,
    /// Receives a relayed copy of a session's audio
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(Error::SessionConflict(format!("Unknown role: {}", other))),
        }
    }
}

/// Request that needs an authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartSession,
    JoinSession,
}

/// Substitutable permission check applied before a session request mutates state
pub trait AuthorizationPolicy: Send + Sync {
    /// Allow or reject `action` for a requester holding `role`
    ///
    /// Rejections are `SessionConflict` errors, reported to the requester.
    fn authorize(&self, role: Role, action: Action) -> Result<()>;
}

/// Default policy: only teachers start sessions, anyone may join
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl AuthorizationPolicy for RolePolicy {
    fn authorize(&self, role: Role, action: Action) -> Result<()> {
        match (action, role) {
            (Action::StartSession, Role::Teacher) => Ok(()),
            (Action::StartSession, _) => Err(Error::SessionConflict(
                "Only teachers can start live sessions.".to_string(),
            )),
            (Action::JoinSession, _) => Ok(()),
        }
    }
}
