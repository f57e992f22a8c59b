//! Workspace identifiers: `user:<uuid>` or `team:<uuid>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Owner kind of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkspaceKind {
    User,
    Team,
}

impl WorkspaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceKind::User => "user",
            WorkspaceKind::Team => "team",
        }
    }
}

/// Isolation boundary for all graph data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkspaceId {
    kind: WorkspaceKind,
    owner: Uuid,
}

impl WorkspaceId {
    pub fn new(kind: WorkspaceKind, owner: Uuid) -> Self {
        Self { kind, owner }
    }

    /// Personal workspace of a user.
    pub fn for_user(user_id: Uuid) -> Self {
        Self::new(WorkspaceKind::User, user_id)
    }

    pub fn for_team(team_id: Uuid) -> Self {
        Self::new(WorkspaceKind::Team, team_id)
    }

    pub fn kind(&self) -> WorkspaceKind {
        self.kind
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Resolve the workspace of an inbound message.
    ///
    /// An absent workspace falls back to the sender's personal workspace.
    /// A present but malformed one is rejected rather than guessed at.
    pub fn resolve(workspace_id: Option<&str>, user_id: &str) -> Result<Self> {
        match workspace_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse(),
            None => {
                let owner = Uuid::parse_str(user_id.trim()).map_err(|_| {
                    Error::Validation(format!(
                        "no workspace_id and user_id '{}' is not a uuid",
                        user_id
                    ))
                })?;
                Ok(Self::for_user(owner))
            }
        }
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.owner)
    }
}

impl FromStr for WorkspaceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (prefix, rest) = s.split_once(':').ok_or_else(|| {
            Error::Validation(format!("workspace_id '{}' must be user:<uuid> or team:<uuid>", s))
        })?;
        let kind = match prefix {
            "user" => WorkspaceKind::User,
            "team" => WorkspaceKind::Team,
            other => {
                return Err(Error::Validation(format!(
                    "unknown workspace kind '{}' in '{}'",
                    other, s
                )))
            }
        };
        let owner = Uuid::parse_str(rest)
            .map_err(|e| Error::Validation(format!("workspace_id '{}': {}", s, e)))?;
        Ok(Self { kind, owner })
    }
}

impl TryFrom<String> for WorkspaceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WorkspaceId> for String {
    fn from(value: WorkspaceId) -> Self {
        value.to_string()
    }
}
