//! Registered participants and the trader/operator capability split.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DeskError;

pub type ParticipantId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Trader,
    Operator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Trader => "trader",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trader" | "user" => Ok(Role::Trader),
            "operator" | "admin" => Ok(Role::Operator),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    pub role: Role,
}

impl Participant {
    pub fn identity(&self) -> Identity {
        Identity {
            participant: self.id,
            role: self.role,
        }
    }
}

/// The authenticated caller, as handed over by whatever sits in front of the desk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub participant: ParticipantId,
    pub role: Role,
}

impl Identity {
    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    /// Capability gate for schedule, exception, catalog and role changes.
    pub fn require_operator(&self, action: &str) -> Result<(), DeskError> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(DeskError::NotAuthorized {
                participant: self.participant,
                action: action.to_string(),
            })
        }
    }
}
