//! Caller identities and message recipients.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to a calling user or agent.
///
/// `Slot` identities come from a small fixed universe (connected player
/// slots) and get lock-per-slot session storage; everything else is ad hoc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// The privileged console pseudo-identity.
    Server,
    /// A connected slot, addressed by index.
    Slot(usize),
    /// Any other named agent.
    Agent(String),
}

impl Identity {
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }

    /// Returns the slot index for slot identities.
    #[must_use]
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::Slot(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Slot(index) => write!(f, "#{index}"),
            Self::Agent(name) => f.write_str(name),
        }
    }
}

/// Where a message goes: one identity or everyone at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    One(Identity),
    /// Broadcast to every connected identity.
    All,
}

impl From<Identity> for Recipient {
    fn from(identity: Identity) -> Self {
        Self::One(identity)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One(identity) => identity.fmt(f),
            Self::All => f.write_str("all"),
        }
    }
}
