//! Boundary to the embedding runtime: message delivery, permissions and
//! account lookup.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, Recipient};

/// How a message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Normal output, in the code colour.
    Info,
    /// Echo of an accepted command line.
    Echo,
    /// Failures and usage hints.
    Error,
}

/// A single line (or block) of text for a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Info,
            text: text.into(),
        }
    }

    pub fn echo(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Echo,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
        }
    }
}

/// The embedding runtime.
///
/// Calls come from arbitrary worker tasks; implementations must not block
/// for long.
pub trait Host: Send + Sync + 'static {
    /// Delivers a message to one recipient or to everyone.
    fn send(&self, to: &Recipient, message: &Message);

    /// Identities holding the scripting permission, excluding the server.
    fn privileged(&self) -> Vec<Identity>;

    /// Whether scripting is currently enabled at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Whether `identity` may run code.
    fn has_permission(&self, identity: &Identity) -> bool;

    /// Account id keying the identity's on-disk extension sources, if it
    /// has an account.
    fn account_id(&self, identity: &Identity) -> Option<u32>;
}
