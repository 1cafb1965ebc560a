//! Process-wide table from opaque random tokens to session identities.
//!
//! A freshly compiled globals type cannot hold a compile-time reference to the
//! object it replaces, but it can be handed a plain number. The session embeds
//! its token into the generated constructor source; the constructor's first
//! statement passes the token back, and the host resolves it here to find the
//! session whose state should be carried forward.

use std::{collections::HashMap, fmt};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// A process-unique random 64-bit session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(i64);

impl Token {
    /// Returns the raw value, as embedded into generated source.
    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for Token {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token table guarded by a single lock.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    taken: Mutex<HashMap<Token, Identity>>,
}

impl TokenRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws a fresh token not currently in use and binds it to `identity`.
    pub fn take(&self, identity: &Identity) -> Token {
        let mut taken = self.taken.lock();
        let mut rng = rand::thread_rng();
        let token = loop {
            let candidate = Token(rng.r#gen::<i64>());
            if !taken.contains_key(&candidate) {
                break candidate;
            }
        };
        taken.insert(token, identity.clone());
        token
    }

    /// Releases a single token; returns whether it was live.
    pub fn release(&self, token: Token) -> bool {
        self.taken.lock().remove(&token).is_some()
    }

    /// Returns the identity a live token belongs to.
    #[must_use]
    pub fn resolve(&self, token: Token) -> Option<Identity> {
        self.taken.lock().get(&token).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.taken.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
