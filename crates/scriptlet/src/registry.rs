//! Identity-to-session storage.
//!
//! Slot identities live in a pre-sized array with one lock per slot, so
//! lookups for different slots never contend. Every other identity shares a
//! single guarded map.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{error::SessionError, identity::Identity, session::Session, tokens::TokenRegistry};

/// Owns every live [`Session`].
pub struct SessionRegistry {
    slots: Box<[Mutex<Option<Arc<Session>>>]>,
    others: Mutex<HashMap<Identity, Arc<Session>>>,
    tokens: Arc<TokenRegistry>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(max_slots: usize, tokens: Arc<TokenRegistry>) -> Self {
        Self {
            slots: (0..max_slots).map(|_| Mutex::new(None)).collect(),
            others: Mutex::new(HashMap::new()),
            tokens,
        }
    }

    /// Size of the slot universe.
    #[must_use]
    pub fn max_slots(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: usize) -> Result<&Mutex<Option<Arc<Session>>>, SessionError> {
        self.slots.get(index).ok_or(SessionError::SlotOutOfRange {
            index,
            max: self.slots.len(),
        })
    }

    /// Returns the live session of `identity`, if any.
    pub fn get(&self, identity: &Identity) -> Result<Option<Arc<Session>>, SessionError> {
        Ok(match identity.slot() {
            Some(index) => self.slot(index)?.lock().clone(),
            None => self.others.lock().get(identity).cloned(),
        })
    }

    /// Returns the session of `identity`, constructing it with `create` if
    /// there is none. The flag tells whether this call constructed it.
    ///
    /// Construction happens under the identity's lock, so concurrent callers
    /// for the same new identity all observe a single instance.
    pub fn get_or_create(
        &self,
        identity: &Identity,
        create: impl FnOnce() -> Session,
    ) -> Result<(Arc<Session>, bool), SessionError> {
        if let Some(index) = identity.slot() {
            let mut slot = self.slot(index)?.lock();
            if let Some(session) = slot.as_ref() {
                return Ok((Arc::clone(session), false));
            }
            let session = Arc::new(create());
            *slot = Some(Arc::clone(&session));
            return Ok((session, true));
        }

        let mut others = self.others.lock();
        if let Some(session) = others.get(identity) {
            return Ok((Arc::clone(session), false));
        }
        let session = Arc::new(create());
        others.insert(identity.clone(), Arc::clone(&session));
        Ok((session, true))
    }

    /// Installs `session` for `identity`, or tears the current one down when
    /// `None`. Returns the session it replaced.
    ///
    /// The replaced session's token is released, and only that token: a
    /// session created for the same identity in the meantime keeps its own.
    pub fn set(&self, identity: &Identity, session: Option<Arc<Session>>) -> Result<Option<Arc<Session>>, SessionError> {
        let incoming = session.as_ref().map(|s| s.token());
        let previous = match identity.slot() {
            Some(index) => std::mem::replace(&mut *self.slot(index)?.lock(), session),
            None => {
                let mut others = self.others.lock();
                match session {
                    Some(session) => others.insert(identity.clone(), session),
                    None => others.remove(identity),
                }
            }
        };

        if let Some(old) = previous.as_ref().filter(|old| Some(old.token()) != incoming) {
            let released = self.tokens.release(old.token());
            tracing::debug!(identity = %identity, token = %old.token(), released, "session.teardown");
        }
        Ok(previous)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        let slots = self.slots.iter().filter(|slot| slot.lock().is_some()).count();
        slots + self.others.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("max_slots", &self.max_slots())
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}
