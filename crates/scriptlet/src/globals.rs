//! The per-session globals object visible to script code.
//!
//! A session's globals start as the base type and may be replaced wholesale
//! by an instance of a freshly compiled extension subtype. Only the state in
//! [`CarriedState`] survives such a replacement.

use std::{fmt, sync::Arc};

use indexmap::IndexSet;

use crate::{
    identity::{Identity, Recipient},
    options::AssemblyRef,
    store::DynamicStore,
};

/// Name of the base globals type every extension derives from.
pub const BASE_GLOBALS_TYPE: &str = "Globals";

/// A compiled extension subtype instance, as produced by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    /// Generated subtype name, e.g. `AdminGlobals_7_2`.
    pub type_name: String,
    /// The compiled unit defining the subtype.
    pub assembly: AssemblyRef,
}

/// State copied forward from a previous globals instance into its successor.
#[derive(Debug, Clone)]
pub struct CarriedState {
    pub me: Identity,
    pub kv: Arc<DynamicStore>,
}

/// Script-visible state and helpers for one session.
pub struct Globals {
    me: Identity,
    kv: Arc<DynamicStore>,
    extension: Option<Extension>,
}

impl Globals {
    /// Creates base globals with an empty store.
    #[must_use]
    pub fn new(me: Identity) -> Self {
        Self::from_carried(
            CarriedState {
                me,
                kv: Arc::new(DynamicStore::new()),
            },
            None,
        )
    }

    /// Builds globals around carried state, optionally as an extension instance.
    #[must_use]
    pub fn from_carried(carried: CarriedState, extension: Option<Extension>) -> Self {
        Self {
            me: carried.me,
            kv: carried.kv,
            extension,
        }
    }

    /// Returns the state a successor instance should start from.
    #[must_use]
    pub fn carry(&self) -> CarriedState {
        CarriedState {
            me: self.me(),
            kv: Arc::clone(&self.kv),
        }
    }

    /// The acting identity.
    #[must_use]
    pub fn me(&self) -> Identity {
        self.me.clone()
    }

    /// The session's key/value scratch store.
    #[must_use]
    pub fn kv(&self) -> &Arc<DynamicStore> {
        &self.kv
    }

    #[must_use]
    pub fn extension(&self) -> Option<&Extension> {
        self.extension.as_ref()
    }

    /// Reference to the compiled unit defining this instance's type, if any.
    #[must_use]
    pub fn reference(&self) -> Option<&AssemblyRef> {
        self.extension.as_ref().map(|ext| &ext.assembly)
    }

    /// Runtime type name of this instance.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.extension.as_ref().map_or(BASE_GLOBALS_TYPE, |ext| &ext.type_name)
    }

    /// Computes who receives a `cw` print: the acting identity plus any
    /// extra recipients, deduplicated.
    ///
    /// The acting identity is dropped when a broadcast-everyone recipient
    /// already covers it. The server console is never covered by a broadcast.
    #[must_use]
    pub fn receivers(&self, extra: &[Recipient]) -> Vec<Recipient> {
        let me = self.me();
        let mut receivers: IndexSet<Recipient> = IndexSet::with_capacity(extra.len() + 1);
        receivers.insert(Recipient::One(me.clone()));
        receivers.extend(extra.iter().cloned());
        if !me.is_server() && receivers.contains(&Recipient::All) {
            receivers.shift_remove(&Recipient::One(me));
        }
        receivers.into_iter().collect()
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Globals")
            .field("me", &self.me)
            .field("type_name", &self.type_name())
            .field("kv", &self.kv)
            .finish()
    }
}
