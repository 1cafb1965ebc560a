use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::RwLock;

use super::{PrefixHandler, builtin_handlers};
use crate::{config::PrefixConfig, error::PrefixError};

/// Runs before a registration; may substitute the handler or veto with `None`.
pub type RegisterHook = Arc<dyn Fn(Arc<dyn PrefixHandler>) -> Option<Arc<dyn PrefixHandler>> + Send + Sync>;
/// Runs before a deregistration; `false` vetoes it.
pub type DeregisterHook = Arc<dyn Fn(&dyn PrefixHandler) -> bool + Send + Sync>;

/// A recognised input: the handler and the code after its prefix.
#[derive(Clone)]
pub struct Match {
    pub handler: Arc<dyn PrefixHandler>,
    /// Trimmed remainder of the input.
    pub code: String,
}

impl fmt::Debug for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Match")
            .field("prefix", self.handler.prefix())
            .field("code", &self.code)
            .finish()
    }
}

/// Concurrent prefix-to-handler map with longest-prefix lookup.
///
/// Prefixes are unique ignoring case. Hooks are invoked outside any map
/// lock.
#[derive(Default)]
pub struct PrefixRegistry {
    handlers: DashMap<String, Arc<dyn PrefixHandler>>,
    on_register: RwLock<Option<RegisterHook>>,
    on_deregister: RwLock<Option<DeregisterHook>>,
}

impl PrefixRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry holding every built-in handler that registers by
    /// default.
    pub fn with_builtins(config: &PrefixConfig) -> Result<Self, PrefixError> {
        let registry = Self::new();
        for handler in builtin_handlers(config)? {
            if !handler.register_by_default() {
                continue;
            }
            let prefix = handler.prefix().clone();
            if !registry.register(handler) {
                tracing::warn!(%prefix, "prefix.builtin.collision");
            }
        }
        Ok(registry)
    }

    pub fn set_on_register(
        &self,
        hook: impl Fn(Arc<dyn PrefixHandler>) -> Option<Arc<dyn PrefixHandler>> + Send + Sync + 'static,
    ) {
        *self.on_register.write() = Some(Arc::new(hook));
    }

    pub fn set_on_deregister(&self, hook: impl Fn(&dyn PrefixHandler) -> bool + Send + Sync + 'static) {
        *self.on_deregister.write() = Some(Arc::new(hook));
    }

    /// Adds a handler. Returns `false` when the hook vetoes it or its prefix
    /// is already taken.
    pub fn register(&self, handler: Arc<dyn PrefixHandler>) -> bool {
        let hook = self.on_register.read().clone();
        let handler = match hook {
            Some(hook) => match hook(handler) {
                Some(handler) => handler,
                None => return false,
            },
            None => handler,
        };

        match self.handlers.entry(handler.prefix().folded()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::debug!(prefix = %handler.prefix(), kind = ?handler.kind(), "prefix.register");
                slot.insert(handler);
                true
            }
        }
    }

    /// Removes the registered handler equal to `handler`. Returns `false` when
    /// the hook vetoes it or no equal handler is registered.
    pub fn deregister(&self, handler: &dyn PrefixHandler) -> bool {
        let hook = self.on_deregister.read().clone();
        if hook.is_some_and(|hook| !hook(handler)) {
            return false;
        }
        let key = handler.key();
        let removed = self
            .handlers
            .remove_if(&key.prefix.folded(), |_, existing| existing.key() == key)
            .is_some();
        if removed {
            tracing::debug!(prefix = %key.prefix, "prefix.deregister");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, prefix: &str) -> bool {
        self.handlers.contains_key(&prefix.to_lowercase())
    }

    /// Looks a handler up by its exact prefix, ignoring case.
    pub fn get(&self, prefix: &str) -> Result<Arc<dyn PrefixHandler>, PrefixError> {
        self.handlers
            .get(&prefix.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PrefixError::NotFound(prefix.to_owned()))
    }

    /// Handlers ordered longest prefix first, ties broken alphabetically.
    #[must_use]
    pub fn sorted(&self) -> Vec<Arc<dyn PrefixHandler>> {
        let mut handlers: Vec<_> = self.handlers.iter().map(|entry| Arc::clone(entry.value())).collect();
        handlers.sort_by(|a, b| {
            b.prefix()
                .len()
                .cmp(&a.prefix().len())
                .then_with(|| a.prefix().cmp(b.prefix()))
        });
        handlers
    }

    /// The handler at `index` in [`sorted`](Self::sorted) order.
    pub fn nth(&self, index: usize) -> Result<Arc<dyn PrefixHandler>, PrefixError> {
        let sorted = self.sorted();
        let len = sorted.len();
        sorted
            .into_iter()
            .nth(index)
            .ok_or(PrefixError::IndexOutOfRange { index, len })
    }

    /// Every registered handler, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn PrefixHandler>> {
        self.handlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Finds the handler with the longest prefix that starts the trimmed
    /// input, ignoring case.
    #[must_use]
    pub fn try_match(&self, input: &str) -> Option<Match> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        self.sorted().into_iter().find_map(|handler| {
            let len = handler.prefix().len();
            let head = input.get(..len)?;
            if head.to_lowercase() != handler.prefix().folded() {
                return None;
            }
            Some(Match {
                code: input[len..].trim().to_owned(),
                handler,
            })
        })
    }
}

impl fmt::Debug for PrefixRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefixes: Vec<String> = self.sorted().iter().map(|h| h.prefix().to_string()).collect();
        f.debug_struct("PrefixRegistry").field("prefixes", &prefixes).finish_non_exhaustive()
    }
}
