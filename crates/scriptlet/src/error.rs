//! Error types, one enum per concern.
//!
//! Validation errors (`StoreError`, `PrefixError`, `UsageError`) are returned
//! synchronously to the direct caller. `ExecError` is what the execution
//! service surfaces; it never crosses an async hand-off and is rendered for
//! the acting identity instead. `SessionError` covers busy sessions and
//! registry lookups.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::tokens::Token;

/// Errors raised by [`DynamicStore`](crate::store::DynamicStore) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A composite value was assigned to a key list of a different length.
    #[error("{values} values for {keys} keys")]
    ArityMismatch {
        /// Number of elements in the assigned composite.
        values: usize,
        /// Number of keys being assigned.
        keys: usize,
    },
    /// A value of this type cannot be used as a key.
    #[error("values of type {0} cannot be used as keys")]
    UnhashableKey(String),
}

/// Errors raised while constructing or registering prefix handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    /// The prefix was empty or whitespace only.
    #[error("invalid prefix \"{0}\"")]
    Blank(String),
    /// No handler is registered under the prefix.
    #[error("invalid prefix \"{0}\"")]
    NotFound(String),
    /// Positional access past the end of the sorted handler list.
    #[error("index must be less than {len}, {index} given")]
    IndexOutOfRange {
        /// The requested position.
        index: usize,
        /// Number of registered handlers.
        len: usize,
    },
}

/// Failures surfaced by the external compilation & execution service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The code did not compile; carries the service's diagnostics.
    #[error("compilation error: {0}")]
    Compile(String),
    /// The code compiled but raised while running.
    #[error("{0}")]
    Runtime(String),
    /// The call did not complete within the configured limit.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),
    /// The service returned something the caller cannot use.
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),
    /// The service itself could not be reached or answered malformed data.
    #[error("execution service unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by session and session-registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another mutating operation is in flight on the same session.
    #[error("Environment is busy, try again later.")]
    Busy,
    /// A slot identity addressed a slot outside the fixed universe.
    #[error("slot index must be greater than or equal to 0 and less than {max}, {index} given")]
    SlotOutOfRange {
        /// The requested slot.
        index: usize,
        /// Number of pre-allocated slots.
        max: usize,
    },
    /// A token does not belong to any live session.
    #[error("token {0} is not registered")]
    UnknownToken(Token),
    /// The session behind a live token has already been torn down.
    #[error("no live session for token {0}")]
    Detached(Token),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error reading {path}: {error}")]
    Io {
        /// Path to the file that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        error: std::io::Error,
    },
    /// The configuration text is not valid TOML for [`Config`](crate::config::Config).
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A configured prefix is unusable.
    #[error(transparent)]
    Prefix(#[from] PrefixError),
}

/// Errors raised while parsing the admin sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// No or unknown sub-command.
    #[error("expected a reload or reset sub-command")]
    Command,
    /// Bad or missing targets for `reload`.
    #[error("invalid reload targets")]
    Reload,
    /// Bad or missing targets for `reset`.
    #[error("invalid reset targets")]
    Reset,
}
