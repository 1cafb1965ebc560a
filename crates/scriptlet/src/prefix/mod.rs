//! Prefix handlers: the evaluation modes selected by an input's leading
//! characters.
//!
//! A handler is identified by its [`HandlerKey`] (kind, prefix and flags).
//! Built-in handlers come from a static factory list rather than discovery;
//! third-party handlers implement [`PrefixHandler`] and register themselves
//! with the [`PrefixRegistry`].

mod describe;
mod execute;
mod registry;
mod show;

use std::{fmt, sync::Arc};

use async_trait::async_trait;

pub use self::{
    describe::{DescribeTypeHandler, DescribeValueHandler, paginate, render_type_shape},
    execute::ExecuteHandler,
    registry::{DeregisterHook, Match, PrefixRegistry, RegisterHook},
    show::ShowHandler,
};
use crate::{
    config::PrefixConfig,
    dispatcher::Context,
    error::{ExecError, PrefixError},
    host::Message,
    identity::{Identity, Recipient},
    service::TypeShape,
    session::{Session, SessionState},
    value::Value,
};

/// A validated, immutable handler prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix(String);

impl Prefix {
    /// Validates `text`: blank prefixes are rejected.
    pub fn new(text: impl Into<String>) -> Result<Self, PrefixError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PrefixError::Blank(text));
        }
        Ok(Self(text))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes, the sort key for longest-match lookup.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Case-folded form used for registry keys and matching.
    #[must_use]
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Concrete variant a handler belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandlerKind {
    Execute,
    Show,
    DescribeValue,
    DescribeType,
    /// Externally provided handler, named by its implementor.
    Custom(&'static str),
}

/// Handler identity: two handlers are the same iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub kind: HandlerKind,
    pub prefix: Prefix,
    pub add_semicolon: bool,
}

// =============================================================================
// Invocation
// =============================================================================

/// Everything one handler call sees: the injected services, the calling
/// session and the state snapshot taken when the input was dispatched.
pub struct Invocation {
    ctx: Arc<Context>,
    session: Arc<Session>,
    state: Arc<SessionState>,
}

impl Invocation {
    #[must_use]
    pub fn new(ctx: Arc<Context>, session: Arc<Session>) -> Self {
        let state = session.snapshot();
        Self { ctx, session, state }
    }

    #[must_use]
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.session.identity()
    }

    /// Runs `code` against the snapshot, under the configured timeout.
    pub async fn run(&self, code: &str) -> Result<Value, ExecError> {
        let service = self.ctx.service();
        self.ctx
            .timed(service.run(code, self.state.options(), self.state.globals()))
            .await
    }

    /// Describes the named type as seen from the snapshot.
    pub async fn describe(&self, type_name: &str) -> Result<TypeShape, ExecError> {
        let service = self.ctx.service();
        self.ctx
            .timed(service.describe(type_name, self.state.options(), self.state.globals()))
            .await
    }

    /// Prints `text` the way script code's `cw` would.
    pub fn print(&self, text: &str) {
        self.ctx.cw(self.state.globals(), text, &[]);
    }

    /// Sends an error message to the acting identity only.
    pub fn reply_error(&self, text: impl Into<String>) {
        self.ctx
            .host()
            .send(&Recipient::One(self.identity().clone()), &Message::error(text));
    }
}

// =============================================================================
// Handler trait
// =============================================================================

/// Strategy mapping a recognised prefix to an evaluation mode.
#[async_trait]
pub trait PrefixHandler: Send + Sync + 'static {
    fn kind(&self) -> HandlerKind;

    fn prefix(&self) -> &Prefix;

    /// Whether a statement terminator is appended to code before it is run.
    fn add_semicolon(&self) -> bool {
        true
    }

    /// Whether the built-in factory list registers this handler at start-up.
    fn register_by_default(&self) -> bool {
        true
    }

    fn key(&self) -> HandlerKey {
        HandlerKey {
            kind: self.kind(),
            prefix: self.prefix().clone(),
            add_semicolon: self.add_semicolon(),
        }
    }

    /// Echoes the accepted input to the show audience: privileged observers
    /// and the server console, plus the acting identity.
    async fn show_input(&self, inv: &Invocation, shown: &str) {
        let message = Message::echo(format!("{}{shown}", self.prefix()));
        let admins: Vec<Recipient> = inv.ctx().admins().into_iter().map(Recipient::One).collect();
        for to in inv.state().globals().receivers(&admins) {
            inv.ctx().host().send(&to, &message);
        }
    }

    /// Does the handler's actual work on the substituted code.
    async fn handle_inner(&self, inv: &Invocation, code: &str) -> Result<(), ExecError>;

    /// Echoes the input, runs the handler and reports its failure to the
    /// acting identity. Nothing escapes.
    async fn handle(&self, inv: &Invocation, shown: &str, code: &str) {
        self.show_input(inv, shown).await;
        if let Err(err) = self.handle_inner(inv, code).await {
            tracing::debug!(identity = %inv.identity(), prefix = %self.prefix(), error = %err, "prefix.handle.failed");
            inv.reply_error(err.to_string());
        }
    }
}

impl fmt::Debug for dyn PrefixHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixHandler")
            .field("kind", &self.kind())
            .field("prefix", self.prefix())
            .field("add_semicolon", &self.add_semicolon())
            .finish()
    }
}

/// Builds the four built-in handlers with the configured prefixes.
pub fn builtin_handlers(config: &PrefixConfig) -> Result<Vec<Arc<dyn PrefixHandler>>, PrefixError> {
    Ok(vec![
        Arc::new(ExecuteHandler::new(Prefix::new(config.execute.clone())?)),
        Arc::new(ShowHandler::new(Prefix::new(config.show.clone())?)),
        Arc::new(DescribeValueHandler::new(Prefix::new(config.describe_value.clone())?)),
        Arc::new(DescribeTypeHandler::new(Prefix::new(config.describe_type.clone())?)),
    ])
}
