//! Input routing: injected services, prefix dispatch, `$name` substitution,
//! inline evaluation and the host-facing hooks.
//!
//! Every hand-off to a handler or a session mutation is spawned through
//! [`spawn_logged`], so failures are logged where they happen and
//! never reach the caller of [`Dispatcher::handle`], which has already
//! returned.

use std::{
    borrow::Cow,
    fmt,
    future::Future,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicBool, Ordering},
    },
};

use indexmap::IndexSet;
use regex::{Captures, Regex};
use tokio::task::JoinHandle;

use crate::{
    command::{self, AdminCommand},
    config::Config,
    error::{ConfigError, ExecError, SessionError},
    files::ExtensionFiles,
    globals::{CarriedState, Globals},
    host::{Host, Message},
    identity::{Identity, Recipient},
    options::{AssemblyTable, ScriptOptions},
    prefix::{Invocation, PrefixRegistry},
    registry::SessionRegistry,
    service::{ExecutionService, ExtensionInit},
    session::Session,
    tokens::{Token, TokenRegistry},
    worker::{TaskClass, spawn_logged},
};

/// `$name` placeholders for store reads.
static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid variable regex"));

/// Inline spans: ```` ```expr``` ```` shows source and result, ``` ``expr`` ```
/// the result only. Triple delimiters win at the same position.
static INLINE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(.+?)```|``(.+?)``").expect("valid inline regex"));

// =============================================================================
// Context
// =============================================================================

/// The services every session and handler share, owned by the process entry
/// point and passed down explicitly.
pub struct Context {
    config: Config,
    host: Arc<dyn Host>,
    service: Arc<dyn ExecutionService>,
    tokens: Arc<TokenRegistry>,
    assemblies: AssemblyTable,
    files: ExtensionFiles,
    sessions: SessionRegistry,
    default_options: Arc<ScriptOptions>,
}

impl Context {
    #[must_use]
    pub fn new(config: Config, host: Arc<dyn Host>, service: Arc<dyn ExecutionService>) -> Self {
        let tokens = Arc::new(TokenRegistry::new());
        Self {
            sessions: SessionRegistry::new(config.max_slots, Arc::clone(&tokens)),
            files: ExtensionFiles::new(config.files.clone()),
            default_options: Arc::new(config.default_options()),
            assemblies: AssemblyTable::new(),
            tokens,
            host,
            service,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    #[must_use]
    pub fn service(&self) -> &Arc<dyn ExecutionService> {
        &self.service
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    #[must_use]
    pub fn assemblies(&self) -> &AssemblyTable {
        &self.assemblies
    }

    #[must_use]
    pub fn files(&self) -> &ExtensionFiles {
        &self.files
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Process-wide default options every fresh or reset session starts from.
    #[must_use]
    pub fn default_options(&self) -> &Arc<ScriptOptions> {
        &self.default_options
    }

    /// Awaits a service call, failing with [`ExecError::Timeout`] when it
    /// outlives the configured limit.
    pub async fn timed<T>(&self, call: impl Future<Output = Result<T, ExecError>>) -> Result<T, ExecError> {
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ExecError::Timeout(limit))),
            None => call.await,
        }
    }

    /// Prefixes `text` with the configured announcement tag.
    #[must_use]
    pub fn tagged(&self, text: &dyn fmt::Display) -> String {
        format!("[{}] {text}", self.config.tag)
    }

    /// Privileged identities plus the server console.
    #[must_use]
    pub fn admins(&self) -> Vec<Identity> {
        let mut admins: IndexSet<Identity> = self.host.privileged().into_iter().collect();
        admins.insert(Identity::Server);
        admins.into_iter().collect()
    }

    /// Prints `text` to the acting identity of `globals` and to `extra`.
    pub fn cw(&self, globals: &Globals, text: &str, extra: &[Recipient]) {
        let message = Message::info(text);
        for to in globals.receivers(extra) {
            self.host.send(&to, &message);
        }
    }
}

impl ExtensionInit for Context {
    fn copy_from_previous(&self, token: Token) -> Result<CarriedState, SessionError> {
        let identity = self.tokens.resolve(token).ok_or(SessionError::UnknownToken(token))?;
        let session = self.sessions.get(&identity)?.ok_or(SessionError::Detached(token))?;
        Ok(session.globals().carry())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("tokens", &self.tokens.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Substitution
// =============================================================================

/// Rewrites every `$name` into a read of key `"name"` from the session store.
#[must_use]
pub fn substitute_variables(code: &str) -> Cow<'_, str> {
    VARIABLE.replace_all(code, |caps: &Captures<'_>| format!("kv[\"{}\"]", &caps[1]))
}

/// Wraps a rendered inline result in the configured decoration, doubling any
/// closing delimiter inside it.
fn decorate(open: &str, close: &str, rendered: &str) -> String {
    if close.is_empty() {
        return format!("{open}{rendered}");
    }
    let escaped = rendered.replace(close, &close.repeat(2));
    format!("{open}{escaped}{close}")
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Entry point for every line of text, console command and join/leave event.
pub struct Dispatcher {
    ctx: Arc<Context>,
    prefixes: PrefixRegistry,
    initialized: AtomicBool,
}

impl Dispatcher {
    /// Builds the shared context and the built-in prefix handlers.
    pub fn new(config: Config, host: Arc<dyn Host>, service: Arc<dyn ExecutionService>) -> Result<Self, ConfigError> {
        let prefixes = PrefixRegistry::with_builtins(&config.prefixes)?;
        Ok(Self {
            ctx: Arc::new(Context::new(config, host, service)),
            prefixes,
            initialized: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    #[must_use]
    pub fn prefixes(&self) -> &PrefixRegistry {
        &self.prefixes
    }

    /// Returns the live session of `identity`, if any, without creating one.
    pub fn session(&self, identity: &Identity) -> Result<Option<Arc<Session>>, SessionError> {
        self.ctx.sessions().get(identity)
    }

    fn session_or_create(&self, identity: &Identity) -> Result<(Arc<Session>, bool), SessionError> {
        self.ctx
            .sessions()
            .get_or_create(identity, || Session::new(identity.clone(), &self.ctx))
    }

    /// Host hook for one inbound line, with the enabled and permission checks.
    pub fn on_text_input(&self, identity: &Identity, text: &str) -> bool {
        self.handle(identity, text, true, true)
    }

    /// Returns `true` iff `text` was recognised as a command and handed off.
    pub fn handle(&self, identity: &Identity, text: &str, check_enabled: bool, check_permission: bool) -> bool {
        self.dispatch(identity, text, check_enabled, check_permission).is_some()
    }

    /// Like [`handle`](Self::handle), returning the hand-off task.
    pub fn dispatch(
        &self,
        identity: &Identity,
        text: &str,
        check_enabled: bool,
        check_permission: bool,
    ) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() {
            return None;
        }
        let host = self.ctx.host();
        if (check_enabled && !host.is_enabled()) || (check_permission && !host.has_permission(identity)) {
            return None;
        }
        let matched = self.prefixes.try_match(text)?;

        let (session, created) = match self.session_or_create(identity) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "dispatch.session");
                return None;
            }
        };
        if !session.is_ready() {
            host.send(
                &Recipient::One(identity.clone()),
                &Message::error(self.ctx.tagged(&SessionError::Busy)),
            );
            return None;
        }

        let handler = matched.handler;
        let shown = matched.code;
        let mut code = substitute_variables(&shown).into_owned();
        if handler.add_semicolon() && !code.ends_with(';') {
            code.push(';');
        }
        tracing::debug!(identity = %identity, prefix = %handler.prefix(), "dispatch");

        let ctx = Arc::clone(&self.ctx);
        Some(spawn_logged(TaskClass::Evaluation, "prefix.handle", async move {
            if created {
                session.reload(&ctx, true, true, false).await?;
            }
            let inv = Invocation::new(ctx, session);
            handler.handle(&inv, &shown, &code).await;
            Ok::<(), SessionError>(())
        }))
    }

    /// Creates the identity's session, loading its extension files quietly.
    pub async fn on_join(&self, identity: &Identity) -> Result<Arc<Session>, SessionError> {
        let (session, created) = self.session_or_create(identity)?;
        if created {
            session.reload(&self.ctx, true, true, false).await?;
        }
        Ok(session)
    }

    /// Tears the identity's session down and releases its token. Returns
    /// whether there was one.
    pub fn on_leave(&self, identity: &Identity) -> Result<bool, SessionError> {
        let previous = self.ctx.sessions().set(identity, None)?;
        Ok(previous.is_some())
    }

    /// Runs the `css` admin sub-command against the issuer's own session.
    ///
    /// Usage errors are reported to the issuer and yield `None`.
    pub fn admin<S: AsRef<str>>(&self, identity: &Identity, args: &[S]) -> Option<JoinHandle<()>> {
        let command = match command::parse(args) {
            Ok(command) => command,
            Err(err) => {
                let to = Recipient::One(identity.clone());
                for line in command::usage(err) {
                    self.ctx.host().send(&to, &Message::error(line));
                }
                return None;
            }
        };
        let session = match self.session_or_create(identity) {
            Ok((session, _)) => session,
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "admin.session");
                return None;
            }
        };

        let ctx = Arc::clone(&self.ctx);
        Some(spawn_logged(TaskClass::Session, "admin", async move {
            match command {
                AdminCommand::Reload { imports, globals } => {
                    session.reload(&ctx, imports, globals, true).await.map(drop)
                }
                AdminCommand::Reset {
                    imports,
                    options,
                    globals,
                } => session.reset(&ctx, imports, options, globals, true).await,
            }
        }))
    }

    /// Replaces every inline span in `text` with its decorated result.
    ///
    /// Fails as a whole on the first failing expression; the caller keeps
    /// the original text in that case.
    pub async fn substitute_inline(&self, identity: &Identity, text: &str) -> Result<String, ExecError> {
        if !INLINE_SPAN.is_match(text) {
            return Ok(text.to_owned());
        }
        let (session, _) = self
            .session_or_create(identity)
            .map_err(|err| ExecError::Unavailable(err.to_string()))?;
        let inv = Invocation::new(Arc::clone(&self.ctx), session);
        let decoration = &self.ctx.config().inline;

        let spans: Vec<(usize, usize, &str, bool)> = INLINE_SPAN
            .captures_iter(text)
            .filter_map(|caps| {
                let span = caps.get(0)?;
                let (source, with_source) = match (caps.get(1), caps.get(2)) {
                    (Some(source), _) => (source, true),
                    (None, Some(source)) => (source, false),
                    (None, None) => return None,
                };
                Some((span.start(), span.end(), source.as_str().trim(), with_source))
            })
            .collect();

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end, source, with_source) in spans {
            let value = inv.run(&format!("return {};", substitute_variables(source))).await?;
            let rendered = if with_source {
                format!("{source}: {value}")
            } else {
                value.to_string()
            };
            out.push_str(&text[last..start]);
            out.push_str(&decorate(&decoration.open, &decoration.close, &rendered));
            last = end;
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Greets from the server session once; later calls return `None`.
    pub fn initialize(&self) -> Option<JoinHandle<()>> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return None;
        }
        let session = match self.session_or_create(&Identity::Server) {
            Ok((session, _)) => session,
            Err(err) => {
                tracing::error!(error = %err, "initialize.session");
                return None;
            }
        };
        let ctx = Arc::clone(&self.ctx);
        Some(spawn_logged(TaskClass::Evaluation, "initialize", async move {
            let inv = Invocation::new(ctx, session);
            inv.run("cw(\"Code manager initialized.\");").await?;
            tracing::info!("dispatcher.initialized");
            Ok::<(), ExecError>(())
        }))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ctx", &self.ctx)
            .field("prefixes", &self.prefixes)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}
