//! Per-identity execution sessions.
//!
//! A [`Session`] owns the imports, options and globals one identity evaluates
//! against. The three are published together as one immutable
//! [`SessionState`] behind an [`ArcSwap`], so an evaluator's snapshot can go
//! stale but is never torn.
//!
//! Mutations (`reload`, `reset`, `add_using`, `remove_using`) are serialised
//! by a private binary lock. They never queue: a mutation that finds the lock
//! taken fails with [`SessionError::Busy`] and tells the identity to retry.
//! Evaluations never take the lock.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    dispatcher::Context,
    error::SessionError,
    files::{Artifact, ExtensionPaths},
    globals::{CarriedState, Globals},
    host::Message,
    identity::{Identity, Recipient},
    options::ScriptOptions,
    service::ExtensionUnit,
    store::DynamicStore,
    tokens::Token,
};

// =============================================================================
// State snapshot
// =============================================================================

/// One coherent `(imports, options, globals)` combination.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Normalised import statements keyed by their lowercase form.
    imports: IndexMap<String, String>,
    options: Arc<ScriptOptions>,
    globals: Arc<Globals>,
}

impl SessionState {
    /// Import statements in insertion order.
    pub fn imports(&self) -> impl Iterator<Item = &str> {
        self.imports.values().map(String::as_str)
    }

    /// Import statements joined one per line, ready to prepend to source.
    #[must_use]
    pub fn imports_source(&self) -> String {
        self.imports().collect::<Vec<_>>().join("\n")
    }

    #[must_use]
    pub fn options(&self) -> &Arc<ScriptOptions> {
        &self.options
    }

    #[must_use]
    pub fn globals(&self) -> &Arc<Globals> {
        &self.globals
    }
}

/// Normalises an import statement.
///
/// The statement is trimmed, gets the `using ` keyword and the trailing `;`
/// if either is missing, and loses all whitespace after the keyword except
/// the single space following `static`.
#[must_use]
pub fn unify_using(statement: &str) -> String {
    let statement = statement.trim();
    let body = statement.strip_prefix("using").unwrap_or(statement);
    let body = body.strip_suffix(';').unwrap_or(body).trim_start();

    let (is_static, body) = match body.strip_prefix("static") {
        Some(rest) if rest.starts_with(char::is_whitespace) => (true, rest),
        _ => (false, body),
    };
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();

    if is_static {
        format!("using static {compact};")
    } else {
        format!("using {compact};")
    }
}

fn import_key(statement: &str) -> String {
    statement.to_lowercase()
}

// =============================================================================
// Reload outcome
// =============================================================================

/// What a reload did with one extension file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArtifactStatus {
    /// Not requested by this reload.
    #[default]
    Skipped,
    /// Requested but the file is missing or blank.
    Absent,
    /// Read, validated and applied.
    Loaded,
    /// Present but unusable; carries the reported reason.
    Failed(String),
}

impl ArtifactStatus {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-artifact outcome of [`Session::reload`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReloadReport {
    pub imports: ArtifactStatus,
    pub constructor: ArtifactStatus,
    pub members: ArtifactStatus,
}

impl ReloadReport {
    /// Whether any requested artifact failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.imports.is_failed() || self.constructor.is_failed() || self.members.is_failed()
    }
}

// =============================================================================
// Session
// =============================================================================

/// Isolated execution context of one identity.
pub struct Session {
    identity: Identity,
    token: Token,
    state: ArcSwap<SessionState>,
    lock: Mutex<()>,
    ready: AtomicBool,
    reload_index: AtomicU32,
}

/// Holds the mutation lock; marks the session ready again on drop.
struct BusyGuard<'a> {
    ready: &'a AtomicBool,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.ready.store(true, Ordering::Release);
    }
}

impl Session {
    /// Creates a ready session with default options and base globals, and
    /// takes its token.
    ///
    /// Nothing is loaded from disk here; callers schedule the initial
    /// [`reload`](Self::reload) themselves.
    #[must_use]
    pub fn new(identity: Identity, ctx: &Context) -> Self {
        let token = ctx.tokens().take(&identity);
        let kv = Arc::new(DynamicStore::with_recent_versions(ctx.config().recent_versions));
        let globals = Globals::from_carried(
            CarriedState {
                me: identity.clone(),
                kv,
            },
            None,
        );
        tracing::debug!(identity = %identity, token = %token, "session.create");
        Self {
            identity,
            token,
            state: ArcSwap::from_pointee(SessionState {
                imports: IndexMap::new(),
                options: Arc::clone(ctx.default_options()),
                globals: Arc::new(globals),
            }),
            lock: Mutex::new(()),
            ready: AtomicBool::new(true),
            reload_index: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// False while a mutation is in flight.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of reloads that reached the loading stage.
    #[must_use]
    pub fn reload_index(&self) -> u32 {
        self.reload_index.load(Ordering::Acquire)
    }

    /// The current coherent state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.state.load_full()
    }

    /// Shorthand for the current globals instance.
    #[must_use]
    pub fn globals(&self) -> Arc<Globals> {
        Arc::clone(self.state.load().globals())
    }

    fn begin(&self, ctx: &Context) -> Result<BusyGuard<'_>, SessionError> {
        let Ok(lock) = self.lock.try_lock() else {
            tracing::debug!(identity = %self.identity, "session.busy");
            self.tell(ctx, Message::error(ctx.tagged(&SessionError::Busy)));
            return Err(SessionError::Busy);
        };
        self.ready.store(false, Ordering::Release);
        Ok(BusyGuard { ready: &self.ready, _lock: lock })
    }

    fn publish(&self, state: SessionState) {
        self.state.store(Arc::new(state));
    }

    fn tell(&self, ctx: &Context, message: Message) {
        ctx.host().send(&Recipient::One(self.identity.clone()), &message);
    }

    /// Re-reads the identity's extension files and installs what they define.
    ///
    /// Artifacts are validated and applied independently: a bad import list
    /// does not prevent the extension type from being rebuilt, and a failed
    /// compile leaves the previous globals in place. Each failure is reported
    /// to the identity naming the file, and recorded in the returned report.
    /// Whatever succeeded is published as one new state at the end, so an
    /// evaluator sees either everything from before the reload or everything
    /// after it.
    ///
    /// An identity without an account has nothing to load; that is a
    /// successful no-op.
    pub async fn reload(
        &self,
        ctx: &Context,
        load_imports: bool,
        load_globals: bool,
        announce: bool,
    ) -> Result<ReloadReport, SessionError> {
        let _busy = self.begin(ctx)?;
        let mut report = ReloadReport::default();
        if !load_imports && !load_globals {
            return Ok(report);
        }
        let Some(account_id) = ctx.host().account_id(&self.identity) else {
            return Ok(report);
        };

        let index = self.reload_index.fetch_add(1, Ordering::AcqRel) + 1;
        let paths = ctx.files().paths(account_id);
        tracing::debug!(identity = %self.identity, account_id, index, "session.reload");

        let mut staged = (*self.snapshot()).clone();
        let mut reloaded = Vec::new();
        if load_imports {
            report.imports = self.reload_imports(ctx, &paths, &mut staged, &mut reloaded).await;
        }
        if load_globals {
            let (constructor, members) = self.reload_globals(ctx, &paths, index, &mut staged, &mut reloaded).await;
            report.constructor = constructor;
            report.members = members;
        }

        if !reloaded.is_empty() {
            self.publish(staged);
        }
        if announce {
            for named in reloaded {
                self.tell(ctx, Message::info(ctx.tagged(&format!("Reloaded {named}"))));
            }
        }
        Ok(report)
    }

    async fn reload_imports(
        &self,
        ctx: &Context,
        paths: &ExtensionPaths,
        staged: &mut SessionState,
        reloaded: &mut Vec<String>,
    ) -> ArtifactStatus {
        let file = ctx.files().file_name(Artifact::Imports).to_owned();
        let lines = match ctx.files().read_imports(paths).await {
            Ok(Some(lines)) => lines,
            Ok(None) => return ArtifactStatus::Absent,
            Err(err) => return self.artifact_failed(ctx, &file, &err),
        };
        let imports: Vec<String> = lines.iter().map(|line| unify_using(line)).collect();

        let source = imports.join("\n");
        let trial = ctx.timed(ctx.service().run(&source, &staged.options, &staged.globals)).await;
        if let Err(err) = trial {
            return self.artifact_failed(ctx, &file, &err);
        }

        for import in imports {
            staged.imports.insert(import_key(&import), import);
        }
        reloaded.push(file);
        ArtifactStatus::Loaded
    }

    async fn reload_globals(
        &self,
        ctx: &Context,
        paths: &ExtensionPaths,
        index: u32,
        staged: &mut SessionState,
        reloaded: &mut Vec<String>,
    ) -> (ArtifactStatus, ArtifactStatus) {
        let files = ctx.files();
        let ctor_file = files.file_name(Artifact::Constructor).to_owned();
        let members_file = files.file_name(Artifact::Members).to_owned();

        let (constructor, mut ctor_status) = match files.read_constructor(paths).await {
            Ok(code) => (code, ArtifactStatus::Absent),
            Err(err) => (None, self.artifact_failed(ctx, &ctor_file, &err)),
        };
        let (members, mut members_status) = match files.read_members(paths).await {
            Ok(code) => (code, ArtifactStatus::Absent),
            Err(err) => (None, self.artifact_failed(ctx, &members_file, &err)),
        };
        let has_ctor = constructor.is_some();
        let has_members = members.is_some();
        if !has_ctor && !has_members {
            return (ctor_status, members_status);
        }

        let unit = ExtensionUnit {
            type_name: format!("AdminGlobals_{}_{index}", paths.account_id),
            token: self.token,
            imports: staged.imports_source(),
            constructor,
            members,
        };
        let named = match (has_ctor, has_members) {
            (true, true) => format!("{ctor_file} and {members_file}"),
            (true, false) => ctor_file.clone(),
            _ => members_file.clone(),
        };

        let compiled = ctx
            .timed(ctx.service().compile_globals(&unit, &staged.options, &staged.globals, ctx))
            .await;
        match compiled {
            Ok(globals) => {
                Self::install_globals(ctx, staged, globals);
                tracing::info!(identity = %self.identity, type_name = %unit.type_name, "session.globals.installed");
                reloaded.push(named);
                if has_ctor {
                    ctor_status = ArtifactStatus::Loaded;
                }
                if has_members {
                    members_status = ArtifactStatus::Loaded;
                }
            }
            Err(err) => {
                let blamed = if has_ctor && has_members {
                    format!("{ctor_file} or {members_file}")
                } else {
                    named
                };
                let failed = self.artifact_failed(ctx, &blamed, &err);
                if has_ctor {
                    ctor_status = failed.clone();
                }
                if has_members {
                    members_status = failed;
                }
            }
        }
        (ctor_status, members_status)
    }

    /// Stages freshly compiled globals and makes their unit resolvable.
    fn install_globals(ctx: &Context, staged: &mut SessionState, globals: Globals) {
        if let Some(reference) = globals.reference() {
            ctx.assemblies().register(reference.clone());
            staged.options = Arc::new(staged.options.add_references([reference.clone()]));
        }
        staged.globals = Arc::new(globals);
    }

    fn artifact_failed(&self, ctx: &Context, file: &str, err: &dyn std::fmt::Display) -> ArtifactStatus {
        let reason = format!("Invalid {file}: {err}");
        tracing::warn!(identity = %self.identity, %reason, "session.reload.artifact_failed");
        self.tell(ctx, Message::error(ctx.tagged(&reason)));
        ArtifactStatus::Failed(reason)
    }

    /// Returns chosen pieces of state to process-wide defaults.
    ///
    /// Resetting options while keeping globals keeps the reference to the
    /// current extension unit, so the live instance stays loadable. Resetting
    /// globals keeps the carried state (store and acting identity) and drops
    /// only the extension type.
    pub async fn reset(
        &self,
        ctx: &Context,
        clear_imports: bool,
        clear_options: bool,
        clear_globals: bool,
        announce: bool,
    ) -> Result<(), SessionError> {
        let _busy = self.begin(ctx)?;
        let mut next = (*self.snapshot()).clone();
        let mut parts = Vec::with_capacity(3);

        if clear_imports {
            next.imports.clear();
            parts.push("using statements");
        }
        if clear_options {
            let defaults = Arc::clone(ctx.default_options());
            next.options = match next.globals.reference() {
                Some(reference) if !clear_globals => Arc::new(defaults.add_references([reference.clone()])),
                _ => defaults,
            };
            parts.push("script options");
        }
        if clear_globals {
            next.globals = Arc::new(Globals::from_carried(next.globals.carry(), None));
            parts.push("globals object");
        }
        self.publish(next);

        tracing::debug!(identity = %self.identity, parts = ?parts, "session.reset");
        if announce && !parts.is_empty() {
            self.tell(ctx, Message::info(ctx.tagged(&format!("Reset {}", join_parts(&parts)))));
        }
        Ok(())
    }

    /// Adds import statements after normalising them; returns how many were new.
    pub async fn add_using<I, S>(&self, ctx: &Context, imports: I) -> Result<usize, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let _busy = self.begin(ctx)?;
        let mut next = (*self.snapshot()).clone();
        let mut added = 0;
        for import in imports {
            let import = unify_using(import.as_ref());
            if next.imports.insert(import_key(&import), import).is_none() {
                added += 1;
            }
        }
        self.publish(next);
        Ok(added)
    }

    /// Removes import statements (matched after normalisation, ignoring case);
    /// returns how many were present.
    pub async fn remove_using<I, S>(&self, ctx: &Context, imports: I) -> Result<usize, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let _busy = self.begin(ctx)?;
        let mut next = (*self.snapshot()).clone();
        let mut removed = 0;
        for import in imports {
            if next.imports.shift_remove(&import_key(&unify_using(import.as_ref()))).is_some() {
                removed += 1;
            }
        }
        self.publish(next);
        Ok(removed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("token", &self.token)
            .field("ready", &self.is_ready())
            .field("reload_index", &self.reload_index())
            .finish_non_exhaustive()
    }
}

/// Joins `["a", "b", "c"]` as `a, b and c`.
fn join_parts(parts: &[&str]) -> String {
    match parts {
        [] => String::new(),
        [only] => (*only).to_owned(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}
