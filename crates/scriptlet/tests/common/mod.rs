//! Shared fixtures: a scripted execution service, a recording host and a
//! harness wiring both into a dispatcher over a temporary extension root.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use scriptlet::{
    AssemblyRef, Config, Context, Dispatcher, ExecError, ExecutionService, Extension, ExtensionInit, ExtensionUnit,
    Globals, Host, Identity, Member, MemberKind, Message, MessageKind, Recipient, ScriptOptions, TypeShape, Value,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;

// ============================================================================
// Scripted execution service
// ============================================================================

/// Understands a tiny statement language, enough to drive the dispatcher:
///
/// - `int NAME = EXPR` declares a per-identity variable
/// - `kv["KEY"] = EXPR` writes the session store
/// - `return EXPR` with literals, variables, `a + b`, `kv["KEY"]`,
///   `typeof(X)`, `null` and `hang` (never completes)
/// - import-only code succeeds unless it names `Missing`
/// - `throw` fails at run time, and `cw("..")` is accepted
pub struct FakeService {
    vars: Mutex<HashMap<Identity, HashMap<String, Value>>>,
    shapes: Mutex<HashMap<String, TypeShape>>,
    runs: Mutex<Vec<String>>,
    compiled: Mutex<Vec<ExtensionUnit>>,
    compile_gate: Semaphore,
}

impl FakeService {
    pub fn new() -> Self {
        Self::with_gate(Semaphore::MAX_PERMITS)
    }

    /// Compiles block until [`open_gate`](Self::open_gate) is called.
    pub fn gated() -> Self {
        Self::with_gate(0)
    }

    fn with_gate(permits: usize) -> Self {
        let mut shapes = HashMap::new();
        shapes.insert("int".to_owned(), int_shape());
        Self {
            vars: Mutex::new(HashMap::new()),
            shapes: Mutex::new(shapes),
            runs: Mutex::new(Vec::new()),
            compiled: Mutex::new(Vec::new()),
            compile_gate: Semaphore::new(permits),
        }
    }

    pub fn open_gate(&self) {
        self.compile_gate.add_permits(1_000);
    }

    pub fn add_shape(&self, shape: TypeShape) {
        self.shapes.lock().insert(shape.name.clone(), shape);
    }

    /// Every code string passed to `run`, trimmed.
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    pub fn compiled(&self) -> Vec<ExtensionUnit> {
        self.compiled.lock().clone()
    }

    fn eval(&self, code: &str, globals: &Globals) -> Result<Value, ExecError> {
        let mut result = Value::Null;
        for statement in code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            result = self.statement(statement, globals)?;
        }
        Ok(result)
    }

    fn statement(&self, statement: &str, globals: &Globals) -> Result<Value, ExecError> {
        if let Some(import) = statement.strip_prefix("using ") {
            return if import.contains("Missing") {
                Err(ExecError::Compile(format!("CS0246: namespace '{}' not found", import.trim())))
            } else {
                Ok(Value::Null)
            };
        }
        if let Some(expr) = statement.strip_prefix("return ") {
            return self.expr(expr.trim(), globals);
        }
        if statement == "throw" {
            return Err(ExecError::Runtime("System.Exception: boom".to_owned()));
        }
        if statement.starts_with("cw(") {
            return Ok(Value::Null);
        }
        if let Some(decl) = statement.strip_prefix("int ") {
            let (name, expr) = decl
                .split_once('=')
                .ok_or_else(|| ExecError::Compile(format!("cannot compile `{statement}`")))?;
            let value = self.expr(expr.trim(), globals)?;
            self.vars
                .lock()
                .entry(globals.me())
                .or_default()
                .insert(name.trim().to_owned(), value);
            return Ok(Value::Null);
        }
        if let Some((target, expr)) = statement.split_once('=')
            && let Some(key) = store_key(target.trim())
        {
            let value = self.expr(expr.trim(), globals)?;
            globals.kv().set(key, value);
            return Ok(Value::Null);
        }
        Err(ExecError::Compile(format!("cannot compile `{statement}`")))
    }

    fn expr(&self, expr: &str, globals: &Globals) -> Result<Value, ExecError> {
        if let Some(inner) = expr.strip_prefix("typeof(").and_then(|e| e.strip_suffix(')')) {
            let inner = inner.trim();
            return Ok(match self.var(globals, inner) {
                Some(value) => Value::Type(value.type_name().unwrap_or("object").to_owned()),
                None => Value::Type(inner.to_owned()),
            });
        }
        if let Some((lhs, rhs)) = expr.split_once('+') {
            return match (self.expr(lhs.trim(), globals)?, self.expr(rhs.trim(), globals)?) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                (a, b) => Ok(Value::Str(format!("{a}{b}"))),
            };
        }
        if expr == "null" {
            return Ok(Value::Null);
        }
        if let Ok(int) = expr.parse::<i64>() {
            return Ok(Value::Int(int));
        }
        if let Some(text) = expr.strip_prefix('"').and_then(|e| e.strip_suffix('"')) {
            return Ok(Value::Str(text.to_owned()));
        }
        if let Some(key) = store_key(expr) {
            return Ok(globals.kv().get(key));
        }
        self.var(globals, expr).ok_or_else(|| {
            ExecError::Compile(format!("CS0103: The name '{expr}' does not exist in the current context"))
        })
    }

    fn var(&self, globals: &Globals, name: &str) -> Option<Value> {
        self.vars.lock().get(&globals.me())?.get(name).cloned()
    }
}

/// Parses `kv["KEY"]`.
fn store_key(expr: &str) -> Option<&str> {
    expr.strip_prefix("kv[\"")?.strip_suffix("\"]")
}

fn int_shape() -> TypeShape {
    TypeShape {
        name: "int".to_owned(),
        members: vec![
            Member::new(MemberKind::Field, "MaxValue").typed("int"),
            Member::new(MemberKind::Field, "MinValue").typed("int"),
            Member::new(MemberKind::Method, "CompareTo")
                .typed("int")
                .param("int", "value"),
            Member::new(MemberKind::Method, "ToString").typed("string"),
            Member::new(MemberKind::Method, "op_Equality").typed("bool").special(),
        ],
    }
}

#[async_trait]
impl ExecutionService for FakeService {
    async fn run(&self, code: &str, _options: &ScriptOptions, globals: &Arc<Globals>) -> Result<Value, ExecError> {
        let code = code.trim();
        self.runs.lock().push(code.to_owned());
        if code.contains("return hang") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.eval(code, globals)
    }

    async fn describe(
        &self,
        type_name: &str,
        _options: &ScriptOptions,
        _globals: &Arc<Globals>,
    ) -> Result<TypeShape, ExecError> {
        self.shapes
            .lock()
            .get(type_name)
            .cloned()
            .ok_or_else(|| ExecError::Compile(format!("type '{type_name}' not found")))
    }

    async fn compile_globals(
        &self,
        unit: &ExtensionUnit,
        _options: &ScriptOptions,
        _globals: &Arc<Globals>,
        init: &dyn ExtensionInit,
    ) -> Result<Globals, ExecError> {
        let _permit = self
            .compile_gate
            .acquire()
            .await
            .map_err(|err| ExecError::Unavailable(err.to_string()))?;
        if unit.members.as_deref().is_some_and(|m| m.contains("syntax error")) {
            return Err(ExecError::Compile("(3,5): error CS1519: Invalid token".to_owned()));
        }

        let carried = init
            .copy_from_previous(unit.token)
            .map_err(|err| ExecError::Runtime(err.to_string()))?;
        let instance = Globals::from_carried(carried, None);
        if let Some(ctor) = &unit.constructor {
            self.eval(ctor, &instance)?;
        }

        self.compiled.lock().push(unit.clone());
        Ok(Globals::from_carried(
            instance.carry(),
            Some(Extension {
                type_name: unit.type_name.clone(),
                assembly: AssemblyRef::new(
                    format!("{}, Version=0.0.0.0", unit.type_name),
                    format!("image:{}", unit.type_name),
                ),
            }),
        ))
    }
}

// ============================================================================
// Recording host
// ============================================================================

#[derive(Default)]
pub struct RecordingHost {
    sent: Mutex<Vec<(Recipient, Message)>>,
    privileged: Mutex<Vec<Identity>>,
    accounts: Mutex<HashMap<Identity, u32>>,
    denied: Mutex<HashSet<Identity>>,
    disabled: AtomicBool,
}

impl RecordingHost {
    pub fn set_account(&self, identity: &Identity, account_id: u32) {
        self.accounts.lock().insert(identity.clone(), account_id);
    }

    pub fn set_privileged(&self, identities: Vec<Identity>) {
        *self.privileged.lock() = identities;
    }

    pub fn deny(&self, identity: &Identity) {
        self.denied.lock().insert(identity.clone());
    }

    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(Recipient, Message)> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Texts of the given kind delivered to `identity` directly.
    pub fn texts(&self, identity: &Identity, kind: MessageKind) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, message)| *to == Recipient::One(identity.clone()) && message.kind == kind)
            .map(|(_, message)| message.text.clone())
            .collect()
    }

    pub fn infos(&self, identity: &Identity) -> Vec<String> {
        self.texts(identity, MessageKind::Info)
    }

    pub fn errors(&self, identity: &Identity) -> Vec<String> {
        self.texts(identity, MessageKind::Error)
    }

    pub fn echoes(&self, identity: &Identity) -> Vec<String> {
        self.texts(identity, MessageKind::Echo)
    }
}

impl Host for RecordingHost {
    fn send(&self, to: &Recipient, message: &Message) {
        self.sent.lock().push((to.clone(), message.clone()));
    }

    fn privileged(&self) -> Vec<Identity> {
        self.privileged.lock().clone()
    }

    fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    fn has_permission(&self, identity: &Identity) -> bool {
        !self.denied.lock().contains(identity)
    }

    fn account_id(&self, identity: &Identity) -> Option<u32> {
        self.accounts.lock().get(identity).copied()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub host: Arc<RecordingHost>,
    pub service: Arc<FakeService>,
    pub dispatcher: Dispatcher,
    root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeService::new(), |config| config)
    }

    pub fn with_service(service: FakeService) -> Self {
        Self::build(service, |config| config)
    }

    pub fn with_config(configure: impl FnOnce(Config) -> Config) -> Self {
        Self::build(FakeService::new(), configure)
    }

    fn build(service: FakeService, configure: impl FnOnce(Config) -> Config) -> Self {
        let root = tempfile::tempdir().expect("temp dir");
        let config = configure(Config::new().extension_root(root.path().to_string_lossy()).max_slots(8));
        let host = Arc::new(RecordingHost::default());
        let service = Arc::new(service);
        let dispatcher = Dispatcher::new(config, host.clone(), service.clone()).expect("dispatcher");
        Self {
            host,
            service,
            dispatcher,
            root,
        }
    }

    pub fn ctx(&self) -> &Arc<Context> {
        self.dispatcher.ctx()
    }

    /// Writes `<root>/<account>/<name>`.
    pub fn write_file(&self, account_id: u32, name: &str, contents: &str) -> PathBuf {
        let dir = self.root.path().join(account_id.to_string());
        fs::create_dir_all(&dir).expect("account dir");
        let path = dir.join(name);
        fs::write(&path, contents).expect("write extension file");
        path
    }

    /// Gives `identity` an account and returns its id.
    pub fn with_account(&self, identity: &Identity, account_id: u32) -> u32 {
        self.host.set_account(identity, account_id);
        account_id
    }

    /// Dispatches `text` and waits for the hand-off to finish.
    pub async fn input(&self, identity: &Identity, text: &str) -> bool {
        match self.dispatcher.dispatch(identity, text, true, true) {
            Some(task) => {
                task.await.expect("hand-off task");
                true
            }
            None => false,
        }
    }
}
