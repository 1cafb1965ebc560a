//! Execution service backed by a child process speaking JSON lines.
//!
//! Every request is one line `{"id", "method", "params"}` on the child's
//! stdin; every response is one line `{"id", "result"}` or
//! `{"id", "error": {"kind", "message"}}` on its stdout. Requests carry a
//! snapshot of the caller's scope (acting identity, globals type and store
//! entries) and responses carry back the store writes and `cw` prints the
//! code performed, which are applied here.

use std::{
    collections::HashMap,
    io,
    path::Path,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use scriptlet::{
    AssemblyRef, ExecError, ExecutionService, Extension, ExtensionInit, ExtensionUnit, Globals, Host, Identity, Key,
    Message, ScriptOptions, TypeShape, Value,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value as JsonValue, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot},
};

type Reply = oneshot::Sender<Result<JsonValue, ExecError>>;

/// One request queued for the I/O task.
struct Outbound {
    id: u64,
    line: String,
    reply: Reply,
}

/// What the code saw: sent along with every request.
#[derive(Debug, Serialize)]
struct Scope {
    me: Identity,
    type_name: String,
    kv: Vec<(Key, Value)>,
}

impl Scope {
    fn of(globals: &Globals) -> Self {
        Self {
            me: globals.me(),
            type_name: globals.type_name().to_owned(),
            kv: globals.kv().entries(),
        }
    }
}

/// What the code did besides returning.
#[derive(Debug, Default, Deserialize)]
struct Effects {
    #[serde(default)]
    kv_writes: Vec<(Key, Value)>,
    #[serde(default)]
    prints: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RunOutput {
    #[serde(default)]
    value: Value,
    #[serde(flatten)]
    effects: Effects,
}

#[derive(Debug, Deserialize)]
struct CompileOutput {
    assembly: AssemblyRef,
    #[serde(flatten)]
    effects: Effects,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<BackendError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ErrorKind {
    Compile,
    Runtime,
}

#[derive(Debug, Deserialize)]
struct BackendError {
    kind: ErrorKind,
    message: String,
}

impl From<BackendError> for ExecError {
    fn from(err: BackendError) -> Self {
        match err.kind {
            ErrorKind::Compile => Self::Compile(err.message),
            ErrorKind::Runtime => Self::Runtime(err.message),
        }
    }
}

fn stopped() -> ExecError {
    ExecError::Unavailable("backend stopped".to_owned())
}

/// Client side of the backend process.
pub struct BridgeService {
    child: Mutex<Child>,
    outbound: mpsc::UnboundedSender<Outbound>,
    next_id: AtomicU64,
    host: Arc<dyn Host>,
}

impl BridgeService {
    /// Starts the backend and its I/O task. Must be called inside a runtime.
    pub fn spawn(program: &Path, args: &[String], host: Arc<dyn Host>) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("failed to capture backend stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("failed to capture backend stdout"))?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_io(stdin, stdout, outbound_rx));
        tracing::info!(program = %program.display(), pid = ?child.id(), "backend.spawned");

        Ok(Self {
            child: Mutex::new(child),
            outbound,
            next_id: AtomicU64::new(1),
            host,
        })
    }

    /// Asks the backend process to die; pending calls fail as unavailable.
    pub fn kill(&self) {
        if let Err(err) = self.child.lock().start_kill() {
            tracing::warn!(error = %err, "backend.kill");
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: JsonValue) -> Result<T, ExecError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&json!({ "id": id, "method": method, "params": params }))
            .map_err(|err| ExecError::Unavailable(format!("cannot encode request: {err}")))?;
        let (reply, response) = oneshot::channel();
        self.outbound
            .send(Outbound { id, line, reply })
            .map_err(|_| stopped())?;
        tracing::trace!(id, method, "backend.request");

        let result = response.await.map_err(|_| stopped())??;
        serde_json::from_value(result)
            .map_err(|err| ExecError::UnexpectedResult(format!("malformed {method} response: {err}")))
    }

    /// Applies the store writes and prints reported by the backend.
    fn apply(&self, globals: &Globals, effects: Effects) {
        for (key, value) in effects.kv_writes {
            globals.kv().set(key, value);
        }
        for text in effects.prints {
            let message = Message::info(text);
            for to in globals.receivers(&[]) {
                self.host.send(&to, &message);
            }
        }
    }
}

#[async_trait]
impl ExecutionService for BridgeService {
    async fn run(&self, code: &str, options: &ScriptOptions, globals: &Arc<Globals>) -> Result<Value, ExecError> {
        let params = json!({ "code": code, "options": options, "scope": Scope::of(globals) });
        let output: RunOutput = self.call("run", params).await?;
        self.apply(globals, output.effects);
        Ok(output.value)
    }

    async fn describe(
        &self,
        type_name: &str,
        options: &ScriptOptions,
        globals: &Arc<Globals>,
    ) -> Result<TypeShape, ExecError> {
        let params = json!({ "type_name": type_name, "options": options, "scope": Scope::of(globals) });
        self.call("describe", params).await
    }

    async fn compile_globals(
        &self,
        unit: &ExtensionUnit,
        options: &ScriptOptions,
        _globals: &Arc<Globals>,
        init: &dyn ExtensionInit,
    ) -> Result<Globals, ExecError> {
        // The carry-forward statement opens the constructor, so resolving it
        // up front is equivalent and keeps tokens on this side of the pipe.
        let carried = init
            .copy_from_previous(unit.token)
            .map_err(|err| ExecError::Runtime(err.to_string()))?;
        let fresh = Globals::from_carried(carried, None);

        let params = json!({
            "unit": unit,
            "source": unit.source(),
            "options": options,
            "scope": Scope::of(&fresh),
        });
        let output: CompileOutput = self.call("compile_globals", params).await?;
        self.apply(&fresh, output.effects);

        Ok(Globals::from_carried(
            fresh.carry(),
            Some(Extension {
                type_name: unit.type_name.clone(),
                assembly: output.assembly,
            }),
        ))
    }
}

impl std::fmt::Debug for BridgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// I/O task
// =============================================================================

/// Writes requests in order and routes responses back by id until either
/// side closes.
async fn run_io(mut stdin: ChildStdin, stdout: ChildStdout, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut lines = BufReader::new(stdout).lines();
    let mut pending: HashMap<u64, Reply> = HashMap::new();

    loop {
        tokio::select! {
            Some(out) = outbound_rx.recv() => {
                prune(&mut pending);
                match write_line(&mut stdin, &out.line).await {
                    Ok(()) => {
                        pending.insert(out.id, out.reply);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "backend.write_failed");
                        let _ = out.reply.send(Err(stopped()));
                        break;
                    }
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => route(&line, &mut pending),
                Ok(None) => {
                    tracing::info!("backend.closed");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "backend.read_failed");
                    break;
                }
            }
        }
    }

    for (_, reply) in pending {
        let _ = reply.send(Err(stopped()));
    }
    while let Ok(out) = outbound_rx.try_recv() {
        let _ = out.reply.send(Err(stopped()));
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Forgets calls whose caller gave up waiting, e.g. on a timeout.
fn prune(pending: &mut HashMap<u64, Reply>) {
    let before = pending.len();
    pending.retain(|_, reply| !reply.is_closed());
    let abandoned = before - pending.len();
    if abandoned > 0 {
        tracing::debug!(abandoned, "backend.pruned");
    }
}

fn route(line: &str, pending: &mut HashMap<u64, Reply>) {
    if line.trim().is_empty() {
        return;
    }
    let response: Response = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "backend.malformed_response");
            return;
        }
    };
    let Some(reply) = pending.remove(&response.id) else {
        // the caller timed out and went away
        tracing::debug!(id = response.id, "backend.unclaimed_response");
        return;
    };
    let result = match (response.result, response.error) {
        (_, Some(err)) => Err(err.into()),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(JsonValue::Null),
    };
    let _ = reply.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_exec_errors() {
        let response: Response =
            serde_json::from_str(r#"{"id":3,"error":{"kind":"compile","message":"CS1002: ; expected"}}"#).unwrap();
        assert_eq!(response.id, 3);
        let err: ExecError = response.error.unwrap().into();
        assert_eq!(err, ExecError::Compile("CS1002: ; expected".to_owned()));
    }

    #[test]
    fn run_output_defaults_missing_effects() {
        let output: RunOutput = serde_json::from_str(r#"{"value":{"kind":"int","value":6}}"#).unwrap();
        assert_eq!(output.value, Value::Int(6));
        assert!(output.effects.kv_writes.is_empty());
        assert!(output.effects.prints.is_empty());
    }

    #[test]
    fn effects_carry_store_writes() {
        let output: RunOutput = serde_json::from_str(
            r#"{"kv_writes":[[{"kind":"str","value":"x"},{"kind":"bool","value":true}]],"prints":["hi"]}"#,
        )
        .unwrap();
        assert_eq!(output.value, Value::Null);
        assert_eq!(output.effects.kv_writes, vec![(Key::from("x"), Value::Bool(true))]);
        assert_eq!(output.effects.prints, vec!["hi"]);
    }

    #[test]
    fn responses_route_by_id() {
        let mut pending = HashMap::new();
        let (tx, mut rx) = oneshot::channel();
        pending.insert(7, tx);
        route(r#"{"id":9,"result":1}"#, &mut pending);
        assert!(pending.contains_key(&7), "unrelated id leaves the caller waiting");
        route(r#"{"id":7,"result":{"ok":true}}"#, &mut pending);
        assert!(pending.is_empty());
        assert_eq!(rx.try_recv().unwrap(), Ok(json!({ "ok": true })));
    }

    #[test]
    fn abandoned_calls_are_pruned() {
        let mut pending = HashMap::new();
        let (alive, _waiting) = oneshot::channel();
        let (abandoned, gave_up) = oneshot::channel();
        pending.insert(1, alive);
        pending.insert(2, abandoned);
        drop(gave_up);

        prune(&mut pending);
        assert!(pending.contains_key(&1), "a waiting caller keeps its entry");
        assert!(!pending.contains_key(&2), "a timed-out caller's entry is dropped");
    }
}
