//! Task spawning for async hand-offs.
//!
//! Every hand-off runs under a terminal catch: the inner task's error or panic
//! is logged and swallowed so one identity's failure cannot reach another
//! caller.

use std::{fmt::Display, future::Future, sync::OnceLock};

use tokio::task::JoinHandle;

/// Execution classes used for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
    /// Evaluation of user input.
    Evaluation,
    /// Session mutation: reload, reset, import changes.
    Session,
}

impl TaskClass {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Evaluation => "evaluation",
            Self::Session => "session",
        }
    }
}

fn runtime_handle() -> tokio::runtime::Handle {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return handle;
    }

    static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    let runtime = GLOBAL_RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(2)
            .thread_name("scriptlet-worker-global")
            .build()
            .expect("failed to build scriptlet global tokio runtime")
    });
    runtime.handle().clone()
}

/// Spawns `fut` and logs (never propagates) its error or panic.
pub fn spawn_logged<F, E>(class: TaskClass, what: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tracing::trace!(worker_class = class.as_str(), task = what, "worker.spawn");
    let handle = runtime_handle();
    let inner = handle.spawn(fut);
    handle.spawn(async move {
        match inner.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(worker_class = class.as_str(), task = what, error = %err, "task failed"),
            Err(join) => tracing::error!(worker_class = class.as_str(), task = what, error = %join, "task panicked"),
        }
    })
}
