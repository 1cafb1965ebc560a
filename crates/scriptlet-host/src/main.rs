//! Stdio host for scriptlet sessions.
//!
//! Reads identity-tagged lines from stdin, routes them through a
//! [`Dispatcher`], and evaluates code in a backend process that speaks the
//! JSON-lines protocol described in [`bridge`].

mod bridge;
mod console;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use clap::Parser;
use scriptlet::{Config, Dispatcher, Identity, Message, Recipient};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    bridge::BridgeService,
    console::{ConsoleHost, Input},
};

/// Host command line arguments.
#[derive(Parser, Debug)]
#[command(name = "scriptlet-host")]
#[command(about = "Per-identity scripting sessions over stdio")]
struct Args {
    /// Backend executable implementing the execution protocol
    #[arg(short, long, value_name = "PATH")]
    backend: PathBuf,

    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Identity observing every echo and allowed to run code (repeatable)
    #[arg(long = "privileged", value_name = "IDENTITY", value_parser = console::parse_identity)]
    privileged: Vec<Identity>,

    /// Extension account of an identity (repeatable)
    #[arg(long = "account", value_name = "IDENTITY=ID", value_parser = console::parse_account)]
    accounts: Vec<(Identity, u32)>,

    /// Let every identity run code
    #[arg(long)]
    allow_all: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Arguments passed through to the backend
    #[arg(last = true)]
    backend_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries deliveries, so logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::new(),
    };
    let accounts: HashMap<Identity, u32> = args.accounts.into_iter().collect();
    let host = Arc::new(ConsoleHost::new(args.privileged, accounts, args.allow_all));
    let service = Arc::new(BridgeService::spawn(&args.backend, &args.backend_args, host.clone())?);
    let dispatcher = Dispatcher::new(config, host.clone(), service.clone())?;
    info!(backend = %args.backend.display(), "host.start");

    if let Some(greeting) = dispatcher.initialize() {
        greeting.await?;
    }

    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        in_flight.retain(|task| !task.is_finished());
        match console::parse_line(&line) {
            Ok(Some(input)) => {
                if let Some(task) = serve(&dispatcher, &host, input).await {
                    in_flight.push(task);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "host.bad_input"),
        }
    }

    for task in in_flight {
        if let Err(err) = task.await {
            warn!(error = %err, "host.task");
        }
    }
    service.kill();
    info!("host.stop");
    Ok(())
}

/// Handles one input; evaluation tasks are returned rather than awaited so
/// slow code does not hold up other identities.
async fn serve(dispatcher: &Dispatcher, host: &ConsoleHost, input: Input) -> Option<JoinHandle<()>> {
    match input {
        Input::Join(who) => {
            if let Err(err) = dispatcher.on_join(&who).await {
                warn!(identity = %who, error = %err, "host.join");
            }
            None
        }
        Input::Leave(who) => {
            match dispatcher.on_leave(&who) {
                Ok(had_session) => info!(identity = %who, had_session, "host.leave"),
                Err(err) => warn!(identity = %who, error = %err, "host.leave"),
            }
            None
        }
        Input::Admin(who, args) => dispatcher.admin(&who, args.as_slice()),
        Input::Inline(who, text) => {
            let substituted = dispatcher.substitute_inline(&who, &text).await;
            let text = match substituted {
                Ok(substituted) => substituted,
                Err(err) => {
                    warn!(identity = %who, error = %err, "host.inline");
                    text
                }
            };
            chat(dispatcher, &who, &text);
            None
        }
        Input::Toggle(who, enabled) => {
            if who.is_server() {
                host.set_enabled(enabled);
                info!(enabled, "host.toggle");
            } else {
                warn!(identity = %who, "host.toggle.denied");
            }
            None
        }
        Input::Text(who, text) => {
            let task = dispatcher.dispatch(&who, &text, true, true);
            if task.is_none() {
                chat(dispatcher, &who, &text);
            }
            task
        }
    }
}

/// Broadcasts a line that was not taken as a command.
fn chat(dispatcher: &Dispatcher, who: &Identity, text: &str) {
    dispatcher
        .ctx()
        .host()
        .send(&Recipient::All, &Message::info(format!("<{who}> {text}")));
}
