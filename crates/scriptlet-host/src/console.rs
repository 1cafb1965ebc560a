//! Line-oriented stdio front end.
//!
//! Input is one event per line: `<identity> <text>`, where the identity is
//! `server`, `#<slot>` or any other word naming an agent, and text starting
//! with `:` is a console command (`:join`, `:leave`, `:css <args..>`,
//! `:inline <text>`, `:enable`, `:disable`). Output is one JSON object per
//! delivered message.

use std::{
    collections::{HashMap, HashSet},
    io::{self, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use scriptlet::{Host, Identity, Message, MessageKind, Recipient};
use serde::Serialize;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Join(Identity),
    Leave(Identity),
    Admin(Identity, Vec<String>),
    Inline(Identity, String),
    /// Turns scripting on or off; only honoured for the server.
    Toggle(Identity, bool),
    Text(Identity, String),
}

/// Parses `server`, `#<slot>` or an agent name.
pub fn parse_identity(text: &str) -> Result<Identity, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty identity".to_owned());
    }
    if text.eq_ignore_ascii_case("server") {
        return Ok(Identity::Server);
    }
    match text.strip_prefix('#') {
        Some(slot) => slot
            .parse()
            .map(Identity::Slot)
            .map_err(|err| format!("invalid slot \"{slot}\": {err}")),
        None => Ok(Identity::Agent(text.to_owned())),
    }
}

/// Parses `IDENTITY=ACCOUNT`.
pub fn parse_account(text: &str) -> Result<(Identity, u32), String> {
    let (identity, account) = text
        .rsplit_once('=')
        .ok_or_else(|| format!("expected IDENTITY=ACCOUNT, got \"{text}\""))?;
    let account = account
        .trim()
        .parse()
        .map_err(|err| format!("invalid account id \"{account}\": {err}"))?;
    Ok((parse_identity(identity)?, account))
}

/// Parses one input line; `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (who, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let who = parse_identity(who)?;
    let rest = rest.trim_start();

    let Some(command) = rest.strip_prefix(':') else {
        return Ok(Some(Input::Text(who, rest.to_owned())));
    };
    let (name, args) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    Ok(Some(match name {
        "join" => Input::Join(who),
        "leave" => Input::Leave(who),
        "css" => Input::Admin(who, args.split_whitespace().map(str::to_owned).collect()),
        "inline" => Input::Inline(who, args.trim_start().to_owned()),
        "enable" => Input::Toggle(who, true),
        "disable" => Input::Toggle(who, false),
        other => return Err(format!("unknown console command \":{other}\"")),
    }))
}

#[derive(Serialize)]
struct Delivery<'a> {
    to: &'a Recipient,
    kind: MessageKind,
    text: &'a str,
}

/// Host that prints every message to stdout as a JSON line.
#[derive(Debug)]
pub struct ConsoleHost {
    privileged: Vec<Identity>,
    accounts: HashMap<Identity, u32>,
    allowed: HashSet<Identity>,
    allow_all: bool,
    enabled: AtomicBool,
}

impl ConsoleHost {
    /// Privileged identities and the server may always run code; everyone
    /// else only with `allow_all`.
    #[must_use]
    pub fn new(privileged: Vec<Identity>, accounts: HashMap<Identity, u32>, allow_all: bool) -> Self {
        let mut allowed: HashSet<Identity> = privileged.iter().cloned().collect();
        allowed.insert(Identity::Server);
        Self {
            privileged,
            accounts,
            allowed,
            allow_all,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn write(to: &Recipient, message: &Message) -> io::Result<()> {
        let delivery = Delivery {
            to,
            kind: message.kind,
            text: &message.text,
        };
        let line = serde_json::to_string(&delivery).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()
    }
}

impl Host for ConsoleHost {
    fn send(&self, to: &Recipient, message: &Message) {
        if let Err(err) = Self::write(to, message) {
            tracing::warn!(%to, error = %err, "console.write_failed");
        }
    }

    fn privileged(&self) -> Vec<Identity> {
        self.privileged.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn has_permission(&self, identity: &Identity) -> bool {
        self.allow_all || self.allowed.contains(identity)
    }

    fn account_id(&self, identity: &Identity) -> Option<u32> {
        self.accounts.get(identity).copied()
    }
}
