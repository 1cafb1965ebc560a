#![doc = include_str!("../../../README.md")]

mod command;
pub mod config;
pub mod dispatcher;
mod error;
pub mod files;
pub mod globals;
pub mod host;
pub mod identity;
pub mod options;
pub mod prefix;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod tokens;
pub mod value;
mod worker;

pub use crate::{
    command::{AdminCommand, parse as parse_admin, usage as admin_usage},
    config::{Config, FileConfig, InlineConfig, OptionsConfig, PrefixConfig},
    dispatcher::{Context, Dispatcher, substitute_variables},
    error::{ConfigError, ExecError, PrefixError, SessionError, StoreError, UsageError},
    files::{Artifact, ExtensionFiles, ExtensionPaths},
    globals::{BASE_GLOBALS_TYPE, CarriedState, Extension, Globals},
    host::{Host, Message, MessageKind},
    identity::{Identity, Recipient},
    options::{AssemblyRef, AssemblyTable, DEFAULT_IMPORTS, ScriptOptions},
    prefix::{HandlerKey, HandlerKind, Invocation, Match, Prefix, PrefixHandler, PrefixRegistry},
    registry::SessionRegistry,
    service::{COPY_FROM_PREVIOUS, ExecutionService, ExtensionInit, ExtensionUnit, Member, MemberKind, Param, TypeShape},
    session::{ArtifactStatus, ReloadReport, Session, SessionState, unify_using},
    store::{ClearEvent, ClearKind, DynamicStore, Transform},
    tokens::{Token, TokenRegistry},
    value::{Key, NULL_TEXT, Value},
    worker::TaskClass,
};
