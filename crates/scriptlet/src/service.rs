//! Boundary to the external compilation & execution service.
//!
//! This crate never parses or type-checks code itself. Everything that needs
//! a compiler (running snippets, resolving types, compiling extension
//! subtypes, reflecting over members) is a capability of the service.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ExecError, SessionError},
    globals::{BASE_GLOBALS_TYPE, CarriedState, Globals},
    options::ScriptOptions,
    tokens::Token,
    value::Value,
};

/// Name of the statement the generated constructor opens with.
pub const COPY_FROM_PREVIOUS: &str = "copy_from_previous";

/// The compilation & execution service.
///
/// Implementations must be safe to call concurrently: evaluations from
/// different sessions, and an evaluation racing a reload of the same
/// session, may overlap.
#[async_trait]
pub trait ExecutionService: Send + Sync + 'static {
    /// Runs `code` against `globals` and returns its return value
    /// ([`Value::Null`] when it returns nothing).
    async fn run(&self, code: &str, options: &ScriptOptions, globals: &Arc<Globals>) -> Result<Value, ExecError>;

    /// Describes the members of the named type as seen under `options`.
    async fn describe(
        &self,
        type_name: &str,
        options: &ScriptOptions,
        globals: &Arc<Globals>,
    ) -> Result<TypeShape, ExecError>;

    /// Compiles `unit` as a subtype of the base globals type and constructs
    /// one instance of it.
    ///
    /// When the generated constructor executes its leading
    /// [`COPY_FROM_PREVIOUS`] statement the service must call
    /// [`ExtensionInit::copy_from_previous`] with the embedded token and build
    /// the instance from the returned state.
    async fn compile_globals(
        &self,
        unit: &ExtensionUnit,
        options: &ScriptOptions,
        globals: &Arc<Globals>,
        init: &dyn ExtensionInit,
    ) -> Result<Globals, ExecError>;
}

/// Host callback used by a freshly compiled constructor to reach the state of
/// the instance it replaces.
pub trait ExtensionInit: Send + Sync {
    fn copy_from_previous(&self, token: Token) -> Result<CarriedState, SessionError>;
}

/// Source of one extension subtype, assembled from a session's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionUnit {
    /// Unique name of the generated subtype.
    pub type_name: String,
    /// Token handed back through [`COPY_FROM_PREVIOUS`].
    pub token: Token,
    /// Import statements in effect, one per line.
    pub imports: String,
    /// Raw constructor-body statements, if a constructor file supplied any.
    pub constructor: Option<String>,
    /// Raw type-body text spliced verbatim into the subtype.
    pub members: Option<String>,
}

impl ExtensionUnit {
    /// Returns the generated constructor.
    ///
    /// The carry-forward statement always comes first so user constructor code
    /// observes the previous instance's state.
    #[must_use]
    pub fn constructor_source(&self) -> String {
        let body = self
            .constructor
            .as_deref()
            .map(|code| format!("\n    {code};"))
            .unwrap_or_default();
        format!(
            "public {name}()\n{{\n    {COPY_FROM_PREVIOUS}({token});{body}\n}}",
            name = self.type_name,
            token = self.token,
        )
    }

    /// Returns the whole compilation unit: imports, the subtype declaration
    /// and a trailing expression constructing one instance.
    #[must_use]
    pub fn source(&self) -> String {
        let members = self.members.as_deref().unwrap_or_default();
        format!(
            "{imports}\n\npublic class {name} : {BASE_GLOBALS_TYPE}\n{{\n{ctor}\n{members}\n}}\n\nreturn new {name}();",
            imports = self.imports,
            name = self.type_name,
            ctor = self.constructor_source(),
        )
    }
}

/// Reflection category of a type member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    NestedType,
    Field,
    Property,
    Constructor,
    Method,
    /// Anything else (events, ...), carrying the service's category name.
    Other(String),
}

/// One parameter of a constructor or method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub type_name: String,
    pub name: String,
}

/// One inspectable member of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub kind: MemberKind,
    pub name: String,
    /// Field/property type, or method return type.
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Compiler-generated members (accessors, operators) are hidden.
    #[serde(default)]
    pub special_name: bool,
}

impl Member {
    pub fn new(kind: MemberKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            type_name: None,
            params: Vec::new(),
            special_name: false,
        }
    }

    #[must_use]
    pub fn typed(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn param(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.params.push(Param {
            type_name: type_name.into(),
            name: name.into(),
        });
        self
    }

    #[must_use]
    pub fn special(mut self) -> Self {
        self.special_name = true;
        self
    }
}

/// The member summary of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeShape {
    pub name: String,
    pub members: Vec<Member>,
}
