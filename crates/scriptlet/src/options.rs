//! Compiler/execution options and the assembly resolution table.
//!
//! `ScriptOptions` is immutable: every `add_*` returns a new value
//! and sessions swap the whole `Arc` on update.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Namespaces imported into every fresh session.
pub const DEFAULT_IMPORTS: &[&str] = &[
    "System",
    "System.Collections",
    "System.Collections.Concurrent",
    "System.Collections.Generic",
    "System.Collections.ObjectModel",
    "System.Diagnostics.CodeAnalysis",
    "System.IO",
    "System.IO.Compression",
    "System.Linq",
    "System.Reflection",
    "System.Text",
    "System.Text.RegularExpressions",
];

/// Handle to a compiled unit the service can load types from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyRef {
    /// Fully qualified unit name, unique per compilation.
    pub name: String,
    /// Service-specific locator (an image id, a path, ...).
    pub locator: String,
}

impl AssemblyRef {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

/// Compilation and execution configuration handed to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOptions {
    pub imports: Vec<String>,
    pub references: Vec<AssemblyRef>,
    pub language_version: String,
    pub allow_unsafe: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            imports: DEFAULT_IMPORTS.iter().map(|&s| s.to_owned()).collect(),
            references: Vec::new(),
            language_version: "latest".to_owned(),
            allow_unsafe: false,
        }
    }
}

impl ScriptOptions {
    /// Returns a copy with the given namespaces imported, skipping duplicates.
    #[must_use]
    pub fn add_imports<I, S>(&self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        for import in imports {
            let import = import.into();
            if !next.imports.contains(&import) {
                next.imports.push(import);
            }
        }
        next
    }

    /// Returns a copy referencing the given compiled units, skipping duplicates.
    #[must_use]
    pub fn add_references(&self, references: impl IntoIterator<Item = AssemblyRef>) -> Self {
        let mut next = self.clone();
        for reference in references {
            if !next.references.iter().any(|r| r.name == reference.name) {
                next.references.push(reference);
            }
        }
        next
    }
}

/// Process-wide name-to-unit table consulted when the service resolves a
/// compiled unit by name.
#[derive(Debug, Default)]
pub struct AssemblyTable {
    units: Mutex<HashMap<String, AssemblyRef>>,
}

impl AssemblyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a unit under its full name.
    pub fn register(&self, unit: AssemblyRef) {
        tracing::debug!(unit = %unit.name, "assembly.register");
        self.units.lock().insert(unit.name.clone(), unit);
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<AssemblyRef> {
        self.units.lock().get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
