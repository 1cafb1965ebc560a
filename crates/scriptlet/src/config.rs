//! Runtime configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    options::{DEFAULT_IMPORTS, ScriptOptions},
    store::DEFAULT_RECENT_VERSIONS,
};

/// Default number of pre-allocated session slots.
const DEFAULT_MAX_SLOTS: usize = 255;
/// Default execution timeout (10 s).
const DEFAULT_EXEC_TIMEOUT_MS: u64 = 10_000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Tag prefixed to session announcements, e.g. `[CSharpScripting]`.
    pub tag: String,
    pub prefixes: PrefixConfig,
    /// Size of the fixed slot universe.
    pub max_slots: usize,
    pub files: FileConfig,
    /// Per-call limit for service calls in milliseconds; 0 disables it.
    pub exec_timeout_ms: u64,
    pub options: OptionsConfig,
    pub inline: InlineConfig,
    /// Version window covered by `show(false)` on session stores.
    pub recent_versions: u64,
}

/// Prefix strings of the built-in handlers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrefixConfig {
    pub execute: String,
    pub show: String,
    pub describe_value: String,
    pub describe_type: String,
}

/// Where per-account extension sources live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Root directory; each account gets `<root>/<account id>/`.
    pub root: String,
    pub using_file: String,
    pub constructor_file: String,
    pub members_file: String,
}

/// Process-wide default script options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    pub imports: Vec<String>,
    pub language_version: String,
    pub allow_unsafe: bool,
}

/// Decoration wrapped around inline-substituted results.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InlineConfig {
    pub open: String,
    pub close: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tag: "CSharpScripting".to_owned(),
            prefixes: PrefixConfig::default(),
            max_slots: DEFAULT_MAX_SLOTS,
            files: FileConfig::default(),
            exec_timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
            options: OptionsConfig::default(),
            inline: InlineConfig::default(),
            recent_versions: DEFAULT_RECENT_VERSIONS,
        }
    }
}

impl Default for PrefixConfig {
    fn default() -> Self {
        Self {
            execute: ";".to_owned(),
            show: ";;".to_owned(),
            describe_value: ";=".to_owned(),
            describe_type: ";==".to_owned(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root: "CSharpScripting".to_owned(),
            using_file: "Using.cs".to_owned(),
            constructor_file: "GlobalsConstructor.cs".to_owned(),
            members_file: "GlobalsMembers.cs".to_owned(),
        }
    }
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            imports: DEFAULT_IMPORTS.iter().map(|&s| s.to_owned()).collect(),
            language_version: "latest".to_owned(),
            allow_unsafe: false,
        }
    }
}

impl Default for InlineConfig {
    fn default() -> Self {
        Self {
            open: "[c/ff69b4:".to_owned(),
            close: "]".to_owned(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&text)
    }

    #[must_use]
    pub fn max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    #[must_use]
    pub fn extension_root(mut self, root: impl Into<String>) -> Self {
        self.files.root = root.into();
        self
    }

    #[must_use]
    pub fn exec_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout_ms = timeout.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The configured timeout, `None` when disabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.exec_timeout_ms > 0).then(|| Duration::from_millis(self.exec_timeout_ms))
    }

    /// Builds the process-wide default [`ScriptOptions`].
    #[must_use]
    pub fn default_options(&self) -> ScriptOptions {
        ScriptOptions {
            imports: self.options.imports.clone(),
            references: Vec::new(),
            language_version: self.options.language_version.clone(),
            allow_unsafe: self.options.allow_unsafe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = Config::from_toml_str(
            r#"
            max_slots = 8
            exec_timeout_ms = 0

            [prefixes]
            show = "??"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_slots, 8);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.prefixes.show, "??");
        assert_eq!(config.prefixes.execute, ";");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("bogus = 1"),
            Err(ConfigError::Parse(_))
        ));
    }
}
