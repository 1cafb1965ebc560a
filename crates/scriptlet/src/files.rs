//! Per-account extension source files.
//!
//! Each account may keep three optional files under `<root>/<account id>/`:
//! an import list, a constructor body and a members body. Files are read as
//! opaque text; a missing or blank file simply contributes nothing.

use std::{io, path::PathBuf};

use crate::config::FileConfig;

/// Which of the three extension files an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Imports,
    Constructor,
    Members,
}

/// Resolved file paths for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPaths {
    pub account_id: u32,
    pub imports: PathBuf,
    pub constructor: PathBuf,
    pub members: PathBuf,
}

/// Locates and reads extension sources.
#[derive(Debug, Clone)]
pub struct ExtensionFiles {
    config: FileConfig,
}

impl ExtensionFiles {
    #[must_use]
    pub fn new(config: FileConfig) -> Self {
        Self { config }
    }

    /// File name of an artifact, as used in announcements.
    #[must_use]
    pub fn file_name(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::Imports => &self.config.using_file,
            Artifact::Constructor => &self.config.constructor_file,
            Artifact::Members => &self.config.members_file,
        }
    }

    #[must_use]
    pub fn paths(&self, account_id: u32) -> ExtensionPaths {
        let dir = PathBuf::from(&self.config.root).join(account_id.to_string());
        ExtensionPaths {
            account_id,
            imports: dir.join(&self.config.using_file),
            constructor: dir.join(&self.config.constructor_file),
            members: dir.join(&self.config.members_file),
        }
    }

    /// Reads the import list: trimmed `using ...` lines, other lines ignored.
    ///
    /// Returns `None` when the file is absent or holds no import line.
    pub async fn read_imports(&self, paths: &ExtensionPaths) -> io::Result<Option<Vec<String>>> {
        let Some(text) = read_optional(&paths.imports).await? else {
            return Ok(None);
        };
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("using ") && line.len() > "using ".len())
            .map(str::to_owned)
            .collect();
        Ok((!lines.is_empty()).then_some(lines))
    }

    /// Reads the constructor body; `None` when absent or blank.
    pub async fn read_constructor(&self, paths: &ExtensionPaths) -> io::Result<Option<String>> {
        Ok(read_optional(&paths.constructor).await?.filter(|code| !code.trim().is_empty()))
    }

    /// Reads the members body; `None` when absent or blank.
    pub async fn read_members(&self, paths: &ExtensionPaths) -> io::Result<Option<String>> {
        Ok(read_optional(&paths.members).await?.filter(|code| !code.trim().is_empty()))
    }
}

async fn read_optional(path: &PathBuf) -> io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
