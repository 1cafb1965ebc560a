use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{HandlerKind, Invocation, Prefix, PrefixHandler};
use crate::error::ExecError;

/// A single namespace import, optionally `static` or aliased.
static IMPORT_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^using\s+(static\s+)?[A-Za-z_][\w.]*(\s*=\s*[A-Za-z_][\w.<>,\s]*)?$").expect("valid import regex")
});

/// Runs code for effect.
///
/// Input made only of import statements is not a one-off: after a trial run
/// the statements are added to the session's import set.
#[derive(Debug, Clone)]
pub struct ExecuteHandler {
    prefix: Prefix,
}

impl ExecuteHandler {
    #[must_use]
    pub fn new(prefix: Prefix) -> Self {
        Self { prefix }
    }
}

/// Splits `code` into import statements, or `None` if anything else is
/// present.
fn only_imports(code: &str) -> Option<Vec<&str>> {
    let statements: Vec<&str> = code
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect();
    let all_imports = !statements.is_empty() && statements.iter().all(|s| IMPORT_STATEMENT.is_match(s));
    all_imports.then_some(statements)
}

#[async_trait]
impl PrefixHandler for ExecuteHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Execute
    }

    fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    async fn handle_inner(&self, inv: &Invocation, code: &str) -> Result<(), ExecError> {
        inv.run(code).await?;
        if let Some(imports) = only_imports(code) {
            // A busy session has already told the identity to retry.
            match inv.session().add_using(inv.ctx(), imports).await {
                Ok(added) => tracing::debug!(identity = %inv.identity(), added, "prefix.execute.imports"),
                Err(err) => tracing::debug!(identity = %inv.identity(), error = %err, "prefix.execute.imports_skipped"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_import_only_input() {
        assert_eq!(only_imports("using System.Text;"), Some(vec!["using System.Text"]));
        assert_eq!(
            only_imports("using static System.Math; using IO = System.IO;;"),
            Some(vec!["using static System.Math", "using IO = System.IO"])
        );
    }

    #[test]
    fn rejects_mixed_or_statement_input() {
        assert_eq!(only_imports("using System; int x = 5;"), None);
        assert_eq!(only_imports("using (var f = Open()) {}"), None);
        assert_eq!(only_imports("using var s = stream;"), None);
        assert_eq!(only_imports("int x = 5;"), None);
        assert_eq!(only_imports(";"), None);
    }
}
