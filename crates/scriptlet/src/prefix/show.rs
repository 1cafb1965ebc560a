use async_trait::async_trait;

use super::{HandlerKind, Invocation, Prefix, PrefixHandler};
use crate::error::ExecError;

/// Runs `return <code>` and prints the value; null prints as `<NULL>`.
#[derive(Debug, Clone)]
pub struct ShowHandler {
    prefix: Prefix,
}

impl ShowHandler {
    #[must_use]
    pub fn new(prefix: Prefix) -> Self {
        Self { prefix }
    }
}

#[async_trait]
impl PrefixHandler for ShowHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Show
    }

    fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    async fn handle_inner(&self, inv: &Invocation, code: &str) -> Result<(), ExecError> {
        let value = inv.run(&format!("return {code}")).await?;
        inv.print(&value.to_string());
        Ok(())
    }
}
