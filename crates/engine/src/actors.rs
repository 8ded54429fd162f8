//! Built-in actors usable from fixture documents without external drivers.

use anyhow::{Context, Result, bail, ensure};
use autoflow_types::{ArgumentSpec, ValueType};
use serde_json::Value;
use tracing::info;

use crate::component::Actor;
use crate::context::RunContext;

/// Copies the value of `source` into `target`.
#[derive(Debug, Clone)]
pub struct AssignActor {
    pub source: ArgumentSpec,
    pub target: ArgumentSpec,
}

impl Actor for AssignActor {
    fn act(&mut self, context: &mut RunContext) -> Result<()> {
        let mut resolver = context.resolver();
        let value = resolver
            .resolve(&self.source, ValueType::Any)
            .context("resolving assignment source")?
            .into_owned();
        resolver.assign(&self.target, value).context("writing assignment target")?;
        Ok(())
    }
}

/// Logs a resolved message at info level.
#[derive(Debug, Clone)]
pub struct LogActor {
    pub message: ArgumentSpec,
}

impl Actor for LogActor {
    fn act(&mut self, context: &mut RunContext) -> Result<()> {
        let message = context.resolver().resolve(&self.message, ValueType::Any).context("resolving log message")?;
        match message.as_ref() {
            Value::String(text) => info!(target: "autoflow::actor", "{text}"),
            other => info!(target: "autoflow::actor", "{other}"),
        }
        Ok(())
    }
}

/// Fails unless `actual` and `expected` resolve to equal values.
#[derive(Debug, Clone)]
pub struct AssertActor {
    pub actual: ArgumentSpec,
    pub expected: ArgumentSpec,
    pub message: Option<String>,
}

impl Actor for AssertActor {
    fn act(&mut self, context: &mut RunContext) -> Result<()> {
        let mut resolver = context.resolver();
        let actual = resolver.resolve(&self.actual, ValueType::Any).context("resolving actual value")?;
        let expected = resolver.resolve(&self.expected, ValueType::Any).context("resolving expected value")?;
        ensure!(
            actual == expected,
            "{}: expected {}, got {}",
            self.message.as_deref().unwrap_or("assertion failed"),
            expected,
            actual
        );
        Ok(())
    }
}

/// Always fails.
#[derive(Debug, Clone)]
pub struct FailActor {
    pub message: String,
}

impl Actor for FailActor {
    fn act(&mut self, _context: &mut RunContext) -> Result<()> {
        bail!("{}", self.message)
    }
}
