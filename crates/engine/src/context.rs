//! Per-run execution context handed to every actor and lifecycle hook.

use std::fmt;
use std::sync::Arc;

use crate::argument::{ArgumentResolver, InMemoryScriptEngine, Scope, ScriptEngine};
use crate::processor::{Pacer, RunControl, SleepPacer};

/// State shared by every component taking part in one run.
///
/// The scope is the data model DataBound arguments resolve against. The
/// script engine owns script variables and scripted arguments. Both are
/// mutated in traversal order only, so a context must not be shared between
/// processors running on different threads.
pub struct RunContext {
    pub scope: Scope,
    pub scripts: Box<dyn ScriptEngine>,
    pub control: RunControl,
    pub pacer: Arc<dyn Pacer>,
}

impl RunContext {
    pub fn new(scope: Scope, scripts: impl ScriptEngine + 'static) -> Self {
        Self {
            scope,
            scripts: Box::new(scripts),
            control: RunControl::new(),
            pacer: Arc::new(SleepPacer),
        }
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    /// Argument resolver bound to the current scope and script engine.
    pub fn resolver(&mut self) -> ArgumentResolver<'_> {
        ArgumentResolver::new(&self.scope, self.scripts.as_mut())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Scope::root("globals", serde_json::Map::new()), InMemoryScriptEngine::new())
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("scope", &self.scope)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}
