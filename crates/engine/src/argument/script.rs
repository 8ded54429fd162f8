//! Script engine contract and the in-memory engine used by fixtures.
//!
//! A script engine owns named script variables and turns script files into
//! callables. Getters and setters receive the current [`Scope`] so a script
//! can read the globals object the same way DataBound arguments do.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::scope::Scope;
use super::template::{Template, navigate, split_path};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script variable '{0}' is not declared")]
    UnknownVariable(String),
    #[error("script '{0}' is not registered")]
    ScriptNotFound(String),
    #[error("script '{file}' cannot be used as a {expected}")]
    WrongShape { file: String, expected: &'static str },
    #[error("script '{file}' could not resolve '{expression}'")]
    Unresolved { file: String, expression: String },
    #[error("script '{file}' failed")]
    Execution {
        file: String,
        #[source]
        source: anyhow::Error,
    },
}

type GetterFn = dyn Fn(&Scope) -> anyhow::Result<Value> + Send + Sync;
type SetterFn = dyn Fn(&Scope, Value) -> anyhow::Result<()> + Send + Sync;

/// Zero-argument callable produced from a script file.
#[derive(Clone)]
pub struct ScriptGetter {
    file: Arc<str>,
    call: Arc<GetterFn>,
}

impl ScriptGetter {
    pub fn new(file: &str, call: impl Fn(&Scope) -> anyhow::Result<Value> + Send + Sync + 'static) -> Self {
        Self {
            file: Arc::from(file),
            call: Arc::new(call),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn invoke(&self, scope: &Scope) -> Result<Value, ScriptError> {
        (self.call)(scope).map_err(|source| ScriptError::Execution {
            file: self.file.to_string(),
            source,
        })
    }
}

impl fmt::Debug for ScriptGetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptGetter").field("file", &self.file).finish_non_exhaustive()
    }
}

/// Single-argument callable produced from a script file.
#[derive(Clone)]
pub struct ScriptSetter {
    file: Arc<str>,
    call: Arc<SetterFn>,
}

impl ScriptSetter {
    pub fn new(file: &str, call: impl Fn(&Scope, Value) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        Self {
            file: Arc::from(file),
            call: Arc::new(call),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn invoke(&self, scope: &Scope, value: Value) -> Result<(), ScriptError> {
        (self.call)(scope, value).map_err(|source| ScriptError::Execution {
            file: self.file.to_string(),
            source,
        })
    }
}

impl fmt::Debug for ScriptSetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptSetter").field("file", &self.file).finish_non_exhaustive()
    }
}

/// Host-side scripting contract consumed by the argument resolver.
pub trait ScriptEngine: Send {
    fn has_script_variable(&self, name: &str) -> bool;

    fn get_variable_value(&self, name: &str) -> Result<Value, ScriptError>;

    fn set_variable_value(&mut self, name: &str, value: Value) -> Result<(), ScriptError>;

    /// Returns the (possibly cached) getter compiled from `script_file`.
    fn create_getter(&mut self, script_file: &str) -> Result<ScriptGetter, ScriptError>;

    /// Returns the (possibly cached) setter compiled from `script_file`.
    fn create_setter(&mut self, script_file: &str) -> Result<ScriptSetter, ScriptError>;

    /// Runs a script file for its side effects.
    fn execute_script(&mut self, script_file: &str, scope: &Scope) -> Result<(), ScriptError>;

    /// Creates a private variable layer for `owner` on top of the shared variables.
    ///
    /// Engines without isolation support may ignore the layer calls.
    fn open_variable_layer(&mut self, _owner: &str) {}

    /// Directs variable reads and writes to `owner`'s layer, or to the shared
    /// variables for `None`.
    fn activate_variable_layer(&mut self, _owner: Option<&str>) {}

    /// Discards `owner`'s layer and everything written to it.
    fn close_variable_layer(&mut self, _owner: &str) {}
}

/// Script file contents understood by [`InMemoryScriptEngine`].
#[derive(Clone)]
pub enum ScriptSource {
    /// Host-provided getter.
    Getter(ScriptGetter),
    /// Host-provided setter.
    Setter(ScriptSetter),
    /// `${{ path }}` template evaluated against script variables, then globals.
    Template(String),
    /// Reads and writes a single script variable.
    Variable(String),
    /// Declares script variables when executed.
    Declarations(Map<String, Value>),
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::Getter(getter) => f.debug_tuple("Getter").field(getter).finish(),
            ScriptSource::Setter(setter) => f.debug_tuple("Setter").field(setter).finish(),
            ScriptSource::Template(template) => f.debug_tuple("Template").field(template).finish(),
            ScriptSource::Variable(name) => f.debug_tuple("Variable").field(name).finish(),
            ScriptSource::Declarations(values) => f.debug_tuple("Declarations").field(values).finish(),
        }
    }
}

/// Variable layer compiled callables read through; switches with activation.
type ActiveLayer = Arc<RwLock<Scope>>;

/// Script engine keeping variables and script files in memory.
///
/// Variables live in [`Scope`] layers: one shared layer plus an optional
/// private layer per owner. A private layer sees the shared variables, but
/// declarations and writes made while it is active stay inside it.
#[derive(Debug)]
pub struct InMemoryScriptEngine {
    shared: Scope,
    active: ActiveLayer,
    layers: HashMap<String, Scope>,
    scripts: IndexMap<String, ScriptSource>,
    getters: HashMap<String, ScriptGetter>,
    setters: HashMap<String, ScriptSetter>,
}

impl Default for InMemoryScriptEngine {
    fn default() -> Self {
        let shared = Scope::root("script variables", Map::new());
        Self {
            active: Arc::new(RwLock::new(shared.clone())),
            shared,
            layers: HashMap::new(),
            scripts: IndexMap::new(),
            getters: HashMap::new(),
            setters: HashMap::new(),
        }
    }
}

impl InMemoryScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a shared variable visible to every layer.
    pub fn declare_variable(&mut self, name: impl Into<String>, value: Value) {
        self.shared.assign(name, value);
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.declare_variable(name, value);
        self
    }

    /// Registers (or replaces) a script file, dropping any cached callable for it.
    pub fn register_script(&mut self, file: impl Into<String>, source: ScriptSource) {
        let file = file.into();
        self.getters.remove(&file);
        self.setters.remove(&file);
        self.scripts.insert(file, source);
    }

    pub fn with_script(mut self, file: impl Into<String>, source: ScriptSource) -> Self {
        self.register_script(file, source);
        self
    }

    /// Variables visible through the active layer.
    pub fn variable_names(&self) -> Vec<String> {
        current_layer(&self.active).snapshot().keys().cloned().collect()
    }

    fn source(&self, file: &str) -> Result<&ScriptSource, ScriptError> {
        self.scripts.get(file).ok_or_else(|| ScriptError::ScriptNotFound(file.to_string()))
    }

    fn compile_getter(&self, file: &str) -> Result<ScriptGetter, ScriptError> {
        match self.source(file)? {
            ScriptSource::Getter(getter) => Ok(getter.clone()),
            ScriptSource::Template(source) => {
                let template = Template::parse(source);
                let active = self.active.clone();
                let owner = file.to_string();
                Ok(ScriptGetter::new(file, move |scope| {
                    let variables = current_layer(&active);
                    template
                        .render(|expression| resolve_expression(&variables, scope, expression))
                        .map_err(|expression| {
                            ScriptError::Unresolved {
                                file: owner.clone(),
                                expression,
                            }
                            .into()
                        })
                }))
            }
            ScriptSource::Variable(name) => {
                let active = self.active.clone();
                let name = name.clone();
                Ok(ScriptGetter::new(file, move |_| {
                    current_layer(&active)
                        .lookup(&name)
                        .ok_or_else(|| ScriptError::UnknownVariable(name.clone()).into())
                }))
            }
            ScriptSource::Setter(_) | ScriptSource::Declarations(_) => Err(ScriptError::WrongShape {
                file: file.to_string(),
                expected: "getter",
            }),
        }
    }

    fn compile_setter(&self, file: &str) -> Result<ScriptSetter, ScriptError> {
        match self.source(file)? {
            ScriptSource::Setter(setter) => Ok(setter.clone()),
            ScriptSource::Variable(name) => {
                let active = self.active.clone();
                let name = name.clone();
                Ok(ScriptSetter::new(file, move |_, value| {
                    current_layer(&active).assign(name.clone(), value);
                    Ok(())
                }))
            }
            ScriptSource::Getter(_) | ScriptSource::Template(_) | ScriptSource::Declarations(_) => Err(ScriptError::WrongShape {
                file: file.to_string(),
                expected: "setter",
            }),
        }
    }
}

impl ScriptEngine for InMemoryScriptEngine {
    fn has_script_variable(&self, name: &str) -> bool {
        current_layer(&self.active).contains(name)
    }

    fn get_variable_value(&self, name: &str) -> Result<Value, ScriptError> {
        current_layer(&self.active)
            .lookup(name)
            .ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))
    }

    fn set_variable_value(&mut self, name: &str, value: Value) -> Result<(), ScriptError> {
        current_layer(&self.active)
            .update(name, |slot| *slot = value)
            .ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))
    }

    fn create_getter(&mut self, script_file: &str) -> Result<ScriptGetter, ScriptError> {
        if let Some(getter) = self.getters.get(script_file) {
            return Ok(getter.clone());
        }
        let getter = self.compile_getter(script_file)?;
        debug!(script = script_file, "compiled script getter");
        self.getters.insert(script_file.to_string(), getter.clone());
        Ok(getter)
    }

    fn create_setter(&mut self, script_file: &str) -> Result<ScriptSetter, ScriptError> {
        if let Some(setter) = self.setters.get(script_file) {
            return Ok(setter.clone());
        }
        let setter = self.compile_setter(script_file)?;
        debug!(script = script_file, "compiled script setter");
        self.setters.insert(script_file.to_string(), setter.clone());
        Ok(setter)
    }

    fn execute_script(&mut self, script_file: &str, scope: &Scope) -> Result<(), ScriptError> {
        if let ScriptSource::Declarations(values) = self.source(script_file)? {
            let layer = current_layer(&self.active);
            for (name, value) in values {
                layer.assign(name.clone(), value.clone());
            }
            debug!(script = script_file, layer = layer.name(), "declared script variables");
            return Ok(());
        }
        self.create_getter(script_file)?.invoke(scope).map(|_| ())
    }

    fn open_variable_layer(&mut self, owner: &str) {
        let layer = self.shared.child(owner, Map::new());
        debug!(owner, "opened script variable layer");
        self.layers.insert(owner.to_string(), layer);
    }

    fn activate_variable_layer(&mut self, owner: Option<&str>) {
        let layer = match owner {
            None => self.shared.clone(),
            Some(owner) => match self.layers.get(owner) {
                Some(layer) => layer.clone(),
                None => {
                    warn!(owner, "no script variable layer opened; using shared variables");
                    self.shared.clone()
                }
            },
        };
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = layer;
    }

    fn close_variable_layer(&mut self, owner: &str) {
        let Some(layer) = self.layers.remove(owner) else {
            return;
        };
        if current_layer(&self.active).same_scope(&layer) {
            self.activate_variable_layer(None);
        }
        debug!(owner, "closed script variable layer");
    }
}

/// Script variables shadow globals sharing the same root name.
fn resolve_expression(variables: &Scope, scope: &Scope, expression: &str) -> Option<Value> {
    let (root, segments) = split_path(expression);
    let start = variables.lookup(root).or_else(|| scope.lookup(root))?;
    navigate(&start, &segments).ok().cloned()
}

fn current_layer(active: &ActiveLayer) -> Scope {
    active.read().unwrap_or_else(PoisonError::into_inner).clone()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use serde_json::json;

    use super::*;

    fn scope() -> Scope {
        let mut globals = Map::new();
        globals.insert("Person".into(), json!({"Name": "Sheldon", "Age": 30}));
        globals.insert("Name".into(), json!("Penny"));
        Scope::root("globals", globals)
    }

    #[test]
    fn templates_prefer_script_variables() {
        let mut engine = InMemoryScriptEngine::new()
            .with_variable("Name", json!("Howard"))
            .with_script("greeting.script", ScriptSource::Template("Hi ${{ Name }} and ${{ Person.Name }}".into()));

        let getter = engine.create_getter("greeting.script").expect("getter");
        assert_eq!(getter.invoke(&scope()).expect("value"), json!("Hi Howard and Sheldon"));
    }

    #[test]
    fn compiled_getters_are_cached_until_reregistered() {
        let compiled = Arc::new(AtomicUsize::new(0));
        let counter = compiled.clone();
        let mut engine = InMemoryScriptEngine::new().with_script(
            "count.script",
            ScriptSource::Getter(ScriptGetter::new("count.script", move |_| {
                Ok(json!(counter.fetch_add(1, Ordering::SeqCst)))
            })),
        );

        let first = engine.create_getter("count.script").expect("getter");
        let second = engine.create_getter("count.script").expect("getter");
        assert!(Arc::ptr_eq(&first.call, &second.call));

        engine.register_script("count.script", ScriptSource::Template("${{ Name }}".into()));
        let third = engine.create_getter("count.script").expect("getter");
        assert!(!Arc::ptr_eq(&first.call, &third.call));
        assert_eq!(third.invoke(&scope()).expect("value"), json!("Penny"));
    }

    #[test]
    fn variable_scripts_read_and_write() {
        let mut engine = InMemoryScriptEngine::new()
            .with_variable("Total", json!(1))
            .with_script("total.script", ScriptSource::Variable("Total".into()));

        engine.create_setter("total.script").expect("setter").invoke(&scope(), json!(5)).expect("set");
        assert_eq!(engine.get_variable_value("Total").expect("total"), json!(5));
        assert_eq!(engine.create_getter("total.script").expect("getter").invoke(&scope()).expect("get"), json!(5));
    }

    #[test]
    fn wrong_shape_and_missing_scripts_fail() {
        let mut engine = InMemoryScriptEngine::new().with_script("t.script", ScriptSource::Template("x".into()));
        assert!(matches!(engine.create_setter("t.script"), Err(ScriptError::WrongShape { .. })));
        assert!(matches!(engine.create_getter("none.script"), Err(ScriptError::ScriptNotFound(_))));
        assert!(matches!(engine.set_variable_value("Ghost", json!(1)), Err(ScriptError::UnknownVariable(_))));
    }

    #[test]
    fn execution_errors_keep_their_source() {
        let mut engine = InMemoryScriptEngine::new().with_script(
            "boom.script",
            ScriptSource::Getter(ScriptGetter::new("boom.script", |_| bail!("division by zero"))),
        );
        let error = engine.create_getter("boom.script").expect("getter").invoke(&scope()).expect_err("fails");
        assert_eq!(error.to_string(), "script 'boom.script' failed");
        let ScriptError::Execution { source, .. } = error else {
            panic!("expected an execution error");
        };
        assert_eq!(source.to_string(), "division by zero");
    }

    #[test]
    fn private_layers_keep_declarations_apart() {
        let declare = |who: &str| {
            let mut declarations = Map::new();
            declarations.insert("Who".into(), json!(who));
            ScriptSource::Declarations(declarations)
        };
        let mut engine = InMemoryScriptEngine::new()
            .with_variable("Shared", json!(1))
            .with_script("a.script", declare("A"))
            .with_script("b.script", declare("B"))
            .with_script("who.script", ScriptSource::Template("${{ Who }}".into()));

        for owner in ["a", "b"] {
            engine.open_variable_layer(owner);
            engine.activate_variable_layer(Some(owner));
            engine.execute_script(&format!("{owner}.script"), &scope()).expect("declare");
        }

        engine.activate_variable_layer(Some("a"));
        let who = engine.create_getter("who.script").expect("getter");
        assert_eq!(who.invoke(&scope()).expect("a"), json!("A"));
        engine.set_variable_value("Shared", json!(2)).expect("write");
        assert_eq!(engine.get_variable_value("Shared").expect("shared"), json!(2));

        engine.activate_variable_layer(Some("b"));
        assert_eq!(who.invoke(&scope()).expect("b"), json!("B"));
        assert_eq!(engine.get_variable_value("Shared").expect("shared"), json!(1));

        engine.close_variable_layer("b");
        assert!(!engine.has_script_variable("Who"));
        assert_eq!(engine.get_variable_value("Shared").expect("shared"), json!(1));
    }

    #[test]
    fn declarations_define_variables() {
        let mut declarations = Map::new();
        declarations.insert("Retries".into(), json!(3));
        let mut engine = InMemoryScriptEngine::new().with_script("setup.script", ScriptSource::Declarations(declarations));

        engine.execute_script("setup.script", &scope()).expect("executes");
        assert!(engine.has_script_variable("Retries"));
        assert_eq!(engine.variable_names(), vec!["Retries".to_string()]);
    }
}
