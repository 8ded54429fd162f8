//! Argument resolution: reading and writing typed values through an
//! [`ArgumentSpec`] in Default, DataBound, or Scripted mode.
//!
//! Resolution order for DataBound paths: the root token is looked up as a
//! script variable first and as a property of the scope's globals second.
//! Every later segment is a property (or array index) lookup.

use std::borrow::Cow;

use autoflow_types::{ArgumentMode, ArgumentSpec, TypedValue, ValueType};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

pub mod scope;
pub mod script;
pub mod template;

pub use scope::Scope;
pub use script::{InMemoryScriptEngine, ScriptEngine, ScriptError, ScriptGetter, ScriptSetter, ScriptSource};
pub use template::Template;

use template::{navigate, navigate_mut, split_path};

static NULL: Value = Value::Null;

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("argument is missing its {missing}")]
    NotConfigured { missing: &'static str },
    #[error("argument declared as {declared} cannot be bound as {requested}")]
    TypeMismatch { declared: ValueType, requested: ValueType },
    #[error("property '{segment}' not found while resolving '{path}'")]
    PropertyNotFound { path: String, segment: String },
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("default-mode arguments cannot be written")]
    NotWritable,
    #[error("value does not fit {expected}: {source}")]
    InvalidValue {
        expected: ValueType,
        #[source]
        source: serde_json::Error,
    },
}

/// Resolves arguments against one scope and one script engine.
pub struct ArgumentResolver<'a> {
    scope: &'a Scope,
    scripts: &'a mut dyn ScriptEngine,
}

impl<'a> ArgumentResolver<'a> {
    pub fn new(scope: &'a Scope, scripts: &'a mut dyn ScriptEngine) -> Self {
        Self { scope, scripts }
    }

    /// Reads `argument` as `T`.
    pub fn get_value<T: TypedValue>(&mut self, argument: &ArgumentSpec) -> Result<T, ArgumentError> {
        let value = self.resolve(argument, T::VALUE_TYPE)?;
        T::deserialize(value.as_ref()).map_err(|source| ArgumentError::InvalidValue {
            expected: T::VALUE_TYPE,
            source,
        })
    }

    /// Reads `argument` as a raw value, checking its declared type against `requested`.
    ///
    /// Default-mode arguments are returned by reference, so repeated calls
    /// hand back the very same value.
    pub fn resolve<'s>(&mut self, argument: &'s ArgumentSpec, requested: ValueType) -> Result<Cow<'s, Value>, ArgumentError> {
        if !argument.declared_type.is_assignable_to(requested) {
            return Err(ArgumentError::TypeMismatch {
                declared: argument.declared_type,
                requested,
            });
        }

        match argument.mode {
            ArgumentMode::Default => Ok(Cow::Borrowed(argument.default_value.as_ref().unwrap_or(&NULL))),
            ArgumentMode::DataBound => {
                let path = argument.property_path().ok_or(ArgumentError::NotConfigured { missing: "property path" })?;
                self.read_path(path).map(Cow::Owned)
            }
            ArgumentMode::Scripted => {
                let file = argument.script_file().ok_or(ArgumentError::NotConfigured { missing: "script file" })?;
                let getter = self.scripts.create_getter(file)?;
                trace!(script = file, "invoking script getter");
                Ok(Cow::Owned(getter.invoke(self.scope)?))
            }
        }
    }

    /// Writes `value` through `argument`.
    pub fn set_value<T: TypedValue>(&mut self, argument: &ArgumentSpec, value: &T) -> Result<(), ArgumentError> {
        if !T::VALUE_TYPE.is_assignable_to(argument.declared_type) {
            return Err(ArgumentError::TypeMismatch {
                declared: argument.declared_type,
                requested: T::VALUE_TYPE,
            });
        }
        let value = serde_json::to_value(value).map_err(|source| ArgumentError::InvalidValue {
            expected: argument.declared_type,
            source,
        })?;
        self.assign(argument, value)
    }

    /// Writes a raw value through `argument` after checking it fits the declared type.
    pub fn assign(&mut self, argument: &ArgumentSpec, value: Value) -> Result<(), ArgumentError> {
        if !argument.declared_type.accepts(&value) {
            return Err(ArgumentError::TypeMismatch {
                declared: argument.declared_type,
                requested: ValueType::of(&value),
            });
        }

        match argument.mode {
            ArgumentMode::Default => Err(ArgumentError::NotWritable),
            ArgumentMode::DataBound => {
                let path = argument.property_path().ok_or(ArgumentError::NotConfigured { missing: "property path" })?;
                self.write_path(path, value)
            }
            ArgumentMode::Scripted => {
                let file = argument.script_file().ok_or(ArgumentError::NotConfigured { missing: "script file" })?;
                let setter = self.scripts.create_setter(file)?;
                trace!(script = file, "invoking script setter");
                Ok(setter.invoke(self.scope, value)?)
            }
        }
    }

    fn read_path(&self, path: &str) -> Result<Value, ArgumentError> {
        let (root, segments) = split_path(path);
        let start = if self.scripts.has_script_variable(root) {
            self.scripts.get_variable_value(root)?
        } else {
            self.scope.lookup(root).ok_or_else(|| not_found(path, root))?
        };
        navigate(&start, &segments)
            .cloned()
            .map_err(|index| not_found(path, segments[index]))
    }

    fn write_path(&mut self, path: &str, value: Value) -> Result<(), ArgumentError> {
        let (root, segments) = split_path(path);
        if self.scripts.has_script_variable(root) {
            if segments.is_empty() {
                return Ok(self.scripts.set_variable_value(root, value)?);
            }
            let mut variable = self.scripts.get_variable_value(root)?;
            set_at_path(&mut variable, path, &segments, value)?;
            return Ok(self.scripts.set_variable_value(root, variable)?);
        }

        self.scope
            .update(root, |slot| set_at_path(slot, path, &segments, value))
            .ok_or_else(|| not_found(path, root))?
    }
}

/// Replaces the property at `segments` below `target`; every segment must exist.
fn set_at_path(target: &mut Value, path: &str, segments: &[&str], value: Value) -> Result<(), ArgumentError> {
    let slot = navigate_mut(target, segments).map_err(|index| not_found(path, segments[index]))?;
    *slot = value;
    Ok(())
}

fn not_found(path: &str, segment: &str) -> ArgumentError {
    ArgumentError::PropertyNotFound {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;
    use serde::Deserialize;
    use serde_json::{Map, json};

    use super::*;

    fn person_scope() -> Scope {
        let mut globals = Map::new();
        globals.insert(
            "Person".into(),
            json!({"Name": "Sheldon", "Address": {"City": "Pasadena"}}),
        );
        globals.insert("Name".into(), json!("Sheldon"));
        globals.insert("Address".into(), json!({"City": "Pasadena"}));
        Scope::root("globals", globals)
    }

    #[test]
    fn script_variable_wins_over_globals_property() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new().with_variable("Name", json!("Howard"));
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        let name: String = resolver.get_value(&ArgumentSpec::bound(ValueType::String, "Name")).expect("name");
        assert_eq!(name, "Howard");
    }

    #[test]
    fn nested_paths_walk_properties() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        let city: String = resolver.get_value(&ArgumentSpec::bound(ValueType::String, "Address.City")).expect("city");
        assert_eq!(city, "Pasadena");

        let error = resolver
            .get_value::<String>(&ArgumentSpec::bound(ValueType::String, "Address.Street"))
            .expect_err("no street");
        assert!(matches!(error, ArgumentError::PropertyNotFound { ref segment, .. } if segment == "Street"));
    }

    #[test]
    fn set_then_get_returns_written_value() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);
        let city = ArgumentSpec::bound(ValueType::String, "Person.Address.City");

        resolver.set_value(&city, &"Austin".to_string()).expect("set");
        assert_eq!(resolver.get_value::<String>(&city).expect("get"), "Austin");
    }

    #[test]
    fn writes_follow_script_variable_precedence() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new().with_variable("Address", json!({"City": "Bozeman"}));
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        resolver
            .assign(&ArgumentSpec::bound(ValueType::String, "Address.City"), json!("Austin"))
            .expect("assign");

        assert_eq!(scripts.get_variable_value("Address").expect("variable"), json!({"City": "Austin"}));
        assert_eq!(scope.lookup("Address"), Some(json!({"City": "Pasadena"})));
    }

    #[test]
    fn default_mode_returns_the_same_value_every_time() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);
        let argument = ArgumentSpec::literal(ValueType::Object, json!({"retries": 3}));

        let first = resolver.resolve(&argument, ValueType::Object).expect("first");
        let second = resolver.resolve(&argument, ValueType::Any).expect("second");
        assert!(std::ptr::eq(first.as_ref(), second.as_ref()));
        assert!(matches!(first, Cow::Borrowed(_)));
    }

    #[test]
    fn declared_type_must_be_assignable_to_requested_type() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        let error = resolver
            .get_value::<bool>(&ArgumentSpec::literal(ValueType::String, json!("yes")))
            .expect_err("mismatch");
        assert!(matches!(
            error,
            ArgumentError::TypeMismatch {
                declared: ValueType::String,
                requested: ValueType::Bool
            }
        ));

        let widened: f64 = resolver
            .get_value(&ArgumentSpec::literal(ValueType::Integer, json!(4)))
            .expect("integer widens to number");
        assert_eq!(widened, 4.0);
    }

    #[test]
    fn writing_checks_type_before_touching_state() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        let error = resolver
            .set_value(&ArgumentSpec::bound(ValueType::String, "Name"), &42_i64)
            .expect_err("mismatch");
        assert!(matches!(error, ArgumentError::TypeMismatch { .. }));
        assert_eq!(scope.lookup("Name"), Some(json!("Sheldon")));
    }

    #[test]
    fn unconfigured_and_default_writes_fail() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        let unbound = ArgumentSpec {
            mode: ArgumentMode::DataBound,
            ..Default::default()
        };
        assert!(matches!(
            resolver.get_value::<Value>(&unbound),
            Err(ArgumentError::NotConfigured { missing: "property path" })
        ));
        assert!(matches!(
            resolver.assign(&ArgumentSpec::literal(ValueType::Any, json!(1)), json!(2)),
            Err(ArgumentError::NotWritable)
        ));
        assert!(matches!(
            resolver.assign(&ArgumentSpec::bound(ValueType::Any, "Unknown"), json!(2)),
            Err(ArgumentError::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn scripted_arguments_call_through_the_engine() {
        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new()
            .with_variable("Counter", json!(1))
            .with_script("counter.script", ScriptSource::Variable("Counter".into()))
            .with_script("label.script", ScriptSource::Template("${{ Person.Name }} #${{ Counter }}".into()))
            .with_script(
                "broken.script",
                ScriptSource::Getter(ScriptGetter::new("broken.script", |_| bail!("null reference"))),
            );
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);

        resolver
            .set_value(&ArgumentSpec::scripted(ValueType::Integer, "counter.script"), &7_i64)
            .expect("set");
        let label: String = resolver
            .get_value(&ArgumentSpec::scripted(ValueType::String, "label.script"))
            .expect("label");
        assert_eq!(label, "Sheldon #7");

        let error = resolver
            .get_value::<Value>(&ArgumentSpec::scripted(ValueType::Any, "broken.script"))
            .expect_err("script fails");
        assert!(matches!(error, ArgumentError::Script(ScriptError::Execution { .. })));
        assert_eq!(anyhow::Error::new(error).chain().last().map(ToString::to_string), Some("null reference".to_string()));
    }

    #[test]
    fn structured_values_deserialize_into_caller_types() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Address {
            #[serde(rename = "City")]
            city: String,
        }

        let scope = person_scope();
        let mut scripts = InMemoryScriptEngine::new();
        let mut resolver = ArgumentResolver::new(&scope, &mut scripts);
        let argument = ArgumentSpec::bound(ValueType::Object, "Address");
        let value = resolver.resolve(&argument, ValueType::Object).expect("address");
        let address = Address::deserialize(value.as_ref()).expect("shape");
        assert_eq!(address.city, "Pasadena");
    }
}
