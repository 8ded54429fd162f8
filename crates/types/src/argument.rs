//! Persisted argument shape and the value-type lattice used for binding checks.
//!
//! An argument is a typed, late-bound slot on an actor. Its value comes from one
//! of three places depending on [`ArgumentMode`]: a literal stored on the
//! argument itself, a dotted property path into the run's data model, or a
//! script file evaluated by the host's script engine.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Strategy used to resolve an argument's value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentMode {
    /// The value is the literal `default_value` stored on the argument.
    #[default]
    Default,
    /// The value is looked up through `property_path`.
    DataBound,
    /// The value is produced (or consumed) by the script in `script_file`.
    Scripted,
}

/// Coarse value types an argument can declare.
///
/// Values flowing through the engine are JSON values, so the declared type
/// describes the JSON shape a consumer may expect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Any JSON value.
    #[default]
    Any,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl ValueType {
    /// Returns true when a value declared as `self` may be handed to a consumer
    /// that requested `target`.
    ///
    /// Identical types are always assignable, everything is assignable to
    /// [`ValueType::Any`], and integers widen to numbers. Nothing else converts.
    pub fn is_assignable_to(self, target: ValueType) -> bool {
        self == target || target == ValueType::Any || (self == ValueType::Integer && target == ValueType::Number)
    }

    /// Infers the narrowest type describing `value`. `null` maps to `Any`.
    pub fn of(value: &Value) -> ValueType {
        match value {
            Value::Null => ValueType::Any,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(number) if number.is_i64() || number.is_u64() => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }

    /// Returns true when `value` fits this declared type. `null` fits every type.
    pub fn accepts(self, value: &Value) -> bool {
        value.is_null() || ValueType::of(value).is_assignable_to(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Any => "any",
            ValueType::Bool => "bool",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rust types that can be requested from (or written through) an argument.
pub trait TypedValue: Serialize + DeserializeOwned {
    /// JSON shape this Rust type corresponds to.
    const VALUE_TYPE: ValueType;
}

impl TypedValue for Value {
    const VALUE_TYPE: ValueType = ValueType::Any;
}

impl TypedValue for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;
}

impl TypedValue for i64 {
    const VALUE_TYPE: ValueType = ValueType::Integer;
}

impl TypedValue for i32 {
    const VALUE_TYPE: ValueType = ValueType::Integer;
}

impl TypedValue for u64 {
    const VALUE_TYPE: ValueType = ValueType::Integer;
}

impl TypedValue for f64 {
    const VALUE_TYPE: ValueType = ValueType::Number;
}

impl TypedValue for String {
    const VALUE_TYPE: ValueType = ValueType::String;
}

impl TypedValue for Map<String, Value> {
    const VALUE_TYPE: ValueType = ValueType::Object;
}

impl<T: TypedValue> TypedValue for Vec<T> {
    const VALUE_TYPE: ValueType = ValueType::Array;
}

impl<T: TypedValue> TypedValue for Option<T> {
    const VALUE_TYPE: ValueType = T::VALUE_TYPE;
}

/// Persisted argument shape: `{mode, declared_type, default_value?, property_path?, script_file?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ArgumentSpec {
    /// Resolution strategy.
    #[serde(default)]
    pub mode: ArgumentMode,
    /// Type consumers may rely on; checked before any binding happens.
    #[serde(default)]
    pub declared_type: ValueType,
    /// Literal used in [`ArgumentMode::Default`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Dotted path used in [`ArgumentMode::DataBound`], e.g. `Address.City`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_path: Option<String>,
    /// Script identifier used in [`ArgumentMode::Scripted`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
}

impl ArgumentSpec {
    /// Literal argument returning `value` as-is.
    pub fn literal(declared_type: ValueType, value: Value) -> Self {
        Self {
            mode: ArgumentMode::Default,
            declared_type,
            default_value: Some(value),
            ..Default::default()
        }
    }

    /// Argument bound to a dotted property path.
    pub fn bound(declared_type: ValueType, property_path: impl Into<String>) -> Self {
        Self {
            mode: ArgumentMode::DataBound,
            declared_type,
            property_path: Some(property_path.into()),
            ..Default::default()
        }
    }

    /// Argument backed by a script file.
    pub fn scripted(declared_type: ValueType, script_file: impl Into<String>) -> Self {
        Self {
            mode: ArgumentMode::Scripted,
            declared_type,
            script_file: Some(script_file.into()),
            ..Default::default()
        }
    }

    /// Non-empty property path, if any.
    pub fn property_path(&self) -> Option<&str> {
        self.property_path.as_deref().map(str::trim).filter(|path| !path.is_empty())
    }

    /// Non-empty script file, if any.
    pub fn script_file(&self) -> Option<&str> {
        self.script_file.as_deref().map(str::trim).filter(|file| !file.is_empty())
    }
}
