//! `${{ path }}` templates and dotted property paths.
//!
//! Templates are parsed once and rendered many times. A template that is a
//! single expression renders to the raw value it refers to; anything else
//! renders to a string with each expression substituted in place.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Text(String),
    Expression(String),
}

/// Parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    /// Splits `source` into literal text and expressions. An unterminated
    /// `${{` is kept as literal text.
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut remaining = source;

        while let Some(start) = remaining.find("${{") {
            let (before, after) = remaining.split_at(start);
            if !before.is_empty() {
                parts.push(TemplatePart::Text(before.to_string()));
            }
            match after.find("}}") {
                Some(end) => {
                    parts.push(TemplatePart::Expression(after[3..end].trim().to_string()));
                    remaining = &after[end + 2..];
                }
                None => {
                    parts.push(TemplatePart::Text(after.to_string()));
                    remaining = "";
                }
            }
        }
        if !remaining.is_empty() {
            parts.push(TemplatePart::Text(remaining.to_string()));
        }
        Self { parts }
    }

    /// Expressions in order of appearance.
    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Expression(expression) => Some(expression.as_str()),
            TemplatePart::Text(_) => None,
        })
    }

    /// Renders the template, failing with the first expression `resolve` cannot answer.
    pub fn render(&self, mut resolve: impl FnMut(&str) -> Option<Value>) -> Result<Value, String> {
        if let [TemplatePart::Expression(expression)] = self.parts.as_slice() {
            return resolve(expression).ok_or_else(|| expression.clone());
        }

        let mut output = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Text(text) => output.push_str(text),
                TemplatePart::Expression(expression) => {
                    let value = resolve(expression).ok_or_else(|| expression.clone())?;
                    output.push_str(&format_value(&value));
                }
            }
        }
        Ok(Value::String(output))
    }
}

/// Splits `Address.City` into `("Address", ["City"])`.
pub fn split_path(path: &str) -> (&str, Vec<&str>) {
    let mut segments = path.split('.').map(str::trim);
    let root = segments.next().unwrap_or_default();
    (root, segments.collect())
}

/// Follows `segments` through objects (by key) and arrays (by index).
/// Returns the index of the first segment that does not resolve.
pub fn navigate<'v>(value: &'v Value, segments: &[&str]) -> Result<&'v Value, usize> {
    let mut current = value;
    for (index, segment) in segments.iter().enumerate() {
        current = child(current, segment).ok_or(index)?;
    }
    Ok(current)
}

/// Mutable counterpart of [`navigate`].
pub fn navigate_mut<'v>(value: &'v mut Value, segments: &[&str]) -> Result<&'v mut Value, usize> {
    let mut current = value;
    for (index, segment) in segments.iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get_mut(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|position| items.get_mut(position)),
            _ => None,
        }
        .ok_or(index)?;
    }
    Ok(current)
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|position| items.get(position)),
        _ => None,
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
