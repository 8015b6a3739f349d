//! Environment placeholder substitution
//!
//! Replaces `{NAME}` and `{NAME=default}` in configuration strings with values
//! from the supervisor's base environment.
//!
//! A variable set to the empty string counts as unset when the placeholder
//! carries a default, so `{PORT=3000}` with `PORT=` resolves to `3000`. Without
//! a default the empty value is substituted as is.

use crate::error::{HydraError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([0-9a-zA-Z_]+)(=([^}]*))?\}").expect("placeholder pattern is valid")
});

/// Resolves placeholders against an environment snapshot
#[derive(Clone, Copy)]
pub struct TemplateResolver<'a> {
    env: &'a HashMap<String, String>,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(env: &'a HashMap<String, String>) -> Self {
        Self { env }
    }

    /// Resolve a configuration value; non-strings pass through unchanged
    pub fn resolve(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve_str(s).map(Value::String),
            other => Ok(other.clone()),
        }
    }

    /// Substitute every placeholder in `template`
    pub fn resolve_str(&self, template: &str) -> Result<String> {
        let mut resolved = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let name = &caps[1];
            let default = caps.get(3).map(|m| m.as_str());

            let value = match (self.env.get(name), default) {
                (Some(value), Some(default)) if value.is_empty() => default,
                (Some(value), _) => value.as_str(),
                (None, Some(default)) => default,
                (None, None) => return Err(HydraError::Environment(name.to_string())),
            };

            resolved.push_str(&template[last..whole.start()]);
            resolved.push_str(value);
            last = whole.end();
        }

        resolved.push_str(&template[last..]);
        Ok(resolved)
    }
}

/// Render a resolved value as an environment string
///
/// Strings are used verbatim, everything else in its JSON form.
pub fn value_to_env_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
