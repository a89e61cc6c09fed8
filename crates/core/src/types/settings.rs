//! Free-form profile settings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors produced when building or merging [`ProfileSettings`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    /// Settings must be a JSON object; the value had another shape.
    #[error("settings must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// The JSON `settings` column of a profile (language, theme, ...).
///
/// Always a JSON object. Updates are shallow merges: top-level keys in the
/// partial object replace the stored ones, nested objects are not merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ProfileSettings(Map<String, Value>);

impl ProfileSettings {
    /// Empty settings object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a top-level setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Shallow-merge `partial` on top of the current settings.
    pub fn merge(&mut self, partial: Self) {
        self.0.extend(partial.0);
    }

    /// Returns the settings as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no setting is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl TryFrom<Value> for ProfileSettings {
    type Error = SettingsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SettingsError::NotAnObject(kind_of(&other))),
        }
    }
}

impl From<ProfileSettings> for Value {
    fn from(settings: ProfileSettings) -> Self {
        Self::Object(settings.0)
    }
}

impl From<Map<String, Value>> for ProfileSettings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
