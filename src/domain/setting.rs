use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// The `type` tag stored next to every setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl SettingKind {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "object" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            other => Err(format!(
                "{other} is not a valid setting type. Use one of string, number, boolean, object or array."
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// A setting value whose shape always agrees with its `SettingKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    String(String),
    Number(Number),
    Boolean(bool),
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

impl SettingValue {
    /// Pair a raw JSON value with the declared kind, refusing mismatches.
    pub fn from_typed(kind: SettingKind, value: Value) -> Result<Self, String> {
        match (kind, value) {
            (SettingKind::String, Value::String(s)) => Ok(Self::String(s)),
            (SettingKind::Number, Value::Number(n)) => Ok(Self::Number(n)),
            (SettingKind::Boolean, Value::Bool(b)) => Ok(Self::Boolean(b)),
            (SettingKind::Object, Value::Object(o)) => Ok(Self::Object(o)),
            (SettingKind::Array, Value::Array(a)) => Ok(Self::Array(a)),
            (kind, value) => Err(format!(
                "{value} does not match the declared setting type `{}`.",
                kind.as_str()
            )),
        }
    }

    /// Take the kind from the shape of the JSON value itself. `null` has no kind.
    pub fn infer(value: Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self::String(s)),
            Value::Number(n) => Ok(Self::Number(n)),
            Value::Bool(b) => Ok(Self::Boolean(b)),
            Value::Object(o) => Ok(Self::Object(o)),
            Value::Array(a) => Ok(Self::Array(a)),
            Value::Null => Err("A setting value cannot be null.".into()),
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            Self::String(_) => SettingKind::String,
            Self::Number(_) => SettingKind::Number,
            Self::Boolean(_) => SettingKind::Boolean,
            Self::Object(_) => SettingKind::Object,
            Self::Array(_) => SettingKind::Array,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Object(o) => Value::Object(o.clone()),
            Self::Array(a) => Value::Array(a.clone()),
        }
    }
}

impl Serialize for SettingValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<u64> for SettingValue {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SettingCategory {
    #[default]
    General,
    Email,
    Newsletter,
    Social,
    Seo,
    Security,
}

impl SettingCategory {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "general" => Ok(Self::General),
            "email" => Ok(Self::Email),
            "newsletter" => Ok(Self::Newsletter),
            "social" => Ok(Self::Social),
            "seo" => Ok(Self::Seo),
            "security" => Ok(Self::Security),
            other => Err(format!("{other} is not a valid setting category.")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Email => "email",
            Self::Newsletter => "newsletter",
            Self::Social => "social",
            Self::Seo => "seo",
            Self::Security => "security",
        }
    }
}

/// A stored site setting. `key` is globally unique.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: SettingValue,
    #[serde(rename = "type")]
    pub kind: SettingKind,
    pub description: String,
    pub category: SettingCategory,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full replacement of the setting identified by `key`.
///
/// `is_public: None` keeps the visibility already stored (new settings are private).
#[derive(Debug, Clone)]
pub struct SettingUpsert {
    pub key: String,
    pub value: SettingValue,
    pub description: String,
    pub category: SettingCategory,
    pub is_public: Option<bool>,
}

impl SettingUpsert {
    pub fn new(key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            description: String::new(),
            category: SettingCategory::General,
            is_public: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: SettingCategory) -> Self {
        self.category = category;
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }
}

/// Keys are trimmed; an empty key is never valid.
pub fn parse_setting_key(key: &str) -> Result<String, String> {
    let key = key.trim();
    if key.is_empty() {
        Err("The setting key cannot be empty.".into())
    } else {
        Ok(key.to_string())
    }
}
