// Event record model
// One self-contained JSON object per observed attacker action

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Keys every record carries; extension fields may not override them
pub const BASE_KEYS: [&str; 4] = ["timestamp", "level", "module", "message"];

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

/// Open bag of extension fields, merged flat into the emitted record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Fields(Map<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add a field; a key clashing with a base key is stored as `extra_<key>`
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        let key = if BASE_KEYS.contains(&key) {
            format!("extra_{}", key)
        } else {
            key.to_string()
        };
        self.0.insert(key, value.into());
    }

    /// Merge another bag into this one, later values win
    pub fn extend(&mut self, other: Fields) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A single structured event
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub module: String,
    pub message: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl LogEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        level: Level,
        module: &str,
        message: impl Into<String>,
        fields: Fields,
    ) -> Self {
        Self {
            timestamp,
            level,
            module: module.to_string(),
            message: message.into(),
            fields,
        }
    }

    /// Serialize to a single line, newline included
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// ISO-8601 in UTC with microseconds and a `Z` suffix
fn serialize_timestamp<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(&ts.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
}
