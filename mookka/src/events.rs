use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Row-level change kinds pushed by the backend change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single row change on a backend table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "eventType", alias = "event_type")]
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl ChangeEvent {
    pub fn new(table: impl Into<String>, event_type: ChangeKind) -> Self {
        Self {
            table: table.into(),
            event_type,
            new: Value::Null,
            old: Value::Null,
        }
    }

    pub fn with_new(mut self, row: Value) -> Self {
        self.new = row;
        self
    }

    pub fn with_old(mut self, row: Value) -> Self {
        self.old = row;
        self
    }
}

/// Event part of a subscription; `All` matches every kind on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    Insert,
    Update,
    Delete,
    All,
}

impl EventFilter {
    pub fn matches(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::All, _)
                | (EventFilter::Insert, ChangeKind::Insert)
                | (EventFilter::Update, ChangeKind::Update)
                | (EventFilter::Delete, ChangeKind::Delete)
        )
    }
}

impl From<ChangeKind> for EventFilter {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Insert => EventFilter::Insert,
            ChangeKind::Update => EventFilter::Update,
            ChangeKind::Delete => EventFilter::Delete,
        }
    }
}

impl FromStr for EventFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(EventFilter::Insert),
            "UPDATE" => Ok(EventFilter::Update),
            "DELETE" => Ok(EventFilter::Delete),
            "*" | "ALL" => Ok(EventFilter::All),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}
