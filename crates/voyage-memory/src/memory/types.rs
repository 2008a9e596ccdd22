//! Core data types shared by the memory components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Speaker of a dialogue turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single dialogue turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Rough token estimate: characters of role plus content divided by 1.5
    pub fn estimate_tokens(&self) -> f64 {
        (self.role.as_str().chars().count() + self.content.chars().count()) as f64 / 1.5
    }
}

/// An entry in the short-term store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    /// Importance in [0.0, 1.0]
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>, importance: f32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            content: content.into(),
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            access_count: 0,
            last_accessed: now,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.last_accessed = created_at;
        self
    }

    /// Record an access
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = Utc::now();
    }

    pub fn set_importance(&mut self, importance: f32) {
        self.importance = importance.clamp(0.0, 1.0);
    }

    /// Hours elapsed since creation
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds() as f64 / 3_600_000.0).max(0.0)
    }
}

/// Preferences extracted from a single session's dialogue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPreferences {
    #[serde(default)]
    pub budget: Option<u32>,
    #[serde(default)]
    pub travel_days: Option<u32>,
    #[serde(default)]
    pub interest_tags: Vec<String>,
    #[serde(default)]
    pub preferred_cities: Vec<String>,
}

impl SessionPreferences {
    pub fn is_empty(&self) -> bool {
        self.budget.is_none()
            && self.travel_days.is_none()
            && self.interest_tags.is_empty()
            && self.preferred_cities.is_empty()
    }
}

/// Append `value` unless it is already present
pub(crate) fn push_unique(list: &mut Vec<String>, value: impl Into<String>) {
    let value = value.into();
    if !list.contains(&value) {
        list.push(value);
    }
}

/// First `max_chars` characters of `text`
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
