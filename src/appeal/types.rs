use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque item identifier. The data store may hand back either a string (uuid) or an integer key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Int(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(id) => ItemId(id),
            RawId::Int(id) => ItemId(id.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Item {
    /// `"{title} {description}"` with surrounding whitespace removed.
    #[must_use]
    pub fn text(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Complete,
    Save,
    Like,
    Hide,
    Skip,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl EventType {
    /// `None` for event types that carry no appeal signal.
    #[must_use]
    pub fn polarity(self) -> Option<Polarity> {
        match self {
            EventType::Complete | EventType::Save | EventType::Like => Some(Polarity::Positive),
            EventType::Hide | EventType::Skip => Some(Polarity::Negative),
            EventType::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub item_id: ItemId,
    pub event_type: EventType,
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

/// An event nested under its item in the pre-joined RPC response; the item id is implied.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmbeddedEvent {
    pub event_type: EventType,
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

impl EmbeddedEvent {
    #[must_use]
    pub fn into_event(self, item_id: ItemId) -> Event {
        Event {
            item_id,
            event_type: self.event_type,
            strength: self.strength,
            created_at: self.created_at,
        }
    }
}

/// Row shape of `rpc/get_items_with_events`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemWithEvents {
    #[serde(flatten)]
    pub item: Item,
    #[serde(default)]
    pub events: Option<Vec<EmbeddedEvent>>,
}

/// One supervised row: item text and its derived appeal label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingExample {
    pub item_id: ItemId,
    pub text: String,
    pub appeal_score: f64,
    pub total_events: f64,
}
