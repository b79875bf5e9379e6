//! Host-facing view of a platform's cached data.

use std::{fmt::Debug, time::Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// State of anything that has never been fetched.
pub const STATE_UNKNOWN: &str = "unknown";

/// A named object whose state the host reads after each scheduled update.
///
/// Implementations keep no state of their own beyond the poller they wrap:
/// every accessor recomputes from the poller's current payload.
#[async_trait]
pub trait Entity: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn icon(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> String;

    fn attributes(&self) -> Map<String, Value>;

    /// Give the wrapped poller a chance to refresh. Throttling happens there.
    async fn update(&mut self, now: Instant);

    fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            name: self.name().to_string(),
            icon: self.icon().map(String::from),
            state: self.state(),
            attributes: self.attributes(),
        }
    }
}

/// Everything the host displays for one entity at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub state: String,
    pub attributes: Map<String, Value>,
}

/// Attribute value, or the unknown sentinel when there is none.
pub(crate) fn or_unknown<T: Serialize>(value: Option<T>) -> Value {
    value
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or_else(|| Value::String(STATE_UNKNOWN.to_string()))
}
