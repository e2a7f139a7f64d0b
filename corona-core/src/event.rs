//! Event envelope sent to the ingestion sink
//!
//! An event is a flat JSON object. The collector fills in four base fields and
//! then shallow-merges caller attributes over them:
//!
//! ```text
//! { "event": "click", "received_at": "...", "user_id": "...", "session_id": "...", "target": "button" }
//! ```
//!
//! Attributes whose keys collide with a base field replace the base value.
//! That lets callers backdate `received_at` or attribute an event to another
//! user, and equally lets them clobber `user_id`/`session_id` by mistake.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the event name
pub const EVENT_KEY: &str = "event";
/// Key holding the collection timestamp
pub const RECEIVED_AT_KEY: &str = "received_at";
/// Key holding the durable user id
pub const USER_ID_KEY: &str = "user_id";
/// Key holding the per-construction session id
pub const SESSION_ID_KEY: &str = "session_id";

/// Caller-supplied event attributes
pub type Attributes = Map<String, Value>;

/// One recorded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(name: &str, user_id: &str, session_id: &str, attributes: Attributes) -> Self {
        Self::with_timestamp(name, &now_timestamp(), user_id, session_id, attributes)
    }

    /// Build an event with an explicit timestamp.
    pub fn with_timestamp(
        name: &str,
        timestamp: &str,
        user_id: &str,
        session_id: &str,
        attributes: Attributes,
    ) -> Self {
        let mut fields = Map::with_capacity(4 + attributes.len());
        fields.insert(EVENT_KEY.to_string(), Value::from(name));
        fields.insert(RECEIVED_AT_KEY.to_string(), Value::from(timestamp));
        fields.insert(USER_ID_KEY.to_string(), Value::from(user_id));
        fields.insert(SESSION_ID_KEY.to_string(), Value::from(session_id));

        // Last write wins
        for (key, value) in attributes {
            fields.insert(key, value);
        }

        Self(fields)
    }

    /// Wrap an already-shaped object, e.g. one recovered from storage.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Event name, if it is still a string after merging
    pub fn name(&self) -> Option<&str> {
        self.str_field(EVENT_KEY)
    }

    /// Collection timestamp
    pub fn received_at(&self) -> Option<&str> {
        self.str_field(RECEIVED_AT_KEY)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.str_field(USER_ID_KEY)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.str_field(SESSION_ID_KEY)
    }

    /// Any field, base or attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All fields in insertion order
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Current time as an RFC 3339 UTC string with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
