//! Wire types shared with the map page and its sibling components.
//!
//! Two layers:
//! - [`Envelope`]: the pub/sub message every component speaks
//!   (`{type, channel, fromComponent, timestamp, payload}`)
//! - [`ClientMessage`]: what a connected client sends to drive a session
//!
//! All messages are JSON.

use foundation::ids::Generation;
use foundation::viewport::Viewport;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterPredicate;

/// Envelope `type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Query rows, aggregates and metrics for the applied generation.
    Data,
    FilterSet,
    FilterClear,
    Status,
    /// Any type this engine does not handle.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub channel: String,
    pub from_component: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(
        kind: MessageKind,
        channel: impl Into<String>,
        from_component: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            channel: channel.into(),
            from_component: from_component.into(),
            timestamp: foundation::time::Timestamp::now().as_millis(),
            payload,
        }
    }
}

/// Messages a client sends over the session socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Viewport(Viewport),
    /// Sets the user query; `None` falls back to the default metrics query.
    Query {
        #[serde(default)]
        sql: Option<String>,
    },
    /// A pub/sub envelope relayed from another component.
    Envelope { envelope: Envelope },
    /// Requests outlines for aggregate cells.
    Boundaries { cells: Vec<String> },
    Ping {
        #[serde(default)]
        seq: u64,
    },
}

/// Payload of a `filter_set` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSetPayload {
    pub predicate: FilterPredicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Loading,
    Ready,
    NoData,
    ZoomIn,
    FetchError,
    QueryError,
}

impl StatusState {
    pub fn default_message(self) -> &'static str {
        match self {
            StatusState::Loading => "Loading data for the current view",
            StatusState::Ready => "Ready",
            StatusState::NoData => "No data in the current view",
            StatusState::ZoomIn => "Zoom in to load data",
            StatusState::FetchError => "Failed to load data",
            StatusState::QueryError => "Query failed",
        }
    }
}

/// Payload of a `status` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub generation: Generation,
    pub state: StatusState,
    pub message: String,
}

impl StatusPayload {
    pub fn new(generation: Generation, state: StatusState) -> Self {
        Self {
            generation,
            state,
            message: state.default_message().to_string(),
        }
    }

    pub fn with_message(generation: Generation, state: StatusState, message: impl Into<String>) -> Self {
        Self {
            generation,
            state,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientMessage, Envelope, MessageKind, StatusPayload, StatusState};
    use foundation::ids::Generation;
    use foundation::viewport::Viewport;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn envelope_uses_camel_case_and_type_tag() {
        let env = Envelope {
            kind: MessageKind::FilterClear,
            channel: "map".into(),
            from_component: "slider-1".into(),
            timestamp: 42,
            payload: json!(null),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "filter_clear",
                "channel": "map",
                "fromComponent": "slider-1",
                "timestamp": 42,
                "payload": null
            })
        );
    }

    #[test]
    fn unknown_envelope_type_still_parses() {
        let env: Envelope = serde_json::from_value(json!({
            "type": "hover",
            "channel": "map",
            "fromComponent": "x",
            "timestamp": 1
        }))
        .unwrap();
        assert_eq!(env.kind, MessageKind::Unknown);
        assert_eq!(env.payload, json!(null));
    }

    #[test]
    fn client_messages_are_tagged() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "viewport",
            "west": -1.0, "south": 50.0, "east": 1.0, "north": 52.0, "zoom": 7.5
        }))
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Viewport(Viewport::new(-1.0, 50.0, 1.0, 52.0, 7.5))
        );

        let msg: ClientMessage = serde_json::from_value(json!({"type": "query"})).unwrap();
        assert_eq!(msg, ClientMessage::Query { sql: None });
    }

    #[test]
    fn status_payload_carries_default_text() {
        let status = StatusPayload::new(Generation(3), StatusState::ZoomIn);
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["state"], json!("zoom_in"));
        assert_eq!(v["generation"], json!(3));
        assert_eq!(v["message"], json!("Zoom in to load data"));
    }
}
