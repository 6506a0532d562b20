//! Upstream event shape and session-id extraction (spec §4.C9 "Parser" /
//! §9 "Implicit session_id extraction mid-stream").

use serde::{Deserialize, Serialize};

/// One `{"event": <kind>, "data": <payload>}` object, forwarded verbatim
/// to the client and, for non-token kinds, persisted in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn is_token(&self) -> bool {
        self.event == "token"
    }

    pub fn is_end(&self) -> bool {
        self.event == "end"
    }

    pub fn is_error(&self) -> bool {
        self.event == "error"
    }

    pub fn token_text(&self) -> Option<&str> {
        self.is_token().then(|| self.data.as_str()).flatten()
    }

    /// The spec canonicalizes two places upstream may carry a session id:
    /// a bare `event: "session_id"` whose `data` is the id itself, or an
    /// `event: "metadata"` object carrying `data.sessionId`. Returns
    /// `None` for every other event kind.
    pub fn extract_session_id(&self) -> Option<String> {
        match self.event.as_str() {
            "session_id" => self.data.as_str().map(str::to_string),
            "metadata" => self
                .data
                .get("sessionId")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
    }
}

pub fn synthetic_session_id_event(session_id: &str) -> StreamEvent {
    StreamEvent::new("session_id", serde_json::Value::String(session_id.to_string()))
}

pub fn synthetic_idle_error_event() -> StreamEvent {
    StreamEvent::new("error", serde_json::json!({ "code": "UPSTREAM_IDLE" }))
}

pub fn synthetic_partial_error_event() -> StreamEvent {
    StreamEvent::new("error", serde_json::json!({ "code": "CLIENT_DISCONNECTED", "partial": true }))
}

pub fn synthetic_overall_timeout_event() -> StreamEvent {
    StreamEvent::new("error", serde_json::json!({ "code": "UPSTREAM_TIMEOUT" }))
}

pub fn synthetic_upstream_error_event(message: &str) -> StreamEvent {
    StreamEvent::new("error", serde_json::json!({ "code": "UPSTREAM_UNAVAILABLE", "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_session_id_from_bare_event() {
        let event = StreamEvent::new("session_id", serde_json::json!("abc"));
        assert_eq!(event.extract_session_id(), Some("abc".to_string()));
    }

    #[test]
    fn extracts_session_id_from_metadata() {
        let event = StreamEvent::new("metadata", serde_json::json!({ "sessionId": "abc", "chatId": "c1" }));
        assert_eq!(event.extract_session_id(), Some("abc".to_string()));
    }

    #[test]
    fn other_events_have_no_session_id() {
        let event = StreamEvent::new("token", serde_json::json!("hi"));
        assert_eq!(event.extract_session_id(), None);
    }
}
