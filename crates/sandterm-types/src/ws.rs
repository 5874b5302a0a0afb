//! WebSocket session-bus protocol (spec.md §6).
//!
//! One logical bus; "rooms" are keyed by session id. Grounded on
//! `original_source/backend/app/api/terminal_ws.py`'s flask-socketio
//! event names, carried over unchanged.

use crate::SessionId;
use serde::{Deserialize, Serialize};

/// Client -> server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Join {
        session_id: SessionId,
    },
    Leave {
        session_id: SessionId,
    },
    Input {
        session_id: SessionId,
        data: String,
    },
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    Terminate {
        session_id: SessionId,
    },
}

/// Server -> client events, scoped to the room the client has joined.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected,
    Joined {
        session_id: SessionId,
        session: crate::SessionSummary,
    },
    Left {
        session_id: SessionId,
    },
    Output {
        session_id: SessionId,
        data: String,
    },
    Resized {
        session_id: SessionId,
        cols: u16,
        rows: u16,
    },
    Terminated {
        session_id: SessionId,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_tags_match_the_bus_protocol() {
        let id = SessionId::new();
        let join = serde_json::to_value(ClientEvent::Join { session_id: id }).unwrap();
        assert_eq!(join["event"], "join");

        let resize = serde_json::to_value(ClientEvent::Resize {
            session_id: id,
            cols: 80,
            rows: 24,
        })
        .unwrap();
        assert_eq!(resize["event"], "resize");
        assert_eq!(resize["cols"], 80);
    }

    #[test]
    fn client_input_deserializes_from_wire_shape() {
        let raw = r#"{"event":"input","session_id":"550e8400-e29b-41d4-a716-446655440000","data":"ls\n"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::Input { data, .. } => assert_eq!(data, "ls\n"),
            other => panic!("expected Input, got {other:?}"),
        }
    }
}
