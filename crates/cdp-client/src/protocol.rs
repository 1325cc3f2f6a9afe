//! Wire frames for the devtools debugging channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound command: `{id, method, params?, sessionId?}`.
#[derive(Debug, Serialize)]
pub struct CommandFrame<'a> {
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// Inbound response correlated to a command by id.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
}

/// Inbound unsolicited event. The orchestration core does not consume events.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Frames are classified by the presence of an `id` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingFrame {
    Response(ResponseFrame),
    Event(EventFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_with_id_is_a_response() {
        let frame: IncomingFrame =
            serde_json::from_str(r#"{"id":7,"result":{"targetId":"t-1"}}"#).unwrap();
        match frame {
            IncomingFrame::Response(resp) => {
                assert_eq!(resp.id, 7);
                assert!(resp.error.is_none());
            }
            IncomingFrame::Event(_) => panic!("classified response as event"),
        }
    }

    #[test]
    fn frame_without_id_is_an_event() {
        let frame: IncomingFrame = serde_json::from_str(
            r#"{"method":"Target.targetCreated","params":{"targetInfo":{}},"sessionId":"s"}"#,
        )
        .unwrap();
        match frame {
            IncomingFrame::Event(event) => assert_eq!(event.method, "Target.targetCreated"),
            IncomingFrame::Response(_) => panic!("classified event as response"),
        }
    }

    #[test]
    fn error_responses_carry_code_and_message() {
        let frame: IncomingFrame = serde_json::from_str(
            r#"{"id":3,"error":{"code":-32000,"message":"No target with given id"}}"#,
        )
        .unwrap();
        match frame {
            IncomingFrame::Response(resp) => {
                let err = resp.error.expect("error payload");
                assert_eq!(err.code, -32000);
                assert!(err.message.contains("No target"));
            }
            IncomingFrame::Event(_) => panic!("classified response as event"),
        }
    }

    #[test]
    fn command_serialization_omits_absent_fields() {
        let frame = CommandFrame {
            id: 1,
            method: "Target.createBrowserContext",
            params: None,
            session_id: None,
        };
        let raw = serde_json::to_string(&frame).unwrap();
        assert_eq!(raw, r#"{"id":1,"method":"Target.createBrowserContext"}"#);
    }
}
