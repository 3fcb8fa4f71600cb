//! Session wire format: one JSON object per line
//!
//! ```text
//! > {"op":"set_relay","relay_id":1,"state":true}
//! < {"success":true,"data":{"relays":[{"relay_id":1,"state":true,"address":0}]}}
//! > {"op":"read_inputs"}
//! < {"success":false,"error":{"kind":"timeout","code":3,"message":"..."}}
//! ```

use chrono::{DateTime, Utc};
use relay_modbus::{InputState, RelayState};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RelayError};

/// Client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionRequest {
    Ping,
    /// Cached state, never touches the wire
    Status,
    /// Whole bank, or one relay when `relay_id` is given
    ReadRelays {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relay_id: Option<u16>,
    },
    ReadInputs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_id: Option<u16>,
    },
    /// `state: null` (or missing) toggles
    SetRelay {
        relay_id: u16,
        #[serde(default)]
        state: Option<bool>,
    },
    ToggleRelay {
        relay_id: u16,
    },
    SetAllRelays {
        state: bool,
    },
    BatchSetRelays {
        start_id: u16,
        states: Vec<bool>,
    },
    /// On, wait, off. Default duration comes from the daemon config.
    PulseRelay {
        relay_id: u16,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
}

impl SessionRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::ReadRelays { .. } => "read_relays",
            Self::ReadInputs { .. } => "read_inputs",
            Self::SetRelay { .. } => "set_relay",
            Self::ToggleRelay { .. } => "toggle_relay",
            Self::SetAllRelays { .. } => "set_all_relays",
            Self::BatchSetRelays { .. } => "batch_set_relays",
            Self::PulseRelay { .. } => "pulse_relay",
        }
    }
}

/// Cached view returned by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    pub relays: Vec<RelayState>,
    pub inputs: Vec<InputState>,
    pub last_update: Option<DateTime<Utc>>,
    /// Milliseconds since the last command completed
    pub last_command_ms: Option<u64>,
}

/// Typed payloads; the field names tell them apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Status(StatusData),
    Relays { relays: Vec<RelayState> },
    Inputs { inputs: Vec<InputState> },
    Pong { pong: bool, pid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub code: u8,
    pub message: String,
}

/// One response line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl SessionResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &RelayError) -> Self {
        let kind = err.kind();
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind,
                code: kind.code(),
                message: err.to_string(),
            }),
        }
    }

    pub fn relays(&self) -> Option<&[RelayState]> {
        match &self.data {
            Some(ResponseData::Relays { relays }) => Some(relays),
            Some(ResponseData::Status(status)) => Some(&status.relays),
            _ => None,
        }
    }

    pub fn inputs(&self) -> Option<&[InputState]> {
        match &self.data {
            Some(ResponseData::Inputs { inputs }) => Some(inputs),
            Some(ResponseData::Status(status)) => Some(&status.inputs),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Parse one request line
pub fn parse_request(line: &str) -> Result<SessionRequest, RelayError> {
    serde_json::from_str(line).map_err(|e| RelayError::bad_request(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use relay_modbus::DeviceLayout;

    #[test]
    fn test_parse_set_relay_variants() {
        assert_eq!(
            parse_request(r#"{"op":"set_relay","relay_id":2,"state":true}"#).unwrap(),
            SessionRequest::SetRelay {
                relay_id: 2,
                state: Some(true)
            }
        );
        assert_eq!(
            parse_request(r#"{"op":"set_relay","relay_id":2,"state":null}"#).unwrap(),
            SessionRequest::SetRelay {
                relay_id: 2,
                state: None
            }
        );
        assert_eq!(
            parse_request(r#"{"op":"set_relay","relay_id":2}"#).unwrap(),
            SessionRequest::SetRelay {
                relay_id: 2,
                state: None
            }
        );
    }

    #[test]
    fn test_parse_pulse_and_batch() {
        assert_eq!(
            parse_request(r#"{"op":"pulse_relay","relay_id":1}"#).unwrap(),
            SessionRequest::PulseRelay {
                relay_id: 1,
                duration_ms: None
            }
        );
        assert_eq!(
            parse_request(r#"{"op":"batch_set_relays","start_id":3,"states":[true,false]}"#)
                .unwrap(),
            SessionRequest::BatchSetRelays {
                start_id: 3,
                states: vec![true, false]
            }
        );
        assert_eq!(parse_request(r#"{"op":"status"}"#).unwrap(), SessionRequest::Status);
    }

    #[test]
    fn test_parse_reads_with_and_without_id() {
        assert_eq!(
            parse_request(r#"{"op":"read_relays"}"#).unwrap(),
            SessionRequest::ReadRelays { relay_id: None }
        );
        assert_eq!(
            parse_request(r#"{"op":"read_relays","relay_id":3}"#).unwrap(),
            SessionRequest::ReadRelays { relay_id: Some(3) }
        );
        assert_eq!(
            parse_request(r#"{"op":"read_inputs","input_id":null}"#).unwrap(),
            SessionRequest::ReadInputs { input_id: None }
        );

        let line = serde_json::to_string(&SessionRequest::ReadInputs { input_id: Some(2) }).unwrap();
        assert_eq!(line, r#"{"op":"read_inputs","input_id":2}"#);
        let line = serde_json::to_string(&SessionRequest::ReadRelays { relay_id: None }).unwrap();
        assert_eq!(line, r#"{"op":"read_relays"}"#);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in [
            "not json",
            r#"{"op":"launch_missiles"}"#,
            r#"{"op":"set_relay","relay_id":-1,"state":true}"#,
            r#"{"op":"toggle_relay"}"#,
        ] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BadRequest, "line: {}", line);
        }
    }

    #[test]
    fn test_failure_response_shape() {
        let resp = SessionResponse::failure(&RelayError::unavailable("shutting down"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "transport_unavailable");
        assert_eq!(json["error"]["code"], 6);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_response_data_roundtrip_keeps_variant() {
        let layout = DeviceLayout::new(1, 2, 2, 0, 0).unwrap();
        let relays = SessionResponse::ok(ResponseData::Relays {
            relays: layout.relay_states(&[true, false]),
        });
        let line = serde_json::to_string(&relays).unwrap();
        let back: SessionResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(back, relays);

        let status = SessionResponse::ok(ResponseData::Status(StatusData {
            relays: layout.relay_states(&[true, false]),
            inputs: layout.input_states(&[false, true]),
            last_update: None,
            last_command_ms: Some(12),
        }));
        let line = serde_json::to_string(&status).unwrap();
        let back: SessionResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(back, status);
        assert_eq!(back.inputs().unwrap().len(), 2);
    }
}
