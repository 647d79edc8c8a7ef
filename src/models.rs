//! Shared models and types for the relay
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies: the parameter value handed to the
//! inference engine, the frames it hands back, and the control-plane
//! wire messages.

use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Parameter keys never carried forward onto a replayed upload frame
const NON_CARRIED_KEYS: [&str; 2] = ["image", "_frame_id"];

/// How the engine expects its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Every `next_frame` carries a binary image payload
    Image,
    /// Parameters only, no image payload follows `next_frame`
    Text,
}

impl Default for InputMode {
    fn default() -> Self {
        Self::Image
    }
}

/// Client-supplied generation controls
///
/// Opaque to the relay apart from the two routing flags (`upload_mode` and
/// the presence of `image`). Every write to a session's parameter slot
/// replaces the previous value wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    /// Marker written by `pause`; tags the next dispatch as a restart
    pub restart: bool,
    /// Client asked for clip upload + replay instead of live camera frames
    pub upload_mode: bool,
    /// Encoded input image (camera mode, or a replayed upload frame)
    pub image: Option<Bytes>,
    /// Everything else the client sent, passed through untouched
    pub fields: Map<String, Value>,
}

impl ParamSet {
    /// Value written by a `pause` control message
    pub fn restart_marker() -> Self {
        Self {
            restart: true,
            ..Self::default()
        }
    }

    /// Decode the parameter document that follows `next_frame`
    ///
    /// Upload mode is requested by either `input_mode == "upload"` or
    /// `upload_mode == true`.
    pub fn from_document(doc: Value) -> Result<Self> {
        let Value::Object(fields) = doc else {
            return Err(Error::Validation(
                "parameter document must be a JSON object".to_string(),
            ));
        };

        let upload_mode = fields.get("input_mode").and_then(Value::as_str) == Some("upload")
            || fields
                .get("upload_mode")
                .and_then(Value::as_bool)
                .unwrap_or(false);

        Ok(Self {
            restart: false,
            upload_mode,
            image: None,
            fields,
        })
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    /// True when there is nothing worth sending to the engine
    pub fn is_empty(&self) -> bool {
        !self.restart && self.image.is_none() && self.fields.is_empty()
    }

    /// Build the value for a replayed upload frame
    ///
    /// Keeps the current generation controls but swaps in `image`.
    pub fn carry_forward(&self, image: Bytes) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|(key, _)| !NON_CARRIED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            restart: false,
            upload_mode: self.upload_mode,
            image: Some(image),
            fields,
        }
    }
}

/// Engine output, always attributed to its session
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub session_id: Uuid,
    /// Engine-side sequence number, when the engine provides one
    pub seq: Option<u64>,
    /// Encoded image (JPEG)
    pub data: Bytes,
}

impl Frame {
    pub fn new(session_id: Uuid, data: impl Into<Bytes>) -> Self {
        Self {
            session_id,
            seq: None,
            data: data.into(),
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// Server -> client control messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { message: String },
    Wait,
    SendFrame,
    Timeout { message: String },
    UploadDoneAck,
    Error { message: String },
}

impl ServerMessage {
    pub fn connected() -> Self {
        Self::Connected {
            message: "Connected".to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self::Timeout {
            message: "Your session has ended".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Client -> server control command, taken from the `status` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    UploadDone,
    NextFrame,
    /// Anything else, including a missing status
    Other,
}

impl ControlCommand {
    pub fn from_document(doc: &Value) -> Self {
        match doc.get("status").and_then(Value::as_str) {
            Some("pause") => Self::Pause,
            Some("resume") => Self::Resume,
            Some("upload_done") => Self::UploadDone,
            Some("next_frame") => Self::NextFrame,
            _ => Self::Other,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_sessions: usize,
}

/// `GET /api/queue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSizeResponse {
    pub queue_size: usize,
}

/// `GET /api/settings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub input_mode: InputMode,
    pub max_queue_size: usize,
    pub ingest_fps: f64,
    pub output_min_fps: f64,
    pub output_max_fps: f64,
    pub metrics_enabled: bool,
    pub target_latency: f64,
}
