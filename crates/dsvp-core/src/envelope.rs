//! The message envelope carried over the worker socket.
//!
//! Every frame is one JSON object with a `type` discriminator:
//!
//! | `type`         | fields                                  | direction        |
//! |----------------|-----------------------------------------|------------------|
//! | `auth`         | `token`                                 | worker → server  |
//! | `auth`         | `result`, `reason` (on failure)         | server → worker  |
//! | `unauthorized` | `sent_type`                             | server → worker  |
//! | `unknown`      | `sent_type`                             | both             |
//!
//! Any other `type` decodes into [`Envelope::Other`] so newer peers can
//! introduce messages without breaking older ones; the receiver answers
//! those with `unknown`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a frame was thrown away instead of dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    /// The frame is not JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// The frame is JSON but not an object (`null`, array, number, string, bool).
    #[error("not an object")]
    NotAnObject,
}

/// Reason attached to a rejected `auth` reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailure {
    /// The token was missing or decoded to nothing.
    InvalidKey,
    /// The key is not registered in the credential store.
    NotFound,
}

impl AuthFailure {
    /// Wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidKey => "invalid_key",
            Self::NotFound => "not_found",
        }
    }
}

/// Body of an `auth` frame. Requests carry `token`; replies carry `result`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Auth {
    /// Base64 credential token (worker → server).
    pub token: Option<String>,
    /// Outcome (server → worker).
    pub result: Option<bool>,
    /// Failure reason (server → worker, only when `result` is false).
    pub reason: Option<AuthFailure>,
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// `auth` request or reply.
    Auth(Auth),
    /// The server refused a message because the connection is not authenticated yet.
    Unauthorized {
        /// `type` of the refused message.
        sent_type: Option<String>,
    },
    /// The peer had no handler for a message we sent.
    Unknown {
        /// `type` of the unhandled message.
        sent_type: Option<String>,
    },
    /// Anything else. `kind` is `None` when `type` was missing or not a string.
    Other {
        /// The `type` field.
        kind: Option<String>,
        /// Remaining fields.
        fields: Map<String, Value>,
    },
}

impl Envelope {
    /// `{type:"auth", token}`
    #[must_use]
    pub fn auth_request(token: impl Into<String>) -> Self {
        Self::Auth(Auth {
            token: Some(token.into()),
            ..Auth::default()
        })
    }

    /// `{type:"auth", result:true}`
    #[must_use]
    pub fn auth_accepted() -> Self {
        Self::Auth(Auth {
            result: Some(true),
            ..Auth::default()
        })
    }

    /// `{type:"auth", result:false, reason}`
    #[must_use]
    pub fn auth_rejected(reason: AuthFailure) -> Self {
        Self::Auth(Auth {
            result: Some(false),
            reason: Some(reason),
            ..Auth::default()
        })
    }

    /// `{type:"unknown", sent_type}`
    #[must_use]
    pub fn unknown(sent_type: Option<&str>) -> Self {
        Self::Unknown {
            sent_type: sent_type.map(str::to_owned),
        }
    }

    /// `{type:"unauthorized", sent_type}`
    #[must_use]
    pub fn unauthorized(sent_type: Option<&str>) -> Self {
        Self::Unauthorized {
            sent_type: sent_type.map(str::to_owned),
        }
    }

    /// A catch-all message of the given type with no extra fields.
    #[must_use]
    pub fn other(kind: impl Into<String>) -> Self {
        Self::Other {
            kind: Some(kind.into()),
            fields: Map::new(),
        }
    }

    /// The `type` discriminator.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Auth(_) => Some("auth"),
            Self::Unauthorized { .. } => Some("unauthorized"),
            Self::Unknown { .. } => Some("unknown"),
            Self::Other { kind, .. } => kind.as_deref(),
        }
    }

    /// Build the JSON object for this envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(kind) = self.kind() {
            let _ = object.insert("type".into(), Value::String(kind.to_owned()));
        }
        match self {
            Self::Auth(auth) => {
                if let Some(token) = &auth.token {
                    let _ = object.insert("token".into(), Value::String(token.clone()));
                }
                if let Some(result) = auth.result {
                    let _ = object.insert("result".into(), Value::Bool(result));
                }
                if let Some(reason) = auth.reason {
                    let _ = object.insert("reason".into(), Value::String(reason.as_str().into()));
                }
            }
            Self::Unauthorized { sent_type } | Self::Unknown { sent_type } => {
                if let Some(sent_type) = sent_type {
                    let _ = object.insert("sent_type".into(), Value::String(sent_type.clone()));
                }
            }
            Self::Other { fields, .. } => {
                for (key, value) in fields {
                    if key != "type" {
                        let _ = object.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Value::Object(object)
    }
}

/// Parse a raw frame.
pub fn decode(raw: &str) -> Result<Envelope, MalformedMessage> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| MalformedMessage::InvalidJson(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(MalformedMessage::NotAnObject);
    };

    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => Some(kind),
        _ => None,
    };

    let envelope = match kind.as_deref() {
        Some("auth") => Envelope::Auth(Auth {
            token: string_field(&fields, "token"),
            result: fields.get("result").and_then(Value::as_bool),
            reason: fields
                .get("reason")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok()),
        }),
        Some("unauthorized") => Envelope::Unauthorized {
            sent_type: string_field(&fields, "sent_type"),
        },
        Some("unknown") => Envelope::Unknown {
            sent_type: string_field(&fields, "sent_type"),
        },
        _ => Envelope::Other { kind, fields },
    };
    Ok(envelope)
}

/// Serialize an envelope. No validation: callers construct well-formed envelopes.
#[must_use]
pub fn encode(envelope: &Envelope) -> String {
    envelope.to_value().to_string()
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_owned)
}
