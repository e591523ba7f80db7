//! Error types shared by the engine and its collaborators.
//!
//! [`ApiError`] is what a [`crate::contract::ListApi`] implementation reports. It keeps the
//! HTTP status and raw body so the engine can look inside rejections. [`SyncError`] is the
//! taxonomy the engine itself works with; `From<ApiError>` decides which API failures count as
//! structured rejections and which are plain transport failures.

use thiserror::Error;

use crate::ignore::{extract_high_volume_host, HIGH_VOLUME_MARKER};

/// Failure reported by the transport seam.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, TLS, timeout or authentication failure before a usable response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-2xx HTTP status.
    #[error("non-OK HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// The HTTP exchange succeeded but the response envelope carried a non-OK status.
    #[error("non-OK response status {code} {text}: {body}")]
    Remote { code: i64, text: String, body: String },

    /// The response body did not have the expected shape.
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// The API refused specific content and said why.
    #[error("remote rejected request ({status}): {message}")]
    RemoteRejection { status: i64, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not parse entry {entry:?}: {reason}")]
    Parse { entry: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Host named by a high-volume rejection, if this is one.
    pub fn high_volume_host(&self) -> Option<String> {
        match self {
            SyncError::RemoteRejection { message, .. } => extract_high_volume_host(message),
            _ => None,
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Transport(msg) => SyncError::Transport(msg),
            ApiError::Decode(msg) => SyncError::Decode(msg),
            ApiError::Status { status, body } => {
                // Server-side failures are transport trouble unless they name a rejected host.
                let client_error = (400..500).contains(&status);
                match structured_message(&body) {
                    Some(message) if client_error || message.contains(HIGH_VOLUME_MARKER) => {
                        SyncError::RemoteRejection {
                            status: i64::from(status),
                            message,
                        }
                    }
                    _ if body.contains(HIGH_VOLUME_MARKER) => SyncError::RemoteRejection {
                        status: i64::from(status),
                        message: body,
                    },
                    _ => SyncError::Transport(format!("non-OK HTTP status {status}: {body}")),
                }
            }
            ApiError::Remote { code, text, body } => SyncError::RemoteRejection {
                status: code,
                message: structured_message(&body).unwrap_or_else(|| format!("{text}: {body}")),
            },
        }
    }
}

/// Pulls the `message` (or `error`) field out of a JSON error body.
///
/// Non-string messages are rendered as compact JSON so nested validation details survive.
fn structured_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let field = value
        .get("message")
        .or_else(|| value.get("error"))
        .filter(|v| !v.is_null())?;
    Some(match field {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_with_json_message_becomes_rejection() {
        let err = ApiError::Status {
            status: 400,
            body: r#"{"message":"Validation failed\/high_volume_list_domain\/x.highvol.com"}"#
                .to_string(),
        };
        let sync: SyncError = err.into();
        assert!(matches!(sync, SyncError::RemoteRejection { status: 400, .. }));
        assert_eq!(sync.high_volume_host().as_deref(), Some("x.highvol.com"));
    }

    #[test]
    fn status_with_plain_body_is_transport() {
        let err = ApiError::Status {
            status: 502,
            body: "Bad Gateway".to_string(),
        };
        let sync: SyncError = err.into();
        assert!(matches!(sync, SyncError::Transport(_)));
        assert_eq!(sync.high_volume_host(), None);
    }

    #[test]
    fn server_error_with_json_message_is_transport() {
        let err = ApiError::Status {
            status: 503,
            body: r#"{"message":"Service Unavailable"}"#.to_string(),
        };
        match SyncError::from(err) {
            SyncError::Transport(msg) => assert!(msg.contains("503"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_error_naming_a_high_volume_host_is_a_rejection() {
        let err = ApiError::Status {
            status: 500,
            body: r#"{"message":"high_volume_list_domain/cdn.example.net"}"#.to_string(),
        };
        let sync = SyncError::from(err);
        assert!(matches!(sync, SyncError::RemoteRejection { status: 500, .. }));
        assert_eq!(sync.high_volume_host().as_deref(), Some("cdn.example.net"));
    }

    #[test]
    fn plain_body_with_marker_is_still_a_rejection() {
        let err = ApiError::Status {
            status: 400,
            body: "high_volume_list_domain/cdn.example.net".to_string(),
        };
        let sync: SyncError = err.into();
        assert_eq!(sync.high_volume_host().as_deref(), Some("cdn.example.net"));
    }

    #[test]
    fn nested_message_is_rendered_as_json() {
        let body = r#"{"message":{"destinations":["high_volume_list_domain"]}}"#;
        assert_eq!(
            structured_message(body).as_deref(),
            Some(r#"{"destinations":["high_volume_list_domain"]}"#)
        );
    }

    #[test]
    fn remote_envelope_error_keeps_code() {
        let err = ApiError::Remote {
            code: 403,
            text: "Forbidden".to_string(),
            body: "{}".to_string(),
        };
        match SyncError::from(err) {
            SyncError::RemoteRejection { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Forbidden: {}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
