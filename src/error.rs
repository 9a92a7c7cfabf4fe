//! Failure taxonomy for proxied requests.
//!
//! Every variant is turned into a JSON error envelope at the handler boundary
//! by [`ProxyError::into_response`]; none of them reach the server loop.

use serde::Serialize;
use thiserror::Error;

use crate::{Response, StatusCode};

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No response arrived: DNS failure, refused connection, timeout, or a
    /// body cut off mid-transfer.
    #[error("upstream unreachable: {message}")]
    UpstreamUnreachable { message: String },

    /// The upstream answered with a non-2xx status.
    #[error("Request failed with status code {status}")]
    UpstreamNonOk { status: u16 },

    /// The upstream answered 2xx but the body is not JSON.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

impl ProxyError {
    /// Status the caller sees: the upstream's own status for a non-2xx reply,
    /// otherwise `500`.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamNonOk { status } => StatusCode::from_u16(*status),
            Self::UpstreamUnreachable { .. } | Self::MalformedResponse(_) => {
                StatusCode::InternalServerError
            }
        }
    }

    /// Renders `{"error": <message>}` with [`status`](Self::status).
    pub fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            error: self.to_string(),
        };
        Response::new(self.status()).json(&envelope)
    }
}

/// Wire shape of every error reply.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamUnreachable {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn body(response: &Response) -> Value {
        serde_json::from_slice(response.payload()).unwrap()
    }

    #[test]
    fn unreachable_maps_to_500_envelope() {
        let err = ProxyError::UpstreamUnreachable {
            message: "connection refused".into(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(
            body(&response),
            json!({"error": "upstream unreachable: connection refused"})
        );
    }

    #[test]
    fn non_ok_mirrors_known_status() {
        let response = ProxyError::UpstreamNonOk { status: 404 }.into_response();
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(
            body(&response),
            json!({"error": "Request failed with status code 404"})
        );
    }

    #[test]
    fn non_ok_mirrors_unnamed_status() {
        for code in [412, 418, 451, 507] {
            let response = ProxyError::UpstreamNonOk { status: code }.into_response();
            assert_eq!(response.status().as_u16(), code);
            assert_eq!(
                body(&response),
                json!({ "error": format!("Request failed with status code {code}") })
            );
        }
    }

    #[test]
    fn malformed_is_500() {
        let parse_err = serde_json::from_str::<Value>("<html>").unwrap_err();
        let response = ProxyError::from(parse_err).into_response();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert!(body(&response)["error"]
            .as_str()
            .unwrap()
            .starts_with("malformed upstream response"));
    }
}
