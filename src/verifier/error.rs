//! Error handling for verifier submissions

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawError {
    name: String,
    message: String,
    #[serde(default)]
    http_code: Option<u16>,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The verifier checked the proof and rejected it (revert, failed verification).
    #[error("rejected by verifier: {0}")]
    Rejected(String),

    /// The nonce was already used, locally or on the ledger.
    #[error("nonce {0} already used")]
    NonceConflict(u64),

    /// The proof could not be turned into verifier calldata.
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("no response from verifier within {0:?}")]
    Timeout(Duration),

    /// Reqwest error, typically related to network issues or request failures.
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// Any other non-success HTTP status.
    #[error("HTTP error with status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        headers: Vec<(String, String)>,
    },
}

impl SubmissionError {
    /// Captures status, body and headers of a non-success gateway response.
    pub async fn from_response(response: reqwest::Response) -> SubmissionError {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
            .collect();
        let message = match response.text().await {
            Ok(body) => body,
            Err(e) => format!("<unreadable body: {e}>"),
        };
        SubmissionError::Http {
            status,
            message,
            headers,
        }
    }

    /// Pretty-prints a JSON error body, if the verifier sent one.
    pub fn to_pretty(&self) -> Option<String> {
        match self {
            Self::Http { message, .. } => {
                let parsed = serde_json::from_str::<RawError>(message).ok()?;
                serde_json::to_string_pretty(&parsed).ok()
            }
            _ => None,
        }
    }

    /// Delay the gateway asked for through `Retry-After`, when given in whole seconds.
    pub fn retry_after_seconds(&self) -> Option<u32> {
        let Self::Http { headers, .. } = self else {
            return None;
        };
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }

    /// Whether resubmitting with a fresh nonce may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::NonceConflict(_) => true,
            Self::Reqwest(e) => e.is_connect() || e.is_timeout(),
            Self::Http { status, .. } => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::Rejected(_) | Self::MalformedProof(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, message: &str, headers: Vec<(String, String)>) -> SubmissionError {
        SubmissionError::Http {
            status,
            message: message.to_string(),
            headers,
        }
    }

    #[test]
    fn retry_after_is_case_insensitive() {
        let err = http(429, "", vec![("Retry-After".into(), " 7 ".into())]);
        assert_eq!(err.retry_after_seconds(), Some(7));
        assert!(err.is_transient());

        let err = http(429, "", vec![("retry-after".into(), "soon".into())]);
        assert_eq!(err.retry_after_seconds(), None);
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(http(503, "", vec![]).is_transient());
        assert!(!http(400, "", vec![]).is_transient());
        assert!(SubmissionError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SubmissionError::NonceConflict(4).is_transient());
        assert!(!SubmissionError::Rejected("invalid proof".into()).is_transient());
        assert!(!SubmissionError::MalformedProof("missing pi_a".into()).is_transient());
    }

    #[test]
    fn pretty_prints_json_bodies_only() {
        let err = http(400, r#"{"name":"Revert","message":"bad proof","httpCode":400}"#, vec![]);
        let pretty = err.to_pretty().unwrap();
        assert!(pretty.contains("\"message\": \"bad proof\""));

        assert_eq!(http(502, "Bad Gateway", vec![]).to_pretty(), None);
    }
}
