//! Response envelope
//!
//! Every backend response body is `{code, message, data}`. `code == 0` is
//! success whatever the HTTP status; any other code is a domain failure
//! carrying `message`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Fallback text when a failing envelope carries no message
const DEFAULT_FAILURE_MESSAGE: &str = "request failed";

/// Longest non-envelope body excerpt kept in a `Status` error
const MAX_BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            code: 0,
            message: Some("success".into()),
            data,
        }
    }

    pub fn fail(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    /// `data` on success, `Error::Domain` otherwise.
    pub fn into_result(self) -> Result<Value> {
        if self.code == 0 {
            return Ok(self.data);
        }
        let message = self
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        Err(Error::Domain {
            code: self.code,
            message,
        })
    }
}

/// Decode a response body into its payload.
///
/// Envelope-shaped bodies are judged by `code` alone. Other bodies become
/// `Error::Status` on a non-2xx status and `Error::Decode` otherwise.
pub fn unwrap_envelope(status: u16, body: &[u8]) -> Result<Value> {
    match serde_json::from_slice::<Envelope>(body) {
        Ok(envelope) => envelope.into_result(),
        Err(_) if !(200..300).contains(&status) => Err(Error::Status {
            status,
            message: excerpt(body),
        }),
        Err(e) => Err(Error::Decode(e.to_string())),
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.is_empty() {
        return String::from("<no body>");
    }
    match text.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}
