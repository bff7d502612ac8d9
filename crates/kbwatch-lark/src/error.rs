//! Error types for the Lark sink

use kbwatch_core::NotifyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LarkError {
    /// Transport-level failure (connect, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-2xx HTTP status
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Lark answered with a non-zero business code
    #[error("Lark API error (code {code}): {msg}")]
    Api { code: i64, msg: String },

    /// Upload succeeded but no image key came back
    #[error("image upload returned no image_key")]
    MissingImageKey,

    /// App credentials are required for this call
    #[error("Lark app credentials are not configured")]
    NoAppCredentials,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for LarkError {
    fn from(err: reqwest::Error) -> Self {
        LarkError::Http(err.to_string())
    }
}

impl From<LarkError> for NotifyError {
    fn from(err: LarkError) -> Self {
        match err {
            LarkError::Api { code, msg } => NotifyError::Rejected { code, message: msg },
            LarkError::Json(e) => NotifyError::Serialization(e),
            LarkError::NoAppCredentials => NotifyError::Config(err.to_string()),
            LarkError::MissingImageKey => NotifyError::Upload(err.to_string()),
            LarkError::Http(_) | LarkError::Status { .. } => NotifyError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_become_rejections() {
        let err: NotifyError = LarkError::Api {
            code: 9499,
            msg: "Bad Request".to_string(),
        }
        .into();
        assert!(matches!(err, NotifyError::Rejected { code: 9499, .. }));
    }

    #[test]
    fn status_errors_are_transport() {
        let err: NotifyError = LarkError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        }
        .into();
        assert!(matches!(err, NotifyError::Transport(_)));
        assert!(err.to_string().contains("502"));
    }
}
