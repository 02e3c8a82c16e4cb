//! Typed GCP API errors and error classification
//!
//! Every remote call funnels its failures through [`ApiError`], and every
//! builder decides recoverability through [`ApiError::classify`]. This keeps
//! the permission-denied / not-found / transient distinction in exactly one
//! place instead of scattering status-code checks across the builders.

use thiserror::Error;

/// Structured error payload returned by Google APIs.
///
/// See <https://cloud.google.com/apis/design/errors#http_mapping> for the
/// shape: `{"error": {"code": 403, "message": "...", "status":
/// "PERMISSION_DENIED", "errors": [{"reason": "...", ...}]}}`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ApiErrorPayload {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub message: String,
}

/// Error returned by the GCP client layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("request failed: {source}")]
    Transport {
        #[from]
        source: reqwest::Error,
    },

    /// The API answered with a non-2xx status.
    #[error("API request failed: {http_status} {message}")]
    Api {
        http_status: u16,
        message: String,
        /// Parsed structured payload, when the body carried one.
        payload: Option<ApiErrorPayload>,
    },

    /// The response body was not the JSON we expected.
    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A request URL could not be constructed.
    #[error("invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Recoverability classes for a remote-call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller lacks access to this subtree; treat as "no data here".
    PermissionDenied,
    /// The resource vanished between listing and fetching; treat as empty.
    NotFound,
    /// Rate limiting or a server-side hiccup; surfaced to the caller,
    /// retrying is the orchestrator's job.
    Transient,
    /// Everything else; must propagate.
    Fatal,
}

impl ApiError {
    /// Build an [`ApiError::Api`] from a response status and body.
    ///
    /// Attempts to parse the structured Google error payload; falls back to
    /// the raw status line when the body is not in the documented shape.
    pub fn from_response(http_status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct Envelope {
            error: ApiErrorPayload,
        }

        let payload = serde_json::from_str::<Envelope>(body).ok().map(|e| e.error);
        let message = payload
            .as_ref()
            .map(|p| p.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP {}", http_status));

        ApiError::Api {
            http_status,
            message,
            payload,
        }
    }

    /// Classify this error for the builders' recoverability decisions.
    ///
    /// Logs the full structured payload whenever one is present, so a
    /// tolerated permission gap still leaves a diagnostic trail.
    pub fn classify(&self) -> ErrorClass {
        let ApiError::Api {
            http_status,
            payload,
            ..
        } = self
        else {
            return ErrorClass::Fatal;
        };

        if let Some(payload) = payload {
            let reason = payload
                .errors
                .first()
                .map(|d| d.reason.as_str())
                .unwrap_or_default();
            tracing::error!(
                code = payload.code,
                status = %payload.status,
                reason = %reason,
                message = %payload.message,
                "structured API error"
            );
        }

        let status = payload.as_ref().map(|p| p.status.as_str()).unwrap_or("");

        match (*http_status, status) {
            (_, "PERMISSION_DENIED") | (403, "") => ErrorClass::PermissionDenied,
            (404, _) | (_, "NOT_FOUND") => ErrorClass::NotFound,
            (429, _) | (500..=599, _) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    /// True only if the error is an authorization gap we may skip over.
    pub fn is_permission_denied(&self) -> bool {
        self.classify() == ErrorClass::PermissionDenied
    }

    /// True if the target resource no longer exists.
    pub fn is_not_found(&self) -> bool {
        self.classify() == ErrorClass::NotFound
    }
}
