//! Gateway errors and their HTTP mapping.

use crate::config::ConfigError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ledgerbench_client::ClientError;
use ledgerbench_spammer::{DispatchError, MetricsError, TrackerError};
use ledgerbench_types::TxKind;
use serde_json::json;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Unknown transaction kind: {0}")]
    UnknownKind(String),

    #[error("Transaction kind {0} is not enabled")]
    KindDisabled(TxKind),

    #[error("No signing identity available")]
    NoIdentities,

    #[error("Submission slot unavailable: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Submission rejected: {0}")]
    Rejected(#[source] ClientError),

    #[error("Transaction not confirmed within {0:?}")]
    Timeout(Duration),

    #[error("Confirmation tracking failed: {0}")]
    Tracker(TrackerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("Failed to subscribe to blocks: {0}")]
    Subscribe(#[source] ClientError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TrackerError> for GatewayError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::Timeout { timeout, .. } => GatewayError::Timeout(timeout),
            other => GatewayError::Tracker(other),
        }
    }
}

impl GatewayError {
    /// HTTP status reported to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownKind(_) | GatewayError::KindDisabled(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoIdentities | GatewayError::Dispatch(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::Rejected(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Tracker(TrackerError::AlreadyPending(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerbench_types::Hash;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::UnknownKind("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Rejected(ClientError::Rejected("nonce".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::from(TrackerError::Timeout {
                hash: Hash::ZERO,
                timeout: Duration::from_secs(1)
            })
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::from(DispatchError::Closed).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
