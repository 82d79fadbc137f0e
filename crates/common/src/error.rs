//! The fixed error taxonomy surfaced at every external boundary (`SPEC_FULL.md` §7).
//!
//! Core logic returns `Result<T, ControlPlaneError>` throughout; only the HTTP front adapter
//! and the agent's own router translate a variant into a status code and a JSON body.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing required field: {0}")]
    MissingRequiredFields(String),
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid token")]
    InvalidToken,
    #[error("unauthorized IP: {0}")]
    UnauthorizedIp(std::net::IpAddr),
    #[error("invalid access key")]
    InvalidAccessKey,
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("user not found")]
    UserNotFound,
    #[error("server not found: {0}")]
    ServerNotFound(String),
    #[error("server full")]
    ServerFull,
    #[error("item not found")]
    ItemNotFound,
    #[error("already owned")]
    AlreadyOwned,

    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("invalid amount")]
    InvalidAmount,

    #[error("maintenance mode")]
    MaintenanceMode,
    #[error("failed to create host: {0}")]
    FailedToCreateHost(String),
    #[error("timeout")]
    Timeout,
    #[error("max servers reached")]
    MaxServersReached,

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

/// The wire-stable code carried in every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidJson,
    MissingRequiredFields,
    InvalidData,
    InvalidToken,
    UnauthorizedIp,
    InvalidAccessKey,
    RateLimitExceeded,
    UserNotFound,
    ServerNotFound,
    ServerFull,
    ItemNotFound,
    AlreadyOwned,
    InsufficientFunds,
    InvalidAmount,
    MaintenanceMode,
    FailedToCreateHost,
    Timeout,
    MaxServersReached,
    InternalError,
}

impl ControlPlaneError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson(_) => ErrorCode::InvalidJson,
            Self::MissingRequiredFields(_) => ErrorCode::MissingRequiredFields,
            Self::InvalidData(_) => ErrorCode::InvalidData,
            Self::InvalidToken => ErrorCode::InvalidToken,
            Self::UnauthorizedIp(_) => ErrorCode::UnauthorizedIp,
            Self::InvalidAccessKey => ErrorCode::InvalidAccessKey,
            Self::RateLimitExceeded => ErrorCode::RateLimitExceeded,
            Self::UserNotFound => ErrorCode::UserNotFound,
            Self::ServerNotFound(_) => ErrorCode::ServerNotFound,
            Self::ServerFull => ErrorCode::ServerFull,
            Self::ItemNotFound => ErrorCode::ItemNotFound,
            Self::AlreadyOwned => ErrorCode::AlreadyOwned,
            Self::InsufficientFunds => ErrorCode::InsufficientFunds,
            Self::InvalidAmount => ErrorCode::InvalidAmount,
            Self::MaintenanceMode => ErrorCode::MaintenanceMode,
            Self::FailedToCreateHost(_) => ErrorCode::FailedToCreateHost,
            Self::Timeout => ErrorCode::Timeout,
            Self::MaxServersReached => ErrorCode::MaxServersReached,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// The uniform `{success:false, error:{code, message}}` response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ControlPlaneError> for ErrorBody {
    fn from(err: &ControlPlaneError) -> Self {
        // Internal causes are logged with their source chain by the caller; the message
        // returned over the wire never includes them.
        let message = match err {
            ControlPlaneError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            success: false,
            error: ErrorDetail { code: err.code(), message },
        }
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(e: serde_json::Error) -> Self {
        ControlPlaneError::InvalidJson(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_never_leak_their_cause_over_the_wire() {
        let err = ControlPlaneError::Internal(anyhow::anyhow!("db connection string leaked"));
        let body = ErrorBody::from(&err);
        assert_eq!(body.error.message, "internal error");
        assert_eq!(body.error.code, ErrorCode::InternalError);
    }

    #[test]
    fn classified_errors_keep_their_message() {
        let err = ControlPlaneError::ServerNotFound("host-1-9000".into());
        let body = ErrorBody::from(&err);
        assert_eq!(body.error.code, ErrorCode::ServerNotFound);
        assert!(body.error.message.contains("host-1-9000"));
    }
}
