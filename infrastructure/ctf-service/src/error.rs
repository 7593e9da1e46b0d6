use axum::{
    response::{IntoResponse, Response},
    Json,
};
use ctf_orchestrator::{
    error::{ConfigError, LedgerError},
    ChallengeError,
};
use http::StatusCode;
use log::error;
use thiserror::Error;

use crate::{messages, types::ErrorResponse};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid environment variable `{name}`: {reason}")]
    InvalidEnv { name: &'static str, reason: String },
    #[error("Invalid deployer private key: {0}")]
    InvalidDeployerKey(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Failed to start service: {0}")]
    FailedToStartService(String),
    #[error("Request middleware failed, with error: {0}")]
    Middleware(String),
    #[error("{}", messages::CHALLENGE_NOT_DEPLOYED_YET)]
    ChallengeNotDeployed,
    #[error("{}", messages::CHALLENGE_NOT_COMPLETE)]
    ChallengeNotComplete,
    #[error("{}", messages::RESET_RATE_LIMITED)]
    ResetRateLimited,
    #[error("Unable to check solve state, with error: {0}")]
    SolveCheck(#[source] ChallengeError),
    #[error(transparent)]
    Internal(#[from] ChallengeError),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ChallengeNotDeployed | ServiceError::ChallengeNotComplete => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::ResetRateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the player. Internal details only reach the log.
    pub fn public_message(&self) -> &'static str {
        match self {
            ServiceError::ChallengeNotDeployed => messages::CHALLENGE_NOT_DEPLOYED_YET,
            ServiceError::ChallengeNotComplete => messages::CHALLENGE_NOT_COMPLETE,
            ServiceError::ResetRateLimited => messages::RESET_RATE_LIMITED,
            ServiceError::SolveCheck(_) => messages::UNABLE_TO_CHECK_SOLVE,
            _ => messages::ERROR_INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed, with error: {}", self);
        }
        let body = ErrorResponse {
            error: self.public_message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_orchestrator::SolveType;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::ChallengeNotDeployed.status_code(),
            StatusCode::BAD_REQUEST
        );
        let err = ServiceError::SolveCheck(ChallengeError::UnsupportedSolveType(SolveType::Event));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), messages::UNABLE_TO_CHECK_SOLVE);

        let err = ServiceError::from(LedgerError::Transport("connection refused".to_string()));
        assert_eq!(err.public_message(), messages::ERROR_INTERNAL_SERVER_ERROR);
    }
}
