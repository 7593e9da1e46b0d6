use ethers::types::{TxHash, U256};
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

use crate::{config::SolveType, instance::DeployStatus};

/// Failures reported by a [`crate::ledger::LedgerClient`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger transport error: {0}")]
    Transport(String),
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("Transaction {0:?} was dropped before it was mined")]
    Dropped(TxHash),
    #[error("Transaction {0:?} reverted")]
    Reverted(TxHash),
    #[error("Contract `{contract}` has no function `{method}`")]
    MissingFunction { contract: String, method: String },
    #[error("ABI error: {0}")]
    Abi(String),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Contract artifact not found at `{}`", .0.display())]
    NotFound(PathBuf),
    #[error("Unable to read contract artifact `{}`, with error: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid contract artifact `{}`: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("Unable to encode deployment of `{name}`: {reason}")]
    Encoding { name: String, reason: String },
    #[error("There was an error deploying `{name}`, with error: {source}")]
    Submission {
        name: String,
        #[source]
        source: LedgerError,
    },
    #[error("Deployment of `{name}` reverted in transaction {tx:?}")]
    Reverted { name: String, tx: TxHash },
    #[error("Deployment receipt of `{name}` carries no contract address")]
    MissingAddress { name: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to load config file `{}`, with error: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid yaml file, with error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("Unable to read challenge source file `{}`, with error: {source}", path.display())]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid_field<T: Into<String>>(field: &'static str, reason: T) -> Self {
        ConfigError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Raised when the player wallet cannot be emptied during a reset. Always
/// recovered locally by the instance.
#[derive(Debug, Error)]
pub enum WalletDrainError {
    #[error("Player balance {balance} wei does not cover the {reserve} wei reserve")]
    InsufficientBalance { balance: U256, reserve: U256 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Unable to connect to blockchain after {attempts} attempts, with error: {source}")]
    Connectivity {
        attempts: u32,
        #[source]
        source: LedgerError,
    },
    #[error("Unable to fund wallet, with error: {0}")]
    Funding(#[source] LedgerError),
    #[error("Unable to deploy challenge contract, with error: {0}")]
    Deployment(#[source] DeployerError),
    #[error("Malformed setup contract: {0}")]
    MalformedSetupContract(String),
    #[error("Solve type `{0}` is not supported")]
    UnsupportedSolveType(SolveType),
    #[error("Invalid configuration, with error: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    #[error("{what} is not available while the challenge is {status}")]
    NotAvailable {
        what: &'static str,
        status: DeployStatus,
    },
    #[error("Challenge setup already started, current status is {0}")]
    AlreadyStarted(DeployStatus),
    #[error("Challenge setup did not finish within {0:?}")]
    SetupTimeout(Duration),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("There was an error deploying the challenge, with error: {0}")]
    Startup(#[source] ChallengeError),
    #[error("Unable to redeploy challenge, with error: {0}")]
    Reload(#[source] ChallengeError),
}

impl ManagerError {
    pub fn cause(&self) -> &ChallengeError {
        match self {
            ManagerError::Startup(e) | ManagerError::Reload(e) => e,
        }
    }
}

pub type Result<T, E = ChallengeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChallengeError::NotAvailable {
            what: "Setup contract",
            status: DeployStatus::Failed,
        };
        assert_eq!(
            err.to_string(),
            "Setup contract is not available while the challenge is FAILED"
        );
    }

    #[test]
    fn test_reload_error_keeps_cause() {
        let err = ManagerError::Reload(ChallengeError::UnsupportedSolveType(SolveType::Event));
        assert!(matches!(
            err.cause(),
            ChallengeError::UnsupportedSolveType(SolveType::Event)
        ));
        assert!(std::error::Error::source(&err).is_some());
    }
}
