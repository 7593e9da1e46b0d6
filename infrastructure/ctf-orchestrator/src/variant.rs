//! Challenge variants.
//!
//! A variant is picked once, from the `variant.kind` key of the challenge
//! document, and decides what extra work an instance does around the common
//! setup sequence. `standard` does nothing extra. `rotating_secret` hands the
//! setup contract the hash of a random secret and, once deployed, keeps
//! rotating that secret from a dedicated runner wallet on a fixed interval.

use ethers::{
    abi::{parse_abi, Token},
    signers::LocalWallet,
    types::{Address, U256},
    utils::keccak256,
};
use log::{debug, info};
use rand::Rng;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::{
    config::{positive_or_default, VariantConfig},
    deployer::Deployer,
    error::{ChallengeError, ConfigError, LedgerError},
    ledger::{DeployedContract, LedgerClient},
    periodic::PeriodicTask,
};

pub const STANDARD: &str = "standard";
pub const ROTATING_SECRET: &str = "rotating_secret";

const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 60;
const DEFAULT_RUNNER_BALANCE: &str = "100";
const DEFAULT_ROTATION_METHOD: &str = "createLogEntry";
const DEFAULT_ROTATION_MESSAGE: &str = "Yep pretty good day today";
const SECRET_LENGTH: usize = 30;

type VariantBuilder = fn(&VariantConfig) -> Result<ChallengeVariant, ConfigError>;

/// Registered variant kinds.
const VARIANTS: &[(&str, VariantBuilder)] = &[
    (STANDARD, build_standard),
    (ROTATING_SECRET, build_rotating_secret),
];

pub fn registered_kinds() -> impl Iterator<Item = &'static str> {
    VARIANTS.iter().map(|(kind, _)| *kind)
}

fn lookup(kind: &str) -> Option<VariantBuilder> {
    VARIANTS
        .iter()
        .find(|(registered, _)| *registered == kind)
        .map(|(_, builder)| *builder)
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChallengeVariant {
    Standard,
    RotatingSecret(RotatingSecret),
}

impl ChallengeVariant {
    pub fn from_config(config: Option<&VariantConfig>) -> Result<Self, ConfigError> {
        let Some(config) = config else {
            return Ok(Self::Standard);
        };
        let builder = lookup(&config.kind).ok_or_else(|| {
            ConfigError::invalid_field(
                "variant.kind",
                format!(
                    "unknown variant `{}`, expected one of: {}",
                    config.kind,
                    registered_kinds().collect::<Vec<_>>().join(", ")
                ),
            )
        })?;
        builder(config)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Standard => STANDARD,
            Self::RotatingSecret(_) => ROTATING_SECRET,
        }
    }
}

fn build_standard(_config: &VariantConfig) -> Result<ChallengeVariant, ConfigError> {
    Ok(ChallengeVariant::Standard)
}

fn build_rotating_secret(config: &VariantConfig) -> Result<ChallengeVariant, ConfigError> {
    let interval_secs = config
        .interval_secs
        .unwrap_or(DEFAULT_ROTATION_INTERVAL_SECS);
    if interval_secs == 0 {
        return Err(ConfigError::invalid_field(
            "variant.interval_secs",
            "must be positive",
        ));
    }
    let (runner_balance, runner_balance_wei) = positive_or_default(
        "variant.runner_balance",
        config.runner_balance.clone(),
        DEFAULT_RUNNER_BALANCE,
    )?;
    let method = config
        .method
        .clone()
        .unwrap_or_else(|| DEFAULT_ROTATION_METHOD.to_string());
    let signature = format!("function {}(string,string,bytes32)", method);
    let rotation = parse_abi(&[signature.as_str()])
        .map_err(|e| ConfigError::invalid_field("variant.method", e.to_string()))?;

    Ok(ChallengeVariant::RotatingSecret(RotatingSecret {
        interval: Duration::from_secs(interval_secs),
        runner_balance,
        runner_balance_wei,
        method,
        message: config
            .message
            .clone()
            .unwrap_or_else(|| DEFAULT_ROTATION_MESSAGE.to_string()),
        rotation_abi: rotation,
    }))
}

#[derive(Clone, Debug, PartialEq)]
pub struct RotatingSecret {
    interval: Duration,
    runner_balance: String,
    runner_balance_wei: U256,
    method: String,
    message: String,
    rotation_abi: ethers::abi::Abi,
}

impl RotatingSecret {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn runner_balance(&self) -> &str {
        &self.runner_balance
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(SECRET_LENGTH)
        .map(char::from)
        .collect()
}

pub fn secret_hash(secret: &str) -> [u8; 32] {
    keccak256(secret.as_bytes())
}

/// Per-instance state of a variant: created with the instance, discarded
/// with it.
pub(crate) enum VariantRuntime {
    Standard,
    RotatingSecret {
        params: RotatingSecret,
        secret: Arc<Mutex<String>>,
        runner: LocalWallet,
    },
}

impl VariantRuntime {
    pub(crate) fn new(variant: &ChallengeVariant) -> Self {
        match variant {
            ChallengeVariant::Standard => Self::Standard,
            ChallengeVariant::RotatingSecret(params) => Self::RotatingSecret {
                params: params.clone(),
                secret: Arc::new(Mutex::new(generate_secret())),
                runner: LocalWallet::new(&mut rand::thread_rng()),
            },
        }
    }

    /// Arguments appended after the player address in the setup contract
    /// constructor.
    pub(crate) fn constructor_args(&self) -> Vec<Token> {
        match self {
            Self::Standard => vec![],
            Self::RotatingSecret { secret, .. } => {
                let secret = secret.lock().unwrap_or_else(PoisonError::into_inner);
                vec![Token::FixedBytes(secret_hash(&secret).to_vec())]
            }
        }
    }

    pub(crate) fn current_secret(&self) -> Option<String> {
        match self {
            Self::Standard => None,
            Self::RotatingSecret { secret, .. } => Some(
                secret
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
        }
    }

    /// Runs once the challenge address is known. Returns the background task
    /// the instance must own, if any.
    pub(crate) async fn after_deploy(
        &self,
        ledger: Arc<dyn LedgerClient>,
        deployer: &Deployer,
        challenge_address: Address,
    ) -> Result<Option<PeriodicTask>, ChallengeError> {
        let Self::RotatingSecret {
            params,
            secret,
            runner,
        } = self
        else {
            return Ok(None);
        };

        info!(
            "Funding secret runner {:?} with {} ETH",
            runner_address(runner),
            params.runner_balance
        );
        let funding = deployer
            .fund_address(runner_address(runner), params.runner_balance_wei)
            .await
            .map_err(ChallengeError::Funding)?;
        let receipt = ledger
            .wait_for_receipt(funding.hash)
            .await
            .map_err(ChallengeError::Funding)?;
        if !receipt.success {
            return Err(ChallengeError::Funding(LedgerError::Reverted(receipt.hash)));
        }

        let target = DeployedContract::new(
            "challenge",
            challenge_address,
            params.rotation_abi.clone(),
        );
        let rotation = Rotation {
            ledger,
            target,
            runner: runner.clone(),
            secret: secret.clone(),
            method: params.method.clone(),
            message: params.message.clone(),
        };
        let task = PeriodicTask::start("secret-rotation", params.interval, move || {
            let rotation = rotation.clone();
            async move { rotation.rotate().await }
        });
        Ok(Some(task))
    }
}

fn runner_address(runner: &LocalWallet) -> Address {
    ethers::signers::Signer::address(runner)
}

#[derive(Clone)]
struct Rotation {
    ledger: Arc<dyn LedgerClient>,
    target: DeployedContract,
    runner: LocalWallet,
    secret: Arc<Mutex<String>>,
    method: String,
    message: String,
}

impl Rotation {
    async fn rotate(&self) -> Result<(), LedgerError> {
        debug!("Attempting to create new log entry");
        let current = self
            .secret
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let next = generate_secret();

        let submitted = self
            .ledger
            .send_function(
                &self.runner,
                &self.target,
                &self.method,
                vec![
                    Token::String(self.message.clone()),
                    Token::String(current),
                    Token::FixedBytes(secret_hash(&next).to_vec()),
                ],
            )
            .await?;
        let receipt = self.ledger.wait_for_receipt(submitted.hash).await?;
        if !receipt.success {
            return Err(LedgerError::Reverted(receipt.hash));
        }

        *self.secret.lock().unwrap_or_else(PoisonError::into_inner) = next;
        debug!("Secret rotated in transaction {:?}", receipt.hash);
        Ok(())
    }
}
