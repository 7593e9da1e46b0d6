use ethers::{types::U256, utils::parse_ether};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};

use crate::{error::ConfigError, variant::ChallengeVariant};

pub const DEFAULT_PLAYER_INITIAL_BALANCE: &str = "1";
pub const DEFAULT_CONTRACT_INITIAL_BALANCE: &str = "0";

/// How a challenge decides whether it has been solved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveType {
    Function,
    Event,
}

impl SolveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for SolveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Balances may be written as yaml numbers or strings.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    fn into_text(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

/// `variant:` section of the challenge document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VariantConfig {
    pub kind: String,
    pub interval_secs: Option<u64>,
    pub runner_balance: Option<RawAmount>,
    pub method: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawChallengeConfig {
    challenge_name: String,
    challenge_description: String,
    setup_contract_name: String,
    flag: String,
    block_time: f64,

    challenge_source_files: Option<Vec<String>>,
    player_initial_balance: Option<RawAmount>,
    contract_initial_balance: Option<RawAmount>,
    enable_faucet: Option<bool>,
    challenge_solve_type: Option<String>,
    variant: Option<VariantConfig>,
}

/// Immutable, validated description of a challenge.
#[derive(Clone, Debug)]
pub struct ChallengeConfig {
    name: String,
    description: String,
    setup_contract_name: String,
    flag: String,
    block_time: f64,
    source_files: Vec<String>,
    player_initial_balance: String,
    player_initial_balance_wei: U256,
    contract_initial_balance: String,
    contract_initial_balance_wei: U256,
    faucet_enabled: bool,
    solve_type: SolveType,
    variant: ChallengeVariant,
}

impl ChallengeConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawChallengeConfig = serde_yaml::from_str(contents)?;
        Self::validate(raw)
    }

    fn validate(raw: RawChallengeConfig) -> Result<Self, ConfigError> {
        if !raw.block_time.is_finite() || raw.block_time < 0.0 {
            return Err(ConfigError::invalid_field(
                "block_time",
                "must be a non-negative number",
            ));
        }

        let (player_initial_balance, player_initial_balance_wei) = positive_or_default(
            "player_initial_balance",
            raw.player_initial_balance,
            DEFAULT_PLAYER_INITIAL_BALANCE,
        )?;
        // an explicit zero is accepted here, it means no value on deployment
        let (contract_initial_balance, contract_initial_balance_wei) = amount_or_default(
            "contract_initial_balance",
            raw.contract_initial_balance,
            DEFAULT_CONTRACT_INITIAL_BALANCE,
        )?;

        let solve_type = match raw.challenge_solve_type.as_deref() {
            None | Some("function") => SolveType::Function,
            Some("event") => SolveType::Event,
            Some(other) => {
                return Err(ConfigError::invalid_field(
                    "challenge_solve_type",
                    format!("expected `function` or `event`, found `{}`", other),
                ))
            }
        };

        let variant = ChallengeVariant::from_config(raw.variant.as_ref())?;

        Ok(Self {
            name: raw.challenge_name,
            description: raw.challenge_description,
            setup_contract_name: raw.setup_contract_name,
            flag: raw.flag,
            block_time: raw.block_time,
            source_files: raw.challenge_source_files.unwrap_or_default(),
            player_initial_balance,
            player_initial_balance_wei,
            contract_initial_balance,
            contract_initial_balance_wei,
            faucet_enabled: raw.enable_faucet.unwrap_or(false),
            solve_type,
            variant,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn setup_contract_name(&self) -> &str {
        &self.setup_contract_name
    }

    pub fn flag(&self) -> &str {
        &self.flag
    }

    pub fn block_time(&self) -> f64 {
        self.block_time
    }

    pub fn source_files(&self) -> &[String] {
        &self.source_files
    }

    /// Player funding in ETH, as written in the config.
    pub fn player_initial_balance(&self) -> &str {
        &self.player_initial_balance
    }

    pub fn player_initial_balance_wei(&self) -> U256 {
        self.player_initial_balance_wei
    }

    pub fn contract_initial_balance(&self) -> &str {
        &self.contract_initial_balance
    }

    pub fn contract_initial_balance_wei(&self) -> U256 {
        self.contract_initial_balance_wei
    }

    pub fn faucet_enabled(&self) -> bool {
        self.faucet_enabled
    }

    pub fn solve_type(&self) -> SolveType {
        self.solve_type
    }

    pub fn variant(&self) -> &ChallengeVariant {
        &self.variant
    }
}

/// Parses an ETH-denominated decimal amount into wei.
pub fn parse_amount(field: &'static str, amount: &str) -> Result<U256, ConfigError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(ConfigError::invalid_field(field, "amount is empty"));
    }
    if amount.starts_with('-') {
        return Err(ConfigError::invalid_field(
            field,
            format!("`{}` is negative", amount),
        ));
    }
    parse_ether(amount).map_err(|e| {
        ConfigError::invalid_field(field, format!("`{}` is not a decimal amount: {}", amount, e))
    })
}

// Optional balances must be strictly positive when present.
pub(crate) fn positive_or_default(
    field: &'static str,
    raw: Option<RawAmount>,
    default: &str,
) -> Result<(String, U256), ConfigError> {
    let explicit = raw.is_some();
    let (text, wei) = amount_or_default(field, raw, default)?;
    if explicit && wei.is_zero() {
        return Err(ConfigError::invalid_field(field, "must be positive"));
    }
    Ok((text, wei))
}

fn amount_or_default(
    field: &'static str,
    raw: Option<RawAmount>,
    default: &str,
) -> Result<(String, U256), ConfigError> {
    let text = raw.map_or_else(|| default.to_string(), RawAmount::into_text);
    let wei = parse_amount(field, &text)?;
    Ok((text, wei))
}
