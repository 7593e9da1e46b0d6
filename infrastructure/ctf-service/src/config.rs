use ctf_orchestrator::{ManagerSettings, RetryPolicy};
use ethers::signers::LocalWallet;
use log::warn;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Result, ServiceError};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";
pub const DEFAULT_CONFIG_FILE_NAME: &str = "challenge.yaml";
/// Publicly known development key, only acceptable on a local chain.
pub const DEFAULT_DEPLOYER_PRIVATE_KEY: &str =
    "35d7e3183bbe3e89907724a7c50a1e3f7207af30d169812534558f3591e27b30";

/// Process settings, read once at startup.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    socket_address: SocketAddr,
    rpc_url: String,
    external_rpc_url: String,
    root_dir: PathBuf,
    config_file_name: String,
    contract_abi_dir: PathBuf,
    contract_dir: PathBuf,
    deployer_private_key: String,
    flag_override: Option<String>,
    connect_max_attempts: u32,
    setup_timeout: Option<Duration>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from `lookup`, which maps a variable name to its
    /// value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        let port = match var("PORT") {
            Some(port) => parse_var("PORT", &port)?,
            None => DEFAULT_PORT,
        };
        let host = match var("HOST") {
            Some(host) => parse_var::<IpAddr>("HOST", &host)?,
            None => config.socket_address.ip(),
        };
        config.socket_address = SocketAddr::new(host, port);

        if let Some(rpc_url) = var("BLOCKCHAIN_RPC_URL") {
            config.rpc_url = rpc_url;
        }
        config.external_rpc_url = var("EXTERNAL_RPC_URL").unwrap_or_else(|| config.rpc_url.clone());

        if let Some(root_dir) = var("ROOT_DIR") {
            config.root_dir = PathBuf::from(root_dir);
        }
        if let Some(name) = var("CONFIG_FILE_NAME") {
            config.config_file_name = name;
        }
        config.contract_abi_dir = var("CONTRACT_ABI_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| config.root_dir.join("build/contracts"));
        config.contract_dir = var("CONTRACT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| config.root_dir.join("contracts"));

        match var("DEPLOYER_PRIVATE_KEY") {
            Some(key) => config.deployer_private_key = key,
            None => warn!(
                "Unable to read DEPLOYER_PRIVATE_KEY from environment variables. Using the default private key, \
                 it is strongly recommended to use a newly generated private key"
            ),
        }
        config.flag_override = var("FLAG");

        if let Some(attempts) = var("CONNECT_MAX_ATTEMPTS") {
            config.connect_max_attempts = parse_var("CONNECT_MAX_ATTEMPTS", &attempts)?;
        }
        if let Some(secs) = var("SETUP_TIMEOUT_SECS") {
            config.setup_timeout = Some(Duration::from_secs(parse_var(
                "SETUP_TIMEOUT_SECS",
                &secs,
            )?));
        }

        Ok(config)
    }

    pub fn socket_address(&self) -> SocketAddr {
        self.socket_address
    }

    /// Node the service itself talks to.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Node URL handed to players.
    pub fn external_rpc_url(&self) -> &str {
        &self.external_rpc_url
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn challenge_config_path(&self) -> PathBuf {
        self.root_dir.join(&self.config_file_name)
    }

    pub fn contract_abi_dir(&self) -> &Path {
        &self.contract_abi_dir
    }

    pub fn contract_dir(&self) -> &Path {
        &self.contract_dir
    }

    pub fn flag_override(&self) -> Option<&str> {
        self.flag_override.as_deref()
    }

    pub fn deployer_wallet(&self) -> Result<LocalWallet> {
        self.deployer_private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ServiceError::InvalidDeployerKey(e.to_string()))
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            retry_policy: RetryPolicy::new(
                self.connect_max_attempts,
                RetryPolicy::DEFAULT_BASE_DELAY,
                RetryPolicy::DEFAULT_MULTIPLIER,
            ),
            setup_timeout: self.setup_timeout,
            source_dir: self.contract_dir.clone(),
        }
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ServiceError::InvalidEnv {
            name,
            reason: format!("`{}`: {}", value, e),
        })
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let root_dir = PathBuf::from(".");
        Self {
            socket_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            external_rpc_url: DEFAULT_RPC_URL.to_string(),
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
            contract_abi_dir: root_dir.join("build/contracts"),
            contract_dir: root_dir.join("contracts"),
            root_dir,
            deployer_private_key: DEFAULT_DEPLOYER_PRIVATE_KEY.to_string(),
            flag_override: None,
            connect_max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            setup_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.socket_address(), "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.rpc_url(), DEFAULT_RPC_URL);
        assert_eq!(config.external_rpc_url(), DEFAULT_RPC_URL);
        assert_eq!(config.challenge_config_path(), Path::new("./challenge.yaml"));
        assert_eq!(config.contract_abi_dir(), Path::new("./build/contracts"));
        assert_eq!(config.flag_override(), None);
        assert!(config.manager_settings().setup_timeout.is_none());
        assert_eq!(config.manager_settings().retry_policy, RetryPolicy::default());
        assert!(config.deployer_wallet().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("HOST", "0.0.0.0"),
            ("BLOCKCHAIN_RPC_URL", "http://anvil:8545"),
            ("ROOT_DIR", "/srv/challenge"),
            ("CONTRACT_DIR", "/srv/src"),
            ("FLAG", "DUCTF{real}"),
            ("CONNECT_MAX_ATTEMPTS", "4"),
            ("SETUP_TIMEOUT_SECS", "120"),
        ]))
        .unwrap();

        assert_eq!(config.socket_address(), "0.0.0.0:8080".parse().unwrap());
        // external url follows the internal one unless set
        assert_eq!(config.external_rpc_url(), "http://anvil:8545");
        assert_eq!(
            config.challenge_config_path(),
            Path::new("/srv/challenge/challenge.yaml")
        );
        assert_eq!(
            config.contract_abi_dir(),
            Path::new("/srv/challenge/build/contracts")
        );
        assert_eq!(config.contract_dir(), Path::new("/srv/src"));
        assert_eq!(config.flag_override(), Some("DUCTF{real}"));

        let settings = config.manager_settings();
        assert_eq!(settings.retry_policy.max_attempts(), 4);
        assert_eq!(settings.setup_timeout, Some(Duration::from_secs(120)));
        assert_eq!(settings.source_dir, PathBuf::from("/srv/src"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&[("PORT", "http")])),
            Err(ServiceError::InvalidEnv { name: "PORT", .. })
        ));
        let config =
            ServiceConfig::from_lookup(lookup(&[("DEPLOYER_PRIVATE_KEY", "0xnothex")])).unwrap();
        assert!(matches!(
            config.deployer_wallet(),
            Err(ServiceError::InvalidDeployerKey(_))
        ));
    }
}
