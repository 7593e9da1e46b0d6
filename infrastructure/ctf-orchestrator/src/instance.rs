use ethers::{
    abi::Token,
    signers::{LocalWallet, Signer},
    types::{Address, H160, U256},
    utils::format_ether,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::Mutex;

use crate::{
    config::{ChallengeConfig, SolveType},
    deployer::{DeployOptions, Deployer},
    error::{ChallengeError, LedgerError, Result, WalletDrainError},
    ledger::{DeployedContract, LedgerClient, SubmittedTx},
    periodic::PeriodicTask,
    retry::RetryPolicy,
    variant::VariantRuntime,
};

/// Drained player funds are sent here.
pub const BURN_ADDRESS: Address = H160([0u8; 20]);

/// 0.01 ETH left in a drained wallet to pay for the drain itself.
pub fn drain_reserve() -> U256 {
    U256::exp10(16)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployStatus {
    NotDeployed,
    Deploying,
    Deployed,
    Failed,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDeployed => "NOT_DEPLOYED",
            Self::Deploying => "DEPLOYING",
            Self::Deployed => "DEPLOYED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::Failed)
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerWalletDetails {
    pub address: Address,
    pub private_key: String,
    pub balance: String,
}

/// Status surface of an instance, keyed the way the challenge dashboard
/// reads it. Wallet and contract fields are only present once the instance
/// is deployed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChallengeDetails {
    pub name: String,
    pub description: String,
    pub status: DeployStatus,
    #[serde(rename = "blockTime")]
    pub block_time: f64,
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_wallet: Option<PlayerWalletDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
}

/// Renders wei as ETH with trailing zeros removed, e.g. `2.0`.
pub fn format_eth(wei: U256) -> String {
    let mut formatted = format_ether(wei);
    if formatted.contains('.') {
        formatted.truncate(formatted.trim_end_matches('0').len());
        if formatted.ends_with('.') {
            formatted.push('0');
        }
    }
    formatted
}

struct InstanceState {
    status: DeployStatus,
    setup_contract: Option<DeployedContract>,
    challenge_address: Option<Address>,
}

#[derive(Default)]
struct Background {
    tasks: Vec<PeriodicTask>,
    // set once the instance has been reset, later tasks are refused
    retired: bool,
}

/// One deployment of a challenge, bound to a freshly generated player
/// wallet.
///
/// Status moves NOT_DEPLOYED -> DEPLOYING -> DEPLOYED | FAILED and never
/// back. Reads take a short lock and never wait on an in-flight setup.
pub struct ChallengeInstance {
    config: Arc<ChallengeConfig>,
    ledger: Arc<dyn LedgerClient>,
    deployer: Arc<Deployer>,
    retry_policy: RetryPolicy,
    player_wallet: LocalWallet,
    variant: VariantRuntime,
    state: RwLock<InstanceState>,
    background: Mutex<Background>,
}

impl ChallengeInstance {
    pub fn new(
        config: Arc<ChallengeConfig>,
        ledger: Arc<dyn LedgerClient>,
        deployer: Arc<Deployer>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let variant = VariantRuntime::new(config.variant());
        Self {
            config,
            ledger,
            deployer,
            retry_policy,
            player_wallet: LocalWallet::new(&mut rand::thread_rng()),
            variant,
            state: RwLock::new(InstanceState {
                status: DeployStatus::NotDeployed,
                setup_contract: None,
                challenge_address: None,
            }),
            background: Mutex::new(Background::default()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, InstanceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, InstanceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the setup sequence once. Whatever happens, the instance ends
    /// DEPLOYED or FAILED.
    pub async fn setup_challenge(&self) -> Result<()> {
        {
            let mut state = self.write_state();
            if state.status != DeployStatus::NotDeployed {
                return Err(ChallengeError::AlreadyStarted(state.status));
            }
            state.status = DeployStatus::Deploying;
        }
        info!("Deploying challenge {}", self.config.name());

        match self.run_setup().await {
            Ok(()) => {
                info!(
                    "Challenge {} deployed, player wallet {:?}",
                    self.config.name(),
                    self.player_address()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "There was an error deploying challenge {}, with error: {}",
                    self.config.name(),
                    e
                );
                self.mark_failed();
                Err(e)
            }
        }
    }

    async fn run_setup(&self) -> Result<()> {
        self.check_connectivity().await?;
        self.fund_player().await?;
        let setup_contract = self.deploy_setup_contract().await?;
        let challenge_address = self.resolve_challenge_address(&setup_contract).await?;

        if let Some(task) = self
            .variant
            .after_deploy(self.ledger.clone(), &self.deployer, challenge_address)
            .await?
        {
            self.adopt(task).await;
        }

        let mut state = self.write_state();
        state.setup_contract = Some(setup_contract);
        state.challenge_address = Some(challenge_address);
        state.status = DeployStatus::Deployed;
        Ok(())
    }

    async fn check_connectivity(&self) -> Result<()> {
        let network = self
            .retry_policy
            .run(|_| self.ledger.network_info())
            .await
            .map_err(|exhausted| ChallengeError::Connectivity {
                attempts: exhausted.attempts,
                source: exhausted.last,
            })?;
        debug!(
            "Connected to chain {} at block {}",
            network.chain_id, network.block_number
        );
        Ok(())
    }

    async fn fund_player(&self) -> Result<()> {
        info!(
            "Funding player wallet {:?} with {} ETH",
            self.player_address(),
            self.config.player_initial_balance()
        );
        self.fund_address(
            self.player_address(),
            self.config.player_initial_balance_wei(),
        )
        .await?;
        Ok(())
    }

    async fn deploy_setup_contract(&self) -> Result<DeployedContract> {
        let mut args = vec![Token::Address(self.player_address())];
        args.extend(self.variant.constructor_args());
        let options = DeployOptions::default()
            .with_value(self.config.contract_initial_balance_wei())
            .wait_for_confirmation();
        self.deployer
            .deploy_from_artifact(self.config.setup_contract_name(), args, options)
            .await
            .map_err(ChallengeError::Deployment)
    }

    async fn resolve_challenge_address(&self, setup: &DeployedContract) -> Result<Address> {
        if !setup.has_function("challenge") {
            return Err(ChallengeError::MalformedSetupContract(format!(
                "{} does not expose challenge()",
                setup.name()
            )));
        }
        let output = self.ledger.call_function(setup, "challenge", vec![]).await?;
        match output.as_slice() {
            [Token::Address(address)] => Ok(*address),
            other => Err(ChallengeError::MalformedSetupContract(format!(
                "challenge() returned {:?}, expected a single address",
                other
            ))),
        }
    }

    async fn adopt(&self, task: PeriodicTask) {
        let mut background = self.background.lock().await;
        if background.retired {
            warn!(
                "Challenge was reset during setup, stopping background task {}",
                task.name()
            );
            task.cancel().await;
        } else {
            background.tasks.push(task);
        }
    }

    /// Forces a non-deployed instance to FAILED. Returns false when the
    /// instance had already reached DEPLOYED.
    pub fn mark_failed(&self) -> bool {
        let mut state = self.write_state();
        if state.status == DeployStatus::Deployed {
            return false;
        }
        state.status = DeployStatus::Failed;
        true
    }

    pub async fn is_challenge_solved(&self) -> Result<bool> {
        match self.config.solve_type() {
            SolveType::Event => Err(ChallengeError::UnsupportedSolveType(SolveType::Event)),
            SolveType::Function => {
                let setup = self.setup_contract()?;
                if !setup.has_function("isSolved") {
                    return Err(ChallengeError::MalformedSetupContract(format!(
                        "{} does not expose isSolved()",
                        setup.name()
                    )));
                }
                let output = self.ledger.call_function(&setup, "isSolved", vec![]).await?;
                match output.as_slice() {
                    [Token::Bool(solved)] => Ok(*solved),
                    other => Err(ChallengeError::MalformedSetupContract(format!(
                        "isSolved() returned {:?}, expected a single bool",
                        other
                    ))),
                }
            }
        }
    }

    /// Stops background work, then tries to empty the player wallet. Never
    /// fails: drain problems are only logged.
    pub async fn reset_challenge(&self) {
        info!("Resetting challenge {}", self.config.name());
        self.cancel_background().await;
        match self.drain_player_wallet().await {
            Ok(submitted) => debug!(
                "Player wallet drained in transaction {:?}",
                submitted.hash
            ),
            Err(e) => warn!(
                "Failed to drain player wallet {:?}, with error: {}",
                self.player_address(),
                e
            ),
        }
    }

    /// Sends everything above [`drain_reserve`] to [`BURN_ADDRESS`].
    pub async fn drain_player_wallet(&self) -> Result<SubmittedTx, WalletDrainError> {
        let balance = self.ledger.balance(self.player_address()).await?;
        let reserve = drain_reserve();
        if balance <= reserve {
            return Err(WalletDrainError::InsufficientBalance { balance, reserve });
        }
        let submitted = self
            .ledger
            .send_value(&self.player_wallet, BURN_ADDRESS, balance - reserve)
            .await?;
        Ok(submitted)
    }

    /// Cancels every background task and refuses new ones. Returns once no
    /// task invocation is running.
    pub async fn cancel_background(&self) {
        let mut background = self.background.lock().await;
        background.retired = true;
        for task in background.tasks.drain(..) {
            task.cancel().await;
        }
    }

    #[cfg(any(test, feature = "testing"))]
    pub async fn background_task_count(&self) -> usize {
        self.background.lock().await.tasks.len()
    }

    pub fn status(&self) -> DeployStatus {
        self.read_state().status
    }

    pub fn is_deployed(&self) -> bool {
        self.status() == DeployStatus::Deployed
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn flag(&self) -> &str {
        self.config.flag()
    }

    pub fn player_address(&self) -> Address {
        self.player_wallet.address()
    }

    /// `0x` prefixed hex of the player's secret key.
    pub fn player_private_key(&self) -> String {
        format!("0x{}", hex::encode(self.player_wallet.signer().to_bytes()))
    }

    pub fn challenge_address(&self) -> Option<Address> {
        self.read_state().challenge_address
    }

    pub fn setup_contract(&self) -> Result<DeployedContract> {
        let state = self.read_state();
        match (&state.setup_contract, state.status) {
            (Some(contract), DeployStatus::Deployed) => Ok(contract.clone()),
            (_, status) => Err(ChallengeError::NotAvailable {
                what: "Setup contract",
                status,
            }),
        }
    }

    /// Zero for a wallet that has never been funded.
    pub async fn player_balance(&self) -> Result<U256> {
        self.address_balance(self.player_address()).await
    }

    pub async fn address_balance(&self, address: Address) -> Result<U256> {
        Ok(self.ledger.balance(address).await?)
    }

    pub async fn challenge_contract_balance(&self) -> Result<U256> {
        let address = self
            .challenge_address()
            .ok_or_else(|| ChallengeError::NotAvailable {
                what: "Challenge contract",
                status: self.status(),
            })?;
        self.address_balance(address).await
    }

    /// Sends `amount` wei from the deployer to `address` and waits for it.
    pub async fn fund_address(&self, address: Address, amount: U256) -> Result<SubmittedTx> {
        let submitted = self
            .deployer
            .fund_address(address, amount)
            .await
            .map_err(ChallengeError::Funding)?;
        let receipt = self
            .ledger
            .wait_for_receipt(submitted.hash)
            .await
            .map_err(ChallengeError::Funding)?;
        if !receipt.success {
            return Err(ChallengeError::Funding(LedgerError::Reverted(receipt.hash)));
        }
        Ok(submitted)
    }

    pub async fn details(&self, rpc_url: &str) -> Result<ChallengeDetails> {
        let (status, contract_address) = {
            let state = self.read_state();
            (state.status, state.challenge_address)
        };

        let (player_wallet, contract_address) = if status == DeployStatus::Deployed {
            let balance = self.player_balance().await?;
            let wallet = PlayerWalletDetails {
                address: self.player_address(),
                private_key: self.player_private_key(),
                balance: format!("{} ETH", format_eth(balance)),
            };
            (Some(wallet), contract_address)
        } else {
            (None, None)
        };

        Ok(ChallengeDetails {
            name: self.config.name().to_string(),
            description: self.config.description().to_string(),
            status,
            block_time: self.config.block_time(),
            rpc_url: rpc_url.to_string(),
            player_wallet,
            contract_address,
        })
    }
}
