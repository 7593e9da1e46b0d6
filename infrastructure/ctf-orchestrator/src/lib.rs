pub mod artifact;
pub mod config;
pub mod deployer;
pub mod error;
pub mod instance;
pub mod ledger;
pub mod manager;
pub mod periodic;
pub mod retry;
pub mod sources;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod variant;

pub use config::{ChallengeConfig, SolveType};
pub use deployer::{DeployOptions, Deployer};
pub use error::{ChallengeError, ManagerError, Result};
pub use instance::{ChallengeDetails, ChallengeInstance, DeployStatus, PlayerWalletDetails};
pub use ledger::{DeployedContract, EthersLedger, LedgerClient};
pub use manager::{ChallengeManager, ManagerSettings};
pub use retry::RetryPolicy;
pub use sources::ChallengeSources;

// Re-exported so downstream crates build wallets and amounts with the same types.
pub use ethers::{
    signers::LocalWallet,
    types::{Address, U256},
};
