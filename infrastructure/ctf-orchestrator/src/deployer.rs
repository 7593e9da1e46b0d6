use ethers::{
    abi::Token,
    signers::{LocalWallet, Signer},
    types::{Address, TransactionRequest, U256},
};
use log::{error, info};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    artifact::{decode_hex, ArtifactStore},
    error::{DeployerError, LedgerError},
    ledger::{DeployedContract, LedgerClient, SubmittedTx},
};

#[derive(Clone, Debug, Default)]
pub struct DeployOptions {
    artifact_path: Option<PathBuf>,
    wait_for_confirmation: bool,
    value: U256,
}

impl DeployOptions {
    /// Load the artifact from this path, relative to the artifact directory.
    pub fn with_artifact_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.artifact_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Block until the deployment is mined. Needed when a later step reads the
    /// deployed code.
    pub fn wait_for_confirmation(mut self) -> Self {
        self.wait_for_confirmation = true;
        self
    }

    /// Wei sent along with the constructor.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// Deploys contracts and pays for provisioning with the deployer wallet.
pub struct Deployer {
    ledger: Arc<dyn LedgerClient>,
    wallet: LocalWallet,
    artifacts: ArtifactStore,
}

impl Deployer {
    pub fn new(ledger: Arc<dyn LedgerClient>, wallet: LocalWallet, artifacts: ArtifactStore) -> Self {
        Self {
            ledger,
            wallet,
            artifacts,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub async fn deploy_from_artifact(
        &self,
        name: &str,
        args: Vec<Token>,
        options: DeployOptions,
    ) -> Result<DeployedContract, DeployerError> {
        let artifact = self
            .artifacts
            .load(name, options.artifact_path.as_deref())
            .await?;
        let data = artifact
            .deployment_data(&args)
            .map_err(|reason| DeployerError::Encoding {
                name: name.to_string(),
                reason,
            })?;

        info!("Deploying new contract called {}", name);
        let tx = TransactionRequest::new().data(data).value(options.value);
        let submitted = self.submit(name, tx).await?;

        let address = if options.wait_for_confirmation {
            self.confirm(name, &submitted).await?
        } else {
            submitted.created_address()
        };
        info!(
            "Successfully deployed contract {} at address: {:?}",
            name, address
        );

        Ok(DeployedContract::new(name, address, artifact.abi().clone()).with_deploy_tx(submitted.hash))
    }

    /// Deploys raw creation code. The returned handle has no ABI, so it can
    /// only be used for its address.
    pub async fn deploy_from_bytecode(
        &self,
        name: &str,
        bytecode_hex: &str,
    ) -> Result<DeployedContract, DeployerError> {
        let bytecode = decode_hex(bytecode_hex).map_err(|reason| DeployerError::Encoding {
            name: name.to_string(),
            reason,
        })?;

        info!("Deploying new contract called {}", name);
        let submitted = self
            .submit(name, TransactionRequest::new().data(bytecode))
            .await?;
        let address = self.confirm(name, &submitted).await?;
        info!(
            "Successfully deployed new contract called {} at {:?}",
            name, address
        );

        Ok(DeployedContract::address_only(name, address).with_deploy_tx(submitted.hash))
    }

    /// Signs and broadcasts `tx` from the deployer wallet. Errors are passed
    /// through untouched; nothing is retried.
    pub async fn send_transaction(&self, tx: TransactionRequest) -> Result<SubmittedTx, LedgerError> {
        self.ledger.send_transaction(&self.wallet, tx).await
    }

    pub async fn fund_address(&self, to: Address, amount: U256) -> Result<SubmittedTx, LedgerError> {
        self.ledger.send_value(&self.wallet, to, amount).await
    }

    async fn submit(&self, name: &str, tx: TransactionRequest) -> Result<SubmittedTx, DeployerError> {
        self.send_transaction(tx).await.map_err(|source| {
            error!("There was an error deploying {}, with error: {}", name, source);
            DeployerError::Submission {
                name: name.to_string(),
                source,
            }
        })
    }

    async fn confirm(&self, name: &str, submitted: &SubmittedTx) -> Result<Address, DeployerError> {
        let receipt = self
            .ledger
            .wait_for_receipt(submitted.hash)
            .await
            .map_err(|source| DeployerError::Submission {
                name: name.to_string(),
                source,
            })?;
        if !receipt.success {
            return Err(DeployerError::Reverted {
                name: name.to_string(),
                tx: receipt.hash,
            });
        }
        receipt
            .contract_address
            .ok_or_else(|| DeployerError::MissingAddress {
                name: name.to_string(),
            })
    }
}
