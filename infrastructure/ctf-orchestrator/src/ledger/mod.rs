//! Narrow client interface over a blockchain RPC endpoint.

mod ethers_client;

pub use ethers_client::EthersLedger;

use async_trait::async_trait;
use ethers::{
    abi::{Abi, Function, Token},
    signers::LocalWallet,
    types::{Address, Bytes, TransactionRequest, TxHash, U256, U64},
    utils::get_contract_address,
};
use serde::Serialize;

use crate::error::LedgerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub chain_id: U256,
    pub block_number: U64,
}

/// A transaction accepted by the node, not necessarily mined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmittedTx {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: U256,
}

impl SubmittedTx {
    /// Address a contract creation sent in this transaction ends up at.
    pub fn created_address(&self) -> Address {
        get_contract_address(self.from, self.nonce)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: TxHash,
    pub success: bool,
    pub contract_address: Option<Address>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn network_info(&self) -> Result<NetworkInfo, LedgerError>;

    async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

    /// Signs `tx` with `signer` and broadcasts it.
    async fn send_transaction(
        &self,
        signer: &LocalWallet,
        tx: TransactionRequest,
    ) -> Result<SubmittedTx, LedgerError>;

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, LedgerError>;

    /// Read-only call against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError>;

    async fn send_value(
        &self,
        signer: &LocalWallet,
        to: Address,
        amount: U256,
    ) -> Result<SubmittedTx, LedgerError> {
        self.send_transaction(signer, TransactionRequest::new().to(to).value(amount))
            .await
    }

    async fn call_function(
        &self,
        contract: &DeployedContract,
        method: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>, LedgerError> {
        let function = contract.function(method)?;
        let data = encode_call(function, &args)?;
        let output = self.call(contract.address(), data).await?;
        function
            .decode_output(output.as_ref())
            .map_err(|e| LedgerError::Abi(format!("Failed to decode {} output: {}", method, e)))
    }

    async fn send_function(
        &self,
        signer: &LocalWallet,
        contract: &DeployedContract,
        method: &str,
        args: Vec<Token>,
    ) -> Result<SubmittedTx, LedgerError> {
        let function = contract.function(method)?;
        let data = encode_call(function, &args)?;
        self.send_transaction(
            signer,
            TransactionRequest::new().to(contract.address()).data(data),
        )
        .await
    }
}

fn encode_call(function: &Function, args: &[Token]) -> Result<Bytes, LedgerError> {
    function
        .encode_input(args)
        .map(Bytes::from)
        .map_err(|e| LedgerError::Abi(format!("Failed to encode {} call: {}", function.name, e)))
}

/// Handle to a contract on chain.
///
/// Contracts deployed from raw bytecode carry an empty ABI: they are
/// address-only and any function call on them fails with
/// [`LedgerError::MissingFunction`].
#[derive(Clone, Debug, PartialEq)]
pub struct DeployedContract {
    name: String,
    address: Address,
    abi: Abi,
    deploy_tx: Option<TxHash>,
}

impl DeployedContract {
    pub fn new(name: &str, address: Address, abi: Abi) -> Self {
        Self {
            name: name.to_string(),
            address,
            abi,
            deploy_tx: None,
        }
    }

    pub fn address_only(name: &str, address: Address) -> Self {
        Self::new(name, address, Abi::default())
    }

    pub fn with_deploy_tx(mut self, tx: TxHash) -> Self {
        self.deploy_tx = Some(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn deploy_tx(&self) -> Option<TxHash> {
        self.deploy_tx
    }

    pub fn has_function(&self, method: &str) -> bool {
        self.abi.functions.contains_key(method)
    }

    pub fn function(&self, method: &str) -> Result<&Function, LedgerError> {
        self.abi
            .function(method)
            .map_err(|_| LedgerError::MissingFunction {
                contract: self.name.clone(),
                method: method.to_string(),
            })
    }
}
