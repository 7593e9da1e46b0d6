use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, PendingTransaction, Provider},
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes,
        TransactionRequest, TxHash, U256, U64,
    },
};
use log::debug;
use std::{collections::HashMap, fmt::Display};
use tokio::sync::{Mutex, OnceCell};

use super::{LedgerClient, NetworkInfo, SubmittedTx, TxReceipt};
use crate::error::LedgerError;

/// [`LedgerClient`] over an HTTP JSON-RPC endpoint.
pub struct EthersLedger {
    provider: Provider<Http>,
    rpc_url: String,
    chain_id: OnceCell<u64>,
    // next nonce per sender, nonce fill and broadcast happen under this lock
    submission: Mutex<HashMap<Address, U256>>,
}

impl EthersLedger {
    pub fn connect(rpc_url: &str) -> Result<Self, LedgerError> {
        let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| {
            LedgerError::Transport(format!("Invalid RPC url {}, with error: {}", rpc_url, e))
        })?;
        Ok(Self {
            provider,
            rpc_url: rpc_url.to_string(),
            chain_id: OnceCell::new(),
            submission: Mutex::new(HashMap::new()),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.chain_id
            .get_or_try_init(|| async {
                let chain_id = self.provider.get_chainid().await.map_err(classify)?;
                Ok::<u64, LedgerError>(chain_id.as_u64())
            })
            .await
            .copied()
    }
}

/// Block the account nonce is read at. Counting pending transactions keeps
/// back to back broadcasts from reusing a nonce before the first is mined.
fn nonce_block() -> BlockId {
    BlockNumber::Pending.into()
}

/// The node's pending count, unless this process already used it.
fn next_nonce(pending: U256, tracked: Option<U256>) -> U256 {
    tracked.map_or(pending, |tracked| tracked.max(pending))
}

/// Maps node errors onto [`LedgerError`] by their message.
fn classify<E: Display>(err: E) -> LedgerError {
    let message = err.to_string();
    if message.to_lowercase().contains("insufficient funds") {
        LedgerError::InsufficientFunds(message)
    } else {
        LedgerError::Transport(message)
    }
}

#[async_trait]
impl LedgerClient for EthersLedger {
    async fn network_info(&self) -> Result<NetworkInfo, LedgerError> {
        debug!("Attempting to connect to RPC URL {} ...", self.rpc_url);
        let chain_id = self.provider.get_chainid().await.map_err(classify)?;
        let block_number = self.provider.get_block_number().await.map_err(classify)?;
        Ok(NetworkInfo {
            chain_id,
            block_number,
        })
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(classify)
    }

    async fn send_transaction(
        &self,
        signer: &LocalWallet,
        tx: TransactionRequest,
    ) -> Result<SubmittedTx, LedgerError> {
        let chain_id = self.chain_id().await?;
        let signer = signer.clone().with_chain_id(chain_id);
        let from = signer.address();
        let client = SignerMiddleware::new(self.provider.clone(), signer);

        let mut nonces = self.submission.lock().await;
        let pending_count = self
            .provider
            .get_transaction_count(from, Some(nonce_block()))
            .await
            .map_err(classify)?;
        let nonce = next_nonce(pending_count, nonces.get(&from).copied());

        let mut typed: TypedTransaction = tx.from(from).nonce(nonce).into();
        client
            .fill_transaction(&mut typed, Some(nonce_block()))
            .await
            .map_err(classify)?;

        let pending = client
            .send_transaction(typed, Some(nonce_block()))
            .await
            .map_err(classify)?;
        let hash = pending.tx_hash();
        nonces.insert(from, nonce + U256::one());
        debug!("Broadcast transaction {:?} from {:?} with nonce {}", hash, from, nonce);

        Ok(SubmittedTx { hash, from, nonce })
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, LedgerError> {
        let receipt = PendingTransaction::new(hash, &self.provider)
            .await
            .map_err(classify)?
            .ok_or(LedgerError::Dropped(hash))?;
        Ok(TxReceipt {
            hash,
            // pre-byzantium receipts carry no status
            success: receipt.status.map_or(true, |status| status == U64::one()),
            contract_address: receipt.contract_address,
        })
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.provider.call(&tx, None).await.map_err(classify)
    }
}
