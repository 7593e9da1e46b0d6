//! In-memory ledger and fixtures for exercising challenge lifecycles without
//! a node.

use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    signers::{LocalWallet, Signer},
    types::{Address, Bytes, TransactionRequest, TxHash, H160, H256, U256, U64},
    utils::{get_contract_address, id, keccak256},
};
use rand::Rng;
use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::Semaphore;

use crate::{
    artifact::ArtifactStore,
    config::ChallengeConfig,
    deployer::Deployer,
    error::{ConfigError, LedgerError},
    instance::ChallengeInstance,
    ledger::{LedgerClient, NetworkInfo, SubmittedTx, TxReceipt},
    retry::RetryPolicy,
};

pub const FAKE_CHAIN_ID: u64 = 31337;

/// Creation code used by every fixture artifact.
pub const SETUP_BYTECODE: &str = "6080604052348015600f57600080fd5b50";

pub const SETUP_ABI: &str = r#"[
    {"type": "constructor", "stateMutability": "payable", "inputs": [
        {"name": "player", "type": "address", "internalType": "address"}
    ]},
    {"type": "function", "name": "challenge", "stateMutability": "view", "inputs": [], "outputs": [
        {"name": "", "type": "address", "internalType": "contract Challenge"}
    ]},
    {"type": "function", "name": "isSolved", "stateMutability": "view", "inputs": [], "outputs": [
        {"name": "", "type": "bool", "internalType": "bool"}
    ]}
]"#;

/// Setup contract taking the hash of the first rotating secret.
pub const ROTATING_SETUP_ABI: &str = r#"[
    {"type": "constructor", "stateMutability": "payable", "inputs": [
        {"name": "player", "type": "address", "internalType": "address"},
        {"name": "secretHash", "type": "bytes32", "internalType": "bytes32"}
    ]},
    {"type": "function", "name": "challenge", "stateMutability": "view", "inputs": [], "outputs": [
        {"name": "", "type": "address", "internalType": "contract PrivateLog"}
    ]},
    {"type": "function", "name": "isSolved", "stateMutability": "view", "inputs": [], "outputs": [
        {"name": "", "type": "bool", "internalType": "bool"}
    ]}
]"#;

/// Setup contract missing the `challenge()` accessor.
pub const BROKEN_SETUP_ABI: &str = r#"[
    {"type": "constructor", "stateMutability": "payable", "inputs": [
        {"name": "player", "type": "address", "internalType": "address"}
    ]},
    {"type": "function", "name": "isSolved", "stateMutability": "view", "inputs": [], "outputs": [
        {"name": "", "type": "bool", "internalType": "bool"}
    ]}
]"#;

/// Address every fixture setup contract reports from `challenge()`.
pub const CHALLENGE_ADDRESS: Address = H160([0xc4; 20]);

pub const CHALLENGE_YAML: &str = r#"
challenge_name: Solve Me
challenge_description: Call solve on the contract
setup_contract_name: Setup
flag: DUCTF{fake_flag_for_testing}
block_time: 0
"#;

/// [`CHALLENGE_YAML`] followed by `extra` lines.
pub fn challenge_config(extra: &str) -> Result<Arc<ChallengeConfig>, ConfigError> {
    let document = format!("{}{}", CHALLENGE_YAML, extra);
    ChallengeConfig::from_yaml_str(&document).map(Arc::new)
}

/// Short retry policy for tests: three attempts, 10ms apart.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), 1)
}

/// A fake ledger with a funded deployer and a `Setup` artifact on disk.
pub struct Fixture {
    pub ledger: Arc<FakeLedger>,
    pub deployer: Arc<Deployer>,
    pub artifacts_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> io::Result<Self> {
        Self::with_setup_abi(SETUP_ABI)
    }

    pub fn with_setup_abi(abi_json: &str) -> io::Result<Self> {
        let artifacts_dir = temp_dir("ctf-artifacts")?;
        write_artifact(&artifacts_dir, "Setup", abi_json)?;

        let ledger = Arc::new(FakeLedger::new());
        ledger.respond_to("challenge()", &[Token::Address(CHALLENGE_ADDRESS)]);
        let wallet = ledger.funded_wallet(ether(1000));
        let deployer = Arc::new(Deployer::new(
            ledger.clone(),
            wallet,
            ArtifactStore::new(&artifacts_dir),
        ));

        Ok(Self {
            ledger,
            deployer,
            artifacts_dir,
        })
    }

    pub fn instance(&self, config: Arc<ChallengeConfig>) -> ChallengeInstance {
        ChallengeInstance::new(config, self.ledger.clone(), self.deployer.clone(), fast_retry())
    }
}

/// Whole ETH in wei.
pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

/// Fresh directory under the system temp dir.
pub fn temp_dir(prefix: &str) -> io::Result<PathBuf> {
    let suffix: u64 = rand::thread_rng().gen();
    let dir = std::env::temp_dir().join(format!("{}-{:016x}", prefix, suffix));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Writes a Truffle style artifact `dir/<name>.json` with the fixture bytecode.
pub fn write_artifact(dir: &Path, name: &str, abi_json: &str) -> io::Result<PathBuf> {
    let path = dir.join(format!("{}.json", name));
    let document = format!(
        r#"{{"contractName": "{}", "abi": {}, "bytecode": "0x{}"}}"#,
        name, abi_json, SETUP_BYTECODE
    );
    std::fs::write(&path, document)?;
    Ok(path)
}

/// A transaction as it reached the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentTx {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl SentTx {
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }

    /// True when the calldata targets the function with this signature,
    /// e.g. `createLogEntry(string,string,bytes32)`.
    pub fn calls(&self, signature: &str) -> bool {
        self.data.len() >= 4 && self.data[..4] == id(signature)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerOp {
    NetworkInfo,
    Balance(Address),
    Send(SentTx),
    WaitForReceipt(TxHash),
    Call { to: Address, data: Bytes },
}

#[derive(Default)]
struct State {
    ops: Vec<LedgerOp>,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, TxReceipt>,
    contracts: Vec<Address>,
    responses: HashMap<[u8; 4], Bytes>,
    failing_senders: HashSet<Address>,
    network_failures: u32,
    revert_deployments: bool,
    block_number: u64,
    gate: Option<Arc<Semaphore>>,
}

/// [`LedgerClient`] keeping balances, nonces and receipts in memory.
///
/// Every call is appended to an operation log. Transactions are mined
/// instantly; failures and read results are scripted by the test.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<State>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_balance(&self, address: Address, amount: U256) {
        self.state().balances.insert(address, amount);
    }

    /// A funded wallet usable as deployer.
    pub fn funded_wallet(&self, amount: U256) -> LocalWallet {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        self.set_balance(wallet.address(), amount);
        wallet
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// The next `count` connectivity checks fail.
    pub fn fail_network(&self, count: u32) {
        self.state().network_failures = count;
    }

    /// Every transaction signed by `address` is rejected by the node.
    pub fn fail_sends_from(&self, address: Address) {
        self.state().failing_senders.insert(address);
    }

    /// Contract creations are mined with a failed status.
    pub fn revert_deployments(&self) {
        self.state().revert_deployments = true;
    }

    /// Read calls to the function with `signature` return `tokens`. Calls
    /// without a scripted response revert.
    pub fn respond_to(&self, signature: &str, tokens: &[Token]) {
        let encoded = Bytes::from(abi::encode(tokens));
        self.state().responses.insert(id(signature), encoded);
    }

    /// Connectivity checks block until the returned semaphore has permits.
    pub fn gate_network(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state().gate = Some(gate.clone());
        gate
    }

    pub fn ops(&self) -> Vec<LedgerOp> {
        self.state().ops.clone()
    }

    pub fn sends(&self) -> Vec<SentTx> {
        self.state()
            .ops
            .iter()
            .filter_map(|op| match op {
                LedgerOp::Send(tx) => Some(tx.clone()),
                _ => None,
            })
            .collect()
    }

    /// Addresses of successfully created contracts, in creation order.
    pub fn contracts(&self) -> Vec<Address> {
        self.state().contracts.clone()
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }
}

fn transaction_hash(from: Address, nonce: u64) -> TxHash {
    let mut preimage = from.as_bytes().to_vec();
    preimage.extend_from_slice(&nonce.to_be_bytes());
    H256::from(keccak256(preimage))
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn network_info(&self) -> Result<NetworkInfo, LedgerError> {
        let gate = {
            let mut state = self.state();
            state.ops.push(LedgerOp::NetworkInfo);
            state.gate.clone()
        };
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| LedgerError::Transport(e.to_string()))?;
        }

        let mut state = self.state();
        if state.network_failures > 0 {
            state.network_failures -= 1;
            return Err(LedgerError::Transport("connection refused".to_string()));
        }
        Ok(NetworkInfo {
            chain_id: U256::from(FAKE_CHAIN_ID),
            block_number: U64::from(state.block_number),
        })
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        let mut state = self.state();
        state.ops.push(LedgerOp::Balance(address));
        Ok(state.balances.get(&address).copied().unwrap_or_default())
    }

    async fn send_transaction(
        &self,
        signer: &LocalWallet,
        tx: TransactionRequest,
    ) -> Result<SubmittedTx, LedgerError> {
        let sent = SentTx {
            from: signer.address(),
            to: tx.to.as_ref().and_then(|to| to.as_address().copied()),
            value: tx.value.unwrap_or_default(),
            data: tx.data.clone().unwrap_or_default(),
        };

        let mut state = self.state();
        state.ops.push(LedgerOp::Send(sent.clone()));

        if state.failing_senders.contains(&sent.from) {
            return Err(LedgerError::Transport(format!(
                "node rejected transaction from {:?}",
                sent.from
            )));
        }
        let balance = state.balances.get(&sent.from).copied().unwrap_or_default();
        if balance < sent.value {
            return Err(LedgerError::InsufficientFunds(format!(
                "insufficient funds for gas * price + value: have {} want {}",
                balance, sent.value
            )));
        }

        let nonce = state.nonces.entry(sent.from).or_default();
        let tx_nonce = *nonce;
        *nonce += 1;
        let hash = transaction_hash(sent.from, tx_nonce);

        let (recipient, success, contract_address) = match sent.to {
            Some(to) => (to, true, None),
            None => {
                let created = get_contract_address(sent.from, tx_nonce);
                let success = !state.revert_deployments;
                if success {
                    state.contracts.push(created);
                }
                (created, success, Some(created))
            }
        };
        if success {
            state.balances.insert(sent.from, balance - sent.value);
            *state.balances.entry(recipient).or_default() += sent.value;
        }
        state.block_number += 1;
        state.receipts.insert(
            hash,
            TxReceipt {
                hash,
                success,
                contract_address,
            },
        );

        Ok(SubmittedTx {
            hash,
            from: sent.from,
            nonce: U256::from(tx_nonce),
        })
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state();
        state.ops.push(LedgerOp::WaitForReceipt(hash));
        state
            .receipts
            .get(&hash)
            .copied()
            .ok_or(LedgerError::Dropped(hash))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, LedgerError> {
        let mut state = self.state();
        state.ops.push(LedgerOp::Call {
            to,
            data: data.clone(),
        });
        let selector: Option<[u8; 4]> = data.get(..4).and_then(|s| s.try_into().ok());
        selector
            .and_then(|selector| state.responses.get(&selector).cloned())
            .ok_or_else(|| LedgerError::Transport("execution reverted".to_string()))
    }
}
