use ctf_orchestrator::{
    error::{DeployerError, LedgerError, WalletDrainError},
    instance::{drain_reserve, BURN_ADDRESS},
    testing::{
        challenge_config, ether, Fixture, LedgerOp, SentTx, BROKEN_SETUP_ABI, CHALLENGE_ADDRESS,
        ROTATING_SETUP_ABI, SETUP_BYTECODE,
    },
    ChallengeError, DeployStatus, SolveType,
};
use ethers::{
    abi::{self, ParamType, Token},
    utils::{id, keccak256},
};
use std::{sync::Arc, time::Duration};

const ROTATION: &str = "createLogEntry(string,string,bytes32)";

fn rotations(fixture: &Fixture) -> Vec<SentTx> {
    fixture
        .ledger
        .sends()
        .into_iter()
        .filter(|tx| tx.calls(ROTATION))
        .collect()
}

#[tokio::test]
async fn setup_steps_run_in_order() {
    let fixture = Fixture::new().unwrap();
    let instance = fixture.instance(challenge_config("").unwrap());

    instance.setup_challenge().await.unwrap();

    let ops = fixture.ledger.ops();
    assert_eq!(ops.len(), 6, "unexpected ledger calls: {:#?}", ops);
    assert_eq!(ops[0], LedgerOp::NetworkInfo);
    assert!(matches!(
        &ops[1],
        LedgerOp::Send(tx) if tx.to == Some(instance.player_address()) && tx.value == ether(1)
    ));
    assert!(matches!(&ops[2], LedgerOp::WaitForReceipt(_)));
    assert!(matches!(&ops[3], LedgerOp::Send(tx) if tx.is_creation()));
    assert!(matches!(&ops[4], LedgerOp::WaitForReceipt(_)));
    assert!(matches!(
        &ops[5],
        LedgerOp::Call { to, data } if *to == fixture.ledger.contracts()[0]
            && data.as_ref() == id("challenge()").as_slice()
    ));

    assert_eq!(instance.status(), DeployStatus::Deployed);
    assert_eq!(instance.challenge_address(), Some(CHALLENGE_ADDRESS));
}

#[tokio::test]
async fn setup_contract_receives_player_and_value() {
    let fixture = Fixture::new().unwrap();
    let instance = fixture.instance(challenge_config("contract_initial_balance: 5\n").unwrap());

    instance.setup_challenge().await.unwrap();

    let creation = fixture
        .ledger
        .sends()
        .into_iter()
        .find(SentTx::is_creation)
        .unwrap();
    let bytecode_len = SETUP_BYTECODE.len() / 2;
    let args = abi::decode(&[ParamType::Address], &creation.data[bytecode_len..]).unwrap();

    assert_eq!(args, vec![Token::Address(instance.player_address())]);
    assert_eq!(creation.value, ether(5));
    assert_eq!(fixture.ledger.balance_of(fixture.ledger.contracts()[0]), ether(5));
}

#[tokio::test]
async fn player_holds_exactly_the_configured_balance() {
    let fixture = Fixture::new().unwrap();
    let config = challenge_config(
        "player_initial_balance: \"2\"\ncontract_initial_balance: \"0\"\n",
    )
    .unwrap();
    let instance = fixture.instance(config);

    instance.setup_challenge().await.unwrap();

    assert_eq!(instance.player_balance().await.unwrap(), ether(2));
}

#[tokio::test]
async fn connectivity_recovers_within_the_attempt_bound() {
    let fixture = Fixture::new().unwrap();
    fixture.ledger.fail_network(2);
    let instance = fixture.instance(challenge_config("").unwrap());

    instance.setup_challenge().await.unwrap();

    let checks = fixture
        .ledger
        .ops()
        .iter()
        .filter(|op| **op == LedgerOp::NetworkInfo)
        .count();
    assert_eq!(checks, 3);
    assert!(instance.is_deployed());
}

#[tokio::test]
async fn connectivity_exhaustion_fails_before_any_transaction() {
    let fixture = Fixture::new().unwrap();
    fixture.ledger.fail_network(3);
    let instance = fixture.instance(challenge_config("").unwrap());

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(
        err,
        ChallengeError::Connectivity {
            attempts: 3,
            source: LedgerError::Transport(_)
        }
    ));
    assert_eq!(instance.status(), DeployStatus::Failed);
    assert!(fixture.ledger.sends().is_empty());
}

#[tokio::test]
async fn funding_failure_stops_before_deployment() {
    let fixture = Fixture::new().unwrap();
    fixture.ledger.fail_sends_from(fixture.deployer.address());
    let instance = fixture.instance(challenge_config("").unwrap());

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(err, ChallengeError::Funding(LedgerError::Transport(_))));
    assert_eq!(instance.status(), DeployStatus::Failed);
    assert!(!fixture.ledger.sends().iter().any(SentTx::is_creation));
}

#[tokio::test]
async fn broke_deployer_surfaces_insufficient_funds() {
    let fixture = Fixture::new().unwrap();
    fixture
        .ledger
        .set_balance(fixture.deployer.address(), ether(0));
    let instance = fixture.instance(challenge_config("").unwrap());

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(
        err,
        ChallengeError::Funding(LedgerError::InsufficientFunds(_))
    ));
}

#[tokio::test]
async fn reverted_deployment_leaves_the_instance_failed() {
    let fixture = Fixture::new().unwrap();
    fixture.ledger.revert_deployments();
    let instance = fixture.instance(challenge_config("").unwrap());

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(
        err,
        ChallengeError::Deployment(DeployerError::Reverted { .. })
    ));
    assert_eq!(instance.status(), DeployStatus::Failed);
    assert_eq!(instance.challenge_address(), None);
}

#[tokio::test]
async fn missing_artifact_is_a_deployment_error() {
    let fixture = Fixture::new().unwrap();
    std::fs::remove_file(fixture.artifacts_dir.join("Setup.json")).unwrap();
    let instance = fixture.instance(challenge_config("").unwrap());

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(
        err,
        ChallengeError::Deployment(DeployerError::Artifact(_))
    ));
    assert_eq!(instance.status(), DeployStatus::Failed);
}

#[tokio::test]
async fn setup_contract_without_challenge_accessor_is_malformed() {
    let fixture = Fixture::with_setup_abi(BROKEN_SETUP_ABI).unwrap();
    let instance = fixture.instance(challenge_config("").unwrap());

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(err, ChallengeError::MalformedSetupContract(_)));
    assert_eq!(instance.status(), DeployStatus::Failed);
    assert!(!fixture
        .ledger
        .ops()
        .iter()
        .any(|op| matches!(op, LedgerOp::Call { .. })));
}

#[tokio::test]
async fn status_reads_do_not_wait_for_setup() {
    let fixture = Fixture::new().unwrap();
    let gate = fixture.ledger.gate_network();
    let instance = Arc::new(fixture.instance(challenge_config("").unwrap()));

    let setup = tokio::spawn({
        let instance = instance.clone();
        async move { instance.setup_challenge().await }
    });
    while instance.status() == DeployStatus::NotDeployed {
        tokio::task::yield_now().await;
    }

    assert_eq!(instance.status(), DeployStatus::Deploying);
    let details = instance.details("http://rpc").await.unwrap();
    assert_eq!(details.status, DeployStatus::Deploying);
    assert!(details.player_wallet.is_none());
    assert_eq!(instance.player_balance().await.unwrap(), ether(0));
    assert!(matches!(
        instance.is_challenge_solved().await,
        Err(ChallengeError::NotAvailable {
            status: DeployStatus::Deploying,
            ..
        })
    ));

    gate.add_permits(1);
    setup.await.unwrap().unwrap();
    assert_eq!(instance.status(), DeployStatus::Deployed);
}

#[tokio::test]
async fn solve_check_reads_is_solved() {
    let fixture = Fixture::new().unwrap();
    let instance = fixture.instance(challenge_config("").unwrap());
    instance.setup_challenge().await.unwrap();

    fixture.ledger.respond_to("isSolved()", &[Token::Bool(false)]);
    assert!(!instance.is_challenge_solved().await.unwrap());

    fixture.ledger.respond_to("isSolved()", &[Token::Bool(true)]);
    assert!(instance.is_challenge_solved().await.unwrap());
}

#[tokio::test]
async fn reverting_solve_check_is_an_error_not_false() {
    let fixture = Fixture::new().unwrap();
    let instance = fixture.instance(challenge_config("").unwrap());
    instance.setup_challenge().await.unwrap();

    let err = instance.is_challenge_solved().await.unwrap_err();

    assert!(matches!(err, ChallengeError::Ledger(LedgerError::Transport(_))));
}

#[tokio::test]
async fn event_solve_type_is_always_unsupported() {
    let fixture = Fixture::new().unwrap();
    fixture.ledger.respond_to("isSolved()", &[Token::Bool(true)]);
    let instance = fixture.instance(challenge_config("challenge_solve_type: event\n").unwrap());

    assert!(matches!(
        instance.is_challenge_solved().await,
        Err(ChallengeError::UnsupportedSolveType(SolveType::Event))
    ));
    instance.setup_challenge().await.unwrap();
    assert!(matches!(
        instance.is_challenge_solved().await,
        Err(ChallengeError::UnsupportedSolveType(SolveType::Event))
    ));
}

#[tokio::test]
async fn reset_drains_all_but_the_reserve() {
    let fixture = Fixture::new().unwrap();
    let instance = fixture.instance(challenge_config("player_initial_balance: 2\n").unwrap());
    instance.setup_challenge().await.unwrap();

    instance.reset_challenge().await;

    assert_eq!(instance.player_balance().await.unwrap(), drain_reserve());
    assert_eq!(
        fixture.ledger.balance_of(BURN_ADDRESS),
        ether(2) - drain_reserve()
    );
}

#[tokio::test]
async fn drain_failures_never_reach_the_caller() {
    let fixture = Fixture::new().unwrap();
    let never_funded = fixture.instance(challenge_config("").unwrap());

    assert!(matches!(
        never_funded.drain_player_wallet().await,
        Err(WalletDrainError::InsufficientBalance { .. })
    ));
    never_funded.reset_challenge().await;
    assert!(fixture.ledger.sends().is_empty());

    let deployed = fixture.instance(challenge_config("").unwrap());
    deployed.setup_challenge().await.unwrap();
    fixture.ledger.fail_sends_from(deployed.player_address());

    deployed.reset_challenge().await;
    deployed.reset_challenge().await;

    assert_eq!(deployed.player_balance().await.unwrap(), ether(1));
}

#[tokio::test(start_paused = true)]
async fn rotating_secret_runs_until_reset() {
    let fixture = Fixture::with_setup_abi(ROTATING_SETUP_ABI).unwrap();
    let config = challenge_config("variant:\n  kind: rotating_secret\n  interval_secs: 60\n").unwrap();
    let instance = fixture.instance(config);

    instance.setup_challenge().await.unwrap();
    assert_eq!(instance.background_task_count().await, 1);

    let creation = fixture
        .ledger
        .sends()
        .into_iter()
        .find(SentTx::is_creation)
        .unwrap();
    let bytecode_len = SETUP_BYTECODE.len() / 2;
    let constructor = abi::decode(
        &[ParamType::Address, ParamType::FixedBytes(32)],
        &creation.data[bytecode_len..],
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(rotations(&fixture).is_empty());

    tokio::time::sleep(Duration::from_secs(62)).await;
    let sent = rotations(&fixture);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|tx| tx.to == Some(CHALLENGE_ADDRESS)));
    assert_eq!(sent[0].from, sent[1].from);
    assert_ne!(sent[0].from, fixture.deployer.address());
    assert_eq!(fixture.ledger.balance_of(sent[0].from), ether(100));

    let params = [ParamType::String, ParamType::String, ParamType::FixedBytes(32)];
    let first = abi::decode(&params, &sent[0].data[4..]).unwrap();
    let second = abi::decode(&params, &sent[1].data[4..]).unwrap();
    // each call reveals the secret committed by the previous one
    let revealed = |call: &[Token]| match &call[1] {
        Token::String(secret) => Token::FixedBytes(keccak256(secret.as_bytes()).to_vec()),
        other => panic!("unexpected secret token {:?}", other),
    };
    assert_eq!(first[0], Token::String("Yep pretty good day today".to_string()));
    assert_eq!(revealed(&first), constructor[1]);
    assert_eq!(revealed(&second), first[2]);

    instance.reset_challenge().await;
    assert_eq!(instance.background_task_count().await, 0);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(rotations(&fixture).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unfunded_runner_fails_the_setup() {
    let fixture = Fixture::with_setup_abi(ROTATING_SETUP_ABI).unwrap();
    fixture.ledger.set_balance(fixture.deployer.address(), ether(50));
    let config = challenge_config("variant:\n  kind: rotating_secret\n").unwrap();
    let instance = fixture.instance(config);

    let err = instance.setup_challenge().await.unwrap_err();

    assert!(matches!(
        err,
        ChallengeError::Funding(LedgerError::InsufficientFunds(_))
    ));
    assert_eq!(instance.status(), DeployStatus::Failed);
    assert_eq!(instance.background_task_count().await, 0);
}
