use ctf_client::ChallengeClient;
use ctf_orchestrator::{
    testing::{challenge_config, fast_retry, Fixture},
    ChallengeManager, DeployStatus, ManagerSettings,
};
use ctf_service::server::{routes, ResponseSettings};
use ethers::abi::Token;
use std::{net::SocketAddr, sync::Arc};

async fn serve(fixture: &Fixture, extra: &str) -> (Arc<ChallengeManager>, ChallengeClient) {
    let manager = Arc::new(
        ChallengeManager::new(
            challenge_config(extra).unwrap(),
            fixture.ledger.clone(),
            fixture.deployer.clone(),
            ManagerSettings {
                retry_policy: fast_retry(),
                source_dir: fixture.artifacts_dir.clone(),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let settings = ResponseSettings {
        external_rpc_url: "http://rpc.example:8545".to_string(),
        flag_override: None,
    };

    let listen: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = axum::Server::bind(&listen)
        .serve(routes(manager.clone(), settings).into_make_service());
    let address = server.local_addr();
    tokio::spawn(server);

    let client = ChallengeClient::connect(format!("http://{}", address).as_str()).unwrap();
    (manager, client)
}

#[tokio::test]
async fn client_follows_a_challenge_from_deploy_to_flag() {
    let fixture = Fixture::new().unwrap();
    let (manager, client) = serve(&fixture, "").await;

    let details = client.challenge().await.unwrap();
    assert_eq!(details.status, DeployStatus::NotDeployed);
    let err = client.solve().await.unwrap_err();
    assert!(err.to_string().contains("code = 400"));

    manager.start().await.unwrap();
    let details = client.challenge().await.unwrap();
    assert_eq!(details.status, DeployStatus::Deployed);
    assert_eq!(details.rpc_url, "http://rpc.example:8545");
    let wallet = details.player_wallet.unwrap();
    assert_eq!(wallet.address, manager.current().player_address());
    assert_eq!(wallet.balance, "1.0 ETH");

    fixture.ledger.respond_to("isSolved()", &[Token::Bool(true)]);
    assert_eq!(client.solve().await.unwrap(), "DUCTF{fake_flag_for_testing}");
}

#[tokio::test]
async fn client_resets_and_reads_sources() {
    let fixture = Fixture::new().unwrap();
    std::fs::write(fixture.artifacts_dir.join("Setup.sol"), "contract Setup {}").unwrap();
    let (manager, client) = serve(&fixture, "challenge_source_files: [Setup.sol]\n").await;

    assert_eq!(
        client.sources().await.unwrap(),
        vec!["contract Setup {}".to_string()]
    );

    assert!(client.reset().await.is_err());
    manager.start().await.unwrap();
    let message = client.reset().await.unwrap();
    assert!(message.starts_with("Challenge has been reset"));
}
