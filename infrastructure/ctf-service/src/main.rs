use ctf_orchestrator::{
    artifact::ArtifactStore, ChallengeConfig, ChallengeManager, Deployer, EthersLedger,
};
use ctf_service::{config::ServiceConfig, error::Result, server::run_server};
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = ServiceConfig::from_env()?;
    let challenge_config = ChallengeConfig::from_yaml_file(config.challenge_config_path())?;
    info!("Loaded challenge {}", challenge_config.name());

    let ledger = Arc::new(EthersLedger::connect(config.rpc_url())?);
    let deployer = Arc::new(Deployer::new(
        ledger.clone(),
        config.deployer_wallet()?,
        ArtifactStore::new(config.contract_abi_dir()),
    ));
    let manager = Arc::new(ChallengeManager::new(
        Arc::new(challenge_config),
        ledger,
        deployer,
        config.manager_settings(),
    )?);

    // routes answer with DEPLOYING until the first setup finishes
    tokio::spawn({
        let manager = manager.clone();
        async move {
            if let Err(e) = manager.start().await {
                error!("{}", e);
            }
        }
    });

    run_server(&config, manager).await
}
