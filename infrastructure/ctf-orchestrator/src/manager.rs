use log::{error, info};
use std::{
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use tokio::sync::Mutex;

use crate::{
    config::ChallengeConfig,
    deployer::Deployer,
    error::{ChallengeError, ManagerError, Result},
    instance::ChallengeInstance,
    ledger::LedgerClient,
    retry::RetryPolicy,
    sources::ChallengeSources,
};

#[derive(Clone, Debug, Default)]
pub struct ManagerSettings {
    pub retry_policy: RetryPolicy,
    /// Upper bound on a single setup run. None waits forever.
    pub setup_timeout: Option<Duration>,
    /// Directory the configured source files are read from.
    pub source_dir: PathBuf,
}

/// Owns the single live [`ChallengeInstance`] of the process.
///
/// `start` and `reload` are serialized on one lifecycle lock, so an instance
/// is never replaced while its setup is running and two reloads never race.
/// Reads through [`ChallengeManager::current`] do not take that lock.
pub struct ChallengeManager {
    config: Arc<ChallengeConfig>,
    ledger: Arc<dyn LedgerClient>,
    deployer: Arc<Deployer>,
    settings: ManagerSettings,
    sources: ChallengeSources,
    current: RwLock<Arc<ChallengeInstance>>,
    lifecycle: Mutex<()>,
}

impl ChallengeManager {
    pub fn new(
        config: Arc<ChallengeConfig>,
        ledger: Arc<dyn LedgerClient>,
        deployer: Arc<Deployer>,
        settings: ManagerSettings,
    ) -> Result<Self> {
        let sources = ChallengeSources::load(&settings.source_dir, config.source_files())?;
        let instance = ChallengeInstance::new(
            config.clone(),
            ledger.clone(),
            deployer.clone(),
            settings.retry_policy,
        );

        Ok(Self {
            config,
            ledger,
            deployer,
            settings,
            sources,
            current: RwLock::new(Arc::new(instance)),
            lifecycle: Mutex::new(()),
        })
    }

    /// Builds the manager and deploys the first instance.
    pub async fn initialize(
        config: Arc<ChallengeConfig>,
        ledger: Arc<dyn LedgerClient>,
        deployer: Arc<Deployer>,
        settings: ManagerSettings,
    ) -> Result<Self, ManagerError> {
        let manager = Self::new(config, ledger, deployer, settings).map_err(ManagerError::Startup)?;
        manager.start().await?;
        Ok(manager)
    }

    /// Runs setup on the current instance.
    pub async fn start(&self) -> Result<(), ManagerError> {
        let _lifecycle = self.lifecycle.lock().await;
        let instance = self.current();
        self.setup(&instance).await.map_err(ManagerError::Startup)
    }

    /// Resets the current instance, installs a fresh one and deploys it. The
    /// old instance's background work has stopped before the new one exists.
    pub async fn reload(&self) -> Result<(), ManagerError> {
        let _lifecycle = self.lifecycle.lock().await;
        info!("Reloading challenge {}", self.config.name());

        self.current().reset_challenge().await;

        let instance = Arc::new(self.new_instance());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = instance.clone();

        self.setup(&instance).await.map_err(ManagerError::Reload)
    }

    /// Stops background work of the live instance. Does not drain. Waits for
    /// an in-flight start or reload, so no task outlives the call.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.current().cancel_background().await;
    }

    pub fn current(&self) -> Arc<ChallengeInstance> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn sources(&self) -> &ChallengeSources {
        &self.sources
    }

    fn new_instance(&self) -> ChallengeInstance {
        ChallengeInstance::new(
            self.config.clone(),
            self.ledger.clone(),
            self.deployer.clone(),
            self.settings.retry_policy,
        )
    }

    async fn setup(&self, instance: &ChallengeInstance) -> Result<()> {
        let Some(limit) = self.settings.setup_timeout else {
            return instance.setup_challenge().await;
        };
        match tokio::time::timeout(limit, instance.setup_challenge()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Challenge {} did not deploy within {:?}, marking it failed",
                    self.config.name(),
                    limit
                );
                instance.mark_failed();
                instance.cancel_background().await;
                Err(ChallengeError::SetupTimeout(limit))
            }
        }
    }
}
