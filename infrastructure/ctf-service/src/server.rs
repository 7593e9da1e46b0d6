use axum::{
    error_handling::HandleErrorLayer,
    extract::{FromRef, State},
    routing::get,
    BoxError, Json, Router,
};
use ctf_orchestrator::{ChallengeDetails, ChallengeManager};
use log::{error, info, warn};
use std::{sync::Arc, time::Duration};
use tower::{load_shed::error::Overloaded, ServiceBuilder};
use tower_http::cors::CorsLayer;

use crate::{
    config::ServiceConfig,
    error::{Result, ServiceError},
    messages,
    types::{FlagResponse, MessageResponse},
};

/// Resets accepted per [`RESET_WINDOW`], shared by all clients. Every reset
/// funds a new player wallet from the deployer.
pub const RESET_LIMIT: u64 = 2;
pub const RESET_WINDOW: Duration = Duration::from_secs(60);
const RESET_QUEUE: usize = 64;

/// Per-process values the handlers need besides the manager.
#[derive(Clone, Debug, Default)]
pub struct ResponseSettings {
    /// RPC url handed to players in the challenge details.
    pub external_rpc_url: String,
    /// Replaces the configured flag when set.
    pub flag_override: Option<String>,
}

impl From<&ServiceConfig> for ResponseSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            external_rpc_url: config.external_rpc_url().to_string(),
            flag_override: config.flag_override().map(str::to_string),
        }
    }
}

#[derive(Clone, FromRef)]
pub struct AppState {
    pub(crate) manager: Arc<ChallengeManager>,
    pub(crate) settings: Arc<ResponseSettings>,
}

pub fn routes(manager: Arc<ChallengeManager>, settings: ResponseSettings) -> Router {
    let app_state = AppState {
        manager,
        settings: Arc::new(settings),
    };

    // over the limit the request is shed instead of queued
    let reset_limit = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(reset_limit_error))
        .buffer(RESET_QUEUE)
        .load_shed()
        .rate_limit(RESET_LIMIT, RESET_WINDOW);

    Router::new()
        .route("/challenge", get(challenge_handler))
        .route("/challenge/solve", get(solve_handler))
        .route("/challenge/reset", get(reset_handler).layer(reset_limit))
        .route("/challenge/source", get(source_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn reset_limit_error(err: BoxError) -> ServiceError {
    if err.is::<Overloaded>() {
        warn!("Rejected challenge reset, rate limit reached");
        ServiceError::ResetRateLimited
    } else {
        ServiceError::Middleware(err.to_string())
    }
}

/// Serves the challenge routes until ctrl-c, then stops the live instance's
/// background work.
pub async fn run_server(config: &ServiceConfig, manager: Arc<ChallengeManager>) -> Result<()> {
    let socket_address = config.socket_address();
    let server = axum::Server::try_bind(&socket_address).map_err(|e| {
        error!("Failed to bind to socket address: {}", socket_address);
        ServiceError::FailedToStartService(e.to_string())
    })?;
    let server = server
        .serve(routes(manager.clone(), ResponseSettings::from(config)).into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    info!("Started challenge service at {:?}", socket_address);

    let served = server
        .await
        .map_err(|e| ServiceError::FailedToStartService(e.to_string()));

    info!("Shutting down challenge service");
    manager.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler, with error: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn challenge_handler(
    State(manager): State<Arc<ChallengeManager>>,
    State(settings): State<Arc<ResponseSettings>>,
) -> Result<Json<ChallengeDetails>> {
    let details = manager
        .current()
        .details(&settings.external_rpc_url)
        .await?;
    Ok(Json(details))
}

async fn solve_handler(
    State(manager): State<Arc<ChallengeManager>>,
    State(settings): State<Arc<ResponseSettings>>,
) -> Result<Json<FlagResponse>> {
    let challenge = manager.current();
    if !challenge.is_deployed() {
        return Err(ServiceError::ChallengeNotDeployed);
    }

    let solved = challenge
        .is_challenge_solved()
        .await
        .map_err(ServiceError::SolveCheck)?;
    if !solved {
        return Err(ServiceError::ChallengeNotComplete);
    }

    info!("Challenge solved by {:?}", challenge.player_address());
    let flag = settings
        .flag_override
        .clone()
        .unwrap_or_else(|| challenge.flag().to_string());
    Ok(Json(FlagResponse { flag }))
}

async fn reset_handler(State(manager): State<Arc<ChallengeManager>>) -> Result<Json<MessageResponse>> {
    if !manager.current().is_deployed() {
        return Err(ServiceError::ChallengeNotDeployed);
    }

    // the reload outlives the request, players poll the details route
    tokio::spawn(async move {
        if let Err(e) = manager.reload().await {
            error!("Challenge reset failed, with error: {}", e);
        }
    });

    Ok(Json(MessageResponse {
        message: messages::CHALLENGE_RESET.to_string(),
    }))
}

async fn source_handler(State(manager): State<Arc<ChallengeManager>>) -> Json<Vec<String>> {
    Json(manager.sources().base64_encoded())
}
