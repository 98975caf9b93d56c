use crate::api::*;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::db::SQLite;
use crate::error::TruesightError;
use crate::escrow::Escrow;
use crate::ledger::SqliteLedger;
use crate::oracle::{PriceReader, PriceSource, TestPriceSource};
use crate::pyth::HermesPriceSource;
use crate::truesight::Truesight;
use anyhow::{Context, Result};
use axum::extract::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use chrono::Duration;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod client;
mod clock;
mod config;
mod db;
mod error;
mod escrow;
mod ledger;
mod oracle;
mod price;
mod pyth;
mod truesight;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_err(e: TruesightError) -> ApiError {
    debug!("Error: {:#}", e);
    (e.status(), Json(e.to_response()))
}

#[debug_handler]
async fn create_prediction(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(request): Json<PostRequest<CreatePredictionRequest>>,
) -> Result<(StatusCode, Json<RowId>), ApiError> {
    let backend = state.write().await;
    let (prediction, access) = (request.data, request.access);
    let id = backend
        .create_prediction(
            prediction.direction,
            prediction.holdout_period_sec,
            prediction.bid_amount,
            prediction.asset.clone(),
            access,
        )
        .await
        .map_err(map_err)?;
    debug!(
        "Created prediction {}: {} {} for {}s",
        id, prediction.asset, prediction.direction, prediction.holdout_period_sec
    );
    Ok((StatusCode::CREATED, id.into()))
}
#[debug_handler]
async fn validate_prediction(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionRecord>, ApiError> {
    let backend = state.write().await;
    let record = backend
        .validate_prediction(request.prediction)
        .await
        .map_err(map_err)?;
    debug!(
        "Validated prediction {}, now {}",
        request.prediction, record.state
    );
    Ok(Json(record))
}
async fn get_prediction(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(request): Json<PredictionRequest>,
) -> Result<Json<PredictionRecord>, ApiError> {
    let backend = state.read().await;
    let record = backend
        .get_prediction(request.prediction)
        .await
        .map_err(map_err)?;
    Ok(Json(record))
}
async fn get_user_predictions(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(user): Json<UserPubKey>,
) -> Result<Json<Vec<PredictionRecord>>, ApiError> {
    let backend = state.read().await;
    let records = backend
        .get_user_predictions(&user)
        .await
        .map_err(map_err)?;
    Ok(Json(records))
}
async fn get_balance(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(user): Json<UserPubKey>,
) -> Result<Json<Tokens>, ApiError> {
    let backend = state.read().await;
    let balance = backend.get_balance(&user).await.map_err(map_err)?;
    Ok(Json(balance))
}
async fn get_pool_balances(
    State(state): State<Arc<RwLock<Truesight>>>,
) -> Result<Json<PoolBalancesResponse>, ApiError> {
    let backend = state.read().await;
    let pools = backend.get_pool_balances().await.map_err(map_err)?;
    Ok(Json(pools))
}
async fn get_login_challenge(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(user): Json<UserPubKey>,
) -> Result<String, ApiError> {
    let backend = state.write().await;
    trace!("Getting login challenge for {}", user);
    let challenge = backend
        .create_login_challenge(user)
        .await
        .map_err(|e| map_err(e.into()))?;
    debug!("Login challenge for user {}: {}", user, challenge);
    Ok(challenge)
}
async fn try_login(
    State(state): State<Arc<RwLock<Truesight>>>,
    Json(request): Json<LoginRequest>,
) -> Result<(), ApiError> {
    let backend = state.write().await;
    backend
        .try_login(request.user, request.sig, request.challenge)
        .await
        .map_err(map_err)?;
    debug!("User {} successfully logged in", request.user);
    Ok(())
}

#[derive(Parser)]
struct Args {
    #[arg(short, long)]
    config: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(short, long)]
    test: bool,
    #[arg(short, long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if cli.db.is_some() {
        settings.db = cli.db;
    }
    settings.test |= cli.test;
    Builder::default()
        .filter_level(settings.log_level()?)
        .write_style(WriteStyle::Always)
        .init();

    let prices: Arc<dyn PriceSource + Send + Sync> = match &settings.hermes_url {
        Some(url) => Arc::new(HermesPriceSource::new(url.clone())),
        None => {
            warn!("No hermes_url configured, prices only come from the test source");
            Arc::new(TestPriceSource::default())
        }
    };
    let (_port, handle) = run_server(settings, prices, Arc::new(SystemClock)).await?;
    handle.await?;
    Ok(())
}

async fn run_server(
    settings: Settings,
    prices: Arc<dyn PriceSource + Send + Sync>,
    clock: Arc<dyn Clock + Send + Sync>,
) -> Result<(u16, JoinHandle<()>)> {
    let db = SQLite::new(settings.db.clone()).await?;
    let ledger = SqliteLedger::new(db.connection()).await?;
    for (user, amount) in settings.genesis()? {
        if ledger.mint_genesis(user, amount).await? {
            info!("Genesis balance of {} for {}", amount, user);
        } else {
            debug!("Genesis balance of {} was already minted", user);
        }
    }
    let reader = PriceReader::new(
        prices,
        clock.clone(),
        settings.feed_map(),
        Duration::seconds(settings.max_price_staleness_sec),
    );
    let state = Arc::new(RwLock::new(Truesight::new(
        Box::new(db),
        Escrow::new(Arc::new(ledger)),
        reader,
        clock,
        settings.min_holdout_sec,
        settings.test,
    )?));
    let app = Router::new()
        .route("/create_prediction", post(create_prediction))
        .route("/validate_prediction", post(validate_prediction))
        .route("/get_prediction", post(get_prediction))
        .route("/get_user_predictions", post(get_user_predictions))
        .route("/get_balance", post(get_balance))
        .route("/get_pool_balances", get(get_pool_balances))
        .route("/get_login_challenge", post(get_login_challenge))
        .route("/try_login", post(try_login))
        .with_state(state);

    let addr = format!("127.0.0.1:{}", settings.port);
    let server = axum::Server::try_bind(&addr.parse()?)
        .with_context(|| format!("couldn't bind {}", addr))?
        .serve(app.into_make_service());
    let port = server.local_addr().port();
    info!("Listening on {}", server.local_addr());
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            log::error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}
