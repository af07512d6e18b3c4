//! HTTP control plane for one consensus node.
//!
//! Resets report failure in the body with HTTP 200 (`{"status": false}`);
//! only unknown routes (404) and handler panics (500) use error statuses.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::{Result, SupervisorError};
use crate::node::home::ParamsUpdate;
use crate::node::{NodeHome, PeriodDumper, SharedSupervisor};

pub const NOT_FOUND_BODY: &str = "Not Found";
pub const INTERNAL_ERROR_BODY: &str = "Error Closing Node";

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Control server configuration.
#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    /// Address to listen on.
    pub listen: String,
}

impl Default for ControlServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

/// Body returned by both reset endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub message: String,
    pub status: bool,
}

impl ResetResponse {
    pub fn success() -> Self {
        Self {
            message: "Reset successful.".to_string(),
            status: true,
        }
    }

    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self {
            message: format!("Reset failed: {err}"),
            status: false,
        }
    }
}

impl From<Result<()>> for ResetResponse {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(e) => {
                warn!("Reset failed: {}", e);
                Self::failed(e)
            }
        }
    }
}

#[derive(Clone)]
struct ControlState {
    supervisor: SharedSupervisor,
    home: Option<NodeHome>,
    dumper: Option<Arc<Mutex<PeriodDumper>>>,
    client: reqwest::Client,
}

/// HTTP façade over one shared supervisor.
pub struct ControlServer {
    config: ControlServerConfig,
    state: ControlState,
}

impl ControlServer {
    pub fn new(config: ControlServerConfig, supervisor: SharedSupervisor) -> Self {
        Self {
            config,
            state: ControlState {
                supervisor,
                home: None,
                dumper: None,
                client: reqwest::Client::new(),
            },
        }
    }

    /// Enables genesis handling and the `/params` endpoints.
    pub fn with_home(mut self, home: NodeHome) -> Self {
        self.state.home = Some(home);
        self
    }

    /// Archive the home directory before every hard reset.
    pub fn with_dumper(mut self, dumper: PeriodDumper) -> Self {
        self.state.dumper = Some(Arc::new(Mutex::new(dumper)));
        self
    }

    pub fn router(&self) -> Router {
        let routes = Router::new()
            .route("/gentle_reset", get(gentle_reset))
            .route("/hard_reset", get(hard_reset))
            .route("/params", get(get_params).post(update_params))
            .route("/app_hash", get(app_hash))
            .route("/health", get(health))
            .fallback(not_found)
            .with_state(self.state.clone());
        apply_layers(routes)
    }

    /// Serves until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self.config.listen.parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Control server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

fn apply_layers(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Control handler panicked: {}", detail);
    fixed_body(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY)
}

fn fixed_body(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn not_found() -> Response {
    fixed_body(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

async fn gentle_reset(State(state): State<ControlState>) -> Json<ResetResponse> {
    info!("Gentle reset requested");
    let mut node = state.supervisor.lock().await;
    let result = async {
        node.stop().await?;
        node.start().await
    }
    .await;
    Json(result.into())
}

#[derive(Debug, Default, Deserialize)]
struct HardResetQuery {
    genesis_time: Option<String>,
    initial_height: Option<String>,
}

async fn hard_reset(
    State(state): State<ControlState>,
    Query(query): Query<HardResetQuery>,
) -> Json<ResetResponse> {
    info!("Hard reset requested");
    let mut node = state.supervisor.lock().await;

    let result = async {
        node.stop().await?;

        if let (Some(dumper), Some(home)) = (&state.dumper, &state.home) {
            let mut dumper = Arc::clone(dumper).lock_owned().await;
            let root = home.root().to_path_buf();
            blocking(move || {
                dumper.dump_period(&root);
                Ok(())
            })
            .await?;
        }

        if let Err(e) = node.prune_blocks().await {
            // bring the node back with its old state before reporting
            if let Err(start_err) = node.start().await {
                error!("Failed to restart node after prune failure: {}", start_err);
            }
            return Err(e);
        }

        if let Some(home) = state.home.clone() {
            let HardResetQuery {
                genesis_time,
                initial_height,
            } = query;
            blocking(move || {
                let genesis_time = match genesis_time {
                    Some(time) => time,
                    None => home.default_genesis_time()?,
                };
                home.reset_genesis(&genesis_time, initial_height.as_deref())
            })
            .await?;
        }

        node.start().await
    }
    .await;

    Json(result.into())
}

/// Runs file-system work off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?
}

fn home_or_err(state: &ControlState) -> Result<NodeHome> {
    state.home.clone().ok_or(SupervisorError::NoHome)
}

async fn get_params(State(state): State<ControlState>) -> Json<Value> {
    let result = match home_or_err(&state) {
        Ok(home) => blocking(move || home.validator_params()).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(params) => Json(json!({ "params": params, "status": true, "error": null })),
        Err(e) => Json(json!({ "params": {}, "status": false, "error": e.to_string() })),
    }
}

async fn update_params(State(state): State<ControlState>, body: Bytes) -> Json<Value> {
    let result = async {
        let home = home_or_err(&state)?;
        let update: ParamsUpdate = serde_json::from_slice(&body)?;

        blocking(move || {
            info!("Updating genesis config");
            home.update_genesis(&update)?;
            info!("Updating persistent peers");
            home.update_peers(&update.validators)?;
            if let Some(ref address) = update.external_address {
                home.update_external_address(address)?;
            }
            Ok(())
        })
        .await
    }
    .await;

    match result {
        Ok(()) => Json(json!({ "status": true, "error": null })),
        Err(e) => {
            warn!("Params update failed: {}", e);
            Json(json!({ "status": false, "error": e.to_string() }))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppHashQuery {
    height: Option<String>,
}

async fn app_hash(
    State(state): State<ControlState>,
    Query(query): Query<AppHashQuery>,
) -> Response {
    let endpoint = {
        let node = state.supervisor.lock().await;
        format!("{}/block", node.params().rpc_http_url())
    };

    let result: Result<(StatusCode, Value)> = async {
        let mut url = reqwest::Url::parse(&endpoint)
            .map_err(|e| SupervisorError::Config(format!("invalid RPC address {endpoint}: {e}")))?;
        if let Some(ref height) = query.height {
            url.query_pairs_mut().append_pair("height", height);
        }
        let response = state.client.get(url).send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let body: Value = response.json().await?;
        let hash = body
            .pointer("/result/block/header/app_hash")
            .cloned()
            .ok_or_else(|| SupervisorError::Genesis("app_hash missing from block".to_string()))?;
        Ok((status, hash))
    }
    .await;

    match result {
        Ok((status, hash)) => (status, Json(json!({ "app_hash": hash }))).into_response(),
        Err(e) => Json(json!({ "error": format!("Could not get the app hash: {e}") })).into_response(),
    }
}

async fn health(State(state): State<ControlState>) -> Json<Value> {
    let mut node = state.supervisor.lock().await;
    Json(json!({
        "status": "ok",
        "running": node.is_running(),
        "pid": node.pid(),
        "uptime_secs": node.uptime_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
