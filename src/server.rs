//! HTTP API server: axum router and request handlers.
//!
//! The server runs on the tokio async runtime while the render loop runs on
//! a plain `std::thread`; they share `GlobalState` behind a mutex. Handlers
//! take the lock only long enough to copy or merge fields; persistence I/O
//! happens after the lock is released. Every successful mutation writes the
//! config blob and pushes the matching summary event to connected viewers.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::broadcast::{event_packet, Broadcaster};
use crate::effects::EffectKind;
use crate::layout::Layout;
use crate::params::ParamMap;
use crate::socketio::{self, ConnectEvents, Sessions};
use crate::state::SharedState;
use crate::store::{self, ConfigBlob};

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub state: SharedState,
    pub broadcaster: Broadcaster,
    pub sessions: Sessions,
    pub layout: Arc<Layout>,
    pub config_path: PathBuf,
}

// ── Errors ───────────────────────────────────────────────────────────

/// Request failures, per the error taxonomy: client mistakes are 4xx,
/// persistence trouble is 500 and never corrupts in-memory state.
#[derive(Debug)]
pub enum ApiError {
    Client(String),
    NotFound(String),
    Persistence(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Client(e) => (StatusCode::BAD_REQUEST, e),
            ApiError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            ApiError::Persistence(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
        };
        (status, Json(json!({ "success": false, "error": error }))).into_response()
    }
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_effects,
        post_effects,
        get_state,
        post_state,
        get_presets,
        post_presets,
        delete_preset,
        post_presets_apply,
        get_config,
    ),
    components(schemas(
        SetEffectRequest,
        SetStateRequest,
        PresetRequest,
        ApplyPresetRequest,
    )),
    tags(
        (name = "effects", description = "Effect selection and parameters"),
        (name = "state", description = "Power and brightness"),
        (name = "presets", description = "Saved effect bundles"),
        (name = "config", description = "Layout descriptor for viewers"),
    ),
    info(
        title = "LED Scales API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP control surface for the LED scales wall"
    )
)]
pub struct ApiDoc;

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SetEffectRequest {
    /// Registry name, e.g. "RainbowRadial"
    effect_name: Option<String>,
    /// Partial parameter values to overlay
    #[schema(value_type = Option<Object>)]
    parameters: Option<Map<String, Value>>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SetStateRequest {
    power_state: Option<bool>,
    /// Clamped to [0,1]
    brightness: Option<f64>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct PresetRequest {
    /// Present when updating an existing preset
    id: Option<u64>,
    name: Option<String>,
    effect: Option<String>,
    brightness: Option<f64>,
    #[schema(value_type = Option<Object>)]
    parameters: Option<ParamMap>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ApplyPresetRequest {
    id: Option<u64>,
    effect: Option<String>,
    brightness: Option<f64>,
    #[schema(value_type = Option<Object>)]
    parameters: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub struct SocketIoQuery {
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    sid: Option<String>,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with the full control surface.
pub fn create_router(app: AppState, static_dir: PathBuf) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/effects", get(get_effects).post(post_effects))
        .route("/state", get(get_state).post(post_state))
        .route("/presets", get(get_presets).post(post_presets))
        .route("/presets/apply", post(post_presets_apply))
        .route("/presets/{id}", delete(delete_preset))
        .route("/config", get(get_config))
        .route("/socket.io/", get(socketio_transport).post(socketio_post))
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app)
}

// ── Shared plumbing ──────────────────────────────────────────────────

/// Snapshot the blob under the lock, write it outside the lock.
fn persist(app: &AppState) -> Result<(), ApiError> {
    let blob = ConfigBlob::from_state(&app.state.lock().unwrap());
    store::save(&app.config_path, &blob).map_err(|e| {
        tracing::error!("failed to persist config to {}: {e}", app.config_path.display());
        ApiError::Persistence(format!("could not save configuration: {e}"))
    })
}

fn emit_state(app: &AppState) {
    let payload = app.state.lock().unwrap().state_json();
    app.broadcaster.emit("state_update", &payload);
}

fn emit_effects(app: &AppState) {
    let payload = app.state.lock().unwrap().effects_json();
    app.broadcaster.emit("effects_update", &payload);
}

fn emit_presets(app: &AppState) {
    let payload = app.state.lock().unwrap().presets_json();
    app.broadcaster.emit("presets_update", &payload);
}

/// The event backlog a freshly connected viewer receives.
fn connect_events(app: &AppState) -> ConnectEvents {
    let state = app.state.lock().unwrap();
    ConnectEvents {
        packets: vec![
            event_packet("state_update", &state.state_json()),
            event_packet("effects_update", &state.effects_json()),
            event_packet("presets_update", &state.presets_json()),
        ],
    }
}

fn lookup_effect(name: &str, layout: &Layout) -> Result<EffectKind, ApiError> {
    let kind = EffectKind::from_name(name)
        .ok_or_else(|| ApiError::NotFound(format!("Effect \"{name}\" not found")))?;
    if !kind.supports(layout) {
        return Err(ApiError::Client(format!(
            "Effect \"{name}\" does not work on this layout"
        )));
    }
    Ok(kind)
}

// ── Effects ──────────────────────────────────────────────────────────

/// GET /effects — parameter tables, display names and the active effect
#[utoipa::path(
    get,
    path = "/effects",
    tag = "effects",
    responses((status = 200, description = "Effect registry with live parameter values"))
)]
async fn get_effects(State(app): State<AppState>) -> Json<Value> {
    Json(app.state.lock().unwrap().effects_json())
}

/// POST /effects — switch the active effect and/or update its parameters
#[utoipa::path(
    post,
    path = "/effects",
    tag = "effects",
    request_body = SetEffectRequest,
    responses(
        (status = 200, description = "Effect applied"),
        (status = 400, description = "Missing effect name or invalid parameters"),
        (status = 404, description = "Unknown effect"),
    )
)]
async fn post_effects(
    State(app): State<AppState>,
    Json(req): Json<SetEffectRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = req
        .effect_name
        .ok_or_else(|| ApiError::Client("No effect name provided".to_string()))?;
    let kind = lookup_effect(&name, &app.layout)?;

    app.state
        .lock()
        .unwrap()
        .set_effect(kind, req.parameters.as_ref())
        .map_err(|e| ApiError::Client(e.to_string()))?;

    persist(&app)?;
    emit_effects(&app);
    emit_state(&app);
    Ok(Json(json!({ "success": true })))
}

// ── State ────────────────────────────────────────────────────────────

/// GET /state — power, brightness and the active preset handle
#[utoipa::path(
    get,
    path = "/state",
    tag = "state",
    responses((status = 200, description = "Current global state"))
)]
async fn get_state(State(app): State<AppState>) -> Json<Value> {
    Json(app.state.lock().unwrap().state_json())
}

/// POST /state — set power (starts a fade) and/or brightness
#[utoipa::path(
    post,
    path = "/state",
    tag = "state",
    request_body = SetStateRequest,
    responses((status = 200, description = "Updated state"))
)]
async fn post_state(
    State(app): State<AppState>,
    Json(req): Json<SetStateRequest>,
) -> Result<Json<Value>, ApiError> {
    let state_json = {
        let mut state = app.state.lock().unwrap();
        if let Some(on) = req.power_state {
            state.set_power(on);
        }
        if let Some(brightness) = req.brightness {
            state.set_brightness(brightness);
        }
        state.state_json()
    };

    persist(&app)?;
    emit_state(&app);
    let mut body = json!({ "success": true });
    merge_objects(&mut body, state_json);
    Ok(Json(body))
}

fn merge_objects(target: &mut Value, extra: Value) {
    if let (Some(target), Some(extra)) = (target.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }
}

// ── Presets ──────────────────────────────────────────────────────────

/// GET /presets — the stored presets
#[utoipa::path(
    get,
    path = "/presets",
    tag = "presets",
    responses((status = 200, description = "All stored presets"))
)]
async fn get_presets(State(app): State<AppState>) -> Json<Value> {
    Json(app.state.lock().unwrap().presets_json())
}

/// POST /presets — create a preset, or update one by id
#[utoipa::path(
    post,
    path = "/presets",
    tag = "presets",
    request_body = PresetRequest,
    responses(
        (status = 200, description = "The stored preset"),
        (status = 400, description = "Missing name or effect"),
    )
)]
async fn post_presets(
    State(app): State<AppState>,
    Json(req): Json<PresetRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = req
        .name
        .ok_or_else(|| ApiError::Client("Invalid preset data".to_string()))?;
    let effect = req
        .effect
        .ok_or_else(|| ApiError::Client("Invalid preset data".to_string()))?;

    let preset = {
        let mut state = app.state.lock().unwrap();
        let brightness = req.brightness.unwrap_or_else(|| state.brightness());
        state.upsert_preset(
            req.id,
            name,
            effect,
            brightness,
            req.parameters.unwrap_or_default(),
        )
    };

    persist(&app)?;
    emit_presets(&app);
    Ok(Json(serde_json::to_value(preset).unwrap_or(Value::Null)))
}

/// DELETE /presets/{id} — remove one preset
#[utoipa::path(
    delete,
    path = "/presets/{id}",
    tag = "presets",
    params(("id" = u64, Path, description = "Preset id")),
    responses(
        (status = 200, description = "Preset removed"),
        (status = 404, description = "Unknown preset id"),
    )
)]
async fn delete_preset(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    let removed = app.state.lock().unwrap().delete_preset(id);
    if !removed {
        return Err(ApiError::NotFound(format!("Preset {id} not found")));
    }
    persist(&app)?;
    emit_presets(&app);
    Ok(Json(json!({ "success": true })))
}

/// POST /presets/apply — apply effect, parameters and brightness as one
/// batch and mark the preset active
#[utoipa::path(
    post,
    path = "/presets/apply",
    tag = "presets",
    request_body = ApplyPresetRequest,
    responses(
        (status = 200, description = "Applied; success=false when the effect does not suit the layout"),
        (status = 404, description = "Unknown effect"),
    )
)]
async fn post_presets_apply(
    State(app): State<AppState>,
    Json(req): Json<ApplyPresetRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = req
        .effect
        .ok_or_else(|| ApiError::Client("No preset data provided".to_string()))?;
    let kind = EffectKind::from_name(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Effect \"{name}\" not found")))?;

    // A preset whose effect cannot run here falls back to a safe default
    // instead of failing the request outright.
    if !kind.supports(&app.layout) {
        app.state
            .lock()
            .unwrap()
            .set_effect(EffectKind::DEFAULT, None)
            .map_err(|e| ApiError::Client(e.to_string()))?;
        persist(&app)?;
        emit_effects(&app);
        emit_state(&app);
        return Ok(Json(json!({
            "success": false,
            "error": format!("Effect \"{name}\" does not work on this layout"),
        })));
    }

    app.state
        .lock()
        .unwrap()
        .apply_preset(req.id, kind, req.brightness, req.parameters.as_ref())
        .map_err(|e| ApiError::Client(e.to_string()))?;

    persist(&app)?;
    emit_effects(&app);
    emit_state(&app);
    Ok(Json(json!({ "success": true })))
}

// ── Config ───────────────────────────────────────────────────────────

/// GET /config — the layout descriptor for viewers
#[utoipa::path(
    get,
    path = "/config",
    tag = "config",
    responses((status = 200, description = "Layout descriptor"))
)]
async fn get_config(State(app): State<AppState>) -> Json<Value> {
    Json(app.layout.descriptor())
}

// ── Socket.IO transport ──────────────────────────────────────────────

/// GET /socket.io/ — websocket upgrade or Engine.IO polling
async fn socketio_transport(
    State(app): State<AppState>,
    Query(query): Query<SocketIoQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Ok(ws) = ws {
        let events = connect_events(&app);
        let sessions = app.sessions.clone();
        let broadcaster = app.broadcaster.clone();
        let sid = query.sid;
        return ws
            .on_upgrade(move |socket| {
                socketio::serve_socket(socket, sid, sessions, broadcaster, events)
            })
            .into_response();
    }

    match query.transport.as_deref() {
        Some("polling") => match query.sid {
            None => {
                let (_, open) = app.sessions.open();
                open.into_response()
            }
            Some(sid) => match app.sessions.poll(&sid).await {
                Some(payload) => payload.into_response(),
                None => (StatusCode::BAD_REQUEST, "unknown sid").into_response(),
            },
        },
        _ => (StatusCode::BAD_REQUEST, "unsupported transport").into_response(),
    }
}

/// POST /socket.io/ — Engine.IO polling uplink
async fn socketio_post(
    State(app): State<AppState>,
    Query(query): Query<SocketIoQuery>,
    body: String,
) -> Response {
    let Some(sid) = query.sid else {
        return (StatusCode::BAD_REQUEST, "missing sid").into_response();
    };
    let events = connect_events(&app);
    match app.sessions.post(&sid, &body, &events) {
        Some(reply) => reply.into_response(),
        None => (StatusCode::BAD_REQUEST, "unknown sid").into_response(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
