//! HTTP request handlers
//!
//! Implements REST API endpoints for starting and stopping monitor
//! sessions, feeding samples, answering confirmation prompts, browsing the
//! alert history and publishing device configuration.

use actix::Addr;
use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::device::{config_topic, DeviceSettings};
use crate::error::{AppError, AppResult};
use crate::history::{HistoryFilter, HistoryPager, ViewMode};
use crate::models::{DisplayStatus, HealthCheck, Sample};
use crate::profiles::ActivityProfile;
use crate::session::{
    ClearHistory, GetSnapshot, Ingest, MonitorSession, Respond, SelectProfile, UserAction, ViewHistory,
};
use crate::staleness::FeedState;
use crate::state::AppState;
use crate::validation::{parse_channels, validate_device_settings, validate_pagination, validate_user_id};
use crate::websocket::WsSession;

type SharedState = web::Data<Arc<RwLock<AppState>>>;

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Health check
            .route("/health", web::get().to(health_check))
            .route("/profiles", web::get().to(get_profiles))
            // Session lifecycle
            .route("/sessions", web::get().to(list_sessions))
            .route("/sessions/{user_id}", web::post().to(start_session))
            .route("/sessions/{user_id}", web::delete().to(stop_session))
            // Per-session endpoints
            .route("/sessions/{user_id}/samples", web::post().to(ingest_sample))
            .route("/sessions/{user_id}/status", web::get().to(get_status))
            .route("/sessions/{user_id}/profile", web::put().to(select_profile))
            .route("/sessions/{user_id}/confirmation", web::post().to(respond_to_confirmation))
            .route("/sessions/{user_id}/history", web::get().to(get_history))
            .route("/sessions/{user_id}/history", web::delete().to(clear_history))
            .route("/sessions/{user_id}/device-config", web::post().to(publish_device_config)),
    )
    // WebSocket endpoint
    .route("/ws/{user_id}", web::get().to(websocket_handler));
}

/// Look up the running session for `user_id`
async fn running_session(state: &SharedState, user_id: &str) -> AppResult<Addr<MonitorSession>> {
    validate_user_id(user_id)?;
    state
        .read()
        .await
        .session(user_id)
        .ok_or_else(|| AppError::SessionNotFound(user_id.to_string()))
}

/// Health check endpoint
///
/// GET /api/health
///
/// Returns system health status including uptime and running sessions.
pub async fn health_check(state: SharedState) -> Result<HttpResponse, AppError> {
    let state = state.read().await;

    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        active_sessions: state.session_count(),
        connected_clients: state.client_count(),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// Activity profiles, suggestion bands and temperature band
///
/// GET /api/profiles
pub async fn get_profiles(state: SharedState) -> Result<HttpResponse, AppError> {
    let table = state.read().await.table().clone();
    Ok(HttpResponse::Ok().json(&*table))
}

#[derive(Serialize)]
struct SessionResponse {
    user_id: String,
    started: bool,
}

/// Start monitoring a user
///
/// POST /api/sessions/{user_id}
///
/// Idempotent: 201 when a session was started, 200 when one was running.
pub async fn start_session(
    state: SharedState,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    validate_user_id(&user_id)?;

    let (_, started) = state.write().await.start_session(&user_id);
    let body = SessionResponse { user_id, started };

    if started {
        info!(user_id = %body.user_id, "Monitor session created");
        Ok(HttpResponse::Created().json(body))
    } else {
        Ok(HttpResponse::Ok().json(body))
    }
}

/// Latest reading and status of one monitored user
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub user_id: String,
    pub current_sample: Sample,
    pub active_profile: ActivityProfile,
    pub display_status: DisplayStatus,
    pub feed_state: FeedState,
}

/// Overview of every monitored user
///
/// GET /api/sessions
///
/// A session that stops while being asked is left out.
pub async fn list_sessions(state: SharedState) -> Result<HttpResponse, AppError> {
    let running = state.read().await.running_sessions();

    let mut summaries = Vec::with_capacity(running.len());
    for (user_id, session) in running {
        match session.send(GetSnapshot).await {
            Ok(snapshot) => summaries.push(SessionSummary {
                user_id: snapshot.user_id,
                current_sample: snapshot.current_sample,
                active_profile: snapshot.active_profile,
                display_status: snapshot.display_status,
                feed_state: snapshot.feed_state,
            }),
            Err(e) => warn!(user_id = %user_id, error = %e, "Skipping unavailable session"),
        }
    }

    Ok(HttpResponse::Ok().json(summaries))
}

/// Stop monitoring a user
///
/// DELETE /api/sessions/{user_id}
///
/// Returns once the user's history has been persisted.
pub async fn stop_session(
    state: SharedState,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    validate_user_id(&user_id)?;

    if crate::state::stop_session(state.get_ref(), &user_id).await {
        info!(user_id = %user_id, "Monitor session stopped");
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(AppError::SessionNotFound(user_id))
    }
}

#[derive(Serialize)]
struct IngestResponse {
    accepted: bool,
    correlation_id: String,
}

/// Ingest one raw sensor message
///
/// POST /api/sessions/{user_id}/samples
///
/// Body is the wearable's wire JSON, e.g.
/// `{"BPM":75,"SpO2":97,"TempC":26.5,"IR":51234}` with `-999` for unknown
/// channels.
pub async fn ingest_sample(
    state: SharedState,
    path: web::Path<String>,
    body: web::Bytes,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let correlation_id = extract_correlation_id(&req);
    let session = running_session(&state, &user_id).await?;

    if let Err(e) = session.send(Ingest(body.to_vec())).await? {
        warn!(
            correlation_id = %correlation_id,
            user_id = %user_id,
            error = %e,
            "Rejected sensor message"
        );
        return Err(e.into());
    }

    Ok(HttpResponse::Accepted().json(IngestResponse {
        accepted: true,
        correlation_id,
    }))
}

/// Current display snapshot
///
/// GET /api/sessions/{user_id}/status
pub async fn get_status(
    state: SharedState,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = running_session(&state, &path.into_inner()).await?;
    let snapshot = session.send(GetSnapshot).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub profile: String,
}

/// Manually select the active profile
///
/// PUT /api/sessions/{user_id}/profile
pub async fn select_profile(
    state: SharedState,
    path: web::Path<String>,
    body: web::Json<ProfileRequest>,
) -> Result<HttpResponse, AppError> {
    let session = running_session(&state, &path.into_inner()).await?;
    session.send(SelectProfile(body.into_inner().profile)).await??;

    let snapshot = session.send(GetSnapshot).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub action: UserAction,
}

/// Answer the pending activity-change prompt
///
/// POST /api/sessions/{user_id}/confirmation
///
/// An answer with no prompt open is ignored; the returned snapshot shows
/// the outcome either way.
pub async fn respond_to_confirmation(
    state: SharedState,
    path: web::Path<String>,
    body: web::Json<ConfirmationRequest>,
) -> Result<HttpResponse, AppError> {
    let session = running_session(&state, &path.into_inner()).await?;
    session.send(Respond(body.action)).await?;

    let snapshot = session.send(GetSnapshot).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Query parameters for the alert history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Comma-separated channel list, e.g. `bpm,spo2`
    pub channels: Option<String>,
    pub view: Option<ViewMode>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Get alert history, most recent first
///
/// GET /api/sessions/{user_id}/history?view=alerts&channels=bpm&page=1&limit=20
pub async fn get_history(
    state: SharedState,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let (page, limit) = validate_pagination(query.page, query.limit)?;

    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::ValidationError(
                "'from' must not be later than 'to'".to_string(),
            ));
        }
    }

    let channels = match query.channels.as_deref() {
        Some(value) => Some(parse_channels(value)?),
        None => None,
    };

    let session = running_session(&state, &path.into_inner()).await?;

    let mut pager = HistoryPager::new(limit);
    pager.set_filter(HistoryFilter {
        from: query.from,
        to: query.to,
        view: query.view.unwrap_or_default(),
        channels,
    });
    pager.goto(page);

    let history_page = session.send(ViewHistory(pager)).await?;
    Ok(HttpResponse::Ok().json(history_page))
}

#[derive(Serialize)]
struct ClearResponse {
    removed: usize,
}

/// Delete the user's alert history
///
/// DELETE /api/sessions/{user_id}/history
pub async fn clear_history(
    state: SharedState,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let session = running_session(&state, &user_id).await?;
    let removed = session.send(ClearHistory).await?;

    info!(user_id = %user_id, removed, "Alert history cleared");
    Ok(HttpResponse::Ok().json(ClearResponse { removed }))
}

#[derive(Serialize)]
struct PublishResponse {
    topic: String,
    receivers: usize,
}

/// Publish settings to the user's wearable
///
/// POST /api/sessions/{user_id}/device-config
///
/// Fire-and-forget: 202 whether or not a device is listening.
pub async fn publish_device_config(
    state: SharedState,
    path: web::Path<String>,
    body: web::Json<DeviceSettings>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    validate_user_id(&user_id)?;
    validate_device_settings(&body)?;

    let receivers = state
        .read()
        .await
        .config_bus()
        .publish(&user_id, body.into_inner());

    Ok(HttpResponse::Accepted().json(PublishResponse {
        topic: config_topic(&user_id),
        receivers,
    }))
}

/// WebSocket upgrade handler
///
/// GET /ws/{user_id}
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: SharedState,
) -> Result<HttpResponse, actix_web::Error> {
    let user_id = path.into_inner();
    let session = running_session(&state, &user_id).await?;
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, user_id = %user_id, "WebSocket connection request");

    // Register client
    let config_rx = {
        let mut state = state.write().await;
        state.add_client(client_id.clone());
        state.config_bus().subscribe()
    };

    let ws_session = WsSession::new(
        client_id,
        user_id,
        session,
        config_rx,
        state.get_ref().clone(),
    );

    actix_web_actors::ws::start(ws_session, &req, stream)
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
