use crate::context::AppContext;
use crate::refresh::{GateOutcome, RefreshReport, RefreshTrigger};
use crate::schedule::{AdvancedSchedule, RefreshSchedule, ScheduleMode};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResponse = (StatusCode, Json<Value>);

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/data", get(dashboard_data))
        .route("/api/status", get(status))
        .route("/api/refresh", post(manual_refresh))
        .route("/admin/login", post(admin_login))
        .route("/admin/status", get(admin_status))
        .route("/admin/refresh", post(admin_refresh))
        .route("/admin/force-cache-clear", post(force_cache_clear))
        .route(
            "/admin/auto-refresh-settings",
            get(get_refresh_settings).post(set_refresh_settings),
        )
        .route("/admin/test-settings", get(test_settings))
        .with_state(ctx)
}

/// Serve until Ctrl+C.
pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let address = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("🚀 Dashboard server running on http://{}", address);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("⚠️  Could not listen for Ctrl+C: {}", e);
            }
            info!("🛑 Shutdown requested");
        })
        .await?;
    Ok(())
}

fn unauthorized() -> ApiResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "message": "Unauthorized" })),
    )
}

fn is_admin(ctx: &AppContext, headers: &HeaderMap) -> bool {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    ctx.sessions.is_authenticated(header)
}

fn refresh_response(outcome: GateOutcome<RefreshReport>) -> ApiResponse {
    match outcome {
        GateOutcome::Completed(report) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Data refreshed successfully",
                "file_size": report.file_size,
                "total_population": report.total_population,
                "report": report,
            })),
        ),
        GateOutcome::CoolingDown { remaining_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "message": format!("Please wait {} seconds before refreshing again", remaining_secs),
                "retry_after_seconds": remaining_secs,
            })),
        ),
        GateOutcome::InProgress => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "message": "A refresh is already in progress",
            })),
        ),
        GateOutcome::Failed(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": e.to_string(),
                "retryable": e.retryable(),
            })),
        ),
    }
}

pub(crate) async fn dashboard_data(State(ctx): State<Arc<AppContext>>) -> ApiResponse {
    match ctx.snapshot() {
        Some(snapshot) => match serde_json::to_value(snapshot.as_ref()) {
            Ok(value) => (StatusCode::OK, Json(value)),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            ),
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No dashboard data available" })),
        ),
    }
}

pub(crate) async fn status(State(ctx): State<Arc<AppContext>>) -> ApiResponse {
    let snapshot = ctx.snapshot();
    let state = if snapshot.is_some() { "ready" } else { "no_data" };
    let last_updated = ctx
        .store
        .last_modified()
        .map(|t| t.to_rfc3339())
        .or_else(|| snapshot.as_ref().map(|s| s.last_updated.to_rfc3339()));
    (
        StatusCode::OK,
        Json(json!({
            "status": state,
            "last_updated": last_updated,
            "file_exists": ctx.store.exists(),
        })),
    )
}

pub(crate) async fn manual_refresh(State(ctx): State<Arc<AppContext>>) -> ApiResponse {
    refresh_response(ctx.refresh(RefreshTrigger::Manual, false).await)
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    #[serde(default)]
    password: String,
}

pub(crate) async fn admin_login(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<LoginRequest>,
) -> ApiResponse {
    match ctx
        .sessions
        .login(&request.password, ctx.config.admin.password.as_deref())
    {
        Some(token) => (
            StatusCode::OK,
            Json(json!({ "success": true, "token": token, "message": "Login successful" })),
        ),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid password" })),
        ),
    }
}

pub(crate) async fn admin_status(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResponse {
    if !is_admin(&ctx, &headers) {
        return unauthorized();
    }

    let source_accessible = match &ctx.config.remote.download_url {
        Some(url) => ctx.fetcher.probe(url).await,
        None => false,
    };
    let snapshot = ctx.snapshot();

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "last_update": ctx.store.last_modified().map(|t| t.to_rfc3339()),
                "total_records": snapshot.as_ref().map(|s| s.overview.total_population).unwrap_or(0),
                "source_configured": ctx.config.remote.download_url.is_some(),
                "source_accessible": source_accessible,
                "snapshot_exists": ctx.store.exists(),
                "refresh_in_progress": ctx.gate.is_running(),
                "scheduler_active": ctx.scheduler_active(),
                "active_sessions": ctx.sessions.active_sessions(),
            }
        })),
    )
}

pub(crate) async fn admin_refresh(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResponse {
    if !is_admin(&ctx, &headers) {
        return unauthorized();
    }
    refresh_response(ctx.refresh(RefreshTrigger::Admin, false).await)
}

pub(crate) async fn force_cache_clear(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResponse {
    if !is_admin(&ctx, &headers) {
        return unauthorized();
    }

    info!("🧹 Force cache clear requested");
    let (actions, outcome) = ctx.clear_and_reload().await;
    let reloaded = matches!(outcome, GateOutcome::Completed(_));
    if reloaded {
        ctx.restart_scheduler();
    }

    let new_count = reloaded
        .then(|| ctx.snapshot().map(|s| s.overview.total_population))
        .flatten();
    let (status, Json(mut body)) = refresh_response(outcome);
    if let Some(count) = new_count {
        body["message"] = json!(format!(
            "Cache cleared and data regenerated. New count: {}",
            count
        ));
    }
    body["timestamp"] = json!(Utc::now().to_rfc3339());
    body["new_population_count"] = json!(new_count);
    body["actions_performed"] = json!(actions);
    (status, Json(body))
}

fn settings_view(ctx: &AppContext) -> Value {
    let schedule = ctx.schedule();
    let now = Utc::now();
    let (next_refresh, time_until_next) = schedule.next_refresh(now);
    let active = ctx.scheduler_active();
    let next_refresh = active.then(|| next_refresh.to_rfc3339());
    let time_until_next = active.then_some(time_until_next);
    json!({
        "enabled": schedule.enabled,
        "mode": schedule.mode,
        "simple_interval_minutes": schedule.simple_interval_minutes,
        "advanced_schedule": schedule.advanced_schedule,
        "current_interval_minutes": schedule.current_interval_minutes(now),
        "next_refresh": next_refresh,
        "time_until_next_seconds": time_until_next,
        "last_refresh_time": schedule.last_refresh_time,
        "thread_active": active,
    })
}

pub(crate) async fn get_refresh_settings(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResponse {
    if !is_admin(&ctx, &headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({ "success": true, "settings": settings_view(&ctx) })),
    )
}

/// Fields left out keep their current value.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ScheduleUpdate {
    enabled: Option<bool>,
    mode: Option<ScheduleMode>,
    simple_interval_minutes: Option<u32>,
    advanced_schedule: Option<AdvancedSchedule>,
}

pub(crate) async fn set_refresh_settings(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(update): Json<ScheduleUpdate>,
) -> ApiResponse {
    if !is_admin(&ctx, &headers) {
        return unauthorized();
    }
    if update.simple_interval_minutes == Some(0) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "simple_interval_minutes must be at least 1" })),
        );
    }

    let current = ctx.schedule();
    let schedule = RefreshSchedule {
        enabled: update.enabled.unwrap_or(current.enabled),
        mode: update.mode.unwrap_or(current.mode),
        simple_interval_minutes: update
            .simple_interval_minutes
            .unwrap_or(current.simple_interval_minutes),
        advanced_schedule: update.advanced_schedule.unwrap_or(current.advanced_schedule),
        last_refresh_time: Some(Utc::now()),
        ..current
    };
    let (enabled, mode) = (schedule.enabled, schedule.mode);

    if let Err(e) = ctx.update_schedule(schedule) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": format!("Error saving settings: {:#}", e) })),
        );
    }
    ctx.restart_scheduler();
    info!("🔧 Auto-refresh settings updated: enabled={}, mode={:?}", enabled, mode);

    let message = format!(
        "Auto-refresh {} in {} mode",
        if enabled { "enabled" } else { "disabled" },
        match mode {
            ScheduleMode::Simple => "simple",
            ScheduleMode::Advanced => "advanced",
        }
    );
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": message,
            "settings": settings_view(&ctx),
        })),
    )
}

pub(crate) async fn test_settings(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResponse {
    if !is_admin(&ctx, &headers) {
        return unauthorized();
    }
    (
        StatusCode::OK,
        Json(json!({
            "current_settings": ctx.schedule(),
            "schedule_path": ctx.config.data.schedule_path,
            "scheduler": { "active": ctx.scheduler_active() },
        })),
    )
}
