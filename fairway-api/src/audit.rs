use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use fairway_audit::AuditSummary;
use fairway_core::{ActorRole, AuditAction, AuditEntry, AuditFilter};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use crate::actor::CurrentActor;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub booking_id: Option<Uuid>,
    pub actor_id: Option<String>,
    pub action: Option<AuditAction>,
    pub role: Option<ActorRole>,
    pub changed_field: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl From<AuditQuery> for AuditFilter {
    fn from(q: AuditQuery) -> Self {
        AuditFilter {
            booking_id: q.booking_id,
            actor_id: q.actor_id,
            actions: q.action.into_iter().collect(),
            role: q.role,
            from: q.from,
            to: q.to,
            changed_field: q.changed_field,
            limit: q.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/audit/entries", get(search_entries))
        .route("/v1/audit/summary", get(summary))
        .route("/v1/audit/export", get(export))
        .route("/v1/audit/alerts", get(alert_stream))
}

async fn search_entries(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    actor.require_staff()?;
    let entries = state.audit.search_audit_entries(&query.into()).await?;
    Ok(Json(entries))
}

async fn summary(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<AuditSummary>, AppError> {
    actor.require_staff()?;
    Ok(Json(state.audit.get_audit_summary(query.from, query.to).await?))
}

async fn export(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, AppError> {
    let staff = actor.require_staff()?;
    let export = state.audit.export_audit_data(&query.into(), staff).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"audit-export.csv\""),
        ],
        export.csv,
    ))
}

/// Critical actions and large exports, as server-sent events
async fn alert_stream(
    State(state): State<AppState>,
    actor: CurrentActor,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    actor.require_staff()?;
    let rx = state.audit.subscribe_alerts();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(alert) => serde_json::to_string(&alert)
                .ok()
                .map(|data| Ok(Event::default().event("audit_alert").data(data))),
            Err(e) => {
                warn!("Audit alert stream lagged: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
