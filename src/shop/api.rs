use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use super::db::{DbHandle, ShopDb, Stored};
use super::sse::{self, ChangeNotifier};
use crate::domain::*;
use crate::errors::ProductionError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub notifier: ChangeNotifier,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("request failed: {:#}", err);
        ApiError::Internal(err.to_string())
    }
}

impl From<ProductionError> for ApiError {
    fn from(err: ProductionError) -> Self {
        match err {
            ProductionError::WorkOrderNotFound { .. } | ProductionError::RecordNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

// ── Referential integrity ─────────────────────────────────────────────

/// Store-level consistency checks run inside the same DB call as the write.
pub trait Integrity: Stored {
    /// References in `record` that point at nothing.
    fn write_violations(_db: &ShopDb, _record: &Self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Number of other records that still point at `id`.
    fn delete_blockers(_db: &ShopDb, _id: &str) -> anyhow::Result<i64> {
        Ok(0)
    }
}

impl Integrity for WorkOrder {
    fn write_violations(db: &ShopDb, record: &Self) -> anyhow::Result<Vec<String>> {
        db.missing_references(record)
    }
}

impl Integrity for MachineTypeConfig {
    fn delete_blockers(db: &ShopDb, id: &str) -> anyhow::Result<i64> {
        db.step_reference_count("machineTypeId", id)
    }
}

impl Integrity for JobWork {
    fn delete_blockers(db: &ShopDb, id: &str) -> anyhow::Result<i64> {
        db.step_reference_count("jobWorkId", id)
    }
}

impl Integrity for Item {}

impl Integrity for Roadmap {}

/// Result of a write attempted inside a DB call.
enum WriteOutcome<T> {
    Done(T),
    Missing,
    Duplicate,
    Dangling(Vec<String>),
}

impl<T> WriteOutcome<T> {
    fn into_result(self, resource: Resource, id: &str) -> Result<T, ApiError> {
        match self {
            WriteOutcome::Done(record) => Ok(record),
            WriteOutcome::Missing => Err(ApiError::NotFound(format!(
                "{} {} not found",
                resource.label(),
                id
            ))),
            WriteOutcome::Duplicate => Err(ApiError::Conflict(format!(
                "{} {} already exists",
                resource.label(),
                id
            ))),
            WriteOutcome::Dangling(missing) => Err(ApiError::BadRequest(format!(
                "Unknown references: {}",
                missing.join(", ")
            ))),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/events", get(sse::events_handler))
        .merge(collection_routes::<WorkOrder>())
        .merge(collection_routes::<JobWork>())
        .merge(collection_routes::<MachineTypeConfig>())
        .merge(collection_routes::<Item>())
        .merge(collection_routes::<Roadmap>())
}

/// `GET/POST {path}` and `GET/PUT/DELETE {path}/{id}` for one record type.
fn collection_routes<T: Integrity>() -> Router<SharedState> {
    let base = T::RESOURCE.path();
    Router::new()
        .route(base, get(list_records::<T>).post(create_record::<T>))
        .route(
            &format!("{}/{{id}}", base),
            get(get_record::<T>)
                .put(update_record::<T>)
                .delete(delete_record::<T>),
        )
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_records<T: Integrity>(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.db.call(|db| db.list::<T>()).await?;
    Ok(Json(records))
}

async fn get_record<T: Integrity>(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lookup = id.clone();
    let record = state.db.call(move |db| db.get::<T>(&lookup)).await?;
    match record {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!(
            "{} {} not found",
            T::RESOURCE.label(),
            id
        ))),
    }
}

async fn create_record<T: Integrity>(
    State(state): State<SharedState>,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut record) = payload?;
    if record.id().trim().is_empty() {
        record.set_id(new_id());
    }
    record.touch();
    record.validate()?;

    let id = record.id().to_string();
    let outcome = state
        .db
        .call(move |db| {
            let dangling = T::write_violations(db, &record)?;
            if !dangling.is_empty() {
                return Ok(WriteOutcome::Dangling(dangling));
            }
            Ok(match db.insert(&record)? {
                Some(created) => WriteOutcome::Done(created),
                None => WriteOutcome::Duplicate,
            })
        })
        .await?;
    let created = outcome.into_result(T::RESOURCE, &id)?;

    tracing::info!(resource = T::RESOURCE.label(), %id, "created");
    state.notifier.notify(T::RESOURCE.change_kind());
    Ok((StatusCode::CREATED, Json(created)))
}

/// Full replace. The body must carry the whole record, nested collections
/// included.
async fn update_record<T: Integrity>(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut record) = payload?;
    if record.id().is_empty() {
        record.set_id(id.clone());
    } else if record.id() != id {
        return Err(ApiError::BadRequest(format!(
            "Body id {} does not match path id {}",
            record.id(),
            id
        )));
    }
    record.touch();
    record.validate()?;

    let outcome = state
        .db
        .call(move |db| {
            let dangling = T::write_violations(db, &record)?;
            if !dangling.is_empty() {
                return Ok(WriteOutcome::Dangling(dangling));
            }
            Ok(match db.replace(&record)? {
                Some(updated) => WriteOutcome::Done(updated),
                None => WriteOutcome::Missing,
            })
        })
        .await?;
    let updated = outcome.into_result(T::RESOURCE, &id)?;

    tracing::info!(resource = T::RESOURCE.label(), %id, "updated");
    state.notifier.notify(T::RESOURCE.change_kind());
    Ok(Json(updated))
}

async fn delete_record<T: Integrity>(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let target = id.clone();
    let (blockers, deleted) = state
        .db
        .call(move |db| {
            let blockers = T::delete_blockers(db, &target)?;
            if blockers > 0 {
                return Ok((blockers, false));
            }
            Ok((0, db.delete::<T>(&target)?))
        })
        .await?;

    if blockers > 0 {
        return Err(ApiError::Conflict(format!(
            "{} {} is still used by {} work order(s)",
            T::RESOURCE.label(),
            id,
            blockers
        )));
    }
    if !deleted {
        return Err(ApiError::NotFound(format!(
            "{} {} not found",
            T::RESOURCE.label(),
            id
        )));
    }

    tracing::info!(resource = T::RESOURCE.label(), %id, "deleted");
    state.notifier.notify(T::RESOURCE.change_kind());
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
