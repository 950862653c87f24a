//! Saga creation and lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::TransactionId;
use saga::{CreateSagaRequest, Orchestrator, Saga, SagaAccepted, Step};
use saga_store::SagaStore;
use serde::Serialize;

use crate::error::ApiError;
use crate::extract::RequestContext;

/// Shared state of the saga routes.
pub struct AppState<S> {
    pub orchestrator: Arc<Orchestrator<S>>,
}

/// Projection returned by `GET /sagas/{id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaView {
    pub transaction_id: TransactionId,
    pub saga_type: &'static str,
    pub initiated_by: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Vec<Step>,
}

impl From<Saga> for SagaView {
    fn from(saga: Saga) -> Self {
        Self {
            transaction_id: saga.transaction_id,
            saga_type: saga.saga_type.as_str(),
            initiated_by: saga.initiated_by,
            status: saga.status.as_str(),
            created_at: saga.created_at,
            updated_at: saga.updated_at,
            steps: saga.steps,
        }
    }
}

/// POST /sagas: validates and persists the saga, dispatches its first
/// step and answers 202 before the saga finishes.
#[tracing::instrument(skip_all, fields(tenant_id = %ctx.tenant().id()))]
pub async fn create<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RequestContext(ctx): RequestContext,
    body: Result<Json<CreateSagaRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SagaAccepted>), ApiError> {
    let Json(mut request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let transaction_id = *request.transaction_id.get_or_insert_with(TransactionId::new);
    let saga = request.into_saga(ctx.tenant().clone())?;

    let ctx = ctx.with_transaction(transaction_id);
    let transaction_id = state.orchestrator.create(&ctx, saga).await?;
    metrics::counter!("http_sagas_accepted_total").increment(1);
    Ok((StatusCode::ACCEPTED, Json(SagaAccepted { transaction_id })))
}

/// GET /sagas/{id}
pub async fn get<S: SagaStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RequestContext(ctx): RequestContext,
    Path(id): Path<String>,
) -> Result<Json<SagaView>, ApiError> {
    let transaction_id =
        TransactionId::parse(&id).map_err(|_| ApiError::BadRequest(format!("invalid transaction id '{id}'")))?;
    let saga = state
        .orchestrator
        .get(ctx.tenant().id(), transaction_id)
        .await?
        .ok_or(ApiError::NotFound(transaction_id))?;
    Ok(Json(saga.into()))
}
