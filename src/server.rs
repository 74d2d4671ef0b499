use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::cascade::{build_report, AnalysisDepth, GapAnalysisReport, KindCounts};
use crate::config::Config;
use crate::notify::engine::item_event;
use crate::notify::Notifier;
use crate::plan::{CascadeConfig, EntityKind, NewPlan, PortfolioEntity, StrategicPlan};
use crate::queue::backend::{DeletedCount, ReclaimedCount};
use crate::queue::materialize::{materialize_gaps, uncovered_gaps};
use crate::queue::{
    validate_quality_score, DemandQueueItem, NewQueueItem, QueueConflict, QueueFilter, QueueStats,
    QueueStatus,
};
use crate::store::PlanStore;

#[derive(Clone)]
struct ApiState {
    config: Config,
    db_path: PathBuf,
    notifier: Notifier,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateEntityRequest {
    plan_id: String,
    kind: String,
    title: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct GapAnalysisRequest {
    strategic_plan_id: String,
    analysis_depth: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MaterializeRequest {
    strategic_plan_id: String,
    #[serde(default)]
    replace_pending: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct QueueQuery {
    plan_id: Option<String>,
    status: Option<String>,
    entity_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct InsertItemsRequest {
    items: Vec<NewQueueItem>,
    #[serde(default)]
    replace_pending: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ClaimRequest {
    plan_id: String,
    entity_type: String,
}

/// Either a status change or a completion. A body carrying
/// `generated_entity_id` is a completion and any `status` in it is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
struct PatchItemRequest {
    status: Option<String>,
    quality_feedback: Option<Value>,
    generated_entity_id: Option<String>,
    generated_entity_type: Option<String>,
    quality_score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
enum ItemPatch {
    Status {
        status: QueueStatus,
        quality_feedback: Option<Value>,
    },
    Complete {
        generated_entity_id: String,
        generated_entity_type: Option<EntityKind>,
        quality_score: u8,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct ReclaimRequest {
    plan_id: String,
    older_than_minutes: Option<u64>,
}

pub async fn run_server(config: Config, bind: SocketAddr) -> Result<()> {
    let state = ApiState {
        db_path: config.resolved_db_path(),
        notifier: Notifier::from_config(&config.notifications)?,
        config,
    };
    // Creates the database file and schema before the first request.
    PlanStore::open(&state.db_path)?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/config", get(show_config))
        .route("/plans", get(list_plans).post(create_plan))
        .route("/plans/:id", get(get_plan))
        .route("/plans/:id/cascade", put(update_cascade))
        .route("/plans/:id/counts", get(entity_counts))
        .route("/entities", post(create_entity))
        .route("/entities/:id", delete(delete_entity))
        .route("/gap-analysis", post(gap_analysis))
        .route("/gap-analysis/materialize", post(materialize))
        .route(
            "/demand_queue",
            get(list_queue).post(insert_items).delete(clear_queue),
        )
        .route("/demand_queue/claim", post(claim_item))
        .route("/demand_queue/reclaim", post(reclaim_items))
        .route("/demand_queue/stats", get(queue_stats))
        .route("/demand_queue/:id", patch(patch_item).delete(delete_item))
        .route("/demand_queue/:id/release", post(release_item))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn show_config(State(state): State<ApiState>) -> Json<ApiResponse<Config>> {
    ok(state.config)
}

async fn create_plan(
    State(state): State<ApiState>,
    Json(request): Json<NewPlan>,
) -> ApiResult<StrategicPlan> {
    let plan = request
        .into_plan(state.config.cascade.ratios)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let store = open_store(&state)?;
    store.insert_plan(&plan).map_err(ApiError::internal)?;
    info!(plan = %plan.id, objectives = plan.objectives.len(), "created plan");
    Ok(ok(plan))
}

async fn list_plans(State(state): State<ApiState>) -> ApiResult<Vec<StrategicPlan>> {
    let store = open_store(&state)?;
    let plans = store.list_plans().map_err(ApiError::internal)?;
    Ok(ok(plans))
}

async fn get_plan(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<StrategicPlan> {
    let store = open_store(&state)?;
    Ok(ok(require_plan(&store, &id)?))
}

async fn update_cascade(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(cascade): Json<CascadeConfig>,
) -> ApiResult<StrategicPlan> {
    let store = open_store(&state)?;
    let plan = store
        .update_cascade(&id, &cascade)
        .map_err(ApiError::internal)?
        .ok_or_else(|| plan_not_found(&id))?;
    Ok(ok(plan))
}

async fn entity_counts(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<KindCounts> {
    let store = open_store(&state)?;
    require_plan(&store, &id)?;
    let counts = store.count_entities(&id).map_err(ApiError::internal)?;
    Ok(ok(counts))
}

async fn create_entity(
    State(state): State<ApiState>,
    Json(request): Json<CreateEntityRequest>,
) -> ApiResult<PortfolioEntity> {
    let kind = parse_kind(&request.kind)?;
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("entity title cannot be empty"));
    }
    let store = open_store(&state)?;
    require_plan(&store, &request.plan_id)?;
    let entity = store
        .insert_entity(&request.plan_id, kind, request.title.trim(), request.payload)
        .map_err(ApiError::internal)?;
    Ok(ok(entity))
}

async fn delete_entity(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<DeletedCount> {
    let store = open_store(&state)?;
    if !store.soft_delete_entity(&id).map_err(ApiError::internal)? {
        return Err(ApiError::not_found(format!("entity {id} not found")));
    }
    Ok(ok(DeletedCount { deleted: 1 }))
}

async fn gap_analysis(
    State(state): State<ApiState>,
    Json(request): Json<GapAnalysisRequest>,
) -> ApiResult<GapAnalysisReport> {
    let depth = request
        .analysis_depth
        .as_deref()
        .map(AnalysisDepth::from_str)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?
        .unwrap_or_default();
    let store = open_store(&state)?;
    let report = analyze(&state, &store, &request.strategic_plan_id, depth)?;
    Ok(ok(report))
}

async fn materialize(
    State(state): State<ApiState>,
    Json(request): Json<MaterializeRequest>,
) -> ApiResult<Vec<DemandQueueItem>> {
    let store = open_store(&state)?;
    let report = analyze(&state, &store, &request.strategic_plan_id, AnalysisDepth::Quick)?;
    let plan = require_plan(&store, &request.strategic_plan_id)?;
    let open = store
        .open_item_counts(&plan.id, !request.replace_pending)
        .map_err(ApiError::internal)?;
    let rows = materialize_gaps(&plan, &uncovered_gaps(&report.gaps.quantity_gaps, &open));
    let created = store
        .insert_items(&rows, request.replace_pending)
        .map_err(ApiError::internal)?;
    info!(
        plan = %plan.id,
        created = created.len(),
        replace_pending = request.replace_pending,
        "materialized gaps"
    );
    Ok(ok(created))
}

async fn list_queue(
    State(state): State<ApiState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Vec<DemandQueueItem>> {
    let plan_id = required_plan_id(query.plan_id.as_deref())?;
    let filter = parse_filter(&query)?;
    let store = open_store(&state)?;
    require_plan(&store, plan_id)?;
    let items = store.list_items(plan_id, &filter).map_err(ApiError::internal)?;
    Ok(ok(items))
}

async fn insert_items(
    State(state): State<ApiState>,
    Json(request): Json<InsertItemsRequest>,
) -> ApiResult<Vec<DemandQueueItem>> {
    let store = open_store(&state)?;
    let mut plan_ids = request
        .items
        .iter()
        .map(|item| item.strategic_plan_id.as_str())
        .collect::<Vec<_>>();
    plan_ids.sort_unstable();
    plan_ids.dedup();
    for plan_id in plan_ids {
        require_plan(&store, plan_id)?;
    }
    let created = store
        .insert_items(&request.items, request.replace_pending)
        .map_err(ApiError::internal)?;
    Ok(ok(created))
}

async fn claim_item(
    State(state): State<ApiState>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<Option<DemandQueueItem>> {
    let kind = parse_kind(&request.entity_type)?;
    let store = open_store(&state)?;
    require_plan(&store, &request.plan_id)?;
    let item = store
        .claim_next(&request.plan_id, kind)
        .map_err(ApiError::internal)?;
    Ok(ok(item))
}

async fn patch_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<PatchItemRequest>,
) -> ApiResult<DemandQueueItem> {
    let patch = parse_patch(request)?;
    let updated = {
        let store = open_store(&state)?;
        let existing = store
            .get_item(&id)
            .map_err(ApiError::internal)?
            .ok_or_else(|| item_not_found(&id))?;
        let updated = match patch {
            ItemPatch::Status {
                status,
                quality_feedback,
            } => store.update_status(&id, status, quality_feedback.as_ref()),
            ItemPatch::Complete {
                generated_entity_id,
                generated_entity_type,
                quality_score,
            } => store.complete_item(
                &id,
                &generated_entity_id,
                generated_entity_type.unwrap_or(existing.entity_type),
                quality_score,
                state.config.queue.acceptance_threshold,
            ),
        };
        updated
            .map_err(transition_error)?
            .ok_or_else(|| item_not_found(&id))?
    };
    if let Some(event) = item_event(&updated) {
        state.notifier.publish(vec![event]).await;
    }
    Ok(ok(updated))
}

async fn delete_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<DeletedCount> {
    let store = open_store(&state)?;
    if !store.delete_item(&id).map_err(ApiError::internal)? {
        return Err(item_not_found(&id));
    }
    Ok(ok(DeletedCount { deleted: 1 }))
}

async fn clear_queue(
    State(state): State<ApiState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<DeletedCount> {
    let plan_id = required_plan_id(query.plan_id.as_deref())?;
    match query.status.as_deref().map(QueueStatus::from_str) {
        Some(Ok(QueueStatus::Pending)) => {}
        Some(Ok(other)) => {
            return Err(ApiError::bad_request(format!(
                "bulk delete only clears pending items, not {other}"
            )))
        }
        Some(Err(e)) => return Err(ApiError::bad_request(e.to_string())),
        None => return Err(ApiError::bad_request("status=pending is required")),
    }
    let store = open_store(&state)?;
    let deleted = store.clear_pending(plan_id).map_err(ApiError::internal)?;
    info!(plan = %plan_id, deleted, "cleared pending items");
    Ok(ok(DeletedCount { deleted }))
}

async fn reclaim_items(
    State(state): State<ApiState>,
    Json(request): Json<ReclaimRequest>,
) -> ApiResult<ReclaimedCount> {
    let minutes = request
        .older_than_minutes
        .unwrap_or(state.config.queue.stale_claim_minutes);
    let minutes = i64::try_from(minutes)
        .map_err(|_| ApiError::bad_request("older_than_minutes is too large"))?;
    let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
    let store = open_store(&state)?;
    require_plan(&store, &request.plan_id)?;
    let reclaimed = store
        .reclaim_stale(&request.plan_id, cutoff)
        .map_err(ApiError::internal)?;
    info!(plan = %request.plan_id, reclaimed, "reclaimed stale claims");
    Ok(ok(ReclaimedCount { reclaimed }))
}

async fn queue_stats(
    State(state): State<ApiState>,
    Query(query): Query<QueueQuery>,
) -> ApiResult<QueueStats> {
    let plan_id = required_plan_id(query.plan_id.as_deref())?;
    let store = open_store(&state)?;
    require_plan(&store, plan_id)?;
    let stats = store.queue_stats(plan_id).map_err(ApiError::internal)?;
    Ok(ok(stats))
}

async fn release_item(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<DemandQueueItem> {
    let store = open_store(&state)?;
    let item = store
        .release_item(&id)
        .map_err(transition_error)?
        .ok_or_else(|| item_not_found(&id))?;
    Ok(ok(item))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

fn open_store(state: &ApiState) -> std::result::Result<PlanStore, ApiError> {
    PlanStore::open(&state.db_path).map_err(ApiError::internal)
}

fn plan_not_found(id: &str) -> ApiError {
    ApiError::not_found(format!("strategic plan {id} not found"))
}

fn transition_error(err: anyhow::Error) -> ApiError {
    match err.downcast::<QueueConflict>() {
        Ok(conflict) => ApiError::conflict(conflict.to_string()),
        Err(err) => ApiError::internal(err),
    }
}

fn item_not_found(id: &str) -> ApiError {
    ApiError::not_found(format!("queue item {id} not found"))
}

fn require_plan(store: &PlanStore, id: &str) -> std::result::Result<StrategicPlan, ApiError> {
    store
        .get_plan(id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| plan_not_found(id))
}

fn analyze(
    state: &ApiState,
    store: &PlanStore,
    plan_id: &str,
    depth: AnalysisDepth,
) -> std::result::Result<GapAnalysisReport, ApiError> {
    let plan = require_plan(store, plan_id)?;
    let current = store.count_entities(plan_id).map_err(ApiError::internal)?;
    Ok(build_report(
        &plan,
        &current,
        depth,
        state.config.cascade.remainder_policy,
    ))
}

fn parse_kind(raw: &str) -> std::result::Result<EntityKind, ApiError> {
    EntityKind::from_str(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn required_plan_id(plan_id: Option<&str>) -> std::result::Result<&str, ApiError> {
    plan_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("plan_id is required"))
}

fn parse_filter(query: &QueueQuery) -> std::result::Result<QueueFilter, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(QueueStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let entity_type = query.entity_type.as_deref().map(parse_kind).transpose()?;
    Ok(QueueFilter {
        status,
        entity_type,
    })
}

fn parse_patch(request: PatchItemRequest) -> std::result::Result<ItemPatch, ApiError> {
    if let Some(generated_entity_id) = request.generated_entity_id {
        let raw_score = request
            .quality_score
            .ok_or_else(|| ApiError::bad_request("quality_score is required on completion"))?;
        let quality_score =
            validate_quality_score(raw_score).map_err(|e| ApiError::bad_request(e.to_string()))?;
        let generated_entity_type = request
            .generated_entity_type
            .as_deref()
            .map(parse_kind)
            .transpose()?;
        return Ok(ItemPatch::Complete {
            generated_entity_id,
            generated_entity_type,
            quality_score,
        });
    }
    let status = request
        .status
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("status or generated_entity_id is required"))?;
    let status = QueueStatus::from_str(status).map_err(|e| ApiError::bad_request(e.to_string()))?;
    if status.is_completed() {
        return Err(ApiError::bad_request(format!(
            "status {status} is set through completion, not directly"
        )));
    }
    Ok(ItemPatch::Status {
        status,
        quality_feedback: request.quality_feedback,
    })
}
