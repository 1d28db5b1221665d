use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderName, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
};
use mfls_model::{
    Artifact, CreateSpec, MetadataEntry, RunNumber, TagMutation, TaskNumber, TaskPath,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    body::{self, OneOrMany},
    context::ServiceContext,
    error::ApiError,
    extract::Params,
};

/// Metadata service API version advertised on `/ping`.
pub const SERVICE_VERSION: &str = "2.5.0";

const VERSION_HEADER: HeaderName = HeaderName::from_static("metadata_service_version");

/// Seconds clients wait between heartbeats.
const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// HTTP API service builder.
pub struct HttpApi {
    ctx: ServiceContext,
}

impl HttpApi {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// Routes (`…` is `/flows/{flow}/runs/{run}/steps/{step}`):
    /// - GET /ping
    /// - POST, GET /flows/{flow}
    /// - POST /flows/{flow}/run, GET /flows/{flow}/runs, GET /flows/{flow}/runs/{run}
    /// - POST /flows/{flow}/runs/{run}/heartbeat
    /// - PATCH /flows/{flow}/runs/{run}/tag/mutate
    /// - GET /flows/{flow}/runs/{run}/steps
    /// - POST, GET …, POST …/step
    /// - POST …/task, GET …/tasks, GET …/tasks/{task}
    /// - POST …/tasks/{task}/heartbeat
    /// - POST …/tasks/{task}/artifact, GET …/tasks/{task}/artifacts
    /// - GET …/tasks/{task}/attempt/{attempt}/artifacts
    /// - POST, GET …/tasks/{task}/metadata
    /// - GET …/filtered_tasks?metadata_field_name=&pattern=
    pub fn router(self) -> Router {
        const STEP: &str = "/flows/{flow}/runs/{run}/steps/{step}";
        const TASK: &str = "/flows/{flow}/runs/{run}/steps/{step}/tasks/{task}";

        Router::new()
            .route("/ping", get(ping))
            .route("/flows/{flow}", post(create_flow).get(get_flow))
            .route("/flows/{flow}/run", post(create_run))
            .route("/flows/{flow}/runs", get(list_runs))
            .route("/flows/{flow}/runs/{run}", get(get_run))
            .route("/flows/{flow}/runs/{run}/heartbeat", post(heartbeat_run))
            .route("/flows/{flow}/runs/{run}/tag/mutate", patch(mutate_tags))
            .route("/flows/{flow}/runs/{run}/steps", get(list_steps))
            .route(STEP, post(create_step).get(get_step))
            .route(&format!("{STEP}/step"), post(create_step))
            .route(&format!("{STEP}/task"), post(create_task))
            .route(&format!("{STEP}/tasks"), get(list_tasks))
            .route(&format!("{STEP}/filtered_tasks"), get(filtered_tasks))
            .route(TASK, get(get_task))
            .route(&format!("{TASK}/heartbeat"), post(heartbeat_task))
            .route(&format!("{TASK}/artifact"), post(register_artifacts))
            .route(&format!("{TASK}/artifacts"), get(list_artifacts))
            .route(
                &format!("{TASK}/attempt/{{attempt}}/artifacts"),
                get(list_attempt_artifacts),
            )
            .route(
                &format!("{TASK}/metadata"),
                post(register_metadata).get(get_metadata),
            )
            .with_state(self.ctx)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TaskParams {
    flow: String,
    run: RunNumber,
    step: String,
    task: TaskNumber,
}

impl TaskParams {
    fn into_path(self) -> TaskPath {
        TaskPath::new(self.flow, self.run, self.step, self.task)
    }
}

#[derive(Debug, Deserialize)]
struct AttemptParams {
    flow: String,
    run: RunNumber,
    step: String,
    task: TaskNumber,
    attempt: u32,
}

#[derive(Debug, Deserialize)]
struct FilterQuery {
    #[serde(default)]
    metadata_field_name: String,
    #[serde(default = "match_all")]
    pattern: String,
}

fn match_all() -> String {
    ".*".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct HeartbeatResponse {
    wait_time_in_seconds: u64,
}

impl HeartbeatResponse {
    fn standard() -> Json<Self> {
        Json(Self {
            wait_time_in_seconds: HEARTBEAT_INTERVAL_SECS,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TagsResponse {
    tags: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Empty {}

// ============================================================================
// Handlers
// ============================================================================

/// GET /ping
///
/// Liveness only; does not count as a heartbeat.
async fn ping() -> impl IntoResponse {
    ([(VERSION_HEADER, SERVICE_VERSION)], "pong")
}

/// POST /flows/{flow}
async fn create_flow(
    State(ctx): State<ServiceContext>,
    Params(flow): Params<String>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let spec: CreateSpec = body::parse(&bytes)?;
    let record = ctx.blocking(move |s| s.create_flow(&flow, &spec)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /flows/{flow}
async fn get_flow(
    State(ctx): State<ServiceContext>,
    Params(flow): Params<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = ctx.blocking(move |s| s.get_flow(&flow)).await?;
    Ok(Json(record))
}

/// POST /flows/{flow}/run
async fn create_run(
    State(ctx): State<ServiceContext>,
    Params(flow): Params<String>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let spec: CreateSpec = body::parse(&bytes)?;
    let record = ctx.blocking(move |s| s.create_run(&flow, &spec)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /flows/{flow}/runs
async fn list_runs(
    State(ctx): State<ServiceContext>,
    Params(flow): Params<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = ctx.blocking(move |s| s.list_runs(&flow)).await?;
    Ok(Json(records))
}

/// GET /flows/{flow}/runs/{run}
async fn get_run(
    State(ctx): State<ServiceContext>,
    Params((flow, run)): Params<(String, RunNumber)>,
) -> Result<impl IntoResponse, ApiError> {
    let record = ctx.blocking(move |s| s.get_run(&flow, run)).await?;
    Ok(Json(record))
}

/// POST /flows/{flow}/runs/{run}/heartbeat
async fn heartbeat_run(
    State(ctx): State<ServiceContext>,
    Params((flow, run)): Params<(String, RunNumber)>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.heartbeat.touch();
    ctx.blocking(move |s| s.heartbeat_run(&flow, run)).await?;
    Ok(HeartbeatResponse::standard())
}

/// PATCH /flows/{flow}/runs/{run}/tag/mutate
async fn mutate_tags(
    State(ctx): State<ServiceContext>,
    Params((flow, run)): Params<(String, RunNumber)>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let mutation: TagMutation = body::parse(&bytes)?;
    let tags = ctx
        .blocking(move |s| s.mutate_tags(&flow, run, &mutation))
        .await?;
    Ok(Json(TagsResponse { tags }))
}

/// GET /flows/{flow}/runs/{run}/steps
async fn list_steps(
    State(ctx): State<ServiceContext>,
    Params((flow, run)): Params<(String, RunNumber)>,
) -> Result<impl IntoResponse, ApiError> {
    let records = ctx.blocking(move |s| s.list_steps(&flow, run)).await?;
    Ok(Json(records))
}

/// POST /flows/{flow}/runs/{run}/steps/{step}[/step]
async fn create_step(
    State(ctx): State<ServiceContext>,
    Params((flow, run, step)): Params<(String, RunNumber, String)>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let spec: CreateSpec = body::parse(&bytes)?;
    let record = ctx
        .blocking(move |s| s.create_step(&flow, run, &step, &spec))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /flows/{flow}/runs/{run}/steps/{step}
async fn get_step(
    State(ctx): State<ServiceContext>,
    Params((flow, run, step)): Params<(String, RunNumber, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let record = ctx.blocking(move |s| s.get_step(&flow, run, &step)).await?;
    Ok(Json(record))
}

/// POST …/steps/{step}/task
async fn create_task(
    State(ctx): State<ServiceContext>,
    Params((flow, run, step)): Params<(String, RunNumber, String)>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let spec: CreateSpec = body::parse(&bytes)?;
    let record = ctx
        .blocking(move |s| s.create_task(&flow, run, &step, &spec))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET …/steps/{step}/tasks
async fn list_tasks(
    State(ctx): State<ServiceContext>,
    Params((flow, run, step)): Params<(String, RunNumber, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let records = ctx.blocking(move |s| s.list_tasks(&flow, run, &step)).await?;
    Ok(Json(records))
}

/// GET …/steps/{step}/filtered_tasks
async fn filtered_tasks(
    State(ctx): State<ServiceContext>,
    Params((flow, run, step)): Params<(String, RunNumber, String)>,
    Query(query): Query<FilterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pathspecs = ctx
        .blocking(move |s| {
            s.filter_tasks_by_metadata(&flow, run, &step, &query.metadata_field_name, &query.pattern)
        })
        .await?;
    Ok(Json(pathspecs))
}

/// GET …/tasks/{task}
async fn get_task(
    State(ctx): State<ServiceContext>,
    Params(params): Params<TaskParams>,
) -> Result<impl IntoResponse, ApiError> {
    let path = params.into_path();
    let record = ctx.blocking(move |s| s.get_task(&path)).await?;
    Ok(Json(record))
}

/// POST …/tasks/{task}/heartbeat
async fn heartbeat_task(
    State(ctx): State<ServiceContext>,
    Params(params): Params<TaskParams>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.heartbeat.touch();
    let path = params.into_path();
    ctx.blocking(move |s| s.heartbeat_task(&path)).await?;
    Ok(HeartbeatResponse::standard())
}

/// POST …/tasks/{task}/artifact
async fn register_artifacts(
    State(ctx): State<ServiceContext>,
    Params(params): Params<TaskParams>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let artifacts: Vec<Artifact> = body::parse::<OneOrMany<Artifact>>(&bytes)?.into();
    let path = params.into_path();
    let count = ctx
        .blocking(move |s| s.register_artifacts(&path, artifacts))
        .await?;
    trace!(count, "artifact request served");
    Ok(Json(Empty::default()))
}

/// GET …/tasks/{task}/artifacts
async fn list_artifacts(
    State(ctx): State<ServiceContext>,
    Params(params): Params<TaskParams>,
) -> Result<impl IntoResponse, ApiError> {
    let path = params.into_path();
    let records = ctx.blocking(move |s| s.list_artifacts(&path, None)).await?;
    Ok(Json(records))
}

/// GET …/tasks/{task}/attempt/{attempt}/artifacts
async fn list_attempt_artifacts(
    State(ctx): State<ServiceContext>,
    Params(params): Params<AttemptParams>,
) -> Result<impl IntoResponse, ApiError> {
    let attempt = params.attempt;
    let path = TaskPath::new(params.flow, params.run, params.step, params.task);
    let records = ctx
        .blocking(move |s| s.list_artifacts(&path, Some(attempt)))
        .await?;
    Ok(Json(records))
}

/// POST …/tasks/{task}/metadata
async fn register_metadata(
    State(ctx): State<ServiceContext>,
    Params(params): Params<TaskParams>,
    bytes: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let entries: Vec<MetadataEntry> = body::parse::<OneOrMany<MetadataEntry>>(&bytes)?.into();
    let path = params.into_path();
    ctx.blocking(move |s| s.register_metadata(&path, entries))
        .await?;
    Ok(Json(Empty::default()))
}

/// GET …/tasks/{task}/metadata
async fn get_metadata(
    State(ctx): State<ServiceContext>,
    Params(params): Params<TaskParams>,
) -> Result<impl IntoResponse, ApiError> {
    let path = params.into_path();
    let records = ctx.blocking(move |s| s.get_metadata(&path)).await?;
    Ok(Json(records))
}
