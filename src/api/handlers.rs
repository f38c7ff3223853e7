use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Json as RequestJson,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::error::{GenerationError, RegistrationError};
use crate::logic::{
    context_options, generate_project_code, send_inquiry, validate_project_code, BatchRegistrar,
    Conditions, DesignContext, DesignEvent, DesignSnapshot, DesignState, Inquiry,
    JobTracker, MccPatient, MccPatientRequest, MccPlanner, MccProjectScan, ProgressSink,
    ProjectContext, ProjectOption, TierKind, TsvSerializer,
};
use crate::model::{Id, RegistrationBatch, RegistrationJob, UserContext, Vocabularies};
use crate::store::{DesignSession, PersonStore, RegistryStore, SessionCache};

/// Everything the handlers share
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<dyn RegistryStore>,
    pub people: Option<Arc<dyn PersonStore>>,
    pub registrar: Arc<BatchRegistrar>,
    pub sessions: SessionCache,
    pub jobs: RwLock<HashMap<Id, Arc<JobTracker>>>,
    pub vocabularies: Arc<Vocabularies>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        registry: Arc<dyn RegistryStore>,
        people: Option<Arc<dyn PersonStore>>,
        vocabularies: Vocabularies,
    ) -> Self {
        let registrar = Arc::new(BatchRegistrar::new(
            registry.clone(),
            people.clone(),
            config.registration.retry_policy(),
        ));
        let sessions = SessionCache::new(config.cache.session_ttl());
        Self {
            config,
            registry,
            people,
            registrar,
            sessions,
            jobs: RwLock::new(HashMap::new()),
            vocabularies: Arc::new(vocabularies),
        }
    }
}

impl AppState {
    /// Drop idle sessions and jobs finished longer ago than the configured lifetime
    pub async fn sweep(&self) -> (usize, usize) {
        let sessions = self.sessions.clear_expired().await;
        let ttl = self.config.cache.job_ttl();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, tracker| !tracker.is_expired(ttl));
        let evicted = before - jobs.len();
        if sessions > 0 || evicted > 0 {
            info!("Evicted {} idle sessions and {} finished jobs", sessions, evicted);
        }
        (sessions, evicted)
    }
}

pub type SharedState = Arc<AppState>;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// False when the request can be repeated with corrected input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            recoverable: None,
        }
    }
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(&format!("{} not found", what))),
    )
}

fn internal(e: anyhow::Error) -> ApiError {
    error!("Request failed: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(&format!("{:#}", e))),
    )
}

/// Recoverable generation errors ask for new input; format mismatches block the project
fn generation_error(e: GenerationError) -> ApiError {
    let status = if e.is_recoverable() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::CONFLICT
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            recoverable: Some(e.is_recoverable()),
        }),
    )
}

fn registration_error(e: RegistrationError) -> ApiError {
    (StatusCode::CONFLICT, Json(ErrorResponse::new(&e.to_string())))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// Project context

pub async fn list_projects(
    State(state): State<SharedState>,
    Path(space): Path<String>,
) -> Result<Json<Vec<ProjectOption>>, ApiError> {
    context_options(state.registry.as_ref(), state.people.as_deref(), &space)
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectCodeResponse {
    pub code: String,
}

pub async fn new_project_code(
    State(state): State<SharedState>,
    Path(space): Path<String>,
) -> Result<Json<ProjectCodeResponse>, ApiError> {
    let code = generate_project_code(state.registry.as_ref(), &space)
        .await
        .map_err(internal)?;
    Ok(Json(ProjectCodeResponse { code }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub space: String,
    pub project: String,
    pub exists: bool,
    pub has_bio_entities: bool,
    pub has_extracts: bool,
    pub samples: usize,
    pub experiments: usize,
}

pub async fn get_project(
    State(state): State<SharedState>,
    Path((space, project)): Path<(String, String)>,
) -> Result<Json<ProjectSummary>, ApiError> {
    let context = ProjectContext::load(state.registry.as_ref(), &space, &project)
        .await
        .map_err(internal)?;
    Ok(Json(ProjectSummary {
        has_bio_entities: context.has_bio_entities(),
        has_extracts: context.has_extracts(),
        samples: context.samples.len(),
        experiments: context.experiments.len(),
        space: context.space,
        project: context.project,
        exists: context.exists,
    }))
}

// Design sessions

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub space: Option<String>,
    pub project: String,
    #[serde(default)]
    pub pilot: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: Id,
    pub user: String,
    pub created_at: String,
    pub design: DesignSnapshot,
}

impl From<&DesignSession> for SessionResponse {
    fn from(session: &DesignSession) -> Self {
        Self {
            id: session.id.clone(),
            user: session.user.clone(),
            created_at: session.created_at.clone(),
            design: session.state.snapshot(),
        }
    }
}

/// Every session seeds its own counter from the registry's current state
pub async fn create_session(
    State(state): State<SharedState>,
    user: UserContext,
    RequestJson(request): RequestJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    validate_project_code(&request.project).map_err(generation_error)?;
    let space = request
        .space
        .unwrap_or_else(|| state.config.registry.default_space.clone());
    let context = ProjectContext::load(state.registry.as_ref(), &space, &request.project)
        .await
        .map_err(internal)?;

    let design = DesignState::new(
        DesignContext {
            space,
            project: request.project,
            pilot: request.pilot,
        },
        state.vocabularies.clone(),
        context.counter(),
    )
    .with_registered(context.samples);
    let session = DesignSession::new(user.user_id.clone(), design);
    info!(
        "User {} opened design session {} for {}",
        user.display_name(),
        session.id,
        session.state.context.project
    );
    let response = SessionResponse::from(&session);
    state.sessions.put(session).await;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn load_session(state: &AppState, id: &str) -> Result<DesignSession, ApiError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| not_found("Session"))
}

pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    Ok(Json(SessionResponse::from(&session)))
}

pub async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Session"))
    }
}

pub async fn apply_event(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
    RequestJson(event): RequestJson<DesignEvent>,
) -> Result<Json<SessionResponse>, ApiError> {
    match state.sessions.apply(&id, event).await {
        None => Err(not_found("Session")),
        Some(Ok(session)) => Ok(Json(SessionResponse::from(&session))),
        Some(Err(e)) => Err(generation_error(e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub tier: TierKind,
    #[serde(default)]
    pub conditions: Conditions,
}

pub async fn preview_tier(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
    RequestJson(request): RequestJson<PreviewRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    let session = load_session(&state, &id).await?;
    session
        .state
        .preview(request.tier, &request.conditions)
        .map(Json)
        .map_err(generation_error)
}

/// TSV of the current design; `ETag` is the content fingerprint
pub async fn export_tsv(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = load_session(&state, &id).await?;
    let samples = session.state.samples();
    let tsv = TsvSerializer::render(&samples).map_err(generation_error)?;
    let etag = format!("\"{}\"", TsvSerializer::fingerprint(&tsv));

    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);
    if unchanged {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/tab-separated-values; charset=utf-8".to_string()),
            (header::ETAG, etag),
        ],
        tsv,
    )
        .into_response())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportFileResponse {
    pub path: PathBuf,
    pub fingerprint: String,
}

pub async fn export_file(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
) -> Result<Json<ExportFileResponse>, ApiError> {
    let session = load_session(&state, &id).await?;
    let samples = session.state.samples();
    let path = TsvSerializer::write_file(
        &state.config.export.directory,
        &session.state.context.project,
        &samples,
    )
    .map_err(|e| internal(e.into()))?;
    let tsv = TsvSerializer::render(&samples).map_err(generation_error)?;
    Ok(Json(ExportFileResponse {
        path,
        fingerprint: TsvSerializer::fingerprint(&tsv),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct InquiryRequest {
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Ask staff to set up the designed project; delivery failures are only logged
pub async fn inquire(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
    user: UserContext,
    RequestJson(request): RequestJson<InquiryRequest>,
) -> Result<StatusCode, ApiError> {
    let session = load_session(&state, &id).await?;
    let tsv = TsvSerializer::render(&session.state.samples()).map_err(generation_error)?;
    let inquiry = Inquiry {
        space: session.state.context.space.clone(),
        project: session.state.context.project.clone(),
        user: user.user_id,
        tsv,
        notes: request.notes,
    };
    send_inquiry(state.registry.as_ref(), &inquiry).await;
    Ok(StatusCode::ACCEPTED)
}

// Registration jobs

async fn start_job(state: &SharedState, batch: RegistrationBatch) -> Result<RegistrationJob, ApiError> {
    let tracker = Arc::new(JobTracker::new(&batch.project, batch.total_samples()));
    let completion = tracker.clone();
    state
        .registrar
        .spawn(
            batch,
            tracker.clone() as Arc<dyn ProgressSink>,
            tracker.cancel_flag(),
            move |report| completion.complete(report),
        )
        .map_err(registration_error)?;
    let job = tracker.snapshot();
    state.jobs.write().await.insert(job.id.clone(), tracker);
    Ok(job)
}

pub async fn register_session(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
    user: UserContext,
) -> Result<(StatusCode, Json<RegistrationJob>), ApiError> {
    let session = load_session(&state, &id).await?;
    if session.state.samples().is_empty() {
        return Err(generation_error(GenerationError::no_samples("design")));
    }
    let batch = session.state.registration_batch(&user.user_id);
    let job = start_job(&state, batch).await?;
    info!("Started registration job {} for {}", job.id, job.project);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
) -> Result<Json<RegistrationJob>, ApiError> {
    let jobs = state.jobs.read().await;
    let tracker = jobs.get(&id).ok_or_else(|| not_found("Job"))?;
    Ok(Json(tracker.snapshot()))
}

/// Stops scheduling further tiers; 409 once the job has finished
pub async fn cancel_job(
    State(state): State<SharedState>,
    Path(id): Path<Id>,
) -> Result<Json<RegistrationJob>, ApiError> {
    let jobs = state.jobs.read().await;
    let tracker = jobs.get(&id).ok_or_else(|| not_found("Job"))?;
    if !tracker.cancel() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("Job is no longer running")),
        ));
    }
    Ok(Json(tracker.snapshot()))
}

// Cohort patients

async fn scan_cohort(state: &AppState, project: &str) -> Result<(ProjectContext, MccProjectScan), ApiError> {
    let space = &state.config.registry.mcc_space;
    let context = ProjectContext::load(state.registry.as_ref(), space, project)
        .await
        .map_err(internal)?;
    let scan = MccProjectScan::scan(project, &context.samples, &context.experiments)
        .map_err(generation_error)?;
    Ok((context, scan))
}

pub async fn list_patients(
    State(state): State<SharedState>,
    Path(project): Path<String>,
) -> Result<Json<Vec<MccPatient>>, ApiError> {
    let (_, scan) = scan_cohort(&state, &project).await?;
    Ok(Json(scan.existing_patients()))
}

pub async fn add_patient(
    State(state): State<SharedState>,
    user: UserContext,
    RequestJson(request): RequestJson<MccPatientRequest>,
) -> Result<(StatusCode, Json<RegistrationJob>), ApiError> {
    let (context, scan) = scan_cohort(&state, &request.project).await?;
    let mut counter = context.counter();
    let batch = MccPlanner::generate(&request, &scan, &context.space, &mut counter)
        .map_err(generation_error)?;
    info!("Registering cohort case {} in {}", batch.case, request.project);

    let job = start_job(
        &state,
        RegistrationBatch {
            space: context.space,
            project: request.project,
            description: None,
            secondary_name: None,
            user: user.user_id,
            experiments: batch.experiments,
            tiers: batch.tiers,
            notes: Vec::new(),
            people: Default::default(),
        },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
