use axum::{
    routing::{get, post},
    Router,
};

use crate::api::handlers::{self, SharedState};

pub fn create_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Project context
        .route("/spaces/:space/projects", get(handlers::list_projects))
        .route("/spaces/:space/project-code", post(handlers::new_project_code))
        .route("/spaces/:space/projects/:project", get(handlers::get_project))
        // Design sessions
        .route("/sessions", post(handlers::create_session))
        .route(
            "/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/sessions/:id/events", post(handlers::apply_event))
        .route("/sessions/:id/preview", post(handlers::preview_tier))
        .route("/sessions/:id/export", get(handlers::export_tsv))
        .route("/sessions/:id/export/file", post(handlers::export_file))
        .route("/sessions/:id/inquiry", post(handlers::inquire))
        .route("/sessions/:id/register", post(handlers::register_session))
        // Registration jobs
        .route("/jobs/:id", get(handlers::get_job))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        // Cohort patients
        .route("/mcc/:project/patients", get(handlers::list_patients))
        .route("/mcc/patients", post(handlers::add_patient))
}
