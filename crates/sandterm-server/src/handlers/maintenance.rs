//! `POST /api/maintenance/cleanup` (spec.md §6).
//!
//! Response shape pinned from
//! `original_source/app/api/maintenance_api.py`, which returns
//! `{status, message, inactive_sessions_cleaned, orphaned_directories_cleaned}`.

use crate::AppState;
use axum::extract::State;
use axum::Json;
use sandterm_types::CleanupReport;

pub async fn cleanup(State(state): State<AppState>) -> Json<CleanupReport> {
    let outcome = state.registry.cleanup_once().await;
    Json(CleanupReport {
        status: "success",
        message: "Cleanup completed",
        inactive_sessions_cleaned: outcome.sessions_reaped,
        orphaned_directories_cleaned: outcome.orphaned_directories_cleaned,
    })
}
