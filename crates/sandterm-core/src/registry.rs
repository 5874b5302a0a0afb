//! SessionRegistry — the concurrent session table plus the background
//! sweep that reaps idle sessions and orphaned workspace directories
//! (spec.md §4.5).
//!
//! The `DashMap` table and the "spawn a cleanup task from the
//! constructor" shape are both ported from
//! `happy-server/src/storage/memory.rs::MemoryCache`; the per-session
//! ownership and CRUD surface is ported from
//! `happy-cli/src/daemon/multiplexer.rs::SessionMultiplexer`.
//! `cleanup_once` is shared between the timer and the
//! `POST /api/maintenance/cleanup` handler so both paths reap exactly
//! the same way (spec.md §6, grounded on
//! `original_source/app/api/maintenance_api.py`).

use crate::session::Session;
use crate::workspace::WorkspaceLayout;
use crate::Error;
use chrono::Utc;
use dashmap::DashMap;
use sandterm_types::{CreateSessionRequest, SessionId, SessionSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    storage_root: PathBuf,
    default_shell: String,
    idle_timeout: Duration,
    scrollback_capacity: usize,
}

/// Outcome of one sweep, returned by `cleanup_once` and reused
/// verbatim as the maintenance endpoint's response body.
pub struct CleanupOutcome {
    pub sessions_reaped: usize,
    pub orphaned_directories_cleaned: usize,
}

impl SessionRegistry {
    /// Build the registry and immediately spawn its background sweep
    /// task, same as `MemoryCache::new` does for its TTL sweep.
    pub fn new(
        storage_root: PathBuf,
        default_shell: String,
        idle_timeout: Duration,
        scrollback_capacity: usize,
    ) -> Arc<Self> {
        let registry = Arc::new(Self {
            sessions: Arc::new(DashMap::new()),
            storage_root,
            default_shell,
            idle_timeout,
            scrollback_capacity,
        });
        registry.clone().start_sweep_task();
        registry
    }

    fn start_sweep_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let outcome = self.cleanup_once().await;
                if outcome.sessions_reaped > 0 || outcome.orphaned_directories_cleaned > 0 {
                    info!(
                        sessions_reaped = outcome.sessions_reaped,
                        dirs_removed = outcome.orphaned_directories_cleaned,
                        "background sweep reaped idle sessions"
                    );
                }
            }
        });
    }

    pub async fn create(&self, req: &CreateSessionRequest) -> Result<SessionSummary, Error> {
        let id = SessionId::new();
        let session = Session::spawn(
            id,
            req,
            &self.storage_root,
            &self.default_shell,
            self.scrollback_capacity,
        )
        .await?;
        let summary = session.summary().await;
        self.sessions.insert(id, session);
        Ok(summary)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            out.push(session.summary().await);
        }
        out
    }

    pub async fn write(&self, id: &SessionId, data: Vec<u8>) -> Result<(), Error> {
        let session = self
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        session.write(data).await
    }

    pub async fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), Error> {
        let session = self
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        session.resize(cols, rows).await
    }

    /// Terminate and drop a session from the table. Idempotent w.r.t.
    /// the underlying process (`Session::terminate` is idempotent);
    /// a second call with the same id returns `NotFound`.
    pub async fn terminate(&self, id: &SessionId) -> Result<(), Error> {
        let session = self
            .sessions
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?
            .1;
        session.terminate().await
    }

    /// One reap-and-sweep pass: drop sessions that have gone inactive
    /// or sat idle past `idle_timeout`, then remove any workspace
    /// directory on disk with no corresponding live session (orphans
    /// left behind by a crash, per spec.md §4.5).
    pub async fn cleanup_once(&self) -> CleanupOutcome {
        let now = Utc::now();
        let mut stale_ids = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            let idle_for = now.signed_duration_since(session.last_activity());
            let idle_for = idle_for.to_std().unwrap_or(Duration::ZERO);
            if !session.is_active().await || idle_for >= self.idle_timeout {
                stale_ids.push(*entry.key());
            }
        }

        let mut sessions_reaped = 0;
        for id in stale_ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                if let Err(e) = session.terminate().await {
                    warn!(session_id = %id, error = %e, "error reaping idle session");
                }
                sessions_reaped += 1;
            }
        }

        let orphaned_directories_cleaned = self.sweep_orphaned_directories().await;

        CleanupOutcome {
            sessions_reaped,
            orphaned_directories_cleaned,
        }
    }

    /// Remove on-disk workspace directories with no corresponding live
    /// session, but only once their mtime is older than `idle_timeout`
    /// (spec.md §4.5/§8) — a directory mid-`WorkspaceLayout::create`
    /// has no session registered yet and must not be race-deleted out
    /// from under it.
    async fn sweep_orphaned_directories(&self) -> usize {
        let storage_root = self.storage_root.clone();
        let idle_timeout = self.idle_timeout;
        let live_ids: std::collections::HashSet<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();

        tokio::task::spawn_blocking(move || {
            let mut removed = 0;
            let entries = match std::fs::read_dir(&storage_root) {
                Ok(entries) => entries,
                Err(_) => return 0,
            };
            let now = std::time::SystemTime::now();
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if !file_type.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if live_ids.contains(&name) {
                    continue;
                }
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let Ok(modified) = metadata.modified() else {
                    continue;
                };
                let age = match now.duration_since(modified) {
                    Ok(age) => age,
                    Err(_) => continue,
                };
                if age < idle_timeout {
                    continue;
                }
                let layout = WorkspaceLayout {
                    root: entry.path(),
                    home: entry.path().join("home"),
                    home_bin: entry.path().join("home").join("bin"),
                    files: entry.path().join("files"),
                    venv: entry.path().join("venv"),
                };
                if layout.destroy().is_ok() {
                    removed += 1;
                }
            }
            removed
        })
        .await
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn echo_request() -> CreateSessionRequest {
        CreateSessionRequest {
            shell: Some("/bin/sh".to_string()),
            cwd: None,
            cols: Some(80),
            rows: Some(24),
            env: vec![],
        }
    }

    fn set_mtime(path: &std::path::Path, age: Duration) {
        let file = std::fs::File::open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn create_get_list_and_terminate() {
        let storage = tempdir().unwrap();
        let registry = SessionRegistry::new(
            storage.path().to_path_buf(),
            "/bin/sh".to_string(),
            Duration::from_secs(300),
            128,
        );

        let summary = registry.create(&echo_request()).await.unwrap();
        assert!(registry.get(&summary.id).is_some());
        assert_eq!(registry.list().await.len(), 1);

        registry.terminate(&summary.id).await.unwrap();
        assert!(registry.get(&summary.id).is_none());
        assert!(registry.terminate(&summary.id).await.is_err());
    }

    #[tokio::test]
    async fn cleanup_once_reaps_sessions_past_idle_timeout() {
        let storage = tempdir().unwrap();
        let registry = SessionRegistry::new(
            storage.path().to_path_buf(),
            "/bin/sh".to_string(),
            Duration::from_millis(1),
            128,
        );
        let summary = registry.create(&echo_request()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = registry.cleanup_once().await;
        assert_eq!(outcome.sessions_reaped, 1);
        assert!(registry.get(&summary.id).is_none());
    }

    #[tokio::test]
    async fn cleanup_once_removes_orphaned_directories_past_idle_timeout() {
        let storage = tempdir().unwrap();
        let stale = storage.path().join("stale-session-id");
        std::fs::create_dir_all(&stale).unwrap();
        set_mtime(&stale, Duration::from_secs(600));

        let registry = SessionRegistry::new(
            storage.path().to_path_buf(),
            "/bin/sh".to_string(),
            Duration::from_secs(300),
            128,
        );
        let outcome = registry.cleanup_once().await;
        assert_eq!(outcome.orphaned_directories_cleaned, 1);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn cleanup_once_leaves_freshly_created_orphans_alone() {
        let storage = tempdir().unwrap();
        let fresh = storage.path().join("mid-creation-session-id");
        std::fs::create_dir_all(&fresh).unwrap();

        let registry = SessionRegistry::new(
            storage.path().to_path_buf(),
            "/bin/sh".to_string(),
            Duration::from_secs(300),
            128,
        );
        let outcome = registry.cleanup_once().await;
        assert_eq!(outcome.orphaned_directories_cleaned, 0);
        assert!(fresh.exists());
    }
}
