//! Session — a single PTY-backed shell, its screen state, and its
//! fan-out of output to attached sinks (spec.md §4.4).
//!
//! The reader/writer/select-loop shape is ported from
//! `happy-cli/src/daemon/persistence.rs::run_pty_loop`: a dedicated
//! blocking task owns the PTY master's `Read` half and forwards chunks
//! over an mpsc channel into an async `tokio::select!` loop, which also
//! owns resize requests and shutdown. Unlike that loop, output fans out
//! to an explicit `OutputSink` set instead of a `broadcast` channel
//! (spec.md §9), and every shell session lives under an isolated
//! `WorkspaceLayout` (spec.md §4.6) instead of the teacher's shared
//! working directory.

use crate::emulator::ScreenEmulator;
use crate::path_guard;
use crate::ring_buffer::RingBuffer;
use crate::sink::OutputSink;
use crate::workspace::WorkspaceLayout;
use crate::Error;
use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use sandterm_types::{CreateSessionRequest, SessionState, SessionSummary};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Grace window between SIGTERM and SIGKILL. Widened from the
/// teacher's 100ms: a shell inside a freshly provisioned venv needs
/// more than a heartbeat to unwind (spec.md §4.4).
const TERMINATE_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Bound on how long `terminate` waits for the reader task to notice
/// EOF and exit before giving up on the join.
const READER_JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Default scrollback depth, configurable via `RING_BUFFER_CAPACITY`
/// (spec.md §4.2, SPEC_FULL.md §6).
pub const DEFAULT_SCROLLBACK_CAPACITY: usize = crate::ring_buffer::DEFAULT_CAPACITY;

type SinkId = u64;

#[derive(Debug)]
pub struct Session {
    pub id: sandterm_types::SessionId,
    workspace: WorkspaceLayout,
    cwd: PathBuf,
    shell: String,
    state: RwLock<SessionState>,
    created_at: DateTime<Utc>,
    last_activity: StdMutex<DateTime<Utc>>,
    pid: StdMutex<Option<u32>>,
    cols: AtomicU16,
    rows: AtomicU16,

    cmd_tx: mpsc::Sender<Vec<u8>>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    shutdown_tx: AsyncMutex<Option<mpsc::Sender<()>>>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,

    emulator: Arc<StdMutex<ScreenEmulator>>,
    scrollback: StdMutex<RingBuffer<Vec<u8>>>,
    sinks: dashmap::DashMap<SinkId, Arc<dyn OutputSink>>,
    next_sink_id: AtomicU64,
}

impl Session {
    /// Spawn a new shell inside a freshly provisioned workspace.
    pub async fn spawn(
        id: sandterm_types::SessionId,
        req: &CreateSessionRequest,
        storage_root: &std::path::Path,
        default_shell: &str,
        scrollback_capacity: usize,
    ) -> Result<Arc<Self>, Error> {
        let cols = req.cols.filter(|&c| c > 0).unwrap_or(80);
        let rows = req.rows.filter(|&r| r > 0).unwrap_or(24);
        if cols > 1000 || rows > 1000 {
            return Err(Error::BadDims { cols, rows });
        }

        let workspace = WorkspaceLayout::create(storage_root, &id.to_string())?;
        let shell = req
            .shell
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(default_shell)
            .to_string();
        // `cwd` defaults to `<files>` when the caller did not supply one
        // (spec.md §4.4); a supplied value is resolved against the
        // workspace root so a caller cannot point the shell outside its
        // own sandbox.
        let cwd = match req.cwd.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(requested) => path_guard::resolve(&workspace.root, requested)?,
            None => workspace.files.clone(),
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;

        let mut builder = CommandBuilder::new(&shell);
        builder.cwd(&cwd);
        for (key, value) in build_env(&req.env, &workspace, &id) {
            builder.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;
        let pid = child.process_id();
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::SpawnFailed(e.to_string()))?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<Vec<u8>>(256);
        let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(16);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (reader_tx, mut reader_rx) = mpsc::channel::<std::io::Result<Vec<u8>>>(256);

        tokio::task::spawn_blocking(move || {
            while let Some(data) = cmd_rx.blocking_recv() {
                if writer.write_all(&data).is_err() || writer.flush().is_err() {
                    break;
                }
            }
        });

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if reader_tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = reader_tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });

        let session = Arc::new(Self {
            id,
            workspace,
            cwd,
            shell,
            state: RwLock::new(SessionState::Running),
            created_at: Utc::now(),
            last_activity: StdMutex::new(Utc::now()),
            pid: StdMutex::new(pid),
            cols: AtomicU16::new(cols),
            rows: AtomicU16::new(rows),
            cmd_tx,
            resize_tx,
            shutdown_tx: AsyncMutex::new(Some(shutdown_tx)),
            reader_task: AsyncMutex::new(None),
            emulator: Arc::new(StdMutex::new(ScreenEmulator::new(rows, cols))),
            scrollback: StdMutex::new(RingBuffer::new(scrollback_capacity)),
            sinks: dashmap::DashMap::new(),
            next_sink_id: AtomicU64::new(0),
        });

        let loop_session = session.clone();
        let master = pair.master;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(res) = reader_rx.recv() => {
                        match res {
                            Ok(data) => {
                                loop_session.ingest_output(&data);
                            }
                            Err(e) => {
                                warn!(session_id = %loop_session.id, error = %e, "pty read error");
                                break;
                            }
                        }
                    }
                    Some((new_cols, new_rows)) = resize_rx.recv() => {
                        if let Err(e) = master.resize(PtySize {
                            cols: new_cols,
                            rows: new_rows,
                            pixel_width: 0,
                            pixel_height: 0,
                        }) {
                            warn!(session_id = %loop_session.id, error = %e, "pty resize failed");
                            continue;
                        }
                        loop_session.emulator.lock().unwrap().resize(new_rows, new_cols);
                        loop_session.cols.store(new_cols, Ordering::Relaxed);
                        loop_session.rows.store(new_rows, Ordering::Relaxed);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(session_id = %loop_session.id, "session shutdown requested");
                        break;
                    }
                    else => break,
                }
            }
            let _ = tokio::task::spawn_blocking(move || child.wait()).await;
            *loop_session.state.write().await = SessionState::Terminated;
            loop_session.close_sinks();
        });

        *session.reader_task.lock().await = Some(task);

        Ok(session)
    }

    pub async fn summary(&self) -> SessionSummary {
        let last_activity = *self.last_activity.lock().unwrap();
        let pid = *self.pid.lock().unwrap();
        let active = self.state.read().await.is_active();
        SessionSummary {
            id: self.id,
            shell: self.shell.clone(),
            cwd: self.cwd.display().to_string(),
            cols: self.cols.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            created_at: self.created_at,
            last_activity,
            active,
            pid,
        }
    }

    pub fn workspace(&self) -> &WorkspaceLayout {
        &self.workspace
    }

    pub async fn is_active(&self) -> bool {
        self.state.read().await.is_active()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock().unwrap()
    }

    /// Write raw input bytes to the shell. Updates `last_activity`
    /// (spec.md §4.4: writes count as activity; resize does not).
    pub async fn write(&self, data: Vec<u8>) -> Result<(), Error> {
        if !self.is_active().await {
            return Err(Error::NotActive);
        }
        self.cmd_tx
            .send(data)
            .await
            .map_err(|_| Error::NotActive)?;
        *self.last_activity.lock().unwrap() = Utc::now();
        Ok(())
    }

    /// Resize the PTY and the screen emulator. Does not count as
    /// activity for idle-reaping purposes.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), Error> {
        if cols == 0 || rows == 0 || cols > 1000 || rows > 1000 {
            return Err(Error::BadDims { cols, rows });
        }
        if !self.is_active().await {
            return Err(Error::NotActive);
        }
        self.resize_tx
            .send((cols, rows))
            .await
            .map_err(|_| Error::NotActive)
    }

    /// Attach a sink: it immediately receives the current screen
    /// snapshot as a single chunk, then every subsequent byte chunk as
    /// it arrives. Returns an id for later `detach`.
    pub fn attach(&self, sink: Arc<dyn OutputSink>) -> u64 {
        let id = self.next_sink_id.fetch_add(1, Ordering::Relaxed);
        self.sinks.insert(id, sink);
        id
    }

    pub fn detach(&self, sink_id: u64) {
        if let Some((_, sink)) = self.sinks.remove(&sink_id) {
            sink.close();
        }
    }

    /// Last `k` rendered output chunks, oldest first. Opt-in scrollback
    /// replay only (spec.md §9); callers decide whether to request it.
    pub fn tail(&self, k: usize) -> Vec<Vec<u8>> {
        self.scrollback.lock().unwrap().tail(k)
    }

    /// Current rendered screen, one string per row.
    pub fn display(&self) -> Vec<String> {
        self.emulator.lock().unwrap().display()
    }

    /// Idempotent: terminating an already-terminated session is a
    /// no-op. SIGTERM, wait out the grace window, SIGKILL if still
    /// alive, then tear down the workspace.
    pub async fn terminate(&self) -> Result<(), Error> {
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Terminated || *state == SessionState::Terminating {
                return Ok(());
            }
            *state = SessionState::Terminating;
        }

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }

        let pid = *self.pid.lock().unwrap();
        if let Some(pid) = pid {
            signal_terminate(pid);
            tokio::time::sleep(TERMINATE_GRACE).await;
            signal_kill(pid);
        }

        if let Some(task) = self.reader_task.lock().await.take() {
            let _ = tokio::time::timeout(READER_JOIN_TIMEOUT, task).await;
        }

        *self.state.write().await = SessionState::Terminated;
        self.close_sinks();
        self.workspace.destroy().map_err(Error::Io)?;
        Ok(())
    }

    fn ingest_output(&self, data: &[u8]) {
        self.emulator.lock().unwrap().feed(data);
        self.scrollback.lock().unwrap().push(data.to_vec());
        *self.last_activity.lock().unwrap() = Utc::now();
        for entry in self.sinks.iter() {
            entry.value().deliver(data);
        }
    }

    fn close_sinks(&self) {
        for entry in self.sinks.iter() {
            entry.value().close();
        }
        self.sinks.clear();
    }
}

/// Build the shell's environment: an authoritative allow-list plus
/// caller-supplied entries, with the caller forbidden from overriding
/// the reserved keys (spec.md §4.4 — a caller cannot spoof `HOME`,
/// `PATH`, or the session-id marker).
fn build_env(
    requested: &[(String, String)],
    workspace: &WorkspaceLayout,
    id: &sandterm_types::SessionId,
) -> Vec<(String, String)> {
    const RESERVED: [&str; 4] = ["HOME", "PATH", "TERM", "SANDTERM_SESSION_ID"];

    let mut env = vec![
        ("HOME".to_string(), workspace.home.display().to_string()),
        ("TERM".to_string(), "xterm-256color".to_string()),
        (
            "PATH".to_string(),
            format!(
                "{}:{}:{}:/usr/local/bin:/usr/bin:/bin",
                workspace.home_bin.display(),
                workspace.files.display(),
                workspace.venv.join("bin").display(),
            ),
        ),
        ("SANDTERM_SESSION_ID".to_string(), id.to_string()),
    ];

    for (key, value) in requested {
        if RESERVED.contains(&key.as_str()) {
            continue;
        }
        env.push((key.clone(), value.clone()));
    }

    env
}

#[cfg(unix)]
fn signal_terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn signal_kill(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) {}

#[cfg(not(unix))]
fn signal_kill(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::OutputSink;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct CollectingSink {
        chunks: Mutex<Vec<Vec<u8>>>,
    }

    impl OutputSink for CollectingSink {
        fn deliver(&self, bytes: &[u8]) {
            self.chunks.lock().unwrap().push(bytes.to_vec());
        }
        fn close(&self) {}
    }

    fn echo_request() -> CreateSessionRequest {
        CreateSessionRequest {
            shell: Some("/bin/sh".to_string()),
            cwd: None,
            cols: Some(80),
            rows: Some(24),
            env: vec![],
        }
    }

    #[tokio::test]
    async fn spawn_write_and_read_echo() {
        let storage = tempdir().unwrap();
        let id = sandterm_types::SessionId::new();
        let session = Session::spawn(id, &echo_request(), storage.path(), "/bin/sh", 128)
            .await
            .unwrap();

        let sink = Arc::new(CollectingSink {
            chunks: Mutex::new(Vec::new()),
        });
        session.attach(sink.clone());

        session
            .write(b"echo hello-sandterm\n".to_vec())
            .await
            .unwrap();

        let mut saw_output = false;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let joined: Vec<u8> = sink.chunks.lock().unwrap().concat();
            if String::from_utf8_lossy(&joined).contains("hello-sandterm") {
                saw_output = true;
                break;
            }
        }
        assert!(saw_output, "expected echoed output to reach the sink");

        session.terminate().await.unwrap();
        assert!(!session.is_active().await);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let storage = tempdir().unwrap();
        let id = sandterm_types::SessionId::new();
        let session = Session::spawn(id, &echo_request(), storage.path(), "/bin/sh", 128)
            .await
            .unwrap();
        session.terminate().await.unwrap();
        session.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_defaults_cwd_to_workspace_files() {
        let storage = tempdir().unwrap();
        let id = sandterm_types::SessionId::new();
        let session = Session::spawn(id, &echo_request(), storage.path(), "/bin/sh", 128)
            .await
            .unwrap();
        let expected = session.workspace().files.display().to_string();
        assert_eq!(session.summary().await.cwd, expected);
        session.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_honors_requested_cwd_inside_workspace() {
        let storage = tempdir().unwrap();
        let id = sandterm_types::SessionId::new();
        let mut req = echo_request();
        req.cwd = Some("files".to_string());
        let session = Session::spawn(id, &req, storage.path(), "/bin/sh", 128)
            .await
            .unwrap();
        let expected = session
            .workspace()
            .files
            .canonicalize()
            .unwrap()
            .display()
            .to_string();
        assert_eq!(session.summary().await.cwd, expected);
        session.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_rejects_cwd_escaping_workspace() {
        let storage = tempdir().unwrap();
        let id = sandterm_types::SessionId::new();
        let mut req = echo_request();
        req.cwd = Some("../../etc".to_string());
        let err = Session::spawn(id, &req, storage.path(), "/bin/sh", 128)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PathRejected(_)));
    }

    #[test]
    fn build_env_rejects_reserved_overrides() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceLayout::create(dir.path(), "sess").unwrap();
        let id = sandterm_types::SessionId::new();
        let requested = vec![
            ("HOME".to_string(), "/evil".to_string()),
            ("MY_VAR".to_string(), "ok".to_string()),
        ];
        let env = build_env(&requested, &workspace, &id);
        let home = env.iter().find(|(k, _)| k == "HOME").unwrap();
        assert_ne!(home.1, "/evil");
        assert!(env.iter().any(|(k, v)| k == "MY_VAR" && v == "ok"));
    }
}
