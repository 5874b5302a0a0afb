//! WorkspaceLayout — the per-session directory tree and its startup
//! rc files (spec.md §4.6).
//!
//! The artifact set is ported from
//! `original_source/app/models/terminal_session.py::_setup_user_environment`
//! (bash heredocs there, `std::fs::write` here), adapted to a
//! POSIX-portable shell rc instead of bash-specific syntax, and
//! trimmed to what a sandboxed session needs.

use crate::Error;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::warn;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Wall-clock budget for provisioning the per-session venv (spec.md §9:
/// "a hard wall-clock timeout (30s is a known value)").
const VENV_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    pub root: PathBuf,
    pub home: PathBuf,
    pub home_bin: PathBuf,
    pub files: PathBuf,
    pub venv: PathBuf,
}

impl WorkspaceLayout {
    /// Build `root_dir = <storage_root>/<id>` and its subdirectories,
    /// write the rc artifacts, seed `files/`, and provision the venv.
    /// Provisioning failures are logged and never abort session
    /// creation (spec.md §4.6).
    pub fn create(storage_root: &Path, session_id: &str) -> Result<Self, Error> {
        let root = storage_root.join(session_id);
        let home = root.join("home");
        let home_bin = home.join("bin");
        let files = root.join("files");
        let venv = root.join("venv");

        for dir in [&root, &home, &home_bin, &files, &venv] {
            create_dir_mode(dir, 0o755)
                .map_err(|e| Error::WorkspaceSetupFailed(format!("{}: {}", dir.display(), e)))?;
        }

        let layout = Self {
            root,
            home,
            home_bin,
            files,
            venv,
        };

        layout
            .write_rc_files(session_id)
            .map_err(|e| Error::WorkspaceSetupFailed(e.to_string()))?;
        layout
            .seed_files()
            .map_err(|e| Error::WorkspaceSetupFailed(e.to_string()))?;
        layout.provision_venv();

        Ok(layout)
    }

    /// Remove the entire workspace tree. Idempotent: a missing
    /// directory is not an error.
    pub fn destroy(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn write_rc_files(&self, session_id: &str) -> std::io::Result<()> {
        write_if_absent(
            &self.home.join(".shellrc"),
            &shellrc_contents(session_id, &self.home, &self.files, &self.venv),
            0o644,
        )?;
        write_if_absent(
            &self.home.join(".profile"),
            "if [ -f \"$HOME/.shellrc\" ]; then\n  . \"$HOME/.shellrc\"\nfi\n",
            0o644,
        )?;
        write_if_absent(&self.home.join(".bash_history"), "", 0o644)?;
        write_if_absent(&self.home.join(".vimrc"), VIMRC, 0o644)?;
        write_if_absent(&self.home.join(".tmux.conf"), TMUX_CONF, 0o644)?;
        write_if_absent(&self.home.join(".inputrc"), INPUTRC, 0o644)?;
        Ok(())
    }

    fn seed_files(&self) -> std::io::Result<()> {
        write_if_absent(
            &self.files.join("README.txt"),
            &readme_contents(),
            0o644,
        )?;
        write_if_absent(&self.files.join("example.py"), EXAMPLE_SCRIPT, 0o755)?;
        Ok(())
    }

    /// Provision the per-session Python virtual environment via
    /// `python3 -m venv`. Grounded on
    /// `original_source/app/models/terminal_session.py::_create_virtual_environment`;
    /// unlike that implementation, failures here degrade gracefully
    /// instead of aborting session creation.
    fn provision_venv(&self) {
        if self.venv.join("bin").join("activate").exists() {
            return;
        }
        let venv = self.venv.clone();
        match run_with_timeout(
            Command::new("python3").arg("-m").arg("venv").arg(&venv),
            VENV_TIMEOUT,
        ) {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(?status, "venv provisioning exited non-zero, rc degrades gracefully"),
            Err(e) => warn!(error = %e, "venv provisioning failed, rc degrades gracefully"),
        }
    }
}

fn create_dir_mode(dir: &Path, mode: u32) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        let mut perms = std::fs::metadata(dir)?.permissions();
        perms.set_mode(mode);
        std::fs::set_permissions(dir, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    Ok(())
}

fn write_if_absent(path: &Path, contents: &str, mode: u32) -> std::io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(mode);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    Ok(())
}

/// Run a `Command`, killing it if it runs past `timeout`. Used by the
/// venv provisioner; the code-run and package-manager collaborators
/// (out of scope here) apply the same bound per spec.md §9.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<std::process::ExitStatus> {
    let mut child = cmd.spawn()?;
    let start = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "command exceeded timeout",
            ));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn shellrc_contents(session_id: &str, home: &Path, files: &Path, venv: &Path) -> String {
    format!(
        r#"# sandterm session rc — generated, write-if-absent
export SANDTERM_SESSION_ID="{id}"
export PATH="{home}/bin:{files}:{venv}/bin:$PATH"
export PS1='\[\033[01;32m\]sandterm\[\033[00m\]:\[\033[01;34m\]\w\[\033[00m\]\$ '
export EDITOR=nano
export VISUAL=nano
export HISTCONTROL=ignoreboth:erasedups

# Activate the per-session virtual environment if it was provisioned.
if [ -f "{venv}/bin/activate" ]; then
    . "{venv}/bin/activate"
fi

alias ll="ls -la"
alias ..="cd .."

echo "Welcome to your workspace ({files})"
"#,
        id = session_id,
        home = home.display(),
        files = files.display(),
        venv = venv.display(),
    )
}

fn readme_contents() -> String {
    "Welcome to your workspace.\n\n\
     Files you create here persist only for the lifetime of this session.\n\
     Install packages into the session's virtual environment with pip;\n\
     they are isolated to this session only.\n"
        .to_string()
}

const VIMRC: &str = "syntax on\nset autoindent\nset expandtab\nset number\nset tabstop=4\nset shiftwidth=4\n";

const TMUX_CONF: &str = "set -g default-terminal \"screen-256color\"\nset -g history-limit 10000\nset -g base-index 1\n";

const INPUTRC: &str = "set completion-ignore-case on\nset show-all-if-ambiguous on\n";

const EXAMPLE_SCRIPT: &str = r#"#!/usr/bin/env python3
"""Example script seeded into every new workspace."""


def hello(name: str = "World") -> str:
    return f"Hello, {name}!"


if __name__ == "__main__":
    print(hello())
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_builds_expected_tree() {
        let storage = tempdir().unwrap();
        let layout = WorkspaceLayout::create(storage.path(), "abc").unwrap();
        assert!(layout.home.is_dir());
        assert!(layout.home_bin.is_dir());
        assert!(layout.files.is_dir());
        assert!(layout.venv.is_dir());
        assert!(layout.home.join(".shellrc").is_file());
        assert!(layout.home.join(".profile").is_file());
        assert!(layout.home.join(".bash_history").is_file());
        assert!(layout.files.join("README.txt").is_file());
        assert!(layout.files.join("example.py").is_file());
    }

    #[test]
    fn write_is_idempotent() {
        let storage = tempdir().unwrap();
        let layout = WorkspaceLayout::create(storage.path(), "abc").unwrap();
        std::fs::write(layout.home.join(".shellrc"), "# customized by user\n").unwrap();
        layout.write_rc_files("abc").unwrap();
        let contents = std::fs::read_to_string(layout.home.join(".shellrc")).unwrap();
        assert_eq!(contents, "# customized by user\n");
    }

    #[test]
    fn destroy_removes_tree_and_is_idempotent() {
        let storage = tempdir().unwrap();
        let layout = WorkspaceLayout::create(storage.path(), "abc").unwrap();
        layout.destroy().unwrap();
        assert!(!layout.root.exists());
        layout.destroy().unwrap();
    }
}
