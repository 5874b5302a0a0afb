//! PathGuard — resolve an untrusted client-supplied path against a
//! session root and reject anything that would escape it.
//!
//! Grounded on `original_source/app/api/files_api.py` and
//! `webdav_api.py`, which each do an ad hoc
//! `os.path.abspath(...).startswith(...)` check inline; this is the
//! single audited replacement spec.md §4.1 calls for.

use crate::Error;
use std::path::{Component, Path, PathBuf};

const MAX_PATH_LEN: usize = 4096;

/// Resolve `untrusted` (a client-supplied relative path) against
/// `root`, returning the canonical absolute path if and only if it
/// stays under `root`.
///
/// `untrusted` is treated as relative: a leading separator is
/// stripped. The path is normalized lexically first (so `..`
/// components cannot be hidden behind symlink resolution), then, if
/// the target exists, symlinks are followed and the final location is
/// re-checked against the canonicalized root.
pub fn resolve(root: &Path, untrusted: &str) -> Result<PathBuf, Error> {
    if untrusted.len() > MAX_PATH_LEN {
        return Err(Error::PathRejected("path too long".into()));
    }
    if untrusted.as_bytes().contains(&0) {
        return Err(Error::PathRejected("path contains a null byte".into()));
    }

    let relative = untrusted.trim_start_matches(['/', '\\']);
    let joined = root.join(relative);
    let normalized = lexically_normalize(&joined);

    let canonical_root = root
        .canonicalize()
        .map_err(|_| Error::PathRejected("root does not exist".into()))?;

    if !has_prefix(&normalized, &canonical_root) {
        tracing::debug!(path = %untrusted, "path guard rejected lexical escape");
        return Err(Error::PathRejected("path escapes session root".into()));
    }

    let resolved = canonicalize_existing_prefix(&normalized);

    if !has_prefix(&resolved, &canonical_root) {
        tracing::debug!(path = %untrusted, "path guard rejected symlink escape");
        return Err(Error::PathRejected("path escapes session root".into()));
    }

    Ok(resolved)
}

/// Collapse `.` and `..` components without touching the filesystem.
/// A `..` at the root of the relative portion cannot walk above
/// `root` because `root` itself is an absolute prefix we never pop
/// past.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn has_prefix(candidate: &Path, root: &Path) -> bool {
    candidate == root || candidate.starts_with(root)
}

/// Canonicalize the longest existing ancestor of `path` (resolving
/// any symlinks along the way) and re-append the non-existent tail
/// lexically. This catches a symlinked intermediate directory even
/// when the final path component doesn't exist yet (e.g. creating a
/// new file).
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut tail = Vec::new();
    let mut probe = path.to_path_buf();
    loop {
        match probe.canonicalize() {
            Ok(existing) => {
                let mut result = existing;
                for component in tail.into_iter().rev() {
                    result.push(component);
                }
                return result;
            }
            Err(_) => {
                let Some(file_name) = probe.file_name() else {
                    return path.to_path_buf();
                };
                tail.push(file_name.to_owned());
                if !probe.pop() {
                    return path.to_path_buf();
                }
            }
        }
    }
}
