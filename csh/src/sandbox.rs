//! Translates client-supplied paths against a session's CWD and the
//! server root, rejecting anything that would resolve outside the
//! root.
//!
//! Containment is checked with `Path::starts_with`, which compares
//! components rather than raw strings, so a root of `/srv/a` never
//! admits a sibling `/srv/ab`.

use std::path::{Component, Path, PathBuf};

use crate::error::ResponseCode;

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        let root = root.canonicalize()?;
        Ok(Sandbox { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `client_path` against `cwd` and this sandbox's root into
    /// an absolute filesystem path, refusing anything that would land
    /// outside the root.
    pub fn resolve(&self, cwd: &str, client_path: &str) -> Result<PathBuf, ResponseCode> {
        let base = if client_path.starts_with('/') {
            self.root.clone()
        } else {
            self.root.join(cwd)
        };
        let candidate = base.join(client_path.trim_start_matches('/'));
        let resolved = lexical_normalize(&candidate);
        self.require_contained(resolved)
    }

    /// Compute the session's new CWD after a `chdir` to `path`, without
    /// mutating anything. Returns the new CWD as a normalized,
    /// separator-free relative path (empty string for the root).
    /// Refuses before any caller-visible mutation if the result would
    /// escape the root.
    pub fn compute_new_cwd(&self, current_cwd: &str, path: &str) -> Result<String, ResponseCode> {
        let candidate = if path.starts_with('/') {
            self.root.join(path.trim_start_matches('/'))
        } else {
            self.root.join(current_cwd).join(path)
        };
        let resolved = lexical_normalize(&candidate);
        let contained = self.require_contained(resolved)?;
        let rel = contained
            .strip_prefix(&self.root)
            .expect("contained path always prefixed by root");
        Ok(path_to_cwd_string(rel))
    }

    fn require_contained(&self, resolved: PathBuf) -> Result<PathBuf, ResponseCode> {
        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(ResponseCode::PathValidation)
        }
    }
}

fn path_to_cwd_string(rel: &Path) -> String {
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    parts.join("/")
}

/// Collapse `.` and `..` components without touching the filesystem.
/// A `..` past the root is kept as a literal component rather than
/// discarded, so the resulting path can never alias back inside the
/// root by accident.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut stack: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match stack.last() {
                Some(Component::Normal(_)) => {
                    stack.pop();
                }
                _ => stack.push(Component::ParentDir),
            },
            other => stack.push(other),
        }
    }
    stack.into_iter().collect()
}
