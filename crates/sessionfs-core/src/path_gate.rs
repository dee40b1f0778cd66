// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session root and the advisory path gate
//!
//! The gate decides whether a pathname lies beneath the configured session
//! root. It is advisory: only creators of new incarnations consult it, and
//! a spoofed path still fails later on actual file creation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::warn;

use crate::error::{SessError, SessResult};

/// Result of a session-root membership check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathCheck {
    /// The path lies beneath the session root.
    Ok,
    /// The path is outside the session root.
    Outside,
}

/// The one configured directory prefix beneath which session semantics
/// apply.
///
/// Read-mostly state: a single rare writer replaces the root, many readers
/// consult it on every open.
pub struct SessionRoot {
    root: RwLock<PathBuf>,
}

impl SessionRoot {
    /// Create the root holder. The initial value must be absolute.
    pub fn new(initial: impl Into<PathBuf>) -> SessResult<Self> {
        let initial = initial.into();
        if !initial.is_absolute() {
            return Err(SessError::InvalidArgument);
        }
        Ok(Self {
            root: RwLock::new(initial),
        })
    }

    /// Current session root.
    pub fn get(&self) -> PathBuf {
        self.root.read().unwrap().clone()
    }

    /// Replace the session root atomically. Only absolute paths are
    /// accepted; existing sessions are unaffected by the change.
    pub fn set(&self, path: impl Into<PathBuf>) -> SessResult<()> {
        let path = path.into();
        if !path.is_absolute() {
            warn!(path = %path.display(), "session root must be absolute");
            return Err(SessError::InvalidArgument);
        }
        *self.root.write().unwrap() = path;
        Ok(())
    }

    /// Membership check: resolve the path and walk ancestry under the
    /// current root. A path that does not resolve (a file about to be
    /// created) falls back to resolving its parent, then to a textual
    /// prefix test. The gate is advisory, so an unresolvable root also
    /// degrades to the textual test instead of blocking creators.
    pub fn check(&self, path: &Path) -> SessResult<PathCheck> {
        let root = self.get();
        let canonical_root = match fs::canonicalize(&root) {
            Ok(canonical) => canonical,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(if path.starts_with(&root) {
                    PathCheck::Ok
                } else {
                    PathCheck::Outside
                });
            },
            Err(err) => return Err(SessError::Io(err)),
        };

        match fs::canonicalize(path) {
            Ok(resolved) => Ok(Self::ancestry(&resolved, &canonical_root)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if let Ok(resolved_parent) = fs::canonicalize(parent) {
                        return Ok(Self::ancestry(&resolved_parent, &canonical_root));
                    }
                }
                // neither the path nor its parent exists yet
                Ok(if path.starts_with(&root) {
                    PathCheck::Ok
                } else {
                    PathCheck::Outside
                })
            },
            Err(err) => Err(SessError::Io(err)),
        }
    }

    fn ancestry(resolved: &Path, root: &Path) -> PathCheck {
        if resolved.ancestors().any(|ancestor| ancestor == root) {
            PathCheck::Ok
        } else {
            PathCheck::Outside
        }
    }
}
