// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core configuration for SessionFS

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Session root used when none is configured.
pub const DEFAULT_SESSION_ROOT: &str = "/mnt";

const fn default_copy_slab() -> usize {
    512
}

fn default_session_root() -> PathBuf {
    PathBuf::from(DEFAULT_SESSION_ROOT)
}

/// Core configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory beneath which session semantics are enabled. Must be
    /// absolute.
    #[serde(default = "default_session_root")]
    pub session_root: PathBuf,

    /// Slab size used by bulk copies (copy-on-open and write-back).
    #[serde(default = "default_copy_slab")]
    pub copy_slab: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            session_root: default_session_root(),
            copy_slab: default_copy_slab(),
        }
    }
}

impl CoreConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Config rooted at the given directory, defaults elsewhere.
    pub fn with_root(session_root: impl Into<PathBuf>) -> Self {
        Self {
            session_root: session_root.into(),
            ..Self::default()
        }
    }
}
