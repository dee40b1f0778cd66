// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Scriptable process probe for tests

use std::collections::HashMap;
use std::sync::Mutex;

use crate::probe::{ProcessProbe, ProcessStatus};
use crate::types::OwnerPid;

/// [`ProcessProbe`] with scripted liveness: every pid is alive unless
/// told otherwise.
pub struct ScriptedProbe {
    states: Mutex<HashMap<u32, ProcessStatus>>,
    names: Mutex<HashMap<u32, String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_status(&self, pid: OwnerPid, status: ProcessStatus) {
        self.states.lock().unwrap().insert(pid.as_u32(), status);
    }

    pub fn set_name(&self, pid: OwnerPid, name: impl Into<String>) {
        self.names.lock().unwrap().insert(pid.as_u32(), name.into());
    }

    /// Script the process as exited.
    pub fn kill(&self, pid: OwnerPid) {
        self.set_status(pid, ProcessStatus::Gone);
        self.names.lock().unwrap().remove(&pid.as_u32());
    }
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for ScriptedProbe {
    fn probe(&self, pid: OwnerPid) -> ProcessStatus {
        self.states
            .lock()
            .unwrap()
            .get(&pid.as_u32())
            .copied()
            .unwrap_or(ProcessStatus::Alive)
    }

    fn owner_name(&self, pid: OwnerPid) -> Option<String> {
        if self.probe(pid).is_dead() {
            return None;
        }
        Some(
            self.names
                .lock()
                .unwrap()
                .get(&pid.as_u32())
                .cloned()
                .unwrap_or_else(|| format!("proc-{}", pid.as_u32())),
        )
    }
}
