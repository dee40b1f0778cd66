// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process liveness probing
//!
//! The sweep and the close path need to know whether an incarnation's
//! owner is still running. The probe is a seam so tests can script
//! process death; the production binding reads `/proc`.

use std::fs;

use crate::types::OwnerPid;

/// Liveness of an incarnation's owning process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Alive,
    Zombie,
    Stopped,
    Traced,
    Gone,
}

impl ProcessStatus {
    /// Dead owners are reaped by the sweep: absent, zombie, traced or
    /// stopped processes all count as dead.
    #[must_use]
    pub const fn is_dead(self) -> bool {
        !matches!(self, Self::Alive)
    }
}

/// Process probe seam.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessProbe: Send + Sync {
    fn probe(&self, pid: OwnerPid) -> ProcessStatus;

    /// Short name of the owning process image, looked up at read time.
    /// `None` when the owner is gone; the observability collaborator
    /// substitutes its sentinel.
    fn owner_name(&self, pid: OwnerPid) -> Option<String>;
}

/// [`ProcessProbe`] backed by `/proc`.
pub struct ProcFsProbe;

impl ProcFsProbe {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for ProcFsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for ProcFsProbe {
    fn probe(&self, pid: OwnerPid) -> ProcessStatus {
        let stat = match fs::read_to_string(format!("/proc/{}/stat", pid.as_u32())) {
            Ok(stat) => stat,
            Err(_) => return ProcessStatus::Gone,
        };
        // the state field follows the parenthesized comm, which may itself
        // contain spaces and parentheses
        let state = stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|field| field.chars().next());
        match state {
            Some('Z') => ProcessStatus::Zombie,
            Some('T') => ProcessStatus::Stopped,
            Some('t') => ProcessStatus::Traced,
            Some('X') | Some('x') | None => ProcessStatus::Gone,
            Some(_) => ProcessStatus::Alive,
        }
    }

    fn owner_name(&self, pid: OwnerPid) -> Option<String> {
        fs::read_to_string(format!("/proc/{}/comm", pid.as_u32()))
            .ok()
            .map(|name| name.trim_end().to_string())
    }
}
