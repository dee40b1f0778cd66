// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault-injecting decorator for any [`HostFs`]
//!
//! Wraps a real implementation and fails operations according to a
//! configurable policy, for exercising the copy-on-open and write-back
//! failure paths.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{SessError, SessResult};
use crate::host::{HostFs, OpenedFile};
use crate::types::{HandleId, OpenFlags, OwnerPid};

/// Custom predicate function type for fault injection
pub type FaultPredicate = Arc<dyn Fn(&str, u64) -> Option<SessError> + Send + Sync>;

/// Configurable failure behavior for host operations
pub enum FailureBehavior {
    /// Never fail - all operations succeed
    AlwaysSucceed,

    /// Fail after N successful calls to a specific operation
    FailAfter {
        op: &'static str,
        count: u64,
        error_fn: Arc<dyn Fn() -> SessError + Send + Sync>,
    },

    /// Fail the first N calls to a specific operation
    FailFor {
        op: &'static str,
        count: u64,
        error_fn: Arc<dyn Fn() -> SessError + Send + Sync>,
    },

    /// Always fail a specific operation
    AlwaysFail {
        op: &'static str,
        error_fn: Arc<dyn Fn() -> SessError + Send + Sync>,
    },

    /// Custom predicate receiving (operation name, call count)
    Custom(FaultPredicate),
}

impl Default for FailureBehavior {
    fn default() -> Self {
        Self::AlwaysSucceed
    }
}

/// `EIO` constructor for failure policies.
pub fn eio_error() -> SessError {
    SessError::Io(io::Error::from_raw_os_error(libc::EIO))
}

/// `ENOSPC` constructor for failure policies.
pub fn enospc_error() -> SessError {
    SessError::Io(io::Error::from_raw_os_error(libc::ENOSPC))
}

/// Decorator that delegates to an inner [`HostFs`] but injects failures
/// per its [`FailureBehavior`].
pub struct FailingFs {
    inner: Arc<dyn HostFs>,
    behavior: Mutex<FailureBehavior>,
    call_counts: Mutex<HashMap<&'static str, u64>>,
}

impl FailingFs {
    pub fn new(inner: Arc<dyn HostFs>) -> Self {
        Self::with_behavior(inner, FailureBehavior::AlwaysSucceed)
    }

    pub fn with_behavior(inner: Arc<dyn HostFs>, behavior: FailureBehavior) -> Self {
        Self {
            inner,
            behavior: Mutex::new(behavior),
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Update the failure behavior at runtime.
    pub fn set_behavior(&self, behavior: FailureBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Number of times `op` has been attempted.
    pub fn call_count(&self, op: &str) -> u64 {
        self.call_counts.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    fn should_fail(&self, op: &'static str) -> Option<SessError> {
        let count = {
            let mut counts = self.call_counts.lock().unwrap();
            let entry = counts.entry(op).or_insert(0);
            *entry += 1;
            *entry
        };
        let behavior = self.behavior.lock().unwrap();
        match &*behavior {
            FailureBehavior::AlwaysSucceed => None,
            FailureBehavior::FailAfter {
                op: target,
                count: threshold,
                error_fn,
            } => (*target == op && count > *threshold).then(|| error_fn()),
            FailureBehavior::FailFor {
                op: target,
                count: threshold,
                error_fn,
            } => (*target == op && count <= *threshold).then(|| error_fn()),
            FailureBehavior::AlwaysFail {
                op: target,
                error_fn,
            } => (*target == op).then(|| error_fn()),
            FailureBehavior::Custom(predicate) => predicate(op, count),
        }
    }
}

impl HostFs for FailingFs {
    fn open(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
        want_fd: Option<OwnerPid>,
    ) -> SessResult<OpenedFile> {
        if let Some(err) = self.should_fail("open") {
            return Err(err);
        }
        self.inner.open(path, flags, mode, want_fd)
    }

    fn close(&self, handle: HandleId) -> SessResult<()> {
        // closes always reach the inner fs so handle bookkeeping stays
        // consistent
        self.inner.close(handle)
    }

    fn read_at(&self, handle: HandleId, offset: u64, buf: &mut [u8]) -> SessResult<usize> {
        if let Some(err) = self.should_fail("read_at") {
            return Err(err);
        }
        self.inner.read_at(handle, offset, buf)
    }

    fn write_at(&self, handle: HandleId, offset: u64, buf: &[u8]) -> SessResult<usize> {
        if let Some(err) = self.should_fail("write_at") {
            return Err(err);
        }
        self.inner.write_at(handle, offset, buf)
    }

    fn set_len(&self, handle: HandleId, len: u64) -> SessResult<()> {
        if let Some(err) = self.should_fail("set_len") {
            return Err(err);
        }
        self.inner.set_len(handle, len)
    }
}
