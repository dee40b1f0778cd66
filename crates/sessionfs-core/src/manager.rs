// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The session manager: lifecycle engine and shutdown coordinator
//!
//! # Locking protocol
//!
//! Four layers of shared state, always acquired in this order:
//!
//! 1. the in-flight gate (disabled flag + counter) at every entry point;
//! 2. the registry writer lock for structural mutation of the session
//!    spine;
//! 3. a session's read lock around observation and creation of
//!    incarnations, its write lock around destruction and write-back;
//! 4. the incarnation collection's own mutex, held only for the list
//!    operation itself.
//!
//! The one place both the session write lock and the registry lock are
//! held together is session teardown, which takes them in that order; no
//! path takes a session lock while already holding the registry lock, so
//! the order cannot invert.
//!
//! Copy-on-open runs under the session read lock and write-back under the
//! write lock, so the two can never interleave on the same original.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::{SessError, SessResult};
use crate::host::{HostFs, NativeFs};
use crate::path_gate::{PathCheck, SessionRoot};
use crate::probe::{ProcFsProbe, ProcessProbe};
use crate::registry::SessionRegistry;
use crate::session::{incarnation_pathname, Incarnation, Session};
use crate::types::{Fd, IncarnationStatus, OpenFlags, OwnerPid, STATUS_VALID};

/// Sentinel shown by the observability surface when an incarnation's
/// owner has already exited.
pub const GONE_OWNER_NAME: &str = "[gone]";

/// What the control plane hands back to an opener: the descriptor number
/// the caller will see and the copy-on-open status. A negative status
/// means the incarnation is open but corrupt; the caller is expected to
/// close and remove it cleanly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenedIncarnation {
    pub fd: Fd,
    pub status: IncarnationStatus,
}

/// Read-only view of one incarnation for the observability collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncarnationView {
    /// `<pid>_<fd>`
    pub key: String,
    /// Short name of the owning process image, or the gone-owner
    /// sentinel.
    pub owner_name: String,
}

/// Read-only view of one session for the observability collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionView {
    /// Slash-for-dash transformation of the original pathname.
    pub key: String,
    pub pathname: PathBuf,
    pub incarnations: Vec<IncarnationView>,
}

/// The session manager core.
///
/// One value owns all shared state - the session root, the registry, the
/// host seams and the shutdown gate - with an explicit `new`/`shutdown`
/// lifecycle and no hidden statics.
pub struct SessionManager {
    config: CoreConfig,
    root: SessionRoot,
    registry: SessionRegistry,
    fs: Arc<dyn HostFs>,
    probe: Arc<dyn ProcessProbe>,
    disabled: AtomicBool,
    in_flight: AtomicUsize,
}

/// RAII in-flight marker taken at every gated entry point.
struct FlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionManager {
    /// Build a manager over the given host seams.
    pub fn new(
        config: CoreConfig,
        fs: Arc<dyn HostFs>,
        probe: Arc<dyn ProcessProbe>,
    ) -> SessResult<Self> {
        let root = SessionRoot::new(config.session_root.clone())?;
        Ok(Self {
            config,
            root,
            registry: SessionRegistry::new(),
            fs,
            probe,
            disabled: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Manager bound to the host filesystem and `/proc`.
    pub fn with_native(config: CoreConfig) -> SessResult<Self> {
        Self::new(config, Arc::new(NativeFs::new()), Arc::new(ProcFsProbe::new()))
    }

    /// Gate an operation: count it in flight, then refuse if the core is
    /// disabled. The increment-before-check order pairs with the
    /// flip-then-read order in [`shutdown`](Self::shutdown), so the
    /// coordinator can never observe a resting counter while an operation
    /// slips past the flag.
    fn enter(&self) -> SessResult<FlightGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.disabled.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(SessError::Disabled);
        }
        Ok(FlightGuard {
            counter: &self.in_flight,
        })
    }

    /// Open `path` in session mode for `pid`: find or create the session,
    /// create a fresh incarnation, copy the original into it, and publish
    /// it.
    ///
    /// `flags` must carry the session opt-in bit and an absolute path
    /// under the session root; both are argument errors otherwise. A
    /// copy-on-open failure does not abort creation - the incarnation
    /// comes back marked corrupt so the caller can close and remove it.
    /// `Retry` means the session was torn down between lookup and
    /// creation; the caller may simply try again.
    pub fn open_session(
        &self,
        path: &Path,
        flags: OpenFlags,
        pid: OwnerPid,
        mode: u32,
    ) -> SessResult<OpenedIncarnation> {
        let _flight = self.enter()?;

        if !path.is_absolute() || !flags.has_session() {
            return Err(SessError::InvalidArgument);
        }
        if self.root.check(path)? != PathCheck::Ok {
            debug!(path = %path.display(), "open refused, path outside session root");
            return Err(SessError::InvalidArgument);
        }
        let flags = flags.strip_session();

        let session = self.lookup_or_create_session(path, flags, mode)?;
        self.create_incarnation(&session, flags, pid, mode)
    }

    /// Find the valid session for `path`, or create and link one.
    fn lookup_or_create_session(
        &self,
        path: &Path,
        flags: OpenFlags,
        mode: u32,
    ) -> SessResult<Arc<Session>> {
        if let Some(found) = self.registry.find(path) {
            return Ok(found);
        }

        let guard = self.registry.lock();
        // double-checked: someone may have linked the session while we
        // were waiting for the lock
        if let Some(found) = guard.find(path) {
            return Ok(found);
        }

        // the original is always opened read-write so the eventual
        // write-back can proceed; O_CREAT and O_EXCL pass through verbatim
        let opened = self.fs.open(path, flags.force_rdwr(), mode, None)?;
        let session = Arc::new(Session::new(
            path.to_path_buf(),
            opened.handle,
            Arc::clone(&self.fs),
        ));
        guard.insert(Arc::clone(&session));
        debug!(path = %path.display(), "session created");
        Ok(session)
    }

    fn create_incarnation(
        &self,
        session: &Arc<Session>,
        flags: OpenFlags,
        pid: OwnerPid,
        mode: u32,
    ) -> SessResult<OpenedIncarnation> {
        let inc_path = incarnation_pathname(session.pathname(), pid);

        let _read = session.lock().read().unwrap();
        if !session.is_valid() {
            // a concurrent close raced us to teardown; dropping our
            // reference lets the stale record go away
            debug!(path = %session.pathname().display(), "session went stale under creation");
            return Err(SessError::Retry);
        }

        let opened = self.fs.open(&inc_path, flags.with_create(), mode, Some(pid))?;
        let fd = match opened.fd {
            Some(fd) => fd,
            None => {
                let _ = self.fs.close(opened.handle);
                return Err(SessError::InvalidArgument);
            },
        };

        // copy-on-open; failure marks the incarnation corrupt instead of
        // aborting creation
        let status = match self
            .fs
            .bulk_copy(session.original(), opened.handle, self.config.copy_slab)
        {
            Ok(()) => STATUS_VALID,
            Err(err) => {
                warn!(
                    path = %session.pathname().display(),
                    error = %err,
                    "copy-on-open failed, returning corrupt incarnation"
                );
                err.errno()
            },
        };

        let incarnation = Arc::new(Incarnation::new(
            pid,
            fd,
            opened.handle,
            inc_path,
            status,
            Arc::clone(&self.fs),
        ));
        session.push_incarnation(incarnation);
        debug!(
            path = %session.pathname().display(),
            %pid, %fd, status, "incarnation published"
        );
        Ok(OpenedIncarnation { fd, status })
    }

    /// Close the incarnation keyed `(path, fd, pid)`: write it back over
    /// the original (unless the session is stale or the incarnation is
    /// corrupt), tear the record down, and retire the session when it was
    /// the last one.
    ///
    /// `OwnerGone` reports an owner that died between open and close; the
    /// teardown still happens, without a write-back. A write-back error is
    /// returned, but the incarnation is torn down regardless.
    pub fn close_session(&self, path: &Path, fd: Fd, pid: OwnerPid) -> SessResult<()> {
        let _flight = self.enter()?;

        let session = self
            .registry
            .find(path)
            .ok_or(SessError::BadFileDescriptor)?;

        let write = session.lock().write().unwrap();
        let incarnation = match session.remove_incarnation(fd, pid) {
            Some(incarnation) => incarnation,
            None => {
                // the pair never existed, or a sweep reaped it first;
                // either way it is gone from this session
                return Err(SessError::BadFileDescriptor);
            },
        };

        let owner_dead = self.probe.probe(pid).is_dead();
        let mut copy_error = None;
        if owner_dead {
            // the host reclaimed the descriptor with the process; nothing
            // to flush, nothing to close
            incarnation.mark_host_released();
            info!(path = %path.display(), %pid, "owner died before close");
        } else if session.is_valid() && incarnation.status() == STATUS_VALID {
            if let Err(err) = self
                .fs
                .bulk_copy(incarnation.handle(), session.original(), self.config.copy_slab)
            {
                warn!(path = %path.display(), error = %err, "write-back failed");
                copy_error = Some(err);
            }
        }

        // the incarnation file itself stays on disk for the external
        // collaborator to remove
        drop(incarnation);

        self.retire_if_drained(&session);
        drop(write);
        drop(session);

        if owner_dead {
            return Err(SessError::OwnerGone);
        }
        match copy_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Unlink a session whose collection has drained, when the registry
    /// node and the calling operation hold the only references. Callers
    /// hold the session write lock.
    fn retire_if_drained(&self, session: &Arc<Session>) {
        if session.incarnation_count() == 0
            && session.is_valid()
            && Arc::strong_count(session) == 2
        {
            session.invalidate();
            let guard = self.registry.lock();
            guard.unlink(session);
            drop(guard);
            debug!(path = %session.pathname().display(), "session retired");
        }
    }

    /// Reap incarnations whose owning process has died and report how
    /// many remain alive. Sessions left with no incarnations are flagged
    /// stale and unlinked in a second pass.
    pub fn sweep(&self) -> SessResult<usize> {
        let _flight = self.enter()?;
        Ok(self.sweep_inner())
    }

    fn sweep_inner(&self) -> usize {
        let mut active = 0usize;
        for session in self.registry.sessions() {
            let write = session.lock().write().unwrap();
            let drained = session.drain_incarnations();
            let mut survivors = Vec::with_capacity(drained.len());
            for incarnation in drained {
                if self.probe.probe(incarnation.owner()).is_dead() {
                    info!(
                        path = %session.pathname().display(),
                        pid = %incarnation.owner(),
                        "reaping incarnation of dead owner"
                    );
                    // the host released the handle when the process died
                    incarnation.mark_host_released();
                } else {
                    survivors.push(incarnation);
                }
            }
            active += survivors.len();
            session.reinstall_incarnations(survivors);
            if session.incarnation_count() == 0 && session.is_valid() {
                session.invalidate();
            }
            drop(write);
        }

        let guard = self.registry.lock();
        let removed = guard.unlink_invalid();
        drop(guard);
        if removed > 0 {
            debug!(removed, "swept stale sessions");
        }
        active
    }

    /// Two-phase quiescent shutdown: disable the core so nothing new
    /// enters, then succeed only if no operation is in flight and the
    /// sweep finds no live incarnation. On contention the core is
    /// re-enabled and `Busy` reports the live count; on success the core
    /// stays disabled for good.
    pub fn shutdown(&self) -> SessResult<usize> {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return Err(SessError::Disabled);
        }

        if self.in_flight.load(Ordering::SeqCst) != 0 {
            let active = self.active_incarnation_count();
            info!(active, "shutdown refused, operations in flight");
            self.disabled.store(false, Ordering::SeqCst);
            return Err(SessError::Busy { active });
        }

        // nothing is in flight and nothing can enter: the sweep sees the
        // final state
        let active = self.sweep_inner();
        if active == 0 {
            info!("shutdown complete");
            Ok(0)
        } else {
            info!(active, "shutdown refused, incarnations still live");
            self.disabled.store(false, Ordering::SeqCst);
            Err(SessError::Busy { active })
        }
    }

    /// Current session root.
    pub fn session_root(&self) -> SessResult<PathBuf> {
        let _flight = self.enter()?;
        Ok(self.root.get())
    }

    /// Replace the session root. Relative paths are refused without
    /// mutation; existing sessions keep running under the old root.
    pub fn set_session_root(&self, path: impl Into<PathBuf>) -> SessResult<()> {
        let _flight = self.enter()?;
        self.root.set(path)
    }

    /// Number of live incarnations across every session.
    pub fn active_incarnation_count(&self) -> usize {
        self.registry
            .sessions()
            .iter()
            .map(|session| session.incarnation_count())
            .sum()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry
            .sessions()
            .iter()
            .filter(|session| session.is_valid())
            .count()
    }

    /// Read-only rows for the observability collaborator: one view per
    /// valid session, each listing its incarnations keyed `<pid>_<fd>`
    /// with the owner's process name resolved at read time.
    pub fn views(&self) -> Vec<SessionView> {
        self.registry
            .sessions()
            .into_iter()
            .filter(|session| session.is_valid())
            .map(|session| {
                let _read = session.lock().read().unwrap();
                let incarnations = session
                    .incarnations_snapshot()
                    .into_iter()
                    .map(|incarnation| IncarnationView {
                        key: incarnation.view_key(),
                        owner_name: self
                            .probe
                            .owner_name(incarnation.owner())
                            .unwrap_or_else(|| GONE_OWNER_NAME.to_string()),
                    })
                    .collect();
                SessionView {
                    key: session.view_key(),
                    pathname: session.pathname().to_path_buf(),
                    incarnations,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_root", &self.root.get())
            .field("sessions", &self.session_count())
            .field("disabled", &self.disabled.load(Ordering::Relaxed))
            .finish()
    }
}
