// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SessionFS Core - Unix session semantics overlay on a host filesystem
//!
//! Opening a file in session mode yields a private, copy-on-open
//! *incarnation* of the original; reads, writes and seeks act on the
//! incarnation alone, and closing it flushes its content back over the
//! original in one step. Concurrent incarnations of the same original are
//! allowed and the last closer wins.
//!
//! This crate is the concurrent core: the path gate, the host-file I/O
//! seam, the incarnation/session records, the session registry, the
//! lifecycle engine and the shutdown coordinator. The user-space shim, the
//! control channel transport and the observability publisher are external
//! collaborators; they speak to the core through [`SessionManager`] and
//! the `sessionfs-proto` message schema.

pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod path_gate;
pub mod probe;
mod registry;
pub mod session;
pub mod testing;
pub mod types;

pub use config::{CoreConfig, DEFAULT_SESSION_ROOT};
pub use error::{SessError, SessResult};
pub use host::{HostFs, NativeFs, OpenedFile};
pub use manager::{
    IncarnationView, OpenedIncarnation, SessionManager, SessionView, GONE_OWNER_NAME,
};
pub use path_gate::{PathCheck, SessionRoot};
pub use probe::{ProcFsProbe, ProcessProbe, ProcessStatus};
pub use session::{Incarnation, Session};
pub use types::{Fd, HandleId, IncarnationStatus, OpenFlags, OwnerPid, O_SESS, STATUS_VALID};
