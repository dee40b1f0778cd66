// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test doubles for the host seams
//!
//! An in-memory [`HostFs`](crate::host::HostFs), a fault-injecting
//! decorator over any `HostFs`, and a scriptable process probe. They live
//! in the library (not behind `cfg(test)`) so integration suites and
//! downstream consumers can drive the core without touching a real
//! filesystem or process table.

pub mod failing_fs;
pub mod mem_fs;
pub mod scripted_probe;

pub use failing_fs::{eio_error, enospc_error, FailingFs, FailureBehavior};
pub use mem_fs::MemFs;
pub use scripted_probe::ScriptedProbe;
