// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Failure-path behavior: corrupt incarnations, write-back errors,
//! dead owners and the shutdown protocol

use std::path::Path;
use std::sync::Arc;

use sessionfs_core::testing::{eio_error, FailingFs, FailureBehavior, MemFs, ScriptedProbe};
use sessionfs_core::{
    CoreConfig, HostFs, OpenFlags, OwnerPid, ProcessProbe, SessError, SessionManager, O_SESS,
};

use libc::{O_CREAT, O_RDWR};

fn sess_flags() -> OpenFlags {
    OpenFlags::new(O_RDWR | O_CREAT | O_SESS)
}

fn manager_over(fs: Arc<dyn HostFs>) -> (SessionManager, Arc<ScriptedProbe>) {
    let probe = Arc::new(ScriptedProbe::new());
    let manager = SessionManager::new(
        CoreConfig::with_root("/mnt"),
        fs,
        probe.clone() as Arc<dyn ProcessProbe>,
    )
    .unwrap();
    (manager, probe)
}

#[test]
fn copy_on_open_failure_marks_incarnation_corrupt() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", &[1, 2, 3]);
    let failing = Arc::new(FailingFs::with_behavior(
        mem.clone() as Arc<dyn HostFs>,
        FailureBehavior::AlwaysFail {
            op: "read_at",
            error_fn: Arc::new(eio_error),
        },
    ));
    let (manager, _probe) = manager_over(failing.clone() as Arc<dyn HostFs>);

    let opened = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    assert_eq!(opened.status, -libc::EIO);
    assert_eq!(manager.active_incarnation_count(), 1);

    // the caller closes the corrupt incarnation; no write-back happens
    failing.set_behavior(FailureBehavior::AlwaysSucceed);
    let incarnation = mem.find_path_containing("_incarnation_").unwrap();
    mem.set_contents(incarnation, &[0xAA, 0xBB]);

    manager
        .close_session(Path::new("/mnt/a"), opened.fd, OwnerPid::new(100))
        .unwrap();
    assert_eq!(mem.contents(Path::new("/mnt/a")).unwrap(), vec![1, 2, 3]);
    assert_eq!(manager.session_count(), 0);
}

#[test]
fn write_back_failure_still_tears_down() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", b"original");
    let failing = Arc::new(FailingFs::new(mem.clone() as Arc<dyn HostFs>));
    let (manager, _probe) = manager_over(failing.clone() as Arc<dyn HostFs>);

    let opened = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    assert_eq!(opened.status, 0);

    failing.set_behavior(FailureBehavior::AlwaysFail {
        op: "write_at",
        error_fn: Arc::new(eio_error),
    });

    let err = manager
        .close_session(Path::new("/mnt/a"), opened.fd, OwnerPid::new(100))
        .unwrap_err();
    assert!(matches!(err, SessError::Io(_)));

    // the error is reported but the incarnation is gone and the session
    // retired with it
    assert_eq!(manager.active_incarnation_count(), 0);
    assert_eq!(manager.session_count(), 0);
    assert_eq!(mem.contents(Path::new("/mnt/a")).unwrap(), b"original");
}

#[test]
fn incarnation_open_failure_keeps_session_for_second_caller() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", b"x");
    let failing = Arc::new(FailingFs::with_behavior(
        mem.clone() as Arc<dyn HostFs>,
        FailureBehavior::FailAfter {
            op: "open",
            count: 1, // the original opens, the incarnation does not
            error_fn: Arc::new(eio_error),
        },
    ));
    let (manager, _probe) = manager_over(failing.clone() as Arc<dyn HostFs>);

    let err = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap_err();
    assert!(matches!(err, SessError::Io(_)));
    assert_eq!(manager.session_count(), 1);
    assert_eq!(manager.active_incarnation_count(), 0);

    // a second caller reuses the surviving session
    failing.set_behavior(FailureBehavior::AlwaysSucceed);
    let opened = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(200), 0o644)
        .unwrap();
    assert_eq!(opened.status, 0);
    manager
        .close_session(Path::new("/mnt/a"), opened.fd, OwnerPid::new(200))
        .unwrap();
    assert_eq!(manager.session_count(), 0);
}

#[test]
fn sweep_reaps_dead_owner_without_flush_or_close() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", &[9]);
    let (manager, probe) = manager_over(mem.clone() as Arc<dyn HostFs>);

    let opened = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    assert_eq!(opened.status, 0);

    // the owner writes, then dies before closing
    let incarnation = mem.find_path_containing("_incarnation_").unwrap();
    mem.set_contents(incarnation, &[0xFF]);
    probe.kill(OwnerPid::new(100));

    // original + incarnation handles are open
    assert_eq!(mem.open_handle_count(), 2);

    assert_eq!(manager.sweep().unwrap(), 0);
    assert_eq!(mem.contents(Path::new("/mnt/a")).unwrap(), vec![9]);
    assert_eq!(manager.session_count(), 0);
    assert_eq!(manager.active_incarnation_count(), 0);

    // the original's handle was closed with the session; the dead owner's
    // incarnation handle was left to the host
    assert_eq!(mem.open_handle_count(), 1);
}

#[test]
fn sweep_keeps_live_owners() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", b"x");
    let (manager, probe) = manager_over(mem.clone() as Arc<dyn HostFs>);

    let live = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(200), 0o644)
        .unwrap();
    probe.kill(OwnerPid::new(200));

    assert_eq!(manager.sweep().unwrap(), 1);
    assert_eq!(manager.session_count(), 1);

    manager
        .close_session(Path::new("/mnt/a"), live.fd, OwnerPid::new(100))
        .unwrap();
    assert_eq!(manager.session_count(), 0);
}

#[test]
fn close_after_owner_death_reports_owner_gone() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", b"keep");
    let (manager, probe) = manager_over(mem.clone() as Arc<dyn HostFs>);

    let opened = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    let incarnation = mem.find_path_containing("_incarnation_").unwrap();
    mem.set_contents(incarnation, b"dead man's bytes");
    probe.kill(OwnerPid::new(100));

    let err = manager
        .close_session(Path::new("/mnt/a"), opened.fd, OwnerPid::new(100))
        .unwrap_err();
    assert!(matches!(err, SessError::OwnerGone));

    // torn down best-effort, nothing written back
    assert_eq!(mem.contents(Path::new("/mnt/a")).unwrap(), b"keep");
    assert_eq!(manager.session_count(), 0);
}

#[test]
fn shutdown_busy_until_sessions_drain() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", b"x");
    let (manager, _probe) = manager_over(mem.clone() as Arc<dyn HostFs>);

    let opened = manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();

    let err = manager.shutdown().unwrap_err();
    assert!(matches!(err, SessError::Busy { active: 1 }));

    // the core was re-enabled; normal operations proceed
    manager
        .close_session(Path::new("/mnt/a"), opened.fd, OwnerPid::new(100))
        .unwrap();

    assert_eq!(manager.shutdown().unwrap(), 0);
    assert!(matches!(
        manager.open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644),
        Err(SessError::Disabled)
    ));
}

#[test]
fn shutdown_sweeps_dead_owners_on_its_way_out() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a", b"x");
    let (manager, probe) = manager_over(mem.clone() as Arc<dyn HostFs>);

    manager
        .open_session(Path::new("/mnt/a"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    probe.kill(OwnerPid::new(100));

    // the only incarnation belongs to a dead owner, so shutdown succeeds
    assert_eq!(manager.shutdown().unwrap(), 0);
    assert_eq!(manager.session_count(), 0);
}

#[test]
fn observability_views_expose_sessions_and_owners() {
    let mem = Arc::new(MemFs::new());
    mem.set_contents("/mnt/a.txt", b"x");
    mem.set_contents("/mnt/b.txt", b"y");
    let (manager, probe) = manager_over(mem.clone() as Arc<dyn HostFs>);
    probe.set_name(OwnerPid::new(100), "editor");

    let a = manager
        .open_session(Path::new("/mnt/a.txt"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    manager
        .open_session(Path::new("/mnt/a.txt"), sess_flags(), OwnerPid::new(200), 0o644)
        .unwrap();
    manager
        .open_session(Path::new("/mnt/b.txt"), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();

    assert_eq!(manager.active_incarnation_count(), 3);

    let mut views = manager.views();
    views.sort_by(|x, y| x.key.cmp(&y.key));
    assert_eq!(views.len(), 2);

    assert_eq!(views[0].key, "-mnt-a.txt");
    assert_eq!(views[0].incarnations.len(), 2);
    let editor = views[0]
        .incarnations
        .iter()
        .find(|inc| inc.key == format!("100_{}", a.fd.as_raw()))
        .unwrap();
    assert_eq!(editor.owner_name, "editor");

    assert_eq!(views[1].key, "-mnt-b.txt");
    assert_eq!(views[1].incarnations.len(), 1);

    // a dead owner shows the sentinel at read time
    probe.kill(OwnerPid::new(200));
    let views = manager.views();
    let gone = views
        .iter()
        .find(|view| view.key == "-mnt-a.txt")
        .unwrap()
        .incarnations
        .iter()
        .find(|inc| inc.key.starts_with("200_"))
        .unwrap();
    assert_eq!(gone.owner_name, sessionfs_core::GONE_OWNER_NAME);
}

#[test]
fn long_pathname_falls_back_to_var_tmp() {
    let mem = Arc::new(MemFs::new());
    let long_name = format!("/mnt/{}", "d".repeat(libc::PATH_MAX as usize - 30));
    mem.set_contents(long_name.as_str(), b"deep");
    let (manager, _probe) = manager_over(mem.clone() as Arc<dyn HostFs>);

    let opened = manager
        .open_session(Path::new(&long_name), sess_flags(), OwnerPid::new(100), 0o644)
        .unwrap();
    assert_eq!(opened.status, 0);

    let fallback = mem.find_path_containing("/var/tmp/100_").unwrap();
    assert_eq!(mem.contents(&fallback).unwrap(), b"deep");

    manager
        .close_session(Path::new(&long_name), opened.fd, OwnerPid::new(100))
        .unwrap();
}
