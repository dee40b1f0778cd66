// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session registry
//!
//! The registry is the global index of live sessions, traversed
//! concurrently by readers and mutated under a single writer lock. The
//! RCU contract of the design maps onto `ArcSwap`: readers load the
//! current head and walk an immutable spine of link nodes; writers swing
//! the head to a new spine under the lock; superseded link nodes are
//! reclaimed by `Arc` once the last reader drops them, never before.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;

use crate::session::Session;

/// Link node of the registry spine. The spine is immutable: unlinking
/// rebuilds it without the victim instead of mutating `next` pointers.
struct Node {
    session: Arc<Session>,
    next: Option<Arc<Node>>,
}

pub(crate) struct SessionRegistry {
    head: ArcSwapOption<Node>,
    write_lock: Mutex<()>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Reader-side search for the valid session keyed by `pathname`.
    ///
    /// Per the traversal protocol, each candidate's refcount is taken
    /// first (the `Arc` clone) and validity plus key are inspected after;
    /// on a miss the reference is dropped before moving on.
    pub(crate) fn find(&self, pathname: &Path) -> Option<Arc<Session>> {
        let mut cursor = self.head.load_full();
        while let Some(node) = cursor {
            let candidate = Arc::clone(&node.session);
            if candidate.is_valid() && candidate.pathname() == pathname {
                return Some(candidate);
            }
            drop(candidate);
            cursor = node.next.clone();
        }
        None
    }

    /// Reader-side snapshot of every linked session, valid or not (the
    /// sweep wants both; its second pass discards the invalid ones).
    pub(crate) fn sessions(&self) -> Vec<Arc<Session>> {
        let mut out = Vec::new();
        let mut cursor = self.head.load_full();
        while let Some(node) = cursor {
            out.push(Arc::clone(&node.session));
            cursor = node.next.clone();
        }
        out
    }

    /// Acquire the writer lock for structural mutation.
    pub(crate) fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            registry: self,
            _guard: self.write_lock.lock().unwrap(),
        }
    }
}

/// Writer-side view of the registry; holding it is what "holding the
/// registry spinlock" means in the lifecycle algorithms.
pub(crate) struct RegistryGuard<'a> {
    registry: &'a SessionRegistry,
    _guard: MutexGuard<'a, ()>,
}

impl RegistryGuard<'_> {
    /// Re-run a search under the lock (the double-checked step of session
    /// creation).
    pub(crate) fn find(&self, pathname: &Path) -> Option<Arc<Session>> {
        self.registry.find(pathname)
    }

    /// Prepend a session in constant time.
    pub(crate) fn insert(&self, session: Arc<Session>) {
        let head = self.registry.head.load_full();
        self.registry.head.store(Some(Arc::new(Node {
            session,
            next: head,
        })));
    }

    /// Remove one session from the spine. Readers still traversing the
    /// old spine keep it alive through their own references.
    pub(crate) fn unlink(&self, session: &Arc<Session>) {
        self.rebuild(|candidate| !Arc::ptr_eq(candidate, session));
    }

    /// Drop every invalid session from the spine (the sweep's second
    /// pass). Returns how many were unlinked.
    pub(crate) fn unlink_invalid(&self) -> usize {
        let before = self.registry.sessions().len();
        self.rebuild(|candidate| candidate.is_valid());
        before - self.registry.sessions().len()
    }

    fn rebuild(&self, keep: impl Fn(&Arc<Session>) -> bool) {
        let mut kept = Vec::new();
        let mut cursor = self.registry.head.load_full();
        while let Some(node) = cursor {
            if keep(&node.session) {
                kept.push(Arc::clone(&node.session));
            }
            cursor = node.next.clone();
        }
        let mut head = None;
        for session in kept.into_iter().rev() {
            head = Some(Arc::new(Node {
                session,
                next: head,
            }));
        }
        self.registry.head.store(head);
    }
}
