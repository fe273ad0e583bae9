// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Independently allocated work handles.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use kspin::{SpinRaw, SpinRawGuard};

use crate::{
    entry::{RetiredRefs, WorkEntry, WorkUnit},
    types::{CoalitionRef, ThreadGroupRef},
};

/// Source of context ids, shared by every context in the kernel.
///
/// Ids only grow; after wrapping around they are no longer unique.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of work whose lifetime the driver manages itself.
///
/// Carries the same bookkeeping as a table slot. Unlike a token it is never
/// refused for lack of space, and the controller identifies it by its
/// kernel-wide [`id`](Self::id).
///
/// A context must have its work ended before its last reference is dropped;
/// dropping one that still holds work is fatal.
pub struct WorkContext {
    id: u64,
    entry: SpinRaw<WorkEntry>,
}

impl WorkContext {
    /// Creates an unbound context.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            entry: SpinRaw::new(WorkEntry::vacant()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the context currently tracks submitted work.
    pub fn is_bound(&self) -> bool {
        self.entry.lock().is_bound()
    }

    /// Whether the bound work has begun executing.
    pub fn is_started(&self) -> bool {
        self.entry.lock().is_started()
    }

    /// Attaches a newly submitted unit of work.
    ///
    /// # Panics
    ///
    /// Panics if the context already tracks work that has not ended.
    pub(crate) fn bind(&self, thread_group: ThreadGroupRef, coalition: Option<CoalitionRef>) {
        let mut entry = self.entry.lock();
        if entry.is_bound() {
            fatal!("perfctl: work context {} submitted while its work is in flight", self.id);
        }
        entry.bind(thread_group, coalition);
    }
}

impl Drop for WorkContext {
    fn drop(&mut self) {
        if self.entry.lock().is_bound() {
            fatal!("perfctl: work context {} released with work still in flight", self.id);
        }
    }
}

impl WorkUnit for WorkContext {
    fn controller_token(&self) -> u64 {
        self.id
    }

    fn lock_entry(&self) -> Option<SpinRawGuard<'_, WorkEntry>> {
        let entry = self.entry.lock();
        entry.is_bound().then_some(entry)
    }

    fn retire(&self, mut entry: SpinRawGuard<'_, WorkEntry>) -> RetiredRefs {
        entry.retire()
    }
}
