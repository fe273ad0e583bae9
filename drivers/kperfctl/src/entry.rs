// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Per-work bookkeeping shared by table slots and work contexts.

use kspin::SpinRawGuard;

use crate::{
    config::WORK_DATA_SIZE,
    types::{CoalitionRef, ThreadGroupRef, WorkData},
};

/// Fields tracked for one unit of work.
///
/// An entry is bound while `thread_group` is set. A bound entry owns one
/// reference on its thread group and, with resource accounting, one on the
/// submitter's coalition.
pub(crate) struct WorkEntry {
    thread_group: Option<ThreadGroupRef>,
    coalition: Option<CoalitionRef>,
    work_data: WorkData,
    started: bool,
}

/// References taken out of an entry when its work ends.
///
/// Dropping this releases them, so callers drop it only after every lock
/// has been released.
#[must_use]
pub(crate) struct RetiredRefs {
    pub thread_group: Option<ThreadGroupRef>,
    pub coalition: Option<CoalitionRef>,
}

/// Borrowed view of a bound entry for one controller callback.
pub(crate) struct EntryParts<'a> {
    pub thread_group: &'a ThreadGroupRef,
    pub work_data: &'a mut WorkData,
    pub started: bool,
}

impl WorkEntry {
    pub const fn vacant() -> Self {
        Self {
            thread_group: None,
            coalition: None,
            work_data: [0; WORK_DATA_SIZE],
            started: false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.thread_group.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn set_started(&mut self, started: bool) {
        self.started = started;
    }

    pub fn coalition(&self) -> Option<&CoalitionRef> {
        self.coalition.as_ref()
    }

    /// Takes ownership of the references for a newly submitted unit.
    pub fn bind(&mut self, thread_group: ThreadGroupRef, coalition: Option<CoalitionRef>) {
        if self.is_bound() {
            fatal!("perfctl: binding work to an entry that is still in use");
        }
        self.thread_group = Some(thread_group);
        self.coalition = coalition;
        self.work_data = [0; WORK_DATA_SIZE];
        self.started = false;
    }

    /// Clears the entry and hands back its references.
    pub fn retire(&mut self) -> RetiredRefs {
        self.work_data = [0; WORK_DATA_SIZE];
        self.started = false;
        RetiredRefs {
            thread_group: self.thread_group.take(),
            coalition: self.coalition.take(),
        }
    }

    pub fn parts(&mut self) -> EntryParts<'_> {
        let Some(thread_group) = self.thread_group.as_ref() else {
            fatal!("perfctl: access to an unbound work entry");
        };
        EntryParts {
            thread_group,
            work_data: &mut self.work_data,
            started: self.started,
        }
    }
}

/// One unit of work as seen by the client's lifecycle code.
///
/// Implemented by table tokens and by work contexts, so submit, begin,
/// update and end are written once for both storage strategies.
pub(crate) trait WorkUnit {
    /// Identifier the controller sees for this unit.
    fn controller_token(&self) -> u64;

    /// Locks the unit's entry.
    ///
    /// Returns `None` when the unit is untracked; every operation on it is
    /// then a no-op. A returned entry is always bound.
    fn lock_entry(&self) -> Option<SpinRawGuard<'_, WorkEntry>>;

    /// Releases the unit's storage after its work is done.
    ///
    /// Consumes the entry lock; the returned references must be dropped by
    /// the caller once it holds no other lock.
    fn retire(&self, entry: SpinRawGuard<'_, WorkEntry>) -> RetiredRefs;
}
