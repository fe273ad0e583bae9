// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Fixed-capacity table that hands out compact work tokens.
//!
//! Tokens are indices into the table. Index 0 is reserved for
//! [`UNTRACKED`], so a table of capacity `n` has `n + 1` slots and hands out
//! tokens in `1..=n`. Free slots are found by a round-robin scan under the
//! allocation lock; each slot's own fields live behind a separate lock so a
//! slow controller callback on one token never holds up allocation.

use alloc::{boxed::Box, vec::Vec};

use kspin::{SpinNoIrq, SpinRaw, SpinRawGuard};

use crate::{
    config::{WORK_TABLE_INDEX_BITS, WORK_TABLE_MAX_SIZE},
    entry::{RetiredRefs, WorkEntry, WorkUnit},
    types::{CoalitionRef, ThreadGroupRef},
};

/// Token of work that is not tracked. Every operation on it is a no-op.
pub const UNTRACKED: u64 = 0;

/// Folds a client index into a token so the controller can tell equal table
/// indices from different clients apart.
pub const fn controller_token(token: u64, client_index: u32) -> u64 {
    token | ((client_index as u64) << WORK_TABLE_INDEX_BITS)
}

struct AllocState {
    /// Occupancy of every slot; index 0 stays `false` and is never probed.
    occupied: Box<[bool]>,
    /// Next index to probe, always in `1..=capacity`.
    next: usize,
    in_flight: usize,
}

impl AllocState {
    fn capacity(&self) -> usize {
        self.occupied.len() - 1
    }

    fn claim(&mut self) -> Option<usize> {
        let capacity = self.capacity();
        for _ in 0..capacity {
            let index = self.next;
            self.next = if index == capacity { 1 } else { index + 1 };
            if !self.occupied[index] {
                self.occupied[index] = true;
                self.in_flight += 1;
                return Some(index);
            }
        }
        None
    }

    fn free(&mut self, index: usize) {
        if !self.occupied[index] {
            fatal!("perfctl: work token {} freed twice", index);
        }
        self.occupied[index] = false;
        self.in_flight -= 1;
        self.next = index;
    }
}

/// Per-client table of in-flight work.
pub struct WorkSlotTable {
    slots: Box<[SpinRaw<WorkEntry>]>,
    alloc: SpinNoIrq<AllocState>,
}

impl WorkSlotTable {
    /// Creates a table able to track `capacity` units of work at once.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or tokens of that size could not be
    /// folded with a client index.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "work table needs a non-zero capacity");
        assert!(
            capacity < WORK_TABLE_MAX_SIZE,
            "work table capacity {capacity} exceeds token range"
        );
        let len = capacity + 1;
        let slots: Vec<SpinRaw<WorkEntry>> = (0..len).map(|_| SpinRaw::new(WorkEntry::vacant())).collect();
        Self {
            slots: slots.into_boxed_slice(),
            alloc: SpinNoIrq::new(AllocState {
                occupied: alloc::vec![false; len].into_boxed_slice(),
                next: 1,
                in_flight: 0,
            }),
        }
    }

    /// Maximum number of tokens that can be outstanding at once.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Number of tokens currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.alloc.lock().in_flight
    }

    /// Claims a free slot for a unit of work attributed to `thread_group`.
    ///
    /// The slot keeps the given references until the token is deallocated.
    /// Returns [`UNTRACKED`] when every slot is taken; with the
    /// `strict-capacity` feature that is a fatal driver bug instead.
    pub fn allocate_token(
        &self,
        thread_group: ThreadGroupRef,
        coalition: Option<CoalitionRef>,
    ) -> u64 {
        let claimed = self.alloc.lock().claim();
        let Some(index) = claimed else {
            if cfg!(feature = "strict-capacity") {
                fatal!(
                    "perfctl: work table of capacity {} exhausted, driver is leaking tokens",
                    self.capacity()
                );
            }
            warn!(
                "perfctl: work table of capacity {} exhausted, work left untracked",
                self.capacity()
            );
            return UNTRACKED;
        };
        self.slots[index].lock().bind(thread_group, coalition);
        trace!("perfctl: allocated work token {}", index);
        index as u64
    }

    /// Ends the life of `token` and releases the references its slot held.
    ///
    /// # Panics
    ///
    /// Panics if `token` is [`UNTRACKED`], out of range or not allocated.
    pub fn deallocate_token(&self, token: u64) {
        let Some(entry) = self.entry_for_token(token) else {
            fatal!("perfctl: the untracked work token cannot be deallocated");
        };
        let refs = self.retire_entry(token, entry);
        drop(refs);
    }

    /// Whether `token` currently names an allocated slot.
    pub fn is_allocated(&self, token: u64) -> bool {
        match usize::try_from(token) {
            Ok(index) if index != 0 && index < self.slots.len() => self.alloc.lock().occupied[index],
            _ => false,
        }
    }

    /// Locks the slot behind `token`.
    ///
    /// [`UNTRACKED`] maps to `None`. Any other token must be in range and
    /// allocated; anything else is a stale or forged token and is fatal.
    pub(crate) fn entry_for_token(&self, token: u64) -> Option<SpinRawGuard<'_, WorkEntry>> {
        if token == UNTRACKED {
            return None;
        }
        let index = match usize::try_from(token) {
            Ok(index) if index < self.slots.len() => index,
            _ => fatal!(
                "perfctl: work token {:#x} out of range for capacity {}",
                token,
                self.capacity()
            ),
        };
        let entry = self.slots[index].lock();
        if !entry.is_bound() {
            fatal!("perfctl: work token {} used after it was deallocated", token);
        }
        Some(entry)
    }

    /// Clears a locked slot and returns it to the free pool.
    ///
    /// The slot lock is released before the pool is updated and the caller
    /// drops the returned references after that, so no release runs under
    /// a table lock.
    pub(crate) fn retire_entry(
        &self,
        token: u64,
        mut entry: SpinRawGuard<'_, WorkEntry>,
    ) -> RetiredRefs {
        let refs = entry.retire();
        drop(entry);
        self.alloc.lock().free(token as usize);
        trace!("perfctl: deallocated work token {}", token);
        refs
    }
}

impl Drop for WorkSlotTable {
    fn drop(&mut self) {
        let in_flight = self.alloc.lock().in_flight;
        if in_flight != 0 {
            warn!("perfctl: work table dropped with {} work items in flight", in_flight);
        }
    }
}

/// A token of one client's table, as a [`WorkUnit`].
pub(crate) struct TableToken<'a> {
    pub table: &'a WorkSlotTable,
    pub token: u64,
    pub client_index: u32,
}

impl WorkUnit for TableToken<'_> {
    fn controller_token(&self) -> u64 {
        controller_token(self.token, self.client_index)
    }

    fn lock_entry(&self) -> Option<SpinRawGuard<'_, WorkEntry>> {
        self.table.entry_for_token(self.token)
    }

    fn retire(&self, entry: SpinRawGuard<'_, WorkEntry>) -> RetiredRefs {
        self.table.retire_entry(self.token, entry)
    }
}
