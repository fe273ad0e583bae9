// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Queries this crate needs from the rest of the kernel.

use crate_interface::call_interface;

use crate::types::{CoalitionRef, ThreadGroupRef};

/// Kernel services required by the performance control client.
///
/// Must be implemented exactly once by the kernel with
/// `#[crate_interface::impl_interface]`.
#[crate_interface::def_interface]
pub trait PerfKernelIf {
    /// Thread group of the calling thread, with a reference taken for the
    /// caller.
    fn current_thread_group() -> Option<ThreadGroupRef>;

    /// Resource coalition of the calling thread, with a reference taken for
    /// the caller.
    fn current_coalition() -> Option<CoalitionRef>;
}

pub(crate) fn current_thread_group() -> Option<ThreadGroupRef> {
    call_interface!(PerfKernelIf::current_thread_group)
}

pub(crate) fn current_coalition() -> Option<CoalitionRef> {
    call_interface!(PerfKernelIf::current_coalition)
}
