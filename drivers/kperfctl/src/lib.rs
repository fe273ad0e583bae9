// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Performance control work accounting for device drivers.
//!
//! Drivers that offload work to a device (neural engine, GPU, media engine)
//! report each unit of work through a [`PerfControlClient`]: when it is
//! queued, when it starts and stops executing and when it is done. The
//! client forwards these events to the kernel's performance controller,
//! which may be registered at any time and exactly once through
//! [`register_performance_controller`].
//!
//! Work is identified either by a token drawn from the client's fixed-size
//! table ([`PerfControlClient::work_submit`]) or by a [`WorkContext`] the
//! driver allocates itself ([`PerfControlClient::work_submit_with_context`]).
//!
//! The kernel supplies the calling thread's thread group and coalition by
//! implementing [`PerfKernelIf`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

/// Reports a broken caller contract and stops.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        error!($($arg)*);
        panic!($($arg)*)
    }};
}

mod accounting;
mod client;
pub mod config;
mod context;
mod controller;
mod entry;
mod error;
mod hooks;
mod shared;
mod table;
mod types;

#[cfg(test)]
mod test_support;

pub use self::{
    accounting::ResourceDelta,
    client::PerfControlClient,
    config::ClientConfig,
    context::WorkContext,
    controller::{
        ControllerInterface, ControllerTable, DeviceCallbacks, DriverDeviceCallbacks,
        InterfaceVersion, ResourceCallbacks, UpdateCallbacks, WorkCallbacks,
    },
    error::{PerfError, PerfResult},
    hooks::PerfKernelIf,
    shared::{SharedState, register_performance_controller},
    table::{UNTRACKED, WorkSlotTable, controller_token},
    types::{
        Coalition, CoalitionRef, DeviceType, DriverState, DriverStateFlags, PerfService,
        ServiceRef, ThreadGroup, ThreadGroupRef, WorkBeginArgs, WorkData, WorkEndArgs, WorkState,
        WorkSubmitArgs, WorkUpdateArgs,
    },
};
