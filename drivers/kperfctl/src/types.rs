// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Handles and records exchanged with drivers, the controller and the
//! thread-group subsystem.

use alloc::sync::Arc;

use bitflags::bitflags;
use strum::FromRepr;

use crate::config::WORK_DATA_SIZE;

/// A driver or device object that takes part in performance control.
pub trait PerfService: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Thread group of the out-of-process execution context backing this
    /// device, if it runs in one.
    fn device_extension_thread_group(&self) -> Option<ThreadGroupRef> {
        None
    }
}

/// Shared handle to a driver or device.
pub type ServiceRef = Arc<dyn PerfService>;

/// Scheduling group that work is attributed to.
///
/// Owned by the thread-group subsystem. Holding a [`ThreadGroupRef`] keeps
/// one reference on it; dropping the handle releases that reference.
pub trait ThreadGroup: Send + Sync {
    /// Stable identifier of the group.
    fn id(&self) -> u64;
}

/// Counted reference to a thread group.
pub type ThreadGroupRef = Arc<dyn ThreadGroup>;

/// Resource accounting group (e.g. one app launch) that receives usage
/// rollups for tracked work.
///
/// Each method is a narrow sink for one device class. Implementations only
/// override the classes they count.
pub trait Coalition: Send + Sync {
    /// Stable identifier of the coalition.
    fn id(&self) -> u64;

    /// Charges neural engine time and energy.
    fn record_neural_engine_usage(&self, _elapsed: u64, _energy_nj: u64) {}

    /// Charges GPU time and energy.
    fn record_gpu_usage(&self, _elapsed: u64, _energy_nj: u64) {}

    /// Charges media engine time and energy.
    fn record_media_usage(&self, _elapsed: u64, _energy_nj: u64) {}
}

/// Counted reference to a coalition.
pub type CoalitionRef = Arc<dyn Coalition>;

/// Device classes the coalition accounting sink understands.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum DeviceType {
    NeuralEngine = 1,
    Gpu          = 2,
    Media        = 3,
}

bitflags! {
    /// Capability bits negotiated with the controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DriverStateFlags: u32 {
        /// Capture the submitter's coalition and charge it on completion.
        const RESOURCE_ACCOUNTING = 1 << 0;
    }
}

/// State blob exchanged with a V3+ controller at device registration.
///
/// The controller may rewrite it, e.g. to turn on resource accounting or to
/// tag the device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverState {
    pub flags: DriverStateFlags,
    /// Raw [`DeviceType`] tag, 0 when unspecified.
    pub device_type: u32,
}

impl DriverState {
    /// Whether units of work must capture and charge a coalition.
    pub fn resource_accounting(&self) -> bool {
        self.flags.contains(DriverStateFlags::RESOURCE_ACCOUNTING)
    }

    /// Decodes the device class tag.
    pub fn decoded_device_type(&self) -> Option<DeviceType> {
        DeviceType::from_repr(self.device_type)
    }
}

impl Default for DriverState {
    fn default() -> Self {
        Self {
            flags: DriverStateFlags::empty(),
            device_type: 0,
        }
    }
}

/// Controller-private scratch area carried by each unit of work.
pub type WorkData = [u8; WORK_DATA_SIZE];

/// Arguments for work submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkSubmitArgs {
    /// Time the driver queued the work.
    pub submit_time: u64,
    /// Opaque value forwarded to the controller.
    pub driver_data: u64,
}

/// Arguments for the start of execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkBeginArgs {
    /// Time the hardware started executing the work.
    pub begin_time: u64,
    /// Opaque value forwarded to the controller.
    pub driver_data: u64,
}

/// Arguments for an in-flight progress update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkUpdateArgs {
    pub update_time: u64,
    pub driver_data: u64,
}

/// Arguments for the end (or pause) of execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkEndArgs {
    /// Time the hardware stopped executing the work.
    pub end_time: u64,
    /// Opaque value forwarded to the controller.
    pub driver_data: u64,
    /// Whether the work completed without error.
    pub succeeded: bool,
}

/// Snapshot of a unit of work handed to every controller callback.
pub struct WorkState<'a> {
    /// Group the work is attributed to.
    pub thread_group: &'a ThreadGroupRef,
    /// Whether the work has begun executing.
    pub started: bool,
    /// The client's negotiated driver state.
    pub driver_state: &'a DriverState,
    /// Default attribution target of a device running in its own
    /// execution context.
    pub target_thread_group: Option<&'a ThreadGroupRef>,
}

impl WorkState<'_> {
    /// Identifier of the submitting thread group.
    pub fn thread_group_id(&self) -> u64 {
        self.thread_group.id()
    }

    /// Identifier of the device's own thread group, if it has one.
    pub fn target_thread_group_id(&self) -> Option<u64> {
        self.target_thread_group.map(|tg| tg.id())
    }
}
