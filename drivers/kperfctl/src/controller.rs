// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Versioned performance controller interface.
//!
//! A controller presents a [`ControllerTable`]: an interface version plus the
//! callback sets it implements. Each version requires a fixed set:
//!
//! | version | required                                   | optional        |
//! |---------|--------------------------------------------|-----------------|
//! | V1      | [`DeviceCallbacks`], [`WorkCallbacks`]     |                 |
//! | V2      | [`DeviceCallbacks`], [`WorkCallbacks`]     | [`UpdateCallbacks`] |
//! | V3      | [`DriverDeviceCallbacks`], [`WorkCallbacks`] | [`UpdateCallbacks`] |
//! | V4      | V3 set plus [`ResourceCallbacks`]          | [`UpdateCallbacks`] |
//!
//! The table is validated once, at registration, into a
//! [`ControllerInterface`]. Callback sets above the claimed version are
//! dropped there, so nothing newer than the negotiated version is ever
//! invoked.

use alloc::sync::Arc;

use strum::FromRepr;

use crate::{
    accounting::ResourceDelta,
    error::{PerfError, PerfResult},
    types::{
        DriverState, ServiceRef, WorkBeginArgs, WorkData, WorkEndArgs, WorkState, WorkSubmitArgs,
        WorkUpdateArgs,
    },
};

/// Controller interface revisions, ordered oldest first.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, FromRepr)]
pub enum InterfaceVersion {
    /// No controller; every unit of work stays untracked.
    #[default]
    None = 0,
    V1   = 1,
    V2   = 2,
    V3   = 3,
    V4   = 4,
}

/// Device registration used by V1 and V2 controllers.
pub trait DeviceCallbacks: Send + Sync {
    fn register_device(&self, device: &ServiceRef) -> PerfResult;
    fn unregister_device(&self, device: &ServiceRef) -> PerfResult;
}

/// Device registration used by V3+ controllers; exchanges the driver state.
pub trait DriverDeviceCallbacks: Send + Sync {
    fn register_driver_device(
        &self,
        driver: &ServiceRef,
        device: &ServiceRef,
        state: &mut DriverState,
    ) -> PerfResult;

    fn unregister_driver_device(
        &self,
        driver: &ServiceRef,
        device: &ServiceRef,
        state: &mut DriverState,
    ) -> PerfResult;
}

/// Work lifecycle callbacks, required by every version.
pub trait WorkCallbacks: Send + Sync {
    /// Decides whether a unit of work should be tracked at all.
    fn can_submit(&self, device: &ServiceRef, state: &WorkState<'_>, args: &WorkSubmitArgs)
    -> bool;

    fn submit(
        &self,
        device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        data: &mut WorkData,
        args: &WorkSubmitArgs,
    );

    fn begin(
        &self,
        device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        data: &mut WorkData,
        args: &WorkBeginArgs,
    );

    /// `done` is false when the work is only paused and will begin again.
    fn end(
        &self,
        device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        data: &mut WorkData,
        args: &WorkEndArgs,
        done: bool,
    );
}

/// In-flight progress updates (V2+, optional).
pub trait UpdateCallbacks: Send + Sync {
    fn update(
        &self,
        device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        data: &mut WorkData,
        args: &WorkUpdateArgs,
    );
}

/// Resource-aware end of work (V4+).
pub trait ResourceCallbacks: Send + Sync {
    /// Ends the work like [`WorkCallbacks::end`] and reports the resources
    /// it consumed since the last end.
    fn end_with_resources(
        &self,
        device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        data: &mut WorkData,
        args: &WorkEndArgs,
        done: bool,
    ) -> ResourceDelta;
}

/// Callback table presented by a controller at registration.
#[derive(Clone, Default)]
pub struct ControllerTable {
    pub version: InterfaceVersion,
    pub device: Option<Arc<dyn DeviceCallbacks>>,
    pub driver_device: Option<Arc<dyn DriverDeviceCallbacks>>,
    pub work: Option<Arc<dyn WorkCallbacks>>,
    pub update: Option<Arc<dyn UpdateCallbacks>>,
    pub resources: Option<Arc<dyn ResourceCallbacks>>,
}

impl ControllerTable {
    /// Creates an empty table claiming `version`.
    pub fn new(version: InterfaceVersion) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, callbacks: Arc<dyn DeviceCallbacks>) -> Self {
        self.device = Some(callbacks);
        self
    }

    pub fn with_driver_device(mut self, callbacks: Arc<dyn DriverDeviceCallbacks>) -> Self {
        self.driver_device = Some(callbacks);
        self
    }

    pub fn with_work(mut self, callbacks: Arc<dyn WorkCallbacks>) -> Self {
        self.work = Some(callbacks);
        self
    }

    pub fn with_update(mut self, callbacks: Arc<dyn UpdateCallbacks>) -> Self {
        self.update = Some(callbacks);
        self
    }

    pub fn with_resources(mut self, callbacks: Arc<dyn ResourceCallbacks>) -> Self {
        self.resources = Some(callbacks);
        self
    }
}

/// How devices are announced to the installed controller.
pub(crate) enum Registration {
    Device(Arc<dyn DeviceCallbacks>),
    DriverDevice(Arc<dyn DriverDeviceCallbacks>),
}

/// A validated controller table.
///
/// Every callback set held here is valid for `version`; callers dispatch on
/// presence instead of re-checking the version.
pub struct ControllerInterface {
    version: InterfaceVersion,
    registration: Registration,
    work: Arc<dyn WorkCallbacks>,
    update: Option<Arc<dyn UpdateCallbacks>>,
    resources: Option<Arc<dyn ResourceCallbacks>>,
}

impl ControllerInterface {
    /// Checks that `table` carries every callback set its version requires
    /// and keeps only the sets that version allows.
    pub fn from_table(table: ControllerTable) -> PerfResult<Self> {
        let version = table.version;
        let incomplete = PerfError::IncompleteInterface(version);

        let work = match version {
            InterfaceVersion::None => return Err(PerfError::InvalidVersion),
            _ => table.work.ok_or(incomplete)?,
        };

        let registration = if version >= InterfaceVersion::V3 {
            Registration::DriverDevice(table.driver_device.ok_or(incomplete)?)
        } else {
            Registration::Device(table.device.ok_or(incomplete)?)
        };

        let update = if version >= InterfaceVersion::V2 {
            table.update
        } else {
            None
        };

        let resources = if version >= InterfaceVersion::V4 {
            Some(table.resources.ok_or(incomplete)?)
        } else {
            None
        };

        Ok(Self {
            version,
            registration,
            work,
            update,
            resources,
        })
    }

    /// Negotiated interface version.
    pub fn version(&self) -> InterfaceVersion {
        self.version
    }

    pub(crate) fn registration(&self) -> &Registration {
        &self.registration
    }

    pub(crate) fn work(&self) -> &dyn WorkCallbacks {
        self.work.as_ref()
    }

    pub(crate) fn update(&self) -> Option<&dyn UpdateCallbacks> {
        self.update.as_deref()
    }

    pub(crate) fn resources(&self) -> Option<&dyn ResourceCallbacks> {
        self.resources.as_deref()
    }
}
