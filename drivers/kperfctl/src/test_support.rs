// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Stand-ins for kernel objects used by the unit tests.

use alloc::sync::Arc;
use core::{
    cell::RefCell,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    accounting::ResourceDelta,
    controller::{
        DeviceCallbacks, DriverDeviceCallbacks, ResourceCallbacks, UpdateCallbacks, WorkCallbacks,
    },
    error::PerfResult,
    hooks::PerfKernelIf,
    types::{
        Coalition, CoalitionRef, DriverState, ServiceRef, ThreadGroup, ThreadGroupRef,
        WorkBeginArgs, WorkData, WorkEndArgs, WorkState, WorkSubmitArgs, WorkUpdateArgs,
    },
};

pub struct MockThreadGroup {
    id: u64,
}

impl MockThreadGroup {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self { id })
    }
}

impl ThreadGroup for MockThreadGroup {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Coalition that sums what it is charged, per device class.
#[derive(Default)]
pub struct MockCoalition {
    id: u64,
    neural_engine: [AtomicU64; 2],
    gpu: [AtomicU64; 2],
    media: [AtomicU64; 2],
}

fn add(totals: &[AtomicU64; 2], elapsed: u64, energy_nj: u64) {
    totals[0].fetch_add(elapsed, Ordering::Relaxed);
    totals[1].fetch_add(energy_nj, Ordering::Relaxed);
}

fn read(totals: &[AtomicU64; 2]) -> (u64, u64) {
    (totals[0].load(Ordering::Relaxed), totals[1].load(Ordering::Relaxed))
}

impl MockCoalition {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Default::default()
        })
    }

    pub fn neural_engine(&self) -> (u64, u64) {
        read(&self.neural_engine)
    }

    pub fn gpu(&self) -> (u64, u64) {
        read(&self.gpu)
    }

    pub fn media(&self) -> (u64, u64) {
        read(&self.media)
    }
}

impl Coalition for MockCoalition {
    fn id(&self) -> u64 {
        self.id
    }

    fn record_neural_engine_usage(&self, elapsed: u64, energy_nj: u64) {
        add(&self.neural_engine, elapsed, energy_nj);
    }

    fn record_gpu_usage(&self, elapsed: u64, energy_nj: u64) {
        add(&self.gpu, elapsed, energy_nj);
    }

    fn record_media_usage(&self, elapsed: u64, energy_nj: u64) {
        add(&self.media, elapsed, energy_nj);
    }
}

/// Controller that accepts every registration and refuses every unit of
/// work.
pub struct NullController;

impl DeviceCallbacks for NullController {
    fn register_device(&self, _device: &ServiceRef) -> PerfResult {
        Ok(())
    }

    fn unregister_device(&self, _device: &ServiceRef) -> PerfResult {
        Ok(())
    }
}

impl DriverDeviceCallbacks for NullController {
    fn register_driver_device(
        &self,
        _driver: &ServiceRef,
        _device: &ServiceRef,
        _state: &mut DriverState,
    ) -> PerfResult {
        Ok(())
    }

    fn unregister_driver_device(
        &self,
        _driver: &ServiceRef,
        _device: &ServiceRef,
        _state: &mut DriverState,
    ) -> PerfResult {
        Ok(())
    }
}

impl WorkCallbacks for NullController {
    fn can_submit(&self, _device: &ServiceRef, _state: &WorkState<'_>, _args: &WorkSubmitArgs) -> bool {
        false
    }

    fn submit(&self, _: &ServiceRef, _: u64, _: &WorkState<'_>, _: &mut WorkData, _: &WorkSubmitArgs) {}

    fn begin(&self, _: &ServiceRef, _: u64, _: &WorkState<'_>, _: &mut WorkData, _: &WorkBeginArgs) {}

    fn end(
        &self,
        _: &ServiceRef,
        _: u64,
        _: &WorkState<'_>,
        _: &mut WorkData,
        _: &WorkEndArgs,
        _: bool,
    ) {
    }
}

impl UpdateCallbacks for NullController {
    fn update(&self, _: &ServiceRef, _: u64, _: &WorkState<'_>, _: &mut WorkData, _: &WorkUpdateArgs) {}
}

impl ResourceCallbacks for NullController {
    fn end_with_resources(
        &self,
        _: &ServiceRef,
        _: u64,
        _: &WorkState<'_>,
        _: &mut WorkData,
        _: &WorkEndArgs,
        _: bool,
    ) -> ResourceDelta {
        ResourceDelta::default()
    }
}

std::thread_local! {
    static CURRENT_THREAD_GROUP: RefCell<Option<ThreadGroupRef>> = const { RefCell::new(None) };
}

/// Makes `thread_group` the calling thread's thread group.
pub fn set_current_thread_group(thread_group: Option<ThreadGroupRef>) {
    CURRENT_THREAD_GROUP.with(|current| *current.borrow_mut() = thread_group);
}

struct PerfKernelIfImpl;

#[crate_interface::impl_interface]
impl PerfKernelIf for PerfKernelIfImpl {
    fn current_thread_group() -> Option<ThreadGroupRef> {
        CURRENT_THREAD_GROUP.with(|current| current.borrow().clone())
    }

    fn current_coalition() -> Option<CoalitionRef> {
        None
    }
}
