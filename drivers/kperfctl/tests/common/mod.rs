// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Shared fixtures: a recording controller, mock kernel objects and the
//! kernel hooks backing them.

#![allow(unused)]

use std::{
    cell::RefCell,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use kperfctl::{
    ClientConfig, Coalition, CoalitionRef, ControllerTable, DeviceCallbacks,
    DriverDeviceCallbacks, DriverState, InterfaceVersion, PerfControlClient, PerfError,
    PerfKernelIf, PerfResult, PerfService, ResourceCallbacks, ResourceDelta, ServiceRef,
    SharedState, ThreadGroup, ThreadGroupRef, UpdateCallbacks, WorkBeginArgs, WorkCallbacks,
    WorkData, WorkEndArgs, WorkState, WorkSubmitArgs, WorkUpdateArgs,
};

pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

/// A shared state private to one test.
pub fn fresh_shared() -> &'static SharedState {
    init_logger();
    Box::leak(Box::new(SharedState::new()))
}

// ========== Kernel Objects ==========

pub struct TestThreadGroup {
    id: u64,
}

impl TestThreadGroup {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self { id })
    }
}

impl ThreadGroup for TestThreadGroup {
    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Default)]
pub struct TestCoalition {
    id: u64,
    charges: Mutex<Vec<(&'static str, u64, u64)>>,
}

impl TestCoalition {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            ..Default::default()
        })
    }

    /// Every charge received, as `(device class, elapsed, energy)`.
    pub fn charges(&self) -> Vec<(&'static str, u64, u64)> {
        self.charges.lock().unwrap().clone()
    }
}

impl Coalition for TestCoalition {
    fn id(&self) -> u64 {
        self.id
    }

    fn record_neural_engine_usage(&self, elapsed: u64, energy_nj: u64) {
        self.charges.lock().unwrap().push(("neural_engine", elapsed, energy_nj));
    }

    fn record_gpu_usage(&self, elapsed: u64, energy_nj: u64) {
        self.charges.lock().unwrap().push(("gpu", elapsed, energy_nj));
    }

    fn record_media_usage(&self, elapsed: u64, energy_nj: u64) {
        self.charges.lock().unwrap().push(("media", elapsed, energy_nj));
    }
}

pub struct TestService {
    name: &'static str,
    extension: Option<ThreadGroupRef>,
}

impl TestService {
    pub fn new(name: &'static str) -> ServiceRef {
        Arc::new(Self {
            name,
            extension: None,
        })
    }

    /// A device running in its own execution context.
    pub fn with_extension(name: &'static str, extension: ThreadGroupRef) -> ServiceRef {
        Arc::new(Self {
            name,
            extension: Some(extension),
        })
    }
}

impl PerfService for TestService {
    fn name(&self) -> &str {
        self.name
    }

    fn device_extension_thread_group(&self) -> Option<ThreadGroupRef> {
        self.extension.clone()
    }
}

// ========== Kernel Hooks ==========

thread_local! {
    static CURRENT_THREAD_GROUP: RefCell<Option<ThreadGroupRef>> = const { RefCell::new(None) };
    static CURRENT_COALITION: RefCell<Option<CoalitionRef>> = const { RefCell::new(None) };
}

pub fn set_current_thread_group(thread_group: Option<ThreadGroupRef>) {
    CURRENT_THREAD_GROUP.with(|current| *current.borrow_mut() = thread_group);
}

pub fn set_current_coalition(coalition: Option<CoalitionRef>) {
    CURRENT_COALITION.with(|current| *current.borrow_mut() = coalition);
}

struct TestKernel;

#[crate_interface::impl_interface]
impl PerfKernelIf for TestKernel {
    fn current_thread_group() -> Option<ThreadGroupRef> {
        CURRENT_THREAD_GROUP.with(|current| current.borrow().clone())
    }

    fn current_coalition() -> Option<CoalitionRef> {
        CURRENT_COALITION.with(|current| current.borrow().clone())
    }
}

// ========== Recording Controller ==========

/// One callback the controller received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    RegisterDevice(String),
    UnregisterDevice(String),
    RegisterDriverDevice(String),
    UnregisterDriverDevice(String),
    Submit { token: u64, thread_group: u64 },
    Begin { token: u64, data: u8 },
    Update { token: u64, started: bool },
    End { token: u64, started: bool, done: bool },
    EndWithResources { token: u64, done: bool },
}

/// Controller that records every callback and answers as configured.
pub struct RecordingController {
    events: Mutex<Vec<Event>>,
    accept_work: AtomicBool,
    register_status: Mutex<PerfResult>,
    unregister_status: Mutex<PerfResult>,
    granted_state: Mutex<Option<DriverState>>,
    delta: Mutex<ResourceDelta>,
    last_target: Mutex<Option<u64>>,
    next_mark: AtomicU64,
}

impl RecordingController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            accept_work: AtomicBool::new(true),
            register_status: Mutex::new(Ok(())),
            unregister_status: Mutex::new(Ok(())),
            granted_state: Mutex::new(None),
            delta: Mutex::new(ResourceDelta::default()),
            last_target: Mutex::new(None),
            next_mark: AtomicU64::new(1),
        })
    }

    /// A table offering every callback set, claiming `version`.
    pub fn table(self: &Arc<Self>, version: InterfaceVersion) -> ControllerTable {
        ControllerTable::new(version)
            .with_device(self.clone())
            .with_driver_device(self.clone())
            .with_work(self.clone())
            .with_update(self.clone())
            .with_resources(self.clone())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn set_accept_work(&self, accept: bool) {
        self.accept_work.store(accept, Ordering::SeqCst);
    }

    pub fn set_register_status(&self, status: PerfResult) {
        *self.register_status.lock().unwrap() = status;
    }

    pub fn set_unregister_status(&self, status: PerfResult) {
        *self.unregister_status.lock().unwrap() = status;
    }

    /// Driver state written back on driver-device registration.
    pub fn grant_state(&self, state: DriverState) {
        *self.granted_state.lock().unwrap() = Some(state);
    }

    pub fn set_delta(&self, delta: ResourceDelta) {
        *self.delta.lock().unwrap() = delta;
    }

    /// Target thread group id seen by the last `can_submit`.
    pub fn last_target(&self) -> Option<u64> {
        *self.last_target.lock().unwrap()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl DeviceCallbacks for RecordingController {
    fn register_device(&self, device: &ServiceRef) -> PerfResult {
        self.record(Event::RegisterDevice(device.name().into()));
        *self.register_status.lock().unwrap()
    }

    fn unregister_device(&self, device: &ServiceRef) -> PerfResult {
        self.record(Event::UnregisterDevice(device.name().into()));
        *self.unregister_status.lock().unwrap()
    }
}

impl DriverDeviceCallbacks for RecordingController {
    fn register_driver_device(
        &self,
        _driver: &ServiceRef,
        device: &ServiceRef,
        state: &mut DriverState,
    ) -> PerfResult {
        self.record(Event::RegisterDriverDevice(device.name().into()));
        if let Some(granted) = *self.granted_state.lock().unwrap() {
            *state = granted;
        }
        *self.register_status.lock().unwrap()
    }

    fn unregister_driver_device(
        &self,
        _driver: &ServiceRef,
        device: &ServiceRef,
        _state: &mut DriverState,
    ) -> PerfResult {
        self.record(Event::UnregisterDriverDevice(device.name().into()));
        *self.unregister_status.lock().unwrap()
    }
}

impl WorkCallbacks for RecordingController {
    fn can_submit(&self, _device: &ServiceRef, state: &WorkState<'_>, _args: &WorkSubmitArgs) -> bool {
        *self.last_target.lock().unwrap() = state.target_thread_group_id();
        self.accept_work.load(Ordering::SeqCst)
    }

    fn submit(
        &self,
        _device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        data: &mut WorkData,
        _args: &WorkSubmitArgs,
    ) {
        data[0] = self.next_mark.fetch_add(1, Ordering::SeqCst) as u8;
        self.record(Event::Submit {
            token,
            thread_group: state.thread_group_id(),
        });
    }

    fn begin(
        &self,
        _device: &ServiceRef,
        token: u64,
        _state: &WorkState<'_>,
        data: &mut WorkData,
        _args: &WorkBeginArgs,
    ) {
        self.record(Event::Begin { token, data: data[0] });
    }

    fn end(
        &self,
        _device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        _data: &mut WorkData,
        _args: &WorkEndArgs,
        done: bool,
    ) {
        self.record(Event::End {
            token,
            started: state.started,
            done,
        });
    }
}

impl UpdateCallbacks for RecordingController {
    fn update(
        &self,
        _device: &ServiceRef,
        token: u64,
        state: &WorkState<'_>,
        _data: &mut WorkData,
        _args: &WorkUpdateArgs,
    ) {
        self.record(Event::Update {
            token,
            started: state.started,
        });
    }
}

impl ResourceCallbacks for RecordingController {
    fn end_with_resources(
        &self,
        _device: &ServiceRef,
        token: u64,
        _state: &WorkState<'_>,
        _data: &mut WorkData,
        _args: &WorkEndArgs,
        done: bool,
    ) -> ResourceDelta {
        self.record(Event::EndWithResources { token, done });
        *self.delta.lock().unwrap()
    }
}

/// A client on `shared` with its device registered, running on a thread
/// that belongs to thread group `thread_group`.
pub fn registered_client(
    shared: &'static SharedState,
    config: ClientConfig,
    thread_group: u64,
) -> (Arc<PerfControlClient>, ServiceRef, ServiceRef) {
    let client = PerfControlClient::with_shared(shared, config);
    let driver = TestService::new("driver");
    let device = TestService::new("device");
    client
        .register_device(&driver, &device)
        .expect("device registration must succeed");
    set_current_thread_group(Some(TestThreadGroup::new(thread_group)));
    (client, driver, device)
}
