// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Per-driver performance control client.
//!
//! A driver creates one client, registers its device with it and then
//! reports each unit of offloaded work through it, either by token or by
//! [`WorkContext`]. Both flavours run through the same lifecycle:
//!
//! ```text
//! untracked --submit--> allocated --begin--> started
//!                           ^                   |
//!                           +--end(done=false)--+
//!                    allocated/started --end(done=true)--> ended
//! ```
//!
//! Work the controller refuses, or that is submitted from a thread without a
//! thread group, stays untracked and every later call on it does nothing.

use alloc::sync::{Arc, Weak};

use spin::RwLock;

use crate::{
    accounting::{self, ResourceDelta},
    config::ClientConfig,
    context::WorkContext,
    controller::ControllerInterface,
    entry::WorkUnit,
    error::PerfResult,
    hooks,
    shared::SharedState,
    table::{TableToken, UNTRACKED, WorkSlotTable},
    types::{
        CoalitionRef, DriverState, PerfService, ServiceRef, ThreadGroupRef, WorkBeginArgs,
        WorkEndArgs, WorkState, WorkSubmitArgs, WorkUpdateArgs,
    },
};

struct DeviceRegistration {
    /// Held until the device is unregistered.
    driver: Option<ServiceRef>,
    device: Option<Weak<dyn PerfService>>,
    driver_state: DriverState,
    /// Thread group of a device running in its own execution context.
    target_thread_group: Option<ThreadGroupRef>,
}

/// Registration data captured once per work call.
struct RegistrationSnapshot {
    driver_state: DriverState,
    target_thread_group: Option<ThreadGroupRef>,
}

impl RegistrationSnapshot {
    fn work_state<'a>(&'a self, thread_group: &'a ThreadGroupRef, started: bool) -> WorkState<'a> {
        WorkState {
            thread_group,
            started,
            driver_state: &self.driver_state,
            target_thread_group: self.target_thread_group.as_ref(),
        }
    }
}

/// A unit of work the controller agreed to track, before it has storage.
struct Admission {
    interface: &'static ControllerInterface,
    thread_group: ThreadGroupRef,
    coalition: Option<CoalitionRef>,
    snapshot: RegistrationSnapshot,
}

/// Work accounting client owned by one driver instance.
pub struct PerfControlClient {
    shared: &'static SharedState,
    index: u32,
    work_table: Option<WorkSlotTable>,
    registration: RwLock<DeviceRegistration>,
}

impl PerfControlClient {
    /// Creates a client attached to the kernel-wide shared state.
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Self::with_shared(SharedState::global(), config)
    }

    /// Creates a client attached to `shared`.
    pub fn with_shared(shared: &'static SharedState, config: ClientConfig) -> Arc<Self> {
        let capacity = config.effective_capacity();
        let index = shared.next_client_index();
        debug!("perfctl: creating client {} with work capacity {}", index, capacity);
        Arc::new(Self {
            shared,
            index,
            work_table: (capacity > 0).then(|| WorkSlotTable::new(capacity)),
            registration: RwLock::new(DeviceRegistration {
                driver: None,
                device: None,
                driver_state: config.initial_driver_state(),
                target_thread_group: None,
            }),
        })
    }

    /// Diagnostic index of this client, folded into controller tokens.
    pub fn client_index(&self) -> u32 {
        self.index
    }

    /// Token capacity; zero for a context-only client.
    pub fn capacity(&self) -> usize {
        self.work_table.as_ref().map_or(0, WorkSlotTable::capacity)
    }

    /// Number of tokens currently in flight.
    pub fn in_flight(&self) -> usize {
        self.work_table.as_ref().map_or(0, WorkSlotTable::in_flight)
    }

    /// The shared state this client reports to.
    pub fn shared(&self) -> &'static SharedState {
        self.shared
    }

    /// Current driver state, as last negotiated with the controller.
    pub fn driver_state(&self) -> DriverState {
        self.registration.read().driver_state
    }

    pub(crate) fn set_driver_state(&self, state: DriverState) {
        self.registration.write().driver_state = state;
    }

    /// The registered driver and device, if the device is still alive.
    pub(crate) fn registered_services(&self) -> Option<(ServiceRef, ServiceRef)> {
        let registration = self.registration.read();
        let device = registration.device.as_ref()?.upgrade()?;
        let driver = registration.driver.clone()?;
        Some((driver, device))
    }

    /// Registers `device`, owned by `driver`, with the performance
    /// controller.
    ///
    /// Without a controller the client is queued and announced once one
    /// registers; that counts as success. Otherwise the controller's status
    /// is returned as is.
    pub fn register_device(self: &Arc<Self>, driver: &ServiceRef, device: &ServiceRef) -> PerfResult {
        let extension_group = device.device_extension_thread_group();
        let replaced = {
            let mut registration = self.registration.write();
            registration.device = Some(Arc::downgrade(device));
            (
                registration.driver.replace(driver.clone()),
                core::mem::replace(&mut registration.target_thread_group, extension_group),
            )
        };
        drop(replaced);

        let result = self.shared.register_client(self, driver, device);
        match result {
            Ok(()) => debug!("perfctl: client {} registered device {}", self.index, device.name()),
            Err(err) => warn!(
                "perfctl: client {} failed to register device {}: {}",
                self.index,
                device.name(),
                err
            ),
        }
        result
    }

    /// Withdraws `device` from the performance controller.
    ///
    /// The driver, the device and its extension thread group are released
    /// whatever the controller answers.
    pub fn unregister_device(&self, driver: &ServiceRef, device: &ServiceRef) -> PerfResult {
        let result = self.shared.unregister_client(self, driver, device);
        let released = {
            let mut registration = self.registration.write();
            registration.device = None;
            (registration.driver.take(), registration.target_thread_group.take())
        };
        drop(released);
        debug!("perfctl: client {} unregistered device {}: {:?}", self.index, device.name(), result);
        result
    }

    /// Reports newly queued work.
    ///
    /// Returns the token to pass to the other work calls, or [`UNTRACKED`]
    /// if the work is not tracked.
    pub fn work_submit(&self, device: &ServiceRef, args: &WorkSubmitArgs) -> u64 {
        self.submit_token(device, args, None)
    }

    /// Reports work that starts executing as soon as it is queued.
    pub fn work_submit_and_begin(
        &self,
        device: &ServiceRef,
        submit_args: &WorkSubmitArgs,
        begin_args: &WorkBeginArgs,
    ) -> u64 {
        self.submit_token(device, submit_args, Some(begin_args))
    }

    /// Reports that the work behind `token` started executing.
    ///
    /// # Panics
    ///
    /// Panics if the work has already begun and not ended since, or if
    /// `token` is not a live token of this client.
    pub fn work_begin(&self, device: &ServiceRef, token: u64, args: &WorkBeginArgs) {
        if let Some(unit) = self.token_unit(token) {
            self.begin_unit(device, &unit, args);
        }
    }

    /// Reports progress of the work behind `token`.
    pub fn work_update(&self, device: &ServiceRef, token: u64, args: &WorkUpdateArgs) {
        if let Some(unit) = self.token_unit(token) {
            self.update_unit(device, &unit, args);
        }
    }

    /// Reports that the work behind `token` stopped executing.
    ///
    /// With `done` the token is released and must not be used again;
    /// otherwise the work is paused and may begin again under the same
    /// token.
    pub fn work_end(&self, device: &ServiceRef, token: u64, args: &WorkEndArgs, done: bool) {
        if let Some(unit) = self.token_unit(token) {
            self.end_unit(device, &unit, args, done);
        }
    }

    /// Creates a work context for the `*_with_context` calls.
    pub fn copy_work_context(&self) -> Arc<WorkContext> {
        WorkContext::new()
    }

    /// Reports newly queued work tracked by `context`.
    ///
    /// Returns whether the work is tracked.
    ///
    /// # Panics
    ///
    /// Panics if `context` still tracks work that has not ended.
    pub fn work_submit_with_context(
        &self,
        device: &ServiceRef,
        context: &WorkContext,
        args: &WorkSubmitArgs,
    ) -> bool {
        self.submit_context(device, context, args, None)
    }

    /// Context flavour of [`work_submit_and_begin`](Self::work_submit_and_begin).
    pub fn work_submit_and_begin_with_context(
        &self,
        device: &ServiceRef,
        context: &WorkContext,
        submit_args: &WorkSubmitArgs,
        begin_args: &WorkBeginArgs,
    ) -> bool {
        self.submit_context(device, context, submit_args, Some(begin_args))
    }

    pub fn work_begin_with_context(&self, device: &ServiceRef, context: &WorkContext, args: &WorkBeginArgs) {
        self.begin_unit(device, context, args);
    }

    pub fn work_update_with_context(&self, device: &ServiceRef, context: &WorkContext, args: &WorkUpdateArgs) {
        self.update_unit(device, context, args);
    }

    /// Context flavour of [`work_end`](Self::work_end). With `done` the
    /// context is unbound and can be submitted again or dropped.
    pub fn work_end_with_context(
        &self,
        device: &ServiceRef,
        context: &WorkContext,
        args: &WorkEndArgs,
        done: bool,
    ) {
        self.end_unit(device, context, args, done);
    }

    fn snapshot(&self) -> RegistrationSnapshot {
        let registration = self.registration.read();
        RegistrationSnapshot {
            driver_state: registration.driver_state,
            target_thread_group: registration.target_thread_group.clone(),
        }
    }

    fn token_unit(&self, token: u64) -> Option<TableToken<'_>> {
        if token == UNTRACKED {
            return None;
        }
        let Some(table) = self.work_table.as_ref() else {
            fatal!("perfctl: work token {} used on context-only client {}", token, self.index);
        };
        Some(TableToken {
            table,
            token,
            client_index: self.index,
        })
    }

    /// Asks the controller whether the calling thread's work is tracked.
    fn admit(&self, device: &ServiceRef, args: &WorkSubmitArgs) -> Option<Admission> {
        let thread_group = hooks::current_thread_group()?;
        let interface = self.shared.interface()?;
        let snapshot = self.snapshot();

        let state = snapshot.work_state(&thread_group, false);
        if !interface.work().can_submit(device, &state, args) {
            trace!("perfctl: controller refused work from thread group {}", thread_group.id());
            return None;
        }

        let coalition = if snapshot.driver_state.resource_accounting() {
            hooks::current_coalition()
        } else {
            None
        };
        Some(Admission {
            interface,
            thread_group,
            coalition,
            snapshot,
        })
    }

    fn submit_token(
        &self,
        device: &ServiceRef,
        submit_args: &WorkSubmitArgs,
        begin_args: Option<&WorkBeginArgs>,
    ) -> u64 {
        let Some(table) = self.work_table.as_ref() else {
            return UNTRACKED;
        };
        let Some(admission) = self.admit(device, submit_args) else {
            return UNTRACKED;
        };
        let Admission {
            interface,
            thread_group,
            coalition,
            snapshot,
        } = admission;

        let token = table.allocate_token(thread_group, coalition);
        if token == UNTRACKED {
            return UNTRACKED;
        }
        let unit = TableToken {
            table,
            token,
            client_index: self.index,
        };
        self.start_unit(interface, device, &unit, &snapshot, submit_args, begin_args);
        token
    }

    fn submit_context(
        &self,
        device: &ServiceRef,
        context: &WorkContext,
        submit_args: &WorkSubmitArgs,
        begin_args: Option<&WorkBeginArgs>,
    ) -> bool {
        let Some(admission) = self.admit(device, submit_args) else {
            return false;
        };
        let Admission {
            interface,
            thread_group,
            coalition,
            snapshot,
        } = admission;

        context.bind(thread_group, coalition);
        self.start_unit(interface, device, context, &snapshot, submit_args, begin_args);
        true
    }

    /// Hands freshly bound storage to the controller, optionally beginning
    /// the work right away.
    fn start_unit<U: WorkUnit>(
        &self,
        interface: &ControllerInterface,
        device: &ServiceRef,
        unit: &U,
        snapshot: &RegistrationSnapshot,
        submit_args: &WorkSubmitArgs,
        begin_args: Option<&WorkBeginArgs>,
    ) {
        let token = unit.controller_token();
        let Some(mut entry) = unit.lock_entry() else {
            return;
        };
        let parts = entry.parts();
        interface.work().submit(
            device,
            token,
            &snapshot.work_state(parts.thread_group, false),
            parts.work_data,
            submit_args,
        );
        trace!("perfctl: client {} submitted work {:#x}", self.index, token);

        if let Some(begin_args) = begin_args {
            interface.work().begin(
                device,
                token,
                &snapshot.work_state(parts.thread_group, false),
                parts.work_data,
                begin_args,
            );
            entry.set_started(true);
        }
    }

    fn begin_unit<U: WorkUnit>(&self, device: &ServiceRef, unit: &U, args: &WorkBeginArgs) {
        let snapshot = self.snapshot();
        let token = unit.controller_token();
        let Some(mut entry) = unit.lock_entry() else {
            return;
        };
        if entry.is_started() {
            fatal!("perfctl: work {:#x} began twice without ending", token);
        }
        let Some(interface) = self.shared.interface() else {
            return;
        };
        let parts = entry.parts();
        interface.work().begin(
            device,
            token,
            &snapshot.work_state(parts.thread_group, false),
            parts.work_data,
            args,
        );
        entry.set_started(true);
    }

    fn update_unit<U: WorkUnit>(&self, device: &ServiceRef, unit: &U, args: &WorkUpdateArgs) {
        let snapshot = self.snapshot();
        let token = unit.controller_token();
        let Some(mut entry) = unit.lock_entry() else {
            return;
        };
        let Some(update) = self.shared.interface().and_then(ControllerInterface::update) else {
            return;
        };
        let parts = entry.parts();
        update.update(
            device,
            token,
            &snapshot.work_state(parts.thread_group, parts.started),
            parts.work_data,
            args,
        );
    }

    fn end_unit<U: WorkUnit>(&self, device: &ServiceRef, unit: &U, args: &WorkEndArgs, done: bool) {
        let snapshot = self.snapshot();
        let token = unit.controller_token();
        let Some(mut entry) = unit.lock_entry() else {
            return;
        };

        let mut delta = None;
        if let Some(interface) = self.shared.interface() {
            let resources = interface
                .resources()
                .filter(|_| snapshot.driver_state.resource_accounting());
            let parts = entry.parts();
            let state = snapshot.work_state(parts.thread_group, parts.started);
            match resources {
                Some(resources) => {
                    delta = Some(resources.end_with_resources(
                        device,
                        token,
                        &state,
                        parts.work_data,
                        args,
                        done,
                    ));
                }
                None => interface.work().end(device, token, &state, parts.work_data, args, done),
            }
        }
        trace!("perfctl: client {} ended work {:#x}, done={}", self.index, token, done);

        if done {
            let refs = unit.retire(entry);
            if let Some(thread_group) = refs.thread_group.as_ref() {
                trace!("perfctl: work {:#x} of thread group {} retired", token, thread_group.id());
            }
            if let Some(delta) = delta {
                charge(refs.coalition.as_ref(), &snapshot.driver_state, &delta);
            }
            drop(refs);
        } else {
            entry.set_started(false);
            let coalition = entry.coalition().cloned();
            drop(entry);
            if let Some(delta) = delta {
                charge(coalition.as_ref(), &snapshot.driver_state, &delta);
            }
        }
    }
}

impl Drop for PerfControlClient {
    fn drop(&mut self) {
        debug!("perfctl: releasing client {}", self.index);
    }
}

/// Forwards a resource delta to the coalition captured at submission.
fn charge(coalition: Option<&CoalitionRef>, driver_state: &DriverState, delta: &ResourceDelta) {
    match coalition {
        Some(coalition) => accounting::forward_resource_delta(&**coalition, driver_state, delta),
        None => {
            let device_type = accounting::checked_device_type(driver_state);
            debug!("perfctl: {:?} work ended without a coalition to charge", device_type);
        }
    }
}
