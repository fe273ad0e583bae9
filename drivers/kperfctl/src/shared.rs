// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Kernel-wide state shared by every performance control client.

use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec::Vec,
};
use core::{
    ptr,
    sync::atomic::{AtomicPtr, AtomicU32, Ordering},
};

use spin::{Mutex, Once};

use crate::{
    client::PerfControlClient,
    controller::{ControllerInterface, ControllerTable, InterfaceVersion, Registration},
    error::{PerfError, PerfResult},
    types::ServiceRef,
};

static SHARED_STATE: AtomicPtr<SharedState> = AtomicPtr::new(ptr::null_mut());

/// State shared by all clients: the installed controller and the clients
/// waiting for one.
///
/// There is one instance per kernel, created by the first client and never
/// freed.
pub struct SharedState {
    /// Installed at most once; empty means no controller (every unit of work
    /// is refused).
    interface: Once<ControllerInterface>,
    /// Registration lock. Guards controller installation and the clients
    /// that registered a device before any controller existed.
    pending: Mutex<Vec<Weak<PerfControlClient>>>,
    /// Diagnostic client numbering; wraps around and is then not unique.
    next_client_index: AtomicU32,
}

impl SharedState {
    /// Creates state with no controller installed.
    pub const fn new() -> Self {
        Self {
            interface: Once::new(),
            pending: Mutex::new(Vec::new()),
            next_client_index: AtomicU32::new(0),
        }
    }

    /// Returns the kernel-wide instance, creating it on first use.
    pub fn global() -> &'static SharedState {
        let current = SHARED_STATE.load(Ordering::Acquire);
        if !current.is_null() {
            // SAFETY: a published pointer comes from `Box::into_raw` and is
            // never freed.
            return unsafe { &*current };
        }
        Self::publish(&SHARED_STATE, Box::new(Self::new()))
    }

    /// Publishes `candidate` in `slot` unless another instance won the race,
    /// in which case the candidate is discarded and the winner returned.
    ///
    /// The candidate is fully built before the release half of the exchange,
    /// so a reader that acquires the pointer never sees it half initialized.
    fn publish(slot: &AtomicPtr<SharedState>, candidate: Box<SharedState>) -> &'static SharedState {
        let candidate = Box::into_raw(candidate);
        match slot.compare_exchange(
            ptr::null_mut(),
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                debug!("perfctl: shared state initialized");
                // SAFETY: just published; never freed afterwards.
                unsafe { &*candidate }
            }
            Err(winner) => {
                // SAFETY: the candidate was never published, so this is the
                // only pointer to it.
                drop(unsafe { Box::from_raw(candidate) });
                // SAFETY: the winner was published by another caller and is
                // never freed.
                unsafe { &*winner }
            }
        }
    }

    /// The installed controller, if any.
    pub fn interface(&self) -> Option<&ControllerInterface> {
        self.interface.get()
    }

    /// Version of the installed controller, [`InterfaceVersion::None`] if
    /// there is none yet.
    pub fn interface_version(&self) -> InterfaceVersion {
        self.interface().map_or(InterfaceVersion::None, ControllerInterface::version)
    }

    /// Number of clients whose device waits for a controller.
    pub fn pending_clients(&self) -> usize {
        self.pending.lock().len()
    }

    /// Installs the performance controller described by `table`.
    ///
    /// The table is validated against its claimed version first. Once
    /// installed, every client that registered a device before now and still
    /// has it is announced to the controller. Only the first successful
    /// call installs anything.
    pub fn register_controller(&self, table: ControllerTable) -> PerfResult {
        let interface = ControllerInterface::from_table(table).inspect_err(|err| {
            error!("perfctl: rejecting controller table: {}", err);
        })?;

        let mut pending = self.pending.lock();
        if self.interface.is_completed() {
            warn!("perfctl: performance controller already registered");
            return Err(PerfError::AlreadyRegistered);
        }
        let interface = self.interface.call_once(|| interface);
        info!("perfctl: performance controller registered, interface {:?}", interface.version());

        let waiting: Vec<Arc<PerfControlClient>> =
            pending.drain(..).filter_map(|client| client.upgrade()).collect();
        for client in &waiting {
            let Some((driver, device)) = client.registered_services() else {
                debug!("perfctl: client {} lost its device before the controller arrived", client.client_index());
                continue;
            };
            match announce(interface, client, &driver, &device) {
                Ok(()) => info!(
                    "perfctl: registered pending device {} of client {}",
                    device.name(),
                    client.client_index()
                ),
                Err(err) => warn!(
                    "perfctl: controller refused pending device {}: {}",
                    device.name(),
                    err
                ),
            }
        }
        drop(pending);
        drop(waiting);
        Ok(())
    }

    pub(crate) fn next_client_index(&self) -> u32 {
        self.next_client_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Announces a client's device, or queues the client until a controller
    /// registers.
    pub(crate) fn register_client(
        &self,
        client: &Arc<PerfControlClient>,
        driver: &ServiceRef,
        device: &ServiceRef,
    ) -> PerfResult {
        let mut pending = self.pending.lock();
        match self.interface.get() {
            Some(interface) => announce(interface, client, driver, device),
            None => {
                debug!("perfctl: no controller yet, queueing client {}", client.client_index());
                if !pending.iter().any(|queued| ptr::eq(queued.as_ptr(), Arc::as_ptr(client))) {
                    pending.push(Arc::downgrade(client));
                }
                Ok(())
            }
        }
    }

    /// Withdraws a client's device from the controller or from the queue.
    pub(crate) fn unregister_client(
        &self,
        client: &PerfControlClient,
        driver: &ServiceRef,
        device: &ServiceRef,
    ) -> PerfResult {
        let mut pending = self.pending.lock();
        pending.retain(|queued| !ptr::eq(queued.as_ptr(), client));
        let Some(interface) = self.interface.get() else {
            return Ok(());
        };
        match interface.registration() {
            Registration::DriverDevice(callbacks) => {
                let mut state = client.driver_state();
                let result = callbacks.unregister_driver_device(driver, device, &mut state);
                client.set_driver_state(state);
                result
            }
            Registration::Device(callbacks) => callbacks.unregister_device(device),
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls the registration callback matching the controller's version.
fn announce(
    interface: &ControllerInterface,
    client: &PerfControlClient,
    driver: &ServiceRef,
    device: &ServiceRef,
) -> PerfResult {
    match interface.registration() {
        Registration::DriverDevice(callbacks) => {
            let mut state = client.driver_state();
            let result = callbacks.register_driver_device(driver, device, &mut state);
            client.set_driver_state(state);
            result
        }
        Registration::Device(callbacks) => callbacks.register_device(device),
    }
}

/// Installs the kernel's performance controller.
///
/// See [`SharedState::register_controller`].
pub fn register_performance_controller(table: ControllerTable) -> PerfResult {
    SharedState::global().register_controller(table)
}
