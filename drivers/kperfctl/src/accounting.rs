// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Charging completed work to the submitter's coalition.

use crate::types::{Coalition, DeviceType, DriverState};

/// Resources consumed by a unit of work, as reported by a V4 controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceDelta {
    /// Execution time since the previous end of this work.
    pub elapsed: u64,
    /// Energy in nanojoules since the previous end of this work.
    pub energy_nj: u64,
}

/// Routes `delta` to the coalition sink for the client's device class.
///
/// # Panics
///
/// Panics if the driver state carries no known device class: resource
/// accounting may only be requested by a client with a device type.
pub(crate) fn forward_resource_delta(
    coalition: &dyn Coalition,
    driver_state: &DriverState,
    delta: &ResourceDelta,
) {
    trace!(
        "perfctl: charging coalition {} elapsed={} energy={}nJ",
        coalition.id(),
        delta.elapsed,
        delta.energy_nj
    );
    match checked_device_type(driver_state) {
        DeviceType::NeuralEngine => coalition.record_neural_engine_usage(delta.elapsed, delta.energy_nj),
        DeviceType::Gpu => coalition.record_gpu_usage(delta.elapsed, delta.energy_nj),
        DeviceType::Media => coalition.record_media_usage(delta.elapsed, delta.energy_nj),
    }
}

/// Device class of a client that does resource accounting.
pub(crate) fn checked_device_type(driver_state: &DriverState) -> DeviceType {
    match driver_state.decoded_device_type() {
        Some(ty) => ty,
        None => fatal!(
            "perfctl: resource accounting requested for unknown device type {:#x}",
            driver_state.device_type
        ),
    }
}
