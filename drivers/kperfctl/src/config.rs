// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Work table limits and per-client configuration.

use static_assertions::const_assert;

use crate::types::{DeviceType, DriverState, DriverStateFlags};

/// Number of low-order bits of a controller token that carry the table index.
///
/// The bits above hold the owning client's index so the controller can tell
/// identical indices from different clients apart.
pub const WORK_TABLE_INDEX_BITS: u32 = 24;

/// Largest table length (reserved slot included) a token can address.
pub const WORK_TABLE_MAX_SIZE: usize = (1 << WORK_TABLE_INDEX_BITS) - 1;

/// Upper bound on the number of concurrently tracked work items per client.
pub const MAX_WORK_CAPACITY: usize = 1024;

/// Size of the controller-private scratch area carried by each unit of work.
pub const WORK_DATA_SIZE: usize = 32;

const_assert!(MAX_WORK_CAPACITY + 1 <= WORK_TABLE_MAX_SIZE);
const_assert!(WORK_TABLE_INDEX_BITS < u64::BITS);

/// Settings a driver picks when it creates its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Maximum number of token-tracked work items in flight at once.
    ///
    /// Zero builds a context-only client.
    pub capacity: usize,
    /// Device class used to route resource deltas to the coalition.
    pub device_type: Option<DeviceType>,
    /// Whether the driver asks for per-coalition resource accounting.
    pub resource_accounting: bool,
}

impl ClientConfig {
    /// Creates a configuration with the given token capacity.
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            device_type: None,
            resource_accounting: false,
        }
    }

    /// A client that only tracks work through [`WorkContext`]s.
    ///
    /// [`WorkContext`]: crate::WorkContext
    pub const fn context_only() -> Self {
        Self::new(0)
    }

    /// Sets the device class reported to the controller.
    pub const fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    /// Requests resource accounting for every unit of work.
    pub const fn with_resource_accounting(mut self, enabled: bool) -> Self {
        self.resource_accounting = enabled;
        self
    }

    /// Token capacity after clamping to [`MAX_WORK_CAPACITY`].
    pub fn effective_capacity(&self) -> usize {
        if self.capacity > MAX_WORK_CAPACITY {
            warn!(
                "perfctl: work capacity {} exceeds limit, clamping to {}",
                self.capacity, MAX_WORK_CAPACITY
            );
            MAX_WORK_CAPACITY
        } else {
            self.capacity
        }
    }

    /// Driver state offered to the controller at registration time.
    pub fn initial_driver_state(&self) -> DriverState {
        let mut flags = DriverStateFlags::empty();
        if self.resource_accounting {
            flags |= DriverStateFlags::RESOURCE_ACCOUNTING;
        }
        DriverState {
            flags,
            device_type: self.device_type.map_or(0, |ty| ty as u32),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(MAX_WORK_CAPACITY)
    }
}
