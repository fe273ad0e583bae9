// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Error types for controller and device registration.
//!
//! Only registration can fail recoverably. A refused or untracked unit of
//! work is not an error and never shows up here; misuse of a token or a
//! context is a contract violation and panics instead.

use crate::controller::InterfaceVersion;

/// Errors reported by the registration paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfError {
    /// A performance controller has already been installed.
    AlreadyRegistered,
    /// The controller table claims a version but lacks one of its required
    /// callback sets.
    IncompleteInterface(InterfaceVersion),
    /// The controller table carries no usable interface version.
    InvalidVersion,
    /// An argument was rejected by the controller.
    InvalidArgument,
    /// The controller could not allocate state for the device.
    NoMemory,
    /// The controller is not ready to accept the device yet.
    NotReady,
    /// The controller is busy; the caller may retry later.
    Busy,
    /// The controller does not support the device.
    Unsupported,
    /// Controller-specific failure status, passed through unchanged.
    Controller(i32),
}

impl core::fmt::Display for PerfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PerfError::AlreadyRegistered => write!(f, "performance controller already registered"),
            PerfError::IncompleteInterface(version) => {
                write!(f, "controller interface {version:?} is missing required callbacks")
            }
            PerfError::InvalidVersion => write!(f, "invalid controller interface version"),
            PerfError::InvalidArgument => write!(f, "invalid argument"),
            PerfError::NoMemory => write!(f, "controller out of memory"),
            PerfError::NotReady => write!(f, "controller not ready"),
            PerfError::Busy => write!(f, "controller busy"),
            PerfError::Unsupported => write!(f, "device not supported by controller"),
            PerfError::Controller(status) => write!(f, "controller failure status {status:#x}"),
        }
    }
}

/// Result type for registration operations.
pub type PerfResult<T = ()> = Result<T, PerfError>;
