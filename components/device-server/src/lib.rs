//! Device Server - Interrupt-driven device multiplexing
//!
//! # Purpose
//! Hosts several independently owned device drivers in one process, routes
//! hardware interrupt vectors to them, exposes them in the file system
//! namespace, and keeps retrying I/O requests that could not complete
//! immediately.
//!
//! # Integration Points
//! - Depends on: the kernel IRQ subscription calls ([`IrqSubscription`]),
//!   the file system request layer ([`FileSystem`])
//! - Provides to: device drivers ([`Device`]), clients issuing requests
//!   against the mounted device files
//!
//! # Architecture
//! ```text
//! kernel notification
//!   -> DeviceServer::notify(vector)
//!   -> interrupt_handler(vector)
//!        device.interrupt(vector)   for every device on the vector, in
//!                                   registration order
//!        acknowledge(vector)        once
//!        retry_all_requests()       always, whichever vector fired
//! ```
//! Notifications are handled one at a time, run to completion. The server
//! keeps only weak references to devices; their creator owns them.
//!
//! # Testing Strategy
//! - Unit tests: registry ordering, startup state machine, request retry
//! - Integration tests: mock APIC + timer device + namespace end to end

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

use alloc::string::String;

use thiserror::Error;

pub mod device;
pub mod fs;
pub mod irq;
pub mod registry;
pub mod request;
pub mod server;
pub mod timer;

pub use device::{Device, DeviceRef, DeviceState};
pub use fs::{DeviceNamespace, FileSystem};
pub use int_controller::Vector;
pub use irq::{ControllerSubscription, IrqSubscription};
pub use registry::DeviceRegistry;
pub use request::{Completion, Operation, ProcessId, Request, RequestQueue};
pub use server::{DeviceServer, IrqHandlerFn, ServerState};
pub use timer::TimerDevice;

use int_controller::ControllerError;

/// Result codes shared by devices and the file system layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("I/O error")]
    IoError,

    #[error("not found")]
    NotFound,

    #[error("operation not supported")]
    NotSupported,

    #[error("operation would block, retry later")]
    RetryAgain,

    #[error("timer calibration failed")]
    Calibration,
}

impl DeviceError {
    /// Numeric result code, `0` being success
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidArgument => 1,
            Self::IoError => 2,
            Self::NotFound => 3,
            Self::NotSupported => 4,
            Self::RetryAgain => 5,
            Self::Calibration => 6,
        }
    }
}

/// Error types for device server operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("failed to initialize device {device}: result = {}", .code.code())]
    Initialization { device: String, code: DeviceError },

    #[error("failed to mount to path {path}: result = {}", .code.code())]
    Mount { path: String, code: DeviceError },

    #[error("failed to register {path}: result = {}", .code.code())]
    Registration { path: String, code: DeviceError },

    #[error("server is {state:?}, expected {expected:?}")]
    InvalidState {
        state: ServerState,
        expected: ServerState,
    },

    #[error("no interrupt handler bound to vector {vector}")]
    UnhandledVector { vector: Vector },

    #[error("IRQ subscription failed for vector {vector}: {reason}")]
    Subscription { vector: Vector, reason: &'static str },

    #[error("interrupt controller: {0}")]
    Controller(#[from] ControllerError),
}

impl ServerError {
    /// Process exit status for a server that failed with this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Initialization { code, .. }
            | Self::Mount { code, .. }
            | Self::Registration { code, .. } => code.code(),
            _ => 1,
        }
    }
}

pub type Result<T> = core::result::Result<T, ServerError>;
