//! Device capability
//!
//! Every driver hosted by a [`DeviceServer`](crate::DeviceServer) implements
//! [`Device`]. The driver's creator owns it through an `Rc<RefCell<_>>`; the
//! server, the registry and the namespace only hold [`DeviceRef`]s, which do
//! not keep the device alive.

use alloc::rc::{Rc, Weak};
use core::cell::RefCell;

use crate::request::Request;
use crate::{DeviceError, Vector};

/// Non-owning handle to a registered device
pub type DeviceRef = Weak<RefCell<dyn Device>>;

/// Device driver capability
pub trait Device {
    /// Diagnostic label used in logs and startup errors
    fn identifier(&self) -> &str;

    /// Bring the device up
    ///
    /// The server calls this exactly once per device, before any request
    /// reaches it. Implementations need not be idempotent.
    fn initialize(&mut self) -> Result<(), DeviceError>;

    /// Handle a hardware interrupt on `vector`
    ///
    /// Runs synchronously in the server's notification loop and must not
    /// block. Completion of in-flight work is recorded in the device's own
    /// state, which the next retry sweep observes through
    /// [`process`](Device::process).
    fn interrupt(&mut self, vector: Vector);

    /// Attempt a client request
    ///
    /// Returning [`DeviceError::RetryAgain`] keeps the request pending; any
    /// other outcome completes it.
    fn process(&mut self, request: &Request) -> Result<usize, DeviceError> {
        let _ = request;
        Err(DeviceError::NotSupported)
    }
}

/// Lifecycle of a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Ready,
    Failed,
}

/// Take a non-owning handle to `device`
pub fn handle<D: Device + 'static>(device: &Rc<RefCell<D>>) -> DeviceRef {
    let weak: Weak<RefCell<D>> = Rc::downgrade(device);
    weak
}
