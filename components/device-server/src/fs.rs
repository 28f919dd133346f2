//! File system request layer
//!
//! [`FileSystem`] is what the device server needs from the namespace: a place
//! to expose device files, a mount step, and the retry sweep over requests
//! that could not complete. [`DeviceNamespace`] is a flat implementation
//! backed by a path table and a [`RequestQueue`].

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::device::DeviceRef;
use crate::request::{Completion, Request, RequestQueue};
use crate::DeviceError;

/// Namespace collaborator of the device server
pub trait FileSystem {
    /// Path this namespace attaches to
    fn mount_path(&self) -> &str;

    /// Expose `device` under `path`
    fn register_file(&mut self, device: DeviceRef, path: &str) -> Result<(), DeviceError>;

    /// Attach the namespace at [`mount_path`](FileSystem::mount_path)
    fn mount(&mut self) -> Result<(), DeviceError>;

    /// Attempt every pending request once
    fn retry_all_requests(&mut self);
}

type Mounter = Box<dyn FnMut(&str) -> Result<(), DeviceError>>;

/// Flat device namespace
pub struct DeviceNamespace {
    mount_path: String,
    files: Vec<(String, DeviceRef)>,
    queue: RequestQueue,
    mounter: Mounter,
    mounted: bool,
}

impl DeviceNamespace {
    /// Create a namespace attached through `mounter` when mounted
    pub fn new(
        mount_path: &str,
        mounter: impl FnMut(&str) -> Result<(), DeviceError> + 'static,
    ) -> Self {
        Self {
            mount_path: mount_path.to_string(),
            files: Vec::new(),
            queue: RequestQueue::new(),
            mounter: Box::new(mounter),
            mounted: false,
        }
    }

    /// First device registered under `path`
    pub fn lookup(&self, path: &str) -> Option<DeviceRef> {
        self.files
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, device)| device.clone())
    }

    /// Registered paths in registration order
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(name, _)| name.as_str())
    }

    /// Route a client request to the device at `path`
    ///
    /// Returns `Ok(true)` if it completed immediately, `Ok(false)` if it
    /// is pending.
    pub fn submit(&mut self, path: &str, request: Request) -> Result<bool, DeviceError> {
        if !self.mounted {
            return Err(DeviceError::NotFound);
        }
        let device = self.lookup(path).ok_or(DeviceError::NotFound)?;
        Ok(self.queue.submit(device, request))
    }

    /// Drain finished requests; they accumulate until taken
    pub fn take_completions(&mut self) -> Vec<Completion> {
        self.queue.take_completions()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn sweeps(&self) -> u64 {
        self.queue.sweeps()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }
}

impl FileSystem for DeviceNamespace {
    fn mount_path(&self) -> &str {
        &self.mount_path
    }

    fn register_file(&mut self, device: DeviceRef, path: &str) -> Result<(), DeviceError> {
        if !path.starts_with('/') {
            return Err(DeviceError::InvalidArgument);
        }
        self.files.push((path.to_string(), device));
        Ok(())
    }

    fn mount(&mut self) -> Result<(), DeviceError> {
        if self.mounted {
            return Err(DeviceError::InvalidArgument);
        }
        (self.mounter)(&self.mount_path)?;
        self.mounted = true;
        log::info!("Namespace mounted at {}", self.mount_path);
        Ok(())
    }

    fn retry_all_requests(&mut self) {
        self.queue.retry_all();
    }
}
