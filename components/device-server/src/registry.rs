//! Device Registry - vector to device mapping
//!
//! Each vector maps to the devices sharing it, in registration order, which
//! is also dispatch order. A vector's list is created on its first
//! registration and never removed.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::device::DeviceRef;
use crate::Vector;

/// Interrupt vector registry
#[derive(Default)]
pub struct DeviceRegistry {
    vectors: BTreeMap<Vector, Vec<DeviceRef>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `device` to the devices served on `vector`
    ///
    /// The same device may be registered more than once; each registration
    /// adds an entry.
    pub fn register(&mut self, vector: Vector, device: DeviceRef) {
        self.vectors.entry(vector).or_default().push(device);
    }

    /// Devices on `vector` in dispatch order, empty if none registered
    pub fn devices(&self, vector: Vector) -> &[DeviceRef] {
        self.vectors
            .get(&vector)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether any device was ever registered on `vector`
    pub fn contains(&self, vector: Vector) -> bool {
        self.vectors.contains_key(&vector)
    }

    /// Vectors with at least one device, ascending
    pub fn vectors(&self) -> impl Iterator<Item = Vector> + '_ {
        self.vectors.keys().copied()
    }

    /// Number of vectors in use
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}
