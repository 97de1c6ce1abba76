//! Device identifiers and the registry that counts them.
//!
//! A device is one addressable execution unit. The dispatcher never owns
//! devices; it only needs to know how many exist so it can reject ids that
//! fall outside `[0, device_count)`.

use core::fmt;

/// Identifies one execution unit.
///
/// Ids are dense: a registry with `n` devices exposes ids `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub usize);

impl DeviceId {
    /// Returns the raw index of this device.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    /// Iterates over the first `count` device ids in ascending order.
    pub fn range(count: usize) -> impl DoubleEndedIterator<Item = DeviceId> + ExactSizeIterator {
        (0..count).map(DeviceId)
    }
}

impl From<usize> for DeviceId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

/// Source of truth for how many devices are available.
///
/// Implementations must be safe to query from several threads at once.
pub trait DeviceRegistry: Send + Sync {
    /// Number of devices currently addressable.
    fn device_count(&self) -> usize;

    /// Whether `device` falls inside `[0, device_count)`.
    fn contains(&self, device: DeviceId) -> bool {
        device.index() < self.device_count()
    }
}

impl<R: DeviceRegistry + ?Sized> DeviceRegistry for &R {
    fn device_count(&self) -> usize {
        (**self).device_count()
    }
}

impl<R: DeviceRegistry + ?Sized> DeviceRegistry for std::sync::Arc<R> {
    fn device_count(&self) -> usize {
        (**self).device_count()
    }
}
