//! Compute device handle and reclaim checkpoints.

use log::debug;

/// The accelerator the upscalers run on, owned by one job at a time.
#[cfg_attr(test, mockall::automock)]
pub trait Device: Send + Sync {
    /// Releases cached device memory back to the system.
    fn reclaim(&self);

    /// Free device memory in bytes, when the device can tell.
    fn available_memory(&self) -> Option<u64>;
}

/// Host-only device. Reclaiming is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostDevice;

impl Device for HostDevice {
    fn reclaim(&self) {
        debug!("Reclaim checkpoint on host device");
    }

    fn available_memory(&self) -> Option<u64> {
        None
    }
}

/// Reclaims the device when created and again when dropped, so the closing
/// checkpoint runs on every exit path of the guarded scope.
#[must_use = "the closing reclaim runs when the guard is dropped"]
pub struct ReclaimGuard<'a> {
    device: &'a dyn Device,
}

impl<'a> ReclaimGuard<'a> {
    pub fn checkpoint(device: &'a dyn Device) -> Self {
        device.reclaim();
        Self { device }
    }
}

impl Drop for ReclaimGuard<'_> {
    fn drop(&mut self) {
        self.device.reclaim();
    }
}
