//! # Runtime Power Management
//!
//! Reference-counted, per-device power control that runs independently of
//! system sleep.
//!
//! ## Usage Count
//!
//! ```text
//!   get()                 put_async()                  run_deferred()
//!     │                       │                              │
//!     ▼                       ▼                              ▼
//!  refs 0 ──▶ 1           refs 1 ──▶ 0                 SUSPEND_PENDING
//!  resume if suspended    set SUSPEND_PENDING          still set, refs == 0
//!  (synchronous)          enqueue device id            ──▶ suspend
//!
//!  get() between put_async() and run_deferred() clears SUSPEND_PENDING,
//!  cancelling the queued suspend.
//! ```
//!
//! Devices with runtime PM disabled accept `get`/`put` as no-ops and are
//! handled by system passes like any other device.

use core::sync::atomic::{AtomicU64, Ordering};

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::device::{DeviceAction, DeviceFlags, DeviceId, DeviceRecord, DeviceState};
use crate::error::{ErrorKind, PmError, PmResult};
use crate::registry::DeviceRegistry;

// =============================================================================
// STATISTICS
// =============================================================================

/// Runtime PM statistics
#[derive(Debug, Default)]
pub struct RuntimeStats {
    /// Synchronous resumes triggered by `get`
    pub resumes: AtomicU64,
    /// Suspends performed (synchronous and deferred)
    pub suspends: AtomicU64,
    /// Deferred suspends queued
    pub deferred_scheduled: AtomicU64,
    /// Deferred suspends cancelled by a later `get`
    pub deferred_cancelled: AtomicU64,
}

// =============================================================================
// RUNTIME PM
// =============================================================================

/// Runtime power-management engine
///
/// Owns the deferred-suspend queue. Devices are passed in by the caller so
/// the engine itself holds no device references.
#[derive(Debug, Default)]
pub struct RuntimePm {
    /// Devices with a pending deferred suspend
    queue: Mutex<VecDeque<DeviceId>>,

    /// Statistics
    stats: RuntimeStats,
}

impl RuntimePm {
    /// Create a new engine
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            stats: RuntimeStats {
                resumes: AtomicU64::new(0),
                suspends: AtomicU64::new(0),
                deferred_scheduled: AtomicU64::new(0),
                deferred_cancelled: AtomicU64::new(0),
            },
        }
    }

    /// Take a usage reference, resuming the device on the first one
    ///
    /// The device is active when this returns `Ok`. If the resume fails the
    /// reference is dropped again.
    pub fn get(&self, dev: &DeviceRecord) -> PmResult<()> {
        if !dev.is_ready() {
            return Err(PmError::not_ready(dev.id()));
        }
        if !dev.is_runtime_enabled() {
            return Ok(());
        }

        let guard = dev.transition_lock();
        let prev = dev.runtime_ref_inc();

        if dev.clear_flag(DeviceFlags::SUSPEND_PENDING) {
            self.stats.deferred_cancelled.fetch_add(1, Ordering::Relaxed);
            log::debug!("PM runtime: {} deferred suspend cancelled", dev.id());
        }

        if prev == 0 {
            log::debug!("PM runtime: {} '{}' in use", dev.id(), dev.name());

            if dev.state() == DeviceState::Suspended {
                match dev.perform(&guard, DeviceAction::Resume) {
                    Ok(ran) => {
                        if ran {
                            self.stats.resumes.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    Err(err) => {
                        dev.runtime_ref_dec();
                        return Err(err);
                    },
                }
            }
        }

        Ok(())
    }

    /// Drop a usage reference; on the last one, queue a deferred suspend
    ///
    /// Never blocks and never runs the device action.
    pub fn put_async(&self, dev: &DeviceRecord) -> PmResult<()> {
        if !dev.is_ready() {
            return Err(PmError::not_ready(dev.id()));
        }
        if !dev.is_runtime_enabled() {
            return Ok(());
        }

        let prev = dev.runtime_ref_dec().ok_or_else(|| imbalance(dev.id()))?;
        if prev == 1 && !dev.set_flag(DeviceFlags::SUSPEND_PENDING) {
            if !dev.set_flag(DeviceFlags::QUEUED) {
                self.queue.lock().push_back(dev.id());
            }
            self.stats.deferred_scheduled.fetch_add(1, Ordering::Relaxed);
            log::debug!("PM runtime: {} '{}' idle, suspend deferred", dev.id(), dev.name());
        }

        Ok(())
    }

    /// Drop a usage reference; on the last one, suspend immediately
    pub fn put(&self, dev: &DeviceRecord) -> PmResult<()> {
        if !dev.is_ready() {
            return Err(PmError::not_ready(dev.id()));
        }
        if !dev.is_runtime_enabled() {
            return Ok(());
        }

        let guard = dev.transition_lock();
        let prev = dev.runtime_ref_dec().ok_or_else(|| imbalance(dev.id()))?;
        if prev != 1 {
            return Ok(());
        }

        dev.clear_flag(DeviceFlags::SUSPEND_PENDING);
        log::debug!("PM runtime: {} '{}' idle, suspending", dev.id(), dev.name());
        self.suspend_locked(dev, &guard)
    }

    /// Enable runtime PM; an unused active device is suspended right away
    pub fn enable(&self, dev: &DeviceRecord) -> PmResult<()> {
        if !dev.is_ready() {
            return Err(PmError::not_ready(dev.id()));
        }

        let guard = dev.transition_lock();
        if dev.set_flag(DeviceFlags::RUNTIME_ENABLED) {
            return Ok(());
        }
        log::debug!("PM runtime: {} '{}' enabled", dev.id(), dev.name());

        if dev.runtime_ref_count() == 0 && dev.state() == DeviceState::Active {
            self.suspend_locked(dev, &guard)?;
        }

        Ok(())
    }

    /// Disable runtime PM
    ///
    /// A runtime-suspended device is resumed first, so that every later
    /// system pass treats it like a device without runtime PM. A queued
    /// deferred suspend is cancelled. If the resume fails, runtime PM stays
    /// enabled and the error is returned.
    pub fn disable(&self, dev: &DeviceRecord) -> PmResult<()> {
        if !dev.is_ready() {
            return Err(PmError::not_ready(dev.id()));
        }

        let guard = dev.transition_lock();
        if !dev.is_runtime_enabled() {
            return Ok(());
        }
        if dev.clear_flag(DeviceFlags::SUSPEND_PENDING) {
            self.stats.deferred_cancelled.fetch_add(1, Ordering::Relaxed);
        }

        if dev.state() == DeviceState::Suspended && dev.perform(&guard, DeviceAction::Resume)? {
            self.stats.resumes.fetch_add(1, Ordering::Relaxed);
        }

        dev.clear_flag(DeviceFlags::RUNTIME_ENABLED);
        log::debug!("PM runtime: {} '{}' disabled", dev.id(), dev.name());
        Ok(())
    }

    /// Execute every queued deferred suspend
    ///
    /// Returns the number of devices actually suspended. A failing suspend
    /// leaves the device active; the failure is logged and the queue keeps
    /// draining.
    pub fn run_deferred(&self, registry: &DeviceRegistry) -> usize {
        let mut performed = 0;

        loop {
            let next = self.queue.lock().pop_front();
            let Some(id) = next else {
                break;
            };

            let dev = match registry.get(id) {
                Ok(dev) => dev,
                Err(_) => continue,
            };

            let guard = dev.transition_lock();
            dev.clear_flag(DeviceFlags::QUEUED);
            if !dev.clear_flag(DeviceFlags::SUSPEND_PENDING) {
                continue;
            }
            if !dev.is_runtime_enabled() || dev.runtime_ref_count() > 0 {
                continue;
            }

            match dev.perform(&guard, DeviceAction::Suspend) {
                Ok(true) => {
                    self.stats.suspends.fetch_add(1, Ordering::Relaxed);
                    performed += 1;
                },
                Ok(false) => {},
                Err(err) => {
                    log::warn!("PM runtime: deferred suspend of {} failed: {}", id, err);
                },
            }
        }

        performed
    }

    /// Number of queued deferred suspends (cancelled ones included)
    ///
    /// A device appears in the queue at most once.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Get statistics
    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    fn suspend_locked(&self, dev: &DeviceRecord, guard: &spin::MutexGuard<'_, ()>) -> PmResult<()> {
        if dev.perform(guard, DeviceAction::Suspend)? {
            self.stats.suspends.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

fn imbalance(id: DeviceId) -> PmError {
    PmError::new(ErrorKind::InvalidArgument, "Runtime put without matching get").with_device(id)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NoopActionHandler;
    use crate::error::ActionError;
    use crate::registry::DeviceDescriptor;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn setup(runtime: bool) -> (DeviceRegistry, DeviceId, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = DeviceRegistry::new(8, false);
        let id = registry
            .register(
                DeviceDescriptor::from_fn("spi0", move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .runtime_enabled(runtime),
            )
            .unwrap();
        (registry, id, calls)
    }

    #[test]
    fn test_get_put_async_cycle() {
        let (registry, id, calls) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        assert_eq!(dev.runtime_ref_count(), 1);
        assert_eq!(dev.state(), DeviceState::Active);

        rpm.put_async(&dev).unwrap();
        assert_eq!(dev.state(), DeviceState::Active);
        assert_eq!(rpm.pending(), 1);

        assert_eq!(rpm.run_deferred(&registry), 1);
        assert_eq!(dev.state(), DeviceState::Suspended);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        rpm.get(&dev).unwrap();
        assert_eq!(dev.state(), DeviceState::Active);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(rpm.stats().resumes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_get_cancels_deferred_suspend() {
        let (registry, id, calls) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        rpm.put_async(&dev).unwrap();
        rpm.get(&dev).unwrap();

        assert_eq!(rpm.run_deferred(&registry), 0);
        assert_eq!(dev.state(), DeviceState::Active);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(rpm.stats().deferred_cancelled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_nested_references() {
        let (registry, id, _) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        rpm.get(&dev).unwrap();
        rpm.put_async(&dev).unwrap();
        assert_eq!(rpm.pending(), 0);
        rpm.put_async(&dev).unwrap();
        assert_eq!(rpm.pending(), 1);
    }

    #[test]
    fn test_put_imbalance() {
        let (registry, id, _) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        let err = rpm.put_async(&dev).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(rpm.put(&dev).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_sync_put_suspends_immediately() {
        let (registry, id, _) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        rpm.put(&dev).unwrap();
        assert_eq!(dev.state(), DeviceState::Suspended);
        assert_eq!(rpm.pending(), 0);
    }

    #[test]
    fn test_disabled_is_noop() {
        let (registry, id, calls) = setup(false);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        rpm.put_async(&dev).unwrap();
        assert_eq!(dev.runtime_ref_count(), 0);
        assert_eq!(rpm.run_deferred(&registry), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enable_suspends_unused_device() {
        let (registry, id, _) = setup(false);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.enable(&dev).unwrap();
        assert!(dev.is_runtime_enabled());
        assert_eq!(dev.state(), DeviceState::Suspended);

        rpm.disable(&dev).unwrap();
        assert!(!dev.is_runtime_enabled());
        assert_eq!(dev.state(), DeviceState::Active);
        assert_eq!(rpm.stats().resumes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_disable_keeps_runtime_on_failed_resume() {
        let registry = DeviceRegistry::new(8, false);
        let id = registry
            .register(
                DeviceDescriptor::from_fn("dma0", |_, action| match action {
                    DeviceAction::Resume => Err(ActionError::IO),
                    DeviceAction::Suspend => Ok(()),
                })
                .runtime_enabled(true),
            )
            .unwrap();
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.enable(&dev).unwrap();
        assert_eq!(dev.state(), DeviceState::Suspended);

        assert!(rpm.disable(&dev).is_err());
        assert!(dev.is_runtime_enabled());
        assert_eq!(dev.state(), DeviceState::Suspended);
    }

    #[test]
    fn test_queue_holds_device_once() {
        let (registry, id, calls) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        for _ in 0..1000 {
            rpm.put_async(&dev).unwrap();
            rpm.get(&dev).unwrap();
        }
        assert_eq!(rpm.pending(), 1);
        assert_eq!(rpm.stats().deferred_scheduled.load(Ordering::Relaxed), 1000);

        rpm.put_async(&dev).unwrap();
        assert_eq!(rpm.pending(), 1);
        assert_eq!(rpm.run_deferred(&registry), 1);
        assert_eq!(rpm.pending(), 0);
        assert_eq!(dev.state(), DeviceState::Suspended);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        rpm.get(&dev).unwrap();
        rpm.put_async(&dev).unwrap();
        assert_eq!(rpm.pending(), 1);
    }

    #[test]
    fn test_disable_cancels_pending() {
        let (registry, id, _) = setup(true);
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        rpm.put_async(&dev).unwrap();
        rpm.disable(&dev).unwrap();

        assert_eq!(rpm.run_deferred(&registry), 0);
        assert_eq!(dev.state(), DeviceState::Active);
    }

    #[test]
    fn test_not_ready_rejected() {
        let registry = DeviceRegistry::new(8, true);
        let id = registry
            .register(DeviceDescriptor::new("bad", NoopActionHandler).init(|| Err(ActionError::IO)))
            .unwrap();
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        assert_eq!(rpm.get(&dev).unwrap_err().kind(), ErrorKind::NotReady);
        assert_eq!(rpm.enable(&dev).unwrap_err().kind(), ErrorKind::NotReady);
    }

    #[test]
    fn test_failed_resume_drops_reference() {
        let registry = DeviceRegistry::new(8, false);
        let id = registry
            .register(
                DeviceDescriptor::from_fn("i2c1", |_, action| match action {
                    DeviceAction::Resume => Err(ActionError::IO),
                    DeviceAction::Suspend => Ok(()),
                })
                .runtime_enabled(true),
            )
            .unwrap();
        let dev = registry.get(id).unwrap();
        let rpm = RuntimePm::new();

        rpm.get(&dev).unwrap();
        rpm.put(&dev).unwrap();
        assert_eq!(dev.state(), DeviceState::Suspended);

        let err = rpm.get(&dev).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActionFailed);
        assert_eq!(dev.runtime_ref_count(), 0);
        assert_eq!(dev.state(), DeviceState::Suspended);
    }
}
