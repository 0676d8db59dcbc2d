//! # Device Registry
//!
//! Arena of [`DeviceRecord`]s addressed by [`DeviceId`], and the ordering
//! index that drives system suspend/resume passes.
//!
//! ## Ordering
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          DEVICE REGISTRY                                     │
//! │                                                                              │
//! │   register()  ──▶  rank = max(hint, last_rank + 1)   (strictly increasing)   │
//! │                                                                              │
//! │   ┌────────┐   ┌────────┐   ┌────────┐   ┌────────┐                          │
//! │   │ dev0   │   │ dev1   │   │ dev2   │   │ dev3   │   arena index == order   │
//! │   │ rank 0 │   │ rank 1 │   │ rank 5 │   │ rank 6 │                          │
//! │   └────────┘   └────────┘   └────────┘   └────────┘                          │
//! │                                                                              │
//! │   suspend pass  ◀───────────────────────────────────  (descending rank)      │
//! │   resume pass   ───────────────────────────────────▶  (ascending rank)       │
//! │                                                                              │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are never removed and ranks never change, so the resume order is
//! always the exact reverse of the preceding suspend order.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::device::{
    DeviceAction, DeviceActionHandler, DeviceFlags, DeviceId, DeviceRecord, DeviceState,
    FnActionHandler,
};
use crate::error::{ActionError, ErrorKind, PmError, PmResult};

// =============================================================================
// DEVICE DESCRIPTOR
// =============================================================================

/// Device initialization hook
pub type InitHook = Box<dyn FnOnce() -> Result<(), ActionError> + Send>;

/// Everything needed to register a device
pub struct DeviceDescriptor {
    /// Name (for diagnostics)
    name: &'static str,

    /// Requested rank (lower bound)
    rank_hint: u32,

    /// Action capability
    handler: Box<dyn DeviceActionHandler>,

    /// Initialization hook run at registration
    init: Option<InitHook>,

    /// Runtime PM override (None = configuration default)
    runtime_enabled: Option<bool>,
}

impl DeviceDescriptor {
    /// Create a descriptor for a device
    pub fn new<H: DeviceActionHandler + 'static>(name: &'static str, handler: H) -> Self {
        Self {
            name,
            rank_hint: 0,
            handler: Box::new(handler),
            init: None,
            runtime_enabled: None,
        }
    }

    /// Create a descriptor with a closure handler
    pub fn from_fn<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(DeviceId, DeviceAction) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self::new(name, FnActionHandler::new(func))
    }

    /// Set the rank hint
    pub fn rank_hint(mut self, hint: u32) -> Self {
        self.rank_hint = hint;
        self
    }

    /// Set the initialization hook; a failing hook leaves the device not ready
    pub fn init<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), ActionError> + Send + 'static,
    {
        self.init = Some(Box::new(hook));
        self
    }

    /// Enable or disable runtime PM at registration
    pub fn runtime_enabled(mut self, enabled: bool) -> Self {
        self.runtime_enabled = Some(enabled);
        self
    }
}

impl core::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("name", &self.name)
            .field("rank_hint", &self.rank_hint)
            .field("has_init", &self.init.is_some())
            .field("runtime_enabled", &self.runtime_enabled)
            .finish()
    }
}

// =============================================================================
// PASS REPORT
// =============================================================================

/// Outcome of a completed system suspend or resume pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Devices whose action ran
    pub transitioned: usize,
    /// Devices excluded (not ready, locked, runtime-held or already there)
    pub skipped: usize,
}

// =============================================================================
// DEVICE REGISTRY
// =============================================================================

/// The device registry
pub struct DeviceRegistry {
    /// Records in rank order
    devices: RwLock<Vec<Arc<DeviceRecord>>>,

    /// Maximum number of records
    max_devices: usize,

    /// Enable runtime PM when the descriptor does not say
    runtime_default: bool,

    /// Statistics
    stats: RegistryStats,
}

/// Registry statistics
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Successful registrations
    pub registered: AtomicUsize,
    /// Rejected registrations
    pub registration_failures: AtomicUsize,
    /// Devices whose init hook failed
    pub init_failures: AtomicUsize,
}

impl DeviceRegistry {
    /// Create new registry
    pub fn new(max_devices: usize, runtime_default: bool) -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            max_devices,
            runtime_default,
            stats: RegistryStats::default(),
        }
    }

    /// Register a device
    ///
    /// Runs the descriptor's init hook first; a failing hook still registers
    /// the device, permanently not ready.
    pub fn register(&self, desc: DeviceDescriptor) -> PmResult<DeviceId> {
        let DeviceDescriptor {
            name,
            rank_hint,
            handler,
            init,
            runtime_enabled,
        } = desc;

        let ready = match init {
            Some(hook) => match hook() {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("PM: device '{}' init failed: {}", name, err);
                    self.stats.init_failures.fetch_add(1, Ordering::Relaxed);
                    false
                },
            },
            None => true,
        };

        let mut flags = DeviceFlags::empty();
        if ready {
            flags |= DeviceFlags::READY;
        }
        if runtime_enabled.unwrap_or(self.runtime_default) {
            flags |= DeviceFlags::RUNTIME_ENABLED;
        }

        let mut devices = self.devices.write();

        if devices.len() >= self.max_devices {
            self.stats.registration_failures.fetch_add(1, Ordering::Relaxed);
            return Err(PmError::new(
                ErrorKind::ResourceExhausted,
                "Maximum devices reached",
            ));
        }

        let rank = match devices.last() {
            None => rank_hint,
            Some(last) => match last.rank().checked_add(1) {
                Some(next) => next.max(rank_hint),
                None => {
                    self.stats.registration_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(PmError::new(ErrorKind::ResourceExhausted, "Rank space exhausted"));
                },
            },
        };

        let id = DeviceId::new(devices.len() as u32);
        devices.push(Arc::new(DeviceRecord::new(id, rank, name, handler, flags)));
        self.stats.registered.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "PM: registered {} '{}' rank {} (ready: {}, runtime: {})",
            id,
            name,
            rank,
            ready,
            flags.contains(DeviceFlags::RUNTIME_ENABLED)
        );

        Ok(id)
    }

    /// Get a device record
    pub fn get(&self, id: DeviceId) -> PmResult<Arc<DeviceRecord>> {
        self.devices
            .read()
            .get(id.index())
            .cloned()
            .ok_or(PmError::unknown_device(id))
    }

    /// Device ids in ascending rank order
    pub fn ranks(&self) -> Vec<DeviceId> {
        self.devices.read().iter().map(|dev| dev.id()).collect()
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if any device is marked busy
    pub fn any_busy(&self) -> bool {
        self.devices.read().iter().any(|dev| dev.is_busy())
    }

    /// Get statistics
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    // -------------------------------------------------------------------------
    // System passes
    // -------------------------------------------------------------------------

    /// Suspend every eligible device in descending rank order
    ///
    /// Stops at the first failing device. Devices already suspended by this
    /// pass stay suspended.
    pub fn suspend_all(&self) -> PmResult<PassReport> {
        let devices = self.devices.read();
        let mut report = PassReport::default();

        for dev in devices.iter().rev() {
            if !dev.is_ready() || dev.is_locked() {
                report.skipped += 1;
                continue;
            }

            let guard = dev.transition_lock();
            if dev.is_runtime_held() {
                log::trace!("PM: {} held active by runtime PM", dev.id());
                report.skipped += 1;
                continue;
            }

            match dev.perform(&guard, DeviceAction::Suspend) {
                Ok(true) => {
                    dev.set_flag(DeviceFlags::SYSTEM_SUSPENDED);
                    report.transitioned += 1;
                },
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    log::warn!("PM: suspend pass aborted at {} '{}'", dev.id(), dev.name());
                    return Err(pass_aborted(err, ErrorKind::SuspendAborted, "Suspend pass aborted"));
                },
            }
        }

        Ok(report)
    }

    /// Resume the devices suspended by the system, in ascending rank order
    ///
    /// Stops at the first failing device; later devices stay suspended.
    pub fn resume_all(&self) -> PmResult<PassReport> {
        let devices = self.devices.read();
        let mut report = PassReport::default();

        for dev in devices.iter() {
            if !dev.has_flag(DeviceFlags::SYSTEM_SUSPENDED) || dev.is_locked() {
                report.skipped += 1;
                continue;
            }

            let guard = dev.transition_lock();
            match dev.perform(&guard, DeviceAction::Resume) {
                Ok(ran) => {
                    dev.clear_flag(DeviceFlags::SYSTEM_SUSPENDED);
                    if ran {
                        report.transitioned += 1;
                    } else {
                        report.skipped += 1;
                    }
                },
                Err(err) => {
                    log::warn!("PM: resume pass aborted at {} '{}'", dev.id(), dev.name());
                    return Err(pass_aborted(err, ErrorKind::ResumeAborted, "Resume pass aborted"));
                },
            }
        }

        Ok(report)
    }
}

/// Re-classify a device action failure as an aborted pass
///
/// Other errors keep their kind so that fatal ones stay fatal.
fn pass_aborted(err: PmError, kind: ErrorKind, message: &'static str) -> PmError {
    if err.kind() == ErrorKind::ActionFailed {
        err.with_kind(kind, message)
    } else {
        err
    }
}

impl core::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.len())
            .field("max_devices", &self.max_devices)
            .finish()
    }
}

// =============================================================================
// REGISTRY SNAPSHOT
// =============================================================================

/// A snapshot of registry state for diagnostics
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Total devices
    pub total: usize,

    /// Devices that failed initialization
    pub not_ready: usize,

    /// Devices currently suspended
    pub suspended: usize,

    /// Devices currently locked
    pub locked: usize,

    /// Device summaries in rank order
    pub devices: Vec<DeviceSummary>,
}

/// Summary of a single device
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    /// ID
    pub id: DeviceId,
    /// Name
    pub name: &'static str,
    /// Rank
    pub rank: u32,
    /// State
    pub state: DeviceState,
    /// Flags
    pub flags: DeviceFlags,
    /// Lock count
    pub lock_count: u32,
    /// Runtime usage count
    pub runtime_refs: u32,
}

impl DeviceRegistry {
    /// Take a snapshot of the registry
    pub fn snapshot(&self) -> RegistrySnapshot {
        let devices = self.devices.read();
        let summaries: Vec<DeviceSummary> = devices
            .iter()
            .map(|dev| DeviceSummary {
                id: dev.id(),
                name: dev.name(),
                rank: dev.rank(),
                state: dev.state(),
                flags: dev.flags(),
                lock_count: dev.lock_count(),
                runtime_refs: dev.runtime_ref_count(),
            })
            .collect();

        RegistrySnapshot {
            total: summaries.len(),
            not_ready: summaries
                .iter()
                .filter(|s| !s.flags.contains(DeviceFlags::READY))
                .count(),
            suspended: summaries
                .iter()
                .filter(|s| s.state == DeviceState::Suspended)
                .count(),
            locked: summaries.iter().filter(|s| s.lock_count > 0).count(),
            devices: summaries,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
