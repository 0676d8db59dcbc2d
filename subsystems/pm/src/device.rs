//! # Device State Machine
//!
//! Per-device power state, lock/busy bookkeeping and action execution.
//!
//! ## Transitions
//!
//! ```text
//!              Suspend                           Resume
//!   ┌────────┐ ───────▶ ┌────────────┐  ok   ┌───────────┐ ───────▶ ┌──────────┐  ok   ┌────────┐
//!   │ ACTIVE │          │ SUSPENDING │ ────▶ │ SUSPENDED │          │ RESUMING │ ────▶ │ ACTIVE │
//!   └────────┘ ◀─────── └────────────┘       └───────────┘ ◀─────── └──────────┘       └────────┘
//!                 err (state restored)                      err (state restored)
//! ```
//!
//! The action handler runs between the intermediate and the terminal state,
//! inside the device's transition lock. The state itself is an atomic so it
//! can be observed at any time, including from another device's handler.
//!
//! ## Exclusions
//!
//! An action on a device is a no-op success when the device is locked, not
//! ready, or already in the target state. A not-ready device never has its
//! handler invoked; doing so trips an assertion.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use alloc::boxed::Box;

use bitflags::bitflags;
use spin::{Mutex, MutexGuard};

use crate::error::{ActionError, ErrorKind, PmError, PmResult};

// =============================================================================
// DEVICE ID
// =============================================================================

/// Stable handle of a registered device (index into the registry arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Create a handle from a raw index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get raw value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Arena index
    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

// =============================================================================
// DEVICE STATE
// =============================================================================

/// Device power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceState {
    /// Powered and operational
    Active     = 0,
    /// Suspend action in progress
    Suspending = 1,
    /// Suspended
    Suspended  = 2,
    /// Resume action in progress
    Resuming   = 3,
}

impl DeviceState {
    /// Decode from the atomic representation
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Suspending,
            2 => DeviceState::Suspended,
            3 => DeviceState::Resuming,
            _ => DeviceState::Active,
        }
    }

    /// Check if the state is a terminal (non-transitional) state
    pub const fn is_terminal(&self) -> bool {
        matches!(self, DeviceState::Active | DeviceState::Suspended)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Active => "active",
            DeviceState::Suspending => "suspending",
            DeviceState::Suspended => "suspended",
            DeviceState::Resuming => "resuming",
        };
        f.write_str(name)
    }
}

// =============================================================================
// DEVICE ACTION
// =============================================================================

/// Power action requested from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAction {
    /// Move to the suspended state
    Suspend,
    /// Move back to the active state
    Resume,
}

impl DeviceAction {
    /// State the device must be in for the action to run
    pub const fn source(&self) -> DeviceState {
        match self {
            DeviceAction::Suspend => DeviceState::Active,
            DeviceAction::Resume => DeviceState::Suspended,
        }
    }

    /// State observed while the handler runs
    pub const fn intermediate(&self) -> DeviceState {
        match self {
            DeviceAction::Suspend => DeviceState::Suspending,
            DeviceAction::Resume => DeviceState::Resuming,
        }
    }

    /// State reached when the handler succeeds
    pub const fn target(&self) -> DeviceState {
        match self {
            DeviceAction::Suspend => DeviceState::Suspended,
            DeviceAction::Resume => DeviceState::Active,
        }
    }
}

// =============================================================================
// DEVICE FLAGS
// =============================================================================

bitflags! {
    /// Device power-management flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        /// Device initialized successfully
        const READY = 1 << 0;
        /// Advisory busy marker
        const BUSY = 1 << 1;
        /// Runtime PM enabled
        const RUNTIME_ENABLED = 1 << 2;
        /// A deferred runtime suspend is queued
        const SUSPEND_PENDING = 1 << 3;
        /// Suspended by the last system suspend pass
        const SYSTEM_SUSPENDED = 1 << 4;
        /// Device id sits in the deferred suspend queue
        const QUEUED = 1 << 5;
    }
}

// =============================================================================
// ACTION HANDLER
// =============================================================================

/// Capability implemented by each managed device
pub trait DeviceActionHandler: Send + Sync {
    /// Perform a power action on the hardware
    fn handle(&self, device: DeviceId, action: DeviceAction) -> Result<(), ActionError>;
}

/// Closure-based action handler
pub struct FnActionHandler<F>
where
    F: Fn(DeviceId, DeviceAction) -> Result<(), ActionError> + Send + Sync,
{
    func: F,
}

impl<F> FnActionHandler<F>
where
    F: Fn(DeviceId, DeviceAction) -> Result<(), ActionError> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> DeviceActionHandler for FnActionHandler<F>
where
    F: Fn(DeviceId, DeviceAction) -> Result<(), ActionError> + Send + Sync,
{
    fn handle(&self, device: DeviceId, action: DeviceAction) -> Result<(), ActionError> {
        (self.func)(device, action)
    }
}

impl<F> fmt::Debug for FnActionHandler<F>
where
    F: Fn(DeviceId, DeviceAction) -> Result<(), ActionError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnActionHandler").finish_non_exhaustive()
    }
}

/// Handler for devices with nothing to do on power transitions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActionHandler;

impl DeviceActionHandler for NoopActionHandler {
    fn handle(&self, _device: DeviceId, _action: DeviceAction) -> Result<(), ActionError> {
        Ok(())
    }
}

// =============================================================================
// DEVICE RECORD
// =============================================================================

/// Power-management record of one device
///
/// Created at registration and never destroyed.
pub struct DeviceRecord {
    /// Handle
    id: DeviceId,

    /// Position in initialization order
    rank: u32,

    /// Name (for diagnostics)
    name: &'static str,

    /// Current [`DeviceState`]
    state: AtomicU8,

    /// [`DeviceFlags`] bits
    flags: AtomicU32,

    /// Nested lock count
    lock_count: AtomicU32,

    /// Runtime PM usage count
    runtime_refs: AtomicU32,

    /// Per-device transition critical section
    transition: Mutex<()>,

    /// Action capability
    handler: Box<dyn DeviceActionHandler>,
}

impl DeviceRecord {
    /// Create a new record
    pub(crate) fn new(
        id: DeviceId,
        rank: u32,
        name: &'static str,
        handler: Box<dyn DeviceActionHandler>,
        flags: DeviceFlags,
    ) -> Self {
        Self {
            id,
            rank,
            name,
            state: AtomicU8::new(DeviceState::Active as u8),
            flags: AtomicU32::new(flags.bits()),
            lock_count: AtomicU32::new(0),
            runtime_refs: AtomicU32::new(0),
            transition: Mutex::new(()),
            handler,
        }
    }

    /// Get handle
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Get rank
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Get name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get current state
    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: DeviceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    // -------------------------------------------------------------------------
    // Flags
    // -------------------------------------------------------------------------

    /// Get all flags
    pub fn flags(&self) -> DeviceFlags {
        DeviceFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Check a flag
    pub fn has_flag(&self, flag: DeviceFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Set a flag, returning whether it was already set
    pub(crate) fn set_flag(&self, flag: DeviceFlags) -> bool {
        let prev = self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
        DeviceFlags::from_bits_truncate(prev).contains(flag)
    }

    /// Clear a flag, returning whether it was set
    pub(crate) fn clear_flag(&self, flag: DeviceFlags) -> bool {
        let prev = self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
        DeviceFlags::from_bits_truncate(prev).contains(flag)
    }

    /// Check if the device initialized successfully
    pub fn is_ready(&self) -> bool {
        self.has_flag(DeviceFlags::READY)
    }

    // -------------------------------------------------------------------------
    // Busy
    // -------------------------------------------------------------------------

    /// Mark the device busy
    pub fn set_busy(&self) {
        self.set_flag(DeviceFlags::BUSY);
    }

    /// Clear the busy marker
    pub fn clear_busy(&self) {
        self.clear_flag(DeviceFlags::BUSY);
    }

    /// Check the busy marker
    pub fn is_busy(&self) -> bool {
        self.has_flag(DeviceFlags::BUSY)
    }

    // -------------------------------------------------------------------------
    // Lock
    // -------------------------------------------------------------------------

    /// Lock the device out of system transitions
    pub fn lock(&self) {
        let count = self.lock_count.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("PM: {} '{}' locked (count {})", self.id, self.name, count);
    }

    /// Release one lock
    pub fn unlock(&self) -> PmResult<()> {
        self.lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map(|prev| {
                log::debug!("PM: {} '{}' unlocked (count {})", self.id, self.name, prev - 1);
            })
            .map_err(|_| {
                PmError::new(ErrorKind::InvalidArgument, "Unlock without matching lock")
                    .with_device(self.id)
            })
    }

    /// Get the nested lock count
    pub fn lock_count(&self) -> u32 {
        self.lock_count.load(Ordering::Acquire)
    }

    /// Check if locked
    pub fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }

    // -------------------------------------------------------------------------
    // Runtime counters
    // -------------------------------------------------------------------------

    /// Check if runtime PM is enabled
    pub fn is_runtime_enabled(&self) -> bool {
        self.has_flag(DeviceFlags::RUNTIME_ENABLED)
    }

    /// Get the runtime usage count
    pub fn runtime_ref_count(&self) -> u32 {
        self.runtime_refs.load(Ordering::Acquire)
    }

    /// Check if runtime PM holds the device active
    pub fn is_runtime_held(&self) -> bool {
        self.is_runtime_enabled() && self.runtime_ref_count() > 0
    }

    /// Increment the usage count, returning the previous value
    pub(crate) fn runtime_ref_inc(&self) -> u32 {
        self.runtime_refs.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrement the usage count if non-zero, returning the previous value
    pub(crate) fn runtime_ref_dec(&self) -> Option<u32> {
        self.runtime_refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
            .ok()
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Enter the device's transition critical section
    pub(crate) fn transition_lock(&self) -> MutexGuard<'_, ()> {
        self.transition.lock()
    }

    /// Run a power action on the device
    pub fn run_action(&self, action: DeviceAction) -> PmResult<()> {
        let guard = self.transition_lock();
        self.perform(&guard, action).map(|_| ())
    }

    /// Run an action inside an already held transition lock
    ///
    /// Returns `Ok(true)` if the handler ran and the device reached the
    /// target state, `Ok(false)` if the action was a no-op.
    pub(crate) fn perform(&self, _guard: &MutexGuard<'_, ()>, action: DeviceAction) -> PmResult<bool> {
        if !self.is_ready() || self.is_locked() {
            return Ok(false);
        }

        let current = self.state();
        if current == action.target() {
            return Ok(false);
        }
        if current != action.source() {
            return Err(PmError::new(
                ErrorKind::InvariantViolation,
                "Device in transitional state outside its critical section",
            )
            .with_device(self.id));
        }

        self.set_state(action.intermediate());
        log::trace!("PM: {} '{}' {:?}", self.id, self.name, action);

        match self.invoke(action) {
            Ok(()) => {
                self.set_state(action.target());
                Ok(true)
            },
            Err(err) => {
                self.set_state(current);
                log::warn!(
                    "PM: {} '{}' {:?} failed: {}",
                    self.id,
                    self.name,
                    action,
                    err
                );
                Err(PmError::action(self.id, err))
            },
        }
    }

    fn invoke(&self, action: DeviceAction) -> Result<(), ActionError> {
        assert!(
            self.is_ready(),
            "PM: action handler invoked on not-ready device '{}'",
            self.name
        );
        self.handler.handle(self.id, action)
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRecord")
            .field("id", &self.id)
            .field("rank", &self.rank)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("flags", &self.flags())
            .field("lock_count", &self.lock_count())
            .field("runtime_refs", &self.runtime_ref_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(DeviceRecord: Send, Sync);
static_assertions::const_assert_eq!(core::mem::size_of::<DeviceId>(), 4);

// =============================================================================
// TESTS
// =============================================================================
