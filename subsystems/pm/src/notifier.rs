//! # Power-State Notifiers
//!
//! Lets subsystems observe system power transitions.
//!
//! ## Dispatch Points
//!
//! ```text
//!   suspend pass ──▶ ENTRY ──▶ hardware entry ··· wake ··· hardware exit
//!                                                               │
//!                            EXIT ◀── resume pass ◀─────────────┘
//! ```
//!
//! Entries are invoked in registration order. Callbacks run on the idle path
//! with the notifier list read-locked: they must not block, and must not
//! register or unregister notifiers or request transitions.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::RwLock;

use crate::error::{ErrorKind, PmError, PmResult};
use crate::state::SystemPowerState;

// =============================================================================
// DIRECTION
// =============================================================================

bitflags! {
    /// Transition boundaries a notifier listens to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifyDirection: u8 {
        /// Devices suspended, hardware entry imminent
        const ENTRY = 1 << 0;
        /// Hardware exited, devices resumed
        const EXIT  = 1 << 1;
    }
}

// =============================================================================
// STATE FILTER
// =============================================================================

/// Which system states a notifier cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateFilter {
    /// Every state
    Any,
    /// One state and substate
    Exact(SystemPowerState),
}

impl StateFilter {
    /// Check if this filter matches a state
    pub fn matches(&self, state: SystemPowerState) -> bool {
        match self {
            StateFilter::Any => true,
            StateFilter::Exact(s) => *s == state,
        }
    }
}

impl From<SystemPowerState> for StateFilter {
    fn from(state: SystemPowerState) -> Self {
        StateFilter::Exact(state)
    }
}

// =============================================================================
// NOTIFIER
// =============================================================================

/// Observer of power transitions
pub trait PowerNotifier: Send + Sync {
    /// Called once per matching boundary with a single direction bit set
    fn notify(&self, direction: NotifyDirection, state: SystemPowerState);
}

/// Closure-based notifier
pub struct FnNotifier<F>
where
    F: Fn(NotifyDirection, SystemPowerState) + Send + Sync,
{
    func: F,
}

impl<F> FnNotifier<F>
where
    F: Fn(NotifyDirection, SystemPowerState) + Send + Sync,
{
    /// Wrap a closure
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> PowerNotifier for FnNotifier<F>
where
    F: Fn(NotifyDirection, SystemPowerState) + Send + Sync,
{
    fn notify(&self, direction: NotifyDirection, state: SystemPowerState) {
        (self.func)(direction, state)
    }
}

impl<F> fmt::Debug for FnNotifier<F>
where
    F: Fn(NotifyDirection, SystemPowerState) + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNotifier").finish_non_exhaustive()
    }
}

/// Notifier identity
///
/// One identity may be registered for several filters or masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotifierId(u64);

impl NotifierId {
    /// Allocate a fresh identity
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get raw value
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NotifierId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENTRY
// =============================================================================

/// A notifier registration
#[derive(Clone)]
pub struct NotifierEntry {
    /// Identity
    id: NotifierId,
    /// Name (for debugging)
    name: &'static str,
    /// States of interest
    filter: StateFilter,
    /// Directions of interest
    mask: NotifyDirection,
    /// Callback
    notifier: Arc<dyn PowerNotifier>,
}

impl NotifierEntry {
    /// Create a new entry
    pub fn new<N: PowerNotifier + 'static>(
        id: NotifierId,
        name: &'static str,
        filter: StateFilter,
        mask: NotifyDirection,
        notifier: N,
    ) -> Self {
        Self::shared(id, name, filter, mask, Arc::new(notifier))
    }

    /// Create an entry sharing an existing callback
    pub fn shared(
        id: NotifierId,
        name: &'static str,
        filter: StateFilter,
        mask: NotifyDirection,
        notifier: Arc<dyn PowerNotifier>,
    ) -> Self {
        Self {
            id,
            name,
            filter,
            mask,
            notifier,
        }
    }

    /// Create an entry with a closure callback
    pub fn from_fn<F>(
        id: NotifierId,
        name: &'static str,
        filter: StateFilter,
        mask: NotifyDirection,
        func: F,
    ) -> Self
    where
        F: Fn(NotifyDirection, SystemPowerState) + Send + Sync + 'static,
    {
        Self::new(id, name, filter, mask, FnNotifier::new(func))
    }

    /// Get identity
    pub fn id(&self) -> NotifierId {
        self.id
    }

    /// Get name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get filter
    pub fn filter(&self) -> StateFilter {
        self.filter
    }

    /// Get direction mask
    pub fn mask(&self) -> NotifyDirection {
        self.mask
    }

    fn same_key(&self, id: NotifierId, filter: StateFilter, mask: NotifyDirection) -> bool {
        self.id == id && self.filter == filter && self.mask == mask
    }

    fn matches(&self, direction: NotifyDirection, state: SystemPowerState) -> bool {
        self.mask.intersects(direction) && self.filter.matches(state)
    }
}

impl fmt::Debug for NotifierEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("mask", &self.mask)
            .finish()
    }
}

// =============================================================================
// NOTIFIER REGISTRY
// =============================================================================

/// Registered notifiers, in registration order
#[derive(Debug, Default)]
pub struct NotifierRegistry {
    /// Entries
    entries: RwLock<Vec<NotifierEntry>>,
    /// Dispatch counter
    dispatched: AtomicU64,
}

impl NotifierRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Register an entry
    ///
    /// Rejects an entry whose identity, filter and mask all match an
    /// existing one.
    pub fn register(&self, entry: NotifierEntry) -> PmResult<()> {
        if entry.mask.is_empty() {
            return Err(PmError::new(ErrorKind::InvalidArgument, "Empty notifier mask"));
        }

        let mut entries = self.entries.write();
        if entries
            .iter()
            .any(|e| e.same_key(entry.id, entry.filter, entry.mask))
        {
            return Err(PmError::new(
                ErrorKind::InvalidArgument,
                "Notifier already registered",
            ));
        }

        log::debug!(
            "PM notifier: registered '{}' ({:?}, {:?})",
            entry.name,
            entry.filter,
            entry.mask
        );
        entries.push(entry);
        Ok(())
    }

    /// Unregister an entry
    pub fn unregister(
        &self,
        id: NotifierId,
        filter: StateFilter,
        mask: NotifyDirection,
    ) -> PmResult<()> {
        let mut entries = self.entries.write();
        let pos = entries
            .iter()
            .position(|e| e.same_key(id, filter, mask))
            .ok_or(PmError::new(ErrorKind::NotFound, "Notifier not registered"))?;

        let entry = entries.remove(pos);
        log::debug!("PM notifier: unregistered '{}'", entry.name);
        Ok(())
    }

    /// Invoke every matching entry
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, direction: NotifyDirection, state: SystemPowerState) -> usize {
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let entries = self.entries.read();
        let mut invoked = 0;
        for entry in entries.iter().filter(|e| e.matches(direction, state)) {
            log::trace!("PM notifier: {:?} {} -> '{}'", direction, state, entry.name);
            entry.notifier.notify(direction, state);
            invoked += 1;
        }
        invoked
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of dispatches performed
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PowerStateKind;
    use std::sync::Mutex;

    const STANDBY: SystemPowerState = SystemPowerState::new(PowerStateKind::Standby, 0);
    const RAM: SystemPowerState = SystemPowerState::new(PowerStateKind::SuspendToRam, 0);

    type Log = Arc<Mutex<Vec<(&'static str, NotifyDirection, SystemPowerState)>>>;

    fn recorder(
        log: &Log,
        name: &'static str,
        filter: StateFilter,
        mask: NotifyDirection,
    ) -> NotifierEntry {
        let log = log.clone();
        NotifierEntry::from_fn(NotifierId::new(), name, filter, mask, move |dir, state| {
            log.lock().unwrap().push((name, dir, state));
        })
    }

    #[test]
    fn test_dispatch_order_and_filter() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let registry = NotifierRegistry::new();

        registry
            .register(recorder(&log, "first", StateFilter::Any, NotifyDirection::all()))
            .unwrap();
        registry
            .register(recorder(&log, "standby", STANDBY.into(), NotifyDirection::ENTRY))
            .unwrap();
        registry
            .register(recorder(&log, "exit", StateFilter::Any, NotifyDirection::EXIT))
            .unwrap();

        assert_eq!(registry.dispatch(NotifyDirection::ENTRY, STANDBY), 2);
        assert_eq!(registry.dispatch(NotifyDirection::ENTRY, RAM), 1);
        assert_eq!(registry.dispatch(NotifyDirection::EXIT, STANDBY), 2);

        let log = log.lock().unwrap();
        let names: Vec<_> = log.iter().map(|(n, _, _)| *n).collect();
        assert_eq!(names, ["first", "standby", "first", "first", "exit"]);
        assert_eq!(log[4].1, NotifyDirection::EXIT);
        assert_eq!(registry.dispatch_count(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = NotifierRegistry::new();
        let id = NotifierId::new();
        let entry = NotifierEntry::from_fn(
            id,
            "dup",
            StateFilter::Any,
            NotifyDirection::ENTRY,
            |_, _| {},
        );

        registry.register(entry.clone()).unwrap();
        let err = registry.register(entry.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        // Same identity, different filter
        registry
            .register(NotifierEntry::shared(
                id,
                "dup",
                STANDBY.into(),
                NotifyDirection::ENTRY,
                entry.notifier.clone(),
            ))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister() {
        let registry = NotifierRegistry::new();
        let id = NotifierId::new();
        registry
            .register(NotifierEntry::from_fn(
                id,
                "tmp",
                StateFilter::Any,
                NotifyDirection::all(),
                |_, _| panic!("unregistered notifier invoked"),
            ))
            .unwrap();

        let err = registry
            .unregister(id, StateFilter::Any, NotifyDirection::ENTRY)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        registry
            .unregister(id, StateFilter::Any, NotifyDirection::all())
            .unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(NotifyDirection::ENTRY, STANDBY), 0);
    }

    #[test]
    fn test_empty_mask_rejected() {
        let registry = NotifierRegistry::new();
        let entry = NotifierEntry::from_fn(
            NotifierId::new(),
            "none",
            StateFilter::Any,
            NotifyDirection::empty(),
            |_, _| {},
        );
        assert!(registry.register(entry).is_err());
    }
}
