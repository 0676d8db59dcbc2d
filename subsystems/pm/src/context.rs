//! # Power-Management Context
//!
//! [`PmContext`] owns every shared piece of the power-management core and is
//! the single entry point used by drivers, application threads and the
//! per-CPU idle orchestrators.
//!
//! ## Context Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              PM CONTEXT                                      │
//! │                                                                              │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────┐                  │
//! │  │ DeviceRegistry │  │   RuntimePm    │  │  PolicyEngine  │                  │
//! │  │  records+ranks │◀─│ refs, deferred │  │ table+override │                  │
//! │  └────────────────┘  └────────────────┘  └────────────────┘                  │
//! │          ▲                                                                   │
//! │          │            ┌──────────────────┐                                   │
//! │          │            │ NotifierRegistry │                                   │
//! │          │            └──────────────────┘                                   │
//! │          │                    ▲                                              │
//! │  ┌───────┴────────────────────┴──────────────────────────────────────────┐   │
//! │  │        IdleOrchestrator (one per CPU, holds Arc<PmContext>)            │   │
//! │  └────────────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Callers
//!
//! | Operation | Application thread | Idle path | Notifier callback |
//! |-----------|--------------------|-----------|-------------------|
//! | lock / busy / runtime get, put | ✅ | ❌ | ❌ |
//! | policy_next_state | ❌ | ✅ | ❌ |
//! | policy_force | ✅ | ❌ | ❌ |
//! | device_state / queries | ✅ | ✅ | ✅ |
//! | notifier_register | ✅ | ❌ | ❌ |

use crate::config::PmConfig;
use crate::device::{DeviceAction, DeviceId, DeviceState};
use crate::error::PmResult;
use crate::notifier::{NotifierEntry, NotifierId, NotifierRegistry, NotifyDirection, StateFilter};
use crate::policy::{PolicyDecision, PolicyEngine, PowerPolicy};
use crate::registry::{DeviceDescriptor, DeviceRegistry, PassReport, RegistrySnapshot};
use crate::runtime::RuntimePm;
use crate::state::{PowerStateInfo, SystemPowerState};

// =============================================================================
// PM CONTEXT
// =============================================================================

/// Shared power-management state
///
/// Built once at startup; orchestrators and drivers share it through an
/// `Arc`. Tests build a fresh context per case.
#[derive(Debug)]
pub struct PmContext {
    /// Configuration
    config: PmConfig,

    /// Device records
    registry: DeviceRegistry,

    /// Runtime PM engine
    runtime: RuntimePm,

    /// System power policy
    policy: PolicyEngine,

    /// Transition observers
    notifiers: NotifierRegistry,
}

impl PmContext {
    /// Create a context with the default residency policy
    pub fn new(config: PmConfig) -> PmResult<Self> {
        config.validate()?;
        let policy = PolicyEngine::new(&config);
        Ok(Self::assemble(config, policy))
    }

    /// Create a context with a custom policy
    pub fn with_policy<P: PowerPolicy + 'static>(config: PmConfig, policy: P) -> PmResult<Self> {
        config.validate()?;
        let policy = PolicyEngine::with_policy(&config, policy);
        Ok(Self::assemble(config, policy))
    }

    fn assemble(config: PmConfig, policy: PolicyEngine) -> Self {
        log::info!(
            "PM: context ready ({} cpu(s), {} ticks/s, max {} devices)",
            config.cpu_count,
            config.ticks_per_second,
            config.max_devices
        );

        Self {
            registry: DeviceRegistry::new(config.max_devices, config.runtime_auto_enable),
            runtime: RuntimePm::new(),
            notifiers: NotifierRegistry::new(),
            policy,
            config,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &PmConfig {
        &self.config
    }

    /// Get the device registry
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Get the runtime PM engine
    pub fn runtime(&self) -> &RuntimePm {
        &self.runtime
    }

    /// Get the policy engine
    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Get the notifier registry
    pub fn notifiers(&self) -> &NotifierRegistry {
        &self.notifiers
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Register a device
    pub fn register_device(&self, desc: DeviceDescriptor) -> PmResult<DeviceId> {
        self.registry.register(desc)
    }

    /// Run an explicit suspend or resume on a device
    pub fn device_action(&self, id: DeviceId, action: DeviceAction) -> PmResult<()> {
        self.registry.get(id)?.run_action(action)
    }

    /// Get a device's state
    pub fn device_state(&self, id: DeviceId) -> PmResult<DeviceState> {
        Ok(self.registry.get(id)?.state())
    }

    /// Get a device's rank
    pub fn device_rank(&self, id: DeviceId) -> PmResult<u32> {
        Ok(self.registry.get(id)?.rank())
    }

    /// Get a device's name
    pub fn device_name(&self, id: DeviceId) -> PmResult<&'static str> {
        Ok(self.registry.get(id)?.name())
    }

    /// Check if a device initialized successfully
    pub fn device_is_ready(&self, id: DeviceId) -> bool {
        self.registry.get(id).is_ok_and(|dev| dev.is_ready())
    }

    /// Number of registered devices
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    /// Exclude a device from system transitions (nests)
    pub fn device_lock(&self, id: DeviceId) -> PmResult<()> {
        self.registry.get(id)?.lock();
        Ok(())
    }

    /// Release one lock
    pub fn device_unlock(&self, id: DeviceId) -> PmResult<()> {
        self.registry.get(id)?.unlock()
    }

    /// Check if a device is locked
    pub fn device_is_locked(&self, id: DeviceId) -> bool {
        self.registry.get(id).is_ok_and(|dev| dev.is_locked())
    }

    /// Mark a device busy
    pub fn device_busy_set(&self, id: DeviceId) -> PmResult<()> {
        self.registry.get(id)?.set_busy();
        Ok(())
    }

    /// Clear a device's busy marker
    pub fn device_busy_clear(&self, id: DeviceId) -> PmResult<()> {
        self.registry.get(id)?.clear_busy();
        Ok(())
    }

    /// Check a device's busy marker
    pub fn device_is_busy(&self, id: DeviceId) -> bool {
        self.registry.get(id).is_ok_and(|dev| dev.is_busy())
    }

    /// Check if any device is busy
    pub fn any_device_busy(&self) -> bool {
        self.registry.any_busy()
    }

    /// Snapshot of every device
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    // =========================================================================
    // Runtime PM
    // =========================================================================

    /// Take a runtime reference; the device is active on return
    pub fn runtime_get(&self, id: DeviceId) -> PmResult<()> {
        let dev = self.registry.get(id)?;
        self.runtime.get(&dev)
    }

    /// Drop a runtime reference, deferring the suspend
    pub fn runtime_put_async(&self, id: DeviceId) -> PmResult<()> {
        let dev = self.registry.get(id)?;
        self.runtime.put_async(&dev)
    }

    /// Drop a runtime reference, suspending immediately on the last one
    pub fn runtime_put(&self, id: DeviceId) -> PmResult<()> {
        let dev = self.registry.get(id)?;
        self.runtime.put(&dev)
    }

    /// Enable runtime PM on a device
    pub fn runtime_enable(&self, id: DeviceId) -> PmResult<()> {
        let dev = self.registry.get(id)?;
        self.runtime.enable(&dev)
    }

    /// Disable runtime PM on a device
    pub fn runtime_disable(&self, id: DeviceId) -> PmResult<()> {
        let dev = self.registry.get(id)?;
        self.runtime.disable(&dev)
    }

    /// Check if runtime PM is enabled on a device
    pub fn runtime_is_enabled(&self, id: DeviceId) -> bool {
        self.registry.get(id).is_ok_and(|dev| dev.is_runtime_enabled())
    }

    /// Get a device's runtime reference count
    pub fn runtime_ref_count(&self, id: DeviceId) -> PmResult<u32> {
        Ok(self.registry.get(id)?.runtime_ref_count())
    }

    /// Execute queued deferred suspends
    pub fn run_deferred_work(&self) -> usize {
        self.runtime.run_deferred(&self.registry)
    }

    // =========================================================================
    // Policy
    // =========================================================================

    /// Decide the next state of a CPU
    pub fn policy_next_state(&self, cpu: u8, available_ticks: u32) -> PolicyDecision {
        self.policy.next_state(cpu, available_ticks)
    }

    /// Force the next decision
    pub fn policy_force(&self, state: SystemPowerState) -> bool {
        self.policy.force_next(state)
    }

    /// States available to a CPU
    pub fn policy_available_states(&self, cpu: u8) -> &[PowerStateInfo] {
        self.policy.available_states(cpu)
    }

    /// Last decision made for a CPU
    pub fn policy_next_state_get(&self, cpu: u8) -> Option<PolicyDecision> {
        self.policy.next_state_get(cpu)
    }

    // =========================================================================
    // Notifiers
    // =========================================================================

    /// Register a notifier
    pub fn notifier_register(&self, entry: NotifierEntry) -> PmResult<()> {
        self.notifiers.register(entry)
    }

    /// Unregister a notifier
    pub fn notifier_unregister(
        &self,
        id: NotifierId,
        filter: StateFilter,
        mask: NotifyDirection,
    ) -> PmResult<()> {
        self.notifiers.unregister(id, filter, mask)
    }

    // =========================================================================
    // System passes
    // =========================================================================

    /// Suspend devices for a system transition
    pub fn system_suspend(&self) -> PmResult<PassReport> {
        self.registry.suspend_all()
    }

    /// Resume devices after a system transition
    pub fn system_resume(&self) -> PmResult<PassReport> {
        self.registry.resume_all()
    }

    /// Dispatch a transition boundary to the notifiers
    pub fn notify(&self, direction: NotifyDirection, state: SystemPowerState) -> usize {
        self.notifiers.dispatch(direction, state)
    }
}

static_assertions::assert_impl_all!(PmContext: Send, Sync);

// =============================================================================
// TESTS
// =============================================================================
