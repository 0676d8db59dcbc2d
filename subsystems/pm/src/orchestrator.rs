//! # Idle-Path Orchestrator
//!
//! Drives one CPU through a system power transition each time it goes idle.
//!
//! ## Cycle
//!
//! ```text
//!  ┌────────────┐ ACTIVE  ┌─────────────────────────────────────────────────┐
//!  │ IDLE_EVAL  │────────▶│ return Stayed                                   │
//!  └─────┬──────┘         └─────────────────────────────────────────────────┘
//!        │ state S
//!        ▼
//!  ┌────────────┐  irq_lock, suspend pass (descending rank)
//!  │ SUSPENDING │──── failure ──▶ irq_unlock, return Err (no hardware entry)
//!  └─────┬──────┘
//!        │ ENTRY(S)
//!        ▼
//!  ┌────────────┐  state_set(S), wait_for_wake, exit_post_ops (unmasks irqs)
//!  │ HW_ENTERED │
//!  └─────┬──────┘
//!        ▼
//!  ┌────────────┐  resume pass (ascending rank), EXIT(S)
//!  │  RESUMING  │──────────────────────────▶ IDLE_EVAL
//!  └────────────┘
//! ```
//!
//! Every CPU owns its own orchestrator and hardware backend; the
//! [`PmContext`] behind them is shared.

use core::fmt;

use alloc::sync::Arc;

use crate::context::PmContext;
use crate::error::{ErrorKind, PmError, PmResult};
use crate::notifier::NotifyDirection;
use crate::state::{PowerStateKind, SystemPowerState};

// =============================================================================
// HARDWARE
// =============================================================================

/// Saved interrupt state returned by [`PmHardware::irq_lock`]
///
/// Not `Clone`: a key can be given back exactly once, either to
/// [`PmHardware::irq_unlock`] or to [`PmHardware::exit_post_ops`].
#[derive(Debug, PartialEq, Eq)]
pub struct IrqKey(usize);

impl IrqKey {
    /// Wrap a platform interrupt state
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Get the platform interrupt state
    pub const fn raw(&self) -> usize {
        self.0
    }
}

/// Platform primitives used by the orchestrator of one CPU
pub trait PmHardware {
    /// Mask interrupts on this CPU
    fn irq_lock(&mut self) -> IrqKey;

    /// Restore interrupts without a transition (suspend pass aborted)
    fn irq_unlock(&mut self, key: IrqKey);

    /// Enter a power state; called with interrupts masked
    fn state_set(&mut self, cpu: u8, state: SystemPowerState);

    /// Block until a wake source fires
    ///
    /// Platforms whose `state_set` returns only after wake-up keep the
    /// default.
    fn wait_for_wake(&mut self, _cpu: u8) {}

    /// Leave a power state and unmask interrupts
    fn exit_post_ops(&mut self, cpu: u8, state: SystemPowerState, key: IrqKey);
}

// =============================================================================
// ORCHESTRATOR STATE
// =============================================================================

/// Orchestrator position in the transition cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Waiting for the next idle evaluation
    IdleEval,
    /// Suspending devices
    Suspending,
    /// Platform in (or leaving) the low-power state
    HwEntered,
    /// Resuming devices
    Resuming,
}

/// Result of one idle cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Policy chose to stay active
    Stayed,
    /// The CPU went through the state and came back
    Completed {
        /// State entered
        state: SystemPowerState,
    },
}

/// Per-CPU transition statistics
#[derive(Debug, Clone, Default)]
pub struct OrchestratorStats {
    /// Idle evaluations
    pub idle_evaluations: u64,
    /// Hardware entries
    pub transitions: u64,
    /// Transitions aborted by a device
    pub failures: u64,
    /// Transitions requested through a forced override
    pub forced: u64,
    /// Hardware entries per state kind
    pub entries: [u64; PowerStateKind::COUNT],
}

impl OrchestratorStats {
    /// Hardware entries into a state kind
    pub fn entries_for(&self, kind: PowerStateKind) -> u64 {
        self.entries[kind as usize]
    }
}

// =============================================================================
// IDLE ORCHESTRATOR
// =============================================================================

/// Idle-path orchestrator of one CPU
pub struct IdleOrchestrator<H: PmHardware> {
    /// Shared context
    ctx: Arc<PmContext>,

    /// CPU driven by this instance
    cpu: u8,

    /// Platform backend
    hw: H,

    /// Cycle position
    state: OrchestratorState,

    /// Statistics
    stats: OrchestratorStats,
}

impl<H: PmHardware> IdleOrchestrator<H> {
    /// Create the orchestrator of `cpu`
    pub fn new(ctx: Arc<PmContext>, cpu: u8, hw: H) -> PmResult<Self> {
        if cpu >= ctx.config().cpu_count {
            return Err(PmError::new(ErrorKind::InvalidArgument, "CPU beyond cpu_count"));
        }

        Ok(Self {
            ctx,
            cpu,
            hw,
            state: OrchestratorState::IdleEval,
            stats: OrchestratorStats::default(),
        })
    }

    /// Run one idle cycle for an idle period of `available_ticks`
    ///
    /// Runtime idle gates the CPU only and leaves every device alone.
    /// On a suspend failure the hardware is never entered, interrupts are
    /// restored and the error is returned; devices suspended before the
    /// failing one stay suspended. On a resume failure EXIT is still
    /// dispatched before the error is returned.
    pub fn idle(&mut self, available_ticks: u32) -> PmResult<TransitionOutcome> {
        self.state = OrchestratorState::IdleEval;
        self.stats.idle_evaluations += 1;

        if self.ctx.config().drain_deferred_on_idle {
            self.ctx.run_deferred_work();
        }

        let decision = self.ctx.policy_next_state(self.cpu, available_ticks);
        if decision.is_active() {
            return Ok(TransitionOutcome::Stayed);
        }
        if decision.forced {
            self.stats.forced += 1;
        }
        let target = decision.state;

        let key = self.hw.irq_lock();
        self.state = OrchestratorState::Suspending;

        let device_passes = target.kind.suspends_devices();
        if device_passes {
            if let Err(err) = self.ctx.system_suspend() {
                self.hw.irq_unlock(key);
                self.state = OrchestratorState::IdleEval;
                self.stats.failures += 1;
                log::warn!("PM: cpu{} transition to {} aborted: {}", self.cpu, target, err);
                return Err(err.with_state(target));
            }
        }

        self.ctx.notify(NotifyDirection::ENTRY, target);

        self.state = OrchestratorState::HwEntered;
        log::info!("PM: cpu{} entering {}", self.cpu, target);
        self.hw.state_set(self.cpu, target);
        self.hw.wait_for_wake(self.cpu);
        self.hw.exit_post_ops(self.cpu, target, key);
        self.stats.transitions += 1;
        self.stats.entries[target.kind as usize] += 1;

        self.state = OrchestratorState::Resuming;
        let resumed = if device_passes {
            self.ctx.system_resume().map(|_| ())
        } else {
            Ok(())
        };
        self.ctx.notify(NotifyDirection::EXIT, target);
        self.state = OrchestratorState::IdleEval;

        match resumed {
            Ok(_) => {
                log::info!("PM: cpu{} left {}", self.cpu, target);
                Ok(TransitionOutcome::Completed { state: target })
            },
            Err(err) => {
                self.stats.failures += 1;
                log::warn!("PM: cpu{} resume from {} incomplete: {}", self.cpu, target, err);
                Err(err.with_state(target))
            },
        }
    }

    /// CPU driven by this orchestrator
    pub fn cpu(&self) -> u8 {
        self.cpu
    }

    /// Current cycle position
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Get statistics
    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    /// Get the shared context
    pub fn context(&self) -> &Arc<PmContext> {
        &self.ctx
    }

    /// Get the hardware backend
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Get the hardware backend mutably
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }
}

impl<H: PmHardware> fmt::Debug for IdleOrchestrator<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleOrchestrator")
            .field("cpu", &self.cpu)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PmConfigBuilder;
    use crate::device::{DeviceState, NoopActionHandler};
    use crate::error::ActionError;
    use crate::registry::DeviceDescriptor;
    use crate::state::PowerStateInfo;
    use alloc::vec::Vec;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HwCall {
        Lock,
        Unlock,
        Set(SystemPowerState),
        Wake,
        Exit(SystemPowerState),
    }

    #[derive(Default)]
    struct FakeHw {
        calls: Vec<HwCall>,
    }

    impl PmHardware for FakeHw {
        fn irq_lock(&mut self) -> IrqKey {
            self.calls.push(HwCall::Lock);
            IrqKey::new(0x200)
        }

        fn irq_unlock(&mut self, key: IrqKey) {
            assert_eq!(key.raw(), 0x200);
            self.calls.push(HwCall::Unlock);
        }

        fn state_set(&mut self, _cpu: u8, state: SystemPowerState) {
            self.calls.push(HwCall::Set(state));
        }

        fn wait_for_wake(&mut self, _cpu: u8) {
            self.calls.push(HwCall::Wake);
        }

        fn exit_post_ops(&mut self, _cpu: u8, state: SystemPowerState, key: IrqKey) {
            assert_eq!(key.raw(), 0x200);
            self.calls.push(HwCall::Exit(state));
        }
    }

    const STANDBY: PowerStateInfo = PowerStateInfo::new(PowerStateKind::Standby, 0, 1_000, 100);

    fn context() -> Arc<PmContext> {
        let config = PmConfigBuilder::new()
            .cpu_count(1)
            .ticks_per_second(1_000)
            .cpu_states(0, &[STANDBY])
            .build()
            .unwrap();
        Arc::new(PmContext::new(config).unwrap())
    }

    #[test]
    fn test_stays_active_without_idle_time() {
        let mut orch = IdleOrchestrator::new(context(), 0, FakeHw::default()).unwrap();

        assert_eq!(orch.idle(0).unwrap(), TransitionOutcome::Stayed);
        assert!(orch.hardware().calls.is_empty());
        assert_eq!(orch.stats().idle_evaluations, 1);
        assert_eq!(orch.state(), OrchestratorState::IdleEval);
    }

    #[test]
    fn test_full_cycle() {
        let ctx = context();
        let dev = ctx
            .register_device(DeviceDescriptor::new("uart0", NoopActionHandler))
            .unwrap();
        let mut orch = IdleOrchestrator::new(ctx.clone(), 0, FakeHw::default()).unwrap();

        let outcome = orch.idle(crate::TICKS_FOREVER).unwrap();
        assert_eq!(outcome, TransitionOutcome::Completed { state: STANDBY.state });
        assert_eq!(orch.hardware().calls, [
            HwCall::Lock,
            HwCall::Set(STANDBY.state),
            HwCall::Wake,
            HwCall::Exit(STANDBY.state),
        ]);
        assert_eq!(ctx.device_state(dev).unwrap(), DeviceState::Active);
        assert_eq!(orch.stats().entries_for(PowerStateKind::Standby), 1);
        assert_eq!(orch.state(), OrchestratorState::IdleEval);
    }

    #[test]
    fn test_suspend_failure_skips_hardware() {
        let ctx = context();
        ctx.register_device(DeviceDescriptor::from_fn("bad", |_, action| match action {
            crate::device::DeviceAction::Suspend => Err(ActionError::BUSY),
            crate::device::DeviceAction::Resume => Ok(()),
        }))
        .unwrap();
        let mut orch = IdleOrchestrator::new(ctx, 0, FakeHw::default()).unwrap();

        let err = orch.idle(crate::TICKS_FOREVER).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SuspendAborted);
        assert_eq!(err.state(), Some(STANDBY.state));
        assert_eq!(orch.hardware().calls, [HwCall::Lock, HwCall::Unlock]);
        assert_eq!(orch.stats().failures, 1);
        assert_eq!(orch.stats().transitions, 0);
    }

    #[test]
    fn test_forced_counted() {
        let ctx = context();
        let mut orch = IdleOrchestrator::new(ctx.clone(), 0, FakeHw::default()).unwrap();

        ctx.policy_force(STANDBY.state);
        orch.idle(0).unwrap();
        assert_eq!(orch.stats().forced, 1);
        assert_eq!(orch.idle(0).unwrap(), TransitionOutcome::Stayed);
    }

    #[test]
    fn test_runtime_idle_leaves_devices_alone() {
        let ctx = context();
        let calls = Arc::new(core::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let dev = ctx
            .register_device(DeviceDescriptor::from_fn("gpio0", move |_, _| {
                counter.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        let mut orch = IdleOrchestrator::new(ctx.clone(), 0, FakeHw::default()).unwrap();
        let idle = SystemPowerState::from(PowerStateKind::RuntimeIdle);

        ctx.policy_force(idle);
        let outcome = orch.idle(crate::TICKS_FOREVER).unwrap();
        assert_eq!(outcome, TransitionOutcome::Completed { state: idle });
        assert_eq!(orch.hardware().calls, [
            HwCall::Lock,
            HwCall::Set(idle),
            HwCall::Wake,
            HwCall::Exit(idle),
        ]);
        assert_eq!(calls.load(core::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(ctx.device_state(dev).unwrap(), DeviceState::Active);
        assert_eq!(orch.stats().entries_for(PowerStateKind::RuntimeIdle), 1);
    }

    #[test]
    fn test_cpu_out_of_range() {
        let err = IdleOrchestrator::new(context(), 1, FakeHw::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
