//! # System Power Policy
//!
//! Decides which power state a CPU enters when it goes idle.
//!
//! ## Decision
//!
//! ```text
//!                  next_state(cpu, available_ticks)
//!                               │
//!                 ┌─────────────┴─────────────┐
//!                 │  forced override pending? │
//!                 └─────────────┬─────────────┘
//!                      yes      │      no
//!               ┌───────────────┴───────────────┐
//!               ▼                               ▼
//!     take override (one-shot)       PowerPolicy::select(cpu, ticks, states)
//!               │                               │
//!               └───────────────┬───────────────┘
//!                               ▼
//!                        PolicyDecision
//! ```
//!
//! `next_state` runs on the idle path: it never blocks, never allocates and
//! only logs at `trace` level. The override slot and the per-CPU "last
//! decision" cells are plain atomics.

use core::sync::atomic::{AtomicU32, Ordering};

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::config::{us_to_ticks, PmConfig};
use crate::state::{CpuStateTable, PowerStateInfo, PowerStateKind, SystemPowerState};

/// Sentinel for "idle with no upcoming timeout"
pub const TICKS_FOREVER: u32 = u32::MAX;

// =============================================================================
// POLICY DECISION
// =============================================================================

/// Result of a policy query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    /// State to enter; `ACTIVE` means stay running
    pub state: SystemPowerState,

    /// Minimum residency of the chosen state
    pub min_residency_us: u32,

    /// Exit latency of the chosen state
    pub exit_latency_us: u32,

    /// Whether the decision came from a forced override
    pub forced: bool,
}

impl PolicyDecision {
    /// Stay active
    pub const ACTIVE: Self = Self {
        state: SystemPowerState::ACTIVE,
        min_residency_us: 0,
        exit_latency_us: 0,
        forced: false,
    };

    /// Decision for a table entry
    pub const fn from_info(info: &PowerStateInfo, forced: bool) -> Self {
        Self {
            state: info.state,
            min_residency_us: info.min_residency_us,
            exit_latency_us: info.exit_latency_us,
            forced,
        }
    }

    /// Check if the decision is "no transition"
    pub const fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

impl Default for PolicyDecision {
    fn default() -> Self {
        Self::ACTIVE
    }
}

// =============================================================================
// POLICY TRAIT
// =============================================================================

/// Strategy choosing a state from a CPU's table
///
/// Implementations run on the idle path and must be bounded-time.
pub trait PowerPolicy: Send + Sync {
    /// Pick a state for `cpu`, or `None` to stay active
    fn select(&self, cpu: u8, available_ticks: u32, states: &[PowerStateInfo])
        -> Option<PowerStateInfo>;
}

/// Default policy: deepest state whose residency plus exit latency fits
#[derive(Debug, Clone, Copy)]
pub struct ResidencyPolicy {
    ticks_per_second: u32,
}

impl ResidencyPolicy {
    /// Create a policy for the given tick rate
    pub const fn new(ticks_per_second: u32) -> Self {
        Self { ticks_per_second }
    }

    fn required_ticks(&self, info: &PowerStateInfo) -> u64 {
        us_to_ticks(info.required_us(), self.ticks_per_second)
    }
}

impl PowerPolicy for ResidencyPolicy {
    fn select(
        &self,
        _cpu: u8,
        available_ticks: u32,
        states: &[PowerStateInfo],
    ) -> Option<PowerStateInfo> {
        if available_ticks == TICKS_FOREVER {
            return states.last().copied();
        }

        states
            .iter()
            .rev()
            .find(|info| self.required_ticks(info) <= available_ticks as u64)
            .copied()
    }
}

// =============================================================================
// ENCODED STATE CELLS
// =============================================================================

const SLOT_PRESENT: u32 = 1 << 16;
const SLOT_FORCED: u32 = 1 << 17;

const fn encode(state: SystemPowerState, forced: bool) -> u32 {
    let mut bits = SLOT_PRESENT | ((state.kind as u32) << 8) | state.substate_id as u32;
    if forced {
        bits |= SLOT_FORCED;
    }
    bits
}

fn decode(bits: u32) -> Option<(SystemPowerState, bool)> {
    if bits & SLOT_PRESENT == 0 {
        return None;
    }
    let kind = *PowerStateKind::ALL.get(((bits >> 8) & 0xff) as usize)?;
    let state = SystemPowerState::new(kind, (bits & 0xff) as u8);
    Some((state, bits & SLOT_FORCED != 0))
}

// =============================================================================
// POLICY ENGINE
// =============================================================================

/// The system power policy engine
pub struct PolicyEngine {
    /// Per-CPU state tables
    states: CpuStateTable,

    /// Selection strategy
    policy: Box<dyn PowerPolicy>,

    /// One-shot forced override
    forced: AtomicU32,

    /// Last decision per CPU
    last: Vec<AtomicU32>,
}

impl PolicyEngine {
    /// Create an engine with the default residency policy
    pub fn new(config: &PmConfig) -> Self {
        Self::with_policy(config, ResidencyPolicy::new(config.ticks_per_second))
    }

    /// Create an engine with a custom policy
    pub fn with_policy<P: PowerPolicy + 'static>(config: &PmConfig, policy: P) -> Self {
        Self {
            states: config.cpu_states.clone(),
            policy: Box::new(policy),
            forced: AtomicU32::new(0),
            last: (0..config.cpu_count).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Decide the state `cpu` should enter for an idle period of
    /// `available_ticks`
    ///
    /// A pending forced override wins and is consumed.
    pub fn next_state(&self, cpu: u8, available_ticks: u32) -> PolicyDecision {
        let decision = match decode(self.forced.swap(0, Ordering::AcqRel)) {
            Some((state, _)) => {
                log::trace!("PM: cpu{} forced to {}", cpu, state);
                match self.states.find(cpu, state) {
                    Some(info) => PolicyDecision::from_info(info, true),
                    None => PolicyDecision {
                        state,
                        forced: true,
                        ..PolicyDecision::ACTIVE
                    },
                }
            },
            None => self
                .policy
                .select(cpu, available_ticks, self.states.cpu_states(cpu))
                .map(|info| PolicyDecision::from_info(&info, false))
                .unwrap_or(PolicyDecision::ACTIVE),
        };

        if let Some(cell) = self.last.get(cpu as usize) {
            cell.store(encode(decision.state, decision.forced), Ordering::Release);
        }

        log::trace!("PM: cpu{} next state {} ({} ticks)", cpu, decision.state, available_ticks);
        decision
    }

    /// Force the next decision, whatever the idle time
    ///
    /// Always succeeds. Overrides are not cancellable; a second call before
    /// the next query replaces the first.
    pub fn force_next(&self, state: SystemPowerState) -> bool {
        self.forced.store(encode(state, true), Ordering::Release);
        log::debug!("PM: next state forced to {}", state);
        true
    }

    /// Check for a pending forced override
    pub fn has_forced(&self) -> bool {
        self.forced.load(Ordering::Acquire) & SLOT_PRESENT != 0
    }

    /// States available to a CPU; empty for unknown CPUs
    pub fn available_states(&self, cpu: u8) -> &[PowerStateInfo] {
        self.states.cpu_states(cpu)
    }

    /// Index of a state in a CPU's table
    pub fn state_index(&self, cpu: u8, state: SystemPowerState) -> Option<usize> {
        self.states.index_of(cpu, state)
    }

    /// Last decision made for a CPU
    pub fn next_state_get(&self, cpu: u8) -> Option<PolicyDecision> {
        let (state, forced) = decode(self.last.get(cpu as usize)?.load(Ordering::Acquire))?;
        Some(match self.states.find(cpu, state) {
            Some(info) => PolicyDecision::from_info(info, forced),
            None => PolicyDecision {
                state,
                forced,
                ..PolicyDecision::ACTIVE
            },
        })
    }
}

impl core::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("states", &self.states)
            .field("forced", &self.has_forced())
            .finish()
    }
}

static_assertions::assert_impl_all!(PolicyEngine: Send, Sync);

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PmConfigBuilder;

    const STANDBY: PowerStateInfo = PowerStateInfo::new(PowerStateKind::Standby, 0, 2_000, 500);
    const SUSPEND_TO_RAM: PowerStateInfo =
        PowerStateInfo::new(PowerStateKind::SuspendToRam, 0, 50_000, 5_000);

    fn engine() -> PolicyEngine {
        let config = PmConfigBuilder::new()
            .cpu_count(2)
            .ticks_per_second(1_000)
            .cpu_states(0, &[STANDBY, SUSPEND_TO_RAM])
            .build()
            .unwrap();
        PolicyEngine::new(&config)
    }

    #[test]
    fn test_residency_selection() {
        let engine = engine();

        // standby needs 2.5 ms, suspend-to-ram 55 ms
        assert!(engine.next_state(0, 1).is_active());
        assert_eq!(engine.next_state(0, 3).state, STANDBY.state);
        assert_eq!(engine.next_state(0, 55).state, SUSPEND_TO_RAM.state);
        assert_eq!(engine.next_state(0, TICKS_FOREVER).state, SUSPEND_TO_RAM.state);
    }

    #[test]
    fn test_forced_override_one_shot() {
        let engine = engine();

        assert!(engine.force_next(STANDBY.state));
        assert!(engine.has_forced());

        let decision = engine.next_state(0, TICKS_FOREVER);
        assert_eq!(decision.state, STANDBY.state);
        assert!(decision.forced);
        assert_eq!(decision.exit_latency_us, 500);

        assert!(!engine.has_forced());
        let decision = engine.next_state(0, TICKS_FOREVER);
        assert_eq!(decision.state, SUSPEND_TO_RAM.state);
        assert!(!decision.forced);
    }

    #[test]
    fn test_forced_state_outside_table() {
        let engine = engine();
        let soft_off = SystemPowerState::from(PowerStateKind::SoftOff);

        engine.force_next(soft_off);
        let decision = engine.next_state(1, 0);
        assert_eq!(decision.state, soft_off);
        assert!(decision.forced);
        assert_eq!(decision.min_residency_us, 0);
    }

    #[test]
    fn test_empty_states() {
        let engine = engine();

        assert!(engine.available_states(1).is_empty());
        assert!(engine.available_states(9).is_empty());
        assert!(engine.next_state(1, TICKS_FOREVER).is_active());
        assert!(engine.next_state(9, TICKS_FOREVER).is_active());
    }

    #[test]
    fn test_next_state_get() {
        let engine = engine();

        assert!(engine.next_state_get(0).is_none());
        engine.next_state(0, 3);
        assert_eq!(engine.next_state_get(0).map(|d| d.state), Some(STANDBY.state));
        assert_eq!(engine.next_state_get(0).map(|d| d.min_residency_us), Some(2_000));
        assert!(engine.next_state_get(7).is_none());
    }

    #[test]
    fn test_state_index() {
        let engine = engine();
        assert_eq!(engine.state_index(0, SUSPEND_TO_RAM.state), Some(1));
        assert_eq!(engine.state_index(1, STANDBY.state), None);
    }

    #[test]
    fn test_custom_policy() {
        struct Shallowest;

        impl PowerPolicy for Shallowest {
            fn select(
                &self,
                _cpu: u8,
                _available_ticks: u32,
                states: &[PowerStateInfo],
            ) -> Option<PowerStateInfo> {
                states.first().copied()
            }
        }

        let config = PmConfigBuilder::new()
            .cpu_states(0, &[STANDBY, SUSPEND_TO_RAM])
            .build()
            .unwrap();
        let engine = PolicyEngine::with_policy(&config, Shallowest);
        assert_eq!(engine.next_state(0, TICKS_FOREVER).state, STANDBY.state);
    }
}
