//! # System Power States
//!
//! Catalogue of system-wide power states and the per-CPU tables describing
//! which of them each core can enter.
//!
//! ## State Depth
//!
//! ```text
//!   shallow ◀──────────────────────────────────────────────────────▶ deep
//!
//!   ACTIVE  RUNTIME_IDLE  SUSPEND_TO_IDLE  STANDBY  SUSPEND_TO_RAM  SUSPEND_TO_DISK  SOFT_OFF
//!     │
//!     └── sentinel: "no transition"
//! ```
//!
//! Every state in a CPU table carries the minimum residency that makes it
//! worth entering and the latency paid to leave it. A table is consistent
//! when `min_residency_us >= exit_latency_us` for every entry.

use core::fmt;

use alloc::vec::Vec;

use crate::error::{ErrorKind, PmError, PmResult};

// =============================================================================
// STATE KIND
// =============================================================================

/// Kind of system power state, ordered by depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PowerStateKind {
    /// Running; the "no transition" sentinel
    Active        = 0,
    /// CPU clock gated, all devices untouched
    RuntimeIdle   = 1,
    /// Suspend to idle: devices suspended, CPU in its shallowest sleep
    SuspendToIdle = 2,
    /// Standby: non-boot CPUs off, wake-up latency low
    Standby       = 3,
    /// Suspend to RAM: context kept in memory only
    SuspendToRam  = 4,
    /// Suspend to disk: context saved to storage
    SuspendToDisk = 5,
    /// Soft off: only a wake-up source remains powered
    SoftOff       = 6,
}

impl PowerStateKind {
    /// Number of state kinds
    pub const COUNT: usize = 7;

    /// Every kind, shallowest first
    pub const ALL: [PowerStateKind; Self::COUNT] = [
        PowerStateKind::Active,
        PowerStateKind::RuntimeIdle,
        PowerStateKind::SuspendToIdle,
        PowerStateKind::Standby,
        PowerStateKind::SuspendToRam,
        PowerStateKind::SuspendToDisk,
        PowerStateKind::SoftOff,
    ];

    /// Get the display name
    pub const fn name(&self) -> &'static str {
        match self {
            PowerStateKind::Active => "active",
            PowerStateKind::RuntimeIdle => "runtime-idle",
            PowerStateKind::SuspendToIdle => "suspend-to-idle",
            PowerStateKind::Standby => "standby",
            PowerStateKind::SuspendToRam => "suspend-to-ram",
            PowerStateKind::SuspendToDisk => "suspend-to-disk",
            PowerStateKind::SoftOff => "soft-off",
        }
    }

    /// Check if entering this kind runs the device suspend and resume passes
    pub const fn suspends_devices(&self) -> bool {
        !matches!(self, PowerStateKind::Active | PowerStateKind::RuntimeIdle)
    }
}

impl fmt::Display for PowerStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// SYSTEM POWER STATE
// =============================================================================

/// A system power state with its substate (depth within the kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemPowerState {
    /// State kind
    pub kind: PowerStateKind,
    /// Platform-defined substate
    pub substate_id: u8,
}

impl SystemPowerState {
    /// The "no transition" sentinel
    pub const ACTIVE: Self = Self::new(PowerStateKind::Active, 0);

    /// Create a new state
    pub const fn new(kind: PowerStateKind, substate_id: u8) -> Self {
        Self { kind, substate_id }
    }

    /// Check if this is the "no transition" sentinel
    pub const fn is_active(&self) -> bool {
        matches!(self.kind, PowerStateKind::Active)
    }
}

impl Default for SystemPowerState {
    fn default() -> Self {
        Self::ACTIVE
    }
}

impl From<PowerStateKind> for SystemPowerState {
    fn from(kind: PowerStateKind) -> Self {
        Self::new(kind, 0)
    }
}

impl fmt::Display for SystemPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.substate_id)
    }
}

// =============================================================================
// STATE INFO
// =============================================================================

/// Metadata describing a power state a CPU can enter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStateInfo {
    /// The state
    pub state: SystemPowerState,
    /// Minimum time the CPU must stay in the state for it to pay off
    pub min_residency_us: u32,
    /// Time needed to leave the state
    pub exit_latency_us: u32,
}

impl PowerStateInfo {
    /// Create new state info
    pub const fn new(
        kind: PowerStateKind,
        substate_id: u8,
        min_residency_us: u32,
        exit_latency_us: u32,
    ) -> Self {
        Self {
            state: SystemPowerState::new(kind, substate_id),
            min_residency_us,
            exit_latency_us,
        }
    }

    /// A state is consistent when its residency covers its exit latency
    pub const fn is_consistent(&self) -> bool {
        self.min_residency_us >= self.exit_latency_us
    }

    /// Total idle time (residency plus exit latency) in microseconds
    pub const fn required_us(&self) -> u64 {
        self.min_residency_us as u64 + self.exit_latency_us as u64
    }
}

// =============================================================================
// CPU STATE TABLE
// =============================================================================

/// Power states available to each CPU
#[derive(Debug, Clone, Default)]
pub struct CpuStateTable {
    /// States indexed by CPU, shallowest first
    cpus: Vec<Vec<PowerStateInfo>>,
}

impl CpuStateTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self { cpus: Vec::new() }
    }

    /// Set the states for a CPU (builder style)
    ///
    /// States are kept sorted by depth so policies can walk them deepest-first.
    pub fn with_cpu(mut self, cpu: u8, states: &[PowerStateInfo]) -> Self {
        self.set_cpu(cpu, states);
        self
    }

    /// Set the states for a CPU
    pub fn set_cpu(&mut self, cpu: u8, states: &[PowerStateInfo]) {
        let index = cpu as usize;
        if self.cpus.len() <= index {
            self.cpus.resize_with(index + 1, Vec::new);
        }

        let mut sorted = states.to_vec();
        sorted.sort_by_key(|info| info.state);
        self.cpus[index] = sorted;
    }

    /// Get the states of a CPU; empty if none are configured
    pub fn cpu_states(&self, cpu: u8) -> &[PowerStateInfo] {
        self.cpus
            .get(cpu as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Find the index of a state in a CPU's table
    pub fn index_of(&self, cpu: u8, state: SystemPowerState) -> Option<usize> {
        self.cpu_states(cpu).iter().position(|info| info.state == state)
    }

    /// Find the info for a state in a CPU's table
    pub fn find(&self, cpu: u8, state: SystemPowerState) -> Option<&PowerStateInfo> {
        self.cpu_states(cpu).iter().find(|info| info.state == state)
    }

    /// Number of CPUs with a table (possibly empty)
    pub fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    /// Check every entry for consistency
    pub fn validate(&self) -> PmResult<()> {
        for states in &self.cpus {
            for info in states {
                if info.state.is_active() {
                    return Err(PmError::new(
                        ErrorKind::InvalidConfig,
                        "Active is not an enterable power state",
                    )
                    .with_state(info.state));
                }
                if !info.is_consistent() {
                    return Err(PmError::new(
                        ErrorKind::InvalidConfig,
                        "Power state with min_residency < exit_latency",
                    )
                    .with_state(info.state));
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_sentinel() {
        assert!(SystemPowerState::ACTIVE.is_active());
        assert!(SystemPowerState::default().is_active());
        assert!(!SystemPowerState::from(PowerStateKind::Standby).is_active());
    }

    #[test]
    fn test_kind_depth_order() {
        assert!(PowerStateKind::Active < PowerStateKind::SuspendToIdle);
        assert!(PowerStateKind::Standby < PowerStateKind::SuspendToRam);
        assert_eq!(PowerStateKind::ALL.len(), PowerStateKind::COUNT);
    }

    #[test]
    fn test_suspends_devices() {
        assert!(!PowerStateKind::Active.suspends_devices());
        assert!(!PowerStateKind::RuntimeIdle.suspends_devices());
        assert!(PowerStateKind::SuspendToIdle.suspends_devices());
        assert!(PowerStateKind::SoftOff.suspends_devices());
    }

    #[test]
    fn test_table_sorted_and_indexed() {
        let table = CpuStateTable::new().with_cpu(
            0,
            &[
                PowerStateInfo::new(PowerStateKind::SuspendToRam, 0, 5000, 800),
                PowerStateInfo::new(PowerStateKind::SuspendToIdle, 0, 100, 10),
                PowerStateInfo::new(PowerStateKind::SuspendToIdle, 1, 300, 40),
            ],
        );

        let states = table.cpu_states(0);
        assert_eq!(states.len(), 3);
        assert_eq!(states[0].state, SystemPowerState::new(PowerStateKind::SuspendToIdle, 0));
        assert_eq!(states[2].state.kind, PowerStateKind::SuspendToRam);

        assert_eq!(
            table.index_of(0, SystemPowerState::new(PowerStateKind::SuspendToIdle, 1)),
            Some(1)
        );
        assert_eq!(table.index_of(0, PowerStateKind::Standby.into()), None);
    }

    #[test]
    fn test_empty_cpu_states() {
        let table = CpuStateTable::new().with_cpu(0, &[PowerStateInfo::new(
            PowerStateKind::Standby,
            0,
            1000,
            100,
        )]);

        assert!(table.cpu_states(1).is_empty());
        assert!(table.cpu_states(200).is_empty());
        assert_eq!(table.cpu_count(), 1);
    }

    #[test]
    fn test_table_validation() {
        let good = CpuStateTable::new().with_cpu(0, &[PowerStateInfo::new(
            PowerStateKind::Standby,
            0,
            1000,
            100,
        )]);
        assert!(good.validate().is_ok());

        let bad = CpuStateTable::new().with_cpu(0, &[PowerStateInfo::new(
            PowerStateKind::Standby,
            0,
            10,
            100,
        )]);
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);

        let active = CpuStateTable::new().with_cpu(0, &[PowerStateInfo::new(
            PowerStateKind::Active,
            0,
            10,
            0,
        )]);
        assert!(active.validate().is_err());
    }
}
