//! # Power-Management Configuration
//!
//! Static configuration of the power-management core, assembled once at
//! initialization with [`PmConfigBuilder`].

use crate::error::{ErrorKind, PmError, PmResult};
use crate::state::{CpuStateTable, PowerStateInfo};

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default scheduler tick rate
pub const DEFAULT_TICKS_PER_SECOND: u32 = 10_000;

/// Default maximum number of managed devices
pub const DEFAULT_MAX_DEVICES: usize = 128;

/// Convert microseconds to scheduler ticks, rounding up
pub const fn us_to_ticks(us: u64, ticks_per_second: u32) -> u64 {
    (us * ticks_per_second as u64).div_ceil(1_000_000)
}

// =============================================================================
// CONFIG
// =============================================================================

/// Power-management configuration
#[derive(Debug, Clone)]
pub struct PmConfig {
    /// Number of CPU cores, each running its own idle orchestrator
    pub cpu_count: u8,

    /// Scheduler tick rate used to convert residencies to ticks
    pub ticks_per_second: u32,

    /// Maximum number of devices the registry accepts
    pub max_devices: usize,

    /// Power states available to each CPU
    pub cpu_states: CpuStateTable,

    /// Register devices with runtime PM enabled unless told otherwise
    pub runtime_auto_enable: bool,

    /// Execute pending deferred suspends at the start of every idle evaluation
    pub drain_deferred_on_idle: bool,
}

impl PmConfig {
    /// Validate the configuration
    pub fn validate(&self) -> PmResult<()> {
        if self.cpu_count == 0 {
            return Err(PmError::new(ErrorKind::InvalidConfig, "cpu_count must be non-zero"));
        }

        if self.ticks_per_second == 0 {
            return Err(PmError::new(
                ErrorKind::InvalidConfig,
                "ticks_per_second must be non-zero",
            ));
        }

        if self.cpu_states.cpu_count() > self.cpu_count as usize {
            return Err(PmError::new(
                ErrorKind::InvalidConfig,
                "Power states configured for a CPU beyond cpu_count",
            ));
        }

        self.cpu_states.validate()
    }

}

impl Default for PmConfig {
    fn default() -> Self {
        Self {
            cpu_count: 1,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            max_devices: DEFAULT_MAX_DEVICES,
            cpu_states: CpuStateTable::new(),
            runtime_auto_enable: false,
            drain_deferred_on_idle: true,
        }
    }
}

// =============================================================================
// CONFIG BUILDER
// =============================================================================

/// Builder for [`PmConfig`]
#[derive(Debug, Default)]
pub struct PmConfigBuilder {
    config: PmConfig,
}

impl PmConfigBuilder {
    /// Create new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set CPU count
    pub fn cpu_count(mut self, count: u8) -> Self {
        self.config.cpu_count = count;
        self
    }

    /// Set scheduler tick rate
    pub fn ticks_per_second(mut self, rate: u32) -> Self {
        self.config.ticks_per_second = rate;
        self
    }

    /// Set maximum device count
    pub fn max_devices(mut self, max: usize) -> Self {
        self.config.max_devices = max;
        self
    }

    /// Set the power states of a CPU
    pub fn cpu_states(mut self, cpu: u8, states: &[PowerStateInfo]) -> Self {
        self.config.cpu_states.set_cpu(cpu, states);
        self
    }

    /// Enable runtime PM on newly registered devices by default
    pub fn runtime_auto_enable(mut self, enable: bool) -> Self {
        self.config.runtime_auto_enable = enable;
        self
    }

    /// Let the idle orchestrator execute pending deferred suspends
    pub fn drain_deferred_on_idle(mut self, drain: bool) -> Self {
        self.config.drain_deferred_on_idle = drain;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> PmResult<PmConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PowerStateKind;

    #[test]
    fn test_default_config_valid() {
        let config = PmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cpu_count, 1);
        assert!(config.drain_deferred_on_idle);
    }

    #[test]
    fn test_builder() {
        let config = PmConfigBuilder::new()
            .cpu_count(2)
            .ticks_per_second(1000)
            .max_devices(8)
            .cpu_states(0, &[PowerStateInfo::new(PowerStateKind::Standby, 0, 2000, 500)])
            .runtime_auto_enable(true)
            .build()
            .unwrap();

        assert_eq!(config.cpu_count, 2);
        assert_eq!(config.max_devices, 8);
        assert!(config.runtime_auto_enable);
        assert_eq!(config.cpu_states.cpu_states(0).len(), 1);
        assert!(config.cpu_states.cpu_states(1).is_empty());
    }

    #[test]
    fn test_builder_rejects_invalid() {
        assert!(PmConfigBuilder::new().cpu_count(0).build().is_err());
        assert!(PmConfigBuilder::new().ticks_per_second(0).build().is_err());
        assert!(PmConfigBuilder::new()
            .cpu_count(1)
            .cpu_states(3, &[PowerStateInfo::new(PowerStateKind::Standby, 0, 10, 1)])
            .build()
            .is_err());
        assert!(PmConfigBuilder::new()
            .cpu_states(0, &[PowerStateInfo::new(PowerStateKind::Standby, 0, 1, 10)])
            .build()
            .is_err());
    }

    #[test]
    fn test_us_to_ticks() {
        assert_eq!(us_to_ticks(0, 1000), 0);
        assert_eq!(us_to_ticks(1000, 1000), 1);
        assert_eq!(us_to_ticks(1001, 1000), 2);
        assert_eq!(us_to_ticks(250_000, 1000), 250);
        assert_eq!(us_to_ticks(50, 32_768), 2);
    }
}
