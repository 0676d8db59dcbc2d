//! # Helix OS Power Management
//!
//! Coordinates device suspend/resume with system-wide power-state
//! transitions, provides reference-counted runtime power control per
//! device, and notifies interested subsystems at transition boundaries.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────────┐
//! │                        HELIX POWER MANAGEMENT                                    │
//! │                        ══════════════════════                                    │
//! │                                                                                 │
//! │   scheduler idle path (one per CPU)         application threads                 │
//! │            │                                 │        │          │              │
//! │            ▼                                 │        │          │              │
//! │   ┌──────────────────┐                       │        │          │              │
//! │   │ IdleOrchestrator │                  lock/busy  get/put   force_next         │
//! │   └──────┬───────────┘                       │        │          │              │
//! │          │                                   ▼        ▼          ▼              │
//! │          │   ┌─────────────────────────────────────────────────────────────┐    │
//! │          └──▶│                        PmContext                            │    │
//! │              │                                                             │    │
//! │              │  ┌──────────────┐  ┌───────────┐  ┌──────────────┐          │    │
//! │              │  │PolicyEngine  │  │ RuntimePm │  │  Notifiers   │          │    │
//! │              │  └──────────────┘  └─────┬─────┘  └──────────────┘          │    │
//! │              │                          ▼                                   │    │
//! │              │  ┌───────────────────────────────────────────────────────┐  │    │
//! │              │  │ DeviceRegistry: DeviceRecord[rank] (state machine)    │  │    │
//! │              │  └───────────────────────────────────────────────────────┘  │    │
//! │              └─────────────────────────────────────────────────────────────┘    │
//! │                                                                                 │
//! └─────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Control Axes
//!
//! | Axis | Set by | Effect on system passes |
//! |------|--------|-------------------------|
//! | Lock | `device_lock` | Device skipped, stays active |
//! | Runtime reference | `runtime_get` | Device skipped while held |
//! | Busy | `device_busy_set` | None (advisory) |
//! | Not ready | failed init hook | Device never touched |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use helix_pm::{DeviceDescriptor, IdleOrchestrator, PmConfigBuilder, PmContext};
//!
//! let config = PmConfigBuilder::new().cpu_count(1).cpu_states(0, &STATES).build()?;
//! let ctx = Arc::new(PmContext::new(config)?);
//! let uart = ctx.register_device(DeviceDescriptor::from_fn("uart0", uart_pm_action))?;
//!
//! let mut idle = IdleOrchestrator::new(ctx.clone(), 0, PlatformHw::new())?;
//! loop {
//!     idle.idle(scheduler.ticks_until_next_timeout())?;
//! }
//! ```

#![cfg_attr(not(test), no_std)]

// =============================================================================
// EXTERNAL DEPENDENCIES
// =============================================================================

extern crate alloc;

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

/// Error types
pub mod error;

/// System power-state catalogue
pub mod state;

/// Configuration and builder
pub mod config;

/// Device records and the per-device state machine
pub mod device;

/// Device registry and system passes
pub mod registry;

/// Runtime power management
pub mod runtime;

/// System power policy
pub mod policy;

/// Transition notifiers
pub mod notifier;

/// Shared context
pub mod context;

/// Idle-path orchestrator
pub mod orchestrator;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::{PmConfig, PmConfigBuilder};
pub use context::PmContext;
pub use device::{
    DeviceAction, DeviceActionHandler, DeviceFlags, DeviceId, DeviceRecord, DeviceState,
    FnActionHandler, NoopActionHandler,
};
pub use error::{ActionError, ErrorKind, PmError, PmResult};
pub use notifier::{
    FnNotifier, NotifierEntry, NotifierId, NotifierRegistry, NotifyDirection, PowerNotifier,
    StateFilter,
};
pub use orchestrator::{
    IdleOrchestrator, IrqKey, OrchestratorState, OrchestratorStats, PmHardware,
    TransitionOutcome,
};
pub use policy::{PolicyDecision, PolicyEngine, PowerPolicy, ResidencyPolicy, TICKS_FOREVER};
pub use registry::{DeviceDescriptor, DeviceRegistry, PassReport, RegistrySnapshot};
pub use runtime::RuntimePm;
pub use state::{CpuStateTable, PowerStateInfo, PowerStateKind, SystemPowerState};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// TESTS
// =============================================================================
