//! # Error Handling
//!
//! Error types for the power-management core.
//!
//! ## Error Propagation
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ERROR PROPAGATION FLOW                            │
//! │                                                                          │
//! │  ╔═══════════════╗                                                       │
//! │  ║ Device action ║──▶ ActionError ──▶ PmError(ActionFailed)             │
//! │  ║    fails      ║                          │                            │
//! │  ╚═══════════════╝                          ▼                            │
//! │                               ┌───────────────────────────┐              │
//! │                               │  Pass aborted (no undo)   │              │
//! │                               │  SuspendAborted /         │              │
//! │                               │  ResumeAborted            │              │
//! │                               └─────────────┬─────────────┘              │
//! │                                             ▼                            │
//! │                               Orchestrator returns Err                   │
//! │                               (system stays ACTIVE)                      │
//! │                                                                          │
//! │  Not-ready device action invoked ──▶ assert! (fatal, never returned)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Categories
//!
//! | Category | Recoverable | Example |
//! |----------|-------------|---------|
//! | General | Mostly | Unknown device id, duplicate notifier |
//! | Device | No | Device not ready, action callback failure |
//! | Transition | Yes | Suspend pass aborted by a device |
//! | Configuration | No | Inconsistent power-state table |
//! | Internal | No | Invariant violation |

use core::fmt;

use crate::device::DeviceId;
use crate::state::SystemPowerState;

// =============================================================================
// ACTION ERROR
// =============================================================================

/// Failure reported by a device action handler.
///
/// Carries a negative errno-style code so drivers can forward whatever their
/// bus layer reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionError {
    code: i32,
}

impl ActionError {
    /// Generic I/O failure
    pub const IO: Self = Self::new(-5);

    /// Device busy
    pub const BUSY: Self = Self::new(-16);

    /// Operation not supported by the device
    pub const NOT_SUPPORTED: Self = Self::new(-134);

    /// Create a new action error from an errno-style code
    pub const fn new(code: i32) -> Self {
        Self { code }
    }

    /// Get the raw code
    pub const fn code(&self) -> i32 {
        self.code
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device action failed (code {})", self.code)
    }
}

// =============================================================================
// ERROR KIND
// =============================================================================

/// Classification of power-management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    // -------------------------------------------------------------------------
    // General Errors (0-99)
    // -------------------------------------------------------------------------
    /// Invalid argument provided
    InvalidArgument    = 1,

    /// Not found
    NotFound           = 2,

    /// Resource exhausted
    ResourceExhausted  = 3,

    // -------------------------------------------------------------------------
    // Device Errors (100-199)
    // -------------------------------------------------------------------------
    /// Device failed initialization and is excluded from power management
    NotReady           = 100,

    /// Device action handler reported failure
    ActionFailed       = 101,

    // -------------------------------------------------------------------------
    // Transition Errors (200-299)
    // -------------------------------------------------------------------------
    /// System suspend pass aborted by a device
    SuspendAborted     = 200,

    /// System resume pass aborted by a device
    ResumeAborted      = 201,

    // -------------------------------------------------------------------------
    // Configuration Errors (300-399)
    // -------------------------------------------------------------------------
    /// Invalid configuration
    InvalidConfig      = 300,

    // -------------------------------------------------------------------------
    // Internal Errors (800-899)
    // -------------------------------------------------------------------------
    /// Invariant violation
    InvariantViolation = 800,
}

impl ErrorKind {
    /// Get the error category name
    pub const fn category(&self) -> &'static str {
        match *self as u32 {
            0..=99 => "General",
            100..=199 => "Device",
            200..=299 => "Transition",
            300..=399 => "Configuration",
            800..=899 => "Internal",
            _ => "Unknown",
        }
    }

    /// Check if the caller can retry the operation later
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::SuspendAborted | ErrorKind::ResumeAborted | ErrorKind::ActionFailed
        )
    }

    /// Check if the error indicates a programming-model violation
    pub const fn is_fatal(&self) -> bool {
        matches!(self, ErrorKind::InvariantViolation)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// PM ERROR
// =============================================================================

/// Power-management error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmError {
    /// Error classification
    kind: ErrorKind,

    /// Human-readable message
    message: &'static str,

    /// Device that caused the error
    device: Option<DeviceId>,

    /// Underlying device action failure
    action: Option<ActionError>,

    /// System state involved in the failed transition
    state: Option<SystemPowerState>,
}

impl PmError {
    /// Create new error with kind and message
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
            device: None,
            action: None,
            state: None,
        }
    }

    /// Error for an unknown device id
    pub const fn unknown_device(id: DeviceId) -> Self {
        Self::new(ErrorKind::NotFound, "Unknown device").with_device(id)
    }

    /// Error for an operation on a device that failed initialization
    pub const fn not_ready(id: DeviceId) -> Self {
        Self::new(ErrorKind::NotReady, "Device not ready").with_device(id)
    }

    /// Error wrapping a device action failure
    pub const fn action(id: DeviceId, err: ActionError) -> Self {
        Self::new(ErrorKind::ActionFailed, "Device action failed")
            .with_device(id)
            .with_action_error(err)
    }

    /// Add device to error
    pub const fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Add action error to error
    pub const fn with_action_error(mut self, err: ActionError) -> Self {
        self.action = Some(err);
        self
    }

    /// Add system state to error
    pub const fn with_state(mut self, state: SystemPowerState) -> Self {
        self.state = Some(state);
        self
    }

    /// Re-classify the error, keeping its context
    pub const fn with_kind(mut self, kind: ErrorKind, message: &'static str) -> Self {
        self.kind = kind;
        self.message = message;
        self
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get message
    pub fn message(&self) -> &str {
        self.message
    }

    /// Get device
    pub fn device(&self) -> Option<DeviceId> {
        self.device
    }

    /// Get the device action failure
    pub fn action_error(&self) -> Option<ActionError> {
        self.action
    }

    /// Get system state
    pub fn state(&self) -> Option<SystemPowerState> {
        self.state
    }

    /// Check if recoverable
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.category(), self.message)?;

        if let Some(device) = self.device {
            write!(f, " (device: {})", device.raw())?;
        }

        if let Some(action) = self.action {
            write!(f, " ({})", action)?;
        }

        if let Some(state) = self.state {
            write!(f, " (state: {})", state)?;
        }

        Ok(())
    }
}

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Result type for power-management operations
pub type PmResult<T> = Result<T, PmError>;

// =============================================================================
// TESTS
// =============================================================================
