//! Connection and timeout configuration.
//!
//! # Example
//!
//! ```ignore
//! use browser_wire::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_protocol_timeout_ms(10_000)
//!     .with_raw_errors();
//! ```
//!
//! Millisecond setters follow the wire convention: `0` disables the bound.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single protocol command.
pub const DEFAULT_PROTOCOL_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Default timeout for navigations and waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Converts a millisecond setting into an optional bound (`0` = none).
#[inline]
#[must_use]
pub fn millis_to_bound(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Milliseconds of an optional bound, `0` when unbounded.
#[inline]
#[must_use]
pub(crate) fn bound_to_millis(bound: Option<Duration>) -> u64 {
    bound.map(|d| d.as_millis() as u64).unwrap_or_default()
}

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Options shared by both dialect connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Timeout applied to every command unless overridden per call.
    pub protocol_timeout: Option<Duration>,

    /// Artificial delay before each incoming message is processed.
    pub delay: Duration,

    /// Keep browser error messages verbatim instead of rewriting them.
    pub raw_errors: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protocol_timeout: Some(DEFAULT_PROTOCOL_TIMEOUT),
            delay: Duration::ZERO,
            raw_errors: false,
        }
    }

    /// Sets the protocol timeout.
    #[inline]
    #[must_use]
    pub fn with_protocol_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.protocol_timeout = timeout;
        self
    }

    /// Sets the protocol timeout in milliseconds (`0` disables it).
    #[inline]
    #[must_use]
    pub fn with_protocol_timeout_ms(self, ms: u64) -> Self {
        self.with_protocol_timeout(millis_to_bound(ms))
    }

    /// Sets the slow-motion delay applied to incoming messages.
    #[inline]
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keeps browser error messages verbatim.
    #[inline]
    #[must_use]
    pub fn with_raw_errors(mut self) -> Self {
        self.raw_errors = true;
        self
    }
}

// ============================================================================
// CommandOptions
// ============================================================================

/// Per-call options for a single command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Overrides the connection's protocol timeout when set.
    ///
    /// `Some(None)` disables the timeout for this call.
    pub timeout: Option<Option<Duration>>,
}

impl CommandOptions {
    /// Uses a specific timeout in milliseconds (`0` disables it).
    #[inline]
    #[must_use]
    pub fn timeout_ms(ms: u64) -> Self {
        Self {
            timeout: Some(millis_to_bound(ms)),
        }
    }

    /// Resolves the effective timeout against the connection default.
    #[inline]
    #[must_use]
    pub fn resolve(&self, default: Option<Duration>) -> Option<Duration> {
        self.timeout.unwrap_or(default)
    }
}

// ============================================================================
// TimeoutSettings
// ============================================================================

/// Default and navigation timeouts for page-level operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutSettings {
    default_timeout: Option<Option<Duration>>,
    navigation_timeout: Option<Option<Duration>>,
}

impl TimeoutSettings {
    /// Creates settings that use the built-in defaults.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_timeout: None,
            navigation_timeout: None,
        }
    }

    /// Sets the default timeout in milliseconds (`0` disables it).
    pub fn set_default_timeout_ms(&mut self, ms: u64) {
        self.default_timeout = Some(millis_to_bound(ms));
    }

    /// Sets the navigation timeout in milliseconds (`0` disables it).
    pub fn set_navigation_timeout_ms(&mut self, ms: u64) {
        self.navigation_timeout = Some(millis_to_bound(ms));
    }

    /// Effective default timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.default_timeout.unwrap_or(Some(DEFAULT_TIMEOUT))
    }

    /// Effective navigation timeout: navigation setting, then default.
    #[must_use]
    pub fn navigation_timeout(&self) -> Option<Duration> {
        self.navigation_timeout.unwrap_or_else(|| self.timeout())
    }
}

// ============================================================================
// Tests
// ============================================================================
