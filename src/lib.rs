//! svcctl drives long-running background services uniformly across native service
//! managers and lets a running service report its lifecycle back to observers.
//!
//! Controllers use [`controller::ServiceController`] over a capability-flagged
//! [`backend::Backend`]. Services run their handler through [`service::run`], which
//! owns the [`lifecycle::Lifecycle`] state machine and announces each transition on
//! the [`channel`] socket.

/// Backend adapters for native service managers.
pub mod backend;

/// Named operations and per-backend capability sets.
pub mod capability;

/// Notification channel between a service and its observers.
pub mod channel;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Constants shared across modules.
pub mod constants;

/// Controller facade.
pub mod controller;

/// Error handling.
pub mod error;

/// Service-side lifecycle state machine.
pub mod lifecycle;

/// Runtime directories.
pub mod runtime;

/// Signal-driven service runtime.
pub mod service;

/// Service states and lifecycle tokens.
pub mod state;

/// Status records written by services.
pub mod store;

/// Bounded waits.
pub mod wait;

/// Test utilities.
pub mod test_utils;
