//! Pidward keeps a single command running on Unix-like systems. It tracks the
//! command through a pidfile, verifies that the pid still belongs to that
//! command before trusting it, and runs optional lifecycle hooks around every
//! start and stop.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Defaults and timing constants.
pub mod constants;

/// Launching and signalling the supervised command.
pub mod daemon;

/// Error handling.
pub mod error;

/// Lifecycle hooks.
pub mod hooks;

/// Liveness inspection.
pub mod status;

/// The action state machine.
pub mod supervisor;

#[cfg(test)]
mod test_utils;
