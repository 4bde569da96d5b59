// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! # Overview
//!
//! The multiplexer presents a single, stable application surface to the consensus
//! engine while the implementation behind it changes at consensus-decided heights.
//!
//! The version to run is read from consensus-replicated data only: the genesis
//! consensus parameters, the consensus parameter updates returned at the end of
//! every block, and the version carried by a state-sync snapshot. Every node thus
//! switches at the same height.
//!
//! # Failures
//!
//! Failing to switch is never recoverable: continuing with the old logic would
//! diverge from the rest of the network. Such failures are reported as
//! [`MultiplexerError::Fatal`] and the multiplexer refuses every later call
//! ([`MultiplexerError::Halted`]). The host is expected to exit.
//!
//! # Architecture
//!
//! ## multiplexer.rs
//! The multiplexer, its active slot and its upgrade procedure.
//!
//! ## config.rs
//! Halt conditions and genesis fallback.
//!
//! ## error.rs
//! Upgrade and call errors.

#![warn(missing_docs)]

mod config;
mod error;
mod multiplexer;

pub use config::MultiplexerConfig;
pub use error::{MultiplexerError, MultiplexerResult, UpgradeError};
pub use multiplexer::Multiplexer;

#[cfg(test)]
mod tests;
