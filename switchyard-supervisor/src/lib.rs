// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! # Overview
//!
//! Runs one application binary as a supervised child process.
//!
//! A [`ProcessSupervisor`] owns at most one OS process at a time. It starts it,
//! tracks its pid (reset to [`PID_STOPPED`] as soon as the process is gone,
//! whether it was stopped or crashed), binds its standard streams and stops it
//! with an interrupt followed, after a timeout, by a kill.
//!
//! The executable is either already on disk or materialized on first use from a
//! per-platform compressed payload embedded in the node (see [`EmbeddedBinaries`]).
//!
//! Every failure here is operational: it is returned to the caller, who decides
//! whether to retry, alert or give up. The supervisor never terminates its host.
//!
//! # Architecture
//!
//! ## supervisor.rs
//! The supervisor itself and its exit watcher.
//!
//! ## stdio.rs
//! Standard stream bindings, including forwarding of output lines to tracing.
//!
//! ## binary.rs
//! Binary descriptors, platforms and payload extraction.
//!
//! ## error.rs
//! Defines error types for the crate.

#![warn(missing_docs)]

mod binary;
mod config;
mod error;
mod stdio;
mod supervisor;

pub use binary::{BinaryDescriptor, BinarySource, EmbeddedBinaries, Platform};
pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorResult};
pub use stdio::{InputBinding, OutputBinding, StdioBindings};
pub use supervisor::{ProcessSupervisor, PID_STOPPED};

#[cfg(all(test, unix))]
mod tests;
