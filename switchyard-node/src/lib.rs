// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Node side of the application switchyard.
//!
//! Reads the settings, builds the version registry, then either hands a
//! [`switchyard_multiplexer::Multiplexer`] to a host running the applications
//! in-process, or runs the versioned binaries one after the other with a
//! [`runner::BinaryRunner`], following the version the chain is at.
#![warn(missing_docs)]

pub mod runner;
pub mod settings;
pub mod start;

pub use runner::{BinaryRunner, RunnerConfig, RunnerError, VersionFile, VersionSource};
pub use settings::{build_settings, Settings};
pub use start::{exit_on_fatal, StartCommandHandler};
