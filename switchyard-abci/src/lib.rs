// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! # Overview
//!
//! This crate defines the call surface a consensus engine drives on a replicated
//! state machine (the "application"), and the resources every application version
//! is built from.
//!
//! # Usage
//!
//! A versioned application implements [`Application`]. An [`AppFactory`] is able to
//! build that application from a set of [`AppResources`] which are opened once at
//! process start and shared by every version: the storage handle is never closed or
//! reopened when the node switches from one version to the next.
//!
//! # Architecture
//!
//! ## types.rs
//! Requests and responses of every call of the surface.
//!
//! ## application.rs
//! Defines the `Application` and `AppFactory` traits.
//!
//! ## resources.rs
//! Shared resources: database handle, trace store, application options.
//!
//! ## error.rs
//! Defines error types for the crate.

#![warn(missing_docs)]

mod application;
mod error;
mod resources;
mod types;

pub use application::{AppFactory, Application};
pub use error::{AppError, AppResult};
pub use resources::{AppDb, AppResources, MemoryDb, TraceStore};
pub use types::*;

#[cfg(any(test, feature = "test-exports"))]
pub use application::MockApplication;
