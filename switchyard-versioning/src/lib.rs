//! # General description
//!
//! Maps every application version a chain may reach to the way of activating it.
//!
//! A version is either activated in-process, by building an application with an
//! [`switchyard_abci::AppFactory`], or by running a dedicated binary under a
//! supervisor (see [`switchyard_supervisor::BinaryDescriptor`]).
//!
//! The [`VersionRegistry`] is built once at startup from the full list of versions
//! the node knows about and is immutable afterwards. Looking up a version that was
//! not registered is always an error, never a fallback to some default.

#![warn(missing_docs)]

mod error;
mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{ActivationStrategy, Activator, VersionRegistry};
