// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! this file defines all possible application error categories

use displaydoc::Display;
use thiserror::Error;

/// application result
pub type AppResult<T, E = AppError> = core::result::Result<T, E>;

/// Errors reported by an application or by the resources it is built from.
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum AppError {
    /// Application error: {0}
    ApplicationError(String),
    /// Storage error: {0}
    StorageError(String),
    /// Could not create application: {0}
    CreationError(String),
    /// IO error: {0}
    IOError(#[from] std::io::Error),
    /// Fatal error, the node must stop: {0}
    Fatal(String),
    /// Halt requested: {0}
    HaltRequested(String),
    /// Not ready: {0}
    Unavailable(String),
}

impl AppError {
    /// Whether the node must stop: continuing would diverge from the network
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Fatal(_))
    }
}
