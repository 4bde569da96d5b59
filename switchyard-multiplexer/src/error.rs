//! Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use switchyard_abci::{AppError, AppVersion};
use switchyard_versioning::RegistryError;
use thiserror::Error;

/// multiplexer result
pub type MultiplexerResult<T, E = MultiplexerError> = core::result::Result<T, E>;

/// Failure to switch the active application. Fatal when consensus asked for the switch.
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum UpgradeError {
    /// cannot switch from version {current} to version {target}: versions never decrease
    NotMonotonic {
        /// active version
        current: AppVersion,
        /// requested version
        target: AppVersion,
    },
    /// registry error: {0}
    Registry(#[from] RegistryError),
    /// could not build the application of version {version}: {source}
    Activation {
        /// version being activated
        version: AppVersion,
        /// factory error
        source: AppError,
    },
    /// already initialized with version {0}, the chain cannot be initialized again
    AlreadyInitialized(AppVersion),
    /// genesis carries no application version and no default is configured
    MissingGenesisVersion,
    /// no application is active yet
    NotActive,
}

/// multiplexer error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum MultiplexerError {
    /// fatal: {0}
    Fatal(#[from] UpgradeError),
    /// halted after a fatal error
    Halted,
    /// no application is active yet
    NotInitialized,
    /// halt requested: {0}
    HaltRequested(String),
    /// application error: {0}
    Application(#[from] AppError),
}

impl MultiplexerError {
    /// Whether the node must stop: continuing would diverge from the network
    pub fn is_fatal(&self) -> bool {
        matches!(self, MultiplexerError::Fatal(_) | MultiplexerError::Halted)
    }
}

impl From<MultiplexerError> for AppError {
    fn from(err: MultiplexerError) -> Self {
        match err {
            MultiplexerError::Application(err) => err,
            MultiplexerError::HaltRequested(reason) => AppError::HaltRequested(reason),
            MultiplexerError::NotInitialized => {
                AppError::Unavailable(MultiplexerError::NotInitialized.to_string())
            }
            err => AppError::Fatal(err.to_string()),
        }
    }
}
