// Copyright (c) 2022 MASSA LABS <info@massa.net>

use std::path::PathBuf;

use thiserror::Error;

use crate::binary::Platform;

/// supervisor result
pub type SupervisorResult<T, E = SupervisorError> = core::result::Result<T, E>;

/// Operational errors of the process supervisor
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("process already running with pid {0}")]
    AlreadyRunning(i32),
    #[error("failed to send {signal} to pid {pid}: {reason}")]
    Signal {
        pid: i32,
        signal: &'static str,
        reason: String,
    },
    #[error("no binary available for platform {platform} (version {version})")]
    NoBinaryForPlatform { version: String, platform: Platform },
    #[error("failed to extract binary for version {version}: {source}")]
    Extraction {
        version: String,
        source: std::io::Error,
    },
    #[error("no executable binary found in {} for version {version}", dir.display())]
    NoExecutableInArchive { version: String, dir: PathBuf },
    #[error("failed to walk extracted files: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
