//! Copyright (c) 2022 MASSA LABS <info@massa.net>

//! This file defines the supervisor settings

use std::path::PathBuf;
use std::time::Duration;

use crate::stdio::StdioBindings;

/// Default grace period between the interrupt and the kill on stop
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(6);

/// Structure defining the settings of a process supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// directory where embedded binaries are extracted, one sub-directory per version
    pub bin_dir: PathBuf,
    /// how long `stop` waits after the interrupt before killing the process
    pub stop_timeout: Duration,
    /// standard stream bindings of the supervised process
    pub stdio: StdioBindings,
}

impl SupervisorConfig {
    /// Default settings extracting binaries under `bin_dir`
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        SupervisorConfig {
            bin_dir: bin_dir.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            stdio: StdioBindings::default(),
        }
    }
}
