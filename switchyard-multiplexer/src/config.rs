//! Copyright (c) 2022 MASSA LABS <info@massa.net>

use serde::{Deserialize, Serialize};
use switchyard_abci::AppVersion;

/// Multiplexer configuration
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// stop processing blocks from this height on (0: disabled)
    #[serde(default)]
    pub halt_height: u64,
    /// stop processing blocks whose time, in unix seconds, is at least this one (0: disabled)
    #[serde(default)]
    pub halt_time: u64,
    /// version used when the genesis does not carry one
    #[serde(default)]
    pub default_app_version: Option<AppVersion>,
}
