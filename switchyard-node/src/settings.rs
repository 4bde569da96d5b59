// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Build the node settings from the configuration files.
//!
//! Sources are merged in this order, later ones overriding earlier ones:
//! 1. the file at `SWITCHYARD_CONFIG_PATH` (`base_config/config.toml` by default)
//! 2. the file at `SWITCHYARD_CONFIG_OVERRIDE_PATH` (`config/config.toml` by default), if present
//! 3. `config.toml` in the per-user configuration directory, if present
//! 4. environment variables prefixed with `SWITCHYARD_` (`__` separates sections)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use directories::ProjectDirs;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use switchyard_abci::AppVersion;
use switchyard_supervisor::{
    BinaryDescriptor, EmbeddedBinaries, InputBinding, OutputBinding, Platform, StdioBindings,
};
use switchyard_versioning::{Activator, VersionRegistry};

use crate::runner::RunnerConfig;

const BASE_CONFIG_PATH: &str = "base_config/config.toml";
const OVERRIDE_CONFIG_PATH: &str = "config/config.toml";

/// Load the settings, failing on missing base file or invalid values
pub fn build_settings(app_name: &str, env_prefix: &str) -> Result<Settings, config::ConfigError> {
    let mut builder = config::Config::builder();
    let config_path = std::env::var(format!("{}_CONFIG_PATH", env_prefix))
        .unwrap_or_else(|_| BASE_CONFIG_PATH.to_string());
    builder = builder.add_source(config::File::with_name(&config_path));

    let config_override_path = std::env::var(format!("{}_CONFIG_OVERRIDE_PATH", env_prefix))
        .unwrap_or_else(|_| OVERRIDE_CONFIG_PATH.to_string());
    if Path::new(&config_override_path).is_file() {
        builder = builder.add_source(config::File::with_name(&config_override_path));
    }

    if let Some(proj_dirs) = ProjectDirs::from("org", "switchyard", app_name) {
        // portable user config loading
        let user_config_path = proj_dirs.config_dir().join("config.toml");
        if user_config_path.is_file() {
            builder = builder.add_source(config::File::from(user_config_path));
        }
    }

    builder
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()
}

/// Logging settings
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LoggingSettings {
    /// 0: errors, 1: warnings, 2: info, 3: debug, 4: trace
    pub level: usize,
}

/// Settings of the node itself
#[derive(Debug, Deserialize, Clone)]
pub struct NodeSettings {
    /// file holding the version the chain is at
    pub version_file: PathBuf,
}

/// Standard stream binding as written in the configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamSetting {
    /// the node's own stream
    Inherit,
    /// nothing
    Null,
    /// lines forwarded to the node logs (outputs only)
    Log,
    /// a file
    File(PathBuf),
}

impl StreamSetting {
    fn input(&self) -> anyhow::Result<InputBinding> {
        Ok(match self {
            StreamSetting::Inherit => InputBinding::Inherit,
            StreamSetting::Null => InputBinding::Null,
            StreamSetting::File(path) => InputBinding::File(path.clone()),
            StreamSetting::Log => bail!("stdin cannot be bound to the logs"),
        })
    }

    fn output(&self) -> OutputBinding {
        match self {
            StreamSetting::Inherit => OutputBinding::Inherit,
            StreamSetting::Null => OutputBinding::Null,
            StreamSetting::Log => OutputBinding::Log,
            StreamSetting::File(path) => OutputBinding::File(path.clone()),
        }
    }
}

/// Settings of the binary supervision
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorSettings {
    /// extraction directory of embedded binaries
    pub bin_dir: PathBuf,
    /// delay between interrupt and kill
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub stop_timeout: Duration,
    /// delay before restarting a crashed binary
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub restart_delay: Duration,
    /// restarts allowed in a row before giving up
    pub max_restarts: usize,
    /// uptime after which a binary counts as healthy again
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub healthy_uptime: Duration,
    /// period of the version and liveness checks
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// standard input binding
    pub stdin: StreamSetting,
    /// standard output binding
    pub stdout: StreamSetting,
    /// standard error binding
    pub stderr: StreamSetting,
}

/// An application version run as a separate binary
#[derive(Debug, Deserialize, Clone)]
pub struct BinarySettings {
    /// application version
    pub version: AppVersion,
    /// human readable name, also the extraction directory of archives
    pub name: String,
    /// executable on disk
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// gzipped tar archive for the running platform
    #[serde(default)]
    pub archive: Option<PathBuf>,
    /// replaces the default `start` argument
    #[serde(default)]
    pub start_args: Option<Vec<String>>,
    /// one-shot commands run before starting
    #[serde(default)]
    pub pre_handlers: Vec<Vec<String>>,
}

impl BinarySettings {
    fn descriptor(&self) -> anyhow::Result<BinaryDescriptor> {
        let mut descriptor = match (&self.path, &self.archive) {
            (Some(path), None) => BinaryDescriptor::from_path(&self.name, path),
            (None, Some(archive)) => {
                let payload = std::fs::read(archive)
                    .with_context(|| format!("could not read archive {}", archive.display()))?;
                BinaryDescriptor::embedded(
                    EmbeddedBinaries::new(&self.name).with_payload(Platform::current(), payload),
                )
            }
            _ => bail!(
                "binary {} (version {}) needs exactly one of `path` or `archive`",
                self.name,
                self.version
            ),
        };
        if let Some(start_args) = &self.start_args {
            descriptor = descriptor.with_start_args(start_args.clone());
        }
        for pre_handler in &self.pre_handlers {
            descriptor = descriptor.with_pre_handler(pre_handler.clone());
        }
        Ok(descriptor)
    }
}

/// Node settings
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// logging
    pub logging: LoggingSettings,
    /// node
    pub node: NodeSettings,
    /// binary supervision
    pub supervisor: SupervisorSettings,
    /// versions run as binaries
    #[serde(default)]
    pub binaries: Vec<BinarySettings>,
}

impl Settings {
    /// Registry of the configured binaries
    pub fn version_registry(&self) -> anyhow::Result<VersionRegistry> {
        let entries = self
            .binaries
            .iter()
            .map(|binary| Ok((binary.version, Activator::Binary(binary.descriptor()?))))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(VersionRegistry::new(entries)?)
    }

    /// Runner configuration forwarding `program_args` to every binary
    pub fn runner_config(&self, program_args: Vec<String>) -> anyhow::Result<RunnerConfig> {
        let supervisor = &self.supervisor;
        Ok(RunnerConfig {
            bin_dir: supervisor.bin_dir.clone(),
            stop_timeout: supervisor.stop_timeout,
            restart_delay: supervisor.restart_delay,
            max_restarts: supervisor.max_restarts,
            healthy_uptime: supervisor.healthy_uptime,
            poll_interval: supervisor.poll_interval,
            stdio: StdioBindings {
                stdin: supervisor.stdin.input()?,
                stdout: supervisor.stdout.output(),
                stderr: supervisor.stderr.output(),
            },
            program_args,
        })
    }
}
