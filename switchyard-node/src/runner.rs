// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Runs the binary of the version the chain is at, and switches binaries when
//! the chain moves to a new version.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use displaydoc::Display;
use switchyard_abci::AppVersion;
use switchyard_supervisor::{ProcessSupervisor, StdioBindings, SupervisorConfig, SupervisorError};
use switchyard_versioning::{RegistryError, VersionRegistry};
use thiserror::Error;
use tracing::{debug, info, warn};

/// runner error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum RunnerError {
    /// registry error: {0}
    Registry(#[from] RegistryError),
    /// supervisor error: {0}
    Supervisor(#[from] SupervisorError),
    /// refusing to go back from version {current} to version {requested}
    Downgrade {
        /// running version
        current: AppVersion,
        /// requested version
        requested: AppVersion,
    },
    /// binary of version {version} exited {restarts} times, giving up
    TooManyRestarts {
        /// version of the binary
        version: AppVersion,
        /// restarts attempted
        restarts: usize,
    },
    /// invalid version file {0}: {1}
    InvalidVersionFile(PathBuf, String),
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// extraction directory of embedded binaries
    pub bin_dir: PathBuf,
    /// delay between interrupt and kill
    pub stop_timeout: Duration,
    /// delay before restarting a binary that exited
    pub restart_delay: Duration,
    /// restarts allowed in a row before giving up
    pub max_restarts: usize,
    /// uptime after which a restarted binary counts as healthy again
    pub healthy_uptime: Duration,
    /// period of the version and liveness checks
    pub poll_interval: Duration,
    /// stream bindings of every binary
    pub stdio: StdioBindings,
    /// appended to the start arguments of every binary
    pub program_args: Vec<String>,
}

impl RunnerConfig {
    pub(crate) fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            bin_dir: self.bin_dir.clone(),
            stop_timeout: self.stop_timeout,
            stdio: self.stdio.clone(),
        }
    }
}

/// Tells which version the chain is at
pub trait VersionSource {
    /// `None` while unknown
    fn current_version(&self) -> Result<Option<AppVersion>, RunnerError>;
}

impl<F> VersionSource for F
where
    F: Fn() -> Result<Option<AppVersion>, RunnerError>,
{
    fn current_version(&self) -> Result<Option<AppVersion>, RunnerError> {
        self()
    }
}

/// File containing the version as a decimal number, written by the consensus side
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: PathBuf,
}

impl VersionFile {
    /// Version read from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        VersionFile { path: path.into() }
    }
}

impl VersionSource for VersionFile {
    fn current_version(&self) -> Result<Option<AppVersion>, RunnerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(RunnerError::InvalidVersionFile(
                    self.path.clone(),
                    err.to_string(),
                ))
            }
        };
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        content
            .parse()
            .map(Some)
            .map_err(|err| RunnerError::InvalidVersionFile(self.path.clone(), format!("{}", err)))
    }
}

/// Runs one binary at a time, picked from the registry by version
pub struct BinaryRunner {
    registry: Arc<VersionRegistry>,
    config: RunnerConfig,
    current: Option<(AppVersion, ProcessSupervisor)>,
}

impl BinaryRunner {
    /// Runner with nothing running yet
    pub fn new(registry: Arc<VersionRegistry>, config: RunnerConfig) -> Self {
        BinaryRunner {
            registry,
            config,
            current: None,
        }
    }

    /// Version of the running binary
    pub fn current_version(&self) -> Option<AppVersion> {
        self.current.as_ref().map(|(version, _)| *version)
    }

    /// Pid of the running binary, `PID_STOPPED` if none
    pub fn pid(&self) -> i32 {
        self.current
            .as_ref()
            .map_or(switchyard_supervisor::PID_STOPPED, |(_, supervisor)| {
                supervisor.pid()
            })
    }

    /// Run the binary of `version`: the running one, if older, is stopped
    /// first, then the pre-handlers of the new one are run before it starts
    pub fn switch_to(&mut self, version: AppVersion) -> Result<(), RunnerError> {
        if let Some((current, supervisor)) = &self.current {
            if version < *current {
                return Err(RunnerError::Downgrade {
                    current: *current,
                    requested: version,
                });
            }
            if version == *current {
                if !supervisor.is_running() {
                    supervisor.start()?;
                }
                return Ok(());
            }
        }

        let descriptor = self.registry.binary(version)?;
        let supervisor = ProcessSupervisor::from_descriptor(
            descriptor,
            &self.config.program_args,
            &self.config.supervisor_config(),
        )?;

        if let Some((previous, running)) = self.current.take() {
            info!(
                "stopping binary of version {} to switch to version {}",
                previous, version
            );
            if let Err(err) = running.stop() {
                self.current = Some((previous, running));
                return Err(err.into());
            }
        }

        for args in &descriptor.pre_handlers {
            match supervisor.run_one_shot(args) {
                Ok(output) if output.status.success() => {
                    info!("pre-handler {:?} of {} succeeded", args, descriptor.name)
                }
                Ok(output) => warn!(
                    "pre-handler {:?} of {} failed with {}: {}",
                    args,
                    descriptor.name,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(err) => warn!(
                    "could not run pre-handler {:?} of {}: {}",
                    args, descriptor.name, err
                ),
            }
        }

        supervisor.start()?;
        info!(
            "binary {} of version {} started with pid {}",
            descriptor.name,
            version,
            supervisor.pid()
        );
        self.current = Some((version, supervisor));
        Ok(())
    }

    /// Keep the right binary running until a stop is requested.
    ///
    /// Switches binary when `source` reports a newer version, restarts a binary
    /// that exited after `restart_delay`, up to `max_restarts` times in a row.
    /// A binary up for `healthy_uptime` gets its restart budget back.
    pub fn supervise(
        &mut self,
        source: &dyn VersionSource,
        stop_rx: &Receiver<()>,
    ) -> Result<(), RunnerError> {
        let mut restarts = 0;
        let mut started_at = Instant::now();
        loop {
            match stop_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return self.shutdown(),
                Err(TryRecvError::Empty) => {}
            }

            if let Some(version) = source.current_version()? {
                if self.current_version().map_or(true, |current| version > current) {
                    self.switch_to(version)?;
                    restarts = 0;
                    started_at = Instant::now();
                }
            }

            let Some((version, supervisor)) = &self.current else {
                debug!("no binary to run yet");
                if wait_stop(stop_rx, self.config.poll_interval) {
                    return self.shutdown();
                }
                continue;
            };
            let version = *version;

            let status = supervisor.wait_exit(self.config.poll_interval);
            if status.is_none() && supervisor.is_running() {
                if restarts > 0 && started_at.elapsed() >= self.config.healthy_uptime {
                    debug!(
                        "binary of version {} healthy again after {} restarts",
                        version, restarts
                    );
                    restarts = 0;
                }
                continue;
            }
            match status {
                Some(status) => warn!("binary of version {} exited with {}", version, status),
                None => warn!("binary of version {} exited", version),
            }
            if restarts >= self.config.max_restarts {
                return Err(RunnerError::TooManyRestarts { version, restarts });
            }
            restarts += 1;
            if wait_stop(stop_rx, self.config.restart_delay) {
                return self.shutdown();
            }
            info!(
                "restarting binary of version {} ({}/{})",
                version, restarts, self.config.max_restarts
            );
            supervisor.start()?;
            started_at = Instant::now();
        }
    }

    /// Stop the running binary, if any
    pub fn shutdown(&self) -> Result<(), RunnerError> {
        if let Some((version, supervisor)) = &self.current {
            info!("stopping binary of version {}", version);
            supervisor.stop()?;
        }
        Ok(())
    }
}

/// Wait up to `timeout` for a stop request
fn wait_stop(stop_rx: &Receiver<()>, timeout: Duration) -> bool {
    !matches!(stop_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}
