// Copyright (c) 2022 MASSA LABS <info@massa.net>

use std::sync::Arc;

use crossbeam_channel::Receiver;
use switchyard_abci::{AppResources, AppVersion};
use switchyard_multiplexer::{Multiplexer, MultiplexerConfig, MultiplexerError};
use switchyard_supervisor::ProcessSupervisor;
use switchyard_versioning::{ActivationStrategy, VersionRegistry};
use tracing::{error, info};

use crate::runner::{BinaryRunner, RunnerConfig, RunnerError, VersionSource};

/// Wires the version registry into the components running the application:
/// a multiplexer for in-process versions, a binary runner for the others
pub struct StartCommandHandler {
    registry: Arc<VersionRegistry>,
}

impl StartCommandHandler {
    /// Handler serving the versions of `registry`
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        StartCommandHandler { registry }
    }

    /// The registry shared by every component built here
    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Multiplexer of the in-process versions, for a host embedding the
    /// applications. Every version is built from `resources`.
    pub fn build_multiplexer(
        &self,
        resources: AppResources,
        config: MultiplexerConfig,
    ) -> Multiplexer {
        Multiplexer::new(self.registry.clone(), resources, config)
    }

    /// Run the binaries until `stop_rx` fires.
    ///
    /// Starts with the version reported by `source`, or the one picked by
    /// `initial` while `source` knows none.
    pub fn run_binaries(
        &self,
        config: RunnerConfig,
        initial: ActivationStrategy,
        source: &dyn VersionSource,
        stop_rx: &Receiver<()>,
    ) -> Result<(), RunnerError> {
        let strategy = source
            .current_version()?
            .map_or(initial, ActivationStrategy::Exact);
        let version = self.registry.resolve(strategy)?;
        info!("starting with application version {}", version);

        let mut runner = BinaryRunner::new(self.registry.clone(), config);
        runner.switch_to(version)?;
        let res = runner.supervise(source, stop_rx);
        if res.is_err() {
            // never leave a binary behind
            if let Err(err) = runner.shutdown() {
                error!("could not stop binary: {}", err);
            }
        }
        res
    }

    /// Output of `<binary> version` for every binary, in version order
    pub fn binary_versions(
        &self,
        config: &RunnerConfig,
    ) -> Vec<(AppVersion, Result<String, RunnerError>)> {
        let supervisor_config = config.supervisor_config();
        let args = ["version".to_string()];
        self.registry
            .binaries()
            .map(|(version, descriptor)| {
                let output =
                    ProcessSupervisor::from_descriptor(descriptor, &[], &supervisor_config)
                        .and_then(|supervisor| supervisor.run_one_shot(&args))
                        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
                        .map_err(RunnerError::from);
                (version, output)
            })
            .collect()
    }
}

/// Exit the process if `err` means continuing would diverge from the network
pub fn exit_on_fatal(err: &MultiplexerError) {
    if err.is_fatal() {
        error!("fatal error, the node must stop: {}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::VersionFile;
    use assert_matches::assert_matches;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use switchyard_abci::{
        AppResult, Application, ConsensusParams, MemoryDb, MockApplication, RequestInitChain,
    };
    use switchyard_supervisor::{BinaryDescriptor, StdioBindings};
    use switchyard_versioning::Activator;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn runner_config(dir: &Path) -> RunnerConfig {
        RunnerConfig {
            bin_dir: dir.join("bin"),
            stop_timeout: Duration::from_secs(2),
            restart_delay: Duration::from_millis(10),
            max_restarts: 1,
            healthy_uptime: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            stdio: StdioBindings::null(),
            program_args: vec!["--home".to_string(), dir.display().to_string()],
        }
    }

    #[test]
    fn test_build_multiplexer() {
        let registry = Arc::new(
            VersionRegistry::new([(
                3,
                Activator::factory(|_: &AppResources| -> AppResult<Box<dyn Application>> {
                    let mut app = MockApplication::new();
                    app.expect_init_chain().returning(|_| Ok(Default::default()));
                    Ok(Box::new(app))
                }),
            )])
            .unwrap(),
        );
        let handler = StartCommandHandler::new(registry);
        let resources = AppResources::new("/tmp", Arc::new(MemoryDb::new()));
        let mux = handler.build_multiplexer(resources, MultiplexerConfig::default());
        mux.init_chain(RequestInitChain {
            consensus_params: Some(ConsensusParams::with_app_version(3)),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(mux.active_version(), Some(3));

        // not fatal: returns
        exit_on_fatal(&MultiplexerError::NotInitialized);
    }

    #[test]
    #[serial]
    fn test_binary_versions() {
        let dir = TempDir::new().unwrap();
        let v1 = script(dir.path(), "appd-v1", "[ \"$1\" = version ] && echo 1.4.2");
        let v2 = script(dir.path(), "appd-v2", "[ \"$1\" = version ] && echo 2.0.0-rc1");
        let registry = Arc::new(
            VersionRegistry::new([
                (1, Activator::Binary(BinaryDescriptor::from_path("v1", v1))),
                (2, Activator::Binary(BinaryDescriptor::from_path("v2", v2))),
                (
                    3,
                    Activator::Binary(BinaryDescriptor::from_path("v3", dir.path().join("nope"))),
                ),
            ])
            .unwrap(),
        );
        let handler = StartCommandHandler::new(registry);
        let versions = handler.binary_versions(&runner_config(dir.path()));
        assert_eq!(versions.len(), 3);
        assert_matches!(&versions[0], (1, Ok(output)) if output == "1.4.2");
        assert_matches!(&versions[1], (2, Ok(output)) if output == "2.0.0-rc1");
        assert_matches!(&versions[2], (3, Err(RunnerError::Supervisor(_))));
    }

    #[test]
    #[serial]
    fn test_run_binaries_until_stopped() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args");
        let body = format!("echo \"$@\" > \"{}\"\nexec sleep 30", args_file.display());
        let v1 = script(dir.path(), "appd-v1", &body);
        let v2 = script(dir.path(), "appd-v2", &body);
        let registry = Arc::new(
            VersionRegistry::new([
                (1, Activator::Binary(BinaryDescriptor::from_path("v1", v1))),
                (2, Activator::Binary(BinaryDescriptor::from_path("v2", v2))),
            ])
            .unwrap(),
        );
        let handler = StartCommandHandler::new(registry);
        let config = runner_config(dir.path());
        // no version known yet: the latest binary runs
        let source = VersionFile::new(dir.path().join("app-version"));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(400));
            stop_tx.send(()).unwrap();
        });

        handler
            .run_binaries(config, ActivationStrategy::Latest, &source, &stop_rx)
            .unwrap();
        stopper.join().unwrap();

        let args = fs::read_to_string(&args_file).unwrap();
        assert_eq!(
            args.trim(),
            format!("start --home {}", dir.path().display())
        );
    }

    #[test]
    #[serial]
    fn test_run_binaries_unknown_version() {
        let dir = TempDir::new().unwrap();
        let v1 = script(dir.path(), "appd-v1", "exec sleep 30");
        let registry = Arc::new(
            VersionRegistry::new([(1, Activator::Binary(BinaryDescriptor::from_path("v1", v1)))])
                .unwrap(),
        );
        let handler = StartCommandHandler::new(registry);
        let source = || -> Result<Option<AppVersion>, RunnerError> { Ok(Some(9)) };
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        assert_matches!(
            handler.run_binaries(
                runner_config(dir.path()),
                ActivationStrategy::Latest,
                &source,
                &stop_rx
            ),
            Err(RunnerError::Registry(_))
        );
    }
}
