// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! This module implements the process supervisor.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::binary::BinaryDescriptor;
use crate::config::{SupervisorConfig, DEFAULT_STOP_TIMEOUT};
use crate::error::{SupervisorError, SupervisorResult};
use crate::stdio::{forward_output, StdioBindings};

/// Pid reported when no process is running
pub const PID_STOPPED: i32 = -1;

/// State kept while a process is alive (or not yet reaped by `stop`)
struct RunningProcess {
    pid: i32,
    /// receives the exit status once, from the watcher
    exit_rx: Receiver<Option<ExitStatus>>,
    watcher: JoinHandle<()>,
}

impl RunningProcess {
    fn join_watcher(self) {
        join_thread(self.watcher);
    }
}

/// Supervises a single child process running an external executable
pub struct ProcessSupervisor {
    path: PathBuf,
    args: Vec<String>,
    stdio: StdioBindings,
    stop_timeout: Duration,
    /// pid of the running process, or `PID_STOPPED`
    pid: Arc<AtomicI32>,
    /// held for the whole duration of `start` and `stop`
    running: Mutex<Option<RunningProcess>>,
}

impl ProcessSupervisor {
    /// Supervisor of `path` started with `args`
    pub fn new(path: impl Into<PathBuf>, args: Vec<String>, stdio: StdioBindings) -> Self {
        ProcessSupervisor {
            path: path.into(),
            args,
            stdio,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            pid: Arc::new(AtomicI32::new(PID_STOPPED)),
            running: Mutex::new(None),
        }
    }

    /// Supervisor of the binary of a version. Embedded binaries are extracted
    /// under `config.bin_dir` if not done yet.
    pub fn from_descriptor(
        descriptor: &BinaryDescriptor,
        program_args: &[String],
        config: &SupervisorConfig,
    ) -> SupervisorResult<Self> {
        let path = descriptor.resolve_path(&config.bin_dir)?;
        Ok(
            ProcessSupervisor::new(path, descriptor.command_line(program_args), config.stdio.clone())
                .with_stop_timeout(config.stop_timeout),
        )
    }

    /// Change the grace period between interrupt and kill
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Path of the supervised executable
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid of the running process, `PID_STOPPED` if none
    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::SeqCst)
    }

    /// Whether a process is currently running
    pub fn is_running(&self) -> bool {
        self.pid() != PID_STOPPED
    }

    /// Launch the executable. Returns once the OS created the process.
    pub fn start(&self) -> SupervisorResult<()> {
        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            if self.pid() == previous.pid {
                let pid = previous.pid;
                *running = Some(previous);
                return Err(SupervisorError::AlreadyRunning(pid));
            }
            // the previous process exited by itself, its watcher is done
            previous.join_watcher();
        }

        let mut command = Command::new(&self.path);
        command
            .args(&self.args)
            .stdin(self.stdio.stdin.to_stdio()?)
            .stdout(self.stdio.stdout.to_stdio()?)
            .stderr(self.stdio.stderr.to_stdio()?);
        // own process group: an interrupt typed in the node's terminal must not
        // reach the child directly, the node stops it itself
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        // watcher first: a child never runs unwatched
        let (child_tx, child_rx) = crossbeam_channel::bounded::<Child>(1);
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        let pid_slot = self.pid.clone();
        let watcher = thread::Builder::new()
            .name(format!("{} watcher", self.label()))
            .spawn(move || {
                let Ok(mut child) = child_rx.recv() else {
                    return;
                };
                let pid = child.id() as i32;
                let status = match child.wait() {
                    Ok(status) => {
                        info!(pid, %status, "supervised process exited");
                        Some(status)
                    }
                    Err(err) => {
                        warn!(pid, "could not wait for supervised process: {}", err);
                        None
                    }
                };
                if pid_slot
                    .compare_exchange(pid, PID_STOPPED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    debug!(pid, "pid reset by watcher");
                }
                // nobody may be listening anymore
                let _ = exit_tx.send(status);
            })?;

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                drop(child_tx);
                join_thread(watcher);
                return Err(SupervisorError::Spawn {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let pid = child.id() as i32;
        forward_output(&mut child, &self.stdio, &self.label());
        self.pid.store(pid, Ordering::SeqCst);
        if let Err(SendError(mut child)) = child_tx.send(child) {
            warn!(pid, "process watcher is gone, killing the process");
            let _ = child.kill();
            let _ = child.wait();
            self.pid.store(PID_STOPPED, Ordering::SeqCst);
            join_thread(watcher);
            return Err(SupervisorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("process watcher of pid {} is gone", pid),
            )));
        }
        info!(pid, path = %self.path.display(), args = ?self.args, "started supervised process");

        *running = Some(RunningProcess {
            pid,
            exit_rx,
            watcher,
        });
        Ok(())
    }

    /// Interrupt the running process and wait for it to exit, killing it if it
    /// is still alive after the stop timeout. No-op if nothing is running.
    pub fn stop(&self) -> SupervisorResult<()> {
        let mut running = self.running.lock();
        let Some(process) = running.take() else {
            return Ok(());
        };
        let pid = process.pid;

        if process.exit_rx.try_recv().is_err() && self.pid() == pid {
            info!(pid, "stopping supervised process");
            let exited = match send_signal(pid, Signal::Interrupt) {
                Ok(()) => wait_exit_on(&process.exit_rx, self.stop_timeout),
                Err(err) => {
                    warn!(pid, "failed to interrupt, attempting to kill: {}", err);
                    false
                }
            };
            if !exited {
                warn!(
                    pid,
                    "process did not exit within {:?}, force killing", self.stop_timeout
                );
                if let Err(err) = send_signal(pid, Signal::Kill) {
                    *running = Some(process);
                    return Err(err);
                }
                // a killed process cannot linger: wait for the watcher to reap it
                let _ = process.exit_rx.recv();
            } else if let Err(err) = send_signal(pid, Signal::Kill) {
                // background children of the process survive an interrupt
                debug!(pid, "could not kill what remains of the process group: {}", err);
            }
        }

        if self
            .pid
            .compare_exchange(pid, PID_STOPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(pid, "pid reset by stop");
        }
        process.join_watcher();
        info!(pid, "supervised process stopped");
        Ok(())
    }

    /// Wait up to `timeout` for the running process to exit on its own.
    /// Returns its exit status if it exited (and could be observed) in time.
    pub fn wait_exit(&self, timeout: Duration) -> Option<ExitStatus> {
        let exit_rx = self.running.lock().as_ref()?.exit_rx.clone();
        match exit_rx.recv_timeout(timeout) {
            Ok(status) => status,
            Err(_) => None,
        }
    }

    /// Command running the executable with `args` and the configured stdin
    /// and stderr, writing its output to `stdout`. Not started.
    pub fn build_command(&self, args: &[String], stdout: Stdio) -> SupervisorResult<Command> {
        let mut command = Command::new(&self.path);
        command
            .args(args)
            .stdin(self.stdio.stdin.to_stdio()?)
            .stdout(stdout)
            .stderr(self.stdio.stderr.to_stdio()?);
        Ok(command)
    }

    /// Run the executable once with `args` and collect its output
    pub fn run_one_shot(&self, args: &[String]) -> SupervisorResult<Output> {
        let mut command = self.build_command(args, Stdio::piped())?;
        command.stdin(Stdio::null()).stderr(Stdio::piped());
        let output = command.output().map_err(|source| SupervisorError::Spawn {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            path = %self.path.display(),
            ?args,
            status = %output.status,
            "one-shot command finished"
        );
        Ok(output)
    }

    fn label(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("could not stop supervised process on drop: {}", err);
        }
    }
}

fn join_thread(watcher: JoinHandle<()>) {
    if let Err(err) = watcher.join() {
        warn!("process watcher panicked: {:?}", err);
    }
}

/// true if the watcher reported an exit (or is gone) within `timeout`
fn wait_exit_on(exit_rx: &Receiver<Option<ExitStatus>>, timeout: Duration) -> bool {
    match exit_rx.recv_timeout(timeout) {
        Ok(_) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

#[derive(Clone, Copy, Debug)]
enum Signal {
    Interrupt,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: i32, signal: Signal) -> SupervisorResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal as NixSignal};
    use nix::unistd::Pid;

    let (nix_signal, name) = match signal {
        Signal::Interrupt => (NixSignal::SIGINT, "SIGINT"),
        Signal::Kill => (NixSignal::SIGKILL, "SIGKILL"),
    };
    // the whole group: shells defer interrupts until their foreground child exits
    match killpg(Pid::from_raw(pid), nix_signal) {
        // already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(SupervisorError::Signal {
            pid,
            signal: name,
            reason: errno.desc().to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: i32, signal: Signal) -> SupervisorResult<()> {
    Err(SupervisorError::Signal {
        pid,
        signal: match signal {
            Signal::Interrupt => "interrupt",
            Signal::Kill => "kill",
        },
        reason: "signals are only supported on unix".to_string(),
    })
}
