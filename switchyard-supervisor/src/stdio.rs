// Copyright (c) 2022 MASSA LABS <info@massa.net>

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::thread;

use tracing::{info, warn};

const STDOUT_TAG: &str = "stdout";
const STDERR_TAG: &str = "stderr";

/// Where the supervised process reads its input from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InputBinding {
    /// the node's own standard input
    #[default]
    Inherit,
    /// nothing
    Null,
    /// a file
    File(PathBuf),
}

/// Where an output stream of the supervised process goes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputBinding {
    /// the node's own stream
    #[default]
    Inherit,
    /// discarded
    Null,
    /// appended to a file
    File(PathBuf),
    /// forwarded line by line to tracing
    Log,
}

/// Standard stream bindings of a supervised process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StdioBindings {
    /// standard input
    pub stdin: InputBinding,
    /// standard output
    pub stdout: OutputBinding,
    /// standard error
    pub stderr: OutputBinding,
}

impl StdioBindings {
    /// Every stream discarded
    pub fn null() -> Self {
        StdioBindings {
            stdin: InputBinding::Null,
            stdout: OutputBinding::Null,
            stderr: OutputBinding::Null,
        }
    }
}

impl InputBinding {
    pub(crate) fn to_stdio(&self) -> std::io::Result<Stdio> {
        Ok(match self {
            InputBinding::Inherit => Stdio::inherit(),
            InputBinding::Null => Stdio::null(),
            InputBinding::File(path) => Stdio::from(OpenOptions::new().read(true).open(path)?),
        })
    }
}

impl OutputBinding {
    pub(crate) fn to_stdio(&self) -> std::io::Result<Stdio> {
        Ok(match self {
            OutputBinding::Inherit => Stdio::inherit(),
            OutputBinding::Null => Stdio::null(),
            OutputBinding::File(path) => Stdio::from(
                OpenOptions::new().create(true).append(true).open(path)?,
            ),
            OutputBinding::Log => Stdio::piped(),
        })
    }
}

/// Start forwarding the piped output streams of a freshly spawned child.
/// Forwarders end by themselves once the child closes its end of the pipe.
pub(crate) fn forward_output(child: &mut Child, stdio: &StdioBindings, label: &str) {
    if stdio.stdout == OutputBinding::Log {
        if let Some(stdout) = child.stdout.take() {
            spawn_stream_forwarder(stdout, label.to_string(), STDOUT_TAG);
        }
    }
    if stdio.stderr == OutputBinding::Log {
        if let Some(stderr) = child.stderr.take() {
            spawn_stream_forwarder(stderr, label.to_string(), STDERR_TAG);
        }
    }
}

fn spawn_stream_forwarder(stream: impl Read + Send + 'static, label: String, tag: &'static str) {
    let thread_label = label.clone();
    let spawned = thread::Builder::new()
        .name(format!("{} {} forwarder", label, tag))
        .spawn(move || {
            let label = thread_label;
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                match line {
                    Ok(line) if tag == STDERR_TAG => {
                        warn!(target: "switchyard::process", label = %label, "[{}] {}", tag, line)
                    }
                    Ok(line) => {
                        info!(target: "switchyard::process", label = %label, "[{}] {}", tag, line)
                    }
                    Err(err) => {
                        warn!(target: "switchyard::process", label = %label, "could not read {}: {}", tag, err);
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        warn!("could not spawn {} forwarder for {}: {}", tag, label, err);
    }
}
