// Copyright (c) 2022 MASSA LABS <info@massa.net>

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use flate2::write::GzEncoder;
use flate2::Compression;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serial_test::serial;
use tempfile::TempDir;

use crate::{
    BinaryDescriptor, EmbeddedBinaries, OutputBinding, Platform, ProcessSupervisor,
    StdioBindings, SupervisorConfig, SupervisorError, PID_STOPPED,
};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn supervisor(path: &Path) -> ProcessSupervisor {
    ProcessSupervisor::new(path, Vec::new(), StdioBindings::null())
}

fn wait_until_stopped(supervisor: &ProcessSupervisor, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if supervisor.pid() == PID_STOPPED {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

fn is_alive(pid: i32) -> bool {
    // orphans may stay zombies if nothing reaps them
    if let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) {
        return stat
            .rsplit_once(") ")
            .map_or(true, |(_, rest)| !rest.starts_with('Z'));
    }
    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

fn tar_gz(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

#[test]
#[serial]
fn test_pid_reset_after_natural_exit() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "short", "sleep 0.3\nexit 3");
    let supervisor = supervisor(&path);
    assert_eq!(supervisor.pid(), PID_STOPPED);

    supervisor.start().unwrap();
    assert!(supervisor.pid() > 0);
    assert!(supervisor.is_running());

    let status = supervisor
        .wait_exit(Duration::from_secs(5))
        .expect("process should have exited");
    assert_eq!(status.code(), Some(3));
    assert_eq!(supervisor.pid(), PID_STOPPED);
    // nothing left to stop
    supervisor.stop().unwrap();
    assert_eq!(supervisor.pid(), PID_STOPPED);
}

#[test]
#[serial]
fn test_start_failure_keeps_sentinel() {
    let dir = TempDir::new().unwrap();
    let supervisor = supervisor(&dir.path().join("does-not-exist"));
    let err = supervisor.start().unwrap_err();
    assert_matches!(err, SupervisorError::Spawn { .. });
    assert!(err.to_string().contains("failed to start"));
    assert_eq!(supervisor.pid(), PID_STOPPED);
}

#[test]
#[serial]
fn test_stop_running_process() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "long", "exec sleep 30");
    let supervisor = supervisor(&path).with_stop_timeout(Duration::from_secs(2));
    supervisor.start().unwrap();
    let pid = supervisor.pid();
    assert!(pid > 0);
    assert!(is_alive(pid));

    let started = Instant::now();
    supervisor.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.pid(), PID_STOPPED);
    assert!(!is_alive(pid));
}

#[test]
#[serial]
fn test_stop_interrupts_shell_waiting_on_child() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "short", "sleep 1\nexit 0");
    let supervisor = supervisor(&path).with_stop_timeout(Duration::from_secs(5));
    supervisor.start().unwrap();
    assert!(supervisor.pid() > 0);

    let started = Instant::now();
    supervisor.stop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(supervisor.pid(), PID_STOPPED);
}

#[test]
#[serial]
fn test_stop_kills_background_children() {
    let dir = TempDir::new().unwrap();
    let child_pid_file = dir.path().join("child.pid");
    let body = format!(
        "sleep 30 &\necho $! > \"{}\"\nsleep 30",
        child_pid_file.display()
    );
    let path = write_script(dir.path(), "parent", &body);
    let supervisor = supervisor(&path).with_stop_timeout(Duration::from_secs(5));
    supervisor.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let child_pid = loop {
        if let Ok(content) = fs::read_to_string(&child_pid_file) {
            if let Ok(pid) = content.trim().parse::<i32>() {
                break pid;
            }
        }
        assert!(Instant::now() < deadline, "background child never started");
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(is_alive(child_pid));

    supervisor.stop().unwrap();
    assert_eq!(supervisor.pid(), PID_STOPPED);
    let deadline = Instant::now() + Duration::from_secs(2);
    while is_alive(child_pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!is_alive(child_pid));
}

#[test]
#[serial]
fn test_stop_kills_process_ignoring_interrupt() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "stubborn", "trap '' INT\nexec sleep 30");
    let supervisor = supervisor(&path).with_stop_timeout(Duration::from_millis(500));
    supervisor.start().unwrap();
    let pid = supervisor.pid();
    // let the shell install its trap
    std::thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    supervisor.stop().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.pid(), PID_STOPPED);
    assert!(!is_alive(pid));
}

#[test]
#[serial]
fn test_stop_when_not_running() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "never", "exit 0");
    let supervisor = supervisor(&path);
    supervisor.stop().unwrap();
    assert_eq!(supervisor.pid(), PID_STOPPED);
}

#[test]
#[serial]
fn test_start_twice_and_restart() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "long", "exec sleep 30");
    let supervisor = supervisor(&path);
    supervisor.start().unwrap();
    let first_pid = supervisor.pid();
    assert_matches!(
        supervisor.start(),
        Err(SupervisorError::AlreadyRunning(pid)) if pid == first_pid
    );
    assert_eq!(supervisor.pid(), first_pid);

    supervisor.stop().unwrap();
    supervisor.start().unwrap();
    let second_pid = supervisor.pid();
    assert!(second_pid > 0);
    assert_ne!(second_pid, first_pid);
    supervisor.stop().unwrap();
    assert_eq!(supervisor.pid(), PID_STOPPED);
}

#[test]
#[serial]
fn test_restart_after_crash() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "crash", "exit 1");
    let supervisor = supervisor(&path);
    supervisor.start().unwrap();
    assert!(wait_until_stopped(&supervisor, Duration::from_secs(5)));
    // the crashed process does not prevent a new start
    supervisor.start().unwrap();
    assert!(wait_until_stopped(&supervisor, Duration::from_secs(5)));
}

#[test]
#[serial]
fn test_build_command_and_one_shot() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "echoer", "echo \"$@\"");
    let supervisor = supervisor(&path);

    let output = supervisor
        .build_command(&["version".to_string()], Stdio::piped())
        .unwrap()
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "version");

    let output = supervisor
        .run_one_shot(&["migrate".to_string(), "--dry".to_string()])
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "migrate --dry");
    // one-shot commands never touch the supervised process
    assert_eq!(supervisor.pid(), PID_STOPPED);
}

#[test]
#[serial]
fn test_output_forwarded_to_logs() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "chatty", "echo hello\necho oops >&2");
    let stdio = StdioBindings {
        stdout: OutputBinding::Log,
        stderr: OutputBinding::Log,
        ..StdioBindings::null()
    };
    let supervisor = ProcessSupervisor::new(&path, Vec::new(), stdio);
    supervisor.start().unwrap();
    let status = supervisor.wait_exit(Duration::from_secs(5)).unwrap();
    assert!(status.success());
}

#[test]
#[serial]
fn test_output_appended_to_file() {
    let dir = TempDir::new().unwrap();
    let path = write_script(dir.path(), "chatty", "echo line");
    let log_path = dir.path().join("out.log");
    let stdio = StdioBindings {
        stdout: OutputBinding::File(log_path.clone()),
        ..StdioBindings::null()
    };
    let supervisor = ProcessSupervisor::new(&path, Vec::new(), stdio);
    for _ in 0..2 {
        supervisor.start().unwrap();
        supervisor.wait_exit(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(fs::read_to_string(&log_path).unwrap(), "line\nline\n");
}

#[test]
#[serial]
fn test_embedded_binary_extraction() {
    let dir = TempDir::new().unwrap();
    let payload = tar_gz(&[
        ("app/README", "docs", 0o644),
        ("app/bin/appd", "#!/bin/sh\necho v2.0.0 \"$@\"\n", 0o755),
    ]);
    let platform = Platform::current();
    let binaries = EmbeddedBinaries::new("v2.0.0").with_payload(platform.clone(), payload);
    let bin_dir = dir.path().join("bin");

    let path = binaries.materialize_for(&platform, &bin_dir).unwrap();
    assert_eq!(path, bin_dir.join("v2.0.0").join("app").join("bin").join("appd"));
    // extracted once, reused afterwards
    assert_eq!(binaries.materialize_for(&platform, &bin_dir).unwrap(), path);

    let descriptor = BinaryDescriptor::embedded(binaries);
    let config = SupervisorConfig {
        stdio: StdioBindings::null(),
        ..SupervisorConfig::new(&bin_dir)
    };
    let supervisor =
        ProcessSupervisor::from_descriptor(&descriptor, &["--home".to_string()], &config)
            .unwrap();
    assert_eq!(supervisor.path(), path.as_path());
    let output = supervisor.run_one_shot(&["version".to_string()]).unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "v2.0.0 version");
}

#[test]
fn test_missing_platform_payload() {
    let dir = TempDir::new().unwrap();
    let binaries = EmbeddedBinaries::new("v1.0.0")
        .with_payload(Platform::new("linux", "x86_64"), tar_gz(&[]))
        .with_payload(Platform::new("darwin", "aarch64"), Vec::new());
    assert_matches!(
        binaries.materialize_for(&Platform::new("plan9", "mips"), dir.path()),
        Err(SupervisorError::NoBinaryForPlatform { .. })
    );
    // an empty payload is the same as no payload
    let err = binaries
        .materialize_for(&Platform::new("darwin", "aarch64"), dir.path())
        .unwrap_err();
    assert!(err.to_string().contains("darwin/aarch64"));
    assert!(!dir.path().join("v1.0.0").exists());
}

#[test]
fn test_archive_without_executable() {
    let dir = TempDir::new().unwrap();
    let platform = Platform::current();
    let binaries = EmbeddedBinaries::new("v1.0.0")
        .with_payload(platform.clone(), tar_gz(&[("notes.txt", "hi", 0o644)]));
    assert_matches!(
        binaries.materialize_for(&platform, dir.path()),
        Err(SupervisorError::NoExecutableInArchive { .. })
    );
}

#[test]
fn test_descriptor_command_line() {
    let descriptor = BinaryDescriptor::from_path("v1", "/usr/bin/appd")
        .with_pre_handler(vec!["migrate".to_string()]);
    assert_eq!(
        descriptor.command_line(&["--home".to_string(), "/data".to_string()]),
        vec!["start", "--home", "/data"]
    );
    let descriptor = descriptor.with_start_args(Vec::new());
    assert!(descriptor.command_line(&[]).is_empty());
    assert_eq!(descriptor.pre_handlers.len(), 1);
}
