// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Binary descriptors and materialization of embedded payloads.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{SupervisorError, SupervisorResult};

/// Operating system and CPU architecture a payload was built for
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Platform {
    /// as in `std::env::consts::OS`, e.g. "linux"
    pub os: String,
    /// as in `std::env::consts::ARCH`, e.g. "x86_64"
    pub arch: String,
}

impl Platform {
    /// A platform from its os and arch names
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Platform {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform the node is running on
    pub fn current() -> Self {
        Platform::new(std::env::consts::OS, std::env::consts::ARCH)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Gzipped tar archives of one binary version, one per platform
#[derive(Clone, Debug)]
pub struct EmbeddedBinaries {
    version: String,
    payloads: HashMap<Platform, Arc<[u8]>>,
}

impl EmbeddedBinaries {
    /// No payload yet for `version` (e.g. "v3.10.0")
    pub fn new(version: impl Into<String>) -> Self {
        EmbeddedBinaries {
            version: version.into(),
            payloads: HashMap::new(),
        }
    }

    /// Add the payload of a platform
    pub fn with_payload(mut self, platform: Platform, payload: impl Into<Arc<[u8]>>) -> Self {
        self.payloads.insert(platform, payload.into());
        self
    }

    /// Version name, also the name of the extraction directory
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Payload of the given platform. An empty payload counts as absent.
    pub fn payload_for(&self, platform: &Platform) -> SupervisorResult<&[u8]> {
        match self.payloads.get(platform) {
            Some(payload) if !payload.is_empty() => Ok(&payload[..]),
            _ => Err(SupervisorError::NoBinaryForPlatform {
                version: self.version.clone(),
                platform: platform.clone(),
            }),
        }
    }

    /// Extract the payload of the running platform under `bin_dir` and
    /// return the path of the executable
    pub fn materialize(&self, bin_dir: &Path) -> SupervisorResult<PathBuf> {
        self.materialize_for(&Platform::current(), bin_dir)
    }

    /// Extract the payload of `platform` under `bin_dir/<version>` unless
    /// already extracted, then return the path of the executable it contains
    pub fn materialize_for(&self, platform: &Platform, bin_dir: &Path) -> SupervisorResult<PathBuf> {
        let payload = self.payload_for(platform)?;
        let target = bin_dir.join(&self.version);
        if target.is_dir() {
            debug!("binary {} already extracted in {}", self.version, target.display());
        } else {
            self.extract(payload, bin_dir, &target)?;
        }
        find_executable(&target, &self.version)
    }

    fn extract(&self, payload: &[u8], bin_dir: &Path, target: &Path) -> SupervisorResult<()> {
        info!(
            "extracting binary {} into {}",
            self.version,
            target.display()
        );
        fs::create_dir_all(bin_dir)?;
        // extract next to the target, then move it in place: a half-extracted
        // directory must never be mistaken for a complete one
        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(bin_dir)?;
        let mut archive = tar::Archive::new(GzDecoder::new(payload));
        archive.set_preserve_permissions(true);
        archive
            .unpack(staging.path())
            .map_err(|source| SupervisorError::Extraction {
                version: self.version.clone(),
                source,
            })?;
        let staging_path = staging.keep();
        if let Err(err) = fs::rename(&staging_path, target) {
            let _ = fs::remove_dir_all(&staging_path);
            // somebody else extracted the same version meanwhile
            if !target.is_dir() {
                return Err(err.into());
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}

/// First executable file under `dir`, in file name order
fn find_executable(dir: &Path, version: &str) -> SupervisorResult<PathBuf> {
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_executable(&entry.metadata()?) {
            return Ok(entry.into_path());
        }
    }
    Err(SupervisorError::NoExecutableInArchive {
        version: version.to_string(),
        dir: dir.to_path_buf(),
    })
}

/// Where the executable of a version comes from
#[derive(Clone, Debug)]
pub enum BinarySource {
    /// already on disk
    Path(PathBuf),
    /// extracted from an embedded payload on first use
    Embedded(EmbeddedBinaries),
}

/// Everything needed to run the binary of one application version
#[derive(Clone, Debug)]
pub struct BinaryDescriptor {
    /// human readable name, e.g. "v3.10.0"
    pub name: String,
    /// executable location
    pub source: BinarySource,
    /// arguments placed before the forwarded program arguments
    pub start_args: Vec<String>,
    /// one-shot commands run before starting the binary
    pub pre_handlers: Vec<Vec<String>>,
}

impl BinaryDescriptor {
    /// Binary already on disk, started with `start`
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        BinaryDescriptor {
            name: name.into(),
            source: BinarySource::Path(path.into()),
            start_args: vec!["start".to_string()],
            pre_handlers: Vec::new(),
        }
    }

    /// Binary extracted from embedded payloads, started with `start`
    pub fn embedded(binaries: EmbeddedBinaries) -> Self {
        BinaryDescriptor {
            name: binaries.version().to_string(),
            source: BinarySource::Embedded(binaries),
            start_args: vec!["start".to_string()],
            pre_handlers: Vec::new(),
        }
    }

    /// Replace the start arguments
    pub fn with_start_args(mut self, args: Vec<String>) -> Self {
        self.start_args = args;
        self
    }

    /// Add a one-shot command to run before starting
    pub fn with_pre_handler(mut self, args: Vec<String>) -> Self {
        self.pre_handlers.push(args);
        self
    }

    /// Full argument list of the long-lived process
    pub fn command_line(&self, program_args: &[String]) -> Vec<String> {
        self.start_args
            .iter()
            .chain(program_args.iter())
            .cloned()
            .collect()
    }

    /// Path of the executable, extracting it under `bin_dir` if needed
    pub fn resolve_path(&self, bin_dir: &Path) -> SupervisorResult<PathBuf> {
        match &self.source {
            BinarySource::Path(path) => Ok(path.clone()),
            BinarySource::Embedded(binaries) => binaries.materialize(bin_dir),
        }
    }
}
