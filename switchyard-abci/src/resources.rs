// Copyright (c) 2022 MASSA LABS <info@massa.net>

//! Resources opened once at process start and handed to every application version.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{AppError, AppResult};

/// Storage handle shared by all application versions
pub trait AppDb: Send + Sync + Debug {
    /// Read a value
    fn get(&self, key: &[u8]) -> AppResult<Option<Vec<u8>>>;

    /// Insert or update a value
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> AppResult<()>;

    /// Remove a value, no-op if absent
    fn delete(&self, key: &[u8]) -> AppResult<()>;

    /// All entries whose key starts with `prefix`, in key order
    fn prefix_iterator(&self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>;
}

/// In-memory database
#[derive(Debug, Default)]
pub struct MemoryDb {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    /// Creates an empty database
    pub fn new() -> Self {
        Self::default()
    }
}

impl AppDb for MemoryDb {
    fn get(&self, key: &[u8]) -> AppResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> AppResult<()> {
        self.entries.write().insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> AppResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn prefix_iterator(&self, prefix: &[u8]) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        // snapshot the matching range so the lock is not held by the iterator
        let matching: Vec<(Vec<u8>, Vec<u8>)> = self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(matching.into_iter())
    }
}

/// Append-only sink for store tracing, shared by every version
#[derive(Clone, Debug)]
pub struct TraceStore {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl TraceStore {
    /// Opens (or creates) the trace file in append mode
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(TraceStore {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Path of the trace file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line
    pub fn record(&self, line: &str) -> AppResult<()> {
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

/// Everything an application version is built from.
///
/// Cloning is cheap: the database and trace store are shared handles.
#[derive(Clone, Debug)]
pub struct AppResources {
    /// node home directory
    pub home_dir: PathBuf,
    /// storage handle, never reopened on upgrade
    pub db: Arc<dyn AppDb>,
    /// optional store tracing sink
    pub trace_store: Option<TraceStore>,
    /// free-form application options
    pub options: Arc<BTreeMap<String, String>>,
}

impl AppResources {
    /// Resources backed by the given database, without tracing nor options
    pub fn new(home_dir: impl Into<PathBuf>, db: Arc<dyn AppDb>) -> Self {
        AppResources {
            home_dir: home_dir.into(),
            db,
            trace_store: None,
            options: Arc::new(BTreeMap::new()),
        }
    }

    /// Attach a trace store
    pub fn with_trace_store(mut self, trace_store: TraceStore) -> Self {
        self.trace_store = Some(trace_store);
        self
    }

    /// Attach application options
    pub fn with_options(mut self, options: BTreeMap<String, String>) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Read an application option
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Reads a value and fails if it is absent
    pub fn require(&self, key: &[u8]) -> AppResult<Vec<u8>> {
        self.db
            .get(key)?
            .ok_or_else(|| AppError::StorageError(format!("missing key {:?}", key)))
    }
}
