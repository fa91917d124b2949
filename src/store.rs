//! Status records: the state a service reports about itself, read back by the
//! standard backend.
use std::{
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{SERVICES_DIR_NAME, STATUS_EXTENSION},
    error::StoreError,
    runtime,
    state::ServiceState,
};

/// Last state reported for a service process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// PID of the service process.
    pub pid: u32,
    /// State entered most recently.
    pub state: ServiceState,
    /// Time of the last update.
    pub updated_at: DateTime<Utc>,
}

/// File-backed status record of a single service.
///
/// Writers hold an exclusive lock on a sidecar lock file and replace the record
/// atomically, so readers never observe a partial write.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    /// Store for `name` inside the runtime state directory.
    pub fn new(name: &str) -> Self {
        let path = runtime::state_dir()
            .join(SERVICES_DIR_NAME)
            .join(format!("{name}.{STATUS_EXTENSION}"));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record, `None` when the service never reported.
    pub fn load(&self) -> Result<Option<StatusRecord>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Records that process `pid` entered `state`.
    pub fn record(&self, pid: u32, state: ServiceState) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        self.write(&StatusRecord {
            pid,
            state,
            updated_at: Utc::now(),
        })
    }

    /// Records a freshly launched process as `Starting`, unless that process already
    /// reported a state of its own.
    ///
    /// Returns whether the record was written.
    pub fn record_launch(&self, pid: u32) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        if let Ok(Some(existing)) = self.load()
            && existing.pid == pid
        {
            return Ok(false);
        }

        self.write(&StatusRecord {
            pid,
            state: ServiceState::Starting,
            updated_at: Utc::now(),
        })?;
        Ok(true)
    }

    /// Removes the record.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn lock(&self) -> Result<LockGuard, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.with_extension("lock"))?;
        file.lock_exclusive()?;
        Ok(LockGuard(file))
    }

    fn write(&self, record: &StatusRecord) -> Result<(), StoreError> {
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, serde_json::to_string_pretty(record)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

struct LockGuard(File);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}
