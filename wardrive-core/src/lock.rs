//! Advisory lock file next to a store, so maintenance commands cannot clear a
//! store while the acquisition client is writing to it.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::create_parent_dir;

/// Held for as long as the value lives; the lock file is removed on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn acquire(store: &Path) -> Result<Self, StoreError> {
        let path = lock_path(store);
        create_parent_dir(&path)?;
        let mut cleared_stale = false;
        loop {
            match File::options().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", process::id())?;
                    debug!(path = %path.display(), "store lock taken");
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists && !cleared_stale => {
                    if let Some(pid) = live_holder(&path) {
                        return Err(StoreError::InUse {
                            path: store.display().to_string(),
                            pid,
                        });
                    }
                    warn!(path = %path.display(), "removing stale store lock");
                    fs::remove_file(&path)?;
                    cleared_stale = true;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Process currently holding the lock on `store`, if any.
    pub fn holder(store: &Path) -> Option<u32> {
        live_holder(&lock_path(store))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "cannot remove store lock: {err}");
        }
    }
}

fn lock_path(store: &Path) -> PathBuf {
    let mut name = OsString::from(store.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn live_holder(lock: &Path) -> Option<u32> {
    let pid: u32 = fs::read_to_string(lock).ok()?.trim().parse().ok()?;
    if pid == process::id() || process_alive(pid) {
        Some(pid)
    } else {
        None
    }
}

/// Without procfs there is no cheap liveness check; assume the holder lives.
fn process_alive(pid: u32) -> bool {
    if !Path::new("/proc/self").exists() {
        return true;
    }
    Path::new("/proc").join(pid.to_string()).exists()
}
