//! Single-instance execution guard.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use dana_core::{Error, Result};
use fs2::FileExt;
use tracing::{debug, info, warn};

/// Lock files swapped out from under an acquirer before a retry gives up.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Grants at most one live holder per lock identifier.
pub trait ExecutionGuard: Send + Sync {
    /// Try to become the single running instance of `program_name`.
    /// The guard is held until the returned token drops.
    fn acquire(&self, lock_id: &str, program_name: &str) -> Result<GuardToken>;
}

/// Proof of holding an execution guard. Releases it on drop.
pub struct GuardToken {
    label: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl GuardToken {
    pub fn new(label: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for GuardToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardToken")
            .field("label", &self.label)
            .finish()
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// PID-file guard: the lock identifier is the path of the PID file.
///
/// Ownership is an exclusive advisory lock on the file, held for the lifetime
/// of the token; the kernel drops it when the holder exits, so a file left by
/// a dead process is simply re-locked. The `"<pid> <program>"` content is
/// informational only.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidFileGuard;

impl PidFileGuard {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionGuard for PidFileGuard {
    fn acquire(&self, lock_id: &str, program_name: &str) -> Result<GuardToken> {
        let path = PathBuf::from(lock_id);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;

            if let Err(e) = file.try_lock_exclusive() {
                if e.kind() != fs2::lock_contended_error().kind() {
                    return Err(e.into());
                }
                return Err(Error::Lock(format!(
                    "{} is already running ({}, lock {})",
                    program_name,
                    describe_holder(&path),
                    path.display()
                )));
            }

            // The holder we raced with removed the file on release; the lock
            // we got is on an unlinked inode.
            if !is_current(&file, &path)? {
                debug!("Lock file {} was replaced, retrying", path.display());
                continue;
            }

            if let Some((pid, holder)) = read_holder(&path) {
                warn!("Reclaiming lock {} left by {} (pid {})", path.display(), holder, pid);
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            writeln!(file, "{} {}", std::process::id(), program_name)?;
            file.sync_all()?;

            info!("Acquired lock {} for {}", path.display(), program_name);
            let release_path = path.clone();
            return Ok(GuardToken::new(lock_id, move || release(file, &release_path)));
        }

        Err(Error::Lock(format!("could not acquire {}", path.display())))
    }
}

/// Remove the file while still locked, then unlock.
fn release(file: File, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Released lock {}", path.display()),
        Err(e) => warn!("Failed to remove lock {}: {}", path.display(), e),
    }
    if let Err(e) = file.unlock() {
        warn!("Failed to unlock {}: {}", path.display(), e);
    }
}

#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let locked = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(locked.dev() == current.dev() && locked.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn is_current(_file: &File, path: &Path) -> std::io::Result<bool> {
    // Open files cannot be removed here, so the path still names our file.
    Ok(path.exists())
}

fn read_holder(path: &Path) -> Option<(u32, String)> {
    let content = fs::read_to_string(path).ok()?;
    let mut parts = content.split_whitespace();
    let pid = parts.next()?.parse().ok()?;
    let program = parts.next().unwrap_or("unknown").to_string();
    Some((pid, program))
}

fn describe_holder(path: &Path) -> String {
    match read_holder(path) {
        Some((pid, program)) => format!("{} holds it as pid {}", program, pid),
        None => "holder still starting".to_string(),
    }
}
