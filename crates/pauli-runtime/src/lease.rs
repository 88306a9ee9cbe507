//! Advisory lease on a container name.
//!
//! Two invocations in the same project would otherwise race on the same
//! container name. Each one first takes an exclusive `flock` on a lease file
//! keyed by that name. The kernel drops the lock when its holder exits, so a
//! lease left by a dead process is free again without any cleanup. The file
//! itself is never deleted: unlinking it would let a waiter lock an orphaned
//! inode while a newcomer locks a fresh one.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use pauli_common::error::{PauliError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Holder details written into the lease file, for diagnostics only.
#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    owner: Uuid,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// A held lease; released when dropped.
#[derive(Debug)]
pub struct Lease {
    lock: Flock<File>,
    path: PathBuf,
    owner: Uuid,
}

impl Lease {
    /// Takes the lease on `name`, waiting up to `timeout` for a live holder.
    ///
    /// # Errors
    ///
    /// Returns [`PauliError::Lease`] if another live process still holds the
    /// lease after `timeout`, or an I/O error if the lease file is unusable.
    pub async fn acquire(dir: &Path, name: &str, timeout: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| PauliError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!("{name}.lease"));
        let owner = Uuid::new_v4();
        let started = Instant::now();

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| PauliError::Io {
                    path: path.clone(),
                    source,
                })?;

            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => {
                    write_record(&lock, owner).map_err(|source| PauliError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    tracing::debug!(lease = %path.display(), %owner, "lease acquired");
                    return Ok(Self { lock, path, owner });
                }
                Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                    if started.elapsed() >= timeout {
                        return Err(PauliError::Lease {
                            name: name.to_owned(),
                            message: format!(
                                "still held by {} after {}s ({})",
                                holder(&path),
                                timeout.as_secs(),
                                path.display()
                            ),
                        });
                    }
                    tracing::debug!(lease = %path.display(), "lease busy, waiting");
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err((_, errno)) => {
                    return Err(PauliError::Io {
                        path,
                        source: errno.into(),
                    });
                }
            }
        }
    }

    /// Path of the lease file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // The lock itself goes with the file descriptor.
        if let Err(e) = self.lock.set_len(0) {
            tracing::warn!(lease = %self.path.display(), error = %e, "cannot clear lease record");
        }
        tracing::debug!(lease = %self.path.display(), owner = %self.owner, "lease released");
    }
}

fn write_record(lock: &Flock<File>, owner: Uuid) -> std::io::Result<()> {
    let record = LeaseRecord {
        owner,
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let body = serde_json::to_vec(&record).map_err(std::io::Error::other)?;
    let mut file: &File = lock;
    file.set_len(0)?;
    file.write_all(&body)?;
    file.flush()
}

fn read_record(path: &Path) -> Option<LeaseRecord> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Describes the current holder for contention errors.
fn holder(path: &Path) -> String {
    read_record(path).map_or_else(
        || "another invocation".to_owned(),
        |record| format!("pid {} since {}", record.pid, record.acquired_at.to_rfc3339()),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn acquire_writes_record_and_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let lease = Lease::acquire(dir.path(), "proj_build", SHORT).await.unwrap();
        let record = read_record(lease.path()).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.owner, lease.owner);

        let path = lease.path().to_path_buf();
        drop(lease);
        assert!(read_record(&path).is_none());
        let _again = Lease::acquire(dir.path(), "proj_build", SHORT).await.unwrap();
    }

    #[tokio::test]
    async fn live_holder_blocks_until_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let _held = Lease::acquire(dir.path(), "proj_build", SHORT).await.unwrap();
        let err = Lease::acquire(dir.path(), "proj_build", SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, PauliError::Lease { ref name, .. } if name == "proj_build"));
        assert!(err.to_string().contains(&format!("pid {}", std::process::id())));
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = Lease::acquire(dir.path(), "a_build", SHORT).await.unwrap();
        let _b = Lease::acquire(dir.path(), "b_build", SHORT).await.unwrap();
    }

    #[tokio::test]
    async fn record_left_by_dead_holder_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let record = LeaseRecord {
            owner: Uuid::new_v4(),
            pid: 0x7fff_fff0,
            acquired_at: Utc::now(),
        };
        std::fs::write(
            dir.path().join("proj_build.lease"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
        let lease = Lease::acquire(dir.path(), "proj_build", SHORT).await.unwrap();
        assert_ne!(read_record(lease.path()).unwrap().owner, record.owner);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contenders_over_a_dead_holder_take_turns() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let record = LeaseRecord {
            owner: Uuid::new_v4(),
            pid: 0x7fff_fff0,
            acquired_at: Utc::now(),
        };
        std::fs::write(
            dir.path().join("n.lease"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let holders = Arc::clone(&holders);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let lease = Lease::acquire(dir.path(), "n", Duration::from_secs(20))
                        .await
                        .unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let _ = holders.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("n.lease").exists());
    }
}
