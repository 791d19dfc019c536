//! Inter-process advisory file locking for [`crate::metadata::MetadataStore`].
//!
//! A separate `<file>.lock` sentinel is opened and `flock`'d rather than
//! locking the data file directly — a range lock on the data file itself
//! would stop protecting anything the moment that file gets renamed out
//! from under it by the atomic-replace step.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::SshmError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ACQUIRE_DEADLINE: Duration = Duration::from_secs(5);

pub enum Mode {
	Shared,
	Exclusive,
}

/// RAII guard over an advisory lock on a `.lock` sentinel file. Dropping
/// it unlocks and closes the file descriptor, releasing the lock.
pub struct FileLock {
	_file: File,
	path: PathBuf,
}

impl FileLock {
	/// Derive the sentinel path for a data file (`metadata.json` ->
	/// `metadata.json.lock`).
	pub fn sentinel_path(data_path: &Path) -> PathBuf {
		let mut s = data_path.as_os_str().to_os_string();
		s.push(".lock");
		PathBuf::from(s)
	}

	/// Non-blocking acquisition with 100ms polling, failing with
	/// `SshmError::LockTimeout` after the 5 second deadline. Any lock error other
	/// than "would block" is fatal and returned immediately.
	#[allow(unsafe_code)] // flock() via libc has no safe wrapper in std
	pub fn acquire(data_path: &Path, mode: Mode, op: &str) -> Result<Self, SshmError> {
		let lock_path = Self::sentinel_path(data_path);
		let file = OpenOptions::new()
			.create(true)
			.read(true)
			.write(true)
			.mode(0o600)
			.open(&lock_path)
			.map_err(|e| SshmError::io(op, Some(&lock_path), e))?;

		let flock_op = match mode {
			Mode::Shared => libc::LOCK_SH,
			Mode::Exclusive => libc::LOCK_EX,
		};

		let deadline = Instant::now() + ACQUIRE_DEADLINE;
		loop {
			// SAFETY: `file`'s fd is valid for the duration of this call and
			// flock() has no side effects beyond the lock table entry.
			let rc = unsafe { libc::flock(file.as_raw_fd(), flock_op | libc::LOCK_NB) };
			if rc == 0 {
				trace!(path = %lock_path.display(), "lock acquired");
				return Ok(FileLock { _file: file, path: lock_path });
			}
			let err = std::io::Error::last_os_error();
			if err.kind() != std::io::ErrorKind::WouldBlock {
				return Err(SshmError::io(op, Some(&lock_path), err));
			}
			if Instant::now() >= deadline {
				debug!(path = %lock_path.display(), "lock acquisition timed out");
				return Err(SshmError::LockTimeout {
					op: op.to_string(),
					path: lock_path.display().to_string(),
				});
			}
			std::thread::sleep(POLL_INTERVAL);
		}
	}
}

impl Drop for FileLock {
	#[allow(unsafe_code)]
	fn drop(&mut self) {
		// SAFETY: unlocking a held lock on our own fd is always safe.
		unsafe {
			libc::flock(self._file.as_raw_fd(), libc::LOCK_UN);
		}
		trace!(path = %self.path.display(), "lock released");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn acquire_and_release() {
		let dir = TempDir::new().unwrap();
		let data = dir.path().join("metadata.json");
		let lock = FileLock::acquire(&data, Mode::Exclusive, "test").unwrap();
		drop(lock);
		let lock2 = FileLock::acquire(&data, Mode::Exclusive, "test").unwrap();
		drop(lock2);
	}

	#[test]
	fn shared_locks_do_not_conflict() {
		let dir = TempDir::new().unwrap();
		let data = dir.path().join("metadata.json");
		let l1 = FileLock::acquire(&data, Mode::Shared, "test").unwrap();
		let l2 = FileLock::acquire(&data, Mode::Shared, "test").unwrap();
		drop(l1);
		drop(l2);
	}

	#[test]
	fn exclusive_lock_blocks_second_exclusive_attempt_within_process() {
		// flock() is per-open-file-description, so within the same process a
		// second independent `File::open` contends for the same lock.
		let dir = TempDir::new().unwrap();
		let data = dir.path().join("metadata.json");
		let held = FileLock::acquire(&data, Mode::Exclusive, "test").unwrap();

		let start = Instant::now();
		let result = {
			// Spawn a thread contending for the same lock, then release it
			// from the main thread so the contender unblocks well inside
			// the acquisition deadline.
			let data2 = data.clone();
			let handle = std::thread::spawn(move || FileLock::acquire(&data2, Mode::Exclusive, "test"));
			std::thread::sleep(Duration::from_millis(50));
			drop(held);
			handle.join().unwrap()
		};
		assert!(result.is_ok());
		assert!(start.elapsed() < ACQUIRE_DEADLINE);
	}
}

// vim: ts=4
