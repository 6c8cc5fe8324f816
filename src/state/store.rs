use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use directories::BaseDirs;
use fs2::FileExt;

use super::{SessionKey, SessionState};
use crate::config::StateConfig;
use crate::error::StateError;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

// ── File-backed session state store ───────────────────────────────

/// Durable per-session compliance record, one JSON file per session key.
///
/// There is no long-lived engine process, so cross-invocation exclusivity
/// is an `flock` on a sibling `.lock` file rather than an in-memory
/// singleton. Writes go through a temp file plus atomic rename so a reader
/// never observes a partially written record.
#[derive(Debug)]
pub struct FileStateStore {
    /// Candidate roots, primary first. Remedial delegates may run from a
    /// different working directory, so lookup searches all of them.
    roots: Vec<PathBuf>,
    lock_timeout: Duration,
}

impl FileStateStore {
    pub fn new(config: &StateConfig) -> Self {
        let mut roots = Vec::new();
        if let Ok(root) = std::env::var("TOOLGATE_STATE_DIR") {
            roots.push(PathBuf::from(root));
        }
        if let Some(root) = &config.root {
            roots.push(root.clone());
        }
        if let Some(dirs) = BaseDirs::new() {
            roots.push(dirs.data_local_dir().join("toolgate").join("sessions"));
        }
        roots.push(std::env::temp_dir().join("toolgate-sessions"));
        roots.dedup();
        Self {
            roots,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        }
    }

    /// Store rooted at a single explicit directory (tests, `state` CLI).
    pub fn with_root(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            roots: vec![root.into()],
            lock_timeout,
        }
    }

    fn primary_root(&self) -> &Path {
        // roots is never empty: the temp dir candidate is always pushed
        &self.roots[0]
    }

    fn record_path(root: &Path, key: &SessionKey) -> PathBuf {
        root.join(format!("session-{key}.json"))
    }

    /// Resolve the on-disk location of an existing record, searching every
    /// candidate root.
    pub fn locate(&self, key: &SessionKey) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| Self::record_path(root, key))
            .find(|path| path.is_file())
    }

    /// Load the record for `key`, or a default-initialized one when no
    /// record exists anywhere. A record that exists but fails to parse is
    /// `StateError::Corrupt`, never a silent fresh default.
    pub fn load(&self, key: &SessionKey, session_id: &str) -> Result<SessionState, StateError> {
        match self.locate(key) {
            Some(path) => Self::read_record(&path),
            None => Ok(SessionState::new(session_id)),
        }
    }

    /// Load the record for `key`, failing when none exists. Used by
    /// invocations that must not create a second, divergent record.
    pub fn load_existing(&self, key: &SessionKey) -> Result<SessionState, StateError> {
        let path = self.locate(key).ok_or_else(|| StateError::NotFound {
            key: key.to_string(),
        })?;
        Self::read_record(&path)
    }

    fn read_record(path: &Path) -> Result<SessionState, StateError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| StateError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Atomically persist the record under the primary root.
    pub fn save(&self, key: &SessionKey, state: &SessionState) -> Result<(), StateError> {
        // Keep the record where it already lives so a delegate's save does
        // not fork the session into two roots.
        let path = self
            .locate(key)
            .unwrap_or_else(|| Self::record_path(self.primary_root(), key));
        let dir = path
            .parent()
            .ok_or_else(|| StateError::Unavailable(format!("no parent dir: {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::Unavailable(format!("serialize state: {e}")))?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        fs::write(tmp.path(), raw)?;
        tmp.persist(&path)
            .map_err(|e| StateError::Unavailable(format!("persist {}: {e}", path.display())))?;
        Ok(())
    }

    /// Acquire the exclusive per-session lock, blocking up to the
    /// configured timeout. The guard spans the whole load → evaluate →
    /// persist sequence; expiry is fatal rather than proceeding on a
    /// possibly stale snapshot.
    pub fn lock(&self, key: &SessionKey) -> Result<StateLock, StateError> {
        let root = self
            .locate(key)
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| self.primary_root().to_path_buf());
        fs::create_dir_all(&root)?;
        let lock_path = root.join(format!("session-{key}.lock"));

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(StateLock {
                        file,
                        path: lock_path,
                    });
                }
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if Instant::now() >= deadline {
                        return Err(StateError::LockTimeout {
                            path: lock_path,
                            waited_ms: self.lock_timeout.as_millis() as u64,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(StateError::Io(e)),
            }
        }
    }
}

/// Held exclusive `flock` on a session's lock file. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}
