use anyhow::{Context, Result};
use rand::Rng;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::session::Session;

/// Sessions expire after this much inactivity (by file mtime).
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Session id length: 32 random bytes hex-encoded.
pub const SESSION_ID_LEN: usize = 64;

/// Session storage backend.
pub trait SessionStore: Send + Sync {
    fn new_session(&self) -> Session;
    fn get(&self, sid: &str) -> Option<Session>;
    fn save(&self, session: &mut Session) -> Result<()>;
    fn delete(&self, sid: &str) -> Result<()>;
    fn is_valid_key(&self, sid: &str) -> bool;
    fn cleanup(&self, max_age: Duration) -> Result<usize>;
}

/// One JSON file per session inside a directory created at construction.
///
/// Save and delete are serialised by a store-wide lock; individual sessions
/// are value-owned by their request, so there is no per-session locking
/// here.
pub struct FilesystemSessionStore {
    path: PathBuf,
    renew_missing: bool,
    lock: Mutex<()>,
}

impl FilesystemSessionStore {
    pub fn new(path: impl AsRef<Path>, renew_missing: bool) -> Result<Self> {
        fs::create_dir_all(path.as_ref())
            .with_context(|| format!("failed to create session directory {}", path.as_ref().display()))?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            renew_missing,
            lock: Mutex::new(()),
        })
    }

    fn session_file(&self, sid: &str) -> PathBuf {
        self.path.join(format!("{}.json", sid))
    }
}

impl SessionStore for FilesystemSessionStore {
    fn new_session(&self) -> Session {
        Session::new(generate_session_id())
    }

    /// Load a session by id. An invalid id, a missing file or a malformed
    /// file all follow the `renew_missing` policy: a fresh session, or
    /// `None`.
    fn get(&self, sid: &str) -> Option<Session> {
        let renew = || self.renew_missing.then(|| self.new_session());

        if !self.is_valid_key(sid) {
            return renew();
        }

        let data = match fs::read(self.session_file(sid)) {
            Ok(data) => data,
            Err(_) => return renew(),
        };

        let mut session: Session = match serde_json::from_slice(&data) {
            Ok(session) => session,
            Err(_) => return renew(),
        };

        session.is_new = false;
        session.is_dirty = false;
        session.can_save = true;
        session.touch();
        Some(session)
    }

    /// Persist the session if it is dirty and allowed to save; a clean or
    /// save-disabled session is a no-op.
    fn save(&self, session: &mut Session) -> Result<()> {
        if !session.can_save || !session.is_dirty {
            return Ok(());
        }

        let _guard = self.lock.lock().expect("session store poisoned");

        let data = serde_json::to_vec_pretty(&session).context("failed to serialise session")?;
        fs::write(self.session_file(&session.sid), data)
            .with_context(|| format!("failed to write session {}", session.sid))?;

        session.is_dirty = false;
        session.is_new = false;
        Ok(())
    }

    /// Remove the session file; absence is not an error.
    fn delete(&self, sid: &str) -> Result<()> {
        let _guard = self.lock.lock().expect("session store poisoned");

        match fs::remove_file(self.session_file(sid)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete session {}", sid)),
        }
    }

    /// Strict length check plus storage existence.
    fn is_valid_key(&self, sid: &str) -> bool {
        sid.len() == SESSION_ID_LEN
            && sid.chars().all(|c| c.is_ascii_hexdigit())
            && self.session_file(sid).exists()
    }

    /// Remove session files whose mtime is older than `max_age`. Returns the
    /// number of files removed.
    fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let _guard = self.lock.lock().expect("session store poisoned");

        let cutoff = SystemTime::now() - max_age;
        let mut removed = 0;

        for entry in fs::read_dir(&self.path).context("failed to read session directory")? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };

            if modified < cutoff && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        Ok(removed)
    }
}

/// 32 cryptographically random bytes, hex-encoded to 64 characters.
pub fn generate_session_id() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    let mut id = String::with_capacity(SESSION_ID_LEN);
    for byte in bytes {
        let _ = write!(id, "{:02x}", byte);
    }
    id
}
