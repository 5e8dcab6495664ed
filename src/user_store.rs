use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// A persisted user record. `password_hash` never crosses the connection boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Default, Serialize, Deserialize)]
struct UserFile {
    users: HashMap<String, UserRecord>,
}

struct State {
    file: UserFile,
    active_sessions: HashSet<String>,
}

/// Persistent credential store, keyed by username, with single-session enforcement.
///
/// Grounded on the check-then-insert/bcrypt/active-session shape of the Python original's
/// user manager; persisted the way the teacher's `Db` persists — everything behind one mutex,
/// written through before the call that mutated it returns.
pub struct UserStore {
    path: String,
    state: Mutex<State>,
}

impl UserStore {
    pub fn new(path: impl Into<String>) -> ChatResult<Self> {
        let path = path.into();
        let file = if let Some(parent) = std::path::Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
            match std::fs::read_to_string(&path) {
                Ok(contents) => serde_json::from_str(&contents)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => UserFile::default(),
                Err(e) => return Err(ChatError::Io(e)),
            }
        } else {
            UserFile::default()
        };

        Ok(UserStore {
            path,
            state: Mutex::new(State {
                file,
                active_sessions: HashSet::new(),
            }),
        })
    }

    /// Atomic check-then-insert; persists to disk before returning on success.
    pub fn register(&self, username: &str, password: &str) -> ChatResult<UserRecord> {
        let mut state = self.state.lock().unwrap();
        if state.file.users.contains_key(username) {
            return Err(ChatError::UsernameExists);
        }

        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| {
                ChatError::Protocol(format!("failed to hash password: {e}"))
            })?;
        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash,
            created_at: Utc::now().to_rfc3339(),
        };

        state.file.users.insert(username.to_string(), record.clone());
        self.persist(&state.file)?;
        Ok(record)
    }

    /// Verifies credentials and, on success, claims the username's single session slot.
    /// Fails with `SessionAlreadyActive` if a session for this username is already open.
    pub fn authenticate(&self, username: &str, password: &str) -> ChatResult<UserRecord> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .file
            .users
            .get(username)
            .cloned()
            .ok_or(ChatError::InvalidCredentials)?;

        let valid = bcrypt::verify(password, &record.password_hash).unwrap_or(false);
        if !valid {
            return Err(ChatError::InvalidCredentials);
        }

        if state.active_sessions.contains(username) {
            return Err(ChatError::SessionAlreadyActive);
        }

        state.active_sessions.insert(username.to_string());
        Ok(record)
    }

    /// Idempotent: removing a session that doesn't exist is not an error.
    pub fn logout(&self, username: &str) {
        let mut state = self.state.lock().unwrap();
        state.active_sessions.remove(username);
    }

    fn persist(&self, file: &UserFile) -> ChatResult<()> {
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
