use super::account::User;
use super::storage::{Storage, StorageResult};

pub const SESSION_KEY: &str = "mock_bank_current_user";

/// Persisted single slot naming the logged-in user.
///
/// Holds a [`User`], which has no credential field, so the code can never
/// reach the slot.
#[derive(Debug, Clone)]
pub struct SessionHolder<S> {
    storage: S,
}

impl<S: Storage> SessionHolder<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Read the slot. An unreadable record counts as no session.
    pub fn current(&self) -> StorageResult<Option<User>> {
        let raw = match self.storage.get(SESSION_KEY)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match serde_json::from_str(&raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!("Ignoring unreadable session record - {e}");
                Ok(None)
            }
        }
    }

    pub fn set(&self, user: &User) -> StorageResult<()> {
        let raw = serde_json::to_string(user)?;
        self.storage.set(SESSION_KEY, &raw)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.storage.remove(SESSION_KEY)
    }
}
