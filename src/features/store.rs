use super::account::{
    validate_code, ClientNumber, ProfileUpdate, Registration, User, UserId, UserRecord,
};
use super::config::{BankConfig, ResetPolicy};
use super::credential::{hash_code, verify_code, CredentialError};
use super::seed;
use super::storage::{Storage, StorageError};
use thiserror::Error;

pub const USERS_KEY: &str = "mock_bank_users_db";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid client number or code")]
    InvalidCredentials,

    #[error("Client number {0} already exists")]
    DuplicateClientNumber(ClientNumber),

    #[error("No user is logged in")]
    NotAuthenticated,

    #[error("User {0} not found")]
    NotFound(UserId),

    #[error("Invalid input - {0}")]
    InvalidInput(#[from] anyhow::Error),

    #[error("Corrupt snapshot - {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unable to persist users - {0}")]
    Storage(#[from] StorageError),

    #[error("Credential failure - {0}")]
    Credential(#[from] CredentialError),
}

pub type StoreResult<T> = anyhow::Result<T, StoreError>;

/// Registered users, kept in memory and mirrored to a snapshot in storage.
///
/// Every mutation works on a copy of the user list. The copy is persisted first
/// and only then replaces the in-memory list, so a failed write leaves both
/// untouched.
#[derive(Debug)]
pub struct AccountStore<S> {
    storage: S,
    users: Option<Vec<UserRecord>>,
    reset_policy: ResetPolicy,
    hash_iterations: u32,
}

impl<S: Storage> AccountStore<S> {
    pub fn new(storage: S, config: &BankConfig) -> Self {
        if config.reset_policy == ResetPolicy::OnEveryAccess {
            warn!("Account store reseeds on every access; runtime edits will be discarded");
        }

        Self {
            storage,
            users: None,
            reset_policy: config.reset_policy,
            hash_iterations: config.hash_iterations,
        }
    }

    pub fn reset_policy(&self) -> ResetPolicy {
        self.reset_policy
    }

    /// Bring the in-memory users up according to the reset policy.
    ///
    /// Returns `true` when the users were reseeded over existing data, in which
    /// case any active session refers to a replaced record.
    pub fn initialize(&mut self) -> StoreResult<bool> {
        match self.reset_policy {
            ResetPolicy::OnEveryAccess => {
                debug!("Reseeding users from the default dataset");
                let users = seed::default_users(self.hash_iterations)?;
                self.commit(users)?;
                Ok(true)
            }
            ResetPolicy::Never if self.users.is_none() => {
                match self.storage.get(USERS_KEY)? {
                    Some(snapshot) => {
                        let users: Vec<UserRecord> = serde_json::from_str(&snapshot)?;
                        debug!("Loaded {} users from snapshot", users.len());
                        self.users = Some(users);
                    }
                    None => {
                        info!("No users snapshot, seeding the default dataset");
                        let users = seed::default_users(self.hash_iterations)?;
                        self.commit(users)?;
                    }
                }
                Ok(false)
            }
            ResetPolicy::Never => Ok(false),
        }
    }

    /// Drop the in-memory copy and initialize again.
    pub fn force_reload(&mut self) -> StoreResult<bool> {
        self.users = None;
        self.initialize()
    }

    fn records(&mut self) -> StoreResult<&[UserRecord]> {
        if self.users.is_none() {
            self.initialize()?;
        }
        Ok(self.users.as_deref().unwrap_or_default())
    }

    pub fn users(&mut self) -> StoreResult<Vec<User>> {
        Ok(self.records()?.iter().map(|r| r.user().clone()).collect())
    }

    pub fn find(&mut self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self
            .records()?
            .iter()
            .find(|r| &r.user.id == id)
            .map(|r| r.user().clone()))
    }

    pub fn contains_client_number(&mut self, client_number: &str) -> StoreResult<bool> {
        Ok(self
            .records()?
            .iter()
            .any(|r| r.user.client_number.matches(client_number)))
    }

    /// A random client number not held by any user
    pub fn generate_client_number(&mut self) -> StoreResult<ClientNumber> {
        loop {
            let candidate = ClientNumber::generate();
            if !self.contains_client_number(candidate.as_str())? {
                return Ok(candidate);
            }
        }
    }

    /// Both sides are compared trimmed.
    pub fn authenticate(&mut self, client_number: &str, code: &str) -> StoreResult<User> {
        for record in self.records()? {
            if record.user.client_number.matches(client_number)
                && verify_code(code.trim(), &record.code_hash)?
            {
                return Ok(record.user().clone());
            }
        }
        Err(StoreError::InvalidCredentials)
    }

    pub fn insert(&mut self, registration: Registration, currency: &str) -> StoreResult<User> {
        if self.contains_client_number(&registration.client_number)? {
            return Err(StoreError::DuplicateClientNumber(ClientNumber::new(
                registration.client_number.trim(),
            )));
        }
        registration.check()?;

        let code_hash = hash_code(registration.code.trim(), self.hash_iterations)?;
        let user = registration.into_user(currency);

        let mut users = self.records()?.to_vec();
        users.push(UserRecord::new(user.clone(), code_hash));
        self.commit(users)?;

        info!("Registered user {} ({})", user.id, user.client_number);
        Ok(user)
    }

    pub fn update_profile(&mut self, id: &UserId, update: ProfileUpdate) -> StoreResult<User> {
        let (users, user) = self.stage(id, |record| {
            record.update_profile(update);
            Ok::<_, StoreError>(())
        })?;
        self.commit(users)?;
        Ok(user)
    }

    /// `current` must equal the stored code exactly, surrounding whitespace
    /// included. The new code is stored trimmed.
    pub fn change_code(&mut self, id: &UserId, current: &str, new: &str) -> StoreResult<User> {
        validate_code(new)?;
        let iterations = self.hash_iterations;

        let (users, user) = self.stage(id, |record| {
            if !verify_code(current, &record.code_hash)? {
                return Err(StoreError::InvalidCredentials);
            }
            record.set_code_hash(hash_code(new.trim(), iterations)?);
            Ok(())
        })?;
        self.commit(users)?;
        Ok(user)
    }

    /// Apply `f` to a copy of user `id` inside a copy of the whole list.
    ///
    /// Nothing is persisted; pass the returned list to [`AccountStore::commit`].
    pub(crate) fn stage<E, F>(&mut self, id: &UserId, f: F) -> Result<(Vec<UserRecord>, User), E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut UserRecord) -> Result<(), E>,
    {
        let mut users = self.records()?.to_vec();
        let record = users
            .iter_mut()
            .find(|r| &r.user.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        f(record)?;
        let user = record.user().clone();
        Ok((users, user))
    }

    /// Persist `users`, then make them the in-memory list.
    pub(crate) fn commit(&mut self, users: Vec<UserRecord>) -> StoreResult<()> {
        let snapshot = serde_json::to_string(&users)?;
        self.storage.set(USERS_KEY, &snapshot)?;
        self.users = Some(users);
        Ok(())
    }
}
