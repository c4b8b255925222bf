//! # Bank facade
//!
//! [`Bank`] owns the account store, the session slot, the ledger and the
//! notification bus, all over one [`Storage`]. It is the only place where those
//! pieces meet:
//!
//! - store operations that change who is logged in (or what they look like)
//!   update the session slot and publish on the bus;
//! - money movements stage the balance change and the ledger entry together and
//!   only persist once both are valid, so a rejected movement leaves no trace.
//!
//! All mutating operations take `&mut self`. Share a `Bank` between threads by
//! wrapping it in a `Mutex`.

use super::account::{AccountType, ClientNumber, ProfileUpdate, Registration, User, UserId};
use super::config::BankConfig;
use super::ledger::{Ledger, TransactionStats};
use super::notify::{NotificationBus, Subscription};
use super::session::SessionHolder;
use super::storage::Storage;
use super::store::{AccountStore, StoreError, StoreResult};
use super::transaction::{
    NewTransaction, Transaction, TransactionError, TransactionResult, TransactionStatus,
    TransactionType,
};
use anyhow::anyhow;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const WITHDRAWAL_CODE_LENGTH: usize = 8;

/// Outgoing transfer to a third party
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub account: AccountType,
    pub beneficiary: String,
    pub iban: String,
    pub amount: Decimal,
    pub memo: Option<String>,
}

/// A recorded cash withdrawal and the code to present at the cash machine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub transaction: Transaction,
    pub code: String,
}

#[derive(Debug)]
pub struct Bank<S> {
    config: BankConfig,
    store: AccountStore<S>,
    session: SessionHolder<S>,
    ledger: Ledger<S>,
    bus: NotificationBus,
}

impl<S: Storage + Clone> Bank<S> {
    pub fn open(storage: S, config: BankConfig) -> Self {
        Self {
            store: AccountStore::new(storage.clone(), &config),
            session: SessionHolder::new(storage.clone()),
            ledger: Ledger::new(storage),
            bus: NotificationBus::new(),
            config,
        }
    }
}

impl<S: Storage> Bank<S> {
    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn subscribe<F>(&mut self, handler: F) -> Subscription
    where
        F: Fn(Option<&User>) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    /// Initialize the store under its reset policy.
    ///
    /// After a reseed the session slot is replaced by the fresh copy of the same
    /// user. Returns whether that happened, so the caller publishes it, either on
    /// its own or folded into the event of the operation it is part of.
    fn initialize(&mut self) -> StoreResult<bool> {
        let reseeded = self.store.initialize()?;
        self.after_reload(reseeded)
    }

    fn after_reload(&mut self, reseeded: bool) -> StoreResult<bool> {
        if !reseeded {
            return Ok(false);
        }
        let current = match self.session.current()? {
            Some(current) => current,
            None => return Ok(false),
        };
        match self.store.find(&current.id)? {
            Some(fresh) => {
                debug!("Session refreshed from reseeded user {}", fresh.id);
                self.session.set(&fresh)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run `op` after a reload that may have `refreshed` the session.
    ///
    /// On success `op` publishes on its own. On failure the refresh still has to
    /// be announced, so it is published here.
    fn with_refresh<T, E, F>(&mut self, refreshed: bool, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let result = op(self);
        if refreshed && result.is_err() {
            self.publish();
        }
        result
    }

    fn publish(&self) {
        match self.session.current() {
            Ok(current) => self.bus.publish(current.as_ref()),
            Err(e) => error!("Unable to read session for notification - {e}"),
        }
    }

    /// Re-run store initialization, as done once at application start.
    pub fn force_reload(&mut self) -> StoreResult<()> {
        let reseeded = self.store.force_reload()?;
        if self.after_reload(reseeded)? {
            self.publish();
        }
        Ok(())
    }

    pub fn login(&mut self, client_number: &str, code: &str) -> StoreResult<User> {
        let refreshed = self.initialize()?;
        self.with_refresh(refreshed, |bank| -> StoreResult<User> {
            let user = match bank.store.authenticate(client_number, code) {
                Ok(user) => user,
                Err(e) => {
                    info!("Rejected login for {}", client_number.trim());
                    return Err(e);
                }
            };

            bank.session.set(&user)?;
            info!("User {} logged in", user.id);
            bank.publish();
            Ok(user)
        })
    }

    /// Create the user and log them in.
    pub fn register(&mut self, registration: Registration) -> StoreResult<User> {
        let refreshed = self.initialize()?;
        self.with_refresh(refreshed, |bank| -> StoreResult<User> {
            let user = bank.store.insert(registration, &bank.config.currency)?;

            bank.session.set(&user)?;
            bank.publish();
            Ok(user)
        })
    }

    /// Create the user, leaving the current session as it is.
    pub fn register_without_login(&mut self, registration: Registration) -> StoreResult<User> {
        let refreshed = self.initialize()?;
        let user = self.store.insert(registration, &self.config.currency);
        if refreshed {
            self.publish();
        }
        user
    }

    pub fn generate_client_number(&mut self) -> StoreResult<ClientNumber> {
        self.store.generate_client_number()
    }

    /// The session slot as stored. Never touches the account store.
    pub fn current_user(&self) -> StoreResult<Option<User>> {
        Ok(self.session.current()?)
    }

    fn require_session(&self) -> StoreResult<User> {
        self.session.current()?.ok_or(StoreError::NotAuthenticated)
    }

    pub fn logout(&mut self) -> StoreResult<()> {
        self.session.clear()?;
        info!("Logged out");
        self.publish();
        Ok(())
    }

    pub fn update_user(&mut self, update: ProfileUpdate) -> StoreResult<User> {
        let current = self.require_session()?;
        let reseeded = self.store.force_reload()?;
        let refreshed = self.after_reload(reseeded)?;

        self.with_refresh(refreshed, |bank| -> StoreResult<User> {
            let user = bank.store.update_profile(&current.id, update)?;
            bank.session.set(&user)?;
            bank.publish();
            Ok(user)
        })
    }

    /// Replace the logged-in user's code. The session record is left as is.
    pub fn change_code(&mut self, current_code: &str, new_code: &str) -> StoreResult<()> {
        let current = self.require_session()?;
        let reseeded = self.store.force_reload()?;
        let refreshed = self.after_reload(reseeded)?;

        self.with_refresh(refreshed, |bank| -> StoreResult<()> {
            bank.store.change_code(&current.id, current_code, new_code)?;
            info!("Code changed for user {}", current.id);
            bank.publish();
            Ok(())
        })
    }

    /// Whether `user_id`'s history is hidden.
    ///
    /// Keyed off the queried user, not the logged-in one: a freshly registered
    /// user sees an empty history whoever is asking.
    fn history_hidden(&mut self, user_id: &UserId) -> TransactionResult<bool> {
        Ok(self
            .store
            .find(user_id)?
            .map_or(false, |user| user.is_new_user))
    }

    pub fn get_user_transactions(&mut self, user_id: &UserId) -> TransactionResult<Vec<Transaction>> {
        if self.history_hidden(user_id)? {
            return Ok(Vec::new());
        }
        self.ledger.user_transactions(user_id)
    }

    pub fn get_transactions_by_account(
        &mut self,
        user_id: &UserId,
        account_type: AccountType,
    ) -> TransactionResult<Vec<Transaction>> {
        if self.history_hidden(user_id)? {
            return Ok(Vec::new());
        }
        self.ledger.transactions_by_account(user_id, account_type)
    }

    pub fn search_transactions(
        &mut self,
        user_id: &UserId,
        term: &str,
    ) -> TransactionResult<Vec<Transaction>> {
        if self.history_hidden(user_id)? {
            return Ok(Vec::new());
        }
        self.ledger.search(user_id, term)
    }

    pub fn get_transaction_stats(&mut self, user_id: &UserId) -> TransactionResult<TransactionStats> {
        if self.history_hidden(user_id)? {
            return Ok(TransactionStats::default());
        }
        self.ledger.stats(user_id)
    }

    /// Append to the ledger as is. No session, ownership or balance check.
    pub fn add_transaction(&mut self, new: NewTransaction) -> TransactionResult<Transaction> {
        self.ledger.add(new)
    }

    /// Send money to a third party, debiting amount plus the transfer fee.
    pub fn transfer(&mut self, request: TransferRequest) -> TransactionResult<Transaction> {
        let refreshed = self.initialize()?;
        self.with_refresh(refreshed, |bank| -> TransactionResult<Transaction> {
            let user = bank.require_session()?;
            ensure_positive(request.amount)?;
            if request.beneficiary.trim().is_empty() || request.iban.trim().is_empty() {
                let missing = anyhow!("Beneficiary and IBAN are required");
                return Err(StoreError::InvalidInput(missing).into());
            }

            let fee = (request.amount * bank.config.transfer_fee_rate).round_dp(2);
            let total = request.amount + fee;
            let account = request.account;

            let new = bank.new_transaction(&user, TransactionType::Send, account, request.amount, fee);
            let new = NewTransaction {
                counterparty: request.beneficiary,
                counterparty_number: request.iban,
                memo: request.memo,
                ..new
            };
            bank.record_movement(new, |user| debit(user, account, total))
        })
    }

    /// Cash withdrawal, capped at the configured limit.
    pub fn withdraw(&mut self, account: AccountType, amount: Decimal) -> TransactionResult<Withdrawal> {
        let refreshed = self.initialize()?;
        self.with_refresh(refreshed, |bank| -> TransactionResult<Withdrawal> {
            let user = bank.require_session()?;
            ensure_positive(amount)?;
            if amount > bank.config.withdrawal_limit {
                return Err(TransactionError::WithdrawalLimit {
                    requested: amount,
                    limit: bank.config.withdrawal_limit,
                });
            }

            let new = NewTransaction {
                counterparty: "Distributeur automatique".to_string(),
                counterparty_number: format!("ATM-{}", user.city.to_uppercase()),
                ..bank.new_transaction(&user, TransactionType::Withdrawal, account, amount, dec!(0))
            };
            let transaction = bank.record_movement(new, |user| debit(user, account, amount))?;

            Ok(Withdrawal {
                transaction,
                code: withdrawal_code(),
            })
        })
    }

    /// Cash deposit through an agent.
    pub fn deposit(
        &mut self,
        account: AccountType,
        amount: Decimal,
        agent: &str,
    ) -> TransactionResult<Transaction> {
        let refreshed = self.initialize()?;
        self.with_refresh(refreshed, |bank| -> TransactionResult<Transaction> {
            let user = bank.require_session()?;
            ensure_positive(amount)?;

            let new = NewTransaction {
                counterparty: agent.to_string(),
                counterparty_number: "AGENT".to_string(),
                ..bank.new_transaction(&user, TransactionType::Deposit, account, amount, dec!(0))
            };
            bank.record_movement(new, |user| credit(user, account, amount))
        })
    }

    /// Move money between two of the logged-in user's sub-accounts, free of charge.
    pub fn transfer_between_accounts(
        &mut self,
        from: AccountType,
        to: AccountType,
        amount: Decimal,
    ) -> TransactionResult<Transaction> {
        let refreshed = self.initialize()?;
        self.with_refresh(refreshed, |bank| -> TransactionResult<Transaction> {
            let user = bank.require_session()?;
            ensure_positive(amount)?;
            if from == to {
                return Err(TransactionError::SameAccount(from));
            }

            let new = NewTransaction {
                counterparty: to.label().to_string(),
                counterparty_number: format!("Compte {to}"),
                ..bank.new_transaction(&user, TransactionType::InternalTransfer, from, amount, dec!(0))
            };
            bank.record_movement(new, |user| {
                debit(user, from, amount)?;
                credit(user, to, amount)
            })
        })
    }

    fn new_transaction(
        &self,
        user: &User,
        transaction_type: TransactionType,
        account_type: AccountType,
        amount: Decimal,
        fee: Decimal,
    ) -> NewTransaction {
        NewTransaction {
            user_id: user.id.clone(),
            transaction_type,
            account_type,
            counterparty: String::new(),
            counterparty_number: String::new(),
            amount,
            fee,
            currency: self.config.currency.clone(),
            status: TransactionStatus::Succeeded,
            failure_reason: None,
            memo: None,
        }
    }

    /// Apply a balance change and append its ledger entry as one unit.
    ///
    /// Both are staged first; the ledger is written, then the users. If the users
    /// write fails the previous ledger is written back.
    fn record_movement<F>(&mut self, new: NewTransaction, apply: F) -> TransactionResult<Transaction>
    where
        F: FnOnce(&mut User) -> TransactionResult<()>,
    {
        let user_id = new.user_id.clone();
        let (users, user) = self.store.stage(&user_id, |record| {
            apply(&mut record.user)?;
            record.user.touch();
            Ok::<_, TransactionError>(())
        })?;

        let previous = self.ledger.snapshot()?;
        let (transactions, transaction) = self.ledger.stage(new)?;
        self.ledger.commit(transactions)?;

        if let Err(e) = self.store.commit(users) {
            if let Err(rollback) = self.ledger.commit(previous) {
                error!(
                    "Ledger rollback of {} failed - {rollback}",
                    transaction.reference
                );
            }
            return Err(e.into());
        }

        self.session.set(&user)?;
        info!(
            "{} {} of {} {} for user {}",
            transaction.transaction_type,
            transaction.reference,
            transaction.amount,
            transaction.currency,
            user.id
        );
        self.bus.publish(Some(&user));
        Ok(transaction)
    }
}

fn ensure_positive(amount: Decimal) -> TransactionResult<()> {
    if amount <= dec!(0) {
        return Err(TransactionError::InvalidAmount(amount));
    }
    Ok(())
}

fn debit(user: &mut User, account: AccountType, amount: Decimal) -> TransactionResult<()> {
    let sub = user
        .account_mut(account)
        .ok_or(TransactionError::UnknownAccount(account))?;
    if sub.balance < amount {
        return Err(TransactionError::InsufficientFund {
            requested: amount,
            available: sub.balance,
        });
    }
    sub.balance -= amount;
    Ok(())
}

fn credit(user: &mut User, account: AccountType, amount: Decimal) -> TransactionResult<()> {
    let sub = user
        .account_mut(account)
        .ok_or(TransactionError::UnknownAccount(account))?;
    sub.balance += amount;
    Ok(())
}

fn withdrawal_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(WITHDRAWAL_CODE_LENGTH)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::config::ResetPolicy;
    use crate::features::seed::{DEMO_CLIENT_NUMBER, DEMO_CODE, DEMO_USER_ID};
    use crate::features::storage::{MemoryStorage, StorageError, StorageResult};
    use crate::features::store::USERS_KEY;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use test_case::test_case;

    fn config() -> BankConfig {
        BankConfig::default().with_hash_iterations(10)
    }

    fn bank() -> Bank<MemoryStorage> {
        Bank::open(MemoryStorage::new(), config())
    }

    fn logged_in() -> Bank<MemoryStorage> {
        let mut bank = bank();
        bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();
        bank
    }

    fn registration(client_number: &str) -> Registration {
        Registration {
            client_number: client_number.to_string(),
            code: "abcdef".to_string(),
            first_name: "Awa".to_string(),
            last_name: "Diallo".to_string(),
            email: "awa.diallo@email.com".to_string(),
            ..Default::default()
        }
    }

    fn counter(bank: &mut Bank<MemoryStorage>) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let sub = bank.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, sub)
    }

    fn demo() -> UserId {
        UserId::new(DEMO_USER_ID)
    }

    fn liquidite(bank: &Bank<MemoryStorage>) -> Decimal {
        bank.current_user()
            .unwrap()
            .unwrap()
            .account(AccountType::Liquidite)
            .unwrap()
            .balance
    }

    #[test]
    fn login_returns_user_and_sets_session() {
        let mut bank = bank();
        let (count, _sub) = counter(&mut bank);

        let user = bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();

        assert_eq!(user.id, demo());
        assert_eq!(bank.current_user().unwrap(), Some(user));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_json_has_no_credential() {
        let storage = MemoryStorage::new();
        let mut bank = Bank::open(storage.clone(), config());
        bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();

        let raw = storage
            .get(crate::features::session::SESSION_KEY)
            .unwrap()
            .unwrap();
        assert!(!raw.contains("code\""));
        assert!(!raw.contains("codeHash"));
        assert!(!raw.contains(DEMO_CODE));
    }

    #[test_case(DEMO_CLIENT_NUMBER, "000000" ; "wrong code")]
    #[test_case("27148050001", DEMO_CODE ; "wrong client number")]
    #[test_case("", "" ; "empty")]
    fn login_mismatch_is_invalid_credentials(client_number: &str, code: &str) {
        let mut bank = bank();
        let (count, _sub) = counter(&mut bank);

        let err = bank.login(client_number, code).unwrap_err();

        assert!(matches!(err, StoreError::InvalidCredentials));
        assert_eq!(bank.current_user().unwrap(), None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn register_logs_in_new_user() {
        let mut bank = bank();
        let (count, _sub) = counter(&mut bank);

        let user = bank.register(registration("99999999999")).unwrap();

        assert!(user.is_new_user);
        assert_eq!(user.accounts.len(), 4);
        let types: Vec<_> = user.accounts.iter().map(|a| a.account_type).collect();
        assert_eq!(types, AccountType::ALL.to_vec());
        assert!(user.accounts.iter().all(|a| a.balance == dec!(0)));
        assert_eq!(bank.current_user().unwrap(), Some(user));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_duplicate_leaves_store_unmodified() {
        let storage = MemoryStorage::new();
        let mut bank = Bank::open(storage.clone(), config());
        bank.force_reload().unwrap();
        let before = storage.get(USERS_KEY).unwrap();

        let err = bank.register(registration(DEMO_CLIENT_NUMBER)).unwrap_err();

        assert!(matches!(err, StoreError::DuplicateClientNumber(_)));
        assert_eq!(storage.get(USERS_KEY).unwrap(), before);
        assert_eq!(bank.current_user().unwrap(), None);
    }

    #[test]
    fn register_without_login_then_login() {
        let mut bank = logged_in();
        let (count, _sub) = counter(&mut bank);
        let prior = bank.current_user().unwrap();

        let created = bank
            .register_without_login(registration("99999999999"))
            .unwrap();

        assert_eq!(bank.current_user().unwrap(), prior);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let user = bank.login("99999999999", "abcdef").unwrap();
        assert_eq!(user.id, created.id);
        assert_eq!(bank.current_user().unwrap().map(|u| u.id), Some(created.id));
    }

    #[test]
    fn register_without_login_keeps_logged_out() {
        let mut bank = bank();
        bank.register_without_login(registration("99999999999"))
            .unwrap();
        assert_eq!(bank.current_user().unwrap(), None);
    }

    #[test]
    fn logout_clears_session_and_notifies_once() {
        let mut bank = logged_in();
        let count = Arc::new(AtomicUsize::new(0));
        let saw_none = Arc::new(AtomicBool::new(false));
        let (c, s) = (count.clone(), saw_none.clone());
        let _sub = bank.subscribe(move |session| {
            c.fetch_add(1, Ordering::SeqCst);
            s.store(session.is_none(), Ordering::SeqCst);
        });

        bank.logout().unwrap();

        assert_eq!(bank.current_user().unwrap(), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(saw_none.load(Ordering::SeqCst));
    }

    #[test]
    fn update_user_changes_only_supplied_fields() {
        let mut bank = logged_in();
        let before = bank.current_user().unwrap().unwrap();
        let (count, _sub) = counter(&mut bank);

        let user = bank
            .update_user(ProfileUpdate {
                email: Some("p.marmier@email.com".to_string()),
                city: Some("Rabat".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(user.email, "p.marmier@email.com");
        assert_eq!(user.city, "Rabat");
        assert_eq!(user.phone, before.phone);
        assert_eq!(user.address, before.address);
        assert_eq!(user.first_name, before.first_name);
        assert_eq!(user.accounts, before.accounts);
        assert!(user.last_update > before.last_update);
        assert_eq!(bank.current_user().unwrap(), Some(user));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_update_still_advances_last_update() {
        let mut bank = logged_in();
        let before = bank.current_user().unwrap().unwrap();
        let user = bank.update_user(ProfileUpdate::default()).unwrap();
        assert!(user.last_update > before.last_update);
    }

    #[test]
    fn mutations_require_session() {
        let mut bank = bank();

        assert!(matches!(
            bank.update_user(ProfileUpdate::default()),
            Err(StoreError::NotAuthenticated)
        ));
        assert!(matches!(
            bank.change_code(DEMO_CODE, "654321"),
            Err(StoreError::NotAuthenticated)
        ));
        assert!(matches!(
            bank.withdraw(AccountType::Liquidite, dec!(10)),
            Err(TransactionError::AccountError(StoreError::NotAuthenticated))
        ));
    }

    #[test]
    fn session_for_vanished_user_is_not_found() {
        let storage = MemoryStorage::new();
        let mut bank = Bank::open(storage.clone(), config());
        bank.register(registration("99999999999")).unwrap();

        // Another instance resets the users snapshot underneath us
        storage.remove(USERS_KEY).unwrap();

        assert!(matches!(
            bank.update_user(ProfileUpdate::default()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn change_code_with_wrong_current_code() {
        let mut bank = logged_in();
        let (count, _sub) = counter(&mut bank);

        let err = bank.change_code("000000", "654321").unwrap_err();

        assert!(matches!(err, StoreError::InvalidCredentials));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        bank.logout().unwrap();
        assert!(bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).is_ok());
    }

    #[test]
    fn change_code_keeps_session_payload() {
        let mut bank = logged_in();
        let session = bank.current_user().unwrap();
        let (count, _sub) = counter(&mut bank);

        bank.change_code(DEMO_CODE, "654321").unwrap();

        assert_eq!(bank.current_user().unwrap(), session);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bank.logout().unwrap();
        assert!(bank.login(DEMO_CLIENT_NUMBER, "654321").is_ok());
    }

    #[test]
    fn new_user_sees_empty_history() {
        let mut bank = bank();
        let user = bank.register(registration("99999999999")).unwrap();
        let incoming = NewTransaction {
            counterparty: "JEAN DUPONT".into(),
            counterparty_number: "FR76".into(),
            ..bank.new_transaction(
                &user,
                TransactionType::Receive,
                AccountType::Liquidite,
                dec!(10),
                dec!(0),
            )
        };
        bank.add_transaction(incoming).unwrap();

        assert!(bank.get_user_transactions(&user.id).unwrap().is_empty());
        assert!(bank
            .get_transactions_by_account(&user.id, AccountType::Liquidite)
            .unwrap()
            .is_empty());
        assert!(bank.search_transactions(&user.id, "dupont").unwrap().is_empty());
        assert_eq!(
            bank.get_transaction_stats(&user.id).unwrap(),
            TransactionStats::default()
        );
    }

    #[test]
    fn hiding_follows_queried_user_not_session() {
        let mut bank = bank();
        bank.register(registration("99999999999")).unwrap();

        // New user logged in, established user's history stays visible
        assert_eq!(bank.get_user_transactions(&demo()).unwrap().len(), 8);
        assert_eq!(bank.get_transaction_stats(&demo()).unwrap().total, 8);
    }

    #[test]
    fn demo_history_queries() {
        let mut bank = logged_in();

        let history = bank.get_user_transactions(&demo()).unwrap();
        assert_eq!(history.len(), 8);
        assert_eq!(
            bank.get_transactions_by_account(&demo(), AccountType::Economie)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(bank.search_transactions(&demo(), "BARRIL").unwrap().len(), 2);
    }

    #[test]
    fn transfer_debits_amount_and_fee() {
        let mut bank = logged_in();
        let before = liquidite(&bank);
        let (count, _sub) = counter(&mut bank);

        let tx = bank
            .transfer(TransferRequest {
                account: AccountType::Liquidite,
                beneficiary: "JEAN DUPONT".to_string(),
                iban: "FR76 3000 4560 4856 7455 3646 748".to_string(),
                amount: dec!(1000),
                memo: Some("Loyer".to_string()),
            })
            .unwrap();

        assert_eq!(tx.transaction_type, TransactionType::Send);
        assert_eq!(tx.fee, dec!(5));
        assert_eq!(tx.memo.as_deref(), Some("Loyer"));
        assert_eq!(liquidite(&bank), before - dec!(1005));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let history = bank.get_user_transactions(&demo()).unwrap();
        assert_eq!(history[0].reference, tx.reference);
    }

    #[test]
    fn transfer_without_funds_changes_nothing() {
        let mut bank = logged_in();
        let before = bank.get_user_transactions(&demo()).unwrap();
        let balance = bank
            .current_user()
            .unwrap()
            .unwrap()
            .account(AccountType::Epargne)
            .unwrap()
            .balance;

        let err = bank
            .transfer(TransferRequest {
                account: AccountType::Epargne,
                beneficiary: "JEAN DUPONT".to_string(),
                iban: "FR76".to_string(),
                amount: dec!(2100),
                memo: None,
            })
            .unwrap_err();

        // 2100 is available but not 2100 plus the 10.50 fee
        assert!(matches!(err, TransactionError::InsufficientFund { .. }));
        assert_eq!(bank.get_user_transactions(&demo()).unwrap(), before);
        assert_eq!(
            bank.current_user()
                .unwrap()
                .unwrap()
                .account(AccountType::Epargne)
                .unwrap()
                .balance,
            balance
        );
    }

    #[test_case(dec!(0) ; "zero")]
    #[test_case(dec!(-5) ; "negative")]
    fn non_positive_amounts_are_rejected(amount: Decimal) {
        let mut bank = logged_in();
        assert!(matches!(
            bank.deposit(AccountType::Liquidite, amount, "Agent"),
            Err(TransactionError::InvalidAmount(_))
        ));
    }

    #[test]
    fn withdrawal_above_limit_is_rejected() {
        let mut bank = logged_in();
        let before = liquidite(&bank);

        let err = bank
            .withdraw(AccountType::Liquidite, dec!(5000.01))
            .unwrap_err();

        assert!(matches!(err, TransactionError::WithdrawalLimit { .. }));
        assert_eq!(liquidite(&bank), before);
    }

    #[test]
    fn withdrawal_returns_code() {
        let mut bank = logged_in();
        let before = liquidite(&bank);

        let withdrawal = bank.withdraw(AccountType::Liquidite, dec!(5000)).unwrap();

        assert_eq!(withdrawal.code.len(), 8);
        assert!(withdrawal
            .code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(withdrawal.transaction.transaction_type, TransactionType::Withdrawal);
        assert_eq!(liquidite(&bank), before - dec!(5000));
    }

    #[test]
    fn deposit_and_internal_transfer() {
        let mut bank = bank();
        let user = bank.register(registration("99999999999")).unwrap();

        bank.deposit(AccountType::Liquidite, dec!(300), "Agent Yopougon")
            .unwrap();
        let tx = bank
            .transfer_between_accounts(AccountType::Liquidite, AccountType::Epargne, dec!(120))
            .unwrap();

        let current = bank.current_user().unwrap().unwrap();
        assert_eq!(current.account(AccountType::Liquidite).unwrap().balance, dec!(180));
        assert_eq!(current.account(AccountType::Epargne).unwrap().balance, dec!(120));
        assert_eq!(current.total_balance(), dec!(300));
        assert!(current.last_update > user.last_update);
        assert_eq!(tx.counterparty, "EPARGNE");
        assert_eq!(tx.counterparty_number, "Compte EPARGNE");
    }

    #[test]
    fn internal_transfer_to_same_account_is_rejected() {
        let mut bank = logged_in();
        assert!(matches!(
            bank.transfer_between_accounts(AccountType::Liquidite, AccountType::Liquidite, dec!(1)),
            Err(TransactionError::SameAccount(AccountType::Liquidite))
        ));
    }

    #[test]
    fn dev_mode_reseed_refreshes_session() {
        let storage = MemoryStorage::new();
        let dev = config().with_reset_policy(ResetPolicy::OnEveryAccess);
        let mut bank = Bank::open(storage, dev);
        bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();
        bank.update_user(ProfileUpdate {
            city: Some("Rabat".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(bank.current_user().unwrap().unwrap().city, "Rabat");
        let (count, _sub) = counter(&mut bank);

        bank.force_reload().unwrap();

        assert_eq!(bank.current_user().unwrap().unwrap().city, "Casablanca");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    fn assurance(session: Option<&User>) -> Option<Decimal> {
        session
            .and_then(|user| user.account(AccountType::Assurance))
            .map(|account| account.balance)
    }

    #[test]
    fn dev_mode_failed_operation_still_notifies() {
        let dev = config().with_reset_policy(ResetPolicy::OnEveryAccess);
        let mut bank = Bank::open(MemoryStorage::new(), dev);
        bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();
        bank.withdraw(AccountType::Assurance, dec!(100)).unwrap();
        assert_eq!(assurance(bank.current_user().unwrap().as_ref()), Some(dec!(2600)));

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        let (c, s) = (count.clone(), seen.clone());
        let _sub = bank.subscribe(move |session| {
            c.fetch_add(1, Ordering::SeqCst);
            *s.lock().unwrap() = assurance(session);
        });

        let err = bank
            .withdraw(AccountType::Assurance, dec!(99999))
            .unwrap_err();

        assert!(matches!(err, TransactionError::WithdrawalLimit { .. }));
        assert_eq!(assurance(bank.current_user().unwrap().as_ref()), Some(dec!(2700)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), Some(dec!(2700)));
    }

    #[test]
    fn dev_mode_rejected_login_announces_refresh() {
        let dev = config().with_reset_policy(ResetPolicy::OnEveryAccess);
        let mut bank = Bank::open(MemoryStorage::new(), dev);
        bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();
        let (count, _sub) = counter(&mut bank);

        assert!(bank.login(DEMO_CLIENT_NUMBER, "000000").is_err());
        assert!(bank.change_code("000000", "654321").is_err());

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_operation_without_reseed_is_silent() {
        let mut bank = logged_in();
        let (count, _sub) = counter(&mut bank);

        assert!(bank.withdraw(AccountType::Assurance, dec!(99999)).is_err());

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dev_mode_discards_registrations() {
        let dev = config().with_reset_policy(ResetPolicy::OnEveryAccess);
        let mut bank = Bank::open(MemoryStorage::new(), dev);

        bank.register_without_login(registration("99999999999"))
            .unwrap();

        assert!(matches!(
            bank.login("99999999999", "abcdef"),
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[test]
    fn reopened_directory_keeps_users_ledger_and_session() {
        use crate::features::storage::FileStorage;

        let dir = std::env::temp_dir().join(format!("mock_bank_reopen_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut bank = Bank::open(FileStorage::new(dir.clone()), config());
        let user = bank.register(registration("99999999999")).unwrap();
        let tx = bank.deposit(AccountType::Liquidite, dec!(42), "Agent").unwrap();
        drop(bank);

        let mut reopened = Bank::open(FileStorage::new(dir.clone()), config());
        let session = reopened.current_user().unwrap().unwrap();
        assert_eq!(session.id, user.id);
        assert_eq!(session.account(AccountType::Liquidite).unwrap().balance, dec!(42));

        reopened.logout().unwrap();
        assert!(reopened.login("99999999999", "abcdef").is_ok());
        let ledger = FileStorage::new(dir.clone())
            .get(crate::features::ledger::TRANSACTIONS_KEY)
            .unwrap()
            .unwrap();
        assert!(ledger.contains(&tx.reference));

        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Storage whose users snapshot can be made to fail
    #[derive(Clone, Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_users: Arc<AtomicBool>,
    }

    impl Storage for FlakyStorage {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            if key == USERS_KEY && self.fail_users.load(Ordering::SeqCst) {
                return Err(StorageError::Poisoned);
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_balance_write_rolls_back_ledger() {
        let storage = FlakyStorage::default();
        let mut bank = Bank::open(storage.clone(), config());
        bank.login(DEMO_CLIENT_NUMBER, DEMO_CODE).unwrap();
        let history = bank.get_user_transactions(&demo()).unwrap();
        let ledger_snapshot = storage
            .get(crate::features::ledger::TRANSACTIONS_KEY)
            .unwrap();

        storage.fail_users.store(true, Ordering::SeqCst);
        let err = bank
            .deposit(AccountType::Liquidite, dec!(10), "Agent")
            .unwrap_err();

        assert!(matches!(err, TransactionError::AccountError(StoreError::Storage(_))));
        assert_eq!(bank.get_user_transactions(&demo()).unwrap(), history);
        assert_eq!(
            storage
                .get(crate::features::ledger::TRANSACTIONS_KEY)
                .unwrap(),
            ledger_snapshot
        );
    }
}
