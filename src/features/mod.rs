mod account;
mod bank;
mod config;
mod credential;
mod ledger;
mod notify;
mod seed;
mod session;
mod storage;
mod store;
mod transaction;

pub use self::{
    account::{AccountType, ClientNumber, ProfileUpdate, Registration, SubAccount, User, UserId},
    bank::{Bank, TransferRequest, Withdrawal},
    config::{BankConfig, ResetPolicy},
    credential::{hash_code, verify_code, CredentialError},
    ledger::{Ledger, TransactionStats},
    notify::{NotificationBus, Subscription},
    seed::{DEMO_CLIENT_NUMBER, DEMO_CODE},
    session::SessionHolder,
    storage::{FileStorage, MemoryStorage, Storage, StorageError},
    store::{AccountStore, StoreError},
    transaction::{
        NewTransaction, Transaction, TransactionError, TransactionStatus, TransactionType,
    },
};
