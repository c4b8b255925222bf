use super::account::{AccountType, UserId};
use super::store::StoreError;
use super::storage::StorageError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionType {
    /// Outgoing transfer to a third party
    #[serde(rename = "Envoi")]
    Send,

    /// Incoming transfer from a third party
    #[serde(rename = "Réception")]
    Receive,

    /// Cash withdrawal
    #[serde(rename = "Retrait")]
    Withdrawal,

    /// Cash deposit through an agent
    #[serde(rename = "Dépôt")]
    Deposit,

    /// Move between two sub-accounts of the same user. `accountType` is the
    /// debited account, the counterparty names the credited one.
    #[serde(rename = "Transfert compte")]
    InternalTransfer,
}

impl TransactionType {
    pub fn label(self) -> &'static str {
        use TransactionType::*;

        match self {
            Send => "Envoi",
            Receive => "Réception",
            Withdrawal => "Retrait",
            Deposit => "Dépôt",
            InternalTransfer => "Transfert compte",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    #[serde(rename = "Réussie")]
    Succeeded,

    #[serde(rename = "Échouée")]
    Failed,

    #[serde(rename = "En attente")]
    Pending,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionStatus::Succeeded => "Réussie",
            TransactionStatus::Failed => "Échouée",
            TransactionStatus::Pending => "En attente",
        })
    }
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Invalid transaction - {0}")]
    AccountError(#[from] StoreError),

    #[error("Invalid input - {0}")]
    InvalidAmount(Decimal),

    #[error(
        "You cannot withdraw {requested}. It is more than {available} available in your account"
    )]
    InsufficientFund {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Amount {requested} exceeds the {limit} limit per withdrawal")]
    WithdrawalLimit { requested: Decimal, limit: Decimal },

    #[error("No {0} account for this user")]
    UnknownAccount(AccountType),

    #[error("Source and destination accounts are both {0}")]
    SameAccount(AccountType),

    #[error("Corrupt ledger snapshot - {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unable to persist ledger - {0}")]
    Storage(#[from] StorageError),

    #[error("Unable to read sample ledger - {0}")]
    Seed(#[from] csv::Error),
}

pub type TransactionResult<T> = anyhow::Result<T, TransactionError>;

/// Ledger entry. Immutable once recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,

    #[serde(rename = "userId")]
    pub user_id: UserId,

    pub date: NaiveDate,

    #[serde(rename = "heure", with = "clock_time")]
    pub time: NaiveTime,

    #[serde(rename = "type")]
    pub transaction_type: TransactionType,

    #[serde(rename = "accountType")]
    pub account_type: AccountType,

    #[serde(rename = "destinataire")]
    pub counterparty: String,

    #[serde(rename = "numeroDestinataire")]
    pub counterparty_number: String,

    /// Always a non-negative magnitude; direction comes from the type
    #[serde(rename = "montant", with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    #[serde(rename = "frais", with = "rust_decimal::serde::float")]
    pub fee: Decimal,

    #[serde(rename = "devise")]
    pub currency: String,

    #[serde(rename = "statut")]
    pub status: TransactionStatus,

    /// Unique, equal to `id`
    pub reference: String,

    #[serde(
        rename = "motifEchec",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_reason: Option<String>,

    #[serde(rename = "motif", default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Transaction {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == TransactionStatus::Succeeded
    }

    /// Case-insensitive substring match on counterparty, reference or type
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.counterparty.to_lowercase().contains(&term)
            || self.reference.to_lowercase().contains(&term)
            || self.transaction_type.label().to_lowercase().contains(&term)
    }
}

/// Caller-supplied fields of a transaction about to be recorded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub account_type: AccountType,
    pub counterparty: String,
    pub counterparty_number: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub memo: Option<String>,
}

impl NewTransaction {
    pub(crate) fn validate(&self) -> TransactionResult<()> {
        if self.amount < dec!(0) {
            return Err(TransactionError::InvalidAmount(self.amount));
        }
        if self.fee < dec!(0) {
            return Err(TransactionError::InvalidAmount(self.fee));
        }
        Ok(())
    }

    pub(crate) fn stamp(self, reference: String, at: NaiveDateTime) -> Transaction {
        let failure_reason = match (self.status, self.failure_reason) {
            (TransactionStatus::Failed, reason) => reason,
            (status, Some(reason)) => {
                warn!("Dropping failure reason \"{reason}\" on a {status} transaction");
                None
            }
            (_, None) => None,
        };

        Transaction {
            id: reference.clone(),
            user_id: self.user_id,
            date: at.date(),
            time: at.time(),
            transaction_type: self.transaction_type,
            account_type: self.account_type,
            counterparty: self.counterparty,
            counterparty_number: self.counterparty_number,
            amount: self.amount,
            fee: self.fee,
            currency: self.currency,
            status: self.status,
            reference,
            failure_reason,
            memo: self.memo,
        }
    }
}

/// `HH:MM` as written by hand, `HH:MM:SS` for recorded transactions
mod clock_time {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(d)?;
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(D::Error::custom)
    }
}
