use super::account::{AccountType, UserId};
use super::seed;
use super::storage::Storage;
use super::transaction::{
    NewTransaction, Transaction, TransactionResult, TransactionStatus, TransactionType,
};
use chrono::{Local, SubsecRound};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

pub const TRANSACTIONS_KEY: &str = "mock_bank_transactions_db";

/// Aggregates over one user's transactions
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TransactionStats {
    pub total: usize,

    #[serde(rename = "reussies")]
    pub succeeded: usize,

    #[serde(rename = "echouees")]
    pub failed: usize,

    #[serde(rename = "en_attente")]
    pub pending: usize,

    /// Succeeded sends only
    #[serde(rename = "totalEnvoye", with = "rust_decimal::serde::float")]
    pub total_sent: Decimal,

    /// Succeeded receives only
    #[serde(rename = "totalRecu", with = "rust_decimal::serde::float")]
    pub total_received: Decimal,

    /// Fees of every succeeded transaction, whatever its type
    #[serde(rename = "totalFrais", with = "rust_decimal::serde::float")]
    pub total_fees: Decimal,
}

impl TransactionStats {
    fn collect<'a>(transactions: impl Iterator<Item = &'a Transaction>) -> Self {
        transactions.fold(Self::default(), |mut stats, tx| {
            stats.total += 1;
            match tx.status {
                TransactionStatus::Succeeded => {
                    stats.succeeded += 1;
                    stats.total_fees += tx.fee;
                    match tx.transaction_type {
                        TransactionType::Send => stats.total_sent += tx.amount,
                        TransactionType::Receive => stats.total_received += tx.amount,
                        _ => {}
                    }
                }
                TransactionStatus::Failed => stats.failed += 1,
                TransactionStatus::Pending => stats.pending += 1,
            }
            stats
        })
    }
}

/// Append-only transaction list, newest first, mirrored to storage.
#[derive(Debug)]
pub struct Ledger<S> {
    storage: S,
    transactions: Option<Vec<Transaction>>,
    last_reference: i64,
}

impl<S: Storage> Ledger<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            transactions: None,
            last_reference: 0,
        }
    }

    /// Load the persisted ledger, seeding the sample transactions when absent.
    pub fn initialize(&mut self) -> TransactionResult<()> {
        if self.transactions.is_some() {
            return Ok(());
        }

        match self.storage.get(TRANSACTIONS_KEY)? {
            Some(snapshot) => {
                let transactions: Vec<Transaction> = serde_json::from_str(&snapshot)?;
                debug!("Loaded {} transactions from snapshot", transactions.len());
                self.transactions = Some(transactions);
            }
            None => {
                info!("No ledger snapshot, seeding sample transactions");
                let transactions = seed::default_transactions()?;
                self.commit(transactions)?;
            }
        }
        Ok(())
    }

    fn records(&mut self) -> TransactionResult<&[Transaction]> {
        self.initialize()?;
        Ok(self.transactions.as_deref().unwrap_or_default())
    }

    fn select<P>(&mut self, user_id: &UserId, predicate: P) -> TransactionResult<Vec<Transaction>>
    where
        P: Fn(&Transaction) -> bool,
    {
        let mut selected: Vec<Transaction> = self
            .records()?
            .iter()
            .filter(|t| &t.user_id == user_id && predicate(t))
            .cloned()
            .collect();
        // Stable, so records prepended within the same second keep their order
        selected.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        Ok(selected)
    }

    pub fn user_transactions(&mut self, user_id: &UserId) -> TransactionResult<Vec<Transaction>> {
        self.select(user_id, |_| true)
    }

    pub fn transactions_by_account(
        &mut self,
        user_id: &UserId,
        account_type: AccountType,
    ) -> TransactionResult<Vec<Transaction>> {
        self.select(user_id, |t| t.account_type == account_type)
    }

    pub fn search(&mut self, user_id: &UserId, term: &str) -> TransactionResult<Vec<Transaction>> {
        self.select(user_id, |t| t.matches(term))
    }

    pub fn stats(&mut self, user_id: &UserId) -> TransactionResult<TransactionStats> {
        Ok(TransactionStats::collect(
            self.records()?.iter().filter(|t| &t.user_id == user_id),
        ))
    }

    /// Record a transaction without touching any balance.
    pub fn add(&mut self, new: NewTransaction) -> TransactionResult<Transaction> {
        let (transactions, transaction) = self.stage(new)?;
        self.commit(transactions)?;
        debug!(
            "Recorded {} {} for {}",
            transaction.transaction_type, transaction.reference, transaction.user_id
        );
        Ok(transaction)
    }

    /// Build the ledger as it would be with `new` prepended. Nothing is persisted.
    pub(crate) fn stage(
        &mut self,
        new: NewTransaction,
    ) -> TransactionResult<(Vec<Transaction>, Transaction)> {
        new.validate()?;
        let mut transactions = self.records()?.to_vec();

        let reference = self.next_reference(&transactions);
        let now = Local::now().naive_local().trunc_subsecs(0);
        let transaction = new.stamp(reference, now);

        transactions.insert(0, transaction.clone());
        Ok((transactions, transaction))
    }

    /// Persist `transactions`, then make them the in-memory ledger.
    pub(crate) fn commit(&mut self, transactions: Vec<Transaction>) -> TransactionResult<()> {
        let snapshot = serde_json::to_string(&transactions)?;
        self.storage.set(TRANSACTIONS_KEY, &snapshot)?;
        self.transactions = Some(transactions);
        Ok(())
    }

    /// Copy of the current ledger, to hand back to [`Ledger::commit`] on rollback.
    pub(crate) fn snapshot(&mut self) -> TransactionResult<Vec<Transaction>> {
        Ok(self.records()?.to_vec())
    }

    /// `TRX<unix millis>`, strictly increasing and never already in the ledger
    fn next_reference(&mut self, existing: &[Transaction]) -> String {
        let mut candidate = Local::now().timestamp_millis().max(self.last_reference + 1);
        loop {
            let reference = format!("TRX{candidate}");
            if !existing.iter().any(|t| t.reference == reference) {
                self.last_reference = candidate;
                return reference;
            }
            candidate += 1;
        }
    }
}
