//! Fixed demo dataset the store and the ledger start from.

use super::account::{AccountType, ClientNumber, SubAccount, User, UserId, UserRecord};
use super::credential::{hash_code, CredentialError};
use super::transaction::{Transaction, TransactionResult};
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;

pub const DEMO_USER_ID: &str = "1";
pub const DEMO_CLIENT_NUMBER: &str = "27148050000";
pub const DEMO_CODE: &str = "123456";

// The 15000 transfer to BARRIL ANTHONY was once labelled `envoie` and left out of
// `totalEnvoye` (15500). It is an `Envoi` here, so that total is 30500.
const SAMPLE_TRANSACTIONS: &str = "\
id, userId, date, heure, type, accountType, destinataire, numeroDestinataire, montant, frais, devise, statut, reference, motifEchec
TRX2025121745678, 1, 2023-10-10, 14:30, Envoi, LIQUIDITE, JEAN DUPONT, FR76 3000 4560 4856 7455 3646 748, 5000, 25, €, Réussie, TRX2025121745678,
TRX2025121634521, 1, 2022-07-21, 09:15, Envoi, LIQUIDITE, BARRIL ANTHONY, FR76 1780 6001 8404 1676 6849 143, 15000, 0, €, Réussie, TRX2025121634521,
TRX2025121523456, 1, 2022-11-15, 18:45, Envoi, LIQUIDITE, AHMED KALIF, MA64 1234 2333 5373 2734 123, 3000, 15, €, Réussie, TRX2025121523456,
TRX2025121512345, 1, 2024-12-15, 11:20, Retrait, LIQUIDITE, Distributeur Cocody, ATM-CASSABLANCA-001, 20000, 100, €, Réussie, TRX2025121512345,
TRX2025121478901, 1, 2024-12-14, 16:30, Envoi, LIQUIDITE, FLORENT LOPEZ, FR76 1580 6801 8404 1676 6849 143, 10000, 50, €, Échouée, TRX2025121478901, Solde insuffisant
TRX2025121367890, 1, 2022-12-13, 21:05, Dépôt, LIQUIDITE, Agent Yopougon, AGENT-CASSABLANCA-003, 50000, 0, €, Réussie, TRX2025121367890,
TRX2025121256789, 1, 2023-08-12, 08:40, Envoi, ECONOMIE, BARRIL ANTHONY, FR76 1780 6001 8404 1676 6849 143, 7500, 37, €, Réussie, TRX2025121256789,
TRX2025121145678, 1, 2025-12-11, 15:25, Transfert compte, LIQUIDITE, ECONOMIE, Compte ECONOMIE, 10000, 0, €, Réussie, TRX2025121145678,
";

/// The demo user, with its code hashed at `iterations` rounds.
pub fn default_users(iterations: u32) -> Result<Vec<UserRecord>, CredentialError> {
    let user = User {
        id: UserId::new(DEMO_USER_ID),
        client_number: ClientNumber::new(DEMO_CLIENT_NUMBER),
        card_number: "1301 0215 9290 1200".to_string(),
        first_name: "PAULINE".to_string(),
        last_name: "MARMIER".to_string(),
        email: "pauline.marmier@email.com".to_string(),
        phone: "+212 575 678912".to_string(),
        address: "Boulevard Molay Youssef, 20000 Casablanca".to_string(),
        city: "Casablanca".to_string(),
        postal_code: "08 BP 123".to_string(),
        country: "MAROC".to_string(),
        accounts: vec![
            SubAccount::new(AccountType::Liquidite, dec!(17541386.85), "€"),
            SubAccount::new(AccountType::Assurance, dec!(2700.00), "€"),
            SubAccount::new(AccountType::Economie, dec!(15000.00), "€"),
            SubAccount::new(AccountType::Epargne, dec!(2100.00), "€"),
        ],
        blocked_amount: dec!(567115.31),
        last_update: Utc
            .with_ymd_and_hms(2025, 10, 25, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
        is_new_user: false,
    };

    Ok(vec![UserRecord::new(user, hash_code(DEMO_CODE, iterations)?)])
}

pub fn default_transactions() -> TransactionResult<Vec<Transaction>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .trim(csv::Trim::All)
        .from_reader(SAMPLE_TRANSACTIONS.as_bytes());

    let mut transactions = Vec::new();
    for result in rdr.deserialize() {
        let transaction: Transaction = result?;
        transactions.push(transaction);
    }
    Ok(transactions)
}
