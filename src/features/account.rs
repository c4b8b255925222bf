use anyhow::{anyhow, ensure};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

const CLIENT_NUMBER_LENGTH: usize = 11;
const MIN_CODE_LENGTH: usize = 6;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External login identifier, 11 digits
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ClientNumber(String);

impl ClientNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self(
            (0..CLIENT_NUMBER_LENGTH)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        self.0.len() == CLIENT_NUMBER_LENGTH && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    /// Trimmed comparison, as typed at the login prompt
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.trim() == candidate.trim()
    }

    /// `4532 <last 4 digits> <4 random digits> <4 random digits>`
    fn derive_card_number(&self) -> String {
        let mut rng = rand::thread_rng();
        let tail = &self.0[self.0.len().saturating_sub(4)..];
        format!(
            "4532 {} {} {}",
            tail,
            rng.gen_range(1000..10000),
            rng.gen_range(1000..10000)
        )
    }
}

impl fmt::Display for ClientNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    /// Current account, shown on the dashboard
    Liquidite,
    Assurance,
    Economie,
    Epargne,
}

impl AccountType {
    pub const ALL: [AccountType; 4] = [
        AccountType::Liquidite,
        AccountType::Assurance,
        AccountType::Economie,
        AccountType::Epargne,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AccountType::Liquidite => "LIQUIDITE",
            AccountType::Assurance => "ASSURANCE",
            AccountType::Economie => "ECONOMIE",
            AccountType::Epargne => "EPARGNE",
        }
    }

    fn color(self) -> &'static str {
        match self {
            AccountType::Liquidite => "blue",
            AccountType::Assurance => "red",
            AccountType::Economie => "green",
            AccountType::Epargne => "yellow",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AccountType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountType::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown account type {s}"))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubAccount {
    #[serde(rename = "type")]
    pub account_type: AccountType,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub currency: String,
    pub color: String,
}

impl SubAccount {
    pub fn new(account_type: AccountType, balance: Decimal, currency: &str) -> Self {
        Self {
            account_type,
            balance,
            currency: currency.to_string(),
            color: account_type.color().to_string(),
        }
    }
}

/// A user as seen by the session and by callers. Carries no credential.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub client_number: ClientNumber,
    pub card_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub accounts: Vec<SubAccount>,
    #[serde(with = "rust_decimal::serde::float")]
    pub blocked_amount: Decimal,
    pub last_update: DateTime<Utc>,

    /// Freshly registered users see an empty history
    pub is_new_user: bool,
}

impl User {
    /// The LIQUIDITE account, or the first one
    pub fn main_account(&self) -> Option<&SubAccount> {
        self.account(AccountType::Liquidite)
            .or_else(|| self.accounts.first())
    }

    pub fn account(&self, account_type: AccountType) -> Option<&SubAccount> {
        self.accounts
            .iter()
            .find(|a| a.account_type == account_type)
    }

    pub(crate) fn account_mut(&mut self, account_type: AccountType) -> Option<&mut SubAccount> {
        self.accounts
            .iter_mut()
            .find(|a| a.account_type == account_type)
    }

    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    /// Move `last_update` to now, strictly past its previous value.
    pub(crate) fn touch(&mut self) {
        let floor = self.last_update + Duration::microseconds(1);
        self.last_update = Utc::now().max(floor);
    }

    fn apply(&mut self, update: ProfileUpdate) {
        let ProfileUpdate {
            first_name,
            last_name,
            email,
            phone,
            address,
            city,
            postal_code,
            country,
        } = update;

        if let Some(v) = first_name {
            self.first_name = v.to_uppercase();
        }
        if let Some(v) = last_name {
            self.last_name = v.to_uppercase();
        }
        if let Some(v) = email {
            self.email = v;
        }
        if let Some(v) = phone {
            self.phone = v;
        }
        if let Some(v) = address {
            self.address = v;
        }
        if let Some(v) = city {
            self.city = v;
        }
        if let Some(v) = postal_code {
            self.postal_code = v;
        }
        if let Some(v) = country {
            self.country = v;
        }
        self.touch();
    }
}

/// Stored form of a user: the public profile plus the credential hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(flatten)]
    pub(crate) user: User,
    pub(crate) code_hash: String,
}

impl UserRecord {
    pub(crate) fn new(user: User, code_hash: String) -> Self {
        Self { user, code_hash }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub(crate) fn update_profile(&mut self, update: ProfileUpdate) {
        self.user.apply(update);
    }

    pub(crate) fn set_code_hash(&mut self, code_hash: String) {
        self.code_hash = code_hash;
        self.user.touch();
    }
}

/// Fields supplied at registration
#[derive(Serialize, Deserialize, Debug, Clone, Default, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[validate(custom(function = "client_number_shape"))]
    pub client_number: String,
    #[validate(custom(function = "code_shape"))]
    pub code: String,
    #[validate(custom(function = "not_blank"))]
    pub first_name: String,
    #[validate(custom(function = "not_blank"))]
    pub last_name: String,
    #[validate(email, custom(function = "dotted_domain"))]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Registration {
    pub(crate) fn check(&self) -> anyhow::Result<()> {
        self.validate()
            .map_err(|e| anyhow!("Invalid registration - {e}"))
    }

    /// Build the user this registration describes, with four empty sub-accounts.
    pub(crate) fn into_user(self, currency: &str) -> User {
        let client_number = ClientNumber::new(self.client_number.trim());
        let card_number = client_number.derive_card_number();

        User {
            id: UserId::generate(),
            client_number,
            card_number,
            first_name: self.first_name.trim().to_uppercase(),
            last_name: self.last_name.trim().to_uppercase(),
            email: self.email,
            phone: self.phone.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            city: self.city.unwrap_or_default(),
            postal_code: self.postal_code.unwrap_or_default(),
            country: self.country.unwrap_or_else(|| "MAROC".to_string()),
            accounts: AccountType::ALL
                .into_iter()
                .map(|t| SubAccount::new(t, dec!(0), currency))
                .collect(),
            blocked_amount: dec!(0),
            last_update: Utc::now(),
            is_new_user: true,
        }
    }
}

/// Partial profile update; `None` keeps the current value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) fn validate_code(code: &str) -> anyhow::Result<()> {
    ensure!(
        code.trim().chars().count() >= MIN_CODE_LENGTH,
        "Code must contain at least {MIN_CODE_LENGTH} characters"
    );
    Ok(())
}

fn client_number_shape(value: &str) -> Result<(), ValidationError> {
    if ClientNumber::new(value.trim()).is_well_formed() {
        return Ok(());
    }
    Err(ValidationError::new("client_number")
        .with_message(format!("must be {CLIENT_NUMBER_LENGTH} digits").into()))
}

fn code_shape(value: &str) -> Result<(), ValidationError> {
    validate_code(value).map_err(|e| ValidationError::new("code").with_message(e.to_string().into()))
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// `local@host.tld`; a bare host such as `localhost` is refused
fn dotted_domain(value: &str) -> Result<(), ValidationError> {
    match value.rsplit_once('@') {
        Some((_, domain)) if domain.contains('.') => Ok(()),
        _ => Err(ValidationError::new("email_domain")),
    }
}
