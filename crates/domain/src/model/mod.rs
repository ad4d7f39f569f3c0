//! Data structures and helpers shared across the API, monitor and storage
//! crates.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Maximum accepted length for network, exchange point and order identifiers.
pub const MAX_ID_LENGTH: usize = 128;

/// Multiplier between a currency's major unit and its minor unit.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Errors emitted when user-supplied identifiers fail validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdFormatError {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier must be at most {MAX_ID_LENGTH} characters")]
    TooLong,
}

fn validate_id(raw: &str) -> Result<&str, IdFormatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdFormatError::Empty);
    }
    if trimmed.len() > MAX_ID_LENGTH {
        return Err(IdFormatError::TooLong);
    }
    Ok(trimmed)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn parse(raw: &str) -> Result<Self, IdFormatError> {
                validate_id(raw).map(Self::new)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a network requesting exchange access.
    NetworkId
);
string_id!(
    /// Opaque identifier of an Internet Exchange Point.
    IxpId
);
string_id!(
    /// Order identifier assigned by the payment gateway.
    OrderId
);

/// Errors emitted when a currency code is malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("currency code must be three ASCII letters, got `{0}`")]
pub struct CurrencyFormatError(pub String);

/// ISO-style three letter currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, CurrencyFormatError> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyFormatError(code.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error raised when an amount cannot be charged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be greater than zero")]
    NotPositive,
    #[error("amount overflows the minor unit range")]
    Overflow,
}

/// Converts a whole major-unit amount into minor units (cents, paise).
pub fn to_minor_units(amount_major: i64) -> Result<i64, AmountError> {
    if amount_major <= 0 {
        return Err(AmountError::NotPositive);
    }
    amount_major
        .checked_mul(MINOR_UNITS_PER_MAJOR)
        .ok_or(AmountError::Overflow)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AccessState {
    Idle,
    Accessed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    pub network_id: NetworkId,
    pub state: AccessState,
    pub last_transition_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl AccessRecord {
    /// State as observed at `now`: an accessed record whose lease ran out
    /// counts as idle.
    pub fn effective_state(&self, now: DateTime<Utc>) -> AccessState {
        match (self.state, self.lease_expires_at) {
            (AccessState::Accessed, Some(expiry)) if expiry <= now => AccessState::Idle,
            (state, _) => state,
        }
    }

    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.effective_state(now) == AccessState::Accessed
    }
}

/// Parameters for an atomic Idle→Accessed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub network_id: NetworkId,
    pub at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl AcquireRequest {
    pub fn granted_record(&self) -> AccessRecord {
        AccessRecord {
            network_id: self.network_id.clone(),
            state: AccessState::Accessed,
            last_transition_at: self.at,
            lease_expires_at: self.lease_expires_at,
        }
    }
}

/// Health token last reported for an exchange point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IxpStatus {
    Observed(String),
    Unknown,
}

impl IxpStatus {
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Observed(token) => Some(token),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for IxpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token().unwrap_or("unknown"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IxpStatusEntry {
    pub ixp_id: IxpId,
    pub status: IxpStatus,
    pub observed_at: Option<DateTime<Utc>>,
}

impl IxpStatusEntry {
    pub fn observed(ixp_id: IxpId, token: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            ixp_id,
            status: IxpStatus::Observed(token.into()),
            observed_at: Some(observed_at),
        }
    }

    pub fn unknown(ixp_id: IxpId) -> Self {
        Self {
            ixp_id,
            status: IxpStatus::Unknown,
            observed_at: None,
        }
    }
}

/// Point-in-time copy of the exchange point status cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    entries: HashMap<IxpId, IxpStatusEntry>,
}

impl StatusSnapshot {
    pub fn get(&self, ixp_id: &IxpId) -> Option<&IxpStatusEntry> {
        self.entries.get(ixp_id)
    }

    pub fn status_of(&self, ixp_id: &IxpId) -> IxpStatus {
        self.entries
            .get(ixp_id)
            .map(|entry| entry.status.clone())
            .unwrap_or(IxpStatus::Unknown)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IxpStatusEntry> {
        self.entries.values()
    }
}

impl FromIterator<IxpStatusEntry> for StatusSnapshot {
    fn from_iter<T: IntoIterator<Item = IxpStatusEntry>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|entry| (entry.ixp_id.clone(), entry))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Verified,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    pub order_id: OrderId,
    pub amount_minor: i64,
    pub currency: Currency,
    pub payer: String,
    pub status: OrderStatus,
    pub rejected_attempts: u32,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub amount_minor: i64,
    pub currency: Currency,
    pub payer: String,
    pub created_at: DateTime<Utc>,
}
