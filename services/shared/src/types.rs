/// Type-safe wrappers for domain primitives
///
/// These types prevent common errors by enforcing validation at construction
/// time and providing clamped/checked arithmetic for balance math.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::constants::*;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Bet ID too long: {length} chars (max {max})")]
    BetIdTooLong { length: usize, max: usize },

    #[error("Invalid bet ID format: {0}")]
    InvalidBetIdFormat(String),

    #[error("Amount overflow in operation")]
    AmountOverflow,
}

/// Maximum bet ID length (UUID without hyphens = 32 chars)
pub const MAX_BET_ID_LENGTH: usize = 32;

/// Type-safe bet identifier, generated on the client.
///
/// A UUID v4 with hyphens stripped. The replay guard and the pending-bet
/// directory both key on it, so a retried submission must reuse the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BetId(String);

impl BetId {
    /// Generate a fresh client-side bet id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().replace('-', ""))
    }

    /// Get the inner string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the inner string, consuming self
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<Uuid> for BetId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string().replace('-', ""))
    }
}

impl TryFrom<String> for BetId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = value.replace('-', "");

        if normalized.len() > MAX_BET_ID_LENGTH {
            return Err(ValidationError::BetIdTooLong {
                length: normalized.len(),
                max: MAX_BET_ID_LENGTH,
            });
        }

        Uuid::parse_str(&normalized)
            .map_err(|_| ValidationError::InvalidBetIdFormat(value.clone()))?;

        Ok(Self(normalized))
    }
}

impl std::fmt::Display for BetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe lamport amount with clamped and checked arithmetic.
///
/// Balances are only ever written through saturating operations, so a
/// displayed balance can never go below zero even when in-flight accounting
/// briefly disagrees with the store.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Lamports(u64);

impl Lamports {
    pub const ZERO: Lamports = Lamports(0);

    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    /// Get the raw lamport value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Addition clamped at u64::MAX
    pub fn saturating_add(self, other: Lamports) -> Lamports {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Lamports) -> Lamports {
        Self(self.0.saturating_sub(other.0))
    }

    /// Checked addition
    pub fn checked_add(self, other: Lamports) -> Result<Lamports, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Lamports) -> Result<Lamports, ValidationError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Checked multiplication
    pub fn checked_mul(self, multiplier: u64) -> Result<Lamports, ValidationError> {
        self.0
            .checked_mul(multiplier)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Widen for signed drift arithmetic
    pub const fn as_i128(&self) -> i128 {
        self.0 as i128
    }

    /// Convert to SOL (as f64), display only
    pub fn to_sol(&self) -> f64 {
        self.0 as f64 / LAMPORTS_PER_SOL as f64
    }

    /// Create from a SOL amount; negative input clamps to zero
    pub fn from_sol(sol: f64) -> Self {
        Self((sol.max(0.0) * LAMPORTS_PER_SOL as f64).round() as u64)
    }
}

impl From<u64> for Lamports {
    fn from(amount: u64) -> Self {
        Self(amount)
    }
}

impl From<Lamports> for u64 {
    fn from(amount: Lamports) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Lamports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} lamports ({:.9} SOL)", self.0, self.to_sol())
    }
}
