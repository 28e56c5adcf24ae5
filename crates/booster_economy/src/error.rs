//! # Economy Error Types
//!
//! All errors that can occur in the booster economy. The set is closed:
//! callers at the request boundary match on [`EconomyError::rejection`]
//! instead of inspecting messages.

use booster_shared::{Coins, RarityTier, SerialNumber, UserId};
use thiserror::Error;

/// Errors that can occur in the economy system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EconomyError {
    /// Balance is below the requested debit.
    #[error("insufficient funds for user {user}: balance {balance}, required {required}")]
    InsufficientFunds {
        /// The account that was charged.
        user: UserId,
        /// Balance at the time of the check.
        balance: Coins,
        /// Amount requested.
        required: Coins,
    },

    /// A guaranteed rarity tier has no eligible templates.
    #[error("card pool exhausted for guaranteed tier {0}")]
    PoolExhausted(RarityTier),

    /// Every generated serial collided with an existing one.
    #[error("serial collision persisted after {attempts} attempts")]
    SerialCollision {
        /// Number of serials tried.
        attempts: u32,
    },

    /// The backing store failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Catalog write rejected.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Too many purchases in the current window.
    #[error("rate limited, retry in {retry_after_ms} ms")]
    RateLimited {
        /// Time until the window resets.
        retry_after_ms: u64,
    },

    /// No account exists for this user.
    #[error("unknown account: {0}")]
    UnknownAccount(UserId),

    /// A failed purchase could not be refunded. The purchase stays open in
    /// the journal until recovery credits it back.
    #[error("refund of {amount} coins to user {user} is pending recovery")]
    RefundPending {
        /// The account that was charged.
        user: UserId,
        /// Coins still owed.
        amount: Coins,
    },

    /// Arithmetic overflow in a balance calculation.
    #[error("arithmetic overflow in economic calculation")]
    ArithmeticOverflow,

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// How the request layer should present a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Clear rejection, nothing changed.
    Rejected,
    /// Generic retryable error, state was rolled back.
    RetryLater,
    /// Not the caller's fault: misconfiguration, a bug, or a refund still owed.
    Internal,
}

impl EconomyError {
    /// Maps the error to the category reported to the caller.
    #[must_use]
    pub const fn rejection(&self) -> Rejection {
        match self {
            Self::InsufficientFunds { .. }
            | Self::PoolExhausted(_)
            | Self::Validation(_)
            | Self::UnknownAccount(_) => Rejection::Rejected,
            Self::SerialCollision { .. }
            | Self::PersistenceFailure(_)
            | Self::RateLimited { .. } => Rejection::RetryLater,
            Self::RefundPending { .. } | Self::ArithmeticOverflow | Self::InvalidConfig(_) => Rejection::Internal,
        }
    }

    /// Whether repeating the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.rejection(), Rejection::RetryLater)
    }
}

/// Malformed catalog template data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A text field is outside its length bounds.
    #[error("{field} must be {min}-{max} characters, got {actual}")]
    Length {
        /// Offending field.
        field: &'static str,
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// A numeric field is outside its bounds.
    #[error("{field} must be within {min}..={max}, got {actual}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Minimum value.
        min: u32,
        /// Maximum value.
        max: u32,
        /// Actual value.
        actual: u32,
    },

    /// More than four attacks.
    #[error("a card cannot have more than {max} attacks, got {actual}")]
    TooManyAttacks {
        /// Maximum attacks.
        max: usize,
        /// Actual attacks.
        actual: usize,
    },

    /// Weakness and resistance are the same type.
    #[error("resistance cannot be the same type as weakness")]
    ResistanceEqualsWeakness,

    /// Image reference is not an http(s) image URL.
    #[error("image url must be an http(s) link to a jpg, jpeg, png or gif: {0}")]
    InvalidImageUrl(String),

    /// Template id is already in the catalog.
    #[error("template {0} already exists")]
    DuplicateTemplate(u32),
}

/// Errors reported by a [`crate::catalog::CardCatalogStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The serial is already taken.
    #[error("serial {0} already exists")]
    Collision(SerialNumber),

    /// The store could not complete the write.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl From<CatalogError> for EconomyError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Collision(serial) => {
                Self::PersistenceFailure(format!("unhandled serial collision on {serial}"))
            }
            CatalogError::Unavailable(reason) => Self::PersistenceFailure(reason),
        }
    }
}

/// Result type for economy operations.
pub type EconomyResult<T> = Result<T, EconomyError>;
