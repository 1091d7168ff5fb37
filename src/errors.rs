//! Error taxonomy for the crash round engine.
//!
//! Every caller-facing failure is returned synchronously and carries a
//! stable wire code; none are retried internally, since retrying a
//! money-moving operation without its idempotency key risks duplication.

use thiserror::Error;

/// Wallet collaborator failures, surfaced to callers verbatim.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalletError {
    #[error("insufficient balance: need {needed} {currency}, have {available}")]
    InsufficientBalance {
        currency: String,
        needed: f64,
        available: f64,
    },

    #[error("wallet unavailable: {0}")]
    Unavailable(String),
}

/// Caller-facing errors for `placeBet` / `cashout` / admin operations.
#[derive(Debug, Error)]
pub enum GameError {
    /// Validation failure; rejected before any state change.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Bets are only accepted while the round is WAITING.
    #[error("round is not accepting bets")]
    RoundNotAccepting,

    /// Cashouts are only accepted while the round is RUNNING.
    #[error("round is not running")]
    RoundNotRunning,

    /// One active bet per user per round unless multi-slot betting is on.
    #[error("user already has an active bet in this round")]
    AlreadyBet,

    /// The bet does not exist or already left ACTIVE (cashed out or lost).
    #[error("no active bet")]
    NoActiveBet,

    /// Wallet collaborator error, passed through unchanged.
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Entropy source unavailable. Fatal: round creation must abort rather
    /// than fall back to weaker randomness.
    #[error("entropy source unavailable: {0}")]
    EntropyFailure(String),

    /// The engine lane has shut down and can no longer take commands.
    #[error("engine unavailable")]
    EngineClosed,
}

impl GameError {
    /// Stable machine-readable code for transports and clients.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidParameter(_) => "INVALID_PARAMETER",
            GameError::RoundNotAccepting => "ROUND_NOT_ACCEPTING",
            GameError::RoundNotRunning => "ROUND_NOT_RUNNING",
            GameError::AlreadyBet => "ALREADY_BET",
            GameError::NoActiveBet => "NO_ACTIVE_BET",
            GameError::Wallet(WalletError::InsufficientBalance { .. }) => "INSUFFICIENT_BALANCE",
            GameError::Wallet(WalletError::Unavailable(_)) => "WALLET_UNAVAILABLE",
            GameError::EntropyFailure(_) => "ENTROPY_FAILURE",
            GameError::EngineClosed => "ENGINE_CLOSED",
        }
    }
}

/// Persistence collaborator failures. Downstream unavailability is retried
/// with backoff by the settlement gateway, never by re-running the ledger
/// decision.
#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}
