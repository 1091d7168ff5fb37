use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Round lifecycle phase. Exactly one round is `Waiting` or `Running`
/// at any time; `Crashed` is terminal for a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Waiting,
    Running,
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Waiting => write!(f, "waiting"),
            RoundPhase::Running => write!(f, "running"),
            RoundPhase::Crashed => write!(f, "crashed"),
        }
    }
}

/// How a round ended. An administrative void refunds stakes at 1.00x and
/// is recorded separately from an ordinary crash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundOutcome {
    Crashed,
    Voided,
}

/// Bet lifecycle. Once a bet leaves `Active` it is immutable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Active,
    CashedOut,
    Lost,
    Void,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Active => write!(f, "active"),
            BetStatus::CashedOut => write!(f, "cashed_out"),
            BetStatus::Lost => write!(f, "lost"),
            BetStatus::Void => write!(f, "void"),
        }
    }
}

/// One player's stake within exactly one round.
///
/// The money-affecting fields (`status`, `cashout_multiplier`, `payout`)
/// are written at most once, only from inside the engine lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub round_id: Uuid,
    pub user_id: String,
    pub amount: f64,
    pub currency: String,
    pub auto_cashout_at: Option<f64>,
    pub status: BetStatus,
    pub cashout_multiplier: Option<f64>,
    pub payout: Option<f64>,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    pub fn new(
        id: Uuid,
        round_id: Uuid,
        user_id: &str,
        amount: f64,
        currency: &str,
        auto_cashout_at: Option<f64>,
    ) -> Self {
        Self {
            id,
            round_id,
            user_id: user_id.to_string(),
            amount,
            currency: currency.to_string(),
            auto_cashout_at,
            status: BetStatus::Active,
            cashout_multiplier: None,
            payout: None,
            placed_at: Utc::now(),
        }
    }
}

/// Terminal round record archived to the persistence collaborator.
/// Append-only; the server seed is included so any third party can
/// re-verify the commitment and the crash point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub id: Uuid,
    pub nonce: u64,
    pub client_seed: String,
    pub server_seed_hash: String,
    pub server_seed: String,
    pub crash_point: f64,
    pub outcome: RoundOutcome,
    pub waiting_duration_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

/// Per-bet outcome summary published in the `crashed` / `voided` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetOutcome {
    pub user_id: String,
    pub amount: f64,
    pub cashout_at: Option<f64>,
    pub payout: f64,
}

/// Active bet view exposed through state snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveBetView {
    pub bet_id: Uuid,
    pub user_id: String,
    pub amount: f64,
    pub auto_cashout_at: Option<f64>,
}

/// Snapshot answering `getCurrentState`: always available so a client can
/// resynchronize even after a failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub round_id: Uuid,
    pub phase: RoundPhase,
    pub current_multiplier: f64,
    pub server_seed_hash: String,
    pub active_bets: Vec<ActiveBetView>,
}

/// Reply to a successful `placeBet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetReceipt {
    pub bet_id: Uuid,
    pub round_id: Uuid,
}

/// Reply to a successful `cashout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashoutReceipt {
    pub payout: f64,
    pub multiplier: f64,
}

/// Engine events fanned out to observers, in engine processing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GameEvent {
    /// New round entered WAITING; the seed hash is the fairness commitment.
    #[serde(rename = "newRound", rename_all = "camelCase")]
    NewRound {
        round_id: Uuid,
        server_seed_hash: String,
        countdown_ms: u64,
    },

    /// A bet was accepted during WAITING.
    #[serde(rename = "bet", rename_all = "camelCase")]
    Bet {
        round_id: Uuid,
        user_id: String,
        amount: f64,
        auto_cashout_at: Option<f64>,
    },

    /// WAITING expired; the multiplier baseline is 1.00.
    #[serde(rename = "start", rename_all = "camelCase")]
    Start { round_id: Uuid },

    /// One authoritative clock tick while RUNNING.
    #[serde(rename = "tick", rename_all = "camelCase")]
    Tick {
        round_id: Uuid,
        multiplier: f64,
        elapsed_ms: u64,
    },

    /// A bet cashed out, manually or automatically.
    #[serde(rename = "cashout", rename_all = "camelCase")]
    Cashout {
        round_id: Uuid,
        user_id: String,
        multiplier: f64,
        payout: f64,
    },

    /// The round crashed; includes the fairness reveal and every outcome.
    #[serde(rename = "crashed", rename_all = "camelCase")]
    Crashed {
        round_id: Uuid,
        crash_point: f64,
        server_seed: String,
        bets: Vec<BetOutcome>,
    },

    /// Administrative void; all active bets were refunded at 1.00x.
    #[serde(rename = "voided", rename_all = "camelCase")]
    Voided {
        round_id: Uuid,
        bets: Vec<BetOutcome>,
    },
}

/// Round a currency amount to cents. Payouts are money; they never carry
/// sub-cent precision.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Truncate a multiplier to two decimals. Truncation (not rounding) so a
/// reported multiplier never exceeds the true continuous value.
pub fn floor_cents(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}
