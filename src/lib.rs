//! Crashcore - Provably-Fair Crash Round Engine
//!
//! A single shared, continuously advancing round that many concurrent
//! clients bet into, watch, and race to exit before it crashes. The engine
//! is one serialized lane owning all round state; fairness is commit/reveal
//! with an HMAC-derived crash point any third party can recompute; money
//! movement is idempotent per bet and realized through a retrying
//! settlement gateway.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fairness;
pub mod history;
pub mod ledger;
pub mod settlement;
pub mod types;

pub use broadcast::{BroadcastGateway, EventSink, RecordingSink};
pub use clock::MultiplierClock;
pub use config::{ConfigLoader, CrashConfig};
pub use engine::{spawn_engine, EngineHandle, RoundEngine};
pub use errors::{ConfigError, GameError, HistoryError, WalletError};
pub use fairness::{
    derive_crash_point, recompute_crash_point, verify_seed, FairnessGenerator, FixedSeedSource,
    OsSeedSource, SeedSource,
};
pub use history::{HistoryStore, MemoryHistory};
pub use ledger::RoundLedger;
pub use settlement::{MemoryWallet, OpKey, OpKind, SettlementConfig, SettlementGateway, Wallet};
pub use types::{
    ActiveBetView, Bet, BetOutcome, BetStatus, CashoutReceipt, GameEvent, PlaceBetReceipt,
    RoundOutcome, RoundPhase, RoundRecord, StateSnapshot,
};
