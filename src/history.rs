//! Persistence collaborator: append-only round and bet history.
//!
//! Records are appended after a round reaches its terminal phase and are
//! never mutated afterward. The in-memory implementation backs tests and
//! the demo binary; a durable store plugs in behind the same trait.

use crate::errors::HistoryError;
use crate::types::{Bet, RoundRecord};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_round(&self, round: RoundRecord) -> Result<(), HistoryError>;

    async fn append_bet(&self, bet: Bet) -> Result<(), HistoryError>;

    /// Most recent rounds first.
    async fn recent_rounds(&self, limit: usize) -> Vec<RoundRecord>;

    /// Total archived rounds; seeds the engine's nonce counter at startup.
    async fn round_count(&self) -> u64;
}

/// In-memory append-only store.
pub struct MemoryHistory {
    rounds: RwLock<Vec<RoundRecord>>,
    bets: RwLock<Vec<Bet>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            rounds: RwLock::new(Vec::new()),
            bets: RwLock::new(Vec::new()),
        }
    }

    pub async fn bets_for_round(&self, round_id: uuid::Uuid) -> Vec<Bet> {
        self.bets
            .read()
            .await
            .iter()
            .filter(|b| b.round_id == round_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append_round(&self, round: RoundRecord) -> Result<(), HistoryError> {
        self.rounds.write().await.push(round);
        Ok(())
    }

    async fn append_bet(&self, bet: Bet) -> Result<(), HistoryError> {
        self.bets.write().await.push(bet);
        Ok(())
    }

    async fn recent_rounds(&self, limit: usize) -> Vec<RoundRecord> {
        let rounds = self.rounds.read().await;
        rounds.iter().rev().take(limit).cloned().collect()
    }

    async fn round_count(&self) -> u64 {
        self.rounds.read().await.len() as u64
    }
}
