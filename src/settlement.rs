//! Settlement gateway: turns ledger outcomes into wallet credits and
//! persisted history.
//!
//! The engine's ledger decision is final the moment it is written; this
//! gateway only realizes it. Credits and archival run on a background
//! queue with retry and backoff, so a slow downstream never stalls round
//! progression. Every wallet operation is idempotent per
//! `(bet_id, operation kind)` key.

use crate::errors::{HistoryError, WalletError};
use crate::history::HistoryStore;
use crate::types::{Bet, RoundRecord};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// What a wallet operation is for. Together with the bet id this forms the
/// idempotency key: retrying an already-applied operation is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Debit of the stake at bet placement.
    Stake,
    /// Credit of a cashout payout.
    Payout,
    /// Credit of a stake refund (cancellation or round void).
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpKey {
    pub bet_id: Uuid,
    pub kind: OpKind,
}

impl OpKey {
    pub fn stake(bet_id: Uuid) -> Self {
        Self { bet_id, kind: OpKind::Stake }
    }

    pub fn payout(bet_id: Uuid) -> Self {
        Self { bet_id, kind: OpKind::Payout }
    }

    pub fn refund(bet_id: Uuid) -> Self {
        Self { bet_id, kind: OpKind::Refund }
    }
}

/// External wallet collaborator. Both operations must be atomic per user
/// balance and idempotent when retried with the same key; the engine never
/// assumes it can read-modify-write a balance itself.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Debit `amount` from the user's balance. Returns the new balance.
    async fn debit(
        &self,
        user_id: &str,
        currency: &str,
        amount: f64,
        key: OpKey,
    ) -> Result<f64, WalletError>;

    /// Credit `amount` to the user's balance. Returns the new balance.
    async fn credit(
        &self,
        user_id: &str,
        currency: &str,
        amount: f64,
        key: OpKey,
    ) -> Result<f64, WalletError>;
}

/// In-memory wallet for tests and the demo binary. Balances live in a
/// concurrent map; each applied operation records its resulting balance so
/// a retried key returns the original result instead of moving money twice.
pub struct MemoryWallet {
    balances: DashMap<(String, String), f64>,
    applied: DashMap<OpKey, f64>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            applied: DashMap::new(),
        }
    }

    pub fn deposit(&self, user_id: &str, currency: &str, amount: f64) {
        let mut entry = self
            .balances
            .entry((user_id.to_string(), currency.to_string()))
            .or_insert(0.0);
        *entry += amount;
    }

    pub fn balance(&self, user_id: &str, currency: &str) -> f64 {
        self.balances
            .get(&(user_id.to_string(), currency.to_string()))
            .map(|b| *b)
            .unwrap_or(0.0)
    }
}

impl Default for MemoryWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Wallet for MemoryWallet {
    async fn debit(
        &self,
        user_id: &str,
        currency: &str,
        amount: f64,
        key: OpKey,
    ) -> Result<f64, WalletError> {
        if let Some(applied) = self.applied.get(&key) {
            return Ok(*applied);
        }

        let mut entry = self
            .balances
            .entry((user_id.to_string(), currency.to_string()))
            .or_insert(0.0);
        if *entry + 1e-9 < amount {
            return Err(WalletError::InsufficientBalance {
                currency: currency.to_string(),
                needed: amount,
                available: *entry,
            });
        }
        *entry -= amount;
        let new_balance = *entry;
        drop(entry);

        self.applied.insert(key, new_balance);
        Ok(new_balance)
    }

    async fn credit(
        &self,
        user_id: &str,
        currency: &str,
        amount: f64,
        key: OpKey,
    ) -> Result<f64, WalletError> {
        if let Some(applied) = self.applied.get(&key) {
            return Ok(*applied);
        }

        let mut entry = self
            .balances
            .entry((user_id.to_string(), currency.to_string()))
            .or_insert(0.0);
        *entry += amount;
        let new_balance = *entry;
        drop(entry);

        self.applied.insert(key, new_balance);
        Ok(new_balance)
    }
}

/// Retry and queue tuning for the settlement worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub max_attempts: u32,
    pub queue_capacity: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 100,
            retry_max_ms: 5_000,
            max_attempts: 5,
            queue_capacity: 1_024,
        }
    }
}

enum SettlementJob {
    Credit {
        user_id: String,
        currency: String,
        amount: f64,
        key: OpKey,
    },
    Archive {
        round: RoundRecord,
        bets: Vec<Bet>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the settlement worker. Cloneable; all clones feed one FIFO
/// queue, so archival enqueued after a round's credits is processed after
/// them.
#[derive(Clone)]
pub struct SettlementGateway {
    tx: mpsc::Sender<SettlementJob>,
    enqueued: Arc<DashSet<OpKey>>,
}

impl SettlementGateway {
    pub fn spawn(
        wallet: Arc<dyn Wallet>,
        history: Arc<dyn HistoryStore>,
        config: SettlementConfig,
    ) -> Self {
        let enqueued = Arc::new(DashSet::new());
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(run_worker(rx, wallet, history, config, enqueued.clone()));
        Self { tx, enqueued }
    }

    /// Queue a credit. A key that was already enqueued is a no-op, keyed by
    /// bet id and operation kind.
    pub async fn enqueue_credit(&self, user_id: &str, currency: &str, amount: f64, key: OpKey) {
        if !self.enqueued.insert(key) {
            debug!(bet_id = %key.bet_id, "credit already enqueued, skipping");
            return;
        }
        let job = SettlementJob::Credit {
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            amount,
            key,
        };
        if self.tx.send(job).await.is_err() {
            error!(bet_id = %key.bet_id, "settlement worker is gone, credit dropped");
        }
    }

    /// Archive a terminal round and wait until the worker has drained the
    /// queue up to and including it. The engine only constructs the next
    /// round after this acknowledgment.
    pub async fn finalize_round(&self, round: RoundRecord, bets: Vec<Bet>) {
        let round_id = round.id;
        if self
            .tx
            .send(SettlementJob::Archive { round, bets })
            .await
            .is_err()
        {
            error!(%round_id, "settlement worker is gone, round not archived");
            return;
        }
        self.flush().await;
    }

    /// Wait for every previously queued job to be processed.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SettlementJob::Flush { ack }).await.is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<SettlementJob>,
    wallet: Arc<dyn Wallet>,
    history: Arc<dyn HistoryStore>,
    config: SettlementConfig,
    enqueued: Arc<DashSet<OpKey>>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            SettlementJob::Credit {
                user_id,
                currency,
                amount,
                key,
            } => {
                apply_credit(wallet.as_ref(), &config, &user_id, &currency, amount, key).await;
                // The in-flight marker is only needed while the job sits in
                // the queue; the wallet's own key ledger handles any later
                // duplicate. Dropping it keeps the set bounded by queue depth.
                enqueued.remove(&key);
            }
            SettlementJob::Archive { round, bets } => {
                archive_round(history.as_ref(), &config, round, bets).await;
            }
            SettlementJob::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }
}

async fn apply_credit(
    wallet: &dyn Wallet,
    config: &SettlementConfig,
    user_id: &str,
    currency: &str,
    amount: f64,
    key: OpKey,
) {
    for attempt in 0..config.max_attempts {
        match wallet.credit(user_id, currency, amount, key).await {
            Ok(_) => return,
            Err(WalletError::InsufficientBalance { .. }) => {
                // Credits cannot lack funds; this is a wallet-side
                // inconsistency, not something a retry fixes.
                error!(bet_id = %key.bet_id, "wallet rejected credit as insufficient balance");
                return;
            }
            Err(e) => {
                warn!(
                    bet_id = %key.bet_id,
                    attempt,
                    error = %e,
                    "credit failed, backing off"
                );
                tokio::time::sleep(backoff(config, attempt)).await;
            }
        }
    }
    error!(
        bet_id = %key.bet_id,
        attempts = config.max_attempts,
        "credit permanently failed"
    );
}

async fn archive_round(
    history: &dyn HistoryStore,
    config: &SettlementConfig,
    round: RoundRecord,
    bets: Vec<Bet>,
) {
    let round_id = round.id;
    if let Err(e) = with_retries(config, || history.append_round(round.clone())).await {
        error!(%round_id, error = %e, "round archival permanently failed");
        return;
    }
    for bet in bets {
        let bet_id = bet.id;
        if let Err(e) = with_retries(config, || history.append_bet(bet.clone())).await {
            error!(%bet_id, error = %e, "bet archival permanently failed");
        }
    }
}

async fn with_retries<F, Fut>(config: &SettlementConfig, mut op: F) -> Result<(), HistoryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), HistoryError>>,
{
    let mut last = None;
    for attempt in 0..config.max_attempts {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, error = %e, "history append failed, backing off");
                last = Some(e);
                tokio::time::sleep(backoff(config, attempt)).await;
            }
        }
    }
    Err(last.unwrap_or_else(|| HistoryError::Unavailable("exhausted retries".to_string())))
}

fn backoff(config: &SettlementConfig, attempt: u32) -> Duration {
    let shift = attempt.min(16);
    let ms = config
        .retry_base_ms
        .saturating_mul(1u64 << shift)
        .min(config.retry_max_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::types::RoundOutcome;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn debit_and_credit_move_money() {
        let wallet = MemoryWallet::new();
        wallet.deposit("alice", "USDT", 100.0);

        let bet_id = Uuid::new_v4();
        let after = wallet
            .debit("alice", "USDT", 10.0, OpKey::stake(bet_id))
            .await
            .unwrap();
        assert_eq!(after, 90.0);

        let after = wallet
            .credit("alice", "USDT", 15.0, OpKey::payout(bet_id))
            .await
            .unwrap();
        assert_eq!(after, 105.0);
    }

    #[tokio::test]
    async fn retried_key_is_a_no_op() {
        let wallet = MemoryWallet::new();
        wallet.deposit("alice", "USDT", 100.0);
        let key = OpKey::stake(Uuid::new_v4());

        let first = wallet.debit("alice", "USDT", 10.0, key).await.unwrap();
        let second = wallet.debit("alice", "USDT", 10.0, key).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(wallet.balance("alice", "USDT"), 90.0);
    }

    #[tokio::test]
    async fn insufficient_balance_moves_nothing() {
        let wallet = MemoryWallet::new();
        wallet.deposit("alice", "USDT", 5.0);

        let err = wallet
            .debit("alice", "USDT", 10.0, OpKey::stake(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { .. }));
        assert_eq!(wallet.balance("alice", "USDT"), 5.0);
    }

    #[tokio::test]
    async fn gateway_dedupes_duplicate_credit_enqueues() {
        let wallet = Arc::new(MemoryWallet::new());
        let history = Arc::new(MemoryHistory::new());
        let gateway = SettlementGateway::spawn(
            wallet.clone(),
            history,
            SettlementConfig::default(),
        );

        let key = OpKey::payout(Uuid::new_v4());
        gateway.enqueue_credit("alice", "USDT", 15.0, key).await;
        gateway.enqueue_credit("alice", "USDT", 15.0, key).await;
        gateway.flush().await;

        assert_eq!(wallet.balance("alice", "USDT"), 15.0);
    }

    #[tokio::test]
    async fn dedupe_set_is_pruned_once_credits_settle() {
        let wallet = Arc::new(MemoryWallet::new());
        let history = Arc::new(MemoryHistory::new());
        let gateway = SettlementGateway::spawn(
            wallet.clone(),
            history,
            SettlementConfig::default(),
        );

        for _ in 0..100 {
            gateway
                .enqueue_credit("alice", "USDT", 1.0, OpKey::payout(Uuid::new_v4()))
                .await;
        }
        gateway.flush().await;

        // Every credit was applied and its in-flight marker dropped.
        assert_eq!(wallet.balance("alice", "USDT"), 100.0);
        assert!(gateway.enqueued.is_empty());
    }

    struct FlakyWallet {
        inner: MemoryWallet,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Wallet for FlakyWallet {
        async fn debit(
            &self,
            user_id: &str,
            currency: &str,
            amount: f64,
            key: OpKey,
        ) -> Result<f64, WalletError> {
            self.inner.debit(user_id, currency, amount, key).await
        }

        async fn credit(
            &self,
            user_id: &str,
            currency: &str,
            amount: f64,
            key: OpKey,
        ) -> Result<f64, WalletError> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 { Some(n - 1) } else { None }
            }).is_ok()
            {
                return Err(WalletError::Unavailable("transient outage".to_string()));
            }
            self.inner.credit(user_id, currency, amount, key).await
        }
    }

    #[tokio::test]
    async fn credits_are_retried_through_transient_outages() {
        let wallet = Arc::new(FlakyWallet {
            inner: MemoryWallet::new(),
            failures_left: AtomicU32::new(2),
        });
        let history = Arc::new(MemoryHistory::new());
        let config = SettlementConfig {
            retry_base_ms: 1,
            retry_max_ms: 5,
            ..SettlementConfig::default()
        };
        let gateway = SettlementGateway::spawn(wallet.clone(), history, config);

        gateway
            .enqueue_credit("alice", "USDT", 20.0, OpKey::payout(Uuid::new_v4()))
            .await;
        gateway.flush().await;

        assert_eq!(wallet.inner.balance("alice", "USDT"), 20.0);
    }

    #[tokio::test]
    async fn finalize_round_archives_round_and_bets() {
        let wallet = Arc::new(MemoryWallet::new());
        let history = Arc::new(MemoryHistory::new());
        let gateway = SettlementGateway::spawn(
            wallet,
            history.clone(),
            SettlementConfig::default(),
        );

        let round_id = Uuid::new_v4();
        let record = RoundRecord {
            id: round_id,
            nonce: 1,
            client_seed: "client".to_string(),
            server_seed_hash: "hash".to_string(),
            server_seed: "seed".to_string(),
            crash_point: 2.0,
            outcome: RoundOutcome::Crashed,
            waiting_duration_ms: 5000,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: Utc::now(),
        };
        let bets = vec![Bet::new(Uuid::new_v4(), round_id, "alice", 10.0, "USDT", None)];

        gateway.finalize_round(record, bets).await;

        assert_eq!(history.round_count().await, 1);
        assert_eq!(history.bets_for_round(round_id).await.len(), 1);
    }
}
