//! Round engine: the state machine that sequences WAITING → RUNNING →
//! CRASHED and owns every bet mutation.
//!
//! The engine is a single logical owner of the active round. All external
//! operations and the periodic tick are delivered to one serialized lane
//! and processed strictly one at a time, which is what rules out races on
//! phase, on crash timing, and on bet state without per-bet locks. Wallet
//! credits and archival are dispatched to the settlement gateway and never
//! awaited inline; the one synchronous wallet call is the stake debit,
//! because a bet must not exist if its debit failed.

use crate::broadcast::EventSink;
use crate::clock::MultiplierClock;
use crate::config::CrashConfig;
use crate::errors::GameError;
use crate::fairness::{FairnessGenerator, SeedSource};
use crate::ledger::RoundLedger;
use crate::settlement::{OpKey, SettlementGateway, Wallet};
use crate::types::{
    CashoutReceipt, GameEvent, PlaceBetReceipt, RoundOutcome, RoundPhase, RoundRecord,
    StateSnapshot,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct RoundEngine {
    config: Arc<CrashConfig>,
    wallet: Arc<dyn Wallet>,
    settlement: SettlementGateway,
    sink: Arc<dyn EventSink>,
    seeds: Box<dyn SeedSource>,
    clock: MultiplierClock,

    // Active round state, rebuilt by begin_round.
    fairness: FairnessGenerator,
    ledger: RoundLedger,
    round_id: Uuid,
    nonce: u64,
    next_nonce: u64,
    phase: RoundPhase,
    crash_point: f64,
    crash_time_ms: u64,
    current_multiplier: f64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    waiting_since_ms: u64,
    running_since_ms: u64,
    now_ms: u64,
}

impl RoundEngine {
    pub fn new(
        config: Arc<CrashConfig>,
        wallet: Arc<dyn Wallet>,
        settlement: SettlementGateway,
        sink: Arc<dyn EventSink>,
        seeds: Box<dyn SeedSource>,
        starting_nonce: u64,
    ) -> Result<Self, GameError> {
        let clock = MultiplierClock::new(config.growth_rate_k);
        let mut engine = Self {
            config,
            wallet,
            settlement,
            sink,
            seeds,
            clock,
            fairness: FairnessGenerator::from_seed([0u8; 32]),
            ledger: RoundLedger::new(Uuid::nil(), false),
            round_id: Uuid::nil(),
            nonce: 0,
            next_nonce: starting_nonce,
            phase: RoundPhase::Crashed,
            crash_point: 1.0,
            crash_time_ms: 0,
            current_multiplier: 1.0,
            created_at: Utc::now(),
            started_at: None,
            waiting_since_ms: 0,
            running_since_ms: 0,
            now_ms: 0,
        };
        engine.begin_round(0)?;
        Ok(engine)
    }

    /// Construct the next round: fresh seed commitment, fresh nonce, crash
    /// point fixed before any bet is accepted.
    fn begin_round(&mut self, now_ms: u64) -> Result<(), GameError> {
        let fairness = self.seeds.next()?;
        let nonce = self.next_nonce;
        self.next_nonce += 1;

        let crash_point =
            fairness.crash_point(&self.config.client_seed, nonce, self.config.house_edge);
        self.crash_time_ms = self.clock.crash_time_ms(crash_point);
        self.crash_point = crash_point;
        self.round_id = Uuid::new_v4();
        self.nonce = nonce;
        self.ledger = RoundLedger::new(self.round_id, self.config.multi_slot_betting);
        self.phase = RoundPhase::Waiting;
        self.current_multiplier = 1.0;
        self.created_at = Utc::now();
        self.started_at = None;
        self.waiting_since_ms = now_ms;
        self.now_ms = now_ms;

        info!(
            round_id = %self.round_id,
            nonce,
            seed_hash = %fairness.seed_hash(),
            "round opened for betting"
        );
        self.sink.emit(&GameEvent::NewRound {
            round_id: self.round_id,
            server_seed_hash: fairness.seed_hash().to_string(),
            countdown_ms: self.config.waiting_duration_ms,
        });
        self.fairness = fairness;
        Ok(())
    }

    /// Accept a bet during WAITING. The wallet debit is resolved before the
    /// bet exists; a wallet failure surfaces to the caller verbatim.
    pub async fn place_bet(
        &mut self,
        user_id: &str,
        amount: f64,
        currency: &str,
        auto_cashout_at: Option<f64>,
    ) -> Result<PlaceBetReceipt, GameError> {
        if self.phase != RoundPhase::Waiting {
            return Err(GameError::RoundNotAccepting);
        }
        self.ledger
            .validate_placement(user_id, amount, currency, auto_cashout_at)?;

        let bet_id = Uuid::new_v4();
        self.wallet
            .debit(user_id, currency, amount, OpKey::stake(bet_id))
            .await?;
        self.ledger
            .insert(bet_id, user_id, amount, currency, auto_cashout_at);

        debug!(round_id = %self.round_id, %bet_id, user_id, amount, "bet accepted");
        self.sink.emit(&GameEvent::Bet {
            round_id: self.round_id,
            user_id: user_id.to_string(),
            amount,
            auto_cashout_at,
        });
        Ok(PlaceBetReceipt {
            bet_id,
            round_id: self.round_id,
        })
    }

    /// Cancel a bet during WAITING; the stake comes back as a refund credit.
    pub async fn cancel_bet(&mut self, bet_id: Uuid) -> Result<(), GameError> {
        if self.phase != RoundPhase::Waiting {
            return Err(GameError::RoundNotAccepting);
        }
        let bet = self.ledger.cancel(bet_id)?;
        self.settlement
            .enqueue_credit(&bet.user_id, &bet.currency, bet.amount, OpKey::refund(bet_id))
            .await;
        debug!(round_id = %self.round_id, %bet_id, "bet cancelled");
        Ok(())
    }

    /// Manual cashout during RUNNING at the last authoritative tick's
    /// multiplier. The only other path to CASHED_OUT is the auto sweep.
    pub async fn cashout(&mut self, bet_id: Uuid) -> Result<CashoutReceipt, GameError> {
        if self.phase != RoundPhase::Running {
            return Err(GameError::RoundNotRunning);
        }
        let multiplier = self.current_multiplier;
        let bet = self.ledger.cash_out(bet_id, multiplier)?;
        let payout = bet.payout.unwrap_or(0.0);

        self.settlement
            .enqueue_credit(&bet.user_id, &bet.currency, payout, OpKey::payout(bet_id))
            .await;
        self.sink.emit(&GameEvent::Cashout {
            round_id: self.round_id,
            user_id: bet.user_id,
            multiplier,
            payout,
        });
        Ok(CashoutReceipt { payout, multiplier })
    }

    /// Administrative void: every remaining active bet is refunded at
    /// 1.00x, a terminal outcome distinct from an ordinary crash.
    pub async fn void_round(&mut self) -> Result<(), GameError> {
        let voided = self.ledger.void_all();
        for bet in &voided {
            self.settlement
                .enqueue_credit(&bet.user_id, &bet.currency, bet.amount, OpKey::refund(bet.id))
                .await;
        }
        warn!(round_id = %self.round_id, refunds = voided.len(), "round voided by admin");
        self.sink.emit(&GameEvent::Voided {
            round_id: self.round_id,
            bets: self.ledger.outcomes(),
        });

        self.phase = RoundPhase::Crashed;
        self.finalize(RoundOutcome::Voided).await;
        self.begin_round(self.now_ms)
    }

    /// One authoritative clock tick. The sole writer of round phase.
    pub async fn tick(&mut self, now_ms: u64) -> Result<(), GameError> {
        self.now_ms = now_ms;
        match self.phase {
            RoundPhase::Waiting => {
                if now_ms.saturating_sub(self.waiting_since_ms) >= self.config.waiting_duration_ms {
                    self.phase = RoundPhase::Running;
                    self.running_since_ms = now_ms;
                    self.current_multiplier = 1.0;
                    self.started_at = Some(Utc::now());
                    info!(round_id = %self.round_id, "round running");
                    self.sink.emit(&GameEvent::Start {
                        round_id: self.round_id,
                    });
                }
                Ok(())
            }
            RoundPhase::Running => {
                let elapsed = now_ms.saturating_sub(self.running_since_ms);
                let crashing = elapsed >= self.crash_time_ms;
                // On the crash tick the sweep is evaluated against the crash
                // point itself, so a threshold at or below it still pays and
                // one above it never does.
                let multiplier = if crashing {
                    self.crash_point
                } else {
                    self.clock.multiplier_at(elapsed)
                };
                self.current_multiplier = multiplier;

                if !crashing {
                    self.sink.emit(&GameEvent::Tick {
                        round_id: self.round_id,
                        multiplier,
                        elapsed_ms: elapsed,
                    });
                }

                self.sweep_auto_cashouts(multiplier).await;

                if crashing {
                    self.crash().await?;
                }
                Ok(())
            }
            // Terminal phase is transient inside crash()/void_round(); a
            // tick landing here is a no-op.
            RoundPhase::Crashed => Ok(()),
        }
    }

    /// Deterministic sweep of auto-cashout targets, ascending by threshold.
    /// Each bet cashes out at its own target, not the possibly-higher tick
    /// multiplier, so the result is independent of tick granularity.
    async fn sweep_auto_cashouts(&mut self, multiplier: f64) {
        for (bet_id, target) in self.ledger.auto_cashout_due(multiplier) {
            match self.ledger.cash_out(bet_id, target) {
                Ok(bet) => {
                    let payout = bet.payout.unwrap_or(0.0);
                    self.settlement
                        .enqueue_credit(
                            &bet.user_id,
                            &bet.currency,
                            payout,
                            OpKey::payout(bet_id),
                        )
                        .await;
                    self.sink.emit(&GameEvent::Cashout {
                        round_id: self.round_id,
                        user_id: bet.user_id,
                        multiplier: target,
                        payout,
                    });
                }
                Err(e) => {
                    // The due list came from the ledger one statement ago;
                    // a miss here means a bookkeeping bug worth surfacing.
                    error!(%bet_id, error = %e, "auto cashout lost its bet");
                }
            }
        }
    }

    async fn crash(&mut self) -> Result<(), GameError> {
        self.phase = RoundPhase::Crashed;
        self.ledger.settle_losses();

        info!(
            round_id = %self.round_id,
            crash_point = self.crash_point,
            bets = self.ledger.len(),
            "round crashed"
        );
        self.sink.emit(&GameEvent::Crashed {
            round_id: self.round_id,
            crash_point: self.crash_point,
            server_seed: self.fairness.reveal(),
            bets: self.ledger.outcomes(),
        });

        self.finalize(RoundOutcome::Crashed).await;
        self.begin_round(self.now_ms)
    }

    /// Archive the terminal round and wait for settlement acknowledgment;
    /// only then may the next round be constructed.
    async fn finalize(&mut self, outcome: RoundOutcome) {
        let record = RoundRecord {
            id: self.round_id,
            nonce: self.nonce,
            client_seed: self.config.client_seed.clone(),
            server_seed_hash: self.fairness.seed_hash().to_string(),
            server_seed: self.fairness.reveal(),
            crash_point: self.crash_point,
            outcome,
            waiting_duration_ms: self.config.waiting_duration_ms,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: Utc::now(),
        };
        self.settlement
            .finalize_round(record, self.ledger.all_bets())
            .await;
    }

    /// Always answerable, even after a participant's own request failed.
    pub fn current_state(&self) -> StateSnapshot {
        StateSnapshot {
            round_id: self.round_id,
            phase: self.phase,
            current_multiplier: self.current_multiplier,
            server_seed_hash: self.fairness.seed_hash().to_string(),
            active_bets: self.ledger.active_views(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::PlaceBet {
                user_id,
                amount,
                currency,
                auto_cashout_at,
                reply,
            } => {
                let result = self
                    .place_bet(&user_id, amount, &currency, auto_cashout_at)
                    .await;
                let _ = reply.send(result);
            }
            EngineCommand::CancelBet { bet_id, reply } => {
                let _ = reply.send(self.cancel_bet(bet_id).await);
            }
            EngineCommand::Cashout { bet_id, reply } => {
                let _ = reply.send(self.cashout(bet_id).await);
            }
            EngineCommand::VoidRound { reply } => {
                let _ = reply.send(self.void_round().await);
            }
            EngineCommand::GetState { reply } => {
                let _ = reply.send(self.current_state());
            }
        }
    }
}

/// Messages delivered to the engine lane.
pub enum EngineCommand {
    PlaceBet {
        user_id: String,
        amount: f64,
        currency: String,
        auto_cashout_at: Option<f64>,
        reply: oneshot::Sender<Result<PlaceBetReceipt, GameError>>,
    },
    CancelBet {
        bet_id: Uuid,
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    Cashout {
        bet_id: Uuid,
        reply: oneshot::Sender<Result<CashoutReceipt, GameError>>,
    },
    VoidRound {
        reply: oneshot::Sender<Result<(), GameError>>,
    },
    GetState {
        reply: oneshot::Sender<StateSnapshot>,
    },
}

/// Cloneable front door to the engine lane. Each call is one message; the
/// lane processes messages and ticks strictly in arrival order.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn place_bet(
        &self,
        user_id: &str,
        amount: f64,
        currency: &str,
        auto_cashout_at: Option<f64>,
    ) -> Result<PlaceBetReceipt, GameError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::PlaceBet {
                user_id: user_id.to_string(),
                amount,
                currency: currency.to_string(),
                auto_cashout_at,
                reply,
            })
            .await
            .map_err(|_| GameError::EngineClosed)?;
        rx.await.map_err(|_| GameError::EngineClosed)?
    }

    pub async fn cancel_bet(&self, bet_id: Uuid) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::CancelBet { bet_id, reply })
            .await
            .map_err(|_| GameError::EngineClosed)?;
        rx.await.map_err(|_| GameError::EngineClosed)?
    }

    pub async fn cashout(&self, bet_id: Uuid) -> Result<CashoutReceipt, GameError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Cashout { bet_id, reply })
            .await
            .map_err(|_| GameError::EngineClosed)?;
        rx.await.map_err(|_| GameError::EngineClosed)?
    }

    pub async fn void_round(&self) -> Result<(), GameError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::VoidRound { reply })
            .await
            .map_err(|_| GameError::EngineClosed)?;
        rx.await.map_err(|_| GameError::EngineClosed)?
    }

    pub async fn current_state(&self) -> Result<StateSnapshot, GameError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetState { reply })
            .await
            .map_err(|_| GameError::EngineClosed)?;
        rx.await.map_err(|_| GameError::EngineClosed)
    }
}

/// Spawn the engine lane: one task owning the engine, fed by a command
/// channel and a fixed-interval tick driven by monotonic time.
pub fn spawn_engine(mut engine: RoundEngine, tick_interval: Duration) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineCommand>(256);
    tokio::spawn(async move {
        let epoch = Instant::now();
        let mut ticker = interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ms = epoch.elapsed().as_millis() as u64;
                    if let Err(e) = engine.tick(now_ms).await {
                        // Round creation failed (entropy). Fatal by design:
                        // stop the lane rather than reuse a seed.
                        error!(error = %e, "engine lane stopped");
                        break;
                    }
                }
                command = rx.recv() => match command {
                    Some(command) => engine.handle_command(command).await,
                    None => break,
                },
            }
        }
    });
    EngineHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::RecordingSink;
    use crate::config::CrashConfig;
    use crate::fairness::FixedSeedSource;
    use crate::history::MemoryHistory;
    use crate::settlement::{MemoryWallet, SettlementConfig};

    fn test_config() -> Arc<CrashConfig> {
        Arc::new(CrashConfig {
            waiting_duration_ms: 500,
            ..CrashConfig::default()
        })
    }

    struct Harness {
        engine: RoundEngine,
        wallet: Arc<MemoryWallet>,
        sink: Arc<RecordingSink>,
        settlement: SettlementGateway,
    }

    fn harness(seed: [u8; 32], starting_nonce: u64) -> Harness {
        let config = test_config();
        let wallet = Arc::new(MemoryWallet::new());
        wallet.deposit("alice", "USDT", 1_000.0);
        wallet.deposit("bob", "USDT", 1_000.0);
        let history = Arc::new(MemoryHistory::new());
        let settlement = SettlementGateway::spawn(
            wallet.clone(),
            history,
            SettlementConfig::default(),
        );
        let sink = Arc::new(RecordingSink::new());
        let engine = RoundEngine::new(
            config,
            wallet.clone(),
            settlement.clone(),
            sink.clone(),
            Box::new(FixedSeedSource::new(vec![seed])),
            starting_nonce,
        )
        .expect("engine construction");
        Harness {
            engine,
            wallet,
            sink,
            settlement,
        }
    }

    #[tokio::test]
    async fn bet_rejected_outside_waiting_without_debit() {
        let mut h = harness([3u8; 32], 0);
        h.engine.tick(600).await.unwrap();
        assert_eq!(h.engine.phase(), RoundPhase::Running);

        let err = h
            .engine
            .place_bet("alice", 10.0, "USDT", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RoundNotAccepting));
        assert_eq!(h.wallet.balance("alice", "USDT"), 1_000.0);
    }

    #[tokio::test]
    async fn cashout_rejected_during_waiting() {
        let mut h = harness([3u8; 32], 0);
        let receipt = h.engine.place_bet("alice", 10.0, "USDT", None).await.unwrap();
        let err = h.engine.cashout(receipt.bet_id).await.unwrap_err();
        assert!(matches!(err, GameError::RoundNotRunning));
    }

    #[tokio::test]
    async fn insufficient_balance_surfaces_verbatim_and_creates_no_bet() {
        let mut h = harness([3u8; 32], 0);
        let err = h
            .engine
            .place_bet("alice", 5_000.0, "USDT", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert!(h.engine.current_state().active_bets.is_empty());
        assert_eq!(h.wallet.balance("alice", "USDT"), 1_000.0);
    }

    #[tokio::test]
    async fn waiting_countdown_then_start_event() {
        let mut h = harness([3u8; 32], 0);
        h.engine.tick(100).await.unwrap();
        assert_eq!(h.engine.phase(), RoundPhase::Waiting);
        h.engine.tick(499).await.unwrap();
        assert_eq!(h.engine.phase(), RoundPhase::Waiting);
        h.engine.tick(500).await.unwrap();
        assert_eq!(h.engine.phase(), RoundPhase::Running);

        let events = h.sink.snapshot();
        assert!(matches!(events[0], GameEvent::NewRound { .. }));
        assert!(matches!(events.last().unwrap(), GameEvent::Start { .. }));
    }

    #[tokio::test]
    async fn cancel_during_waiting_refunds_the_stake() {
        let mut h = harness([3u8; 32], 0);
        let receipt = h.engine.place_bet("alice", 10.0, "USDT", None).await.unwrap();
        assert_eq!(h.wallet.balance("alice", "USDT"), 990.0);

        h.engine.cancel_bet(receipt.bet_id).await.unwrap();
        h.settlement.flush().await;

        assert_eq!(h.wallet.balance("alice", "USDT"), 1_000.0);
        assert!(h.engine.current_state().active_bets.is_empty());
        // The slot is free again.
        assert!(h.engine.place_bet("alice", 10.0, "USDT", None).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_rejected_once_running_and_moves_no_money() {
        let mut h = harness([3u8; 32], 0);
        let receipt = h.engine.place_bet("alice", 10.0, "USDT", None).await.unwrap();
        h.engine.tick(600).await.unwrap();
        assert_eq!(h.engine.phase(), RoundPhase::Running);

        let err = h.engine.cancel_bet(receipt.bet_id).await.unwrap_err();
        assert!(matches!(err, GameError::RoundNotAccepting));

        h.settlement.flush().await;
        assert_eq!(h.wallet.balance("alice", "USDT"), 990.0);
        assert_eq!(h.engine.current_state().active_bets.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_reflects_active_bets() {
        let mut h = harness([3u8; 32], 0);
        h.engine
            .place_bet("alice", 10.0, "USDT", Some(2.0))
            .await
            .unwrap();

        let state = h.engine.current_state();
        assert_eq!(state.phase, RoundPhase::Waiting);
        assert_eq!(state.current_multiplier, 1.0);
        assert_eq!(state.active_bets.len(), 1);
        assert_eq!(state.active_bets[0].user_id, "alice");
        assert_eq!(state.active_bets[0].auto_cashout_at, Some(2.0));
    }
}
