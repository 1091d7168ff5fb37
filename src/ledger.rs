//! Round ledger: the authoritative record of one round's bets.
//!
//! Owned exclusively by the round engine; every method here runs inside the
//! engine's serialized lane, so no per-bet locking is needed. Money-affecting
//! fields transition away from `Active` at most once.

use crate::errors::GameError;
use crate::types::{ActiveBetView, Bet, BetOutcome, BetStatus, round_cents};
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

pub struct RoundLedger {
    round_id: Uuid,
    multi_slot: bool,
    bets: HashMap<Uuid, Bet>,
    /// Insertion order, so sweeps and summaries are deterministic.
    order: Vec<Uuid>,
}

impl RoundLedger {
    pub fn new(round_id: Uuid, multi_slot: bool) -> Self {
        Self {
            round_id,
            multi_slot,
            bets: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Validate a placement before any money moves. The wallet debit happens
    /// between validation and [`RoundLedger::insert`]; a failed debit means
    /// the bet is never created.
    pub fn validate_placement(
        &self,
        user_id: &str,
        amount: f64,
        currency: &str,
        auto_cashout_at: Option<f64>,
    ) -> Result<(), GameError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(GameError::InvalidParameter(
                "bet amount must be positive".to_string(),
            ));
        }
        if currency.trim().is_empty() {
            return Err(GameError::InvalidParameter(
                "currency is required".to_string(),
            ));
        }
        if let Some(target) = auto_cashout_at {
            if !target.is_finite() || target <= 1.0 {
                return Err(GameError::InvalidParameter(
                    "auto cashout target must exceed 1.00".to_string(),
                ));
            }
        }
        if !self.multi_slot
            && self
                .bets
                .values()
                .any(|b| b.user_id == user_id && b.status == BetStatus::Active)
        {
            return Err(GameError::AlreadyBet);
        }
        Ok(())
    }

    /// Record an accepted, already-debited bet.
    pub fn insert(
        &mut self,
        bet_id: Uuid,
        user_id: &str,
        amount: f64,
        currency: &str,
        auto_cashout_at: Option<f64>,
    ) -> Bet {
        let bet = Bet::new(bet_id, self.round_id, user_id, amount, currency, auto_cashout_at);
        self.order.push(bet_id);
        self.bets.insert(bet_id, bet.clone());
        bet
    }

    /// The only path that ever sets `CashedOut`; guarantees at-most-once
    /// payout per bet.
    pub fn cash_out(&mut self, bet_id: Uuid, multiplier: f64) -> Result<Bet, GameError> {
        let bet = self.bets.get_mut(&bet_id).ok_or(GameError::NoActiveBet)?;
        if bet.status != BetStatus::Active {
            return Err(GameError::NoActiveBet);
        }
        bet.status = BetStatus::CashedOut;
        bet.cashout_multiplier = Some(multiplier);
        bet.payout = Some(round_cents(bet.amount * multiplier));
        Ok(bet.clone())
    }

    /// Cancel a bet during WAITING: the stake is refunded and the bet ends
    /// `Void`, freeing the user's slot.
    pub fn cancel(&mut self, bet_id: Uuid) -> Result<Bet, GameError> {
        let bet = self.bets.get_mut(&bet_id).ok_or(GameError::NoActiveBet)?;
        if bet.status != BetStatus::Active {
            return Err(GameError::NoActiveBet);
        }
        bet.status = BetStatus::Void;
        bet.payout = Some(bet.amount);
        Ok(bet.clone())
    }

    /// Active bets whose auto-cashout threshold has been reached, ascending
    /// by threshold so evaluation order is reproducible.
    pub fn auto_cashout_due(&self, multiplier: f64) -> Vec<(Uuid, f64)> {
        let mut due: Vec<(Uuid, f64)> = self
            .order
            .iter()
            .filter_map(|id| self.bets.get(id))
            .filter(|b| b.status == BetStatus::Active)
            .filter_map(|b| b.auto_cashout_at.map(|target| (b.id, target)))
            .filter(|(_, target)| *target <= multiplier + 1e-9)
            .collect();
        due.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        due
    }

    /// Settle every remaining active bet as lost. The stake was debited at
    /// placement, so no wallet interaction follows.
    pub fn settle_losses(&mut self) -> Vec<Bet> {
        self.transition_remaining(BetStatus::Lost, |_| 0.0)
    }

    /// Void every remaining active bet at 1.00x (stake refund).
    pub fn void_all(&mut self) -> Vec<Bet> {
        self.transition_remaining(BetStatus::Void, |bet| bet.amount)
    }

    fn transition_remaining(&mut self, status: BetStatus, payout: impl Fn(&Bet) -> f64) -> Vec<Bet> {
        let mut transitioned = Vec::new();
        for id in &self.order {
            if let Some(bet) = self.bets.get_mut(id) {
                if bet.status == BetStatus::Active {
                    bet.status = status;
                    bet.payout = Some(payout(bet));
                    transitioned.push(bet.clone());
                }
            }
        }
        transitioned
    }

    pub fn get(&self, bet_id: Uuid) -> Option<&Bet> {
        self.bets.get(&bet_id)
    }

    /// Every bet's outcome, for the terminal broadcast event.
    pub fn outcomes(&self) -> Vec<BetOutcome> {
        self.order
            .iter()
            .filter_map(|id| self.bets.get(id))
            .map(|bet| BetOutcome {
                user_id: bet.user_id.clone(),
                amount: bet.amount,
                cashout_at: bet.cashout_multiplier,
                payout: bet.payout.unwrap_or(0.0),
            })
            .collect()
    }

    pub fn all_bets(&self) -> Vec<Bet> {
        self.order
            .iter()
            .filter_map(|id| self.bets.get(id))
            .cloned()
            .collect()
    }

    pub fn active_views(&self) -> Vec<ActiveBetView> {
        self.order
            .iter()
            .filter_map(|id| self.bets.get(id))
            .filter(|b| b.status == BetStatus::Active)
            .map(|bet| ActiveBetView {
                bet_id: bet.id,
                user_id: bet.user_id.clone(),
                amount: bet.amount,
                auto_cashout_at: bet.auto_cashout_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> RoundLedger {
        RoundLedger::new(Uuid::new_v4(), false)
    }

    #[test]
    fn rejects_invalid_parameters() {
        let ledger = ledger();
        assert!(matches!(
            ledger.validate_placement("alice", 0.0, "USDT", None),
            Err(GameError::InvalidParameter(_))
        ));
        assert!(matches!(
            ledger.validate_placement("alice", -5.0, "USDT", None),
            Err(GameError::InvalidParameter(_))
        ));
        assert!(matches!(
            ledger.validate_placement("alice", 10.0, "", None),
            Err(GameError::InvalidParameter(_))
        ));
        assert!(matches!(
            ledger.validate_placement("alice", 10.0, "USDT", Some(1.0)),
            Err(GameError::InvalidParameter(_))
        ));
        assert!(ledger
            .validate_placement("alice", 10.0, "USDT", Some(1.01))
            .is_ok());
    }

    #[test]
    fn rejects_duplicate_bet_unless_multi_slot() {
        let mut ledger = ledger();
        ledger.insert(Uuid::new_v4(), "alice", 10.0, "USDT", None);
        assert!(matches!(
            ledger.validate_placement("alice", 5.0, "USDT", None),
            Err(GameError::AlreadyBet)
        ));
        assert!(ledger.validate_placement("bob", 5.0, "USDT", None).is_ok());

        let mut multi = RoundLedger::new(Uuid::new_v4(), true);
        multi.insert(Uuid::new_v4(), "alice", 10.0, "USDT", None);
        assert!(multi.validate_placement("alice", 5.0, "USDT", None).is_ok());
    }

    #[test]
    fn cashout_is_at_most_once() {
        let mut ledger = ledger();
        let bet_id = Uuid::new_v4();
        ledger.insert(bet_id, "alice", 5.0, "USDT", None);

        let bet = ledger.cash_out(bet_id, 2.1).unwrap();
        assert_eq!(bet.status, BetStatus::CashedOut);
        assert_eq!(bet.cashout_multiplier, Some(2.1));
        assert_eq!(bet.payout, Some(10.5));

        // Second cashout and cancel both see a non-active bet.
        assert!(matches!(ledger.cash_out(bet_id, 3.0), Err(GameError::NoActiveBet)));
        assert!(matches!(ledger.cancel(bet_id), Err(GameError::NoActiveBet)));
    }

    #[test]
    fn cashout_unknown_bet() {
        let mut ledger = ledger();
        assert!(matches!(
            ledger.cash_out(Uuid::new_v4(), 1.5),
            Err(GameError::NoActiveBet)
        ));
    }

    #[test]
    fn cancel_frees_the_user_slot() {
        let mut ledger = ledger();
        let bet_id = Uuid::new_v4();
        ledger.insert(bet_id, "alice", 10.0, "USDT", None);

        let bet = ledger.cancel(bet_id).unwrap();
        assert_eq!(bet.status, BetStatus::Void);
        assert_eq!(bet.payout, Some(10.0));
        assert!(ledger.validate_placement("alice", 10.0, "USDT", None).is_ok());
    }

    #[test]
    fn auto_cashout_sweep_is_sorted_ascending() {
        let mut ledger = ledger();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        ledger.insert(a, "alice", 10.0, "USDT", Some(2.5));
        ledger.insert(b, "bob", 10.0, "USDT", Some(1.2));
        ledger.insert(c, "carol", 10.0, "USDT", None);

        let due = ledger.auto_cashout_due(2.0);
        assert_eq!(due, vec![(b, 1.2)]);

        let due = ledger.auto_cashout_due(3.0);
        assert_eq!(due, vec![(b, 1.2), (a, 2.5)]);

        // Threshold exactly at the current multiplier fires.
        let due = ledger.auto_cashout_due(1.2);
        assert_eq!(due, vec![(b, 1.2)]);
    }

    #[test]
    fn settle_losses_leaves_cashed_out_bets_alone() {
        let mut ledger = ledger();
        let winner = Uuid::new_v4();
        let loser = Uuid::new_v4();
        ledger.insert(winner, "alice", 5.0, "USDT", None);
        ledger.insert(loser, "bob", 5.0, "USDT", None);

        ledger.cash_out(winner, 2.1).unwrap();
        let lost = ledger.settle_losses();

        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id, loser);
        assert_eq!(lost[0].payout, Some(0.0));
        assert_eq!(ledger.get(winner).unwrap().status, BetStatus::CashedOut);
        assert_eq!(ledger.get(winner).unwrap().payout, Some(10.5));
    }

    #[test]
    fn void_refunds_at_one_x() {
        let mut ledger = ledger();
        let bet_id = Uuid::new_v4();
        ledger.insert(bet_id, "alice", 25.0, "USDT", Some(3.0));

        let voided = ledger.void_all();
        assert_eq!(voided.len(), 1);
        assert_eq!(voided[0].status, BetStatus::Void);
        assert_eq!(voided[0].payout, Some(25.0));
    }

    #[test]
    fn outcomes_preserve_insertion_order() {
        let mut ledger = ledger();
        ledger.insert(Uuid::new_v4(), "alice", 5.0, "USDT", None);
        ledger.insert(Uuid::new_v4(), "bob", 7.0, "USDT", None);
        ledger.settle_losses();

        let outcomes = ledger.outcomes();
        assert_eq!(outcomes[0].user_id, "alice");
        assert_eq!(outcomes[1].user_id, "bob");
        assert!(outcomes.iter().all(|o| o.payout == 0.0));
    }
}
