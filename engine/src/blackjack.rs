//! Blackjack orchestrator.
//!
//! Composes the deck model, dealer policy, outcome resolver, XP ledger, and
//! session store into the round state machine:
//!
//! `NoGame -> Active(player turn) -> Resolving -> Terminal`
//!
//! The bet is escrowed: debited under `blackjack_loss` before any card is
//! dealt, then a single payout credit lands at resolution. A crash mid-round
//! therefore never leaves the ledger owing money to a player; do not move
//! settlement to round end.

use crate::clock::Clock;
use crate::config::BlackjackConfig;
use crate::dealer::dealer_play;
use crate::deck::{deal_initial_hands, draw_one, hand_value, is_blackjack, shuffled, standard_deck};
use crate::ledger::{LedgerError, XpLedger};
use crate::outcome::determine_outcome;
use crate::sessions::{SessionError, SessionManager};
use crate::store::Store;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex};
use tableside_types::{Card, GameSession, GameType, LastAction, Outcome, TxnSource, UserId};
use thiserror::Error;

/// External class/skill bonus applied to net winnings before the payout
/// credit. The skill-tree formulas live outside the core; the default is a
/// pass-through.
pub trait WinningsBonus: Send + Sync + 'static {
    fn apply(&self, net_winnings: u64) -> u64;
}

/// Identity bonus.
pub struct NoBonus;

impl WinningsBonus for NoBonus {
    fn apply(&self, net_winnings: u64) -> u64 {
        net_winnings
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bet or double exceeds available funds.
    #[error("insufficient XP for this bet")]
    InsufficientBalance,
    /// Bet outside `[min, max]` for this user's balance.
    #[error("bet must be between {min} and {max} XP")]
    InvalidBetRange { min: u64, max: u64 },
    /// A round is already live; resume it instead.
    #[error("a blackjack game is already in progress")]
    SessionAlreadyActive,
    /// No live round to act on (never started, resolved, or expired).
    #[error("no active blackjack game")]
    NoActiveSession,
    /// Double down requires the initial two-card hand.
    #[error("double down is not available")]
    NotEligible,
    /// Balance record missing; registration precedes play.
    #[error("user {0} is not registered")]
    UserNotFound(UserId),
    /// Cannot happen within a single round; checked anyway.
    #[error("deck exhausted")]
    DeckExhausted,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<LedgerError> for EngineError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientBalance { .. } => EngineError::InsufficientBalance,
            LedgerError::UserNotFound(user) => EngineError::UserNotFound(user),
            LedgerError::Store(inner) => EngineError::Store(inner),
        }
    }
}

impl From<SessionError> for EngineError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::AlreadyActive(_) => EngineError::SessionAlreadyActive,
            SessionError::NotFound(_) => EngineError::NoActiveSession,
            SessionError::Store(inner) => EngineError::Store(inner),
        }
    }
}

/// Round settlement reported to the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSummary {
    pub outcome: Outcome,
    /// Total credited at resolution (bet plus profit; zero for a loss).
    pub payout: u64,
    /// `payout - total_bet`; negative for a loss.
    pub net_change: i64,
    pub new_balance: u64,
}

/// Outcome of `start_game`: the fresh session, plus an immediate settlement
/// when either opening hand was a natural.
#[derive(Clone, Debug)]
pub struct StartOutcome {
    pub session: GameSession,
    pub resolution: Option<ResultSummary>,
}

/// Outcome of `hit`: the updated session, and the settlement when the hit
/// busted the hand.
#[derive(Clone, Debug)]
pub struct HitOutcome {
    pub session: GameSession,
    pub bust: bool,
    pub resolution: Option<ResultSummary>,
}

pub struct BlackjackEngine<S: Store, C: Clock> {
    config: BlackjackConfig,
    ledger: XpLedger<S, C>,
    sessions: SessionManager<S, C>,
    rng: Mutex<ChaCha8Rng>,
    bonus: Arc<dyn WinningsBonus>,
}

impl<S: Store, C: Clock> BlackjackEngine<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self::with_config(store, clock, BlackjackConfig::default())
    }

    pub fn with_config(store: Arc<S>, clock: Arc<C>, config: BlackjackConfig) -> Self {
        let ledger = XpLedger::new(Arc::clone(&store), Arc::clone(&clock));
        let sessions = SessionManager::new(store, clock, config.session_timeout);
        Self {
            config,
            ledger,
            sessions,
            rng: Mutex::new(ChaCha8Rng::from_entropy()),
            bonus: Arc::new(NoBonus),
        }
    }

    /// Deterministic shuffles for simulations and tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    /// Install the external winnings multiplier.
    pub fn with_bonus(mut self, bonus: Arc<dyn WinningsBonus>) -> Self {
        self.bonus = bonus;
        self
    }

    pub fn config(&self) -> &BlackjackConfig {
        &self.config
    }

    pub fn ledger(&self) -> &XpLedger<S, C> {
        &self.ledger
    }

    pub fn sessions(&self) -> &SessionManager<S, C> {
        &self.sessions
    }

    /// Start a round: validate the bet, escrow it, create the session, and
    /// deal. Naturals on either side resolve immediately.
    pub async fn start_game(
        &self,
        user: &UserId,
        bet_amount: u64,
    ) -> Result<StartOutcome, EngineError> {
        let deck = {
            // A poisoned lock cannot corrupt the RNG state; keep dealing.
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            shuffled(&standard_deck(), &mut *rng)
        };
        self.start_game_with_deck(user, bet_amount, deck).await
    }

    /// Start with a pre-arranged deck. Exercised directly by scenario tests;
    /// `start_game` supplies the shuffled deck in production.
    pub(crate) async fn start_game_with_deck(
        &self,
        user: &UserId,
        bet_amount: u64,
        mut deck: Vec<Card>,
    ) -> Result<StartOutcome, EngineError> {
        let check = self
            .ledger
            .can_afford_bet(user, bet_amount, &self.config)
            .await?;
        if !check.can_afford {
            if bet_amount < check.min_bet || bet_amount > check.max_bet {
                return Err(EngineError::InvalidBetRange {
                    min: check.min_bet,
                    max: check.max_bet,
                });
            }
            return Err(EngineError::InsufficientBalance);
        }
        if self
            .sessions
            .has_active_session(user, GameType::Blackjack)
            .await?
        {
            return Err(EngineError::SessionAlreadyActive);
        }

        // Escrow: the bet is booked as a loss up front.
        self.ledger
            .process_transaction(user, -(bet_amount as i64), TxnSource::BlackjackLoss, None)
            .await?;

        let session_id = match self
            .sessions
            .create_session(user, GameType::Blackjack, bet_amount)
            .await
        {
            Ok(id) => id,
            Err(error) => {
                // Compensating credit: the debited bet must never be lost to
                // a session that does not exist.
                tracing::warn!(user = %user, bet_amount, "session create failed, refunding bet");
                self.ledger
                    .process_transaction(user, bet_amount as i64, TxnSource::BlackjackPush, None)
                    .await?;
                return Err(error.into());
            }
        };

        let (player_hand, dealer_hand) = deal_initial_hands(&mut deck);
        self.sessions
            .update_hand_state(
                session_id,
                player_hand.clone(),
                dealer_hand.clone(),
                deck,
                LastAction::Deal,
            )
            .await?;

        let session = self
            .sessions
            .session(session_id)
            .await?
            .ok_or(EngineError::NoActiveSession)?;

        tracing::info!(
            user = %user,
            session_id,
            bet = bet_amount,
            "blackjack game started"
        );

        // Naturals skip the player turn entirely.
        if is_blackjack(&player_hand) || is_blackjack(&dealer_hand) {
            let summary = self.resolve(&session).await?;
            let session = self
                .sessions
                .session(session_id)
                .await?
                .ok_or(EngineError::NoActiveSession)?;
            return Ok(StartOutcome {
                session,
                resolution: Some(summary),
            });
        }

        Ok(StartOutcome {
            session,
            resolution: None,
        })
    }

    /// Draw exactly one card into the player hand. A bust resolves the round
    /// immediately; otherwise the player keeps the turn (double is no longer
    /// offered after any hit).
    pub async fn hit(&self, user: &UserId) -> Result<HitOutcome, EngineError> {
        let mut session = self
            .sessions
            .active_session(user, GameType::Blackjack)
            .await?
            .ok_or(EngineError::NoActiveSession)?;

        let card = draw_one(&mut session.deck).ok_or(EngineError::DeckExhausted)?;
        session.player_hand.push(card);
        session.last_action = Some(LastAction::Hit);
        self.sessions
            .update_hand_state(
                session.id,
                session.player_hand.clone(),
                session.dealer_hand.clone(),
                session.deck.clone(),
                LastAction::Hit,
            )
            .await?;

        let bust = hand_value(&session.player_hand).bust;
        let (session, resolution) = if bust {
            let summary = self.resolve(&session).await?;
            // Return the settled record, as start_game does for naturals.
            let session = self
                .sessions
                .session(session.id)
                .await?
                .ok_or(EngineError::NoActiveSession)?;
            (session, Some(summary))
        } else {
            (session, None)
        };
        Ok(HitOutcome {
            session,
            bust,
            resolution,
        })
    }

    /// End the player turn: the dealer plays out, then the round resolves.
    pub async fn stand(&self, user: &UserId) -> Result<ResultSummary, EngineError> {
        let mut session = self
            .sessions
            .active_session(user, GameType::Blackjack)
            .await?
            .ok_or(EngineError::NoActiveSession)?;

        dealer_play(&mut session.dealer_hand, &mut session.deck);
        session.last_action = Some(LastAction::Stand);
        self.sessions
            .update_hand_state(
                session.id,
                session.player_hand.clone(),
                session.dealer_hand.clone(),
                session.deck.clone(),
                LastAction::Stand,
            )
            .await?;

        self.resolve(&session).await
    }

    /// Double the bet, draw one forced card, and resolve. Fails closed: when
    /// the extra debit is rejected, nothing about the round changes.
    pub async fn double(&self, user: &UserId) -> Result<ResultSummary, EngineError> {
        let mut session = self
            .sessions
            .active_session(user, GameType::Blackjack)
            .await?
            .ok_or(EngineError::NoActiveSession)?;

        if session.player_hand.len() != 2 {
            return Err(EngineError::NotEligible);
        }

        let original_bet = session.bet_amount;
        self.ledger
            .process_transaction(
                user,
                -(original_bet as i64),
                TxnSource::BlackjackLoss,
                Some(session.id),
            )
            .await?;

        // From here the round settles at the doubled stake; persist it so the
        // session row reconciles against both debits. If the rewrite fails,
        // the extra escrow must come back and the round stays at the
        // original stake.
        let total_bet = original_bet.saturating_mul(2);
        if let Err(error) = self.sessions.update_bet_amount(session.id, total_bet).await {
            tracing::warn!(
                user = %user,
                session_id = session.id,
                "bet update failed, refunding double"
            );
            self.ledger
                .process_transaction(
                    user,
                    original_bet as i64,
                    TxnSource::BlackjackPush,
                    Some(session.id),
                )
                .await?;
            return Err(error.into());
        }
        session.bet_amount = total_bet;

        let card = draw_one(&mut session.deck).ok_or(EngineError::DeckExhausted)?;
        session.player_hand.push(card);
        session.last_action = Some(LastAction::Double);

        if !hand_value(&session.player_hand).bust {
            dealer_play(&mut session.dealer_hand, &mut session.deck);
        }
        self.sessions
            .update_hand_state(
                session.id,
                session.player_hand.clone(),
                session.dealer_hand.clone(),
                session.deck.clone(),
                LastAction::Double,
            )
            .await?;

        self.resolve(&session).await
    }

    /// The user's live round, for resuming display after a reconnect.
    pub async fn active_game(&self, user: &UserId) -> Result<Option<GameSession>, EngineError> {
        Ok(self
            .sessions
            .active_session(user, GameType::Blackjack)
            .await?)
    }

    /// Settle a finished round: close the session first, then credit any
    /// payout exactly once.
    async fn resolve(&self, session: &GameSession) -> Result<ResultSummary, EngineError> {
        let outcome = determine_outcome(&session.player_hand, &session.dealer_hand);
        let total_bet = session.bet_amount;
        let payout = self.payout_for(outcome, total_bet);

        // The one-shot terminal transition is the settlement gate: when
        // duplicate actions race, only the caller that wins the transition
        // gets to credit the payout. The rest see the round as already over.
        let settled = self
            .sessions
            .end_session(session.id, outcome.terminal_state(), payout)
            .await?;
        if !settled {
            return Err(EngineError::NoActiveSession);
        }

        if payout > 0 {
            self.ledger
                .process_transaction(
                    &session.user_id,
                    payout as i64,
                    outcome.txn_source(),
                    Some(session.id),
                )
                .await?;
        }

        let new_balance = self
            .ledger
            .balance(&session.user_id)
            .await?
            .ok_or_else(|| EngineError::UserNotFound(session.user_id.clone()))?;
        let net_change = payout as i64 - total_bet as i64;

        tracing::info!(
            user = %session.user_id,
            session_id = session.id,
            outcome = %outcome,
            total_bet,
            payout,
            net_change,
            new_balance,
            "blackjack round resolved"
        );

        Ok(ResultSummary {
            outcome,
            payout,
            net_change,
            new_balance,
        })
    }

    /// Payout schedule on the effective bet. Net winnings pass through the
    /// external bonus before being added back to the returned stake.
    fn payout_for(&self, outcome: Outcome, total_bet: u64) -> u64 {
        match outcome {
            Outcome::Blackjack => {
                let profit = self.config.blackjack_profit(total_bet);
                total_bet.saturating_add(self.bonus.apply(profit))
            }
            Outcome::Win => total_bet.saturating_add(self.bonus.apply(total_bet)),
            Outcome::Push => total_bet,
            Outcome::Loss => 0,
        }
    }
}
