//! Session manager: durable game rounds with at-most-one active per
//! (user, game type).
//!
//! Uniqueness is a read-then-write check, not a row lock; callers serialize
//! per user (the orchestrator always validates before any ledger debit), and
//! a failed create is the sole race-resolution signal.

use crate::clock::Clock;
use crate::store::{NewSession, Store};
use std::sync::Arc;
use std::time::Duration;
use tableside_types::{Card, GameSession, GameType, LastAction, SessionState, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("user already has an active {0} session")]
    AlreadyActive(GameType),
    #[error("session {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct SessionManager<S: Store, C: Clock> {
    store: Arc<S>,
    clock: Arc<C>,
    timeout: Duration,
}

impl<S: Store, C: Clock> SessionManager<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// Create a new active session. Rejects when the user already has a live
    /// round of this game type.
    pub async fn create_session(
        &self,
        user: &UserId,
        game_type: GameType,
        bet_amount: u64,
    ) -> Result<u64, SessionError> {
        if self.store.active_session(user, game_type).await?.is_some() {
            return Err(SessionError::AlreadyActive(game_type));
        }
        let id = self
            .store
            .insert_session(NewSession {
                user_id: user.clone(),
                game_type,
                bet_amount,
                created_at_ms: self.clock.now_ms(),
            })
            .await?;
        Ok(id)
    }

    pub async fn has_active_session(
        &self,
        user: &UserId,
        game_type: GameType,
    ) -> Result<bool, SessionError> {
        Ok(self.store.active_session(user, game_type).await?.is_some())
    }

    /// The user's live round with full hand/deck state, for resuming play
    /// after any gap (including a process restart).
    pub async fn active_session(
        &self,
        user: &UserId,
        game_type: GameType,
    ) -> Result<Option<GameSession>, SessionError> {
        Ok(self.store.active_session(user, game_type).await?)
    }

    pub async fn session(&self, id: u64) -> Result<Option<GameSession>, SessionError> {
        Ok(self.store.session(id).await?)
    }

    /// Persist the mutable hand fields after a deal or player action.
    pub async fn update_hand_state(
        &self,
        id: u64,
        player_hand: Vec<Card>,
        dealer_hand: Vec<Card>,
        deck: Vec<Card>,
        last_action: LastAction,
    ) -> Result<(), SessionError> {
        self.store
            .update_hand_state(id, player_hand, dealer_hand, deck, last_action)
            .await?;
        Ok(())
    }

    /// Rewrite the effective wager after a double down so the row reconciles
    /// against its ledger entries.
    pub async fn update_bet_amount(&self, id: u64, bet_amount: u64) -> Result<(), SessionError> {
        self.store.update_bet_amount(id, bet_amount).await?;
        Ok(())
    }

    /// One-shot terminal transition. A repeat call is a no-op returning
    /// `false`; it never re-triggers any ledger effect.
    pub async fn end_session(
        &self,
        id: u64,
        state: SessionState,
        payout: u64,
    ) -> Result<bool, SessionError> {
        let now = self.clock.now_ms();
        let changed = self.store.end_session(id, state, payout, now).await?;
        if !changed {
            tracing::debug!(session_id = id, ?state, "end_session on terminal session ignored");
        }
        Ok(changed)
    }

    /// Sweep abandoned rounds to `Expired`. The escrowed bet is NOT
    /// refunded: the debit made at game start stands, so an abandoned round
    /// settles as a loss.
    pub async fn expire_stale_sessions(&self) -> Result<u64, SessionError> {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(self.timeout.as_millis() as u64);
        let swept = self.store.expire_sessions(cutoff, now).await?;
        if swept > 0 {
            tracing::info!(swept, "expired stale game sessions");
        }
        Ok(swept)
    }

    /// Recent rounds for a user, optionally filtered by game type.
    pub async fn game_history(
        &self,
        user: &UserId,
        game_type: Option<GameType>,
        limit: usize,
    ) -> Result<Vec<GameSession>, SessionError> {
        Ok(self.store.session_history(user, game_type, limit).await?)
    }
}

/// Periodic expiry sweep, independent of any request. Runs until the task is
/// aborted.
pub fn spawn_expiry_sweep<S: Store, C: Clock>(
    manager: Arc<SessionManager<S, C>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = manager.expire_stale_sessions().await {
                tracing::warn!(?error, "session expiry sweep failed");
            }
        }
    })
}
