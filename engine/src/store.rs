//! Storage facade.
//!
//! The engine reaches its relational store through this trait; production
//! deployments back it with SQL, tests and examples use [`Memory`]. Methods
//! take `&self` so one store can be shared behind an `Arc` by the ledger and
//! session services; serialization of conflicting writes is the callers'
//! concern (the ledger holds a per-user lock across its read-compute-commit
//! cycle).

use anyhow::Result;
use std::future::Future;
use tableside_types::{
    Card, GameSession, GameType, LastAction, LedgerEntry, SessionState, TxnSource, UserId,
};

/// A ledger entry before the store assigns its id.
#[derive(Clone, Debug)]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub amount: i64,
    pub source: TxnSource,
    pub reference_id: Option<u64>,
    pub balance_before: u64,
    pub balance_after: u64,
    pub created_at_ms: u64,
}

/// A session row before the store assigns its id. Created `Active` with no
/// cards; the opening deal lands via `update_hand_state`.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: UserId,
    pub game_type: GameType,
    pub bet_amount: u64,
    pub created_at_ms: u64,
}

pub trait Store: Send + Sync + 'static {
    /// Current balance, or `None` when the user has no balance row.
    fn balance(&self, user: &UserId) -> impl Future<Output = Result<Option<u64>>> + Send;

    /// Atomically write the new balance and append the entry. Both land or
    /// neither does. Returns the entry with its assigned id.
    fn commit_transaction(
        &self,
        new_balance: u64,
        entry: NewLedgerEntry,
    ) -> impl Future<Output = Result<LedgerEntry>> + Send;

    /// Entries for a user, most recent first. `limit = None` returns all.
    fn ledger_entries(
        &self,
        user: &UserId,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>>> + Send;

    /// Insert a new active session, returning its id.
    fn insert_session(&self, session: NewSession) -> impl Future<Output = Result<u64>> + Send;

    fn session(&self, id: u64) -> impl Future<Output = Result<Option<GameSession>>> + Send;

    /// The single active session for (user, game type), if any.
    fn active_session(
        &self,
        user: &UserId,
        game_type: GameType,
    ) -> impl Future<Output = Result<Option<GameSession>>> + Send;

    /// Overwrite the mutable hand fields; never touches `state`.
    fn update_hand_state(
        &self,
        id: u64,
        player_hand: Vec<Card>,
        dealer_hand: Vec<Card>,
        deck: Vec<Card>,
        last_action: LastAction,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Rewrite the effective wager (double down).
    fn update_bet_amount(&self, id: u64, bet_amount: u64)
        -> impl Future<Output = Result<()>> + Send;

    /// One-shot transition to a terminal state. Returns `false` without
    /// writing anything when the session is already terminal.
    fn end_session(
        &self,
        id: u64,
        state: SessionState,
        payout: u64,
        ended_at_ms: u64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Sweep active sessions created before `cutoff_ms` to `Expired`,
    /// stamping `ended_at_ms`. Returns how many were swept.
    fn expire_sessions(
        &self,
        cutoff_ms: u64,
        now_ms: u64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Session history for a user, most recent first.
    fn session_history(
        &self,
        user: &UserId,
        game_type: Option<GameType>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<GameSession>>> + Send;
}

/// In-memory store for tests, examples, and simulations.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    inner: std::sync::Mutex<MemoryInner>,
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
struct MemoryInner {
    balances: std::collections::HashMap<UserId, u64>,
    entries: Vec<LedgerEntry>,
    sessions: std::collections::BTreeMap<u64, GameSession>,
    next_entry_id: u64,
    next_session_id: u64,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    /// Builder-style registration of a user balance row.
    pub fn with_user(self, user: impl Into<UserId>, xp: u64) -> Self {
        self.add_user(user, xp);
        self
    }

    /// Register a user balance row (the registration service is external to
    /// the core; mocks stand in for it).
    pub fn add_user(&self, user: impl Into<UserId>, xp: u64) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.balances.insert(user.into(), xp);
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Store for Memory {
    async fn balance(&self, user: &UserId) -> Result<Option<u64>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.balances.get(user).copied())
    }

    async fn commit_transaction(
        &self,
        new_balance: u64,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if !inner.balances.contains_key(&entry.user_id) {
            anyhow::bail!("no balance row for {}", entry.user_id);
        }
        inner.next_entry_id += 1;
        let stored = LedgerEntry {
            id: inner.next_entry_id,
            user_id: entry.user_id.clone(),
            amount: entry.amount,
            source: entry.source,
            reference_id: entry.reference_id,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            created_at_ms: entry.created_at_ms,
        };
        inner.balances.insert(entry.user_id, new_balance);
        inner.entries.push(stored.clone());
        Ok(stored)
    }

    async fn ledger_entries(
        &self,
        user: &UserId,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        let mut entries: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|entry| &entry.user_id == user)
            .cloned()
            .collect();
        entries.reverse();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn insert_session(&self, session: NewSession) -> Result<u64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.next_session_id += 1;
        let id = inner.next_session_id;
        inner.sessions.insert(
            id,
            GameSession {
                id,
                user_id: session.user_id,
                game_type: session.game_type,
                bet_amount: session.bet_amount,
                state: SessionState::Active,
                player_hand: Vec::new(),
                dealer_hand: Vec::new(),
                deck: Vec::new(),
                last_action: None,
                payout: 0,
                created_at_ms: session.created_at_ms,
                ended_at_ms: None,
            },
        );
        Ok(id)
    }

    async fn session(&self, id: u64) -> Result<Option<GameSession>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn active_session(
        &self,
        user: &UserId,
        game_type: GameType,
    ) -> Result<Option<GameSession>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .sessions
            .values()
            .rev()
            .find(|session| {
                &session.user_id == user
                    && session.game_type == game_type
                    && session.state == SessionState::Active
            })
            .cloned())
    }

    async fn update_hand_state(
        &self,
        id: u64,
        player_hand: Vec<Card>,
        dealer_hand: Vec<Card>,
        deck: Vec<Card>,
        last_action: LastAction,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("session {id} not found"))?;
        session.player_hand = player_hand;
        session.dealer_hand = dealer_hand;
        session.deck = deck;
        session.last_action = Some(last_action);
        Ok(())
    }

    async fn update_bet_amount(&self, id: u64, bet_amount: u64) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("session {id} not found"))?;
        session.bet_amount = bet_amount;
        Ok(())
    }

    async fn end_session(
        &self,
        id: u64,
        state: SessionState,
        payout: u64,
        ended_at_ms: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("session {id} not found"))?;
        if session.state.is_terminal() {
            return Ok(false);
        }
        session.state = state;
        session.payout = payout;
        session.ended_at_ms = Some(ended_at_ms);
        Ok(true)
    }

    async fn expire_sessions(&self, cutoff_ms: u64, now_ms: u64) -> Result<u64> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let mut swept = 0;
        for session in inner.sessions.values_mut() {
            if session.state == SessionState::Active && session.created_at_ms < cutoff_ms {
                session.state = SessionState::Expired;
                session.ended_at_ms = Some(now_ms);
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn session_history(
        &self,
        user: &UserId,
        game_type: Option<GameType>,
        limit: usize,
    ) -> Result<Vec<GameSession>> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .sessions
            .values()
            .rev()
            .filter(|session| {
                &session.user_id == user
                    && game_type.map_or(true, |wanted| session.game_type == wanted)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
