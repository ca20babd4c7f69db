//! XP transaction service.
//!
//! The only sanctioned path to mutate a balance. Every change appends exactly
//! one ledger entry in the same commit as the balance write, and all
//! mutations for one user are serialized by a per-user async lock; operations
//! on different users never contend.

use crate::clock::Clock;
use crate::config::BlackjackConfig;
use crate::store::{NewLedgerEntry, Store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tableside_types::{GamblingStats, LedgerEntry, TxnSource, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The mutation would take the balance below zero. Nothing was written.
    #[error("insufficient XP: balance {balance}, requested {requested}")]
    InsufficientBalance { balance: u64, requested: u64 },
    /// No balance row exists; registration precedes play and is owned by an
    /// external service.
    #[error("user {0} has no balance record")]
    UserNotFound(UserId),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of a committed transaction.
#[derive(Clone, Debug)]
pub struct TxnReceipt {
    pub balance_before: u64,
    pub balance_after: u64,
    pub entry: LedgerEntry,
}

/// Read-side bet validation summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetCheck {
    pub can_afford: bool,
    pub balance: u64,
    pub min_bet: u64,
    pub max_bet: u64,
    pub bet_amount: u64,
}

/// Keyed lock registry: one async mutex per user, created on first touch.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user: &UserId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            // Registry writes cannot leave the map inconsistent; a poisoned
            // lock is safe to reclaim.
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(user.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Atomic, serialized, audited balance mutation.
pub struct XpLedger<S: Store, C: Clock> {
    store: Arc<S>,
    clock: Arc<C>,
    locks: UserLocks,
}

impl<S: Store, C: Clock> XpLedger<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self {
            store,
            clock,
            locks: UserLocks::default(),
        }
    }

    /// Apply a signed XP delta under the user's exclusive lock.
    ///
    /// Fails closed: on [`LedgerError::InsufficientBalance`] or
    /// [`LedgerError::UserNotFound`] no entry is written and the balance is
    /// untouched.
    pub async fn process_transaction(
        &self,
        user: &UserId,
        amount: i64,
        source: TxnSource,
        reference_id: Option<u64>,
    ) -> Result<TxnReceipt, LedgerError> {
        let _guard = self.locks.acquire(user).await;

        let balance_before = self
            .store
            .balance(user)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user.clone()))?;

        let balance_after = if amount >= 0 {
            balance_before.saturating_add(amount.unsigned_abs())
        } else {
            let debit = amount.unsigned_abs();
            if debit > balance_before {
                return Err(LedgerError::InsufficientBalance {
                    balance: balance_before,
                    requested: debit,
                });
            }
            balance_before - debit
        };

        let entry = self
            .store
            .commit_transaction(
                balance_after,
                NewLedgerEntry {
                    user_id: user.clone(),
                    amount,
                    source,
                    reference_id,
                    balance_before,
                    balance_after,
                    created_at_ms: self.clock.now_ms(),
                },
            )
            .await?;

        tracing::debug!(
            user = %user,
            amount,
            source = %source,
            reference = ?reference_id,
            balance_after,
            "ledger entry committed"
        );

        Ok(TxnReceipt {
            balance_before,
            balance_after,
            entry,
        })
    }

    /// Current balance, if the user is registered.
    pub async fn balance(&self, user: &UserId) -> Result<Option<u64>, LedgerError> {
        Ok(self.store.balance(user).await?)
    }

    /// Largest bet this user may place under the table config.
    pub async fn max_bet(
        &self,
        user: &UserId,
        config: &BlackjackConfig,
    ) -> Result<u64, LedgerError> {
        let balance = self
            .store
            .balance(user)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user.clone()))?;
        Ok(config.max_bet_for_balance(balance))
    }

    /// Validate a proposed bet against min/max limits and the balance.
    pub async fn can_afford_bet(
        &self,
        user: &UserId,
        bet_amount: u64,
        config: &BlackjackConfig,
    ) -> Result<BetCheck, LedgerError> {
        let balance = self
            .store
            .balance(user)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user.clone()))?;
        let max_bet = config.max_bet_for_balance(balance);
        Ok(BetCheck {
            can_afford: balance >= bet_amount
                && bet_amount >= config.min_bet
                && bet_amount <= max_bet,
            balance,
            min_bet: config.min_bet,
            max_bet,
            bet_amount,
        })
    }

    /// Most recent entries first.
    pub async fn history(
        &self,
        user: &UserId,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.store.ledger_entries(user, Some(limit)).await?)
    }

    /// Aggregate gambling record derived from the audit trail.
    pub async fn gambling_stats(&self, user: &UserId) -> Result<GamblingStats, LedgerError> {
        let entries = self.store.ledger_entries(user, None).await?;
        let mut stats = GamblingStats::default();
        for entry in &entries {
            if entry.source.is_win() {
                stats.wins += 1;
                stats.wins_total += entry.amount.unsigned_abs();
            } else if entry.source == TxnSource::BlackjackLoss {
                stats.losses += 1;
                stats.losses_total += entry.amount.unsigned_abs();
            } else if entry.source == TxnSource::BlackjackPush {
                stats.pushes += 1;
            }
        }
        stats.net_profit = stats.wins_total as i64 - stats.losses_total as i64;
        Ok(stats)
    }
}
