//! Ledger records: XP balances change only through append-only entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform user identifier (the chat platform's opaque id string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Source tag attached to every ledger entry.
///
/// Bets are escrowed under `BlackjackLoss` at game start; a later payout (if
/// any) is credited under the outcome's tag. `BlackjackPush` doubles as the
/// compensating-refund tag when a session fails to create after the debit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnSource {
    BlackjackLoss,
    BlackjackWin,
    BlackjackBlackjack,
    BlackjackPush,
    GameReward,
}

impl TxnSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxnSource::BlackjackLoss => "blackjack_loss",
            TxnSource::BlackjackWin => "blackjack_win",
            TxnSource::BlackjackBlackjack => "blackjack_blackjack",
            TxnSource::BlackjackPush => "blackjack_push",
            TxnSource::GameReward => "game_reward",
        }
    }

    /// Tags that represent winning payouts in gambling statistics.
    pub fn is_win(&self) -> bool {
        matches!(self, TxnSource::BlackjackWin | TxnSource::BlackjackBlackjack)
    }
}

impl fmt::Display for TxnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only XP transaction record. Never mutated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub user_id: UserId,
    /// Signed XP delta; negative for debits (bets).
    pub amount: i64,
    pub source: TxnSource,
    /// Session id this entry settles, when tied to a game.
    pub reference_id: Option<u64>,
    pub balance_before: u64,
    pub balance_after: u64,
    pub created_at_ms: u64,
}

/// Aggregated gambling record for one user, derived from ledger entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamblingStats {
    pub wins: u64,
    pub wins_total: u64,
    pub losses: u64,
    pub losses_total: u64,
    pub pushes: u64,
    pub net_profit: i64,
}
