//! Tableside game engine.
//!
//! This crate contains the blackjack round logic and the two services it
//! drives: the XP ledger (the only sanctioned path to mutate a balance) and
//! the session store (at most one active round per user per game type).
//!
//! ## Money invariants
//! - Every balance change appends exactly one [`LedgerEntry`]; a user's
//!   balance always equals their starting balance plus the sum of their
//!   entry amounts, and never goes negative.
//! - A bet is escrowed (debited) before the round starts and a payout is
//!   credited at most once at resolution. A crash mid-round therefore never
//!   leaves the ledger owing money to a player.
//! - All mutations for one user are serialized by a per-user lock; different
//!   users proceed concurrently.
//!
//! The external presentation layer (command handlers, renderers) drives
//! [`BlackjackEngine`] and owns all display concerns; storage is reached
//! through the [`Store`] trait.

pub mod blackjack;
pub mod clock;
pub mod config;
pub mod dealer;
pub mod deck;
pub mod ledger;
pub mod outcome;
pub mod sessions;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use blackjack::{
    BlackjackEngine, EngineError, HitOutcome, NoBonus, ResultSummary, StartOutcome, WinningsBonus,
};
pub use clock::{Clock, SystemClock};
pub use config::BlackjackConfig;
pub use deck::HandValue;
pub use ledger::{BetCheck, LedgerError, TxnReceipt, XpLedger};
pub use sessions::{spawn_expiry_sweep, SessionError, SessionManager};
pub use store::{NewLedgerEntry, NewSession, Store};

#[cfg(any(test, feature = "mocks"))]
pub use clock::ManualClock;
#[cfg(any(test, feature = "mocks"))]
pub use store::Memory;

// Re-exported so engine callers rarely need the types crate directly.
pub use tableside_types::{
    Card, GameSession, GameType, GamblingStats, LastAction, LedgerEntry, Outcome, Rank,
    SessionState, Suit, TxnSource, UserId,
};
