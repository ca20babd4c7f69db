//! Shared data model for the tableside gambling core.
//!
//! These types cross the boundary between the engine and whatever
//! presentation layer drives it (command handlers, renderers), so they are
//! plain serde-friendly records with no behavior beyond cheap derived
//! accessors. All game and ledger logic lives in `tableside-engine`.

pub mod card;
pub mod ledger;
pub mod session;

pub use card::{Card, Rank, Suit};
pub use ledger::{GamblingStats, LedgerEntry, TxnSource, UserId};
pub use session::{GameSession, GameType, LastAction, Outcome, SessionState};
