//! Game session records.
//!
//! A session is the durable state of one round for one user. Hand and deck
//! state is stored denormalized so an interrupted round can be resumed from
//! the store alone. At most one session per (user, game type) may be
//! `Active` at a time; the store enforces this at creation.

use crate::card::Card;
use crate::ledger::{TxnSource, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Games tracked by the session store. Only blackjack carries hand state;
/// the others record instant rounds for history purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameType {
    Blackjack,
    RockPaperScissors,
    Hangman,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Blackjack => "blackjack",
            GameType::RockPaperScissors => "rps",
            GameType::Hangman => "hangman",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle state. Everything but `Active` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Won,
    Lost,
    Push,
    Blackjack,
    Expired,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

/// The last player action persisted with the hand state, so a resumed
/// display can tell what just happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastAction {
    Deal,
    Hit,
    Stand,
    Double,
}

/// Round outcome from the resolver's perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Blackjack,
    Win,
    Loss,
    Push,
}

impl Outcome {
    /// Terminal session state this outcome maps to.
    pub fn terminal_state(&self) -> SessionState {
        match self {
            Outcome::Blackjack => SessionState::Blackjack,
            Outcome::Win => SessionState::Won,
            Outcome::Loss => SessionState::Lost,
            Outcome::Push => SessionState::Push,
        }
    }

    /// Ledger tag for the payout credit of this outcome.
    pub fn txn_source(&self) -> TxnSource {
        match self {
            Outcome::Blackjack => TxnSource::BlackjackBlackjack,
            Outcome::Win => TxnSource::BlackjackWin,
            Outcome::Loss => TxnSource::BlackjackLoss,
            Outcome::Push => TxnSource::BlackjackPush,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Blackjack => "blackjack",
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Push => "push",
        };
        f.write_str(label)
    }
}

/// Durable record of one game round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: u64,
    pub user_id: UserId,
    pub game_type: GameType,
    /// Effective wager; rewritten to the doubled total on a double down so
    /// the row reconciles against its ledger entries.
    pub bet_amount: u64,
    pub state: SessionState,
    pub player_hand: Vec<Card>,
    pub dealer_hand: Vec<Card>,
    /// Remaining deck, consumed from the back.
    pub deck: Vec<Card>,
    pub last_action: Option<LastAction>,
    /// Total credited at resolution (escrowed bet is not included for losses).
    pub payout: u64,
    pub created_at_ms: u64,
    pub ended_at_ms: Option<u64>,
}

impl GameSession {
    /// Double down is only offered on the initial two-card hand of a live
    /// session.
    pub fn can_double(&self) -> bool {
        self.state == SessionState::Active && self.player_hand.len() == 2
    }
}
