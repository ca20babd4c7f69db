//! End-to-end round scenarios against the in-memory store.
//!
//! Decks are pre-arranged per scenario: cards are drawn from the back of the
//! deck, and the opening deal alternates player, dealer, player, dealer. The
//! `rigged` helper takes cards in draw order and reverses them.

use crate::blackjack::{BlackjackEngine, EngineError};
use crate::clock::ManualClock;
use crate::config::BlackjackConfig;
use crate::store::{NewLedgerEntry, NewSession, Store};
use crate::{
    Card, GameSession, GameType, LastAction, LedgerEntry, Outcome, Rank, SessionState, Suit,
    TxnSource, UserId,
};
use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::store::Memory;

const SUIT_CYCLE: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

/// Build a deck that yields `draws` in order. First element is the player's
/// first card, second the dealer's first, and so on.
fn rigged(draws: &[Rank]) -> Vec<Card> {
    draws
        .iter()
        .rev()
        .zip(SUIT_CYCLE.iter().cycle())
        .map(|(&rank, &suit)| Card { rank, suit })
        .collect()
}

fn setup(xp: u64) -> (Arc<Memory>, Arc<ManualClock>, BlackjackEngine<Memory, ManualClock>) {
    let store = Arc::new(Memory::default().with_user("player", xp));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let engine = BlackjackEngine::new(Arc::clone(&store), Arc::clone(&clock));
    (store, clock, engine)
}

fn user() -> UserId {
    UserId::from("player")
}

async fn entries(engine: &BlackjackEngine<Memory, ManualClock>) -> Vec<LedgerEntry> {
    engine.ledger().history(&user(), 100).await.unwrap()
}

#[tokio::test]
async fn test_stand_against_dealer_bust_pays_double() {
    let (_, _, engine) = setup(100);
    let user = user();

    // Player 10+9 stands on 19; dealer 6+10 must draw and busts on the 10.
    let deck = rigged(&[Rank::Ten, Rank::Six, Rank::Nine, Rank::Ten, Rank::Ten]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();
    assert!(start.resolution.is_none());
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));

    let summary = engine.stand(&user).await.unwrap();
    assert_eq!(summary.outcome, Outcome::Win);
    assert_eq!(summary.payout, 40);
    assert_eq!(summary.net_change, 20);
    assert_eq!(summary.new_balance, 120);

    // Escrow debit then a single payout credit (history is newest first).
    let entries = entries(&engine).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].amount, -20);
    assert_eq!(entries[1].source, TxnSource::BlackjackLoss);
    assert_eq!(entries[0].amount, 40);
    assert_eq!(entries[0].source, TxnSource::BlackjackWin);
    assert_eq!(entries[0].balance_after, 120);

    let session = engine.sessions().session(start.session.id).await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Won);
    assert_eq!(session.payout, 40);
    assert!(session.ended_at_ms.is_some());

    let stats = engine.ledger().gambling_stats(&user).await.unwrap();
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.net_profit, 20);
}

#[tokio::test]
async fn test_player_natural_resolves_at_three_to_two() {
    let (_, _, engine) = setup(100);
    let user = user();

    // Player ace+king, dealer 9+7.
    let deck = rigged(&[Rank::Ace, Rank::Nine, Rank::King, Rank::Seven]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    let summary = start.resolution.unwrap();
    assert_eq!(summary.outcome, Outcome::Blackjack);
    assert_eq!(summary.payout, 50);
    assert_eq!(summary.new_balance, 130);
    assert_eq!(start.session.state, SessionState::Blackjack);
    assert!(engine.active_game(&user).await.unwrap().is_none());
}

#[tokio::test]
async fn test_both_naturals_push_the_bet_back() {
    let (_, _, engine) = setup(100);
    let user = user();

    let deck = rigged(&[Rank::Ace, Rank::Ace, Rank::King, Rank::Queen]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    let summary = start.resolution.unwrap();
    assert_eq!(summary.outcome, Outcome::Push);
    assert_eq!(summary.payout, 20);
    assert_eq!(summary.net_change, 0);
    assert_eq!(summary.new_balance, 100);
    assert_eq!(start.session.state, SessionState::Push);
}

#[tokio::test]
async fn test_dealer_natural_beats_player_twenty_one_path() {
    let (_, _, engine) = setup(100);
    let user = user();

    // Dealer ace+king; the player's 19 never gets a turn.
    let deck = rigged(&[Rank::Ten, Rank::Ace, Rank::Nine, Rank::King]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    let summary = start.resolution.unwrap();
    assert_eq!(summary.outcome, Outcome::Loss);
    assert_eq!(summary.payout, 0);
    assert_eq!(summary.net_change, -20);
    assert_eq!(summary.new_balance, 80);
}

#[tokio::test]
async fn test_double_down_wins_at_doubled_stake() {
    let (_, _, engine) = setup(100);
    let user = user();

    // Player 6+5 doubles into a 10 for 21; dealer stands on 20.
    let deck = rigged(&[
        Rank::Six,
        Rank::Ten,
        Rank::Five,
        Rank::Ten,
        Rank::Ten,
    ]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();
    assert!(start.resolution.is_none());

    let summary = engine.double(&user).await.unwrap();
    assert_eq!(summary.outcome, Outcome::Win);
    assert_eq!(summary.payout, 80);
    assert_eq!(summary.net_change, 40);
    assert_eq!(summary.new_balance, 140);

    // Two escrow debits (Some(session_id) on the double), one credit;
    // history is newest first.
    let entries = entries(&engine).await;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].amount, -20);
    assert_eq!(entries[2].reference_id, None);
    assert_eq!(entries[1].amount, -20);
    assert_eq!(entries[1].reference_id, Some(start.session.id));
    assert_eq!(entries[0].amount, 80);

    let session = engine.sessions().session(start.session.id).await.unwrap().unwrap();
    assert_eq!(session.bet_amount, 40);
    assert_eq!(session.player_hand.len(), 3);
    assert_eq!(session.last_action, Some(LastAction::Double));
}

#[tokio::test]
async fn test_hit_to_bust_loses_the_escrowed_bet() {
    let (_, _, engine) = setup(100);
    let user = user();

    // Player 10+9 hits into a 5 for 24.
    let deck = rigged(&[Rank::Ten, Rank::Ten, Rank::Nine, Rank::Seven, Rank::Five]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    let hit = engine.hit(&user).await.unwrap();
    assert!(hit.bust);
    assert_eq!(hit.session.player_hand.len(), 3);
    // The returned record reflects the settlement, like an immediate
    // natural does on start.
    assert_eq!(hit.session.state, SessionState::Lost);
    assert!(hit.session.ended_at_ms.is_some());

    let summary = hit.resolution.unwrap();
    assert_eq!(summary.outcome, Outcome::Loss);
    assert_eq!(summary.payout, 0);
    assert_eq!(summary.new_balance, 80);

    // No credit entry for a loss; the escrow debit stands.
    let entries = entries(&engine).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, -20);

    let session = engine.sessions().session(start.session.id).await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Lost);
    assert_eq!(session.payout, 0);
}

#[tokio::test]
async fn test_second_start_is_rejected_without_a_debit() {
    let (_, _, engine) = setup(100);
    let user = user();

    let deck = rigged(&[Rank::Ten, Rank::Six, Rank::Nine, Rank::Ten]);
    engine.start_game_with_deck(&user, 20, deck).await.unwrap();
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));

    let err = engine.start_game(&user, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionAlreadyActive));
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));
    assert_eq!(entries(&engine).await.len(), 1);
}

#[tokio::test]
async fn test_resolved_round_cannot_settle_twice() {
    let (_, _, engine) = setup(100);
    let user = user();

    let deck = rigged(&[Rank::Ten, Rank::Ten, Rank::Nine, Rank::Eight]);
    engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    let summary = engine.stand(&user).await.unwrap();
    assert_eq!(summary.outcome, Outcome::Win);

    let err = engine.stand(&user).await.unwrap_err();
    assert!(matches!(err, EngineError::NoActiveSession));

    // Still exactly one debit and one credit.
    let entries = entries(&engine).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(120));
}

#[tokio::test]
async fn test_expiry_keeps_the_escrowed_bet() {
    let (_, clock, engine) = setup(100);
    let user = user();

    let deck = rigged(&[Rank::Ten, Rank::Six, Rank::Nine, Rank::Ten]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));

    // 31 minutes later the sweep reaps the round. The escrowed bet is not
    // refunded; abandonment settles as a loss.
    clock.advance_ms(31 * 60 * 1_000);
    let swept = engine.sessions().expire_stale_sessions().await.unwrap();
    assert_eq!(swept, 1);

    let session = engine.sessions().session(start.session.id).await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Expired);
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));
    assert!(engine.active_game(&user).await.unwrap().is_none());

    // And the seat is free again.
    let deck = rigged(&[Rank::Ten, Rank::Six, Rank::Nine, Rank::Ten]);
    engine.start_game_with_deck(&user, 10, deck).await.unwrap();
}

#[tokio::test]
async fn test_double_after_hit_is_not_offered() {
    let (_, _, engine) = setup(100);
    let user = user();

    // Player 5+4 hits a 3 (12, no bust), then tries to double.
    let deck = rigged(&[
        Rank::Five,
        Rank::Ten,
        Rank::Four,
        Rank::Seven,
        Rank::Three,
    ]);
    engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    let hit = engine.hit(&user).await.unwrap();
    assert!(!hit.bust);
    assert!(hit.resolution.is_none());
    assert!(!hit.session.can_double());

    let err = engine.double(&user).await.unwrap_err();
    assert!(matches!(err, EngineError::NotEligible));
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));
}

#[tokio::test]
async fn test_double_without_funds_fails_closed() {
    // Loosen the bet cap so the escrow leaves less than the bet behind.
    let store = Arc::new(Memory::default().with_user("player", 30));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let config = BlackjackConfig {
        max_bet_bps: 10_000,
        ..BlackjackConfig::default()
    };
    let engine = BlackjackEngine::with_config(store, clock, config);
    let user = user();

    let deck = rigged(&[Rank::Six, Rank::Ten, Rank::Five, Rank::Ten, Rank::Ten]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(10));

    let err = engine.double(&user).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBalance));

    // Round unchanged: original stake, two cards, still the player's turn.
    let session = engine.active_game(&user).await.unwrap().unwrap();
    assert_eq!(session.id, start.session.id);
    assert_eq!(session.bet_amount, 20);
    assert_eq!(session.player_hand.len(), 2);
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(10));

    // Standing still works afterwards.
    engine.stand(&user).await.unwrap();
}

/// Store wrapper with fault and interleaving hooks: injected failures for
/// the compensating-refund paths, and a barrier on `active_session` so two
/// request handlers can be held at the same read for race scenarios.
struct FlakyStore {
    inner: Memory,
    fail_insert_session: AtomicBool,
    fail_bet_update: AtomicBool,
    gate: Option<Arc<tokio::sync::Barrier>>,
    gate_armed: AtomicBool,
}

impl FlakyStore {
    fn new(inner: Memory) -> Self {
        Self {
            inner,
            fail_insert_session: AtomicBool::new(false),
            fail_bet_update: AtomicBool::new(false),
            gate: None,
            gate_armed: AtomicBool::new(false),
        }
    }

    fn with_gate(mut self, gate: Arc<tokio::sync::Barrier>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Reject the next session insert.
    fn fail_next_insert(&self) {
        self.fail_insert_session.store(true, Ordering::SeqCst);
    }

    /// Reject the next bet rewrite.
    fn fail_next_bet_update(&self) {
        self.fail_bet_update.store(true, Ordering::SeqCst);
    }

    /// Start holding `active_session` readers at the barrier.
    fn arm_gate(&self) {
        self.gate_armed.store(true, Ordering::SeqCst);
    }
}

impl Store for FlakyStore {
    fn balance(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<u64>>> + Send {
        self.inner.balance(user)
    }

    fn commit_transaction(
        &self,
        new_balance: u64,
        entry: NewLedgerEntry,
    ) -> impl std::future::Future<Output = anyhow::Result<LedgerEntry>> + Send {
        self.inner.commit_transaction(new_balance, entry)
    }

    fn ledger_entries(
        &self,
        user: &UserId,
        limit: Option<usize>,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<LedgerEntry>>> + Send {
        self.inner.ledger_entries(user, limit)
    }

    async fn insert_session(&self, new: NewSession) -> anyhow::Result<u64> {
        if self.fail_insert_session.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("sessions table unavailable"));
        }
        self.inner.insert_session(new).await
    }

    fn session(
        &self,
        id: u64,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<GameSession>>> + Send {
        self.inner.session(id)
    }

    async fn active_session(
        &self,
        user: &UserId,
        game_type: GameType,
    ) -> anyhow::Result<Option<GameSession>> {
        if self.gate_armed.load(Ordering::SeqCst) {
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }
        }
        self.inner.active_session(user, game_type).await
    }

    fn update_hand_state(
        &self,
        id: u64,
        player_hand: Vec<Card>,
        dealer_hand: Vec<Card>,
        deck: Vec<Card>,
        last_action: LastAction,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send {
        self.inner
            .update_hand_state(id, player_hand, dealer_hand, deck, last_action)
    }

    async fn update_bet_amount(&self, id: u64, bet_amount: u64) -> anyhow::Result<()> {
        if self.fail_bet_update.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("sessions table unavailable"));
        }
        self.inner.update_bet_amount(id, bet_amount).await
    }

    fn end_session(
        &self,
        id: u64,
        state: SessionState,
        payout: u64,
        ended_at_ms: u64,
    ) -> impl std::future::Future<Output = anyhow::Result<bool>> + Send {
        self.inner.end_session(id, state, payout, ended_at_ms)
    }

    fn expire_sessions(
        &self,
        cutoff_ms: u64,
        now_ms: u64,
    ) -> impl std::future::Future<Output = anyhow::Result<u64>> + Send {
        self.inner.expire_sessions(cutoff_ms, now_ms)
    }

    fn session_history(
        &self,
        user: &UserId,
        game_type: Option<GameType>,
        limit: usize,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<GameSession>>> + Send {
        self.inner.session_history(user, game_type, limit)
    }
}

#[tokio::test]
async fn test_failed_session_create_refunds_the_bet() {
    let store = Arc::new(FlakyStore::new(Memory::default().with_user("player", 100)));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let engine = BlackjackEngine::new(Arc::clone(&store), clock);
    let user = user();

    store.fail_next_insert();
    let err = engine.start_game(&user, 20).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    // Debit followed by the compensating push credit; nothing net lost.
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(100));
    let entries = engine.ledger().history(&user, 100).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].amount, -20);
    assert_eq!(entries[1].source, TxnSource::BlackjackLoss);
    assert_eq!(entries[0].amount, 20);
    assert_eq!(entries[0].source, TxnSource::BlackjackPush);

    // The retry goes through.
    let start = engine.start_game(&user, 20).await.unwrap();
    assert_eq!(start.session.state, SessionState::Active);
}

#[tokio::test]
async fn test_concurrent_stands_credit_once() {
    // Two racing stand handlers for the same round: both are held at the
    // active-session read so both observe the round as live, then race to
    // settle it. Exactly one may credit the payout.
    let gate = Arc::new(tokio::sync::Barrier::new(2));
    let store = Arc::new(
        FlakyStore::new(Memory::default().with_user("player", 100)).with_gate(Arc::clone(&gate)),
    );
    let clock = Arc::new(ManualClock::new(1_000_000));
    let engine = Arc::new(BlackjackEngine::new(Arc::clone(&store), clock));
    let user = user();

    // Player 19 vs dealer 18: a win paying 40 on the 20 bet.
    let deck = rigged(&[Rank::Ten, Rank::Ten, Rank::Nine, Rank::Eight]);
    engine.start_game_with_deck(&user, 20, deck).await.unwrap();

    store.arm_gate();
    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        let user = user.clone();
        async move { engine.stand(&user).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        let user = user.clone();
        async move { engine.stand(&user).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let mut settlements = 0;
    for result in &results {
        match result {
            Ok(summary) => {
                settlements += 1;
                assert_eq!(summary.outcome, Outcome::Win);
                assert_eq!(summary.payout, 40);
                assert_eq!(summary.new_balance, 120);
            }
            Err(error) => assert!(matches!(error, EngineError::NoActiveSession)),
        }
    }
    assert_eq!(settlements, 1);

    // One escrow debit, one payout credit, balance credited exactly once.
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(120));
    let entries = engine.ledger().history(&user, 100).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].amount, 40);
    assert_eq!(entries[1].amount, -20);
}

#[tokio::test]
async fn test_failed_bet_update_refunds_the_double() {
    let store = Arc::new(FlakyStore::new(Memory::default().with_user("player", 100)));
    let clock = Arc::new(ManualClock::new(1_000_000));
    let engine = BlackjackEngine::new(Arc::clone(&store), clock);
    let user = user();

    let deck = rigged(&[Rank::Six, Rank::Ten, Rank::Five, Rank::Ten, Rank::Ten]);
    let start = engine.start_game_with_deck(&user, 20, deck).await.unwrap();
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));

    store.fail_next_bet_update();
    let err = engine.double(&user).await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    // The extra escrow came back and the round stays at the original stake
    // with no card drawn.
    assert_eq!(engine.ledger().balance(&user).await.unwrap(), Some(80));
    let session = engine.active_game(&user).await.unwrap().unwrap();
    assert_eq!(session.id, start.session.id);
    assert_eq!(session.bet_amount, 20);
    assert_eq!(session.player_hand.len(), 2);
    let entries = engine.ledger().history(&user, 100).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].amount, 20);
    assert_eq!(entries[0].source, TxnSource::BlackjackPush);
    assert_eq!(entries[0].reference_id, Some(start.session.id));

    // The retry doubles into 21 against the dealer's 20.
    let summary = engine.double(&user).await.unwrap();
    assert_eq!(summary.outcome, Outcome::Win);
    assert_eq!(summary.payout, 80);
    assert_eq!(summary.new_balance, 140);
}
