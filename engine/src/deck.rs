//! Deck construction, shuffling, and blackjack hand valuation.
//!
//! The deck is a `Vec<Card>` drawn from the back. One round consumes at most
//! around 16 of 52 cards, so a fresh shuffle per round never runs dry; draws
//! still degrade gracefully when asked for more cards than remain.

use rand::seq::SliceRandom;
use rand::Rng;
use tableside_types::card::{Card, RANKS, SUITS};
use tableside_types::Rank;

/// Derived value of a blackjack hand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandValue {
    pub total: u8,
    /// An ace is still counted as 11 without busting.
    pub soft: bool,
    pub bust: bool,
}

/// Fresh 52-card deck in canonical (suit, rank) order.
pub fn standard_deck() -> Vec<Card> {
    let mut deck = Vec::with_capacity(52);
    for suit in SUITS {
        for rank in RANKS {
            deck.push(Card::new(rank, suit));
        }
    }
    deck
}

/// Uniform Fisher-Yates permutation; returns a new deck, input untouched.
pub fn shuffled<R: Rng>(deck: &[Card], rng: &mut R) -> Vec<Card> {
    let mut out = deck.to_vec();
    out.shuffle(rng);
    out
}

/// Remove and return the top `n` cards (the back of the vec), or as many as
/// remain.
pub fn draw_cards(deck: &mut Vec<Card>, n: usize) -> Vec<Card> {
    let take = n.min(deck.len());
    let mut drawn = Vec::with_capacity(take);
    for _ in 0..take {
        if let Some(card) = deck.pop() {
            drawn.push(card);
        }
    }
    drawn
}

/// Remove and return the top card, if any.
pub fn draw_one(deck: &mut Vec<Card>) -> Option<Card> {
    deck.pop()
}

/// Deal the opening hands, strictly alternating player, dealer, player,
/// dealer.
pub fn deal_initial_hands(deck: &mut Vec<Card>) -> (Vec<Card>, Vec<Card>) {
    let mut player = Vec::with_capacity(2);
    let mut dealer = Vec::with_capacity(2);
    for _ in 0..2 {
        if let Some(card) = draw_one(deck) {
            player.push(card);
        }
        if let Some(card) = draw_one(deck) {
            dealer.push(card);
        }
    }
    (player, dealer)
}

fn rank_value(rank: Rank) -> u8 {
    match rank {
        Rank::Ace => 11,
        Rank::Two => 2,
        Rank::Three => 3,
        Rank::Four => 4,
        Rank::Five => 5,
        Rank::Six => 6,
        Rank::Seven => 7,
        Rank::Eight => 8,
        Rank::Nine => 9,
        Rank::Ten | Rank::Jack | Rank::Queen | Rank::King => 10,
    }
}

/// Blackjack hand value with soft-ace handling: aces start at 11 and are
/// demoted to 1 one at a time while the total exceeds 21.
pub fn hand_value(hand: &[Card]) -> HandValue {
    let mut total: u16 = 0;
    let mut aces: u8 = 0;

    for card in hand {
        if card.rank == Rank::Ace {
            aces += 1;
        }
        total += u16::from(rank_value(card.rank));
    }

    while total > 21 && aces > 0 {
        total -= 10;
        aces -= 1;
    }

    HandValue {
        total: total.min(u16::from(u8::MAX)) as u8,
        soft: aces > 0 && total <= 21,
        bust: total > 21,
    }
}

/// A natural: 21 with exactly two cards.
pub fn is_blackjack(hand: &[Card]) -> bool {
    hand.len() == 2 && hand_value(hand).total == 21
}
