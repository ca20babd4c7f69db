//! Dealer policy: draw to 17, stand on all 17s (including soft 17).
//!
//! Deterministic given the deck order; all randomness happened at shuffle
//! time.

use crate::deck::{draw_one, hand_value};
use tableside_types::Card;

/// Play out the dealer hand in place. Stops at 17 or better, or when the
/// deck runs dry.
pub fn dealer_play(hand: &mut Vec<Card>, deck: &mut Vec<Card>) {
    loop {
        if hand_value(hand).total >= 17 {
            break;
        }
        match draw_one(deck) {
            Some(card) => hand.push(card),
            None => break,
        }
    }
}
