//! Round outcome resolution.

use crate::deck::{hand_value, is_blackjack};
use tableside_types::{Card, Outcome};

/// Resolve a finished round. Precedence is strict: natural-blackjack checks
/// first, then busts, then the numeric comparison.
pub fn determine_outcome(player: &[Card], dealer: &[Card]) -> Outcome {
    let player_natural = is_blackjack(player);
    let dealer_natural = is_blackjack(dealer);

    if player_natural && dealer_natural {
        return Outcome::Push;
    }
    if player_natural {
        return Outcome::Blackjack;
    }
    if dealer_natural {
        return Outcome::Loss;
    }

    let player_value = hand_value(player);
    let dealer_value = hand_value(dealer);

    if player_value.bust {
        return Outcome::Loss;
    }
    if dealer_value.bust {
        return Outcome::Win;
    }

    if player_value.total > dealer_value.total {
        Outcome::Win
    } else if player_value.total < dealer_value.total {
        Outcome::Loss
    } else {
        Outcome::Push
    }
}
