//! Blackjack table configuration.

use std::time::Duration;

/// Table limits and payout schedule.
///
/// The bet ceiling is a percentage of the player's balance, carried as basis
/// points so all bet math stays integral, clamped by a hard cap. Naturals pay
/// `blackjack_payout_num / blackjack_payout_den` profit on the bet (3:2 by
/// default); plain wins pay even money.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlackjackConfig {
    pub min_bet: u64,
    /// Maximum bet as basis points of the balance (2_500 = 25%).
    pub max_bet_bps: u64,
    /// Absolute bet ceiling regardless of balance.
    pub hard_cap: u64,
    pub blackjack_payout_num: u64,
    pub blackjack_payout_den: u64,
    /// Active sessions older than this are swept to `Expired`.
    pub session_timeout: Duration,
}

impl Default for BlackjackConfig {
    fn default() -> Self {
        Self {
            min_bet: 10,
            max_bet_bps: 2_500,
            hard_cap: 1_000,
            blackjack_payout_num: 3,
            blackjack_payout_den: 2,
            session_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl BlackjackConfig {
    /// Reject configurations that would break bet validation or payouts.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_bet == 0 {
            return Err("min_bet must be positive".into());
        }
        if self.max_bet_bps == 0 || self.max_bet_bps > 10_000 {
            return Err("max_bet_bps must be in 1..=10000".into());
        }
        if self.hard_cap < self.min_bet {
            return Err("hard_cap must be at least min_bet".into());
        }
        if self.blackjack_payout_den == 0 {
            return Err("blackjack_payout_den must be nonzero".into());
        }
        Ok(())
    }

    /// `floor(min(balance * percent, hard_cap))`.
    pub fn max_bet_for_balance(&self, balance: u64) -> u64 {
        let pct = balance.saturating_mul(self.max_bet_bps) / 10_000;
        pct.min(self.hard_cap)
    }

    /// Profit on a natural: `floor(bet * num / den)`.
    pub fn blackjack_profit(&self, bet: u64) -> u64 {
        bet.saturating_mul(self.blackjack_payout_num) / self.blackjack_payout_den
    }
}
