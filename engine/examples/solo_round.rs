//! Plays one blackjack round against the in-memory store and prints the
//! session record as JSON.
//!
//! ```text
//! cargo run -p tableside-engine --example solo_round --features mocks
//! ```

use std::sync::Arc;
use tableside_engine::deck::hand_value;
use tableside_engine::{BlackjackEngine, Memory, SystemClock, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = Arc::new(Memory::default().with_user("demo", 100));
    let engine = BlackjackEngine::new(store, Arc::new(SystemClock));
    let user = UserId::from("demo");

    let start = engine.start_game(&user, 20).await?;
    tracing::info!(
        player = %render(&start.session.player_hand),
        dealer_up = %start.session.dealer_hand[0],
        "dealt"
    );

    let summary = match start.resolution {
        Some(summary) => summary,
        None => {
            // Basic-strategy-free policy: hit to 17, then stand.
            loop {
                let session = match engine.active_game(&user).await? {
                    Some(session) => session,
                    None => break,
                };
                if hand_value(&session.player_hand).total >= 17 {
                    break;
                }
                let hit = engine.hit(&user).await?;
                tracing::info!(player = %render(&hit.session.player_hand), "hit");
                if let Some(summary) = hit.resolution {
                    print_session(&engine, &user).await?;
                    report(&summary);
                    return Ok(());
                }
            }
            engine.stand(&user).await?
        }
    };

    print_session(&engine, &user).await?;
    report(&summary);
    Ok(())
}

fn render(hand: &[tableside_engine::Card]) -> String {
    hand.iter()
        .map(|card| card.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn report(summary: &tableside_engine::ResultSummary) {
    tracing::info!(
        outcome = %summary.outcome,
        payout = summary.payout,
        net_change = summary.net_change,
        new_balance = summary.new_balance,
        "round over"
    );
}

async fn print_session(
    engine: &BlackjackEngine<Memory, SystemClock>,
    user: &UserId,
) -> anyhow::Result<()> {
    let sessions = engine
        .sessions()
        .game_history(user, None, 1)
        .await
        .map_err(anyhow::Error::from)?;
    if let Some(session) = sessions.first() {
        println!("{}", serde_json::to_string_pretty(session)?);
    }
    Ok(())
}
