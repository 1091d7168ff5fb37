//! Crashcore demo runner.
//!
//! Wires the round engine to an in-memory wallet and history store and
//! simulates a few players betting into live rounds. The broadcast stream
//! is logged the way a transport adapter would consume it.

use crashcore::{
    spawn_engine, BroadcastGateway, ConfigLoader, EngineHandle, GameError, HistoryStore,
    MemoryHistory, MemoryWallet, OsSeedSource, RoundEngine, SettlementGateway,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let loader = match std::env::var("CRASH_CONFIG") {
        Ok(path) => ConfigLoader::new().with_path(path),
        Err(_) => ConfigLoader::new(),
    };
    let config = Arc::new(loader.load()?);

    let wallet = Arc::new(MemoryWallet::new());
    for user in ["alice", "bob", "carol"] {
        wallet.deposit(user, "USDT", 1_000.0);
    }

    let history = Arc::new(MemoryHistory::new());
    let settlement = SettlementGateway::spawn(
        wallet.clone(),
        history.clone(),
        config.settlement.clone(),
    );
    let gateway = Arc::new(BroadcastGateway::new(1_024));

    let mut events = gateway.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        info!(event = %json, "broadcast");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let starting_nonce = history.round_count().await;
    let engine = RoundEngine::new(
        config.clone(),
        wallet.clone(),
        settlement,
        gateway.clone(),
        Box::new(OsSeedSource),
        starting_nonce,
    )?;
    let handle = spawn_engine(engine, Duration::from_millis(config.tick_interval_ms));

    for user in ["alice", "bob", "carol"] {
        tokio::spawn(simulate_player(handle.clone(), user));
    }

    info!("crashcore demo running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn simulate_player(handle: EngineHandle, user: &'static str) {
    loop {
        let auto = if rand::thread_rng().gen_bool(0.5) {
            Some(1.2 + rand::thread_rng().gen::<f64>() * 3.0)
        } else {
            None
        };

        match handle.place_bet(user, 10.0, "USDT", auto).await {
            Ok(receipt) => {
                if auto.is_none() {
                    let wait = rand::thread_rng().gen_range(500u64..4_000);
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    match handle.cashout(receipt.bet_id).await {
                        Ok(cashed) => info!(
                            user,
                            payout = cashed.payout,
                            multiplier = cashed.multiplier,
                            "manual cashout"
                        ),
                        Err(e) => info!(user, code = e.code(), "cashout refused"),
                    }
                }
                tokio::time::sleep(Duration::from_millis(1_000)).await;
            }
            Err(GameError::RoundNotAccepting) | Err(GameError::AlreadyBet) => {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            Err(e) => {
                warn!(user, code = e.code(), "bet failed");
                tokio::time::sleep(Duration::from_millis(1_000)).await;
            }
        }
    }
}
