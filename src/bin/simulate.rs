//! Tag Arena Simulator
//!
//! Headless game instance: scripted humans plus bots, run for a number of
//! rounds against the full simulation, optionally attached to a relay and
//! a profile file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tag_arena::game::{Command, GameConfig, GameEventData, MovementIntent, PlayerId, PlayerKind};
use tag_arena::network::{GameSession, RelayClientConfig, RelayLink, SessionConfig};
use tag_arena::persistence::{JsonFileStore, MemoryStore, PersistenceHandle};
use tag_arena::{DeterministicRng, VERSION};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Scripted human participants
    #[arg(long, default_value_t = 1)]
    humans: usize,
    /// Rounds to play before exiting
    #[arg(long, default_value_t = 1)]
    rounds: u32,
    /// Arena seed (overrides the config file)
    #[arg(long)]
    seed: Option<u64>,
    /// Round time budget in milliseconds (overrides the config file)
    #[arg(long)]
    round_ms: Option<u64>,
    /// JSON game config
    #[arg(long)]
    game_config: Option<PathBuf>,
    /// JSON profile store; in-memory when absent
    #[arg(long, env = "TAG_ARENA_DATA_FILE")]
    data_file: Option<PathBuf>,
    /// Relay to join (`ws://host:port`)
    #[arg(long, env = "TAG_ARENA_RELAY_URL")]
    relay_url: Option<String>,
    /// Run in real time even without a relay
    #[arg(long)]
    paced: bool,
    /// Write the command stream as a binary replay script
    #[arg(long)]
    record: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Tag Arena simulator v{}", VERSION);

    let mut game = match &cli.game_config {
        Some(path) => GameConfig::from_json_file(path)
            .with_context(|| format!("failed to load game config {}", path.display()))?,
        None => GameConfig::default(),
    };
    if let Some(seed) = cli.seed {
        game.seed = seed;
    }
    if let Some(round_ms) = cli.round_ms {
        game.round.duration_budget_ms = round_ms;
    }

    let (persistence, worker) = match &cli.data_file {
        Some(path) => PersistenceHandle::spawn(JsonFileStore::open(path)),
        None => PersistenceHandle::spawn(MemoryStore::new()),
    };

    let paced = cli.paced || cli.relay_url.is_some();
    let tick_ms = game.tick_interval_ms();
    let human_speed = game.bots.speed;
    let mut steering_rng = DeterministicRng::new(game.seed ^ 0x5EED);

    let mut session = GameSession::new(SessionConfig {
        game,
        paced,
        record: cli.record.is_some(),
        ..Default::default()
    })
    .with_persistence(persistence.clone());
    if let Some(url) = &cli.relay_url {
        session = session.with_relay(RelayLink::connect(RelayClientConfig::new(url.clone())));
    }
    let handle = session.spawn();
    let mut events = handle.subscribe();

    let humans: Vec<PlayerId> = (0..cli.humans)
        .map(|_| PlayerId::from_random_bytes(steering_rng.next_bytes16()))
        .collect();
    for (i, id) in humans.iter().enumerate() {
        handle
            .send(Command::Join {
                player_id: *id,
                kind: PlayerKind::Human,
                display_name: format!("Runner {}", i + 1),
                local_viewer: i == 0,
            })
            .await?;
    }
    handle.send(Command::StartRound).await?;

    let step = human_speed * tick_ms as f32 / 1000.0;
    let mut headings: Vec<_> = humans.iter().map(|_| steering_rng.random_direction()).collect();
    let mut steer = tokio::time::interval(Duration::from_millis(if paced { tick_ms.max(1) } else { 1 }));
    steer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut rounds_done = 0;
    while rounds_done < cli.rounds {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => match event.data {
                        GameEventData::RoundStarted { round_number, players, .. } => {
                            info!(round_number, players = players.len(), "Round started");
                        }
                        GameEventData::ParticipantTagged { tagged_id, tagger_id, .. } if event.local => {
                            let tagger = tagger_id.map(|id| id.short()).unwrap_or_else(|| "-".to_string());
                            info!("{} tagged by {} at {} ms", tagged_id.short(), tagger, event.at_ms);
                        }
                        GameEventData::RoundEnded { round_number, reason, survival, winners, .. } => {
                            info!(round_number, ?reason, "Round ended");
                            for (id, ms) in &survival {
                                let marker = if winners.contains(id) { " (winner)" } else { "" };
                                info!("  {} survived {} ms{}", id.short(), ms, marker);
                            }
                            rounds_done += 1;
                        }
                        _ => {}
                    },
                    Err(RecvError::Lagged(skipped)) => warn!("Event stream lagged, skipped {}", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
            _ = steer.tick() => {
                for (id, heading) in humans.iter().zip(headings.iter_mut()) {
                    if steering_rng.next_bool(0.05) {
                        *heading = steering_rng.random_direction();
                    }
                    let intent = MovementIntent::toward(*heading, step);
                    handle.send(Command::Move { player_id: *id, intent }).await?;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("Interrupted");
                break;
            }
        }
    }

    let report = handle.shutdown().await?;
    info!(
        ticks = report.state.tick,
        elapsed_ms = report.state.now_ms,
        players = report.state.player_count(),
        "Simulation finished"
    );

    if let (Some(path), Some(script)) = (&cli.record, &report.script) {
        let bytes = script.to_bytes().context("failed to encode replay script")?;
        std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        info!(commands = script.commands.len(), "Replay script written to {}", path.display());
    }

    match persistence.top_profiles(10).await {
        Ok(top) => {
            info!("=== Leaderboard ===");
            for (rank, profile) in top.iter().enumerate() {
                info!(
                    "{:>2}. {:<16} {:>8} ms over {} rounds (best {} ms)",
                    rank + 1,
                    profile.display_name,
                    profile.total_survival_ms,
                    profile.rounds_played,
                    profile.best_survival_ms
                );
            }
        }
        Err(e) => warn!("Leaderboard unavailable: {}", e),
    }

    drop(persistence);
    worker.await.context("persistence worker failed")?;
    Ok(())
}
