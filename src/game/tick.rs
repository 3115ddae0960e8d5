//! Simulation Tick
//!
//! The single place game state advances. Every external trigger has been
//! queued as a command beforehand; within a tick movement is applied before
//! tags are evaluated, tags before pickups, and pickups before the round
//! end check.

use tracing::debug;
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::game::bot;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::Command;
use crate::game::powerup;
use crate::game::round::{self, RoundEndReason};
use crate::game::state::{GameState, Origin, PlayerState};
use crate::game::tagging;
use crate::game::timer::TimerTask;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Round number started this tick
    pub round_started: Option<u32>,
    /// Round number and reason, if a round ended this tick
    pub round_ended: Option<(u32, RoundEndReason)>,
}

/// Run one simulation tick of `dt_ms` milliseconds.
///
/// Deterministic: given the same config, the same command script and the
/// same `dt_ms` sequence, two states produce identical events.
pub fn tick(state: &mut GameState, dt_ms: u64) -> TickResult {
    // 1. Advance the clock
    state.tick += 1;
    state.now_ms += dt_ms;

    // 2. Apply queued commands in arrival order (includes movement)
    for command in state.drain_commands() {
        apply_command(state, command);
    }

    // 3. Fire due timers
    for task in state.timers.drain_due(state.now_ms) {
        fire_timer(state, task);
    }

    if state.round.is_active() {
        // 4. Bot movement
        bot::drive_bots(state, dt_ms);

        // 5. Tags
        tagging::evaluate_all_tags(state);

        // 6. Pickups
        powerup::evaluate_pickups(state);
        powerup::maintain_pool(state);

        // 7. Round end triggers
        round::check_end_conditions(state);
    }

    let events = state.take_events();

    #[cfg(feature = "debug-tracing")]
    trace!(tick = state.tick, now_ms = state.now_ms, events = events.len(), "Tick complete");

    let mut result = TickResult::default();
    for event in &events {
        match &event.data {
            GameEventData::RoundStarted { round_number, .. } => {
                result.round_started = Some(*round_number);
            }
            GameEventData::RoundEnded { round_number, reason, .. } => {
                result.round_ended = Some((*round_number, *reason));
            }
            _ => {}
        }
    }
    result.events = events;
    result
}

/// Apply one queued command.
pub fn apply_command(state: &mut GameState, command: Command) {
    match command {
        Command::Join { player_id, kind, display_name, local_viewer } => {
            let color = state
                .rng
                .choose(&crate::game::state::PLAYER_COLORS)
                .copied()
                .unwrap_or("#ffffff");
            let position = state.rng.random_position(0.0);
            let player = PlayerState::new(player_id, kind, display_name, color, position);
            if state.insert_player(player) && local_viewer {
                state.set_local_viewer(Some(player_id));
            }
        }
        Command::Leave { player_id } => {
            state.remove_player(&player_id);
        }
        Command::Move { player_id, intent } => {
            state.apply_movement(&player_id, intent);
        }
        Command::Activate { player_id } => {
            powerup::activate(state, player_id);
        }
        Command::StartRound => {
            round::start_round(state);
        }
        Command::LinkProfile { player_id, profile_id } => {
            if !state.link_profile(&player_id, profile_id) {
                debug!(player = %player_id, "Profile link ignored");
            }
        }
        Command::RemoteJoined { player } => {
            let id = player.id;
            if !state.insert_player(PlayerState::from_snapshot(player, Origin::Remote)) {
                debug!(player = %id, "Duplicate remote join ignored");
            }
        }
        Command::RemoteMoved { player_id, position, heading } => {
            state.observe_remote_movement(&player_id, position, heading);
        }
        Command::RemoteTagged { tagged_id, tagger_id } => {
            tagging::apply_tag(state, tagger_id, tagged_id, false);
        }
        Command::RemoteSpawned { power_up } => {
            powerup::place_remote(state, power_up);
        }
        Command::RemoteCollected { power_up_id, player_id, kind } => {
            powerup::collect_remote(state, player_id, power_up_id, kind);
        }
        Command::RemoteActivated { player_id, kind } => {
            powerup::activate_remote(state, player_id, kind);
        }
        Command::RemoteLeft { player_id } => {
            if state.get(&player_id).is_some_and(|p| p.origin == Origin::Remote) {
                state.remove_player(&player_id);
            }
        }
        Command::RemoteRoundStarted { host, round_number, players, power_ups } => {
            round::adopt_remote_round(state, host, round_number, players, power_ups);
        }
        Command::RemoteRoundEnded { host, round_number } => {
            round::observe_remote_round_end(state, host, round_number);
        }
    }
}

fn fire_timer(state: &mut GameState, task: TimerTask) {
    match task {
        TimerTask::ExpirePowerUp { player_id, effect_generation } => {
            powerup::expire(state, player_id, effect_generation);
        }
        TimerTask::EndRound { round_number } => {
            round::on_grace_elapsed(state, round_number);
        }
        TimerTask::RestartRound { after_round } => {
            round::on_intermission_elapsed(state, after_round);
        }
    }
}

/// Replay a command script from a fresh state.
///
/// `script` pairs a tick index with the command queued before that tick.
pub fn replay(
    mut state: GameState,
    script: &[(u64, Command)],
    tick_count: u64,
    dt_ms: u64,
) -> (GameState, Vec<GameEvent>) {
    let mut all_events = Vec::new();
    let mut cursor = 0;

    for t in 0..tick_count {
        while cursor < script.len() && script[cursor].0 <= t {
            state.enqueue(script[cursor].1.clone());
            cursor += 1;
        }
        let result = tick(&mut state, dt_ms);
        all_events.extend(result.events);
    }

    (state, all_events)
}
