//! Bot Controller
//!
//! Synthesizes bots to fill a round and steers them every tick. Bots go
//! through the same movement, tagging and pickup rules as humans; they only
//! decide what intent to submit.

use tracing::trace;

use crate::core::rng::DeterministicRng;
use crate::core::vec3::{Vec3, ARENA_HALF_EXTENT};
use crate::game::input::MovementIntent;
use crate::game::powerup;
use crate::game::state::{GameState, Origin, PlayerId, PlayerKind, PlayerState, PowerUpKind, PLAYER_COLORS};
use crate::game::tagging::is_detectable;

const BOT_NAMES: [&str; 12] = [
    "Bolt", "Dash", "Ziggy", "Pip", "Rook", "Nova",
    "Echo", "Blink", "Sprocket", "Juniper", "Moss", "Quill",
];

/// Per-bot steering memory.
#[derive(Clone, Debug, Default)]
pub struct BotBrain {
    /// Current random-walk direction
    pub wander: Vec3,
    /// Keep `wander` until this time (ms)
    pub wander_until: u64,
}

// =============================================================================
// SYNTHESIS
// =============================================================================

/// Build a bot with randomized cosmetics at a random in-bounds position.
pub fn synthesize(state: &mut GameState) -> PlayerState {
    let id = state.mint_player_id();
    let name = state.rng.choose(&BOT_NAMES).copied().unwrap_or("Bot");
    let suffix = 10 + state.rng.next_index(90);
    let color = state.rng.choose(&PLAYER_COLORS).copied().unwrap_or(PLAYER_COLORS[0]);
    let position = state.rng.random_position(0.0);

    PlayerState::new(id, PlayerKind::Bot, format!("{} {}", name, suffix), color, position)
}

/// Add bots until the population reaches `target`.
pub fn fill_population(state: &mut GameState, target: usize) -> Vec<PlayerId> {
    let mut added = Vec::new();
    while state.player_count() < target {
        let bot = synthesize(state);
        let id = bot.id;
        if state.insert_player(bot) {
            added.push(id);
        }
    }
    added
}

// =============================================================================
// STEERING
// =============================================================================

/// Decide a bot's movement for this tick.
///
/// 1. Near the edge: head back toward the center.
/// 2. "It": chase the nearest untagged player it can see that is not flying.
/// 3. Untagged: flee the nearest "it" within detection range, otherwise go
///    for the nearest pickup if empty-handed.
///
/// Anything else falls back to a random walk.
pub fn step(
    bot: &PlayerState,
    state: &GameState,
    brain: &mut BotBrain,
    rng: &mut DeterministicRng,
    step_distance: f32,
) -> MovementIntent {
    let config = &state.config.bots;
    let now = state.now_ms;
    let pos = bot.position.flatten();

    let edge = ARENA_HALF_EXTENT - config.edge_buffer;
    if pos.x.abs() > edge || pos.z.abs() > edge {
        return MovementIntent::toward(-pos, step_distance);
    }

    if bot.is_it() {
        let target = state
            .all()
            .filter(|p| {
                p.is_untagged()
                    && p.alive
                    && is_detectable(p, &bot.id, now)
                    && !p.has_active(PowerUpKind::Flight, now)
            })
            .map(|p| (p.position.flatten(), p.position.planar_distance(pos)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((target, _)) = target {
            return MovementIntent::toward(target - pos, step_distance);
        }
        return wander(brain, rng, now, config.wander_interval_ms, step_distance);
    }

    if let Some((threat, _)) = nearest_threat(bot, state) {
        return MovementIntent::toward(escape_direction(pos, threat, rng), step_distance);
    }

    if bot.power_up.is_none() {
        let pickup = state
            .power_ups()
            .map(|p| (p.position.flatten(), p.position.planar_distance(pos)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((target, _)) = pickup {
            return MovementIntent::toward(target - pos, step_distance);
        }
    }

    wander(brain, rng, now, config.wander_interval_ms, step_distance)
}

/// Nearest "it" player within detection range.
fn nearest_threat(bot: &PlayerState, state: &GameState) -> Option<(Vec3, f32)> {
    let radius = state.config.bots.detection_radius;
    state
        .all()
        .filter(|p| p.id != bot.id && p.is_it() && p.alive)
        .map(|p| (p.position.flatten(), p.position.planar_distance(bot.position)))
        .filter(|(_, d)| *d <= radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Direction away from `threat`, turning perpendicular when straight
/// retreat would leave the arena.
fn escape_direction(pos: Vec3, threat: Vec3, rng: &mut DeterministicRng) -> Vec3 {
    let away = (pos - threat).normalize();
    if away == Vec3::ZERO {
        return rng.random_direction();
    }
    if (pos + away).is_in_arena() {
        return away;
    }

    let perp = away.perpendicular();
    [perp, -perp]
        .into_iter()
        .filter(|d| (pos + *d).is_in_arena())
        .max_by(|a, b| {
            (pos + *a).planar_distance(threat).total_cmp(&(pos + *b).planar_distance(threat))
        })
        .unwrap_or(-pos.normalize())
}

fn wander(
    brain: &mut BotBrain,
    rng: &mut DeterministicRng,
    now: u64,
    interval_ms: u64,
    step_distance: f32,
) -> MovementIntent {
    if now >= brain.wander_until || brain.wander == Vec3::ZERO {
        brain.wander = rng.random_direction();
        brain.wander_until = now + interval_ms;
    }
    MovementIntent::toward(brain.wander, step_distance)
}

/// Untagged bots pop an armed power-up when an "it" player closes in.
pub fn wants_to_activate(bot: &PlayerState, state: &GameState) -> bool {
    bot.is_untagged() && bot.power_up.is_armed() && nearest_threat(bot, state).is_some()
}

/// Steer every locally simulated bot for one tick of `dt_ms`.
pub fn drive_bots(state: &mut GameState, dt_ms: u64) {
    let step_distance = state.config.bots.speed * dt_ms as f32 / 1000.0;

    let mut rng = std::mem::take(&mut state.rng);
    let mut brains = std::mem::take(&mut state.bot_brains);

    let plans: Vec<(PlayerId, MovementIntent, bool)> = state
        .all()
        .filter(|p| p.kind == PlayerKind::Bot && p.origin == Origin::Local && p.alive)
        .map(|bot| {
            let brain = brains.entry(bot.id).or_default();
            let intent = step(bot, state, brain, &mut rng, step_distance);
            (bot.id, intent, wants_to_activate(bot, state))
        })
        .collect();

    brains.retain(|id, _| state.get(id).is_some());
    state.rng = rng;
    state.bot_brains = brains;

    for (id, intent, activate) in plans {
        if activate {
            trace!(bot = %id, "Bot activating power-up");
            powerup::activate(state, id);
        }
        state.apply_movement(&id, intent);
    }
}

// =============================================================================
// TESTS
// =============================================================================
