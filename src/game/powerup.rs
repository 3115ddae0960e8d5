//! Power-Up Director
//!
//! Keeps a small pool of pickups on the field and runs the
//! collect -> arm -> activate -> expire lifecycle. A player holds at most
//! one power-up; collecting while holding one is rejected.
//!
//! The instance hosting the round owns the pickup pool: only it spawns,
//! and other instances mirror its spawns from the relay.

use tracing::debug;

use crate::core::vec3::Vec3;
use crate::game::events::GameEvent;
use crate::game::state::{GameState, HeldPowerUp, Origin, PlayerId, PowerUpId, PowerUpKind, PowerUpState};
use crate::game::timer::TimerTask;

// =============================================================================
// SPAWNING
// =============================================================================

/// Place a pickup on the field.
///
/// Kind is uniform over every kind and position uniform over the padded
/// arena unless given.
pub fn spawn(state: &mut GameState, kind: Option<PowerUpKind>, position: Option<Vec3>) -> PowerUpId {
    let kind = kind.unwrap_or_else(|| PowerUpKind::ALL[state.rng.next_index(PowerUpKind::ALL.len())]);
    let position = position.unwrap_or_else(|| state.rng.random_position(state.config.power_ups.spawn_padding));

    let id = state.insert_power_up(kind, position);
    let placed = state.get_power_up(id).map_or(position, |p| p.position);
    state.push_event(GameEvent::power_up_spawned(state.now_ms, true, id, kind, placed));
    id
}

/// Mirror a pickup spawned by the round's host.
///
/// Ignored outside an active round and for ids already on the field.
pub fn place_remote(state: &mut GameState, pickup: PowerUpState) -> Option<GameEvent> {
    if !state.round.is_active() {
        return None;
    }
    let (id, kind) = (pickup.id, pickup.kind);
    let pickup = PowerUpState { spawned_at: state.now_ms, ..pickup };
    if !state.place_power_up(pickup) {
        return None;
    }
    let position = state.get_power_up(id)?.position;
    let event = GameEvent::power_up_spawned(state.now_ms, false, id, kind, position);
    state.push_event(event.clone());
    Some(event)
}

/// Spawn pickups until the pool is full.
pub fn fill_pool(state: &mut GameState) {
    while state.power_up_count() < state.config.power_ups.pool_size {
        spawn(state, None, None);
    }
    state.last_top_up_ms = state.now_ms;
}

/// Top the pool up on its interval while a hosted round is active.
pub fn maintain_pool(state: &mut GameState) {
    if !state.round.is_active() || !state.is_round_host() {
        return;
    }
    let interval = state.config.power_ups.top_up_interval_ms;
    if state.now_ms.saturating_sub(state.last_top_up_ms) >= interval {
        fill_pool(state);
    }
}

/// Remove every pickup from the field.
pub fn clear_field(state: &mut GameState) {
    state.clear_power_ups();
}

// =============================================================================
// COLLECTION
// =============================================================================

/// Collect a pickup.
///
/// The collector must be untagged, alive and empty-handed. The round's host
/// replaces the pickup immediately to keep the pool size.
pub fn collect(state: &mut GameState, player_id: PlayerId, power_up_id: PowerUpId, local: bool) -> Option<GameEvent> {
    if !state.round.is_active() {
        return None;
    }
    let player = state.get(&player_id)?;
    if !player.is_untagged() || !player.alive || !player.power_up.is_none() {
        return None;
    }

    let pickup = state.take_power_up(power_up_id)?;
    if let Some(player) = state.get_player_mut(&player_id) {
        player.power_up = HeldPowerUp::armed(pickup.kind);
    }

    debug!(player = %player_id, power_up = %power_up_id, kind = ?pickup.kind, "Power-up collected");

    let event = GameEvent::power_up_collected(state.now_ms, local, power_up_id, player_id, pickup.kind);
    state.push_event(event.clone());

    if state.is_round_host() {
        spawn(state, None, None);
    }
    Some(event)
}

/// Apply a collection reported by another instance.
///
/// Only pickups this instance has on its field are consumed, and the
/// collector is armed with the kind the reporting instance saw. An id not
/// seen yet is retired so its spawn, if it arrives late, is dropped.
pub fn collect_remote(
    state: &mut GameState,
    player_id: PlayerId,
    power_up_id: PowerUpId,
    kind: PowerUpKind,
) -> Option<GameEvent> {
    if !state.round.is_active() {
        return None;
    }
    if state.get_power_up(power_up_id).is_none() {
        state.retire_power_up(power_up_id);
        return None;
    }
    let player = state.get(&player_id)?;
    if !player.is_untagged() || !player.alive || player.power_up.expires_at().is_some() {
        return None;
    }

    state.take_power_up(power_up_id);
    if let Some(player) = state.get_player_mut(&player_id) {
        player.power_up = HeldPowerUp::armed(kind);
    }

    debug!(player = %player_id, power_up = %power_up_id, ?kind, "Remote power-up collected");

    let event = GameEvent::power_up_collected(state.now_ms, false, power_up_id, player_id, kind);
    state.push_event(event.clone());

    if state.is_round_host() {
        spawn(state, None, None);
    }
    Some(event)
}

/// Collect every pickup within reach of a locally simulated player.
pub fn evaluate_pickups(state: &mut GameState) -> Vec<GameEvent> {
    if !state.round.is_active() {
        return Vec::new();
    }
    let radius = state.config.power_ups.pickup_radius;

    let claims: Vec<(PlayerId, PowerUpId)> = state
        .all()
        .filter(|p| p.origin == Origin::Local && p.is_untagged() && p.alive && p.power_up.is_none())
        .filter_map(|p| {
            state
                .power_ups()
                .map(|pickup| (pickup.id, p.position.planar_distance(pickup.position)))
                .filter(|(_, d)| *d < radius)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(pickup_id, _)| (p.id, pickup_id))
        })
        .collect();

    let mut events = Vec::new();
    for (player_id, pickup_id) in claims {
        let local = state.is_locally_controlled(&player_id);
        // Two players may reach for the same pickup; the first in id order wins
        if let Some(event) = collect(state, player_id, pickup_id, local) {
            events.push(event);
        }
    }
    events
}

// =============================================================================
// ACTIVATION & EXPIRY
// =============================================================================

/// Activate the held power-up. No-op unless one is armed.
pub fn activate(state: &mut GameState, player_id: PlayerId) -> Option<GameEvent> {
    let player = state.get(&player_id)?;
    if !player.power_up.is_armed() {
        return None;
    }
    let kind = player.power_up.kind()?;
    let local = state.is_locally_controlled(&player_id);
    start_effect(state, player_id, kind, local)
}

/// Apply an activation reported by another instance.
///
/// The remote holder is authoritative for its own power-up, so whatever is
/// held locally for that player is replaced.
pub fn activate_remote(state: &mut GameState, player_id: PlayerId, kind: PowerUpKind) -> Option<GameEvent> {
    let player = state.get(&player_id)?;
    if !player.is_untagged() || player.power_up.is_active(kind, state.now_ms) {
        return None;
    }
    start_effect(state, player_id, kind, false)
}

fn start_effect(state: &mut GameState, player_id: PlayerId, kind: PowerUpKind, local: bool) -> Option<GameEvent> {
    let now = state.now_ms;
    let expires_at = now + state.config.power_ups.effect_duration_ms;

    // Every window gets its own generation; an older expiry timer may still
    // be due on this very tick
    let player = state.get_player_mut(&player_id)?;
    player.effect_generation = player.effect_generation.wrapping_add(1);
    player.power_up = HeldPowerUp::of(kind, Some(expires_at));
    let effect_generation = player.effect_generation;

    state.timers.schedule(expires_at, TimerTask::ExpirePowerUp { player_id, effect_generation });

    debug!(player = %player_id, ?kind, expires_at, "Power-up activated");

    let event = GameEvent::power_up_activated(now, local, player_id, kind, expires_at);
    state.push_event(event.clone());
    Some(event)
}

/// Expiry timer fired.
///
/// Discarded if the player's power-up was replaced or cleared since the
/// timer was scheduled.
pub fn expire(state: &mut GameState, player_id: PlayerId, effect_generation: u32) -> Option<GameEvent> {
    let player = state.get_player_mut(&player_id)?;
    if player.effect_generation != effect_generation || player.power_up.expires_at().is_none() {
        return None;
    }
    let kind = player.power_up.kind()?;
    player.clear_power_up();

    debug!(player = %player_id, ?kind, "Power-up expired");

    let event = GameEvent::power_up_expired(state.now_ms, player_id, kind);
    state.push_event(event.clone());
    Some(event)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::{ARENA_HALF_EXTENT, FLIGHT_HEIGHT, GROUND_HEIGHT};
    use crate::game::config::GameConfig;
    use crate::game::input::MovementIntent;
    use crate::game::round::start_round;
    use crate::game::state::{PlayerKind, Role};

    fn active_round() -> (GameState, PlayerId) {
        let mut config = GameConfig::default();
        config.round.min_population = 1;
        let mut state = GameState::new(config);
        let id = state.add_player(PlayerKind::Human, "runner");
        start_round(&mut state);

        let player = state.get_player_mut(&id).unwrap();
        player.role = Role::Untagged;
        player.tagged_at = None;
        player.position = Vec3::ZERO;
        state.take_events();
        (state, id)
    }

    #[test]
    fn test_spawn_respects_padding_and_kind() {
        let (mut state, _) = active_round();
        for _ in 0..200 {
            let id = spawn(&mut state, None, None);
            let pickup = state.get_power_up(id).unwrap();
            assert!(pickup.position.x.abs() <= ARENA_HALF_EXTENT - 2.0);
            assert!(pickup.position.z.abs() <= ARENA_HALF_EXTENT - 2.0);
        }

        let id = spawn(&mut state, Some(PowerUpKind::Flight), Some(Vec3::planar(1.0, 2.0)));
        let pickup = state.get_power_up(id).unwrap();
        assert_eq!(pickup.kind, PowerUpKind::Flight);
        assert_eq!(pickup.position, Vec3::planar(1.0, 2.0));
    }

    #[test]
    fn test_collect_arms_and_replaces() {
        let (mut state, id) = active_round();
        let pool = state.power_up_count();
        let pickup = spawn(&mut state, Some(PowerUpKind::Speed), Some(Vec3::ZERO));

        let event = collect(&mut state, id, pickup, true);
        assert!(event.is_some());
        assert!(state.get_power_up(pickup).is_none());
        assert_eq!(state.power_up_count(), pool + 1);
        assert_eq!(state.get(&id).unwrap().power_up, HeldPowerUp::armed(PowerUpKind::Speed));
    }

    #[test]
    fn test_collect_while_holding_is_rejected() {
        let (mut state, id) = active_round();
        let first = spawn(&mut state, Some(PowerUpKind::Speed), Some(Vec3::ZERO));
        let second = spawn(&mut state, Some(PowerUpKind::Flight), Some(Vec3::ZERO));

        assert!(collect(&mut state, id, first, true).is_some());
        assert!(collect(&mut state, id, second, true).is_none());
        assert!(state.get_power_up(second).is_some());
        assert_eq!(state.get(&id).unwrap().power_up.kind(), Some(PowerUpKind::Speed));
    }

    #[test]
    fn test_it_cannot_collect() {
        let (mut state, id) = active_round();
        let it = state.add_player(PlayerKind::Bot, "chaser");
        {
            let chaser = state.get_player_mut(&it).unwrap();
            chaser.role = Role::It;
            chaser.position = Vec3::planar(0.5, 0.0);
        }
        let pickup = spawn(&mut state, Some(PowerUpKind::Speed), Some(Vec3::ZERO));

        assert!(collect(&mut state, it, pickup, true).is_none());

        let events = evaluate_pickups(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].player_id(), Some(id));
        assert!(state.get(&it).unwrap().power_up.is_none());
    }

    #[test]
    fn test_activate_requires_armed() {
        let (mut state, id) = active_round();
        assert!(activate(&mut state, id).is_none());

        let pickup = spawn(&mut state, Some(PowerUpKind::Invisibility), Some(Vec3::ZERO));
        collect(&mut state, id, pickup, true);
        assert!(activate(&mut state, id).is_some());
        assert!(activate(&mut state, id).is_none(), "already counting down");
    }

    #[test]
    fn test_flight_window_and_single_revert() {
        let (mut state, id) = active_round();
        state.now_ms = 1_000;
        let pickup = spawn(&mut state, Some(PowerUpKind::Flight), Some(Vec3::ZERO));
        collect(&mut state, id, pickup, true);
        activate(&mut state, id);

        assert_eq!(state.get(&id).unwrap().power_up.expires_at(), Some(6_000));
        let pos = state.apply_movement(&id, MovementIntent::new(1.0, 0.0)).unwrap();
        assert_eq!(pos.y, FLIGHT_HEIGHT);
        assert_eq!(pos.x, 2.0);

        let due = state.timers.drain_due(6_000);
        assert_eq!(due.len(), 1);
        let TimerTask::ExpirePowerUp { player_id, effect_generation } = due[0].clone() else {
            panic!("expected expiry timer");
        };
        state.now_ms = 6_000;
        assert!(expire(&mut state, player_id, effect_generation).is_some());
        assert_eq!(state.get(&id).unwrap().position.y, GROUND_HEIGHT);
        assert!(expire(&mut state, player_id, effect_generation).is_none());
    }

    #[test]
    fn test_expiry_after_tag_is_stale() {
        let (mut state, id) = active_round();
        let pickup = spawn(&mut state, Some(PowerUpKind::Speed), Some(Vec3::ZERO));
        collect(&mut state, id, pickup, true);
        activate(&mut state, id);
        let generation = state.get(&id).unwrap().effect_generation;

        state.get_player_mut(&id).unwrap().clear_power_up();
        assert!(expire(&mut state, id, generation).is_none());
    }

    #[test]
    fn test_maintain_pool_on_interval() {
        let (mut state, _) = active_round();
        let ids: Vec<PowerUpId> = state.power_ups().map(|p| p.id).collect();
        for id in ids {
            state.take_power_up(id);
        }
        assert_eq!(state.power_up_count(), 0);

        state.now_ms += 4_999;
        maintain_pool(&mut state);
        assert_eq!(state.power_up_count(), 0);

        state.now_ms += 1;
        maintain_pool(&mut state);
        assert_eq!(state.power_up_count(), 3);
    }

    #[test]
    fn test_reactivation_outlives_previous_expiry() {
        let (mut state, id) = active_round();
        state.now_ms = 1_000;
        state.get_player_mut(&id).unwrap().power_up = HeldPowerUp::armed(PowerUpKind::Speed);
        activate(&mut state, id);

        // Same kind reported again on the tick the first window closes
        state.now_ms = 6_000;
        assert!(activate_remote(&mut state, id, PowerUpKind::Speed).is_some());
        for task in state.timers.drain_due(6_000) {
            let TimerTask::ExpirePowerUp { player_id, effect_generation } = task else {
                continue;
            };
            assert!(expire(&mut state, player_id, effect_generation).is_none());
        }
        assert!(state.get(&id).unwrap().has_active(PowerUpKind::Speed, 10_999));
        assert_eq!(state.timers.next_due(), Some(11_000));
    }

    #[test]
    fn test_remote_collection_grants_reported_kind() {
        let (mut state, id) = active_round();
        let pickup = spawn(&mut state, Some(PowerUpKind::Speed), Some(Vec3::ZERO));
        let pool = state.power_up_count();

        let event = collect_remote(&mut state, id, pickup, PowerUpKind::Flight).unwrap();
        assert!(!event.local);
        assert_eq!(state.get(&id).unwrap().power_up, HeldPowerUp::armed(PowerUpKind::Flight));
        assert!(state.get_power_up(pickup).is_none());
        assert_eq!(state.power_up_count(), pool, "host replaces the pickup");

        // Echo of the same frame
        state.get_player_mut(&id).unwrap().power_up = HeldPowerUp::None;
        assert!(collect_remote(&mut state, id, pickup, PowerUpKind::Flight).is_none());
    }

    #[test]
    fn test_remote_collection_of_unknown_pickup_is_ignored() {
        let (mut state, id) = active_round();
        let before: Vec<PowerUpId> = state.power_ups().map(|p| p.id).collect();
        let unseen = PowerUpId::new([0xEE; 16]);

        assert!(collect_remote(&mut state, id, unseen, PowerUpKind::Flight).is_none());
        assert!(state.get(&id).unwrap().power_up.is_none());
        assert_eq!(state.power_ups().map(|p| p.id).collect::<Vec<_>>(), before);

        // Its spawn arriving afterwards does not resurrect it
        let late = PowerUpState { id: unseen, kind: PowerUpKind::Flight, position: Vec3::ZERO, spawned_at: 0 };
        assert!(place_remote(&mut state, late).is_none());
    }

    #[test]
    fn test_echoed_spawn_of_collected_pickup_is_dropped() {
        let (mut state, id) = active_round();
        let pickup = spawn(&mut state, Some(PowerUpKind::Speed), Some(Vec3::ZERO));
        let echoed = state.get_power_up(pickup).cloned().unwrap();
        collect(&mut state, id, pickup, true);

        assert!(place_remote(&mut state, echoed).is_none());
        assert!(state.get_power_up(pickup).is_none());
    }

    #[test]
    fn test_followers_do_not_spawn() {
        let (mut state, id) = active_round();
        state.round.host = Some(uuid::Uuid::from_u128(0xF00D));
        assert!(!state.is_round_host());
        let pickup = state.power_ups().map(|p| p.id).next().unwrap();
        let pool = state.power_up_count();

        assert!(collect(&mut state, id, pickup, true).is_some());
        assert_eq!(state.power_up_count(), pool - 1);

        state.now_ms += 60_000;
        maintain_pool(&mut state);
        assert_eq!(state.power_up_count(), pool - 1);

        let mirrored = PowerUpState {
            id: PowerUpId::new([0x42; 16]),
            kind: PowerUpKind::Invisibility,
            position: Vec3::planar(1.0, 1.0),
            spawned_at: 0,
        };
        assert!(place_remote(&mut state, mirrored.clone()).is_some());
        assert!(place_remote(&mut state, mirrored).is_none());
        assert_eq!(state.power_up_count(), pool);
    }

    #[test]
    fn test_remote_activation_overrides() {
        let (mut state, id) = active_round();
        let event = activate_remote(&mut state, id, PowerUpKind::Speed).unwrap();
        assert!(!event.local);
        assert!(state.get(&id).unwrap().has_active(PowerUpKind::Speed, state.now_ms));
        assert!(activate_remote(&mut state, id, PowerUpKind::Speed).is_none());
    }
}
