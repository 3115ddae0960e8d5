//! Tagging Engine
//!
//! Collision-based tag evaluation. Re-evaluating a candidate that is
//! already "it" is a no-op, so duplicate triggers from the relay are
//! harmless.

use tracing::debug;

use crate::game::config::TagConfig;
use crate::game::events::GameEvent;
use crate::game::round;
use crate::game::state::{GameState, PlayerId, PlayerState, PowerUpKind, Role};

/// Collision radius for a pair of scales.
#[inline]
pub fn collision_radius(config: &TagConfig, scale_a: f32, scale_b: f32) -> f32 {
    config.base_collision_radius * (scale_a + scale_b) / 2.0
}

/// Can `viewer` perceive `candidate` at `now`?
///
/// Invisibility hides a player from everyone but themselves. Tag
/// evaluation and bot targeting both go through this check.
#[inline]
pub fn is_detectable(candidate: &PlayerState, viewer: &PlayerId, now: u64) -> bool {
    candidate.id == *viewer || !candidate.has_active(PowerUpKind::Invisibility, now)
}

/// Role, liveness and power-up preconditions for `tagger` tagging `candidate`.
pub fn can_tag(tagger: &PlayerState, candidate: &PlayerState, now: u64) -> bool {
    tagger.id != candidate.id
        && tagger.is_it()
        && candidate.is_untagged()
        && candidate.alive
        && !candidate.has_active(PowerUpKind::Flight, now)
        && is_detectable(candidate, &tagger.id, now)
}

/// Check whether two players are close enough to tag.
#[inline]
pub fn in_tag_range(config: &TagConfig, tagger: &PlayerState, candidate: &PlayerState) -> bool {
    let radius = collision_radius(config, tagger.size_scale, candidate.size_scale);
    tagger.position.distance(candidate.position) < radius
}

/// Evaluate one tagger/candidate pair and apply the tag if it lands.
pub fn evaluate_tag(state: &mut GameState, tagger_id: PlayerId, candidate_id: PlayerId) -> Option<GameEvent> {
    if !state.round.is_active() {
        return None;
    }
    let now = state.now_ms;
    let tagger = state.get(&tagger_id)?;
    let candidate = state.get(&candidate_id)?;

    if !can_tag(tagger, candidate, now) || !in_tag_range(&state.config.tagging, tagger, candidate) {
        return None;
    }

    let local = state.is_locally_controlled(&tagger_id) || state.is_locally_controlled(&candidate_id);
    apply_tag(state, Some(tagger_id), candidate_id, local)
}

/// Turn `candidate` into "it".
///
/// Also used for tags reported over the relay, where no collision check is
/// repeated. Returns None if the candidate is unknown or already "it".
pub fn apply_tag(
    state: &mut GameState,
    tagger_id: Option<PlayerId>,
    candidate_id: PlayerId,
    local: bool,
) -> Option<GameEvent> {
    if !state.round.is_active() {
        return None;
    }
    let tagged_at = state.round.elapsed(state.now_ms);
    let config = state.config.tagging.clone();

    let candidate = state.get_player_mut(&candidate_id)?;
    if candidate.role != Role::Untagged {
        return None;
    }
    candidate.role = Role::It;
    candidate.tagged_at = Some(tagged_at);
    candidate.size_scale = config.fresh_it_scale;
    candidate.clear_power_up();

    if let Some(tagger) = tagger_id.as_ref().and_then(|id| state.get_player_mut(id)) {
        tagger.tag_count += 1;
        tagger.size_scale = (1.0 + config.scale_per_tag * tagger.tag_count as f32).min(config.max_scale);
    }

    debug!(tagged = %candidate_id, tagger = ?tagger_id.map(|id| id.short()), tagged_at, "Player tagged");

    let event = GameEvent::participant_tagged(state.now_ms, local, candidate_id, tagger_id, tagged_at);
    state.push_event(event.clone());

    if state.untagged_count() == 0 {
        round::schedule_grace_end(state);
    }

    Some(event)
}

/// Evaluate every "it" player against every untagged player.
///
/// The "it" set is captured before evaluation, so a player tagged in this
/// pass does not tag anyone else until the next tick.
pub fn evaluate_all_tags(state: &mut GameState) -> Vec<GameEvent> {
    if !state.round.is_active() {
        return Vec::new();
    }
    let taggers: Vec<PlayerId> = state.all().filter(|p| p.is_it() && p.alive).map(|p| p.id).collect();
    let candidates: Vec<PlayerId> = state.all().filter(|p| p.is_untagged()).map(|p| p.id).collect();

    let mut events = Vec::new();
    for tagger in &taggers {
        for candidate in &candidates {
            if let Some(event) = evaluate_tag(state, *tagger, *candidate) {
                events.push(event);
            }
        }
    }
    events
}

// =============================================================================
// TESTS
// =============================================================================
