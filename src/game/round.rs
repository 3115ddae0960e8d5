//! Round Lifecycle
//!
//! `Idle -> Active -> Ended -> (intermission) -> Active ...`
//!
//! Starting a round tops the population up with bots, picks the initial
//! "it" uniformly at random and resets every participant. A round ends when
//! its time budget is spent or, a short grace delay after, when nobody is
//! left untagged. The next round starts automatically after intermission.
//!
//! With several instances on one relay, each round has a host: the
//! instance that started it. The others adopt the host's `round-started`
//! snapshot and its `round-ended`. Competing starts resolve to the higher
//! round number, then the lower host id.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::rng::{DeterministicRng, derive_round_seed};
use crate::game::bot;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::powerup;
use crate::game::state::{GameState, Origin, PlayerId, PlayerKind, PlayerSnapshot, PlayerState, PowerUpState, Role};
use crate::game::tagging;
use crate::game::timer::TimerTask;

// =============================================================================
// TYPES
// =============================================================================

/// Round lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No round has started yet
    #[default]
    Idle,
    /// Round in progress
    Active,
    /// Round over; intermission running
    Ended,
}

/// Why a round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEndReason {
    /// Duration budget spent
    TimeExpired,
    /// Nobody left untagged
    AllTagged,
}

/// One participant's result for a finished round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalOutcome {
    pub player_id: PlayerId,
    pub kind: PlayerKind,
    pub profile_ref: Option<String>,
    /// Ended the round as "it"
    pub was_it: bool,
    /// Time survived untagged (ms)
    pub survival_ms: u64,
}

/// Metadata for a single round. Frozen once `ended_at` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// Monotonic round number (first round is 1)
    pub number: u32,
    /// Simulation time the round started (ms)
    pub started_at: u64,
    /// Maximum length (ms)
    pub duration_budget: u64,
    /// Simulation time the round ended (ms)
    pub ended_at: Option<u64>,
    /// Why it ended
    pub end_reason: Option<RoundEndReason>,
    /// Survival per participant (ms), filled at end
    pub survival_record: BTreeMap<PlayerId, u64>,
    /// Participants still untagged at end
    pub survivors: Vec<PlayerId>,
}

impl Round {
    /// Round-relative time at `now` (ms).
    pub fn elapsed(&self, now: u64) -> u64 {
        now.saturating_sub(self.started_at)
    }

    /// Winners of a finished round.
    ///
    /// A lone survivor wins outright; otherwise every participant sharing
    /// the longest survival time is reported.
    pub fn winners(&self) -> Vec<PlayerId> {
        if self.survivors.len() == 1 {
            return self.survivors.clone();
        }
        let Some(best) = self.survival_record.values().copied().max() else {
            return Vec::new();
        };
        self.survival_record
            .iter()
            .filter(|(_, &ms)| ms == best)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Round lifecycle state owned by the game state.
#[derive(Clone, Debug, Default)]
pub struct RoundState {
    /// Current phase
    pub phase: RoundPhase,
    /// Number of the most recent round (0 before the first)
    pub number: u32,
    /// Most recent round
    pub current: Option<Round>,
    /// Grace-delayed end already scheduled for this round
    pub end_pending: bool,
    /// Instance hosting the most recent round
    pub host: Option<Uuid>,
}

impl RoundState {
    /// True while a round is in progress.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    /// Round-relative time at `now` for the current round.
    pub fn elapsed(&self, now: u64) -> u64 {
        self.current.as_ref().map_or(0, |r| r.elapsed(now))
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Start a new round hosted by this instance. No-op while one is already active.
pub fn start_round(state: &mut GameState) -> bool {
    if state.round.is_active() {
        return false;
    }

    let number = state.round.number + 1;
    state.rng = DeterministicRng::new(derive_round_seed(state.config.seed, number));

    let min_population = state.config.round.min_population;
    let synthesized = bot::fill_population(state, min_population);
    if !synthesized.is_empty() {
        debug!(round = number, bots = synthesized.len(), "Synthesized bots to reach minimum population");
    }

    let ids = state.player_ids();
    if ids.is_empty() {
        warn!(round = number, "Cannot start round with no participants");
        return false;
    }

    // Everything scheduled against the previous round is superseded
    state.timers.cancel_where(|_| true);
    state.round.end_pending = false;

    for player in state.players_mut() {
        player.reset_for_round();
    }
    powerup::clear_field(state);

    let it_id = ids[state.rng.next_index(ids.len())];
    if let Some(it) = state.get_player_mut(&it_id) {
        it.role = Role::It;
        it.tagged_at = Some(0);
    }

    let now = state.now_ms;
    state.round.number = number;
    state.round.phase = RoundPhase::Active;
    state.round.host = Some(state.instance_id);
    state.round.current = Some(new_round(state, number));

    powerup::fill_pool(state);

    if let Some(event) = announcement(state) {
        state.push_event(event);
    }

    info!(round = number, it = %it_id, population = ids.len(), started_at = now, "Round started");
    true
}

/// `RoundStarted` describing the active round as it stands now.
///
/// Local (broadcast) only on the hosting instance. Used at round start and
/// to re-announce the round to peers that connect later.
pub fn announcement(state: &GameState) -> Option<GameEvent> {
    if !state.round.is_active() {
        return None;
    }
    let round = state.round.current.as_ref()?;
    let host = state.round.host?;
    let it_id = state.all().find(|p| p.is_it()).map(|p| p.id)?;
    Some(GameEvent::new(
        state.now_ms,
        host == state.instance_id,
        GameEventData::RoundStarted {
            round_number: round.number,
            started_at: round.started_at,
            host,
            it_id,
            players: state.all().map(|p| p.snapshot()).collect(),
            power_ups: state.power_ups().cloned().collect(),
        },
    ))
}

fn new_round(state: &GameState, number: u32) -> Round {
    Round {
        number,
        started_at: state.now_ms,
        duration_budget: state.config.round.duration_budget_ms,
        ended_at: None,
        end_reason: None,
        survival_record: BTreeMap::new(),
        survivors: Vec::new(),
    }
}

/// Does a round announced by `host` replace what this instance is playing?
fn supersedes(state: &GameState, host: Uuid, round_number: u32) -> bool {
    if host == state.instance_id {
        return false;
    }
    match state.round.phase {
        RoundPhase::Idle => true,
        RoundPhase::Ended => round_number > state.round.number,
        RoundPhase::Active => {
            round_number > state.round.number
                || (round_number == state.round.number && state.round.host.is_some_and(|current| host < current))
        }
    }
}

/// Adopt a round started by another instance.
///
/// Roles, scales and pickups come from the host's snapshot; participants
/// missing locally are added as remote. Local participants absent from the
/// snapshot joined after it was taken and start untagged. The round clock
/// starts at local `now`. Returns false if the announcement is stale, our
/// own, or names no "it".
pub fn adopt_remote_round(
    state: &mut GameState,
    host: Uuid,
    round_number: u32,
    players: Vec<PlayerSnapshot>,
    power_ups: Vec<PowerUpState>,
) -> bool {
    if !supersedes(state, host, round_number) {
        debug!(round_number, host = %host, "Ignoring round announcement");
        return false;
    }
    let Some(it_id) = players.iter().find(|p| p.role == Role::It).map(|p| p.id) else {
        warn!(round_number, host = %host, "Round announcement without an it");
        return false;
    };

    state.timers.cancel_where(|_| true);
    state.round.end_pending = false;
    state.rng = DeterministicRng::new(derive_round_seed(state.config.seed, round_number));

    for player in state.players_mut() {
        player.reset_for_round();
    }
    for snapshot in &players {
        if state.get(&snapshot.id).is_none() {
            state.insert_player(PlayerState::from_snapshot(snapshot.clone(), Origin::Remote));
        } else if state.get(&snapshot.id).is_some_and(|p| p.origin == Origin::Remote) {
            state.observe_remote_movement(&snapshot.id, snapshot.position, snapshot.heading);
        }
        if let Some(player) = state.get_player_mut(&snapshot.id) {
            player.role = snapshot.role;
            player.tagged_at = (snapshot.role == Role::It).then_some(0);
            if snapshot.size_scale.is_finite() {
                player.size_scale = snapshot.size_scale;
            }
        }
    }

    let now = state.now_ms;
    powerup::clear_field(state);
    for pickup in power_ups {
        state.place_power_up(PowerUpState { spawned_at: now, ..pickup });
    }

    state.round.number = round_number;
    state.round.phase = RoundPhase::Active;
    state.round.host = Some(host);
    state.round.current = Some(new_round(state, round_number));

    state.push_event(GameEvent::new(
        now,
        false,
        GameEventData::RoundStarted {
            round_number,
            started_at: now,
            host,
            it_id,
            players: state.all().map(|p| p.snapshot()).collect(),
            power_ups: state.power_ups().cloned().collect(),
        },
    ));

    info!(round = round_number, host = %host, it = %it_id, "Adopted remote round");
    true
}

/// The host of the current round ended it.
///
/// Ignored unless it names the round this instance is playing under that
/// host. The end reason is derived from the local roles.
pub fn observe_remote_round_end(state: &mut GameState, host: Uuid, round_number: u32) -> bool {
    if !state.round.is_active() || state.round.number != round_number || state.round.host != Some(host) {
        return false;
    }
    let reason = if state.untagged_count() == 0 {
        RoundEndReason::AllTagged
    } else {
        RoundEndReason::TimeExpired
    };
    end_round(state, reason)
}

/// The last "it" left mid-round: the untagged player with the lowest id
/// becomes "it", so every instance that sees the departure picks the same
/// one. With nobody untagged the normal end check takes over.
pub(crate) fn replace_departed_it(state: &mut GameState) {
    let Some(next) = state.all().find(|p| p.is_untagged() && p.alive).map(|p| p.id) else {
        return;
    };
    let local = state.is_round_host();
    if tagging::apply_tag(state, None, next, local).is_some() {
        info!(round = state.round.number, it = %next, "It left, role passed on");
    }
}

/// End the active round. No-op unless a round is active.
pub fn end_round(state: &mut GameState, reason: RoundEndReason) -> bool {
    if !state.round.is_active() {
        return false;
    }
    let now = state.now_ms;
    let Some(round) = state.round.current.as_ref() else {
        return false;
    };
    let number = round.number;
    let elapsed = round.elapsed(now).min(round.duration_budget);

    let mut survival = BTreeMap::new();
    let mut survivors = Vec::new();
    let mut outcomes = Vec::new();
    for player in state.all() {
        let survival_ms = player.tagged_at.unwrap_or(elapsed).min(elapsed);
        if player.is_untagged() && player.alive {
            survivors.push(player.id);
        }
        survival.insert(player.id, survival_ms);
        outcomes.push(SurvivalOutcome {
            player_id: player.id,
            kind: player.kind,
            profile_ref: player.profile_ref.clone(),
            was_it: player.is_it(),
            survival_ms,
        });
    }

    let winners = {
        let Some(round) = state.round.current.as_mut() else {
            return false;
        };
        round.ended_at = Some(now);
        round.end_reason = Some(reason);
        round.survival_record = survival.clone();
        round.survivors = survivors;
        round.winners()
    };

    state.round.phase = RoundPhase::Ended;
    state.round.end_pending = false;
    state.timers.cancel_where(|task| matches!(task, TimerTask::EndRound { .. }));
    state.timers.schedule(
        now + state.config.round.intermission_ms,
        TimerTask::RestartRound { after_round: number },
    );

    info!(round = number, ?reason, winners = winners.len(), "Round ended");

    let host = state.round.host.unwrap_or(state.instance_id);
    state.push_event(GameEvent::new(
        now,
        host == state.instance_id,
        GameEventData::RoundEnded {
            round_number: number,
            ended_at: now,
            host,
            reason,
            survival,
            winners,
            outcomes,
        },
    ));
    true
}

/// Schedule the all-tagged end after the grace delay. Idempotent per round.
pub fn schedule_grace_end(state: &mut GameState) {
    if !state.round.is_active() || state.round.end_pending {
        return;
    }
    let number = state.round.number;
    let ends_at = state.now_ms + state.config.round.end_grace_ms;
    state.round.end_pending = true;
    state.timers.schedule(ends_at, TimerTask::EndRound { round_number: number });
    state.push_event(GameEvent::new(
        state.now_ms,
        true,
        GameEventData::RoundEnding { round_number: number, ends_at },
    ));
    debug!(round = number, ends_at, "Everyone tagged, round ending");
}

/// Evaluate the end triggers for the active round.
pub fn check_end_conditions(state: &mut GameState) {
    if !state.round.is_active() {
        return;
    }
    let Some(round) = state.round.current.as_ref() else {
        return;
    };
    if round.elapsed(state.now_ms) >= round.duration_budget {
        end_round(state, RoundEndReason::TimeExpired);
    } else if state.untagged_count() == 0 {
        schedule_grace_end(state);
    }
}

/// Grace timer fired.
pub(crate) fn on_grace_elapsed(state: &mut GameState, round_number: u32) {
    if !state.round.is_active() || state.round.number != round_number {
        debug!(round_number, "Discarding stale round-end timer");
        return;
    }
    if state.untagged_count() == 0 {
        end_round(state, RoundEndReason::AllTagged);
    } else {
        // Someone untagged joined during the grace window
        state.round.end_pending = false;
    }
}

/// Intermission timer fired.
pub(crate) fn on_intermission_elapsed(state: &mut GameState, after_round: u32) {
    if state.round.phase != RoundPhase::Ended || state.round.number != after_round {
        debug!(after_round, "Discarding stale restart timer");
        return;
    }
    if !state.is_round_host() {
        // Give the host one more intermission to announce the next round,
        // then take over
        debug!(after_round, "Waiting for the host to restart");
        state.round.host = None;
        state.timers.schedule(
            state.now_ms + state.config.round.intermission_ms,
            TimerTask::RestartRound { after_round },
        );
        return;
    }
    start_round(state);
}

// =============================================================================
// TESTS
// =============================================================================
