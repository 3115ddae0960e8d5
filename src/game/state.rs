//! Game State Definitions
//!
//! The entity registry: players, pickups and the controlled mutation paths
//! every other component goes through. Uses BTreeMap for deterministic
//! iteration order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::rng::DeterministicRng;
use crate::core::vec3::{Vec3, GROUND_HEIGHT, FLIGHT_HEIGHT};
use crate::game::config::GameConfig;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::{Command, MovementIntent};
use crate::game::round::{self, RoundState};
use crate::game::timer::Scheduler;
use crate::game::bot::BotBrain;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique participant identifier.
///
/// Serializes as a UUID string; implements Ord for deterministic BTreeMap
/// ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Create a v4 id from 16 random bytes.
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Create a fresh random id (for participants joining from outside the simulation).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        self.0.to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Pickup identifier.
///
/// Unique across instances: minted from the round RNG mixed with the
/// minting instance's id, so pickups from different instances never
/// collide on the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PowerUpId(pub Uuid);

impl PowerUpId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl fmt::Display for PowerUpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

// =============================================================================
// PLAYER ATTRIBUTES
// =============================================================================

/// Whether a participant is a person or synthesized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    /// Controlled by a person
    Human,
    /// Driven by the bot controller
    Bot,
}

/// Tag role within the current round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Still running
    #[default]
    Untagged,
    /// Chasing
    It,
}

/// Where a participant is simulated.
///
/// Only locally simulated participants have their movement broadcast;
/// remote ones are observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Created by this simulation
    #[default]
    Local,
    /// Announced over the relay
    Remote,
}

// =============================================================================
// POWER-UPS
// =============================================================================

/// Kind of power-up pickup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpKind {
    /// 1.5x movement
    Speed,
    /// Hidden from opposing "it" detection
    Invisibility,
    /// Elevated, faster, cannot be tagged
    Flight,
}

impl PowerUpKind {
    /// Every kind, in spawn-table order.
    pub const ALL: [PowerUpKind; 3] = [
        PowerUpKind::Speed,
        PowerUpKind::Invisibility,
        PowerUpKind::Flight,
    ];
}

/// Power-up held by a player.
///
/// `expires_at` is `None` while armed (collected, not yet activated) and the
/// absolute expiry time once activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeldPowerUp {
    /// Nothing held
    #[default]
    None,
    /// Speed boost
    Speed { expires_at: Option<u64> },
    /// Invisibility
    Invisibility { expires_at: Option<u64> },
    /// Flight
    Flight { expires_at: Option<u64> },
}

impl HeldPowerUp {
    /// Build a held power-up of a kind.
    pub fn of(kind: PowerUpKind, expires_at: Option<u64>) -> Self {
        match kind {
            PowerUpKind::Speed => HeldPowerUp::Speed { expires_at },
            PowerUpKind::Invisibility => HeldPowerUp::Invisibility { expires_at },
            PowerUpKind::Flight => HeldPowerUp::Flight { expires_at },
        }
    }

    /// A freshly collected, not yet activated power-up.
    pub fn armed(kind: PowerUpKind) -> Self {
        Self::of(kind, None)
    }

    /// Kind held, if any.
    pub fn kind(&self) -> Option<PowerUpKind> {
        match self {
            HeldPowerUp::None => None,
            HeldPowerUp::Speed { .. } => Some(PowerUpKind::Speed),
            HeldPowerUp::Invisibility { .. } => Some(PowerUpKind::Invisibility),
            HeldPowerUp::Flight { .. } => Some(PowerUpKind::Flight),
        }
    }

    /// Expiry time, if activated.
    pub fn expires_at(&self) -> Option<u64> {
        match *self {
            HeldPowerUp::None => None,
            HeldPowerUp::Speed { expires_at }
            | HeldPowerUp::Invisibility { expires_at }
            | HeldPowerUp::Flight { expires_at } => expires_at,
        }
    }

    /// True if nothing is held.
    pub fn is_none(&self) -> bool {
        matches!(self, HeldPowerUp::None)
    }

    /// True if held but not yet activated.
    pub fn is_armed(&self) -> bool {
        !self.is_none() && self.expires_at().is_none()
    }

    /// True if `kind` is held and its effect window is open at `now`.
    pub fn is_active(&self, kind: PowerUpKind, now: u64) -> bool {
        self.kind() == Some(kind) && self.expires_at().is_some_and(|t| now < t)
    }
}

/// A pickup lying on the field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PowerUpState {
    /// Unique pickup ID
    pub id: PowerUpId,
    /// Kind granted on collection
    pub kind: PowerUpKind,
    /// Position in arena
    pub position: Vec3,
    /// Simulation time of spawn (ms)
    pub spawned_at: u64,
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// Cosmetic palette for participants.
pub const PLAYER_COLORS: [&str; 8] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8",
    "#f58231", "#911eb4", "#42d4f4", "#f032e6",
];

/// State of a single participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Unique player ID
    pub id: PlayerId,

    /// Name shown to other participants
    pub display_name: String,

    /// Cosmetic color (`#rrggbb`)
    pub color: String,

    /// Human or bot
    pub kind: PlayerKind,

    /// Local or remote simulation
    pub origin: Origin,

    /// Current position (mutated only by movement application)
    pub position: Vec3,

    /// Facing (radians)
    pub heading: f32,

    /// Tag role this round
    pub role: Role,

    /// Reserved for elimination modes; true once a round starts
    pub alive: bool,

    /// Round-relative time this player became "it" (ms), once per round
    pub tagged_at: Option<u64>,

    /// At most one held power-up
    pub power_up: HeldPowerUp,

    /// Bumped whenever the held power-up is replaced or cleared;
    /// expiry timers for an older generation are stale
    pub effect_generation: u32,

    /// Cosmetic size multiplier (also widens the tag radius)
    pub size_scale: f32,

    /// Tags made this round
    pub tag_count: u32,

    /// Persistence profile (humans only, once linked)
    pub profile_ref: Option<String>,
}

impl PlayerState {
    /// Create a new player at a position.
    pub fn new(
        id: PlayerId,
        kind: PlayerKind,
        display_name: impl Into<String>,
        color: impl Into<String>,
        position: Vec3,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            color: color.into(),
            kind,
            origin: Origin::Local,
            position: position.clamp_to_arena(),
            heading: 0.0,
            role: Role::Untagged,
            alive: true,
            tagged_at: None,
            power_up: HeldPowerUp::None,
            effect_generation: 0,
            size_scale: 1.0,
            tag_count: 0,
            profile_ref: None,
        }
    }

    /// Rebuild a participant announced by another instance.
    pub fn from_snapshot(snapshot: PlayerSnapshot, origin: Origin) -> Self {
        let mut player = Self::new(
            snapshot.id,
            snapshot.kind,
            snapshot.display_name,
            snapshot.color,
            snapshot.position,
        );
        player.origin = origin;
        player.heading = if snapshot.heading.is_finite() { snapshot.heading } else { 0.0 };
        player.role = snapshot.role;
        player.size_scale = snapshot.size_scale;
        player
    }

    /// Is this player "it"?
    #[inline]
    pub fn is_it(&self) -> bool {
        self.role == Role::It
    }

    /// Is this player still running?
    #[inline]
    pub fn is_untagged(&self) -> bool {
        self.role == Role::Untagged
    }

    /// Is a power-up effect of `kind` active at `now`?
    #[inline]
    pub fn has_active(&self, kind: PowerUpKind, now: u64) -> bool {
        self.power_up.is_active(kind, now)
    }

    /// Drop the held power-up and invalidate its timers.
    pub fn clear_power_up(&mut self) {
        self.power_up = HeldPowerUp::None;
        self.effect_generation = self.effect_generation.wrapping_add(1);
        self.position.y = GROUND_HEIGHT;
    }

    /// Reset per-round fields at round start.
    pub fn reset_for_round(&mut self) {
        self.role = Role::Untagged;
        self.alive = true;
        self.tagged_at = None;
        self.tag_count = 0;
        self.size_scale = 1.0;
        self.clear_power_up();
    }

    /// Wire/renderer view of this player.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            display_name: self.display_name.clone(),
            kind: self.kind,
            color: self.color.clone(),
            position: self.position,
            heading: self.heading,
            role: self.role,
            size_scale: self.size_scale,
        }
    }
}

/// Everything an observer needs to draw or announce a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub display_name: String,
    pub kind: PlayerKind,
    pub color: String,
    pub position: Vec3,
    pub heading: f32,
    pub role: Role,
    pub size_scale: f32,
}

// =============================================================================
// GAME STATE
// =============================================================================

const INSTANCE_SEED_SALT: u64 = 0x1D5E_ED00_7A66_A4E1;

/// Complete authoritative state of the arena.
///
/// Owned by exactly one simulation task; every change goes through a named
/// method here or in the component modules.
#[derive(Clone, Debug)]
pub struct GameState {
    /// Tuning
    pub config: GameConfig,

    /// Simulation clock (ms since creation)
    pub now_ms: u64,

    /// Ticks run so far
    pub tick: u64,

    /// Deterministic RNG state
    pub rng: DeterministicRng,

    /// Round lifecycle
    pub round: RoundState,

    /// Identity of this simulation on the relay
    pub instance_id: Uuid,

    /// Generation-stamped timers
    pub timers: Scheduler,

    /// Per-bot steering memory
    pub(crate) bot_brains: BTreeMap<PlayerId, BotBrain>,

    /// When the pickup pool was last topped up
    pub(crate) last_top_up_ms: u64,

    players: BTreeMap<PlayerId, PlayerState>,
    power_ups: BTreeMap<PowerUpId, PowerUpState>,
    retired_power_ups: BTreeSet<PowerUpId>,
    local_viewer: Option<PlayerId>,
    commands: VecDeque<Command>,
    pending_events: Vec<GameEvent>,
}

impl GameState {
    /// Create an empty arena.
    ///
    /// The instance id is derived from the seed; instances sharing a relay
    /// should be given distinct ids with [`GameState::with_instance_id`].
    pub fn new(config: GameConfig) -> Self {
        let rng = DeterministicRng::new(config.seed);
        let instance_id = Uuid::from_bytes(DeterministicRng::new(config.seed ^ INSTANCE_SEED_SALT).next_bytes16());
        Self {
            config,
            now_ms: 0,
            tick: 0,
            rng,
            round: RoundState::default(),
            instance_id,
            timers: Scheduler::default(),
            bot_brains: BTreeMap::new(),
            last_top_up_ms: 0,
            players: BTreeMap::new(),
            power_ups: BTreeMap::new(),
            retired_power_ups: BTreeSet::new(),
            local_viewer: None,
            commands: VecDeque::new(),
            pending_events: Vec::new(),
        }
    }

    /// Use `instance_id` as this simulation's relay identity.
    pub fn with_instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// True if this simulation owns the current round (or no round has
    /// been adopted from elsewhere).
    pub fn is_round_host(&self) -> bool {
        self.round.host.map_or(true, |host| host == self.instance_id)
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Add a locally simulated participant at a random position.
    pub fn add_player(&mut self, kind: PlayerKind, display_name: impl Into<String>) -> PlayerId {
        let id = self.mint_player_id();
        let color = self.rng.choose(&PLAYER_COLORS).copied().unwrap_or(PLAYER_COLORS[0]);
        let position = self.rng.random_position(0.0);
        let player = PlayerState::new(id, kind, display_name, color, position);
        self.insert_player(player);
        id
    }

    /// Insert a fully built participant.
    ///
    /// Returns false (and changes nothing) if the id is already registered.
    pub fn insert_player(&mut self, mut player: PlayerState) -> bool {
        if self.players.contains_key(&player.id) {
            return false;
        }
        player.position = player.position.clamp_to_arena();
        let local = player.origin == Origin::Local;
        let snapshot = player.snapshot();
        self.players.insert(player.id, player);
        self.push_event(GameEvent::new(
            self.now_ms,
            local,
            GameEventData::ParticipantJoined { player: snapshot },
        ));
        true
    }

    /// Remove a participant.
    ///
    /// If the last "it" leaves an active round, another player takes over.
    pub fn remove_player(&mut self, id: &PlayerId) -> Option<PlayerState> {
        let removed = self.players.remove(id)?;
        if self.local_viewer == Some(*id) {
            self.local_viewer = None;
        }
        self.bot_brains.remove(id);
        self.push_event(GameEvent::new(
            self.now_ms,
            removed.origin == Origin::Local,
            GameEventData::ParticipantLeft { player_id: *id },
        ));
        if removed.is_it() && self.round.is_active() && !self.players.values().any(|p| p.is_it()) {
            round::replace_departed_it(self);
        }
        Some(removed)
    }

    /// Get a player by ID.
    pub fn get(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    /// All players in id order.
    pub fn all(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    /// Number of registered players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Number of untagged, alive players.
    pub fn untagged_count(&self) -> usize {
        self.players.values().filter(|p| p.is_untagged() && p.alive).count()
    }

    /// Get a player mutably by ID (component modules only).
    pub(crate) fn get_player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    /// Iterate players mutably (component modules only).
    pub(crate) fn players_mut(&mut self) -> impl Iterator<Item = &mut PlayerState> {
        self.players.values_mut()
    }

    /// Sorted player ids.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Bind the participant this simulation renders for.
    pub fn set_local_viewer(&mut self, id: Option<PlayerId>) {
        self.local_viewer = id.filter(|id| self.players.contains_key(id));
    }

    /// The participant this simulation renders for.
    pub fn local_viewer(&self) -> Option<PlayerId> {
        self.local_viewer
    }

    /// True if this simulation drives the participant (its movement is broadcast).
    pub fn is_locally_controlled(&self, id: &PlayerId) -> bool {
        self.players.get(id).is_some_and(|p| p.origin == Origin::Local)
    }

    /// Link a human participant to a persistence profile.
    pub fn link_profile(&mut self, id: &PlayerId, profile_id: String) -> bool {
        match self.players.get_mut(id) {
            Some(player) if player.kind == PlayerKind::Human => {
                player.profile_ref = Some(profile_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mint_player_id(&mut self) -> PlayerId {
        loop {
            let id = PlayerId::from_random_bytes(self.rng.next_bytes16());
            if !self.players.contains_key(&id) {
                return id;
            }
        }
    }

    // =========================================================================
    // Movement
    // =========================================================================

    /// Apply a movement intent and return the resulting position.
    ///
    /// The delta is scaled by the active power-up, the result clamped to the
    /// arena, and the altitude rewritten (flight elevated, otherwise ground).
    pub fn apply_movement(&mut self, id: &PlayerId, intent: MovementIntent) -> Option<Vec3> {
        let now = self.now_ms;
        let speed_mult = self.config.power_ups.speed_multiplier;
        let flight_mult = self.config.power_ups.flight_multiplier;

        let player = self.players.get_mut(id)?;
        let delta = intent.sanitized_delta();

        let flying = player.has_active(PowerUpKind::Flight, now);
        let multiplier = if flying {
            flight_mult
        } else if player.has_active(PowerUpKind::Speed, now) {
            speed_mult
        } else {
            1.0
        };

        let mut next = (player.position + delta.scale(multiplier)).clamp_to_arena();
        next.y = if flying { FLIGHT_HEIGHT } else { GROUND_HEIGHT };
        player.position = next;

        if let Some(heading) = intent.resolved_heading() {
            player.heading = heading;
        }
        let heading = player.heading;

        if self.is_locally_controlled(id) {
            self.push_event(GameEvent::new(
                now,
                true,
                GameEventData::ParticipantMoved { player_id: *id, position: next, heading },
            ));
        }

        Some(next)
    }

    /// Record a position reported over the relay (never re-broadcast).
    pub fn observe_remote_movement(&mut self, id: &PlayerId, position: Vec3, heading: f32) -> bool {
        if self.is_locally_controlled(id) || !position.is_finite() {
            return false;
        }
        match self.players.get_mut(id) {
            Some(player) => {
                player.position = position.clamp_to_arena();
                if heading.is_finite() {
                    player.heading = heading;
                }
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Pickups
    // =========================================================================

    /// Pickups on the field in id order.
    pub fn power_ups(&self) -> impl Iterator<Item = &PowerUpState> {
        self.power_ups.values()
    }

    /// Get a pickup by ID.
    pub fn get_power_up(&self, id: PowerUpId) -> Option<&PowerUpState> {
        self.power_ups.get(&id)
    }

    /// Number of pickups on the field.
    pub fn power_up_count(&self) -> usize {
        self.power_ups.len()
    }

    /// Place a new pickup (power-up director only).
    pub(crate) fn insert_power_up(&mut self, kind: PowerUpKind, position: Vec3) -> PowerUpId {
        let id = self.mint_power_up_id();
        let pickup = PowerUpState {
            id,
            kind,
            position,
            spawned_at: self.now_ms,
        };
        self.place_power_up(pickup);
        id
    }

    /// Place a pickup minted elsewhere.
    ///
    /// Returns false if the id is on the field or was already collected
    /// this round (a late or echoed spawn).
    pub(crate) fn place_power_up(&mut self, mut pickup: PowerUpState) -> bool {
        if self.power_ups.contains_key(&pickup.id) || self.retired_power_ups.contains(&pickup.id) {
            return false;
        }
        pickup.position = pickup.position.clamp_to_arena();
        self.power_ups.insert(pickup.id, pickup);
        true
    }

    /// Remove a pickup (power-up director only). Its id cannot be placed
    /// again this round.
    pub(crate) fn take_power_up(&mut self, id: PowerUpId) -> Option<PowerUpState> {
        let pickup = self.power_ups.remove(&id)?;
        self.retired_power_ups.insert(id);
        Some(pickup)
    }

    /// Mark an id as collected without it ever having been placed.
    pub(crate) fn retire_power_up(&mut self, id: PowerUpId) {
        self.retired_power_ups.insert(id);
    }

    fn mint_power_up_id(&mut self) -> PowerUpId {
        let salt = *self.instance_id.as_bytes();
        loop {
            let mut bytes = self.rng.next_bytes16();
            for (b, s) in bytes.iter_mut().zip(salt) {
                *b ^= s;
            }
            let id = PowerUpId(uuid::Builder::from_random_bytes(bytes).into_uuid());
            if !self.power_ups.contains_key(&id) {
                return id;
            }
        }
    }

    /// Remove every pickup.
    pub(crate) fn clear_power_ups(&mut self) {
        self.power_ups.clear();
        self.retired_power_ups.clear();
    }

    // =========================================================================
    // Commands & events
    // =========================================================================

    /// Queue an external trigger; applied at the start of the next tick.
    pub fn enqueue(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    /// Number of queued commands.
    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }

    /// Take queued commands in arrival order.
    pub(crate) fn drain_commands(&mut self) -> Vec<Command> {
        self.commands.drain(..).collect()
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================
