//! Game Events
//!
//! Events generated during simulation. Observers (renderer, relay bridge,
//! persistence) consume them after each tick; the simulation never waits on
//! any of them.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::vec3::Vec3;
use crate::game::round::{RoundEndReason, SurvivalOutcome};
use crate::game::state::{PlayerId, PlayerSnapshot, PowerUpId, PowerUpKind, PowerUpState};

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Participant entered the registry
    ParticipantJoined {
        player: PlayerSnapshot,
    },

    /// Locally controlled participant moved
    ParticipantMoved {
        player_id: PlayerId,
        position: Vec3,
        heading: f32,
    },

    /// Participant became "it"
    ParticipantTagged {
        tagged_id: PlayerId,
        /// None for the round's initial "it"
        tagger_id: Option<PlayerId>,
        /// Round-relative tag time (ms)
        tagged_at_ms: u64,
    },

    /// Pickup placed on the field
    PowerUpSpawned {
        power_up_id: PowerUpId,
        kind: PowerUpKind,
        position: Vec3,
    },

    /// Pickup collected (held, not yet active)
    PowerUpCollected {
        power_up_id: PowerUpId,
        player_id: PlayerId,
        kind: PowerUpKind,
    },

    /// Held power-up activated
    PowerUpActivated {
        player_id: PlayerId,
        kind: PowerUpKind,
        expires_at: u64,
    },

    /// Active power-up ran out
    PowerUpExpired {
        player_id: PlayerId,
        kind: PowerUpKind,
    },

    /// Participant left the registry
    ParticipantLeft {
        player_id: PlayerId,
    },

    /// Round began (or was adopted from the instance hosting it)
    RoundStarted {
        round_number: u32,
        started_at: u64,
        /// Instance that owns the round
        host: Uuid,
        it_id: PlayerId,
        players: Vec<PlayerSnapshot>,
        power_ups: Vec<PowerUpState>,
    },

    /// Last player tagged; round ends after the grace delay
    RoundEnding {
        round_number: u32,
        ends_at: u64,
    },

    /// Round finished
    RoundEnded {
        round_number: u32,
        ended_at: u64,
        host: Uuid,
        reason: RoundEndReason,
        /// Survival time per participant (ms)
        survival: BTreeMap<PlayerId, u64>,
        winners: Vec<PlayerId>,
        outcomes: Vec<SurvivalOutcome>,
    },
}

/// A game event with timing and origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Simulation time when the event occurred (ms)
    pub at_ms: u64,

    /// True if this simulation originated the fact (eligible for broadcast)
    pub local: bool,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(at_ms: u64, local: bool, data: GameEventData) -> Self {
        Self { at_ms, local, data }
    }

    /// Participant the event is about, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        match &self.data {
            GameEventData::ParticipantJoined { player } => Some(player.id),
            GameEventData::ParticipantMoved { player_id, .. }
            | GameEventData::PowerUpCollected { player_id, .. }
            | GameEventData::PowerUpActivated { player_id, .. }
            | GameEventData::PowerUpExpired { player_id, .. }
            | GameEventData::ParticipantLeft { player_id } => Some(*player_id),
            GameEventData::ParticipantTagged { tagged_id, .. } => Some(*tagged_id),
            GameEventData::RoundStarted { it_id, .. } => Some(*it_id),
            GameEventData::PowerUpSpawned { .. }
            | GameEventData::RoundEnding { .. }
            | GameEventData::RoundEnded { .. } => None,
        }
    }

    /// Create participant tagged event.
    pub fn participant_tagged(
        at_ms: u64,
        local: bool,
        tagged_id: PlayerId,
        tagger_id: Option<PlayerId>,
        tagged_at_ms: u64,
    ) -> Self {
        Self::new(
            at_ms,
            local,
            GameEventData::ParticipantTagged {
                tagged_id,
                tagger_id,
                tagged_at_ms,
            },
        )
    }

    /// Create power-up spawned event.
    pub fn power_up_spawned(
        at_ms: u64,
        local: bool,
        power_up_id: PowerUpId,
        kind: PowerUpKind,
        position: Vec3,
    ) -> Self {
        Self::new(
            at_ms,
            local,
            GameEventData::PowerUpSpawned { power_up_id, kind, position },
        )
    }

    /// Create power-up collected event.
    pub fn power_up_collected(
        at_ms: u64,
        local: bool,
        power_up_id: PowerUpId,
        player_id: PlayerId,
        kind: PowerUpKind,
    ) -> Self {
        Self::new(
            at_ms,
            local,
            GameEventData::PowerUpCollected { power_up_id, player_id, kind },
        )
    }

    /// Create power-up activated event.
    pub fn power_up_activated(
        at_ms: u64,
        local: bool,
        player_id: PlayerId,
        kind: PowerUpKind,
        expires_at: u64,
    ) -> Self {
        Self::new(
            at_ms,
            local,
            GameEventData::PowerUpActivated { player_id, kind, expires_at },
        )
    }

    /// Create power-up expired event.
    pub fn power_up_expired(at_ms: u64, player_id: PlayerId, kind: PowerUpKind) -> Self {
        Self::new(at_ms, true, GameEventData::PowerUpExpired { player_id, kind })
    }
}
