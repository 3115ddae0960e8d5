//! Input Capture and Normalization
//!
//! Movement intents and the command queue that feeds the simulation.
//! Anything from outside the tick (local input, relay traffic, session
//! bookkeeping) arrives as a [`Command`] and is applied at the start of the
//! next tick in arrival order.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::vec3::Vec3;
use crate::game::state::{PlayerId, PlayerKind, PlayerSnapshot, PowerUpId, PowerUpKind, PowerUpState};

// =============================================================================
// MOVEMENT INTENT
// =============================================================================

/// A requested displacement for one tick.
///
/// The vertical component is ignored; altitude is derived from the active
/// power-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementIntent {
    /// Horizontal displacement (world units)
    pub delta: Vec3,
    /// Explicit facing; derived from `delta` when absent
    pub heading: Option<f32>,
}

impl MovementIntent {
    /// Displacement on the floor plane.
    pub const fn new(dx: f32, dz: f32) -> Self {
        Self {
            delta: Vec3::planar(dx, dz),
            heading: None,
        }
    }

    /// Displacement of `distance` along a direction.
    pub fn toward(direction: Vec3, distance: f32) -> Self {
        Self {
            delta: direction.flatten().normalize().scale(distance),
            heading: None,
        }
    }

    /// Override the facing.
    pub fn with_heading(mut self, heading: f32) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Check if this intent moves at all.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.sanitized_delta() == Vec3::ZERO
    }

    /// Floor-plane delta with non-finite input replaced by zero.
    pub fn sanitized_delta(&self) -> Vec3 {
        let flat = self.delta.flatten();
        if flat.is_finite() {
            flat
        } else {
            Vec3::ZERO
        }
    }

    /// Facing to apply, if any.
    pub fn resolved_heading(&self) -> Option<f32> {
        match self.heading {
            Some(h) if h.is_finite() => Some(h),
            Some(_) => None,
            None if self.is_idle() => None,
            None => Some(self.sanitized_delta().heading()),
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// External trigger queued for the simulation.
///
/// `Remote*` variants carry facts reported over the relay; they are applied
/// as observations and never re-broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// A locally originated participant joins.
    Join {
        player_id: PlayerId,
        kind: PlayerKind,
        display_name: String,
        /// Bind as the participant this simulation renders for
        local_viewer: bool,
    },

    /// A locally originated participant leaves.
    Leave { player_id: PlayerId },

    /// Apply a movement intent.
    Move { player_id: PlayerId, intent: MovementIntent },

    /// Activate the held power-up.
    Activate { player_id: PlayerId },

    /// Start a round now (no-op while one is active).
    StartRound,

    /// Attach a persistence profile to a human participant.
    LinkProfile { player_id: PlayerId, profile_id: String },

    /// A participant joined on another instance.
    RemoteJoined { player: PlayerSnapshot },

    /// A remote participant moved.
    RemoteMoved { player_id: PlayerId, position: Vec3, heading: f32 },

    /// Another instance observed a tag.
    RemoteTagged { tagged_id: PlayerId, tagger_id: Option<PlayerId> },

    /// Another instance placed a pickup.
    RemoteSpawned { power_up: PowerUpState },

    /// Another instance observed a pickup collection.
    RemoteCollected { power_up_id: PowerUpId, player_id: PlayerId, kind: PowerUpKind },

    /// A remote participant activated a power-up.
    RemoteActivated { player_id: PlayerId, kind: PowerUpKind },

    /// A remote participant left.
    RemoteLeft { player_id: PlayerId },

    /// Another instance started a round it hosts.
    RemoteRoundStarted {
        host: Uuid,
        round_number: u32,
        players: Vec<PlayerSnapshot>,
        power_ups: Vec<PowerUpState>,
    },

    /// The host of a round ended it.
    RemoteRoundEnded { host: Uuid, round_number: u32 },
}

impl Command {
    /// Participant this command concerns, if any.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Command::Join { player_id, .. }
            | Command::Leave { player_id }
            | Command::Move { player_id, .. }
            | Command::Activate { player_id }
            | Command::LinkProfile { player_id, .. }
            | Command::RemoteMoved { player_id, .. }
            | Command::RemoteCollected { player_id, .. }
            | Command::RemoteActivated { player_id, .. }
            | Command::RemoteLeft { player_id } => Some(*player_id),
            Command::RemoteJoined { player } => Some(player.id),
            Command::RemoteTagged { tagged_id, .. } => Some(*tagged_id),
            Command::StartRound
            | Command::RemoteSpawned { .. }
            | Command::RemoteRoundStarted { .. }
            | Command::RemoteRoundEnded { .. } => None,
        }
    }

    /// True for observations reported by another instance.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Command::RemoteJoined { .. }
                | Command::RemoteMoved { .. }
                | Command::RemoteTagged { .. }
                | Command::RemoteSpawned { .. }
                | Command::RemoteCollected { .. }
                | Command::RemoteActivated { .. }
                | Command::RemoteLeft { .. }
                | Command::RemoteRoundStarted { .. }
                | Command::RemoteRoundEnded { .. }
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
