//! Protocol Messages
//!
//! Relay wire format. Every frame is a JSON text message with a `type`
//! discriminator; the relay forwards frames without interpreting game
//! content. Delivery is at-least-once and unordered, so every event maps to
//! an idempotent command on the receiving side.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::vec3::Vec3;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::Command;
use crate::game::state::{PlayerId, PlayerKind, PlayerSnapshot, PowerUpId, PowerUpKind, PowerUpState, Role};

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a valid relay message.
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frames are not part of the relay protocol.
    #[error("Unsupported binary frame ({0} bytes)")]
    UnsupportedBinary(usize),
}

/// Participant as announced on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireParticipant {
    pub id: PlayerId,
    pub display_name: String,
    pub kind: PlayerKind,
    pub position: [f32; 3],
    pub rotation: f32,
    pub color: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_scale")]
    pub size_scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl From<PlayerSnapshot> for WireParticipant {
    fn from(p: PlayerSnapshot) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name,
            kind: p.kind,
            position: p.position.to_array(),
            rotation: p.heading,
            color: p.color,
            role: p.role,
            size_scale: p.size_scale,
        }
    }
}

impl From<WireParticipant> for PlayerSnapshot {
    fn from(p: WireParticipant) -> Self {
        Self {
            id: p.id,
            display_name: p.display_name,
            kind: p.kind,
            color: p.color,
            position: Vec3::from_array(p.position),
            heading: p.rotation,
            role: p.role,
            size_scale: if p.size_scale.is_finite() { p.size_scale } else { 1.0 },
        }
    }
}

/// Pickup as announced on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePowerUp {
    pub id: PowerUpId,
    pub kind: PowerUpKind,
    pub position: [f32; 3],
}

impl From<PowerUpState> for WirePowerUp {
    fn from(p: PowerUpState) -> Self {
        Self {
            id: p.id,
            kind: p.kind,
            position: p.position.to_array(),
        }
    }
}

impl From<WirePowerUp> for PowerUpState {
    fn from(p: WirePowerUp) -> Self {
        Self {
            id: p.id,
            kind: p.kind,
            position: Vec3::from_array(p.position),
            spawned_at: 0,
        }
    }
}

/// Relay frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayEvent {
    /// Participant entered an instance.
    ParticipantJoined {
        #[serde(flatten)]
        participant: WireParticipant,
    },

    /// Participant moved (never echoed to the sender).
    #[serde(rename_all = "camelCase")]
    ParticipantMoved {
        id: PlayerId,
        position: [f32; 3],
        rotation: f32,
    },

    /// Participant became "it".
    #[serde(rename_all = "camelCase")]
    ParticipantTagged {
        tagged_id: PlayerId,
        tagger_id: Option<PlayerId>,
    },

    /// Power-up activated.
    #[serde(rename_all = "camelCase")]
    PowerupActivated {
        participant_id: PlayerId,
        kind: PowerUpKind,
    },

    /// Pickup placed by the round's host.
    #[serde(rename_all = "camelCase")]
    PowerupSpawned {
        power_up_id: PowerUpId,
        kind: PowerUpKind,
        position: [f32; 3],
    },

    /// Pickup collected; `kind` is what the collector was armed with.
    #[serde(rename_all = "camelCase")]
    PowerupCollected {
        power_up_id: PowerUpId,
        participant_id: PlayerId,
        kind: PowerUpKind,
    },

    /// Participant left an instance.
    ParticipantLeft { id: PlayerId },

    /// Round began on the hosting instance; receivers adopt the snapshot.
    #[serde(rename_all = "camelCase")]
    RoundStarted {
        host_id: Uuid,
        started_at: u64,
        round_number: u32,
        players: Vec<WireParticipant>,
        #[serde(default)]
        power_ups: Vec<WirePowerUp>,
    },

    /// Round finished on the hosting instance.
    #[serde(rename_all = "camelCase")]
    RoundEnded {
        host_id: Uuid,
        round_number: u32,
        survival_record: BTreeMap<PlayerId, u64>,
    },

    /// Liveness check; answered by the relay, not forwarded.
    Ping { timestamp: u64 },

    /// Reply to `Ping`.
    Pong { timestamp: u64 },
}

impl RelayEvent {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Wire name of the frame type.
    pub fn type_name(&self) -> &'static str {
        match self {
            RelayEvent::ParticipantJoined { .. } => "participant-joined",
            RelayEvent::ParticipantMoved { .. } => "participant-moved",
            RelayEvent::ParticipantTagged { .. } => "participant-tagged",
            RelayEvent::PowerupActivated { .. } => "powerup-activated",
            RelayEvent::PowerupSpawned { .. } => "powerup-spawned",
            RelayEvent::PowerupCollected { .. } => "powerup-collected",
            RelayEvent::ParticipantLeft { .. } => "participant-left",
            RelayEvent::RoundStarted { .. } => "round-started",
            RelayEvent::RoundEnded { .. } => "round-ended",
            RelayEvent::Ping { .. } => "ping",
            RelayEvent::Pong { .. } => "pong",
        }
    }

    /// True if the relay should also deliver this frame back to its sender.
    pub fn echoes_to_sender(&self) -> bool {
        !matches!(self, RelayEvent::ParticipantMoved { .. })
    }

    /// Participant ids this frame introduces (tracked per connection by the relay).
    pub fn joined_id(&self) -> Option<PlayerId> {
        match self {
            RelayEvent::ParticipantJoined { participant } => Some(participant.id),
            _ => None,
        }
    }

    /// Participant id this frame retires.
    pub fn left_id(&self) -> Option<PlayerId> {
        match self {
            RelayEvent::ParticipantLeft { id } => Some(*id),
            _ => None,
        }
    }

    /// Outbound frame for a simulation event.
    ///
    /// Only facts this instance originated are broadcast; observed remote
    /// facts are never re-sent.
    pub fn from_game_event(event: &GameEvent) -> Option<Self> {
        if !event.local {
            return None;
        }
        let frame = match &event.data {
            GameEventData::ParticipantJoined { player } => RelayEvent::ParticipantJoined {
                participant: player.clone().into(),
            },
            GameEventData::ParticipantMoved { player_id, position, heading } => RelayEvent::ParticipantMoved {
                id: *player_id,
                position: position.to_array(),
                rotation: *heading,
            },
            GameEventData::ParticipantTagged { tagged_id, tagger_id, .. } => RelayEvent::ParticipantTagged {
                tagged_id: *tagged_id,
                tagger_id: *tagger_id,
            },
            GameEventData::PowerUpActivated { player_id, kind, .. } => RelayEvent::PowerupActivated {
                participant_id: *player_id,
                kind: *kind,
            },
            GameEventData::PowerUpSpawned { power_up_id, kind, position } => RelayEvent::PowerupSpawned {
                power_up_id: *power_up_id,
                kind: *kind,
                position: position.to_array(),
            },
            GameEventData::PowerUpCollected { power_up_id, player_id, kind } => RelayEvent::PowerupCollected {
                power_up_id: *power_up_id,
                participant_id: *player_id,
                kind: *kind,
            },
            GameEventData::ParticipantLeft { player_id } => RelayEvent::ParticipantLeft { id: *player_id },
            GameEventData::RoundStarted { round_number, started_at, host, players, power_ups, .. } => {
                RelayEvent::RoundStarted {
                    host_id: *host,
                    started_at: *started_at,
                    round_number: *round_number,
                    players: players.iter().cloned().map(Into::into).collect(),
                    power_ups: power_ups.iter().cloned().map(Into::into).collect(),
                }
            }
            GameEventData::RoundEnded { round_number, host, survival, .. } => RelayEvent::RoundEnded {
                host_id: *host,
                round_number: *round_number,
                survival_record: survival.clone(),
            },
            GameEventData::PowerUpExpired { .. } | GameEventData::RoundEnding { .. } => return None,
        };
        Some(frame)
    }

    /// Command applying an inbound frame to the local simulation.
    ///
    /// Keepalive frames map to no command.
    pub fn into_command(self) -> Option<Command> {
        match self {
            RelayEvent::ParticipantJoined { participant } => Some(Command::RemoteJoined {
                player: participant.into(),
            }),
            RelayEvent::ParticipantMoved { id, position, rotation } => Some(Command::RemoteMoved {
                player_id: id,
                position: Vec3::from_array(position),
                heading: rotation,
            }),
            RelayEvent::ParticipantTagged { tagged_id, tagger_id } => {
                Some(Command::RemoteTagged { tagged_id, tagger_id })
            }
            RelayEvent::PowerupActivated { participant_id, kind } => Some(Command::RemoteActivated {
                player_id: participant_id,
                kind,
            }),
            RelayEvent::PowerupSpawned { power_up_id, kind, position } => Some(Command::RemoteSpawned {
                power_up: WirePowerUp { id: power_up_id, kind, position }.into(),
            }),
            RelayEvent::PowerupCollected { power_up_id, participant_id, kind } => Some(Command::RemoteCollected {
                power_up_id,
                player_id: participant_id,
                kind,
            }),
            RelayEvent::ParticipantLeft { id } => Some(Command::RemoteLeft { player_id: id }),
            RelayEvent::RoundStarted { host_id, round_number, players, power_ups, .. } => {
                Some(Command::RemoteRoundStarted {
                    host: host_id,
                    round_number,
                    players: players.into_iter().map(Into::into).collect(),
                    power_ups: power_ups.into_iter().map(Into::into).collect(),
                })
            }
            RelayEvent::RoundEnded { host_id, round_number, .. } => Some(Command::RemoteRoundEnded {
                host: host_id,
                round_number,
            }),
            RelayEvent::Ping { .. } | RelayEvent::Pong { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> PlayerId {
        PlayerId::new([byte; 16])
    }

    #[test]
    fn test_wire_names() {
        let pickup = PowerUpId::new([4; 16]);
        let frame = RelayEvent::PowerupCollected {
            power_up_id: pickup,
            participant_id: id(1),
            kind: PowerUpKind::Flight,
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "powerup-collected");
        assert_eq!(value["powerUpId"], pickup.0.to_string());
        assert_eq!(value["participantId"], id(1).to_uuid_string());
        assert_eq!(value["kind"], "flight");
        assert_eq!(frame.type_name(), "powerup-collected");
        assert_eq!(
            frame.into_command(),
            Some(Command::RemoteCollected { power_up_id: pickup, player_id: id(1), kind: PowerUpKind::Flight })
        );
    }

    #[test]
    fn test_joined_is_flat() {
        let snapshot = PlayerSnapshot {
            id: id(2),
            display_name: "Zed".to_string(),
            kind: PlayerKind::Bot,
            color: "#00ff00".to_string(),
            position: Vec3::new(1.0, 0.0, -2.0),
            heading: 0.5,
            role: Role::Untagged,
            size_scale: 1.0,
        };
        let frame = RelayEvent::ParticipantJoined { participant: snapshot.clone().into() };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "participant-joined");
        assert_eq!(value["displayName"], "Zed");
        assert_eq!(value["kind"], "bot");
        assert_eq!(value["rotation"], 0.5);

        let parsed = RelayEvent::from_json(&frame.to_json().unwrap()).unwrap();
        assert_eq!(parsed.joined_id(), Some(id(2)));
        assert_eq!(
            parsed.into_command(),
            Some(Command::RemoteJoined { player: snapshot })
        );
    }

    #[test]
    fn test_minimal_joined_uses_defaults() {
        let json = format!(
            r##"{{"type":"participant-joined","id":"{}","displayName":"Q","kind":"human","position":[0,0,0],"rotation":0,"color":"#fff"}}"##,
            id(3).to_uuid_string()
        );
        let Some(Command::RemoteJoined { player }) = RelayEvent::from_json(&json).unwrap().into_command() else {
            panic!("expected join");
        };
        assert_eq!(player.role, Role::Untagged);
        assert_eq!(player.size_scale, 1.0);
    }

    #[test]
    fn test_remote_events_are_not_rebroadcast() {
        let event = GameEvent::participant_tagged(10, false, id(1), Some(id(2)), 10);
        assert!(RelayEvent::from_game_event(&event).is_none());

        let local = GameEvent::participant_tagged(10, true, id(1), Some(id(2)), 10);
        assert_eq!(
            RelayEvent::from_game_event(&local),
            Some(RelayEvent::ParticipantTagged { tagged_id: id(1), tagger_id: Some(id(2)) })
        );
    }

    #[test]
    fn test_internal_events_stay_local() {
        let expired = GameEvent::power_up_expired(0, id(1), PowerUpKind::Speed);
        assert!(RelayEvent::from_game_event(&expired).is_none());
        let mirrored = GameEvent::power_up_spawned(0, false, PowerUpId::new([1; 16]), PowerUpKind::Speed, Vec3::ZERO);
        assert!(RelayEvent::from_game_event(&mirrored).is_none());
    }

    #[test]
    fn test_spawns_are_published() {
        let pickup = PowerUpId::new([9; 16]);
        let spawned = GameEvent::power_up_spawned(0, true, pickup, PowerUpKind::Invisibility, Vec3::planar(3.0, -4.0));
        let frame = RelayEvent::from_game_event(&spawned).unwrap();
        assert_eq!(frame.type_name(), "powerup-spawned");

        let parsed = RelayEvent::from_json(&frame.to_json().unwrap()).unwrap();
        let Some(Command::RemoteSpawned { power_up }) = parsed.into_command() else {
            panic!("expected spawn");
        };
        assert_eq!(power_up.id, pickup);
        assert_eq!(power_up.kind, PowerUpKind::Invisibility);
        assert_eq!(power_up.position, Vec3::planar(3.0, -4.0));
    }

    #[test]
    fn test_round_ended_survival_record_keys() {
        let host = Uuid::from_u128(0xA);
        let mut survival_record = BTreeMap::new();
        survival_record.insert(id(1), 45_000u64);
        let frame = RelayEvent::RoundEnded { host_id: host, round_number: 3, survival_record };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(value["roundNumber"], 3);
        assert_eq!(value["hostId"], host.to_string());
        assert_eq!(value["survivalRecord"][id(1).to_uuid_string()], 45_000);
        assert_eq!(frame.into_command(), Some(Command::RemoteRoundEnded { host, round_number: 3 }));
    }

    #[test]
    fn test_round_started_carries_snapshot() {
        let json = format!(
            r##"{{"type":"round-started","hostId":"{}","startedAt":0,"roundNumber":2,"players":[{{"id":"{}","displayName":"It","kind":"bot","position":[1,0,1],"rotation":0,"color":"#fff","role":"it","sizeScale":1.1}}]}}"##,
            Uuid::from_u128(0xB),
            id(5).to_uuid_string()
        );
        let Some(Command::RemoteRoundStarted { host, round_number, players, power_ups }) =
            RelayEvent::from_json(&json).unwrap().into_command()
        else {
            panic!("expected round start");
        };
        assert_eq!(host, Uuid::from_u128(0xB));
        assert_eq!(round_number, 2);
        assert_eq!(players[0].role, Role::It);
        assert!((players[0].size_scale - 1.1).abs() < 1e-6);
        assert!(power_ups.is_empty());
    }

    #[test]
    fn test_moved_is_not_echoed() {
        let moved = RelayEvent::ParticipantMoved { id: id(1), position: [0.0; 3], rotation: 0.0 };
        assert!(!moved.echoes_to_sender());
        assert!(RelayEvent::ParticipantLeft { id: id(1) }.echoes_to_sender());
    }

    #[test]
    fn test_malformed_frame() {
        assert!(RelayEvent::from_json("{\"type\":\"teleport\"}").is_err());
        assert!(RelayEvent::from_json("not json").is_err());
    }
}
