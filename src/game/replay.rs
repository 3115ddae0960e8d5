//! Replay Scripts
//!
//! A recorded command stream plus the config and tick length it ran with.
//! Replaying a script on a fresh state reproduces the original events.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::game::config::GameConfig;
use crate::game::events::GameEvent;
use crate::game::input::Command;
use crate::game::state::GameState;
use crate::game::tick;

/// Recorded session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Config the session started with (seed included)
    pub config: GameConfig,
    /// Relay identity of the recorded instance (mints its pickup ids)
    pub instance_id: Uuid,
    /// Tick length in milliseconds
    pub dt_ms: u64,
    /// Ticks run
    pub tick_count: u64,
    /// (tick index, command queued before that tick)
    pub commands: Vec<(u64, Command)>,
}

impl ReplayScript {
    /// Start an empty recording.
    pub fn new(config: GameConfig, dt_ms: u64, instance_id: Uuid) -> Self {
        Self {
            config,
            instance_id,
            dt_ms,
            tick_count: 0,
            commands: Vec::new(),
        }
    }

    /// Record a command queued before tick `at_tick`.
    pub fn record(&mut self, at_tick: u64, command: Command) {
        self.commands.push((at_tick, command));
    }

    /// Note that a tick ran.
    pub fn advance(&mut self) {
        self.tick_count += 1;
    }

    /// Replay on a fresh state.
    pub fn run(&self) -> (GameState, Vec<GameEvent>) {
        tick::replay(
            GameState::new(self.config.clone()).with_instance_id(self.instance_id),
            &self.commands,
            self.tick_count,
            self.dt_ms,
        )
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::MovementIntent;
    use crate::game::state::{PlayerId, PlayerKind};

    fn scripted() -> ReplayScript {
        let mut config = GameConfig::default();
        config.seed = 99;
        let mut script = ReplayScript::new(config, 100, Uuid::from_u128(7));
        let id = PlayerId::new([7; 16]);
        script.record(0, Command::Join {
            player_id: id,
            kind: PlayerKind::Human,
            display_name: "Rec".to_string(),
            local_viewer: true,
        });
        script.record(0, Command::StartRound);
        for t in 1..40 {
            script.record(t, Command::Move {
                player_id: id,
                intent: MovementIntent::new(0.3, -0.2),
            });
        }
        for _ in 0..60 {
            script.advance();
        }
        script
    }

    #[test]
    fn test_binary_script_replays_identically() {
        let script = scripted();
        let bytes = script.to_bytes().unwrap();
        let decoded = ReplayScript::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, script);

        let (state_a, events_a) = script.run();
        let (state_b, events_b) = decoded.run();
        assert_eq!(events_a, events_b);
        assert_eq!(state_a.now_ms, 6_000);
        assert_eq!(state_a.player_ids(), state_b.player_ids());
        assert_eq!(state_a.instance_id, Uuid::from_u128(7));
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let bytes = scripted().to_bytes().unwrap();
        assert!(ReplayScript::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}
