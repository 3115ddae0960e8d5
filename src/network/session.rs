//! Game Session
//!
//! Runtime for one game instance. A single task owns the [`GameState`] and
//! is the only code that mutates it: external triggers arrive as commands,
//! the tick runs on an interval, and everything the tick produces fans out
//! to subscribers, the relay link and the persistence worker.

use std::time::Duration;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn, debug, instrument};
use uuid::Uuid;

use crate::game::config::GameConfig;
use crate::game::events::{GameEvent, GameEventData};
use crate::game::input::Command;
use crate::game::replay::ReplayScript;
use crate::game::round;
use crate::game::state::{GameState, Origin, PlayerKind};
use crate::game::tick::tick;
use crate::network::client::{LinkEvent, RelayLink};
use crate::network::protocol::RelayEvent;
use crate::persistence::{PersistenceHandle, RoundRecord};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Simulation config.
    pub game: GameConfig,
    /// Tick on a wall-clock interval; otherwise run ticks back to back.
    pub paced: bool,
    /// Queued commands before senders wait.
    pub command_capacity: usize,
    /// Events buffered per subscriber.
    pub event_capacity: usize,
    /// Record every applied command into a [`ReplayScript`].
    pub record: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            paced: true,
            command_capacity: 256,
            event_capacity: 1024,
            record: false,
        }
    }
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session task has stopped.
    #[error("Session closed")]
    Closed,

    /// The session task panicked.
    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What a finished session leaves behind.
#[derive(Debug)]
pub struct SessionReport {
    /// Final simulation state.
    pub state: GameState,
    /// Recorded commands, if recording was enabled.
    pub script: Option<ReplayScript>,
}

/// Game session builder and runtime.
pub struct GameSession {
    config: SessionConfig,
    state: GameState,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    queries_tx: mpsc::Sender<oneshot::Sender<GameState>>,
    queries_rx: mpsc::Receiver<oneshot::Sender<GameState>>,
    events_tx: broadcast::Sender<GameEvent>,
    shutdown_tx: broadcast::Sender<()>,
    relay: Option<RelayLink>,
    persistence: Option<PersistenceHandle>,
    session_id: Option<String>,
    script: Option<ReplayScript>,
}

impl GameSession {
    /// Create a session with a fresh relay identity.
    pub fn new(config: SessionConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));
        let (queries_tx, queries_rx) = mpsc::channel(8);
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let instance_id = Uuid::new_v4();
        let state = GameState::new(config.game.clone()).with_instance_id(instance_id);
        let script = config
            .record
            .then(|| ReplayScript::new(config.game.clone(), config.game.tick_interval_ms(), instance_id));

        Self {
            config,
            state,
            commands_tx,
            commands_rx,
            queries_tx,
            queries_rx,
            events_tx,
            shutdown_tx,
            relay: None,
            persistence: None,
            session_id: None,
            script,
        }
    }

    /// Attach a relay connection.
    pub fn with_relay(mut self, relay: RelayLink) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Attach profile persistence.
    pub fn with_persistence(mut self, persistence: PersistenceHandle) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Start the session task.
    pub fn spawn(self) -> SessionHandle {
        let commands = self.commands_tx.clone();
        let queries = self.queries_tx.clone();
        let events = self.events_tx.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx));

        SessionHandle {
            commands,
            queries,
            events,
            shutdown_tx,
            task,
        }
    }

    #[instrument(skip_all)]
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> SessionReport {
        if let Some(persistence) = &self.persistence {
            match persistence.create_session().await {
                Ok(id) => {
                    debug!(session = %id, "Play session opened");
                    self.session_id = Some(id);
                }
                Err(e) => warn!("Play session unavailable: {}", e),
            }
        }

        let dt_ms = self.config.game.tick_interval_ms();
        let mut ticker = interval(Duration::from_millis(dt_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let paced = self.config.paced;
        info!(dt_ms, paced, instance = %self.state.instance_id, "Session started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                Some(command) = self.commands_rx.recv() => {
                    self.queue(command);
                }
                Some(reply) = self.queries_rx.recv() => {
                    let _ = reply.send(self.state.clone());
                }
                link_event = next_link_event(&mut self.relay) => {
                    match link_event {
                        Some(event) => self.on_link_event(event),
                        None => {
                            warn!("Relay link closed, continuing offline");
                            self.relay = None;
                        }
                    }
                }
                _ = next_tick(&mut ticker, paced) => {
                    self.step(dt_ms);
                }
            }
        }

        if let (Some(persistence), Some(id)) = (&self.persistence, self.session_id.take()) {
            persistence.end_session(id);
        }
        if let Some(relay) = self.relay.take() {
            relay.shutdown().await;
        }
        info!(ticks = self.state.tick, rounds = self.state.round.number, "Session stopped");

        SessionReport {
            state: self.state,
            script: self.script,
        }
    }

    fn queue(&mut self, command: Command) {
        if let Some(script) = &mut self.script {
            script.record(script.tick_count, command.clone());
        }
        self.state.enqueue(command);
    }

    fn step(&mut self, dt_ms: u64) {
        let result = tick(&mut self.state, dt_ms);
        if let Some(script) = &mut self.script {
            script.advance();
        }

        let mut peer_joined = false;
        for event in result.events {
            peer_joined |= !event.local && matches!(event.data, GameEventData::ParticipantJoined { .. });
            self.persist(&event);
            if let (Some(relay), Some(frame)) = (&self.relay, RelayEvent::from_game_event(&event)) {
                relay.publish(frame);
            }
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }

        // A newcomer missed the round-started frame
        if peer_joined {
            self.announce_round();
        }
    }

    fn announce_round(&self) {
        let Some(relay) = &self.relay else {
            return;
        };
        if let Some(frame) = round::announcement(&self.state).as_ref().and_then(RelayEvent::from_game_event) {
            relay.publish(frame);
        }
    }

    fn persist(&self, event: &GameEvent) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        match &event.data {
            GameEventData::ParticipantJoined { player } if event.local && player.kind == PlayerKind::Human => {
                let persistence = persistence.clone();
                let commands = self.commands_tx.clone();
                let player_id = player.id;
                let display_name = player.display_name.clone();
                tokio::spawn(async move {
                    match persistence.upsert_profile(display_name).await {
                        Ok(profile_id) => {
                            let _ = commands.send(Command::LinkProfile { player_id, profile_id }).await;
                        }
                        Err(e) => warn!(player = %player_id, "Profile unavailable, playing local-only: {}", e),
                    }
                });
            }
            GameEventData::RoundEnded { round_number, outcomes, .. } => {
                for outcome in outcomes {
                    let Some(profile_id) = &outcome.profile_ref else {
                        continue;
                    };
                    persistence.record_round(RoundRecord {
                        profile_id: profile_id.clone(),
                        session_id: self.session_id.clone(),
                        round_number: *round_number,
                        was_it: outcome.was_it,
                        survival_ms: outcome.survival_ms,
                        recorded_at: Utc::now(),
                    });
                }
            }
            _ => {}
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                // Peers that connected while we were away have never seen our participants
                if let Some(relay) = &self.relay {
                    for player in self.state.all().filter(|p| p.origin == Origin::Local) {
                        relay.publish(RelayEvent::ParticipantJoined {
                            participant: player.snapshot().into(),
                        });
                    }
                }
                self.announce_round();
            }
            LinkEvent::Disconnected => {}
            LinkEvent::Received(frame) => {
                if let Some(command) = frame.into_command() {
                    self.queue(command);
                }
            }
        }
    }
}

async fn next_link_event(relay: &mut Option<RelayLink>) -> Option<LinkEvent> {
    match relay {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Interval, paced: bool) {
    if paced {
        ticker.tick().await;
    } else {
        tokio::task::yield_now().await;
    }
}

/// Handle to a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    queries: mpsc::Sender<oneshot::Sender<GameState>>,
    events: broadcast::Sender<GameEvent>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Queue a command for the next tick.
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    /// Sender for queuing commands from other tasks.
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// Subscribe to simulation events.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Copy of the simulation state between ticks.
    pub async fn snapshot(&self) -> Result<GameState, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queries.send(reply_tx).await.map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stop the session and collect its report.
    pub async fn shutdown(self) -> Result<SessionReport, SessionError> {
        let _ = self.shutdown_tx.send(());
        Ok(self.task.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::PlayerId;
    use crate::persistence::MemoryStore;

    fn unpaced(budget_ms: u64) -> SessionConfig {
        let mut config = SessionConfig {
            paced: false,
            ..Default::default()
        };
        config.game.round.duration_budget_ms = budget_ms;
        config
    }

    fn join(id: PlayerId, name: &str) -> Command {
        Command::Join {
            player_id: id,
            kind: PlayerKind::Human,
            display_name: name.to_string(),
            local_viewer: true,
        }
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<GameEvent>, mut pred: F) -> GameEvent
    where
        F: FnMut(&GameEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("session closed"),
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_session_starts_round_with_bots() {
        let handle = GameSession::new(unpaced(180_000)).spawn();
        let mut events = handle.subscribe();
        let id = PlayerId::new([1; 16]);

        handle.send(join(id, "Solo")).await.unwrap();
        handle.send(Command::StartRound).await.unwrap();
        wait_for(&mut events, |e| matches!(e.data, GameEventData::RoundStarted { .. })).await;

        let live = handle.snapshot().await.unwrap();
        assert!(live.round.is_active());
        assert!(live.is_round_host());

        let report = handle.shutdown().await.unwrap();
        assert_eq!(report.state.player_count(), 5);
        assert_eq!(report.state.local_viewer(), Some(id));
        assert_eq!(report.state.instance_id, live.instance_id);
    }

    #[tokio::test]
    async fn test_round_results_recorded_for_linked_humans() {
        let (persistence, _worker) = PersistenceHandle::spawn(MemoryStore::new());
        let handle = GameSession::new(unpaced(3_000))
            .with_persistence(persistence.clone())
            .spawn();
        let mut events = handle.subscribe();

        handle.send(join(PlayerId::new([2; 16]), "Ada")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while persistence.top_profiles(10).await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        // Let the link command land before the round starts
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.send(Command::StartRound).await.unwrap();
        wait_for(&mut events, |e| matches!(e.data, GameEventData::RoundEnded { .. })).await;

        let top = persistence.top_profiles(10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].display_name, "Ada");
        assert_eq!(top[0].rounds_played, 1);
        assert!(top[0].best_survival_ms <= 3_000);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_recorded_session_replays() {
        let mut config = unpaced(180_000);
        config.record = true;
        let handle = GameSession::new(config).spawn();
        let mut events = handle.subscribe();

        handle.send(join(PlayerId::new([3; 16]), "Rec")).await.unwrap();
        handle.send(Command::StartRound).await.unwrap();
        wait_for(&mut events, |e| matches!(e.data, GameEventData::RoundStarted { .. })).await;

        let report = handle.shutdown().await.unwrap();
        let script = report.script.unwrap();
        let (replayed, _) = script.run();
        assert_eq!(replayed.tick, report.state.tick);
        assert_eq!(replayed.player_ids(), report.state.player_ids());
        assert_eq!(replayed.round.number, report.state.round.number);
    }
}
