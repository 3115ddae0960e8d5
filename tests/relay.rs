//! Relay integration tests: raw WebSocket clients and two full sessions.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use tag_arena::game::{Command, GameEventData, GameState, MovementIntent, PlayerId, PlayerKind, Role, RoundPhase};
use tag_arena::network::{
    GameSession, RelayClientConfig, RelayConfig, RelayEvent, RelayLink, RelayServer, SessionConfig, SessionHandle,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> (Arc<RelayServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = Arc::new(RelayServer::new(RelayConfig::default()));
    let running = server.clone();
    tokio::spawn(async move { running.serve(listener).await });
    (server, url)
}

async fn send(ws: &mut Ws, frame: &RelayEvent) {
    ws.send(Message::Text(frame.to_json().unwrap())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Option<RelayEvent> {
    match tokio::time::timeout(Duration::from_millis(500), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(RelayEvent::from_json(&text).unwrap()),
        _ => None,
    }
}

fn joined(byte: u8) -> RelayEvent {
    RelayEvent::from_json(&format!(
        r##"{{"type":"participant-joined","id":"{}","displayName":"P{}","kind":"human","position":[0,0,0],"rotation":0,"color":"#ff0000"}}"##,
        PlayerId::new([byte; 16]).to_uuid_string(),
        byte
    ))
    .unwrap()
}

#[tokio::test]
async fn moved_frames_skip_the_sender() {
    let (server, url) = start_relay().await;
    let (mut a, _) = connect_async(url.as_str()).await.unwrap();
    let (mut b, _) = connect_async(url.as_str()).await.unwrap();

    let moved = RelayEvent::ParticipantMoved {
        id: PlayerId::new([1; 16]),
        position: [1.0, 0.0, 2.0],
        rotation: 0.25,
    };
    send(&mut a, &moved).await;
    assert_eq!(recv(&mut b).await, Some(moved));
    assert_eq!(recv(&mut a).await, None);

    let join = joined(1);
    send(&mut a, &join).await;
    assert_eq!(recv(&mut b).await, Some(join.clone()));
    assert_eq!(recv(&mut a).await, Some(join));

    server.shutdown();
}

#[tokio::test]
async fn disconnect_announces_departures() {
    let (server, url) = start_relay().await;
    let (mut a, _) = connect_async(url.as_str()).await.unwrap();
    let (mut b, _) = connect_async(url.as_str()).await.unwrap();

    send(&mut a, &joined(7)).await;
    send(&mut a, &joined(8)).await;
    send(&mut a, &RelayEvent::ParticipantLeft { id: PlayerId::new([8; 16]) }).await;
    for _ in 0..3 {
        assert!(recv(&mut b).await.is_some());
    }

    a.close(None).await.unwrap();
    drop(a);

    // Only the participant that never left is announced
    assert_eq!(
        recv(&mut b).await,
        Some(RelayEvent::ParticipantLeft { id: PlayerId::new([7; 16]) })
    );
    assert_eq!(recv(&mut b).await, None);

    server.shutdown();
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (server, url) = start_relay().await;
    let (mut a, _) = connect_async(url.as_str()).await.unwrap();
    let (mut b, _) = connect_async(url.as_str()).await.unwrap();

    a.send(Message::Text("{\"type\":\"unknown\"}".to_string())).await.unwrap();
    a.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    assert_eq!(recv(&mut b).await, None);

    // Connection still usable
    send(&mut a, &joined(3)).await;
    assert_eq!(recv(&mut b).await, Some(joined(3)));

    server.shutdown();
}

#[tokio::test]
async fn sessions_see_each_others_participants() {
    let (server, url) = start_relay().await;

    let config = SessionConfig {
        paced: true,
        ..Default::default()
    };
    let alpha = GameSession::new(config.clone())
        .with_relay(RelayLink::connect(RelayClientConfig::new(url.clone())))
        .spawn();
    let beta = GameSession::new(config)
        .with_relay(RelayLink::connect(RelayClientConfig::new(url)))
        .spawn();
    let mut beta_events = beta.subscribe();

    // Give both links time to connect before anything is published
    tokio::time::sleep(Duration::from_millis(300)).await;

    let alice = PlayerId::new([0xA1; 16]);
    alpha
        .send(Command::Join {
            player_id: alice,
            kind: PlayerKind::Human,
            display_name: "Alice".to_string(),
            local_viewer: true,
        })
        .await
        .unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = beta_events.recv().await.unwrap();
            if let GameEventData::ParticipantJoined { player } = &event.data {
                if player.id == alice {
                    return event;
                }
            }
        }
    })
    .await
    .unwrap();
    assert!(!seen.local);

    alpha.shutdown().await.unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = beta_events.recv().await.unwrap();
            if matches!(event.data, GameEventData::ParticipantLeft { player_id } if player_id == alice) {
                break;
            }
        }
        beta.shutdown().await.unwrap()
    })
    .await
    .unwrap();

    assert!(report.state.get(&alice).is_none());
    server.shutdown();
}

/// Poll both sessions until `done` holds for their states.
async fn until_both<F>(alpha: &SessionHandle, beta: &SessionHandle, mut done: F) -> (GameState, GameState)
where
    F: FnMut(&GameState, &GameState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let a = alpha.snapshot().await.unwrap();
            let b = beta.snapshot().await.unwrap();
            if done(&a, &b) {
                return (a, b);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap()
}

fn roles(state: &GameState) -> Vec<(PlayerId, Role)> {
    state.all().map(|p| (p.id, p.role)).collect()
}

fn pickups(state: &GameState) -> Vec<String> {
    state.power_ups().map(|p| format!("{}:{:?}", p.id.0, p.kind)).collect()
}

#[tokio::test]
async fn sessions_agree_on_round_pickups_and_tags() {
    let (server, url) = start_relay().await;

    let mut config = SessionConfig {
        paced: true,
        ..Default::default()
    };
    config.game.round.min_population = 2;
    config.game.power_ups.pickup_radius = 100.0;
    let alpha = GameSession::new(config.clone())
        .with_relay(RelayLink::connect(RelayClientConfig::new(url.clone())))
        .spawn();
    let beta = GameSession::new(config)
        .with_relay(RelayLink::connect(RelayClientConfig::new(url)))
        .spawn();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let alice = PlayerId::new([0xA1; 16]);
    let bob = PlayerId::new([0xB0; 16]);
    for (handle, id, name) in [(&alpha, alice, "Alice"), (&beta, bob, "Bob")] {
        handle
            .send(Command::Join {
                player_id: id,
                kind: PlayerKind::Human,
                display_name: name.to_string(),
                local_viewer: true,
            })
            .await
            .unwrap();
    }
    // Opposite corners, seen that way on both sides
    alpha
        .send(Command::Move { player_id: alice, intent: MovementIntent::new(-100.0, -100.0) })
        .await
        .unwrap();
    beta
        .send(Command::Move { player_id: bob, intent: MovementIntent::new(100.0, 100.0) })
        .await
        .unwrap();
    until_both(&alpha, &beta, |a, b| {
        a.get(&bob).is_some_and(|p| p.position.x == 20.0) && b.get(&alice).is_some_and(|p| p.position.x == -20.0)
    })
    .await;

    alpha.send(Command::StartRound).await.unwrap();

    // Beta adopts alpha's round; the runner's pickup is settled on both sides
    let (a, b) = until_both(&alpha, &beta, |a, b| {
        let runner = a.all().find(|p| p.is_untagged() && p.power_up.kind().is_some());
        b.round.is_active()
            && runner.is_some_and(|r| b.get(&r.id).is_some_and(|p| p.power_up.kind() == r.power_up.kind()))
            && pickups(a) == pickups(b)
    })
    .await;
    assert_eq!(b.round.host, Some(a.instance_id));
    assert_eq!(b.round.number, a.round.number);
    assert_eq!(roles(&a), roles(&b));
    assert_eq!(a.power_up_count(), a.config.power_ups.pool_size);

    // The runner steps onto "it" on its own instance
    let it = a.all().find(|p| p.is_it()).unwrap().id;
    let runner = a.all().find(|p| p.is_untagged()).unwrap().id;
    let (owner, view) = if runner == alice { (&alpha, &a) } else { (&beta, &b) };
    let delta = view.get(&it).unwrap().position - view.get(&runner).unwrap().position;
    owner
        .send(Command::Move { player_id: runner, intent: MovementIntent::new(delta.x, delta.z) })
        .await
        .unwrap();

    let (a, b) = until_both(&alpha, &beta, |a, b| {
        a.all().all(|p| p.is_it()) && b.all().all(|p| p.is_it())
    })
    .await;
    assert_eq!(roles(&a), roles(&b));

    // Everyone tagged: both sides close the same round after the grace delay
    let (a, b) = until_both(&alpha, &beta, |a, b| {
        a.round.phase == RoundPhase::Ended && b.round.phase == RoundPhase::Ended
    })
    .await;
    assert_eq!(a.round.number, b.round.number);

    alpha.shutdown().await.unwrap();
    beta.shutdown().await.unwrap();
    server.shutdown();
}
