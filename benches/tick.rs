use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use tag_arena::game::{tick, Command, GameConfig, GameState, PlayerId, PlayerKind};

fn active_round(population: usize) -> GameState {
    let mut config = GameConfig::default();
    config.round.min_population = population;
    let mut state = GameState::new(config);
    state.enqueue(Command::Join {
        player_id: PlayerId::new([1; 16]),
        kind: PlayerKind::Human,
        display_name: "Bench".to_string(),
        local_viewer: true,
    });
    state.enqueue(Command::StartRound);
    tick(&mut state, 100);
    state
}

fn bench_tick(c: &mut Criterion) {
    for population in [5, 32] {
        let base = active_round(population);
        c.bench_function(&format!("tick_{}_players", population), |b| {
            b.iter_batched(
                || base.clone(),
                |mut state| {
                    for _ in 0..10 {
                        black_box(tick(&mut state, 100));
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
