//! Basic demonstration of the concurrent simulation core.
//!
//! Run with: cargo run --example basic_demo

use sim_core::engine::TileKind;
use sim_core::worker_pool::Priority;
use sim_core::{ConfigBuilder, Engine};

fn main() {
    tracing_subscriber::fmt::init();

    println!("=== Simulation Core Demo ===\n");

    let config = ConfigBuilder::new()
        .thread_count(4)
        .active_radius(600.0)
        .background_radius(4_000.0)
        .build();
    let mut engine = Engine::new(config, 42).expect("engine should start");

    // A small world: an open field with one building blocking the middle.
    let width = 8u32;
    let height = 8u32;
    let kinds: Vec<TileKind> = (0..width * height)
        .map(|i| {
            let x = i % width;
            let y = i / width;
            if x == 4 && (2..6).contains(&y) {
                TileKind::Building
            } else {
                TileKind::Open
            }
        })
        .collect();
    engine.load_world([0.0, 0.0], width, height, 32.0, kinds);

    let player = engine.create_npc([16.0, 16.0], [8.0, 8.0], 1, u32::MAX);
    engine.set_player_handle(Some(player));

    engine.register_behavior(
        "wander",
        Box::new(sim_core::ai::behavior::StandardBehavior::new(
            sim_core::ai::behavior::StandardKind::Wander {
                radius: 80.0,
                pause_sec: 1.0,
            },
        )),
    );

    for i in 0..10 {
        let npc = engine.create_npc([60.0 + i as f32 * 20.0, 60.0], [8.0, 8.0], 1, u32::MAX);
        engine.assign_behavior(npc, "wander");
    }

    engine.request_path(player, [16.0, 16.0], [16.0 + 32.0 * 6.0, 16.0], Priority::Normal, |result| {
        println!("path resolved with {} waypoints (from_cache={})", result.path.len(), result.from_cache);
    });

    println!("Running 120 ticks (2 seconds at 60 Hz)...\n");
    for tick in 0..120 {
        engine.step(1.0 / 60.0);

        if (tick + 1) % 30 == 0 {
            let snapshot = engine.snapshot(1.0);
            println!(
                "tick {} (t={:.2}s): {} active entities rendered",
                engine.current_tick(),
                engine.current_time(),
                snapshot.entities.len()
            );
        }
    }

    for event in engine.drain_trigger_events() {
        println!("trigger event: {:?}", event);
    }

    engine.shutdown();
}
