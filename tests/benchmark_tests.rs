//! Performance benchmarks for the hot paths of the synchronization layer

use client::game::ClientWorld;
use server::client_manager::SessionRegistry;
use server::game::{GameState, SyncDriver};
use shared::{
    decode, encode, EntityState, EntityUpdatePacket, FastPacket, InputFlags, PlayerInputPacket,
    Position, RingBuffer, Velocity,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Benchmarks fast-path encode and decode
#[test]
fn benchmark_packet_codec() {
    let packet = FastPacket::EntityUpdate(EntityUpdatePacket {
        entity_id: 42,
        timestamp: 123_456,
        state: EntityState {
            position: Position::new(100.0, 200.0),
            velocity: Velocity::new(10.0, 0.0),
        },
    });

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = encode(&packet).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.message_type(), packet.message_type());
    }

    let duration = start.elapsed();
    println!(
        "Packet codec: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks bounded queue throughput with one producer and one consumer
#[test]
fn benchmark_ring_buffer_spsc() {
    let queue: Arc<RingBuffer<u32>> = Arc::new(RingBuffer::new());
    let total = 200_000u32;
    let start = Instant::now();

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut next = 0;
            while next < total {
                if queue.push(next) {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    let mut expected = 0;
    while expected < total {
        match queue.pop() {
            Some(value) => {
                assert_eq!(value, expected);
                expected += 1;
            }
            None => thread::yield_now(),
        }
    }
    producer.join().unwrap();

    let duration = start.elapsed();
    println!(
        "Ring buffer: {} items in {:?} ({:.2} ns/item)",
        total,
        duration,
        duration.as_nanos() as f64 / total as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks sender resolution in a full registry
#[test]
fn benchmark_registry_resolution() {
    let mut registry = SessionRegistry::new(64);
    let addrs: Vec<SocketAddr> = (0..64u16)
        .map(|i| SocketAddr::from(([127, 0, 0, 1], 10_000 + i)))
        .collect();

    for (i, addr) in addrs.iter().enumerate() {
        let player_id = registry.reserve(&format!("bot{}", i), addr.ip(), 0).unwrap();
        let bind = FastPacket::PlayerInput(PlayerInputPacket {
            player_id,
            tick: 0,
            inputs: InputFlags::empty(),
        });
        assert!(registry.resolve(*addr, &bind, 0).is_some());
    }

    let iterations = 100_000u32;
    let start = Instant::now();

    for i in 0..iterations {
        let addr = addrs[i as usize % addrs.len()];
        let packet = FastPacket::PlayerInput(PlayerInputPacket {
            player_id: 0,
            tick: i,
            inputs: InputFlags::RIGHT,
        });
        assert!(registry.resolve(addr, &packet, i).is_some());
    }

    let duration = start.elapsed();
    println!(
        "Registry resolution: {} lookups in {:?} ({:.2} ns/lookup)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Stress tests the reference driver with many players and projectiles
#[test]
fn stress_test_driver_ticks() {
    let mut game = GameState::with_seed(3);
    game.enemy_spawn_interval = 10;
    for player_id in 1..=16 {
        game.player_joined(player_id, 0);
    }

    let frames = 1_000u32;
    let start = Instant::now();
    let mut sent = 0usize;

    for frame in 1..=frames {
        for player_id in 1..=16 {
            let input = FastPacket::PlayerInput(PlayerInputPacket {
                player_id,
                tick: frame,
                inputs: InputFlags::RIGHT | InputFlags::SHOOT,
            });
            sent += game.handle_packet(player_id, input, frame * 16).len();
        }
        sent += game.tick(frame * 16).len();
    }

    let duration = start.elapsed();
    println!(
        "Driver: {} frames, {} outbound packets in {:?} ({:.2} μs/frame)",
        frames,
        sent,
        duration,
        duration.as_micros() as f64 / frames as f64
    );

    assert!(sent > 0);
    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks client-side snapshot application
#[test]
fn benchmark_client_world_updates() {
    let mut game = GameState::with_seed(5);
    game.enemy_spawn_interval = 1;
    game.player_joined(1, 0);

    let mut world = ClientWorld::new();
    let start = Instant::now();
    let mut applied = 0usize;

    for frame in 1..=2_000u32 {
        for out in game.tick(frame) {
            if world.apply(out.packet()) {
                applied += 1;
            }
        }
    }

    let duration = start.elapsed();
    println!(
        "Client world: {} packets applied in {:?}, {} entities live",
        applied,
        duration,
        world.entity_count()
    );

    assert!(applied > 0);
    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}
