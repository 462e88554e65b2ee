//! Motion normalization and frame encoding benchmarks.
//!
//! Measures the per-command cost of the control hot path:
//! - Normalizing joystick, move and rotate inputs into a twist
//! - Encoding the resulting `publish` op as a WebSocket text frame
//!
//! Run with: cargo bench --bench normalize
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use robot_bridge::control::{Direction, MotionCommand, RotateDirection, normalize};
use robot_bridge::protocol::Request;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const MAX_SPEED: f64 = 1.0;

fn commands() -> Vec<(&'static str, MotionCommand)> {
    vec![
        ("joystick", MotionCommand::Joystick { x: 0.5, y: -0.2 }),
        (
            "move",
            MotionCommand::Move {
                direction: Direction::Forward,
                speed: 0.4,
            },
        ),
        (
            "rotate",
            MotionCommand::Rotate {
                direction: RotateDirection::Left,
                speed: 0.8,
            },
        ),
        ("stop", MotionCommand::Stop),
    ]
}

// ============================================================================
// Benchmark: Normalize
// ============================================================================

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for (name, command) in commands() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &command, |b, command| {
            b.iter(|| normalize(black_box(command), black_box(MAX_SPEED)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Encode Publish Frame
// ============================================================================

fn bench_encode_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_publish");

    for (name, command) in commands() {
        let twist = normalize(&command, MAX_SPEED);

        group.bench_with_input(BenchmarkId::from_parameter(name), &twist, |b, twist| {
            b.iter(|| {
                let msg = serde_json::to_value(black_box(twist)).expect("twist serializes");
                Request::Publish {
                    topic: "/cmd_vel".to_string(),
                    msg,
                }
                .to_frame()
                .expect("frame encodes")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Main
// ============================================================================

criterion_group!(benches, bench_normalize, bench_encode_publish);
criterion_main!(benches);
