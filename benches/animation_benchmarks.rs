//! Performance benchmarks for the per-frame animation path
//!
//! Run with: cargo bench
//!
//! A tick must fit comfortably inside a 16ms frame; these benchmarks track
//! the energy computation and a full rig tick with every driver active.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use crabavatar::animation::{rms_energy, AvatarRig, LogFlash, MorphMesh};
use crabavatar::config::AvatarConfig;
use crabavatar::testing::{synthetic_magnitudes, RecordingMesh, ScriptedMagnitudes};

fn bench_rms_energy(c: &mut Criterion) {
    let mut group = c.benchmark_group("RMS Energy");

    for bins in [64usize, 128, 1024] {
        let frame = synthetic_magnitudes(7, bins);
        group.throughput(Throughput::Elements(bins as u64));
        group.bench_with_input(BenchmarkId::from_parameter(bins), &frame, |b, frame| {
            b.iter(|| rms_energy(black_box(frame)))
        });
    }

    group.finish();
}

fn bench_rig_tick(c: &mut Criterion) {
    let mesh: Arc<dyn MorphMesh> = Arc::new(RecordingMesh::new(&[
        "mouthOpen",
        "Blink_Left",
        "Blink_Right",
        "Smile",
    ]));
    let config = AvatarConfig::default();
    let mut rig = AvatarRig::with_seed(&config, std::slice::from_ref(&mesh), 11, Box::new(LogFlash));

    rig.start_blinking(0);
    rig.set_speaking(true, Some(Box::new(ScriptedMagnitudes::constant(synthetic_magnitudes(3, 128)))), 0);

    let mut now = 0u64;
    c.bench_function("rig tick (blink + lipsync + reaction)", |b| {
        b.iter(|| {
            now += 16;
            if now % 2_000 == 0 {
                rig.react_emoji("😊", now);
            }
            rig.tick(black_box(now));
        })
    });
}

criterion_group!(benches, bench_rms_energy, bench_rig_tick);
criterion_main!(benches);
