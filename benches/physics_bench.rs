use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pulse_physics::{
    collision::detector::{CachedDetectorData, DetectorResult},
    config::DEFAULT_BROADPHASE_CELL_SIZE,
    core::{Cuboid, Cylinder},
    *,
};
use std::hint::black_box;

const DT: f64 = 1.0 / 60.0;

fn prepare_world(columns: usize, broad_phase: BroadPhaseKind) -> World {
    let mut world = World::new(WorldSettings {
        broad_phase,
        ..WorldSettings::default()
    });
    let ground = world.add_body(RigidBody::fixed().with_position(Vec3::new(0.0, -0.5, 0.0)));
    world
        .add_shape(ground, ColliderBuilder::cuboid(Vec3::new(100.0, 0.5, 100.0)).build().unwrap())
        .unwrap();
    for i in 0..columns {
        for level in 0..4 {
            let position = Vec3::new(i as f64 * 1.5 - columns as f64 * 0.75, 0.5 + level as f64, 0.0);
            let body = world.add_body(RigidBody::dynamic().with_position(position));
            let shape = if level % 2 == 0 {
                ColliderBuilder::cuboid(Vec3::splat(0.5))
            } else {
                ColliderBuilder::sphere(0.5)
            };
            world.add_shape(body, shape.build().unwrap()).unwrap();
        }
    }
    world
}

fn bench_world_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    for &columns in &[8usize, 32, 64] {
        let kinds = [
            (
                "grid",
                BroadPhaseKind::Grid {
                    cell_size: DEFAULT_BROADPHASE_CELL_SIZE,
                },
            ),
            ("brute_force", BroadPhaseKind::BruteForce),
        ];
        for (label, kind) in kinds {
            group.bench_with_input(BenchmarkId::new(label, columns * 4), &columns, |b, &columns| {
                let mut world = prepare_world(columns, kind);
                // settle the stacks so the benchmark measures resting contacts
                for _ in 0..30 {
                    world.step(DT);
                }
                b.iter(|| world.step(black_box(DT)))
            });
        }
    }
    group.finish();
}

fn bench_narrow_phase(c: &mut Criterion) {
    let mut group = c.benchmark_group("narrow_phase");
    let ground = ColliderShape::Box(Cuboid::new(Vec3::new(5.0, 0.5, 5.0)).unwrap());
    let tf_ground = Transform::from_position(Vec3::new(0.0, -0.5, 0.0));
    let tilted = Transform::from_position_rotation(Vec3::new(0.0, 0.45, 0.0), Quat::from_rotation_z(0.1));
    let pairs = [
        ("box_box", ColliderShape::Box(Cuboid::new(Vec3::splat(0.5)).unwrap())),
        (
            "cylinder_box",
            ColliderShape::Cylinder(Cylinder::new(0.5, 0.5).unwrap()),
        ),
    ];

    for (label, shape) in pairs {
        let mut matrix = CollisionMatrix::new();
        let mut result = DetectorResult::default();
        let mut cache = CachedDetectorData::default();
        group.bench_function(label, |b| {
            b.iter(|| {
                matrix
                    .detect(&mut result, black_box(&shape), &ground, &tilted, &tf_ground, &mut cache)
                    .unwrap();
                black_box(result.num_points())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_step, bench_narrow_phase);
criterion_main!(benches);
