use pulse_physics::*;

fn main() {
    let mut world = World::default();

    let ground = world.add_body(RigidBody::fixed().with_position(Vec3::new(0.0, -0.5, 0.0)));
    world
        .add_shape(
            ground,
            ColliderBuilder::cuboid(Vec3::new(20.0, 0.5, 20.0))
                .build()
                .expect("valid ground"),
        )
        .expect("ground body exists");

    let mut stack = Vec::new();
    for i in 0..5 {
        let body = world.add_body(RigidBody::dynamic().with_position(Vec3::new(0.0, i as f64 + 0.5, 0.0)));
        world
            .add_shape(
                body,
                ColliderBuilder::cuboid(Vec3::splat(0.5))
                    .friction(0.6)
                    .build()
                    .expect("valid box"),
            )
            .expect("box body exists");
        stack.push(body);
    }

    for _ in 0..240 {
        world.step(config::DEFAULT_TIME_STEP);
    }

    for (i, handle) in stack.iter().enumerate() {
        if let Some(body) = world.body(*handle) {
            let p = body.transform.position;
            println!(
                "box {i}: ({:.3}, {:.3}, {:.3}) sleeping = {}",
                p.x,
                p.y,
                p.z,
                body.is_sleeping()
            );
        }
    }
    println!(
        "simulated a stack of {} boxes for 4 seconds: {} contacts, {} islands",
        stack.len(),
        world.num_contacts(),
        world.num_islands()
    );
}
