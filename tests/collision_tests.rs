use approx::assert_relative_eq;
use pulse_physics::{
    collision::detector::{CachedDetectorData, Detector, DetectorResult, GjkEpaDetector},
    core::{Cuboid, Sphere},
    CollisionMatrix, ColliderShape, Transform, Vec3,
};

fn assert_vec_eq(actual: Vec3, expected: Vec3, tolerance: f64) {
    assert!(
        (actual - expected).length() < tolerance,
        "expected {expected:?}, got {actual:?}"
    );
}

fn sphere(radius: f64) -> ColliderShape {
    ColliderShape::Sphere(Sphere::new(radius).unwrap())
}

fn cuboid(half_extents: Vec3) -> ColliderShape {
    ColliderShape::Box(Cuboid::new(half_extents).unwrap())
}

fn detect(s1: &ColliderShape, s2: &ColliderShape, tf1: &Transform, tf2: &Transform) -> DetectorResult {
    let mut matrix = CollisionMatrix::new();
    let mut result = DetectorResult::default();
    matrix
        .detect(&mut result, s1, s2, tf1, tf2, &mut CachedDetectorData::default())
        .expect("detection should succeed");
    result
}

#[test]
fn overlapping_spheres_share_one_point() {
    let s = sphere(1.0);
    let result = detect(
        &s,
        &s,
        &Transform::IDENTITY,
        &Transform::from_position(Vec3::new(0.0, 1.5, 0.0)),
    );
    assert_eq!(result.num_points(), 1);
    let p = result.points[0];
    assert_vec_eq(result.normal, Vec3::Y, 1e-12);
    assert_relative_eq!(p.depth, 0.5, epsilon = 1e-12);
    assert_vec_eq(p.position1, Vec3::new(0.0, 1.0, 0.0), 1e-12);
    assert_vec_eq(p.position2, Vec3::new(0.0, 0.5, 0.0), 1e-12);
}

#[test]
fn box_resting_on_ground_touches_at_its_corners() {
    let result = detect(
        &cuboid(Vec3::ONE),
        &cuboid(Vec3::new(5.0, 0.5, 5.0)),
        &Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
        &Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
    );
    assert_eq!(result.num_points(), 4);
    assert_vec_eq(result.normal, Vec3::NEG_Y, 1e-12);
    for p in &result.points {
        assert!(p.depth.abs() < 1e-9);
        assert_relative_eq!(p.position1.x.abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(p.position1.z.abs(), 1.0, epsilon = 1e-9);
    }
}

#[test]
fn separating_further_removes_points_and_tangency_keeps_one() {
    let s = sphere(1.0);
    let apart = detect(
        &s,
        &s,
        &Transform::IDENTITY,
        &Transform::from_position(Vec3::new(2.5, 0.0, 0.0)),
    );
    assert_eq!(apart.num_points(), 0);

    let tangent = detect(
        &s,
        &s,
        &Transform::IDENTITY,
        &Transform::from_position(Vec3::new(2.0, 0.0, 0.0)),
    );
    assert_eq!(tangent.num_points(), 1);
    let p = tangent.points[0];
    assert!(p.depth.abs() < 1e-12);
    assert_vec_eq(p.position1, Vec3::X, 1e-12);
    assert_vec_eq(p.position2, Vec3::X, 1e-12);
}

#[test]
fn swapping_the_pair_negates_the_normal() {
    let ball = sphere(0.5);
    let block = cuboid(Vec3::splat(1.0));
    let tf_ball = Transform::from_position(Vec3::new(0.3, 1.3, -0.2));
    let tf_block = Transform::IDENTITY;

    let forward = detect(&ball, &block, &tf_ball, &tf_block);
    let backward = detect(&block, &ball, &tf_block, &tf_ball);
    assert_eq!(forward.num_points(), 1);
    assert_eq!(backward.num_points(), 1);
    assert_vec_eq(forward.normal, -backward.normal, 1e-12);
    let (f, b) = (forward.points[0], backward.points[0]);
    assert_relative_eq!(f.depth, b.depth, epsilon = 1e-12);
    assert_vec_eq(f.position1, b.position2, 1e-12);
    assert_vec_eq(f.position2, b.position1, 1e-12);
}

#[test]
fn sat_and_gjk_agree_on_axis_aligned_boxes() {
    let top = cuboid(Vec3::splat(0.5));
    let ground = cuboid(Vec3::new(5.0, 0.5, 5.0));
    let tf_ground = Transform::from_position(Vec3::new(0.0, -0.5, 0.0));

    for depth in [0.05, 0.3] {
        let tf_top = Transform::from_position(Vec3::new(0.1, 0.5 - depth, -0.2));
        let sat = detect(&top, &ground, &tf_top, &tf_ground);

        let mut gjk = DetectorResult::default();
        GjkEpaDetector::new(false)
            .detect_impl(&mut gjk, &top, &ground, &tf_top, &tf_ground, &mut CachedDetectorData::default())
            .expect("gjk should succeed");

        assert_eq!(sat.num_points(), 4);
        assert_eq!(gjk.num_points(), 1);
        assert_vec_eq(sat.normal, gjk.normal, 1e-4);
        assert_relative_eq!(sat.max_depth(), depth, epsilon = 1e-9);
        assert_relative_eq!(gjk.points[0].depth, depth, epsilon = 1e-4);
    }
}

#[test]
fn terrain_pairs_have_no_detector_between_themselves() {
    use pulse_physics::core::GeometryKind;
    let matrix = CollisionMatrix::new();
    assert!(!matrix.has_detector(GeometryKind::Terrain, GeometryKind::Terrain));
    assert!(matrix.has_detector(GeometryKind::Cone, GeometryKind::Terrain));
    assert!(matrix.has_detector(GeometryKind::Terrain, GeometryKind::Sphere));
}
