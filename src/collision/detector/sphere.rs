//! Closed-form detectors for spheres and capsules.

use super::{CachedDetectorData, Detector, DetectorResult};
use crate::{
    core::{
        collider::ColliderShape,
        geometry::{Capsule, Cuboid, Sphere},
        types::Transform,
    },
    error::GjkEpaError,
    utils::math::{closest_segment_params, Real, Vec3},
};

/// Contact between two spheres `(c1, r1)` and `(c2, r2)`. Touching spheres
/// yield a zero-depth point.
fn sphere_sphere(result: &mut DetectorResult, c1: Vec3, r1: Real, c2: Vec3, r2: Real, id: u32) {
    let d = c2 - c1;
    let len2 = d.length_squared();
    let radius_sum = r1 + r2;
    if len2 > radius_sum * radius_sum {
        return;
    }
    let len = len2.sqrt();
    let normal = if len > 1e-9 { d / len } else { Vec3::Y };
    result.normal = normal;
    result.add_point(c1 + normal * r1, c2 - normal * r2, radius_sum - len, id);
}

fn capsule_segment(capsule: &Capsule, tf: &Transform) -> (Vec3, Vec3) {
    let (a, b) = capsule.segment();
    (tf.transform_point(a), tf.transform_point(b))
}

fn sphere_of(shape: &ColliderShape) -> Option<&Sphere> {
    match shape {
        ColliderShape::Sphere(s) => Some(s),
        _ => None,
    }
}

fn capsule_of(shape: &ColliderShape) -> Option<&Capsule> {
    match shape {
        ColliderShape::Capsule(c) => Some(c),
        _ => None,
    }
}

fn cuboid_of(shape: &ColliderShape) -> Option<&Cuboid> {
    match shape {
        ColliderShape::Box(b) => Some(b),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SphereSphereDetector;

impl Detector for SphereSphereDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        _cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        if let (Some(s1), Some(s2)) = (sphere_of(shape1), sphere_of(shape2)) {
            sphere_sphere(result, tf1.position, s1.radius, tf2.position, s2.radius, 0);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SphereBoxDetector;

impl Detector for SphereBoxDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        _cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        let (Some(sphere), Some(cuboid)) = (sphere_of(shape1), cuboid_of(shape2)) else {
            return Ok(());
        };
        let radius = sphere.radius;
        let he = cuboid.half_extents;
        let center = tf2.inverse_transform_point(tf1.position);
        let clamped = center.clamp(-he, he);
        let offset = center - clamped;
        let dist2 = offset.length_squared();

        if dist2 > 1e-18 {
            if dist2 > radius * radius {
                return Ok(());
            }
            let dist = dist2.sqrt();
            let normal = tf2.transform_vector(-offset / dist);
            result.normal = normal;
            result.add_point(
                tf1.position + normal * radius,
                tf2.transform_point(clamped),
                radius - dist,
                0,
            );
            return Ok(());
        }

        // centre inside the box: push out through the nearest face
        let gaps = he - center.abs();
        let axis = if gaps.x <= gaps.y && gaps.x <= gaps.z {
            0
        } else if gaps.y <= gaps.z {
            1
        } else {
            2
        };
        let sign = if center[axis] < 0.0 { -1.0 } else { 1.0 };
        let mut local_normal = Vec3::ZERO;
        local_normal[axis] = -sign;
        let mut face_point = center;
        face_point[axis] = sign * he[axis];

        let normal = tf2.transform_vector(local_normal);
        result.normal = normal;
        result.add_point(
            tf1.position + normal * radius,
            tf2.transform_point(face_point),
            radius + gaps[axis],
            0,
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SphereCapsuleDetector;

impl Detector for SphereCapsuleDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        _cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        let (Some(sphere), Some(capsule)) = (sphere_of(shape1), capsule_of(shape2)) else {
            return Ok(());
        };
        let (a, b) = capsule_segment(capsule, tf2);
        let ab = b - a;
        let len2 = ab.length_squared();
        let t = if len2 > 1e-18 {
            ((tf1.position - a).dot(ab) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let closest = a + ab * t;
        sphere_sphere(result, tf1.position, sphere.radius, closest, capsule.radius, 0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CapsuleCapsuleDetector;

impl Detector for CapsuleCapsuleDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        _cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        let (Some(c1), Some(c2)) = (capsule_of(shape1), capsule_of(shape2)) else {
            return Ok(());
        };
        let (p1, q1) = capsule_segment(c1, tf1);
        let (p2, q2) = capsule_segment(c2, tf2);
        let d1 = q1 - p1;
        let d2 = q2 - p2;
        let len1 = d1.length();
        let len2 = d2.length();

        // nearly parallel segments rest on two points at the ends of their overlap
        if len1 > 1e-9 && len2 > 1e-9 && d1.dot(d2).abs() > 0.999 * len1 * len2 {
            let dir = d1 / len1;
            let s_a = (p2 - p1).dot(dir);
            let s_b = (q2 - p1).dot(dir);
            let lo = s_a.min(s_b).max(0.0);
            let hi = s_a.max(s_b).min(len1);
            if hi - lo > 1e-6 {
                for (id, s) in [(0u32, lo), (1u32, hi)] {
                    let on1 = p1 + dir * s;
                    let t = ((on1 - p2).dot(d2) / (len2 * len2)).clamp(0.0, 1.0);
                    let on2 = p2 + d2 * t;
                    let mut single = DetectorResult::default();
                    sphere_sphere(&mut single, on1, c1.radius, on2, c2.radius, id);
                    if let Some(point) = single.points.first() {
                        result.normal = single.normal;
                        result.add_point(point.position1, point.position2, point.depth, id);
                    }
                }
                return Ok(());
            }
        }

        let (s, t) = closest_segment_params(p1, q1, p2, q2);
        sphere_sphere(result, p1 + d1 * s, c1.radius, p2 + d2 * t, c2.radius, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<D: Detector>(
        detector: &mut D,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
    ) -> DetectorResult {
        let mut result = DetectorResult::default();
        let mut cache = CachedDetectorData::default();
        detector
            .detect_impl(&mut result, shape1, shape2, tf1, tf2, &mut cache)
            .unwrap();
        result
    }

    #[test]
    fn overlapping_spheres_report_expected_point() {
        let s = ColliderShape::Sphere(Sphere { radius: 1.0 });
        let result = run(
            &mut SphereSphereDetector,
            &s,
            &s,
            &Transform::IDENTITY,
            &Transform::from_position(Vec3::new(0.0, 1.5, 0.0)),
        );
        assert_eq!(result.num_points(), 1);
        let p = result.points[0];
        assert!((result.normal - Vec3::Y).length() < 1e-12);
        assert!((p.depth - 0.5).abs() < 1e-12);
        assert!((p.position1 - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-12);
        assert!((p.position2 - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-12);
    }

    #[test]
    fn sphere_inside_box_is_pushed_through_nearest_face() {
        let sphere = ColliderShape::Sphere(Sphere { radius: 0.25 });
        let cuboid = ColliderShape::Box(Cuboid {
            half_extents: Vec3::new(2.0, 1.0, 2.0),
        });
        let result = run(
            &mut SphereBoxDetector,
            &sphere,
            &cuboid,
            &Transform::from_position(Vec3::new(0.0, 0.8, 0.0)),
            &Transform::IDENTITY,
        );
        assert_eq!(result.num_points(), 1);
        assert!((result.normal - Vec3::NEG_Y).length() < 1e-12);
        assert!((result.points[0].depth - 0.45).abs() < 1e-12);
    }

    #[test]
    fn parallel_capsules_rest_on_two_points() {
        let capsule = ColliderShape::Capsule(Capsule {
            radius: 0.5,
            half_height: 1.0,
        });
        let lying = crate::utils::math::Quat::from_rotation_z(std::f64::consts::FRAC_PI_2);
        let result = run(
            &mut CapsuleCapsuleDetector,
            &capsule,
            &capsule,
            &Transform::from_position_rotation(Vec3::ZERO, lying),
            &Transform::from_position_rotation(Vec3::new(0.5, 0.9, 0.0), lying),
        );
        assert_eq!(result.num_points(), 2);
        for p in &result.points {
            assert!((p.depth - 0.1).abs() < 1e-9);
        }
    }
}
