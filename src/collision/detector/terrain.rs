//! Convex shape against heightfield terrain.
//!
//! Every terrain triangle under the convex shape's bounds is tested on its own:
//! GJK/EPA for the shape as a whole, plus closed-form features (sphere centres,
//! capsule end caps, box corners) where the shape has them. The deepest and
//! most spread-out candidates survive.

use arrayvec::ArrayVec;
use log::debug;

use super::{gjk::GjkEpa, CachedDetectorData, Detector, DetectorResult};
use crate::{
    config::{CONTACT_PERSISTENCE_THRESHOLD, MAX_MANIFOLD_POINTS},
    core::{
        collider::ColliderShape,
        geometry::{convex_aabb, ConvexGeometry, ConvexRef},
        terrain::Terrain,
        types::Transform,
    },
    error::GjkEpaError,
    utils::math::{closest_point_on_triangle, Real, Vec3},
};

/// Candidates closer than this are the same contact; the deeper one is kept.
const MERGE_DISTANCE: Real = 1e-3;
/// Slack on the barycentric inside test, so points on a shared edge count for
/// both triangles.
const INSIDE_TOLERANCE: Real = 1e-9;

/// A candidate contact between the convex shape and one terrain triangle.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Deepest point of the convex shape, world space.
    point: Vec3,
    /// Outward terrain normal, world space.
    normal: Vec3,
    depth: Real,
    id: u32,
    /// Sphere touching an edge or vertex rather than the face interior.
    on_edge: bool,
}

/// World-space terrain triangle with its upward normal.
#[derive(Debug, Clone, Copy)]
struct Triangle {
    vertices: [Vec3; 3],
    normal: Vec3,
}

impl Triangle {
    fn contains_projection(&self, p: Vec3) -> bool {
        let [a, b, c] = self.vertices;
        let v0 = b - a;
        let v1 = c - a;
        let v2 = p - a;
        let d00 = v0.dot(v0);
        let d01 = v0.dot(v1);
        let d11 = v1.dot(v1);
        let d20 = v2.dot(v0);
        let d21 = v2.dot(v1);
        let denom = d00 * d11 - d01 * d01;
        if denom.abs() < 1e-18 {
            return false;
        }
        let v = (d11 * d20 - d01 * d21) / denom;
        let w = (d00 * d21 - d01 * d20) / denom;
        v >= -INSIDE_TOLERANCE && w >= -INSIDE_TOLERANCE && v + w <= 1.0 + INSIDE_TOLERANCE
    }

    fn signed_distance(&self, p: Vec3) -> Real {
        (p - self.vertices[0]).dot(self.normal)
    }
}

impl ConvexGeometry for Triangle {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        let mut best = self.vertices[0];
        let mut best_dot = best.dot(dir);
        for v in &self.vertices[1..] {
            let d = v.dot(dir);
            if d > best_dot {
                best_dot = d;
                best = *v;
            }
        }
        best
    }

    fn gjk_margin(&self) -> Real {
        0.0
    }
}

/// Feature ids: the triangle index in the high bits, the feature in the low
/// four.
fn feature_id(triangle: u32, feature: u32) -> u32 {
    (triangle << 4) | feature
}

/// Detector for any convex shape (shape 1) against a [`Terrain`] (shape 2).
///
/// Spheres, capsules and boxes are rebuilt in full each call; other convex
/// shapes report their single deepest point.
#[derive(Debug, Clone, Default)]
pub struct ConvexTerrainDetector {
    engine: GjkEpa,
    candidates: Vec<Candidate>,
}

impl ConvexTerrainDetector {
    fn push(&mut self, candidate: Candidate) {
        if candidate.depth <= -CONTACT_PERSISTENCE_THRESHOLD {
            return;
        }
        if let Some(existing) = self
            .candidates
            .iter_mut()
            .find(|c| (c.point - candidate.point).length_squared() < MERGE_DISTANCE * MERGE_DISTANCE)
        {
            if candidate.depth > existing.depth || (existing.on_edge && !candidate.on_edge) {
                *existing = candidate;
            }
            return;
        }
        self.candidates.push(candidate);
    }

    /// Sphere of `radius` around `center` against one triangle.
    fn sphere_feature(&mut self, triangle: &Triangle, center: Vec3, radius: Real, id: u32) {
        let signed = triangle.signed_distance(center);
        if signed < 0.0 {
            // centre below the surface: only the triangle it sits under pushes it out
            if triangle.contains_projection(center) {
                self.push(Candidate {
                    point: center - triangle.normal * radius,
                    normal: triangle.normal,
                    depth: radius - signed,
                    id,
                    on_edge: false,
                });
            }
            return;
        }

        let [a, b, c] = triangle.vertices;
        let closest = closest_point_on_triangle(center, a, b, c);
        let offset = center - closest;
        let distance = offset.length();
        let normal = if distance > 1e-12 { offset / distance } else { triangle.normal };
        self.push(Candidate {
            point: center - normal * radius,
            normal,
            depth: radius - distance,
            id,
            on_edge: !triangle.contains_projection(center),
        });
    }

    /// Box corner against one triangle, measured along the triangle normal.
    fn corner_feature(&mut self, triangle: &Triangle, corner: Vec3, id: u32) {
        let signed = triangle.signed_distance(corner);
        if signed < CONTACT_PERSISTENCE_THRESHOLD && triangle.contains_projection(corner) {
            self.push(Candidate {
                point: corner,
                normal: triangle.normal,
                depth: -signed,
                id,
                on_edge: false,
            });
        }
    }

    /// Whole convex shape against one triangle with GJK, EPA when the core
    /// reaches the triangle.
    fn convex_feature(&mut self, convex: &ConvexRef<'_>, tf: &Transform, triangle: &Triangle, id: u32) {
        let margin = convex.gjk_margin();
        match self
            .engine
            .compute_closest_points(convex, triangle, tf, &Transform::IDENTITY, None, true)
        {
            Ok(closest) if closest.normal.length_squared() > 0.25 && closest.normal.dot(triangle.normal) <= 0.0 => {
                self.push(Candidate {
                    point: closest.point1 + closest.normal * margin,
                    normal: -closest.normal,
                    depth: margin - closest.distance,
                    id,
                    on_edge: false,
                });
            }
            Ok(_) => self.face_feature(convex, tf, triangle, id),
            Err(err) => {
                debug!("terrain triangle {id:#x}: {err}");
                self.face_feature(convex, tf, triangle, id);
            }
        }
    }

    /// Deepest support point along the triangle normal. Used when the shape
    /// has passed below the triangle's plane.
    fn face_feature(&mut self, convex: &ConvexRef<'_>, tf: &Transform, triangle: &Triangle, id: u32) {
        let local_dir = tf.inverse_transform_vector(-triangle.normal);
        let support = tf.transform_point(convex.local_supporting_vertex_with_margin(local_dir));
        if triangle.contains_projection(support) {
            self.push(Candidate {
                point: support,
                normal: triangle.normal,
                depth: -triangle.signed_distance(support),
                id,
                on_edge: false,
            });
        }
    }

    fn collect(&mut self, shape: &ColliderShape, convex: &ConvexRef<'_>, tf1: &Transform, terrain: &Terrain, tf2: &Transform) {
        let local_tf = tf2.inverse().combine(tf1);
        let local_bounds = convex_aabb(convex, &local_tf).loosened(CONTACT_PERSISTENCE_THRESHOLD);
        let Some((cells_x, cells_z)) = terrain.cells_overlapping(&local_bounds) else {
            return;
        };
        let samples_z = terrain.samples().1;

        for i in cells_x {
            for j in cells_z.clone() {
                for (k, upper) in [false, true].into_iter().enumerate() {
                    let local = terrain.triangle(i, j, upper);
                    let vertices = local.map(|v| tf2.transform_point(v));
                    let [a, b, c] = vertices;
                    let triangle = Triangle {
                        vertices,
                        normal: (c - a).cross(b - a).normalize(),
                    };
                    let index = ((i * (samples_z - 1) + j) * 2 + k) as u32;

                    match shape {
                        ColliderShape::Sphere(sphere) => {
                            self.sphere_feature(&triangle, tf1.position, sphere.radius, feature_id(index, 0));
                        }
                        ColliderShape::Capsule(capsule) => {
                            let (p, q) = capsule.segment();
                            self.sphere_feature(&triangle, tf1.transform_point(p), capsule.radius, feature_id(index, 1));
                            self.sphere_feature(&triangle, tf1.transform_point(q), capsule.radius, feature_id(index, 2));
                            self.convex_feature(convex, tf1, &triangle, feature_id(index, 0));
                        }
                        ColliderShape::Box(cuboid) => {
                            for corner in 0..8 {
                                let world = tf1.transform_point(cuboid.vertex(corner));
                                self.corner_feature(&triangle, world, feature_id(index, corner as u32 + 1));
                            }
                            self.convex_feature(convex, tf1, &triangle, feature_id(index, 0));
                        }
                        _ => self.convex_feature(convex, tf1, &triangle, feature_id(index, 0)),
                    }
                }
            }
        }
    }

    /// Drops edge and vertex contacts of a sphere feature that already touches
    /// some face interior. Those come from neighbours of the face the sphere
    /// rests on.
    fn drop_shadowed_edges(&mut self) {
        let faces = self
            .candidates
            .iter()
            .filter(|c| !c.on_edge)
            .fold(0u32, |mask, c| mask | 1 << (c.id & 0xf));
        self.candidates
            .retain(|c| !c.on_edge || faces & (1 << (c.id & 0xf)) == 0);
    }

    /// Keeps the deepest candidate, then greedily the candidates farthest from
    /// those already kept.
    fn emit(&mut self, result: &mut DetectorResult, max_points: usize) {
        self.candidates.sort_by(|a, b| b.depth.total_cmp(&a.depth));
        let Some(deepest) = self.candidates.first().copied() else {
            return;
        };
        if deepest.depth < 0.0 {
            return;
        }
        let normal = deepest.normal;
        result.normal = -normal;

        let mut kept: ArrayVec<Candidate, MAX_MANIFOLD_POINTS> = ArrayVec::new();
        kept.push(deepest);
        while kept.len() < max_points {
            let farthest = self
                .candidates
                .iter()
                .map(|c| {
                    let spread = kept
                        .iter()
                        .map(|k| (k.point - c.point).length_squared())
                        .fold(Real::MAX, Real::min);
                    (spread, *c)
                })
                .filter(|(spread, _)| *spread > MERGE_DISTANCE * MERGE_DISTANCE)
                .max_by(|a, b| a.0.total_cmp(&b.0));
            match farthest {
                Some((_, candidate)) => kept.push(candidate),
                None => break,
            }
        }

        for candidate in kept {
            result.add_point(
                candidate.point,
                candidate.point + normal * candidate.depth,
                candidate.depth,
                candidate.id,
            );
        }
    }
}

impl Detector for ConvexTerrainDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        _cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        let ColliderShape::Terrain(terrain) = shape2 else {
            return Ok(());
        };
        let Some(convex) = shape1.as_convex() else {
            return Ok(());
        };
        self.candidates.clear();
        self.collect(shape1, &convex, tf1, terrain, tf2);
        self.drop_shadowed_edges();

        let max_points = match shape1 {
            ColliderShape::Sphere(_) | ColliderShape::Capsule(_) | ColliderShape::Box(_) => MAX_MANIFOLD_POINTS,
            _ => {
                result.incremental = true;
                1
            }
        };
        self.emit(result, max_points);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::geometry::{Capsule, Cuboid, Cylinder, Sphere},
        utils::math::Quat,
    };
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

    /// 11 x 11 samples one unit apart, `height(x, z)` evaluated at each sample.
    fn ground(height: impl Fn(Real, Real) -> Real) -> ColliderShape {
        let rows = (0..11)
            .map(|i| (0..11).map(|j| height(i as Real - 5.0, j as Real - 5.0)).collect())
            .collect();
        ColliderShape::Terrain(Terrain::new(rows, 1.0).unwrap())
    }

    fn flat_ground() -> ColliderShape {
        ground(|_, _| 0.0)
    }

    fn detect_on(terrain: &ColliderShape, shape: &ColliderShape, tf: &Transform) -> DetectorResult {
        let mut detector = ConvexTerrainDetector::default();
        let mut result = DetectorResult::default();
        detector
            .detect_impl(
                &mut result,
                shape,
                terrain,
                tf,
                &Transform::IDENTITY,
                &mut CachedDetectorData::default(),
            )
            .unwrap();
        result
    }

    fn detect(shape: &ColliderShape, tf: &Transform) -> DetectorResult {
        detect_on(&flat_ground(), shape, tf)
    }

    #[test]
    fn sphere_sinking_into_flat_ground() {
        let result = detect(
            &ColliderShape::Sphere(Sphere { radius: 0.5 }),
            &Transform::from_position(Vec3::new(1.0, 0.4, -2.0)),
        );
        assert_eq!(result.num_points(), 1);
        assert!((result.normal - Vec3::NEG_Y).length() < 1e-12);
        let p = result.points[0];
        assert!((p.depth - 0.1).abs() < 1e-12);
        assert!((p.position1 - Vec3::new(1.0, -0.1, -2.0)).length() < 1e-12);
        assert!((p.position2 - Vec3::new(1.0, 0.0, -2.0)).length() < 1e-12);
    }

    #[test]
    fn box_reports_its_four_bottom_corners() {
        let result = detect(
            &ColliderShape::Box(Cuboid {
                half_extents: Vec3::splat(0.5),
            }),
            &Transform::from_position(Vec3::new(0.0, 0.49, 0.0)),
        );
        assert_eq!(result.num_points(), 4);
        assert!(!result.incremental);
        assert!((result.normal - Vec3::NEG_Y).length() < 1e-4);
        for p in &result.points {
            assert!((p.depth - 0.01).abs() < 1e-5);
            assert!((p.position1.y + 0.01).abs() < 1e-5);
        }
        // the kept points span the whole bottom face
        let spread = result.points.iter().map(|p| p.position1.x).fold(Real::MIN, Real::max)
            - result.points.iter().map(|p| p.position1.x).fold(Real::MAX, Real::min);
        assert!(spread > 0.85, "spread {spread}");
    }

    #[test]
    fn hovering_capsule_has_no_contact() {
        let result = detect(
            &ColliderShape::Capsule(Capsule {
                radius: 0.25,
                half_height: 0.5,
            }),
            &Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
        );
        assert_eq!(result.num_points(), 0);
    }

    #[test]
    fn cylinder_reports_a_single_deepest_point() {
        let result = detect(
            &ColliderShape::Cylinder(Cylinder {
                radius: 0.5,
                half_height: 1.0,
            }),
            &Transform::from_position(Vec3::new(0.0, 0.95, 0.0)),
        );
        assert!(result.incremental);
        assert_eq!(result.num_points(), 1);
        assert!((result.points[0].depth - 0.05).abs() < 1e-6);
    }

    #[test]
    fn peak_under_a_box_face_is_detected() {
        let terrain = ground(|x, z| if x == 0.0 && z == 0.0 { 0.8 } else { 0.0 });
        let result = detect_on(
            &terrain,
            &ColliderShape::Box(Cuboid {
                half_extents: Vec3::ONE,
            }),
            &Transform::from_position(Vec3::new(0.0, 1.05, 0.0)),
        );
        // every corner hangs over flat ground above the surface; only the peak touches
        assert!(result.num_points() >= 1);
        assert!((result.max_depth() - 0.75).abs() < 1e-3, "depth {}", result.max_depth());
        assert!(result.normal.y < -0.99, "normal {:?}", result.normal);
    }

    #[test]
    fn ridge_under_a_lying_capsule_is_detected() {
        let terrain = ground(|x, _| if x == 0.0 { 0.3 } else { 0.0 });
        let result = detect_on(
            &terrain,
            &ColliderShape::Capsule(Capsule {
                radius: 0.25,
                half_height: 0.5,
            }),
            &Transform::from_position_rotation(Vec3::new(0.0, 0.5, 0.0), Quat::from_rotation_z(FRAC_PI_2)),
        );
        // both end caps are clear of the slopes; the side rests on the ridge line
        assert!(result.num_points() >= 1);
        assert!(result.max_depth() > 0.04, "depth {}", result.max_depth());
        assert!(result.normal.y < -0.9);
        for p in &result.points {
            assert!(p.position1.x.abs() < 0.2, "contact away from the ridge: {:?}", p.position1);
        }
    }

    #[test]
    fn sphere_in_a_valley_touches_both_slopes() {
        let terrain = ground(|x, _| x.abs());
        let result = detect_on(
            &terrain,
            &ColliderShape::Sphere(Sphere { radius: 0.5 }),
            &Transform::from_position(Vec3::new(0.0, 0.6, 0.0)),
        );
        assert_eq!(result.num_points(), 2);
        let expected_depth = 0.5 - 0.6 * FRAC_1_SQRT_2;
        for p in &result.points {
            assert!((p.depth - expected_depth).abs() < 1e-9, "depth {}", p.depth);
            assert!((p.position1.x.abs() - 0.5 * FRAC_1_SQRT_2).abs() < 1e-9);
        }
        assert!(result.points[0].position1.x * result.points[1].position1.x < 0.0);
    }

    #[test]
    fn box_resting_on_a_slope_uses_the_slope_normal() {
        let slope = 0.5;
        let terrain = ground(|x, _| slope * x);
        let angle = Real::atan(slope);
        let up = Vec3::new(-angle.sin(), angle.cos(), 0.0);
        let result = detect_on(
            &terrain,
            &ColliderShape::Box(Cuboid {
                half_extents: Vec3::splat(0.5),
            }),
            &Transform::from_position_rotation(up * 0.49, Quat::from_rotation_z(angle)),
        );
        assert_eq!(result.num_points(), 4);
        assert!((result.normal + up).length() < 1e-4, "normal {:?}", result.normal);
        for p in &result.points {
            assert!((p.depth - 0.01).abs() < 1e-5, "depth {}", p.depth);
        }
    }
}
