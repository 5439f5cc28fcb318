//! Separating-axis box-box detector with reference-face clipping.

use super::{CachedDetectorData, Detector, DetectorResult};
use crate::{
    collision::clipping::FaceClipper,
    config::CONTACT_PERSISTENCE_THRESHOLD,
    core::{collider::ColliderShape, types::Transform},
    error::GjkEpaError,
    utils::math::{closest_segment_params, Real, Vec3},
};

/// Edge axes must beat the best face axis by this much to be chosen.
const EDGE_BIAS: Real = 1e-3;
const PARALLEL_EPS: Real = 1e-9;

/// World-space view of a box: centre, unit axes and half extents.
#[derive(Debug, Clone, Copy)]
struct OrientedBox {
    center: Vec3,
    axes: [Vec3; 3],
    half: [Real; 3],
}

impl OrientedBox {
    fn new(half_extents: Vec3, tf: &Transform) -> Self {
        let basis = tf.basis();
        Self {
            center: tf.position,
            axes: [basis.x_axis, basis.y_axis, basis.z_axis],
            half: [half_extents.x, half_extents.y, half_extents.z],
        }
    }

    fn scaled_axis(&self, i: usize) -> Vec3 {
        self.axes[i] * self.half[i]
    }

    /// Half length of the projection onto `axis`.
    fn project(&self, axis: Vec3) -> Real {
        (0..3).map(|i| self.scaled_axis(i).dot(axis).abs()).sum()
    }
}

/// Box-box detector. Reports up to four points, rebuilt every call.
#[derive(Debug, Clone, Default)]
pub struct BoxBoxDetector {
    clipper: FaceClipper,
}

impl BoxBoxDetector {
    fn edge_contact(
        result: &mut DetectorResult,
        b1: &OrientedBox,
        b2: &OrientedBox,
        i: usize,
        j: usize,
        normal: Vec3,
    ) {
        // edge of box 1 closest to box 2 along the normal, and vice versa
        let mut center1 = b1.center;
        let mut center2 = b2.center;
        for k in 0..3 {
            if k != i {
                let s = b1.scaled_axis(k);
                center1 += if s.dot(normal) > 0.0 { s } else { -s };
            }
            if k != j {
                let s = b2.scaled_axis(k);
                center2 += if s.dot(normal) < 0.0 { s } else { -s };
            }
        }
        let e1 = b1.scaled_axis(i);
        let e2 = b2.scaled_axis(j);
        let (s, t) = closest_segment_params(center1 - e1, center1 + e1, center2 - e2, center2 + e2);
        let p1 = center1 - e1 + e1 * (2.0 * s);
        let p2 = center2 - e2 + e2 * (2.0 * t);
        result.normal = normal;
        result.add_point(p1, p2, (p1 - p2).dot(normal), 6 + (i * 3 + j) as u32);
    }

    #[allow(clippy::too_many_arguments)]
    fn face_contact(
        &mut self,
        result: &mut DetectorResult,
        reference: &OrientedBox,
        incident: &OrientedBox,
        ref_axis: usize,
        ref_normal: Vec3,
        reference_is_first: bool,
        normal: Vec3,
    ) {
        let ref_center = reference.center + ref_normal * reference.half[ref_axis];
        let u_axis = (ref_axis + 1) % 3;
        let v_axis = (ref_axis + 2) % 3;
        let u = reference.axes[u_axis];
        let v = reference.axes[v_axis];

        // incident face: most anti-parallel to the reference normal
        let mut inc_axis = 0;
        let mut inc_dot = Real::MAX;
        let mut inc_sign = 1.0;
        for k in 0..3 {
            let d = incident.axes[k].dot(ref_normal);
            if d < inc_dot {
                inc_dot = d;
                inc_axis = k;
                inc_sign = 1.0;
            }
            if -d < inc_dot {
                inc_dot = -d;
                inc_axis = k;
                inc_sign = -1.0;
            }
        }
        let inc_center = incident.center + incident.scaled_axis(inc_axis) * inc_sign;
        let a = incident.scaled_axis((inc_axis + 1) % 3);
        let b = incident.scaled_axis((inc_axis + 2) % 3);
        let incident_vertices = [
            inc_center + a + b,
            inc_center - a + b,
            inc_center - a - b,
            inc_center + a - b,
        ];

        self.clipper
            .init(reference.half[u_axis], reference.half[v_axis]);
        for (index, p) in incident_vertices.iter().enumerate() {
            let rel = *p - ref_center;
            self.clipper
                .add_vertex(Vec3::new(rel.dot(u), rel.dot(v), rel.dot(ref_normal)), index as u32);
        }
        self.clipper.clip();
        self.clipper.reduce();

        let ref_face = ref_axis as u32 * 2 + u32::from(ref_normal.dot(reference.axes[ref_axis]) > 0.0);
        let inc_face = inc_axis as u32 * 2 + u32::from(inc_sign > 0.0);
        let face_id = ((u32::from(!reference_is_first) * 6 + ref_face) << 8) | (inc_face << 12);

        result.normal = normal;
        for vertex in self.clipper.vertices() {
            let depth = -vertex.local.z;
            if depth <= -CONTACT_PERSISTENCE_THRESHOLD {
                continue;
            }
            let on_incident = ref_center + u * vertex.local.x + v * vertex.local.y + ref_normal * vertex.local.z;
            let on_reference = on_incident - ref_normal * vertex.local.z;
            let (p1, p2) = if reference_is_first {
                (on_reference, on_incident)
            } else {
                (on_incident, on_reference)
            };
            result.add_point(p1, p2, depth, vertex.id | face_id);
        }
    }
}

impl Detector for BoxBoxDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        _cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        let (ColliderShape::Box(box1), ColliderShape::Box(box2)) = (shape1, shape2) else {
            return Ok(());
        };
        let b1 = OrientedBox::new(box1.half_extents, tf1);
        let b2 = OrientedBox::new(box2.half_extents, tf2);
        let d = b2.center - b1.center;

        let mut min_overlap = Real::MAX;
        let mut min_index = usize::MAX;
        let mut min_normal = Vec3::ZERO;

        for (offset, owner) in [(0usize, &b1), (3usize, &b2)] {
            for k in 0..3 {
                let axis = owner.axes[k];
                let distance = d.dot(axis);
                let overlap = b1.project(axis) + b2.project(axis) - distance.abs();
                if overlap < 0.0 {
                    return Ok(());
                }
                if overlap < min_overlap {
                    min_overlap = overlap;
                    min_index = offset + k;
                    min_normal = if distance < 0.0 { -axis } else { axis };
                }
            }
        }

        let face_overlap = min_overlap;
        for i in 0..3 {
            for j in 0..3 {
                let axis = b1.axes[i].cross(b2.axes[j]);
                let len = axis.length();
                if len < PARALLEL_EPS {
                    continue;
                }
                let axis = axis / len;
                let distance = d.dot(axis);
                let overlap = b1.project(axis) + b2.project(axis) - distance.abs();
                if overlap < 0.0 {
                    return Ok(());
                }
                if overlap < face_overlap - EDGE_BIAS && overlap < min_overlap {
                    min_overlap = overlap;
                    min_index = 6 + i * 3 + j;
                    min_normal = if distance < 0.0 { -axis } else { axis };
                }
            }
        }

        match min_index {
            0..=2 => self.face_contact(result, &b1, &b2, min_index, min_normal, true, min_normal),
            3..=5 => self.face_contact(
                result,
                &b2,
                &b1,
                min_index - 3,
                -min_normal,
                false,
                min_normal,
            ),
            6..=14 => {
                let edge = min_index - 6;
                Self::edge_contact(result, &b1, &b2, edge / 3, edge % 3, min_normal);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::geometry::Cuboid, utils::math::Quat};

    fn boxed(half: Vec3) -> ColliderShape {
        ColliderShape::Box(Cuboid { half_extents: half })
    }

    fn detect(s1: &ColliderShape, s2: &ColliderShape, tf1: &Transform, tf2: &Transform) -> DetectorResult {
        let mut detector = BoxBoxDetector::default();
        let mut result = DetectorResult::default();
        detector
            .detect_impl(&mut result, s1, s2, tf1, tf2, &mut CachedDetectorData::default())
            .unwrap();
        result
    }

    #[test]
    fn box_on_ground_yields_four_corner_points() {
        let result = detect(
            &boxed(Vec3::ONE),
            &boxed(Vec3::new(5.0, 0.5, 5.0)),
            &Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
            &Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
        );
        assert_eq!(result.num_points(), 4);
        assert!((result.normal - Vec3::NEG_Y).length() < 1e-12);
        for p in &result.points {
            assert!(p.depth.abs() < 1e-9);
            assert!((p.position1.x.abs() - 1.0).abs() < 1e-9);
            assert!((p.position1.z.abs() - 1.0).abs() < 1e-9);
            assert!(p.position1.y.abs() < 1e-9);
        }
    }

    #[test]
    fn separated_boxes_report_nothing() {
        let result = detect(
            &boxed(Vec3::ONE),
            &boxed(Vec3::ONE),
            &Transform::IDENTITY,
            &Transform::from_position(Vec3::new(2.01, 0.0, 0.0)),
        );
        assert_eq!(result.num_points(), 0);
    }

    #[test]
    fn crossed_edges_give_single_point() {
        let tilt1 = Quat::from_rotation_z(std::f64::consts::FRAC_PI_4);
        let tilt2 = Quat::from_rotation_x(std::f64::consts::FRAC_PI_4);
        let gap = 2.0 * std::f64::consts::SQRT_2 - 0.1;
        let result = detect(
            &boxed(Vec3::ONE),
            &boxed(Vec3::ONE),
            &Transform::from_position_rotation(Vec3::ZERO, tilt1),
            &Transform::from_position_rotation(Vec3::new(0.0, gap, 0.0), tilt2),
        );
        assert_eq!(result.num_points(), 1);
        assert!((result.points[0].depth - 0.1).abs() < 1e-9);
        assert!((result.normal - Vec3::Y).length() < 1e-9);
    }
}
