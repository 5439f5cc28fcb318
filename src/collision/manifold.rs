//! Persistent contact manifolds.

use arrayvec::ArrayVec;

use crate::{
    collision::detector::{DetectorResult, DetectorResultPoint},
    config::MAX_MANIFOLD_POINTS,
    core::types::Transform,
    utils::math::{orthonormal_basis, Real, Vec3},
};

/// One persistent contact point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifoldPoint {
    /// Anchor on shape 1 in body 1's frame.
    pub local_pos1: Vec3,
    /// Anchor on shape 2 in body 2's frame.
    pub local_pos2: Vec3,
    pub pos1: Vec3,
    pub pos2: Vec3,
    /// World offsets from the body centres.
    pub rel_pos1: Vec3,
    pub rel_pos2: Vec3,
    pub depth: Real,
    pub normal_impulse: Real,
    pub tangent_impulse: Real,
    pub binormal_impulse: Real,
    /// Set when the point carried impulses over from the previous step.
    pub warm_started: bool,
    pub id: u32,
}

impl ManifoldPoint {
    fn from_result(point: &DetectorResultPoint, tf1: &Transform, tf2: &Transform) -> Self {
        let mut p = Self {
            local_pos1: Vec3::ZERO,
            local_pos2: Vec3::ZERO,
            pos1: Vec3::ZERO,
            pos2: Vec3::ZERO,
            rel_pos1: Vec3::ZERO,
            rel_pos2: Vec3::ZERO,
            depth: 0.0,
            normal_impulse: 0.0,
            tangent_impulse: 0.0,
            binormal_impulse: 0.0,
            warm_started: false,
            id: point.id,
        };
        p.assign(point, tf1, tf2);
        p
    }

    /// Moves the point to a freshly detected location, keeping impulses.
    fn assign(&mut self, point: &DetectorResultPoint, tf1: &Transform, tf2: &Transform) {
        self.pos1 = point.position1;
        self.pos2 = point.position2;
        self.rel_pos1 = point.position1 - tf1.position;
        self.rel_pos2 = point.position2 - tf2.position;
        self.local_pos1 = tf1.inverse_transform_vector(self.rel_pos1);
        self.local_pos2 = tf2.inverse_transform_vector(self.rel_pos2);
        self.depth = point.depth;
        self.id = point.id;
    }

    fn copy_impulses(&mut self, other: &ManifoldPoint) {
        self.normal_impulse = other.normal_impulse;
        self.tangent_impulse = other.tangent_impulse;
        self.binormal_impulse = other.binormal_impulse;
        self.warm_started = true;
    }

    fn clear_impulses(&mut self) {
        self.normal_impulse = 0.0;
        self.tangent_impulse = 0.0;
        self.binormal_impulse = 0.0;
        self.warm_started = false;
    }
}

/// Up to four contact points sharing a normal and tangent basis.
///
/// Body transforms passed to the update functions are the transforms of the
/// bodies owning the two shapes; anchors are stored in those frames so the
/// position solvers can follow bodies as they move.
#[derive(Debug, Clone)]
pub struct Manifold {
    pub normal: Vec3,
    pub tangent: Vec3,
    pub binormal: Vec3,
    points: ArrayVec<ManifoldPoint, MAX_MANIFOLD_POINTS>,
    persistence_threshold: Real,
}

impl Default for Manifold {
    fn default() -> Self {
        Self::new(crate::config::CONTACT_PERSISTENCE_THRESHOLD)
    }
}

impl Manifold {
    pub fn new(persistence_threshold: Real) -> Self {
        Self {
            normal: Vec3::ZERO,
            tangent: Vec3::ZERO,
            binormal: Vec3::ZERO,
            points: ArrayVec::new(),
            persistence_threshold,
        }
    }

    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points
    }

    pub(crate) fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn set_persistence_threshold(&mut self, threshold: Real) {
        self.persistence_threshold = threshold;
    }

    /// Sets the normal and derives the tangent and binormal from it.
    pub fn build_basis(&mut self, normal: Vec3) {
        self.normal = normal;
        let (tangent, binormal) = orthonormal_basis(normal);
        self.tangent = tangent;
        self.binormal = binormal;
    }

    /// Recomputes world positions and depths from the stored anchors.
    pub fn update_depths_and_positions(&mut self, tf1: &Transform, tf2: &Transform) {
        let normal = self.normal;
        for p in &mut self.points {
            p.rel_pos1 = tf1.transform_vector(p.local_pos1);
            p.rel_pos2 = tf2.transform_vector(p.local_pos2);
            p.pos1 = tf1.position + p.rel_pos1;
            p.pos2 = tf2.position + p.rel_pos2;
            p.depth = (p.pos1 - p.pos2).dot(normal);
        }
    }

    /// Merges a single refined point into the existing ones.
    pub fn incremental_update(&mut self, result: &DetectorResult, tf1: &Transform, tf2: &Transform) {
        self.update_depths_and_positions(tf1, tf2);
        for p in &mut self.points {
            p.warm_started = true;
        }

        if let Some(new_point) = result.points.first() {
            match self.find_nearest(new_point, tf1, tf2) {
                Some(index) => self.points[index].assign(new_point, tf1, tf2),
                None => self.add_point(ManifoldPoint::from_result(new_point, tf1, tf2)),
            }
        }

        self.remove_outdated_points();
    }

    /// Rebuilds the manifold from a full detector result, carrying impulses
    /// over to points whose id was already present.
    pub fn total_update(&mut self, result: &DetectorResult, tf1: &Transform, tf2: &Transform) {
        let previous = std::mem::take(&mut self.points);
        for point in &result.points {
            let mut p = ManifoldPoint::from_result(point, tf1, tf2);
            match previous.iter().find(|old| old.id == p.id) {
                Some(old) => p.copy_impulses(old),
                None => p.clear_impulses(),
            }
            let _ = self.points.try_push(p);
        }
    }

    fn find_nearest(&self, point: &DetectorResultPoint, tf1: &Transform, tf2: &Transform) -> Option<usize> {
        let rel1 = point.position1 - tf1.position;
        let rel2 = point.position2 - tf2.position;
        let limit = self.persistence_threshold * self.persistence_threshold;
        let mut best = None;
        let mut best_distance = limit;
        for (i, p) in self.points.iter().enumerate() {
            let d1 = (p.rel_pos1 - rel1).length_squared();
            let d2 = (p.rel_pos2 - rel2).length_squared();
            let d = d1.min(d2);
            if d < best_distance {
                best_distance = d;
                best = Some(i);
            }
        }
        best
    }

    fn add_point(&mut self, point: ManifoldPoint) {
        if !self.points.is_full() {
            self.points.push(point);
            return;
        }
        if let Some(index) = self.replacement_index(&point) {
            self.points[index] = point;
        }
    }

    /// Chooses which point the candidate replaces so the remaining four span
    /// the largest area. The deepest point is never removed; `None` means the
    /// candidate itself is the one to drop.
    fn replacement_index(&self, candidate: &ManifoldPoint) -> Option<usize> {
        let p: [Vec3; 4] = [
            self.points[0].rel_pos1,
            self.points[1].rel_pos1,
            self.points[2].rel_pos1,
            self.points[3].rel_pos1,
        ];
        let c = candidate.rel_pos1;

        let mut deepest = None;
        let mut max_depth = candidate.depth;
        for (i, point) in self.points.iter().enumerate() {
            if point.depth > max_depth {
                max_depth = point.depth;
                deepest = Some(i);
            }
        }

        let mut areas = [
            quad_area(c, p[1], p[2], p[3]),
            quad_area(p[0], c, p[2], p[3]),
            quad_area(p[0], p[1], c, p[3]),
            quad_area(p[0], p[1], p[2], c),
        ];
        if let Some(i) = deepest {
            areas[i] = -1.0;
        }
        let keep_existing = if deepest.is_some() {
            quad_area(p[0], p[1], p[2], p[3])
        } else {
            -1.0
        };

        let (best, best_area) = areas
            .iter()
            .copied()
            .enumerate()
            .fold((0, Real::MIN), |acc, (i, a)| if a > acc.1 { (i, a) } else { acc });
        if keep_existing > best_area {
            None
        } else {
            Some(best)
        }
    }

    /// Drops points that separated or slid beyond the persistence threshold.
    fn remove_outdated_points(&mut self) {
        let threshold = self.persistence_threshold;
        let normal = self.normal;
        self.points.retain(|p| {
            if p.depth < -threshold {
                return false;
            }
            let diff = p.pos1 - p.pos2;
            let tangential = diff - normal * diff.dot(normal);
            tangential.length_squared() <= threshold * threshold
        });
    }
}

/// Squared area measure of the quad spanned by four points, whatever their order.
fn quad_area(p1: Vec3, p2: Vec3, p3: Vec3, p4: Vec3) -> Real {
    let a = (p2 - p1).cross(p4 - p3).length_squared();
    let b = (p3 - p1).cross(p4 - p2).length_squared();
    let c = (p4 - p1).cross(p3 - p2).length_squared();
    a.max(b).max(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(points: &[(Vec3, Real, u32)]) -> DetectorResult {
        let mut result = DetectorResult::default();
        result.normal = Vec3::NEG_Y;
        for &(p, depth, id) in points {
            result.add_point(p, p + Vec3::Y * depth, depth, id);
        }
        result
    }

    #[test]
    fn total_update_carries_impulses_by_id() {
        let mut manifold = Manifold::default();
        manifold.build_basis(Vec3::NEG_Y);
        let tf = Transform::IDENTITY;
        manifold.total_update(&result_with(&[(Vec3::X, 0.01, 7), (Vec3::Z, 0.01, 9)]), &tf, &tf);
        manifold.points_mut()[0].normal_impulse = 3.0;

        manifold.total_update(&result_with(&[(Vec3::Z, 0.02, 9), (Vec3::X, 0.02, 7)]), &tf, &tf);
        let carried = manifold.points().iter().find(|p| p.id == 7).unwrap();
        assert_eq!(carried.normal_impulse, 3.0);
        assert!(carried.warm_started);

        manifold.total_update(&result_with(&[(Vec3::X, 0.02, 8)]), &tf, &tf);
        assert_eq!(manifold.points()[0].normal_impulse, 0.0);
        assert!(!manifold.points()[0].warm_started);
    }

    #[test]
    fn incremental_update_merges_nearby_points() {
        let mut manifold = Manifold::default();
        manifold.build_basis(Vec3::NEG_Y);
        let tf = Transform::IDENTITY;
        manifold.incremental_update(&result_with(&[(Vec3::X, 0.01, 0)]), &tf, &tf);
        manifold.incremental_update(&result_with(&[(Vec3::X * 1.01, 0.01, 0)]), &tf, &tf);
        assert_eq!(manifold.num_points(), 1);
        manifold.incremental_update(&result_with(&[(Vec3::NEG_X, 0.01, 0)]), &tf, &tf);
        assert_eq!(manifold.num_points(), 2);
    }

    #[test]
    fn separated_points_are_evicted() {
        let mut manifold = Manifold::default();
        manifold.build_basis(Vec3::NEG_Y);
        manifold.incremental_update(
            &result_with(&[(Vec3::X, 0.01, 0)]),
            &Transform::IDENTITY,
            &Transform::IDENTITY,
        );
        // body 1 lifts away along +y, far past the persistence threshold
        let lifted = Transform::from_position(Vec3::new(0.0, 1.0, 0.0));
        manifold.incremental_update(&DetectorResult::default(), &lifted, &Transform::IDENTITY);
        assert_eq!(manifold.num_points(), 0);
    }

    #[test]
    fn fifth_point_keeps_deepest_and_widest() {
        let mut manifold = Manifold::default();
        manifold.build_basis(Vec3::NEG_Y);
        let tf = Transform::IDENTITY;
        let corners = [
            (Vec3::new(1.0, 0.0, 1.0), 0.05),
            (Vec3::new(-1.0, 0.0, 1.0), 0.01),
            (Vec3::new(-1.0, 0.0, -1.0), 0.01),
            (Vec3::new(0.1, 0.0, 0.1), 0.01),
        ];
        for (p, depth) in corners {
            manifold.incremental_update(&result_with(&[(p, depth, 0)]), &tf, &tf);
        }
        assert_eq!(manifold.num_points(), 4);
        manifold.incremental_update(&result_with(&[(Vec3::new(1.0, 0.0, -1.0), 0.01, 0)]), &tf, &tf);
        assert_eq!(manifold.num_points(), 4);
        let has = |q: Vec3| manifold.points().iter().any(|p| (p.pos1 - q).length() < 1e-9);
        assert!(has(Vec3::new(1.0, 0.0, 1.0)));
        assert!(has(Vec3::new(1.0, 0.0, -1.0)));
        assert!(!has(Vec3::new(0.1, 0.0, 0.1)));
    }
}
