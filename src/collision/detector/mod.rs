//! Narrow-phase detectors and the geometry-kind dispatch table.

pub mod box_box;
pub mod epa;
pub mod gjk;
pub mod gjk_epa_detector;
pub mod sphere;
pub mod terrain;

use arrayvec::ArrayVec;
use std::fmt;

use crate::{
    config::{ENABLE_GJK_CACHING, MAX_MANIFOLD_POINTS},
    core::{collider::ColliderShape, geometry::GeometryKind, types::Transform},
    error::GjkEpaError,
    utils::math::{Real, Vec3},
};

pub use box_box::BoxBoxDetector;
pub use gjk::{GjkCache, GjkEpa};
pub use gjk_epa_detector::GjkEpaDetector;
pub use sphere::{CapsuleCapsuleDetector, SphereBoxDetector, SphereCapsuleDetector, SphereSphereDetector};
pub use terrain::ConvexTerrainDetector;

/// One contact point produced by a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorResultPoint {
    /// Point on the surface of shape 1, world space.
    pub position1: Vec3,
    /// Point on the surface of shape 2, world space.
    pub position2: Vec3,
    /// Positive when penetrating; equals `(position1 - position2) . normal`.
    pub depth: Real,
    /// Feature id, stable across frames for the same contact feature.
    pub id: u32,
}

/// Output of one `detect` call.
#[derive(Debug, Clone)]
pub struct DetectorResult {
    pub points: ArrayVec<DetectorResultPoint, MAX_MANIFOLD_POINTS>,
    /// Shared normal, pointing from shape 1 towards shape 2.
    pub normal: Vec3,
    /// `true` when only one refined point is reported per call.
    pub incremental: bool,
}

impl Default for DetectorResult {
    fn default() -> Self {
        Self {
            points: ArrayVec::new(),
            normal: Vec3::ZERO,
            incremental: false,
        }
    }
}

impl DetectorResult {
    pub fn clear(&mut self) {
        self.points.clear();
        self.normal = Vec3::ZERO;
        self.incremental = false;
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn is_touching(&self) -> bool {
        !self.points.is_empty()
    }

    /// Appends a point; extra points beyond the capacity are dropped.
    pub fn add_point(&mut self, position1: Vec3, position2: Vec3, depth: Real, id: u32) {
        let _ = self.points.try_push(DetectorResultPoint {
            position1,
            position2,
            depth,
            id,
        });
    }

    pub fn max_depth(&self) -> Real {
        self.points
            .iter()
            .map(|p| p.depth)
            .fold(0.0, Real::max)
    }

    /// Converts a result computed for (shape2, shape1) into one for (shape1, shape2).
    fn swap_sides(&mut self) {
        self.normal = -self.normal;
        for p in &mut self.points {
            std::mem::swap(&mut p.position1, &mut p.position2);
        }
    }
}

/// Per-contact state a detector may keep between frames.
#[derive(Debug, Clone, Default)]
pub struct CachedDetectorData {
    pub gjk: Option<GjkCache>,
}

impl CachedDetectorData {
    pub fn clear(&mut self) {
        self.gjk = None;
    }
}

/// A narrow-phase strategy for one canonical pair of geometry kinds.
///
/// Implementations receive the shapes in table order and must write the
/// normal from `shape1` towards `shape2`.
pub trait Detector: fmt::Debug + Send {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    SphereSphere = 0,
    SphereBox = 1,
    SphereCapsule = 2,
    CapsuleCapsule = 3,
    BoxBox = 4,
    GjkEpa = 5,
    ConvexTerrain = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableEntry {
    strategy: Strategy,
    swapped: bool,
}

/// Fixed table from a pair of geometry kinds to a detector.
#[derive(Debug)]
pub struct CollisionMatrix {
    table: [[Option<TableEntry>; GeometryKind::COUNT]; GeometryKind::COUNT],
    detectors: Vec<Box<dyn Detector>>,
}

impl Default for CollisionMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionMatrix {
    pub fn new() -> Self {
        Self::with_gjk_caching(ENABLE_GJK_CACHING)
    }

    /// Table whose GJK/EPA detector does or does not reuse the last simplex.
    pub fn with_gjk_caching(use_cache: bool) -> Self {
        let detectors: Vec<Box<dyn Detector>> = vec![
            Box::new(SphereSphereDetector),
            Box::new(SphereBoxDetector),
            Box::new(SphereCapsuleDetector),
            Box::new(CapsuleCapsuleDetector),
            Box::new(BoxBoxDetector::default()),
            Box::new(GjkEpaDetector::new(use_cache)),
            Box::new(ConvexTerrainDetector::default()),
        ];

        let mut table = [[None; GeometryKind::COUNT]; GeometryKind::COUNT];
        for k1 in GeometryKind::ALL {
            for k2 in GeometryKind::ALL {
                let (lo, hi) = if k1.index() <= k2.index() {
                    (k1, k2)
                } else {
                    (k2, k1)
                };
                table[k1.index()][k2.index()] =
                    Self::canonical_strategy(lo, hi).map(|strategy| TableEntry {
                        strategy,
                        swapped: k1.index() > k2.index(),
                    });
            }
        }

        Self { table, detectors }
    }

    fn canonical_strategy(lo: GeometryKind, hi: GeometryKind) -> Option<Strategy> {
        use GeometryKind::*;
        Some(match (lo, hi) {
            (Terrain, Terrain) => return None,
            (_, Terrain) => Strategy::ConvexTerrain,
            (Sphere, Sphere) => Strategy::SphereSphere,
            (Sphere, Box) => Strategy::SphereBox,
            (Sphere, Capsule) => Strategy::SphereCapsule,
            (Capsule, Capsule) => Strategy::CapsuleCapsule,
            (Box, Box) => Strategy::BoxBox,
            _ => Strategy::GjkEpa,
        })
    }

    /// Whether any detector handles this pair of kinds.
    pub fn has_detector(&self, kind1: GeometryKind, kind2: GeometryKind) -> bool {
        self.table[kind1.index()][kind2.index()].is_some()
    }

    /// Clears `result` and runs the detector registered for the pair.
    ///
    /// Pairs without a detector leave the result empty.
    pub fn detect(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        result.clear();
        let Some(entry) = self.table[shape1.kind().index()][shape2.kind().index()] else {
            return Ok(());
        };
        let detector = &mut self.detectors[entry.strategy as usize];
        if entry.swapped {
            let outcome = detector.detect_impl(result, shape2, shape1, tf2, tf1, cache);
            result.swap_sides();
            outcome
        } else {
            detector.detect_impl(result, shape1, shape2, tf1, tf2, cache)
        }
    }
}
