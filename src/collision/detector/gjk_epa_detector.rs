use super::{
    gjk::{GjkCache, GjkEpa},
    CachedDetectorData, Detector, DetectorResult,
};
use crate::{
    config::ENABLE_GJK_CACHING,
    core::{collider::ColliderShape, geometry::ConvexGeometry, types::Transform},
    error::GjkEpaError,
    utils::math::Vec3,
};

/// Generic convex detector: GJK on the shape cores, EPA when the cores
/// overlap, margins added back afterwards. Reports one point per call.
#[derive(Debug, Clone)]
pub struct GjkEpaDetector {
    engine: GjkEpa,
    use_cache: bool,
}

impl Default for GjkEpaDetector {
    fn default() -> Self {
        Self::new(ENABLE_GJK_CACHING)
    }
}

impl GjkEpaDetector {
    pub fn new(use_cache: bool) -> Self {
        Self {
            engine: GjkEpa::new(),
            use_cache,
        }
    }
}

impl Detector for GjkEpaDetector {
    fn detect_impl(
        &mut self,
        result: &mut DetectorResult,
        shape1: &ColliderShape,
        shape2: &ColliderShape,
        tf1: &Transform,
        tf2: &Transform,
        cache: &mut CachedDetectorData,
    ) -> Result<(), GjkEpaError> {
        let (Some(c1), Some(c2)) = (shape1.as_convex(), shape2.as_convex()) else {
            return Ok(());
        };
        result.incremental = true;

        let gjk_cache = if self.use_cache {
            Some(cache.gjk.get_or_insert(GjkCache {
                closest_dir: Vec3::ZERO,
            }))
        } else {
            None
        };

        let closest = self
            .engine
            .compute_closest_points(&c1, &c2, tf1, tf2, gjk_cache, true)?;

        let margin1 = c1.gjk_margin();
        let margin2 = c2.gjk_margin();
        if closest.distance > margin1 + margin2 {
            return Ok(());
        }

        let normal = closest.normal;
        let position1 = closest.point1 + normal * margin1;
        let position2 = closest.point2 - normal * margin2;
        result.normal = normal;
        result.add_point(position1, position2, margin1 + margin2 - closest.distance, 0);
        Ok(())
    }
}
