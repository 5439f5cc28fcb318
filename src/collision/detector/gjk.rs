//! GJK distance queries, tetrahedron growth for EPA, and the GJK ray cast used
//! by convex sweeps.
//!
//! All queries run in world space on the Minkowski difference `A - B`. Support
//! points carry their witnesses on both shapes so closest points can be
//! recovered from barycentric weights.

use arrayvec::ArrayVec;

use super::epa::Epa;
use crate::{
    config::GJK_MAX_ITERATIONS,
    core::{geometry::ConvexGeometry, types::Transform},
    error::GjkEpaError,
    utils::math::{orthonormal_basis, Real, Vec3},
};

/// Below this distance the cores are considered intersecting.
pub const GJK_PENETRATION_DISTANCE: Real = 1e-8;
const GJK_REL_TOLERANCE: Real = 1e-6;
const GJK_ABS_TOLERANCE: Real = 1e-12;
const DUPLICATE_SUPPORT_EPS: Real = 1e-12;
const CAST_TOLERANCE: Real = 1e-6;

/// Direction that separated the pair on the previous frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GjkCache {
    pub closest_dir: Vec3,
}

/// Point of the Minkowski difference with the support points that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportPoint {
    pub w: Vec3,
    pub p1: Vec3,
    pub p2: Vec3,
}

/// Closest points between two shapes.
///
/// `distance` is negative when the shapes overlap, in which case it is minus
/// the penetration depth found by EPA. `normal` points from shape 1 to shape 2
/// and is zero when the shapes touch and no penetration was requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoints {
    pub point1: Vec3,
    pub point2: Vec3,
    pub distance: Real,
    pub normal: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvexCastHit {
    /// Fraction of the sweep at which the shapes first touch.
    pub toi: Real,
    /// Contact normal pointing from shape 1 to shape 2.
    pub normal: Vec3,
    pub point1: Vec3,
    pub point2: Vec3,
}

pub(crate) fn support<G1, G2>(
    c1: &G1,
    c2: &G2,
    tf1: &Transform,
    tf2: &Transform,
    dir: Vec3,
    with_margin: bool,
) -> SupportPoint
where
    G1: ConvexGeometry + ?Sized,
    G2: ConvexGeometry + ?Sized,
{
    let local1 = tf1.inverse_transform_vector(dir);
    let local2 = tf2.inverse_transform_vector(-dir);
    let (s1, s2) = if with_margin {
        (
            c1.local_supporting_vertex_with_margin(local1),
            c2.local_supporting_vertex_with_margin(local2),
        )
    } else {
        (
            c1.local_supporting_vertex(local1),
            c2.local_supporting_vertex(local2),
        )
    };
    let p1 = tf1.transform_point(s1);
    let p2 = tf2.transform_point(s2);
    SupportPoint { w: p1 - p2, p1, p2 }
}

/// Closest point of a simplex to the origin.
#[derive(Debug, Clone, Copy)]
struct SimplexClosest {
    point: Vec3,
    weights: [Real; 4],
    mask: u8,
}

fn closest_on_segment(a: Vec3, b: Vec3) -> SimplexClosest {
    let ab = b - a;
    let len2 = ab.length_squared();
    let t = if len2 > 0.0 { -a.dot(ab) / len2 } else { 0.0 };
    if t <= 0.0 {
        SimplexClosest {
            point: a,
            weights: [1.0, 0.0, 0.0, 0.0],
            mask: 0b01,
        }
    } else if t >= 1.0 {
        SimplexClosest {
            point: b,
            weights: [0.0, 1.0, 0.0, 0.0],
            mask: 0b10,
        }
    } else {
        SimplexClosest {
            point: a + ab * t,
            weights: [1.0 - t, t, 0.0, 0.0],
            mask: 0b11,
        }
    }
}

fn closest_on_triangle(a: Vec3, b: Vec3, c: Vec3) -> SimplexClosest {
    let ab = b - a;
    let ac = c - a;
    let d1 = ab.dot(-a);
    let d2 = ac.dot(-a);
    if d1 <= 0.0 && d2 <= 0.0 {
        return SimplexClosest {
            point: a,
            weights: [1.0, 0.0, 0.0, 0.0],
            mask: 0b001,
        };
    }

    let d3 = ab.dot(-b);
    let d4 = ac.dot(-b);
    if d3 >= 0.0 && d4 <= d3 {
        return SimplexClosest {
            point: b,
            weights: [0.0, 1.0, 0.0, 0.0],
            mask: 0b010,
        };
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return SimplexClosest {
            point: a + ab * v,
            weights: [1.0 - v, v, 0.0, 0.0],
            mask: 0b011,
        };
    }

    let d5 = ab.dot(-c);
    let d6 = ac.dot(-c);
    if d6 >= 0.0 && d5 <= d6 {
        return SimplexClosest {
            point: c,
            weights: [0.0, 0.0, 1.0, 0.0],
            mask: 0b100,
        };
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return SimplexClosest {
            point: a + ac * w,
            weights: [1.0 - w, 0.0, w, 0.0],
            mask: 0b101,
        };
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return SimplexClosest {
            point: b + (c - b) * w,
            weights: [0.0, 1.0 - w, w, 0.0],
            mask: 0b110,
        };
    }

    let sum = va + vb + vc;
    if sum.abs() < 1e-30 {
        // collinear vertices: the closest edge decides
        return [(0usize, 1usize), (1, 2), (0, 2)]
            .into_iter()
            .map(|(i, j)| {
                let verts = [a, b, c];
                let seg = closest_on_segment(verts[i], verts[j]);
                let mut weights = [0.0; 4];
                weights[i] = seg.weights[0];
                weights[j] = seg.weights[1];
                let mut mask = 0;
                if seg.mask & 1 != 0 {
                    mask |= 1 << i;
                }
                if seg.mask & 2 != 0 {
                    mask |= 1 << j;
                }
                SimplexClosest {
                    point: seg.point,
                    weights,
                    mask,
                }
            })
            .min_by(|x, y| x.point.length_squared().total_cmp(&y.point.length_squared()))
            .unwrap_or(SimplexClosest {
                point: a,
                weights: [1.0, 0.0, 0.0, 0.0],
                mask: 0b001,
            });
    }
    let denom = 1.0 / sum;
    let v = vb * denom;
    let w = vc * denom;
    SimplexClosest {
        point: a + ab * v + ac * w,
        weights: [1.0 - v - w, v, w, 0.0],
        mask: 0b111,
    }
}

fn origin_outside_face(a: Vec3, b: Vec3, c: Vec3, opposite: Vec3) -> bool {
    let n = (b - a).cross(c - a);
    let sign_origin = -a.dot(n);
    let sign_opposite = (opposite - a).dot(n);
    if sign_opposite.abs() < 1e-18 {
        return true;
    }
    sign_origin * sign_opposite < 0.0
}

fn closest_on_tetrahedron(v: [Vec3; 4]) -> SimplexClosest {
    const FACES: [([usize; 3], usize); 4] = [
        ([0, 1, 2], 3),
        ([0, 2, 3], 1),
        ([0, 3, 1], 2),
        ([1, 3, 2], 0),
    ];
    let mut best: Option<SimplexClosest> = None;
    for (face, opposite) in FACES {
        if !origin_outside_face(v[face[0]], v[face[1]], v[face[2]], v[opposite]) {
            continue;
        }
        let tri = closest_on_triangle(v[face[0]], v[face[1]], v[face[2]]);
        let better = best
            .map(|b| tri.point.length_squared() < b.point.length_squared())
            .unwrap_or(true);
        if better {
            let mut weights = [0.0; 4];
            let mut mask = 0;
            for k in 0..3 {
                weights[face[k]] = tri.weights[k];
                if tri.mask & (1 << k) != 0 {
                    mask |= 1 << face[k];
                }
            }
            best = Some(SimplexClosest {
                point: tri.point,
                weights,
                mask,
            });
        }
    }
    best.unwrap_or(SimplexClosest {
        point: Vec3::ZERO,
        weights: [0.25; 4],
        mask: 0b1111,
    })
}

type Simplex = ArrayVec<SupportPoint, 4>;

/// Closest point of the simplex spanned by `points` to the origin.
fn solve_simplex(points: &[Vec3]) -> SimplexClosest {
    match points.len() {
        1 => SimplexClosest {
            point: points[0],
            weights: [1.0, 0.0, 0.0, 0.0],
            mask: 0b1,
        },
        2 => closest_on_segment(points[0], points[1]),
        3 => closest_on_triangle(points[0], points[1], points[2]),
        _ => closest_on_tetrahedron([points[0], points[1], points[2], points[3]]),
    }
}

/// Drops simplex vertices outside `mask`, compacting weights alongside.
fn shrink(simplex: &mut Simplex, closest: &mut SimplexClosest) {
    let mut kept = Simplex::new();
    let mut weights = [0.0; 4];
    for (i, sp) in simplex.iter().enumerate() {
        if closest.mask & (1 << i) != 0 {
            weights[kept.len()] = closest.weights[i];
            kept.push(*sp);
        }
    }
    *simplex = kept;
    closest.weights = weights;
    closest.mask = (1u8 << simplex.len()) - 1;
}

/// GJK/EPA engine with reusable scratch storage.
#[derive(Debug, Default, Clone)]
pub struct GjkEpa {
    simplex: Simplex,
    epa: Epa,
    /// Iterations used by the last GJK query.
    pub iterations: usize,
}

impl GjkEpa {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closest points between the *cores* of two shapes (margins excluded).
    ///
    /// When the cores intersect and `penetration` is set, EPA reports the
    /// penetration of the cores as a negative distance; otherwise the distance
    /// is zero.
    pub fn compute_closest_points<G1, G2>(
        &mut self,
        c1: &G1,
        c2: &G2,
        tf1: &Transform,
        tf2: &Transform,
        cache: Option<&mut GjkCache>,
        penetration: bool,
    ) -> Result<ClosestPoints, GjkEpaError>
    where
        G1: ConvexGeometry + ?Sized,
        G2: ConvexGeometry + ?Sized,
    {
        let cached = cache
            .as_ref()
            .map(|c| c.closest_dir)
            .filter(|d| d.length_squared() > 1e-24);
        let mut v = cached.unwrap_or(tf1.position - tf2.position);
        if v.length_squared() < 1e-24 {
            v = Vec3::X;
        }

        self.simplex.clear();
        self.iterations = 0;
        let mut closest = SimplexClosest {
            point: v,
            weights: [0.0; 4],
            mask: 0,
        };
        let mut converged = false;
        let mut intersecting = false;

        while self.iterations < GJK_MAX_ITERATIONS {
            self.iterations += 1;
            if !v.is_finite() {
                return Err(GjkEpaError::DegenerateDirection);
            }

            let sp = support(c1, c2, tf1, tf2, -v, false);
            let vv = v.length_squared();
            if !self.simplex.is_empty() {
                let gap = vv - v.dot(sp.w);
                if gap <= GJK_REL_TOLERANCE * vv || gap <= GJK_ABS_TOLERANCE {
                    converged = true;
                    break;
                }
                if self
                    .simplex
                    .iter()
                    .any(|s| (s.w - sp.w).length_squared() < DUPLICATE_SUPPORT_EPS)
                {
                    converged = true;
                    break;
                }
            }

            self.simplex.push(sp);
            let points: ArrayVec<Vec3, 4> = self.simplex.iter().map(|s| s.w).collect();
            closest = solve_simplex(&points);
            shrink(&mut self.simplex, &mut closest);
            v = closest.point;

            if self.simplex.len() == 4 || v.length_squared() < GJK_PENETRATION_DISTANCE.powi(2) {
                intersecting = true;
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(GjkEpaError::GjkDidNotConverge(self.iterations));
        }

        if intersecting {
            if let Some(cache) = cache {
                cache.closest_dir = Vec3::ZERO;
            }
            if !penetration {
                let (p1, p2) = self.witnesses(&closest.weights);
                return Ok(ClosestPoints {
                    point1: p1,
                    point2: p2,
                    distance: 0.0,
                    normal: Vec3::ZERO,
                });
            }
            self.expand_to_tetrahedron(c1, c2, tf1, tf2)?;
            let tetra = [
                self.simplex[0],
                self.simplex[1],
                self.simplex[2],
                self.simplex[3],
            ];
            let pen = self.epa.compute_penetration(c1, c2, tf1, tf2, tetra)?;
            return Ok(ClosestPoints {
                point1: pen.point1,
                point2: pen.point2,
                distance: -pen.depth,
                normal: pen.normal,
            });
        }

        let (p1, p2) = self.witnesses(&closest.weights);
        let distance = v.length();
        if let Some(cache) = cache {
            cache.closest_dir = v;
        }
        Ok(ClosestPoints {
            point1: p1,
            point2: p2,
            distance,
            normal: -v / distance,
        })
    }

    fn witnesses(&self, weights: &[Real; 4]) -> (Vec3, Vec3) {
        self.simplex
            .iter()
            .zip(weights.iter())
            .fold((Vec3::ZERO, Vec3::ZERO), |(a, b), (sp, w)| {
                (a + sp.p1 * *w, b + sp.p2 * *w)
            })
    }

    /// Grows the current simplex into a non-degenerate tetrahedron.
    fn expand_to_tetrahedron<G1, G2>(
        &mut self,
        c1: &G1,
        c2: &G2,
        tf1: &Transform,
        tf2: &Transform,
    ) -> Result<(), GjkEpaError>
    where
        G1: ConvexGeometry + ?Sized,
        G2: ConvexGeometry + ?Sized,
    {
        const TOLERANCE: Real = 1e-9;

        if self.simplex.is_empty() {
            self.simplex.push(support(c1, c2, tf1, tf2, Vec3::X, false));
        }

        if self.simplex.len() == 1 {
            let base = self.simplex[0].w;
            let found = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z]
                .into_iter()
                .map(|dir| support(c1, c2, tf1, tf2, dir, false))
                .find(|sp| (sp.w - base).length_squared() > TOLERANCE);
            match found {
                Some(sp) => self.simplex.push(sp),
                None => return Err(GjkEpaError::GjkFailedToMakeTetrahedron),
            }
        }

        if self.simplex.len() == 2 {
            let base = self.simplex[0].w;
            let line = self.simplex[1].w - base;
            let line_dir = line.normalize();
            let (t, b) = orthonormal_basis(line_dir);
            let found = [t, -t, b, -b, t + b, -(t + b)]
                .into_iter()
                .map(|dir| support(c1, c2, tf1, tf2, dir, false))
                .find(|sp| (sp.w - base).cross(line_dir).length_squared() > TOLERANCE);
            match found {
                Some(sp) => self.simplex.push(sp),
                None => return Err(GjkEpaError::GjkFailedToMakeTetrahedron),
            }
        }

        if self.simplex.len() == 3 {
            let base = self.simplex[0].w;
            let n = (self.simplex[1].w - base).cross(self.simplex[2].w - base);
            let len = n.length();
            if len < 1e-18 {
                return Err(GjkEpaError::GjkFailedToMakeTetrahedron);
            }
            let n = n / len;
            let found = [n, -n]
                .into_iter()
                .map(|dir| support(c1, c2, tf1, tf2, dir, false))
                .find(|sp| (sp.w - base).dot(n).abs() > TOLERANCE);
            match found {
                Some(sp) => self.simplex.push(sp),
                None => return Err(GjkEpaError::GjkFailedToMakeTetrahedron),
            }
        }

        Ok(())
    }

    /// Sweeps shape 1 by `translation1` and shape 2 by `translation2` and finds
    /// the first time of impact in `[0, 1]`. Margins are included.
    pub fn convex_cast<G1, G2>(
        &mut self,
        c1: &G1,
        c2: &G2,
        tf1: &Transform,
        tf2: &Transform,
        translation1: Vec3,
        translation2: Vec3,
    ) -> Result<Option<ConvexCastHit>, GjkEpaError>
    where
        G1: ConvexGeometry + ?Sized,
        G2: ConvexGeometry + ?Sized,
    {
        // Ray from the origin along `dir` against the Minkowski difference.
        let relative = translation1 - translation2;
        let dir = -relative;
        let mut lambda: Real = 0.0;
        let mut x = Vec3::ZERO;
        let mut normal = Vec3::ZERO;

        let mut supports: ArrayVec<SupportPoint, 4> = ArrayVec::new();
        let first = support(c1, c2, tf1, tf2, relative.try_normalize().unwrap_or(Vec3::X), true);
        let mut v = x - first.w;
        let mut weights = [0.0; 4];

        self.iterations = 0;
        while v.length_squared() > CAST_TOLERANCE * CAST_TOLERANCE {
            if self.iterations >= GJK_MAX_ITERATIONS {
                return Err(GjkEpaError::GjkDidNotConverge(self.iterations));
            }
            self.iterations += 1;
            if !v.is_finite() {
                return Err(GjkEpaError::DegenerateDirection);
            }

            let sp = support(c1, c2, tf1, tf2, v, true);
            let w = x - sp.w;
            let vw = v.dot(w);
            if vw > 0.0 {
                let vd = v.dot(dir);
                if vd >= 0.0 {
                    return Ok(None);
                }
                lambda -= vw / vd;
                if lambda > 1.0 {
                    return Ok(None);
                }
                x = dir * lambda;
                normal = v;
            }

            if !supports
                .iter()
                .any(|s| (s.w - sp.w).length_squared() < DUPLICATE_SUPPORT_EPS)
            {
                if supports.is_full() {
                    supports.remove(0);
                }
                supports.push(sp);
            }

            let points: ArrayVec<Vec3, 4> = supports.iter().map(|s| x - s.w).collect();
            let mut closest = solve_simplex(&points);
            if closest.mask == 0b1111 {
                weights = closest.weights;
                break;
            }
            shrink(&mut supports, &mut closest);
            weights = closest.weights;
            v = closest.point;
        }

        let (mut point1, mut point2) = supports
            .iter()
            .zip(weights.iter())
            .fold((Vec3::ZERO, Vec3::ZERO), |(a, b), (sp, w)| {
                (a + sp.p1 * *w, b + sp.p2 * *w)
            });
        point1 += translation1 * lambda;
        point2 += translation2 * lambda;

        let normal = normal.try_normalize().unwrap_or(Vec3::ZERO);
        Ok(Some(ConvexCastHit {
            toi: lambda,
            normal,
            point1,
            point2,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::{Cuboid, Sphere};

    #[test]
    fn separated_boxes_report_core_distance() {
        let cuboid = Cuboid::new(Vec3::ONE).unwrap();
        let margin = cuboid.gjk_margin();
        let mut gjk = GjkEpa::new();
        let result = gjk
            .compute_closest_points(
                &cuboid,
                &cuboid,
                &Transform::IDENTITY,
                &Transform::from_position(Vec3::new(3.0, 0.0, 0.0)),
                None,
                true,
            )
            .unwrap();
        assert!((result.distance - (1.0 + 2.0 * margin)).abs() < 1e-9);
        assert!((result.normal - Vec3::X).length() < 1e-9);
        assert!(gjk.iterations <= GJK_MAX_ITERATIONS);
    }

    #[test]
    fn cache_seeds_next_query() {
        let sphere = Sphere::new(1.0).unwrap();
        let mut gjk = GjkEpa::new();
        let mut cache = GjkCache {
            closest_dir: Vec3::ZERO,
        };
        gjk.compute_closest_points(
            &sphere,
            &sphere,
            &Transform::IDENTITY,
            &Transform::from_position(Vec3::new(0.0, 0.0, 5.0)),
            Some(&mut cache),
            true,
        )
        .unwrap();
        assert!((cache.closest_dir.normalize() - Vec3::NEG_Z).length() < 1e-9);
    }

    #[test]
    fn coincident_cores_run_epa() {
        let cuboid = Cuboid::new(Vec3::ONE).unwrap();
        let mut gjk = GjkEpa::new();
        let result = gjk
            .compute_closest_points(
                &cuboid,
                &cuboid,
                &Transform::IDENTITY,
                &Transform::from_position(Vec3::new(0.5, 0.0, 0.0)),
                None,
                true,
            )
            .unwrap();
        let core = 1.0 - cuboid.gjk_margin();
        assert!((result.distance + (2.0 * core - 0.5)).abs() < 1e-6);
        assert!((result.normal - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn spheres_cast_into_each_other() {
        let sphere = Sphere::new(1.0).unwrap();
        let mut gjk = GjkEpa::new();
        let hit = gjk
            .convex_cast(
                &sphere,
                &sphere,
                &Transform::IDENTITY,
                &Transform::from_position(Vec3::new(5.0, 0.0, 0.0)),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::ZERO,
            )
            .unwrap()
            .expect("spheres should meet");
        assert!((hit.toi - 0.3).abs() < 1e-4);
        assert!((hit.normal - Vec3::X).length() < 1e-4);
        assert!((hit.point1 - Vec3::new(4.0, 0.0, 0.0)).length() < 1e-3);

        let miss = gjk
            .convex_cast(
                &sphere,
                &sphere,
                &Transform::IDENTITY,
                &Transform::from_position(Vec3::new(5.0, 3.0, 0.0)),
                Vec3::new(10.0, 0.0, 0.0),
                Vec3::ZERO,
            )
            .unwrap();
        assert!(miss.is_none());
    }
}
