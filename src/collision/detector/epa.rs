//! Expanding polytope algorithm for the penetration depth of intersecting
//! convex cores.

use super::gjk::{support, SupportPoint};
use crate::{
    config::{EPA_MAX_ITERATIONS, EPA_MAX_VERTICES},
    core::{geometry::ConvexGeometry, types::Transform},
    error::GjkEpaError,
    utils::math::{Real, Vec3},
};

const NONE: usize = usize::MAX;
const EPA_TOLERANCE: Real = 1e-4;
const INIT_TOLERANCE: Real = 1e-9;
const VISIBILITY_EPS: Real = 1e-10;

/// Penetration found by EPA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    pub point1: Vec3,
    pub point2: Vec3,
    /// Points from shape 1 towards shape 2.
    pub normal: Vec3,
    pub depth: Real,
}

/// Triangle of the polytope. Edge `i` runs from `v[i]` to `v[(i + 1) % 3]`;
/// `adj[i]` is the triangle across that edge and `adj_edge[i]` the index of the
/// same edge inside the neighbour.
#[derive(Debug, Clone)]
struct EpaTriangle {
    v: [usize; 3],
    adj: [usize; 3],
    adj_edge: [usize; 3],
    normal: Vec3,
    distance: Real,
    alive: bool,
}

/// Polytope storage reused across invocations.
#[derive(Debug, Default, Clone)]
pub struct Epa {
    vertices: Vec<SupportPoint>,
    triangles: Vec<EpaTriangle>,
    free_triangles: Vec<usize>,
    horizon: Vec<(usize, usize)>,
    fan: Vec<usize>,
}

impl Epa {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.vertices.clear();
        self.triangles.clear();
        self.free_triangles.clear();
        self.horizon.clear();
        self.fan.clear();
    }

    fn add_triangle(&mut self, a: usize, b: usize, c: usize) -> Option<usize> {
        let pa = self.vertices[a].w;
        let n = (self.vertices[b].w - pa).cross(self.vertices[c].w - pa);
        let len = n.length();
        if len < 1e-18 || !len.is_finite() {
            return None;
        }
        let normal = n / len;
        let triangle = EpaTriangle {
            v: [a, b, c],
            adj: [NONE; 3],
            adj_edge: [NONE; 3],
            normal,
            distance: normal.dot(pa),
            alive: true,
        };
        Some(match self.free_triangles.pop() {
            Some(id) => {
                self.triangles[id] = triangle;
                id
            }
            None => {
                self.triangles.push(triangle);
                self.triangles.len() - 1
            }
        })
    }

    fn remove_triangle(&mut self, id: usize) {
        self.triangles[id].alive = false;
        self.free_triangles.push(id);
    }

    fn link(&mut self, t1: usize, e1: usize, t2: usize, e2: usize) {
        self.triangles[t1].adj[e1] = t2;
        self.triangles[t1].adj_edge[e1] = e2;
        self.triangles[t2].adj[e2] = t1;
        self.triangles[t2].adj_edge[e2] = e1;
    }

    /// Builds the initial tetrahedron with outward-facing triangles.
    fn init(&mut self, tetra: [SupportPoint; 4]) -> Result<(), GjkEpaError> {
        self.reset();
        let mut tetra = tetra;
        let orientation = (tetra[1].w - tetra[0].w)
            .cross(tetra[2].w - tetra[0].w)
            .dot(tetra[3].w - tetra[0].w);
        if orientation.abs() < 1e-18 {
            return Err(GjkEpaError::EpaFailedToInit);
        }
        if orientation > 0.0 {
            tetra.swap(1, 2);
        }
        self.vertices.extend_from_slice(&tetra);

        let faces = [[0, 1, 2], [0, 3, 1], [1, 3, 2], [2, 3, 0]];
        let mut ids = [0usize; 4];
        for (slot, face) in faces.iter().enumerate() {
            ids[slot] = self
                .add_triangle(face[0], face[1], face[2])
                .ok_or(GjkEpaError::EpaFailedToInit)?;
        }

        for i in 0..4 {
            for j in (i + 1)..4 {
                for ei in 0..3 {
                    for ej in 0..3 {
                        let ti = &self.triangles[ids[i]];
                        let tj = &self.triangles[ids[j]];
                        if ti.v[ei] == tj.v[(ej + 1) % 3] && ti.v[(ei + 1) % 3] == tj.v[ej] {
                            self.link(ids[i], ei, ids[j], ej);
                        }
                    }
                }
            }
        }

        let scale = self
            .vertices
            .iter()
            .map(|v| v.w.length())
            .fold(1.0, Real::max);
        for id in ids {
            if self.triangles[id].distance < -INIT_TOLERANCE * scale {
                return Err(GjkEpaError::EpaFailedToInit);
            }
        }
        self.validate()
    }

    fn is_visible(&self, triangle: usize, point: Vec3) -> bool {
        let t = &self.triangles[triangle];
        t.normal.dot(point - self.vertices[t.v[0]].w) > VISIBILITY_EPS
    }

    /// Collects the horizon as `(kept triangle, edge)` pairs in loop order.
    fn silhouette(&mut self, triangle: usize, edge: usize, point: Vec3) {
        if !self.triangles[triangle].alive {
            return;
        }
        if !self.is_visible(triangle, point) {
            self.horizon.push((triangle, edge));
            return;
        }
        self.remove_triangle(triangle);
        for k in 1..3 {
            let e = (edge + k) % 3;
            let t = &self.triangles[triangle];
            let (next, next_edge) = (t.adj[e], t.adj_edge[e]);
            self.silhouette(next, next_edge, point);
        }
    }

    fn add_vertex(&mut self, first: usize, sp: SupportPoint) -> Result<(), GjkEpaError> {
        if self.vertices.len() >= EPA_MAX_VERTICES {
            return Err(GjkEpaError::EpaFailedToAddVertex);
        }
        let new_vertex = self.vertices.len();
        self.vertices.push(sp);

        self.horizon.clear();
        self.remove_triangle(first);
        for e in 0..3 {
            let t = &self.triangles[first];
            let (next, next_edge) = (t.adj[e], t.adj_edge[e]);
            self.silhouette(next, next_edge, sp.w);
        }
        if self.horizon.len() < 3 {
            return Err(GjkEpaError::EpaFailedToAddVertex);
        }

        self.fan.clear();
        for h in 0..self.horizon.len() {
            let (kept, edge) = self.horizon[h];
            let t = &self.triangles[kept];
            let a = t.v[(edge + 1) % 3];
            let b = t.v[edge];
            let created = self
                .add_triangle(a, b, new_vertex)
                .ok_or(GjkEpaError::EpaFailedToAddVertex)?;
            self.link(created, 0, kept, edge);
            self.fan.push(created);
        }

        for i in 0..self.fan.len() {
            let ti = self.fan[i];
            let joint = self.triangles[ti].v[1];
            let partner = self
                .fan
                .iter()
                .copied()
                .find(|&tj| tj != ti && self.triangles[tj].v[0] == joint);
            match partner {
                Some(tj) => self.link(ti, 1, tj, 2),
                None => return Err(GjkEpaError::EpaPolytopeNotClosed),
            }
        }

        self.validate()
    }

    /// Every live triangle must have three live, reciprocal neighbours.
    fn validate(&self) -> Result<(), GjkEpaError> {
        for (id, t) in self.triangles.iter().enumerate() {
            if !t.alive {
                continue;
            }
            for e in 0..3 {
                let n = t.adj[e];
                let ne = t.adj_edge[e];
                if n == NONE || ne == NONE {
                    return Err(GjkEpaError::EpaPolytopeNotClosed);
                }
                let other = &self.triangles[n];
                if !other.alive || other.adj[ne] != id || other.adj_edge[ne] != e {
                    return Err(GjkEpaError::EpaPolytopeNotClosed);
                }
                if other.v[ne] != t.v[(e + 1) % 3] || other.v[(ne + 1) % 3] != t.v[e] {
                    return Err(GjkEpaError::EpaPolytopeNotClosed);
                }
            }
        }
        Ok(())
    }

    fn closest_triangle(&self) -> Option<usize> {
        self.triangles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.alive)
            .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
            .map(|(id, _)| id)
    }

    /// Number of live triangles; exposed for diagnostics and tests.
    pub fn num_triangles(&self) -> usize {
        self.triangles.iter().filter(|t| t.alive).count()
    }

    pub fn compute_penetration<G1, G2>(
        &mut self,
        c1: &G1,
        c2: &G2,
        tf1: &Transform,
        tf2: &Transform,
        tetra: [SupportPoint; 4],
    ) -> Result<Penetration, GjkEpaError>
    where
        G1: ConvexGeometry + ?Sized,
        G2: ConvexGeometry + ?Sized,
    {
        self.init(tetra)?;

        for _ in 0..EPA_MAX_ITERATIONS {
            let Some(closest) = self.closest_triangle() else {
                return Err(GjkEpaError::EpaPolytopeNotClosed);
            };
            let (normal, distance) = {
                let t = &self.triangles[closest];
                (t.normal, t.distance)
            };
            let sp = support(c1, c2, tf1, tf2, normal, false);
            let improvement = sp.w.dot(normal) - distance;
            if improvement <= EPA_TOLERANCE {
                return Ok(self.penetration_from(closest));
            }
            self.add_vertex(closest, sp)?;
        }

        log::debug!(
            "EPA gave up after {} iterations with {} triangles",
            EPA_MAX_ITERATIONS,
            self.num_triangles()
        );
        Err(GjkEpaError::EpaDidNotConverge(EPA_MAX_ITERATIONS))
    }

    fn penetration_from(&self, triangle: usize) -> Penetration {
        let t = &self.triangles[triangle];
        let a = &self.vertices[t.v[0]];
        let b = &self.vertices[t.v[1]];
        let c = &self.vertices[t.v[2]];
        let projected = t.normal * t.distance;

        let v0 = b.w - a.w;
        let v1 = c.w - a.w;
        let v2 = projected - a.w;
        let d00 = v0.dot(v0);
        let d01 = v0.dot(v1);
        let d11 = v1.dot(v1);
        let d20 = v2.dot(v0);
        let d21 = v2.dot(v1);
        let denom = d00 * d11 - d01 * d01;
        let (u, v, w) = if denom.abs() > 1e-30 {
            let v = (d11 * d20 - d01 * d21) / denom;
            let w = (d00 * d21 - d01 * d20) / denom;
            (1.0 - v - w, v, w)
        } else {
            (1.0, 0.0, 0.0)
        };

        Penetration {
            point1: a.p1 * u + b.p1 * v + c.p1 * w,
            point2: a.p2 * u + b.p2 * v + c.p2 * w,
            normal: t.normal,
            depth: t.distance,
        }
    }
}
