//! Polygon clipping against a rectangular reference face.

use arrayvec::ArrayVec;

use crate::utils::math::{Real, Vec3};

const EPSILON: Real = 1e-12;
const MAX_CLIP_VERTICES: usize = 8;

/// Vertex expressed in the reference face frame: `(u, v)` in the face plane and
/// `h` the height above the face along its outward normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipVertex {
    pub local: Vec3,
    /// Feature id of the point.
    pub id: u32,
    /// Feature the segment to the next vertex runs along.
    edge: u32,
}

/// Sutherland-Hodgman clipper for the incident polygon of a box-box contact.
///
/// Clips in place by ping-ponging between two fixed buffers.
#[derive(Debug, Clone, Default)]
pub struct FaceClipper {
    half_u: Real,
    half_v: Real,
    buffers: [ArrayVec<ClipVertex, MAX_CLIP_VERTICES>; 2],
    current: usize,
}

impl FaceClipper {
    pub fn init(&mut self, half_u: Real, half_v: Real) {
        self.half_u = half_u;
        self.half_v = half_v;
        self.buffers[0].clear();
        self.buffers[1].clear();
        self.current = 0;
    }

    /// Adds incident vertex `index`; vertices must be given in polygon order.
    pub fn add_vertex(&mut self, local: Vec3, index: u32) {
        let _ = self.buffers[self.current].try_push(ClipVertex {
            local,
            id: index,
            edge: index,
        });
    }

    pub fn vertices(&self) -> &[ClipVertex] {
        &self.buffers[self.current]
    }

    /// Clips against the four edges `u <= half_u`, `u >= -half_u`,
    /// `v <= half_v`, `v >= -half_v`.
    pub fn clip(&mut self) {
        let (hu, hv) = (self.half_u, self.half_v);
        self.clip_against(0, |p| p.x - hu);
        self.clip_against(1, |p| -hu - p.x);
        self.clip_against(2, |p| p.y - hv);
        self.clip_against(3, |p| -hv - p.y);
    }

    fn clip_against(&mut self, clip_edge: u32, signed_distance: impl Fn(Vec3) -> Real) {
        let (src, dst) = if self.current == 0 {
            let (a, b) = self.buffers.split_at_mut(1);
            (&a[0], &mut b[0])
        } else {
            let (a, b) = self.buffers.split_at_mut(1);
            (&b[0], &mut a[0])
        };
        dst.clear();
        let count = src.len();
        for i in 0..count {
            let current = src[i];
            let next = src[(i + 1) % count];
            let d1 = signed_distance(current.local);
            let d2 = signed_distance(next.local);
            let current_inside = d1 <= 0.0;
            let next_inside = d2 <= 0.0;

            if current_inside && next_inside {
                let _ = dst.try_push(next);
            } else if current_inside || next_inside {
                let denom = d1 - d2;
                if denom.abs() > EPSILON {
                    let t = d1 / denom;
                    let local = current.local + (next.local - current.local) * t;
                    let id = 4 + clip_edge * 4 + current.edge;
                    // the part after an exit point runs along the clip edge
                    let edge = if current_inside { 16 + clip_edge } else { current.edge };
                    let _ = dst.try_push(ClipVertex { local, id, edge });
                }
                if next_inside {
                    let _ = dst.try_push(next);
                }
            }
        }
        self.current = 1 - self.current;
    }

    /// Keeps at most four vertices: the extremes along both diagonals, topped up
    /// with the deepest remaining ones.
    pub fn reduce(&mut self) {
        let vertices = &self.buffers[self.current];
        if vertices.len() <= 4 {
            return;
        }
        let diag1 = Vec3::new(self.half_u, self.half_v, 0.0);
        let diag2 = Vec3::new(self.half_u, -self.half_v, 0.0);
        let extreme = |dir: Vec3, sign: Real| {
            (0..vertices.len())
                .max_by(|&a, &b| {
                    (sign * vertices[a].local.dot(dir)).total_cmp(&(sign * vertices[b].local.dot(dir)))
                })
                .unwrap_or(0)
        };

        let mut chosen: ArrayVec<usize, 4> = ArrayVec::new();
        for index in [
            extreme(diag1, 1.0),
            extreme(diag2, 1.0),
            extreme(diag1, -1.0),
            extreme(diag2, -1.0),
        ] {
            if !chosen.contains(&index) {
                chosen.push(index);
            }
        }
        while !chosen.is_full() {
            let deepest = (0..vertices.len())
                .filter(|i| !chosen.contains(i))
                .min_by(|&a, &b| vertices[a].local.z.total_cmp(&vertices[b].local.z));
            match deepest {
                Some(i) => chosen.push(i),
                None => break,
            }
        }
        chosen.sort_unstable();

        let reduced: ArrayVec<ClipVertex, MAX_CLIP_VERTICES> =
            chosen.iter().map(|&i| vertices[i]).collect();
        self.buffers[self.current] = reduced;
    }
}
