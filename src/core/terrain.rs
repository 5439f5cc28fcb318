//! Heightfield terrain geometry.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::{
    collision::aabb::Aabb,
    core::types::Transform,
    error::ConfigError,
    utils::math::{Mat3, Real, Vec3},
};

/// Regular grid of heights centred on the local origin, Y up.
///
/// Sample `(i, j)` sits at `x = -half_width_x + i * cell_size`,
/// `z = -half_width_z + j * cell_size`. Each cell is split into two triangles
/// along its `(i + 1, j) - (i, j + 1)` diagonal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terrain {
    heights: Vec<Real>,
    samples_x: usize,
    samples_z: usize,
    cell_size: Real,
    min_height: Real,
    max_height: Real,
}

/// Height and upward surface normal at a point of the terrain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainSample {
    pub height: Real,
    pub normal: Vec3,
}

impl Terrain {
    /// Builds a terrain from `rows[i][j]`, `i` along X and `j` along Z.
    pub fn new(rows: Vec<Vec<Real>>, cell_size: Real) -> Result<Self, ConfigError> {
        if rows.is_empty() || rows.iter().all(|row| row.is_empty()) {
            return Err(ConfigError::EmptyHeightData);
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ConfigError::InvalidDimension {
                name: "terrain cell size",
                value: cell_size,
            });
        }
        let samples_x = rows.len();
        let samples_z = rows[0].len();
        if let Some(row) = rows.iter().find(|row| row.len() != samples_z) {
            return Err(ConfigError::RaggedHeightData {
                expected: samples_z,
                actual: row.len(),
            });
        }
        if samples_x < 2 || samples_z < 2 {
            return Err(ConfigError::InvalidDimension {
                name: "terrain samples per side",
                value: samples_x.min(samples_z) as Real,
            });
        }

        let heights: Vec<Real> = rows.into_iter().flatten().collect();
        let (min_height, max_height) = heights
            .iter()
            .fold((Real::MAX, Real::MIN), |(lo, hi), h| (lo.min(*h), hi.max(*h)));

        Ok(Self {
            heights,
            samples_x,
            samples_z,
            cell_size,
            min_height,
            max_height,
        })
    }

    pub fn samples(&self) -> (usize, usize) {
        (self.samples_x, self.samples_z)
    }

    pub fn cell_size(&self) -> Real {
        self.cell_size
    }

    pub fn half_width_x(&self) -> Real {
        0.5 * self.cell_size * (self.samples_x - 1) as Real
    }

    pub fn half_width_z(&self) -> Real {
        0.5 * self.cell_size * (self.samples_z - 1) as Real
    }

    pub fn height(&self, i: usize, j: usize) -> Real {
        self.heights[i * self.samples_z + j]
    }

    /// Surface sample below the local `(x, z)`; `None` outside the grid.
    pub fn sample(&self, x: Real, z: Real) -> Option<TerrainSample> {
        let fx = (x + self.half_width_x()) / self.cell_size;
        let fz = (z + self.half_width_z()) / self.cell_size;
        let last_x = (self.samples_x - 1) as Real;
        let last_z = (self.samples_z - 1) as Real;
        if !(0.0..=last_x).contains(&fx) || !(0.0..=last_z).contains(&fz) {
            return None;
        }

        let i = (fx.floor() as usize).min(self.samples_x - 2);
        let j = (fz.floor() as usize).min(self.samples_z - 2);
        let u = fx - i as Real;
        let v = fz - j as Real;

        let h00 = self.height(i, j);
        let h10 = self.height(i + 1, j);
        let h01 = self.height(i, j + 1);
        let h11 = self.height(i + 1, j + 1);

        let (height, slope_x, slope_z) = if u + v <= 1.0 {
            (
                h00 + u * (h10 - h00) + v * (h01 - h00),
                (h10 - h00) / self.cell_size,
                (h01 - h00) / self.cell_size,
            )
        } else {
            (
                h11 + (1.0 - u) * (h01 - h11) + (1.0 - v) * (h10 - h11),
                (h11 - h01) / self.cell_size,
                (h11 - h10) / self.cell_size,
            )
        };

        Some(TerrainSample {
            height,
            normal: Vec3::new(-slope_x, 1.0, -slope_z).normalize(),
        })
    }

    /// Local position of sample `(i, j)`.
    pub fn vertex(&self, i: usize, j: usize) -> Vec3 {
        Vec3::new(
            -self.half_width_x() + i as Real * self.cell_size,
            self.height(i, j),
            -self.half_width_z() + j as Real * self.cell_size,
        )
    }

    /// One of the two triangles of cell `(i, j)`, wound so that
    /// `(c - a) x (b - a)` points up.
    pub fn triangle(&self, i: usize, j: usize, upper: bool) -> [Vec3; 3] {
        if upper {
            [self.vertex(i + 1, j + 1), self.vertex(i, j + 1), self.vertex(i + 1, j)]
        } else {
            [self.vertex(i, j), self.vertex(i + 1, j), self.vertex(i, j + 1)]
        }
    }

    /// Cells whose footprint overlaps a local-space box, as inclusive index
    /// ranges along X and Z. `None` when the box misses the grid or floats
    /// above the highest sample.
    pub fn cells_overlapping(&self, local: &Aabb) -> Option<(RangeInclusive<usize>, RangeInclusive<usize>)> {
        let (hx, hz) = (self.half_width_x(), self.half_width_z());
        if local.max.x < -hx || local.min.x > hx || local.max.z < -hz || local.min.z > hz {
            return None;
        }
        if local.min.y > self.max_height {
            return None;
        }
        let last_i = self.samples_x - 2;
        let last_j = self.samples_z - 2;
        let cell = |v: Real, half: Real, last: usize| (((v + half) / self.cell_size).floor().max(0.0) as usize).min(last);
        Some((
            cell(local.min.x, hx, last_i)..=cell(local.max.x, hx, last_i),
            cell(local.min.z, hz, last_j)..=cell(local.max.z, hz, last_j),
        ))
    }

    pub fn local_aabb(&self) -> Aabb {
        Aabb::new(
            Vec3::new(-self.half_width_x(), self.min_height, -self.half_width_z()),
            Vec3::new(self.half_width_x(), self.max_height, self.half_width_z()),
        )
    }

    pub fn compute_aabb(&self, tf: &Transform) -> Aabb {
        let local = self.local_aabb();
        let center = tf.transform_point(local.center());
        let basis = tf.basis();
        let abs = Mat3::from_cols(basis.x_axis.abs(), basis.y_axis.abs(), basis.z_axis.abs());
        Aabb::from_center_half_extents(center, abs * local.half_extents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(n: usize, height: Real) -> Vec<Vec<Real>> {
        vec![vec![height; n]; n]
    }

    #[test]
    fn rejects_empty_and_ragged_data() {
        assert_eq!(Terrain::new(Vec::new(), 1.0), Err(ConfigError::EmptyHeightData));
        assert_eq!(
            Terrain::new(vec![vec![0.0, 0.0], vec![0.0]], 1.0),
            Err(ConfigError::RaggedHeightData {
                expected: 2,
                actual: 1
            })
        );
        assert!(Terrain::new(flat(3, 0.0), 0.0).is_err());
    }

    #[test]
    fn flat_terrain_samples_constant_height() {
        let terrain = Terrain::new(flat(5, 2.0), 1.0).unwrap();
        let sample = terrain.sample(0.3, -1.2).unwrap();
        assert!((sample.height - 2.0).abs() < 1e-12);
        assert!((sample.normal - Vec3::Y).length() < 1e-12);
        assert!(terrain.sample(2.5, 0.0).is_none());
    }

    #[test]
    fn slope_normal_leans_downhill() {
        let rows = (0..3).map(|i| vec![i as Real; 3]).collect();
        let terrain = Terrain::new(rows, 1.0).unwrap();
        let sample = terrain.sample(0.2, 0.1).unwrap();
        assert!((sample.height - 1.2).abs() < 1e-12);
        assert!(sample.normal.x < 0.0);
        assert!(sample.normal.z.abs() < 1e-12);
    }

    #[test]
    fn triangles_match_sampled_surface() {
        let rows = vec![vec![0.0, 1.0], vec![2.0, 4.0]];
        let terrain = Terrain::new(rows, 1.0).unwrap();
        for upper in [false, true] {
            let [a, b, c] = terrain.triangle(0, 0, upper);
            let normal = (c - a).cross(b - a).normalize();
            let centroid = (a + b + c) / 3.0;
            let sample = terrain.sample(centroid.x, centroid.z).unwrap();
            assert!((sample.height - centroid.y).abs() < 1e-12);
            assert!((sample.normal - normal).length() < 1e-12, "upper = {upper}");
        }
    }

    #[test]
    fn cell_ranges_are_clamped_to_the_grid() {
        let terrain = Terrain::new(flat(5, 0.0), 1.0).unwrap();
        let (xs, zs) = terrain
            .cells_overlapping(&Aabb::new(Vec3::new(-0.5, -1.0, 1.5), Vec3::new(0.5, 1.0, 9.0)))
            .unwrap();
        assert_eq!(xs, 1..=2);
        assert_eq!(zs, 3..=3);
        assert!(terrain
            .cells_overlapping(&Aabb::new(Vec3::new(-0.5, 0.5, -0.5), Vec3::new(0.5, 1.0, 0.5)))
            .is_none());
        assert!(terrain
            .cells_overlapping(&Aabb::new(Vec3::new(3.0, -1.0, 0.0), Vec3::new(4.0, 1.0, 1.0)))
            .is_none());
    }
}
