//! Convex primitives and the support-map contract shared by GJK and EPA.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::{
    collision::aabb::Aabb,
    config::DEFAULT_GJK_MARGIN,
    core::types::{InertiaTensorExt, MassProperties, Transform},
    error::ConfigError,
    utils::math::{inertia_capsule, Mat3, Real, Vec3},
};

/// Closed set of geometry kinds known to the detector table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Sphere = 0,
    Box = 1,
    Cylinder = 2,
    Cone = 3,
    Capsule = 4,
    ConvexHull = 5,
    Terrain = 6,
}

impl GeometryKind {
    pub const COUNT: usize = 7;

    pub const ALL: [GeometryKind; GeometryKind::COUNT] = [
        GeometryKind::Sphere,
        GeometryKind::Box,
        GeometryKind::Cylinder,
        GeometryKind::Cone,
        GeometryKind::Capsule,
        GeometryKind::ConvexHull,
        GeometryKind::Terrain,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Support-map view of a convex shape.
///
/// `local_supporting_vertex` returns the support point of the shape *core*, the
/// shape shrunk by `gjk_margin` in every direction. The full shape is the core
/// inflated by a sphere of radius `gjk_margin`.
pub trait ConvexGeometry {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3;

    fn gjk_margin(&self) -> Real;

    /// Support point of the full shape, margin included.
    fn local_supporting_vertex_with_margin(&self, dir: Vec3) -> Vec3 {
        let core = self.local_supporting_vertex(dir);
        let len = dir.length();
        if len > 1e-12 {
            core + dir * (self.gjk_margin() / len)
        } else {
            core
        }
    }
}

fn check_dimension(name: &'static str, value: Real) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidDimension { name, value })
    }
}

fn default_margin(smallest_dimension: Real) -> Real {
    DEFAULT_GJK_MARGIN.min(0.2 * smallest_dimension)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub radius: Real,
}

impl Sphere {
    pub fn new(radius: Real) -> Result<Self, ConfigError> {
        let sphere = Self { radius };
        sphere.validate()?;
        Ok(sphere)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimension("sphere radius", self.radius)
    }

    pub fn volume(&self) -> Real {
        4.0 / 3.0 * PI * self.radius.powi(3)
    }
}

impl ConvexGeometry for Sphere {
    fn local_supporting_vertex(&self, _dir: Vec3) -> Vec3 {
        Vec3::ZERO
    }

    fn gjk_margin(&self) -> Real {
        self.radius
    }
}

/// Oriented box described by its half extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cuboid {
    pub half_extents: Vec3,
}

impl Cuboid {
    pub fn new(half_extents: Vec3) -> Result<Self, ConfigError> {
        let cuboid = Self { half_extents };
        cuboid.validate()?;
        Ok(cuboid)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimension("box half extent x", self.half_extents.x)?;
        check_dimension("box half extent y", self.half_extents.y)?;
        check_dimension("box half extent z", self.half_extents.z)
    }

    pub fn volume(&self) -> Real {
        8.0 * self.half_extents.x * self.half_extents.y * self.half_extents.z
    }

    /// Corner `i`; bit 0/1/2 of `i` selects the sign of x/y/z.
    pub fn vertex(&self, i: usize) -> Vec3 {
        let h = self.half_extents;
        Vec3::new(
            if i & 1 == 0 { -h.x } else { h.x },
            if i & 2 == 0 { -h.y } else { h.y },
            if i & 4 == 0 { -h.z } else { h.z },
        )
    }
}

impl ConvexGeometry for Cuboid {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        let core = self.half_extents - Vec3::splat(self.gjk_margin());
        Vec3::new(
            if dir.x > 0.0 { core.x } else { -core.x },
            if dir.y > 0.0 { core.y } else { -core.y },
            if dir.z > 0.0 { core.z } else { -core.z },
        )
    }

    fn gjk_margin(&self) -> Real {
        default_margin(self.half_extents.min_element())
    }
}

/// Capsule aligned with the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub radius: Real,
    pub half_height: Real,
}

impl Capsule {
    pub fn new(radius: Real, half_height: Real) -> Result<Self, ConfigError> {
        let capsule = Self {
            radius,
            half_height,
        };
        capsule.validate()?;
        Ok(capsule)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimension("capsule radius", self.radius)?;
        check_dimension("capsule half height", self.half_height)
    }

    pub fn volume(&self) -> Real {
        PI * self.radius * self.radius * (2.0 * self.half_height)
            + 4.0 / 3.0 * PI * self.radius.powi(3)
    }

    /// Endpoints of the core segment.
    pub fn segment(&self) -> (Vec3, Vec3) {
        (
            Vec3::new(0.0, -self.half_height, 0.0),
            Vec3::new(0.0, self.half_height, 0.0),
        )
    }
}

impl ConvexGeometry for Capsule {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        if dir.y > 0.0 {
            Vec3::new(0.0, self.half_height, 0.0)
        } else {
            Vec3::new(0.0, -self.half_height, 0.0)
        }
    }

    fn gjk_margin(&self) -> Real {
        self.radius
    }
}

/// Cylinder aligned with the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    pub radius: Real,
    pub half_height: Real,
}

impl Cylinder {
    pub fn new(radius: Real, half_height: Real) -> Result<Self, ConfigError> {
        let cylinder = Self {
            radius,
            half_height,
        };
        cylinder.validate()?;
        Ok(cylinder)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimension("cylinder radius", self.radius)?;
        check_dimension("cylinder half height", self.half_height)
    }

    pub fn volume(&self) -> Real {
        PI * self.radius * self.radius * 2.0 * self.half_height
    }
}

impl ConvexGeometry for Cylinder {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        let margin = self.gjk_margin();
        let radius = self.radius - margin;
        let half_height = self.half_height - margin;
        let radial = (dir.x * dir.x + dir.z * dir.z).sqrt();
        let y = if dir.y > 0.0 { half_height } else { -half_height };
        if radial > 1e-12 {
            let scale = radius / radial;
            Vec3::new(dir.x * scale, y, dir.z * scale)
        } else {
            Vec3::new(0.0, y, 0.0)
        }
    }

    fn gjk_margin(&self) -> Real {
        default_margin(self.radius.min(self.half_height))
    }
}

/// Cone aligned with the local Y axis, apex at `+half_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cone {
    pub radius: Real,
    pub half_height: Real,
}

impl Cone {
    pub fn new(radius: Real, half_height: Real) -> Result<Self, ConfigError> {
        let cone = Self {
            radius,
            half_height,
        };
        cone.validate()?;
        Ok(cone)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimension("cone radius", self.radius)?;
        check_dimension("cone half height", self.half_height)
    }

    pub fn volume(&self) -> Real {
        PI * self.radius * self.radius * 2.0 * self.half_height / 3.0
    }
}

impl ConvexGeometry for Cone {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        let margin = self.gjk_margin();
        let radius = self.radius - margin;
        let half_height = self.half_height - margin;
        let sin_apex = radius / (radius * radius + 4.0 * half_height * half_height).sqrt();
        let len = dir.length();
        if dir.y > len * sin_apex {
            return Vec3::new(0.0, half_height, 0.0);
        }
        let radial = (dir.x * dir.x + dir.z * dir.z).sqrt();
        if radial > 1e-12 {
            let scale = radius / radial;
            Vec3::new(dir.x * scale, -half_height, dir.z * scale)
        } else {
            Vec3::new(0.0, -half_height, 0.0)
        }
    }

    fn gjk_margin(&self) -> Real {
        default_margin(self.radius.min(self.half_height))
    }
}

/// Convex hull of a point cloud. Runs without a margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexHull {
    vertices: Vec<Vec3>,
}

impl ConvexHull {
    pub fn new(vertices: Vec<Vec3>) -> Result<Self, ConfigError> {
        let hull = Self { vertices };
        hull.validate()?;
        Ok(hull)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vertices.is_empty() {
            return Err(ConfigError::EmptyHull);
        }
        Ok(())
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    fn local_bounds(&self) -> (Vec3, Vec3) {
        self.vertices.iter().fold(
            (Vec3::splat(Real::MAX), Vec3::splat(Real::MIN)),
            |(min, max), v| (min.min(*v), max.max(*v)),
        )
    }

    /// Bounding-box approximation of the enclosed volume.
    pub fn volume(&self) -> Real {
        let (min, max) = self.local_bounds();
        let size = max - min;
        size.x * size.y * size.z
    }
}

impl ConvexGeometry for ConvexHull {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        let mut best = self.vertices.first().copied().unwrap_or(Vec3::ZERO);
        let mut best_dot = best.dot(dir);
        for v in self.vertices.iter().skip(1) {
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

/// Borrowed view of any convex geometry, dispatched by `match`.
#[derive(Debug, Clone, Copy)]
pub enum ConvexRef<'a> {
    Sphere(&'a Sphere),
    Box(&'a Cuboid),
    Capsule(&'a Capsule),
    Cylinder(&'a Cylinder),
    Cone(&'a Cone),
    ConvexHull(&'a ConvexHull),
}

impl ConvexGeometry for ConvexRef<'_> {
    fn local_supporting_vertex(&self, dir: Vec3) -> Vec3 {
        match self {
            ConvexRef::Sphere(g) => g.local_supporting_vertex(dir),
            ConvexRef::Box(g) => g.local_supporting_vertex(dir),
            ConvexRef::Capsule(g) => g.local_supporting_vertex(dir),
            ConvexRef::Cylinder(g) => g.local_supporting_vertex(dir),
            ConvexRef::Cone(g) => g.local_supporting_vertex(dir),
            ConvexRef::ConvexHull(g) => g.local_supporting_vertex(dir),
        }
    }

    fn gjk_margin(&self) -> Real {
        match self {
            ConvexRef::Sphere(g) => g.gjk_margin(),
            ConvexRef::Box(g) => g.gjk_margin(),
            ConvexRef::Capsule(g) => g.gjk_margin(),
            ConvexRef::Cylinder(g) => g.gjk_margin(),
            ConvexRef::Cone(g) => g.gjk_margin(),
            ConvexRef::ConvexHull(g) => g.gjk_margin(),
        }
    }
}

/// World-space bounds of a convex shape from six support queries.
pub fn convex_aabb<G: ConvexGeometry + ?Sized>(geometry: &G, tf: &Transform) -> Aabb {
    let mut min = Vec3::ZERO;
    let mut max = Vec3::ZERO;
    for axis in 0..3 {
        let mut world_dir = Vec3::ZERO;
        world_dir[axis] = 1.0;
        let local_dir = tf.inverse_transform_vector(world_dir);
        let hi = tf.transform_point(geometry.local_supporting_vertex_with_margin(local_dir));
        let lo = tf.transform_point(geometry.local_supporting_vertex_with_margin(-local_dir));
        max[axis] = hi[axis];
        min[axis] = lo[axis];
    }
    Aabb::new(min, max)
}

/// Mass properties of a uniform-density solid.
pub fn convex_mass_properties(geometry: ConvexRef<'_>, density: Real) -> MassProperties {
    match geometry {
        ConvexRef::Sphere(g) => {
            let mass = g.volume() * density;
            MassProperties {
                mass,
                inertia: Mat3::for_solid_sphere(g.radius, mass),
            }
        }
        ConvexRef::Box(g) => {
            let mass = g.volume() * density;
            MassProperties {
                mass,
                inertia: Mat3::for_solid_box(g.half_extents, mass),
            }
        }
        ConvexRef::Capsule(g) => {
            let mass = g.volume() * density;
            MassProperties {
                mass,
                inertia: inertia_capsule(g.radius, g.half_height, mass),
            }
        }
        ConvexRef::Cylinder(g) => {
            let mass = g.volume() * density;
            MassProperties {
                mass,
                inertia: Mat3::for_solid_cylinder(g.radius, g.half_height, mass),
            }
        }
        ConvexRef::Cone(g) => {
            let mass = g.volume() * density;
            MassProperties {
                mass,
                inertia: Mat3::for_solid_cone(g.radius, g.half_height, mass),
            }
        }
        ConvexRef::ConvexHull(g) => {
            let mass = g.volume() * density;
            let (min, max) = g.local_bounds();
            MassProperties {
                mass,
                inertia: Mat3::for_solid_box((max - min) * 0.5, mass),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::Quat;

    #[test]
    fn cores_plus_margin_reach_the_surface() {
        let cuboid = Cuboid::new(Vec3::new(1.0, 2.0, 3.0)).unwrap();
        let p = cuboid.local_supporting_vertex_with_margin(Vec3::X);
        assert!((p.x - 1.0).abs() < 1e-12);

        let sphere = Sphere::new(0.5).unwrap();
        let p = sphere.local_supporting_vertex_with_margin(Vec3::new(0.0, 0.0, -2.0));
        assert!((p - Vec3::new(0.0, 0.0, -0.5)).length() < 1e-12);

        let cylinder = Cylinder::new(1.0, 2.0).unwrap();
        let p = cylinder.local_supporting_vertex_with_margin(Vec3::Y);
        assert!((p.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn cone_support_switches_between_apex_and_rim() {
        let cone = Cone::new(1.0, 1.0).unwrap();
        let apex = cone.local_supporting_vertex(Vec3::Y);
        assert!(apex.y > 0.0);
        let rim = cone.local_supporting_vertex(Vec3::X);
        assert!(rim.y < 0.0 && rim.x > 0.0);
    }

    #[test]
    fn constructors_reject_bad_dimensions() {
        assert!(Sphere::new(0.0).is_err());
        assert!(Capsule::new(1.0, -1.0).is_err());
        assert!(Cuboid::new(Vec3::new(1.0, Real::NAN, 1.0)).is_err());
        assert_eq!(ConvexHull::new(Vec::new()), Err(ConfigError::EmptyHull));
    }

    #[test]
    fn rotated_box_bounds_grow() {
        let cuboid = Cuboid::new(Vec3::splat(1.0)).unwrap();
        let tf = Transform::from_position_rotation(
            Vec3::new(0.0, 5.0, 0.0),
            Quat::from_rotation_y(std::f64::consts::FRAC_PI_4),
        );
        let aabb = convex_aabb(&cuboid, &tf);
        assert!(aabb.max.x > 1.3 && aabb.max.x < 1.5);
        assert!((aabb.max.y - 6.0).abs() < 1e-9);
        assert!((aabb.min.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn sphere_mass_matches_closed_form() {
        let sphere = Sphere::new(1.0).unwrap();
        let props = convex_mass_properties(ConvexRef::Sphere(&sphere), 2.0);
        assert!((props.mass - 8.0 / 3.0 * PI).abs() < 1e-9);
    }
}
