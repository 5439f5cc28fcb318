use serde::{Deserialize, Serialize};

use super::{
    geometry::{
        convex_aabb, convex_mass_properties, Capsule, Cone, ConvexHull, ConvexRef, Cuboid,
        Cylinder, GeometryKind, Sphere,
    },
    terrain::Terrain,
    types::{MassProperties, Material, Transform},
};
use crate::{
    collision::aabb::Aabb,
    config::{DEFAULT_COLLISION_GROUP, DEFAULT_COLLISION_MASK},
    error::ConfigError,
    utils::{
        allocator::{BodyHandle, Handle, ProxyId, ShapeHandle},
        math::{Real, Vec3},
    },
};

/// Enumeration of supported collider geometries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColliderShape {
    Sphere(Sphere),
    Box(Cuboid),
    Cylinder(Cylinder),
    Cone(Cone),
    Capsule(Capsule),
    ConvexHull(ConvexHull),
    Terrain(Terrain),
}

impl ColliderShape {
    pub fn kind(&self) -> GeometryKind {
        match self {
            ColliderShape::Sphere(_) => GeometryKind::Sphere,
            ColliderShape::Box(_) => GeometryKind::Box,
            ColliderShape::Cylinder(_) => GeometryKind::Cylinder,
            ColliderShape::Cone(_) => GeometryKind::Cone,
            ColliderShape::Capsule(_) => GeometryKind::Capsule,
            ColliderShape::ConvexHull(_) => GeometryKind::ConvexHull,
            ColliderShape::Terrain(_) => GeometryKind::Terrain,
        }
    }

    /// Support-map view; `None` for terrain.
    pub fn as_convex(&self) -> Option<ConvexRef<'_>> {
        Some(match self {
            ColliderShape::Sphere(g) => ConvexRef::Sphere(g),
            ColliderShape::Box(g) => ConvexRef::Box(g),
            ColliderShape::Cylinder(g) => ConvexRef::Cylinder(g),
            ColliderShape::Cone(g) => ConvexRef::Cone(g),
            ColliderShape::Capsule(g) => ConvexRef::Capsule(g),
            ColliderShape::ConvexHull(g) => ConvexRef::ConvexHull(g),
            ColliderShape::Terrain(_) => return None,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ColliderShape::Sphere(g) => g.validate(),
            ColliderShape::Box(g) => g.validate(),
            ColliderShape::Cylinder(g) => g.validate(),
            ColliderShape::Cone(g) => g.validate(),
            ColliderShape::Capsule(g) => g.validate(),
            ColliderShape::ConvexHull(g) => g.validate(),
            ColliderShape::Terrain(_) => Ok(()),
        }
    }

    pub fn compute_aabb(&self, tf: &Transform) -> Aabb {
        match self {
            ColliderShape::Terrain(terrain) => terrain.compute_aabb(tf),
            ColliderShape::Sphere(sphere) => {
                Aabb::from_center_half_extents(tf.position, Vec3::splat(sphere.radius))
            }
            _ => match self.as_convex() {
                Some(convex) => convex_aabb(&convex, tf),
                None => Aabb::from_center_half_extents(tf.position, Vec3::ZERO),
            },
        }
    }

    /// Terrain is treated as massless.
    pub fn mass_properties(&self, density: Real) -> MassProperties {
        match self.as_convex() {
            Some(convex) => convex_mass_properties(convex, density),
            None => MassProperties::ZERO,
        }
    }
}

/// Group/mask pair; two shapes collide only if each group is in the other's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub group: u32,
    pub mask: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            group: DEFAULT_COLLISION_GROUP,
            mask: DEFAULT_COLLISION_MASK,
        }
    }
}

impl CollisionFilter {
    pub fn accepts(&self, other: &CollisionFilter) -> bool {
        self.group & other.mask != 0 && other.group & self.mask != 0
    }
}

/// Index into the world's contact-callback registry.
pub type CallbackId = usize;

/// Shape attached to a rigid body.
#[derive(Debug, Clone)]
pub struct Collider {
    pub id: ShapeHandle,
    pub body: BodyHandle,
    pub shape: ColliderShape,
    /// Transform relative to the owning body.
    pub local_transform: Transform,
    pub material: Material,
    pub filter: CollisionFilter,
    pub callback: Option<CallbackId>,
    pub(crate) proxy: Option<ProxyId>,
    pub(crate) transform: Transform,
    pub(crate) previous_transform: Transform,
    pub(crate) aabb: Aabb,
}

impl Default for Collider {
    fn default() -> Self {
        Self::new(ColliderShape::Sphere(Sphere { radius: 1.0 }))
    }
}

impl Collider {
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            id: Handle::INVALID,
            body: Handle::INVALID,
            shape,
            local_transform: Transform::IDENTITY,
            material: Material::default(),
            filter: CollisionFilter::default(),
            callback: None,
            proxy: None,
            transform: Transform::IDENTITY,
            previous_transform: Transform::IDENTITY,
            aabb: Aabb::default(),
        }
    }

    pub fn builder(shape: ColliderShape) -> ColliderBuilder {
        ColliderBuilder::new(shape)
    }

    pub fn kind(&self) -> GeometryKind {
        self.shape.kind()
    }

    /// World transform as of the last synchronisation with the body.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    pub fn proxy(&self) -> Option<ProxyId> {
        self.proxy
    }

    /// Recomputes the world transform and bounds from the body transform.
    ///
    /// Returns the displacement of the shape origin since the previous sync.
    pub(crate) fn sync(&mut self, body_transform: &Transform) -> Vec3 {
        self.previous_transform = self.transform;
        self.transform = body_transform.combine(&self.local_transform);
        self.aabb = self.shape.compute_aabb(&self.transform);
        self.transform.position - self.previous_transform.position
    }

    /// Mass properties expressed in the body frame.
    pub fn body_mass_properties(&self) -> MassProperties {
        self.shape
            .mass_properties(self.material.density)
            .transformed(&self.local_transform)
    }
}

/// Fluent constructor for [`Collider`], validated on `build`.
pub struct ColliderBuilder {
    collider: Collider,
}

impl ColliderBuilder {
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            collider: Collider::new(shape),
        }
    }

    pub fn sphere(radius: Real) -> Self {
        Self::new(ColliderShape::Sphere(Sphere { radius }))
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(ColliderShape::Box(Cuboid { half_extents }))
    }

    pub fn capsule(radius: Real, half_height: Real) -> Self {
        Self::new(ColliderShape::Capsule(Capsule {
            radius,
            half_height,
        }))
    }

    pub fn cylinder(radius: Real, half_height: Real) -> Self {
        Self::new(ColliderShape::Cylinder(Cylinder {
            radius,
            half_height,
        }))
    }

    pub fn cone(radius: Real, half_height: Real) -> Self {
        Self::new(ColliderShape::Cone(Cone {
            radius,
            half_height,
        }))
    }

    pub fn convex_hull(vertices: Vec<Vec3>) -> Result<Self, ConfigError> {
        Ok(Self::new(ColliderShape::ConvexHull(ConvexHull::new(vertices)?)))
    }

    pub fn terrain(terrain: Terrain) -> Self {
        Self::new(ColliderShape::Terrain(terrain))
    }

    pub fn local_transform(mut self, local_transform: Transform) -> Self {
        self.collider.local_transform = local_transform;
        self
    }

    pub fn material(mut self, material: Material) -> Self {
        self.collider.material = material;
        self
    }

    pub fn friction(mut self, friction: Real) -> Self {
        self.collider.material.friction = friction;
        self
    }

    pub fn restitution(mut self, restitution: Real) -> Self {
        self.collider.material.restitution = restitution;
        self
    }

    pub fn density(mut self, density: Real) -> Self {
        self.collider.material.density = density;
        self
    }

    pub fn filter(mut self, group: u32, mask: u32) -> Self {
        self.collider.filter = CollisionFilter { group, mask };
        self
    }

    pub fn callback(mut self, callback: CallbackId) -> Self {
        self.collider.callback = Some(callback);
        self
    }

    pub fn build(self) -> Result<Collider, ConfigError> {
        self.collider.shape.validate()?;
        Ok(self.collider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_checks_both_directions() {
        let a = CollisionFilter { group: 1, mask: 2 };
        let b = CollisionFilter { group: 2, mask: 1 };
        let c = CollisionFilter {
            group: 2,
            mask: 4,
        };
        assert!(a.accepts(&b));
        assert!(!a.accepts(&c));
        assert!(!c.accepts(&a));
    }

    #[test]
    fn builder_validates_dimensions() {
        assert!(ColliderBuilder::sphere(-1.0).build().is_err());
        let collider = ColliderBuilder::cuboid(Vec3::ONE)
            .friction(0.7)
            .filter(4, 1)
            .build()
            .unwrap();
        assert_eq!(collider.kind(), GeometryKind::Box);
        assert_eq!(collider.filter.group, 4);
        assert!((collider.material.friction - 0.7).abs() < 1e-12);
    }

    #[test]
    fn sync_reports_displacement() {
        let mut collider = ColliderBuilder::sphere(0.5).build().unwrap();
        collider.sync(&Transform::IDENTITY);
        let moved = collider.sync(&Transform::from_position(Vec3::new(1.0, 2.0, 0.0)));
        assert_eq!(moved, Vec3::new(1.0, 2.0, 0.0));
        assert!((collider.aabb().max.y - 2.5).abs() < 1e-12);
    }
}
