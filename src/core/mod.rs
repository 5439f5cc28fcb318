//! Core types describing bodies, shapes, joints, and shared data.

pub mod types;
pub mod geometry;
pub mod terrain;
pub mod rigidbody;
pub mod collider;
pub mod constraints;

pub use types::{MassProperties, Material, TimeStep, Transform, Velocity};
pub use geometry::{
    Capsule, Cone, ConvexGeometry, ConvexHull, ConvexRef, Cuboid, Cylinder, GeometryKind, Sphere,
};
pub use terrain::Terrain;
pub use rigidbody::{BodyKind, RigidBody};
pub use collider::{CallbackId, Collider, ColliderBuilder, ColliderShape, CollisionFilter};
pub use constraints::{Joint, JointDef, JointKind, JointSolverType, LimitMotor};
