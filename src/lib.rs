//! Pulse Physics – rigid-body engine for Rust.
//!
//! Bodies carry one or more shapes; a broad-phase pairs their bounds, a
//! dispatch table of narrow-phase detectors (SAT, GJK/EPA and analytic
//! special cases) fills persistent contact manifolds, and connected bodies
//! are grouped into islands that are solved with projected Gauss-Seidel
//! and put to sleep once they come to rest.

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod error;
pub mod utils;
pub mod world;

pub use glam;

pub use collision::{
    Aabb, BroadPhase, BruteForceBroadPhase, CollisionMatrix, Contact, ContactCallback, ContactEvent,
    GjkEpa, GridBroadPhase, Manifold, ManifoldPoint,
};
pub use config::{BroadPhaseKind, SolverSettings, WorldSettings};
pub use core::{
    BodyKind, CallbackId, Collider, ColliderBuilder, ColliderShape, CollisionFilter, Joint, JointDef,
    JointKind, JointSolverType, LimitMotor, MassProperties, Material, RigidBody, Terrain, TimeStep,
    Transform, Velocity,
};
pub use dynamics::PositionCorrection;
pub use error::{ConfigError, GjkEpaError, SolverError, WorldError};
pub use utils::{
    allocator::{BodyHandle, ContactHandle, Handle, JointHandle, ShapeHandle},
    math::{Mat3, Quat, Real, Vec3},
};
pub use world::{ConvexCastResult, World};
