//! Collision detection: bounds, broad-phase, narrow-phase detectors, manifolds and contacts.

pub mod aabb;
pub mod broadphase;
pub mod clipping;
pub mod contact;
pub mod contact_manager;
pub mod detector;
pub mod manifold;

pub use aabb::Aabb;
pub use broadphase::{BroadPhase, BruteForceBroadPhase, GridBroadPhase, ProxyPair};
pub use contact::{Contact, ContactCallback, ContactEvent};
pub use contact_manager::ContactManager;
pub use detector::{CollisionMatrix, DetectorResult, GjkEpa};
pub use manifold::{Manifold, ManifoldPoint};
