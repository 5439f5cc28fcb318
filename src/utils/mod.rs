//! Utility helpers: math extensions, slot pools, and logging.

pub mod allocator;
pub mod logging;
pub mod math;

pub use allocator::{BodyHandle, ContactHandle, Handle, JointHandle, Pool, ProxyId, ShapeHandle};
pub use math::*;
