use serde::{Deserialize, Serialize};

use super::types::{MassProperties, Transform, Velocity};
use crate::utils::{
    allocator::{BodyHandle, ContactHandle, Handle, JointHandle, ShapeHandle},
    math::{world_inertia, Mat3, Real, Vec3},
};

/// How the solver treats a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BodyKind {
    #[default]
    Dynamic,
    /// Never moves.
    Static,
    /// Moves by its velocity only; infinite mass for the solver.
    Kinematic,
}

/// Core rigid body description storing kinematic state and properties.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub id: BodyHandle,
    pub kind: BodyKind,
    pub transform: Transform,
    pub velocity: Velocity,
    pub force: Vec3,
    pub torque: Vec3,
    pub linear_damping: Real,
    pub angular_damping: Real,
    pub gravity_scale: Real,
    /// Per-axis scale of rotational response; zero locks that axis.
    pub rotation_factor: Vec3,
    pub auto_sleep: bool,
    pub(crate) mass: Real,
    pub(crate) inv_mass: Real,
    pub(crate) local_inertia: Mat3,
    pub(crate) inv_local_inertia: Mat3,
    pub(crate) inv_inertia: Mat3,
    pub(crate) sleeping: bool,
    pub(crate) sleep_time: Real,
    pub(crate) shapes: Vec<ShapeHandle>,
    pub(crate) contact_links: Vec<ContactHandle>,
    pub(crate) joint_links: Vec<JointHandle>,
    pub(crate) added_to_island: bool,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self::new(BodyKind::Dynamic)
    }
}

impl RigidBody {
    pub fn new(kind: BodyKind) -> Self {
        let mut body = Self {
            id: Handle::INVALID,
            kind,
            transform: Transform::IDENTITY,
            velocity: Velocity::default(),
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            gravity_scale: 1.0,
            rotation_factor: Vec3::ONE,
            auto_sleep: true,
            mass: 0.0,
            inv_mass: 0.0,
            local_inertia: Mat3::ZERO,
            inv_local_inertia: Mat3::ZERO,
            inv_inertia: Mat3::ZERO,
            sleeping: false,
            sleep_time: 0.0,
            shapes: Vec::new(),
            contact_links: Vec::new(),
            joint_links: Vec::new(),
            added_to_island: false,
        };
        body.set_mass_properties(MassProperties::default());
        body
    }

    pub fn dynamic() -> Self {
        Self::new(BodyKind::Dynamic)
    }

    pub fn fixed() -> Self {
        Self::new(BodyKind::Static)
    }

    pub fn kinematic() -> Self {
        Self::new(BodyKind::Kinematic)
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self.update_world_inertia();
        self
    }

    pub fn with_velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.velocity = Velocity { linear, angular };
        self
    }

    pub fn with_damping(mut self, linear: Real, angular: Real) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_gravity_scale(mut self, gravity_scale: Real) -> Self {
        self.gravity_scale = gravity_scale;
        self
    }

    pub fn with_rotation_factor(mut self, rotation_factor: Vec3) -> Self {
        self.rotation_factor = rotation_factor;
        self.recompute_inverses();
        self
    }

    pub fn with_auto_sleep(mut self, auto_sleep: bool) -> Self {
        self.auto_sleep = auto_sleep;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == BodyKind::Dynamic
    }

    pub fn is_static(&self) -> bool {
        self.kind == BodyKind::Static
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    pub fn mass(&self) -> Real {
        self.mass
    }

    pub fn inverse_mass(&self) -> Real {
        self.inv_mass
    }

    /// World-space inverse inertia.
    pub fn inverse_inertia(&self) -> Mat3 {
        self.inv_inertia
    }

    pub fn shapes(&self) -> &[ShapeHandle] {
        &self.shapes
    }

    pub fn contact_links(&self) -> &[ContactHandle] {
        &self.contact_links
    }

    pub fn joint_links(&self) -> &[JointHandle] {
        &self.joint_links
    }

    pub fn wake_up(&mut self) {
        self.sleeping = false;
        self.sleep_time = 0.0;
    }

    pub fn sleep(&mut self) {
        self.sleeping = true;
        self.sleep_time = 0.0;
        self.velocity = Velocity::default();
    }

    pub fn set_velocity(&mut self, linear: Vec3, angular: Vec3) {
        self.velocity = Velocity { linear, angular };
        self.wake_up();
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
        self.update_world_inertia();
        self.wake_up();
    }

    pub fn apply_force(&mut self, force: Vec3, world_point: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.force += force;
        self.torque += (world_point - self.transform.position).cross(force);
        self.wake_up();
    }

    pub fn apply_force_to_center(&mut self, force: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.force += force;
        self.wake_up();
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.torque += torque;
        self.wake_up();
    }

    pub fn apply_impulse(&mut self, impulse: Vec3, world_point: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.velocity.linear += impulse * self.inv_mass;
        let angular_impulse = (world_point - self.transform.position).cross(impulse);
        self.velocity.angular += self.inv_inertia * angular_impulse;
        self.wake_up();
    }

    /// Replaces the body-frame mass data. Dynamic bodies without mass fall
    /// back to unit mass and inertia.
    pub fn set_mass_properties(&mut self, props: MassProperties) {
        if self.is_dynamic() && props.mass <= 0.0 {
            self.mass = 1.0;
            self.local_inertia = Mat3::IDENTITY;
        } else {
            self.mass = props.mass;
            self.local_inertia = props.inertia;
        }
        self.recompute_inverses();
    }

    fn recompute_inverses(&mut self) {
        if !self.is_dynamic() || self.mass <= 0.0 {
            self.inv_mass = 0.0;
            self.inv_local_inertia = Mat3::ZERO;
        } else {
            self.inv_mass = 1.0 / self.mass;
            let inv = if self.local_inertia.determinant().abs() > 1e-18 {
                self.local_inertia.inverse()
            } else {
                Mat3::ZERO
            };
            let factor = Mat3::from_diagonal(self.rotation_factor);
            self.inv_local_inertia = factor * inv * factor;
        }
        self.update_world_inertia();
    }

    pub(crate) fn update_world_inertia(&mut self) {
        self.inv_inertia = world_inertia(self.transform.rotation, self.inv_local_inertia);
    }

    /// Sleep bookkeeping; returns `true` once the body has rested long enough.
    pub(crate) fn update_sleep_time(
        &mut self,
        dt: Real,
        linear_threshold: Real,
        angular_threshold: Real,
        time_threshold: Real,
    ) -> bool {
        let resting = self.velocity.linear.length_squared() < linear_threshold * linear_threshold
            && self.velocity.angular.length_squared() < angular_threshold * angular_threshold;
        if self.auto_sleep && resting {
            self.sleep_time += dt;
        } else {
            self.sleep_time = 0.0;
        }
        self.sleep_time > time_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::InertiaTensorExt;

    #[test]
    fn static_bodies_have_no_inverse_mass() {
        let mut body = RigidBody::fixed();
        body.set_mass_properties(MassProperties {
            mass: 10.0,
            inertia: Mat3::IDENTITY,
        });
        assert_eq!(body.inverse_mass(), 0.0);
        assert_eq!(body.inverse_inertia(), Mat3::ZERO);
    }

    #[test]
    fn rotation_factor_locks_axes() {
        let mut body = RigidBody::dynamic().with_rotation_factor(Vec3::new(0.0, 1.0, 0.0));
        body.set_mass_properties(MassProperties {
            mass: 2.0,
            inertia: Mat3::for_solid_sphere(1.0, 2.0),
        });
        body.apply_impulse(Vec3::X, Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(body.velocity.angular.x, 0.0);
        assert_eq!(body.velocity.angular.z, 0.0);
        assert!(body.velocity.angular.y.abs() > 0.0);
    }

    #[test]
    fn sleep_timer_resets_on_motion() {
        let mut body = RigidBody::dynamic();
        assert!(!body.update_sleep_time(0.6, 0.2, 0.5, 1.0));
        assert!(body.update_sleep_time(0.6, 0.2, 0.5, 1.0));
        body.velocity.linear = Vec3::X;
        assert!(!body.update_sleep_time(0.6, 0.2, 0.5, 1.0));
        assert_eq!(body.sleep_time, 0.0);
    }
}
