//! The world: owns bodies, shapes and joints and drives the per-step pipeline.

use crate::{
    collision::{
        contact::{Contact, ContactCallback},
        contact_manager::{ContactContext, ContactManager},
        detector::GjkEpa,
    },
    config::WorldSettings,
    core::{
        collider::{CallbackId, Collider, ColliderShape},
        constraints::{Joint, JointDef, LimitMotor},
        rigidbody::RigidBody,
        types::{MassProperties, TimeStep, Transform},
    },
    dynamics::island::{IslandContext, IslandManager},
    error::WorldError,
    utils::{
        allocator::{BodyHandle, ContactHandle, JointHandle, Pool, ShapeHandle},
        logging::ScopedTimer,
        math::{Real, Vec3},
    },
};

/// Nearest hit of a [`World::convex_cast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvexCastResult {
    pub shape: ShapeHandle,
    /// Fraction of the translation travelled before the first touch.
    pub toi: Real,
    /// Surface normal at the hit, pointing from the cast shape towards the hit shape.
    pub normal: Vec3,
    /// Contact point on the hit shape.
    pub position: Vec3,
}

/// Central simulation container: owns bodies, shapes, joints and contacts.
pub struct World {
    settings: WorldSettings,
    bodies: Pool<RigidBody>,
    shapes: Pool<Collider>,
    joints: Pool<Joint>,
    contact_manager: ContactManager,
    islands: IslandManager,
    callbacks: Vec<Box<dyn ContactCallback>>,
    time_step: TimeStep,
    broken_joints: Vec<JointHandle>,
    caster: GjkEpa,
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldSettings::default())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("bodies", &self.bodies.len())
            .field("shapes", &self.shapes.len())
            .field("joints", &self.joints.len())
            .field("contacts", &self.contact_manager.num_contacts())
            .finish()
    }
}

impl World {
    pub fn new(settings: WorldSettings) -> Self {
        Self {
            contact_manager: ContactManager::new(&settings),
            settings,
            bodies: Pool::new(),
            shapes: Pool::new(),
            joints: Pool::new(),
            islands: IslandManager::new(),
            callbacks: Vec::new(),
            time_step: TimeStep::new(0.0),
            broken_joints: Vec::new(),
            caster: GjkEpa::new(),
        }
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn gravity(&self) -> Vec3 {
        self.settings.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.settings.gravity = gravity;
    }

    pub fn set_disable_sleeping(&mut self, disable: bool) {
        self.settings.disable_sleeping = disable;
    }

    pub fn add_body(&mut self, body: RigidBody) -> BodyHandle {
        self.bodies.insert_with(|id| {
            let mut body = body;
            body.id = id;
            body.shapes.clear();
            body.contact_links.clear();
            body.joint_links.clear();
            body.update_world_inertia();
            body
        })
    }

    /// Removes a body together with its shapes and joints.
    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<RigidBody, WorldError> {
        let body = self.bodies.get(handle).ok_or(WorldError::InvalidHandle(handle))?;
        let joints = body.joint_links.clone();
        let shapes = body.shapes.clone();
        for joint in joints {
            self.remove_joint(joint)?;
        }
        for shape in shapes {
            self.remove_shape(shape)?;
        }
        self.bodies.remove(handle).ok_or(WorldError::InvalidHandle(handle))
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    /// Mutable access to a body. Velocity and force setters wake the body;
    /// use [`World::set_body_transform`] to teleport it.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &RigidBody> + '_ {
        self.bodies.iter().map(|(_, b)| b)
    }

    pub fn num_bodies(&self) -> usize {
        self.bodies.len()
    }

    pub fn set_body_transform(&mut self, handle: BodyHandle, transform: Transform) -> Result<(), WorldError> {
        let body = self.bodies.get_mut(handle).ok_or(WorldError::InvalidHandle(handle))?;
        body.set_transform(transform);
        sync_body_shapes(&mut self.shapes, &mut self.contact_manager, body);
        Ok(())
    }

    pub fn wake_up_body(&mut self, handle: BodyHandle) -> Result<(), WorldError> {
        self.bodies
            .get_mut(handle)
            .ok_or(WorldError::InvalidHandle(handle))?
            .wake_up();
        Ok(())
    }

    /// Attaches a shape to a body; the body's mass properties are recomputed
    /// from all of its shapes.
    pub fn add_shape(&mut self, body: BodyHandle, collider: Collider) -> Result<ShapeHandle, WorldError> {
        let owner = self.bodies.get(body).ok_or(WorldError::InvalidHandle(body))?;
        let body_transform = owner.transform;
        let handle = self.shapes.insert_with(|id| {
            let mut collider = collider;
            collider.id = id;
            collider.body = body;
            collider.sync(&body_transform);
            collider.previous_transform = collider.transform;
            collider
        });
        if let Some(collider) = self.shapes.get_mut(handle) {
            self.contact_manager.create_proxy(collider);
        }
        if let Some(owner) = self.bodies.get_mut(body) {
            owner.shapes.push(handle);
            owner.wake_up();
        }
        self.update_mass(body);
        Ok(handle)
    }

    /// Detaches a shape, destroying its contacts and its proxy.
    pub fn remove_shape(&mut self, handle: ShapeHandle) -> Result<Collider, WorldError> {
        let body = self
            .shapes
            .get(handle)
            .ok_or(WorldError::InvalidHandle(handle))?
            .body;
        self.wake_contact_partners(body, Some(handle));
        self.contact_manager
            .destroy_contacts_of_shape(handle, body, &mut self.bodies, &mut self.callbacks);
        let mut collider = self.shapes.remove(handle).ok_or(WorldError::InvalidHandle(handle))?;
        self.contact_manager.destroy_proxy(&mut collider);
        if let Some(owner) = self.bodies.get_mut(body) {
            owner.shapes.retain(|&s| s != handle);
            owner.wake_up();
        }
        self.update_mass(body);
        Ok(collider)
    }

    pub fn shape(&self, handle: ShapeHandle) -> Option<&Collider> {
        self.shapes.get(handle)
    }

    pub fn num_shapes(&self) -> usize {
        self.shapes.len()
    }

    pub fn add_joint(&mut self, def: &JointDef) -> Result<JointHandle, WorldError> {
        if def.body1 == def.body2 {
            return Err(WorldError::SameBody(def.body1));
        }
        let tf1 = self
            .bodies
            .get(def.body1)
            .ok_or(WorldError::InvalidHandle(def.body1))?
            .transform;
        let tf2 = self
            .bodies
            .get(def.body2)
            .ok_or(WorldError::InvalidHandle(def.body2))?
            .transform;
        let handle = self.joints.insert_with(|id| {
            let mut joint = Joint::new(def, &tf1, &tf2);
            joint.id = id;
            joint
        });
        for body in [def.body1, def.body2] {
            if let Some(body) = self.bodies.get_mut(body) {
                body.joint_links.push(handle);
                body.wake_up();
            }
        }
        Ok(handle)
    }

    pub fn remove_joint(&mut self, handle: JointHandle) -> Result<Joint, WorldError> {
        let joint = self.joints.remove(handle).ok_or(WorldError::InvalidHandle(handle))?;
        for body in [joint.body1, joint.body2] {
            if let Some(body) = self.bodies.get_mut(body) {
                body.joint_links.retain(|&j| j != handle);
                body.wake_up();
            }
        }
        Ok(joint)
    }

    pub fn joint(&self, handle: JointHandle) -> Option<&Joint> {
        self.joints.get(handle)
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    /// Changes a revolute or prismatic joint's limit/motor and wakes its bodies.
    pub fn set_joint_limit_motor(&mut self, handle: JointHandle, limit_motor: LimitMotor) -> Result<(), WorldError> {
        let joint = self.joints.get_mut(handle).ok_or(WorldError::InvalidHandle(handle))?;
        joint.set_limit_motor(limit_motor);
        for body in [joint.body1, joint.body2] {
            if let Some(body) = self.bodies.get_mut(body) {
                body.wake_up();
            }
        }
        Ok(())
    }

    /// Registers a contact callback; pass the returned id to
    /// [`crate::core::collider::ColliderBuilder::callback`].
    pub fn register_callback(&mut self, callback: impl ContactCallback + 'static) -> CallbackId {
        self.callbacks.push(Box::new(callback));
        self.callbacks.len() - 1
    }

    pub fn contact_manager(&self) -> &ContactManager {
        &self.contact_manager
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> + '_ {
        self.contact_manager.contacts()
    }

    pub fn num_contacts(&self) -> usize {
        self.contact_manager.num_contacts()
    }

    pub fn contact(&self, handle: ContactHandle) -> Option<&Contact> {
        self.contact_manager.contact(handle)
    }

    pub fn num_islands(&self) -> usize {
        self.islands.num_islands()
    }

    /// Advances the simulation by `dt` seconds.
    pub fn step(&mut self, dt: Real) {
        let _timer = ScopedTimer::new("world::step");
        self.time_step = self.time_step.next(dt);
        let time_step = self.time_step;

        self.sync_shapes();
        {
            let _timer = ScopedTimer::new("contacts::update");
            let mut ctx = ContactContext {
                shapes: &self.shapes,
                bodies: &mut self.bodies,
                joints: &self.joints,
                callbacks: &mut self.callbacks,
                settings: &self.settings.solver,
            };
            self.contact_manager.update(&mut ctx);
        }
        {
            let _timer = ScopedTimer::new("islands::solve");
            let mut ctx = IslandContext {
                bodies: &mut self.bodies,
                contacts: self.contact_manager.contacts_mut(),
                joints: &mut self.joints,
                callbacks: &mut self.callbacks,
                settings: &self.settings,
                broken_joints: &mut self.broken_joints,
            };
            self.islands.solve(&mut ctx, &time_step);
        }
        self.sync_shapes();

        for handle in std::mem::take(&mut self.broken_joints) {
            if let Ok(joint) = self.remove_joint(handle) {
                log::warn!(
                    "joint {handle:?} broke (force {:.3}, torque {:.3})",
                    joint.applied_force().length(),
                    joint.applied_torque().length()
                );
            }
        }

        for (_, body) in self.bodies.iter_mut() {
            body.force = Vec3::ZERO;
            body.torque = Vec3::ZERO;
        }
    }

    /// Sweeps a convex shape by `translation` and reports the nearest shape it
    /// would touch. Terrain shapes are not considered.
    pub fn convex_cast(
        &mut self,
        shape: &ColliderShape,
        transform: &Transform,
        translation: Vec3,
    ) -> Option<ConvexCastResult> {
        let convex = shape.as_convex()?;
        let swept = shape.compute_aabb(transform).swept(translation);
        let mut best: Option<ConvexCastResult> = None;

        for (handle, collider) in self.shapes.iter() {
            if !collider.aabb().overlaps(&swept) {
                continue;
            }
            let Some(target) = collider.shape.as_convex() else {
                continue;
            };
            match self
                .caster
                .convex_cast(&convex, &target, transform, collider.transform(), translation, Vec3::ZERO)
            {
                Ok(Some(hit)) if best.map_or(true, |b| hit.toi < b.toi) => {
                    best = Some(ConvexCastResult {
                        shape: handle,
                        toi: hit.toi,
                        normal: hit.normal,
                        position: hit.point2,
                    });
                }
                Ok(_) => {}
                Err(err) => log::debug!("convex cast against {handle:?} failed: {err}"),
            }
        }
        best
    }

    fn sync_shapes(&mut self) {
        for (_, body) in self.bodies.iter() {
            if body.sleeping || body.is_static() {
                continue;
            }
            sync_body_shapes(&mut self.shapes, &mut self.contact_manager, body);
        }
    }

    fn update_mass(&mut self, handle: BodyHandle) {
        let Some(body) = self.bodies.get_mut(handle) else {
            return;
        };
        let props = body
            .shapes
            .iter()
            .filter_map(|&s| self.shapes.get(s))
            .map(Collider::body_mass_properties)
            .fold(MassProperties::default(), |acc, p| acc + p);
        body.set_mass_properties(props);
    }

    /// Wakes bodies touching `body` (through `shape` only, when given).
    fn wake_contact_partners(&mut self, body: BodyHandle, shape: Option<ShapeHandle>) {
        let Some(links) = self.bodies.get(body).map(|b| b.contact_links.clone()) else {
            return;
        };
        for handle in links {
            let Some(contact) = self.contact_manager.contact(handle) else {
                continue;
            };
            if shape.is_some_and(|s| contact.shape1 != s && contact.shape2 != s) {
                continue;
            }
            let other = contact.other_body(body);
            if let Some(other) = self.bodies.get_mut(other) {
                other.wake_up();
            }
        }
    }
}

fn sync_body_shapes(shapes: &mut Pool<Collider>, manager: &mut ContactManager, body: &RigidBody) {
    for &s in &body.shapes {
        if let Some(collider) = shapes.get_mut(s) {
            let displacement = collider.sync(&body.transform);
            manager.move_proxy(collider, displacement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collider::ColliderBuilder;

    #[test]
    fn removing_a_body_cleans_up_shapes_joints_and_contacts() {
        let mut world = World::default();
        let ground = world.add_body(RigidBody::fixed());
        world
            .add_shape(ground, ColliderBuilder::cuboid(Vec3::new(5.0, 0.5, 5.0)).build().unwrap())
            .unwrap();
        let ball = world.add_body(RigidBody::dynamic().with_position(Vec3::new(0.0, 0.9, 0.0)));
        world.add_shape(ball, ColliderBuilder::sphere(0.5).build().unwrap()).unwrap();
        let other = world.add_body(RigidBody::dynamic().with_position(Vec3::new(3.0, 3.0, 0.0)));
        world
            .add_joint(&JointDef::spherical(ball, other, Vec3::new(1.0, 1.0, 0.0)))
            .unwrap();

        world.step(1.0 / 60.0);
        assert_eq!(world.contacts().count(), 1);

        world.remove_body(ball).unwrap();
        assert_eq!(world.num_shapes(), 1);
        assert_eq!(world.num_joints(), 0);
        assert_eq!(world.contacts().count(), 0);
        assert!(world.body(ground).unwrap().contact_links().is_empty());
        assert!(world.body(other).unwrap().joint_links().is_empty());
        assert_eq!(world.remove_body(ball).unwrap_err(), WorldError::InvalidHandle(ball));
    }

    #[test]
    fn shapes_define_body_mass() {
        let mut world = World::default();
        let body = world.add_body(RigidBody::dynamic());
        world
            .add_shape(body, ColliderBuilder::cuboid(Vec3::splat(0.5)).density(2.0).build().unwrap())
            .unwrap();
        assert!((world.body(body).unwrap().mass() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn joints_reject_a_single_body() {
        let mut world = World::default();
        let body = world.add_body(RigidBody::dynamic());
        let err = world.add_joint(&JointDef::fixed(body, body, Vec3::ZERO)).unwrap_err();
        assert_eq!(err, WorldError::SameBody(body));
    }
}
