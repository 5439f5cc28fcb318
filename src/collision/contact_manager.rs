//! Contact lifetime: creation from broad-phase pairs, narrow-phase updates and
//! destruction of stale pairs.

use crate::{
    collision::{
        broadphase::{BroadPhase, BruteForceBroadPhase, GridBroadPhase},
        contact::{CallbackHook, Contact, ContactCallback, ContactEvent},
        detector::CollisionMatrix,
    },
    config::{BroadPhaseKind, SolverSettings, WorldSettings, DEFAULT_PROXY_PADDING},
    core::{collider::Collider, constraints::Joint, rigidbody::RigidBody},
    utils::{
        allocator::{BodyHandle, ContactHandle, JointHandle, Pool, ShapeHandle},
        math::Vec3,
    },
};

/// World state the contact manager reads and updates.
pub(crate) struct ContactContext<'a> {
    pub shapes: &'a Pool<Collider>,
    pub bodies: &'a mut Pool<RigidBody>,
    pub joints: &'a Pool<Joint>,
    pub callbacks: &'a mut [Box<dyn ContactCallback>],
    pub settings: &'a SolverSettings,
}

/// Owns the broad-phase, the detector table and every live contact.
#[derive(Debug)]
pub struct ContactManager {
    contacts: Pool<Contact>,
    broad_phase: Box<dyn BroadPhase>,
    matrix: CollisionMatrix,
    scratch: Vec<ContactHandle>,
}

impl ContactManager {
    pub fn new(settings: &WorldSettings) -> Self {
        let broad_phase: Box<dyn BroadPhase> = match settings.broad_phase {
            BroadPhaseKind::BruteForce => Box::new(BruteForceBroadPhase::new()),
            BroadPhaseKind::Grid { cell_size } => {
                Box::new(GridBroadPhase::new(cell_size, DEFAULT_PROXY_PADDING))
            }
        };
        Self::with_broad_phase(broad_phase, settings.enable_gjk_caching)
    }

    pub fn with_broad_phase(broad_phase: Box<dyn BroadPhase>, gjk_caching: bool) -> Self {
        Self {
            contacts: Pool::new(),
            broad_phase,
            matrix: CollisionMatrix::with_gjk_caching(gjk_caching),
            scratch: Vec::new(),
        }
    }

    pub fn broad_phase(&self) -> &dyn BroadPhase {
        self.broad_phase.as_ref()
    }

    pub fn num_contacts(&self) -> usize {
        self.contacts.len()
    }

    pub fn contact(&self, handle: ContactHandle) -> Option<&Contact> {
        self.contacts.get(handle)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> + '_ {
        self.contacts.iter().map(|(_, c)| c)
    }

    pub(crate) fn contacts_mut(&mut self) -> &mut Pool<Contact> {
        &mut self.contacts
    }

    pub(crate) fn matrix_mut(&mut self) -> &mut CollisionMatrix {
        &mut self.matrix
    }

    pub(crate) fn create_proxy(&mut self, collider: &mut Collider) {
        collider.proxy = Some(self.broad_phase.create_proxy(collider.id, &collider.aabb));
    }

    pub(crate) fn destroy_proxy(&mut self, collider: &mut Collider) {
        if let Some(proxy) = collider.proxy.take() {
            self.broad_phase.destroy_proxy(proxy);
        }
    }

    pub(crate) fn move_proxy(&mut self, collider: &Collider, displacement: Vec3) {
        if let Some(proxy) = collider.proxy {
            self.broad_phase.move_proxy(proxy, &collider.aabb, displacement);
        }
    }

    /// Runs one full contact pass: new pairs, stale pairs, then narrow-phase.
    pub(crate) fn update(&mut self, ctx: &mut ContactContext<'_>) {
        self.create_contacts(ctx);
        self.destroy_outdated_contacts(ctx);
        self.update_manifolds(ctx);
    }

    fn create_contacts(&mut self, ctx: &mut ContactContext<'_>) {
        self.broad_phase.collect_pairs();
        for pair in self.broad_phase.pairs() {
            let (Some(a), Some(b)) = (
                self.broad_phase.proxy_shape(pair.proxy1),
                self.broad_phase.proxy_shape(pair.proxy2),
            ) else {
                continue;
            };
            let (s1, s2) = if a.index() <= b.index() { (a, b) } else { (b, a) };
            let (Some(c1), Some(c2)) = (ctx.shapes.get(s1), ctx.shapes.get(s2)) else {
                continue;
            };
            if !should_collide(c1, c2, ctx.bodies, ctx.joints) {
                continue;
            }

            if let Some(existing) = find_contact(&self.contacts, ctx.bodies, c1.body, s1, s2) {
                if let Some(contact) = self.contacts.get_mut(existing) {
                    contact.latest = true;
                }
                continue;
            }

            let settings = ctx.settings;
            let handle = self
                .contacts
                .insert_with(|id| Contact::new(id, c1, c2, settings));
            for body in [c1.body, c2.body] {
                if let Some(body) = ctx.bodies.get_mut(body) {
                    body.contact_links.push(handle);
                }
            }
            log::trace!("contact {handle:?} created for shapes {s1:?} and {s2:?}");
        }
    }

    fn destroy_outdated_contacts(&mut self, ctx: &mut ContactContext<'_>) {
        let incremental = self.broad_phase.is_incremental();
        let mut handles = std::mem::take(&mut self.scratch);
        self.contacts.collect_handles(&mut handles);

        for &handle in &handles {
            let Some(contact) = self.contacts.get_mut(handle) else {
                continue;
            };
            let shapes = (ctx.shapes.get(contact.shape1), ctx.shapes.get(contact.shape2));
            let (Some(c1), Some(c2)) = shapes else {
                self.destroy_contact(handle, ctx.bodies, ctx.callbacks);
                continue;
            };
            if !should_collide(c1, c2, ctx.bodies, ctx.joints) {
                self.destroy_contact(handle, ctx.bodies, ctx.callbacks);
                continue;
            }

            if contact.latest {
                contact.latest = false;
                contact.should_be_skipped = false;
                continue;
            }
            if !incremental {
                self.destroy_contact(handle, ctx.bodies, ctx.callbacks);
                continue;
            }

            let resting = |b: BodyHandle| ctx.bodies.get(b).is_some_and(|b| b.sleeping || b.is_static());
            if resting(contact.body1) && resting(contact.body2) {
                contact.should_be_skipped = true;
                continue;
            }
            let overlapping = match (c1.proxy, c2.proxy) {
                (Some(p1), Some(p2)) => self.broad_phase.is_overlapping(p1, p2),
                _ => false,
            };
            if !overlapping {
                self.destroy_contact(handle, ctx.bodies, ctx.callbacks);
                continue;
            }
            contact.should_be_skipped = !c1.aabb.overlaps(&c2.aabb);
        }

        self.scratch = handles;
    }

    /// Refreshes every contact not skipped this step, then reports
    /// `pre_solve` once for each touching contact, skipped or not, whether or
    /// not its island ends up being solved.
    fn update_manifolds(&mut self, ctx: &mut ContactContext<'_>) {
        for (handle, contact) in self.contacts.iter_mut() {
            if !contact.should_be_skipped {
                let shapes = (ctx.shapes.get(contact.shape1), ctx.shapes.get(contact.shape2));
                let bodies = (ctx.bodies.get(contact.body1), ctx.bodies.get(contact.body2));
                if let ((Some(c1), Some(c2)), (Some(b1), Some(b2))) = (shapes, bodies) {
                    let (tf1, tf2) = (b1.transform, b2.transform);
                    match contact.update_manifold(&mut self.matrix, c1, c2, &tf1, &tf2, ctx.settings) {
                        Ok(ContactEvent::Began) => contact.fire(ctx.callbacks, CallbackHook::Begin),
                        Ok(ContactEvent::Ended) => contact.fire(ctx.callbacks, CallbackHook::End),
                        Ok(ContactEvent::None) => {}
                        Err(err) => {
                            log::debug!("narrow-phase skipped contact {handle:?}: {err}");
                        }
                    }
                }
            }
            if contact.touching {
                contact.fire(ctx.callbacks, CallbackHook::PreSolve);
            }
        }
    }

    /// Removes a contact, reporting `end_contact` if it was touching.
    pub(crate) fn destroy_contact(
        &mut self,
        handle: ContactHandle,
        bodies: &mut Pool<RigidBody>,
        callbacks: &mut [Box<dyn ContactCallback>],
    ) {
        let Some(contact) = self.contacts.remove(handle) else {
            return;
        };
        if contact.touching {
            contact.fire(callbacks, CallbackHook::End);
        }
        for body in [contact.body1, contact.body2] {
            if let Some(body) = bodies.get_mut(body) {
                body.contact_links.retain(|&c| c != handle);
            }
        }
        log::trace!("contact {handle:?} destroyed");
    }

    /// Destroys every contact the shape takes part in.
    pub(crate) fn destroy_contacts_of_shape(
        &mut self,
        shape: ShapeHandle,
        body: BodyHandle,
        bodies: &mut Pool<RigidBody>,
        callbacks: &mut [Box<dyn ContactCallback>],
    ) {
        let Some(links) = bodies.get(body).map(|b| b.contact_links.clone()) else {
            return;
        };
        for handle in links {
            let involved = self
                .contacts
                .get(handle)
                .is_some_and(|c| c.shape1 == shape || c.shape2 == shape);
            if involved {
                self.destroy_contact(handle, bodies, callbacks);
            }
        }
    }
}

fn find_contact(
    contacts: &Pool<Contact>,
    bodies: &Pool<RigidBody>,
    body: BodyHandle,
    shape1: ShapeHandle,
    shape2: ShapeHandle,
) -> Option<ContactHandle> {
    bodies.get(body)?.contact_links.iter().copied().find(|&h| {
        contacts
            .get(h)
            .is_some_and(|c| c.shape1 == shape1 && c.shape2 == shape2)
    })
}

fn joint_forbids_collision(joints: &Pool<Joint>, links: &[JointHandle], other: BodyHandle) -> bool {
    links.iter().any(|&h| {
        joints
            .get(h)
            .is_some_and(|j| !j.allow_collision && (j.body1 == other || j.body2 == other))
    })
}

/// Whether a contact may exist between the two shapes.
pub(crate) fn should_collide(
    c1: &Collider,
    c2: &Collider,
    bodies: &Pool<RigidBody>,
    joints: &Pool<Joint>,
) -> bool {
    if c1.body == c2.body {
        return false;
    }
    let (Some(b1), Some(b2)) = (bodies.get(c1.body), bodies.get(c2.body)) else {
        return false;
    };
    if !b1.is_dynamic() && !b2.is_dynamic() {
        return false;
    }
    if !c1.filter.accepts(&c2.filter) {
        return false;
    }
    let (links, other) = if b1.joint_links.len() <= b2.joint_links.len() {
        (&b1.joint_links, c2.body)
    } else {
        (&b2.joint_links, c1.body)
    };
    !joint_forbids_collision(joints, links, other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{collider::ColliderBuilder, types::Transform};

    struct Scene {
        shapes: Pool<Collider>,
        bodies: Pool<RigidBody>,
        joints: Pool<Joint>,
        manager: ContactManager,
        settings: SolverSettings,
    }

    impl Scene {
        fn new(kind: BroadPhaseKind) -> Self {
            let settings = WorldSettings {
                broad_phase: kind,
                ..WorldSettings::default()
            };
            Self {
                shapes: Pool::new(),
                bodies: Pool::new(),
                joints: Pool::new(),
                manager: ContactManager::new(&settings),
                settings: settings.solver,
            }
        }

        fn add(&mut self, body: RigidBody, builder: ColliderBuilder) -> (BodyHandle, ShapeHandle) {
            let b = self.bodies.insert_with(|id| RigidBody { id, ..body });
            let mut collider = builder.build().unwrap();
            collider.body = b;
            let tf = self.bodies.get(b).unwrap().transform;
            collider.sync(&tf);
            let s = self.shapes.insert_with(|id| Collider { id, ..collider });
            let collider = self.shapes.get_mut(s).unwrap();
            self.manager.create_proxy(collider);
            self.bodies.get_mut(b).unwrap().shapes.push(s);
            (b, s)
        }

        fn step(&mut self) {
            let mut callbacks: Vec<Box<dyn ContactCallback>> = Vec::new();
            let mut ctx = ContactContext {
                shapes: &self.shapes,
                bodies: &mut self.bodies,
                joints: &self.joints,
                callbacks: &mut callbacks,
                settings: &self.settings,
            };
            self.manager.update(&mut ctx);
        }

        fn move_body(&mut self, body: BodyHandle, position: Vec3) {
            let b = self.bodies.get_mut(body).unwrap();
            b.transform = Transform::from_position(position);
            let tf = b.transform;
            for &s in b.shapes.clone().iter() {
                let c = self.shapes.get_mut(s).unwrap();
                let d = c.sync(&tf);
                self.manager.move_proxy(c, d);
            }
        }
    }

    fn run_lifecycle(kind: BroadPhaseKind) {
        let mut scene = Scene::new(kind);
        let (ground, _) = scene.add(RigidBody::fixed(), ColliderBuilder::cuboid(Vec3::new(5.0, 0.5, 5.0)));
        let (ball, _) = scene.add(
            RigidBody::dynamic().with_position(Vec3::new(0.0, 0.9, 0.0)),
            ColliderBuilder::sphere(0.5),
        );

        scene.step();
        assert_eq!(scene.manager.num_contacts(), 1);
        let contact = scene.manager.contacts().next().unwrap();
        assert!(contact.is_touching());
        assert_eq!(scene.bodies.get(ground).unwrap().contact_links().len(), 1);
        assert_eq!(scene.bodies.get(ball).unwrap().contact_links().len(), 1);

        scene.step();
        assert_eq!(scene.manager.num_contacts(), 1);

        scene.move_body(ball, Vec3::new(0.0, 10.0, 0.0));
        scene.step();
        assert_eq!(scene.manager.num_contacts(), 0);
        assert!(scene.bodies.get(ball).unwrap().contact_links().is_empty());
        assert!(scene.bodies.get(ground).unwrap().contact_links().is_empty());
    }

    #[test]
    fn contacts_live_while_pairs_overlap_brute_force() {
        run_lifecycle(BroadPhaseKind::BruteForce);
    }

    #[test]
    fn contacts_live_while_pairs_overlap_grid() {
        run_lifecycle(BroadPhaseKind::Grid { cell_size: 2.0 });
    }

    #[test]
    fn static_pairs_and_filtered_pairs_never_collide() {
        let mut scene = Scene::new(BroadPhaseKind::BruteForce);
        scene.add(RigidBody::fixed(), ColliderBuilder::sphere(1.0));
        scene.add(RigidBody::fixed(), ColliderBuilder::sphere(1.0));
        scene.add(RigidBody::dynamic(), ColliderBuilder::sphere(1.0).filter(2, !1));
        scene.step();
        assert_eq!(scene.manager.num_contacts(), 0);
    }

    #[test]
    fn removing_a_shape_destroys_its_contacts() {
        let mut scene = Scene::new(BroadPhaseKind::BruteForce);
        scene.add(RigidBody::fixed(), ColliderBuilder::sphere(1.0));
        let (b, s) = scene.add(RigidBody::dynamic(), ColliderBuilder::sphere(1.0));
        scene.step();
        assert_eq!(scene.manager.num_contacts(), 1);
        let mut callbacks: Vec<Box<dyn ContactCallback>> = Vec::new();
        scene
            .manager
            .destroy_contacts_of_shape(s, b, &mut scene.bodies, &mut callbacks);
        assert_eq!(scene.manager.num_contacts(), 0);
    }
}
