//! Persistent shape-pair contacts and the user callback interface.

use crate::{
    collision::{
        detector::{CachedDetectorData, CollisionMatrix, DetectorResult},
        manifold::Manifold,
    },
    config::{ALTERNATIVE_CONTACT_POSITION_CORRECTION, DEFAULT_CONTACT_POSITION_CORRECTION, SolverSettings},
    core::{
        collider::{CallbackId, Collider},
        types::{Material, Transform},
    },
    dynamics::solver::{ContactConstraint, PositionCorrection},
    error::GjkEpaError,
    utils::{
        allocator::{BodyHandle, ContactHandle, ShapeHandle},
        math::{Real, Vec3},
    },
};

/// Hooks fired by the world while contacts change state.
///
/// A shape registers one callback; both shapes' callbacks see every event of
/// the contacts they take part in.
pub trait ContactCallback: Send {
    /// The two shapes started touching.
    fn begin_contact(&mut self, _contact: &Contact) {}
    /// The contact is about to be solved this step.
    fn pre_solve(&mut self, _contact: &Contact) {}
    /// The contact was solved; impulses are final for the step.
    fn post_solve(&mut self, _contact: &Contact) {}
    /// The two shapes stopped touching, or the contact was destroyed while touching.
    fn end_contact(&mut self, _contact: &Contact) {}
}

/// Touching-state transition produced by [`Contact::update_manifold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactEvent {
    None,
    Began,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackHook {
    Begin,
    PreSolve,
    PostSolve,
    End,
}

/// Contact between two shapes whose proxies overlap.
#[derive(Debug, Clone)]
pub struct Contact {
    pub(crate) id: ContactHandle,
    pub(crate) shape1: ShapeHandle,
    pub(crate) shape2: ShapeHandle,
    pub(crate) body1: BodyHandle,
    pub(crate) body2: BodyHandle,
    pub(crate) callback1: Option<CallbackId>,
    pub(crate) callback2: Option<CallbackId>,
    pub(crate) manifold: Manifold,
    pub(crate) cache: CachedDetectorData,
    pub(crate) result: DetectorResult,
    pub(crate) constraint: ContactConstraint,
    pub(crate) touching: bool,
    /// Re-seen by the broad-phase this step.
    pub(crate) latest: bool,
    /// Both bodies were asleep when the pair was last visited.
    pub(crate) should_be_skipped: bool,
    pub(crate) added_to_island: bool,
}

impl Contact {
    pub(crate) fn new(id: ContactHandle, c1: &Collider, c2: &Collider, settings: &SolverSettings) -> Self {
        let pair = Material::combine_pair(&c1.material, &c2.material);
        let mut constraint = ContactConstraint::default();
        constraint.set_material(pair.friction, pair.restitution);
        constraint.set_position_correction(DEFAULT_CONTACT_POSITION_CORRECTION);
        Self {
            id,
            shape1: c1.id,
            shape2: c2.id,
            body1: c1.body,
            body2: c2.body,
            callback1: c1.callback,
            callback2: c2.callback,
            manifold: Manifold::new(settings.persistence_threshold),
            cache: CachedDetectorData::default(),
            result: DetectorResult::default(),
            constraint,
            touching: false,
            latest: true,
            should_be_skipped: false,
            added_to_island: false,
        }
    }

    pub fn id(&self) -> ContactHandle {
        self.id
    }

    pub fn shape1(&self) -> ShapeHandle {
        self.shape1
    }

    pub fn shape2(&self) -> ShapeHandle {
        self.shape2
    }

    pub fn body1(&self) -> BodyHandle {
        self.body1
    }

    pub fn body2(&self) -> BodyHandle {
        self.body2
    }

    pub fn is_touching(&self) -> bool {
        self.touching
    }

    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    /// Contact normal, from shape 1 towards shape 2.
    pub fn normal(&self) -> Vec3 {
        self.manifold.normal
    }

    /// Sum of the normal impulses of the last solve.
    pub fn total_normal_impulse(&self) -> Real {
        self.manifold.points().iter().map(|p| p.normal_impulse).sum()
    }

    pub fn position_correction(&self) -> PositionCorrection {
        self.constraint.position_correction()
    }

    pub fn other_body(&self, body: BodyHandle) -> BodyHandle {
        if body == self.body1 {
            self.body2
        } else {
            self.body1
        }
    }

    /// Distinct callbacks registered on the two shapes.
    pub(crate) fn callbacks(&self) -> impl Iterator<Item = CallbackId> {
        let second = if self.callback2 != self.callback1 {
            self.callback2
        } else {
            None
        };
        self.callback1.into_iter().chain(second)
    }

    /// Runs narrow-phase for the pair and brings the manifold up to date.
    ///
    /// `tf1` and `tf2` are the transforms of the bodies owning the shapes. On
    /// error the touching state is left as it was.
    pub fn update_manifold(
        &mut self,
        matrix: &mut CollisionMatrix,
        shape1: &Collider,
        shape2: &Collider,
        tf1: &Transform,
        tf2: &Transform,
        settings: &SolverSettings,
    ) -> Result<ContactEvent, GjkEpaError> {
        matrix.detect(
            &mut self.result,
            &shape1.shape,
            &shape2.shape,
            shape1.transform(),
            shape2.transform(),
            &mut self.cache,
        )?;

        let was_touching = self.touching;
        self.touching = self.result.is_touching();

        if self.touching {
            self.manifold.build_basis(self.result.normal);
            let correction = if self.result.max_depth() > settings.alternative_correction_depth {
                ALTERNATIVE_CONTACT_POSITION_CORRECTION
            } else {
                DEFAULT_CONTACT_POSITION_CORRECTION
            };
            self.constraint.set_position_correction(correction);
            if self.result.incremental {
                self.manifold.incremental_update(&self.result, tf1, tf2);
            } else {
                self.manifold.total_update(&self.result, tf1, tf2);
            }
        } else {
            self.manifold.clear();
        }

        Ok(match (was_touching, self.touching) {
            (false, true) => ContactEvent::Began,
            (true, false) => ContactEvent::Ended,
            _ => ContactEvent::None,
        })
    }

    /// Invokes `hook` on every callback registered by the two shapes.
    pub(crate) fn fire(&self, callbacks: &mut [Box<dyn ContactCallback>], hook: CallbackHook) {
        for id in self.callbacks() {
            let Some(callback) = callbacks.get_mut(id) else {
                log::warn!("contact {:?} refers to unknown callback {id}", self.id);
                continue;
            };
            match hook {
                CallbackHook::Begin => callback.begin_contact(self),
                CallbackHook::PreSolve => callback.pre_solve(self),
                CallbackHook::PostSolve => callback.post_solve(self),
                CallbackHook::End => callback.end_contact(self),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{core::collider::ColliderBuilder, utils::allocator::Handle};

    fn sphere_at(id: usize, y: f64) -> Collider {
        let mut c = ColliderBuilder::sphere(1.0).build().unwrap();
        c.id = Handle::new(id, 0);
        c.body = Handle::new(id, 0);
        c.sync(&Transform::from_position(Vec3::new(0.0, y, 0.0)));
        c
    }

    #[test]
    fn begin_and_end_are_reported_once() {
        let settings = SolverSettings::default();
        let mut matrix = CollisionMatrix::new();
        let a = sphere_at(0, 0.0);
        let mut b = sphere_at(1, 1.5);
        let mut contact = Contact::new(Handle::new(0, 0), &a, &b, &settings);

        let tf_a = *a.transform();
        let mut tf_b = *b.transform();
        let first = contact
            .update_manifold(&mut matrix, &a, &b, &tf_a, &tf_b, &settings)
            .unwrap();
        assert_eq!(first, ContactEvent::Began);
        assert_eq!(contact.manifold().num_points(), 1);
        assert!((contact.normal() - Vec3::Y).length() < 1e-12);
        // 0.5 deep: past the alternative correction threshold
        assert_eq!(contact.position_correction(), ALTERNATIVE_CONTACT_POSITION_CORRECTION);

        let again = contact
            .update_manifold(&mut matrix, &a, &b, &tf_a, &tf_b, &settings)
            .unwrap();
        assert_eq!(again, ContactEvent::None);

        tf_b = Transform::from_position(Vec3::new(0.0, 3.0, 0.0));
        b.sync(&tf_b);
        let gone = contact
            .update_manifold(&mut matrix, &a, &b, &tf_a, &tf_b, &settings)
            .unwrap();
        assert_eq!(gone, ContactEvent::Ended);
        assert_eq!(contact.manifold().num_points(), 0);
    }

    #[test]
    fn shared_callback_is_listed_once() {
        let settings = SolverSettings::default();
        let mut a = sphere_at(0, 0.0);
        let mut b = sphere_at(1, 1.5);
        a.callback = Some(3);
        b.callback = Some(3);
        let contact = Contact::new(Handle::new(0, 0), &a, &b, &settings);
        assert_eq!(contact.callbacks().collect::<Vec<_>>(), vec![3]);
    }

    struct Counter(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl ContactCallback for Counter {
        fn begin_contact(&mut self, _contact: &Contact) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn fire_skips_unknown_callbacks() {
        let settings = SolverSettings::default();
        let mut a = sphere_at(0, 0.0);
        let mut b = sphere_at(1, 1.5);
        a.callback = Some(0);
        b.callback = Some(7);
        let contact = Contact::new(Handle::new(0, 0), &a, &b, &settings);
        let begins = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut callbacks: Vec<Box<dyn ContactCallback>> = vec![Box::new(Counter(begins.clone()))];
        contact.fire(&mut callbacks, CallbackHook::Begin);
        contact.fire(&mut callbacks, CallbackHook::End);
        assert_eq!(begins.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
