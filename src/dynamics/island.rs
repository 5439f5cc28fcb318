//! Island construction, sleeping and the per-island solver pipeline.

use crate::{
    collision::contact::{CallbackHook, Contact, ContactCallback},
    config::WorldSettings,
    core::{
        constraints::Joint,
        rigidbody::{BodyKind, RigidBody},
        types::TimeStep,
    },
    dynamics::{
        integrator::Integrator,
        solver::{ConstraintSolver, SolverBody, SolverBodySet},
    },
    utils::{
        allocator::{BodyHandle, ContactHandle, JointHandle, Pool},
        math::Vec3,
    },
};

/// World state an island step reads and writes.
pub(crate) struct IslandContext<'a> {
    pub bodies: &'a mut Pool<RigidBody>,
    pub contacts: &'a mut Pool<Contact>,
    pub joints: &'a mut Pool<Joint>,
    pub callbacks: &'a mut [Box<dyn ContactCallback>],
    pub settings: &'a WorldSettings,
    /// Joints whose applied force or torque exceeded their break limits.
    pub broken_joints: &'a mut Vec<JointHandle>,
}

/// Bodies connected through touching contacts and joints, solved together.
#[derive(Debug, Default)]
pub struct Island {
    bodies: Vec<BodyHandle>,
    contacts: Vec<ContactHandle>,
    joints: Vec<JointHandle>,
    solver_bodies: SolverBodySet,
}

fn each_constraint(
    contacts: &[ContactHandle],
    joints: &[JointHandle],
    contact_pool: &mut Pool<Contact>,
    joint_pool: &mut Pool<Joint>,
    mut f: impl FnMut(&mut dyn ConstraintSolver),
) {
    for &h in contacts {
        if let Some(contact) = contact_pool.get_mut(h) {
            f(contact);
        }
    }
    for &h in joints {
        if let Some(joint) = joint_pool.get_mut(h) {
            f(joint);
        }
    }
}

impl Island {
    pub fn bodies(&self) -> &[BodyHandle] {
        &self.bodies
    }

    pub fn contacts(&self) -> &[ContactHandle] {
        &self.contacts
    }

    pub fn joints(&self) -> &[JointHandle] {
        &self.joints
    }

    fn clear(&mut self) {
        self.bodies.clear();
        self.contacts.clear();
        self.joints.clear();
        self.solver_bodies.clear();
    }

    /// Advances the island by one step. Returns `false` when the island was
    /// put to sleep instead of being solved.
    pub(crate) fn step(
        &mut self,
        ctx: &mut IslandContext<'_>,
        time_step: &TimeStep,
        velocity_iterations: usize,
        position_iterations: usize,
    ) -> bool {
        let settings = ctx.settings;
        let dt = time_step.dt;
        let integrator = Integrator::new(settings);

        let mut sleepy = !settings.disable_sleeping;
        for &h in &self.bodies {
            let Some(body) = ctx.bodies.get_mut(h) else {
                continue;
            };
            let rested = body.update_sleep_time(
                dt,
                settings.sleeping_velocity_threshold,
                settings.sleeping_angular_velocity_threshold,
                settings.sleeping_time_threshold,
            );
            sleepy &= rested;
            integrator.integrate_velocity(body, dt);
        }
        if sleepy {
            for &h in &self.bodies {
                if let Some(body) = ctx.bodies.get_mut(h) {
                    body.sleep();
                }
            }
            log::trace!("island of {} bodies fell asleep", self.bodies.len());
            return false;
        }

        let Island {
            bodies,
            contacts,
            joints,
            solver_bodies,
        } = self;

        // island bodies first, then the static or kinematic partners
        for &h in bodies.iter() {
            if let Some(body) = ctx.bodies.get_mut(h) {
                body.sleeping = false;
                solver_bodies.insert(body);
            }
        }
        for &h in contacts.iter() {
            if let Some(c) = ctx.contacts.get(h) {
                for b in [c.body1, c.body2] {
                    if let Some(body) = ctx.bodies.get(b) {
                        solver_bodies.insert(body);
                    }
                }
            }
        }
        for &h in joints.iter() {
            if let Some(j) = ctx.joints.get(h) {
                for b in [j.body1, j.body2] {
                    if let Some(body) = ctx.bodies.get(b) {
                        solver_bodies.insert(body);
                    }
                }
            }
        }

        let solver_settings = &settings.solver;
        each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
            c.pre_solve_velocity(solver_bodies, time_step, solver_settings)
        });
        each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
            c.warm_start(solver_bodies.as_mut_slice(), time_step)
        });
        for _ in 0..velocity_iterations {
            each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
                c.solve_velocity(solver_bodies.as_mut_slice())
            });
        }
        each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
            c.post_solve_velocity(time_step)
        });

        for body in solver_bodies.as_mut_slice().iter_mut().filter(|b| b.dynamic) {
            integrator.integrate_position(body, dt);
        }

        each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
            c.pre_solve_position(solver_bodies.as_slice(), time_step, solver_settings)
        });
        for _ in 0..position_iterations {
            each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
                c.solve_position_split_impulse(solver_bodies.as_mut_slice())
            });
        }
        for body in solver_bodies.as_mut_slice().iter_mut().filter(|b| b.dynamic) {
            integrator.integrate_pseudo_velocity(body, dt);
        }
        for _ in 0..position_iterations {
            each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| {
                c.solve_position_ngs(solver_bodies.as_mut_slice(), solver_settings)
            });
        }
        each_constraint(contacts, joints, ctx.contacts, ctx.joints, |c| c.post_solve(time_step));

        for &h in bodies.iter() {
            let (Some(body), Some(i)) = (ctx.bodies.get_mut(h), solver_bodies.index_of(h)) else {
                continue;
            };
            write_back(body, &solver_bodies.as_slice()[i]);
        }

        for &h in contacts.iter() {
            if let Some(contact) = ctx.contacts.get(h) {
                contact.fire(ctx.callbacks, CallbackHook::PostSolve);
            }
        }
        for &h in joints.iter() {
            if ctx.joints.get(h).is_some_and(|j| j.should_break()) {
                ctx.broken_joints.push(h);
            }
        }
        true
    }

    /// Fast path for a dynamic body without any contact or joint.
    pub(crate) fn step_single(ctx: &mut IslandContext<'_>, handle: BodyHandle, time_step: &TimeStep) {
        let settings = ctx.settings;
        let Some(body) = ctx.bodies.get_mut(handle) else {
            return;
        };
        let rested = body.update_sleep_time(
            time_step.dt,
            settings.sleeping_velocity_threshold,
            settings.sleeping_angular_velocity_threshold,
            settings.sleeping_time_threshold,
        );
        if rested && !settings.disable_sleeping {
            body.sleep();
            return;
        }
        let integrator = Integrator::new(settings);
        integrator.integrate_velocity(body, time_step.dt);
        let mut solver_body = SolverBody::from_body(body);
        integrator.integrate_position(&mut solver_body, time_step.dt);
        write_back(body, &solver_body);
    }
}

fn write_back(body: &mut RigidBody, solver_body: &SolverBody) {
    body.velocity.linear = solver_body.linear;
    body.velocity.angular = solver_body.angular;
    body.transform.position = solver_body.position;
    body.transform.rotation = solver_body.rotation;
    body.update_world_inertia();
}

/// Builds and steps every island of the world.
#[derive(Debug, Default)]
pub struct IslandManager {
    island: Island,
    stack: Vec<BodyHandle>,
    seeds: Vec<BodyHandle>,
    links: Vec<ContactHandle>,
    num_islands: usize,
}

impl IslandManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Islands solved during the last step, lone bodies excluded.
    pub fn num_islands(&self) -> usize {
        self.num_islands
    }

    pub(crate) fn solve(&mut self, ctx: &mut IslandContext<'_>, time_step: &TimeStep) {
        self.num_islands = 0;
        for (_, body) in ctx.bodies.iter_mut() {
            body.added_to_island = false;
        }
        for (_, contact) in ctx.contacts.iter_mut() {
            contact.added_to_island = false;
        }
        for (_, joint) in ctx.joints.iter_mut() {
            joint.added_to_island = false;
        }

        self.step_kinematic_bodies(ctx, time_step);

        ctx.bodies.collect_handles(&mut self.seeds);
        for i in 0..self.seeds.len() {
            let seed = self.seeds[i];
            let Some(body) = ctx.bodies.get_mut(seed) else {
                continue;
            };
            if body.added_to_island || body.sleeping || !body.is_dynamic() {
                continue;
            }
            body.added_to_island = true;
            if body.contact_links.is_empty() && body.joint_links.is_empty() {
                Island::step_single(ctx, seed, time_step);
                continue;
            }

            self.build_island(ctx, seed);
            let settings = ctx.settings;
            self.island.step(
                ctx,
                time_step,
                settings.velocity_iterations,
                settings.position_iterations,
            );
            self.num_islands += 1;
        }
    }

    /// Explicit-stack traversal from `seed`. Only dynamic bodies propagate.
    fn build_island(&mut self, ctx: &mut IslandContext<'_>, seed: BodyHandle) {
        self.island.clear();
        self.stack.clear();
        self.stack.push(seed);

        while let Some(handle) = self.stack.pop() {
            self.island.bodies.push(handle);
            let Some(body) = ctx.bodies.get(handle) else {
                continue;
            };
            self.links.clear();
            self.links.extend_from_slice(&body.contact_links);
            let joint_links = body.joint_links.clone();

            for &c in &self.links {
                let Some(contact) = ctx.contacts.get_mut(c) else {
                    continue;
                };
                if contact.added_to_island || !contact.touching {
                    continue;
                }
                contact.added_to_island = true;
                self.island.contacts.push(c);
                let other = contact.other_body(handle);
                visit(ctx.bodies, other, &mut self.stack);
            }

            for j in joint_links {
                let Some(joint) = ctx.joints.get_mut(j) else {
                    continue;
                };
                if joint.added_to_island {
                    continue;
                }
                joint.added_to_island = true;
                self.island.joints.push(j);
                let other = joint.other_body(handle);
                visit(ctx.bodies, other, &mut self.stack);
            }
        }
    }

    /// Kinematic bodies move by their velocity and wake what they push.
    fn step_kinematic_bodies(&mut self, ctx: &mut IslandContext<'_>, time_step: &TimeStep) {
        let integrator = Integrator::new(ctx.settings);
        let mut woken = Vec::new();
        for (handle, body) in ctx.bodies.iter_mut() {
            if body.kind != BodyKind::Kinematic {
                continue;
            }
            let mut solver_body = SolverBody::from_body(body);
            integrator.integrate_position(&mut solver_body, time_step.dt);
            write_back(body, &solver_body);
            if body.velocity.linear != Vec3::ZERO || body.velocity.angular != Vec3::ZERO {
                woken.extend(body.contact_links.iter().map(|&c| (handle, c)));
            }
        }
        for (handle, c) in woken {
            let Some(other) = ctx.contacts.get(c).filter(|c| c.touching).map(|c| c.other_body(handle)) else {
                continue;
            };
            if let Some(body) = ctx.bodies.get_mut(other) {
                if body.sleeping {
                    body.wake_up();
                }
            }
        }
    }
}

fn visit(bodies: &mut Pool<RigidBody>, handle: BodyHandle, stack: &mut Vec<BodyHandle>) {
    let Some(body) = bodies.get_mut(handle) else {
        return;
    };
    if !body.is_dynamic() || body.added_to_island {
        return;
    }
    body.added_to_island = true;
    if body.sleeping {
        body.wake_up();
    }
    stack.push(handle);
}
