//! Contact rows: one non-penetration row and two friction rows per manifold point.

use arrayvec::ArrayVec;

use super::{pair_mut, ConstraintSolver, JacobianRow, PositionCorrection, RowMass, SolverBody, SolverBodySet};
use crate::{
    collision::{contact::Contact, manifold::Manifold},
    config::{SolverSettings, MAX_MANIFOLD_POINTS},
    core::types::TimeStep,
    utils::{allocator::BodyHandle, math::Real},
};

#[derive(Debug, Clone, Copy, Default)]
struct ContactPointRows {
    normal: JacobianRow,
    tangent: JacobianRow,
    binormal: JacobianRow,
    normal_mass: RowMass,
    tangent_mass: RowMass,
    binormal_mass: RowMass,
    /// Velocity target of the normal row.
    rhs: Real,
    /// Pseudo-velocity target of the split-impulse pass.
    rhs_position: Real,
    impulse_p: Real,
}

/// Solver state of one contact for the current step.
///
/// Accumulated impulses live in the [`Manifold`] points so they survive
/// between steps; everything here is rebuilt by `pre_solve_velocity`.
#[derive(Debug, Clone, Default)]
pub struct ContactConstraint {
    b1: usize,
    b2: usize,
    friction: Real,
    restitution: Real,
    position_correction: PositionCorrection,
    rows: ArrayVec<ContactPointRows, MAX_MANIFOLD_POINTS>,
}

impl ContactConstraint {
    pub fn set_material(&mut self, friction: Real, restitution: Real) {
        self.friction = friction;
        self.restitution = restitution;
    }

    pub fn set_position_correction(&mut self, position_correction: PositionCorrection) {
        self.position_correction = position_correction;
    }

    pub fn position_correction(&self) -> PositionCorrection {
        self.position_correction
    }

    /// Builds rows from the manifold. Returns `false` if either body is
    /// missing from the island.
    pub fn pre_solve_velocity(
        &mut self,
        manifold: &Manifold,
        body1: BodyHandle,
        body2: BodyHandle,
        bodies: &SolverBodySet,
        step: &TimeStep,
        settings: &SolverSettings,
    ) -> bool {
        self.rows.clear();
        let (Some(i1), Some(i2)) = (bodies.index_of(body1), bodies.index_of(body2)) else {
            return false;
        };
        self.b1 = i1;
        self.b2 = i2;
        let slice = bodies.as_slice();
        let (b1, b2) = (&slice[i1], &slice[i2]);

        for p in manifold.points() {
            let normal = JacobianRow::linear(p.rel_pos1, p.rel_pos2, manifold.normal);
            let tangent = JacobianRow::linear(p.rel_pos1, p.rel_pos2, manifold.tangent);
            let binormal = JacobianRow::linear(p.rel_pos1, p.rel_pos2, manifold.binormal);

            let normal_velocity = normal.velocity(b1, b2);
            let mut rhs = if normal_velocity < -settings.bounce_threshold {
                -normal_velocity * self.restitution
            } else {
                0.0
            };
            let correction = (p.depth - settings.linear_slop).max(0.0);
            let mut rhs_position = 0.0;
            match self.position_correction {
                PositionCorrection::Baumgarte => {
                    rhs = rhs.max(correction * settings.velocity_baumgarte * step.inv_dt);
                }
                PositionCorrection::SplitImpulse => {
                    rhs_position = correction * settings.split_impulse_baumgarte * step.inv_dt;
                }
                PositionCorrection::Ngs => {}
            }

            let _ = self.rows.try_push(ContactPointRows {
                normal,
                tangent,
                binormal,
                normal_mass: RowMass::new(&normal, b1, b2),
                tangent_mass: RowMass::new(&tangent, b1, b2),
                binormal_mass: RowMass::new(&binormal, b1, b2),
                rhs,
                rhs_position,
                impulse_p: 0.0,
            });
        }
        true
    }

    pub fn warm_start(&mut self, manifold: &mut Manifold, bodies: &mut [SolverBody], step: &TimeStep) {
        if self.rows.is_empty() {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        for (rows, p) in self.rows.iter().zip(manifold.points_mut()) {
            p.normal_impulse *= step.dt_ratio;
            p.tangent_impulse *= step.dt_ratio;
            p.binormal_impulse *= step.dt_ratio;
            rows.normal_mass.apply_impulse(b1, b2, p.normal_impulse);
            rows.tangent_mass.apply_impulse(b1, b2, p.tangent_impulse);
            rows.binormal_mass.apply_impulse(b1, b2, p.binormal_impulse);
        }
    }

    pub fn solve_velocity(&mut self, manifold: &mut Manifold, bodies: &mut [SolverBody]) {
        if self.rows.is_empty() {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);

        // friction first, bounded by the normal impulse of the previous sweep
        for (rows, p) in self.rows.iter().zip(manifold.points_mut()) {
            let max_friction = self.friction * p.normal_impulse;
            let inv_t = rows.tangent_mass.inverse(0.0);
            let inv_b = rows.binormal_mass.inverse(0.0);
            let old_t = p.tangent_impulse;
            let old_b = p.binormal_impulse;
            let mut new_t = old_t - rows.tangent.velocity(b1, b2) * inv_t;
            let mut new_b = old_b - rows.binormal.velocity(b1, b2) * inv_b;
            let magnitude_sq = new_t * new_t + new_b * new_b;
            if magnitude_sq > max_friction * max_friction {
                let scale = if magnitude_sq > 0.0 {
                    max_friction / magnitude_sq.sqrt()
                } else {
                    0.0
                };
                new_t *= scale;
                new_b *= scale;
            }
            p.tangent_impulse = new_t;
            p.binormal_impulse = new_b;
            rows.tangent_mass.apply_impulse(b1, b2, new_t - old_t);
            rows.binormal_mass.apply_impulse(b1, b2, new_b - old_b);
        }

        for (rows, p) in self.rows.iter().zip(manifold.points_mut()) {
            let inv_k = rows.normal_mass.inverse(0.0);
            let old = p.normal_impulse;
            p.normal_impulse = (old + (rows.rhs - rows.normal.velocity(b1, b2)) * inv_k).max(0.0);
            rows.normal_mass
                .apply_impulse(b1, b2, p.normal_impulse - old);
        }
    }

    pub fn solve_position_split_impulse(&mut self, bodies: &mut [SolverBody]) {
        if self.rows.is_empty() || self.position_correction != PositionCorrection::SplitImpulse {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        for rows in self.rows.iter_mut() {
            let inv_k = rows.normal_mass.inverse(0.0);
            let old = rows.impulse_p;
            rows.impulse_p = (old + (rows.rhs_position - rows.normal.pseudo_velocity(b1, b2)) * inv_k).max(0.0);
            rows.normal_mass
                .apply_pseudo_impulse(b1, b2, rows.impulse_p - old);
        }
    }

    /// One NGS iteration: depths are measured again from the current body
    /// positions and the overlap is pushed out directly.
    pub fn solve_position_ngs(&mut self, manifold: &mut Manifold, bodies: &mut [SolverBody], settings: &SolverSettings) {
        if self.rows.is_empty() || self.position_correction != PositionCorrection::Ngs {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        manifold.update_depths_and_positions(&b1.transform(), &b2.transform());
        let normal = manifold.normal;
        for (rows, p) in self.rows.iter_mut().zip(manifold.points()) {
            let jacobian = JacobianRow::linear(p.rel_pos1, p.rel_pos2, normal);
            let mass = RowMass::new(&jacobian, b1, b2);
            let inv_k = mass.inverse(0.0);
            let error = (p.depth - settings.linear_slop).max(0.0) * settings.ngs_baumgarte;
            let old = rows.impulse_p;
            rows.impulse_p = (old + error * inv_k).max(0.0);
            mass.apply_position_impulse(b1, b2, rows.impulse_p - old);
        }
    }
}

impl ConstraintSolver for Contact {
    fn pre_solve_velocity(&mut self, bodies: &SolverBodySet, step: &TimeStep, settings: &SolverSettings) {
        self.constraint
            .pre_solve_velocity(&self.manifold, self.body1, self.body2, bodies, step, settings);
    }

    fn warm_start(&mut self, bodies: &mut [SolverBody], step: &TimeStep) {
        self.constraint.warm_start(&mut self.manifold, bodies, step);
    }

    fn solve_velocity(&mut self, bodies: &mut [SolverBody]) {
        self.constraint.solve_velocity(&mut self.manifold, bodies);
    }

    fn solve_position_split_impulse(&mut self, bodies: &mut [SolverBody]) {
        self.constraint.solve_position_split_impulse(bodies);
    }

    fn solve_position_ngs(&mut self, bodies: &mut [SolverBody], settings: &SolverSettings) {
        self.constraint
            .solve_position_ngs(&mut self.manifold, bodies, settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collision::detector::DetectorResult,
        core::rigidbody::RigidBody,
        utils::math::Vec3,
    };

    fn falling_box_on_ground(velocity: Vec3) -> (Manifold, SolverBodySet, BodyHandle, BodyHandle) {
        let mut ground = RigidBody::fixed();
        ground.id = BodyHandle::new(0, 0);
        let mut body = RigidBody::dynamic().with_position(Vec3::new(0.0, 0.5, 0.0));
        body.id = BodyHandle::new(1, 0);
        body.velocity.linear = velocity;

        let mut result = DetectorResult::default();
        result.normal = Vec3::Y;
        for (x, z) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let on_ground = Vec3::new(x, 0.0, z);
            result.add_point(on_ground, on_ground, 0.0, 0);
        }
        let mut manifold = Manifold::default();
        manifold.build_basis(Vec3::Y);
        manifold.total_update(&result, &ground.transform, &body.transform);

        let mut set = SolverBodySet::default();
        set.insert(&ground);
        set.insert(&body);
        (manifold, set, ground.id, body.id)
    }

    #[test]
    fn normal_rows_stop_approach_and_never_pull() {
        let (mut manifold, mut set, g, b) = falling_box_on_ground(Vec3::new(0.0, -2.0, 0.0));
        let mut constraint = ContactConstraint::default();
        constraint.set_material(0.5, 0.0);
        let step = TimeStep::new(1.0 / 60.0);
        assert!(constraint.pre_solve_velocity(&manifold, g, b, &set, &step, &SolverSettings::default()));
        for _ in 0..50 {
            constraint.solve_velocity(&mut manifold, set.as_mut_slice());
        }
        let v = set.as_slice()[1].linear;
        assert!(v.y.abs() < 1e-4, "{v:?}");
        assert!(manifold.points().iter().all(|p| p.normal_impulse >= 0.0));
    }

    #[test]
    fn friction_is_bounded_by_the_disc() {
        let (mut manifold, mut set, g, b) = falling_box_on_ground(Vec3::new(5.0, -1.0, 3.0));
        let mut constraint = ContactConstraint::default();
        constraint.set_material(0.1, 0.0);
        let step = TimeStep::new(1.0 / 60.0);
        constraint.pre_solve_velocity(&manifold, g, b, &set, &step, &SolverSettings::default());
        for p in manifold.points_mut() {
            p.normal_impulse = 1.0;
        }
        constraint.solve_velocity(&mut manifold, set.as_mut_slice());
        for p in manifold.points() {
            let friction = (p.tangent_impulse.powi(2) + p.binormal_impulse.powi(2)).sqrt();
            assert!(friction <= 0.1 + 1e-9);
        }
        // still sliding: friction alone cannot stop it
        assert!(set.as_slice()[1].linear.x > 1.0);
    }
}
