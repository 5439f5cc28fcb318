//! Constraint rows, per-island solver bodies and the joint solvers.

pub mod contact_solver;
pub mod direct;
pub mod pgs;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        constraints::JointSolverType,
        rigidbody::RigidBody,
        types::{TimeStep, Transform},
    },
    config::SolverSettings,
    error::SolverError,
    utils::{
        allocator::BodyHandle,
        math::{rotation_vector_to_quat, world_inertia, Mat3, Quat, Real, Vec3},
    },
};

pub use contact_solver::ContactConstraint;
pub use direct::DirectJointSolver;
pub use pgs::PgsJointSolver;

/// How positional drift of a constraint is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PositionCorrection {
    /// Error folded into the velocity target.
    #[default]
    Baumgarte,
    /// Error removed by pseudo velocities that are discarded after the step.
    SplitImpulse,
    /// Nonlinear Gauss-Seidel: positions corrected directly.
    Ngs,
}

/// Scratch copy of a body used while one island is solved.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverBody {
    pub handle: BodyHandle,
    pub inv_mass: Real,
    pub inv_inertia: Mat3,
    pub inv_local_inertia: Mat3,
    pub linear: Vec3,
    pub angular: Vec3,
    pub pseudo_linear: Vec3,
    pub pseudo_angular: Vec3,
    pub position: Vec3,
    pub rotation: Quat,
    pub dynamic: bool,
}

impl SolverBody {
    pub fn from_body(body: &RigidBody) -> Self {
        Self {
            handle: body.id,
            inv_mass: body.inv_mass,
            inv_inertia: body.inv_inertia,
            inv_local_inertia: body.inv_local_inertia,
            linear: body.velocity.linear,
            angular: body.velocity.angular,
            pseudo_linear: Vec3::ZERO,
            pseudo_angular: Vec3::ZERO,
            position: body.transform.position,
            rotation: body.transform.rotation,
            dynamic: body.is_dynamic(),
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::from_position_rotation(self.position, self.rotation)
    }

    pub fn update_inertia(&mut self) {
        self.inv_inertia = world_inertia(self.rotation, self.inv_local_inertia);
    }

    /// Displaces the body directly; used by the NGS position pass.
    pub fn apply_position_correction(&mut self, linear: Vec3, angular: Vec3) {
        if !self.dynamic {
            return;
        }
        self.position += linear;
        self.rotation = (rotation_vector_to_quat(angular) * self.rotation).normalize();
        self.update_inertia();
    }
}

/// Solver bodies of one island, addressable by body handle.
#[derive(Debug, Default)]
pub struct SolverBodySet {
    bodies: Vec<SolverBody>,
    index: HashMap<BodyHandle, usize>,
}

impl SolverBodySet {
    pub fn clear(&mut self) {
        self.bodies.clear();
        self.index.clear();
    }

    /// Adds a body once; later calls with the same handle return the first slot.
    pub fn insert(&mut self, body: &RigidBody) -> usize {
        if let Some(&i) = self.index.get(&body.id) {
            return i;
        }
        let i = self.bodies.len();
        self.bodies.push(SolverBody::from_body(body));
        self.index.insert(body.id, i);
        i
    }

    pub fn index_of(&self, handle: BodyHandle) -> Option<usize> {
        self.index.get(&handle).copied()
    }

    pub fn as_slice(&self) -> &[SolverBody] {
        &self.bodies
    }

    pub fn as_mut_slice(&mut self) -> &mut [SolverBody] {
        &mut self.bodies
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// Returns two distinct bodies of the slice mutably.
pub(crate) fn pair_mut(bodies: &mut [SolverBody], i1: usize, i2: usize) -> (&mut SolverBody, &mut SolverBody) {
    debug_assert_ne!(i1, i2);
    if i1 < i2 {
        let (left, right) = bodies.split_at_mut(i2);
        (&mut left[i1], &mut right[0])
    } else {
        let (left, right) = bodies.split_at_mut(i1);
        (&mut right[0], &mut left[i2])
    }
}

/// Velocity Jacobian of one scalar constraint:
/// `Cdot = lin1 . v1 + ang1 . w1 + lin2 . v2 + ang2 . w2`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JacobianRow {
    pub lin1: Vec3,
    pub ang1: Vec3,
    pub lin2: Vec3,
    pub ang2: Vec3,
}

impl JacobianRow {
    /// Relative velocity of the points `r1`, `r2` along `axis`, body 2 minus body 1.
    pub fn linear(r1: Vec3, r2: Vec3, axis: Vec3) -> Self {
        Self {
            lin1: -axis,
            ang1: -r1.cross(axis),
            lin2: axis,
            ang2: r2.cross(axis),
        }
    }

    /// Relative angular velocity along `axis`.
    pub fn angular(axis: Vec3) -> Self {
        Self {
            lin1: Vec3::ZERO,
            ang1: -axis,
            lin2: Vec3::ZERO,
            ang2: axis,
        }
    }

    pub fn velocity(&self, b1: &SolverBody, b2: &SolverBody) -> Real {
        self.lin1.dot(b1.linear) + self.ang1.dot(b1.angular) + self.lin2.dot(b2.linear) + self.ang2.dot(b2.angular)
    }

    pub fn pseudo_velocity(&self, b1: &SolverBody, b2: &SolverBody) -> Real {
        self.lin1.dot(b1.pseudo_linear)
            + self.ang1.dot(b1.pseudo_angular)
            + self.lin2.dot(b2.pseudo_linear)
            + self.ang2.dot(b2.pseudo_angular)
    }
}

/// `M^-1 J^T` split per body, with the row's effective mass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RowMass {
    pub lin1: Vec3,
    pub ang1: Vec3,
    pub lin2: Vec3,
    pub ang2: Vec3,
    /// `J M^-1 J^T`.
    pub k: Real,
}

impl RowMass {
    pub fn new(j: &JacobianRow, b1: &SolverBody, b2: &SolverBody) -> Self {
        let lin1 = j.lin1 * b1.inv_mass;
        let ang1 = b1.inv_inertia * j.ang1;
        let lin2 = j.lin2 * b2.inv_mass;
        let ang2 = b2.inv_inertia * j.ang2;
        let k = j.lin1.dot(lin1) + j.ang1.dot(ang1) + j.lin2.dot(lin2) + j.ang2.dot(ang2);
        Self {
            lin1,
            ang1,
            lin2,
            ang2,
            k,
        }
    }

    /// `1 / (k + cfm)`, zero when the row cannot move either body.
    pub fn inverse(&self, cfm: Real) -> Real {
        let k = self.k + cfm;
        if k > 1e-12 {
            1.0 / k
        } else {
            0.0
        }
    }

    /// Coupling `J_other M^-1 J_self^T`.
    pub fn coupling(&self, other: &JacobianRow) -> Real {
        other.lin1.dot(self.lin1) + other.ang1.dot(self.ang1) + other.lin2.dot(self.lin2) + other.ang2.dot(self.ang2)
    }

    pub fn apply_impulse(&self, b1: &mut SolverBody, b2: &mut SolverBody, impulse: Real) {
        b1.linear += self.lin1 * impulse;
        b1.angular += self.ang1 * impulse;
        b2.linear += self.lin2 * impulse;
        b2.angular += self.ang2 * impulse;
    }

    pub fn apply_pseudo_impulse(&self, b1: &mut SolverBody, b2: &mut SolverBody, impulse: Real) {
        b1.pseudo_linear += self.lin1 * impulse;
        b1.pseudo_angular += self.ang1 * impulse;
        b2.pseudo_linear += self.lin2 * impulse;
        b2.pseudo_angular += self.ang2 * impulse;
    }

    pub fn apply_position_impulse(&self, b1: &mut SolverBody, b2: &mut SolverBody, impulse: Real) {
        b1.apply_position_correction(self.lin1 * impulse, self.ang1 * impulse);
        b2.apply_position_correction(self.lin2 * impulse, self.ang2 * impulse);
    }
}

/// One scalar joint constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintRow {
    pub jacobian: JacobianRow,
    /// Velocity target.
    pub rhs: Real,
    /// Pseudo-velocity target of the split-impulse pass.
    pub rhs_position: Real,
    /// Position error to remove, in constraint space.
    pub error: Real,
    pub cfm: Real,
    pub lower: Real,
    pub upper: Real,
    pub motor_speed: Real,
    pub motor_max_impulse: Real,
    pub impulse: Real,
    pub motor_impulse: Real,
    pub impulse_p: Real,
    pub mass: RowMass,
    /// Index of the persisted impulse this row reads and writes back.
    pub slot: usize,
}

impl Default for ConstraintRow {
    fn default() -> Self {
        Self {
            jacobian: JacobianRow::default(),
            rhs: 0.0,
            rhs_position: 0.0,
            error: 0.0,
            cfm: 0.0,
            lower: Real::NEG_INFINITY,
            upper: Real::INFINITY,
            motor_speed: 0.0,
            motor_max_impulse: 0.0,
            impulse: 0.0,
            motor_impulse: 0.0,
            impulse_p: 0.0,
            mass: RowMass::default(),
            slot: 0,
        }
    }
}

impl ConstraintRow {
    pub fn has_motor(&self) -> bool {
        self.motor_max_impulse > 0.0
    }

    pub fn is_locked(&self) -> bool {
        self.lower == self.upper
    }

    pub(crate) fn update_mass(&mut self, b1: &SolverBody, b2: &SolverBody) {
        self.mass = RowMass::new(&self.jacobian, b1, b2);
    }

    /// Solves the motor part: drive `Cdot` towards `motor_speed`.
    pub(crate) fn solve_motor(&mut self, b1: &mut SolverBody, b2: &mut SolverBody) {
        let inv_k = self.mass.inverse(0.0);
        let cdot = self.jacobian.velocity(b1, b2);
        let old = self.motor_impulse;
        self.motor_impulse = (old + (self.motor_speed - cdot) * inv_k)
            .clamp(-self.motor_max_impulse, self.motor_max_impulse);
        self.mass.apply_impulse(b1, b2, self.motor_impulse - old);
    }
}

/// Per-step solving interface shared by contacts and joints.
///
/// Every call receives the island's solver bodies; implementors resolve their
/// two bodies in `pre_solve_velocity` and keep the indices for the step.
pub trait ConstraintSolver {
    fn pre_solve_velocity(&mut self, bodies: &SolverBodySet, step: &TimeStep, settings: &SolverSettings);
    fn warm_start(&mut self, bodies: &mut [SolverBody], step: &TimeStep);
    fn solve_velocity(&mut self, bodies: &mut [SolverBody]);
    fn post_solve_velocity(&mut self, _step: &TimeStep) {}
    fn pre_solve_position(&mut self, _bodies: &[SolverBody], _step: &TimeStep, _settings: &SolverSettings) {}
    fn solve_position_split_impulse(&mut self, bodies: &mut [SolverBody]);
    fn solve_position_ngs(&mut self, bodies: &mut [SolverBody], settings: &SolverSettings);
    fn post_solve(&mut self, _step: &TimeStep) {}
}

/// Algorithm a joint's rows are solved with.
#[derive(Debug, Clone)]
pub enum JointSolver {
    Pgs(PgsJointSolver),
    Direct(DirectJointSolver),
}

impl JointSolver {
    pub fn new(solver_type: JointSolverType) -> Self {
        match solver_type {
            JointSolverType::Iterative => JointSolver::Pgs(PgsJointSolver),
            JointSolverType::Direct => JointSolver::Direct(DirectJointSolver::default()),
        }
    }

    pub fn pre_solve(&mut self, rows: &[ConstraintRow]) {
        if let JointSolver::Direct(direct) = self {
            direct.pre_solve(rows);
        }
    }

    pub fn warm_start(&self, rows: &mut [ConstraintRow], b1: &mut SolverBody, b2: &mut SolverBody, dt_ratio: Real) {
        for row in rows.iter_mut() {
            row.impulse *= dt_ratio;
            row.motor_impulse *= dt_ratio;
            row.mass
                .apply_impulse(b1, b2, row.impulse + row.motor_impulse);
        }
    }

    pub fn solve_velocity(
        &mut self,
        rows: &mut [ConstraintRow],
        b1: &mut SolverBody,
        b2: &mut SolverBody,
    ) -> Result<(), SolverError> {
        match self {
            JointSolver::Pgs(pgs) => {
                pgs.solve_velocity(rows, b1, b2);
                Ok(())
            }
            JointSolver::Direct(direct) => direct.solve_velocity(rows, b1, b2),
        }
    }

    pub fn solve_split_impulse(
        &mut self,
        rows: &mut [ConstraintRow],
        b1: &mut SolverBody,
        b2: &mut SolverBody,
    ) -> Result<(), SolverError> {
        match self {
            JointSolver::Pgs(pgs) => {
                pgs.solve_split_impulse(rows, b1, b2);
                Ok(())
            }
            JointSolver::Direct(direct) => direct.solve_split_impulse(rows, b1, b2),
        }
    }

    /// One NGS iteration over rows freshly built from the current positions.
    pub fn solve_ngs(
        &mut self,
        rows: &mut [ConstraintRow],
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        baumgarte: Real,
    ) -> Result<(), SolverError> {
        match self {
            JointSolver::Pgs(pgs) => {
                pgs.solve_ngs(rows, b1, b2, baumgarte);
                Ok(())
            }
            JointSolver::Direct(direct) => direct.solve_ngs(rows, b1, b2, baumgarte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_body(handle: u32) -> SolverBody {
        SolverBody {
            handle: BodyHandle::new(handle as usize, 0),
            inv_mass: 1.0,
            inv_inertia: Mat3::IDENTITY,
            inv_local_inertia: Mat3::IDENTITY,
            linear: Vec3::ZERO,
            angular: Vec3::ZERO,
            pseudo_linear: Vec3::ZERO,
            pseudo_angular: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            dynamic: true,
        }
    }

    #[test]
    fn impulse_along_row_changes_velocity_by_k() {
        let mut b1 = unit_body(0);
        let mut b2 = unit_body(1);
        let row = JacobianRow::linear(Vec3::new(0.0, 1.0, 0.0), Vec3::ZERO, Vec3::X);
        let mass = RowMass::new(&row, &b1, &b2);
        mass.apply_impulse(&mut b1, &mut b2, 2.0);
        assert!((row.velocity(&b1, &b2) - 2.0 * mass.k).abs() < 1e-12);
        assert!((mass.k - 3.0).abs() < 1e-12);
    }

    #[test]
    fn pair_mut_returns_requested_order() {
        let mut bodies = vec![unit_body(0), unit_body(1), unit_body(2)];
        let (a, b) = pair_mut(&mut bodies, 2, 0);
        assert_eq!(a.handle.index(), 2);
        assert_eq!(b.handle.index(), 0);
    }
}
