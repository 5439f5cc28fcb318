//! Projected Gauss-Seidel over joint rows.

use super::{ConstraintRow, SolverBody};
use crate::utils::math::Real;

/// Sweeps rows one at a time, clamping each accumulated impulse to its bounds.
/// Motors run before the limit and equality parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgsJointSolver;

impl PgsJointSolver {
    pub fn solve_velocity(&self, rows: &mut [ConstraintRow], b1: &mut SolverBody, b2: &mut SolverBody) {
        for row in rows.iter_mut().filter(|r| r.has_motor()) {
            row.solve_motor(b1, b2);
        }

        for row in rows.iter_mut() {
            let inv_k = row.mass.inverse(row.cfm);
            if inv_k == 0.0 {
                continue;
            }
            let cdot = row.jacobian.velocity(b1, b2);
            let old = row.impulse;
            let delta = (row.rhs - cdot - row.cfm * old) * inv_k;
            row.impulse = (old + delta).clamp(row.lower, row.upper);
            row.mass.apply_impulse(b1, b2, row.impulse - old);
        }
    }

    pub fn solve_split_impulse(&self, rows: &mut [ConstraintRow], b1: &mut SolverBody, b2: &mut SolverBody) {
        for row in rows.iter_mut() {
            let inv_k = row.mass.inverse(0.0);
            if inv_k == 0.0 {
                continue;
            }
            let cdot = row.jacobian.pseudo_velocity(b1, b2);
            let old = row.impulse_p;
            row.impulse_p = (old + (row.rhs_position - cdot) * inv_k).clamp(row.lower, row.upper);
            row.mass
                .apply_pseudo_impulse(b1, b2, row.impulse_p - old);
        }
    }

    pub fn solve_ngs(&self, rows: &mut [ConstraintRow], b1: &mut SolverBody, b2: &mut SolverBody, baumgarte: Real) {
        for row in rows.iter_mut() {
            let inv_k = row.mass.inverse(0.0);
            if inv_k == 0.0 {
                continue;
            }
            let old = row.impulse_p;
            row.impulse_p = (old + row.error * baumgarte * inv_k).clamp(row.lower, row.upper);
            row.mass
                .apply_position_impulse(b1, b2, row.impulse_p - old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dynamics::solver::{JacobianRow, RowMass},
        utils::{
            allocator::BodyHandle,
            math::{Mat3, Quat, Vec3},
        },
    };

    fn body(inv_mass: Real, linear: Vec3) -> SolverBody {
        SolverBody {
            handle: BodyHandle::default(),
            inv_mass,
            inv_inertia: Mat3::IDENTITY * inv_mass,
            inv_local_inertia: Mat3::IDENTITY * inv_mass,
            linear,
            angular: Vec3::ZERO,
            pseudo_linear: Vec3::ZERO,
            pseudo_angular: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            dynamic: inv_mass > 0.0,
        }
    }

    #[test]
    fn equality_row_removes_relative_velocity() {
        let mut b1 = body(0.0, Vec3::ZERO);
        let mut b2 = body(1.0, Vec3::new(0.0, -3.0, 0.0));
        let jacobian = JacobianRow::linear(Vec3::ZERO, Vec3::ZERO, Vec3::Y);
        let mut rows = [ConstraintRow {
            jacobian,
            mass: RowMass::new(&jacobian, &b1, &b2),
            ..ConstraintRow::default()
        }];
        PgsJointSolver.solve_velocity(&mut rows, &mut b1, &mut b2);
        assert!(b2.linear.y.abs() < 1e-12);
        assert!((rows[0].impulse - 3.0).abs() < 1e-12);
    }

    #[test]
    fn motor_impulse_is_capped() {
        let mut b1 = body(0.0, Vec3::ZERO);
        let mut b2 = body(1.0, Vec3::ZERO);
        let jacobian = JacobianRow::angular(Vec3::Z);
        let mut rows = [ConstraintRow {
            jacobian,
            mass: RowMass::new(&jacobian, &b1, &b2),
            lower: 0.0,
            upper: 0.0,
            motor_speed: 10.0,
            motor_max_impulse: 0.5,
            ..ConstraintRow::default()
        }];
        PgsJointSolver.solve_velocity(&mut rows, &mut b1, &mut b2);
        assert!((b2.angular.z - 0.5).abs() < 1e-12);
        assert_eq!(rows[0].impulse, 0.0);
    }
}
