//! Row construction for the joint kinds and the per-step joint solving hooks.

use arrayvec::ArrayVec;

use crate::{
    config::{SolverSettings, MAX_JACOBIAN_ROWS},
    core::{
        constraints::{Joint, JointFrame, JointKind, LimitMotor, RowImpulse},
        types::{TimeStep, Transform},
    },
    dynamics::solver::{
        pair_mut, ConstraintRow, ConstraintSolver, JacobianRow, PositionCorrection, SolverBody, SolverBodySet,
    },
    error::SolverError,
    utils::math::{quat_to_rotation_vector, Mat3, Quat, Real, Vec3},
};

type Rows = ArrayVec<ConstraintRow, MAX_JACOBIAN_ROWS>;

/// Joint frame evaluated at the current body poses.
struct JointGeometry {
    r1: Vec3,
    r2: Vec3,
    anchor1: Vec3,
    anchor2: Vec3,
    basis1: Mat3,
    basis2: Mat3,
}

impl JointGeometry {
    fn new(frame: &JointFrame, b1: &SolverBody, b2: &SolverBody) -> Self {
        let rot1 = Mat3::from_quat(b1.rotation);
        let rot2 = Mat3::from_quat(b2.rotation);
        let r1 = rot1 * frame.local_anchor1;
        let r2 = rot2 * frame.local_anchor2;
        Self {
            r1,
            r2,
            anchor1: b1.position + r1,
            anchor2: b2.position + r2,
            basis1: rot1 * frame.local_basis1,
            basis2: rot2 * frame.local_basis2,
        }
    }

    /// Rotation of body 2 about the joint axis, relative to the creation pose.
    fn hinge_angle(&self) -> Real {
        let axis = self.basis1.col(0);
        let y1 = self.basis1.col(1);
        let y2 = self.basis2.col(1);
        y1.cross(y2).dot(axis).atan2(y1.dot(y2))
    }

    /// Rotation taking frame 1 onto frame 2, as a rotation vector.
    fn rotation_error(&self) -> Vec3 {
        quat_to_rotation_vector(Quat::from_mat3(&(self.basis2 * self.basis1.transpose())))
    }
}

struct RowBuilder<'a> {
    b1: &'a SolverBody,
    b2: &'a SolverBody,
    settings: &'a SolverSettings,
    correction: PositionCorrection,
    dt: Real,
    inv_dt: Real,
    rows: Rows,
}

impl RowBuilder<'_> {
    fn push(&mut self, slot: usize, jacobian: JacobianRow, error: Real, lower: Real, upper: Real, motor: Option<&LimitMotor>) {
        let mut row = ConstraintRow {
            jacobian,
            error,
            lower,
            upper,
            slot,
            ..ConstraintRow::default()
        };
        match self.correction {
            PositionCorrection::Baumgarte => row.rhs = error * self.settings.velocity_baumgarte * self.inv_dt,
            PositionCorrection::SplitImpulse => {
                row.rhs_position = error * self.settings.split_impulse_baumgarte * self.inv_dt
            }
            PositionCorrection::Ngs => {}
        }
        if let Some(lm) = motor.filter(|lm| lm.has_motor()) {
            row.motor_speed = lm.motor_speed;
            row.motor_max_impulse = lm.max_motor_force * self.dt;
        }
        row.update_mass(self.b1, self.b2);
        let _ = self.rows.try_push(row);
    }

    /// Keeps `c` at zero.
    fn equality(&mut self, slot: usize, jacobian: JacobianRow, c: Real) {
        self.push(slot, jacobian, -c, Real::NEG_INFINITY, Real::INFINITY, None);
    }

    /// Limit and motor along one axis whose current coordinate is `value`.
    /// Nothing is emitted while the axis is free and has no motor.
    fn limit_motor(&mut self, slot: usize, jacobian: JacobianRow, value: Real, lm: &LimitMotor, slop: Real) {
        let (error, lower, upper) = if !lm.is_limited() {
            (0.0, 0.0, 0.0)
        } else if lm.lower == lm.upper {
            (lm.lower - value, Real::NEG_INFINITY, Real::INFINITY)
        } else if value <= lm.lower {
            ((lm.lower - value - slop).max(0.0), 0.0, Real::INFINITY)
        } else if value >= lm.upper {
            ((lm.upper - value + slop).min(0.0), Real::NEG_INFINITY, 0.0)
        } else {
            (0.0, 0.0, 0.0)
        };
        let inactive = lower == 0.0 && upper == 0.0;
        if inactive && !(lm.has_motor() && self.dt > 0.0) {
            return;
        }
        self.push(slot, jacobian, error, lower, upper, Some(lm));
    }

    fn point_rows(&mut self, g: &JointGeometry) {
        let gap = g.anchor2 - g.anchor1;
        for (slot, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
            self.equality(slot, JacobianRow::linear(g.r1, g.r2, axis), gap.dot(axis));
        }
    }

    fn orientation_rows(&mut self, g: &JointGeometry) {
        let error = g.rotation_error();
        for (i, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
            self.equality(3 + i, JacobianRow::angular(axis), error.dot(axis));
        }
    }
}

/// Builds the rows of a joint at the current poses of its bodies.
///
/// Slots: 0-2 translational rows, 3-5 rotational rows. A revolute joint's
/// hinge row and a prismatic joint's axis row each take the slot left free by
/// the constrained axis.
fn build_rows(
    frame: &JointFrame,
    b1: &SolverBody,
    b2: &SolverBody,
    settings: &SolverSettings,
    correction: PositionCorrection,
    step: &TimeStep,
) -> Rows {
    let g = JointGeometry::new(frame, b1, b2);
    let mut builder = RowBuilder {
        b1,
        b2,
        settings,
        correction,
        dt: step.dt,
        inv_dt: step.inv_dt,
        rows: Rows::new(),
    };

    match &frame.kind {
        JointKind::Spherical => builder.point_rows(&g),
        JointKind::Fixed => {
            builder.point_rows(&g);
            builder.orientation_rows(&g);
        }
        JointKind::Revolute { limit_motor } => {
            builder.point_rows(&g);
            let axis = g.basis1.col(0);
            let swing = axis.cross(g.basis2.col(0));
            for (slot, dir) in [(3, g.basis1.col(1)), (4, g.basis1.col(2))] {
                builder.equality(slot, JacobianRow::angular(dir), swing.dot(dir));
            }
            let angle = g.hinge_angle();
            builder.limit_motor(5, JacobianRow::angular(axis), angle, limit_motor, settings.angular_slop);
        }
        JointKind::Prismatic { limit_motor } => {
            let gap = g.anchor2 - g.anchor1;
            // lever of body 1 reaches the anchor of body 2
            let r1 = g.r1 + gap;
            for (slot, dir) in [(0, g.basis1.col(1)), (1, g.basis1.col(2))] {
                builder.equality(slot, JacobianRow::linear(r1, g.r2, dir), gap.dot(dir));
            }
            let axis = g.basis1.col(0);
            builder.limit_motor(
                2,
                JacobianRow::linear(r1, g.r2, axis),
                gap.dot(axis),
                limit_motor,
                settings.linear_slop,
            );
            builder.orientation_rows(&g);
        }
    }
    builder.rows
}

impl Joint {
    /// Current hinge angle (revolute) or axis translation (prismatic).
    pub fn axis_position(&self, tf1: &Transform, tf2: &Transform) -> Real {
        let body = |tf: &Transform| SolverBody {
            position: tf.position,
            rotation: tf.rotation,
            ..SolverBody::default()
        };
        let g = JointGeometry::new(&self.frame, &body(tf1), &body(tf2));
        match self.frame.kind {
            JointKind::Revolute { .. } => g.hinge_angle(),
            JointKind::Prismatic { .. } => (g.anchor2 - g.anchor1).dot(g.basis1.col(0)),
            JointKind::Spherical | JointKind::Fixed => 0.0,
        }
    }

    fn report_failure(&self, err: SolverError) {
        log::warn!("joint {:?} left unsolved this iteration: {err}", self.id);
    }
}

impl ConstraintSolver for Joint {
    fn pre_solve_velocity(&mut self, bodies: &SolverBodySet, step: &TimeStep, settings: &SolverSettings) {
        self.rows.clear();
        let (Some(i1), Some(i2)) = (bodies.index_of(self.body1), bodies.index_of(self.body2)) else {
            return;
        };
        self.b1 = i1;
        self.b2 = i2;
        let slice = bodies.as_slice();
        self.rows = build_rows(&self.frame, &slice[i1], &slice[i2], settings, self.position_correction, step);

        let mut used = [false; MAX_JACOBIAN_ROWS];
        for row in self.rows.iter_mut() {
            used[row.slot] = true;
            let stored = self.impulses[row.slot];
            row.impulse = stored.impulse.clamp(row.lower, row.upper);
            row.motor_impulse = stored
                .motor_impulse
                .clamp(-row.motor_max_impulse, row.motor_max_impulse);
        }
        for (slot, used) in used.into_iter().enumerate() {
            if !used {
                self.impulses[slot] = RowImpulse::default();
            }
        }
        self.solver.pre_solve(&self.rows);
    }

    fn warm_start(&mut self, bodies: &mut [SolverBody], step: &TimeStep) {
        if self.rows.is_empty() {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        self.solver.warm_start(&mut self.rows, b1, b2, step.dt_ratio);
    }

    fn solve_velocity(&mut self, bodies: &mut [SolverBody]) {
        if self.rows.is_empty() {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        if let Err(err) = self.solver.solve_velocity(&mut self.rows, b1, b2) {
            self.report_failure(err);
        }
    }

    /// Persists impulses and records the force and torque applied on body 2.
    fn post_solve_velocity(&mut self, step: &TimeStep) {
        let mut force = Vec3::ZERO;
        let mut torque = Vec3::ZERO;
        for row in &self.rows {
            self.impulses[row.slot] = RowImpulse {
                impulse: row.impulse,
                motor_impulse: row.motor_impulse,
            };
            let total = row.impulse + row.motor_impulse;
            force += row.jacobian.lin2 * total;
            torque += row.jacobian.ang2 * total;
        }
        self.applied_force = force * step.inv_dt;
        self.applied_torque = torque * step.inv_dt;
    }

    fn solve_position_split_impulse(&mut self, bodies: &mut [SolverBody]) {
        if self.rows.is_empty() || self.position_correction != PositionCorrection::SplitImpulse {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        if let Err(err) = self.solver.solve_split_impulse(&mut self.rows, b1, b2) {
            self.report_failure(err);
        }
    }

    fn solve_position_ngs(&mut self, bodies: &mut [SolverBody], settings: &SolverSettings) {
        if self.rows.is_empty() || self.position_correction != PositionCorrection::Ngs {
            return;
        }
        let (b1, b2) = pair_mut(bodies, self.b1, self.b2);
        let mut rows = build_rows(&self.frame, b1, b2, settings, PositionCorrection::Ngs, &TimeStep::new(0.0));
        for row in rows.iter_mut() {
            if let Some(previous) = self.rows.iter().find(|r| r.slot == row.slot) {
                row.impulse_p = previous.impulse_p.clamp(row.lower, row.upper);
            }
        }
        self.rows = rows;
        if let Err(err) = self.solver.solve_ngs(&mut self.rows, b1, b2, settings.ngs_baumgarte) {
            self.report_failure(err);
        }
    }
}
