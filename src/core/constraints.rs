use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

use super::types::Transform;
use crate::{
    config::{DEFAULT_JOINT_POSITION_CORRECTION, MAX_JACOBIAN_ROWS},
    dynamics::solver::{ConstraintRow, JointSolver, PositionCorrection},
    utils::{
        allocator::{BodyHandle, Handle, JointHandle},
        math::{orthonormal_basis, Mat3, Real, Vec3},
    },
};

/// Limit and motor along one joint axis.
///
/// The limit is active only when `lower <= upper`; `lower == upper` locks the
/// axis. The motor drives the axis velocity towards `motor_speed` with at most
/// `max_motor_force` (torque for angular axes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitMotor {
    pub lower: Real,
    pub upper: Real,
    pub motor_speed: Real,
    pub max_motor_force: Real,
}

impl Default for LimitMotor {
    fn default() -> Self {
        Self::FREE
    }
}

impl LimitMotor {
    pub const FREE: LimitMotor = LimitMotor {
        lower: 1.0,
        upper: 0.0,
        motor_speed: 0.0,
        max_motor_force: 0.0,
    };

    pub fn limited(lower: Real, upper: Real) -> Self {
        Self {
            lower,
            upper,
            ..Self::FREE
        }
    }

    pub fn with_motor(mut self, motor_speed: Real, max_motor_force: Real) -> Self {
        self.motor_speed = motor_speed;
        self.max_motor_force = max_motor_force;
        self
    }

    pub fn is_limited(&self) -> bool {
        self.lower <= self.upper
    }

    pub fn has_motor(&self) -> bool {
        self.max_motor_force > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JointKind {
    /// Anchors coincide; rotation is free.
    Spherical,
    /// Anchors coincide; rotation only about the joint axis.
    Revolute { limit_motor: LimitMotor },
    /// Orientation locked; translation only along the joint axis.
    Prismatic { limit_motor: LimitMotor },
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JointSolverType {
    #[default]
    Iterative,
    Direct,
}

/// Joint description in world space, resolved to body frames when added.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointDef {
    pub body1: BodyHandle,
    pub body2: BodyHandle,
    pub anchor: Vec3,
    pub axis: Vec3,
    pub kind: JointKind,
    pub solver_type: JointSolverType,
    pub position_correction: PositionCorrection,
    pub allow_collision: bool,
    /// Zero means unbreakable.
    pub break_force: Real,
    pub break_torque: Real,
}

impl JointDef {
    fn new(body1: BodyHandle, body2: BodyHandle, anchor: Vec3, axis: Vec3, kind: JointKind) -> Self {
        Self {
            body1,
            body2,
            anchor,
            axis,
            kind,
            solver_type: JointSolverType::Iterative,
            position_correction: DEFAULT_JOINT_POSITION_CORRECTION,
            allow_collision: false,
            break_force: 0.0,
            break_torque: 0.0,
        }
    }

    pub fn spherical(body1: BodyHandle, body2: BodyHandle, anchor: Vec3) -> Self {
        Self::new(body1, body2, anchor, Vec3::X, JointKind::Spherical)
    }

    pub fn revolute(body1: BodyHandle, body2: BodyHandle, anchor: Vec3, axis: Vec3) -> Self {
        Self::new(
            body1,
            body2,
            anchor,
            axis,
            JointKind::Revolute {
                limit_motor: LimitMotor::FREE,
            },
        )
    }

    pub fn prismatic(body1: BodyHandle, body2: BodyHandle, anchor: Vec3, axis: Vec3) -> Self {
        Self::new(
            body1,
            body2,
            anchor,
            axis,
            JointKind::Prismatic {
                limit_motor: LimitMotor::FREE,
            },
        )
    }

    pub fn fixed(body1: BodyHandle, body2: BodyHandle, anchor: Vec3) -> Self {
        Self::new(body1, body2, anchor, Vec3::X, JointKind::Fixed)
    }

    /// Sets the limit/motor of a revolute or prismatic joint; ignored otherwise.
    pub fn with_limit_motor(mut self, limit_motor: LimitMotor) -> Self {
        match &mut self.kind {
            JointKind::Revolute { limit_motor: lm } | JointKind::Prismatic { limit_motor: lm } => {
                *lm = limit_motor
            }
            JointKind::Spherical | JointKind::Fixed => {}
        }
        self
    }

    pub fn with_solver_type(mut self, solver_type: JointSolverType) -> Self {
        self.solver_type = solver_type;
        self
    }

    pub fn with_position_correction(mut self, position_correction: PositionCorrection) -> Self {
        self.position_correction = position_correction;
        self
    }

    pub fn with_allow_collision(mut self, allow_collision: bool) -> Self {
        self.allow_collision = allow_collision;
        self
    }

    pub fn with_break_limits(mut self, break_force: Real, break_torque: Real) -> Self {
        self.break_force = break_force;
        self.break_torque = break_torque;
        self
    }
}

/// Joint geometry expressed in each body's frame.
///
/// Column 0 of a basis is the joint axis; columns 1 and 2 are the reference
/// directions used to measure the hinge angle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointFrame {
    pub kind: JointKind,
    pub local_anchor1: Vec3,
    pub local_anchor2: Vec3,
    pub local_basis1: Mat3,
    pub local_basis2: Mat3,
}

impl JointFrame {
    pub fn new(def: &JointDef, tf1: &Transform, tf2: &Transform) -> Self {
        let axis = def.axis.try_normalize().unwrap_or(Vec3::X);
        let (tangent, binormal) = orthonormal_basis(axis);
        let world_basis = Mat3::from_cols(axis, tangent, binormal);
        Self {
            kind: def.kind,
            local_anchor1: tf1.inverse_transform_point(def.anchor),
            local_anchor2: tf2.inverse_transform_point(def.anchor),
            local_basis1: tf1.basis().transpose() * world_basis,
            local_basis2: tf2.basis().transpose() * world_basis,
        }
    }
}

/// Accumulated impulses of one joint row, kept across steps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RowImpulse {
    pub impulse: Real,
    pub motor_impulse: Real,
}

/// A joint connecting two rigid bodies.
#[derive(Debug, Clone)]
pub struct Joint {
    pub id: JointHandle,
    pub body1: BodyHandle,
    pub body2: BodyHandle,
    pub solver_type: JointSolverType,
    pub position_correction: PositionCorrection,
    pub allow_collision: bool,
    pub break_force: Real,
    pub break_torque: Real,
    pub(crate) frame: JointFrame,
    pub(crate) impulses: [RowImpulse; MAX_JACOBIAN_ROWS],
    pub(crate) applied_force: Vec3,
    pub(crate) applied_torque: Vec3,
    pub(crate) solver: JointSolver,
    /// Rows built for the current step.
    pub(crate) rows: ArrayVec<ConstraintRow, MAX_JACOBIAN_ROWS>,
    /// Indices of the two bodies in the island's solver body set.
    pub(crate) b1: usize,
    pub(crate) b2: usize,
    pub(crate) added_to_island: bool,
}

impl Joint {
    pub fn new(def: &JointDef, tf1: &Transform, tf2: &Transform) -> Self {
        Self {
            id: Handle::INVALID,
            body1: def.body1,
            body2: def.body2,
            solver_type: def.solver_type,
            position_correction: def.position_correction,
            allow_collision: def.allow_collision,
            break_force: def.break_force,
            break_torque: def.break_torque,
            frame: JointFrame::new(def, tf1, tf2),
            impulses: [RowImpulse::default(); MAX_JACOBIAN_ROWS],
            applied_force: Vec3::ZERO,
            applied_torque: Vec3::ZERO,
            solver: JointSolver::new(def.solver_type),
            rows: ArrayVec::new(),
            b1: 0,
            b2: 0,
            added_to_island: false,
        }
    }

    pub fn kind(&self) -> &JointKind {
        &self.frame.kind
    }

    pub fn frame(&self) -> &JointFrame {
        &self.frame
    }

    /// Replaces the limit/motor of a revolute or prismatic joint.
    pub fn set_limit_motor(&mut self, limit_motor: LimitMotor) {
        match &mut self.frame.kind {
            JointKind::Revolute { limit_motor: lm } | JointKind::Prismatic { limit_motor: lm } => {
                *lm = limit_motor
            }
            JointKind::Spherical | JointKind::Fixed => {}
        }
    }

    /// Constraint force applied on body2 during the last step.
    pub fn applied_force(&self) -> Vec3 {
        self.applied_force
    }

    pub fn applied_torque(&self) -> Vec3 {
        self.applied_torque
    }

    pub fn other_body(&self, body: BodyHandle) -> BodyHandle {
        if body == self.body1 {
            self.body2
        } else {
            self.body1
        }
    }

    pub(crate) fn should_break(&self) -> bool {
        (self.break_force > 0.0 && self.applied_force.length() > self.break_force)
            || (self.break_torque > 0.0 && self.applied_torque.length() > self.break_torque)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::math::Quat;

    #[test]
    fn frame_bases_agree_in_world_at_creation() {
        let tf1 = Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_z(0.4));
        let tf2 = Transform::from_position_rotation(Vec3::new(2.0, 0.0, 0.0), Quat::from_rotation_x(1.1));
        let def = JointDef::revolute(Handle::new(0, 0), Handle::new(1, 0), Vec3::new(1.0, 0.0, 0.0), Vec3::Z);
        let frame = JointFrame::new(&def, &tf1, &tf2);
        let world1 = tf1.basis() * frame.local_basis1;
        let world2 = tf2.basis() * frame.local_basis2;
        for i in 0..3 {
            assert!((world1.col(i) - world2.col(i)).length() < 1e-9);
        }
        assert!((tf1.transform_point(frame.local_anchor1) - def.anchor).length() < 1e-12);
        assert!((tf2.transform_point(frame.local_anchor2) - def.anchor).length() < 1e-12);
    }

    #[test]
    fn limit_motor_flags() {
        assert!(!LimitMotor::FREE.is_limited());
        let lm = LimitMotor::limited(-0.5, 0.5).with_motor(1.0, 10.0);
        assert!(lm.is_limited() && lm.has_motor());
    }
}
