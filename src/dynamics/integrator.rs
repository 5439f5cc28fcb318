use crate::{
    config::WorldSettings,
    core::rigidbody::RigidBody,
    dynamics::solver::SolverBody,
    utils::math::{rotation_vector_to_quat, Real, Vec3},
};

/// Explicit Euler stepping of velocities and semi-implicit stepping of poses.
#[derive(Debug, Clone, Copy)]
pub struct Integrator {
    pub gravity: Vec3,
    pub max_translation: Real,
    pub max_rotation: Real,
}

impl Integrator {
    pub fn new(settings: &WorldSettings) -> Self {
        Self {
            gravity: settings.gravity,
            max_translation: settings.solver.max_translation_per_step,
            max_rotation: settings.solver.max_rotation_per_step,
        }
    }

    /// Applies gravity, accumulated force/torque and damping.
    pub fn integrate_velocity(&self, body: &mut RigidBody, dt: Real) {
        if !body.is_dynamic() {
            return;
        }

        let linear_acc = self.gravity * body.gravity_scale + body.force * body.inv_mass;
        let angular_acc = body.inv_inertia * body.torque;
        body.velocity.linear += linear_acc * dt;
        body.velocity.angular += angular_acc * dt;

        body.velocity.linear *= (1.0 - body.linear_damping * dt).max(0.0);
        body.velocity.angular *= (1.0 - body.angular_damping * dt).max(0.0);
    }

    /// Moves the body by its velocity. Steps longer than the clamps scale the
    /// velocity down so the clamp holds.
    pub fn integrate_position(&self, body: &mut SolverBody, dt: Real) {
        let mut translation = body.linear * dt;
        let distance_sq = translation.length_squared();
        if distance_sq > self.max_translation * self.max_translation {
            let scale = self.max_translation / distance_sq.sqrt();
            body.linear *= scale;
            translation *= scale;
        }

        let mut rotation = body.angular * dt;
        let angle_sq = rotation.length_squared();
        if angle_sq > self.max_rotation * self.max_rotation {
            let scale = self.max_rotation / angle_sq.sqrt();
            body.angular *= scale;
            rotation *= scale;
        }

        body.position += translation;
        body.rotation = (rotation_vector_to_quat(rotation) * body.rotation).normalize();
        body.update_inertia();
    }

    /// Applies and discards the split-impulse pseudo velocities.
    pub fn integrate_pseudo_velocity(&self, body: &mut SolverBody, dt: Real) {
        if body.pseudo_linear == Vec3::ZERO && body.pseudo_angular == Vec3::ZERO {
            return;
        }
        body.position += body.pseudo_linear * dt;
        body.rotation = (rotation_vector_to_quat(body.pseudo_angular * dt) * body.rotation).normalize();
        body.pseudo_linear = Vec3::ZERO;
        body.pseudo_angular = Vec3::ZERO;
        body.update_inertia();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gravity_and_damping_apply_to_dynamic_bodies_only() {
        let integrator = Integrator::new(&WorldSettings::default());
        let mut body = RigidBody::dynamic().with_damping(0.5, 0.0);
        integrator.integrate_velocity(&mut body, 0.1);
        assert_relative_eq!(body.velocity.linear.y, -0.980665 * 0.95, epsilon = 1e-12);

        let mut fixed = RigidBody::fixed();
        integrator.integrate_velocity(&mut fixed, 0.1);
        assert_eq!(fixed.velocity.linear, Vec3::ZERO);
    }

    #[test]
    fn translation_is_clamped_per_step() {
        let integrator = Integrator::new(&WorldSettings::default());
        let mut body = SolverBody {
            linear: Vec3::new(1.0e4, 0.0, 0.0),
            dynamic: true,
            ..SolverBody::default()
        };
        integrator.integrate_position(&mut body, 0.1);
        assert_relative_eq!(body.position.x, integrator.max_translation, epsilon = 1e-9);
        assert_relative_eq!(body.linear.x * 0.1, integrator.max_translation, epsilon = 1e-9);
    }

    #[test]
    fn pseudo_velocity_is_consumed() {
        let integrator = Integrator::new(&WorldSettings::default());
        let mut body = SolverBody {
            pseudo_linear: Vec3::Y,
            dynamic: true,
            ..SolverBody::default()
        };
        integrator.integrate_pseudo_velocity(&mut body, 0.5);
        assert_relative_eq!(body.position.y, 0.5);
        assert_eq!(body.pseudo_linear, Vec3::ZERO);
    }
}
