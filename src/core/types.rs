use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_DENSITY, DEFAULT_FRICTION, DEFAULT_RESTITUTION},
    utils::math::{Mat3, Quat, Real, Vec3},
};

/// Position and orientation of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// 3x3 rotation basis; column `i` is the local axis `i` in world space.
    pub fn basis(&self) -> Mat3 {
        Mat3::from_quat(self.rotation)
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * point
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.conjugate() * (point - self.position)
    }

    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    pub fn inverse_transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation.conjugate() * vector
    }

    /// Applies another transform on top of this one, returning the composition.
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * other.position,
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    pub fn inverse(&self) -> Transform {
        let rotation = self.rotation.conjugate();
        Transform {
            position: -(rotation * self.position),
            rotation,
        }
    }
}

/// Linear and angular velocity of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

/// Mass and body-space inertia tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: Real,
    pub inertia: Mat3,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            inertia: Mat3::IDENTITY,
        }
    }
}

impl MassProperties {
    pub const ZERO: MassProperties = MassProperties {
        mass: 0.0,
        inertia: Mat3::ZERO,
    };

    /// Moves the inertia of a part at `offset` (rotated by `rotation`) into
    /// the parent frame using the parallel axis theorem.
    pub fn transformed(&self, offset: &Transform) -> MassProperties {
        let basis = offset.basis();
        let rotated = basis * self.inertia * basis.transpose();
        let d = offset.position;
        let shift = Mat3::from_diagonal(Vec3::splat(d.length_squared()))
            - Mat3::from_cols(d * d.x, d * d.y, d * d.z);
        MassProperties {
            mass: self.mass,
            inertia: rotated + shift * self.mass,
        }
    }
}

impl std::ops::Add for MassProperties {
    type Output = MassProperties;

    fn add(self, rhs: MassProperties) -> MassProperties {
        MassProperties {
            mass: self.mass + rhs.mass,
            inertia: self.inertia + rhs.inertia,
        }
    }
}

/// Surface coefficients of a collider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub density: Real,
    pub friction: Real,
    pub restitution: Real,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            density: DEFAULT_DENSITY,
            friction: DEFAULT_FRICTION,
            restitution: DEFAULT_RESTITUTION,
        }
    }
}

impl Material {
    pub fn rubber() -> Self {
        Self {
            density: 1.4,
            friction: 1.0,
            restitution: 0.8,
        }
    }

    pub fn steel() -> Self {
        Self {
            density: 7.8,
            friction: 0.44,
            restitution: 0.4,
        }
    }

    pub fn ice() -> Self {
        Self {
            density: 0.9,
            friction: 0.03,
            restitution: 0.05,
        }
    }

    /// Friction mixes by geometric mean, restitution by maximum.
    pub fn combine_pair(a: &Self, b: &Self) -> MaterialPairProperties {
        MaterialPairProperties {
            friction: (a.friction * b.friction).sqrt(),
            restitution: a.restitution.max(b.restitution),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialPairProperties {
    pub friction: Real,
    pub restitution: Real,
}

impl Default for MaterialPairProperties {
    fn default() -> Self {
        Material::combine_pair(&Material::default(), &Material::default())
    }
}

/// Timing of the current step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStep {
    pub dt: Real,
    pub inv_dt: Real,
    /// `dt / previous dt`; scales warm-started impulses.
    pub dt_ratio: Real,
}

impl TimeStep {
    pub fn new(dt: Real) -> Self {
        Self {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: 1.0,
        }
    }

    /// Time step following `self` with a new `dt`.
    pub fn next(&self, dt: Real) -> Self {
        let mut step = Self::new(dt);
        if self.dt > 0.0 {
            step.dt_ratio = dt / self.dt;
        }
        step
    }
}

/// Helper methods for inertia calculations.
pub trait InertiaTensorExt {
    fn for_solid_box(half_extents: Vec3, mass: Real) -> Mat3;
    fn for_solid_sphere(radius: Real, mass: Real) -> Mat3;
    fn for_solid_cylinder(radius: Real, half_height: Real, mass: Real) -> Mat3;
    fn for_solid_cone(radius: Real, half_height: Real, mass: Real) -> Mat3;
}

impl InertiaTensorExt for Mat3 {
    fn for_solid_box(half_extents: Vec3, mass: Real) -> Mat3 {
        let lx = half_extents.x * 2.0;
        let ly = half_extents.y * 2.0;
        let lz = half_extents.z * 2.0;
        let factor = mass / 12.0;
        Mat3::from_diagonal(Vec3::new(
            factor * (ly * ly + lz * lz),
            factor * (lx * lx + lz * lz),
            factor * (lx * lx + ly * ly),
        ))
    }

    fn for_solid_sphere(radius: Real, mass: Real) -> Mat3 {
        let value = 0.4 * mass * radius * radius;
        Mat3::from_diagonal(Vec3::splat(value))
    }

    fn for_solid_cylinder(radius: Real, half_height: Real, mass: Real) -> Mat3 {
        let r2 = radius * radius;
        let h2 = 4.0 * half_height * half_height;
        let lateral = mass * (3.0 * r2 + h2) / 12.0;
        Mat3::from_diagonal(Vec3::new(lateral, 0.5 * mass * r2, lateral))
    }

    fn for_solid_cone(radius: Real, half_height: Real, mass: Real) -> Mat3 {
        // about the centroid, which sits a quarter of the height above the base
        let r2 = radius * radius;
        let h = 2.0 * half_height;
        let lateral = mass * (3.0 / 20.0 * r2 + 3.0 / 80.0 * h * h);
        Mat3::from_diagonal(Vec3::new(lateral, 0.3 * mass * r2, lateral))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_inverse_round_trips_points() {
        let tf = Transform::from_position_rotation(
            Vec3::new(1.0, -2.0, 0.5),
            Quat::from_rotation_y(0.7) * Quat::from_rotation_x(-0.3),
        );
        let p = Vec3::new(0.3, 0.2, -4.0);
        let back = tf.inverse_transform_point(tf.transform_point(p));
        assert!((back - p).length() < 1e-12);
        let composed = tf.combine(&tf.inverse());
        assert!(composed.position.length() < 1e-12);
    }

    #[test]
    fn friction_mixes_geometrically_and_restitution_by_max() {
        let pair = Material::combine_pair(&Material::rubber(), &Material::ice());
        let expected = (1.0_f64 * 0.03).sqrt();
        assert!((pair.friction - expected).abs() < 1e-12);
        assert!((pair.restitution - 0.8).abs() < 1e-12);
    }

    #[test]
    fn parallel_axis_shift_increases_lateral_inertia() {
        let props = MassProperties {
            mass: 2.0,
            inertia: Mat3::for_solid_sphere(1.0, 2.0),
        };
        let moved = props.transformed(&Transform::from_position(Vec3::new(0.0, 3.0, 0.0)));
        assert!((moved.inertia.x_axis.x - (0.8 + 18.0)).abs() < 1e-9);
        assert!((moved.inertia.y_axis.y - 0.8).abs() < 1e-9);
    }

    #[test]
    fn time_step_ratio_tracks_dt_changes() {
        let first = TimeStep::new(1.0 / 60.0);
        let second = first.next(1.0 / 120.0);
        assert!((second.dt_ratio - 0.5).abs() < 1e-12);
    }
}
