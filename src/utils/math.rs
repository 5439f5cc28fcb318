//! Additional math helpers layered on top of `glam`.
//!
//! The engine runs in double precision; the aliases below keep call sites
//! short while making the precision choice in one place.

pub use glam::{DMat3 as Mat3, DQuat as Quat, DVec3 as Vec3};

/// Scalar type used throughout the engine.
pub type Real = f64;

/// Converts an angular displacement (axis scaled by angle) into a quaternion.
pub fn rotation_vector_to_quat(rotation: Vec3) -> Quat {
    let angle = rotation.length();
    if angle < 1e-12 {
        return Quat::IDENTITY;
    }
    Quat::from_axis_angle(rotation / angle, angle)
}

/// Converts angular velocity vector (radians/sec) into a quaternion delta.
pub fn angular_velocity_to_quat(angular: Vec3, dt: Real) -> Quat {
    rotation_vector_to_quat(angular * dt)
}

/// Rotation vector (axis * angle) equivalent to the given quaternion, with the
/// angle wrapped into `[-pi, pi]`.
pub fn quat_to_rotation_vector(q: Quat) -> Vec3 {
    let q = if q.w < 0.0 { -q } else { q };
    let sin_half = Vec3::new(q.x, q.y, q.z).length();
    if sin_half < 1e-12 {
        return Vec3::new(q.x, q.y, q.z) * 2.0;
    }
    let angle = 2.0 * sin_half.atan2(q.w);
    Vec3::new(q.x, q.y, q.z) * (angle / sin_half)
}

/// Builds an orthonormal pair `(tangent, binormal)` perpendicular to `normal`.
///
/// Branches on the smallest component of the normal so the cross product never
/// degenerates.
pub fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let ax = normal.x.abs();
    let ay = normal.y.abs();
    let az = normal.z.abs();
    let tangent = if ax <= ay && ax <= az {
        let inv = 1.0 / (normal.y * normal.y + normal.z * normal.z).sqrt();
        Vec3::new(0.0, normal.z * inv, -normal.y * inv)
    } else if ay <= az {
        let inv = 1.0 / (normal.x * normal.x + normal.z * normal.z).sqrt();
        Vec3::new(-normal.z * inv, 0.0, normal.x * inv)
    } else {
        let inv = 1.0 / (normal.x * normal.x + normal.y * normal.y).sqrt();
        Vec3::new(normal.y * inv, -normal.x * inv, 0.0)
    };
    let binormal = normal.cross(tangent);
    (tangent, binormal)
}

/// Rotates a body-space inverse inertia into world space.
pub fn world_inertia(rotation: Quat, local: Mat3) -> Mat3 {
    let basis = Mat3::from_quat(rotation);
    basis * local * basis.transpose()
}

/// Closest points between segments `p1 -> q1` and `p2 -> q2`.
///
/// Returns the parameters along each segment, clamped to `[0, 1]`.
pub fn closest_segment_params(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Real, Real) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= 1e-12 && e <= 1e-12 {
        return (0.0, 0.0);
    }
    if a <= 1e-12 {
        return (0.0, (f / e).clamp(0.0, 1.0));
    }
    let c = d1.dot(r);
    if e <= 1e-12 {
        return ((-c / a).clamp(0.0, 1.0), 0.0);
    }

    let b = d1.dot(d2);
    let denom = a * e - b * b;
    let mut s = if denom > 1e-12 {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (s, t)
}

/// Closest point of triangle `abc` to `p`, by Voronoi region of the triangle.
pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        return b + (c - b) * ((d4 - d3) / ((d4 - d3) + (d5 - d6)));
    }

    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Builds an inertia tensor for a solid capsule aligned along Y.
pub fn inertia_capsule(radius: Real, half_height: Real, mass: Real) -> Mat3 {
    let height = half_height * 2.0;
    let cylinder_volume = std::f64::consts::PI * radius * radius * height;
    let sphere_volume = 4.0 / 3.0 * std::f64::consts::PI * radius * radius * radius;
    let total = cylinder_volume + sphere_volume;
    if total <= 0.0 {
        return Mat3::ZERO;
    }
    let cylinder_mass = mass * cylinder_volume / total;
    let sphere_mass = mass - cylinder_mass;

    let cylinder_axial = 0.5 * cylinder_mass * radius * radius;
    let cylinder_lateral = cylinder_mass * (3.0 * radius * radius + height * height) / 12.0;

    // hemispheres offset from the centre by half_height + 3r/8
    let sphere_axial = 0.4 * sphere_mass * radius * radius;
    let offset = half_height + 0.375 * radius;
    let sphere_lateral = 0.4 * sphere_mass * radius * radius
        + sphere_mass * (offset * offset - (0.375 * radius) * (0.375 * radius));

    Mat3::from_diagonal(Vec3::new(
        cylinder_lateral + sphere_lateral,
        cylinder_axial + sphere_axial,
        cylinder_lateral + sphere_lateral,
    ))
}
