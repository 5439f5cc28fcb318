//! Global configuration constants and world settings for the engine.

use serde::{Deserialize, Serialize};

use crate::{
    dynamics::solver::PositionCorrection,
    utils::math::{Real, Vec3},
};

/// Default gravity vector applied in the physics world (Y-up).
pub const DEFAULT_GRAVITY: [Real; 3] = [0.0, -9.80665, 0.0];

/// Default integration timestep (in seconds).
pub const DEFAULT_TIME_STEP: Real = 1.0 / 60.0;

/// Velocity iterations performed per island step.
pub const DEFAULT_VELOCITY_ITERATIONS: usize = 10;

/// Position iterations (split impulse and NGS) performed per island step.
pub const DEFAULT_POSITION_ITERATIONS: usize = 5;

pub const DEFAULT_FRICTION: Real = 0.2;
pub const DEFAULT_RESTITUTION: Real = 0.2;
pub const DEFAULT_DENSITY: Real = 1.0;
pub const DEFAULT_COLLISION_GROUP: u32 = 1;
pub const DEFAULT_COLLISION_MASK: u32 = u32::MAX;

/// Largest displacement a body may travel in one step.
pub const MAX_TRANSLATION_PER_STEP: Real = 20.0;
/// Largest rotation (radians) a body may turn in one step.
pub const MAX_ROTATION_PER_STEP: Real = std::f64::consts::PI;

/// Margin subtracted from every convex core before running GJK.
pub const DEFAULT_GJK_MARGIN: Real = 0.05;
pub const ENABLE_GJK_CACHING: bool = true;
pub const GJK_MAX_ITERATIONS: usize = 40;
pub const EPA_MAX_ITERATIONS: usize = 40;
pub const EPA_MAX_VERTICES: usize = 128;

/// Normal velocity below which restitution kicks in.
pub const CONTACT_BOUNCE_THRESHOLD: Real = 0.5;
pub const VELOCITY_BAUMGARTE: Real = 0.2;
pub const POSITION_SPLIT_IMPULSE_BAUMGARTE: Real = 0.4;
pub const POSITION_NGS_BAUMGARTE: Real = 1.0;

/// Contacts deeper than this switch to the alternative position correction.
pub const ALTERNATIVE_CORRECTION_DEPTH_THRESHOLD: Real = 0.05;
pub const DEFAULT_CONTACT_POSITION_CORRECTION: PositionCorrection = PositionCorrection::Baumgarte;
pub const ALTERNATIVE_CONTACT_POSITION_CORRECTION: PositionCorrection =
    PositionCorrection::SplitImpulse;
pub const DEFAULT_JOINT_POSITION_CORRECTION: PositionCorrection = PositionCorrection::Baumgarte;

/// Distance beyond which a persisted manifold point is dropped.
pub const CONTACT_PERSISTENCE_THRESHOLD: Real = 0.05;
pub const MAX_MANIFOLD_POINTS: usize = 4;

pub const LINEAR_SLOP: Real = 0.005;
pub const ANGULAR_SLOP: Real = 1.0 * std::f64::consts::PI / 180.0;

pub const SLEEPING_VELOCITY_THRESHOLD: Real = 0.2;
pub const SLEEPING_ANGULAR_VELOCITY_THRESHOLD: Real = 0.5;
pub const SLEEPING_TIME_THRESHOLD: Real = 1.0;

/// Padding added around proxies by the grid broad-phase.
pub const DEFAULT_PROXY_PADDING: Real = 0.1;
/// Default cell size for the broad-phase uniform grid.
pub const DEFAULT_BROADPHASE_CELL_SIZE: Real = 5.0;
/// Proxies spanning more grid cells than this are kept out of the grid and
/// tested against every other proxy instead.
pub const MAX_CELLS_PER_PROXY: u64 = 4096;

pub const DIRECT_SOLVER_EPSILON: Real = 1e-9;
pub const MAX_JACOBIAN_ROWS: usize = 6;

/// Tunables a [`crate::world::World`] is created from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    pub gravity: Vec3,
    pub velocity_iterations: usize,
    pub position_iterations: usize,
    pub disable_sleeping: bool,
    pub sleeping_velocity_threshold: Real,
    pub sleeping_angular_velocity_threshold: Real,
    pub sleeping_time_threshold: Real,
    pub enable_gjk_caching: bool,
    pub broad_phase: BroadPhaseKind,
    pub solver: SolverSettings,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::from_array(DEFAULT_GRAVITY),
            velocity_iterations: DEFAULT_VELOCITY_ITERATIONS,
            position_iterations: DEFAULT_POSITION_ITERATIONS,
            disable_sleeping: false,
            sleeping_velocity_threshold: SLEEPING_VELOCITY_THRESHOLD,
            sleeping_angular_velocity_threshold: SLEEPING_ANGULAR_VELOCITY_THRESHOLD,
            sleeping_time_threshold: SLEEPING_TIME_THRESHOLD,
            enable_gjk_caching: ENABLE_GJK_CACHING,
            broad_phase: BroadPhaseKind::default(),
            solver: SolverSettings::default(),
        }
    }
}

/// Which reference broad-phase a world uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum BroadPhaseKind {
    #[default]
    BruteForce,
    Grid {
        cell_size: Real,
    },
}

/// Constants shared by the contact and joint solvers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub velocity_baumgarte: Real,
    pub split_impulse_baumgarte: Real,
    pub ngs_baumgarte: Real,
    pub linear_slop: Real,
    pub angular_slop: Real,
    pub bounce_threshold: Real,
    pub alternative_correction_depth: Real,
    pub persistence_threshold: Real,
    pub max_translation_per_step: Real,
    pub max_rotation_per_step: Real,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            velocity_baumgarte: VELOCITY_BAUMGARTE,
            split_impulse_baumgarte: POSITION_SPLIT_IMPULSE_BAUMGARTE,
            ngs_baumgarte: POSITION_NGS_BAUMGARTE,
            linear_slop: LINEAR_SLOP,
            angular_slop: ANGULAR_SLOP,
            bounce_threshold: CONTACT_BOUNCE_THRESHOLD,
            alternative_correction_depth: ALTERNATIVE_CORRECTION_DEPTH_THRESHOLD,
            persistence_threshold: CONTACT_PERSISTENCE_THRESHOLD,
            max_translation_per_step: MAX_TRANSLATION_PER_STEP,
            max_rotation_per_step: MAX_ROTATION_PER_STEP,
        }
    }
}
