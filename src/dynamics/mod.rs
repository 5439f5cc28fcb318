//! Simulation dynamics: integration, islands, joint rows and constraint solvers.

pub mod integrator;
pub mod island;
pub mod joint;
pub mod solver;

pub use integrator::Integrator;
pub use island::{Island, IslandManager};
pub use solver::{
    ConstraintSolver, ContactConstraint, DirectJointSolver, JointSolver, PgsJointSolver, PositionCorrection,
};
