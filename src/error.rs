//! Error types reported by queries, solvers, and constructors.

use thiserror::Error;

use crate::utils::allocator::Handle;

/// Failure kinds of the GJK/EPA engine.
///
/// Every variant is local to one query; callers drop the pair for the current
/// step instead of guessing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GjkEpaError {
    #[error("GJK search direction degenerated to zero length")]
    DegenerateDirection,
    #[error("GJK could not grow its simplex into a tetrahedron")]
    GjkFailedToMakeTetrahedron,
    #[error("GJK did not converge within {0} iterations")]
    GjkDidNotConverge(usize),
    #[error("EPA initial tetrahedron does not enclose the origin")]
    EpaFailedToInit,
    #[error("EPA could not insert a new polytope vertex")]
    EpaFailedToAddVertex,
    #[error("EPA polytope is no longer a closed triangle mesh")]
    EpaPolytopeNotClosed,
    #[error("EPA did not converge within {0} iterations")]
    EpaDidNotConverge(usize),
}

/// Failures of the constraint solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("direct solver found no boundary satisfying all {rows} row bounds")]
    NoBoundary { rows: usize },
}

/// Invalid construction parameters, reported when the object is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("terrain height data is empty")]
    EmptyHeightData,
    #[error("terrain height data has {actual} samples, expected {expected}")]
    RaggedHeightData { expected: usize, actual: usize },
    #[error("convex hull needs at least one vertex")]
    EmptyHull,
    #[error("{name} must be positive and finite, got {value}")]
    InvalidDimension { name: &'static str, value: f64 },
}

/// Misuse of world handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("handle {0:?} does not refer to a live object")]
    InvalidHandle(Handle),
    #[error("joint connects body {0:?} to itself")]
    SameBody(Handle),
}
