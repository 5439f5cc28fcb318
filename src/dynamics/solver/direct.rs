//! Direct block solver for joint rows.
//!
//! The bounded problem `A x = b` with `lower <= x <= upper` is solved exactly
//! by trying boundaries: each row is either free or pinned to one of its
//! finite bounds. For a boundary the free rows solve
//! `A_ff x_f = b_f - A_fb x_b`; the boundary is accepted when every free
//! value stays inside its bounds and every pinned row pushes against the
//! bound it sits on.

use arrayvec::ArrayVec;

use super::{ConstraintRow, SolverBody};
use crate::{
    config::{DIRECT_SOLVER_EPSILON, MAX_JACOBIAN_ROWS},
    error::SolverError,
    utils::math::Real,
};

const N: usize = MAX_JACOBIAN_ROWS;
const MASK_COUNT: usize = 1 << N;

type Matrix = [[Real; N]; N];
type Vector = [Real; N];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowState {
    Free,
    Lower,
    Upper,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Boundary {
    states: [RowState; N],
    free_mask: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CachedInverse {
    Unknown,
    Singular,
    Inverse(Matrix),
}

#[derive(Debug, Clone)]
pub struct DirectJointSolver {
    boundaries: Vec<Boundary>,
    /// Search order over `boundaries`; the last successful one moves to the front.
    order: Vec<usize>,
    signature: Option<u32>,
    mass: Matrix,
    rows: usize,
    inverses: Vec<CachedInverse>,
}

impl Default for DirectJointSolver {
    fn default() -> Self {
        Self {
            boundaries: Vec::new(),
            order: Vec::new(),
            signature: None,
            mass: [[0.0; N]; N],
            rows: 0,
            inverses: vec![CachedInverse::Unknown; MASK_COUNT],
        }
    }
}

/// Which states each row may take, packed three bits per row.
fn bound_signature(rows: &[ConstraintRow]) -> u32 {
    let mut signature = rows.len() as u32;
    for (i, row) in rows.iter().enumerate() {
        let code = if row.is_locked() {
            4
        } else {
            u32::from(row.lower.is_finite()) | (u32::from(row.upper.is_finite()) << 1)
        };
        signature |= code << (3 + 3 * i);
    }
    signature
}

fn allowed_states(row: &ConstraintRow) -> ArrayVec<RowState, 3> {
    let mut states = ArrayVec::new();
    if row.is_locked() {
        states.push(RowState::Lower);
        return states;
    }
    states.push(RowState::Free);
    if row.lower.is_finite() {
        states.push(RowState::Lower);
    }
    if row.upper.is_finite() {
        states.push(RowState::Upper);
    }
    states
}

fn enumerate_boundaries(
    allowed: &[ArrayVec<RowState, 3>],
    i: usize,
    current: &mut [RowState; N],
    out: &mut Vec<Boundary>,
) {
    if i == allowed.len() {
        let free_mask = current[..allowed.len()]
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == RowState::Free)
            .fold(0, |mask, (j, _)| mask | (1 << j));
        out.push(Boundary {
            states: *current,
            free_mask,
        });
        return;
    }
    for &state in &allowed[i] {
        current[i] = state;
        enumerate_boundaries(allowed, i + 1, current, out);
    }
}

/// Inverts the sub-matrix of `a` selected by `indices` with Gauss-Jordan
/// elimination. The result is indexed like `indices`.
fn invert_sub_matrix(a: &Matrix, indices: &[usize]) -> Option<Matrix> {
    let m = indices.len();
    let mut work = [[0.0; N]; N];
    let mut inv = [[0.0; N]; N];
    for (r, &i) in indices.iter().enumerate() {
        for (c, &j) in indices.iter().enumerate() {
            work[r][c] = a[i][j];
        }
        inv[r][r] = 1.0;
    }

    for col in 0..m {
        let pivot = (col..m).max_by(|&x, &y| work[x][col].abs().total_cmp(&work[y][col].abs()))?;
        if work[pivot][col].abs() < DIRECT_SOLVER_EPSILON {
            return None;
        }
        work.swap(col, pivot);
        inv.swap(col, pivot);
        let scale = 1.0 / work[col][col];
        for c in 0..m {
            work[col][c] *= scale;
            inv[col][c] *= scale;
        }
        for r in 0..m {
            if r == col {
                continue;
            }
            let factor = work[r][col];
            if factor == 0.0 {
                continue;
            }
            for c in 0..m {
                work[r][c] -= factor * work[col][c];
                inv[r][c] -= factor * inv[col][c];
            }
        }
    }
    Some(inv)
}

impl DirectJointSolver {
    /// Rebuilds the mass matrix for this step and the boundary list when the
    /// set of finite bounds changed. Cached inverses are dropped.
    pub fn pre_solve(&mut self, rows: &[ConstraintRow]) {
        let n = rows.len().min(N);
        let rows = &rows[..n];
        self.rows = n;

        let signature = bound_signature(rows);
        if self.signature != Some(signature) {
            let allowed: Vec<_> = rows.iter().map(allowed_states).collect();
            self.boundaries.clear();
            enumerate_boundaries(&allowed, 0, &mut [RowState::Free; N], &mut self.boundaries);
            self.order = (0..self.boundaries.len()).collect();
            self.signature = Some(signature);
        }

        for i in 0..n {
            for j in 0..n {
                self.mass[i][j] = rows[i].mass.coupling(&rows[j].jacobian);
            }
            self.mass[i][i] += rows[i].cfm;
        }
        self.inverses.fill(CachedInverse::Unknown);
    }

    fn inverse_for(&mut self, mask: usize) -> Option<Matrix> {
        if let CachedInverse::Unknown = self.inverses[mask] {
            let indices: ArrayVec<usize, N> = (0..self.rows).filter(|i| mask & (1 << i) != 0).collect();
            self.inverses[mask] = match invert_sub_matrix(&self.mass, &indices) {
                Some(inv) => CachedInverse::Inverse(inv),
                None => CachedInverse::Singular,
            };
        }
        match self.inverses[mask] {
            CachedInverse::Inverse(inv) => Some(inv),
            _ => None,
        }
    }

    fn try_boundary(&mut self, boundary: &Boundary, rows: &[ConstraintRow], b: &Vector) -> Option<Vector> {
        let n = self.rows;
        let mut x = [0.0; N];
        let free: ArrayVec<usize, N> = (0..n).filter(|&i| boundary.states[i] == RowState::Free).collect();
        for i in 0..n {
            x[i] = match boundary.states[i] {
                RowState::Free => 0.0,
                RowState::Lower => rows[i].lower,
                RowState::Upper => rows[i].upper,
            };
        }

        if !free.is_empty() {
            let inv = self.inverse_for(boundary.free_mask)?;
            let mut rhs: ArrayVec<Real, N> = ArrayVec::new();
            for &i in &free {
                let pinned: Real = (0..n)
                    .filter(|&j| boundary.states[j] != RowState::Free)
                    .map(|j| self.mass[i][j] * x[j])
                    .sum();
                rhs.push(b[i] - pinned);
            }
            for (r, &i) in free.iter().enumerate() {
                x[i] = (0..free.len()).map(|c| inv[r][c] * rhs[c]).sum();
            }
        }

        let eps = DIRECT_SOLVER_EPSILON;
        for i in 0..n {
            let residual: Real = (0..n).map(|j| self.mass[i][j] * x[j]).sum::<Real>() - b[i];
            let ok = match boundary.states[i] {
                RowState::Free => x[i] >= rows[i].lower - eps && x[i] <= rows[i].upper + eps,
                _ if rows[i].is_locked() => true,
                RowState::Lower => residual >= -eps,
                RowState::Upper => residual <= eps,
            };
            if !ok {
                return None;
            }
        }
        Some(x)
    }

    /// Finds the solution for `b`, most recently successful boundary first.
    fn solve(&mut self, rows: &[ConstraintRow], b: &Vector) -> Result<Vector, SolverError> {
        for k in 0..self.order.len() {
            let boundary = self.boundaries[self.order[k]].clone();
            if let Some(x) = self.try_boundary(&boundary, rows, b) {
                let index = self.order.remove(k);
                self.order.insert(0, index);
                return Ok(x);
            }
        }
        Err(SolverError::NoBoundary { rows: self.rows })
    }

    /// `b = target + (A - cfm) x_old`, so that the solution is the new total.
    fn build_b(&self, rows: &[ConstraintRow], target: impl Fn(usize) -> Real, current: impl Fn(&ConstraintRow) -> Real) -> Vector {
        let n = self.rows;
        let mut b = [0.0; N];
        for i in 0..n {
            let coupled: Real = (0..n).map(|j| self.mass[i][j] * current(&rows[j])).sum();
            b[i] = target(i) + coupled - rows[i].cfm * current(&rows[i]);
        }
        b
    }

    pub fn solve_velocity(
        &mut self,
        rows: &mut [ConstraintRow],
        b1: &mut SolverBody,
        b2: &mut SolverBody,
    ) -> Result<(), SolverError> {
        for row in rows.iter_mut().filter(|r| r.has_motor()) {
            row.solve_motor(b1, b2);
        }
        let rows = &mut rows[..self.rows];
        let b = {
            let (b1, b2) = (&*b1, &*b2);
            self.build_b(rows, |i| rows[i].rhs - rows[i].jacobian.velocity(b1, b2), |r| r.impulse)
        };
        let x = self.solve(rows, &b)?;
        for (i, row) in rows.iter_mut().enumerate() {
            let delta = x[i] - row.impulse;
            row.impulse = x[i];
            row.mass.apply_impulse(b1, b2, delta);
        }
        Ok(())
    }

    pub fn solve_split_impulse(
        &mut self,
        rows: &mut [ConstraintRow],
        b1: &mut SolverBody,
        b2: &mut SolverBody,
    ) -> Result<(), SolverError> {
        let rows = &mut rows[..self.rows];
        let b = {
            let (b1, b2) = (&*b1, &*b2);
            self.build_b(
                rows,
                |i| rows[i].rhs_position - rows[i].jacobian.pseudo_velocity(b1, b2),
                |r| r.impulse_p,
            )
        };
        let x = self.solve(rows, &b)?;
        for (i, row) in rows.iter_mut().enumerate() {
            let delta = x[i] - row.impulse_p;
            row.impulse_p = x[i];
            row.mass.apply_pseudo_impulse(b1, b2, delta);
        }
        Ok(())
    }

    pub fn solve_ngs(
        &mut self,
        rows: &mut [ConstraintRow],
        b1: &mut SolverBody,
        b2: &mut SolverBody,
        baumgarte: Real,
    ) -> Result<(), SolverError> {
        // rows were rebuilt from the corrected positions
        self.pre_solve(rows);
        let rows = &mut rows[..self.rows];
        let b = self.build_b(rows, |i| rows[i].error * baumgarte, |r| r.impulse_p);
        let x = self.solve(rows, &b)?;
        for (i, row) in rows.iter_mut().enumerate() {
            let delta = x[i] - row.impulse_p;
            row.impulse_p = x[i];
            row.mass.apply_position_impulse(b1, b2, delta);
        }
        Ok(())
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

    fn row(jacobian: JacobianRow, b1: &SolverBody, b2: &SolverBody, lower: Real, upper: Real) -> ConstraintRow {
        ConstraintRow {
            jacobian,
            mass: RowMass::new(&jacobian, b1, b2),
            lower,
            upper,
            ..ConstraintRow::default()
        }
    }

    #[test]
    fn coupled_rows_are_solved_exactly_in_one_pass() {
        let mut b1 = body(0.0, Vec3::ZERO);
        let mut b2 = body(1.0, Vec3::new(1.0, -2.0, 0.5));
        b2.angular = Vec3::new(0.3, 0.0, -0.2);
        let r2 = Vec3::new(0.0, 1.0, 0.0);
        let mut rows = [
            row(JacobianRow::linear(Vec3::ZERO, r2, Vec3::X), &b1, &b2, Real::NEG_INFINITY, Real::INFINITY),
            row(JacobianRow::linear(Vec3::ZERO, r2, Vec3::Y), &b1, &b2, Real::NEG_INFINITY, Real::INFINITY),
            row(JacobianRow::linear(Vec3::ZERO, r2, Vec3::Z), &b1, &b2, Real::NEG_INFINITY, Real::INFINITY),
        ];
        let mut solver = DirectJointSolver::default();
        solver.pre_solve(&rows);
        solver.solve_velocity(&mut rows, &mut b1, &mut b2).unwrap();
        for r in &rows {
            assert!(r.jacobian.velocity(&b1, &b2).abs() < 1e-9);
        }
    }

    #[test]
    fn inequality_row_stays_on_its_bound_when_separating() {
        let mut b1 = body(0.0, Vec3::ZERO);
        let mut b2 = body(1.0, Vec3::new(0.0, 2.0, 0.0));
        let mut rows = [row(JacobianRow::linear(Vec3::ZERO, Vec3::ZERO, Vec3::Y), &b1, &b2, 0.0, Real::INFINITY)];
        let mut solver = DirectJointSolver::default();
        solver.pre_solve(&rows);
        solver.solve_velocity(&mut rows, &mut b1, &mut b2).unwrap();
        assert_eq!(rows[0].impulse, 0.0);
        assert!((b2.linear.y - 2.0).abs() < 1e-12);

        b2.linear.y = -2.0;
        solver.solve_velocity(&mut rows, &mut b1, &mut b2).unwrap();
        assert!((rows[0].impulse - 2.0).abs() < 1e-9);
        assert!(b2.linear.y.abs() < 1e-9);
    }

    #[test]
    fn rows_without_any_mass_have_no_boundary() {
        let mut b1 = body(0.0, Vec3::ZERO);
        let mut b2 = body(0.0, Vec3::ZERO);
        let mut rows = [row(JacobianRow::angular(Vec3::X), &b1, &b2, Real::NEG_INFINITY, Real::INFINITY)];
        rows[0].rhs = 1.0;
        let mut solver = DirectJointSolver::default();
        solver.pre_solve(&rows);
        assert_eq!(
            solver.solve_velocity(&mut rows, &mut b1, &mut b2),
            Err(SolverError::NoBoundary { rows: 1 })
        );
        assert_eq!(rows[0].impulse, 0.0);
    }

    #[test]
    fn boundary_count_follows_finite_bounds() {
        let b = body(1.0, Vec3::ZERO);
        let rows = [
            row(JacobianRow::angular(Vec3::X), &b, &b, Real::NEG_INFINITY, Real::INFINITY),
            row(JacobianRow::angular(Vec3::Y), &b, &b, 0.0, Real::INFINITY),
            row(JacobianRow::angular(Vec3::Z), &b, &b, -1.0, 1.0),
        ];
        let mut solver = DirectJointSolver::default();
        solver.pre_solve(&rows);
        assert_eq!(solver.boundaries.len(), 6);
    }
}
