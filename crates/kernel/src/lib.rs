//! Boolean operations on boundary-representation shapes.

pub mod geometry;
pub mod topology;
pub mod boolean;
pub mod validation;

pub use boolean::{perform, BooleanEngine, BooleanOp, BooleanOptions, BooleanOutcome, DefaultBooleanEngine};
pub use geometry::{CurveEval, SurfaceEval};

/// Global tolerance configuration for geometric comparisons.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance {
    /// Points closer than this are considered coincident (meters).
    pub coincidence: f64,
    /// Angles smaller than this (radians) are considered zero.
    pub angular: f64,
    /// Parameter-space tolerance for curve/surface evaluations.
    pub parametric: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            coincidence: 1e-7,
            angular: 1e-10,
            parametric: 1e-9,
        }
    }
}

/// Tolerance used when an operation is given none.
pub fn default_tolerance() -> Tolerance {
    Tolerance::default()
}
