pub mod point;
pub mod vector;
pub mod transform;
pub mod quadrature;
pub mod curves;
pub mod curves2d;
pub mod surfaces;
pub mod nurbs;
pub mod intersection;
pub mod curve_intersection;
pub mod surface_intersection;

use curve_intersection::{CurveCurveIntersection, CurveSurfaceIntersection, NumericBudget};
use curves::Curve;
use point::Point3d;
use surfaces::Surface;
use vector::Vec3;

/// Evaluation contract for 3D curve carriers.
pub trait CurveEval {
    fn evaluate(&self, t: f64) -> Point3d;

    /// Derivatives of orders `1..=order` at `t`.
    fn derivatives(&self, t: f64, order: usize) -> Vec<Vec3>;

    fn intersect_with(
        &self,
        own_range: (f64, f64),
        other: &Curve,
        other_range: (f64, f64),
        tol: f64,
        budget: &NumericBudget,
    ) -> CurveCurveIntersection;
}

/// Evaluation contract for surface carriers.
pub trait SurfaceEval {
    fn evaluate(&self, u: f64, v: f64) -> Point3d;

    /// Returns `[Su, Sv]` for `order == 1`, then `[Suu, Suv, Svv]` appended for `order >= 2`.
    fn derivatives(&self, u: f64, v: f64, order: usize) -> Vec<Vec3>;

    fn intersect_curve(&self, curve: &Curve, range: (f64, f64), tol: f64, budget: &NumericBudget)
    -> CurveSurfaceIntersection;
}

impl CurveEval for Curve {
    fn evaluate(&self, t: f64) -> Point3d {
        Curve::evaluate(self, t)
    }

    fn derivatives(&self, t: f64, order: usize) -> Vec<Vec3> {
        let mut out = Vec::with_capacity(order);
        if order >= 1 {
            out.push(self.derivative(t));
        }
        if order >= 2 {
            out.push(self.second_derivative(t));
        }
        // higher orders by central differences of the second derivative
        let mut h = 1e-4 * (1.0 + t.abs());
        while out.len() < order {
            let k = out.len();
            let d = (finite_second(self, t + h, k - 1) - finite_second(self, t - h, k - 1)) / (2.0 * h);
            out.push(d);
            h *= 2.0;
        }
        out
    }

    fn intersect_with(
        &self,
        own_range: (f64, f64),
        other: &Curve,
        other_range: (f64, f64),
        tol: f64,
        budget: &NumericBudget,
    ) -> CurveCurveIntersection {
        curve_intersection::intersect_curves(self, own_range, other, other_range, tol, budget)
    }
}

fn finite_second(c: &Curve, t: f64, extra: usize) -> Vec3 {
    if extra <= 1 {
        return c.second_derivative(t);
    }
    let h = 1e-4 * (1.0 + t.abs());
    (finite_second(c, t + h, extra - 1) - finite_second(c, t - h, extra - 1)) / (2.0 * h)
}

impl SurfaceEval for Surface {
    fn evaluate(&self, u: f64, v: f64) -> Point3d {
        Surface::evaluate(self, u, v)
    }

    fn derivatives(&self, u: f64, v: f64, order: usize) -> Vec<Vec3> {
        let mut out = Vec::with_capacity(5);
        if order >= 1 {
            let (su, sv) = Surface::derivatives(self, u, v);
            out.extend([su, sv]);
        }
        if order >= 2 {
            let (suu, suv, svv) = self.second_derivatives(u, v);
            out.extend([suu, suv, svv]);
        }
        out
    }

    fn intersect_curve(&self, curve: &Curve, range: (f64, f64), tol: f64, budget: &NumericBudget)
    -> CurveSurfaceIntersection {
        curve_intersection::intersect_curve_surface(curve, range, self, tol, budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::curves::Circle3d;
    use crate::geometry::surfaces::Plane;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_circle_derivative_orders() {
        let c = Curve::Circle(Circle3d::new(Point3d::ORIGIN, Vec3::Z, 2.0));
        let d = CurveEval::derivatives(&c, 0.0, 3);
        assert_eq!(d.len(), 3);
        // third derivative of a circle at t = 0 is -r * y_axis
        let expected = Circle3d::new(Point3d::ORIGIN, Vec3::Z, 2.0).y_axis() * -2.0;
        assert_abs_diff_eq!(d[2], expected, epsilon = 1e-3);
    }

    #[test]
    fn test_surface_traits_dispatch() {
        let s = Surface::Plane(Plane::xy());
        assert_eq!(SurfaceEval::derivatives(&s, 0.0, 0.0, 2).len(), 5);
        let c = Curve::Circle(Circle3d::new(Point3d::new(0.0, 0.0, 0.5), Vec3::X, 1.0));
        let hits = s.intersect_curve(&c, (0.0, std::f64::consts::TAU), 1e-9, &NumericBudget::default());
        assert_eq!(hits.points.len(), 2);
    }
}
