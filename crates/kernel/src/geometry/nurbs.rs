use serde::{Deserialize, Serialize};

use super::point::{Point2d, Point3d};
use super::transform::Transform;
use super::vector::Vec3;

/// A NURBS (Non-Uniform Rational B-Spline) curve in 3D.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NurbsCurve {
    /// Degree of the curve.
    pub degree: usize,
    /// Control points in 3D.
    pub control_points: Vec<Point3d>,
    /// Weights for rational curves. If empty, treated as all 1.0 (non-rational).
    pub weights: Vec<f64>,
    /// Knot vector (must have len = control_points.len() + degree + 1).
    pub knots: Vec<f64>,
}

impl NurbsCurve {
    /// Returns `None` unless `knots.len() == n + p + 1` and the weights match.
    pub fn new(degree: usize, control_points: Vec<Point3d>, weights: Vec<f64>, knots: Vec<f64>) -> Option<Self> {
        if control_points.len() <= degree || knots.len() != control_points.len() + degree + 1 {
            return None;
        }
        if !(weights.is_empty() || weights.len() == control_points.len()) {
            return None;
        }
        Some(Self {
            degree,
            control_points,
            weights,
            knots,
        })
    }

    /// Create a non-rational B-spline curve.
    pub fn bspline(degree: usize, control_points: Vec<Point3d>, knots: Vec<f64>) -> Option<Self> {
        Self::new(degree, control_points, vec![], knots)
    }

    /// Degree-1 curve through `points`, parameterised by cumulative chord length.
    pub fn polyline(points: &[Point3d]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let mut knots = Vec::with_capacity(points.len() + 2);
        knots.push(0.0);
        let mut acc = 0.0;
        knots.push(acc);
        for w in points.windows(2) {
            let d = w[0].distance_to(&w[1]);
            if d < 1e-14 {
                return None;
            }
            acc += d;
            knots.push(acc);
        }
        knots.push(acc);
        Self::bspline(1, points.to_vec(), knots)
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        Self {
            degree: self.degree,
            control_points: self.control_points.iter().map(|p| t.transform_point(p)).collect(),
            weights: self.weights.clone(),
            knots: self.knots.clone(),
        }
    }

    fn is_rational(&self) -> bool {
        !self.weights.is_empty()
    }

    fn weight(&self, i: usize) -> f64 {
        if self.is_rational() {
            self.weights[i]
        } else {
            1.0
        }
    }

    /// Number of control points.
    pub fn num_control_points(&self) -> usize {
        self.control_points.len()
    }

    /// Parameter domain [t_min, t_max].
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.knots.len() - self.degree - 1])
    }

    /// Find the knot span index for parameter t using binary search.
    fn find_span(&self, t: f64) -> usize {
        let n = self.num_control_points() - 1;
        let p = self.degree;

        if t >= self.knots[n + 1] {
            return n;
        }
        if t <= self.knots[p] {
            return p;
        }

        let mut low = p;
        let mut high = n + 1;
        let mut mid = (low + high) / 2;
        while t < self.knots[mid] || t >= self.knots[mid + 1] {
            if t < self.knots[mid] {
                high = mid;
            } else {
                low = mid;
            }
            mid = (low + high) / 2;
        }
        mid
    }

    /// Compute B-spline basis functions at parameter t.
    fn basis_functions(&self, span: usize, t: f64) -> Vec<f64> {
        let p = self.degree;
        let mut n_vals = vec![0.0; p + 1];
        let mut left = vec![0.0; p + 1];
        let mut right = vec![0.0; p + 1];

        n_vals[0] = 1.0;
        for j in 1..=p {
            left[j] = t - self.knots[span + 1 - j];
            right[j] = self.knots[span + j] - t;
            let mut saved = 0.0;
            for r in 0..j {
                let temp = n_vals[r] / (right[r + 1] + left[j - r]);
                n_vals[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n_vals[j] = saved;
        }
        n_vals
    }

    /// Evaluate the curve at parameter t using de Boor's algorithm.
    pub fn evaluate(&self, t: f64) -> Point3d {
        let span = self.find_span(t);
        let basis = self.basis_functions(span, t);
        let p = self.degree;

        if !self.is_rational() {
            let mut point = Vec3::ZERO;
            for i in 0..=p {
                let cp = self.control_points[span - p + i];
                point = point + Vec3::new(cp.x, cp.y, cp.z) * basis[i];
            }
            Point3d::new(point.x, point.y, point.z)
        } else {
            let mut wx = 0.0;
            let mut wy = 0.0;
            let mut wz = 0.0;
            let mut w_sum = 0.0;
            for i in 0..=p {
                let idx = span - p + i;
                let cp = self.control_points[idx];
                let w = self.weight(idx);
                let bw = basis[i] * w;
                wx += cp.x * bw;
                wy += cp.y * bw;
                wz += cp.z * bw;
                w_sum += bw;
            }
            Point3d::new(wx / w_sum, wy / w_sum, wz / w_sum)
        }
    }

    /// First derivative by one-sided-safe central differences.
    pub fn derivative(&self, t: f64) -> Vec3 {
        let dt = 1e-7 * (1.0 + t.abs());
        let (tmin, tmax) = self.domain();
        let t0 = (t - dt).max(tmin);
        let t1 = (t + dt).min(tmax);
        let actual_dt = t1 - t0;
        if actual_dt.abs() < 1e-15 {
            return Vec3::ZERO;
        }
        (self.evaluate(t1) - self.evaluate(t0)) / actual_dt
    }

    pub fn second_derivative(&self, t: f64) -> Vec3 {
        let dt = 1e-4 * (1.0 + t.abs());
        let (tmin, tmax) = self.domain();
        let t0 = (t - dt).max(tmin);
        let t1 = (t + dt).min(tmax);
        let actual_dt = t1 - t0;
        if actual_dt.abs() < 1e-15 {
            return Vec3::ZERO;
        }
        (self.derivative(t1) - self.derivative(t0)) / actual_dt
    }
}

/// A NURBS surface (tensor-product).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NurbsSurface {
    pub degree_u: usize,
    pub degree_v: usize,
    /// Control points grid: [u_index * num_v + v_index]
    pub control_points: Vec<Point3d>,
    pub weights: Vec<f64>,
    pub knots_u: Vec<f64>,
    pub knots_v: Vec<f64>,
    pub num_u: usize,
    pub num_v: usize,
}

impl NurbsSurface {
    pub fn new(
        degree_u: usize,
        degree_v: usize,
        control_points: Vec<Point3d>,
        weights: Vec<f64>,
        knots_u: Vec<f64>,
        knots_v: Vec<f64>,
        num_u: usize,
        num_v: usize,
    ) -> Option<Self> {
        if control_points.len() != num_u * num_v
            || knots_u.len() != num_u + degree_u + 1
            || knots_v.len() != num_v + degree_v + 1
        {
            return None;
        }
        Some(Self {
            degree_u,
            degree_v,
            control_points,
            weights,
            knots_u,
            knots_v,
            num_u,
            num_v,
        })
    }

    fn is_rational(&self) -> bool {
        !self.weights.is_empty()
    }

    pub fn transformed(&self, t: &Transform) -> Self {
        let mut out = self.clone();
        out.control_points = self.control_points.iter().map(|p| t.transform_point(p)).collect();
        out
    }

    pub fn clamp_parameters(&self, uv: Point2d) -> Point2d {
        let (u0, u1) = self.domain_u();
        let (v0, v1) = self.domain_v();
        Point2d::new(uv.x.clamp(u0, u1), uv.y.clamp(v0, v1))
    }

    /// Nearest grid sample, used to start foot-point iterations.
    pub fn seed_parameters(&self, p: &Point3d) -> Point2d {
        let (u0, u1) = self.domain_u();
        let (v0, v1) = self.domain_v();
        let n = 16;
        let mut best = (f64::INFINITY, Point2d::new(u0, v0));
        for i in 0..=n {
            for j in 0..=n {
                let uv = Point2d::new(
                    u0 + (u1 - u0) * i as f64 / n as f64,
                    v0 + (v1 - v0) * j as f64 / n as f64,
                );
                let d = self.evaluate(uv.x, uv.y).distance_squared_to(p);
                if d < best.0 {
                    best = (d, uv);
                }
            }
        }
        best.1
    }

    fn weight(&self, u_idx: usize, v_idx: usize) -> f64 {
        if self.is_rational() {
            self.weights[u_idx * self.num_v + v_idx]
        } else {
            1.0
        }
    }

    pub fn domain_u(&self) -> (f64, f64) {
        (
            self.knots_u[self.degree_u],
            self.knots_u[self.knots_u.len() - self.degree_u - 1],
        )
    }

    pub fn domain_v(&self) -> (f64, f64) {
        (
            self.knots_v[self.degree_v],
            self.knots_v[self.knots_v.len() - self.degree_v - 1],
        )
    }

    fn find_span_u(&self, u: f64) -> usize {
        let n = self.num_u - 1;
        let p = self.degree_u;
        if u >= self.knots_u[n + 1] {
            return n;
        }
        if u <= self.knots_u[p] {
            return p;
        }
        let mut low = p;
        let mut high = n + 1;
        let mut mid = (low + high) / 2;
        while u < self.knots_u[mid] || u >= self.knots_u[mid + 1] {
            if u < self.knots_u[mid] {
                high = mid;
            } else {
                low = mid;
            }
            mid = (low + high) / 2;
        }
        mid
    }

    fn find_span_v(&self, v: f64) -> usize {
        let n = self.num_v - 1;
        let p = self.degree_v;
        if v >= self.knots_v[n + 1] {
            return n;
        }
        if v <= self.knots_v[p] {
            return p;
        }
        let mut low = p;
        let mut high = n + 1;
        let mut mid = (low + high) / 2;
        while v < self.knots_v[mid] || v >= self.knots_v[mid + 1] {
            if v < self.knots_v[mid] {
                high = mid;
            } else {
                low = mid;
            }
            mid = (low + high) / 2;
        }
        mid
    }

    fn basis_functions(knots: &[f64], span: usize, t: f64, degree: usize) -> Vec<f64> {
        let p = degree;
        let mut n_vals = vec![0.0; p + 1];
        let mut left = vec![0.0; p + 1];
        let mut right = vec![0.0; p + 1];

        n_vals[0] = 1.0;
        for j in 1..=p {
            left[j] = t - knots[span + 1 - j];
            right[j] = knots[span + j] - t;
            let mut saved = 0.0;
            for r in 0..j {
                let temp = n_vals[r] / (right[r + 1] + left[j - r]);
                n_vals[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n_vals[j] = saved;
        }
        n_vals
    }

    /// Evaluate the surface at (u, v).
    pub fn evaluate(&self, u: f64, v: f64) -> Point3d {
        let span_u = self.find_span_u(u);
        let span_v = self.find_span_v(v);
        let basis_u = Self::basis_functions(&self.knots_u, span_u, u, self.degree_u);
        let basis_v = Self::basis_functions(&self.knots_v, span_v, v, self.degree_v);

        let mut wx = 0.0;
        let mut wy = 0.0;
        let mut wz = 0.0;
        let mut w_sum = 0.0;

        for i in 0..=self.degree_u {
            let u_idx = span_u - self.degree_u + i;
            for j in 0..=self.degree_v {
                let v_idx = span_v - self.degree_v + j;
                let cp = self.control_points[u_idx * self.num_v + v_idx];
                let w = self.weight(u_idx, v_idx);
                let bw = basis_u[i] * basis_v[j] * w;
                wx += cp.x * bw;
                wy += cp.y * bw;
                wz += cp.z * bw;
                w_sum += bw;
            }
        }

        if self.is_rational() {
            Point3d::new(wx / w_sum, wy / w_sum, wz / w_sum)
        } else {
            Point3d::new(wx, wy, wz)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_line_as_nurbs() -> Option<NurbsCurve> {
        NurbsCurve::bspline(
            1,
            vec![Point3d::new(0.0, 0.0, 0.0), Point3d::new(10.0, 0.0, 0.0)],
            vec![0.0, 0.0, 1.0, 1.0],
        )
    }

    #[test]
    fn test_nurbs_line_evaluate() {
        let c = make_line_as_nurbs().unwrap();
        let p = c.evaluate(0.5);
        assert!((p.x - 5.0).abs() < 1e-10);
        assert!(p.y.abs() < 1e-10);
        assert!(c.derivative(0.5).x > 0.0);
    }

    #[test]
    fn test_invalid_knot_vector_rejected() {
        let bad = NurbsCurve::bspline(2, vec![Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0)], vec![0.0, 1.0]);
        assert!(bad.is_none());
    }

    #[test]
    fn test_nurbs_circle_via_rational() {
        let w = std::f64::consts::FRAC_1_SQRT_2;
        let c = NurbsCurve::new(
            2,
            vec![
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(1.0, 1.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
            ],
            vec![1.0, w, 1.0],
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        )
        .unwrap();

        for i in 0..=20 {
            let t = i as f64 / 20.0;
            let p = c.evaluate(t);
            let r = (p.x * p.x + p.y * p.y).sqrt();
            assert!((r - 1.0).abs() < 1e-7, "Point at t={} has radius {}", t, r);
        }
    }

    #[test]
    fn test_polyline_is_chord_parameterised() {
        let pts = [
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(3.0, 0.0, 0.0),
            Point3d::new(3.0, 4.0, 0.0),
        ];
        let c = NurbsCurve::polyline(&pts).unwrap();
        assert_eq!(c.domain(), (0.0, 7.0));
        assert!(c.evaluate(3.0).distance_to(&pts[1]) < 1e-12);
        assert!(c.evaluate(5.0).distance_to(&Point3d::new(3.0, 2.0, 0.0)) < 1e-12);
        assert!(NurbsCurve::polyline(&pts[..1]).is_none());
    }

    #[test]
    fn test_bilinear_surface_seed() {
        let s = NurbsSurface::new(
            1,
            1,
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(1.0, 1.0, 0.0),
            ],
            vec![],
            vec![0.0, 0.0, 1.0, 1.0],
            vec![0.0, 0.0, 1.0, 1.0],
            2,
            2,
        )
        .unwrap();
        let p = s.evaluate(0.25, 0.75);
        assert!(p.distance_to(&Point3d::new(0.25, 0.75, 0.0)) < 1e-12);
        let seed = s.seed_parameters(&Point3d::new(0.25, 0.75, 0.3));
        assert!((seed.x - 0.25).abs() < 0.07 && (seed.y - 0.75).abs() < 0.07);
    }
}
