//! Parameter-space outline of a face for point containment.

use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surfaces::Surface;

use super::brep::{EntityStore, FaceId, LoopId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointState {
    Inside,
    Outside,
    OnBoundary,
}

impl PointState {
    fn rank(self) -> u8 {
        match self {
            PointState::Outside => 0,
            PointState::OnBoundary => 1,
            PointState::Inside => 2,
        }
    }
}

/// Sampled boundary loops of a face in its parameter space.
#[derive(Debug, Clone)]
pub struct FaceDomain {
    pub surface: Surface,
    pub loops: Vec<Vec<Point2d>>,
    pub min: Point2d,
    pub max: Point2d,
}

fn segments_for(pc: &crate::geometry::curves2d::Curve2d) -> usize {
    use crate::geometry::curves2d::Curve2d;
    match pc {
        Curve2d::Line(_) => 1,
        Curve2d::Conic(_) => 64,
        Curve2d::Projected(p) => p.table.len().clamp(16, 128),
    }
}

/// Closed polygon of one loop, following its half-edges.
pub fn loop_polygon(store: &EntityStore, lp: LoopId) -> Vec<Point2d> {
    let mut poly: Vec<Point2d> = Vec::new();
    for &he in &store.loops[lp].half_edges {
        let Some(pc) = &store.half_edges[he].pcurve else {
            continue;
        };
        let (t0, t1) = store.half_edge_params(he);
        let pts = pc.polyline(t0, t1, segments_for(pc));
        let skip = usize::from(!poly.is_empty());
        poly.extend(pts.into_iter().skip(skip));
    }
    if poly.len() > 1 && poly[0].distance_to(&poly[poly.len() - 1]) < 1e-12 {
        poly.pop();
    }
    poly
}

/// Signed area of a closed polygon, positive when counter-clockwise.
pub fn polygon_area(poly: &[Point2d]) -> f64 {
    let n = poly.len();
    if n < 3 {
        return 0.0;
    }
    let mut a = 0.0;
    for i in 0..n {
        let (p, q) = (poly[i], poly[(i + 1) % n]);
        a += p.x * q.y - q.x * p.y;
    }
    0.5 * a
}

fn segment_distance(p: Point2d, a: Point2d, b: Point2d) -> f64 {
    let ab = b - a;
    let len2 = ab.dot(&ab);
    if len2 < 1e-300 {
        return p.distance_to(&a);
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    p.distance_to(&(a + ab * t))
}

/// Even-odd containment over a set of closed polygons.
pub fn polygons_contain(loops: &[Vec<Point2d>], p: Point2d, tol: f64) -> PointState {
    let mut inside = false;
    for poly in loops {
        let n = poly.len();
        for i in 0..n {
            let (a, b) = (poly[i], poly[(i + 1) % n]);
            if segment_distance(p, a, b) <= tol {
                return PointState::OnBoundary;
            }
            if (a.y > p.y) != (b.y > p.y) {
                let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if x > p.x {
                    inside = !inside;
                }
            }
        }
    }
    if inside { PointState::Inside } else { PointState::Outside }
}

impl FaceDomain {
    pub fn new(store: &EntityStore, face: FaceId) -> Self {
        let f = &store.faces[face];
        let loops: Vec<Vec<Point2d>> = f.loops().map(|l| loop_polygon(store, l)).filter(|p| p.len() >= 2).collect();
        let mut min = Point2d::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point2d::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in loops.iter().flatten() {
            min = Point2d::new(min.x.min(p.x), min.y.min(p.y));
            max = Point2d::new(max.x.max(p.x), max.y.max(p.y));
        }
        Self {
            surface: f.surface.clone(),
            loops,
            min,
            max,
        }
    }

    /// Candidate sheets of `uv` inside the domain's period window.
    fn sheets(&self, uv: Point2d) -> Vec<Point2d> {
        let mut us = vec![uv.x];
        if let Some(p) = self.surface.u_period() {
            let base = uv.x + ((self.min.x - uv.x) / p).floor() * p;
            us = vec![base, base + p, base + 2.0 * p];
        }
        let mut vs = vec![uv.y];
        if let Some(p) = self.surface.v_period() {
            let base = uv.y + ((self.min.y - uv.y) / p).floor() * p;
            vs = vec![base, base + p, base + 2.0 * p];
        }
        let mut out = Vec::with_capacity(us.len() * vs.len());
        for &u in &us {
            for &v in &vs {
                out.push(Point2d::new(u, v));
            }
        }
        out
    }

    /// Containment of a parameter point, trying every periodic sheet.
    pub fn classify_uv(&self, uv: Point2d, tol: f64) -> PointState {
        let mut best = PointState::Outside;
        for q in self.sheets(uv) {
            if q.x < self.min.x - tol || q.x > self.max.x + tol || q.y < self.min.y - tol || q.y > self.max.y + tol {
                continue;
            }
            let s = polygons_contain(&self.loops, q, tol);
            if s.rank() > best.rank() {
                best = s;
            }
            if best == PointState::Inside {
                break;
            }
        }
        best
    }

    /// Parameter-space tolerance matching a 3D distance at `uv`.
    pub fn uv_tolerance(&self, uv: Point2d, tol: f64) -> f64 {
        let (su, sv) = self.surface.metric_scale(&uv);
        let scale = su.max(sv).max(1e-12);
        (tol / scale).max(1e-9)
    }

    /// Containment of a 3D point near the surface; `None` when it is farther than `tol`.
    pub fn classify_point(&self, p: &Point3d, tol: f64) -> Option<(PointState, Point2d)> {
        let proj = self.surface.project(p);
        if proj.distance > tol {
            return None;
        }
        let uv_tol = self.uv_tolerance(proj.uv, tol);
        let state = self.classify_uv(proj.uv, uv_tol);
        Some((state, self.unwrap(proj.uv, uv_tol)))
    }

    /// The sheet of `uv` that lies inside the domain, or `uv` unchanged.
    pub fn unwrap(&self, uv: Point2d, tol: f64) -> Point2d {
        for q in self.sheets(uv) {
            if polygons_contain(&self.loops, q, tol) != PointState::Outside {
                return q;
            }
        }
        uv
    }

    /// Interior points on horizontal scanlines, widest span first.
    pub fn interior_samples(&self) -> Vec<Point2d> {
        let mut spans: Vec<(f64, Point2d)> = Vec::new();
        for frac in [0.5, 0.37, 0.63, 0.23, 0.77, 0.11, 0.89] {
            let v = self.min.y + (self.max.y - self.min.y) * frac;
            let mut xs: Vec<f64> = Vec::new();
            for poly in &self.loops {
                let n = poly.len();
                for i in 0..n {
                    let (a, b) = (poly[i], poly[(i + 1) % n]);
                    if (a.y > v) != (b.y > v) {
                        xs.push(a.x + (v - a.y) / (b.y - a.y) * (b.x - a.x));
                    }
                }
            }
            xs.sort_by(|a, b| a.total_cmp(b));
            let (su, _) = self.surface.metric_scale(&Point2d::new(0.5 * (self.min.x + self.max.x), v));
            for pair in xs.chunks_exact(2) {
                let width = (pair[1] - pair[0]) * su.max(1e-9);
                spans.push((width, Point2d::new(0.5 * (pair[0] + pair[1]), v)));
            }
        }
        spans.sort_by(|a, b| b.0.total_cmp(&a.0));
        spans.into_iter().map(|(_, p)| p).collect()
    }

    /// A point well inside the face.
    pub fn interior_point(&self) -> Option<Point2d> {
        self.interior_samples().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::vector::Vec3;
    use crate::topology::brep::ShapeKind;
    use crate::topology::explore::Explorer;
    use crate::topology::primitives::{make_box, make_planar_face, make_sphere};

    #[test]
    fn test_square_face_containment() {
        let mut store = EntityStore::new();
        let pts = [
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(2.0, 2.0, 0.0),
            Point3d::new(0.0, 2.0, 0.0),
        ];
        let f = make_planar_face(&mut store, &pts).unwrap();
        let d = FaceDomain::new(&store, f.as_face().unwrap());
        assert_eq!(d.loops.len(), 1);
        assert!(polygon_area(&d.loops[0]) > 0.0);
        let probe = |x: f64, y: f64| d.classify_point(&Point3d::new(x, y, 0.0), 1e-7).map(|(s, _)| s);
        assert_eq!(probe(1.0, 1.0), Some(PointState::Inside));
        assert_eq!(probe(3.0, 1.0), Some(PointState::Outside));
        assert_eq!(probe(2.0, 1.0), Some(PointState::OnBoundary));
        assert_eq!(d.classify_point(&Point3d::new(1.0, 1.0, 0.5), 1e-7), None);
    }

    #[test]
    fn test_sphere_face_covers_seam() {
        let mut store = EntityStore::new();
        let s = make_sphere(&mut store, Point3d::ORIGIN, 1.0);
        let face = Explorer::new(&store, s, ShapeKind::Face).next().and_then(|f| f.as_face()).unwrap();
        let d = FaceDomain::new(&store, face);
        assert!(polygon_area(&d.loops[0]) > 0.0);
        let p = Point3d::new(0.0, -1.0, 0.0);
        assert_eq!(d.classify_point(&p, 1e-7).map(|(s, _)| s), Some(PointState::Inside));
        // on the seam meridian
        let q = Point3d::new(1.0, 0.0, 0.0);
        assert_eq!(d.classify_point(&q, 1e-7).map(|(s, _)| s), Some(PointState::OnBoundary));
    }

    #[test]
    fn test_interior_point_is_inside() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 3.0, 2.0));
        for f in Explorer::new(&store, b, ShapeKind::Face) {
            let d = FaceDomain::new(&store, f.as_face().unwrap());
            let uv = d.interior_point().unwrap();
            assert_eq!(d.classify_uv(uv, 1e-9), PointState::Inside);
            let n = d.surface.normal_at(uv.x, uv.y);
            assert!((n.length() - Vec3::X.length()).abs() < 1e-12);
            assert!(d.interior_samples().iter().all(|q| d.classify_uv(*q, 1e-9) == PointState::Inside));
        }
    }
}
