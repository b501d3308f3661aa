//! Enclosed volume and surface area of boundary representations.
//!
//! Both measures are surface integrals over each face's parameter domain,
//! turned into loop integrals with Green's theorem and evaluated by
//! Gauss–Legendre quadrature along the pcurves. Planar faces bounded by
//! straight and conic pcurves come out exact to rounding.

use crate::geometry::curves2d::Curve2d;
use crate::geometry::quadrature::integrate;
use crate::geometry::surfaces::Surface;
use crate::topology::brep::*;
use crate::topology::explore::Explorer;

fn inner_segments(span: f64) -> usize {
    ((span.abs() / 0.25).ceil() as usize).clamp(1, 64)
}

fn outer_segments(pc: &Curve2d) -> usize {
    match pc {
        Curve2d::Line(_) => 2,
        Curve2d::Conic(_) => 12,
        Curve2d::Projected(_) => 24,
    }
}

/// `∫∫ f du dv` over the trimmed domain of a face, as `∮ F dv` with
/// `F(u, v) = ∫ f(s, v) ds` from a fixed `u0`.
fn domain_integral(store: &EntityStore, face: FaceId, f: &dyn Fn(&Surface, f64, f64) -> f64, constant: Option<f64>) -> f64 {
    let fc = &store.faces[face];
    let mut u0: Option<f64> = None;
    let mut total = 0.0;
    for lp in fc.loops() {
        for &he in &store.loops[lp].half_edges {
            let Some(pc) = &store.half_edges[he].pcurve else {
                continue;
            };
            let (t0, t1) = store.half_edge_params(he);
            let base = *u0.get_or_insert_with(|| pc.evaluate(t0).x);
            let antiderivative = |u: f64, v: f64| match constant {
                Some(c) => c * (u - base),
                None => integrate(|s| f(&fc.surface, s, v), base, u, inner_segments(u - base)),
            };
            total += integrate(
                |t| {
                    let dv = pc.derivative(t).y;
                    if dv == 0.0 {
                        return 0.0;
                    }
                    let uv = pc.evaluate(t);
                    antiderivative(uv.x, uv.y) * dv
                },
                t0,
                t1,
                outer_segments(pc),
            );
        }
    }
    total
}

/// Signed volume contribution `(1/3) ∫∫ p · (Su × Sv)` of one oriented face.
pub fn face_volume_term(store: &EntityStore, face: &Shape) -> f64 {
    let Some(fid) = face.as_face() else {
        return 0.0;
    };
    let constant = match &store.faces[fid].surface {
        Surface::Plane(p) => Some(p.origin.to_vec3().dot(&p.normal)),
        _ => None,
    };
    let integrand = |s: &Surface, u: f64, v: f64| s.evaluate(u, v).to_vec3().dot(&s.area_element(u, v));
    face.orientation.sign() * domain_integral(store, fid, &integrand, constant) / 3.0
}

/// Signed volume enclosed by a closed set of faces; negative for a cavity boundary.
pub fn faces_volume(store: &EntityStore, faces: &[Shape]) -> f64 {
    faces.iter().map(|f| face_volume_term(store, f)).sum()
}

pub fn face_area(store: &EntityStore, face: FaceId) -> f64 {
    let constant = match &store.faces[face].surface {
        Surface::Plane(_) => Some(1.0),
        _ => None,
    };
    let integrand = |s: &Surface, u: f64, v: f64| s.area_element(u, v).length();
    domain_integral(store, face, &integrand, constant).abs()
}

/// Total volume of the solids in `shape`; closed shells count when no solid is present.
pub fn shape_volume(store: &EntityStore, shape: &Shape) -> f64 {
    let solids: Vec<Shape> = Explorer::new(store, *shape, ShapeKind::Solid).collect();
    let roots = if solids.is_empty() {
        Explorer::new(store, *shape, ShapeKind::Shell).collect()
    } else {
        solids
    };
    roots
        .iter()
        .map(|r| {
            let faces: Vec<Shape> = Explorer::new(store, *r, ShapeKind::Face).collect();
            faces_volume(store, &faces)
        })
        .sum()
}

pub fn shape_area(store: &EntityStore, shape: &Shape) -> f64 {
    Explorer::new(store, *shape, ShapeKind::Face)
        .filter_map(|f| f.as_face())
        .map(|f| face_area(store, f))
        .sum()
}

/// Inclusion–exclusion check `vol(A ∪ B) = vol(A) + vol(B) - vol(A ∩ B)`.
pub fn verify_volume_identity(
    store: &EntityStore,
    a: &Shape,
    b: &Shape,
    fuse: &Shape,
    common: Option<&Shape>,
) -> VolumeVerification {
    let vol_a = shape_volume(store, a);
    let vol_b = shape_volume(store, b);
    let vol_union = shape_volume(store, fuse);
    let vol_intersection = common.map(|c| shape_volume(store, c));
    let expected_union = vol_a + vol_b - vol_intersection.unwrap_or(0.0);
    let relative_error = if expected_union > 0.0 {
        (vol_union - expected_union).abs() / expected_union
    } else {
        vol_union.abs()
    };
    VolumeVerification {
        vol_a,
        vol_b,
        vol_union,
        vol_intersection,
        expected_union,
        relative_error,
    }
}

#[derive(Debug)]
pub struct VolumeVerification {
    pub vol_a: f64,
    pub vol_b: f64,
    pub vol_union: f64,
    pub vol_intersection: Option<f64>,
    pub expected_union: f64,
    pub relative_error: f64,
}

impl VolumeVerification {
    pub fn is_valid(&self, max_relative_error: f64) -> bool {
        self.relative_error < max_relative_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::geometry::vector::Vec3;
    use crate::topology::primitives::{make_box, make_cylinder, make_planar_face, make_sphere};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_box_volume_and_area() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::new(-1.0, 0.0, 2.0), Point3d::new(1.0, 3.0, 6.0));
        assert_relative_eq!(shape_volume(&store, &b), 24.0, epsilon = 1e-12);
        assert_relative_eq!(shape_area(&store, &b), 2.0 * (6.0 + 8.0 + 12.0), epsilon = 1e-12);
        assert_relative_eq!(shape_volume(&store, &b.reversed()), -24.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sphere_volume() {
        let mut store = EntityStore::new();
        let s = make_sphere(&mut store, Point3d::new(0.3, -0.2, 1.0), 1.5);
        assert_relative_eq!(shape_volume(&store, &s), 4.0 / 3.0 * PI * 1.5f64.powi(3), max_relative = 1e-6);
        assert_relative_eq!(shape_area(&store, &s), 4.0 * PI * 2.25, max_relative = 1e-6);
    }

    #[test]
    fn test_cylinder_volume() {
        let mut store = EntityStore::new();
        let c = make_cylinder(&mut store, Point3d::new(1.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 1.0).normalize(), 0.5, 2.0);
        assert_relative_eq!(shape_volume(&store, &c), PI * 0.25 * 2.0, max_relative = 1e-6);
    }

    #[test]
    fn test_open_face_has_area_only() {
        let mut store = EntityStore::new();
        let f = make_planar_face(
            &mut store,
            &[Point3d::ORIGIN, Point3d::new(2.0, 0.0, 0.0), Point3d::new(0.0, 2.0, 0.0)],
        )
        .unwrap();
        assert_relative_eq!(shape_area(&store, &f), 2.0, epsilon = 1e-12);
        assert_eq!(shape_volume(&store, &f), 0.0);
    }
}
