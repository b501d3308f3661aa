use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};

use tracing::{info, instrument};

use super::brep::*;
use crate::geometry::curves::{Circle3d, Curve, Line3d};
use crate::geometry::curves2d::{pcurve_for, Curve2d};
use crate::geometry::point::{Point2d, Point3d};
use crate::geometry::surfaces::{Cylinder, Plane, Sphere, Surface};
use crate::geometry::vector::{Vec2, Vec3};

fn default_tol() -> f64 {
    crate::default_tolerance().coincidence
}

/// Planar face through `vids` in order, counter-clockwise seen along `normal`.
/// Edges between the same vertex pair are shared through `edge_map`.
fn polygon_face(
    store: &mut EntityStore,
    vids: &[VertexId],
    normal: Vec3,
    edge_map: &mut HashMap<(VertexId, VertexId), EdgeId>,
) -> FaceId {
    let points: Vec<Point3d> = vids.iter().map(|v| store.vertices[*v].point).collect();
    let plane = Plane::from_axes(points[0], normal, points[1] - points[0]);
    let surface = Surface::Plane(plane);
    let mut half_edges = Vec::with_capacity(vids.len());
    for i in 0..vids.len() {
        let (a, b) = (vids[i], vids[(i + 1) % vids.len()]);
        let key = if a < b { (a, b) } else { (b, a) };
        let edge = match edge_map.get(&key) {
            Some(&e) => e,
            None => {
                let (pa, pb) = (store.vertices[a].point, store.vertices[b].point);
                let e = store.add_edge(
                    Curve::Line(Line3d::from_points(pa, pb)),
                    (0.0, pa.distance_to(&pb)),
                    a,
                    b,
                    default_tol(),
                );
                edge_map.insert(key, e);
                e
            }
        };
        let e = &store.edges[edge];
        let forward = e.start_vertex == a;
        let pcurve = pcurve_for(&e.curve, e.t_start, e.t_end, &surface, None, None);
        half_edges.push(store.add_half_edge(edge, forward, Some(pcurve)));
    }
    let outer = store.add_loop(half_edges);
    store.add_face(surface, outer, vec![], default_tol())
}

/// Axis-aligned box between two opposite corners.
#[instrument(skip(store))]
pub fn make_box(store: &mut EntityStore, min: Point3d, max: Point3d) -> Shape {
    info!(min = ?[min.x, min.y, min.z], max = ?[max.x, max.y, max.z], "creating box primitive");
    let (x0, y0, z0) = (min.x, min.y, min.z);
    let (x1, y1, z1) = (max.x, max.y, max.z);
    let v = [
        Point3d::new(x0, y0, z0),
        Point3d::new(x1, y0, z0),
        Point3d::new(x1, y1, z0),
        Point3d::new(x0, y1, z0),
        Point3d::new(x0, y0, z1),
        Point3d::new(x1, y0, z1),
        Point3d::new(x1, y1, z1),
        Point3d::new(x0, y1, z1),
    ];
    let ids: Vec<VertexId> = v.iter().map(|p| store.add_vertex(*p, default_tol())).collect();

    // counter-clockwise seen from outside
    let face_defs: [([usize; 4], Vec3); 6] = [
        ([0, 3, 2, 1], -Vec3::Z),
        ([4, 5, 6, 7], Vec3::Z),
        ([0, 4, 7, 3], -Vec3::X),
        ([1, 2, 6, 5], Vec3::X),
        ([0, 1, 5, 4], -Vec3::Y),
        ([3, 7, 6, 2], Vec3::Y),
    ];

    let mut edge_map = HashMap::new();
    let mut faces = Vec::with_capacity(6);
    for (corners, normal) in face_defs {
        let vids: Vec<VertexId> = corners.iter().map(|&i| ids[i]).collect();
        faces.push(Shape::face(polygon_face(store, &vids, normal, &mut edge_map)));
    }
    let shell = store.add_shell(faces);
    Shape::solid(store.add_solid(vec![shell]))
}

/// Analytic sphere: one face over `[0, 2pi] x [-pi/2, pi/2]` bounded by a
/// seam meridian used twice and a degenerated edge at each pole.
#[instrument(skip(store), fields(center = ?[center.x, center.y, center.z]))]
pub fn make_sphere(store: &mut EntityStore, center: Point3d, radius: f64) -> Shape {
    info!(radius, "creating sphere primitive");
    let sphere = Sphere::new(center, radius);
    let south = store.add_vertex(center - sphere.axis * radius, default_tol());
    let north = store.add_vertex(center + sphere.axis * radius, default_tol());

    // t = 0 at the south pole, t = pi at the north pole, through ref_dir at t = pi/2
    let meridian = Circle3d::with_axes(center, sphere.ref_dir.cross(&sphere.axis), -sphere.axis, radius);
    let seam = store.add_edge(Curve::Circle(meridian), (0.0, PI), south, north, default_tol());
    let south_edge = store.add_degenerate_edge(south, (0.0, TAU), default_tol());
    let north_edge = store.add_degenerate_edge(north, (0.0, TAU), default_tol());

    let line = |u: f64, v: f64, du: f64, dv: f64| Some(Curve2d::line(Point2d::new(u, v), Vec2::new(du, dv)));
    let half_edges = vec![
        store.add_half_edge(south_edge, true, line(0.0, -FRAC_PI_2, 1.0, 0.0)),
        store.add_half_edge(seam, true, line(TAU, -FRAC_PI_2, 0.0, 1.0)),
        store.add_half_edge(north_edge, false, line(0.0, FRAC_PI_2, 1.0, 0.0)),
        store.add_half_edge(seam, false, line(0.0, -FRAC_PI_2, 0.0, 1.0)),
    ];
    let outer = store.add_loop(half_edges);
    let face = store.add_face(Surface::Sphere(sphere), outer, vec![], default_tol());
    let shell = store.add_shell(vec![Shape::face(face)]);
    Shape::solid(store.add_solid(vec![shell]))
}

/// Analytic cylinder standing on `base` along `axis`: a lateral face with one
/// seam and two planar caps.
#[instrument(skip(store), fields(base = ?[base.x, base.y, base.z]))]
pub fn make_cylinder(store: &mut EntityStore, base: Point3d, axis: Vec3, radius: f64, height: f64) -> Shape {
    info!(radius, height, "creating cylinder primitive");
    let cyl = Cylinder::new(base, axis, radius);
    let (axis, ref_dir) = (cyl.axis, cyl.ref_dir);
    let top_center = base + axis * height;
    let v_bottom = store.add_vertex(base + ref_dir * radius, default_tol());
    let v_top = store.add_vertex(top_center + ref_dir * radius, default_tol());

    let bottom_circle = Curve::Circle(Circle3d::with_axes(base, axis, ref_dir, radius));
    let top_circle = Curve::Circle(Circle3d::with_axes(top_center, axis, ref_dir, radius));
    let bottom = store.add_edge(bottom_circle.clone(), (0.0, TAU), v_bottom, v_bottom, default_tol());
    let top = store.add_edge(top_circle.clone(), (0.0, TAU), v_top, v_top, default_tol());
    let seam = store.add_edge(
        Curve::Line(Line3d::new(base + ref_dir * radius, axis)),
        (0.0, height),
        v_bottom,
        v_top,
        default_tol(),
    );

    let line = |u: f64, v: f64, du: f64, dv: f64| Some(Curve2d::line(Point2d::new(u, v), Vec2::new(du, dv)));
    let lateral_loop = vec![
        store.add_half_edge(bottom, true, line(0.0, 0.0, 1.0, 0.0)),
        store.add_half_edge(seam, true, line(TAU, 0.0, 0.0, 1.0)),
        store.add_half_edge(top, false, line(0.0, height, 1.0, 0.0)),
        store.add_half_edge(seam, false, line(0.0, 0.0, 0.0, 1.0)),
    ];
    let lateral_outer = store.add_loop(lateral_loop);
    let lateral = store.add_face(Surface::Cylinder(cyl), lateral_outer, vec![], default_tol());

    let bottom_plane = Surface::Plane(Plane::from_axes(base, -axis, ref_dir));
    let pc = pcurve_for(&bottom_circle, 0.0, TAU, &bottom_plane, None, None);
    let he = store.add_half_edge(bottom, false, Some(pc));
    let bottom_outer = store.add_loop(vec![he]);
    let bottom_face = store.add_face(bottom_plane, bottom_outer, vec![], default_tol());

    let top_plane = Surface::Plane(Plane::from_axes(top_center, axis, ref_dir));
    let pc = pcurve_for(&top_circle, 0.0, TAU, &top_plane, None, None);
    let he = store.add_half_edge(top, true, Some(pc));
    let top_outer = store.add_loop(vec![he]);
    let top_face = store.add_face(top_plane, top_outer, vec![], default_tol());

    let shell = store.add_shell(vec![Shape::face(lateral), Shape::face(bottom_face), Shape::face(top_face)]);
    Shape::solid(store.add_solid(vec![shell]))
}

/// Polygonal planar face; the normal follows the winding of `points`.
#[instrument(skip(store, points), fields(n = points.len()))]
pub fn make_planar_face(store: &mut EntityStore, points: &[Point3d]) -> Result<Shape, TopologyError> {
    if points.len() < 3 {
        return Err(TopologyError::TooFewPoints {
            needed: 3,
            got: points.len(),
        });
    }
    // Newell normal
    let mut n = Vec3::ZERO;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[(i + 1) % points.len()]);
        n = n + Vec3::new(
            (a.y - b.y) * (a.z + b.z),
            (a.z - b.z) * (a.x + b.x),
            (a.x - b.x) * (a.y + b.y),
        );
    }
    let Some(normal) = n.normalized() else {
        return Err(TopologyError::Degenerate("polygon has no area".into()));
    };
    let vids: Vec<VertexId> = points.iter().map(|p| store.add_vertex(*p, default_tol())).collect();
    let face = polygon_face(store, &vids, normal, &mut HashMap::new());
    Ok(Shape::face(face))
}

/// Open polyline wire; consecutive points must be distinct.
#[instrument(skip(store, points), fields(n = points.len()))]
pub fn make_polyline_wire(store: &mut EntityStore, points: &[Point3d]) -> Result<Shape, TopologyError> {
    if points.len() < 2 {
        return Err(TopologyError::TooFewPoints {
            needed: 2,
            got: points.len(),
        });
    }
    let vids: Vec<VertexId> = points.iter().map(|p| store.add_vertex(*p, default_tol())).collect();
    let mut half_edges = Vec::with_capacity(points.len() - 1);
    for i in 0..points.len() - 1 {
        let (a, b) = (points[i], points[i + 1]);
        let len = a.distance_to(&b);
        if len <= default_tol() {
            return Err(TopologyError::Degenerate(format!("wire segment {i} has zero length")));
        }
        let e = store.add_edge(Curve::Line(Line3d::from_points(a, b)), (0.0, len), vids[i], vids[i + 1], default_tol());
        half_edges.push(store.add_half_edge(e, true, None));
    }
    Ok(Shape::wire(store.add_loop(half_edges)))
}

pub fn make_compound(store: &mut EntityStore, children: Vec<Shape>) -> Shape {
    Shape::compound(store.add_compound(children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::explore::Explorer;
    use crate::validation::audit::audit_shape;

    #[test]
    fn test_make_box_creates_correct_topology() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let count = store.count_topology(&b);
        assert_eq!(count.vertices, 8, "Box should have 8 vertices");
        assert_eq!(count.faces, 6, "Box should have 6 faces");
        assert_eq!(count.edges, 12, "Box should have 12 edges");
        assert_eq!(count.shells, 1);
        let chi = count.vertices as i64 - count.edges as i64 + count.faces as i64;
        assert_eq!(chi, 2, "Euler formula violated");
    }

    #[test]
    fn test_make_box_vertices_at_correct_positions() {
        let mut store = EntityStore::new();
        make_box(&mut store, Point3d::new(-1.0, -1.0, -1.0), Point3d::new(1.0, 1.0, 1.0));
        for (_id, v) in &store.vertices {
            assert!(
                (v.point.x.abs() - 1.0).abs() < 1e-12
                    && (v.point.y.abs() - 1.0).abs() < 1e-12
                    && (v.point.z.abs() - 1.0).abs() < 1e-12,
                "Vertex at unexpected position: {:?}",
                v.point
            );
        }
    }

    #[test]
    fn test_make_box_bounding_box() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(10.0, 20.0, 30.0));
        let bb = store.bounding_box(&b);
        assert!((bb.min.x - 0.0).abs() < 1e-10);
        assert!((bb.min.y - 0.0).abs() < 1e-10);
        assert!((bb.min.z - 0.0).abs() < 1e-10);
        assert!((bb.max.x - 10.0).abs() < 1e-10);
        assert!((bb.max.y - 20.0).abs() < 1e-10);
        assert!((bb.max.z - 30.0).abs() < 1e-10);
    }

    #[test]
    fn test_box_faces_point_outward() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(2.0, 2.0, 2.0));
        let center = Point3d::new(1.0, 1.0, 1.0);
        for f in Explorer::new(&store, b, ShapeKind::Face) {
            let id = f.as_face().unwrap();
            let face = &store.faces[id];
            let Surface::Plane(p) = &face.surface else { panic!("box face is not planar") };
            let n = store.face_normal(id, f.orientation, &Point2d::ORIGIN);
            assert!((p.origin - center).dot(&n) > 0.0);
        }
    }

    #[test]
    fn test_make_cylinder() {
        let mut store = EntityStore::new();
        let c = make_cylinder(&mut store, Point3d::ORIGIN, Vec3::Z, 5.0, 10.0);
        let count = store.count_topology(&c);
        assert_eq!(count.faces, 3);
        assert_eq!(count.edges, 3);
        assert_eq!(count.vertices, 2);
        let bb = store.bounding_box(&c);
        assert!(bb.max.x >= 5.0 - 1e-9 && bb.max.x < 5.5);
        assert!(bb.min.y <= -5.0 + 1e-9 && bb.max.z >= 10.0 - 1e-9);
        assert!(audit_shape(&store, &c).is_valid(), "{:?}", audit_shape(&store, &c).issues);
    }

    #[test]
    fn test_make_sphere() {
        let mut store = EntityStore::new();
        let s = make_sphere(&mut store, Point3d::ORIGIN, 5.0);
        let count = store.count_topology(&s);
        assert_eq!(count.faces, 1);
        // seam plus two degenerated pole edges
        assert_eq!(count.edges, 3);
        assert_eq!(count.vertices, 2);
        let bb = store.bounding_box(&s);
        assert!(bb.max.x >= 5.0 - 1e-9 && bb.min.y <= -5.0 + 1e-9);
        assert!(audit_shape(&store, &s).is_valid(), "{:?}", audit_shape(&store, &s).issues);
    }

    #[test]
    fn test_sphere_seam_pcurves_match_curve() {
        let mut store = EntityStore::new();
        let s = make_sphere(&mut store, Point3d::new(1.0, 0.0, 0.0), 2.0);
        let face_id = Explorer::new(&store, s, ShapeKind::Face).next().and_then(|f| f.as_face()).unwrap();
        let face = &store.faces[face_id];
        for &he in &store.loops[face.outer_loop].half_edges {
            let h = &store.half_edges[he];
            let e = &store.edges[h.edge];
            if e.degenerate {
                continue;
            }
            let t = 1.0;
            let uv = h.pcurve.as_ref().unwrap().evaluate(t);
            assert!(face.surface.evaluate_uv(&uv).distance_to(&e.point_at(t)) < 1e-12);
        }
    }

    #[test]
    fn test_box_topology_audit() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 2.0, 3.0));
        let audit = audit_shape(&store, &b);
        assert!(audit.is_valid(), "{:?}", audit.issues);
    }

    #[test]
    fn test_planar_face_and_wire() {
        let mut store = EntityStore::new();
        let square = [
            Point3d::new(0.0, 0.0, 0.5),
            Point3d::new(1.0, 0.0, 0.5),
            Point3d::new(1.0, 1.0, 0.5),
            Point3d::new(0.0, 1.0, 0.5),
        ];
        let f = make_planar_face(&mut store, &square).unwrap();
        let id = f.as_face().unwrap();
        assert!(store.face_normal(id, f.orientation, &Point2d::ORIGIN).dot(&Vec3::Z) > 0.99);
        assert!(make_planar_face(&mut store, &square[..2]).is_err());

        let w = make_polyline_wire(&mut store, &square).unwrap();
        assert_eq!(store.count_topology(&w).edges, 3);
        assert!(make_polyline_wire(&mut store, &[Point3d::ORIGIN, Point3d::ORIGIN]).is_err());
    }
}
