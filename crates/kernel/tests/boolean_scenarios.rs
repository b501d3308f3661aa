//! End-to-end Boolean scenarios on primitive solids and faces.

use std::f64::consts::PI;

use approx::assert_abs_diff_eq;

use brep_bool::boolean::{perform, BooleanOp, BooleanOptions, Status, Warning};
use brep_bool::geometry::point::Point3d;
use brep_bool::geometry::transform::Transform;
use brep_bool::geometry::vector::Vec3;
use brep_bool::topology::brep::{EntityStore, Node, Shape, ShapeKind};
use brep_bool::topology::explore::{sub_shapes, Explorer};
use brep_bool::topology::primitives::{make_box, make_cylinder, make_planar_face, make_sphere};
use brep_bool::topology::transform::transformed_copy;
use brep_bool::validation::audit::audit_shape;
use brep_bool::validation::volume::{shape_area, shape_volume, verify_volume_identity};

fn bx(store: &mut EntityStore, min: (f64, f64, f64), max: (f64, f64, f64)) -> Shape {
    make_box(store, Point3d::new(min.0, min.1, min.2), Point3d::new(max.0, max.1, max.2))
}

fn run(store: &mut EntityStore, a: Shape, b: Shape, op: BooleanOp) -> Shape {
    run_with(store, a, b, op, &BooleanOptions::default())
}

fn run_with(store: &mut EntityStore, a: Shape, b: Shape, op: BooleanOp, options: &BooleanOptions) -> Shape {
    let outcome = perform(store, &[a, b], op, options);
    assert_ne!(outcome.status(), Status::Failed, "{op:?} failed: {:?}", outcome.diagnostics.failure);
    outcome.result.unwrap()
}

fn max_vertex_tolerance(store: &EntityStore, s: Shape) -> f64 {
    Explorer::new(store, s, ShapeKind::Vertex)
        .filter_map(|v| v.as_vertex())
        .map(|v| store.vertices[v].tolerance)
        .fold(0.0, f64::max)
}

fn count(store: &EntityStore, s: Shape, kind: ShapeKind) -> usize {
    Explorer::new(store, s, kind).count()
}

fn edge_length(store: &EntityStore, s: Shape) -> f64 {
    Explorer::new(store, s, ShapeKind::Edge)
        .filter_map(|e| e.as_edge())
        .map(|e| store.edges[e].length())
        .sum()
}

#[test]
fn cubes_overlapping_by_half() {
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (0.5, 0.0, 0.0), (1.5, 1.0, 1.0));

    let common = run(&mut store, a, b, BooleanOp::Common);
    let fuse = run(&mut store, a, b, BooleanOp::Fuse);
    let cut = run(&mut store, a, b, BooleanOp::Cut);
    assert_abs_diff_eq!(shape_volume(&store, &common), 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(shape_volume(&store, &fuse), 1.5, epsilon = 1e-9);
    assert_abs_diff_eq!(shape_volume(&store, &cut), 0.5, epsilon = 1e-9);
    for s in [common, fuse, cut] {
        assert_eq!(s.kind(), ShapeKind::Solid);
        assert!(audit_shape(&store, &s).is_valid());
    }

    assert!(verify_volume_identity(&store, &a, &b, &fuse, Some(&common)).is_valid(1e-9));

    // operands survive every call unchanged
    assert_abs_diff_eq!(shape_volume(&store, &a), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(shape_volume(&store, &b), 1.0, epsilon = 1e-12);
}

#[test]
fn corner_overlap_partitions_object() {
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (0.5, 0.5, 0.5), (1.5, 1.5, 1.5));
    let common = run(&mut store, a, b, BooleanOp::Common);
    let cut = run(&mut store, a, b, BooleanOp::Cut);
    let vc = shape_volume(&store, &common);
    let vk = shape_volume(&store, &cut);
    assert_abs_diff_eq!(vc, 0.125, epsilon = 1e-9);
    assert_abs_diff_eq!(vc + vk, 1.0, epsilon = 1e-9);
    assert_eq!(count(&store, common, ShapeKind::Face), 6);
    assert_eq!(count(&store, cut, ShapeKind::Face), 9);
}

#[test]
fn fuse_is_commutative() {
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (0.5, 0.25, 0.0), (1.5, 0.75, 2.0));
    let ab = run(&mut store, a, b, BooleanOp::Fuse);
    let ba = run(&mut store, b, a, BooleanOp::Fuse);
    assert_abs_diff_eq!(shape_volume(&store, &ab), shape_volume(&store, &ba), epsilon = 1e-9);
    assert_eq!(count(&store, ab, ShapeKind::Face), count(&store, ba, ShapeKind::Face));
}

#[test]
fn fuse_with_itself_is_identity() {
    let mut store = EntityStore::new();
    let r = bx(&mut store, (0.0, 0.0, 0.0), (2.0, 1.0, 1.0));
    let fused = run(&mut store, r, r, BooleanOp::Fuse);
    assert_eq!(fused.kind(), ShapeKind::Solid);
    assert_abs_diff_eq!(shape_volume(&store, &fused), 2.0, epsilon = 1e-9);
    assert_eq!(count(&store, fused, ShapeKind::Face), 6);
}

#[test]
fn disjoint_operands() {
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (3.0, 0.0, 0.0), (4.0, 1.0, 1.0));

    let common = run(&mut store, a, b, BooleanOp::Common);
    assert_eq!(count(&store, common, ShapeKind::Face), 0);

    let fuse = run(&mut store, a, b, BooleanOp::Fuse);
    let Node::Compound(id) = fuse.node else {
        panic!("fuse of disjoint solids should be a compound");
    };
    assert_eq!(store.compounds[id].children, vec![a, b]);

    let cut = run(&mut store, a, b, BooleanOp::Cut);
    assert_eq!(cut, a);
}

#[test]
fn solids_sharing_one_face() {
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (1.0, 0.0, 0.0), (2.0, 1.0, 1.0));

    let fuse = run(&mut store, a, b, BooleanOp::Fuse);
    assert_eq!(fuse.kind(), ShapeKind::Solid);
    assert_eq!(count(&store, fuse, ShapeKind::Face), 10);
    assert_abs_diff_eq!(shape_volume(&store, &fuse), 2.0, epsilon = 1e-9);

    let common = run(&mut store, a, b, BooleanOp::Common);
    assert_eq!(common.kind(), ShapeKind::Compound);
    assert_eq!(count(&store, common, ShapeKind::Face), 1);
    assert_abs_diff_eq!(shape_area(&store, &common), 1.0, epsilon = 1e-9);

    let section = run(&mut store, a, b, BooleanOp::Section);
    assert!(sub_shapes(&store, &section, ShapeKind::Face).is_empty());
    assert_abs_diff_eq!(edge_length(&store, section), edge_length(&store, common), epsilon = 1e-9);
}

#[test]
fn section_of_corner_overlap() {
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (0.5, 0.5, 0.5), (1.5, 1.5, 1.5));
    let section = run(&mut store, a, b, BooleanOp::Section);
    assert_eq!(section.kind(), ShapeKind::Compound);
    assert_eq!(count(&store, section, ShapeKind::Edge), 6);
    assert_abs_diff_eq!(edge_length(&store, section), 3.0, epsilon = 1e-9);
}

#[test]
fn sphere_tangent_to_cube_faces() {
    let mut store = EntityStore::new();
    let cube = bx(&mut store, (-1.0, -1.0, -1.0), (1.0, 1.0, 1.0));
    let sphere = make_sphere(&mut store, Point3d::ORIGIN, 1.0);
    let common = run(&mut store, cube, sphere, BooleanOp::Common);
    assert_abs_diff_eq!(shape_volume(&store, &common), 4.0 / 3.0 * PI, epsilon = 1e-3);
}

#[test]
fn sphere_clipped_by_cube_faces() {
    let mut store = EntityStore::new();
    let cube = bx(&mut store, (-1.0, -1.0, -1.0), (1.0, 1.0, 1.0));
    let sphere = make_sphere(&mut store, Point3d::ORIGIN, 1.2);
    let common = run(&mut store, cube, sphere, BooleanOp::Common);

    // sphere volume less six caps of height 0.2
    let (r, h) = (1.2f64, 0.2f64);
    let cap = PI * h * h * (3.0 * r - h) / 3.0;
    let expected = 4.0 / 3.0 * PI * r.powi(3) - 6.0 * cap;
    assert_eq!(common.kind(), ShapeKind::Solid);
    assert_abs_diff_eq!(shape_volume(&store, &common), expected, epsilon = 1e-3);

    let cut = run(&mut store, cube, sphere, BooleanOp::Cut);
    assert_abs_diff_eq!(shape_volume(&store, &cut), 8.0 - expected, epsilon = 1e-3);
}

#[test]
fn drilled_box() {
    let mut store = EntityStore::new();
    let block = bx(&mut store, (0.0, 0.0, 0.0), (2.0, 2.0, 1.0));
    let drill = make_cylinder(&mut store, Point3d::new(1.0, 1.0, -1.0), Vec3::Z, 0.5, 3.0);
    let drilled = run(&mut store, block, drill, BooleanOp::Cut);
    assert_eq!(drilled.kind(), ShapeKind::Solid);
    assert_eq!(count(&store, drilled, ShapeKind::Face), 7);
    assert_abs_diff_eq!(shape_volume(&store, &drilled), 4.0 - PI / 4.0, epsilon = 1e-3);

    let core = run(&mut store, block, drill, BooleanOp::Common);
    assert_abs_diff_eq!(shape_volume(&store, &core), PI / 4.0, epsilon = 1e-3);
}

#[test]
fn sphere_pierced_by_cylinder() {
    let mut store = EntityStore::new();
    let sphere = make_sphere(&mut store, Point3d::ORIGIN, 1.0);
    let rod = make_cylinder(&mut store, Point3d::new(0.0, 0.0, -2.0), Vec3::Z, 0.5, 4.0);

    // sphere of radius 1 with a bore of radius 0.5
    let bored = 4.0 / 3.0 * PI * 0.75f64.powf(1.5);
    let cut = run(&mut store, sphere, rod, BooleanOp::Cut);
    assert_eq!(cut.kind(), ShapeKind::Solid);
    assert!(audit_shape(&store, &cut).is_valid());
    assert_abs_diff_eq!(shape_volume(&store, &cut), bored, epsilon = 1e-3);
    assert!(max_vertex_tolerance(&store, cut) < 1e-4);

    let common = run(&mut store, sphere, rod, BooleanOp::Common);
    assert_eq!(common.kind(), ShapeKind::Solid);
    assert_abs_diff_eq!(shape_volume(&store, &common), 4.0 / 3.0 * PI - bored, epsilon = 1e-3);

    // two circles of radius 0.5 at z = ±√0.75
    let section = run(&mut store, sphere, rod, BooleanOp::Section);
    assert_abs_diff_eq!(edge_length(&store, section), 2.0 * PI, epsilon = 1e-3);
}

#[test]
fn sphere_cut_by_tilted_and_offset_cylinders() {
    for (base, axis) in [
        (Point3d::new(-2.0, 0.0, 0.0), Vec3::X),
        (Point3d::new(0.1, 0.0, -2.0), Vec3::Z),
    ] {
        let mut store = EntityStore::new();
        let sphere = make_sphere(&mut store, Point3d::ORIGIN, 1.0);
        let rod = make_cylinder(&mut store, base, axis, 0.5, 4.0);
        let cut = run(&mut store, sphere, rod, BooleanOp::Cut);
        let common = run(&mut store, sphere, rod, BooleanOp::Common);
        assert_eq!(cut.kind(), ShapeKind::Solid);
        assert_eq!(common.kind(), ShapeKind::Solid);
        let total = shape_volume(&store, &cut) + shape_volume(&store, &common);
        assert_abs_diff_eq!(total, 4.0 / 3.0 * PI, epsilon = 1e-3);
    }
}

#[test]
fn crossing_cylinders_of_unequal_radii() {
    let mut store = EntityStore::new();
    let post = make_cylinder(&mut store, Point3d::new(0.0, 0.0, -2.0), Vec3::Z, 1.0, 4.0);
    let bar = make_cylinder(&mut store, Point3d::new(-2.0, 0.0, 0.0), Vec3::X, 0.5, 4.0);

    let cut = run(&mut store, post, bar, BooleanOp::Cut);
    let common = run(&mut store, post, bar, BooleanOp::Common);
    assert_eq!(cut.kind(), ShapeKind::Solid);
    assert_eq!(common.kind(), ShapeKind::Solid);
    assert!(audit_shape(&store, &cut).is_valid());

    // ∫ 4·√(1 − y²)·√(0.25 − y²) dy over |y| ≤ 0.5
    let shared = 1.520_04;
    assert_abs_diff_eq!(shape_volume(&store, &common), shared, epsilon = 1e-2);
    assert_abs_diff_eq!(shape_volume(&store, &cut) + shape_volume(&store, &common), 4.0 * PI, epsilon = 1e-3);
}

#[test]
fn fuse_keeps_internal_edges_on_request() {
    let mut store = EntityStore::new();
    let block = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    // a square bar turned on its edge, inside the block, whose top edge lies on the top face
    let half = 0.2;
    let bar = bx(&mut store, (0.3, -half, -half), (0.7, half, half));
    let turn = Transform::rotation_axis_angle(Vec3::X, PI / 4.0)
        .then(&Transform::translation(0.0, 0.5, 1.0 - half * 2f64.sqrt()));
    let bar = transformed_copy(&mut store, &bar, &turn);

    let plain = run(&mut store, block, bar, BooleanOp::Fuse);
    assert_eq!(plain.kind(), ShapeKind::Solid);
    assert_eq!(count(&store, plain, ShapeKind::Face), 6);
    assert_abs_diff_eq!(shape_volume(&store, &plain), 1.0, epsilon = 1e-9);

    let options = BooleanOptions {
        keep_internal: true,
        ..Default::default()
    };
    let kept = run_with(&mut store, block, bar, BooleanOp::Fuse, &options);
    assert_eq!(kept.kind(), ShapeKind::Compound);
    let Node::Compound(id) = kept.node else {
        panic!("kept internal edges should make a compound");
    };
    let children = store.compounds[id].children.clone();
    let free: Vec<Shape> = children.iter().copied().filter(|c| c.kind() == ShapeKind::Edge).collect();
    assert!(!free.is_empty());
    for e in free {
        let edge = &store.edges[e.as_edge().unwrap()];
        let mid = edge.point_at(edge.mid_param());
        assert_abs_diff_eq!(edge.length(), 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(mid.z, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mid.y, 0.5, epsilon = 1e-6);
    }
    let solids: Vec<Shape> = children.iter().copied().filter(|c| c.kind() == ShapeKind::Solid).collect();
    assert_eq!(solids.len(), 1);
    assert_abs_diff_eq!(shape_volume(&store, &solids[0]), 1.0, epsilon = 1e-9);
}

#[test]
fn face_against_solid() {
    let mut store = EntityStore::new();
    let block = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let sheet = make_planar_face(
        &mut store,
        &[
            Point3d::new(-1.0, -1.0, 0.5),
            Point3d::new(2.0, -1.0, 0.5),
            Point3d::new(2.0, 2.0, 0.5),
            Point3d::new(-1.0, 2.0, 0.5),
        ],
    )
    .unwrap();
    let inside = run(&mut store, sheet, block, BooleanOp::Common);
    assert_abs_diff_eq!(shape_area(&store, &inside), 1.0, epsilon = 1e-9);
    let outside = run(&mut store, sheet, block, BooleanOp::Cut);
    assert_abs_diff_eq!(shape_area(&store, &outside), 8.0, epsilon = 1e-9);
}

#[test]
fn options_from_json_drive_the_call() {
    let options = BooleanOptions::from_json(r#"{ "parallel": false, "fuzzy_tolerance": 1e-6 }"#).unwrap();
    let mut store = EntityStore::new();
    let a = bx(&mut store, (0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
    let b = bx(&mut store, (0.5, 0.5, 0.5), (1.5, 1.5, 1.5));
    let outcome = perform(&mut store, &[a, b], BooleanOp::Fuse, &options);
    assert_eq!(outcome.status(), Status::Done);
    assert!(!outcome.diagnostics.has_warning(|w| matches!(w, Warning::UnresolvedInterference { .. })));
    let fused = outcome.into_result().unwrap();
    assert_abs_diff_eq!(shape_volume(&store, &fused), 1.875, epsilon = 1e-9);
}
