//! Property-based tests for Boolean and kernel invariants using the `proptest` crate.

use proptest::prelude::*;

use brep_bool::boolean::{perform, BooleanOp, BooleanOptions};
use brep_bool::geometry::point::Point3d;
use brep_bool::geometry::transform::{BoundingBox, Transform};
use brep_bool::topology::brep::{EntityStore, Shape, ShapeKind};
use brep_bool::topology::explore::Explorer;
use brep_bool::topology::primitives::make_box;
use brep_bool::validation::volume::shape_volume;

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_point() -> impl Strategy<Value = (f64, f64, f64)> {
    (-1000.0f64..1000.0, -1000.0f64..1000.0, -1000.0f64..1000.0)
}

fn arb_translation() -> impl Strategy<Value = (f64, f64, f64)> {
    (-1000.0f64..1000.0, -1000.0f64..1000.0, -1000.0f64..1000.0)
}

/// Positive extent, away from zero-size boxes.
fn arb_positive_dim() -> impl Strategy<Value = f64> {
    0.1f64..1000.0
}

fn arb_angle() -> impl Strategy<Value = f64> {
    -std::f64::consts::PI..std::f64::consts::PI
}

/// Offset of a unit cube against another in general position: every face
/// crosses the other cube without coinciding with one of its faces.
fn arb_overlap_offset() -> impl Strategy<Value = (f64, f64, f64)> {
    (0.1f64..0.9, 0.1f64..0.9, 0.1f64..0.9)
}

const TOL: f64 = 1e-6;
const VOLUME_TOL: f64 = 1e-5;

fn unit_cube(store: &mut EntityStore, (x, y, z): (f64, f64, f64)) -> Shape {
    make_box(store, Point3d::new(x, y, z), Point3d::new(x + 1.0, y + 1.0, z + 1.0))
}

fn volume_of(store: &mut EntityStore, a: Shape, b: Shape, op: BooleanOp) -> Result<f64, TestCaseError> {
    let outcome = perform(store, &[a, b], op, &BooleanOptions::default());
    let failure = format!("{:?}", outcome.diagnostics.failure);
    let shape = outcome
        .into_result()
        .map_err(|_| TestCaseError::fail(format!("{op:?} failed: {failure}")))?;
    Ok(shape_volume(store, &shape))
}

proptest! {
    #[test]
    fn transform_inverse_roundtrip(
        (px, py, pz) in arb_point(),
        (tx, ty, tz) in arb_translation(),
        angle in arb_angle(),
    ) {
        let p = Point3d::new(px, py, pz);
        let t = Transform::rotation_z(angle).then(&Transform::translation(tx, ty, tz));
        let back = t.inverse().transform_point(&t.transform_point(&p));
        prop_assert!(back.distance_to(&p) < TOL * 1000.0, "roundtrip moved {:?} to {:?}", p, back);
    }
}

proptest! {
    #[test]
    fn box_topology_counts(
        (ox, oy, oz) in arb_point(),
        dx in arb_positive_dim(),
        dy in arb_positive_dim(),
        dz in arb_positive_dim(),
    ) {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::new(ox, oy, oz), Point3d::new(ox + dx, oy + dy, oz + dz));
        let count = store.count_topology(&b);

        prop_assert_eq!(count.vertices, 8);
        prop_assert_eq!(count.edges, 12);
        prop_assert_eq!(count.faces, 6);
        let euler = count.vertices as i64 - count.edges as i64 + count.faces as i64;
        prop_assert_eq!(euler, 2, "Euler V-E+F={} != 2", euler);
    }
}

proptest! {
    #[test]
    fn bounding_box_of_box_matches_corners(
        (ox, oy, oz) in arb_point(),
        dx in arb_positive_dim(),
        dy in arb_positive_dim(),
        dz in arb_positive_dim(),
    ) {
        let mut store = EntityStore::new();
        let min = Point3d::new(ox, oy, oz);
        let max = Point3d::new(ox + dx, oy + dy, oz + dz);
        let b = make_box(&mut store, min, max);
        let bb: BoundingBox = store.bounding_box(&b);
        prop_assert!(bb.contains_point(&min) && bb.contains_point(&max));
        prop_assert!((bb.diagonal() - min.distance_to(&max)).abs() < 1e-3 * (1.0 + bb.diagonal()));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn common_and_cut_partition_the_object(offset in arb_overlap_offset()) {
        let mut store = EntityStore::new();
        let a = unit_cube(&mut store, (0.0, 0.0, 0.0));
        let b = unit_cube(&mut store, offset);
        let expected = (1.0 - offset.0) * (1.0 - offset.1) * (1.0 - offset.2);

        let common = volume_of(&mut store, a, b, BooleanOp::Common)?;
        let cut = volume_of(&mut store, a, b, BooleanOp::Cut)?;
        prop_assert!((common - expected).abs() < VOLUME_TOL, "common {} != {}", common, expected);
        prop_assert!((common + cut - 1.0).abs() < VOLUME_TOL, "common {} + cut {} != 1", common, cut);
    }

    #[test]
    fn fuse_is_commutative_and_inclusive(offset in arb_overlap_offset()) {
        let mut store = EntityStore::new();
        let a = unit_cube(&mut store, (0.0, 0.0, 0.0));
        let b = unit_cube(&mut store, offset);
        let common = (1.0 - offset.0) * (1.0 - offset.1) * (1.0 - offset.2);

        let ab = volume_of(&mut store, a, b, BooleanOp::Fuse)?;
        let ba = volume_of(&mut store, b, a, BooleanOp::Fuse)?;
        prop_assert!((ab - ba).abs() < VOLUME_TOL);
        prop_assert!((ab - (2.0 - common)).abs() < VOLUME_TOL, "fuse {} != {}", ab, 2.0 - common);
    }

    #[test]
    fn disjoint_common_is_empty((dx, dy, dz) in (2.0f64..50.0, -50.0f64..50.0, -50.0f64..50.0)) {
        let mut store = EntityStore::new();
        let a = unit_cube(&mut store, (0.0, 0.0, 0.0));
        let b = unit_cube(&mut store, (dx, dy, dz));
        let outcome = perform(&mut store, &[a, b], BooleanOp::Common, &BooleanOptions::default());
        let result = outcome.into_result().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(Explorer::new(&store, result, ShapeKind::Face).count(), 0);
    }
}
