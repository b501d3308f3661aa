//! Operand checks run before any intersection work.

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::geometry::transform::Transform;
use crate::topology::brep::*;
use crate::topology::explore::Explorer;
use crate::topology::transform::transformed_copy;
use crate::validation::volume::face_area;

use super::diagnostics::BooleanFailure;
use super::BooleanOp;

/// Highest dimension of the elements in `shape`: 3 solids, 2 faces, 1 edges, 0 vertices.
pub fn shape_dimension(store: &EntityStore, shape: &Shape) -> Option<u8> {
    let has = |kind| Explorer::new(store, *shape, kind).next().is_some();
    if has(ShapeKind::Solid) {
        Some(3)
    } else if has(ShapeKind::Face) {
        Some(2)
    } else if has(ShapeKind::Edge) {
        Some(1)
    } else if has(ShapeKind::Vertex) {
        Some(0)
    } else {
        None
    }
}

pub fn is_solid(store: &EntityStore, shape: &Shape) -> bool {
    Explorer::new(store, *shape, ShapeKind::Solid).next().is_some()
}

fn invalid(reason: impl Into<String>) -> BooleanFailure {
    BooleanFailure::InvalidArguments { reason: reason.into() }
}

/// Rejects edges and faces without measure.
fn check_measure(store: &EntityStore, shape: &Shape) -> Result<(), BooleanFailure> {
    for e in Explorer::new(store, *shape, ShapeKind::Edge) {
        let Some(id) = e.as_edge() else { continue };
        let edge = &store.edges[id];
        if !edge.degenerate && edge.length() <= edge.tolerance {
            return Err(BooleanFailure::GeometryDegenerate {
                reason: format!("edge {id:?} is shorter than its tolerance"),
            });
        }
    }
    for f in Explorer::new(store, *shape, ShapeKind::Face) {
        let Some(id) = f.as_face() else { continue };
        let tol = store.faces[id].tolerance;
        if face_area(store, id) <= tol * tol {
            return Err(BooleanFailure::GeometryDegenerate {
                reason: format!("face {id:?} has no area"),
            });
        }
    }
    Ok(())
}

fn nodes_of(store: &EntityStore, shape: &Shape) -> HashSet<Node> {
    let mut nodes = HashSet::new();
    for kind in [ShapeKind::Vertex, ShapeKind::Edge, ShapeKind::Face] {
        nodes.extend(Explorer::new(store, *shape, kind).map(|s| s.node));
    }
    nodes
}

/// Validates the operands of `op` and returns them ready for the pipeline.
/// A tool that shares nodes with an earlier operand is replaced by a copy so
/// every element belongs to exactly one operand.
#[instrument(skip(store, operands))]
pub fn prepare_operands(store: &mut EntityStore, operands: &[Shape], op: BooleanOp) -> Result<Vec<Shape>, BooleanFailure> {
    if operands.len() < 2 {
        return Err(invalid(format!("{op:?} needs at least two operands, got {}", operands.len())));
    }
    let mut dims = Vec::with_capacity(operands.len());
    for (i, s) in operands.iter().enumerate() {
        store.validate(s).map_err(|e| invalid(format!("operand {i}: {e}")))?;
        let dim = shape_dimension(store, s).ok_or_else(|| invalid(format!("operand {i} is empty")))?;
        check_measure(store, s)?;
        dims.push(dim);
    }
    match op {
        BooleanOp::Fuse if dims.iter().any(|d| *d != dims[0]) => {
            return Err(invalid("fuse operands must share one dimension"));
        }
        BooleanOp::Cut if dims[1..].iter().all(|d| *d < dims[0]) => {
            return Err(invalid("cut tools must not be of lower dimension than the object"));
        }
        _ => {}
    }

    let mut seen: HashSet<Node> = HashSet::new();
    let mut out = Vec::with_capacity(operands.len());
    for s in operands {
        let nodes = nodes_of(store, s);
        let shape = if nodes.iter().any(|n| seen.contains(n)) {
            debug!(?s, "operand shares nodes, copying");
            let copy = transformed_copy(store, s, &Transform::identity());
            seen.extend(nodes_of(store, &copy));
            copy
        } else {
            seen.extend(nodes);
            *s
        };
        out.push(shape);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::topology::primitives::{make_box, make_planar_face, make_polyline_wire};

    #[test]
    fn test_dimensions() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let f = make_planar_face(&mut store, &[Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0), Point3d::new(0.0, 1.0, 0.0)])
            .unwrap();
        let w = make_polyline_wire(&mut store, &[Point3d::ORIGIN, Point3d::new(1.0, 0.0, 0.0)]).unwrap();
        assert_eq!(shape_dimension(&store, &b), Some(3));
        assert_eq!(shape_dimension(&store, &f), Some(2));
        assert_eq!(shape_dimension(&store, &w), Some(1));
        assert!(is_solid(&store, &b) && !is_solid(&store, &f));
    }

    #[test]
    fn test_rejects_single_operand_and_mixed_fuse() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let w = make_polyline_wire(&mut store, &[Point3d::ORIGIN, Point3d::new(3.0, 0.0, 0.0)]).unwrap();
        assert!(matches!(
            prepare_operands(&mut store, &[b], BooleanOp::Common),
            Err(BooleanFailure::InvalidArguments { .. })
        ));
        assert!(matches!(
            prepare_operands(&mut store, &[b, w], BooleanOp::Fuse),
            Err(BooleanFailure::InvalidArguments { .. })
        ));
        assert!(prepare_operands(&mut store, &[w, b], BooleanOp::Cut).is_ok());
    }

    #[test]
    fn test_shared_operand_is_copied() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let ops = prepare_operands(&mut store, &[b, b], BooleanOp::Fuse).unwrap();
        assert_eq!(ops[0], b);
        assert_ne!(ops[1], b);
        assert!(nodes_of(&store, &ops[0]).is_disjoint(&nodes_of(&store, &ops[1])));
    }

    #[test]
    fn test_edge_within_its_tolerance_is_degenerate() {
        let mut store = EntityStore::new();
        let w = make_polyline_wire(&mut store, &[Point3d::ORIGIN, Point3d::new(1e-6, 0.0, 0.0)]).unwrap();
        for e in Explorer::new(&store, w, ShapeKind::Edge).collect::<Vec<_>>() {
            store.edges[e.as_edge().unwrap()].tolerance = 1e-5;
        }
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        assert!(matches!(
            prepare_operands(&mut store, &[w, b], BooleanOp::Section),
            Err(BooleanFailure::GeometryDegenerate { .. })
        ));
    }
}
