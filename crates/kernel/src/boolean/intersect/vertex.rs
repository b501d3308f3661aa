//! Vertex/vertex, vertex/edge and vertex/face tests.

use crate::topology::brep::{EdgeId, EntityStore, FaceId, VertexId};
use crate::topology::domain::{FaceDomain, PointState};

use crate::boolean::interference::{Element, Interference, Param};

pub fn vertex_vertex(store: &EntityStore, a: VertexId, b: VertexId, fuzzy: f64) -> Option<Interference> {
    let (va, vb) = (&store.vertices[a], &store.vertices[b]);
    let d = va.point.distance_to(&vb.point);
    if d > va.tolerance + vb.tolerance + fuzzy {
        return None;
    }
    Some(Interference::point(
        Element::Vertex(a),
        Param::None,
        Element::Vertex(b),
        Param::None,
        va.point.midpoint(&vb.point),
        d,
    ))
}

/// True when `v` coincides with one of the end vertices of `e`.
pub(crate) fn at_edge_end(store: &EntityStore, v: VertexId, e: EdgeId, fuzzy: f64) -> bool {
    let vx = &store.vertices[v];
    let edge = &store.edges[e];
    [edge.start_vertex, edge.end_vertex].iter().any(|&end| {
        let w = &store.vertices[end];
        end == v || vx.point.distance_to(&w.point) <= vx.tolerance + w.tolerance + fuzzy
    })
}

/// The vertex lies on the interior of the edge. Contact at an edge end is
/// left to the vertex/vertex test.
pub fn vertex_edge(store: &EntityStore, v: VertexId, e: EdgeId, fuzzy: f64) -> Option<Interference> {
    let edge = &store.edges[e];
    if edge.degenerate || at_edge_end(store, v, e, fuzzy) {
        return None;
    }
    let vx = &store.vertices[v];
    let proj = edge.curve.project(&vx.point, edge.range());
    if proj.distance > vx.tolerance + edge.tolerance + fuzzy {
        return None;
    }
    Some(Interference::point(
        Element::Vertex(v),
        Param::None,
        Element::Edge(e),
        Param::Curve(proj.param),
        proj.point,
        proj.distance,
    ))
}

/// The vertex lies strictly inside the face.
pub fn vertex_face(store: &EntityStore, v: VertexId, f: FaceId, domain: &FaceDomain, fuzzy: f64) -> Option<Interference> {
    let vx = &store.vertices[v];
    let tol = vx.tolerance + store.faces[f].tolerance + fuzzy;
    let (state, uv) = domain.classify_point(&vx.point, tol)?;
    if state != PointState::Inside {
        return None;
    }
    let on_surface = domain.surface.evaluate_uv(&uv);
    Some(Interference::point(
        Element::Vertex(v),
        Param::None,
        Element::Face(f),
        Param::Surface(uv),
        on_surface,
        on_surface.distance_to(&vx.point),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::point::Point3d;
    use crate::topology::brep::{Shape, ShapeKind};
    use crate::topology::explore::Explorer;
    use crate::topology::primitives::make_box;

    fn first_face(store: &EntityStore, s: Shape) -> FaceId {
        Explorer::new(store, s, ShapeKind::Face).next().and_then(|f| f.as_face()).unwrap()
    }

    #[test]
    fn test_vertex_vertex_uses_summed_tolerance() {
        let mut store = EntityStore::new();
        let a = store.add_vertex(Point3d::ORIGIN, 1e-4);
        let b = store.add_vertex(Point3d::new(1.5e-4, 0.0, 0.0), 1e-4);
        let c = store.add_vertex(Point3d::new(3e-4, 0.0, 0.0), 1e-7);
        assert!(vertex_vertex(&store, a, b, 0.0).is_some());
        assert!(vertex_vertex(&store, a, c, 0.0).is_none());
        assert!(vertex_vertex(&store, a, c, 1e-3).is_some());
    }

    #[test]
    fn test_vertex_on_edge_interior_only() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(2.0, 2.0, 2.0));
        let e = Explorer::new(&store, b, ShapeKind::Edge)
            .filter_map(|e| e.as_edge())
            .find(|e| {
                let edge = &store.edges[*e];
                edge.point_at(edge.mid_param()).distance_to(&Point3d::new(1.0, 0.0, 0.0)) < 1e-12
            })
            .unwrap();
        let mid = store.add_vertex(Point3d::new(1.0, 0.0, 0.0), 1e-7);
        let hit = vertex_edge(&store, mid, e, 0.0).unwrap();
        assert!((hit.param_b.curve().unwrap() - 1.0).abs() < 1e-12);
        let corner = store.add_vertex(Point3d::ORIGIN, 1e-7);
        assert!(vertex_edge(&store, corner, e, 0.0).is_none());
    }

    #[test]
    fn test_vertex_in_face() {
        let mut store = EntityStore::new();
        let b = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let f = first_face(&store, b);
        let domain = FaceDomain::new(&store, f);
        let centre = store.faces[f].surface.evaluate_uv(&domain.interior_point().unwrap());
        let v = store.add_vertex(centre, 1e-7);
        assert!(vertex_face(&store, v, f, &domain, 0.0).is_some());
        let corner = store.add_vertex(Point3d::ORIGIN, 1e-7);
        assert!(vertex_face(&store, corner, f, &domain, 0.0).is_none());
    }
}
