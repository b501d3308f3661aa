use std::collections::HashMap;

use tracing::{info, instrument};

use crate::topology::brep::*;
use crate::topology::explore::Explorer;

/// A single defect found by [`audit_shape`].
#[derive(Debug, Clone, PartialEq)]
pub enum AuditIssue {
    /// Consecutive half-edges of a loop do not share a vertex.
    OpenLoop { loop_id: LoopId, position: usize },
    /// A half-edge used in a face has no parameter-space curve.
    MissingPcurve { face: FaceId, half_edge: HalfEdgeId },
    /// The pcurve, mapped through the face surface, strays from its edge.
    PcurveOffEdge { face: FaceId, half_edge: HalfEdgeId, distance: f64 },
    /// The edge of a closed shell is not used once in each direction.
    UnbalancedEdge { shell: ShellId, edge: EdgeId, forward: usize, reversed: usize },
    /// A vertex tolerance does not reach the curve end it bounds.
    VertexNotCovered { vertex: VertexId, edge: EdgeId, distance: f64 },
}

/// Outcome of auditing a shape.
#[derive(Debug, Clone, Default)]
pub struct TopologyAudit {
    pub faces_checked: usize,
    pub edges_checked: usize,
    pub shells_checked: usize,
    pub issues: Vec<AuditIssue>,
}

impl TopologyAudit {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Forward and reversed use counts of every non-degenerate edge in a shell,
/// taking face orientation into account.
pub fn edge_uses(store: &EntityStore, faces: &[Shape]) -> HashMap<EdgeId, (usize, usize)> {
    let mut uses: HashMap<EdgeId, (usize, usize)> = HashMap::new();
    for f in faces {
        let Some(fid) = f.as_face() else { continue };
        let Some(face) = store.faces.get(fid) else { continue };
        for lp in face.loops() {
            for &he in &store.loops[lp].half_edges {
                let h = &store.half_edges[he];
                if store.edges[h.edge].degenerate {
                    continue;
                }
                let entry = uses.entry(h.edge).or_default();
                if h.forward == f.orientation.is_forward() {
                    entry.0 += 1;
                } else {
                    entry.1 += 1;
                }
            }
        }
    }
    uses
}

/// A set of faces is closed when each edge is traversed equally often both ways.
pub fn faces_closed(store: &EntityStore, faces: &[Shape]) -> bool {
    let uses = edge_uses(store, faces);
    !uses.is_empty() && uses.values().all(|(f, r)| f == r)
}

fn audit_loop(store: &EntityStore, face_id: FaceId, lp: LoopId, audit: &mut TopologyAudit) {
    let face = &store.faces[face_id];
    let hes = &store.loops[lp].half_edges;
    for (i, &he) in hes.iter().enumerate() {
        let next = hes[(i + 1) % hes.len()];
        if store.half_edge_vertices(he).1 != store.half_edge_vertices(next).0 {
            audit.issues.push(AuditIssue::OpenLoop { loop_id: lp, position: i });
        }
        let h = &store.half_edges[he];
        let e = &store.edges[h.edge];
        let Some(pc) = &h.pcurve else {
            audit.issues.push(AuditIssue::MissingPcurve { face: face_id, half_edge: he });
            continue;
        };
        let tol = 2.0 * (e.tolerance.max(face.tolerance)) + 1e-7;
        let mut worst: f64 = 0.0;
        for k in 0..=4 {
            let t = e.t_start + (e.t_end - e.t_start) * k as f64 / 4.0;
            let on_edge = if e.degenerate { store.vertices[e.start_vertex].point } else { e.point_at(t) };
            let on_surface = face.surface.evaluate_uv(&pc.evaluate(t));
            worst = worst.max(on_surface.distance_to(&on_edge));
        }
        if worst > tol {
            audit.issues.push(AuditIssue::PcurveOffEdge {
                face: face_id,
                half_edge: he,
                distance: worst,
            });
        }
    }
}

/// Structural audit of a shape: loop closure and pcurve agreement for every
/// face, balanced edge use for shells of solids, and vertex tolerance coverage.
#[instrument(skip(store))]
pub fn audit_shape(store: &EntityStore, shape: &Shape) -> TopologyAudit {
    let mut audit = TopologyAudit::default();

    for f in Explorer::new(store, *shape, ShapeKind::Face) {
        let Some(fid) = f.as_face() else { continue };
        audit.faces_checked += 1;
        for lp in store.faces[fid].loops() {
            audit_loop(store, fid, lp, &mut audit);
        }
    }

    for s in Explorer::new(store, *shape, ShapeKind::Solid) {
        let Some(sid) = s.as_solid() else { continue };
        for &shell in &store.solids[sid].shells {
            audit.shells_checked += 1;
            let uses = edge_uses(store, &store.shells[shell].faces);
            let mut unbalanced: Vec<(EdgeId, (usize, usize))> =
                uses.into_iter().filter(|(_, (f, r))| f != r).collect();
            unbalanced.sort_by_key(|(e, _)| *e);
            for (edge, (forward, reversed)) in unbalanced {
                audit.issues.push(AuditIssue::UnbalancedEdge { shell, edge, forward, reversed });
            }
        }
    }

    for e in Explorer::new(store, *shape, ShapeKind::Edge) {
        let Some(eid) = e.as_edge() else { continue };
        audit.edges_checked += 1;
        let edge = &store.edges[eid];
        if edge.degenerate {
            continue;
        }
        for (vid, t) in [(edge.start_vertex, edge.t_start), (edge.end_vertex, edge.t_end)] {
            let v = &store.vertices[vid];
            let distance = v.point.distance_to(&edge.point_at(t));
            if distance > v.tolerance.max(edge.tolerance) + 1e-9 {
                audit.issues.push(AuditIssue::VertexNotCovered { vertex: vid, edge: eid, distance });
            }
        }
    }

    info!(
        faces = audit.faces_checked,
        edges = audit.edges_checked,
        shells = audit.shells_checked,
        issues = audit.issues.len(),
        "topology audit complete"
    );
    audit
}
