//! Phase 5: assemble the selected pieces into shells, solids and compounds.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, info, instrument};

use crate::topology::brep::{EdgeId, EntityStore, FaceId, Shape, ShellId};
use crate::topology::domain::FaceDomain;
use crate::validation::audit::{audit_shape, faces_closed, AuditIssue};
use crate::validation::volume::faces_volume;

use super::classify::{point_in_faces, Selection};
use super::context::OperationContext;
use super::diagnostics::{BooleanFailure, Phase};
use super::ds::SplitData;
use super::BooleanOp;

fn inconsistent(reason: impl Into<String>) -> BooleanFailure {
    BooleanFailure::TopologyInconsistent { reason: reason.into() }
}

/// Uses of every non-degenerate edge: face index and whether the oriented face runs along the edge.
fn edge_incidence(store: &EntityStore, faces: &[Shape]) -> HashMap<EdgeId, Vec<(usize, bool)>> {
    let mut uses: HashMap<EdgeId, Vec<(usize, bool)>> = HashMap::new();
    for (i, f) in faces.iter().enumerate() {
        let Some(fid) = f.as_face() else { continue };
        for lp in store.faces[fid].loops() {
            for &he in &store.loops[lp].half_edges {
                let h = &store.half_edges[he];
                if store.edges[h.edge].degenerate {
                    continue;
                }
                uses.entry(h.edge).or_default().push((i, h.forward == f.orientation().is_forward()));
            }
        }
    }
    uses
}

/// Splits faces into edge-connected groups and orients each group consistently.
/// Only edges used by exactly two faces connect; the majority orientation wins.
fn oriented_components(store: &EntityStore, faces: &[Shape]) -> Vec<Vec<Shape>> {
    let n = faces.len();
    let mut adjacent: Vec<Vec<(usize, bool)>> = vec![Vec::new(); n];
    for uses in edge_incidence(store, faces).values() {
        if uses.len() != 2 || uses[0].0 == uses[1].0 {
            continue;
        }
        let ((i, di), (j, dj)) = (uses[0], uses[1]);
        // two uses running the same way need one of the faces flipped
        let flip = di == dj;
        adjacent[i].push((j, flip));
        adjacent[j].push((i, flip));
    }

    let mut seen = vec![false; n];
    let mut flipped = vec![false; n];
    let mut out = Vec::new();
    for start in 0..n {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut members = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(i) = queue.pop_front() {
            for &(j, flip) in &adjacent[i] {
                if !seen[j] {
                    seen[j] = true;
                    flipped[j] = flipped[i] ^ flip;
                    members.push(j);
                    queue.push_back(j);
                }
            }
        }
        let count = members.iter().filter(|m| flipped[**m]).count();
        let invert = 2 * count > members.len();
        if count > 0 {
            debug!(faces = members.len(), flipped = count, "shell orientation repaired");
        }
        out.push(
            members
                .iter()
                .map(|&m| if flipped[m] ^ invert { faces[m].reversed() } else { faces[m] })
                .collect(),
        );
    }
    out
}

struct ShellPart {
    id: ShellId,
    faces: Vec<FaceId>,
    volume: f64,
}

/// Closed shells with their cavities attached to the smallest enclosing outer shell.
fn assemble_solids(store: &mut EntityStore, components: Vec<Vec<Shape>>, ctx: &OperationContext) -> Result<Vec<Shape>, BooleanFailure> {
    let mut outers: Vec<ShellPart> = Vec::new();
    let mut cavities: Vec<ShellPart> = Vec::new();
    for faces in components {
        if !faces_closed(store, &faces) {
            return Err(inconsistent(format!("a shell of {} faces does not close", faces.len())));
        }
        let volume = faces_volume(store, &faces);
        let part = ShellPart {
            faces: faces.iter().filter_map(|f| f.as_face()).collect(),
            id: store.add_shell(faces),
            volume,
        };
        if volume >= 0.0 { outers.push(part) } else { cavities.push(part) }
    }
    outers.sort_by(|a, b| a.volume.total_cmp(&b.volume));

    let mut owned: Vec<Vec<ShellId>> = vec![Vec::new(); outers.len()];
    for cavity in &cavities {
        let probe = cavity.faces.iter().find_map(|f| {
            let domain = FaceDomain::new(store, *f);
            domain.interior_point().map(|uv| store.faces[*f].surface.evaluate_uv(&uv))
        });
        let Some(p) = probe else {
            return Err(inconsistent("cavity without an interior point"));
        };
        let owner = outers
            .iter()
            .position(|o| o.volume >= -cavity.volume && point_in_faces(store, &o.faces, &p, ctx) == Some(true));
        let Some(i) = owner else {
            return Err(inconsistent("cavity outside every outer shell"));
        };
        owned[i].push(cavity.id);
    }
    Ok(outers
        .iter()
        .zip(owned)
        .map(|(o, inner)| {
            let mut shells = vec![o.id];
            shells.extend(inner);
            Shape::solid(store.add_solid(shells))
        })
        .collect())
}

fn compound_or_single(store: &mut EntityStore, mut children: Vec<Shape>) -> Shape {
    if children.len() == 1 {
        if let Some(only) = children.pop() {
            return only;
        }
    }
    Shape::compound(store.add_compound(children))
}

/// Intersection edges no selected face uses, kept on request.
fn dangling_edges(store: &EntityStore, faces: &[Shape], data: &SplitData) -> Vec<Shape> {
    let used: HashSet<EdgeId> = edge_incidence(store, faces).into_keys().collect();
    data.intersection_edges()
        .into_iter()
        .filter(|e| !used.contains(e))
        .map(Shape::edge)
        .collect()
}

/// Builds the result of `op` from the selected pieces.
#[instrument(skip_all, fields(op = ?op, faces = sel.faces.len(), edges = sel.edges.len()))]
pub fn build_result(
    store: &mut EntityStore,
    op: BooleanOp,
    sel: &Selection,
    data: &SplitData,
    solid_operands: bool,
    ctx: &OperationContext,
) -> Result<Shape, BooleanFailure> {
    if op == BooleanOp::Section || sel.touching {
        let mut children: Vec<Shape> = sel.faces.clone();
        children.extend(sel.edges.iter().copied());
        children.extend(sel.vertices.iter().copied());
        info!(children = children.len(), "boundary result built");
        return Ok(Shape::compound(store.add_compound(children)));
    }

    let components = oriented_components(store, &sel.faces);
    let mut children = if solid_operands {
        assemble_solids(store, components, ctx)?
    } else {
        components
            .into_iter()
            .map(|faces| Shape::shell(store.add_shell(faces)))
            .collect()
    };
    ctx.checkpoint(Phase::Build)?;
    let solids = children.len();
    children.extend(sel.edges.iter().copied());
    if ctx.options.keep_internal {
        children.extend(dangling_edges(store, &sel.faces, data));
    }
    let result = if children.is_empty() {
        Shape::compound(store.add_compound(Vec::new()))
    } else {
        compound_or_single(store, children)
    };

    let audit = audit_shape(store, &result);
    if let Some(issue) = audit
        .issues
        .iter()
        .find(|i| matches!(i, AuditIssue::OpenLoop { .. } | AuditIssue::UnbalancedEdge { .. }))
    {
        return Err(inconsistent(format!("result audit failed: {issue:?}")));
    }
    if !audit.is_valid() {
        debug!(issues = audit.issues.len(), "result carries minor audit issues");
    }
    info!(solids, faces = audit.faces_checked, "result built");
    Ok(result)
}
