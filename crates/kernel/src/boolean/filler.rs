//! Phase 2: merge vertices, split edges at their paves and cut section curves
//! into edges.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, instrument};

use crate::geometry::point::Point3d;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, Node, Shape, ShapeKind, VertexId};
use crate::topology::domain::{FaceDomain, PointState};
use crate::topology::explore::Explorer;

use super::context::OperationContext;
use super::diagnostics::{BooleanFailure, Phase, Warning};
use super::ds::SplitData;
use super::interference::{Coincidence, Element, InterferenceTable, Param, SectionCurve};
use super::intersect::OperandElements;
use super::merge::{MergedVertices, VertexMerger};
use super::pave::{blocks_coincide, blocks_of, same_direction, CommonBlocks, Pave, PaveBlock, PaveSet};

struct Filler<'a> {
    ctx: &'a OperationContext,
    merger: VertexMerger,
    record_of: HashMap<VertexId, usize>,
    sets: Vec<PaveSet>,
    set_of: HashMap<EdgeId, usize>,
    face_in: HashMap<FaceId, Vec<usize>>,
    overlaps: Vec<(EdgeId, EdgeId)>,
    on_candidates: Vec<(EdgeId, FaceId)>,
    touches: Vec<usize>,
    sections: Vec<(FaceId, FaceId, SectionCurve)>,
    section_vertices: Vec<VertexId>,
    touched_edges: Vec<EdgeId>,
}

impl<'a> Filler<'a> {
    fn new(store: &EntityStore, operands: &[OperandElements], ctx: &'a OperationContext) -> Self {
        let mut merger = VertexMerger::new();
        let mut record_of = HashMap::new();
        for (i, op) in operands.iter().enumerate() {
            for &v in &op.vertices {
                record_of.entry(v).or_insert_with(|| merger.add_original(store, v, i));
            }
        }
        let mut sets = Vec::new();
        let mut set_of = HashMap::new();
        for op in operands {
            for &e in &op.edges {
                if set_of.contains_key(&e) {
                    continue;
                }
                let edge = &store.edges[e];
                let (Some(&rs), Some(&re)) = (record_of.get(&edge.start_vertex), record_of.get(&edge.end_vertex)) else {
                    continue;
                };
                set_of.insert(e, sets.len());
                sets.push(PaveSet::new(
                    e,
                    Pave { record: rs, param: edge.t_start },
                    Pave { record: re, param: edge.t_end },
                ));
            }
        }
        Self {
            ctx,
            merger,
            record_of,
            sets,
            set_of,
            face_in: HashMap::new(),
            overlaps: Vec::new(),
            on_candidates: Vec::new(),
            touches: Vec::new(),
            sections: Vec::new(),
            section_vertices: Vec::new(),
            touched_edges: Vec::new(),
        }
    }

    fn add_pave(&mut self, e: EdgeId, record: usize, param: Param) {
        if let (Some(&s), Some(t)) = (self.set_of.get(&e), param.curve()) {
            self.sets[s].add(Pave { record, param: t });
        }
    }

    /// Turns interference records into paves, merge requests and face contents.
    fn absorb(&mut self, store: &EntityStore, table: &InterferenceTable, data: &mut SplitData) {
        let coincidence = self.ctx.tolerance.coincidence;
        for r in &table.records {
            match (&r.coincidence, r.a, r.b) {
                (Coincidence::Point, Element::Vertex(a), Element::Vertex(b)) => {
                    if let (Some(&ra), Some(&rb)) = (self.record_of.get(&a), self.record_of.get(&b)) {
                        self.merger.union(ra, rb);
                    }
                }
                (Coincidence::Point, Element::Vertex(v), Element::Edge(e)) => {
                    if let Some(&rv) = self.record_of.get(&v) {
                        self.add_pave(e, rv, r.param_b);
                    }
                }
                (Coincidence::Point, Element::Vertex(v), Element::Face(f)) => {
                    if let Some(&rv) = self.record_of.get(&v) {
                        self.face_in.entry(f).or_default().push(rv);
                    }
                }
                (Coincidence::Point, Element::Edge(a), Element::Edge(b)) => {
                    let tol = r.tolerance.max(store.edges[a].tolerance).max(store.edges[b].tolerance).max(coincidence);
                    let rec = self.merger.add_new(r.point, tol);
                    self.add_pave(a, rec, r.param_a);
                    self.add_pave(b, rec, r.param_b);
                }
                (Coincidence::Overlap { .. }, Element::Edge(a), Element::Edge(b)) => self.overlaps.push((a, b)),
                (Coincidence::Point, Element::Edge(e), Element::Face(f)) => {
                    let tol = r.tolerance.max(store.edges[e].tolerance).max(store.faces[f].tolerance).max(coincidence);
                    let rec = self.merger.add_new(r.point, tol);
                    self.add_pave(e, rec, r.param_a);
                    self.face_in.entry(f).or_default().push(rec);
                }
                (Coincidence::Overlap { .. }, Element::Edge(e), Element::Face(f)) => self.on_candidates.push((e, f)),
                (Coincidence::SameDomain, Element::Face(a), Element::Face(b)) => data.same_domain.push((a, b)),
                (Coincidence::Touch, Element::Face(a), Element::Face(b)) => {
                    let tol = r.tolerance.max(store.faces[a].tolerance).max(store.faces[b].tolerance).max(coincidence);
                    let rec = self.merger.add_new(r.point, tol);
                    self.touches.push(rec);
                }
                (Coincidence::Section(s), Element::Face(a), Element::Face(b)) => self.sections.push((a, b, s.clone())),
                _ => {}
            }
        }
    }

    /// Collapses stretches of edges shorter than their tolerances.
    fn collapse_micro_blocks(&mut self, store: &EntityStore) {
        for _ in 0..2 {
            let mut collapsed = Vec::new();
            for set in &self.sets {
                let pairs = set.micro_pairs(store, &self.merger, self.ctx.fuzzy);
                if !pairs.is_empty() {
                    collapsed.push(Node::Edge(set.edge));
                }
                for (a, b) in pairs {
                    self.merger.union(a, b);
                }
            }
            if collapsed.is_empty() {
                break;
            }
            self.ctx.warn(Warning::DegenerateEdge { elements: collapsed });
        }
    }

    /// Creates the result edges of every block and records edge images.
    fn split_edges(&mut self, store: &mut EntityStore, merged: &MergedVertices, data: &mut SplitData) {
        let mut blocks: Vec<PaveBlock> = Vec::new();
        let mut edge_blocks: Vec<Vec<usize>> = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            let bl = blocks_of(set, store, &self.merger, merged);
            edge_blocks.push((blocks.len()..blocks.len() + bl.len()).collect());
            blocks.extend(bl);
        }

        let mut common = CommonBlocks::default();
        for &(a, b) in &self.overlaps {
            let (Some(&sa), Some(&sb)) = (self.set_of.get(&a), self.set_of.get(&b)) else {
                continue;
            };
            for &ia in &edge_blocks[sa] {
                for &ib in &edge_blocks[sb] {
                    if blocks_coincide(store, &blocks[ia], &blocks[ib], self.ctx.fuzzy) {
                        common.join(&mut blocks, ia, ib);
                    }
                }
            }
        }

        let mut carrier: Vec<Option<usize>> = vec![None; common.groups.len()];
        for (s, set) in self.sets.iter().enumerate() {
            let e = set.edge;
            let edge = store.edges[e].clone();
            let bl = &edge_blocks[s];
            let unchanged =
                bl.len() == 1 && blocks[bl[0]].start == edge.start_vertex && blocks[bl[0]].end == edge.end_vertex;
            let mut image = Vec::with_capacity(bl.len());
            for &ib in bl {
                if let Some(g) = blocks[ib].common {
                    if let Some(c) = carrier[g] {
                        let cb = &blocks[c];
                        let Some(cid) = cb.edge else { continue };
                        let same = same_direction(&edge.curve, blocks[ib].mid_param(), &store.edges[cid].curve, cb.mid_param());
                        blocks[ib].edge = Some(cid);
                        image.push((cid, same));
                        continue;
                    }
                }
                let b = &blocks[ib];
                let id = if unchanged {
                    e
                } else {
                    let id = store.add_edge(edge.curve.clone(), b.range, b.start, b.end, edge.tolerance);
                    data.carrier_origin.insert(id, e);
                    self.touched_edges.push(id);
                    id
                };
                blocks[ib].edge = Some(id);
                if let Some(g) = blocks[ib].common {
                    carrier[g] = Some(ib);
                }
                image.push((id, true));
            }
            if !(unchanged && image.len() == 1 && image[0] == (e, true)) {
                data.edge_images.insert(e, image);
            }
        }

        // a shared carrier must cover every block it stands for
        for (g, members) in common.groups.iter().enumerate() {
            let Some(c) = carrier[g] else { continue };
            let Some(cid) = blocks[c].edge else { continue };
            let mut tol = store.edges[cid].tolerance;
            for &m in members {
                let b = &blocks[m];
                let member = &store.edges[b.original];
                let mid = member.curve.evaluate(b.mid_param());
                let d = store.edges[cid].curve.project(&mid, store.edges[cid].range()).distance;
                tol = tol.max(d + member.tolerance);
            }
            if tol > store.edges[cid].tolerance {
                self.ctx.warn(Warning::ToleranceIncreased {
                    element: Node::Edge(cid),
                    from: store.edges[cid].tolerance,
                    to: tol,
                });
                store.edges[cid].tolerance = tol;
            }
            if !data.common_edges.contains(&cid) {
                data.common_edges.push(cid);
            }
            self.touched_edges.push(cid);
        }
        debug!(blocks = blocks.len(), common = common.groups.len(), "edges split");
    }

    /// Degenerated edges follow their vertex when it merged into another one.
    fn remap_degenerate(&self, store: &mut EntityStore, shapes: &[Shape], merged: &MergedVertices, data: &mut SplitData) {
        for shape in shapes {
            let degenerate: Vec<EdgeId> = Explorer::new(store, *shape, ShapeKind::Edge)
                .filter_map(|s| s.as_edge())
                .filter(|e| store.edges[*e].degenerate)
                .collect();
            for e in degenerate {
                let edge = store.edges[e].clone();
                let Some(&r) = self.record_of.get(&edge.start_vertex) else { continue };
                let v = merged.get(r);
                if v != edge.start_vertex && !data.edge_images.contains_key(&e) {
                    let id = store.add_degenerate_edge(v, edge.range(), edge.tolerance);
                    data.carrier_origin.insert(id, e);
                    data.edge_images.insert(e, vec![(id, true)]);
                }
            }
        }
    }

    fn boundary_vertices(&self, store: &EntityStore, face: FaceId, merged: &MergedVertices, data: &SplitData) -> BTreeSet<VertexId> {
        let mut out = BTreeSet::new();
        for lp in store.faces[face].loops() {
            for he in &store.loops[lp].half_edges {
                for (piece, _) in data.image_of(store.half_edges[*he].edge) {
                    out.insert(store.edges[piece].start_vertex);
                    out.insert(store.edges[piece].end_vertex);
                }
            }
        }
        if let Some(records) = self.face_in.get(&face) {
            out.extend(records.iter().map(|r| merged.get(*r)));
        }
        out
    }

    fn section_vertex(&mut self, store: &mut EntityStore, p: Point3d, tol: f64) -> VertexId {
        let v = store.add_vertex(p, tol.max(self.ctx.tolerance.coincidence));
        self.section_vertices.push(v);
        v
    }

    /// An existing edge joining `a` and `b` through `mid`.
    fn matching_edge(store: &EntityStore, candidates: &[EdgeId], a: VertexId, b: VertexId, mid: &Point3d, tol: f64) -> Option<EdgeId> {
        candidates.iter().copied().find(|&e| {
            let edge = &store.edges[e];
            let ends = (edge.start_vertex == a && edge.end_vertex == b) || (edge.start_vertex == b && edge.end_vertex == a);
            ends && !edge.degenerate && edge.curve.project(mid, edge.range()).distance <= tol + edge.tolerance
        })
    }

    /// Cuts one section curve at the vertices it passes through and records its edges.
    fn pave_section(
        &mut self,
        store: &mut EntityStore,
        fa: FaceId,
        fb: FaceId,
        sc: &SectionCurve,
        merged: &MergedVertices,
        data: &mut SplitData,
    ) {
        let fuzzy = self.ctx.fuzzy;
        let mut candidates = self.boundary_vertices(store, fa, merged, data);
        candidates.extend(self.boundary_vertices(store, fb, merged, data));
        candidates.extend(self.section_vertices.iter().copied());

        let range = sc.range;
        let ends = [sc.curve.evaluate(range.0), sc.curve.evaluate(range.1)];
        let mut paves: Vec<(VertexId, f64)> = Vec::new();
        for v in candidates {
            let vx = &store.vertices[v];
            let reach = vx.tolerance + sc.tolerance + fuzzy;
            let proj = sc.curve.project(&vx.point, range);
            if proj.distance <= reach {
                paves.push((v, proj.param));
            }
            // a curve returning to its start meets the vertex at both ends
            for (end, t) in ends.iter().zip([range.0, range.1]) {
                if vx.point.distance_to(end) <= reach && (proj.param - t).abs() > 1e-12 {
                    paves.push((v, t));
                }
            }
        }
        paves.sort_by(|a, b| a.1.total_cmp(&b.1));

        let period = sc.curve.period();
        match (sc.closed, period) {
            (true, Some(p)) if !paves.is_empty() => {
                let t0 = paves[0].1;
                for pv in paves.iter_mut() {
                    pv.1 = t0 + (pv.1 - t0).rem_euclid(p);
                }
                paves.sort_by(|a, b| a.1.total_cmp(&b.1));
                paves.dedup_by(|b, a| a.0 == b.0);
                paves.push((paves[0].0, t0 + p));
            }
            _ => {
                let near = |store: &EntityStore, v: VertexId, t: f64| {
                    let vx = &store.vertices[v];
                    vx.point.distance_to(&sc.curve.evaluate(t)) <= vx.tolerance + sc.tolerance + fuzzy
                };
                let first = paves.first().map(|&(v, _)| v).filter(|&v| near(store, v, range.0));
                let start = match first {
                    Some(v) => v,
                    None => {
                        let v = self.section_vertex(store, sc.curve.evaluate(range.0), sc.tolerance);
                        paves.insert(0, (v, range.0));
                        v
                    }
                };
                let end_ok = paves.len() > 1 && paves.last().is_some_and(|&(v, _)| near(store, v, range.1));
                if !end_ok {
                    let v = if sc.closed {
                        start
                    } else {
                        self.section_vertex(store, sc.curve.evaluate(range.1), sc.tolerance)
                    };
                    paves.push((v, range.1));
                }
            }
        }
        paves.dedup_by(|b, a| a.0 == b.0 && (b.1 - a.1).abs() <= 1e-12);

        let mut existing: Vec<EdgeId> = Vec::new();
        for f in [fa, fb] {
            for lp in store.faces[f].loops() {
                for he in &store.loops[lp].half_edges {
                    existing.extend(data.image_of(store.half_edges[*he].edge).into_iter().map(|(e, _)| e));
                }
            }
        }

        for w in paves.windows(2) {
            let ((v0, t0), (v1, t1)) = (w[0], w[1]);
            if t1 <= t0 || sc.curve.length(t0, t1) <= sc.tolerance + fuzzy {
                if v0 != v1 {
                    self.ctx.warn(Warning::DegenerateEdge {
                        elements: vec![Node::Vertex(v0), Node::Vertex(v1)],
                    });
                }
                continue;
            }
            let mid = sc.curve.evaluate(0.5 * (t0 + t1));
            let id = Self::matching_edge(store, &existing, v0, v1, &mid, sc.tolerance + fuzzy)
                .or_else(|| Self::matching_edge(store, &data.section_edges, v0, v1, &mid, sc.tolerance + fuzzy))
                .unwrap_or_else(|| {
                    let id = store.add_edge(sc.curve.clone(), (t0, t1), v0, v1, sc.tolerance);
                    self.touched_edges.push(id);
                    id
                });
            if !data.section_edges.contains(&id) && !existing.contains(&id) {
                data.section_edges.push(id);
            }
            for f in [fa, fb] {
                let info = data.face_info.entry(f).or_default();
                if !info.section_edges.contains(&id) {
                    info.section_edges.push(id);
                }
            }
        }
    }

    /// Split edges of one operand that run through the interior of a face of another.
    fn record_on_edges(&self, store: &EntityStore, domains: &HashMap<FaceId, FaceDomain>, data: &mut SplitData) {
        for &(e, f) in &self.on_candidates {
            let Some(domain) = domains.get(&f) else { continue };
            let tol = store.faces[f].tolerance + self.ctx.fuzzy;
            for (piece, _) in data.image_of(e) {
                let edge = &store.edges[piece];
                let mid = edge.point_at(edge.mid_param());
                let inside = matches!(
                    domain.classify_point(&mid, tol + edge.tolerance),
                    Some((PointState::Inside, _))
                );
                if !inside {
                    continue;
                }
                let info = data.face_info.entry(f).or_default();
                if !info.on_edges.contains(&piece) {
                    info.on_edges.push(piece);
                }
                if !data.on_edges.contains(&piece) {
                    data.on_edges.push(piece);
                }
            }
        }
    }

    /// Vertices grow to contain the ends of every edge created for them.
    fn cover_edge_ends(&self, store: &mut EntityStore) {
        for &e in &self.touched_edges {
            let edge = store.edges[e].clone();
            for (v, t) in [(edge.start_vertex, edge.t_start), (edge.end_vertex, edge.t_end)] {
                let d = edge.curve.evaluate(t).distance_to(&store.vertices[v].point);
                let vx = &mut store.vertices[v];
                if d > vx.tolerance {
                    self.ctx.warn(Warning::ToleranceIncreased {
                        element: Node::Vertex(v),
                        from: vx.tolerance,
                        to: d,
                    });
                    vx.tolerance = d;
                }
            }
        }
    }
}

/// Runs phase 2 and reports the split state of all operands.
#[instrument(skip_all)]
pub fn fill(
    store: &mut EntityStore,
    shapes: &[Shape],
    operands: &[OperandElements],
    table: &InterferenceTable,
    domains: &HashMap<FaceId, FaceDomain>,
    ctx: &OperationContext,
) -> Result<SplitData, BooleanFailure> {
    let mut data = SplitData::default();
    let mut filler = Filler::new(store, operands, ctx);
    filler.absorb(store, table, &mut data);
    filler.merger.merge_coincident(ctx);
    filler.collapse_micro_blocks(store);
    let merged = filler.merger.resolve(store, ctx)?;
    ctx.checkpoint(Phase::Pave)?;

    filler.split_edges(store, &merged, &mut data);
    filler.remap_degenerate(store, shapes, &merged, &mut data);

    let sections = std::mem::take(&mut filler.sections);
    for (fa, fb, sc) in &sections {
        filler.pave_section(store, *fa, *fb, sc, &merged, &mut data);
    }
    filler.record_on_edges(store, domains, &mut data);

    for (face, records) in &filler.face_in {
        let info = data.face_info.entry(*face).or_default();
        for r in records {
            let v = merged.get(*r);
            if !info.in_vertices.contains(&v) {
                info.in_vertices.push(v);
            }
        }
    }

    let mut touches: Vec<VertexId> = filler.touches.iter().map(|r| merged.get(*r)).collect();
    touches.sort();
    touches.dedup();
    data.touch_vertices = touches;

    filler.cover_edge_ends(store);
    ctx.checkpoint(Phase::Pave)?;
    info!(
        split_edges = data.edge_images.len(),
        sections = data.section_edges.len(),
        common = data.common_edges.len(),
        on_face = data.on_edges.len(),
        "pave phase done"
    );
    Ok(data)
}
