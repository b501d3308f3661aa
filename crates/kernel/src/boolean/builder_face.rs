//! Phase 3: rebuild every face crossed by new edges from its split boundary
//! and the section and on-face edges inside it.

use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;

use tracing::{debug, info, instrument};

use crate::geometry::curves2d::{pcurve_for, Curve2d};
use crate::geometry::point::Point2d;
use crate::geometry::vector::Vec2;
use crate::topology::brep::{EdgeId, EntityStore, FaceId, VertexId};
use crate::topology::domain::{polygon_area, polygons_contain, FaceDomain, PointState};

use super::context::OperationContext;
use super::diagnostics::{BooleanFailure, Phase};
use super::ds::SplitData;
use super::intersect::OperandElements;

#[derive(Debug, Clone)]
enum ArcEdge {
    Existing(EdgeId),
    /// Piece of a degenerated boundary edge, cut where interior edges reach its pole.
    Pole {
        vertex: VertexId,
        range: (f64, f64),
        tolerance: f64,
    },
}

/// One directed use of an edge in the face's parameter space.
#[derive(Debug, Clone)]
struct Arc {
    edge: ArcEdge,
    forward: bool,
    pcurve: Curve2d,
    /// Curve parameters at the start and end of the traversal.
    params: (f64, f64),
    from: usize,
    to: usize,
    boundary: bool,
    twin: Option<usize>,
}

impl Arc {
    fn tangent(&self, at_end: bool) -> Vec2 {
        let (t0, t1) = self.params;
        let sign = if t1 >= t0 { 1.0 } else { -1.0 };
        let t = if at_end { t1 } else { t0 };
        let d = self.pcurve.derivative(t) * sign;
        if d.length() > 1e-12 {
            return d;
        }
        let inner = self.pcurve.evaluate(if at_end { t1 + (t0 - t1) * 1e-3 } else { t0 + (t1 - t0) * 1e-3 });
        let here = self.pcurve.evaluate(t);
        if at_end { here - inner } else { inner - here }
    }

    fn polyline(&self) -> Vec<Point2d> {
        let segments = match &self.pcurve {
            Curve2d::Line(_) => 1,
            Curve2d::Conic(_) => 32,
            Curve2d::Projected(p) => p.table.len().clamp(8, 64),
        };
        self.pcurve.polyline(self.params.0, self.params.1, segments)
    }
}

#[derive(Debug, Clone, Copy)]
struct Junction {
    vertex: VertexId,
    uv: Point2d,
}

/// New faces of one split face, before they are written to the store.
#[derive(Debug)]
struct FacePlan {
    face: FaceId,
    arcs: Vec<Arc>,
    /// Outer loop and holes of every new face, as arc indices.
    faces: Vec<(Vec<usize>, Vec<Vec<usize>>)>,
}

struct FaceGraph<'a> {
    store: &'a EntityStore,
    face: FaceId,
    domain: &'a FaceDomain,
    tolerance: f64,
    nodes: Vec<Junction>,
    arcs: Vec<Arc>,
}

impl<'a> FaceGraph<'a> {
    fn new(store: &'a EntityStore, face: FaceId, domain: &'a FaceDomain, fuzzy: f64) -> Self {
        Self {
            store,
            face,
            domain,
            tolerance: store.faces[face].tolerance + fuzzy,
            nodes: Vec::new(),
            arcs: Vec::new(),
        }
    }

    fn node_tolerance(&self, vertex: VertexId, uv: Point2d) -> f64 {
        let vt = self.store.vertices[vertex].tolerance;
        self.domain.uv_tolerance(uv, 2.0 * vt + self.tolerance)
    }

    fn find_node(&self, vertex: VertexId, uv: Point2d) -> Option<usize> {
        let tol = self.node_tolerance(vertex, uv);
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.vertex == vertex && n.uv.distance_to(&uv) <= tol)
            .min_by(|a, b| a.1.uv.distance_to(&uv).total_cmp(&b.1.uv.distance_to(&uv)))
            .map(|(i, _)| i)
    }

    fn node(&mut self, vertex: VertexId, uv: Point2d) -> usize {
        if let Some(i) = self.find_node(vertex, uv) {
            return i;
        }
        self.nodes.push(Junction { vertex, uv });
        self.nodes.len() - 1
    }

    fn push_arc(&mut self, edge: ArcEdge, forward: bool, pcurve: Curve2d, params: (f64, f64), ends: (VertexId, VertexId), boundary: bool) -> usize {
        let from = self.node(ends.0, pcurve.evaluate(params.0));
        let to = self.node(ends.1, pcurve.evaluate(params.1));
        self.arcs.push(Arc {
            edge,
            forward,
            pcurve,
            params,
            from,
            to,
            boundary,
            twin: None,
        });
        self.arcs.len() - 1
    }

    fn domain_box(&self) -> Option<(Point2d, Point2d)> {
        Some((self.domain.min, self.domain.max))
    }

    /// Pieces of every boundary half-edge, in loop order.
    fn add_boundary(&mut self, data: &SplitData) {
        let store = self.store;
        let face = &store.faces[self.face];
        for lp in face.loops() {
            for &he in &store.loops[lp].half_edges {
                let h = &store.half_edges[he];
                let original = &store.edges[h.edge];
                let parent = match &h.pcurve {
                    Some(pc) => pc.clone(),
                    None => pcurve_for(&original.curve, original.t_start, original.t_end, &face.surface, None, self.domain_box()),
                };
                let mut pieces = data.image_of(h.edge);
                if !h.forward {
                    pieces.reverse();
                }
                for (piece, same) in pieces {
                    let edge = &store.edges[piece];
                    let forward = h.forward == same;
                    let pcurve = if piece == h.edge || data.carrier_origin.get(&piece) == Some(&h.edge) {
                        parent.clone()
                    } else {
                        // a carrier borrowed from another operand: re-project it onto this sheet
                        let s = original.curve.project(&edge.point_at(edge.t_start), original.range()).param;
                        pcurve_for(&edge.curve, edge.t_start, edge.t_end, &face.surface, Some(parent.evaluate(s)), None)
                    };
                    let (params, ends) = if forward {
                        ((edge.t_start, edge.t_end), (edge.start_vertex, edge.end_vertex))
                    } else {
                        ((edge.t_end, edge.t_start), (edge.end_vertex, edge.start_vertex))
                    };
                    self.push_arc(ArcEdge::Existing(piece), forward, pcurve, params, ends, true);
                }
            }
        }
    }

    /// Moves a pcurve by whole periods when its start only meets an existing node on another sheet.
    fn align_sheet(&self, pcurve: Curve2d, t: f64, vertex: VertexId) -> Curve2d {
        let uv = pcurve.evaluate(t);
        if self.find_node(vertex, uv).is_some() {
            return pcurve;
        }
        let pu = self.domain.surface.u_period();
        let pv = self.domain.surface.v_period();
        if pu.is_none() && pv.is_none() {
            return pcurve;
        }
        for ku in -1..=1 {
            for kv in -1..=1 {
                let shift = Vec2::new(ku as f64 * pu.unwrap_or(0.0), kv as f64 * pv.unwrap_or(0.0));
                if (ku != 0 || kv != 0) && self.find_node(vertex, uv + shift).is_some() {
                    return pcurve.shifted(shift);
                }
            }
        }
        pcurve
    }

    /// Both directions of every section and on-face edge of the face.
    fn add_interior(&mut self, edges: impl Iterator<Item = EdgeId>) {
        let store = self.store;
        let surface = &store.faces[self.face].surface;
        let mut seen: HashSet<EdgeId> = self
            .arcs
            .iter()
            .filter_map(|a| match a.edge {
                ArcEdge::Existing(e) => Some(e),
                ArcEdge::Pole { .. } => None,
            })
            .collect();
        for e in edges {
            if !seen.insert(e) {
                continue;
            }
            let edge = &store.edges[e];
            if edge.degenerate {
                continue;
            }
            let pcurve = pcurve_for(&edge.curve, edge.t_start, edge.t_end, surface, None, self.domain_box());
            let pcurve = self.align_sheet(pcurve, edge.t_start, edge.start_vertex);
            let ends = (edge.start_vertex, edge.end_vertex);
            let a = self.push_arc(ArcEdge::Existing(e), true, pcurve.clone(), (edge.t_start, edge.t_end), ends, false);
            let b = self.push_arc(ArcEdge::Existing(e), false, pcurve, (edge.t_end, edge.t_start), (ends.1, ends.0), false);
            self.arcs[a].twin = Some(b);
            self.arcs[b].twin = Some(a);
        }
    }

    /// Cuts degenerated boundary edges where interior arcs end on their pole.
    fn split_poles(&mut self) {
        let store = self.store;
        for i in 0..self.arcs.len() {
            let arc = self.arcs[i].clone();
            let ArcEdge::Existing(e) = arc.edge else { continue };
            let edge = &store.edges[e];
            if !arc.boundary || !edge.degenerate {
                continue;
            }
            let Curve2d::Line(line) = &arc.pcurve else { continue };
            let line = *line;
            if line.direction.x.abs() < 1e-12 {
                continue;
            }
            let vertex = edge.start_vertex;
            let pole_v = line.origin.y + line.direction.y * arc.params.0;
            let (lo, hi) = (arc.params.0.min(arc.params.1), arc.params.0.max(arc.params.1));
            let eps = 1e-9 * (hi - lo).max(1.0);
            let mut cuts: Vec<f64> = self
                .arcs
                .iter()
                .filter(|a| !a.boundary)
                .flat_map(|a| [a.from, a.to])
                .map(|n| self.nodes[n])
                .filter(|n| n.vertex == vertex && (n.uv.y - pole_v).abs() <= self.node_tolerance(vertex, n.uv))
                .map(|n| (n.uv.x - line.origin.x) / line.direction.x)
                .filter(|t| *t > lo + eps && *t < hi - eps)
                .collect();
            if cuts.is_empty() {
                continue;
            }
            cuts.sort_by(|a, b| a.total_cmp(b));
            cuts.dedup_by(|b, a| (*b - *a).abs() <= eps);
            if arc.params.0 > arc.params.1 {
                cuts.reverse();
            }
            let mut stops = vec![arc.params.0];
            stops.extend(cuts);
            stops.push(arc.params.1);
            let mut pieces = Vec::with_capacity(stops.len() - 1);
            for w in stops.windows(2) {
                let (a, b) = (w[0], w[1]);
                let from = self.node(vertex, arc.pcurve.evaluate(a));
                let to = self.node(vertex, arc.pcurve.evaluate(b));
                pieces.push(Arc {
                    edge: ArcEdge::Pole {
                        vertex,
                        range: (a.min(b), a.max(b)),
                        tolerance: edge.tolerance,
                    },
                    params: (a, b),
                    from,
                    to,
                    ..arc.clone()
                });
            }
            debug!(pieces = pieces.len(), "degenerated edge cut at its pole");
            let mut pieces = pieces.into_iter();
            if let Some(first) = pieces.next() {
                self.arcs[i] = first;
            }
            self.arcs.extend(pieces);
        }
    }

    /// Drops interior chains that end inside the face without closing anything.
    fn prune(&self) -> Vec<bool> {
        let mut alive = vec![true; self.arcs.len()];
        loop {
            let mut degree = vec![0usize; self.nodes.len()];
            for (i, a) in self.arcs.iter().enumerate() {
                if alive[i] && a.twin.map_or(true, |t| i < t) {
                    degree[a.from] += 1;
                    degree[a.to] += 1;
                }
            }
            let mut changed = false;
            for (i, a) in self.arcs.iter().enumerate() {
                if !alive[i] || a.boundary {
                    continue;
                }
                if degree[a.from] == 1 || degree[a.to] == 1 {
                    alive[i] = false;
                    if let Some(t) = a.twin {
                        alive[t] = false;
                    }
                    changed = true;
                }
            }
            if !changed {
                return alive;
            }
        }
    }

    /// Leftmost continuation of `incoming`: the smallest clockwise turn from its reversed tangent.
    fn next_arc(&self, incoming: usize, outgoing: &[usize]) -> Option<usize> {
        let arc = &self.arcs[incoming];
        let back = (-arc.tangent(true)).angle();
        let turn = |c: usize| {
            if arc.twin == Some(c) {
                return TAU;
            }
            let d = (back - self.arcs[c].tangent(false).angle()).rem_euclid(TAU);
            if d < 1e-9 { TAU } else { d }
        };
        outgoing.iter().copied().min_by(|a, b| turn(*a).total_cmp(&turn(*b)))
    }

    fn trace(&self, alive: &[bool]) -> Result<Vec<Vec<usize>>, BooleanFailure> {
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, a) in self.arcs.iter().enumerate() {
            if alive[i] {
                outgoing[a.from].push(i);
            }
        }
        let broken = || BooleanFailure::TopologyInconsistent {
            reason: "split face boundary does not close".into(),
        };
        let mut used = vec![false; self.arcs.len()];
        let mut loops = Vec::new();
        for start in 0..self.arcs.len() {
            if !alive[start] || used[start] {
                continue;
            }
            let mut lp = Vec::new();
            let mut cur = start;
            loop {
                used[cur] = true;
                lp.push(cur);
                let next = self.next_arc(cur, &outgoing[self.arcs[cur].to]).ok_or_else(broken)?;
                if next == start {
                    break;
                }
                if used[next] {
                    return Err(broken());
                }
                cur = next;
            }
            loops.push(lp);
        }
        Ok(loops)
    }

    fn loop_polygon(&self, lp: &[usize]) -> Vec<Point2d> {
        let mut poly: Vec<Point2d> = Vec::new();
        for &i in lp {
            let skip = usize::from(!poly.is_empty());
            poly.extend(self.arcs[i].polyline().into_iter().skip(skip));
        }
        if poly.len() > 1 && poly[0].distance_to(&poly[poly.len() - 1]) < 1e-12 {
            poly.pop();
        }
        poly
    }

    /// A point just to the left of the loop's longest arc, on the material side.
    fn probe_point(&self, lp: &[usize]) -> Option<Point2d> {
        let length = |i: usize| -> f64 { self.arcs[i].polyline().windows(2).map(|w| w[0].distance_to(&w[1])).sum() };
        let best = lp.iter().copied().max_by(|a, b| length(*a).total_cmp(&length(*b)))?;
        let arc = &self.arcs[best];
        let t = 0.5 * (arc.params.0 + arc.params.1);
        let sign = if arc.params.1 >= arc.params.0 { 1.0 } else { -1.0 };
        let dir = (arc.pcurve.derivative(t) * sign).normalized()?;
        let left = Vec2::new(-dir.y, dir.x);
        Some(arc.pcurve.evaluate(t) + left * (1e-3 * length(best)))
    }

    fn plan(mut self, data: &SplitData) -> Result<FacePlan, BooleanFailure> {
        self.add_boundary(data);
        let inner: Vec<EdgeId> = data
            .face_info
            .get(&self.face)
            .map(|info| info.interior_edges().collect())
            .unwrap_or_default();
        self.add_interior(inner.into_iter());
        self.split_poles();
        let alive = self.prune();
        let loops = self.trace(&alive)?;

        let mut outers: Vec<(Vec<usize>, Vec<Point2d>, f64)> = Vec::new();
        let mut holes: Vec<Vec<usize>> = Vec::new();
        for lp in loops {
            let poly = self.loop_polygon(&lp);
            let area = polygon_area(&poly);
            if area > 1e-14 {
                outers.push((lp, poly, area));
            } else if area < -1e-14 {
                holes.push(lp);
            } else {
                debug!(arcs = lp.len(), "dropping a loop without area");
            }
        }
        let mut faces: Vec<(Vec<usize>, Vec<Vec<usize>>)> = outers.iter().map(|(lp, _, _)| (lp.clone(), Vec::new())).collect();
        for hole in holes {
            let owner = self.probe_point(&hole).and_then(|p| {
                outers
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, poly, _))| polygons_contain(std::slice::from_ref(poly), p, 0.0) == PointState::Inside)
                    .min_by(|a, b| a.1 .2.total_cmp(&b.1 .2))
                    .map(|(i, _)| i)
            });
            let Some(i) = owner else {
                return Err(BooleanFailure::TopologyInconsistent {
                    reason: "hole outside every split face".into(),
                });
            };
            faces[i].1.push(hole);
        }
        Ok(FacePlan {
            face: self.face,
            arcs: self.arcs,
            faces,
        })
    }
}

fn materialise(store: &mut EntityStore, plan: FacePlan) -> Vec<FaceId> {
    let (surface, tolerance) = {
        let f = &store.faces[plan.face];
        (f.surface.clone(), f.tolerance)
    };
    let arcs = plan.arcs;
    let write_loop = |store: &mut EntityStore, lp: &[usize]| {
        let half_edges = lp
            .iter()
            .map(|&i| {
                let arc = &arcs[i];
                let edge = match arc.edge {
                    ArcEdge::Existing(e) => e,
                    ArcEdge::Pole { vertex, range, tolerance } => store.add_degenerate_edge(vertex, range, tolerance),
                };
                store.add_half_edge(edge, arc.forward, Some(arc.pcurve.clone()))
            })
            .collect();
        store.add_loop(half_edges)
    };
    let mut out = Vec::with_capacity(plan.faces.len());
    for (outer, holes) in plan.faces {
        let outer = write_loop(store, &outer);
        let inner = holes.iter().map(|h| write_loop(store, h)).collect();
        out.push(store.add_face(surface.clone(), outer, inner, tolerance));
    }
    out
}

/// Splits every operand face that gained edges and records its images.
#[instrument(skip_all)]
pub fn split_faces(
    store: &mut EntityStore,
    operands: &[OperandElements],
    domains: &HashMap<FaceId, FaceDomain>,
    data: &mut SplitData,
    ctx: &OperationContext,
) -> Result<(), BooleanFailure> {
    let mut seen = HashSet::new();
    let changed: Vec<FaceId> = operands
        .iter()
        .flat_map(|o| o.faces.iter().copied())
        .filter(|f| seen.insert(*f) && data.face_changed(store, *f))
        .collect();

    let plans = {
        let store: &EntityStore = store;
        let data: &SplitData = data;
        ctx.map(&changed, |&face| -> Result<Option<FacePlan>, BooleanFailure> {
            if ctx.is_cancelled() {
                return Ok(None);
            }
            let Some(domain) = domains.get(&face) else {
                return Ok(None);
            };
            FaceGraph::new(store, face, domain, ctx.fuzzy).plan(data).map(Some)
        })
    };
    ctx.checkpoint(Phase::FaceSplit)?;

    let mut created = 0;
    for plan in plans {
        let Some(plan) = plan? else { continue };
        let face = plan.face;
        let images = materialise(store, plan);
        created += images.len();
        data.face_images.insert(face, images);
    }
    info!(split = data.face_images.len(), created, "face splitting done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::filler::fill;
    use crate::boolean::intersect::{face_domains, intersect_operands};
    use crate::boolean::options::BooleanOptions;
    use crate::geometry::point::Point3d;
    use crate::geometry::vector::Vec3;
    use crate::topology::brep::Shape;
    use crate::topology::primitives::{make_box, make_cylinder};

    fn split(store: &mut EntityStore, shapes: &[Shape]) -> (SplitData, Vec<OperandElements>) {
        let ctx = OperationContext::new(&BooleanOptions::default(), 0.0);
        let ops: Vec<OperandElements> = shapes.iter().map(|s| OperandElements::collect(store, s)).collect();
        let domains = face_domains(store, &ops, &ctx);
        let table = intersect_operands(store, &ops, &domains, &ctx).unwrap();
        let mut data = fill(store, shapes, &ops, &table, &domains, &ctx).unwrap();
        split_faces(store, &ops, &domains, &mut data, &ctx).unwrap();
        (data, ops)
    }

    /// Planar area of a face from its parameter-space loops.
    fn planar_area(store: &EntityStore, f: FaceId) -> f64 {
        FaceDomain::new(store, f).loops.iter().map(|l| polygon_area(l)).sum()
    }

    #[test]
    fn test_overlapping_boxes_split_three_faces_each() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let b = make_box(&mut store, Point3d::new(0.5, 0.5, 0.5), Point3d::new(1.5, 1.5, 1.5));
        let (data, ops) = split(&mut store, &[a, b]);
        assert_eq!(data.face_images.len(), 6);
        for (face, images) in &data.face_images {
            assert_eq!(images.len(), 2);
            let total: f64 = images.iter().map(|f| planar_area(&store, *f)).sum();
            assert!((total - planar_area(&store, *face)).abs() < 1e-9, "area {total}");
        }
        let a_faces = &ops[0].faces;
        assert_eq!(a_faces.iter().filter(|f| data.face_images.contains_key(f)).count(), 3);
    }

    #[test]
    fn test_drilled_top_face_gets_disk_and_hole() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::ORIGIN, Point3d::new(2.0, 2.0, 1.0));
        let b = make_cylinder(&mut store, Point3d::new(1.0, 1.0, -1.0), Vec3::new(0.0, 0.0, 1.0), 0.5, 3.0);
        let (data, ops) = split(&mut store, &[a, b]);
        let box_split: Vec<&Vec<FaceId>> = ops[0].faces.iter().filter_map(|f| data.face_images.get(f)).collect();
        // top and bottom of the box
        assert_eq!(box_split.len(), 2);
        for images in box_split {
            assert_eq!(images.len(), 2);
            let holes: usize = images.iter().map(|f| store.faces[*f].inner_loops.len()).sum();
            assert_eq!(holes, 1);
            let total: f64 = images.iter().map(|f| planar_area(&store, *f)).sum();
            assert!((total - 4.0).abs() < 1e-6, "area {total}");
        }
        // only the lateral face of the cylinder meets the box, cut by two circles
        let cyl_split: Vec<usize> = ops[1].faces.iter().filter_map(|f| data.face_images.get(f)).map(|v| v.len()).collect();
        assert_eq!(cyl_split, vec![3]);
    }

    #[test]
    fn test_unchanged_faces_have_no_images() {
        let mut store = EntityStore::new();
        let a = make_box(&mut store, Point3d::ORIGIN, Point3d::new(1.0, 1.0, 1.0));
        let b = make_box(&mut store, Point3d::new(3.0, 0.0, 0.0), Point3d::new(4.0, 1.0, 1.0));
        let (data, ops) = split(&mut store, &[a, b]);
        assert!(data.face_images.is_empty());
        assert_eq!(data.face_image_of(ops[0].faces[0]), vec![ops[0].faces[0]]);
    }
}
