//! Paves along edges and the blocks between them.

use crate::geometry::curves::Curve;
use crate::topology::brep::{EdgeId, EntityStore, VertexId};

use super::merge::{MergedVertices, VertexMerger};

/// A vertex record sitting on an edge at `param`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pave {
    pub record: usize,
    pub param: f64,
}

/// All paves of one edge, including its two ends.
#[derive(Debug, Clone)]
pub struct PaveSet {
    pub edge: EdgeId,
    start: Pave,
    end: Pave,
    inner: Vec<Pave>,
}

impl PaveSet {
    pub fn new(edge: EdgeId, start: Pave, end: Pave) -> Self {
        Self {
            edge,
            start,
            end,
            inner: Vec::new(),
        }
    }

    pub fn add(&mut self, pave: Pave) {
        self.inner.push(pave);
    }

    /// Paves in parameter order. Consecutive paves of one cluster collapse to
    /// one; the edge ends always survive.
    pub fn ordered(&self, store: &EntityStore, merger: &VertexMerger) -> Vec<Pave> {
        let edge = &store.edges[self.edge];
        let (t0, t1) = edge.range();
        let mut inner: Vec<Pave> = self
            .inner
            .iter()
            .copied()
            .filter(|p| p.param > t0 && p.param < t1)
            .collect();
        inner.sort_by(|a, b| a.param.total_cmp(&b.param));

        let mut out = vec![self.start];
        for p in inner {
            let Some(last) = out.last() else { continue };
            if merger.root(last.record) == merger.root(p.record) {
                continue;
            }
            out.push(p);
        }
        while out.len() > 1 {
            let last = out[out.len() - 1];
            if merger.root(last.record) == merger.root(self.end.record) {
                out.pop();
            } else {
                break;
            }
        }
        out.push(self.end);
        out
    }

    /// Consecutive paves whose stretch of curve is no longer than their tolerances.
    pub fn micro_pairs(&self, store: &EntityStore, merger: &VertexMerger, fuzzy: f64) -> Vec<(usize, usize)> {
        let edge = &store.edges[self.edge];
        let paves = self.ordered(store, merger);
        paves
            .windows(2)
            .filter(|w| merger.root(w[0].record) != merger.root(w[1].record))
            .filter(|w| {
                let tol = merger.record(w[0].record).tolerance + merger.record(w[1].record).tolerance + edge.tolerance + fuzzy;
                edge.curve.length(w[0].param, w[1].param) <= tol
            })
            .map(|w| (w[0].record, w[1].record))
            .collect()
    }
}

/// Stretch of an edge between two consecutive paves.
#[derive(Debug, Clone)]
pub struct PaveBlock {
    pub original: EdgeId,
    pub start: VertexId,
    pub end: VertexId,
    pub range: (f64, f64),
    /// Index into the common-block table when the block coincides with blocks of other edges.
    pub common: Option<usize>,
    /// Result edge, once created.
    pub edge: Option<EdgeId>,
}

impl PaveBlock {
    pub fn mid_param(&self) -> f64 {
        0.5 * (self.range.0 + self.range.1)
    }

    pub fn same_ends(&self, other: &PaveBlock) -> bool {
        (self.start == other.start && self.end == other.end) || (self.start == other.end && self.end == other.start)
    }
}

/// Blocks between the ordered paves of a set.
pub fn blocks_of(set: &PaveSet, store: &EntityStore, merger: &VertexMerger, merged: &MergedVertices) -> Vec<PaveBlock> {
    set.ordered(store, merger)
        .windows(2)
        .map(|w| PaveBlock {
            original: set.edge,
            start: merged.get(w[0].record),
            end: merged.get(w[1].record),
            range: (w[0].param, w[1].param),
            common: None,
            edge: None,
        })
        .collect()
}

/// `curve` runs the same way as `other` at the given parameters.
pub fn same_direction(curve: &Curve, t: f64, other: &Curve, s: f64) -> bool {
    curve.derivative(t).dot(&other.derivative(s)) >= 0.0
}

/// Groups of blocks that cover the same stretch of space.
#[derive(Debug, Clone, Default)]
pub struct CommonBlocks {
    pub groups: Vec<Vec<usize>>,
}

impl CommonBlocks {
    /// Puts blocks `a` and `b` in one group, merging existing groups.
    pub fn join(&mut self, blocks: &mut [PaveBlock], a: usize, b: usize) {
        match (blocks[a].common, blocks[b].common) {
            (Some(ga), Some(gb)) if ga == gb => {}
            (Some(ga), Some(gb)) => {
                let moved = std::mem::take(&mut self.groups[gb]);
                for &m in &moved {
                    blocks[m].common = Some(ga);
                }
                self.groups[ga].extend(moved);
            }
            (Some(g), None) => {
                blocks[b].common = Some(g);
                self.groups[g].push(b);
            }
            (None, Some(g)) => {
                blocks[a].common = Some(g);
                self.groups[g].push(a);
            }
            (None, None) => {
                let g = self.groups.len();
                blocks[a].common = Some(g);
                blocks[b].common = Some(g);
                self.groups.push(vec![a, b]);
            }
        }
    }
}

/// True when two blocks join the same vertices along the same stretch of space.
pub fn blocks_coincide(store: &EntityStore, a: &PaveBlock, b: &PaveBlock, fuzzy: f64) -> bool {
    if !a.same_ends(b) {
        return false;
    }
    let (ea, eb) = (&store.edges[a.original], &store.edges[b.original]);
    let mid = ea.curve.evaluate(a.mid_param());
    let proj = eb.curve.project(&mid, b.range);
    proj.distance <= ea.tolerance + eb.tolerance + fuzzy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::context::OperationContext;
    use crate::boolean::options::BooleanOptions;
    use crate::geometry::curves::Line3d;
    use crate::geometry::point::Point3d;

    fn segment(store: &mut EntityStore, len: f64) -> (EdgeId, VertexId, VertexId) {
        let a = store.add_vertex(Point3d::ORIGIN, 1e-7);
        let b = store.add_vertex(Point3d::new(len, 0.0, 0.0), 1e-7);
        let e = store.add_edge(Curve::Line(Line3d::from_points(Point3d::ORIGIN, Point3d::new(len, 0.0, 0.0))), (0.0, len), a, b, 1e-7);
        (e, a, b)
    }

    #[test]
    fn test_blocks_follow_parameter_order() {
        let mut store = EntityStore::new();
        let (e, a, b) = segment(&mut store, 3.0);
        let mut m = VertexMerger::new();
        let ra = m.add_original(&store, a, 0);
        let rb = m.add_original(&store, b, 0);
        let r2 = m.add_new(Point3d::new(2.0, 0.0, 0.0), 1e-7);
        let r1 = m.add_new(Point3d::new(1.0, 0.0, 0.0), 1e-7);
        let mut set = PaveSet::new(e, Pave { record: ra, param: 0.0 }, Pave { record: rb, param: 3.0 });
        set.add(Pave { record: r2, param: 2.0 });
        set.add(Pave { record: r1, param: 1.0 });
        let ctx = OperationContext::new(&BooleanOptions::default(), 0.0);
        let merged = m.resolve(&mut store, &ctx).unwrap();
        let blocks = blocks_of(&set, &store, &m, &merged);
        let ranges: Vec<(f64, f64)> = blocks.iter().map(|b| b.range).collect();
        assert_eq!(ranges, vec![(0.0, 1.0), (1.0, 2.0), (2.0, 3.0)]);
        assert_eq!(blocks[0].start, a);
        assert_eq!(blocks[2].end, b);
    }

    #[test]
    fn test_micro_block_is_reported() {
        let mut store = EntityStore::new();
        let (e, a, b) = segment(&mut store, 1.0);
        let mut m = VertexMerger::new();
        let ra = m.add_original(&store, a, 0);
        let rb = m.add_original(&store, b, 0);
        let near_end = m.add_new(Point3d::new(1.0 - 2e-7, 0.0, 0.0), 1e-7);
        let mut set = PaveSet::new(e, Pave { record: ra, param: 0.0 }, Pave { record: rb, param: 1.0 });
        set.add(Pave { record: near_end, param: 1.0 - 2e-7 });
        assert_eq!(set.micro_pairs(&store, &m, 0.0), vec![(near_end, rb)]);
        m.union(near_end, rb);
        assert_eq!(set.ordered(&store, &m).len(), 2);
    }

    #[test]
    fn test_common_groups_merge() {
        let mut store = EntityStore::new();
        let (e, a, b) = segment(&mut store, 1.0);
        let block = PaveBlock {
            original: e,
            start: a,
            end: b,
            range: (0.0, 1.0),
            common: None,
            edge: None,
        };
        let mut blocks = vec![block.clone(), block.clone(), block.clone(), block];
        let mut common = CommonBlocks::default();
        common.join(&mut blocks, 0, 1);
        common.join(&mut blocks, 2, 3);
        common.join(&mut blocks, 1, 3);
        let g = blocks[0].common.unwrap();
        assert!(blocks.iter().all(|b| b.common == Some(g)));
        assert_eq!(common.groups[g].len(), 4);
        assert!(blocks_coincide(&store, &blocks[0], &blocks[1], 0.0));
    }
}
