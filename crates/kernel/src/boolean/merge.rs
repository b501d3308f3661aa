//! Union-find over original and intersection vertices.

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::geometry::point::Point3d;
use crate::geometry::transform::BoundingBox;
use crate::topology::brep::{EntityStore, Node, VertexId};

use super::bvh::Bvh;
use super::context::OperationContext;
use super::diagnostics::{BooleanFailure, Warning};

/// A vertex taking part in the merge, either from an operand or created by an interference.
#[derive(Debug, Clone)]
pub struct VertexRecord {
    pub point: Point3d,
    pub tolerance: f64,
    pub operand: Option<usize>,
    pub original: Option<VertexId>,
}

#[derive(Debug, Default)]
struct Forest {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl Forest {
    fn push(&mut self) -> usize {
        let i = self.parent.len();
        self.parent.push(i);
        self.rank.push(0);
        i
    }

    fn find_root(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find_root(a), self.find_root(b));
        if ra == rb {
            return false;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else {
            self.parent[rb] = ra;
            if self.rank[ra] == self.rank[rb] {
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// Vertex merging. Unions go through one lock; everything else reads the records.
#[derive(Debug, Default)]
pub struct VertexMerger {
    records: Vec<VertexRecord>,
    forest: Mutex<Forest>,
}

/// Final vertex of every record once the clusters are resolved.
#[derive(Debug, Clone)]
pub struct MergedVertices {
    pub vertex_of: Vec<VertexId>,
}

impl MergedVertices {
    pub fn get(&self, record: usize) -> VertexId {
        self.vertex_of[record]
    }
}

/// Approximate smallest enclosing sphere (Badoiu-Clarkson iteration).
fn enclosing_sphere(points: &[(Point3d, f64)]) -> (Point3d, f64) {
    let Some(&(first, _)) = points.first() else {
        return (Point3d::ORIGIN, 0.0);
    };
    let mut c = first;
    for k in 1..=64usize {
        let far = points
            .iter()
            .map(|(p, _)| *p)
            .max_by(|a, b| c.distance_to(a).total_cmp(&c.distance_to(b)))
            .unwrap_or(c);
        c = c + (far - c) * (1.0 / (k as f64 + 1.0));
    }
    let r = points.iter().map(|(p, t)| c.distance_to(p) + t).fold(0.0, f64::max);
    (c, r)
}

impl VertexMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: VertexRecord) -> usize {
        self.records.push(record);
        self.forest.get_mut().push()
    }

    pub fn add_original(&mut self, store: &EntityStore, v: VertexId, operand: usize) -> usize {
        let vx = &store.vertices[v];
        self.add(VertexRecord {
            point: vx.point,
            tolerance: vx.tolerance,
            operand: Some(operand),
            original: Some(v),
        })
    }

    pub fn add_new(&mut self, point: Point3d, tolerance: f64) -> usize {
        self.add(VertexRecord {
            point,
            tolerance,
            operand: None,
            original: None,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, i: usize) -> &VertexRecord {
        &self.records[i]
    }

    pub fn union(&self, a: usize, b: usize) -> bool {
        self.forest.lock().union(a, b)
    }

    pub fn root(&self, i: usize) -> usize {
        self.forest.lock().find_root(i)
    }

    /// Vertices of one operand never merge with each other.
    fn may_merge(&self, a: usize, b: usize) -> bool {
        match (self.records[a].operand, self.records[b].operand) {
            (Some(x), Some(y)) => x != y,
            _ => true,
        }
    }

    /// Unites every admissible pair closer than the sum of their tolerances plus `fuzzy`.
    #[instrument(skip(self, ctx), fields(records = self.records.len()))]
    pub fn merge_coincident(&self, ctx: &OperationContext) -> usize {
        let fuzzy = ctx.fuzzy;
        let boxes: Vec<(usize, BoundingBox)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, BoundingBox::new(r.point, r.point).expanded(r.tolerance + fuzzy)))
            .collect();
        let bvh = Bvh::build(boxes.clone());
        let indices: Vec<usize> = (0..self.records.len()).collect();
        let pairs: Vec<Vec<usize>> = ctx.map(&indices, |&i| {
            let ri = &self.records[i];
            bvh.query(&boxes[i].1)
                .into_iter()
                .filter(|&j| j > i && self.may_merge(i, j))
                .filter(|&j| {
                    let rj = &self.records[j];
                    ri.point.distance_to(&rj.point) <= ri.tolerance + rj.tolerance + fuzzy
                })
                .collect()
        });
        let mut merged = 0;
        let mut forest = self.forest.lock();
        for (i, js) in pairs.into_iter().enumerate() {
            for j in js {
                merged += usize::from(forest.union(i, j));
            }
        }
        debug!(merged, "coincident vertices merged");
        merged
    }

    /// Maps every cluster onto one store vertex. An original vertex represents its
    /// cluster when there is one; its tolerance grows to cover the other members.
    #[instrument(skip_all)]
    pub fn resolve(&self, store: &mut EntityStore, ctx: &OperationContext) -> Result<MergedVertices, BooleanFailure> {
        let ceiling = ctx.options.tolerance_ceiling;
        let n = self.records.len();
        let mut members: Vec<Vec<usize>> = vec![Vec::new(); n];
        {
            let mut forest = self.forest.lock();
            for i in 0..n {
                let r = forest.find_root(i);
                members[r].push(i);
            }
        }
        let mut vertex_of: Vec<Option<VertexId>> = vec![None; n];
        for cluster in members.into_iter().filter(|m| !m.is_empty()) {
            let rep = cluster
                .iter()
                .copied()
                .find(|&i| self.records[i].original.is_some())
                .unwrap_or(cluster[0]);
            let base = &self.records[rep];
            let mut point = base.point;
            let mut tol = cluster
                .iter()
                .map(|&i| {
                    let r = &self.records[i];
                    point.distance_to(&r.point) + r.tolerance
                })
                .fold(base.tolerance, f64::max);
            if tol > ceiling {
                let pts: Vec<(Point3d, f64)> = cluster.iter().map(|&i| (self.records[i].point, self.records[i].tolerance)).collect();
                let (c, r) = enclosing_sphere(&pts);
                debug!(from = tol, to = r, "retrying merge around the enclosing sphere");
                if r > ceiling {
                    return Err(BooleanFailure::ToleranceExceeded { tolerance: r, ceiling });
                }
                point = c;
                tol = r;
            }
            let v = match base.original {
                Some(v) => {
                    let vx = &mut store.vertices[v];
                    if tol > vx.tolerance || vx.point.distance_to(&point) > 0.0 {
                        if tol > vx.tolerance {
                            ctx.warn(Warning::ToleranceIncreased {
                                element: Node::Vertex(v),
                                from: vx.tolerance,
                                to: tol,
                            });
                        }
                        vx.point = point;
                        vx.tolerance = vx.tolerance.max(tol);
                    }
                    v
                }
                None => store.add_vertex(point, tol),
            };
            for i in cluster {
                vertex_of[i] = Some(v);
            }
        }
        let vertex_of = vertex_of
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BooleanFailure::TopologyInconsistent {
                reason: "vertex record without cluster".into(),
            })?;
        Ok(MergedVertices { vertex_of })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boolean::options::BooleanOptions;

    fn ctx() -> OperationContext {
        OperationContext::new(&BooleanOptions::default(), 0.0)
    }

    #[test]
    fn test_same_operand_vertices_stay_apart() {
        let mut store = EntityStore::new();
        let a = store.add_vertex(Point3d::ORIGIN, 1e-3);
        let b = store.add_vertex(Point3d::new(1e-4, 0.0, 0.0), 1e-3);
        let mut m = VertexMerger::new();
        let ra = m.add_original(&store, a, 0);
        let rb = m.add_original(&store, b, 0);
        assert_eq!(m.merge_coincident(&ctx()), 0);
        assert_ne!(m.root(ra), m.root(rb));
    }

    #[test]
    fn test_new_vertex_joins_original_and_raises_tolerance() {
        let mut store = EntityStore::new();
        let a = store.add_vertex(Point3d::ORIGIN, 1e-7);
        let mut m = VertexMerger::new();
        let ra = m.add_original(&store, a, 0);
        let rn = m.add_new(Point3d::new(1.5e-7, 0.0, 0.0), 1e-7);
        let far = m.add_new(Point3d::new(1.0, 0.0, 0.0), 1e-7);
        let c = ctx();
        assert_eq!(m.merge_coincident(&c), 1);
        let merged = m.resolve(&mut store, &c).unwrap();
        assert_eq!(merged.get(ra), a);
        assert_eq!(merged.get(rn), a);
        assert_ne!(merged.get(far), a);
        assert!(store.vertices[a].tolerance >= 2.5e-7 - 1e-15);
        assert_eq!(c.take_warnings().len(), 1);
    }

    #[test]
    fn test_merge_chain_is_transitive() {
        let mut store = EntityStore::new();
        let mut m = VertexMerger::new();
        let ids: Vec<usize> = (0..4).map(|i| m.add_new(Point3d::new(i as f64 * 1.5e-7, 0.0, 0.0), 1e-7)).collect();
        let c = ctx();
        m.merge_coincident(&c);
        let merged = m.resolve(&mut store, &c).unwrap();
        assert!(ids.iter().all(|&i| merged.get(i) == merged.get(ids[0])));
    }

    #[test]
    fn test_merge_over_ceiling_fails() {
        let mut store = EntityStore::new();
        let mut m = VertexMerger::new();
        let a = m.add_new(Point3d::ORIGIN, 1e-3);
        let b = m.add_new(Point3d::new(3e-3, 0.0, 0.0), 1e-3);
        m.union(a, b);
        let res = m.resolve(&mut store, &ctx());
        assert!(matches!(res, Err(BooleanFailure::ToleranceExceeded { .. })));
    }

    #[test]
    fn test_enclosing_sphere_retry_centres_cluster() {
        let mut store = EntityStore::new();
        let mut m = VertexMerger::new();
        let a = m.add_new(Point3d::ORIGIN, 1e-4);
        let b = m.add_new(Point3d::new(1.2e-3, 0.0, 0.0), 1e-4);
        m.union(a, b);
        let merged = m.resolve(&mut store, &ctx()).unwrap();
        let v = &store.vertices[merged.get(a)];
        assert!((v.point.x - 6e-4).abs() < 5e-5);
        assert!(v.tolerance <= 1e-3);
    }
}
