//! Records produced by the intersection phase. They are never mutated afterwards.

use crate::geometry::curves::Curve;
use crate::geometry::point::{Point2d, Point3d};
use crate::topology::brep::{EdgeId, FaceId, Node, ShapeKind, VertexId};

/// An element of an operand taking part in an interference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    Vertex(VertexId),
    Edge(EdgeId),
    Face(FaceId),
}

impl Element {
    pub fn node(&self) -> Node {
        match *self {
            Element::Vertex(v) => Node::Vertex(v),
            Element::Edge(e) => Node::Edge(e),
            Element::Face(f) => Node::Face(f),
        }
    }

    pub fn kind(&self) -> ShapeKind {
        self.node().kind()
    }
}

/// Where on its element an interference sits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    None,
    Curve(f64),
    Range(f64, f64),
    Surface(Point2d),
}

impl Param {
    pub fn curve(&self) -> Option<f64> {
        match *self {
            Param::Curve(t) => Some(t),
            _ => None,
        }
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        match *self {
            Param::Range(a, b) => Some((a, b)),
            _ => None,
        }
    }
}

/// A face/face intersection curve clipped to both faces.
#[derive(Debug, Clone)]
pub struct SectionCurve {
    pub curve: Curve,
    pub range: (f64, f64),
    pub closed: bool,
    /// Largest distance of the curve from either surface.
    pub tolerance: f64,
}

impl SectionCurve {
    pub fn start(&self) -> Point3d {
        self.curve.evaluate(self.range.0)
    }
}

#[derive(Debug, Clone)]
pub enum Coincidence {
    /// Isolated contact point.
    Point,
    /// A stretch of one element lies on the other.
    Overlap { same_direction: bool },
    /// Two faces on the same surface.
    SameDomain,
    Section(SectionCurve),
    /// Tangent contact of two faces at one point.
    Touch,
}

#[derive(Debug, Clone)]
pub struct Interference {
    pub a: Element,
    pub param_a: Param,
    pub b: Element,
    pub param_b: Param,
    pub point: Point3d,
    pub tolerance: f64,
    pub coincidence: Coincidence,
}

impl Interference {
    pub fn point(a: Element, param_a: Param, b: Element, param_b: Param, point: Point3d, tolerance: f64) -> Self {
        Self {
            a,
            param_a,
            b,
            param_b,
            point,
            tolerance,
            coincidence: Coincidence::Point,
        }
    }

    pub fn kinds(&self) -> (ShapeKind, ShapeKind) {
        (self.a.kind(), self.b.kind())
    }

    pub fn involves(&self, e: Element) -> bool {
        self.a == e || self.b == e
    }

    /// The parameter on `e`, when `e` is one side of the record.
    pub fn param_on(&self, e: Element) -> Option<Param> {
        if self.a == e {
            Some(self.param_a)
        } else if self.b == e {
            Some(self.param_b)
        } else {
            None
        }
    }

    pub fn is_same_domain(&self) -> bool {
        matches!(self.coincidence, Coincidence::SameDomain)
    }
}

/// Everything phase 1 found, plus the pairs it could not resolve.
#[derive(Debug, Clone, Default)]
pub struct InterferenceTable {
    pub records: Vec<Interference>,
    pub unresolved: Vec<(Element, Element)>,
}

impl InterferenceTable {
    pub fn of_kinds(&self, a: ShapeKind, b: ShapeKind) -> impl Iterator<Item = &Interference> {
        self.records.iter().filter(move |r| r.kinds() == (a, b))
    }

    pub fn sections(&self) -> impl Iterator<Item = (&Interference, &SectionCurve)> {
        self.records.iter().filter_map(|r| match &r.coincidence {
            Coincidence::Section(s) => Some((r, s)),
            _ => None,
        })
    }

    pub fn same_domain_pairs(&self) -> impl Iterator<Item = (FaceId, FaceId)> + '_ {
        self.records.iter().filter(|r| r.is_same_domain()).filter_map(|r| match (r.a, r.b) {
            (Element::Face(a), Element::Face(b)) => Some((a, b)),
            _ => None,
        })
    }
}
