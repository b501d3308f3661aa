//! General Fuse Boolean operations: Common, Fuse, Cut and Section.
//!
//! The pipeline runs in phases sharing one [`OperationContext`]: operand
//! checks, intersection, pave and merge, face splitting, classification and
//! result building. Any fatal failure rolls the store back to its state
//! before the call.

pub mod arguments;
pub mod builder;
pub mod builder_face;
pub mod bvh;
pub mod classify;
pub mod context;
pub mod diagnostics;
pub mod ds;
pub mod filler;
pub mod interference;
pub mod intersect;
pub mod merge;
pub mod options;
pub mod pave;

use tracing::{debug, info, instrument, warn};

use crate::topology::brep::{EntityStore, FaceId, Node, Shape};

use arguments::{is_solid, prepare_operands};
use builder::build_result;
use builder_face::split_faces;
use classify::{classify, select};
use context::OperationContext;
use filler::fill;
use interference::Element;
use intersect::{face_domains, intersect_operands, OperandElements};

pub use context::CancelToken;
pub use diagnostics::{BooleanFailure, Diagnostics, Phase, Status, Warning};
pub use options::BooleanOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanOp {
    Common,
    Fuse,
    /// Object minus tools.
    Cut,
    /// Intersection edges and touch points only.
    Section,
}

/// Result of [`perform`]: either a shape plus warnings, or no shape and the failure.
#[derive(Debug, Clone)]
pub struct BooleanOutcome {
    pub result: Option<Shape>,
    pub diagnostics: Diagnostics,
    /// Operands as handed to the call, untouched by it.
    pub operands: Vec<Shape>,
}

impl BooleanOutcome {
    pub fn status(&self) -> Status {
        self.diagnostics.status()
    }

    pub fn into_result(self) -> Result<Shape, BooleanFailure> {
        match (self.result, self.diagnostics.failure) {
            (Some(shape), None) => Ok(shape),
            (_, Some(failure)) => Err(failure),
            (None, None) => Err(BooleanFailure::TopologyInconsistent {
                reason: "no result produced".into(),
            }),
        }
    }
}

/// Runs `op` with `operands[0]` as the object and the rest as tools.
///
/// More than two operands fold left; Section collects the sections of the
/// object with every tool.
#[instrument(skip(store, operands, options), fields(operands = operands.len()))]
pub fn perform(store: &mut EntityStore, operands: &[Shape], op: BooleanOp, options: &BooleanOptions) -> BooleanOutcome {
    let checkpoint = store.checkpoint();
    let mut diagnostics = Diagnostics::default();
    let result = match run(store, operands, op, options, &mut diagnostics) {
        Ok(shape) => Some(shape),
        Err(failure) => {
            store.rollback(checkpoint);
            warn!(%failure, "boolean operation failed, store rolled back");
            diagnostics.failure = Some(failure);
            None
        }
    };
    BooleanOutcome {
        result,
        diagnostics,
        operands: operands.to_vec(),
    }
}

fn run(
    store: &mut EntityStore,
    operands: &[Shape],
    op: BooleanOp,
    options: &BooleanOptions,
    diagnostics: &mut Diagnostics,
) -> Result<Shape, BooleanFailure> {
    if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
        return Err(BooleanFailure::Cancelled { phase: Phase::Arguments });
    }
    let prepared = prepare_operands(store, operands, op)?;
    let Some((object, tools)) = prepared.split_first() else {
        return Err(BooleanFailure::InvalidArguments {
            reason: "no operands".into(),
        });
    };

    if op == BooleanOp::Section {
        let mut children = Vec::new();
        for tool in tools {
            let section = perform_pair(store, [*object, *tool], op, options, diagnostics)?;
            match section.node {
                Node::Compound(id) => children.extend(store.compounds[id].children.iter().copied()),
                _ => children.push(section),
            }
        }
        return Ok(Shape::compound(store.add_compound(children)));
    }

    let mut acc = *object;
    for tool in tools {
        acc = perform_pair(store, [acc, *tool], op, options, diagnostics)?;
    }
    Ok(acc)
}

fn perform_pair(
    store: &mut EntityStore,
    shapes: [Shape; 2],
    op: BooleanOp,
    options: &BooleanOptions,
    diagnostics: &mut Diagnostics,
) -> Result<Shape, BooleanFailure> {
    let fuzzy = options
        .fuzzy_tolerance
        .unwrap_or_else(|| store.shape_tolerance(&shapes[0]).max(store.shape_tolerance(&shapes[1])));
    let ctx = OperationContext::new(options, fuzzy);
    let result = run_phases(store, &shapes, op, &ctx);
    diagnostics.extend(ctx.take_warnings());
    result
}

/// Operands whose boxes do not meet need no intersection work.
fn disjoint_result(store: &mut EntityStore, shapes: &[Shape; 2], op: BooleanOp) -> Shape {
    match op {
        BooleanOp::Fuse => Shape::compound(store.add_compound(shapes.to_vec())),
        BooleanOp::Cut => shapes[0],
        BooleanOp::Common | BooleanOp::Section => Shape::compound(store.add_compound(Vec::new())),
    }
}

#[instrument(skip_all, fields(op = ?op, fuzzy = ctx.fuzzy))]
fn run_phases(store: &mut EntityStore, shapes: &[Shape; 2], op: BooleanOp, ctx: &OperationContext) -> Result<Shape, BooleanFailure> {
    ctx.checkpoint(Phase::Arguments)?;
    let boxes = [
        store.bounding_box(&shapes[0]).expanded(ctx.fuzzy),
        store.bounding_box(&shapes[1]).expanded(ctx.fuzzy),
    ];
    if !boxes[0].intersects(&boxes[1]) {
        debug!("operand boxes are disjoint");
        return Ok(disjoint_result(store, shapes, op));
    }

    let operands: Vec<OperandElements> = shapes.iter().map(|s| OperandElements::collect(store, s)).collect();
    let domains = face_domains(store, &operands, ctx);
    let table = intersect_operands(store, &operands, &domains, ctx)?;
    let mut unresolved: Vec<FaceId> = table
        .unresolved
        .iter()
        .flat_map(|(a, b)| [*a, *b])
        .filter_map(|e| match e {
            Element::Face(f) => Some(f),
            _ => None,
        })
        .collect();
    unresolved.sort();
    unresolved.dedup();

    let mut data = fill(store, shapes, &operands, &table, &domains, ctx)?;
    split_faces(store, &operands, &domains, &mut data, ctx)?;
    let classification = classify(store, shapes, &operands, &domains, &data, &unresolved, ctx)?;
    let selection = select(op, &classification, &data, store);
    let solid = shapes.iter().all(|s| is_solid(store, s));
    let result = build_result(store, op, &selection, &data, solid, ctx)?;
    info!(?op, "boolean operation done");
    Ok(result)
}

/// Pairwise Boolean operations behind one interface.
pub trait BooleanEngine {
    /// Volume shared by `a` and `b`.
    fn common(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure>;

    /// Union of `a` and `b`; faces shared by both merge into one.
    fn fuse(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure>;

    /// `a` minus `b`.
    fn cut(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure>;

    /// Edges and vertices where the boundaries of `a` and `b` meet.
    fn section(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure>;
}

/// Engine backed by [`perform`]. Warnings are dropped; use `perform` to see them.
#[derive(Debug, Clone, Default)]
pub struct DefaultBooleanEngine {
    pub options: BooleanOptions,
}

impl DefaultBooleanEngine {
    pub fn new(options: BooleanOptions) -> Self {
        Self { options }
    }

    fn run(&self, store: &mut EntityStore, a: Shape, b: Shape, op: BooleanOp) -> Result<Shape, BooleanFailure> {
        perform(store, &[a, b], op, &self.options).into_result()
    }
}

impl BooleanEngine for DefaultBooleanEngine {
    fn common(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure> {
        self.run(store, a, b, BooleanOp::Common)
    }

    fn fuse(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure> {
        self.run(store, a, b, BooleanOp::Fuse)
    }

    fn cut(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure> {
        self.run(store, a, b, BooleanOp::Cut)
    }

    fn section(&self, store: &mut EntityStore, a: Shape, b: Shape) -> Result<Shape, BooleanFailure> {
        self.run(store, a, b, BooleanOp::Section)
    }
}
