use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::topology::brep::Node;

/// Stage of the pipeline, reported on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Arguments,
    Intersection,
    Pave,
    FaceSplit,
    Classification,
    Build,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Arguments => "argument check",
            Phase::Intersection => "intersection",
            Phase::Pave => "pave and merge",
            Phase::FaceSplit => "face splitting",
            Phase::Classification => "classification",
            Phase::Build => "result building",
        };
        f.write_str(name)
    }
}

/// Fatal outcome of a Boolean operation. The operands are left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BooleanFailure {
    #[error("degenerate geometry: {reason}")]
    GeometryDegenerate { reason: String },

    #[error("merged tolerance {tolerance:e} exceeds the ceiling {ceiling:e}")]
    ToleranceExceeded { tolerance: f64, ceiling: f64 },

    #[error("unresolved interference on {elements:?} prevents classification")]
    UnresolvedInterference { elements: Vec<Node> },

    #[error("result topology is inconsistent: {reason}")]
    TopologyInconsistent { reason: String },

    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("cancelled during {phase}")]
    Cancelled { phase: Phase },
}

/// Non-fatal conditions recorded while producing a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Warning {
    /// A pair of elements whose intersection did not converge.
    UnresolvedInterference { elements: Vec<Node> },
    /// Sub-edges shorter than their tolerance that were collapsed.
    DegenerateEdge { elements: Vec<Node> },
    /// A tolerance was raised to keep the merged topology consistent.
    ToleranceIncreased { element: Node, from: f64, to: f64 },
    /// No probe gave a clean answer; the last probe's state was used.
    AmbiguousClassification { element: Node },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Done,
    DoneWithWarnings,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub warnings: Vec<Warning>,
    pub failure: Option<BooleanFailure>,
}

impl Diagnostics {
    pub fn status(&self) -> Status {
        if self.failure.is_some() {
            Status::Failed
        } else if self.warnings.is_empty() {
            Status::Done
        } else {
            Status::DoneWithWarnings
        }
    }

    pub fn push(&mut self, warning: Warning) {
        warn!(?warning, "boolean warning");
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for w in warnings {
            self.push(w);
        }
    }

    pub fn has_warning(&self, pred: impl Fn(&Warning) -> bool) -> bool {
        self.warnings.iter().any(pred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_progression() {
        let mut d = Diagnostics::default();
        assert_eq!(d.status(), Status::Done);
        d.push(Warning::DegenerateEdge { elements: vec![] });
        assert_eq!(d.status(), Status::DoneWithWarnings);
        d.failure = Some(BooleanFailure::Cancelled { phase: Phase::Pave });
        assert_eq!(d.status(), Status::Failed);
    }

    #[test]
    fn test_failure_messages() {
        let f = BooleanFailure::Cancelled { phase: Phase::Classification };
        assert_eq!(f.to_string(), "cancelled during classification");
        let t = BooleanFailure::ToleranceExceeded { tolerance: 0.01, ceiling: 0.001 };
        assert!(t.to_string().contains("exceeds the ceiling"));
    }
}
