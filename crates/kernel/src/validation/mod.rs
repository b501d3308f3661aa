//! Post-build checks and measures.

pub mod audit;
pub mod volume;

pub use audit::{audit_shape, AuditIssue, TopologyAudit};
pub use volume::{shape_area, shape_volume};
