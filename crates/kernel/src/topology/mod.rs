pub mod brep;
pub mod explore;
pub mod domain;
pub mod primitives;
pub mod transform;
