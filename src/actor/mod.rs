//! Actor classes (ADEF) and the actors placed in levels.

pub mod adef;
pub mod params;
pub mod schema;

pub use adef::{Adef, ParamType};
pub use params::{Actor, ActorParam, ParamState, ParamValue};
pub use schema::SchemaTable;
