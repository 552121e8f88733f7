//! Alert packet model.
//!
//! The broker delivers alert records keyed by a registry schema id; the
//! registered schema document tells us which packet generation we are
//! looking at. The set of generations is closed and small, so dispatch is
//! an enum plus one decode entry point, not dynamic field access.

pub mod columns;
pub mod error;
pub mod model;
pub mod schema;

pub use columns::{known_columns, validate_projection};
pub use error::{AlertError, AlertResult};
pub use model::{AlertRecord, AlertV7, AlertV9, DiaObject, DiaSource, MovingObjectRef};
pub use schema::SchemaVersion;
