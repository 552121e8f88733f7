//! Relational archive index.
//!
//! The index owns every pointer from an alert id to the byte range of its
//! frame inside a stored blob, the per-object aggregates, and the export
//! bookkeeping (result groups and their claimable chunks). Writes from one
//! ingested chunk commit in a single transaction; the object-store write
//! they describe happens first and is compensated by the caller when the
//! commit fails.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{IndexError, IndexResult};
pub use memory::MemoryIndex;
pub use models::{
    AlertPointer, AlertRow, BlobInsert, BlobRow, ChunkInsert, FrameRef, MovingObjectRow, ObjectRow,
    ResultChunkRow, ResultGroupRow, SchemaRow,
};
pub use postgres::PgIndexStore;
pub use query::{AlertQuery, CompiledConditions, ConeConstraint, Order, TimeConstraint};
pub use store::IndexStore;
