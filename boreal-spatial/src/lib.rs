//! Nested HEALPix indexing for the alert archive.
//!
//! Sky positions are discretized to nested-scheme HEALPix cells at a fixed
//! storage resolution ([`STORAGE_NSIDE`]); the cell id is the stored index
//! column. Cone searches decompose into half-open cell-id ranges at a
//! coarser resolution that fully cover the cone; callers scale the ranges
//! up to the storage resolution and conjoin the exact angular-separation
//! predicate to discard the over-approximation.

pub mod cone;
pub mod healpix;

pub use cone::{cone_to_ranges, scale_ranges};
pub use healpix::{angular_separation, cell_center, cell_id, STORAGE_NSIDE};
