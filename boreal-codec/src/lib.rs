//! Framed block container for alert records.
//!
//! A container holds a small header followed by one compressed frame per
//! record. Every frame carries its own record count (always exactly one)
//! and compressed length, so any single record can be extracted from a
//! ranged read of the container without touching its neighbours. Frames
//! end with a per-container sync marker, which is what makes `splice`
//! possible: frames captured from older containers can be stitched into a
//! new container by pure byte concatenation under a fresh marker.
//!
//! Container layout:
//!
//! ```text
//! header:  magic (4) | schema id (i32 le) | codec name (len u8 + bytes) | sync (16)
//! frame:   record count (u32 le) | compressed len (u32 le) | payload | sync (16)
//! ```

pub mod codec;
pub mod container;
pub mod error;

pub use codec::Codec;
pub use container::{
    extract, extract_frame, pack, read_header, splice, strip_sync, ContainerHeader, PackedBlock,
    SYNC_MARKER_LEN,
};
pub use error::{CodecError, CodecResult};
