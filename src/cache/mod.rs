//! Cache-side collaborators of the press.
//!
//! - [`metadata`]: CacheMetadata and the canonical 4-D key/value view
//! - [`evictor`]: global cross-head retention plan built from press scores

pub mod evictor;
pub mod metadata;
