//! ada-snapkv: adaptive per-head SnapKV scoring for KV-cache compression.
//!
//! Scores every cached key of a layer by how much the most recent queries
//! attend to it, guarantees each head a floor of retained slots, and marks
//! must-keep slots with the score type's maximum value so that a single
//! cross-head top-k can compress the cache under a global budget.

pub mod attention;
pub mod cache;
pub mod config;
pub mod error;
pub mod press;
pub mod request;

pub use cache::evictor::{GlobalEvictor, RetentionPlan};
pub use cache::metadata::CacheMetadata;
pub use config::PressConfig;
pub use error::PressError;
pub use press::{AdaSnapKvPress, AttentionSource};
