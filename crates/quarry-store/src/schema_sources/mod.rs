//! Extension schema sources
//!
//! Provides:
//! - Discovery of `metrics*.sql` files across extension directories
//! - A runner applying each source once, with checksums
//! - Detection of sources edited after they were applied

mod checksums;
mod discovery;
mod runner;

pub use checksums::compute_checksum;
pub use discovery::{discover_schema_sources, is_schema_source};
pub use runner::{applied_sources, apply_schema_source, create_schema_version_table, AppliedSource};
