//! Resource kinds
//!
//! # Architecture
//!
//! - [`kind`] - The [`ResourceKind`] capability every kind implements
//! - [`registry`] - Per-scope table of kinds and declarative [`KindDef`]s
//! - [`fetcher`] - [`DefinedKind`], a kind driven by a definition
//!
//! # Example
//!
//! ```ignore
//! use cloud_collector::resource::{KindDef, ResourceRegistry};
//!
//! fn registry(defs: &[KindDef]) -> ResourceRegistry {
//!     ResourceRegistry::from_definitions(defs)
//! }
//! ```

mod fetcher;
mod kind;
mod registry;

pub use fetcher::{extract_items, extract_json_strings, extract_json_value, DefinedKind};
pub use kind::ResourceKind;
pub use registry::{KindDef, LinkDef, ResourceRegistry};
