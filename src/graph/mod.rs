//! Resource graph
//!
//! - [`model`] - Account, region and resource nodes, edge types
//! - [`store`] - The petgraph-backed [`ResourceGraph`]
//! - [`builder`] - [`GraphBuilder`], the mutex-guarded mutation surface

pub mod builder;
pub mod model;
pub mod store;

pub use builder::{GraphBuilder, SharedGraph};
pub use model::*;
pub use store::{EdgeExport, GraphExport, ResourceGraph};
