//! Cloud account resource collector
//!
//! Collects every resource of one cloud account into a single
//! [`graph::ResourceGraph`]: global kinds first, then all regions in parallel,
//! then a connect phase that adds the edges.
//!
//! # Architecture
//!
//! - [`queue`] - Bounded worker pool with a drain point
//! - [`graph`] - Nodes, the shared graph and the [`graph::GraphBuilder`]
//! - [`resource`] - The [`resource::ResourceKind`] capability and its registry
//! - [`accumulator`] - Deduplicated error counting and reporting
//! - [`collector`] - [`collector::AccountCollector`], the three-phase run
//! - [`client`] / [`replay`] - Provider API access and its recorded stand-in

pub mod accumulator;
pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod feedback;
pub mod graph;
pub mod progress;
pub mod queue;
pub mod replay;
pub mod resource;

pub use collector::{AccountCollector, CollectionReport, CollectorPhase};
pub use config::CollectorConfig;
