//! # Lazymux Core Library
//!
//! Network-free building blocks of the lazymux gateway.
//!
//! ## Modules
//!
//! - `domain` - Backend descriptors, transport kinds, tool filters, configuration
//! - `catalog` - Hierarchy Catalog: path-addressable tree of backends, categories and tools
//! - `error` - Gateway error taxonomy surfaced to callers

pub mod catalog;
pub mod domain;
pub mod error;

pub use catalog::{Catalog, CatalogBuilder, CatalogError, CatalogNode, ChildEntry, NodeKind, ToolTarget};
pub use domain::*;
pub use error::{GatewayError, GatewayResult};
