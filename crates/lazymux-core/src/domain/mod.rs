//! Domain types shared by the gateway crates
//!
//! - Backend descriptors, transport kinds and tool filters
//! - The configuration file model

mod backend;
pub mod config;

pub use backend::*;
pub use config::{FrontTransport, LazymuxConfig, ProxyConfig, ProxyOptions, ServerEntry, ServerOptions};
