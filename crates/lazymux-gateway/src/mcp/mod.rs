//! Front-facing MCP server
//!
//! `handler` implements rmcp's `ServerHandler` with the two browse/execute
//! tools and hands every call to the dispatch router.

pub mod handler;

pub use handler::{error_result, LazymuxHandler, EXECUTE_TOOL, GET_TOOLS_IN_CATEGORY};
