//! Imports feature module
//!
//! Starts imports and exposes their history and the batch queue counters the
//! dashboard polls.

pub mod commands;
pub mod queries;
pub mod routes;


pub use routes::imports_routes;
