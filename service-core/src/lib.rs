//! service-core: Shared infrastructure for the checkout workspace.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod utils;

