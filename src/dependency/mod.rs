//! Dependency tracking between views and what they read, and installation
//! of the refresh rules that keep backing stores current.

pub mod graph;
pub mod triggers;

pub use graph::DependencyGraph;
pub use triggers::{install_refresh_rules, remove_refresh_rules};
