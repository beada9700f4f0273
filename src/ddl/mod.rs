//! DDL operations on materialized views
//!
//! - **CREATE [OR REPLACE] [FORCE] MATERIALIZED VIEW**: compiles the
//!   definition, registers the view, sets up its backing store and refresh
//!   rules when the plan allows it
//! - **DROP MATERIALIZED VIEW [CASCADE]**: removes the view, its rules and
//!   backing store, then drops or invalidates dependents
//!
//! ## Sequence
//!
//! Create:
//! 1. Validate the name and resolve conflicts (IF NOT EXISTS, OR REPLACE)
//! 2. Compile; without FORCE a compile error fails the statement
//! 3. Reject dependency cycles unless recursion is permitted
//! 4. Register, bind the backing store, populate it, install rules
//! 5. Retry views that were invalid because this name did not exist
//!
//! Drop:
//! 1. With CASCADE, drop dependents depth-first
//! 2. Remove rules and the backing store, detach dependency edges
//! 3. Remove the catalog entry and invalidate cached plans
//! 4. Without CASCADE, force-recompile the dependents left behind

pub mod create;
pub mod drop;

pub use create::create_view;
pub use drop::drop_view;
