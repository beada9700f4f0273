//! Refresh Module: row-level maintenance of view backing stores
//!
//! A view whose plan reads only base tables gets a physical backing store
//! and one [`RefreshRule`] per table it reads. On every row change of a
//! bound table the rule runs a derived read with the changed table pinned
//! to the changed row image and folds the result into the backing store.
//!
//! ## Outcomes
//!
//! | Change | Outcome |
//! |--------|---------|
//! | INSERT | derived rows appended (`Each`), or exactly one (`ExactlyOne`) |
//! | UPDATE of projected columns only | backing rows updated in place, located by their old image |
//! | UPDATE of a join or filter column | backing marked stale, rebuilt on next scan |
//! | DELETE | backing marked stale, rebuilt on next scan |
//!
//! Failures are never retried and never fail the triggering write; the
//! backing store is marked stale instead (see [`crate::trigger`]).

pub mod bulk;
pub mod main;
pub mod rule;

use serde::{Deserialize, Serialize};

pub use main::fire;
pub use rule::{derive_rules, is_backable, RefreshRule};

/// How an insert folds derived rows into the backing store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Append every derived row
    #[default]
    Each,
    /// Exactly one derived row is expected; anything else is a cardinality violation
    ExactlyOne,
}

/// What firing one rule did to the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Appended(usize),
    Updated(usize),
    Unchanged,
    /// The change cannot be folded in row by row
    RebuildRequired(String),
}
