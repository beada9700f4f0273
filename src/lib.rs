//! Materialized views for an embedded relational engine.
//!
//! Views are stored as catalog entities with their query text, compiled
//! into plans, tracked in a bidirectional dependency graph and recompiled
//! in cascade when something they read changes shape. Views over distinct
//! base tables get a backing store kept current row by row by refresh
//! rules; everything else is evaluated on scan.
//!
//! ```rust,ignore
//! use matview::Database;
//!
//! let db = Database::default();
//! db.execute("CREATE TABLE employee (id INT, name VARCHAR(50))")?;
//! db.execute("CREATE TABLE location (id INT, location VARCHAR(50))")?;
//! db.execute(
//!     "CREATE MATERIALIZED VIEW emp_loc AS \
//!      SELECT e.name, l.location FROM employee e JOIN location l ON e.id = l.id",
//! )?;
//! db.execute("INSERT INTO employee VALUES (2, 'Wes Janson')")?;
//! let rows = db.scan("emp_loc")?;
//! ```

mod audit;
pub mod catalog;
pub mod config;
pub mod database;
pub mod ddl;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod parser;
pub mod refresh;
pub mod schema;
pub mod session;
pub mod trigger;
pub mod validation;
pub mod view;


pub use audit::{AuditEntry, AuditLog, AuditOperation};
pub use config::MatViewConfig;
pub use database::{Database, StatementResult, WriteOutcome};
pub use error::{MatViewError, MatViewResult};
pub use metadata::CatalogSnapshot;
pub use schema::{Column, DataType, Row, Value};
pub use session::Session;
pub use view::{MaterializedView, ViewStatus};

/// Version of the matview crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
