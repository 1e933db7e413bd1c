//! # sqlshift
//!
//! Run SQLite-flavored SQL against PostgreSQL, MySQL, SQL Server and Oracle.
//!
//! Statements are rewritten by an ordered set of rules per target dialect:
//! functions, operators, statement transforms, pagination, RETURNING and
//! placeholder renumbering. DDL goes through a schema rewriter that maps
//! column types and identity columns.
//!
//! ## Quick Example
//!
//! ```rust
//! use sqlshift::prelude::*;
//!
//! let ctx = TranslationContext::with_builtin_dialects(PluginOptions::default(), "logs");
//! let out = ctx
//!     .translate(Some("postgresql"), "SELECT * FROM users WHERE id = ? LIMIT 10", &[SqlValue::Int(7)])
//!     .unwrap();
//! assert_eq!(out.sql, "SELECT * FROM users WHERE id = $1 LIMIT 10");
//! ```
//!
//! ## Dialects
//!
//! | Name         | Aliases                 | Placeholders | RETURNING        |
//! |--------------|-------------------------|--------------|------------------|
//! | `postgresql` | `postgres`, `pg`        | `$1`         | native           |
//! | `mysql`      | `mariadb`               | `?`          | follow-up read   |
//! | `mssql`      | `sqlserver`             | `@p1`        | `OUTPUT`         |
//! | `oracle`     |                         | `:1`         | follow-up read   |

pub mod config;
pub mod context;
pub mod dialect;
pub mod engine;
pub mod errlog;
pub mod error;
pub mod lexer;
pub mod options;
pub mod query;
pub mod registry;
pub mod rules;
pub mod schema;
pub mod typemap;
pub mod value;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::{Session, Translation, TranslationContext};
    pub use crate::dialect::{Dialect, SqlDialect};
    pub use crate::engine::{ExecResult, Executor, Row, SqlxExecutor};
    pub use crate::errlog::{ErrorLog, TranslationErrorRecord};
    pub use crate::error::*;
    pub use crate::options::{Feature, PluginOptions};
    pub use crate::query::{QueryRewriter, RewrittenQuery};
    pub use crate::registry::{DialectPlugin, Registry};
    pub use crate::rules::ReturningEmulationInfo;
    pub use crate::schema::SchemaRewriter;
    pub use crate::typemap::TypeMapping;
    pub use crate::value::SqlValue;
}
