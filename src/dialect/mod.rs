//! Target dialects.
//!
//! A [`SqlDialect`] describes one engine: how identifiers and placeholders
//! are written, how pagination and RETURNING are expressed, its column type
//! table, the function and operator rules for DML, and the hooks the schema
//! rewriter calls for DDL shapes that differ between engines.

mod mssql;
mod mysql;
mod oracle;
mod postgres;
pub(crate) mod shared;

pub use mssql::SqlServerDialect;
pub use mysql::MySqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ShiftError;
use crate::lexer::RenderStyle;
use crate::options::PluginOptions;
use crate::rules::{ReturningStyle, Rule, RuleSet};
use crate::typemap::{TypeMapper, TypeMapping};

/// How `CREATE TEMP TABLE` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempTableStyle {
    /// `CREATE TEMPORARY TABLE name`
    Temporary,
    /// `CREATE TABLE #name`
    HashPrefix,
    /// `CREATE GLOBAL TEMPORARY TABLE name (...) ON COMMIT PRESERVE ROWS`
    GlobalTemporary,
}

/// How `IF NOT EXISTS` on CREATE TABLE / CREATE INDEX is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStyle {
    /// The clause is accepted as written.
    Native,
    /// No equivalent; the clause is dropped with a warning.
    Unsupported,
    /// Wrapped in a catalog lookup (`IF OBJECT_ID(...) IS NULL`).
    Catalog,
}

/// A table or column name as it appears in masked text, with its plain name.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectName {
    /// The masked token (a bare word or a quoted-identifier sentinel).
    pub token: String,
    pub plain: String,
}

/// Everything that differs between target engines.
pub trait SqlDialect: Send + Sync {
    /// Canonical dialect name (`postgresql`, `mysql`, `mssql`, `oracle`).
    fn name(&self) -> &'static str;

    /// How masked literals and identifiers are written back.
    fn render_style(&self) -> RenderStyle;

    /// The placeholder for a 1-based parameter index (`$1`, `?`, `@p1`, `:1`).
    fn placeholder(&self, index: usize) -> String;

    /// Whether placeholders carry their index; `false` for bare `?`.
    fn numbered_placeholders(&self) -> bool {
        true
    }

    fn bool_literal(&self, val: bool) -> String {
        if val { "TRUE".to_string() } else { "FALSE".to_string() }
    }

    /// Pagination suffix, with a leading space, or empty for neither.
    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        let mut sql = String::new();
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }
        sql
    }

    /// OFFSET/FETCH is only valid after an ORDER BY.
    fn offset_requires_order_by(&self) -> bool {
        false
    }

    /// The target accepts `LIMIT <expr>` as written.
    fn supports_limit_keyword(&self) -> bool {
        true
    }

    fn returning_style(&self) -> ReturningStyle;

    /// Built-in column type table.
    fn type_mappings(&self) -> Vec<TypeMapping>;

    /// Generic text type used for unmapped column types.
    fn fallback_type(&self) -> &'static str;

    /// Type mapper with the options' custom mappings layered on top.
    fn type_mapper(&self, options: &PluginOptions) -> TypeMapper {
        TypeMapper::new(self.name(), self.type_mappings(), self.fallback_type())
            .with_custom(options.custom_type_mappings.clone())
            .verbose(options.verbose)
    }

    /// Target type for `CAST(x AS type)`.
    fn cast_type(&self, source: &str, types: &TypeMapper) -> String {
        types.map_type(source)
    }

    /// Function, operator and transform rules for DML.
    fn rules(&self) -> Vec<Rule>;

    /// The complete rule set: shared rules, dialect rules, then the fixed
    /// pagination, RETURNING and placeholder stages.
    fn rule_set(&self) -> RuleSet {
        let mut rules = shared::common_rules();
        rules.extend(self.rules());
        rules.push(Rule::pagination());
        rules.push(Rule::returning());
        rules.push(Rule::placeholders());
        RuleSet::new(rules)
    }

    /// Column definition replacing `INTEGER PRIMARY KEY [AUTOINCREMENT]`.
    fn identity_column(&self, autoincrement: bool) -> String;

    fn temp_table_style(&self) -> TempTableStyle {
        TempTableStyle::Temporary
    }

    fn table_guard(&self) -> GuardStyle {
        GuardStyle::Native
    }

    fn index_guard(&self) -> GuardStyle {
        GuardStyle::Native
    }

    /// `CREATE INDEX ... WHERE expr` is accepted.
    fn partial_indexes(&self) -> bool {
        true
    }

    /// Target collation for a SQLite collation name; `None` strips it.
    fn collation(&self, _sqlite: &str) -> Option<&'static str> {
        None
    }

    /// `ON UPDATE` referential actions are accepted.
    fn on_update_actions(&self) -> bool {
        true
    }

    /// `DEFERRABLE` on foreign keys is accepted.
    fn deferrable_constraints(&self) -> bool {
        false
    }

    /// Keyword pair standing in for `CREATE VIEW IF NOT EXISTS`.
    fn view_replace_keyword(&self) -> &'static str {
        "OR REPLACE"
    }

    /// `CREATE TEMP VIEW` is accepted.
    fn temporary_views(&self) -> bool {
        false
    }

    /// `DROP INDEX` requires the table name.
    fn drop_index_needs_table(&self) -> bool {
        false
    }

    fn add_column(&self, table: &ObjectName, definition: &str) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", table.token, definition)
    }

    fn rename_table(&self, table: &ObjectName, to: &ObjectName) -> String {
        format!("ALTER TABLE {} RENAME TO {}", table.token, to.token)
    }

    fn rename_column(&self, table: &ObjectName, from: &ObjectName, to: &ObjectName) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            table.token, from.token, to.token
        )
    }
}

/// Built-in target dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MySql,
    SqlServer,
    Oracle,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::SqlServer,
        Dialect::Oracle,
    ];

    pub fn build(&self) -> Arc<dyn SqlDialect> {
        match self {
            Dialect::Postgres => Arc::new(PostgresDialect),
            Dialect::MySql => Arc::new(MySqlDialect),
            Dialect::SqlServer => Arc::new(SqlServerDialect),
            Dialect::Oracle => Arc::new(OracleDialect),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::MySql => "mysql",
            Dialect::SqlServer => "mssql",
            Dialect::Oracle => "oracle",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = ShiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "mssql" => Ok(Dialect::SqlServer),
            "oracle" => Ok(Dialect::Oracle),
            _ => Err(ShiftError::UnknownDialect(s.to_string())),
        }
    }
}

/// Canonical registry name for a dialect string, resolving aliases.
pub fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "postgres" | "pg" | "pgsql" => "postgresql".to_string(),
        "sqlserver" | "sql-server" | "tsql" => "mssql".to_string(),
        "mariadb" => "mysql".to_string(),
        _ => lower,
    }
}

/// Build a type table; sizes are only carried to targets listed in `sized`.
pub(crate) fn type_table(entries: &[(&str, &str)], sized: &[&str]) -> Vec<TypeMapping> {
    entries
        .iter()
        .map(|(source, target)| {
            let mapping = TypeMapping::new(*source, *target);
            if sized.contains(target) { mapping } else { mapping.fixed() }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aliases() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("PG".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("sqlserver".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert!(matches!(
            "db2".parse::<Dialect>(),
            Err(ShiftError::UnknownDialect(_))
        ));
    }

    #[test]
    fn test_placeholder_styles() {
        let styles: Vec<String> = Dialect::ALL
            .iter()
            .map(|d| d.build().placeholder(2))
            .collect();
        assert_eq!(styles, vec!["$2", "?", "@p2", ":2"]);
    }

    #[test]
    fn test_every_dialect_covers_the_affinity_names() {
        for dialect in Dialect::ALL {
            let d = dialect.build();
            let types = d.type_mapper(&PluginOptions::default());
            for name in ["INTEGER", "TEXT", "REAL", "BLOB", "NUMERIC", "BOOLEAN", "DATETIME"] {
                assert!(types.lookup(name).is_some(), "{} lacks {}", d.name(), name);
            }
        }
    }

    #[test]
    fn test_rule_set_ends_with_placeholders() {
        for dialect in Dialect::ALL {
            let set = dialect.build().rule_set();
            assert_eq!(set.rules().last().map(|r| r.name), Some("placeholders"));
        }
    }
}
