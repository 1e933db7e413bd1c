//! DML rewriting.

use std::cell::RefCell;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::dialect::SqlDialect;
use crate::error::ShiftResult;
use crate::lexer::{BlobStyle, QuoteStyle};
use crate::options::PluginOptions;
use crate::rules::{ReturningEmulationInfo, Rule, RuleCtx, RuleSet, Stage, Statement};
use crate::typemap::TypeMapper;
use crate::value::SqlValue;

/// A rewritten statement ready for the target driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewrittenQuery {
    pub sql: String,
    /// Parameters in target order, with inlined pagination operands removed.
    pub params: Vec<SqlValue>,
    /// Set when RETURNING must be recovered with a follow-up read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returning: Option<ReturningEmulationInfo>,
    /// Constructs degraded to a best-effort rewrite.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Rewrites SQLite-flavored DML for one target dialect.
pub trait QueryRewriter: Send + Sync {
    fn name(&self) -> &str;

    fn source_dialect(&self) -> &str {
        "sqlite"
    }

    /// Rewrite a statement without parameters.
    fn rewrite_query(&self, sql: &str) -> ShiftResult<String> {
        self.rewrite(sql, &[]).map(|q| q.sql)
    }

    fn rewrite(&self, sql: &str, params: &[SqlValue]) -> ShiftResult<RewrittenQuery>;

    /// Cheap pre-check: could any rule change this statement?
    fn needs_rewrite(&self, sql: &str) -> bool;

    /// Rewrite a single function call expression.
    fn rewrite_function(&self, call: &str) -> ShiftResult<String>;

    /// Rewrite a single operator expression.
    fn rewrite_operator(&self, expr: &str) -> ShiftResult<String>;
}

/// Rule-based query rewriter driven by a [`SqlDialect`].
pub struct DialectQueryRewriter {
    dialect: Arc<dyn SqlDialect>,
    rules: RuleSet,
    types: TypeMapper,
    options: PluginOptions,
}

impl DialectQueryRewriter {
    pub fn new(dialect: Arc<dyn SqlDialect>, options: PluginOptions) -> Self {
        Self {
            rules: dialect.rule_set(),
            types: dialect.type_mapper(&options),
            dialect,
            options,
        }
    }

    /// Add a rule after the existing rules of its stage.
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Drop a built-in rule by name.
    pub fn without_rule(mut self, name: &str) -> Self {
        self.rules.remove(name);
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn types(&self) -> &TypeMapper {
        &self.types
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    fn run(
        &self,
        sql: &str,
        params: &[SqlValue],
        stages: Option<&[Stage]>,
    ) -> ShiftResult<(Statement, Vec<String>)> {
        let warnings = RefCell::new(Vec::new());
        let ctx = RuleCtx::new(self.dialect.as_ref(), &self.types, &self.options, &warnings);
        let mut stmt = Statement::new(sql, params)?;
        if !stmt.named_placeholders.is_empty() {
            ctx.degrade(format!(
                "named placeholders ({})",
                stmt.named_placeholders.join(", ")
            ))?;
        }
        match stages {
            Some(stages) => self.rules.apply_stages(&mut stmt, stages, &ctx)?,
            None => self.rules.apply(&mut stmt, &ctx)?,
        }
        Ok((stmt, warnings.into_inner()))
    }
}

static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?\d").expect("valid regex"));

impl QueryRewriter for DialectQueryRewriter {
    fn name(&self) -> &str {
        self.dialect.name()
    }

    fn rewrite(&self, sql: &str, params: &[SqlValue]) -> ShiftResult<RewrittenQuery> {
        let (stmt, warnings) = self.run(sql, params, None)?;
        let out_sql = stmt.masked.finish(&self.dialect.render_style());
        let out_params = match stmt.output_params {
            Some(p) => p,
            None => stmt
                .params
                .iter()
                .enumerate()
                .filter(|(i, _)| !stmt.inlined.contains(i))
                .map(|(_, v)| v.clone())
                .collect(),
        };
        tracing::debug!("[{}] {} => {}", self.dialect.name(), sql.trim(), out_sql);
        Ok(RewrittenQuery {
            sql: out_sql,
            params: out_params,
            returning: stmt.returning,
            warnings,
        })
    }

    fn needs_rewrite(&self, sql: &str) -> bool {
        let style = self.dialect.render_style();
        let foreign_quote: &[char] = match style.quote {
            QuoteStyle::DoubleQuote => &['`', '['],
            QuoteStyle::Backtick => &['"', '['],
            QuoteStyle::Bracket => &['"', '`'],
        };
        let placeholders = sql.contains('?')
            && (self.dialect.numbered_placeholders() || NUMBERED.is_match(sql));
        let blobs = style.blob != BlobStyle::XQuote && (sql.contains("x'") || sql.contains("X'"));
        placeholders
            || blobs
            || sql.contains(foreign_quote)
            || (style.backslash_escapes && sql.contains('\\'))
            || self.rules.triggered(sql)
    }

    fn rewrite_function(&self, call: &str) -> ShiftResult<String> {
        let (stmt, _) = self.run(call, &[], Some(&[Stage::Function]))?;
        Ok(stmt.masked.finish(&self.dialect.render_style()))
    }

    fn rewrite_operator(&self, expr: &str) -> ShiftResult<String> {
        let (stmt, _) = self.run(expr, &[], Some(&[Stage::Operator]))?;
        Ok(stmt.masked.finish(&self.dialect.render_style()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::error::ShiftError;
    use pretty_assertions::assert_eq;

    fn rewriter(dialect: Dialect) -> DialectQueryRewriter {
        DialectQueryRewriter::new(dialect.build(), PluginOptions::default())
    }

    #[test]
    fn test_literals_never_rewritten() {
        let pg = rewriter(Dialect::Postgres);
        assert_eq!(
            pg.rewrite_query("SELECT 'ifnull(a, b) LIKE ?' FROM t WHERE x LIKE 'a'").unwrap(),
            "SELECT 'ifnull(a, b) LIKE ?' FROM t WHERE x ILIKE 'a'"
        );
    }

    #[test]
    fn test_sequential_placeholders() {
        let pg = rewriter(Dialect::Postgres);
        let params: Vec<SqlValue> = (1..=4).map(SqlValue::Int).collect();
        let out = pg
            .rewrite("INSERT INTO t VALUES (?, ?, ?, ?)", &params)
            .unwrap();
        assert_eq!(out.sql, "INSERT INTO t VALUES ($1, $2, $3, $4)");
        assert_eq!(out.params.len(), 4);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_named_placeholders_degrade() {
        let pg = rewriter(Dialect::Postgres);
        let out = pg.rewrite("SELECT * FROM t WHERE a = :a", &[]).unwrap();
        assert_eq!(out.warnings.len(), 1);

        let strict = DialectQueryRewriter::new(
            Dialect::Postgres.build(),
            PluginOptions::builder().strict(true).build(),
        );
        let err = strict.rewrite("SELECT * FROM t WHERE a = :a", &[]).unwrap_err();
        assert!(matches!(err, ShiftError::Unsupported { .. }));
    }

    #[test]
    fn test_needs_rewrite() {
        let pg = rewriter(Dialect::Postgres);
        assert!(!pg.needs_rewrite("SELECT a FROM t"));
        assert!(pg.needs_rewrite("SELECT a FROM t WHERE b = ?"));
        assert!(pg.needs_rewrite("SELECT ifnull(a, 0) FROM t"));
        assert!(pg.needs_rewrite("SELECT `a` FROM t"));

        let mysql = rewriter(Dialect::MySql);
        assert!(!mysql.needs_rewrite("SELECT a FROM t WHERE b = ?"));
        assert!(mysql.needs_rewrite("SELECT \"a\" FROM t"));
    }

    #[test]
    fn test_rewrite_function_and_operator() {
        let mssql = rewriter(Dialect::SqlServer);
        assert_eq!(mssql.rewrite_function("ifnull(a, 'x')").unwrap(), "ISNULL(a, 'x')");
        assert_eq!(mssql.rewrite_operator("a || b").unwrap(), "CONCAT(a, b)");
        assert_eq!(mssql.rewrite_operator("ifnull(a, b)").unwrap(), "ifnull(a, b)");
    }

    #[test]
    fn test_custom_rule_and_removal() {
        let pg = rewriter(Dialect::Postgres)
            .with_rule(crate::dialect::shared::rename("nvl", "NVL", "COALESCE"))
            .without_rule("like");
        assert_eq!(
            pg.rewrite_query("SELECT nvl(a, b) FROM t WHERE a LIKE 'x%'").unwrap(),
            "SELECT COALESCE(a, b) FROM t WHERE a LIKE 'x%'"
        );
    }

    #[test]
    fn test_deterministic_output() {
        let oracle = rewriter(Dialect::Oracle);
        let sql = "SELECT group_concat(a), ifnull(b, ?) FROM t LIMIT 5";
        let first = oracle.rewrite(sql, &[SqlValue::Int(1)]).unwrap();
        for _ in 0..3 {
            assert_eq!(oracle.rewrite(sql, &[SqlValue::Int(1)]).unwrap(), first);
        }
    }
}
