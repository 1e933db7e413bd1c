//! Translation entry point.
//!
//! A [`TranslationContext`] owns the plugin registry, the error log and the
//! default options. A [`Session`] borrows a context for one logical
//! connection and holds the RETURNING descriptor between the rewritten
//! INSERT and its follow-up read.

use std::path::PathBuf;

use crate::config::Config;
use crate::engine::{ExecResult, Executor, Row};
use crate::errlog::ErrorLog;
use crate::error::{ShiftError, ShiftResult};
use crate::options::PluginOptions;
use crate::query::RewrittenQuery;
use crate::registry::Registry;
use crate::rules::ReturningEmulationInfo;
use crate::schema::is_schema_statement;
use crate::value::SqlValue;

/// A statement ready for the target, DDL or DML.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub returning: Option<ReturningEmulationInfo>,
    pub warnings: Vec<String>,
}

impl Translation {
    fn passthrough(sql: &str, params: &[SqlValue]) -> Self {
        Self {
            sql: sql.to_string(),
            params: params.to_vec(),
            returning: None,
            warnings: Vec::new(),
        }
    }
}

impl From<RewrittenQuery> for Translation {
    fn from(q: RewrittenQuery) -> Self {
        Self {
            sql: q.sql,
            params: q.params,
            returning: q.returning,
            warnings: q.warnings,
        }
    }
}

pub struct TranslationContext {
    registry: Registry,
    errors: ErrorLog,
    options: PluginOptions,
}

impl TranslationContext {
    /// A context with an empty registry.
    pub fn new(options: PluginOptions, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: Registry::new(),
            errors: ErrorLog::new(log_dir),
            options,
        }
    }

    /// A context with the four built-in dialects registered.
    pub fn with_builtin_dialects(options: PluginOptions, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: Registry::with_builtin_dialects(&options),
            errors: ErrorLog::new(log_dir),
            options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_builtin_dialects(config.options.clone(), config.log_dir())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    /// Rewrite a DDL statement. A failed rewrite is recorded in the error log.
    pub fn rewrite_schema(&self, dialect: &str, sql: &str) -> ShiftResult<String> {
        let plugin = self
            .registry
            .schema_plugin(dialect)
            .ok_or_else(|| ShiftError::UnknownDialect(dialect.to_string()))?;
        plugin
            .rewrite_schema(sql)
            .inspect_err(|e| self.errors.log_translation_error(plugin.name(), sql, e, None))
    }

    /// Rewrite a DML statement. A failed rewrite is recorded in the error log.
    pub fn rewrite_query(
        &self,
        dialect: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> ShiftResult<RewrittenQuery> {
        let plugin = self
            .registry
            .query_plugin(dialect)
            .ok_or_else(|| ShiftError::UnknownDialect(dialect.to_string()))?;
        plugin
            .rewrite(sql, params)
            .inspect_err(|e| self.errors.log_translation_error(plugin.name(), sql, e, None))
    }

    /// Route a statement to the schema or query rewriter by its leading
    /// keyword. Without a dialect the statement passes through unchanged.
    pub fn translate(
        &self,
        dialect: Option<&str>,
        sql: &str,
        params: &[SqlValue],
    ) -> ShiftResult<Translation> {
        let Some(dialect) = dialect else {
            return Ok(Translation::passthrough(sql, params));
        };
        if is_schema_statement(sql) {
            let rewritten = self.rewrite_schema(dialect, sql)?;
            Ok(Translation::passthrough(&rewritten, params))
        } else {
            self.rewrite_query(dialect, sql, params).map(Translation::from)
        }
    }

    pub fn session(&self, dialect: &str) -> Session<'_> {
        Session {
            ctx: self,
            dialect: dialect.to_string(),
            pending: None,
        }
    }
}

/// Per-connection translation state.
pub struct Session<'a> {
    ctx: &'a TranslationContext,
    dialect: String,
    pending: Option<ReturningEmulationInfo>,
}

impl Session<'_> {
    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// Translate a statement and keep its RETURNING descriptor, if any.
    ///
    /// A pending descriptor only survives until the next statement: preparing
    /// anything without RETURNING (or anything that fails to translate)
    /// discards it.
    pub fn prepare(&mut self, sql: &str, params: &[SqlValue]) -> ShiftResult<Translation> {
        let translation = match self.ctx.translate(Some(&self.dialect), sql, params) {
            Ok(translation) => translation,
            Err(e) => {
                self.discard_pending();
                return Err(e);
            }
        };
        match &translation.returning {
            Some(info) => {
                if let Some(pending) = &self.pending {
                    return Err(ShiftError::ReturningPending {
                        table: pending.table.clone(),
                    });
                }
                self.pending = Some(info.clone());
            }
            None => self.discard_pending(),
        }
        Ok(translation)
    }

    fn discard_pending(&mut self) {
        if let Some(info) = self.pending.take() {
            tracing::debug!(
                "[{}] dropping unused RETURNING descriptor for '{}'",
                self.dialect,
                info.table
            );
        }
    }

    /// Consume the pending RETURNING descriptor.
    pub fn take_returning(&mut self) -> Option<ReturningEmulationInfo> {
        self.pending.take()
    }

    /// Translate and run a statement. An emulated RETURNING clause is
    /// answered with a follow-up read, and its rows land in
    /// [`ExecResult::rows`].
    pub async fn execute<E: Executor>(
        &mut self,
        executor: &E,
        sql: &str,
        params: &[SqlValue],
    ) -> ShiftResult<ExecResult> {
        let translation = self.prepare(sql, params)?;
        let emulated = translation.returning.is_some();

        let result = match executor.execute(&translation.sql, &translation.params).await {
            Ok(result) => result,
            Err(e) => {
                if emulated {
                    self.pending = None;
                }
                self.ctx.errors.log_execution_error(
                    &self.dialect,
                    sql,
                    &translation.sql,
                    &e,
                    Some(&translation.params),
                );
                return Err(e);
            }
        };

        let Some(info) = emulated.then(|| self.take_returning()).flatten() else {
            return Ok(result);
        };
        let rows = self.returning_rows(executor, &info, &result).await?;
        Ok(ExecResult { rows, ..result })
    }

    async fn returning_rows<E: Executor>(
        &self,
        executor: &E,
        info: &ReturningEmulationInfo,
        result: &ExecResult,
    ) -> ShiftResult<Vec<Row>> {
        if let Some(first) = result.last_insert_id {
            let count = i64::try_from(result.rows_affected.max(1)).ok();
            let end = count.and_then(|c| first.checked_add(c)).ok_or_else(|| {
                ShiftError::Execution(format!(
                    "RETURNING key range for table '{}' overflows: last id {} + {} rows",
                    info.table, first, result.rows_affected
                ))
            })?;
            let sql = follow_up_sql(info);
            let params = [SqlValue::Int(first), SqlValue::Int(end)];
            let read = self.ctx.rewrite_query(&self.dialect, &sql, &params)?;
            tracing::debug!("[{}] RETURNING follow-up: {}", self.dialect, read.sql);
            return executor.query(&read.sql, &read.params).await.inspect_err(|e| {
                self.ctx.errors.log_execution_error(
                    &self.dialect,
                    &sql,
                    &read.sql,
                    e,
                    Some(&read.params),
                )
            });
        }
        if let Some(values) = &info.values {
            let columns: Vec<String> = if info.columns.iter().any(|c| c == "*") {
                values.keys().cloned().collect()
            } else {
                info.columns.clone()
            };
            let row_values = columns
                .iter()
                .map(|column| {
                    values
                        .iter()
                        .find(|(name, _)| name.eq_ignore_ascii_case(column))
                        .map_or(SqlValue::Null, |(_, v)| v.clone())
                })
                .collect();
            return Ok(vec![Row::new(columns, row_values)]);
        }
        Err(ShiftError::Execution(format!(
            "cannot read RETURNING rows for table '{}': no last-insert id and no inserted values",
            info.table
        )))
    }
}

/// SQLite-shaped read of the rows an emulated INSERT produced.
fn follow_up_sql(info: &ReturningEmulationInfo) -> String {
    let columns = if info.columns.iter().any(|c| c == "*") {
        "*".to_string()
    } else {
        info.columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let key = quote_ident(&info.key_column);
    format!(
        "SELECT {} FROM {} WHERE {} >= ? AND {} < ?",
        columns,
        quote_ident(&info.table),
        key,
        key
    )
}

fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
