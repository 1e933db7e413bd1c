use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use sqlshift::error::ErrorKind;
use sqlshift::prelude::*;
use tempfile::TempDir;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn context(dir: &TempDir) -> TranslationContext {
    TranslationContext::with_builtin_dialects(PluginOptions::default(), dir.path())
}

struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn count_warnings<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(count.clone()));
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, count.load(Ordering::SeqCst))
}

/// Executor over an in-memory table of single-column rows keyed from 1.
#[derive(Default)]
struct MemoryDb {
    rows: Mutex<Vec<SqlValue>>,
    seen: Mutex<Vec<(String, Vec<SqlValue>)>>,
}

impl MemoryDb {
    fn seen(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.seen.lock().unwrap().clone()
    }
}

impl Executor for MemoryDb {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> ShiftResult<ExecResult> {
        self.seen.lock().unwrap().push((sql.to_string(), params.to_vec()));
        if !sql.starts_with("INSERT") {
            return Err(ShiftError::Execution(format!("near \"{}\": syntax error", sql)));
        }
        let mut rows = self.rows.lock().unwrap();
        rows.push(params[0].clone());
        Ok(ExecResult {
            rows_affected: 1,
            last_insert_id: Some(rows.len() as i64),
            rows: Vec::new(),
        })
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> ShiftResult<Vec<Row>> {
        self.seen.lock().unwrap().push((sql.to_string(), params.to_vec()));
        let from = params[0].as_i64().unwrap_or(1);
        let to = params[1].as_i64().unwrap_or(from);
        let rows = self.rows.lock().unwrap();
        Ok((from..to)
            .filter_map(|id| rows.get(id as usize - 1))
            .map(|value| Row::new(vec!["a".into()], vec![value.clone()]))
            .collect())
    }
}

#[test]
fn test_schema_rewrite_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let sql = "CREATE TABLE IF NOT EXISTS [posts] (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n  title VARCHAR(120) NOT NULL,\n  published BOOLEAN DEFAULT FALSE,\n  author_id INTEGER REFERENCES users(id) ON DELETE CASCADE\n)";
    for dialect in ["postgresql", "mysql", "mssql", "oracle"] {
        let first = ctx.rewrite_schema(dialect, sql).unwrap();
        for _ in 0..3 {
            assert_eq!(ctx.rewrite_schema(dialect, sql).unwrap(), first);
        }
    }
}

#[test]
fn test_map_type_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    for dialect in ctx.registry().list_schema_plugins() {
        let plugin = ctx.registry().schema_plugin(&dialect).unwrap();
        for source in ["INTEGER", "varchar(255)", "DOUBLE PRECISION", "BLOB", "DATETIME"] {
            assert_eq!(plugin.map_type(source), plugin.map_type(source));
        }
    }
}

#[test]
fn test_placeholders_are_numbered_in_order() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let sql = "UPDATE t SET a = ?, b = ? WHERE c = ? AND d = ?";
    let params: Vec<SqlValue> = (1..=4).map(SqlValue::Int).collect();

    let pg = ctx.rewrite_query("postgresql", sql, &params).unwrap();
    assert_eq!(pg.sql, "UPDATE t SET a = $1, b = $2 WHERE c = $3 AND d = $4");
    assert_eq!(pg.params, params);

    let mssql = ctx.rewrite_query("mssql", sql, &params).unwrap();
    assert_eq!(mssql.sql, "UPDATE t SET a = @p1, b = @p2 WHERE c = @p3 AND d = @p4");

    let oracle = ctx.rewrite_query("oracle", sql, &params).unwrap();
    assert_eq!(oracle.sql, "UPDATE t SET a = :1, b = :2 WHERE c = :3 AND d = :4");
    assert_eq!(oracle.params.len(), 4);
}

#[test]
fn test_pagination_operands_are_inlined() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let params = [SqlValue::Int(10), SqlValue::Int(5)];
    for dialect in ["postgresql", "mysql"] {
        let out = ctx
            .rewrite_query(dialect, "SELECT * FROM t LIMIT ? OFFSET ?", &params)
            .unwrap();
        assert_eq!(out.sql, "SELECT * FROM t LIMIT 10 OFFSET 5");
        assert!(out.params.is_empty());
    }
}

#[test]
fn test_mysql_returning_is_stripped() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let out = ctx
        .rewrite_query(
            "mysql",
            "INSERT INTO t (a) VALUES (?) RETURNING a",
            &[SqlValue::Int(42)],
        )
        .unwrap();
    assert_eq!(out.sql, "INSERT INTO t (a) VALUES (?)");
    let info = out.returning.unwrap();
    assert_eq!(info.table, "t");
    assert_eq!(info.columns, vec!["a".to_string()]);
    assert_eq!(info.key_column, "id");
}

#[tokio::test]
async fn test_mysql_returning_follow_up_read() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let db = MemoryDb::default();
    let mut session = ctx.session("mysql");

    let value = SqlValue::Text("hello".into());
    let result = session
        .execute(&db, "INSERT INTO t (a) VALUES (?) RETURNING a", &[value.clone()])
        .await
        .unwrap();
    assert_eq!(result.rows, vec![Row::new(vec!["a".into()], vec![value])]);
    assert!(session.take_returning().is_none());

    let seen = db.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].0, "SELECT `a` FROM `t` WHERE `id` >= ? AND `id` < ?");
    assert_eq!(seen[1].1, vec![SqlValue::Int(1), SqlValue::Int(2)]);

    // the descriptor was consumed, so a second insert is accepted
    let second = session
        .execute(&db, "INSERT INTO t (a) VALUES (?) RETURNING a", &[SqlValue::Int(7)])
        .await
        .unwrap();
    assert_eq!(second.rows[0].get("a"), Some(&SqlValue::Int(7)));
}

#[test]
fn test_unknown_type_falls_back_with_one_warning() {
    let verbose = PluginOptions::builder().verbose(true).build();
    for dialect in Dialect::ALL {
        let plugin = DialectPlugin::builtin(dialect, verbose.clone());
        let (mapped, warnings) = count_warnings(|| plugin.schema.map_type("SOME_UNKNOWN_TYPE"));
        let fallback = match dialect {
            Dialect::Postgres | Dialect::MySql => "TEXT",
            Dialect::SqlServer => "NVARCHAR(MAX)",
            Dialect::Oracle => "CLOB",
        };
        assert_eq!(mapped, fallback);
        assert_eq!(warnings, 1);
    }
}

#[test]
fn test_missing_ddl_verb_is_logged_once() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    assert_eq!(ctx.errors().error_summary().unwrap().get("mysql"), None);

    let err = ctx
        .rewrite_schema("mysql", "TABLE users (id INTEGER PRIMARY KEY)")
        .unwrap_err();
    assert!(matches!(err, ShiftError::Translation { .. }));

    let records = ctx.errors().read_errors("mysql").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_type, ErrorKind::Translation);
    assert_eq!(records[0].dialect, "mysql");
    assert_eq!(ctx.errors().error_summary().unwrap().get("mysql"), Some(&1));

    let _ = ctx.rewrite_schema("mysql", "users (id INTEGER)");
    assert_eq!(ctx.errors().error_summary().unwrap().get("mysql"), Some(&2));
}

#[tokio::test]
async fn test_execution_failure_is_logged_once() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let db = MemoryDb::default();
    let mut session = ctx.session("pg");

    let err = session
        .execute(&db, "UPDATE t SET a = ? WHERE id = ?", &[SqlValue::Int(1), SqlValue::Int(2)])
        .await
        .unwrap_err();
    assert!(matches!(err, ShiftError::Execution(_)));

    let records = ctx.errors().read_errors("postgresql").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_type, ErrorKind::Execution);
    assert_eq!(records[0].original_sql, "UPDATE t SET a = ? WHERE id = ?");
    assert_eq!(
        records[0].rewritten_sql.as_deref(),
        Some("UPDATE t SET a = $1 WHERE id = $2")
    );
    assert_eq!(records[0].params, Some(vec![SqlValue::Int(1), SqlValue::Int(2)]));
}

#[test]
fn test_strict_mode_turns_warnings_into_errors() {
    let dir = TempDir::new().unwrap();
    let lenient = context(&dir);
    let sql = "CREATE INDEX IF NOT EXISTS idx_t_a ON t (a) WHERE a > 0";
    assert!(lenient.rewrite_schema("mysql", sql).is_ok());

    let strict = TranslationContext::with_builtin_dialects(
        PluginOptions::builder().strict(true).build(),
        dir.path(),
    );
    assert!(matches!(
        strict.rewrite_schema("mysql", sql),
        Err(ShiftError::Unsupported { .. })
    ));

    let query = "SELECT * FROM t WHERE a = :a";
    let out = lenient.rewrite_query("postgresql", query, &[]).unwrap();
    assert_eq!(out.warnings.len(), 1);
    assert!(matches!(
        strict.rewrite_query("postgresql", query, &[]),
        Err(ShiftError::Unsupported { .. })
    ));
}

#[test]
fn test_unrecognized_ddl_strict_parity() {
    let dir = TempDir::new().unwrap();
    let lenient = context(&dir);
    let strict = TranslationContext::with_builtin_dialects(
        PluginOptions::builder().strict(true).build(),
        dir.path(),
    );
    for sql in [
        "CREATE SEQUENCE s",
        "create sequence s",
        "ALTER TABLE t FOO BAR",
        "alter table t foo bar",
    ] {
        let (out, warnings) = count_warnings(|| lenient.rewrite_schema("postgresql", sql));
        assert_eq!(out.unwrap(), sql);
        assert_eq!(warnings, 1, "{}", sql);
        assert!(
            matches!(
                strict.rewrite_schema("postgresql", sql),
                Err(ShiftError::Unsupported { .. })
            ),
            "{}",
            sql
        );
    }
    // only the strict failures are logged
    let records = strict.errors().read_errors("postgresql").unwrap();
    assert_eq!(records.len(), 4);
}

#[test]
fn test_lowercase_keywords_translate_like_uppercase() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let upper = ctx
        .rewrite_query("mysql", "INSERT INTO t (a) VALUES (1) ON CONFLICT DO NOTHING", &[])
        .unwrap();
    let lower = ctx
        .rewrite_query("mysql", "insert into t (a) values (1) on conflict do nothing", &[])
        .unwrap();
    assert_eq!(upper.sql, "INSERT IGNORE INTO t (a) VALUES (1)");
    assert_eq!(lower.sql.to_ascii_uppercase(), upper.sql.to_ascii_uppercase());

    let strict = TranslationContext::with_builtin_dialects(
        PluginOptions::builder().strict(true).build(),
        dir.path(),
    );
    assert!(matches!(
        strict.rewrite_schema("mysql", "create index if not exists i on t (a) where a > 0"),
        Err(ShiftError::Unsupported { .. })
    ));
}

#[test]
fn test_translate_without_dialect_passes_through() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let sql = "SELECT group_concat(name, ', ') FROM t LIMIT ?";
    let out = ctx.translate(None, sql, &[SqlValue::Int(3)]).unwrap();
    assert_eq!(out.sql, sql);
    assert_eq!(out.params, vec![SqlValue::Int(3)]);
}

#[test]
fn test_custom_plugin_registration() {
    let dir = TempDir::new().unwrap();
    let ctx = TranslationContext::new(PluginOptions::default(), dir.path());
    assert!(matches!(
        ctx.translate(Some("pg"), "SELECT 1", &[]),
        Err(ShiftError::UnknownDialect(_))
    ));
    ctx.registry()
        .register_dialect(DialectPlugin::builtin(Dialect::Postgres, PluginOptions::default()));
    let out = ctx.translate(Some("postgres"), "SELECT a FROM t WHERE b == ?", &[SqlValue::Int(1)]).unwrap();
    assert_eq!(out.sql, "SELECT a FROM t WHERE b = $1");
}
