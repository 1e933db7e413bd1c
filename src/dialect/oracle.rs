use super::shared::{self, ConflictVerb, DateFormatter};
use super::{type_table, ObjectName, SqlDialect, TempTableStyle};
use crate::lexer::{BlobStyle, QuoteStyle, RenderStyle};
use crate::rules::expr::{find_keyword, leading_keyword};
use crate::rules::{ReturningStyle, Rule};
use crate::typemap::{bool_to_int, split_type, TypeMapper, TypeMapping};

/// Oracle Database 23ai.
pub struct OracleDialect;

const TYPES: &[(&str, &str)] = &[
    ("INTEGER", "NUMBER(19)"),
    ("INT", "NUMBER(10)"),
    ("TINYINT", "NUMBER(3)"),
    ("SMALLINT", "NUMBER(5)"),
    ("MEDIUMINT", "NUMBER(7)"),
    ("BIGINT", "NUMBER(19)"),
    ("UNSIGNED BIG INT", "NUMBER(20)"),
    ("INT2", "NUMBER(5)"),
    ("INT8", "NUMBER(19)"),
    ("REAL", "BINARY_DOUBLE"),
    ("DOUBLE", "BINARY_DOUBLE"),
    ("DOUBLE PRECISION", "BINARY_DOUBLE"),
    ("FLOAT", "BINARY_DOUBLE"),
    ("NUMERIC", "NUMBER"),
    ("DECIMAL", "NUMBER"),
    ("TEXT", "CLOB"),
    ("CHARACTER", "CHAR"),
    ("CHAR", "CHAR"),
    ("VARCHAR", "VARCHAR2"),
    ("VARYING CHARACTER", "VARCHAR2"),
    ("NCHAR", "NCHAR"),
    ("NATIVE CHARACTER", "NCHAR"),
    ("NVARCHAR", "NVARCHAR2"),
    ("CLOB", "CLOB"),
    ("BLOB", "BLOB"),
    ("DATE", "DATE"),
    ("DATETIME", "TIMESTAMP"),
    ("TIMESTAMP", "TIMESTAMP"),
    ("TIME", "TIMESTAMP"),
    ("JSON", "CLOB"),
    ("UUID", "VARCHAR2(36)"),
];

const SIZED: &[&str] = &["NUMBER", "CHAR", "VARCHAR2", "NCHAR", "NVARCHAR2", "TIMESTAMP"];

const DATE_CODES: &[(char, &str)] = &[
    ('Y', "YYYY"),
    ('m', "MM"),
    ('d', "DD"),
    ('H', "HH24"),
    ('M', "MI"),
    ('S', "SS"),
    ('f', "SS.FF3"),
    ('j', "DDD"),
    ('W', "WW"),
    ('%', "%"),
];

/// `SELECT` without a FROM clause reads from DUAL.
fn from_dual() -> Rule {
    Rule::transform("from-dual", &["SELECT"], |stmt, _| {
        let text = stmt.text();
        if leading_keyword(text) != "SELECT"
            || find_keyword(text, "FROM", 0).is_some()
            || find_keyword(text, "UNION", 0).is_some()
        {
            return Ok(());
        }
        shared::append_clause(stmt, "FROM DUAL");
        Ok(())
    })
}

impl SqlDialect for OracleDialect {
    fn name(&self) -> &'static str {
        "oracle"
    }

    fn render_style(&self) -> RenderStyle {
        RenderStyle {
            quote: QuoteStyle::DoubleQuote,
            blob: BlobStyle::HexToRaw,
            backslash_escapes: false,
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn bool_literal(&self, val: bool) -> String {
        if val { "1".to_string() } else { "0".to_string() }
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        let mut sql = String::new();
        if limit.is_some() || offset.is_some() {
            sql.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or("0")));
            if let Some(lim) = limit {
                sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", lim));
            }
        }
        sql
    }

    fn supports_limit_keyword(&self) -> bool {
        false
    }

    fn returning_style(&self) -> ReturningStyle {
        ReturningStyle::Emulate
    }

    fn type_mappings(&self) -> Vec<TypeMapping> {
        let mut types = type_table(TYPES, SIZED);
        types.push(TypeMapping::new("BOOLEAN", "NUMBER(1)").with_converter(bool_to_int));
        types.push(TypeMapping::new("BOOL", "NUMBER(1)").with_converter(bool_to_int));
        types
    }

    fn fallback_type(&self) -> &'static str {
        "CLOB"
    }

    fn cast_type(&self, source: &str, types: &TypeMapper) -> String {
        let (base, args) = split_type(source);
        match (base.as_str(), args) {
            ("TEXT" | "VARCHAR" | "CLOB", None) => "VARCHAR2(4000)".to_string(),
            _ => types.map_type(source),
        }
    }

    fn rules(&self) -> Vec<Rule> {
        vec![
            shared::now_function("datetime-now", "datetime", "CURRENT_TIMESTAMP"),
            shared::now_function("date-now", "date", "TRUNC(SYSDATE)"),
            shared::now_function("time-now", "time", "TO_CHAR(SYSDATE, 'HH24:MI:SS')"),
            shared::strftime_rule(DateFormatter {
                codes: DATE_CODES,
                now: "CURRENT_TIMESTAMP",
                epoch: |t| {
                    format!(
                        "ROUND((CAST({} AS DATE) - DATE '1970-01-01') * 86400)",
                        t
                    )
                },
                format: |t, f| format!("TO_CHAR({}, {})", t, f),
            }),
            shared::rename("ifnull", "IFNULL", "NVL"),
            shared::iif_to_case(),
            shared::group_concat_rule(|e, s| {
                format!("LISTAGG({}, {}) WITHIN GROUP (ORDER BY NULL)", e, s)
            }),
            shared::replace_call("random", "RANDOM", "DBMS_RANDOM.RANDOM"),
            Rule::function("last-insert-rowid", "LAST_INSERT_ROWID", |_, ctx| {
                ctx.degrade("last_insert_rowid() has no Oracle equivalent")?;
                Ok(None)
            }),
            shared::rename("json-extract", "JSON_EXTRACT", "JSON_VALUE"),
            shared::bool_literals(),
            shared::insert_or_rule(ConflictVerb::Unsupported, ConflictVerb::Unsupported),
            shared::upsert_unsupported(),
            from_dual(),
            shared::transaction_verbs("SET TRANSACTION READ WRITE"),
        ]
        .into_iter()
        .chain(shared::null_safe_is(
            |l, r| format!("DECODE({}, {}, 1, 0) = 1", l, r),
            |l, r| format!("DECODE({}, {}, 1, 0) = 0", l, r),
        ))
        .collect()
    }

    fn identity_column(&self, autoincrement: bool) -> String {
        let width = if autoincrement { 19 } else { 10 };
        format!("NUMBER({}) GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY", width)
    }

    fn temp_table_style(&self) -> TempTableStyle {
        TempTableStyle::GlobalTemporary
    }

    fn partial_indexes(&self) -> bool {
        false
    }

    fn on_update_actions(&self) -> bool {
        false
    }

    fn deferrable_constraints(&self) -> bool {
        true
    }

    fn add_column(&self, table: &ObjectName, definition: &str) -> String {
        format!("ALTER TABLE {} ADD ({})", table.token, definition)
    }
}
