use super::shared::{self, ConflictVerb, DateFormatter};
use super::{type_table, GuardStyle, ObjectName, SqlDialect, TempTableStyle};
use crate::lexer::{BlobStyle, QuoteStyle, RenderStyle};
use crate::rules::{ReturningStyle, Rule};
use crate::typemap::{bool_to_int, TypeMapping};

/// SQL Server 2017 and later.
pub struct SqlServerDialect;

const TYPES: &[(&str, &str)] = &[
    ("INTEGER", "INT"),
    ("INT", "INT"),
    ("TINYINT", "TINYINT"),
    ("SMALLINT", "SMALLINT"),
    ("MEDIUMINT", "INT"),
    ("BIGINT", "BIGINT"),
    ("UNSIGNED BIG INT", "DECIMAL(20,0)"),
    ("INT2", "SMALLINT"),
    ("INT8", "BIGINT"),
    ("REAL", "FLOAT"),
    ("DOUBLE", "FLOAT"),
    ("DOUBLE PRECISION", "FLOAT"),
    ("FLOAT", "FLOAT"),
    ("NUMERIC", "NUMERIC"),
    ("DECIMAL", "DECIMAL"),
    ("TEXT", "NVARCHAR(MAX)"),
    ("CHARACTER", "NCHAR"),
    ("CHAR", "NCHAR"),
    ("VARCHAR", "NVARCHAR"),
    ("VARYING CHARACTER", "NVARCHAR"),
    ("NCHAR", "NCHAR"),
    ("NATIVE CHARACTER", "NCHAR"),
    ("NVARCHAR", "NVARCHAR"),
    ("CLOB", "NVARCHAR(MAX)"),
    ("BLOB", "VARBINARY(MAX)"),
    ("DATE", "DATE"),
    ("DATETIME", "DATETIME2"),
    ("TIMESTAMP", "DATETIME2"),
    ("TIME", "TIME"),
    ("JSON", "NVARCHAR(MAX)"),
    ("UUID", "UNIQUEIDENTIFIER"),
];

const SIZED: &[&str] = &["NUMERIC", "DECIMAL", "NCHAR", "NVARCHAR"];

const DATE_CODES: &[(char, &str)] = &[
    ('Y', "yyyy"),
    ('m', "MM"),
    ('d', "dd"),
    ('H', "HH"),
    ('M', "mm"),
    ('S', "ss"),
    ('f', "ss.fff"),
    ('%', "%"),
];

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn render_style(&self) -> RenderStyle {
        RenderStyle {
            quote: QuoteStyle::Bracket,
            blob: BlobStyle::Hex0x,
            backslash_escapes: false,
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
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

    fn offset_requires_order_by(&self) -> bool {
        true
    }

    fn supports_limit_keyword(&self) -> bool {
        false
    }

    fn returning_style(&self) -> ReturningStyle {
        ReturningStyle::Output
    }

    fn type_mappings(&self) -> Vec<TypeMapping> {
        let mut types = type_table(TYPES, SIZED);
        types.push(TypeMapping::new("BOOLEAN", "BIT").fixed().with_converter(bool_to_int));
        types.push(TypeMapping::new("BOOL", "BIT").fixed().with_converter(bool_to_int));
        types
    }

    fn fallback_type(&self) -> &'static str {
        "NVARCHAR(MAX)"
    }

    fn rules(&self) -> Vec<Rule> {
        vec![
            shared::now_function("datetime-now", "datetime", "GETDATE()"),
            shared::now_function("date-now", "date", "CAST(GETDATE() AS DATE)"),
            shared::now_function("time-now", "time", "CAST(GETDATE() AS TIME)"),
            shared::strftime_rule(DateFormatter {
                codes: DATE_CODES,
                now: "GETDATE()",
                epoch: |t| format!("DATEDIFF(SECOND, '1970-01-01', {})", t),
                format: |t, f| format!("FORMAT(CAST({} AS DATETIME2), {})", t, f),
            }),
            shared::rename("ifnull", "IFNULL", "ISNULL"),
            shared::group_concat_rule(|e, s| format!("STRING_AGG({}, {})", e, s)),
            Rule::function("substr", "SUBSTR", |call, ctx| match call.args.as_slice() {
                [s, start] => Ok(Some(format!("SUBSTRING({}, {}, LEN({}))", s, start, s))),
                [s, start, len] => Ok(Some(format!("SUBSTRING({}, {}, {})", s, start, len))),
                _ => Err(ctx.translation_error("substr expects two or three arguments")),
            }),
            shared::rename("length", "LENGTH", "LEN"),
            Rule::function("instr", "INSTR", |call, ctx| match call.args.as_slice() {
                [haystack, needle] => Ok(Some(format!("CHARINDEX({}, {})", needle, haystack))),
                _ => Err(ctx.translation_error("instr expects two arguments")),
            }),
            shared::replace_call("random", "RANDOM", "CHECKSUM(NEWID())"),
            shared::replace_call("last-insert-rowid", "LAST_INSERT_ROWID", "SCOPE_IDENTITY()"),
            shared::rename("json-extract", "JSON_EXTRACT", "JSON_VALUE"),
            shared::concat_operator(),
            shared::bool_literals(),
            shared::insert_or_rule(ConflictVerb::Unsupported, ConflictVerb::Unsupported),
            shared::upsert_unsupported(),
            shared::transaction_verbs("BEGIN TRANSACTION"),
        ]
        .into_iter()
        .chain(shared::null_safe_is(
            |l, r| format!("({l} = {r} OR ({l} IS NULL AND {r} IS NULL))", l = l, r = r),
            |l, r| format!("NOT ({l} = {r} OR ({l} IS NULL AND {r} IS NULL))", l = l, r = r),
        ))
        .collect()
    }

    fn identity_column(&self, autoincrement: bool) -> String {
        if autoincrement {
            "BIGINT IDENTITY(1,1) PRIMARY KEY".to_string()
        } else {
            "INT IDENTITY(1,1) PRIMARY KEY".to_string()
        }
    }

    fn temp_table_style(&self) -> TempTableStyle {
        TempTableStyle::HashPrefix
    }

    fn table_guard(&self) -> GuardStyle {
        GuardStyle::Catalog
    }

    fn index_guard(&self) -> GuardStyle {
        GuardStyle::Catalog
    }

    fn collation(&self, sqlite: &str) -> Option<&'static str> {
        match sqlite.to_ascii_uppercase().as_str() {
            "NOCASE" => Some("SQL_Latin1_General_CP1_CI_AS"),
            "BINARY" => Some("Latin1_General_BIN2"),
            _ => None,
        }
    }

    fn view_replace_keyword(&self) -> &'static str {
        "OR ALTER"
    }

    fn drop_index_needs_table(&self) -> bool {
        true
    }

    fn add_column(&self, table: &ObjectName, definition: &str) -> String {
        format!("ALTER TABLE {} ADD {}", table.token, definition)
    }

    fn rename_table(&self, table: &ObjectName, to: &ObjectName) -> String {
        format!(
            "EXEC sp_rename {}, {}",
            shared::quote_str(&table.plain),
            shared::quote_str(&to.plain)
        )
    }

    fn rename_column(&self, table: &ObjectName, from: &ObjectName, to: &ObjectName) -> String {
        format!(
            "EXEC sp_rename {}, {}, 'COLUMN'",
            shared::quote_str(&format!("{}.{}", table.plain, from.plain)),
            shared::quote_str(&to.plain)
        )
    }
}
