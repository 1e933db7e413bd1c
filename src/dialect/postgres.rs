use once_cell::sync::Lazy;
use regex::Regex;

use super::shared::{self, ConflictVerb, DateFormatter};
use super::{type_table, SqlDialect};
use crate::lexer::{BlobStyle, QuoteStyle, RenderStyle};
use crate::options::Feature;
use crate::rules::{ReturningStyle, Rule};
use crate::typemap::TypeMapping;

/// PostgreSQL.
pub struct PostgresDialect;

const TYPES: &[(&str, &str)] = &[
    ("INTEGER", "INTEGER"),
    ("INT", "INTEGER"),
    ("TINYINT", "SMALLINT"),
    ("SMALLINT", "SMALLINT"),
    ("MEDIUMINT", "INTEGER"),
    ("BIGINT", "BIGINT"),
    ("UNSIGNED BIG INT", "NUMERIC(20)"),
    ("INT2", "SMALLINT"),
    ("INT8", "BIGINT"),
    ("REAL", "DOUBLE PRECISION"),
    ("DOUBLE", "DOUBLE PRECISION"),
    ("DOUBLE PRECISION", "DOUBLE PRECISION"),
    ("FLOAT", "DOUBLE PRECISION"),
    ("NUMERIC", "NUMERIC"),
    ("DECIMAL", "DECIMAL"),
    ("BOOLEAN", "BOOLEAN"),
    ("BOOL", "BOOLEAN"),
    ("TEXT", "TEXT"),
    ("CHARACTER", "CHAR"),
    ("CHAR", "CHAR"),
    ("VARCHAR", "VARCHAR"),
    ("VARYING CHARACTER", "VARCHAR"),
    ("NCHAR", "CHAR"),
    ("NATIVE CHARACTER", "CHAR"),
    ("NVARCHAR", "VARCHAR"),
    ("CLOB", "TEXT"),
    ("BLOB", "BYTEA"),
    ("DATE", "DATE"),
    ("DATETIME", "TIMESTAMP"),
    ("TIMESTAMP", "TIMESTAMP"),
    ("TIME", "TIME"),
    ("JSON", "JSONB"),
    ("UUID", "UUID"),
];

const SIZED: &[&str] = &["CHAR", "VARCHAR", "NUMERIC", "DECIMAL", "TIMESTAMP", "TIME"];

const DATE_CODES: &[(char, &str)] = &[
    ('Y', "YYYY"),
    ('m', "MM"),
    ('d', "DD"),
    ('H', "HH24"),
    ('M', "MI"),
    ('S', "SS"),
    ('f', "SS.MS"),
    ('j', "DDD"),
    ('W', "WW"),
    ('%', "%"),
];

static JSON_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$((?:\.[A-Za-z_][A-Za-z0-9_]*|\[\d+\])*)$").expect("valid json path regex")
});
static JSON_STEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z_][A-Za-z0-9_]*)|\[(\d+)\]").expect("valid json step regex"));

fn json_extract() -> Rule {
    Rule::function("json-extract", "JSON_EXTRACT", |call, ctx| {
        let (Some(doc), Some(path)) = (call.args.first(), call.string_arg(1)) else {
            ctx.degrade("json_extract() with a non-literal path")?;
            return Ok(None);
        };
        if call.args.len() != 2 || !JSON_PATH.is_match(path) {
            ctx.degrade(format!("json_extract() path '{}'", path))?;
            return Ok(None);
        }
        let steps: Vec<&str> = JSON_STEP
            .captures_iter(path)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str()))
            .collect();
        Ok(Some(format!(
            "(({})::jsonb #>> '{{{}}}')",
            doc,
            steps.join(",")
        )))
    })
}

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn render_style(&self) -> RenderStyle {
        RenderStyle {
            quote: QuoteStyle::DoubleQuote,
            blob: BlobStyle::PgHex,
            backslash_escapes: false,
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn returning_style(&self) -> ReturningStyle {
        ReturningStyle::Native
    }

    fn type_mappings(&self) -> Vec<TypeMapping> {
        type_table(TYPES, SIZED)
    }

    fn fallback_type(&self) -> &'static str {
        "TEXT"
    }

    fn rules(&self) -> Vec<Rule> {
        let mut rules = vec![
            shared::now_function("datetime-now", "datetime", "CURRENT_TIMESTAMP"),
            shared::now_function("date-now", "date", "CURRENT_DATE"),
            shared::now_function("time-now", "time", "CURRENT_TIME"),
            shared::strftime_rule(DateFormatter {
                codes: DATE_CODES,
                now: "CURRENT_TIMESTAMP",
                epoch: |t| format!("CAST(EXTRACT(EPOCH FROM {}) AS BIGINT)", t),
                format: |t, f| format!("to_char(CAST({} AS TIMESTAMP), {})", t, f),
            }),
            shared::rename("ifnull", "IFNULL", "COALESCE"),
            shared::iif_to_case(),
            shared::group_concat_rule(|e, s| format!("string_agg(CAST({} AS TEXT), {})", e, s)),
            shared::rename("instr", "INSTR", "strpos"),
            shared::replace_call("last-insert-rowid", "LAST_INSERT_ROWID", "lastval()"),
            json_extract(),
            Rule::pattern("like", &["LIKE"], r"(?i)\bLIKE\b", "ILIKE").gated(Feature::Operator),
            shared::insert_or_rule(ConflictVerb::OnConflictDoNothing, ConflictVerb::Unsupported),
            shared::transaction_verbs("BEGIN"),
        ];
        rules.extend(shared::null_safe_is(
            |l, r| format!("{} IS NOT DISTINCT FROM {}", l, r),
            |l, r| format!("{} IS DISTINCT FROM {}", l, r),
        ));
        rules
    }

    fn identity_column(&self, autoincrement: bool) -> String {
        if autoincrement {
            "BIGSERIAL PRIMARY KEY".to_string()
        } else {
            "SERIAL PRIMARY KEY".to_string()
        }
    }

    fn collation(&self, sqlite: &str) -> Option<&'static str> {
        sqlite.eq_ignore_ascii_case("BINARY").then_some("\"C\"")
    }

    fn deferrable_constraints(&self) -> bool {
        true
    }

    fn temporary_views(&self) -> bool {
        true
    }
}
