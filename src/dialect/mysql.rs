use super::shared::{self, ConflictVerb, DateFormatter, EXCLUDED};
use super::{type_table, GuardStyle, SqlDialect};
use crate::lexer::{BlobStyle, QuoteStyle, RenderStyle};
use crate::rules::expr::find_keyword;
use crate::rules::{ReturningStyle, Rule};
use crate::typemap::{split_type, TypeMapper, TypeMapping};

/// MySQL 8.
pub struct MySqlDialect;

const TYPES: &[(&str, &str)] = &[
    ("INTEGER", "INT"),
    ("INT", "INT"),
    ("TINYINT", "TINYINT"),
    ("SMALLINT", "SMALLINT"),
    ("MEDIUMINT", "MEDIUMINT"),
    ("BIGINT", "BIGINT"),
    ("UNSIGNED BIG INT", "BIGINT UNSIGNED"),
    ("INT2", "SMALLINT"),
    ("INT8", "BIGINT"),
    ("REAL", "DOUBLE"),
    ("DOUBLE", "DOUBLE"),
    ("DOUBLE PRECISION", "DOUBLE"),
    ("FLOAT", "FLOAT"),
    ("NUMERIC", "DECIMAL"),
    ("DECIMAL", "DECIMAL"),
    ("BOOLEAN", "TINYINT(1)"),
    ("BOOL", "TINYINT(1)"),
    ("TEXT", "TEXT"),
    ("CHARACTER", "CHAR"),
    ("CHAR", "CHAR"),
    ("VARCHAR", "VARCHAR"),
    ("VARYING CHARACTER", "VARCHAR"),
    ("NCHAR", "CHAR"),
    ("NATIVE CHARACTER", "CHAR"),
    ("NVARCHAR", "VARCHAR"),
    ("CLOB", "LONGTEXT"),
    ("BLOB", "LONGBLOB"),
    ("DATE", "DATE"),
    ("DATETIME", "DATETIME"),
    ("TIMESTAMP", "TIMESTAMP"),
    ("TIME", "TIME"),
    ("JSON", "JSON"),
    ("UUID", "CHAR(36)"),
];

const SIZED: &[&str] = &[
    "INT", "TINYINT", "SMALLINT", "MEDIUMINT", "BIGINT", "DOUBLE", "FLOAT", "DECIMAL", "CHAR",
    "VARCHAR", "DATETIME", "TIMESTAMP", "TIME",
];

const DATE_CODES: &[(char, &str)] = &[
    ('Y', "%Y"),
    ('m', "%m"),
    ('d', "%d"),
    ('H', "%H"),
    ('M', "%i"),
    ('S', "%s"),
    ('f', "%s.%f"),
    ('j', "%j"),
    ('w', "%w"),
    ('W', "%u"),
    ('%', "%%"),
];

/// `CAST` targets MySQL accepts.
const CAST_TYPES: &[(&str, &str)] = &[
    ("INTEGER", "SIGNED"),
    ("INT", "SIGNED"),
    ("BIGINT", "SIGNED"),
    ("SMALLINT", "SIGNED"),
    ("TINYINT", "SIGNED"),
    ("TEXT", "CHAR"),
    ("VARCHAR", "CHAR"),
    ("CHAR", "CHAR"),
    ("CLOB", "CHAR"),
    ("REAL", "DOUBLE"),
    ("DOUBLE", "DOUBLE"),
    ("FLOAT", "DOUBLE"),
    ("NUMERIC", "DECIMAL"),
    ("DECIMAL", "DECIMAL"),
    ("BLOB", "BINARY"),
    ("DATE", "DATE"),
    ("DATETIME", "DATETIME"),
    ("TIMESTAMP", "DATETIME"),
    ("TIME", "TIME"),
    ("JSON", "JSON"),
];

/// `ON CONFLICT` as `ON DUPLICATE KEY UPDATE` or `INSERT IGNORE`.
fn upsert() -> Rule {
    Rule::transform("upsert", &["ON CONFLICT"], |stmt, ctx| {
        let Some(upsert) = shared::find_upsert(stmt.text()) else {
            return Ok(());
        };
        if upsert.update_filter {
            return Err(ctx.unsupported("ON CONFLICT ... DO UPDATE ... WHERE"));
        }
        let text = stmt.text().to_string();
        let head = text[..upsert.start].trim_end();
        let tail = &text[upsert.end..];
        let sep = if tail.is_empty() || tail.starts_with(';') { "" } else { " " };
        stmt.masked.text = match &upsert.assignments {
            Some(assignments) => {
                let assignments = EXCLUDED.replace_all(assignments, "VALUES($1)");
                format!("{} ON DUPLICATE KEY UPDATE {}{}{}", head, assignments, sep, tail)
            }
            None => {
                let verb_end = find_keyword(head, "INSERT", 0)
                    .map(|at| at + "INSERT".len())
                    .ok_or_else(|| ctx.translation_error("ON CONFLICT outside an INSERT"))?;
                format!("{} IGNORE{}{}{}", &head[..verb_end], &head[verb_end..], sep, tail)
            }
        };
        Ok(())
    })
}

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn render_style(&self) -> RenderStyle {
        RenderStyle {
            quote: QuoteStyle::Backtick,
            blob: BlobStyle::XQuote,
            backslash_escapes: true,
        }
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn numbered_placeholders(&self) -> bool {
        false
    }

    fn limit_offset(&self, limit: Option<&str>, offset: Option<&str>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!(" LIMIT {}", l),
            // OFFSET alone is not valid MySQL
            (None, Some(o)) => format!(" LIMIT 18446744073709551615 OFFSET {}", o),
            (None, None) => String::new(),
        }
    }

    fn supports_limit_keyword(&self) -> bool {
        false
    }

    fn returning_style(&self) -> ReturningStyle {
        ReturningStyle::Emulate
    }

    fn type_mappings(&self) -> Vec<TypeMapping> {
        type_table(TYPES, SIZED)
    }

    fn fallback_type(&self) -> &'static str {
        "TEXT"
    }

    fn cast_type(&self, source: &str, types: &TypeMapper) -> String {
        let (base, args) = split_type(source);
        match CAST_TYPES.iter().find(|(s, _)| *s == base).map(|(_, t)| *t) {
            Some(t @ ("CHAR" | "DECIMAL" | "BINARY")) => format!("{}{}", t, args.unwrap_or_default()),
            Some(t) => t.to_string(),
            None => types.map_type(source),
        }
    }

    fn rules(&self) -> Vec<Rule> {
        let mut rules = vec![
            shared::now_function("datetime-now", "datetime", "NOW()"),
            shared::now_function("date-now", "date", "CURDATE()"),
            shared::now_function("time-now", "time", "CURTIME()"),
            shared::strftime_rule(DateFormatter {
                codes: DATE_CODES,
                now: "NOW()",
                epoch: |t| format!("UNIX_TIMESTAMP({})", t),
                format: |t, f| format!("DATE_FORMAT({}, {})", t, f),
            }),
            shared::rename("iif", "IIF", "IF"),
            shared::group_concat_rule(|e, s| format!("GROUP_CONCAT({} SEPARATOR {})", e, s)),
            shared::replace_call("last-insert-rowid", "LAST_INSERT_ROWID", "LAST_INSERT_ID()"),
            shared::replace_call("random", "RANDOM", "RAND()"),
            Rule::function("json-extract", "JSON_EXTRACT", |call, _| {
                Ok(Some(format!("JSON_UNQUOTE(JSON_EXTRACT({}))", call.args.join(", "))))
            }),
            shared::concat_operator(),
            shared::insert_or_rule(ConflictVerb::Verb("INSERT IGNORE"), ConflictVerb::Verb("REPLACE")),
            upsert(),
            shared::transaction_verbs("START TRANSACTION"),
        ];
        rules.extend(shared::null_safe_is(
            |l, r| format!("{} <=> {}", l, r),
            |l, r| format!("NOT ({} <=> {})", l, r),
        ));
        rules
    }

    fn identity_column(&self, autoincrement: bool) -> String {
        if autoincrement {
            "BIGINT AUTO_INCREMENT PRIMARY KEY".to_string()
        } else {
            "INT AUTO_INCREMENT PRIMARY KEY".to_string()
        }
    }

    fn index_guard(&self) -> GuardStyle {
        GuardStyle::Unsupported
    }

    fn partial_indexes(&self) -> bool {
        false
    }

    fn collation(&self, sqlite: &str) -> Option<&'static str> {
        match sqlite.to_ascii_uppercase().as_str() {
            "NOCASE" => Some("utf8mb4_general_ci"),
            "BINARY" => Some("utf8mb4_bin"),
            _ => None,
        }
    }

    fn drop_index_needs_table(&self) -> bool {
        true
    }
}
