//! RETURNING clauses.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::expr::{find_keyword, keyword_len, leading_keyword, matching_paren, split_top_level};
use super::{RuleCtx, Statement};
use crate::error::ShiftResult;
use crate::lexer::{MaskedSql, IDENT};
use crate::value::SqlValue;

/// How a dialect handles `RETURNING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// The clause is valid as written.
    Native,
    /// `OUTPUT INSERTED.c` / `OUTPUT DELETED.c`.
    Output,
    /// Stripped; rows are recovered with a follow-up read.
    Emulate,
}

/// What is needed to produce RETURNING rows after an emulated insert.
///
/// Single use: a session consumes it after the statement runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturningEmulationInfo {
    pub table: String,
    /// Plain column names, or `*`.
    pub columns: Vec<String>,
    /// Column compared against the driver's last-insert id.
    pub key_column: String,
    /// Inserted values, when a single-row VALUES list could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, SqlValue>>,
}

static INSERT_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*(?:INSERT|REPLACE)(?:\s+OR\s+[A-Za-z]+|\s+IGNORE)?\s+INTO\s+((?:{id}\.)?{id})\s*",
        id = IDENT
    ))
    .expect("valid insert regex")
});

static PLAIN_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^(?:{id}\.)?({id})$", id = IDENT)).expect("valid column regex")
});

struct Item<'a> {
    column: &'a str,
    alias: Option<&'a str>,
}

fn parse_items<'a>(clause: &'a str, ctx: &RuleCtx<'_>, allow_alias: bool) -> ShiftResult<Vec<Item<'a>>> {
    static ALIASED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?is)^(.+?)\s+AS\s+(\S+)$").expect("valid alias regex"));
    let mut items = Vec::new();
    for part in split_top_level(clause) {
        let (expr, alias) = match ALIASED.captures(part) {
            Some(c) if allow_alias => (
                c.get(1).map(|m| m.as_str()).unwrap_or(part),
                c.get(2).map(|m| m.as_str()),
            ),
            _ => (part, None),
        };
        let column = if expr == "*" {
            expr
        } else {
            match PLAIN_COLUMN.captures(expr).and_then(|c| c.get(1)) {
                Some(m) => m.as_str(),
                None => return Err(ctx.unsupported(format!("RETURNING expression '{}'", part))),
            }
        };
        items.push(Item { column, alias });
    }
    if items.is_empty() {
        return Err(ctx.translation_error("RETURNING without columns"));
    }
    Ok(items)
}

fn literal_value(token: &str, masked: &MaskedSql, params: &[SqlValue]) -> Option<SqlValue> {
    let token = token.trim();
    if let Some(n) = token.strip_prefix('?') {
        let idx: usize = n.parse().ok()?;
        return params.get(idx.checked_sub(1)?).cloned();
    }
    if let Some(s) = masked.string_value(token) {
        return Some(SqlValue::Text(s.to_string()));
    }
    SqlValue::from_literal(token)
}

/// Read `(cols) VALUES (vals)` when there is exactly one row.
fn inserted_values(stmt: &Statement, after_table: usize) -> Option<BTreeMap<String, SqlValue>> {
    let text = stmt.text();
    let rest = &text[after_table..];
    if !rest.starts_with('(') {
        return None;
    }
    let cols_end = matching_paren(rest, 0)?;
    let columns = split_top_level(&rest[1..cols_end]);
    let tail = &rest[cols_end + 1..];
    let values_at = find_keyword(tail, "VALUES", 0)?;
    if !tail[..values_at].trim().is_empty() {
        return None;
    }
    let row = tail[values_at + "VALUES".len()..].trim_start();
    if !row.starts_with('(') {
        return None;
    }
    let row_end = matching_paren(row, 0)?;
    // a second row means the values cannot be attributed to one RETURNING row
    if row[row_end + 1..].trim_start().starts_with(',') {
        return None;
    }
    let values = split_top_level(&row[1..row_end]);
    if values.len() != columns.len() {
        return None;
    }
    let mut out = BTreeMap::new();
    for (col, val) in columns.iter().zip(values.iter()) {
        if let Some(v) = literal_value(val, &stmt.masked, &stmt.params) {
            out.insert(stmt.masked.name_of(col), v);
        }
    }
    Some(out)
}

/// Handle a depth-zero RETURNING clause per the dialect's capability.
pub fn apply_returning(stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<()> {
    let text = stmt.text().to_string();
    let Some(pos) = find_keyword(&text, "RETURNING", 0) else {
        return Ok(());
    };
    let style = ctx.dialect.returning_style();
    if style == ReturningStyle::Native {
        return Ok(());
    }

    let head = text[..pos].trim_end();
    let raw_clause = text[pos + keyword_len(&text, "RETURNING", pos)..].trim();
    let had_semi = raw_clause.ends_with(';');
    let clause = raw_clause.trim_end_matches(';').trim_end();
    let verb = leading_keyword(&text);
    let semi = if had_semi { ";" } else { "" };

    match style {
        ReturningStyle::Native => Ok(()),
        ReturningStyle::Output => {
            let prefix = match verb.as_str() {
                "DELETE" => "DELETED",
                "INSERT" | "UPDATE" => "INSERTED",
                other => return Err(ctx.unsupported(format!("{} ... RETURNING", other))),
            };
            let items = parse_items(clause, ctx, true)?;
            let output = items
                .iter()
                .map(|item| {
                    let col = format!("{}.{}", prefix, item.column);
                    match item.alias {
                        Some(alias) => format!("{} AS {}", col, alias),
                        None => col,
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            let at = if verb == "INSERT" {
                ["VALUES", "SELECT", "DEFAULT VALUES"]
                    .iter()
                    .filter_map(|kw| find_keyword(head, kw, 0))
                    .min()
            } else {
                // UPDATE ... FROM and DELETE FROM t FROM ... take OUTPUT before the join source
                let search_from = match verb.as_str() {
                    "DELETE" => find_keyword(head, "FROM", 0).map_or(0, |at| at + "FROM".len()),
                    _ => 0,
                };
                ["FROM", "WHERE"]
                    .iter()
                    .filter_map(|kw| find_keyword(head, kw, search_from))
                    .min()
            };
            stmt.masked.text = match at {
                Some(at) => format!(
                    "{} OUTPUT {} {}{}",
                    head[..at].trim_end(),
                    output,
                    &head[at..],
                    semi
                ),
                None => format!("{} OUTPUT {}{}", head, output, semi),
            };
            Ok(())
        }
        ReturningStyle::Emulate => {
            if verb != "INSERT" && verb != "REPLACE" {
                return Err(ctx.unsupported(format!("{} ... RETURNING", verb)));
            }
            let caps = INSERT_TARGET
                .captures(head)
                .ok_or_else(|| ctx.translation_error("cannot find the INSERT target table"))?;
            let target = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let table = target
                .split('.')
                .map(|part| stmt.masked.name_of(part))
                .collect::<Vec<_>>()
                .join(".");
            let after_table = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let columns = parse_items(clause, ctx, false)?
                .iter()
                .map(|item| stmt.masked.name_of(item.column))
                .collect();
            let values = inserted_values(stmt, after_table);
            stmt.returning = Some(ReturningEmulationInfo {
                table,
                columns,
                key_column: ctx.options.returning_key_column.clone(),
                values,
            });
            stmt.masked.text = format!("{}{}", head, semi);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::error::ShiftError;
    use crate::options::PluginOptions;
    use crate::rules::{Rule, RuleSet};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn run(dialect: Dialect, sql: &str, params: Vec<SqlValue>) -> ShiftResult<Statement> {
        let d = dialect.build();
        let options = PluginOptions::default();
        let types = d.type_mapper(&options);
        let warnings = RefCell::new(Vec::new());
        let ctx = RuleCtx::new(d.as_ref(), &types, &options, &warnings);
        let mut stmt = Statement::new(sql, &params)?;
        RuleSet::new(vec![Rule::returning()]).apply(&mut stmt, &ctx)?;
        Ok(stmt)
    }

    #[test]
    fn test_native_returning_untouched() {
        let stmt = run(Dialect::Postgres, "INSERT INTO t (a) VALUES (?) RETURNING a", vec![]).unwrap();
        assert_eq!(stmt.text(), "INSERT INTO t (a) VALUES (?1) RETURNING a");
        assert!(stmt.returning.is_none());
    }

    #[test]
    fn test_emulated_insert_returning() {
        let stmt = run(
            Dialect::MySql,
            "INSERT INTO t (a, \"b\") VALUES (?, 'x') RETURNING a",
            vec![SqlValue::Int(7)],
        )
        .unwrap();
        assert!(!stmt.text().contains("RETURNING"));
        let info = stmt.returning.unwrap();
        assert_eq!(info.table, "t");
        assert_eq!(info.columns, vec!["a".to_string()]);
        assert_eq!(info.key_column, "id");
        let values = info.values.unwrap();
        assert_eq!(values.get("a"), Some(&SqlValue::Int(7)));
        assert_eq!(values.get("b"), Some(&SqlValue::Text("x".into())));
    }

    #[test]
    fn test_multi_row_insert_has_no_values() {
        let stmt = run(
            Dialect::Oracle,
            "INSERT INTO t (a) VALUES (1), (2) RETURNING *",
            vec![],
        )
        .unwrap();
        let info = stmt.returning.unwrap();
        assert_eq!(info.columns, vec!["*".to_string()]);
        assert!(info.values.is_none());
    }

    #[test]
    fn test_update_returning_rejected_when_emulating() {
        let err = run(Dialect::MySql, "UPDATE t SET a = 1 RETURNING a", vec![]).unwrap_err();
        assert!(matches!(err, ShiftError::Unsupported { .. }));
    }

    #[test]
    fn test_output_clause_placement() {
        let stmt = run(Dialect::SqlServer, "INSERT INTO t (a) VALUES (1) RETURNING id, a AS x", vec![]).unwrap();
        assert_eq!(
            stmt.text(),
            "INSERT INTO t (a) OUTPUT INSERTED.id, INSERTED.a AS x VALUES (1)"
        );
        let stmt = run(Dialect::SqlServer, "DELETE FROM t WHERE a = 1 RETURNING *;", vec![]).unwrap();
        assert_eq!(stmt.text(), "DELETE FROM t OUTPUT DELETED.* WHERE a = 1;");
        let stmt = run(Dialect::SqlServer, "UPDATE t SET a = 2 RETURNING a", vec![]).unwrap();
        assert_eq!(stmt.text(), "UPDATE t SET a = 2 OUTPUT INSERTED.a");
    }

    #[test]
    fn test_output_clause_precedes_update_from() {
        let stmt = run(
            Dialect::SqlServer,
            "UPDATE t SET a = s.a FROM s WHERE s.id = t.id RETURNING a",
            vec![],
        )
        .unwrap();
        assert_eq!(
            stmt.text(),
            "UPDATE t SET a = s.a OUTPUT INSERTED.a FROM s WHERE s.id = t.id"
        );
        let stmt = run(
            Dialect::SqlServer,
            "UPDATE t SET a = (SELECT max(b) FROM s) WHERE id = 1 RETURNING a",
            vec![],
        )
        .unwrap();
        assert_eq!(
            stmt.text(),
            "UPDATE t SET a = (SELECT max(b) FROM s) OUTPUT INSERTED.a WHERE id = 1"
        );
    }

    #[test]
    fn test_expression_in_returning_is_unsupported() {
        let err = run(Dialect::MySql, "INSERT INTO t (a) VALUES (1) RETURNING a + 1", vec![]).unwrap_err();
        assert!(matches!(err, ShiftError::Unsupported { .. }));
    }
}
