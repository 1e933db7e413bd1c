//! Pagination inlining and placeholder renumbering.
//!
//! Not every target driver accepts bound parameters in LIMIT/OFFSET, so
//! placeholder operands there are replaced by the integer literal of the
//! bound value and dropped from the parameter list. Renumbering runs after
//! that, over whatever placeholders remain.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::expr::{depth_at, find_keyword};
use super::{RuleCtx, Statement};
use crate::error::ShiftResult;
use crate::value::SqlValue;

static TRAILING_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bLIMIT\s+(?P<a>\?\d+|[-+]?\d+)(?:\s*(?:(?P<comma>,)|\bOFFSET\b)\s*(?P<b>\?\d+|[-+]?\d+))?\s*(?P<semi>;?)\s*$",
    )
    .expect("valid limit regex")
});

static MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?(\d+)").expect("valid marker regex"));

/// A LIMIT or OFFSET operand after resolution.
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Value(i64),
    /// Still a placeholder (no bound value was supplied).
    Param(usize),
}

impl Bound {
    fn render(&self) -> String {
        match self {
            Bound::Value(v) => v.to_string(),
            Bound::Param(n) => format!("?{}", n),
        }
    }
}

fn resolve(token: &str, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<Bound> {
    if let Some(n) = token.strip_prefix('?') {
        let n: usize = n
            .parse()
            .map_err(|_| ctx.translation_error(format!("bad placeholder '{}'", token)))?;
        let idx = n.saturating_sub(1);
        return match stmt.params.get(idx) {
            Some(value) => match value.as_i64() {
                Some(v) => {
                    stmt.inlined.insert(idx);
                    Ok(Bound::Value(v))
                }
                None => Err(ctx.translation_error(format!(
                    "LIMIT/OFFSET parameter {} is not an integer: {}",
                    n,
                    value.to_literal()
                ))),
            },
            None => Ok(Bound::Param(n)),
        };
    }
    token
        .parse::<i64>()
        .map(Bound::Value)
        .map_err(|_| ctx.translation_error(format!("bad LIMIT/OFFSET operand '{}'", token)))
}

/// Rewrite a trailing `LIMIT n [OFFSET m]` or `LIMIT m, n`.
pub fn apply_pagination(stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<()> {
    let text = stmt.masked.text.clone();
    let caps = TRAILING_LIMIT
        .captures(&text)
        .filter(|c| c.get(0).map(|m| depth_at(&text, m.start()) == 0).unwrap_or(false));
    let Some(caps) = caps else {
        if find_keyword(&text, "LIMIT", 0).is_some() && !ctx.dialect.supports_limit_keyword() {
            ctx.degrade("LIMIT with a non-literal expression")?;
        }
        return Ok(());
    };

    let whole = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
    let first = resolve(&caps["a"], stmt, ctx)?;
    let second = match caps.name("b") {
        Some(b) => Some(resolve(b.as_str(), stmt, ctx)?),
        None => None,
    };
    let (limit, offset) = if caps.name("comma").is_some() {
        (second, Some(first))
    } else {
        (Some(first), second)
    };

    // SQLite: a negative limit means no limit, a negative offset means none
    let limit = limit.filter(|b| !matches!(b, Bound::Value(v) if *v < 0));
    let offset = offset.filter(|b| !matches!(b, Bound::Value(v) if *v <= 0));

    let limit_text = limit.as_ref().map(Bound::render);
    let offset_text = offset.as_ref().map(Bound::render);
    let mut clause = ctx
        .dialect
        .limit_offset(limit_text.as_deref(), offset_text.as_deref());

    let head = text[..whole].trim_end();
    if !clause.is_empty()
        && ctx.dialect.offset_requires_order_by()
        && find_keyword(head, "ORDER BY", 0).is_none()
    {
        clause = format!(" ORDER BY (SELECT NULL){}", clause);
    }
    let semi = if caps.name("semi").map(|s| !s.as_str().is_empty()).unwrap_or(false) {
        ";"
    } else {
        ""
    };
    stmt.masked.text = format!("{}{}{}", head, clause, semi);
    Ok(())
}

/// Render `?N` markers in the dialect's style and build the final parameter list.
pub fn apply_placeholders(stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<()> {
    let text = stmt.masked.text.clone();
    let markers: Vec<usize> = MARKER
        .captures_iter(&text)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .map(|n| n.saturating_sub(1))
        .collect();
    let convert = |v: &SqlValue| match v {
        SqlValue::Bool(_) => ctx.types.convert_value("BOOLEAN", v),
        other => other.clone(),
    };

    if !ctx.dialect.numbered_placeholders() {
        let params = markers
            .iter()
            .filter_map(|&idx| stmt.params.get(idx))
            .map(convert)
            .collect();
        stmt.masked.text = MARKER
            .replace_all(&text, |_: &regex::Captures| ctx.dialect.placeholder(0))
            .into_owned();
        stmt.output_params = Some(params);
        return Ok(());
    }

    let referenced: BTreeSet<usize> = markers.iter().copied().collect();
    let total = stmt
        .params
        .len()
        .max(referenced.iter().next_back().map(|&i| i + 1).unwrap_or(0));
    let kept: Vec<usize> = (0..total)
        .filter(|i| !stmt.inlined.contains(i) || referenced.contains(i))
        .collect();
    let number_of = |idx: usize| kept.iter().position(|&k| k == idx).map(|p| p + 1);

    stmt.masked.text = MARKER
        .replace_all(&text, |caps: &regex::Captures| {
            let idx = caps[1].parse::<usize>().unwrap_or(1).saturating_sub(1);
            ctx.dialect.placeholder(number_of(idx).unwrap_or(idx + 1))
        })
        .into_owned();
    stmt.output_params = Some(
        kept.iter()
            .filter_map(|&i| stmt.params.get(i))
            .map(convert)
            .collect(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::lexer::RenderStyle;
    use crate::options::PluginOptions;
    use crate::rules::{Rule, RuleSet};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn run(dialect: Dialect, sql: &str, params: Vec<SqlValue>) -> (String, Vec<SqlValue>) {
        let d = dialect.build();
        let options = PluginOptions::default();
        let types = d.type_mapper(&options);
        let warnings = RefCell::new(Vec::new());
        let ctx = RuleCtx::new(d.as_ref(), &types, &options, &warnings);
        let mut stmt = Statement::new(sql, &params).unwrap();
        RuleSet::new(vec![Rule::pagination(), Rule::placeholders()])
            .apply(&mut stmt, &ctx)
            .unwrap();
        (
            stmt.masked.finish(&RenderStyle::SQLITE),
            stmt.output_params.unwrap_or_default(),
        )
    }

    #[test]
    fn test_sequential_renumbering() {
        let params = vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)];
        let (sql, out) = run(
            Dialect::Postgres,
            "SELECT * FROM t WHERE a = ? AND b = ? AND c = ?",
            params.clone(),
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2 AND c = $3");
        assert_eq!(out, params);
    }

    #[test]
    fn test_limit_offset_inlined() {
        let (sql, out) = run(
            Dialect::Postgres,
            "SELECT * FROM t LIMIT ? OFFSET ?",
            vec![SqlValue::Int(10), SqlValue::Int(5)],
        );
        assert_eq!(sql, "SELECT * FROM t LIMIT 10 OFFSET 5");
        assert!(out.is_empty());
    }

    #[test]
    fn test_limit_after_filter_keeps_leading_params() {
        let (sql, out) = run(
            Dialect::Postgres,
            "SELECT * FROM t WHERE a = ? LIMIT ? OFFSET ?;",
            vec![SqlValue::Text("x".into()), SqlValue::Int(10), SqlValue::Int(20)],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 LIMIT 10 OFFSET 20;");
        assert_eq!(out, vec![SqlValue::Text("x".into())]);
    }

    #[test]
    fn test_sqlite_comma_form() {
        let (sql, _) = run(Dialect::MySql, "SELECT * FROM t LIMIT 5, 10", vec![]);
        assert_eq!(sql, "SELECT * FROM t LIMIT 10 OFFSET 5");
    }

    #[test]
    fn test_mssql_offset_fetch_adds_order_by() {
        let (sql, _) = run(
            Dialect::SqlServer,
            "SELECT * FROM t LIMIT ? OFFSET ?",
            vec![SqlValue::Int(10), SqlValue::Int(5)],
        );
        assert_eq!(
            sql,
            "SELECT * FROM t ORDER BY (SELECT NULL) OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        let (sql, _) = run(Dialect::SqlServer, "SELECT * FROM t ORDER BY id LIMIT 3", vec![]);
        assert_eq!(sql, "SELECT * FROM t ORDER BY id OFFSET 0 ROWS FETCH NEXT 3 ROWS ONLY");
    }

    #[test]
    fn test_negative_limit_means_unbounded() {
        let (sql, _) = run(Dialect::Postgres, "SELECT * FROM t LIMIT -1 OFFSET 4", vec![]);
        assert_eq!(sql, "SELECT * FROM t OFFSET 4");
        let (sql, _) = run(Dialect::MySql, "SELECT * FROM t LIMIT -1 OFFSET 4", vec![]);
        assert_eq!(sql, "SELECT * FROM t LIMIT 18446744073709551615 OFFSET 4");
    }

    #[test]
    fn test_missing_params_stay_placeholders() {
        let (sql, _) = run(Dialect::Postgres, "SELECT * FROM t LIMIT ? OFFSET ?", vec![]);
        assert_eq!(sql, "SELECT * FROM t LIMIT $1 OFFSET $2");
    }

    #[test]
    fn test_anonymous_target_reorders_params() {
        let (sql, out) = run(
            Dialect::MySql,
            "SELECT * FROM t WHERE a = ?2 OR b = ?1 OR c = ?2",
            vec![SqlValue::Int(1), SqlValue::Int(2)],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? OR b = ? OR c = ?");
        assert_eq!(out, vec![SqlValue::Int(2), SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_boolean_params_converted() {
        let (sql, out) = run(
            Dialect::SqlServer,
            "SELECT * FROM t WHERE active = ?",
            vec![SqlValue::Bool(true)],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE active = @p1");
        assert_eq!(out, vec![SqlValue::Int(1)]);
    }

    #[test]
    fn test_non_integer_limit_param_is_an_error() {
        let d = Dialect::Postgres.build();
        let options = PluginOptions::default();
        let types = d.type_mapper(&options);
        let warnings = RefCell::new(Vec::new());
        let ctx = RuleCtx::new(d.as_ref(), &types, &options, &warnings);
        let mut stmt = Statement::new("SELECT * FROM t LIMIT ?", &[SqlValue::Text("ten".into())]).unwrap();
        assert!(apply_pagination(&mut stmt, &ctx).is_err());
    }

    #[test]
    fn test_subquery_limit_untouched() {
        let (sql, _) = run(
            Dialect::SqlServer,
            "SELECT * FROM t WHERE id IN (SELECT id FROM u LIMIT 1)",
            vec![],
        );
        assert_eq!(sql, "SELECT * FROM t WHERE id IN (SELECT id FROM u LIMIT 1)");
    }
}
