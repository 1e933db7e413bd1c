//! Rule builders shared by several dialects.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ShiftResult;
use crate::lexer::IDENT;
use crate::options::Feature;
use crate::rules::expr::{find_keyword, keyword_len, leading_keyword, matching_paren};
use crate::rules::{Call, Rule, RuleCtx, Statement};

/// Rules every dialect runs.
pub fn common_rules() -> Vec<Rule> {
    vec![
        Rule::function("cast", "CAST", cast),
        Rule::function("total", "TOTAL", |call, _| {
            Ok(Some(format!("COALESCE(SUM({}), 0.0)", call.args.join(", "))))
        }),
        Rule::pattern("double-equals", &["=="], r"==", "=").gated(Feature::Operator),
    ]
}

static CAST_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(.+)\s+AS\s+([A-Za-z][A-Za-z0-9_]*(?:\s+[A-Za-z][A-Za-z0-9_]*)*\s*(?:\([^()]*\))?)$")
        .expect("valid cast regex")
});

fn cast(call: &Call<'_>, ctx: &RuleCtx<'_>) -> ShiftResult<Option<String>> {
    let [body] = call.args.as_slice() else {
        return Ok(None);
    };
    let Some(caps) = CAST_BODY.captures(body) else {
        return Ok(None);
    };
    let target = ctx.dialect.cast_type(&caps[2], ctx.types);
    Ok(Some(format!("CAST({} AS {})", caps[1].trim(), target)))
}

/// Rename a function, keeping its arguments.
pub fn rename(name: &'static str, from: &str, to: &'static str) -> Rule {
    Rule::function(name, from, move |call, _| {
        Ok(Some(format!("{}({})", to, call.args.join(", "))))
    })
}

/// Replace a zero-argument function with an expression.
pub fn replace_call(name: &'static str, from: &str, with: &'static str) -> Rule {
    Rule::function(name, from, move |call, _| {
        Ok(call.args.iter().all(|a| a.is_empty()).then(|| with.to_string()))
    })
}

/// `IIF(c, a, b)` as a searched CASE.
pub fn iif_to_case() -> Rule {
    Rule::function("iif", "IIF", |call, ctx| match call.args.as_slice() {
        [cond, then, otherwise] => Ok(Some(format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            cond, then, otherwise
        ))),
        _ => Err(ctx.translation_error("IIF expects three arguments")),
    })
}

fn is_now(call: &Call<'_>, i: usize) -> bool {
    call.string_arg(i)
        .map(|s| s.eq_ignore_ascii_case("now"))
        .unwrap_or(false)
}

/// `datetime('now')`, `date('now')`, `time('now')` and their no-argument forms.
pub fn now_function(name: &'static str, function: &str, now: &'static str) -> Rule {
    let upper = function.to_ascii_uppercase();
    let function = function.to_ascii_lowercase();
    Rule::function(name, &upper, move |call, ctx| {
        match call.args.as_slice() {
            [] | [""] => Ok(Some(now.to_string())),
            [_] if is_now(call, 0) => Ok(Some(now.to_string())),
            _ => {
                ctx.degrade(format!("{}() with modifiers or a non-'now' time value", function))?;
                Ok(None)
            }
        }
    })
}

/// Convert a strftime format with a code table; `None` for an unknown code.
pub fn convert_format(format: &str, codes: &[(char, &str)]) -> Option<String> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code = chars.next()?;
        let (_, target) = codes.iter().find(|(k, _)| *k == code)?;
        out.push_str(target);
    }
    Some(out)
}

/// Quote text as a SQL string literal.
pub fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// How a dialect renders a converted strftime call.
pub struct DateFormatter {
    pub codes: &'static [(char, &'static str)],
    /// Current timestamp expression substituted for `'now'`.
    pub now: &'static str,
    /// Seconds since the epoch for a time expression (`%s`).
    pub epoch: fn(&str) -> String,
    /// Format a time expression with a quoted target format.
    pub format: fn(&str, &str) -> String,
}

/// `strftime(fmt, time)` rendered with the dialect's formatting function.
pub fn strftime_rule(formatter: DateFormatter) -> Rule {
    Rule::function("strftime", "STRFTIME", move |call, ctx| {
        let Some(fmt) = call.string_arg(0) else {
            ctx.degrade("strftime() with a non-literal format")?;
            return Ok(None);
        };
        if call.args.len() > 2 {
            ctx.degrade("strftime() modifiers")?;
            return Ok(None);
        }
        let time = match call.args.get(1) {
            None => formatter.now.to_string(),
            Some(_) if is_now(call, 1) => formatter.now.to_string(),
            Some(t) => t.to_string(),
        };
        if fmt == "%s" {
            return Ok(Some((formatter.epoch)(&time)));
        }
        match convert_format(fmt, formatter.codes) {
            Some(target) => Ok(Some((formatter.format)(&time, &quote_str(&target)))),
            None => {
                ctx.degrade(format!("strftime() format '{}'", fmt))?;
                Ok(None)
            }
        }
    })
}

/// `group_concat(x [, sep])`; `render` gets the expression and the separator literal.
pub fn group_concat_rule(render: fn(&str, &str) -> String) -> Rule {
    Rule::function("group-concat", "GROUP_CONCAT", move |call, ctx| {
        match call.args.as_slice() {
            [expr] => Ok(Some(render(expr, "','"))),
            [expr, sep] => Ok(Some(render(expr, sep))),
            _ => Err(ctx.translation_error("group_concat expects one or two arguments")),
        }
    })
}

/// `a || b` as `CONCAT(a, b)`.
pub fn concat_operator() -> Rule {
    Rule::operator("concat", &["||"], r"\|\|", |left, right, _| {
        Ok(Some(format!("CONCAT({}, {})", left, right)))
    })
}

const IS_OPERANDS_KEPT: &[&str] = &["NULL", "NOT", "DISTINCT", "TRUE", "FALSE", "UNKNOWN"];

/// Null-safe `IS` / `IS NOT` between two expressions.
pub fn null_safe_is(equal: fn(&str, &str) -> String, not_equal: fn(&str, &str) -> String) -> Vec<Rule> {
    let keep = |right: &str| IS_OPERANDS_KEPT.iter().any(|k| right.eq_ignore_ascii_case(k));
    vec![
        Rule::operator("is-not", &[" IS NOT "], r"(?i)\bIS\s+NOT\b", move |l, r, _| {
            Ok((!keep(r)).then(|| not_equal(l, r)))
        }),
        Rule::operator("is", &[" IS "], r"(?i)\bIS\b", move |l, r, _| {
            Ok((!keep(r)).then(|| equal(l, r)))
        }),
    ]
}

/// `TRUE` / `FALSE` keywords as the dialect's boolean literals.
pub fn bool_literals() -> Rule {
    static BOOL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b(TRUE|FALSE)\b").expect("valid bool regex"));
    Rule::transform("bool-literals", &["TRUE", "FALSE"], |stmt, ctx| {
        let text = BOOL
            .replace_all(stmt.text(), |caps: &regex::Captures| {
                ctx.dialect.bool_literal(caps[1].eq_ignore_ascii_case("true"))
            })
            .into_owned();
        stmt.masked.text = text;
        Ok(())
    })
    .gated(Feature::Operator)
}

/// SQLite transaction verbs: `BEGIN [DEFERRED|IMMEDIATE|EXCLUSIVE] [TRANSACTION]`
/// and `END [TRANSACTION]`.
pub fn transaction_verbs(begin: &'static str) -> Rule {
    static BEGIN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^\s*BEGIN(?:\s+(?:DEFERRED|IMMEDIATE|EXCLUSIVE))?(?:\s+TRANSACTION)?\s*(;?)\s*$")
            .expect("valid begin regex")
    });
    static END: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^\s*(?:END|COMMIT)(?:\s+TRANSACTION)?\s*(;?)\s*$").expect("valid end regex")
    });
    Rule::transform("transaction-verbs", &["BEGIN", "END", "COMMIT"], move |stmt, _| {
        let text = stmt.text().to_string();
        if let Some(c) = BEGIN.captures(&text) {
            stmt.masked.text = format!("{}{}", begin, &c[1]);
        } else if let Some(c) = END.captures(&text) {
            stmt.masked.text = format!("COMMIT{}", &c[1]);
        }
        Ok(())
    })
}

/// Target syntax for `INSERT OR IGNORE` / `INSERT OR REPLACE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictVerb {
    /// Plain INSERT followed by `ON CONFLICT DO NOTHING`.
    OnConflictDoNothing,
    /// Replace the verb (`INSERT IGNORE`, `REPLACE`).
    Verb(&'static str),
    Unsupported,
}

static INSERT_OR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\s*)(?:INSERT\s+OR\s+(IGNORE|REPLACE|ROLLBACK|ABORT|FAIL)|(REPLACE))\b")
        .expect("valid insert-or regex")
});

/// Insert text before a depth-zero RETURNING clause or a trailing semicolon.
pub fn append_clause(stmt: &mut Statement, clause: &str) {
    let text = stmt.text();
    let at = find_keyword(text, "RETURNING", 0).unwrap_or_else(|| {
        let trimmed = text.trim_end();
        trimmed.strip_suffix(';').map(|t| t.len()).unwrap_or(trimmed.len())
    });
    let head = text[..at].trim_end().to_string();
    let tail = text[at..].to_string();
    let sep = if tail.is_empty() || tail.starts_with(';') { "" } else { " " };
    stmt.masked.text = format!("{} {}{}{}", head, clause, sep, tail);
}

/// SQLite's conflict-resolution verbs.
pub fn insert_or_rule(ignore: ConflictVerb, replace: ConflictVerb) -> Rule {
    Rule::transform("insert-or", &["INSERT OR", "REPLACE"], move |stmt, ctx| {
        let text = stmt.text().to_string();
        if leading_keyword(&text) == "REPLACE" && find_keyword(&text, "INTO", 0).is_none() {
            return Ok(());
        }
        let Some(caps) = INSERT_OR.captures(&text) else {
            return Ok(());
        };
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let lead = &caps[1];
        let action = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_ascii_uppercase())
            .unwrap_or_default();
        let rest = text[end..].to_string();
        let (verb, construct) = match action.as_str() {
            "IGNORE" => (ignore, "INSERT OR IGNORE"),
            "REPLACE" => (replace, "INSERT OR REPLACE"),
            other => {
                ctx.degrade(format!("INSERT OR {}", other))?;
                stmt.masked.text = format!("{}INSERT{}", lead, rest);
                return Ok(());
            }
        };
        match verb {
            ConflictVerb::OnConflictDoNothing => {
                stmt.masked.text = format!("{}INSERT{}", lead, rest);
                append_clause(stmt, "ON CONFLICT DO NOTHING");
            }
            ConflictVerb::Verb(v) => stmt.masked.text = format!("{}{}{}", lead, v, rest),
            ConflictVerb::Unsupported => return Err(ctx.unsupported(construct)),
        }
        Ok(())
    })
}

/// Parsed `ON CONFLICT [(target)] DO NOTHING | DO UPDATE SET ...`.
pub struct Upsert {
    /// Byte index of `ON CONFLICT`.
    pub start: usize,
    /// End of the clause (before RETURNING or a trailing semicolon).
    pub end: usize,
    /// `SET` assignments when the action is DO UPDATE.
    pub assignments: Option<String>,
    /// WHERE on the DO UPDATE action.
    pub update_filter: bool,
}

static DO_NOTHING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*NOTHING\s*$").expect("valid do-nothing regex"));
static DO_UPDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*UPDATE\s+SET\s+(.+)$").expect("valid do-update regex"));

/// Locate the upsert clause of an INSERT.
pub fn find_upsert(text: &str) -> Option<Upsert> {
    let start = find_keyword(text, "ON CONFLICT", 0)?;
    let mut pos = start + keyword_len(text, "ON CONFLICT", start);
    let after = text[pos..].trim_start();
    pos = text.len() - after.len();
    if after.starts_with('(') {
        pos = matching_paren(text, pos)? + 1;
    }
    let end = find_keyword(text, "RETURNING", pos).unwrap_or_else(|| {
        let trimmed = text.trim_end();
        trimmed.strip_suffix(';').map(|t| t.len()).unwrap_or(trimmed.len())
    });
    let action_at = find_keyword(&text[..end], "DO", pos)?;
    let action = &text[action_at + 2..end];
    if DO_NOTHING.is_match(action) {
        return Some(Upsert {
            start,
            end,
            assignments: None,
            update_filter: false,
        });
    }
    let body = DO_UPDATE.captures(action)?.get(1)?.as_str();
    let update_filter = find_keyword(body, "WHERE", 0);
    let assignments = match update_filter {
        Some(w) => body[..w].trim(),
        None => body.trim(),
    };
    Some(Upsert {
        start,
        end,
        assignments: Some(assignments.to_string()),
        update_filter: update_filter.is_some(),
    })
}

/// `ON CONFLICT` clauses for targets with neither upsert syntax.
pub fn upsert_unsupported() -> Rule {
    Rule::transform("upsert", &["ON CONFLICT"], |stmt, ctx| {
        if find_upsert(stmt.text()).is_some() {
            return Err(ctx.unsupported("INSERT ... ON CONFLICT"));
        }
        Ok(())
    })
}

/// `excluded.col` references inside DO UPDATE assignments.
pub static EXCLUDED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\bexcluded\.({})", IDENT)).expect("valid excluded regex")
});

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PG_CODES: &[(char, &str)] = &[('Y', "YYYY"), ('m', "MM"), ('d', "DD"), ('%', "%")];

    #[test]
    fn test_convert_format() {
        assert_eq!(convert_format("%Y-%m-%d", PG_CODES).as_deref(), Some("YYYY-MM-DD"));
        assert_eq!(convert_format("100%%", PG_CODES).as_deref(), Some("100%"));
        assert_eq!(convert_format("%Q", PG_CODES), None);
        assert_eq!(convert_format("%", PG_CODES), None);
    }

    #[test]
    fn test_find_upsert() {
        let sql = "INSERT INTO t (a, b) VALUES (?1, ?2) ON CONFLICT(a) DO UPDATE SET b = excluded.b RETURNING a";
        let upsert = find_upsert(sql).unwrap();
        assert_eq!(upsert.assignments.as_deref(), Some("b = excluded.b"));
        assert_eq!(&sql[upsert.end..], "RETURNING a");
        assert!(!upsert.update_filter);

        let upsert = find_upsert("INSERT INTO t VALUES (1) ON CONFLICT DO NOTHING;").unwrap();
        assert!(upsert.assignments.is_none());
    }

    #[test]
    fn test_quote_str() {
        assert_eq!(quote_str("it's"), "'it''s'");
    }
}
