//! Scanning helpers over masked statement text.
//!
//! Masked text never contains literal or quoted-identifier content, so a
//! parenthesis or comma seen here is always structural.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::lexer::{is_ident_char, CLOSE, OPEN};
use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords that can precede `(` without naming a function.
const NON_FUNCTION_WORDS: &[&str] = &[
    "and", "or", "not", "in", "exists", "where", "on", "select", "from", "when", "then", "else",
    "values", "as", "is", "like", "between", "set", "return", "returning", "using", "over",
];

/// Byte index of the `)` matching the `(` at `open`.
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte index of the `(` matching the `)` at `close`.
pub fn matching_paren_back(text: &str, close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[..=close].char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parenthesis depth at byte index `pos`.
pub fn depth_at(text: &str, pos: usize) -> i32 {
    text[..pos].chars().fold(0, |d, c| match c {
        '(' => d + 1,
        ')' => d - 1,
        _ => d,
    })
}

/// Split on commas at parenthesis depth zero; parts are trimmed.
pub fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = text[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

/// Compiled keyword patterns, keyed by keyword and anchoring.
static KEYWORDS: Lazy<RwLock<HashMap<(String, bool), Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Case-insensitive pattern for a keyword; inner spaces match any whitespace.
fn keyword_regex(keyword: &str, anchored: bool) -> Option<Regex> {
    let key = (keyword.to_string(), anchored);
    if let Ok(cache) = KEYWORDS.read() {
        if let Some(re) = cache.get(&key) {
            return Some(re.clone());
        }
    }
    let body = keyword.replace(' ', r"\s+");
    let pattern = if anchored {
        format!(r"(?i)^{}\b", body)
    } else {
        format!(r"(?i)\b{}\b", body)
    };
    let re = Regex::new(&pattern).ok()?;
    if let Ok(mut cache) = KEYWORDS.write() {
        cache.insert(key, re.clone());
    }
    Some(re)
}

/// Find a keyword at depth zero, case-insensitively, starting at `from`.
pub fn find_keyword(text: &str, keyword: &str, from: usize) -> Option<usize> {
    let re = keyword_regex(keyword, false)?;
    re.find_iter(&text[from..])
        .map(|m| m.start() + from)
        .find(|&pos| depth_at(text, pos) == 0)
}

/// Length of the keyword match found by [`find_keyword`] at `pos`.
pub fn keyword_len(text: &str, keyword: &str, pos: usize) -> usize {
    keyword_regex(keyword, true)
        .and_then(|re| re.find(&text[pos..]).map(|m| m.end()))
        .unwrap_or(keyword.len())
}

/// The first word of a statement, uppercased.
pub fn leading_keyword(text: &str) -> String {
    static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([A-Za-z]+)").expect("valid regex"));
    WORD.captures(text)
        .map(|c| c[1].to_ascii_uppercase())
        .unwrap_or_default()
}

fn prev_char(text: &str, end: usize) -> Option<(usize, char)> {
    text[..end].char_indices().next_back()
}

fn skip_ws_back(text: &str, mut end: usize) -> usize {
    while let Some((i, c)) = prev_char(text, end) {
        if c.is_whitespace() {
            end = i;
        } else {
            break;
        }
    }
    end
}

fn skip_ws(text: &str, mut start: usize) -> usize {
    while let Some(c) = text[start..].chars().next() {
        if c.is_whitespace() {
            start += c.len_utf8();
        } else {
            break;
        }
    }
    start
}

/// Start of the word-and-sentinel chain (`t.col`, `"t".x`) ending at `end`.
fn chain_start(text: &str, mut end: usize) -> usize {
    loop {
        match prev_char(text, end) {
            Some((i, CLOSE)) => match text[..i].rfind(OPEN) {
                Some(open) => end = open,
                None => return end,
            },
            Some((i, c)) if is_ident_char(c) || c == '.' => end = i,
            _ => return end,
        }
    }
}

/// End of the word-and-sentinel chain starting at `start`.
fn chain_end(text: &str, mut start: usize) -> usize {
    loop {
        match text[start..].chars().next() {
            Some(OPEN) => match text[start..].find(CLOSE) {
                Some(close) => start += close + CLOSE.len_utf8(),
                None => return start,
            },
            Some(c) if is_ident_char(c) || c == '.' => start += c.len_utf8(),
            _ => return start,
        }
    }
}

fn is_function_name(word: &str) -> bool {
    !word.is_empty()
        && !word.starts_with(|c: char| c.is_ascii_digit())
        && !NON_FUNCTION_WORDS.contains(&word.to_ascii_lowercase().as_str())
}

/// Start of the primary operand ending just before `end`.
///
/// A primary is a literal, identifier chain, placeholder, function call or
/// parenthesized group.
pub fn operand_before(text: &str, end: usize) -> Option<usize> {
    let end = skip_ws_back(text, end);
    let (i, c) = prev_char(text, end)?;
    if c == ')' {
        let open = matching_paren_back(text, i)?;
        let name_start = chain_start(text, open);
        if name_start < open && is_function_name(&text[name_start..open]) {
            return Some(name_start);
        }
        return Some(open);
    }
    if c == CLOSE || is_ident_char(c) || c == '.' {
        let start = chain_start(text, end);
        // a placeholder marker `?N` belongs to the operand
        if let Some((q, '?')) = prev_char(text, start) {
            return Some(q);
        }
        return (start < end).then_some(start);
    }
    if c == '?' {
        return Some(i);
    }
    None
}

/// End of the primary operand starting at or after `start`.
pub fn operand_after(text: &str, start: usize) -> Option<(usize, usize)> {
    let start = skip_ws(text, start);
    let c = text[start..].chars().next()?;
    let end = match c {
        '(' => matching_paren(text, start)? + 1,
        '?' => {
            let digits = text[start + 1..]
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(text.len() - start - 1);
            start + 1 + digits
        }
        '-' | '+' if text[start + 1..].starts_with(|ch: char| ch.is_ascii_digit()) => {
            chain_end(text, start + 1)
        }
        c if c == OPEN || is_ident_char(c) => {
            let end = chain_end(text, start);
            if text[end..].starts_with('(') && is_function_name(&text[start..end]) {
                matching_paren(text, end)? + 1
            } else {
                end
            }
        }
        _ => return None,
    };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_parens() {
        let t = "f(a, g(b), c) + 1";
        assert_eq!(matching_paren(t, 1), Some(12));
        assert_eq!(matching_paren_back(t, 12), Some(1));
        assert_eq!(matching_paren("(()", 0), None);
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(split_top_level("a, f(b, c), d"), vec!["a", "f(b, c)", "d"]);
        assert_eq!(split_top_level("  "), Vec::<&str>::new());
    }

    #[test]
    fn test_find_keyword_skips_nested() {
        let t = "SELECT (SELECT 1 LIMIT 1) FROM t LIMIT 5";
        let pos = find_keyword(t, "LIMIT", 0).unwrap();
        assert_eq!(&t[pos..], "LIMIT 5");
        let t = "SELECT a FROM t ORDER  BY a";
        let pos = find_keyword(t, "ORDER BY", 0).unwrap();
        assert_eq!(keyword_len(t, "ORDER BY", pos), "ORDER  BY".len());
    }

    #[test]
    fn test_operands() {
        let t = "a.b || upper(c) || ?2";
        let op = t.find("||").unwrap();
        assert_eq!(operand_before(t, op), Some(0));
        let (s, e) = operand_after(t, op + 2).unwrap();
        assert_eq!(&t[s..e], "upper(c)");
        let op2 = t.rfind("||").unwrap();
        let (s, e) = operand_after(t, op2 + 2).unwrap();
        assert_eq!(&t[s..e], "?2");
        assert_eq!(&t[operand_before(t, op2).unwrap()..op2].trim_end(), &"upper(c)");
    }

    #[test]
    fn test_operand_before_parenthesized_group() {
        let t = "WHERE (a + 1) || b";
        let op = t.find("||").unwrap();
        assert_eq!(&t[operand_before(t, op).unwrap()..op], "(a + 1) ");
    }

    #[test]
    fn test_keyword_patterns_are_cached() {
        let t = "insert into t values (1)";
        assert_eq!(find_keyword(t, "VALUES", 0), Some(14));
        assert_eq!(find_keyword(t, "VALUES", 0), Some(14));
        let cache = KEYWORDS.read().unwrap();
        assert!(cache.contains_key(&("VALUES".to_string(), false)));
    }

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  create table t"), "CREATE");
        assert_eq!(leading_keyword("(select 1)"), "");
    }
}
