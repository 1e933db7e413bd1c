//! Statement masking using nom.
//!
//! Rewrite rules run over the statement with every string literal, blob
//! literal, quoted identifier and comment replaced by an opaque sentinel,
//! so no rule can touch their contents. Sentinels are restored at the end,
//! with identifiers rendered in the target dialect's quote style.
//!
//! ```text
//! SELECT "name" FROM t WHERE note = 'a || b'
//!        ───┬──                     ───┬────
//!           │                          └── \u{E000}S1\u{E001}
//!           └── \u{E000}I0\u{E001}
//! ```

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_till, take_until, take_while},
    combinator::{map, value},
    multi::many0,
    IResult,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ShiftError, ShiftResult};

/// Opens a sentinel in masked text.
pub const OPEN: char = '\u{E000}';
/// Closes a sentinel in masked text.
pub const CLOSE: char = '\u{E001}';

/// Regex fragment matching one identifier: bare word or quoted sentinel.
pub const IDENT: &str = r"(?:[A-Za-z_][A-Za-z0-9_$]*|\x{E000}I\d+\x{E001})";

static SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x{E000}([SBIC])(\d+)\x{E001}").expect("valid sentinel regex"));

/// An opaque fragment lifted out of the statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    /// String literal content, unescaped.
    Str(String),
    /// Blob literal hex digits.
    Blob(String),
    /// Quoted identifier name, unescaped.
    Ident(String),
    /// Comment, verbatim.
    Comment(String),
}

impl Piece {
    fn kind(&self) -> char {
        match self {
            Piece::Str(_) => 'S',
            Piece::Blob(_) => 'B',
            Piece::Ident(_) => 'I',
            Piece::Comment(_) => 'C',
        }
    }
}

/// Identifier quote character of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    DoubleQuote,
    Backtick,
    Bracket,
}

impl QuoteStyle {
    pub fn quote(&self, name: &str) -> String {
        match self {
            QuoteStyle::DoubleQuote => format!("\"{}\"", name.replace('"', "\"\"")),
            QuoteStyle::Backtick => format!("`{}`", name.replace('`', "``")),
            QuoteStyle::Bracket => format!("[{}]", name.replace(']', "]]")),
        }
    }
}

/// Blob literal syntax of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStyle {
    /// `X'ABCD'`
    XQuote,
    /// `'\xABCD'::bytea`
    PgHex,
    /// `0xABCD`
    Hex0x,
    /// `HEXTORAW('ABCD')`
    HexToRaw,
}

/// How pieces are written back into the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStyle {
    pub quote: QuoteStyle,
    pub blob: BlobStyle,
    /// Backslash is an escape character inside string literals.
    pub backslash_escapes: bool,
}

impl RenderStyle {
    /// SQLite's own style, used when a statement is passed through.
    pub const SQLITE: RenderStyle = RenderStyle {
        quote: QuoteStyle::DoubleQuote,
        blob: BlobStyle::XQuote,
        backslash_escapes: false,
    };

    fn string(&self, content: &str) -> String {
        let mut escaped = content.replace('\'', "''");
        if self.backslash_escapes {
            escaped = escaped.replace('\\', "\\\\");
        }
        format!("'{}'", escaped)
    }

    fn blob(&self, hex: &str) -> String {
        match self.blob {
            BlobStyle::XQuote => format!("X'{}'", hex),
            BlobStyle::PgHex => format!("'\\x{}'::bytea", hex),
            BlobStyle::Hex0x => format!("0x{}", hex),
            BlobStyle::HexToRaw => format!("HEXTORAW('{}')", hex),
        }
    }
}

/// A statement with its opaque fragments lifted out.
#[derive(Debug, Clone, Default)]
pub struct MaskedSql {
    pub text: String,
    pieces: Vec<Piece>,
}

impl MaskedSql {
    /// Add a piece and return its sentinel.
    pub fn push(&mut self, piece: Piece) -> String {
        let sentinel = format!("{}{}{}{}", OPEN, piece.kind(), self.pieces.len(), CLOSE);
        self.pieces.push(piece);
        sentinel
    }

    /// Mask a fragment produced by a rule, sharing this statement's pieces.
    pub fn mask_fragment(&mut self, fragment: &str) -> ShiftResult<String> {
        let mut text = String::with_capacity(fragment.len());
        scan(fragment, &mut text, &mut self.pieces)?;
        Ok(text)
    }

    /// The piece behind a token, if the token is exactly one sentinel.
    pub fn piece(&self, token: &str) -> Option<&Piece> {
        let caps = SENTINEL.captures(token.trim())?;
        let whole = caps.get(0)?;
        if whole.as_str().len() != token.trim().len() {
            return None;
        }
        let idx: usize = caps[2].parse().ok()?;
        self.pieces.get(idx)
    }

    /// Content of a string literal token.
    pub fn string_value(&self, token: &str) -> Option<&str> {
        match self.piece(token) {
            Some(Piece::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Name of an identifier token, quoted or bare.
    pub fn name_of(&self, token: &str) -> String {
        match self.piece(token) {
            Some(Piece::Ident(name)) => name.clone(),
            _ => token.trim().to_string(),
        }
    }

    /// Restore every sentinel in `text`.
    pub fn render(&self, text: &str, style: &RenderStyle) -> String {
        SENTINEL
            .replace_all(text, |caps: &regex::Captures| {
                let idx: usize = caps[2].parse().unwrap_or(usize::MAX);
                match self.pieces.get(idx) {
                    Some(Piece::Str(s)) => style.string(s),
                    Some(Piece::Blob(hex)) => style.blob(hex),
                    Some(Piece::Ident(name)) => style.quote.quote(name),
                    Some(Piece::Comment(c)) => c.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Restore the whole statement.
    pub fn finish(&self, style: &RenderStyle) -> String {
        self.render(&self.text, style)
    }
}

/// Mask a statement.
pub fn mask(sql: &str) -> ShiftResult<MaskedSql> {
    let mut masked = MaskedSql::default();
    let mut text = String::with_capacity(sql.len());
    scan(sql, &mut text, &mut masked.pieces)?;
    masked.text = text;
    Ok(masked)
}

/// Whether the character can appear inside a bare identifier.
pub fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn scan(input: &str, text: &mut String, pieces: &mut Vec<Piece>) -> ShiftResult<()> {
    let mut rest = input;
    while let Some(first) = rest.chars().next() {
        let pos = input.len() - rest.len();
        let prev = input[..pos].chars().next_back();
        let after_word = prev.map(is_ident_char).unwrap_or(false);

        let lifted = match first {
            '\'' => Some(
                string_literal(rest)
                    .map_err(|_| ShiftError::lex(pos, "unterminated string literal"))?,
            ),
            'x' | 'X' if !after_word && rest[1..].starts_with('\'') => Some(
                blob_literal(rest).map_err(|_| ShiftError::lex(pos, "malformed blob literal"))?,
            ),
            '"' => Some(
                quoted('"', "\"", "\"\"")(rest)
                    .map_err(|_| ShiftError::lex(pos, "unterminated quoted identifier"))?,
            ),
            '`' => Some(
                quoted('`', "`", "``")(rest)
                    .map_err(|_| ShiftError::lex(pos, "unterminated quoted identifier"))?,
            ),
            '[' => Some(
                quoted('[', "]", "]]")(rest)
                    .map_err(|_| ShiftError::lex(pos, "unterminated bracket identifier"))?,
            ),
            '-' if rest.starts_with("--") => line_comment(rest).ok(),
            '/' if rest.starts_with("/*") => Some(block_comment(rest)),
            _ => None,
        };

        match lifted {
            Some((remaining, piece)) => {
                text.push_str(&format!("{}{}{}{}", OPEN, piece.kind(), pieces.len(), CLOSE));
                pieces.push(piece);
                rest = remaining;
            }
            None => {
                text.push(first);
                rest = &rest[first.len_utf8()..];
            }
        }
    }
    Ok(())
}

/// Body of a quoted run, where the closing delimiter is escaped by doubling.
fn quoted_body<'a>(
    close: &'static str,
    doubled: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    move |input| {
        let (input, parts) = many0(alt((
            map(is_not(close), |s: &str| s.to_string()),
            value(close.to_string(), tag(doubled)),
        )))(input)?;
        let (input, _) = tag(close)(input)?;
        Ok((input, parts.concat()))
    }
}

fn quoted<'a>(
    open: char,
    close: &'static str,
    doubled: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, Piece> {
    move |input| {
        let (input, _) = nom::character::complete::char(open)(input)?;
        let (input, name) = quoted_body(close, doubled)(input)?;
        Ok((input, Piece::Ident(name)))
    }
}

fn string_literal(input: &str) -> IResult<&str, Piece> {
    let (input, _) = tag("'")(input)?;
    let (input, content) = quoted_body("'", "''")(input)?;
    Ok((input, Piece::Str(content)))
}

fn blob_literal(input: &str) -> IResult<&str, Piece> {
    let (input, _) = tag_no_case("x'")(input)?;
    let (input, hex) = take_while(|c: char| c.is_ascii_hexdigit())(input)?;
    let (input, _) = tag("'")(input)?;
    Ok((input, Piece::Blob(hex.to_ascii_uppercase())))
}

fn line_comment(input: &str) -> IResult<&str, Piece> {
    let (rest, body) = take_till(|c| c == '\n')(input)?;
    Ok((rest, Piece::Comment(body.to_string())))
}

fn block_comment(input: &str) -> (&str, Piece) {
    let closed: IResult<&str, &str> = take_until("*/")(&input[2..]);
    match closed {
        Ok((rest, _)) => {
            let end = input.len() - rest.len() + 2;
            (&input[end..], Piece::Comment(input[..end].to_string()))
        }
        Err(_) => ("", Piece::Comment(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PG: RenderStyle = RenderStyle {
        quote: QuoteStyle::DoubleQuote,
        blob: BlobStyle::PgHex,
        backslash_escapes: false,
    };

    #[test]
    fn test_literals_are_masked() {
        let m = mask("SELECT 'a || b', x FROM t").unwrap();
        assert!(!m.text.contains("||"));
        assert_eq!(m.finish(&RenderStyle::SQLITE), "SELECT 'a || b', x FROM t");
    }

    #[test]
    fn test_doubled_quotes() {
        let m = mask("SELECT 'it''s'").unwrap();
        let token = m.text.trim_start_matches("SELECT ").to_string();
        assert_eq!(m.string_value(&token), Some("it's"));
        assert_eq!(m.finish(&PG), "SELECT 'it''s'");
    }

    #[test]
    fn test_identifier_quote_conversion() {
        let m = mask("SELECT `First Name`, [Order], \"Mixed\"\"Case\" FROM t").unwrap();
        let mysql = RenderStyle {
            quote: QuoteStyle::Backtick,
            blob: BlobStyle::XQuote,
            backslash_escapes: true,
        };
        assert_eq!(m.finish(&PG), "SELECT \"First Name\", \"Order\", \"Mixed\"\"Case\" FROM t");
        assert_eq!(m.finish(&mysql), "SELECT `First Name`, `Order`, `Mixed\"Case` FROM t");
    }

    #[test]
    fn test_blob_literal() {
        let m = mask("INSERT INTO t VALUES (x'deadbeef')").unwrap();
        assert_eq!(m.finish(&PG), "INSERT INTO t VALUES ('\\xDEADBEEF'::bytea)");
    }

    #[test]
    fn test_column_named_x_is_not_a_blob() {
        let m = mask("SELECT max'a'").unwrap_or_default();
        assert!(m.text.starts_with("SELECT max"));
    }

    #[test]
    fn test_comments_preserved() {
        let sql = "SELECT 1 -- it's fine\n/* 'quoted' */ FROM t";
        let m = mask(sql).unwrap();
        assert!(!m.text.contains("it's"));
        assert_eq!(m.finish(&PG), sql);
    }

    #[test]
    fn test_backslash_escaping() {
        let m = mask(r"SELECT 'C:\temp'").unwrap();
        let mysql = RenderStyle {
            quote: QuoteStyle::Backtick,
            blob: BlobStyle::XQuote,
            backslash_escapes: true,
        };
        assert_eq!(m.finish(&mysql), r"SELECT 'C:\\temp'");
    }

    #[test]
    fn test_unterminated_literal() {
        let err = mask("SELECT 'oops").unwrap_err();
        assert!(matches!(err, ShiftError::Lex { position: 7, .. }));
    }

    #[test]
    fn test_piece_lookup_requires_whole_token() {
        let m = mask("SELECT \"a\" || 'b'").unwrap();
        let ident = m.text[7..].split(' ').next().unwrap().to_string();
        assert_eq!(m.name_of(&ident), "a");
        assert_eq!(m.name_of("plain"), "plain");
        assert!(m.piece(&format!("{} x", ident)).is_none());
    }
}
