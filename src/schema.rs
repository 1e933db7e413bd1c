//! DDL rewriting.
//!
//! Statements are masked first, so every pattern below only ever sees
//! structural SQL. Column definitions are rebuilt piece by piece (name,
//! mapped type, constraint tail); everything else is rewritten in place.

use std::cell::RefCell;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::dialect::shared::quote_str;
use crate::dialect::{GuardStyle, ObjectName, SqlDialect, TempTableStyle};
use crate::error::ShiftResult;
use crate::lexer::{mask, MaskedSql, Piece, IDENT};
use crate::options::{Feature, PluginOptions};
use crate::rules::expr::{leading_keyword, matching_paren, operand_after, split_top_level};
use crate::rules::{RuleCtx, RuleSet, Stage, Statement};
use crate::typemap::{split_type, TypeMapper, TypeMapping};
use crate::value::SqlValue;

/// Rewrites SQLite-flavored DDL for one target dialect.
pub trait SchemaRewriter: Send + Sync {
    fn name(&self) -> &str;

    fn source_dialect(&self) -> &str {
        "sqlite"
    }

    /// Rewrite one CREATE, ALTER or DROP statement.
    fn rewrite_schema(&self, sql: &str) -> ShiftResult<String>;

    /// Type mappings in effect, custom overrides first.
    fn type_mappings(&self) -> Vec<TypeMapping>;

    fn map_type(&self, source_type: &str) -> String;

    /// Whether a rewrite category is enabled.
    fn needs_translation(&self, feature: Feature) -> bool;
}

/// Rewriting stages applied to expressions embedded in DDL.
const EXPRESSION_STAGES: &[Stage] = &[Stage::Function, Stage::Operator, Stage::Transform];
const QUERY_STAGES: &[Stage] = &[
    Stage::Function,
    Stage::Operator,
    Stage::Transform,
    Stage::Pagination,
];

/// Words that end the type name of a column definition.
const CONSTRAINT_WORDS: &[&str] = &[
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
    "AUTOINCREMENT",
];

fn ddl_regex(pattern: &str) -> Regex {
    let name = format!(r"(?:{ident}\.)?{ident}", ident = IDENT);
    let pattern = pattern.replace("{NAME}", &name).replace("{IDENT}", IDENT);
    Regex::new(&pattern).expect("valid DDL regex")
}

static LEADING_COMMENTS: Lazy<Regex> =
    Lazy::new(|| ddl_regex(r"^(?:\s*\x{E000}C\d+\x{E001})*\s*"));
static CREATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(
        r"(?is)^CREATE\s+(?:(?P<temp>TEMP|TEMPORARY)\s+)?TABLE\s+(?P<ine>IF\s+NOT\s+EXISTS\s+)?(?P<name>{NAME})\s*",
    )
});
static CREATE_INDEX: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(
        r"(?is)^CREATE\s+(?P<unique>UNIQUE\s+)?INDEX\s+(?P<ine>IF\s+NOT\s+EXISTS\s+)?(?P<name>{NAME})\s+ON\s+(?P<table>{NAME})\s*\(",
    )
});
static CREATE_VIEW: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(
        r"(?is)^CREATE\s+(?P<temp>(?:TEMP|TEMPORARY)\s+)?VIEW\s+(?P<ine>IF\s+NOT\s+EXISTS\s+)?(?P<name>{NAME})(?P<cols>\s*\([^()]*\))?\s+AS\s+(?P<body>.*)$",
    )
});
static CREATE_UNSUPPORTED: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?is)^CREATE\s+(?:(?:TEMP|TEMPORARY)\s+)?(?P<what>TRIGGER|VIRTUAL\s+TABLE)\b")
});
static AS_QUERY: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?is)^AS\s+(?P<query>.*)$"));
static ALTER_TABLE: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?is)^ALTER\s+TABLE\s+(?P<table>{NAME})\s+(?P<action>.*?)\s*(?P<semi>;?)\s*$")
});
static ADD_COLUMN: Lazy<Regex> =
    Lazy::new(|| ddl_regex(r"(?is)^ADD\s+(?:COLUMN\s+)?(?P<def>.+)$"));
static RENAME_TABLE: Lazy<Regex> =
    Lazy::new(|| ddl_regex(r"(?is)^RENAME\s+TO\s+(?P<to>{NAME})$"));
static RENAME_COLUMN: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?is)^RENAME\s+(?:COLUMN\s+)?(?P<from>{IDENT})\s+TO\s+(?P<to>{IDENT})$")
});
static DROP_COLUMN: Lazy<Regex> =
    Lazy::new(|| ddl_regex(r"(?is)^DROP\s+(?:COLUMN\s+)?(?P<column>{IDENT})$"));
static DROP_INDEX: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?is)^DROP\s+INDEX\b"));
static INDEX_WHERE: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?is)^WHERE\s+(?P<expr>.+)$"));

static COLUMN: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?s)^(?P<name>{IDENT})\s*(?P<rest>.*)$"));
static TYPE_WORD: Lazy<Regex> = Lazy::new(|| ddl_regex(r"^([A-Za-z_][A-Za-z0-9_]*)\s*"));
static TABLE_CONSTRAINT: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?i)^(?:CONSTRAINT|PRIMARY\s+KEY|UNIQUE|CHECK|FOREIGN\s+KEY)\b")
});
static ROWID_PRIMARY_KEY: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(
        r"(?i)\bPRIMARY\s+KEY(?:\s+(?:ASC|DESC))?(?:\s+ON\s+CONFLICT\s+[A-Za-z]+)?(?:\s+(?P<autoinc>AUTOINCREMENT))?\b",
    )
});
static AUTOINCREMENT: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?i)\s*\bAUTOINCREMENT\b"));
static CONFLICT_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?i)\s*\bON\s+CONFLICT\s+(?:ROLLBACK|ABORT|FAIL|IGNORE|REPLACE)\b")
});
static COLLATE: Lazy<Regex> =
    Lazy::new(|| ddl_regex(r"(?i)\s*\bCOLLATE\s+(?P<name>NOCASE|BINARY|RTRIM)\b"));
static ON_UPDATE: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?i)\s*\bON\s+UPDATE\s+(?:CASCADE|RESTRICT|NO\s+ACTION|SET\s+NULL|SET\s+DEFAULT)\b")
});
static ON_DELETE_IMPLICIT: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?i)\s*\bON\s+DELETE\s+(?:RESTRICT|NO\s+ACTION|SET\s+DEFAULT)\b")
});
static DEFERRABLE: Lazy<Regex> = Lazy::new(|| {
    ddl_regex(r"(?i)\s*\b(?:NOT\s+)?DEFERRABLE(?:\s+INITIALLY\s+(?:DEFERRED|IMMEDIATE))?\b")
});
static DEFAULT_KEYWORD: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?i)\bDEFAULT\b"));
static CHECK_KEYWORD: Lazy<Regex> = Lazy::new(|| ddl_regex(r"(?i)\bCHECK\s*\("));
static TABLE_OPTIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bWITHOUT\s+ROWID\b",
        r"(?i)\bSTRICT\b",
        r"(?i)\bENGINE\s*=\s*\w+",
        r"(?i)\b(?:DEFAULT\s+)?(?:CHARSET|CHARACTER\s+SET)\s*=?\s*\w+",
        r"(?i)\bCOLLATE\s*=\s*\w+",
        r"(?i)\bAUTO_INCREMENT\s*=\s*\d+",
    ]
    .iter()
    .map(|p| ddl_regex(p))
    .collect()
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| ddl_regex(r"\s+"));

/// Collapse whitespace runs; masked text holds no literal content.
fn tidy(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// The object keyword of a CREATE statement (`SEQUENCE`, `SCHEMA`, ...).
fn create_object(text: &str) -> String {
    text.split_whitespace()
        .nth(1)
        .map(|w| w.to_ascii_uppercase())
        .unwrap_or_default()
}

fn join_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a trailing semicolon off a statement tail.
fn split_semicolon(text: &str) -> (&str, &'static str) {
    let trimmed = text.trim();
    match trimmed.strip_suffix(';') {
        Some(rest) => (rest.trim_end(), ";"),
        None => (trimmed, ""),
    }
}

/// Split `VARCHAR (20) NOT NULL` into the type name and its constraint tail.
fn split_column_type(rest: &str) -> (String, String) {
    let mut words = Vec::new();
    let mut pos = 0;
    while let Some(caps) = TYPE_WORD.captures(&rest[pos..]) {
        let word = &caps[1];
        if CONSTRAINT_WORDS.contains(&word.to_ascii_uppercase().as_str()) {
            break;
        }
        words.push(word.to_string());
        pos += caps[0].len();
    }
    let mut column_type = words.join(" ");
    if !words.is_empty() && rest[pos..].starts_with('(') {
        if let Some(close) = matching_paren(rest, pos) {
            column_type.push_str(&rest[pos..=close]);
            pos = close + 1;
        }
    }
    (column_type, rest[pos..].trim().to_string())
}

/// Remove SQLite and foreign table options; returns what is left and the
/// statement terminator.
fn strip_table_options(tail: &str) -> (String, &'static str) {
    let (tail, semi) = split_semicolon(tail);
    let mut rest = tail.to_string();
    for option in TABLE_OPTIONS.iter() {
        rest = option.replace_all(&rest, "").into_owned();
    }
    (tidy(&rest.replace(',', " ")), semi)
}

fn object_name(masked: &MaskedSql, token: &str) -> ObjectName {
    let plain = token
        .split('.')
        .map(|part| masked.name_of(part))
        .collect::<Vec<_>>()
        .join(".");
    ObjectName {
        token: token.trim().to_string(),
        plain,
    }
}

/// Whether the statement's first keyword, after any comments, is
/// `CREATE`, `ALTER` or `DROP`. Malformed statements are not DDL.
pub fn is_schema_statement(sql: &str) -> bool {
    let Ok(masked) = mask(sql) else {
        return false;
    };
    let lead = LEADING_COMMENTS.find(&masked.text).map_or(0, |m| m.end());
    matches!(
        leading_keyword(&masked.text[lead..]).as_str(),
        "CREATE" | "ALTER" | "DROP"
    )
}

/// Rule-based schema rewriter driven by a [`SqlDialect`].
pub struct DialectSchemaRewriter {
    dialect: Arc<dyn SqlDialect>,
    rules: RuleSet,
    types: TypeMapper,
    options: PluginOptions,
}

impl DialectSchemaRewriter {
    pub fn new(dialect: Arc<dyn SqlDialect>, options: PluginOptions) -> Self {
        Self {
            rules: dialect.rule_set(),
            types: dialect.type_mapper(&options),
            dialect,
            options,
        }
    }

    pub fn dialect(&self) -> &Arc<dyn SqlDialect> {
        &self.dialect
    }

    fn rewrite_statement(
        &self,
        text: &str,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        match leading_keyword(text).as_str() {
            "CREATE" => self.create(text, stmt, ctx),
            "ALTER" => self.alter_table(text, stmt, ctx),
            "DROP" => {
                if DROP_INDEX.is_match(text) && self.dialect.drop_index_needs_table() {
                    ctx.degrade("DROP INDEX without a table name")?;
                }
                Ok(text.to_string())
            }
            _ => Err(ctx.translation_error("statement does not start with CREATE, ALTER or DROP")),
        }
    }

    fn create(&self, text: &str, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<String> {
        if let Some(caps) = CREATE_UNSUPPORTED.captures(text) {
            ctx.degrade(format!("CREATE {}", tidy(&caps["what"]).to_ascii_uppercase()))?;
            return Ok(text.to_string());
        }
        if let Some(caps) = CREATE_TABLE.captures(text) {
            return self.create_table(text, &caps, stmt, ctx);
        }
        if let Some(caps) = CREATE_INDEX.captures(text) {
            return self.create_index(text, &caps, stmt, ctx);
        }
        if let Some(caps) = CREATE_VIEW.captures(text) {
            return self.create_view(&caps, stmt, ctx);
        }
        ctx.degrade(format!("unrecognized CREATE {}", create_object(text)))?;
        Ok(text.to_string())
    }

    /// Table name and keyword for a (possibly temporary) table.
    fn table_target(
        &self,
        temp: bool,
        name: ObjectName,
        stmt: &mut Statement,
    ) -> (&'static str, ObjectName) {
        if !temp {
            return ("", name);
        }
        match self.dialect.temp_table_style() {
            TempTableStyle::Temporary => ("TEMPORARY ", name),
            TempTableStyle::GlobalTemporary => ("GLOBAL TEMPORARY ", name),
            TempTableStyle::HashPrefix => {
                let plain = format!("#{}", name.plain);
                let token = match stmt.masked.piece(&name.token) {
                    Some(Piece::Ident(_)) => stmt.masked.push(Piece::Ident(plain.clone())),
                    _ => plain.clone(),
                };
                ("", ObjectName { token, plain })
            }
        }
    }

    fn create_table(
        &self,
        text: &str,
        caps: &Captures<'_>,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        let temp = caps.name("temp").is_some();
        let name = object_name(&stmt.masked, &caps["name"]);
        let rest_start = caps.get(0).map_or(text.len(), |m| m.end());
        let rest = &text[rest_start..];

        let body = if rest.starts_with('(') {
            let close = matching_paren(text, rest_start)
                .ok_or_else(|| ctx.translation_error("unbalanced column list"))?;
            let mut defs = Vec::new();
            for item in split_top_level(&text[rest_start + 1..close]) {
                if item.is_empty() {
                    continue;
                }
                let def = if TABLE_CONSTRAINT.is_match(item) {
                    self.constraints(item, stmt, ctx)?
                } else {
                    self.column_def(item, true, stmt, ctx)?
                };
                defs.push(def);
            }
            let (options, semi) = strip_table_options(&text[close + 1..]);
            let mut body = format!("({})", defs.join(", "));
            if !options.is_empty() {
                body.push(' ');
                body.push_str(&options);
            }
            if temp && self.dialect.temp_table_style() == TempTableStyle::GlobalTemporary {
                body.push_str(" ON COMMIT PRESERVE ROWS");
            }
            body.push_str(semi);
            body
        } else if let Some(query) = AS_QUERY.captures(rest) {
            format!("AS {}", self.rewrite_fragment(stmt, &query["query"], QUERY_STAGES, ctx)?)
        } else {
            return Err(ctx.translation_error("CREATE TABLE without a column list"));
        };

        let (temp_keyword, table) = self.table_target(temp, name, stmt);
        let head = format!("CREATE {}TABLE", temp_keyword);
        if caps.name("ine").is_none() {
            return Ok(format!("{} {} {}", head, table.token, body));
        }
        match self.dialect.table_guard() {
            GuardStyle::Native => Ok(format!("{} IF NOT EXISTS {} {}", head, table.token, body)),
            GuardStyle::Unsupported => {
                ctx.degrade("CREATE TABLE IF NOT EXISTS")?;
                Ok(format!("{} {} {}", head, table.token, body))
            }
            GuardStyle::Catalog => {
                let object = if table.plain.starts_with('#') {
                    format!("tempdb..{}", table.plain)
                } else {
                    table.plain.clone()
                };
                let guard = stmt.masked.mask_fragment(&format!(
                    "IF OBJECT_ID(N{}, N'U') IS NULL",
                    quote_str(&object)
                ))?;
                Ok(format!("{} {} {} {}", guard, head, table.token, body))
            }
        }
    }

    /// Rewrite one column definition; `in_create` enables identity columns.
    fn column_def(
        &self,
        item: &str,
        in_create: bool,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        let caps = COLUMN.captures(item.trim()).ok_or_else(|| {
            ctx.translation_error(format!("cannot parse column definition '{}'", item.trim()))
        })?;
        let name = caps["name"].to_string();
        let (column_type, rest) = split_column_type(&caps["rest"]);
        let (base, _) = split_type(&column_type);

        if in_create && base == "INTEGER" && ctx.options.enabled(Feature::AutoIncrement) {
            if let Some(pk) = ROWID_PRIMARY_KEY.captures(&rest) {
                let whole = pk.get(0).map_or(0..0, |m| m.range());
                let identity = self.dialect.identity_column(pk.name("autoinc").is_some());
                let remainder = format!("{} {}", &rest[..whole.start], &rest[whole.end..]);
                let remainder = self.constraints(&remainder, stmt, ctx)?;
                return Ok(join_parts(&[&name, &identity, &remainder]));
            }
        }

        let rest = AUTOINCREMENT.replace_all(&rest, "").into_owned();
        let mapped = if column_type.is_empty() {
            ctx.types.fallback().to_string()
        } else {
            if ctx.options.strict && ctx.types.lookup(&column_type).is_none() {
                return Err(ctx.unsupported(format!("column type {}", column_type)));
            }
            ctx.types.map_type(&column_type)
        };
        let rest = self.defaults(&rest, &column_type, stmt, ctx)?;
        let rest = self.constraints(&rest, stmt, ctx)?;
        Ok(join_parts(&[&name, &mapped, &rest]))
    }

    fn defaults(
        &self,
        text: &str,
        column_type: &str,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        if !ctx.options.enabled(Feature::Default) {
            return Ok(text.to_string());
        }
        let mut out = text.to_string();
        let mut from = 0;
        while let Some(m) = DEFAULT_KEYWORD.find_at(&out, from) {
            let Some((start, end)) = operand_after(&out, m.end()) else {
                from = m.end();
                continue;
            };
            let value = out[start..end].to_string();
            let replacement = if value.contains('(') {
                self.rewrite_fragment(stmt, &value, EXPRESSION_STAGES, ctx)?
            } else {
                self.default_literal(&value, column_type, stmt, ctx)?
            };
            out.replace_range(start..end, &replacement);
            from = start + replacement.len();
        }
        Ok(out)
    }

    /// Convert a literal DEFAULT through the column type's converter.
    fn default_literal(
        &self,
        token: &str,
        column_type: &str,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        let value = match stmt.masked.string_value(token) {
            Some(s) => SqlValue::Text(s.to_string()),
            None => match SqlValue::from_literal(token) {
                Some(v) => v,
                None => return Ok(token.to_string()),
            },
        };
        let converted = ctx.types.convert_value(column_type, &value);
        if converted != value {
            return stmt.masked.mask_fragment(&converted.to_literal());
        }
        match value {
            SqlValue::Bool(b) => Ok(ctx.dialect.bool_literal(b)),
            _ => Ok(token.to_string()),
        }
    }

    fn checks(&self, text: &str, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<String> {
        if !ctx.options.enabled(Feature::Check) {
            return Ok(text.to_string());
        }
        let mut out = text.to_string();
        let mut from = 0;
        while let Some(m) = CHECK_KEYWORD.find_at(&out, from) {
            let open = m.end() - 1;
            let close = matching_paren(&out, open)
                .ok_or_else(|| ctx.translation_error("unbalanced CHECK expression"))?;
            let inner = out[open + 1..close].to_string();
            let rewritten = self.rewrite_fragment(stmt, &inner, EXPRESSION_STAGES, ctx)?;
            out.replace_range(open + 1..close, &rewritten);
            from = open + rewritten.len() + 2;
        }
        Ok(out)
    }

    fn collations(&self, text: &str) -> String {
        COLLATE
            .replace_all(text, |caps: &Captures<'_>| match self.dialect.collation(&caps["name"]) {
                Some(target) => format!(" COLLATE {}", target),
                None => String::new(),
            })
            .into_owned()
    }

    /// Rewrite a constraint tail or a table constraint.
    fn constraints(&self, text: &str, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<String> {
        let mut out = CONFLICT_CLAUSE.replace_all(text, "").into_owned();
        out = self.collations(&out);
        out = self.checks(&out, stmt, ctx)?;
        if ctx.options.enabled(Feature::ForeignKey) {
            if !self.dialect.on_update_actions() {
                out = ON_UPDATE.replace_all(&out, "").into_owned();
                out = ON_DELETE_IMPLICIT.replace_all(&out, "").into_owned();
            }
            if !self.dialect.deferrable_constraints() {
                out = DEFERRABLE.replace_all(&out, "").into_owned();
            }
        }
        Ok(tidy(&out))
    }

    fn create_index(
        &self,
        text: &str,
        caps: &Captures<'_>,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        if !ctx.options.enabled(Feature::Index) {
            return Ok(text.to_string());
        }
        let open = caps.get(0).map_or(0, |m| m.end() - 1);
        let close = matching_paren(text, open)
            .ok_or_else(|| ctx.translation_error("unbalanced index column list"))?;
        let columns = split_top_level(&self.collations(&text[open + 1..close]))
            .into_iter()
            .map(tidy)
            .collect::<Vec<_>>()
            .join(", ");
        let (tail, semi) = split_semicolon(&text[close + 1..]);

        let mut suffix = String::new();
        if let Some(filter) = INDEX_WHERE.captures(tail) {
            if self.dialect.partial_indexes() {
                let expr = self.rewrite_fragment(stmt, &filter["expr"], EXPRESSION_STAGES, ctx)?;
                suffix = format!(" WHERE {}", expr);
            } else {
                ctx.degrade("partial index (CREATE INDEX ... WHERE)")?;
            }
        } else if !tail.is_empty() {
            suffix = format!(" {}", tail);
        }

        let unique = if caps.name("unique").is_some() { "UNIQUE " } else { "" };
        let name = object_name(&stmt.masked, &caps["name"]);
        let create = format!(
            "CREATE {}INDEX {{guard}}{} ON {} ({}){}{}",
            unique,
            name.token,
            caps["table"].trim(),
            columns,
            suffix,
            semi
        );
        if caps.name("ine").is_none() {
            return Ok(create.replace("{guard}", ""));
        }
        match self.dialect.index_guard() {
            GuardStyle::Native => Ok(create.replace("{guard}", "IF NOT EXISTS ")),
            GuardStyle::Unsupported => {
                ctx.degrade("CREATE INDEX IF NOT EXISTS")?;
                Ok(create.replace("{guard}", ""))
            }
            GuardStyle::Catalog => {
                let guard = stmt.masked.mask_fragment(&format!(
                    "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N{})",
                    quote_str(&name.plain)
                ))?;
                Ok(format!("{} {}", guard, create.replace("{guard}", "")))
            }
        }
    }

    fn create_view(
        &self,
        caps: &Captures<'_>,
        stmt: &mut Statement,
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        let mut head = String::from("CREATE ");
        if caps.name("ine").is_some() {
            head.push_str(self.dialect.view_replace_keyword());
            head.push(' ');
        }
        if caps.name("temp").is_some() {
            if self.dialect.temporary_views() {
                head.push_str("TEMPORARY ");
            } else {
                ctx.degrade("CREATE TEMP VIEW")?;
            }
        }
        let columns = caps
            .name("cols")
            .map(|m| format!(" {}", m.as_str().trim()))
            .unwrap_or_default();
        let body = self.rewrite_fragment(stmt, &caps["body"], QUERY_STAGES, ctx)?;
        Ok(format!("{}VIEW {}{} AS {}", head, caps["name"].trim(), columns, body))
    }

    fn alter_table(&self, text: &str, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<String> {
        let Some(caps) = ALTER_TABLE.captures(text) else {
            ctx.degrade("ALTER statement other than ALTER TABLE <name> <action>")?;
            return Ok(text.to_string());
        };
        let table = object_name(&stmt.masked, &caps["table"]);
        let action = caps["action"].to_string();
        let semi = caps["semi"].to_string();

        let sql = if let Some(add) = ADD_COLUMN.captures(&action) {
            let def = self.column_def(&add["def"], false, stmt, ctx)?;
            self.dialect.add_column(&table, &def)
        } else if let Some(rename) = RENAME_TABLE.captures(&action) {
            let to = object_name(&stmt.masked, &rename["to"]);
            self.dialect.rename_table(&table, &to)
        } else if let Some(rename) = RENAME_COLUMN.captures(&action) {
            let from = object_name(&stmt.masked, &rename["from"]);
            let to = object_name(&stmt.masked, &rename["to"]);
            self.dialect.rename_column(&table, &from, &to)
        } else if let Some(drop) = DROP_COLUMN.captures(&action) {
            format!("ALTER TABLE {} DROP COLUMN {}", table.token, drop["column"].trim())
        } else {
            ctx.degrade(format!("ALTER TABLE action '{}'", leading_keyword(&action)))?;
            return Ok(text.to_string());
        };
        Ok(format!("{}{}", stmt.masked.mask_fragment(&sql)?, semi))
    }

    /// Run rule stages over a masked fragment of the statement.
    fn rewrite_fragment(
        &self,
        stmt: &mut Statement,
        fragment: &str,
        stages: &[Stage],
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<String> {
        stmt.with_fragment(fragment, |s| self.rules.apply_stages(s, stages, ctx))
    }
}

impl SchemaRewriter for DialectSchemaRewriter {
    fn name(&self) -> &str {
        self.dialect.name()
    }

    fn rewrite_schema(&self, sql: &str) -> ShiftResult<String> {
        let warnings = RefCell::new(Vec::new());
        let ctx = RuleCtx::new(self.dialect.as_ref(), &self.types, &self.options, &warnings);
        let mut stmt = Statement::new(sql, &[])?;
        let text = stmt.text().to_string();
        let lead = LEADING_COMMENTS.find(&text).map_or(0, |m| m.end());
        let body = self.rewrite_statement(&text[lead..], &mut stmt, &ctx)?;
        let out = format!("{}{}", &text[..lead], body);
        let rendered = stmt.masked.render(&out, &self.dialect.render_style());
        tracing::debug!("[{}] {} => {}", self.dialect.name(), sql.trim(), rendered);
        Ok(rendered)
    }

    fn type_mappings(&self) -> Vec<TypeMapping> {
        self.types.mappings()
    }

    fn map_type(&self, source_type: &str) -> String {
        self.types.map_type(source_type)
    }

    fn needs_translation(&self, feature: Feature) -> bool {
        self.options.enabled(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::error::ShiftError;
    use crate::test_support::count_warnings;
    use pretty_assertions::assert_eq;

    fn rewriter(dialect: Dialect) -> DialectSchemaRewriter {
        DialectSchemaRewriter::new(dialect.build(), PluginOptions::default())
    }

    fn strict(dialect: Dialect) -> DialectSchemaRewriter {
        DialectSchemaRewriter::new(dialect.build(), PluginOptions::builder().strict(true).build())
    }

    const USERS: &str = "CREATE TABLE IF NOT EXISTS users (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n  name TEXT NOT NULL COLLATE NOCASE,\n  active BOOLEAN DEFAULT TRUE,\n  created DATETIME DEFAULT (datetime('now'))\n) WITHOUT ROWID;";

    #[test]
    fn test_postgres_create_table() {
        assert_eq!(
            rewriter(Dialect::Postgres).rewrite_schema(USERS).unwrap(),
            "CREATE TABLE IF NOT EXISTS users (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, \
             active BOOLEAN DEFAULT TRUE, created TIMESTAMP DEFAULT (CURRENT_TIMESTAMP));"
        );
    }

    #[test]
    fn test_mssql_create_table_guard_and_defaults() {
        let sql = r#"CREATE TABLE IF NOT EXISTS "order" (id INTEGER PRIMARY KEY, flag BOOLEAN DEFAULT FALSE, label VARCHAR(20) COLLATE NOCASE)"#;
        assert_eq!(
            rewriter(Dialect::SqlServer).rewrite_schema(sql).unwrap(),
            "IF OBJECT_ID(N'order', N'U') IS NULL CREATE TABLE [order] (id INT IDENTITY(1,1) PRIMARY KEY, \
             flag BIT DEFAULT 0, label NVARCHAR(20) COLLATE SQL_Latin1_General_CP1_CI_AS)"
        );
    }

    #[test]
    fn test_temp_tables() {
        let sql = "CREATE TEMP TABLE scratch (v TEXT)";
        assert_eq!(
            rewriter(Dialect::SqlServer).rewrite_schema(sql).unwrap(),
            "CREATE TABLE #scratch (v NVARCHAR(MAX))"
        );
        assert_eq!(
            rewriter(Dialect::Postgres).rewrite_schema(sql).unwrap(),
            "CREATE TEMPORARY TABLE scratch (v TEXT)"
        );
        assert_eq!(
            rewriter(Dialect::Oracle)
                .rewrite_schema(
                    "CREATE TEMP TABLE s (id INTEGER PRIMARY KEY, parent INTEGER REFERENCES p(id) ON DELETE CASCADE ON UPDATE CASCADE)"
                )
                .unwrap(),
            "CREATE GLOBAL TEMPORARY TABLE s (id NUMBER(10) GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY, \
             parent NUMBER(19) REFERENCES p(id) ON DELETE CASCADE) ON COMMIT PRESERVE ROWS"
        );
    }

    #[test]
    fn test_mysql_identifiers_and_table_options() {
        let sql = r#"CREATE TABLE "t" ("a" INTEGER PRIMARY KEY AUTOINCREMENT, b TEXT) STRICT, WITHOUT ROWID"#;
        assert_eq!(
            rewriter(Dialect::MySql).rewrite_schema(sql).unwrap(),
            "CREATE TABLE `t` (`a` BIGINT AUTO_INCREMENT PRIMARY KEY, b TEXT)"
        );
    }

    #[test]
    fn test_conflict_clauses_and_checks() {
        let sql = "CREATE TABLE t (a TEXT UNIQUE ON CONFLICT REPLACE, n INTEGER CHECK (n == 1), \
                   PRIMARY KEY (a) ON CONFLICT IGNORE, CHECK (ifnull(n, 0) > 0))";
        assert_eq!(
            rewriter(Dialect::Postgres).rewrite_schema(sql).unwrap(),
            "CREATE TABLE t (a TEXT UNIQUE, n INTEGER CHECK (n = 1), PRIMARY KEY (a), \
             CHECK (COALESCE(n, 0) > 0))"
        );
    }

    #[test]
    fn test_disabled_auto_increment_keeps_type() {
        let options = PluginOptions::builder().disable(Feature::AutoIncrement).build();
        let schema = DialectSchemaRewriter::new(Dialect::Postgres.build(), options);
        assert!(!schema.needs_translation(Feature::AutoIncrement));
        assert_eq!(
            schema
                .rewrite_schema("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT)")
                .unwrap(),
            "CREATE TABLE t (id INTEGER PRIMARY KEY)"
        );
    }

    #[test]
    fn test_indexes() {
        let sql = "CREATE INDEX IF NOT EXISTS idx_a ON t (a COLLATE NOCASE) WHERE a IS NOT NULL;";
        let (out, warnings) = count_warnings(|| rewriter(Dialect::MySql).rewrite_schema(sql));
        assert_eq!(out.unwrap(), "CREATE INDEX idx_a ON t (a COLLATE utf8mb4_general_ci);");
        assert_eq!(warnings, 2);

        assert_eq!(
            rewriter(Dialect::Postgres).rewrite_schema(sql).unwrap(),
            "CREATE INDEX IF NOT EXISTS idx_a ON t (a) WHERE a IS NOT NULL;"
        );
        assert_eq!(
            rewriter(Dialect::SqlServer)
                .rewrite_schema("CREATE UNIQUE INDEX IF NOT EXISTS idx_u ON users (email)")
                .unwrap(),
            "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'idx_u') \
             CREATE UNIQUE INDEX idx_u ON users (email)"
        );

        let err = strict(Dialect::MySql).rewrite_schema(sql).unwrap_err();
        assert!(matches!(err, ShiftError::Unsupported { .. }));
    }

    #[test]
    fn test_views() {
        assert_eq!(
            rewriter(Dialect::Postgres)
                .rewrite_schema("CREATE VIEW IF NOT EXISTS v AS SELECT ifnull(a, 0) FROM t WHERE b LIKE 'x%'")
                .unwrap(),
            "CREATE OR REPLACE VIEW v AS SELECT COALESCE(a, 0) FROM t WHERE b ILIKE 'x%'"
        );
        assert_eq!(
            rewriter(Dialect::SqlServer)
                .rewrite_schema("CREATE VIEW IF NOT EXISTS v AS SELECT a || b FROM t")
                .unwrap(),
            "CREATE OR ALTER VIEW v AS SELECT CONCAT(a, b) FROM t"
        );
    }

    #[test]
    fn test_alter_table() {
        assert_eq!(
            rewriter(Dialect::Oracle)
                .rewrite_schema("ALTER TABLE t ADD COLUMN flag BOOLEAN DEFAULT TRUE;")
                .unwrap(),
            "ALTER TABLE t ADD (flag NUMBER(1) DEFAULT 1);"
        );
        let mssql = rewriter(Dialect::SqlServer);
        assert_eq!(
            mssql.rewrite_schema("ALTER TABLE t RENAME COLUMN a TO b").unwrap(),
            "EXEC sp_rename 't.a', 'b', 'COLUMN'"
        );
        assert_eq!(
            mssql.rewrite_schema(r#"ALTER TABLE "t" RENAME TO u"#).unwrap(),
            "EXEC sp_rename 't', 'u'"
        );
        assert_eq!(
            rewriter(Dialect::Postgres)
                .rewrite_schema("ALTER TABLE t DROP a")
                .unwrap(),
            "ALTER TABLE t DROP COLUMN a"
        );
    }

    #[test]
    fn test_unknown_alter_action_passes_through() {
        let sql = "ALTER TABLE t FOO BAR";
        let (out, warnings) = count_warnings(|| rewriter(Dialect::Postgres).rewrite_schema(sql));
        assert_eq!(out.unwrap(), sql);
        assert_eq!(warnings, 1);
        assert_eq!(
            rewriter(Dialect::MySql).rewrite_schema("alter index i rebuild").unwrap(),
            "alter index i rebuild"
        );
        assert!(matches!(
            strict(Dialect::SqlServer).rewrite_schema("ALTER TABLE t ATTACH x").unwrap_err(),
            ShiftError::Unsupported { .. }
        ));
    }

    #[test]
    fn test_unrecognized_create_is_strict_failure() {
        let (out, warnings) =
            count_warnings(|| rewriter(Dialect::Postgres).rewrite_schema("CREATE SEQUENCE s"));
        assert_eq!(out.unwrap(), "CREATE SEQUENCE s");
        assert_eq!(warnings, 1);
        match strict(Dialect::Postgres).rewrite_schema("create sequence s").unwrap_err() {
            ShiftError::Unsupported { construct, .. } => {
                assert_eq!(construct, "unrecognized CREATE SEQUENCE")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_drop_statements() {
        assert_eq!(
            rewriter(Dialect::MySql).rewrite_schema("DROP TABLE IF EXISTS \"t\"").unwrap(),
            "DROP TABLE IF EXISTS `t`"
        );
        assert_eq!(rewriter(Dialect::MySql).rewrite_schema("DROP INDEX idx").unwrap(), "DROP INDEX idx");
        assert!(strict(Dialect::MySql).rewrite_schema("DROP INDEX idx").is_err());
        assert!(strict(Dialect::Postgres).rewrite_schema("DROP INDEX idx").is_ok());
    }

    #[test]
    fn test_triggers_pass_through_with_warning() {
        let sql = "CREATE TRIGGER trg AFTER INSERT ON t BEGIN SELECT 1; END";
        let (out, warnings) = count_warnings(|| rewriter(Dialect::Postgres).rewrite_schema(sql));
        assert_eq!(out.unwrap(), sql);
        assert_eq!(warnings, 1);
        let err = strict(Dialect::Postgres)
            .rewrite_schema("CREATE VIRTUAL TABLE docs USING fts5(body)")
            .unwrap_err();
        assert!(matches!(err, ShiftError::Unsupported { .. }));
    }

    #[test]
    fn test_non_ddl_is_a_translation_error() {
        let err = rewriter(Dialect::Postgres).rewrite_schema("SELECT 1").unwrap_err();
        match err {
            ShiftError::Translation { message, .. } => {
                assert_eq!(message, "statement does not start with CREATE, ALTER or DROP")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_strict_unmapped_column_type() {
        let sql = "CREATE TABLE t (shape GEOMETRY)";
        assert_eq!(
            rewriter(Dialect::Postgres).rewrite_schema(sql).unwrap(),
            "CREATE TABLE t (shape TEXT)"
        );
        assert!(matches!(
            strict(Dialect::Postgres).rewrite_schema(sql).unwrap_err(),
            ShiftError::Unsupported { .. }
        ));
    }

    #[test]
    fn test_leading_comment_and_determinism() {
        let sql = "-- users\nCREATE TABLE t (a INTEGER)";
        let pg = rewriter(Dialect::Postgres);
        let first = pg.rewrite_schema(sql).unwrap();
        assert_eq!(first, "-- users\nCREATE TABLE t (a INTEGER)");
        assert_eq!(pg.rewrite_schema(sql).unwrap(), first);
    }

    #[test]
    fn test_is_schema_statement() {
        assert!(is_schema_statement("  create table t (a int)"));
        assert!(is_schema_statement("/* v2 */ -- up\nDROP VIEW v"));
        assert!(!is_schema_statement("SELECT 'CREATE TABLE'"));
        assert!(!is_schema_statement("CREATE TABLE 't"));
    }
}
