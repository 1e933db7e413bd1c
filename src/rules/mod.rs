//! Rewrite rules.
//!
//! A dialect's translation is an ordered list of named [`Rule`]s. Each rule
//! belongs to a [`Stage`] and stages always run in this order:
//!
//! 1. `Function`:    built-in function calls
//! 2. `Operator`:    infix operators and literal keywords
//! 3. `Transform`:   statement-shape rewrites (upserts, verbs)
//! 4. `Pagination`:  trailing LIMIT/OFFSET, inlining bound operands
//! 5. `Returning`:   RETURNING clauses
//! 6. `Placeholder`: final placeholder numbering

pub mod expr;
pub mod params;
pub mod returning;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::SqlDialect;
use crate::error::{ShiftError, ShiftResult};
use crate::lexer::{mask, MaskedSql};
use crate::options::{Feature, PluginOptions};
use crate::typemap::TypeMapper;
use crate::value::SqlValue;

pub use returning::{ReturningEmulationInfo, ReturningStyle};

/// Position of a rule category in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Function,
    Operator,
    Transform,
    Pagination,
    Returning,
    Placeholder,
}

/// A function call found in masked text.
pub struct Call<'a> {
    /// The function name as written.
    pub name: &'a str,
    /// Arguments, trimmed, still masked.
    pub args: Vec<&'a str>,
    pub masked: &'a MaskedSql,
}

impl Call<'_> {
    /// Content of argument `i` when it is a string literal.
    pub fn string_arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).and_then(|a| self.masked.string_value(a))
    }
}

pub type FunctionRewrite =
    Arc<dyn Fn(&Call<'_>, &RuleCtx<'_>) -> ShiftResult<Option<String>> + Send + Sync>;
pub type OperatorRewrite =
    Arc<dyn Fn(&str, &str, &RuleCtx<'_>) -> ShiftResult<Option<String>> + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(&mut Statement, &RuleCtx<'_>) -> ShiftResult<()> + Send + Sync>;

/// What a rule does.
#[derive(Clone)]
pub enum RuleKind {
    /// Regex replacement over masked text.
    Pattern { regex: Regex, replacement: String },
    /// Rewrites every call of one function, innermost first.
    Function {
        function: String,
        call: Regex,
        rewrite: FunctionRewrite,
    },
    /// Rewrites an operator given its left and right primary operands.
    Operator { pattern: Regex, rewrite: OperatorRewrite },
    /// Arbitrary statement rewrite.
    Transform(TransformFn),
    /// Trailing LIMIT/OFFSET rendered with the dialect's syntax.
    Pagination,
    /// RETURNING handled per the dialect's capability.
    Returning,
    /// Placeholders rendered in the dialect's style.
    Placeholder,
}

/// A named rewrite rule.
#[derive(Clone)]
pub struct Rule {
    pub name: &'static str,
    /// Category that can switch this rule off.
    pub feature: Option<Feature>,
    /// Uppercase substrings whose presence means the rule may apply.
    pub triggers: Vec<&'static str>,
    pub kind: RuleKind,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("stage", &self.stage())
            .finish()
    }
}

impl Rule {
    pub fn pattern(
        name: &'static str,
        triggers: &[&'static str],
        pattern: &str,
        replacement: &str,
    ) -> Self {
        Self {
            name,
            feature: None,
            triggers: triggers.to_vec(),
            kind: RuleKind::Pattern {
                regex: Regex::new(pattern).expect("valid rule pattern"),
                replacement: replacement.to_string(),
            },
        }
    }

    pub fn function(
        name: &'static str,
        function: &str,
        rewrite: impl Fn(&Call<'_>, &RuleCtx<'_>) -> ShiftResult<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            feature: Some(Feature::Function),
            triggers: Vec::new(),
            kind: RuleKind::Function {
                function: function.to_ascii_uppercase(),
                call: call_regex(function),
                rewrite: Arc::new(rewrite),
            },
        }
    }

    pub fn operator(
        name: &'static str,
        triggers: &[&'static str],
        pattern: &str,
        rewrite: impl Fn(&str, &str, &RuleCtx<'_>) -> ShiftResult<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            feature: Some(Feature::Operator),
            triggers: triggers.to_vec(),
            kind: RuleKind::Operator {
                pattern: Regex::new(pattern).expect("valid operator pattern"),
                rewrite: Arc::new(rewrite),
            },
        }
    }

    pub fn transform(
        name: &'static str,
        triggers: &[&'static str],
        apply: impl Fn(&mut Statement, &RuleCtx<'_>) -> ShiftResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            feature: None,
            triggers: triggers.to_vec(),
            kind: RuleKind::Transform(Arc::new(apply)),
        }
    }

    pub fn pagination() -> Self {
        Self {
            name: "pagination",
            feature: None,
            triggers: vec!["LIMIT"],
            kind: RuleKind::Pagination,
        }
    }

    pub fn returning() -> Self {
        Self {
            name: "returning",
            feature: None,
            triggers: vec!["RETURNING"],
            kind: RuleKind::Returning,
        }
    }

    pub fn placeholders() -> Self {
        Self {
            name: "placeholders",
            feature: None,
            triggers: Vec::new(),
            kind: RuleKind::Placeholder,
        }
    }

    /// Gate the rule behind a feature flag.
    pub fn gated(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    /// Replace the trigger list.
    pub fn triggered_by(mut self, triggers: &[&'static str]) -> Self {
        self.triggers = triggers.to_vec();
        self
    }

    pub fn stage(&self) -> Stage {
        match &self.kind {
            RuleKind::Function { .. } => Stage::Function,
            RuleKind::Pattern { .. } | RuleKind::Operator { .. } => Stage::Operator,
            RuleKind::Transform(_) => Stage::Transform,
            RuleKind::Pagination => Stage::Pagination,
            RuleKind::Returning => Stage::Returning,
            RuleKind::Placeholder => Stage::Placeholder,
        }
    }

    /// Whether the rule could apply to a statement, judging by keywords.
    pub fn may_apply(&self, upper_sql: &str) -> bool {
        match &self.kind {
            RuleKind::Function { function, .. } => upper_sql.contains(function.as_str()),
            _ => self.triggers.iter().any(|t| upper_sql.contains(t)),
        }
    }
}

/// Shared state visible to rules while a statement is rewritten.
pub struct RuleCtx<'a> {
    pub dialect: &'a dyn SqlDialect,
    pub types: &'a TypeMapper,
    pub options: &'a PluginOptions,
    warnings: &'a RefCell<Vec<String>>,
}

impl<'a> RuleCtx<'a> {
    pub fn new(
        dialect: &'a dyn SqlDialect,
        types: &'a TypeMapper,
        options: &'a PluginOptions,
        warnings: &'a RefCell<Vec<String>>,
    ) -> Self {
        Self {
            dialect,
            types,
            options,
            warnings,
        }
    }

    /// Record a construct the target cannot express.
    ///
    /// In strict mode this is an error; otherwise a warning is logged and
    /// the caller carries on with its best-effort rewrite.
    pub fn degrade(&self, construct: impl Into<String>) -> ShiftResult<()> {
        let construct = construct.into();
        if self.options.strict {
            return Err(ShiftError::unsupported(self.dialect.name(), construct));
        }
        tracing::warn!("[{}] {}", self.dialect.name(), construct);
        self.warnings.borrow_mut().push(construct);
        Ok(())
    }

    /// Fail for a construct that has no faithful rewrite even outside strict mode.
    pub fn unsupported(&self, construct: impl Into<String>) -> ShiftError {
        ShiftError::unsupported(self.dialect.name(), construct)
    }

    pub fn translation_error(&self, message: impl Into<String>) -> ShiftError {
        ShiftError::translation(self.dialect.name(), message)
    }
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\?(\d*)").expect("valid regex"));
static NAMED_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^:\w$])([:@$][A-Za-z_][A-Za-z0-9_]*)").expect("valid regex")
});

/// A statement being rewritten.
///
/// Placeholders are normalized to explicit `?N` markers (1-based, with
/// SQLite's numbering: a bare `?` is one more than the largest index so far)
/// before any rule runs.
#[derive(Debug, Clone)]
pub struct Statement {
    pub masked: MaskedSql,
    /// Source parameters, indexed by marker number minus one.
    pub params: Vec<SqlValue>,
    /// Source parameter indices inlined into the text.
    pub inlined: BTreeSet<usize>,
    /// Named placeholders (`:name`, `@name`, `$name`) found in the source.
    pub named_placeholders: Vec<String>,
    pub returning: Option<ReturningEmulationInfo>,
    /// Parameters as rendered for the target, set by the placeholder stage.
    pub output_params: Option<Vec<SqlValue>>,
}

impl Statement {
    pub fn new(sql: &str, params: &[SqlValue]) -> ShiftResult<Self> {
        let mut masked = mask(sql)?;
        let mut highest = 0usize;
        let normalized = PLACEHOLDER
            .replace_all(&masked.text, |caps: &regex::Captures| {
                let n = match caps[1].parse::<usize>() {
                    Ok(n) => n,
                    Err(_) => highest + 1,
                };
                highest = highest.max(n);
                format!("?{}", n)
            })
            .into_owned();
        let named_placeholders = NAMED_PLACEHOLDER
            .captures_iter(&normalized)
            .map(|c| c[1].to_string())
            .collect();
        masked.text = normalized;
        Ok(Self {
            masked,
            params: params.to_vec(),
            inlined: BTreeSet::new(),
            named_placeholders,
            returning: None,
            output_params: None,
        })
    }

    pub fn text(&self) -> &str {
        &self.masked.text
    }

    /// Replace a byte range of the masked text with raw SQL.
    pub fn splice(&mut self, start: usize, end: usize, replacement: &str) -> ShiftResult<()> {
        let masked = self.masked.mask_fragment(replacement)?;
        self.masked.text.replace_range(start..end, &masked);
        Ok(())
    }

    /// Run `f` with the masked text temporarily replaced by `fragment`.
    pub fn with_fragment<F>(&mut self, fragment: &str, f: F) -> ShiftResult<String>
    where
        F: FnOnce(&mut Statement) -> ShiftResult<()>,
    {
        let saved = std::mem::replace(&mut self.masked.text, fragment.to_string());
        let result = f(self);
        let out = std::mem::replace(&mut self.masked.text, saved);
        result.map(|_| out)
    }
}

/// An ordered list of rules, sorted by stage with ties kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|r| r.stage());
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Add a rule after the existing rules of its stage.
    pub fn push(&mut self, rule: Rule) {
        let stage = rule.stage();
        let at = self
            .rules
            .iter()
            .position(|r| r.stage() > stage)
            .unwrap_or(self.rules.len());
        self.rules.insert(at, rule);
    }

    /// Remove a rule by name; returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        before != self.rules.len()
    }

    /// Whether any rule could apply to the statement.
    pub fn triggered(&self, sql: &str) -> bool {
        let upper = sql.to_ascii_uppercase();
        self.rules.iter().any(|r| r.may_apply(&upper))
    }

    /// Run all stages.
    pub fn apply(&self, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<()> {
        for rule in &self.rules {
            self.apply_rule(rule, stmt, ctx)?;
        }
        Ok(())
    }

    /// Run only the rules of the given stages, in pipeline order.
    pub fn apply_stages(
        &self,
        stmt: &mut Statement,
        stages: &[Stage],
        ctx: &RuleCtx<'_>,
    ) -> ShiftResult<()> {
        for rule in self.rules.iter().filter(|r| stages.contains(&r.stage())) {
            self.apply_rule(rule, stmt, ctx)?;
        }
        Ok(())
    }

    fn apply_rule(&self, rule: &Rule, stmt: &mut Statement, ctx: &RuleCtx<'_>) -> ShiftResult<()> {
        if let Some(feature) = rule.feature {
            if !ctx.options.enabled(feature) {
                return Ok(());
            }
        }
        let before = stmt.masked.text.clone();
        match &rule.kind {
            RuleKind::Pattern { regex, replacement } => {
                let replaced = regex.replace_all(&stmt.masked.text, replacement.as_str());
                if let std::borrow::Cow::Owned(text) = replaced {
                    stmt.masked.text = text;
                }
            }
            RuleKind::Function {
                function,
                call,
                rewrite,
            } => {
                apply_function(function, call, rewrite, stmt, ctx)?;
            }
            RuleKind::Operator { pattern, rewrite } => {
                apply_operator(pattern, rewrite, stmt, ctx)?;
            }
            RuleKind::Transform(apply) => apply(stmt, ctx)?,
            RuleKind::Pagination => params::apply_pagination(stmt, ctx)?,
            RuleKind::Returning => returning::apply_returning(stmt, ctx)?,
            RuleKind::Placeholder => params::apply_placeholders(stmt, ctx)?,
        }
        if stmt.masked.text != before {
            tracing::debug!("[{}] rule '{}' applied", ctx.dialect.name(), rule.name);
        }
        Ok(())
    }
}

fn call_regex(function: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)(?:^|[^A-Za-z0-9_$.\x{{E001}}])({})\b",
        regex::escape(function)
    ))
    .expect("valid function regex")
}

/// Rewrite calls right to left, so an inner call of the same function is
/// rewritten before the outer call captures it as an argument.
fn apply_function(
    function: &str,
    re: &Regex,
    rewrite: &FunctionRewrite,
    stmt: &mut Statement,
    ctx: &RuleCtx<'_>,
) -> ShiftResult<()> {
    let mut limit = stmt.masked.text.len();
    loop {
        let text = stmt.masked.text.clone();
        let found = re
            .captures_iter(&text)
            .filter_map(|c| c.get(1))
            .filter(|m| m.start() < limit && text[m.end()..].trim_start().starts_with('('))
            .last();
        let Some(name) = found else { break };
        let open = match text[name.end()..].find('(') {
            Some(i) => name.end() + i,
            None => break,
        };
        let close = expr::matching_paren(&text, open)
            .ok_or_else(|| ctx.translation_error(format!("unbalanced parentheses in {}()", function)))?;
        let call = Call {
            name: name.as_str(),
            args: expr::split_top_level(&text[open + 1..close]),
            masked: &stmt.masked,
        };
        let replacement = rewrite(&call, ctx)?;
        if let Some(rep) = replacement {
            stmt.splice(name.start(), close + 1, &rep)?;
        }
        limit = name.start();
    }
    Ok(())
}

fn apply_operator(
    pattern: &Regex,
    rewrite: &OperatorRewrite,
    stmt: &mut Statement,
    ctx: &RuleCtx<'_>,
) -> ShiftResult<()> {
    let mut from = 0;
    loop {
        let text = stmt.masked.text.clone();
        let Some(m) = pattern.find_at(&text, from) else { break };
        let left = expr::operand_before(&text, m.start());
        let right = expr::operand_after(&text, m.end());
        let (Some(ls), Some((rs, re))) = (left, right) else {
            from = m.end();
            continue;
        };
        let left_text = text[ls..m.start()].trim();
        let right_text = &text[rs..re];
        match rewrite(left_text, right_text, ctx)? {
            Some(rep) => {
                stmt.splice(ls, re, &rep)?;
                from = ls;
            }
            None => from = m.end(),
        }
    }
    Ok(())
}
