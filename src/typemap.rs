//! Column type mapping.
//!
//! Each dialect ships a built-in table from SQLite type names to target
//! type names. Lookups are case-insensitive and ignore a trailing size or
//! precision, which is carried over to the target when the target does not
//! fix its own.

use crate::value::SqlValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Value conversion attached to a type mapping.
#[derive(Clone)]
pub struct Converter(Arc<dyn Fn(&SqlValue) -> SqlValue + Send + Sync>);

impl Converter {
    pub fn new(f: impl Fn(&SqlValue) -> SqlValue + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, value: &SqlValue) -> SqlValue {
        (self.0)(value)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Converter(..)")
    }
}

/// A single source type to target type mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMapping {
    pub source_type: String,
    pub target_type: String,
    #[serde(skip)]
    pub converter: Option<Converter>,
    /// Carry a source size such as `(255)` over to the target.
    #[serde(default = "carry_size_default")]
    pub carry_size: bool,
}

fn carry_size_default() -> bool {
    true
}

impl TypeMapping {
    pub fn new(source_type: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            target_type: target_type.into(),
            converter: None,
            carry_size: true,
        }
    }

    /// Drop any source size; the target type takes none.
    pub fn fixed(mut self) -> Self {
        self.carry_size = false;
        self
    }

    /// Attach a value converter.
    pub fn with_converter(
        mut self,
        f: impl Fn(&SqlValue) -> SqlValue + Send + Sync + 'static,
    ) -> Self {
        self.converter = Some(Converter::new(f));
        self
    }

    fn matches(&self, key: &str) -> bool {
        normalize_type_name(&self.source_type) == key
    }
}

/// Converter turning booleans into `1`/`0` for targets without a boolean type.
pub fn bool_to_int(value: &SqlValue) -> SqlValue {
    match value {
        SqlValue::Bool(b) => SqlValue::Int(*b as i64),
        other => other.clone(),
    }
}

/// Uppercase a type name and collapse inner whitespace.
pub fn normalize_type_name(name: &str) -> String {
    let (base, args) = split_type(name);
    match args {
        Some(a) => format!("{}{}", base, a),
        None => base,
    }
}

/// Split `varchar ( 255 )` into `("VARCHAR", Some("(255)"))`.
pub fn split_type(name: &str) -> (String, Option<String>) {
    let name = name.trim();
    let (base, args) = match name.find('(') {
        Some(i) => (&name[..i], Some(&name[i..])),
        None => (name, None),
    };
    let base = base
        .split_whitespace()
        .map(|w| w.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(" ");
    let args = args.map(|a| a.chars().filter(|c| !c.is_whitespace()).collect::<String>());
    (base, args)
}

/// Resolves source types against custom and built-in tables.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    dialect: String,
    builtin: Vec<TypeMapping>,
    custom: Vec<TypeMapping>,
    fallback: String,
    verbose: bool,
}

impl TypeMapper {
    pub fn new(
        dialect: impl Into<String>,
        builtin: Vec<TypeMapping>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            dialect: dialect.into(),
            builtin,
            custom: Vec::new(),
            fallback: fallback.into(),
            verbose: false,
        }
    }

    /// Install custom mappings; later entries win over earlier ones.
    pub fn with_custom(mut self, custom: Vec<TypeMapping>) -> Self {
        self.custom = custom;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The generic text type used when nothing matches.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Find the mapping for a source type without falling back.
    ///
    /// The full name with its size (`TINYINT(1)`) is tried before the bare
    /// base name, custom mappings before built-in ones.
    pub fn lookup(&self, source_type: &str) -> Option<&TypeMapping> {
        let (base, args) = split_type(source_type);
        let full = match &args {
            Some(a) => format!("{}{}", base, a),
            None => base.clone(),
        };
        let mut keys = vec![full];
        if args.is_some() {
            keys.push(base);
        }
        for key in &keys {
            if let Some(m) = self.custom.iter().rev().find(|m| m.matches(key)) {
                return Some(m);
            }
            if let Some(m) = self.builtin.iter().find(|m| m.matches(key)) {
                return Some(m);
            }
        }
        None
    }

    /// Map a source type to the target type; never fails.
    pub fn map_type(&self, source_type: &str) -> String {
        match self.resolve(source_type) {
            Some(target) => target,
            None => {
                if self.verbose {
                    tracing::warn!(
                        "[{}] no type mapping for '{}', falling back to {}",
                        self.dialect,
                        source_type.trim(),
                        self.fallback
                    );
                } else {
                    tracing::debug!(
                        "[{}] no type mapping for '{}'",
                        self.dialect,
                        source_type.trim()
                    );
                }
                self.fallback.clone()
            }
        }
    }

    /// Map a source type, returning `None` instead of the fallback.
    pub fn resolve(&self, source_type: &str) -> Option<String> {
        let mapping = self.lookup(source_type)?;
        let (_, args) = split_type(source_type);
        let mapped_with_args = normalize_type_name(&mapping.source_type).contains('(');
        if !mapping.carry_size || mapping.target_type.contains('(') || mapped_with_args {
            return Some(mapping.target_type.clone());
        }
        Some(match args {
            Some(a) => format!("{}{}", mapping.target_type, a),
            None => mapping.target_type.clone(),
        })
    }

    /// Apply the converter of the mapping for `source_type`, if any.
    pub fn convert_value(&self, source_type: &str, value: &SqlValue) -> SqlValue {
        match self.lookup(source_type).and_then(|m| m.converter.as_ref()) {
            Some(c) => c.apply(value),
            None => value.clone(),
        }
    }

    /// All mappings in effect: custom overrides first, then built-ins they
    /// do not shadow.
    pub fn mappings(&self) -> Vec<TypeMapping> {
        let mut out: Vec<TypeMapping> = Vec::new();
        for m in self.custom.iter().rev() {
            let key = normalize_type_name(&m.source_type);
            if !out.iter().any(|o| o.matches(&key)) {
                out.push(m.clone());
            }
        }
        for m in &self.builtin {
            let key = normalize_type_name(&m.source_type);
            if !out.iter().any(|o| o.matches(&key)) {
                out.push(m.clone());
            }
        }
        out
    }
}
