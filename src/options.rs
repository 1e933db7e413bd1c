//! Plugin options and the feature vocabulary they gate.

use crate::typemap::TypeMapping;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Options governing which rewrite categories fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginOptions {
    /// Emit human-readable notices for rewrites and fallbacks.
    pub verbose: bool,

    /// Turn unsupported-construct warnings into hard failures.
    pub strict: bool,

    /// Mappings that override the dialect's built-in type table.
    pub custom_type_mappings: Vec<TypeMapping>,

    /// Per-category opt-outs.
    pub transformations: Transformations,

    /// Column used to locate rows inserted by an emulated RETURNING clause.
    pub returning_key_column: String,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            strict: false,
            custom_type_mappings: Vec::new(),
            transformations: Transformations::default(),
            returning_key_column: "id".to_string(),
        }
    }
}

impl PluginOptions {
    /// Create a new options builder.
    pub fn builder() -> PluginOptionsBuilder {
        PluginOptionsBuilder::default()
    }

    /// Whether a rewrite category is enabled.
    pub fn enabled(&self, feature: Feature) -> bool {
        self.transformations.enabled(feature)
    }
}

/// Per-category switches. Every category is on unless disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transformations {
    pub auto_increment: bool,
    pub default_values: bool,
    pub constraints: bool,
    pub indexes: bool,
    pub functions: bool,
    pub operators: bool,
}

impl Default for Transformations {
    fn default() -> Self {
        Self {
            auto_increment: true,
            default_values: true,
            constraints: true,
            indexes: true,
            functions: true,
            operators: true,
        }
    }
}

impl Transformations {
    pub fn enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::AutoIncrement => self.auto_increment,
            Feature::Default => self.default_values,
            Feature::Check | Feature::ForeignKey => self.constraints,
            Feature::Index => self.indexes,
            Feature::Function => self.functions,
            Feature::Operator => self.operators,
        }
    }
}

/// The fixed vocabulary of rewrite categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    AutoIncrement,
    Default,
    Check,
    ForeignKey,
    Index,
    Function,
    Operator,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::AutoIncrement,
        Feature::Default,
        Feature::Check,
        Feature::ForeignKey,
        Feature::Index,
        Feature::Function,
        Feature::Operator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AutoIncrement => "AUTO_INCREMENT",
            Feature::Default => "DEFAULT",
            Feature::Check => "CHECK",
            Feature::ForeignKey => "FOREIGN_KEY",
            Feature::Index => "INDEX",
            Feature::Function => "FUNCTION",
            Feature::Operator => "OPERATOR",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == upper)
            .ok_or_else(|| format!("unknown feature '{}'", s))
    }
}

/// Builder for PluginOptions.
#[derive(Debug, Default)]
pub struct PluginOptionsBuilder {
    options: PluginOptions,
}

impl PluginOptionsBuilder {
    /// Enable verbose notices.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = verbose;
        self
    }

    /// Enable strict mode.
    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    /// Add a custom type mapping.
    pub fn type_mapping(mut self, mapping: TypeMapping) -> Self {
        self.options.custom_type_mappings.push(mapping);
        self
    }

    /// Disable one rewrite category.
    pub fn disable(mut self, feature: Feature) -> Self {
        let t = &mut self.options.transformations;
        match feature {
            Feature::AutoIncrement => t.auto_increment = false,
            Feature::Default => t.default_values = false,
            Feature::Check | Feature::ForeignKey => t.constraints = false,
            Feature::Index => t.indexes = false,
            Feature::Function => t.functions = false,
            Feature::Operator => t.operators = false,
        }
        self
    }

    /// Set the key column used by RETURNING emulation.
    pub fn returning_key_column(mut self, column: impl Into<String>) -> Self {
        self.options.returning_key_column = column.into();
        self
    }

    /// Build the options
    pub fn build(self) -> PluginOptions {
        self.options
    }
}
