//! Dialect plugin registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dialect::{normalize_name, Dialect, SqlDialect};
use crate::options::PluginOptions;
use crate::query::{DialectQueryRewriter, QueryRewriter};
use crate::schema::{DialectSchemaRewriter, SchemaRewriter};
use crate::typemap::TypeMapping;

/// A schema rewriter and a query rewriter registered under one dialect name.
#[derive(Clone)]
pub struct DialectPlugin {
    pub name: String,
    pub schema: Arc<dyn SchemaRewriter>,
    pub query: Arc<dyn QueryRewriter>,
}

impl DialectPlugin {
    /// Build both rewriters from a dialect description.
    pub fn new(dialect: Arc<dyn SqlDialect>, options: PluginOptions) -> Self {
        Self {
            name: dialect.name().to_string(),
            schema: Arc::new(DialectSchemaRewriter::new(dialect.clone(), options.clone())),
            query: Arc::new(DialectQueryRewriter::new(dialect, options)),
        }
    }

    pub fn builtin(dialect: Dialect, options: PluginOptions) -> Self {
        Self::new(dialect.build(), options)
    }

    pub fn type_mappings(&self) -> Vec<TypeMapping> {
        self.schema.type_mappings()
    }
}

#[derive(Clone)]
enum Entry {
    Schema(Arc<dyn SchemaRewriter>),
    Query(Arc<dyn QueryRewriter>),
}

/// Lookup from dialect name to plugins.
///
/// Entries are keyed `<dialect>-schema` and `<dialect>-query`. Each entry is
/// a whole `Arc` swapped under the lock.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

fn schema_key(dialect: &str) -> String {
    format!("{}-schema", normalize_name(dialect))
}

fn query_key(dialect: &str) -> String {
    format!("{}-query", normalize_name(dialect))
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the four built-in dialects.
    pub fn with_builtin_dialects(options: &PluginOptions) -> Self {
        let registry = Self::new();
        for dialect in Dialect::ALL {
            registry.register_dialect(DialectPlugin::builtin(dialect, options.clone()));
        }
        registry
    }

    fn insert(&self, key: String, entry: Entry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.insert(key.clone(), entry).is_some() {
            tracing::debug!("replaced plugin {}", key);
        }
    }

    fn get(&self, key: &str) -> Option<Entry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn register_schema_plugin(&self, dialect: &str, plugin: Arc<dyn SchemaRewriter>) {
        self.insert(schema_key(dialect), Entry::Schema(plugin));
    }

    pub fn register_query_plugin(&self, dialect: &str, plugin: Arc<dyn QueryRewriter>) {
        self.insert(query_key(dialect), Entry::Query(plugin));
    }

    /// Register both halves of a plugin under its name.
    pub fn register_dialect(&self, plugin: DialectPlugin) {
        self.register_schema_plugin(&plugin.name, plugin.schema);
        self.register_query_plugin(&plugin.name, plugin.query);
    }

    pub fn schema_plugin(&self, dialect: &str) -> Option<Arc<dyn SchemaRewriter>> {
        match self.get(&schema_key(dialect))? {
            Entry::Schema(plugin) => Some(plugin),
            Entry::Query(_) => None,
        }
    }

    pub fn query_plugin(&self, dialect: &str) -> Option<Arc<dyn QueryRewriter>> {
        match self.get(&query_key(dialect))? {
            Entry::Query(plugin) => Some(plugin),
            Entry::Schema(_) => None,
        }
    }

    fn list(&self, schema: bool) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Schema(_)) == schema)
            .map(|(key, _)| {
                key.rsplit_once('-')
                    .map_or(key.as_str(), |(name, _)| name)
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }

    /// Dialect names with a schema plugin, sorted.
    pub fn list_schema_plugins(&self) -> Vec<String> {
        self.list(true)
    }

    /// Dialect names with a query plugin, sorted.
    pub fn list_query_plugins(&self) -> Vec<String> {
        self.list(false)
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_registration() {
        let registry = Registry::with_builtin_dialects(&PluginOptions::default());
        assert_eq!(
            registry.list_schema_plugins(),
            vec!["mssql", "mysql", "oracle", "postgresql"]
        );
        assert_eq!(registry.list_query_plugins(), registry.list_schema_plugins());
        assert_eq!(registry.query_plugin("pg").map(|p| p.name().to_string()), Some("postgresql".into()));
        assert_eq!(registry.schema_plugin("SQLServer").map(|p| p.name().to_string()), Some("mssql".into()));
        assert!(registry.query_plugin("db2").is_none());
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = Registry::new();
        registry.register_dialect(DialectPlugin::builtin(Dialect::MySql, PluginOptions::default()));
        // a second mysql query plugin under an alias replaces the first
        let strict = PluginOptions::builder().strict(true).build();
        registry.register_query_plugin(
            "mariadb",
            Arc::new(DialectQueryRewriter::new(Dialect::MySql.build(), strict)),
        );
        assert_eq!(registry.list_query_plugins(), vec!["mysql"]);
        let plugin = registry.query_plugin("mysql").unwrap();
        assert!(plugin.rewrite("SELECT * FROM t WHERE a = :a", &[]).is_err());
    }

    #[test]
    fn test_clear() {
        let registry = Registry::with_builtin_dialects(&PluginOptions::default());
        registry.clear();
        assert!(registry.list_schema_plugins().is_empty());
        assert!(registry.schema_plugin("oracle").is_none());
    }
}
