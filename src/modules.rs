//! Module resolution for `require`.
//!
//! Search follows Lua's `package.path` template convention: a semicolon-
//! separated list of patterns where `?` stands for the module name with
//! dots turned into path separators. Loaded modules are cached; a module
//! being loaded is tracked so dependency cycles fail instead of recursing.

use std::collections::HashSet;
use std::path::PathBuf;

use ahash::AHashMap;
use log::debug;

use crate::value::Value;

const DEFAULT_PATH: &str = "./?.lua;./?/init.lua";

pub struct ModuleLoader {
    /// `package.path`-style templates, in search order.
    pub search_templates: Vec<String>,
    loaded: AHashMap<String, Value>,
    loading: HashSet<String>,
}

impl ModuleLoader {
    /// A loader honoring `LUA_PATH` when set.
    pub fn new() -> Self {
        let path = std::env::var("LUA_PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        Self::with_path(&path)
    }

    pub fn with_path(path: &str) -> Self {
        ModuleLoader {
            search_templates: path
                .split(';')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            loaded: AHashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn add_search_template(&mut self, template: impl Into<String>) {
        self.search_templates.push(template.into());
    }

    /// Resolves a module name to an existing file, trying each template.
    /// `"config.server"` matches e.g. `./config/server.lua`.
    pub fn resolve_module(&self, name: &str) -> Option<PathBuf> {
        let path_part = name.replace('.', "/");
        for template in &self.search_templates {
            let candidate = PathBuf::from(template.replace('?', &path_part));
            if candidate.is_file() {
                debug!("module '{}' resolved to {}", name, candidate.display());
                return Some(candidate);
            }
        }
        None
    }

    /// The templates that were tried, for "module not found" messages.
    pub fn tried_paths(&self, name: &str) -> String {
        let path_part = name.replace('.', "/");
        self.search_templates
            .iter()
            .map(|t| format!("\n\tno file '{}'", t.replace('?', &path_part)))
            .collect()
    }

    pub fn get_loaded(&self, name: &str) -> Option<Value> {
        self.loaded.get(name).cloned()
    }

    pub fn register_loaded(&mut self, name: impl Into<String>, value: Value) {
        self.loaded.insert(name.into(), value);
    }

    /// Marks a module as in-flight; false when it already is (a cycle).
    pub fn begin_loading(&mut self, name: &str) -> bool {
        self.loading.insert(name.to_string())
    }

    pub fn end_loading(&mut self, name: &str) {
        self.loading.remove(name);
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        let loader = ModuleLoader::with_path(DEFAULT_PATH);
        assert_eq!(loader.search_templates.len(), 2);
    }

    #[test]
    fn test_resolve_missing_module() {
        let loader = ModuleLoader::with_path(DEFAULT_PATH);
        assert!(loader.resolve_module("no_such_module_xyz").is_none());
    }

    #[test]
    fn test_cache_roundtrip() {
        let mut loader = ModuleLoader::with_path(DEFAULT_PATH);
        assert!(loader.get_loaded("m").is_none());
        loader.register_loaded("m", Value::Integer(7));
        assert_eq!(loader.get_loaded("m"), Some(Value::Integer(7)));
        assert_eq!(loader.loaded_count(), 1);
    }

    #[test]
    fn test_cycle_detection() {
        let mut loader = ModuleLoader::with_path(DEFAULT_PATH);
        assert!(loader.begin_loading("a"));
        assert!(!loader.begin_loading("a"));
        loader.end_loading("a");
        assert!(loader.begin_loading("a"));
    }

    #[test]
    fn test_tried_paths_mentions_candidates() {
        let loader = ModuleLoader::with_path("./?.lua");
        let msg = loader.tried_paths("config.server");
        assert!(msg.contains("./config/server.lua"));
    }
}
