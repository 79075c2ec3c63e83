//! Resolution of out-of-line `mod name;` declarations.
//!
//! Finding the source of a nested module is the embedder's business: a game
//! may keep scripts in an asset pack, on disk, or in memory. The builder only
//! asks a [`ModuleResolver`] for the parsed file.

use std::collections::HashMap;

/// A module source supplied by a resolver
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    /// Identity of the underlying source (canonical path, asset id, ...).
    /// Seeing the same key twice on one resolution chain is a cycle.
    pub key: String,
    pub file: syn::File,
}

pub trait ModuleResolver {
    /// Resolve the module at `path` (root-relative segments, e.g.
    /// `["physics", "gravity"]`). `None` means the module does not exist.
    fn resolve(&self, path: &[String]) -> Option<ResolvedModule>;
}

/// Resolver for single-file scripts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve(&self, _path: &[String]) -> Option<ResolvedModule> {
        None
    }
}

/// In-memory module sources keyed by `a::b` paths
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    sources: HashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.sources.insert(path.into(), source.into());
        self
    }

    pub fn with(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }
}

impl ModuleResolver for MemoryResolver {
    fn resolve(&self, path: &[String]) -> Option<ResolvedModule> {
        let key = path.join("::");
        let source = self.sources.get(&key)?;
        match syn::parse_file(source) {
            Ok(file) => Some(ResolvedModule { key, file }),
            Err(e) => {
                log::warn!("module {} does not parse: {}", key, e);
                None
            }
        }
    }
}
