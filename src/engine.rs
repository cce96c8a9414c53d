//! Engine: process-scoped state shared by execution contexts
//!
//! Owns the configuration, the collaborators, the script block cache and the
//! registry of dynamically registered keywords. Build one with
//! [`Engine::builder`] and share it as `Arc<Engine>`.
//!
//! # Example
//!
//! ```rust,ignore
//! use tempo_core::{Clause, Engine, ExecutionContext, InvokeOptions};
//!
//! let engine = Engine::builder().build();
//! let mut ctx = ExecutionContext::new(engine.clone());
//! let block = engine.create("inline", "param($n) $n * 2")?;
//! block.invoke(&mut ctx, Clause::End, InvokeOptions::default().with_args(vec![21.into()]))?;
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::cache::ScriptBlockCache;
use crate::compiled::CompiledCode;
use crate::compiler::CodeGenerator;
use crate::config::Config;
use crate::errors::ScriptError;
use crate::script_block::ScriptBlock;
use crate::services::{
    ContentScanner, EventSink, ParameterResolver, ScriptParser, Services, TrustClassifier,
};

pub struct Engine {
    config: Config,
    services: Arc<Services>,
    cache: ScriptBlockCache,
    keywords: RwLock<HashSet<String>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn cache(&self) -> &ScriptBlockCache {
        &self.cache
    }

    /// Parse `text`, or reuse the cached parse of the same (origin, text)
    pub fn create(&self, origin: &str, text: &str) -> Result<ScriptBlock, ScriptError> {
        self.create_inner(origin, text, None)
    }

    pub fn create_from_file(&self, path: impl AsRef<Path>) -> Result<ScriptBlock, ScriptError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();
        self.create_inner(&origin, &text, Some(path))
    }

    /// A script whose parse is delayed to its first compile. Never cached;
    /// parse errors surface from `compile`.
    pub fn create_deferred(&self, origin: &str, text: &str) -> ScriptBlock {
        let code = CompiledCode::deferred(self.services.clone(), origin, None, Arc::from(text));
        ScriptBlock::new(Arc::new(code))
    }

    /// Register a keyword whose meaning is supplied at runtime. Scripts
    /// calling it are no longer cached.
    pub fn register_keyword(&self, name: &str) {
        self.keywords.write().insert(name.to_lowercase());
    }

    pub fn is_keyword(&self, name: &str) -> bool {
        self.keywords.read().contains(&name.to_lowercase())
    }

    fn create_inner(
        &self,
        origin: &str,
        text: &str,
        file: Option<&Path>,
    ) -> Result<ScriptBlock, ScriptError> {
        if let Some(block) = self.cache.lookup(origin, text)? {
            debug!(origin, "Script block cache hit");
            return Ok(block);
        }

        let ast = self.services.parser.parse(text)?;
        let cacheable = !ast.uses_external_declarations(&self.keywords.read());

        let code = CompiledCode::new(
            self.services.clone(),
            origin,
            file.map(Path::to_path_buf),
            Arc::from(text),
            ast,
        );
        let block = ScriptBlock::new(Arc::new(code));

        if cacheable {
            self.cache.insert(origin, text, &block);
        } else {
            debug!(origin, "Script uses external declarations, not caching");
        }
        Ok(block)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/* ===================== Builder ===================== */

/// Builder for an [`Engine`]; collaborators default to the ones
/// configured by [`Services::from_config`]
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<Config>,
    parser: Option<Arc<dyn ScriptParser>>,
    scanner: Option<Arc<dyn ContentScanner>>,
    trust: Option<Arc<dyn TrustClassifier>>,
    resolver: Option<Arc<dyn ParameterResolver>>,
    codegen: Option<Arc<dyn CodeGenerator>>,
    events: Option<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this configuration instead of the built-in defaults
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn ScriptParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn scanner(mut self, scanner: Arc<dyn ContentScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn trust(mut self, trust: Arc<dyn TrustClassifier>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ParameterResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn codegen(mut self, codegen: Arc<dyn CodeGenerator>) -> Self {
        self.codegen = Some(codegen);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Arc<Engine> {
        let config = self.config.unwrap_or_default();
        let defaults = Services::from_config(&config);
        let services = Services {
            parser: self.parser.unwrap_or(defaults.parser),
            scanner: self.scanner.unwrap_or(defaults.scanner),
            trust: self.trust.unwrap_or(defaults.trust),
            resolver: self.resolver.unwrap_or(defaults.resolver),
            codegen: self.codegen.unwrap_or(defaults.codegen),
            events: self.events.unwrap_or(defaults.events),
            all_scope: defaults.all_scope,
        };

        debug!(
            cache_enabled = config.cache.enabled,
            max_entries = config.cache.max_entries,
            language_mode = %config.engine.language_mode,
            "Engine built"
        );

        Arc::new(Engine {
            cache: ScriptBlockCache::new(&config.cache),
            config,
            services: Arc::new(services),
            keywords: RwLock::new(HashSet::new()),
        })
    }
}
