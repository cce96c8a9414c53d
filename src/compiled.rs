//! Per-script compilation cache
//!
//! [`CompiledCode`] owns one script body and lazily produces, at most once
//! each: the AST (for deferred scripts), the metadata, the security flags,
//! the variable analysis and the two compiled tiers. Every lazy field is a
//! `OnceCell`, so concurrent first use serializes on the cell and losers
//! observe the winner's result.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::compiler::{analyze, CompiledClauses, LoweringRequest, Tier, VariableAnalysis};
use crate::errors::{InvariantViolation, ScriptError};
use crate::services::{ScanVerdict, ScriptMetadata, Services};
use crate::slots::SlotLayout;
use crate::types::{Clause, ScriptAst};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityFlags {
    pub trusted: bool,
    pub suspicious: bool,
}

pub struct CompiledCode {
    id: Uuid,
    services: Arc<Services>,
    origin: String,
    file: Option<PathBuf>,
    source: Arc<str>,
    range: Range<usize>,
    content_hash: String,
    ast: OnceCell<Arc<ScriptAst>>,
    metadata: OnceCell<Arc<ScriptMetadata>>,
    security: OnceCell<SecurityFlags>,
    analysis: OnceCell<VariableAnalysis>,
    optimized: OnceCell<Arc<CompiledClauses>>,
    unoptimized: OnceCell<Arc<CompiledClauses>>,
    /// Function bodies and block literals, keyed by body span
    nested: Mutex<HashMap<(usize, usize), Arc<CompiledCode>>>,
}

impl CompiledCode {
    /// Compiled data for an already parsed script
    pub fn new(
        services: Arc<Services>,
        origin: impl Into<String>,
        file: Option<PathBuf>,
        source: Arc<str>,
        ast: ScriptAst,
    ) -> Self {
        let range = 0..source.len();
        let code = Self::build(services, origin.into(), file, source, range);
        let _ = code.ast.set(Arc::new(ast));
        code
    }

    /// Compiled data whose AST is parsed on first compile
    pub fn deferred(
        services: Arc<Services>,
        origin: impl Into<String>,
        file: Option<PathBuf>,
        source: Arc<str>,
    ) -> Self {
        let range = 0..source.len();
        Self::build(services, origin.into(), file, source, range)
    }

    /// A function body or script-block literal inside another script. The
    /// AST's spans point into `source`; `range` is this body's text.
    fn nested(
        services: Arc<Services>,
        origin: &str,
        file: Option<&Path>,
        source: Arc<str>,
        range: Range<usize>,
        ast: ScriptAst,
    ) -> Self {
        let range = if source.get(range.clone()).is_some() {
            range
        } else {
            0..source.len()
        };
        let code = Self::build(
            services,
            origin.to_string(),
            file.map(Path::to_path_buf),
            source,
            range,
        );
        let _ = code.ast.set(Arc::new(ast));
        code
    }

    fn build(
        services: Arc<Services>,
        origin: String,
        file: Option<PathBuf>,
        source: Arc<str>,
        range: Range<usize>,
    ) -> Self {
        let content_hash = format!("{:x}", Sha256::digest(source[range.clone()].as_bytes()));
        Self {
            id: Uuid::new_v4(),
            services,
            origin,
            file,
            source,
            range,
            content_hash,
            ast: OnceCell::new(),
            metadata: OnceCell::new(),
            security: OnceCell::new(),
            analysis: OnceCell::new(),
            optimized: OnceCell::new(),
            unoptimized: OnceCell::new(),
            nested: Mutex::new(HashMap::new()),
        }
    }

    /// The code for a function body or block literal inside this script.
    /// Every tier lowering the same body gets the same instance.
    pub fn nested_code(&self, body: &ScriptAst) -> Arc<CompiledCode> {
        let key = (body.span.start, body.span.end);
        self.nested
            .lock()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(CompiledCode::nested(
                    self.services.clone(),
                    &self.origin,
                    self.file(),
                    self.source.clone(),
                    key.0..key.1,
                    body.clone(),
                ))
            })
            .clone()
    }

    /* ===================== Accessors ===================== */

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// This script's own text
    pub fn text(&self) -> &str {
        &self.source[self.range.clone()]
    }

    /// SHA-256 of [`CompiledCode::text`], hex encoded
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn is_compiled(&self, tier: Tier) -> bool {
        self.tier_cell(tier).get().is_some()
    }

    /// Slot indices by name; absent until an optimized compile has run
    pub fn name_to_index(&self) -> Option<&IndexMap<String, usize>> {
        self.analysis.get().map(|a| a.layout.as_map())
    }

    /* ===================== Lazy Initialization ===================== */

    pub fn ast(&self) -> Result<&Arc<ScriptAst>, ScriptError> {
        self.ast.get_or_try_init(|| {
            debug!(script = %self.id, origin = %self.origin, "Parsing deferred script");
            self.services.parser.parse(self.text()).map(Arc::new)
        })
    }

    pub fn metadata(&self) -> Result<&Arc<ScriptMetadata>, ScriptError> {
        self.metadata.get_or_try_init(|| {
            let ast = self.ast()?;
            Ok(Arc::new(self.services.resolver.resolve(ast)))
        })
    }

    fn ensure_security(&self) -> Result<SecurityFlags, ScriptError> {
        self.security
            .get_or_try_init(|| {
                let trusted = self.services.trust.is_trusted(&self.origin);
                let suspicious = match self.services.scanner.scan(self.text()) {
                    ScanVerdict::Clean => false,
                    ScanVerdict::Flagged => true,
                    ScanVerdict::Blocked(reason) => {
                        tracing::warn!(script = %self.id, origin = %self.origin, %reason, "Script content blocked");
                        return Err(ScriptError::BlockedContent { reason });
                    }
                };
                Ok(SecurityFlags {
                    trusted,
                    suspicious,
                })
            })
            .copied()
    }

    fn analysis(&self) -> Result<&VariableAnalysis, ScriptError> {
        self.analysis
            .get_or_try_init(|| Ok(analyze(self.ast()?)))
    }

    fn tier_cell(&self, tier: Tier) -> &OnceCell<Arc<CompiledClauses>> {
        match tier {
            Tier::Optimized => &self.optimized,
            Tier::Unoptimized => &self.unoptimized,
        }
    }

    fn ensure_tier(&self, tier: Tier) -> Result<&Arc<CompiledClauses>, ScriptError> {
        self.tier_cell(tier).get_or_try_init(|| {
            let ast = self.ast()?;
            let layout = match tier {
                Tier::Optimized => self.analysis()?.layout.clone(),
                Tier::Unoptimized => Arc::new(SlotLayout::automatic()),
            };

            let span = tracing::debug_span!("compile", script = %self.id, tier = tier.name());
            let _enter = span.enter();

            self.services.events.compile_started(self.id, tier);
            let result = self.services.codegen.lower(LoweringRequest {
                ast,
                code: self,
                tier,
                layout,
            });
            self.services
                .events
                .compile_finished(self.id, tier, result.is_ok());

            result.map(Arc::new)
        })
    }

    /// Compile for the requested tier and return the tier actually usable.
    ///
    /// An optimized request is downgraded (returns `false`) when the script
    /// declares an all-scope variable, or uses a name declared all-scope
    /// anywhere in the engine so far. The second check runs on every call,
    /// since declarations happen at run time. Each tier is lowered at most
    /// once.
    pub fn compile(&self, optimized: bool) -> Result<bool, ScriptError> {
        self.metadata()?;
        self.ensure_security()?;

        if optimized {
            let analysis = self.analysis()?;
            if analysis.has_all_scope || self.services.all_scope.any_of(analysis.layout.names()) {
                debug!(script = %self.id, "All-scope variable found, using unoptimized tier");
                self.ensure_tier(Tier::Unoptimized)?;
                return Ok(false);
            }
            self.ensure_tier(Tier::Optimized)?;
            return Ok(true);
        }

        self.ensure_tier(Tier::Unoptimized)?;
        Ok(false)
    }

    /// A tier produced by an earlier [`CompiledCode::compile`]
    pub fn tier(&self, tier: Tier) -> Result<&Arc<CompiledClauses>, ScriptError> {
        self.tier_cell(tier)
            .get()
            .ok_or(ScriptError::Invariant(InvariantViolation::MissingTier(
                tier.name(),
            )))
    }

    pub fn is_trusted(&self) -> Result<bool, ScriptError> {
        self.security
            .get()
            .map(|s| s.trusted)
            .ok_or(ScriptError::Invariant(InvariantViolation::NotCompiled))
    }

    pub fn has_suspicious_content(&self) -> Result<bool, ScriptError> {
        self.security
            .get()
            .map(|s| s.suspicious)
            .ok_or(ScriptError::Invariant(InvariantViolation::NotCompiled))
    }

    pub fn has_clause(&self, clause: Clause) -> Result<bool, ScriptError> {
        Ok(self.ast()?.has_clause(clause))
    }
}

impl fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCode")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("optimized", &self.optimized.get().is_some())
            .field("unoptimized", &self.unoptimized.get().is_some())
            .finish()
    }
}
