//! Script block handles
//!
//! A [`ScriptBlock`] is a cheap handle over shared [`CompiledCode`]. The
//! handle carries the per-use state (bound session, language mode, logged
//! flag); none of it is ever written back into the shared compiled data.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::compiled::CompiledCode;
use crate::context::{ExecutionContext, LanguageMode};
use crate::errors::{BindingError, ScriptError};
use crate::invoke::{invoke_clause, InvokeOptions};
use crate::services::ParameterMetadata;
use crate::session::{Pipe, SessionId};
use crate::types::{AttributeAst, Clause, Outcome, Val};

pub struct ScriptBlock {
    code: Arc<CompiledCode>,
    session: Option<SessionId>,
    language_mode: Option<LanguageMode>,
    logged: AtomicBool,
}

impl ScriptBlock {
    pub fn new(code: Arc<CompiledCode>) -> Self {
        Self {
            code,
            session: None,
            language_mode: None,
            logged: AtomicBool::new(false),
        }
    }

    pub fn code(&self) -> &Arc<CompiledCode> {
        &self.code
    }

    /// A copy with no session binding, safe to bind to a caller's own session
    pub fn detached(&self) -> Self {
        Self {
            code: self.code.clone(),
            session: None,
            language_mode: self.language_mode,
            logged: AtomicBool::new(self.logged.load(Ordering::Relaxed)),
        }
    }

    pub fn bind_to(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn is_bound(&self) -> bool {
        self.session.is_some()
    }

    pub fn with_language_mode(mut self, mode: LanguageMode) -> Self {
        self.language_mode = Some(mode);
        self
    }

    pub fn language_mode(&self) -> Option<LanguageMode> {
        self.language_mode
    }

    /* ===================== Compilation ===================== */

    /// Returns whether the optimized tier will be used
    pub fn compile(&self, optimized: bool) -> Result<bool, ScriptError> {
        self.code.compile(optimized)
    }

    pub fn attributes(&self) -> Result<Vec<AttributeAst>, ScriptError> {
        Ok(self.code.metadata()?.attributes.clone())
    }

    pub fn parameter_metadata(&self) -> Result<Vec<ParameterMetadata>, ScriptError> {
        Ok(self.code.metadata()?.parameters.clone())
    }

    pub fn uses_advanced_binding(&self) -> Result<bool, ScriptError> {
        Ok(self.code.metadata()?.uses_advanced_binding)
    }

    pub fn has_begin(&self) -> Result<bool, ScriptError> {
        self.code.has_clause(Clause::Begin)
    }

    pub fn has_process(&self) -> Result<bool, ScriptError> {
        self.code.has_clause(Clause::Process)
    }

    pub fn has_end(&self) -> Result<bool, ScriptError> {
        self.code.has_clause(Clause::End)
    }

    pub fn has_dynamic_param(&self) -> Result<bool, ScriptError> {
        self.code.has_clause(Clause::DynamicParam)
    }

    /* ===================== Logging ===================== */

    pub fn is_logged(&self) -> bool {
        self.logged.load(Ordering::Relaxed)
    }

    /// Log the script text once per handle. Must run after compilation.
    pub(crate) fn log_once(&self) {
        if self.logged.swap(true, Ordering::Relaxed) {
            return;
        }
        let suspicious = self.code.has_suspicious_content().unwrap_or(false);
        if suspicious {
            warn!(
                script = %self.code.id(),
                origin = self.code.origin(),
                hash = self.code.content_hash(),
                text = self.code.text(),
                "Running script with suspicious content"
            );
        } else {
            debug!(
                script = %self.code.id(),
                origin = self.code.origin(),
                hash = self.code.content_hash(),
                "Running script"
            );
        }
    }

    /* ===================== Invocation ===================== */

    /// Run one clause; see [`invoke_clause`]
    pub fn invoke(
        &self,
        ctx: &mut ExecutionContext,
        clause: Clause,
        options: InvokeOptions,
    ) -> Result<Outcome, ScriptError> {
        invoke_clause(ctx, self, clause, options).map(|i| i.outcome)
    }

    /// Run the DynamicParam clause in a fresh scope. It must write exactly one
    /// map of parameter names to default values.
    pub fn dynamic_parameters(
        &self,
        ctx: &mut ExecutionContext,
    ) -> Result<IndexMap<String, Val>, ScriptError> {
        if !self.has_dynamic_param()? {
            return Ok(IndexMap::new());
        }

        let pipe = Pipe::new();
        let options = InvokeOptions {
            output: Some(pipe.clone()),
            ..InvokeOptions::default()
        };
        self.invoke(ctx, Clause::DynamicParam, options)?;

        let mut items = pipe.take();
        match (items.len(), items.pop()) {
            (1, Some(Val::Map(map))) => Ok(map),
            (1, Some(other)) => Err(BindingError::DynamicParamShape(format!(
                "a value of type {}",
                other.type_name()
            ))
            .into()),
            (n, _) => Err(BindingError::DynamicParamShape(format!("{} values", n)).into()),
        }
    }
}

impl Clone for ScriptBlock {
    fn clone(&self) -> Self {
        Self {
            code: self.code.clone(),
            session: self.session,
            language_mode: self.language_mode,
            logged: AtomicBool::new(self.logged.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for ScriptBlock {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.code, &other.code) && self.session == other.session
    }
}

impl fmt::Debug for ScriptBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptBlock")
            .field("id", &self.code.id())
            .field("origin", &self.code.origin())
            .field("session", &self.session)
            .field("language_mode", &self.language_mode)
            .finish()
    }
}
