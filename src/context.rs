//! Execution context
//!
//! The explicit, per-invocation-chain state every entry point receives: the
//! engine, the sessions and their scopes, the language mode, output and error
//! pipes, the debugger hook, the pipeline-stopping flag and the host's native
//! commands. Nothing in the core reaches for thread-local state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::ScriptError;
use crate::script_block::ScriptBlock;
use crate::session::{Pipe, ScopeOrigin, SessionId, SessionState};
use crate::types::{Span, Val};

/* ===================== Language Mode ===================== */

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum LanguageMode {
    #[default]
    Full,
    /// Only safe native commands
    Constrained,
    /// Constrained, and no function definitions or script block invocation
    Restricted,
    /// No script clause may run
    NoLanguage,
}

impl LanguageMode {
    pub fn allows_unsafe_natives(self) -> bool {
        matches!(self, LanguageMode::Full)
    }

    pub fn allows_definitions(self) -> bool {
        matches!(self, LanguageMode::Full | LanguageMode::Constrained)
    }
}

impl fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LanguageMode::Full => "Full",
            LanguageMode::Constrained => "Constrained",
            LanguageMode::Restricted => "Restricted",
            LanguageMode::NoLanguage => "NoLanguage",
        };
        f.write_str(name)
    }
}

/* ===================== Debugger ===================== */

/// A statement about to run, reported to an attached debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    pub script: Uuid,
    pub index: usize,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerAction {
    Continue,
    /// Tear down execution; propagates as [`Outcome::Terminated`](crate::types::Outcome)
    Terminate,
}

pub trait Debugger {
    fn on_sequence_point(&mut self, point: &SequencePoint) -> DebuggerAction;
}

/* ===================== Native Commands ===================== */

pub type NativeFn = Arc<dyn Fn(&mut ExecutionContext, Vec<Val>) -> Result<Val, ScriptError> + Send + Sync>;

/// A host function callable from scripts by name
#[derive(Clone)]
pub struct NativeCommand {
    pub name: String,
    /// Allowed in constrained and restricted language modes
    pub safe: bool,
    pub func: NativeFn,
}

impl NativeCommand {
    pub fn new<F>(name: impl Into<String>, safe: bool, func: F) -> Self
    where
        F: Fn(&mut ExecutionContext, Vec<Val>) -> Result<Val, ScriptError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            safe,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for NativeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCommand")
            .field("name", &self.name)
            .field("safe", &self.safe)
            .finish()
    }
}

fn builtin_natives() -> Vec<NativeCommand> {
    vec![
        NativeCommand::new("Write-Output", true, |_, args| Ok(Val::from_output(args))),
        NativeCommand::new("Write-Error", true, |ctx, args| {
            let message = args
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            ctx.error_pipe().write(Val::Str(message));
            Ok(Val::Null)
        }),
    ]
}

/* ===================== Stop Handle ===================== */

/// Cross-thread "pipeline stopping" flag
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/* ===================== Execution Context ===================== */

pub struct ExecutionContext {
    engine: Arc<Engine>,
    sessions: Vec<SessionState>,
    current_session: SessionId,
    pub(crate) language_mode: LanguageMode,
    pub(crate) output: Pipe,
    pub(crate) error_pipe: Pipe,
    pub(crate) scope_origin: ScopeOrigin,
    pub(crate) call_depth: usize,
    debugger: Option<Box<dyn Debugger>>,
    stop: StopHandle,
    pipeline_failed: bool,
    natives: HashMap<String, NativeCommand>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("current_session", &self.current_session)
            .field("language_mode", &self.language_mode)
            .field("call_depth", &self.call_depth)
            .field("debugging", &self.debugger.is_some())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(engine: Arc<Engine>) -> Self {
        let language_mode = engine.config().engine.language_mode;
        let mut ctx = Self {
            engine,
            sessions: vec![SessionState::new()],
            current_session: SessionId::GLOBAL,
            language_mode,
            output: Pipe::new(),
            error_pipe: Pipe::new(),
            scope_origin: ScopeOrigin::Runspace,
            call_depth: 0,
            debugger: None,
            stop: StopHandle::default(),
            pipeline_failed: false,
            natives: HashMap::new(),
        };
        for native in builtin_natives() {
            ctx.register_native(native);
        }
        ctx
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn language_mode(&self) -> LanguageMode {
        self.language_mode
    }

    pub fn set_language_mode(&mut self, mode: LanguageMode) {
        self.language_mode = mode;
    }

    /// The default output pipe (used when an invocation does not redirect)
    pub fn output(&self) -> &Pipe {
        &self.output
    }

    pub fn error_pipe(&self) -> &Pipe {
        &self.error_pipe
    }

    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /* ----- debugger ----- */

    pub fn set_debugger(&mut self, debugger: Box<dyn Debugger>) {
        self.debugger = Some(debugger);
    }

    pub fn clear_debugger(&mut self) -> Option<Box<dyn Debugger>> {
        self.debugger.take()
    }

    pub fn is_debugging(&self) -> bool {
        self.debugger.is_some()
    }

    pub(crate) fn hit_sequence_point(&mut self, point: &SequencePoint) -> DebuggerAction {
        match self.debugger.as_mut() {
            Some(debugger) => debugger.on_sequence_point(point),
            None => DebuggerAction::Continue,
        }
    }

    /* ----- stopping and failure ----- */

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_stopping()
    }

    pub fn pipeline_failed(&self) -> bool {
        self.pipeline_failed
    }

    pub(crate) fn mark_pipeline_failed(&mut self) {
        self.pipeline_failed = true;
    }

    /* ----- natives ----- */

    pub fn register_native(&mut self, native: NativeCommand) {
        self.natives.insert(native.name.to_ascii_lowercase(), native);
    }

    pub fn native(&self, name: &str) -> Option<NativeCommand> {
        self.natives.get(&name.to_ascii_lowercase()).cloned()
    }

    /* ----- sessions ----- */

    /// Create a new, empty session (module-like isolation)
    pub fn new_session(&mut self) -> SessionId {
        self.sessions.push(SessionState::new());
        SessionId(self.sessions.len() - 1)
    }

    pub fn current_session(&self) -> SessionId {
        self.current_session
    }

    /// Return to a session id taken from [`ExecutionContext::current_session`].
    /// Sessions are never removed, so such an id is always valid.
    pub(crate) fn restore_session(&mut self, id: SessionId) {
        debug_assert!(id.0 < self.sessions.len(), "session {} does not exist", id.0);
        self.current_session = id;
    }

    pub(crate) fn switch_session(&mut self, id: SessionId) -> Result<SessionId, ScriptError> {
        if id.0 >= self.sessions.len() {
            return Err(ScriptError::runtime(format!(
                "session {} does not exist",
                id.0
            )));
        }
        Ok(std::mem::replace(&mut self.current_session, id))
    }

    pub fn session(&self, id: SessionId) -> Option<&SessionState> {
        self.sessions.get(id.0)
    }

    pub fn session_state(&self) -> &SessionState {
        &self.sessions[self.current_session.0]
    }

    pub fn session_state_mut(&mut self) -> &mut SessionState {
        &mut self.sessions[self.current_session.0]
    }

    /* ----- variables and functions ----- */

    pub fn get_variable(&self, name: &str) -> Option<Val> {
        self.session_state().get_variable(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Val) {
        self.session_state_mut().set_variable(name, value);
    }

    /// Declare an all-scope variable. The name is also recorded engine-wide
    /// so code compiled from now on never slot-addresses it.
    pub fn declare_all_scope(&mut self, name: &str, value: Val) {
        self.engine.services().all_scope.declare(name);
        self.session_state_mut().declare_all_scope(name, value);
    }

    pub fn set_global_variable(&mut self, name: &str, value: Val) {
        self.session_state_mut().global_mut().set_local(name, value);
    }

    pub fn find_function(&self, name: &str) -> Option<ScriptBlock> {
        self.session_state().find_function(name)
    }

    pub fn define_function(&mut self, name: &str, block: ScriptBlock) {
        self.session_state_mut().define_function(name, block);
    }

    /// `$LastExitCode` of the current session, if an exit has been recorded
    pub fn last_exit_code(&self) -> Option<i32> {
        self.session_state()
            .global()
            .get_local(LAST_EXIT_CODE)
            .and_then(|v| v.as_num())
            .map(|n| n as i32)
    }
}

pub const LAST_EXIT_CODE: &str = "LastExitCode";
