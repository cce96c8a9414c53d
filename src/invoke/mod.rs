//! Invocation driver
//!
//! Runs one clause of a script block: selects the compiled delegate, builds
//! the slots, switches language mode and pipes, enters a scope (new or
//! dotted), binds arguments, runs, and always restores the caller's state.
//! Non-local exits come back as [`Outcome`] values; script errors come back
//! as `Err` with call-indirection wrappers removed.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::compiled::CompiledCode;
use crate::compiler::{CompiledClauses, Tier};
use crate::context::{DebuggerAction, ExecutionContext, LanguageMode, SequencePoint, LAST_EXIT_CODE};
use crate::errors::{BindingError, ScriptError};
use crate::script_block::ScriptBlock;
use crate::services::ParameterMetadata;
use crate::session::{fold, Pipe, Scope, ScopeOrigin, SessionId};
use crate::slots::{Slots, SlotsRef};
use crate::types::{Clause, Control, Flow, Outcome, Span, Val};

pub mod binding;

pub use binding::{BindingReport, ParameterBinding};

/* ===================== Options ===================== */

/// Per-invocation options supplied by the caller
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Run in a fresh child scope; `false` dot-sources into the current scope
    pub new_scope: bool,
    pub language_mode: Option<LanguageMode>,
    /// `$_`
    pub dollar_under: Option<Val>,
    /// `$input`
    pub input: Option<Vec<Val>>,
    /// `$this`
    pub this: Option<Val>,
    /// Functions defined in the new scope before running
    pub functions: Vec<(String, ScriptBlock)>,
    /// Variables defined in the new scope before running
    pub variables: Vec<(String, Val)>,
    /// Positional arguments
    pub args: Vec<Val>,
    /// The script is a standalone file rather than embedded code
    pub standalone: bool,
    /// Let exits propagate even from a standalone script
    pub rethrow_exit: bool,
    pub output: Option<Pipe>,
    pub error_pipe: Option<Pipe>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            new_scope: true,
            language_mode: None,
            dollar_under: None,
            input: None,
            this: None,
            functions: Vec::new(),
            variables: Vec::new(),
            args: Vec::new(),
            standalone: false,
            rethrow_exit: false,
            output: None,
            error_pipe: None,
        }
    }
}

impl InvokeOptions {
    /// Options for dot-sourcing into the caller's scope
    pub fn dotted() -> Self {
        Self {
            new_scope: false,
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Val>) -> Self {
        self.args = args;
        self
    }

    pub fn with_output(mut self, output: Pipe) -> Self {
        self.output = Some(output);
        self
    }
}

/* ===================== Frame ===================== */

/// Arguments passed into a compiled delegate
pub struct InvocationFrame<'a> {
    pub ctx: &'a mut ExecutionContext,
    pub output: Pipe,
    pub slots: SlotsRef,
    pub script: ScriptBlock,
    pub file: Option<PathBuf>,
    pub debugging: bool,
    pub sequence_points: Arc<[Span]>,
}

impl<'a> InvocationFrame<'a> {
    pub(crate) fn new(
        ctx: &'a mut ExecutionContext,
        script: &ScriptBlock,
        slots: SlotsRef,
        compiled: &CompiledClauses,
        debugging: bool,
    ) -> Self {
        let output = ctx.output.clone();
        Self {
            ctx,
            output,
            slots,
            script: script.clone(),
            file: script.code().file().map(|p| p.to_path_buf()),
            debugging,
            sequence_points: compiled.sequence_points.clone(),
        }
    }

    /// Report statement `index` to the debugger
    pub(crate) fn sequence_point(&mut self, index: usize) -> Flow {
        let point = SequencePoint {
            script: self.script.code().id(),
            index,
            span: self.sequence_points.get(index).copied().unwrap_or_default(),
        };
        match self.ctx.hit_sequence_point(&point) {
            DebuggerAction::Continue => Ok(()),
            DebuggerAction::Terminate => Err(Control::Terminate),
        }
    }
}

/// Result of a successful [`invoke_clause`]
#[derive(Debug, Clone)]
pub struct Invocation {
    pub outcome: Outcome,
    pub bindings: BindingReport,
}

impl Invocation {
    fn completed() -> Self {
        Self {
            outcome: Outcome::Completed,
            bindings: BindingReport::default(),
        }
    }
}

/* ===================== Driver ===================== */

/// Run one clause of `block`. A missing clause completes without running.
pub fn invoke_clause(
    ctx: &mut ExecutionContext,
    block: &ScriptBlock,
    clause: Clause,
    mut options: InvokeOptions,
) -> Result<Invocation, ScriptError> {
    if ctx.is_stopping() {
        return Err(ScriptError::Stopping);
    }
    check_call_depth(ctx)?;

    let debugging = ctx.is_debugging();
    let (code, compiled) = prepare(block, !debugging && options.new_scope)?;
    let Some(delegate) = compiled.clause(clause).cloned() else {
        return Ok(Invocation::completed());
    };
    let metadata = code.metadata()?.clone();

    let slots = Slots::new(compiled.layout.clone()).into_ref();
    binding::seed_automatic(&slots, &options, &code);

    let ambient = switch_in(ctx, block, &options)?;
    block.log_once();

    let span = tracing::debug_span!("invoke", script = %code.id(), clause = clause.name());
    let _enter = span.enter();
    code.services().events.invocation_started(code.id(), clause);
    ctx.call_depth += 1;

    let args = std::mem::take(&mut options.args);
    let (flow, bindings) = match enter_scope(ctx, &slots, &options, &metadata.parameters) {
        Ok(entry) => {
            let result = {
                let mut frame = InvocationFrame::new(ctx, block, slots, &compiled, debugging);
                match binding::bind_arguments(&mut frame, &compiled, &metadata.parameters, args) {
                    Ok(report) => (delegate(&mut frame), report),
                    Err(control) => (Err(control), BindingReport::default()),
                }
            };
            exit_scope(ctx, entry);
            result
        }
        Err(err) => (Err(Control::Throw(err)), BindingReport::default()),
    };

    ctx.call_depth -= 1;
    ambient.restore(ctx);

    let outcome = settle(ctx, flow, &options);
    code.services()
        .events
        .invocation_finished(code.id(), clause, outcome.is_ok());
    outcome.map(|outcome| Invocation { outcome, bindings })
}

/// Compile `block` and fetch the tier that will run
pub(crate) fn prepare(
    block: &ScriptBlock,
    optimized: bool,
) -> Result<(Arc<CompiledCode>, Arc<CompiledClauses>), ScriptError> {
    let optimized = block.compile(optimized)?;
    let tier = if optimized {
        Tier::Optimized
    } else {
        Tier::Unoptimized
    };
    let code = block.code().clone();
    let compiled = code.tier(tier)?.clone();
    Ok((code, compiled))
}

pub(crate) fn check_call_depth(ctx: &ExecutionContext) -> Result<(), ScriptError> {
    let max = ctx.engine().config().engine.max_call_depth;
    if ctx.call_depth >= max {
        return Err(ScriptError::CallDepthExceeded(max));
    }
    Ok(())
}

/* ===================== Ambient State ===================== */

/// Caller state captured before a clause runs and restored afterwards
pub(crate) struct Ambient {
    language_mode: LanguageMode,
    output: Pipe,
    error_pipe: Pipe,
    session: SessionId,
    scope_origin: ScopeOrigin,
}

impl Ambient {
    pub(crate) fn capture(ctx: &ExecutionContext) -> Self {
        Self {
            language_mode: ctx.language_mode,
            output: ctx.output.clone(),
            error_pipe: ctx.error_pipe.clone(),
            session: ctx.current_session(),
            scope_origin: ctx.scope_origin,
        }
    }

    pub(crate) fn restore(self, ctx: &mut ExecutionContext) {
        ctx.language_mode = self.language_mode;
        ctx.output = self.output;
        ctx.error_pipe = self.error_pipe;
        ctx.restore_session(self.session);
        ctx.scope_origin = self.scope_origin;
    }
}

/// Capture the caller's state, then switch to the block's language mode,
/// pipes and session.
pub(crate) fn switch_in(
    ctx: &mut ExecutionContext,
    block: &ScriptBlock,
    options: &InvokeOptions,
) -> Result<Ambient, ScriptError> {
    let mode = options
        .language_mode
        .or(block.language_mode())
        .unwrap_or(ctx.language_mode);
    if mode == LanguageMode::NoLanguage {
        return Err(ScriptError::LanguageMode {
            mode: mode.to_string(),
            operation: "running a script".to_string(),
        });
    }

    let ambient = Ambient::capture(ctx);
    if mode != ctx.language_mode {
        debug!(from = %ctx.language_mode, to = %mode, "Switching language mode");
        ctx.language_mode = mode;
    }
    if let Some(output) = &options.output {
        ctx.output = output.clone();
    }
    if let Some(error_pipe) = &options.error_pipe {
        ctx.error_pipe = error_pipe.clone();
    }
    if let Some(session) = block.session() {
        if let Err(err) = ctx.switch_session(session) {
            ambient.restore(ctx);
            return Err(err);
        }
    }
    ctx.scope_origin = ScopeOrigin::Internal;
    Ok(ambient)
}

/* ===================== Scopes ===================== */

/// How an invocation attached its slots, and what must be undone
#[derive(Debug)]
pub(crate) enum ScopeEntry {
    /// A child scope was pushed
    Local,
    /// Dotted into a scope without locals; the slots became its locals
    Attached,
    /// Dotted onto a scope with locals; prior values of the parameter names
    Dotted { shadowed: Vec<(String, Option<Val>)> },
}

pub(crate) fn enter_scope(
    ctx: &mut ExecutionContext,
    slots: &SlotsRef,
    options: &InvokeOptions,
    params: &[ParameterMetadata],
) -> Result<ScopeEntry, ScriptError> {
    if options.new_scope {
        let mut scope = Scope::new(ScopeOrigin::Internal);
        scope.locals = Some(slots.clone());
        define_overrides(&mut scope, options)?;
        ctx.session_state_mut().push_scope(scope);
        return Ok(ScopeEntry::Local);
    }

    let current = ctx.session_state_mut().current_mut();
    if current.locals.is_none() {
        current.locals = Some(slots.clone());
        return Ok(ScopeEntry::Attached);
    }

    let shadowed = params
        .iter()
        .map(|p| (p.name.clone(), current.get_local(&p.name)))
        .collect();
    current.dotted.push(slots.clone());
    Ok(ScopeEntry::Dotted { shadowed })
}

pub(crate) fn exit_scope(ctx: &mut ExecutionContext, entry: ScopeEntry) {
    let session = ctx.session_state_mut();
    match entry {
        ScopeEntry::Local => {
            session.pop_scope();
        }
        ScopeEntry::Attached => {
            session.current_mut().locals = None;
        }
        ScopeEntry::Dotted { shadowed } => {
            let current = session.current_mut();
            current.dotted.pop();
            for (name, prior) in shadowed {
                match prior {
                    Some(value) => current.set_local(&name, value),
                    None => current.remove_local(&name),
                }
            }
        }
    }
}

fn define_overrides(scope: &mut Scope, options: &InvokeOptions) -> Result<(), BindingError> {
    for (name, block) in &options.functions {
        if name.trim().is_empty() {
            return Err(BindingError::NullFunctionName);
        }
        let key = fold(name);
        if scope.functions.contains_key(&key) {
            return Err(BindingError::DuplicateFunction(name.clone()));
        }
        scope.functions.insert(key, block.clone());
    }
    for (position, (name, value)) in options.variables.iter().enumerate() {
        if name.trim().is_empty() {
            return Err(BindingError::NullVariable(position));
        }
        scope.set_local(name, value.clone());
    }
    Ok(())
}

/* ===================== Outcomes ===================== */

/// Whether a flow ends the clause runner (anything but normal completion)
pub(crate) fn is_terminal(flow: &Flow) -> bool {
    !matches!(
        flow,
        Ok(()) | Err(Control::Return) | Err(Control::Break) | Err(Control::Continue)
    )
}

/// Turn a finished clause's flow into an outcome. Must run after the
/// caller's state has been restored.
pub(crate) fn settle(
    ctx: &mut ExecutionContext,
    flow: Flow,
    options: &InvokeOptions,
) -> Result<Outcome, ScriptError> {
    match flow {
        Ok(()) | Err(Control::Return) | Err(Control::Break) | Err(Control::Continue) => {
            Ok(Outcome::Completed)
        }
        Err(Control::Exit(code)) => {
            if options.standalone && !options.rethrow_exit {
                ctx.set_global_variable(LAST_EXIT_CODE, Val::Num(code as f64));
                if code != 0 {
                    ctx.mark_pipeline_failed();
                }
                debug!(code, "Exit absorbed by standalone script");
                Ok(Outcome::Exited(code))
            } else {
                Ok(Outcome::ExitRequested(code))
            }
        }
        Err(Control::Terminate) => Ok(Outcome::Terminated),
        Err(Control::Throw(err)) => Err(err.into_inner_cause()),
    }
}
