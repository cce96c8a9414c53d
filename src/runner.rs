//! Clause runner: adapts begin/process/end to a streaming pipeline
//!
//! The tier is chosen once at construction and one slots container is reused
//! by all three clauses. The scope is entered (and arguments bound) once, at
//! `begin`, and left at `end`, on any error, or on any exit or termination.
//! After an exit has been absorbed, `process` and `end` do nothing.

use std::sync::Arc;

use crate::compiler::{CompiledClauses, Tier};
use crate::context::ExecutionContext;
use crate::errors::ScriptError;
use crate::invoke::binding;
use crate::invoke::{
    check_call_depth, enter_scope, exit_scope, is_terminal, prepare, settle, switch_in, Ambient,
    InvocationFrame, InvokeOptions, ScopeEntry,
};
use crate::script_block::ScriptBlock;
use crate::services::ScriptMetadata;
use crate::slots::{AutomaticVariable, Slots, SlotsRef};
use crate::types::{Clause, Flow, Outcome, Val};

#[derive(Debug)]
enum RunnerState {
    Ready,
    Running(ScopeEntry),
    Finished,
}

pub struct ClauseRunner {
    block: ScriptBlock,
    options: InvokeOptions,
    compiled: Arc<CompiledClauses>,
    metadata: Arc<ScriptMetadata>,
    slots: SlotsRef,
    debugging: bool,
    input: Vec<Val>,
    state: RunnerState,
}

impl ClauseRunner {
    pub fn new(
        ctx: &mut ExecutionContext,
        block: ScriptBlock,
        options: InvokeOptions,
    ) -> Result<Self, ScriptError> {
        let debugging = ctx.is_debugging();
        let (code, compiled) = prepare(&block, !debugging && options.new_scope)?;
        let metadata = code.metadata()?.clone();

        let slots = Slots::new(compiled.layout.clone()).into_ref();
        binding::seed_automatic(&slots, &options, &code);

        Ok(Self {
            block,
            options,
            compiled,
            metadata,
            slots,
            debugging,
            input: Vec::new(),
            state: RunnerState::Ready,
        })
    }

    /// Run a whole pipeline: begin, one process per item, end. An empty
    /// stream still runs process once, without input.
    pub fn run<I>(
        ctx: &mut ExecutionContext,
        block: ScriptBlock,
        options: InvokeOptions,
        items: I,
    ) -> Result<Outcome, ScriptError>
    where
        I: IntoIterator<Item = Val>,
    {
        let mut runner = ClauseRunner::new(ctx, block, options)?;

        let outcome = runner.begin(ctx)?;
        if outcome.is_terminal() {
            return Ok(outcome);
        }
        let mut streamed = false;
        for item in items {
            streamed = true;
            let outcome = runner.process(ctx, Some(item))?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
        if !streamed {
            let outcome = runner.process(ctx, None)?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
        runner.end(ctx)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, RunnerState::Finished)
    }

    pub fn tier_is_optimized(&self) -> bool {
        self.compiled.tier == Tier::Optimized
    }

    pub fn begin(&mut self, ctx: &mut ExecutionContext) -> Result<Outcome, ScriptError> {
        if !matches!(self.state, RunnerState::Ready) {
            return Ok(Outcome::Completed);
        }
        self.run_clause(ctx, Clause::Begin)
    }

    /// Run the process clause for one item; `None` runs it without input
    pub fn process(
        &mut self,
        ctx: &mut ExecutionContext,
        item: Option<Val>,
    ) -> Result<Outcome, ScriptError> {
        if matches!(self.state, RunnerState::Ready) {
            let outcome = self.begin(ctx)?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
        if self.is_finished() {
            return Ok(Outcome::Completed);
        }

        if let Some(item) = item {
            self.input.push(item.clone());
            self.slots
                .borrow_mut()
                .set_automatic(AutomaticVariable::Underbar, item);
        }

        if self.compiled.process.is_none() {
            return Ok(Outcome::Completed);
        }

        self.slots
            .borrow_mut()
            .set_automatic(AutomaticVariable::Input, Val::List(self.input.clone()));
        let outcome = self.run_clause(ctx, Clause::Process);
        self.input.clear();
        outcome
    }

    /// Run the end clause and leave the scope
    pub fn end(&mut self, ctx: &mut ExecutionContext) -> Result<Outcome, ScriptError> {
        if matches!(self.state, RunnerState::Ready) {
            let outcome = self.begin(ctx)?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
        if self.is_finished() {
            return Ok(Outcome::Completed);
        }

        let input = if self.compiled.process.is_none() {
            Val::List(std::mem::take(&mut self.input))
        } else {
            Val::Null
        };
        self.slots
            .borrow_mut()
            .set_automatic(AutomaticVariable::Input, input);

        let outcome = if self.compiled.end.is_some() {
            self.run_clause(ctx, Clause::End)
        } else {
            Ok(Outcome::Completed)
        };
        self.dispose(ctx);
        outcome
    }

    /// Leave the scope if it is still entered. Idempotent.
    pub fn dispose(&mut self, ctx: &mut ExecutionContext) {
        let state = std::mem::replace(&mut self.state, RunnerState::Finished);
        if let RunnerState::Running(entry) = state {
            let ambient = Ambient::capture(ctx);
            if let Some(session) = self.block.session() {
                if ctx.switch_session(session).is_err() {
                    return;
                }
            }
            exit_scope(ctx, entry);
            ambient.restore(ctx);
        }
    }

    /// Run one clause. The first call (begin) also enters the scope and binds
    /// arguments, whether or not a begin clause exists.
    fn run_clause(
        &mut self,
        ctx: &mut ExecutionContext,
        clause: Clause,
    ) -> Result<Outcome, ScriptError> {
        let first = matches!(self.state, RunnerState::Ready);
        let delegate = self.compiled.clause(clause).cloned();

        if ctx.is_stopping() {
            self.dispose(ctx);
            return Err(ScriptError::Stopping);
        }
        if let Err(err) = check_call_depth(ctx) {
            self.dispose(ctx);
            return Err(err);
        }

        let ambient = match switch_in(ctx, &self.block, &self.options) {
            Ok(ambient) => ambient,
            Err(err) => {
                self.dispose(ctx);
                return Err(err);
            }
        };

        if first {
            match enter_scope(
                ctx,
                &self.slots,
                &self.options,
                &self.metadata.parameters,
            ) {
                Ok(entry) => self.state = RunnerState::Running(entry),
                Err(err) => {
                    self.state = RunnerState::Finished;
                    ambient.restore(ctx);
                    return Err(err);
                }
            }
        }

        self.block.log_once();
        let code = self.block.code().clone();
        let span = tracing::debug_span!("invoke", script = %code.id(), clause = clause.name());
        let _enter = span.enter();
        code.services().events.invocation_started(code.id(), clause);
        ctx.call_depth += 1;

        let flow: Flow = {
            let mut frame = InvocationFrame::new(
                ctx,
                &self.block,
                self.slots.clone(),
                &self.compiled,
                self.debugging,
            );
            let mut flow = Ok(());
            if first {
                let args = std::mem::take(&mut self.options.args);
                if let Err(control) = binding::bind_arguments(
                    &mut frame,
                    &self.compiled,
                    &self.metadata.parameters,
                    args,
                ) {
                    flow = Err(control);
                }
            }
            if flow.is_ok() {
                if let Some(delegate) = &delegate {
                    flow = delegate(&mut frame);
                }
            }
            flow
        };

        ctx.call_depth -= 1;
        if is_terminal(&flow) {
            self.dispose(ctx);
        }
        ambient.restore(ctx);

        let outcome = settle(ctx, flow, &self.options);
        code.services()
            .events
            .invocation_finished(code.id(), clause, outcome.is_ok());
        outcome
    }
}

impl std::fmt::Debug for ClauseRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClauseRunner")
            .field("block", &self.block)
            .field("state", &self.state)
            .field("buffered", &self.input.len())
            .finish()
    }
}
