//! Test helpers
//!
//! Engine builders with counting collaborators, plus shortcuts for creating
//! and running scripts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::compiler::{ClosureCompiler, CodeGenerator, CompiledClauses, LoweringRequest, Tier};
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::engine::Engine;
use crate::errors::ScriptError;
use crate::invoke::InvokeOptions;
use crate::runner::ClauseRunner;
use crate::script_block::ScriptBlock;
use crate::services::EventSink;
use crate::session::Pipe;
use crate::types::{Clause, Outcome, Val};

/// Counts lowering per tier, optionally pausing to widen compile races
#[derive(Debug, Default)]
pub struct CountingCodegen {
    pub optimized: AtomicUsize,
    pub unoptimized: AtomicUsize,
    pub delay: Option<Duration>,
}

impl CountingCodegen {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn count(&self, tier: Tier) -> usize {
        match tier {
            Tier::Optimized => self.optimized.load(Ordering::SeqCst),
            Tier::Unoptimized => self.unoptimized.load(Ordering::SeqCst),
        }
    }
}

impl CodeGenerator for CountingCodegen {
    fn lower(&self, request: LoweringRequest<'_>) -> Result<CompiledClauses, ScriptError> {
        match request.tier {
            Tier::Optimized => self.optimized.fetch_add(1, Ordering::SeqCst),
            Tier::Unoptimized => self.unoptimized.fetch_add(1, Ordering::SeqCst),
        };
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        ClosureCompiler.lower(request)
    }
}

/// Counts every event the core reports
#[derive(Debug, Default)]
pub struct CountingEvents {
    pub compiles_started: AtomicUsize,
    pub compiles_finished: AtomicUsize,
    pub invocations_started: AtomicUsize,
    pub invocations_finished: AtomicUsize,
}

impl EventSink for CountingEvents {
    fn compile_started(&self, _script: Uuid, _tier: Tier) {
        self.compiles_started.fetch_add(1, Ordering::SeqCst);
    }

    fn compile_finished(&self, _script: Uuid, _tier: Tier, _success: bool) {
        self.compiles_finished.fetch_add(1, Ordering::SeqCst);
    }

    fn invocation_started(&self, _script: Uuid, _clause: Clause) {
        self.invocations_started.fetch_add(1, Ordering::SeqCst);
    }

    fn invocation_finished(&self, _script: Uuid, _clause: Clause, _success: bool) {
        self.invocations_finished.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn engine() -> Arc<Engine> {
    Engine::builder().build()
}

pub fn engine_with(config: Config) -> Arc<Engine> {
    Engine::builder().config(config).build()
}

pub fn context() -> (Arc<Engine>, ExecutionContext) {
    let engine = engine();
    let ctx = ExecutionContext::new(engine.clone());
    (engine, ctx)
}

pub fn create(engine: &Engine, source: &str) -> ScriptBlock {
    engine.create("test", source).expect("Create script failed")
}

/// Run every clause of `source` as a pipeline over `items`; returns the output
pub fn run_pipeline(
    ctx: &mut ExecutionContext,
    source: &str,
    items: Vec<Val>,
) -> Result<(Outcome, Vec<Val>), ScriptError> {
    let block = ctx.engine().create("test", source)?;
    let output = Pipe::new();
    let options = InvokeOptions::default().with_output(output.clone());
    let outcome = ClauseRunner::run(ctx, block, options, items)?;
    Ok((outcome, output.take()))
}

/// Run `source` with no input and return its output
pub fn run(source: &str) -> Vec<Val> {
    let (_engine, mut ctx) = context();
    let (outcome, output) = run_pipeline(&mut ctx, source, Vec::new()).expect("Run failed");
    assert_eq!(outcome, Outcome::Completed);
    output
}

pub fn run_with_args(source: &str, args: Vec<Val>) -> Vec<Val> {
    let (engine, mut ctx) = context();
    let block = create(&engine, source);
    let output = Pipe::new();
    let options = InvokeOptions::default()
        .with_args(args)
        .with_output(output.clone());
    let outcome = block
        .invoke(&mut ctx, Clause::End, options)
        .expect("Invoke failed");
    assert_eq!(outcome, Outcome::Completed);
    output.take()
}

pub fn num(n: f64) -> Val {
    Val::Num(n)
}

pub fn s(v: &str) -> Val {
    Val::Str(v.to_string())
}
