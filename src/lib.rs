//! Tempo script engine execution core
//!
//! Parses scripts into compiled code objects, compiles each at most once per
//! tier (an optimized slot-addressed form and an unoptimized by-name form),
//! caches parsed scripts process-wide, and runs their clauses with argument
//! binding, scoping and non-local exit handling.

pub mod cache;
pub mod cli;
pub mod compiled;
pub mod compiler;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod invoke;
pub mod parser;
pub mod runner;
pub mod script_block;
pub mod services;
pub mod session;
pub mod slots;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types
pub use types::*;

pub use cache::ScriptBlockCache;
pub use compiled::{CompiledCode, SecurityFlags};
pub use compiler::{ClosureCompiler, CodeGenerator, CompiledClauses, Tier};
pub use config::Config;
pub use context::{
    Debugger, DebuggerAction, ExecutionContext, LanguageMode, NativeCommand, SequencePoint,
    StopHandle,
};
pub use engine::{Engine, EngineBuilder};
pub use errors::{BindingError, InvariantViolation, ScriptError};
pub use invoke::{invoke_clause, BindingReport, Invocation, InvokeOptions, ParameterBinding};
pub use runner::ClauseRunner;
pub use script_block::ScriptBlock;
pub use services::{
    ContentScanner, EventSink, ParameterMetadata, ParameterResolver, ScanVerdict, ScriptMetadata,
    ScriptParser, Services, TrustClassifier,
};
pub use session::{AllScopeNames, Pipe, SessionId};
pub use slots::{AutomaticVariable, SlotLayout, Slots};
