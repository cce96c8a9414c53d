//! Lowering from AST to executable closures
//!
//! Two tiers exist. The optimized tier addresses locals by slot index using
//! the layout from [`analysis::analyze`]; the unoptimized tier resolves every
//! variable by name through the scope chain.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::compiled::CompiledCode;
use crate::errors::ScriptError;
use crate::invoke::InvocationFrame;
use crate::slots::SlotLayout;
use crate::types::{Clause, Flow, ScriptAst, Span, Val};

pub mod analysis;
pub mod ops;
mod lower;

pub use analysis::{analyze, VariableAnalysis};
pub use lower::ClosureCompiler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Optimized,
    Unoptimized,
}

impl Tier {
    pub fn name(self) -> &'static str {
        match self {
            Tier::Optimized => "optimized",
            Tier::Unoptimized => "unoptimized",
        }
    }
}

/// A compiled statement list (one clause body)
pub type Delegate = Arc<dyn Fn(&mut InvocationFrame<'_>) -> Flow + Send + Sync>;

/// A compiled expression (parameter default values)
pub type ExprDelegate = Arc<dyn Fn(&mut InvocationFrame<'_>) -> Flow<Val> + Send + Sync>;

/// One tier of a script's compiled form
#[derive(Clone)]
pub struct CompiledClauses {
    pub tier: Tier,
    pub layout: Arc<SlotLayout>,
    pub dynamic_param: Option<Delegate>,
    pub begin: Option<Delegate>,
    pub process: Option<Delegate>,
    pub end: Option<Delegate>,
    /// Default value expression per declared parameter, in declaration order
    pub defaults: Vec<Option<ExprDelegate>>,
    pub sequence_points: Arc<[Span]>,
}

impl CompiledClauses {
    pub fn clause(&self, clause: Clause) -> Option<&Delegate> {
        match clause {
            Clause::DynamicParam => self.dynamic_param.as_ref(),
            Clause::Begin => self.begin.as_ref(),
            Clause::Process => self.process.as_ref(),
            Clause::End => self.end.as_ref(),
        }
    }
}

impl fmt::Debug for CompiledClauses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledClauses")
            .field("tier", &self.tier)
            .field("slots", &self.layout.len())
            .field("begin", &self.begin.is_some())
            .field("process", &self.process.is_some())
            .field("end", &self.end.is_some())
            .finish()
    }
}

/// Everything a code generator needs to lower one script body
pub struct LoweringRequest<'a> {
    pub ast: &'a ScriptAst,
    /// The code being lowered; nested bodies are taken from it with
    /// [`CompiledCode::nested_code`]
    pub code: &'a CompiledCode,
    pub tier: Tier,
    pub layout: Arc<SlotLayout>,
}

pub trait CodeGenerator: Send + Sync {
    fn lower(&self, request: LoweringRequest<'_>) -> Result<CompiledClauses, ScriptError>;
}
