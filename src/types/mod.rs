//! Type definitions shared by the parser, compiler and invocation driver
//!
//! - AST nodes (ScriptAst, Stmt, Expr)
//! - Runtime values (Val)
//! - Control flow (Control, Flow, Outcome)

pub mod ast;
pub mod control;
pub mod values;

// Re-export all types for convenient access
pub use ast::{
    AssignScope, AttributeArg, AttributeAst, BinaryOp, Clause, Expr, MemberAccess, ParamAst,
    ScriptAst, Span, Stmt, UnaryOp, UsingKind,
};
pub use control::{Control, Flow, Outcome};
pub use values::Val;
