//! Abstract Syntax Tree node types

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Source location span for error reporting and debugger sequence points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
    /// Start line (0-indexed)
    pub start_line: usize,
    /// Start column (0-indexed)
    pub start_col: usize,
    /// End line (0-indexed)
    pub end_line: usize,
    /// End column (0-indexed)
    pub end_col: usize,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            start,
            end,
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Create a span that covers both self and other
    pub fn merge(&self, other: &Span) -> Span {
        let (start_line, start_col) = if self.start <= other.start {
            (self.start_line, self.start_col)
        } else {
            (other.start_line, other.start_col)
        };
        let (end_line, end_col) = if self.end >= other.end {
            (self.end_line, self.end_col)
        } else {
            (other.end_line, other.end_col)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

/* ===================== Script Body ===================== */

/// One of a script block's named execution phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Clause {
    DynamicParam,
    Begin,
    Process,
    End,
}

impl Clause {
    pub const ALL: [Clause; 4] = [
        Clause::DynamicParam,
        Clause::Begin,
        Clause::Process,
        Clause::End,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Clause::DynamicParam => "dynamicparam",
            Clause::Begin => "begin",
            Clause::Process => "process",
            Clause::End => "end",
        }
    }
}

/// A parsed script body: attributes, declared parameters and up to four clauses.
///
/// A body written without explicit clauses is stored as its `end` clause.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptAst {
    pub attributes: Vec<AttributeAst>,
    pub params: Vec<ParamAst>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_param: Option<Stmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<Stmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Stmt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Stmt>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

impl ScriptAst {
    pub fn clause(&self, clause: Clause) -> Option<&Stmt> {
        match clause {
            Clause::DynamicParam => self.dynamic_param.as_ref(),
            Clause::Begin => self.begin.as_ref(),
            Clause::Process => self.process.as_ref(),
            Clause::End => self.end.as_ref(),
        }
    }

    pub fn clause_mut(&mut self, clause: Clause) -> &mut Option<Stmt> {
        match clause {
            Clause::DynamicParam => &mut self.dynamic_param,
            Clause::Begin => &mut self.begin,
            Clause::Process => &mut self.process,
            Clause::End => &mut self.end,
        }
    }

    pub fn has_clause(&self, clause: Clause) -> bool {
        self.clause(clause).is_some()
    }

    /// Clause bodies of this script, in execution order
    pub fn clauses(&self) -> impl Iterator<Item = (Clause, &Stmt)> {
        Clause::ALL
            .into_iter()
            .filter_map(move |c| self.clause(c).map(|body| (c, body)))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Whether interpreting this script depends on declarations that may change
    /// between runs: `using` directives or calls to registered dynamic keywords.
    /// Nested function bodies and script-block literals are searched too.
    pub fn uses_external_declarations(&self, keywords: &HashSet<String>) -> bool {
        let mut has_using = false;
        let mut has_keyword = false;
        self.walk(
            &mut |stmt| {
                if matches!(stmt, Stmt::Using { .. }) {
                    has_using = true;
                }
            },
            &mut |expr| {
                if let Expr::Call { name, .. } = expr {
                    if keywords.contains(&name.to_ascii_lowercase()) {
                        has_keyword = true;
                    }
                }
            },
        );
        has_using || has_keyword
    }

    /// Visit every statement and expression, descending into nested script bodies.
    pub fn walk(&self, on_stmt: &mut dyn FnMut(&Stmt), on_expr: &mut dyn FnMut(&Expr)) {
        for attr in &self.attributes {
            for arg in &attr.args {
                arg.value.walk(on_stmt, on_expr);
            }
        }
        for param in &self.params {
            if let Some(default) = &param.default {
                default.walk(on_stmt, on_expr);
            }
        }
        for (_, body) in self.clauses() {
            body.walk(on_stmt, on_expr);
        }
    }
}

/// `[Name(args)]` attached to a script or a parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeAst {
    pub name: String,
    pub args: Vec<AttributeArg>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// Positional (`name: None`) or named attribute argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeArg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Expr,
}

/// One declared parameter in a `param(...)` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamAst {
    pub name: String,
    pub attributes: Vec<AttributeAst>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Expr>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/* ===================== Statements ===================== */

/// How an assignment reaches its variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignScope {
    /// Plain `$x = ...`
    Local,
    /// `allscope $x = ...`: visible and assignable from every nested scope
    AllScope,
}

/// `using module X` or `using assembly X`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsingKind {
    Module,
    Assembly,
}

/// Member access segment for assignment paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum MemberAccess {
    Prop {
        property: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Index {
        expr: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

/// Statement AST node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Assign {
        var: String,
        scope: AssignScope,
        path: Vec<MemberAccess>,
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    If {
        test: Expr,
        then_s: Box<Stmt>,
        else_s: Option<Box<Stmt>>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Foreach {
        binding: String,
        iterable: Expr,
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Return {
        value: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Exit {
        code: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Throw {
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Function {
        name: String,
        body: Box<ScriptAst>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Using {
        kind: UsingKind,
        name: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Expr {
        expr: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Break {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Continue {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Stmt {
    /// Get the span of this statement
    pub fn span(&self) -> Span {
        match self {
            Stmt::Block { span, .. } => *span,
            Stmt::Assign { span, .. } => *span,
            Stmt::If { span, .. } => *span,
            Stmt::While { span, .. } => *span,
            Stmt::Foreach { span, .. } => *span,
            Stmt::Return { span, .. } => *span,
            Stmt::Exit { span, .. } => *span,
            Stmt::Throw { span, .. } => *span,
            Stmt::Function { span, .. } => *span,
            Stmt::Using { span, .. } => *span,
            Stmt::Expr { span, .. } => *span,
            Stmt::Break { span } => *span,
            Stmt::Continue { span } => *span,
        }
    }

    pub fn walk(&self, on_stmt: &mut dyn FnMut(&Stmt), on_expr: &mut dyn FnMut(&Expr)) {
        on_stmt(self);
        match self {
            Stmt::Block { body, .. } => {
                for stmt in body {
                    stmt.walk(on_stmt, on_expr);
                }
            }
            Stmt::Assign { path, value, .. } => {
                for segment in path {
                    if let MemberAccess::Index { expr, .. } = segment {
                        expr.walk(on_stmt, on_expr);
                    }
                }
                value.walk(on_stmt, on_expr);
            }
            Stmt::If {
                test,
                then_s,
                else_s,
                ..
            } => {
                test.walk(on_stmt, on_expr);
                then_s.walk(on_stmt, on_expr);
                if let Some(else_s) = else_s {
                    else_s.walk(on_stmt, on_expr);
                }
            }
            Stmt::While { test, body, .. } => {
                test.walk(on_stmt, on_expr);
                body.walk(on_stmt, on_expr);
            }
            Stmt::Foreach { iterable, body, .. } => {
                iterable.walk(on_stmt, on_expr);
                body.walk(on_stmt, on_expr);
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    value.walk(on_stmt, on_expr);
                }
            }
            Stmt::Exit { code, .. } => {
                if let Some(code) = code {
                    code.walk(on_stmt, on_expr);
                }
            }
            Stmt::Throw { value, .. } => value.walk(on_stmt, on_expr),
            Stmt::Function { body, .. } => body.walk(on_stmt, on_expr),
            Stmt::Expr { expr, .. } => expr.walk(on_stmt, on_expr),
            Stmt::Using { .. } | Stmt::Break { .. } | Stmt::Continue { .. } => {}
        }
    }
}

/* ===================== Expressions ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Expression AST node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    LitBool {
        v: bool,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitNum {
        v: f64,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitStr {
        v: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitNull {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitList {
        elements: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitMap {
        /// Entries as (key, value) pairs, in source order
        entries: Vec<(String, Expr)>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    ScriptBlock {
        body: Box<ScriptAst>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Var {
        name: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Member {
        object: Box<Expr>,
        property: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// Call of a function or host command by name
    Call {
        name: String,
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `& target(args)`, or `. target(args)` when `dotted`
    Invoke {
        target: Box<Expr>,
        args: Vec<Expr>,
        dotted: bool,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Expr {
    /// Get the span of this expression
    pub fn span(&self) -> Span {
        match self {
            Expr::LitBool { span, .. } => *span,
            Expr::LitNum { span, .. } => *span,
            Expr::LitStr { span, .. } => *span,
            Expr::LitNull { span } => *span,
            Expr::LitList { span, .. } => *span,
            Expr::LitMap { span, .. } => *span,
            Expr::ScriptBlock { span, .. } => *span,
            Expr::Var { span, .. } => *span,
            Expr::Member { span, .. } => *span,
            Expr::Index { span, .. } => *span,
            Expr::Call { span, .. } => *span,
            Expr::Invoke { span, .. } => *span,
            Expr::Binary { span, .. } => *span,
            Expr::Unary { span, .. } => *span,
        }
    }

    pub fn walk(&self, on_stmt: &mut dyn FnMut(&Stmt), on_expr: &mut dyn FnMut(&Expr)) {
        on_expr(self);
        match self {
            Expr::LitList { elements, .. } => {
                for e in elements {
                    e.walk(on_stmt, on_expr);
                }
            }
            Expr::LitMap { entries, .. } => {
                for (_, e) in entries {
                    e.walk(on_stmt, on_expr);
                }
            }
            Expr::ScriptBlock { body, .. } => body.walk(on_stmt, on_expr),
            Expr::Member { object, .. } => object.walk(on_stmt, on_expr),
            Expr::Index { object, index, .. } => {
                object.walk(on_stmt, on_expr);
                index.walk(on_stmt, on_expr);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.walk(on_stmt, on_expr);
                }
            }
            Expr::Invoke { target, args, .. } => {
                target.walk(on_stmt, on_expr);
                for a in args {
                    a.walk(on_stmt, on_expr);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.walk(on_stmt, on_expr);
                right.walk(on_stmt, on_expr);
            }
            Expr::Unary { operand, .. } => operand.walk(on_stmt, on_expr),
            Expr::LitBool { .. }
            | Expr::LitNum { .. }
            | Expr::LitStr { .. }
            | Expr::LitNull { .. }
            | Expr::Var { .. } => {}
        }
    }
}

/// Helper function for serde to skip serializing default spans
fn is_default_span(span: &Span) -> bool {
    *span == Span::default()
}
