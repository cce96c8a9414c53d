//! Closure compiler
//!
//! Lowers each statement and expression into a boxed closure over
//! [`InvocationFrame`]. In the optimized tier, variables present in the slot
//! layout are read and written by index; everything else goes through the
//! scope chain by name. Every non-block statement is a sequence point.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::compiled::CompiledCode;
use crate::compiler::{ops, CodeGenerator, CompiledClauses, Delegate, LoweringRequest, Tier};
use crate::errors::ScriptError;
use crate::invoke::{InvocationFrame, InvokeOptions};
use crate::runner::ClauseRunner;
use crate::script_block::ScriptBlock;
use crate::session::Pipe;
use crate::slots::SlotLayout;
use crate::types::{
    AssignScope, BinaryOp, Control, Expr, Flow, MemberAccess, Outcome, Span, Stmt, Val,
};

type StmtFn = Box<dyn Fn(&mut InvocationFrame<'_>) -> Flow + Send + Sync>;
type ExprFn = Box<dyn Fn(&mut InvocationFrame<'_>) -> Flow<Val> + Send + Sync>;
type WriteFn = Box<dyn Fn(&mut InvocationFrame<'_>, Val) -> Flow + Send + Sync>;
/// A command that streams its output into the given pipe
type CommandFn = Box<dyn Fn(&mut InvocationFrame<'_>, &Pipe) -> Flow + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClosureCompiler;

impl CodeGenerator for ClosureCompiler {
    fn lower(&self, request: LoweringRequest<'_>) -> Result<CompiledClauses, ScriptError> {
        let mut lowering = Lowering {
            code: request.code,
            tier: request.tier,
            layout: &request.layout,
            points: Vec::new(),
        };
        let ast = request.ast;

        let dynamic_param = ast.dynamic_param.as_ref().map(|b| lowering.clause(b));
        let begin = ast.begin.as_ref().map(|b| lowering.clause(b));
        let process = ast.process.as_ref().map(|b| lowering.clause(b));
        let end = ast.end.as_ref().map(|b| lowering.clause(b));
        let defaults = ast
            .params
            .iter()
            .map(|p| p.default.as_ref().map(|e| Arc::from(lowering.expr(e))))
            .collect();

        Ok(CompiledClauses {
            tier: request.tier,
            layout: request.layout.clone(),
            dynamic_param,
            begin,
            process,
            end,
            defaults,
            sequence_points: lowering.points.into(),
        })
    }
}

struct Lowering<'a> {
    code: &'a CompiledCode,
    tier: Tier,
    layout: &'a SlotLayout,
    points: Vec<Span>,
}

impl<'a> Lowering<'a> {
    fn clause(&mut self, body: &Stmt) -> Delegate {
        Arc::from(self.stmt(body))
    }

    fn slot(&self, name: &str) -> Option<usize> {
        match self.tier {
            Tier::Optimized => self.layout.index_of(name),
            Tier::Unoptimized => None,
        }
    }

    /* ===================== Statements ===================== */

    fn stmt(&mut self, stmt: &Stmt) -> StmtFn {
        if let Stmt::Block { body, .. } = stmt {
            let stmts: Vec<StmtFn> = body.iter().map(|s| self.stmt(s)).collect();
            return Box::new(move |frame| {
                for s in &stmts {
                    s(frame)?;
                }
                Ok(())
            });
        }

        let index = self.points.len();
        self.points.push(stmt.span());
        let inner = self.stmt_inner(stmt);
        Box::new(move |frame| {
            if frame.debugging {
                frame.sequence_point(index)?;
            }
            inner(frame)
        })
    }

    fn stmt_inner(&mut self, stmt: &Stmt) -> StmtFn {
        match stmt {
            Stmt::Block { .. } => self.stmt(stmt),
            Stmt::Assign {
                var,
                scope,
                path,
                value,
                span,
            } => self.assign(var, *scope, path, value, *span),
            Stmt::If {
                test,
                then_s,
                else_s,
                ..
            } => {
                let test = self.expr(test);
                let then_s = self.stmt(then_s);
                let else_s = else_s.as_ref().map(|s| self.stmt(s));
                Box::new(move |frame| {
                    if test(frame)?.is_truthy() {
                        then_s(frame)
                    } else if let Some(else_s) = &else_s {
                        else_s(frame)
                    } else {
                        Ok(())
                    }
                })
            }
            Stmt::While { test, body, .. } => {
                let test = self.expr(test);
                let body = self.stmt(body);
                Box::new(move |frame| {
                    loop {
                        check_stopping(frame)?;
                        if !test(frame)?.is_truthy() {
                            break;
                        }
                        if !keep_looping(body(frame))? {
                            break;
                        }
                    }
                    Ok(())
                })
            }
            Stmt::Foreach {
                binding,
                iterable,
                body,
                ..
            } => {
                let iterable = self.expr(iterable);
                let write = self.var_write(binding, AssignScope::Local);
                let body = self.stmt(body);
                Box::new(move |frame| {
                    for item in iterable(frame)?.into_items() {
                        check_stopping(frame)?;
                        write(frame, item)?;
                        if !keep_looping(body(frame))? {
                            break;
                        }
                    }
                    Ok(())
                })
            }
            Stmt::Return { value, .. } => {
                let value = value.as_ref().map(|v| self.expr(v));
                Box::new(move |frame| {
                    if let Some(value) = &value {
                        let v = value(frame)?;
                        if !v.is_null() {
                            frame.output.write(v);
                        }
                    }
                    Err(Control::Return)
                })
            }
            Stmt::Exit { code, .. } => {
                let code = code.as_ref().map(|c| self.expr(c));
                Box::new(move |frame| {
                    let code = match &code {
                        Some(code) => code(frame)?.as_num().unwrap_or(0.0) as i32,
                        None => 0,
                    };
                    Err(Control::Exit(code))
                })
            }
            Stmt::Throw { value, span } => {
                let value = self.expr(value);
                let span = *span;
                Box::new(move |frame| {
                    let v = value(frame)?;
                    Err(Control::Throw(ScriptError::runtime_at(v.to_string(), span)))
                })
            }
            Stmt::Function { name, body, .. } => {
                let code = self.code.nested_code(body);
                let name = name.clone();
                Box::new(move |frame| {
                    let mode = frame.ctx.language_mode();
                    if !mode.allows_definitions() {
                        return Err(ScriptError::LanguageMode {
                            mode: mode.to_string(),
                            operation: format!("defining function '{}'", name),
                        }
                        .into());
                    }
                    let mut block = ScriptBlock::new(code.clone());
                    block.bind_to(frame.ctx.current_session());
                    frame.ctx.define_function(&name, block);
                    Ok(())
                })
            }
            // resolved when the script is created; nothing to run
            Stmt::Using { .. } => Box::new(|_| Ok(())),
            Stmt::Expr { expr, .. } => match expr {
                Expr::Call { .. } | Expr::Invoke { .. } => {
                    let command = self.command(expr);
                    Box::new(move |frame| {
                        let sink = frame.output.clone();
                        command(frame, &sink)
                    })
                }
                _ => {
                    let expr = self.expr(expr);
                    Box::new(move |frame| {
                        let v = expr(frame)?;
                        if !v.is_null() {
                            frame.output.write(v);
                        }
                        Ok(())
                    })
                }
            },
            Stmt::Break { .. } => Box::new(|_| Err(Control::Break)),
            Stmt::Continue { .. } => Box::new(|_| Err(Control::Continue)),
        }
    }

    fn assign(
        &mut self,
        var: &str,
        scope: AssignScope,
        path: &[MemberAccess],
        value: &Expr,
        span: Span,
    ) -> StmtFn {
        let value = self.expr(value);
        let write = self.var_write(var, scope);

        if path.is_empty() {
            return Box::new(move |frame| {
                let v = value(frame)?;
                write(frame, v)
            });
        }

        let read = self.var_read(var);
        let keys: Vec<PathKey> = path
            .iter()
            .map(|segment| match segment {
                MemberAccess::Prop { property, .. } => PathKey::Prop(property.clone()),
                MemberAccess::Index { expr, .. } => PathKey::Index(self.expr(expr)),
            })
            .collect();

        Box::new(move |frame| {
            let v = value(frame)?;
            let mut resolved = Vec::with_capacity(keys.len());
            for key in &keys {
                resolved.push(match key {
                    PathKey::Prop(name) => Val::Str(name.clone()),
                    PathKey::Index(expr) => expr(frame)?,
                });
            }
            let mut target = read(frame)?;
            ops::assign_path(&mut target, &resolved, v, span)?;
            write(frame, target)
        })
    }

    /* ===================== Variables ===================== */

    fn var_read(&self, name: &str) -> ExprFn {
        let name = name.to_string();
        match self.slot(&name) {
            Some(index) => Box::new(move |frame| {
                let local = frame.slots.borrow().get(index).cloned();
                match local {
                    Some(v) => Ok(v),
                    None => Ok(frame.ctx.get_variable(&name).unwrap_or_default()),
                }
            }),
            None => Box::new(move |frame| Ok(frame.ctx.get_variable(&name).unwrap_or_default())),
        }
    }

    fn var_write(&self, name: &str, scope: AssignScope) -> WriteFn {
        let name = name.to_string();
        match (scope, self.slot(&name)) {
            (AssignScope::AllScope, _) => Box::new(move |frame, v| {
                frame.ctx.declare_all_scope(&name, v);
                Ok(())
            }),
            (AssignScope::Local, Some(index)) => Box::new(move |frame, v| {
                frame.slots.borrow_mut().set(index, v);
                Ok(())
            }),
            (AssignScope::Local, None) => Box::new(move |frame, v| {
                frame.ctx.set_variable(&name, v);
                Ok(())
            }),
        }
    }

    /* ===================== Expressions ===================== */

    fn exprs(&mut self, exprs: &[Expr]) -> Vec<ExprFn> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&mut self, expr: &Expr) -> ExprFn {
        match expr {
            Expr::LitBool { v, .. } => {
                let v = *v;
                Box::new(move |_| Ok(Val::Bool(v)))
            }
            Expr::LitNum { v, .. } => {
                let v = *v;
                Box::new(move |_| Ok(Val::Num(v)))
            }
            Expr::LitStr { v, .. } => {
                let v = v.clone();
                Box::new(move |_| Ok(Val::Str(v.clone())))
            }
            Expr::LitNull { .. } => Box::new(|_| Ok(Val::Null)),
            Expr::LitList { elements, .. } => {
                let elements = self.exprs(elements);
                Box::new(move |frame| Ok(Val::List(eval_all(&elements, frame)?)))
            }
            Expr::LitMap { entries, .. } => {
                let entries: Vec<(String, ExprFn)> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), self.expr(e)))
                    .collect();
                Box::new(move |frame| {
                    let mut map = IndexMap::with_capacity(entries.len());
                    for (key, value) in &entries {
                        map.insert(key.clone(), value(frame)?);
                    }
                    Ok(Val::Map(map))
                })
            }
            Expr::ScriptBlock { body, .. } => {
                let code = self.code.nested_code(body);
                Box::new(move |frame| {
                    let mut block = ScriptBlock::new(code.clone());
                    block.bind_to(frame.ctx.current_session());
                    Ok(Val::Block(block))
                })
            }
            Expr::Var { name, .. } => self.var_read(name),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.expr(object);
                let property = property.clone();
                Box::new(move |frame| Ok(ops::member(&object(frame)?, &property)))
            }
            Expr::Index {
                object,
                index,
                span,
            } => {
                let object = self.expr(object);
                let index = self.expr(index);
                let span = *span;
                Box::new(move |frame| {
                    let target = object(frame)?;
                    let key = index(frame)?;
                    Ok(ops::index(&target, &key, span)?)
                })
            }
            Expr::Call { .. } | Expr::Invoke { .. } => {
                let command = self.command(expr);
                Box::new(move |frame| {
                    let sink = Pipe::new();
                    command(frame, &sink)?;
                    Ok(Val::from_output(sink.take()))
                })
            }
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
                ..
            } => {
                let left = self.expr(left);
                let right = self.expr(right);
                Box::new(move |frame| {
                    Ok(Val::Bool(left(frame)?.is_truthy() && right(frame)?.is_truthy()))
                })
            }
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
                ..
            } => {
                let left = self.expr(left);
                let right = self.expr(right);
                Box::new(move |frame| {
                    Ok(Val::Bool(left(frame)?.is_truthy() || right(frame)?.is_truthy()))
                })
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let op = *op;
                let span = *span;
                let left = self.expr(left);
                let right = self.expr(right);
                Box::new(move |frame| {
                    let l = left(frame)?;
                    let r = right(frame)?;
                    Ok(ops::binary(op, l, r, span)?)
                })
            }
            Expr::Unary { op, operand, span } => {
                let op = *op;
                let span = *span;
                let operand = self.expr(operand);
                Box::new(move |frame| Ok(ops::unary(op, operand(frame)?, span)?))
            }
        }
    }

    /* ===================== Commands ===================== */

    /// Lower a call or invocation into a closure streaming into a pipe
    fn command(&mut self, expr: &Expr) -> CommandFn {
        match expr {
            Expr::Call { name, args, span } => {
                let args = self.exprs(args);
                let name = name.clone();
                let span = *span;
                Box::new(move |frame, sink| {
                    let args = eval_all(&args, frame)?;
                    run_command(frame, &name, args, sink, span)
                })
            }
            Expr::Invoke {
                target,
                args,
                dotted,
                span,
            } => {
                let target = self.expr(target);
                let args = self.exprs(args);
                let new_scope = !*dotted;
                let span = *span;
                Box::new(move |frame, sink| {
                    let mode = frame.ctx.language_mode();
                    if !mode.allows_definitions() {
                        return Err(ScriptError::LanguageMode {
                            mode: mode.to_string(),
                            operation: "invoking a script block".to_string(),
                        }
                        .into());
                    }
                    let block = match target(frame)? {
                        Val::Block(block) => block,
                        other => {
                            return Err(ScriptError::runtime_at(
                                format!("Cannot invoke a value of type {}", other.type_name()),
                                span,
                            )
                            .into())
                        }
                    };
                    let args = eval_all(&args, frame)?;
                    run_block(frame, block, args, new_scope, sink)
                })
            }
            other => {
                let value = self.expr(other);
                Box::new(move |frame, sink| {
                    let v = value(frame)?;
                    if !v.is_null() {
                        sink.write(v);
                    }
                    Ok(())
                })
            }
        }
    }
}

enum PathKey {
    Prop(String),
    Index(ExprFn),
}

/* ===================== Runtime Helpers ===================== */

fn eval_all(exprs: &[ExprFn], frame: &mut InvocationFrame<'_>) -> Flow<Vec<Val>> {
    let mut values = Vec::with_capacity(exprs.len());
    for e in exprs {
        values.push(e(frame)?);
    }
    Ok(values)
}

fn check_stopping(frame: &InvocationFrame<'_>) -> Flow {
    if frame.ctx.is_stopping() {
        return Err(ScriptError::Stopping.into());
    }
    Ok(())
}

/// Absorb loop control; returns whether to keep looping
fn keep_looping(flow: Flow) -> Flow<bool> {
    match flow {
        Ok(()) | Err(Control::Continue) => Ok(true),
        Err(Control::Break) => Ok(false),
        Err(other) => Err(other),
    }
}

/// Call a function by name, falling back to the host's native commands
fn run_command(
    frame: &mut InvocationFrame<'_>,
    name: &str,
    args: Vec<Val>,
    sink: &Pipe,
    span: Span,
) -> Flow {
    if let Some(function) = frame.ctx.find_function(name) {
        return run_block(frame, function, args, true, sink);
    }

    if let Some(native) = frame.ctx.native(name) {
        let mode = frame.ctx.language_mode();
        if !native.safe && !mode.allows_unsafe_natives() {
            return Err(ScriptError::LanguageMode {
                mode: mode.to_string(),
                operation: format!("calling '{}'", native.name),
            }
            .into());
        }
        let value = (native.func)(frame.ctx, args).map_err(|err| ScriptError::Indirect {
            command: native.name.clone(),
            source: Box::new(err),
        })?;
        if !value.is_null() {
            sink.write(value);
        }
        return Ok(());
    }

    Err(ScriptError::runtime_at(
        format!("The term '{}' is not recognized as a function or command", name),
        span,
    )
    .into())
}

/// Run a script block through all its clauses, as a single-item-less pipeline
fn run_block(
    frame: &mut InvocationFrame<'_>,
    block: ScriptBlock,
    args: Vec<Val>,
    new_scope: bool,
    sink: &Pipe,
) -> Flow {
    let options = InvokeOptions {
        new_scope,
        args,
        output: Some(sink.clone()),
        ..InvokeOptions::default()
    };
    let mut runner = ClauseRunner::new(frame.ctx, block, options)?;
    propagate(runner.begin(frame.ctx))?;
    propagate(runner.process(frame.ctx, None))?;
    propagate(runner.end(frame.ctx))
}

/// Re-raise a nested invocation's outcome in the calling clause
fn propagate(result: Result<Outcome, ScriptError>) -> Flow {
    match result? {
        Outcome::Completed | Outcome::Exited(_) => Ok(()),
        Outcome::ExitRequested(code) => Err(Control::Exit(code)),
        Outcome::Terminated => Err(Control::Terminate),
    }
}
