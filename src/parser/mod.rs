//! PEST-based parser for tempo scripts
//!
//! Produces the [`ScriptAst`] consumed by the compilation cache, with span
//! information for error reporting and debugger sequence points.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

use crate::types::ast::{
    AssignScope, AttributeArg, AttributeAst, BinaryOp, Clause, Expr, MemberAccess, ParamAst,
    ScriptAst, Span, Stmt, UnaryOp, UsingKind,
};

#[cfg(test)]
mod tests;

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "parser/script.pest"]
struct ScriptGrammar;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("{0}")]
    PestError(String, Option<Span>),
    #[error("{0}")]
    BuildError(String, Option<Span>),
}

impl ParseError {
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::PestError(_, span) => *span,
            ParseError::BuildError(_, span) => *span,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ParseError::PestError(msg, _) => msg,
            ParseError::BuildError(msg, _) => msg,
        }
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let span = match err.line_col {
            pest::error::LineColLocation::Pos((line, col)) => Some(Span {
                start: 0,
                end: 0,
                start_line: line.saturating_sub(1),
                start_col: col.saturating_sub(1),
                end_line: line.saturating_sub(1),
                end_col: col,
            }),
            pest::error::LineColLocation::Span((start_line, start_col), (end_line, end_col)) => {
                Some(Span {
                    start: 0,
                    end: 0,
                    start_line: start_line.saturating_sub(1),
                    start_col: start_col.saturating_sub(1),
                    end_line: end_line.saturating_sub(1),
                    end_col: end_col.saturating_sub(1),
                })
            }
        };
        ParseError::PestError(err.to_string(), span)
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Span Helpers ===================== */

/// Convert a PEST pair's span to our Span type
fn pair_to_span(pair: &Pair<Rule>, source: &str) -> Span {
    let pest_span = pair.as_span();
    let start = pest_span.start();
    let end = pest_span.end();

    let (start_line, start_col) = offset_to_line_col(source, start);
    let (end_line, end_col) = offset_to_line_col(source, end);

    Span::new(start, end, start_line, start_col, end_line, end_col)
}

/// Convert byte offset to (line, column) - 0-indexed
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 0;
    let mut col = 0;

    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 0;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/* ===================== Public API ===================== */

/// Parse script source into a script body
pub fn parse_script(source: &str) -> ParseResult<ScriptAst> {
    let mut pairs = ScriptGrammar::parse(Rule::program, source)?;

    // program = { SOI ~ script_body ~ EOI }
    let program = pairs.next().unwrap();
    let body = program.into_inner().next().unwrap();
    build_script_body(body, source)
}

/* ===================== AST Builder ===================== */

fn build_script_body(pair: Pair<Rule>, source: &str) -> ParseResult<ScriptAst> {
    let span = pair_to_span(&pair, source);
    let mut script = ScriptAst {
        span,
        ..ScriptAst::default()
    };

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::attribute => script.attributes.push(build_attribute(part, source)?),
            Rule::param_block => script.params = build_param_block(part, source)?,
            Rule::clause_list => {
                for clause_pair in part.into_inner() {
                    let clause_span = pair_to_span(&clause_pair, source);
                    let mut inner = clause_pair.into_inner();
                    let kind_pair = inner.next().unwrap();
                    let clause = match kind_pair.as_str().to_ascii_lowercase().as_str() {
                        "dynamicparam" => Clause::DynamicParam,
                        "begin" => Clause::Begin,
                        "process" => Clause::Process,
                        _ => Clause::End,
                    };
                    let body = build_block(inner.next().unwrap(), source)?;

                    let slot = script.clause_mut(clause);
                    if slot.is_some() {
                        return Err(ParseError::BuildError(
                            format!("Clause '{}' is declared more than once", clause.name()),
                            Some(clause_span),
                        ));
                    }
                    *slot = Some(body);
                }
            }
            Rule::statements => {
                let body_span = pair_to_span(&part, source);
                let body = build_statements(part, source)?;
                script.end = Some(Stmt::Block {
                    body,
                    span: body_span,
                });
            }
            _ => {
                return Err(ParseError::BuildError(
                    format!("Unexpected script body content: {:?}", part.as_rule()),
                    Some(pair_to_span(&part, source)),
                ))
            }
        }
    }

    Ok(script)
}

fn build_attribute(pair: Pair<Rule>, source: &str) -> ParseResult<AttributeAst> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();

    let mut args = Vec::new();
    if let Some(args_pair) = inner.next() {
        for arg_pair in args_pair.into_inner() {
            let arg = arg_pair.into_inner().next().unwrap();
            match arg.as_rule() {
                Rule::named_arg => {
                    let mut named = arg.into_inner();
                    let arg_name = named.next().unwrap().as_str().to_string();
                    let value = build_expression(named.next().unwrap(), source)?;
                    args.push(AttributeArg {
                        name: Some(arg_name),
                        value,
                    });
                }
                _ => args.push(AttributeArg {
                    name: None,
                    value: build_expression(arg, source)?,
                }),
            }
        }
    }

    Ok(AttributeAst { name, args, span })
}

fn build_param_block(pair: Pair<Rule>, source: &str) -> ParseResult<Vec<ParamAst>> {
    let mut params: Vec<ParamAst> = Vec::new();

    for param_pair in pair.into_inner().filter(|p| p.as_rule() == Rule::param) {
        let span = pair_to_span(&param_pair, source);
        let mut attributes = Vec::new();
        let mut name = String::new();
        let mut default = None;

        for part in param_pair.into_inner() {
            match part.as_rule() {
                Rule::attribute => attributes.push(build_attribute(part, source)?),
                Rule::variable => name = variable_name(&part),
                Rule::param_default => {
                    let expr_pair = part.into_inner().next().unwrap();
                    default = Some(build_expression(expr_pair, source)?);
                }
                _ => {}
            }
        }

        if params.iter().any(|p| p.name.eq_ignore_ascii_case(&name)) {
            return Err(ParseError::BuildError(
                format!("Duplicate parameter '${}'", name),
                Some(span),
            ));
        }

        params.push(ParamAst {
            name,
            attributes,
            default,
            span,
        });
    }

    Ok(params)
}

fn build_block(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let statements_pair = pair.into_inner().next().unwrap();
    Ok(Stmt::Block {
        body: build_statements(statements_pair, source)?,
        span,
    })
}

fn build_statements(pair: Pair<Rule>, source: &str) -> ParseResult<Vec<Stmt>> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::statement)
        .map(|p| build_statement(p, source))
        .collect()
}

fn build_statement(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);

    match pair.as_rule() {
        Rule::statement => {
            let inner = pair.into_inner().next().unwrap();
            build_statement(inner, source)
        }
        Rule::function_stmt => {
            let mut inner = pair.into_inner();
            inner.next(); // kw_function
            let name = inner.next().unwrap().as_str().to_string();
            let body = build_script_body(inner.next().unwrap(), source)?;
            Ok(Stmt::Function {
                name,
                body: Box::new(body),
                span,
            })
        }
        Rule::using_stmt => {
            let mut inner = pair.into_inner();
            inner.next(); // kw_using
            let kind = match inner.next().unwrap().as_str().to_ascii_lowercase().as_str() {
                "module" => UsingKind::Module,
                _ => UsingKind::Assembly,
            };
            let name = inner.next().unwrap().as_str().to_string();
            Ok(Stmt::Using { kind, name, span })
        }
        Rule::if_stmt => build_if_stmt(pair, source),
        Rule::while_stmt => {
            let mut inner = pair.into_inner();
            inner.next(); // kw_while
            let test = build_expression(inner.next().unwrap(), source)?;
            let body = build_block(inner.next().unwrap(), source)?;
            Ok(Stmt::While {
                test,
                body: Box::new(body),
                span,
            })
        }
        Rule::foreach_stmt => {
            let mut inner = pair.into_inner();
            inner.next(); // kw_foreach
            let binding = variable_name(&inner.next().unwrap());
            inner.next(); // kw_in
            let iterable = build_expression(inner.next().unwrap(), source)?;
            let body = build_block(inner.next().unwrap(), source)?;
            Ok(Stmt::Foreach {
                binding,
                iterable,
                body: Box::new(body),
                span,
            })
        }
        Rule::return_stmt => {
            let value = optional_stmt_value(pair, source)?;
            Ok(Stmt::Return { value, span })
        }
        Rule::exit_stmt => {
            let code = optional_stmt_value(pair, source)?;
            Ok(Stmt::Exit { code, span })
        }
        Rule::throw_stmt => {
            let mut inner = pair.into_inner();
            inner.next(); // kw_throw
            let value = build_expression(inner.next().unwrap(), source)?;
            Ok(Stmt::Throw { value, span })
        }
        Rule::break_stmt => Ok(Stmt::Break { span }),
        Rule::continue_stmt => Ok(Stmt::Continue { span }),
        Rule::allscope_stmt => {
            let mut inner = pair.into_inner();
            inner.next(); // kw_allscope
            let var = variable_name(&inner.next().unwrap());
            let value = build_expression(inner.next().unwrap(), source)?;
            Ok(Stmt::Assign {
                var,
                scope: AssignScope::AllScope,
                path: Vec::new(),
                value,
                span,
            })
        }
        Rule::assign_stmt => build_assign_stmt(pair, source),
        Rule::expr_stmt => {
            let expr_pair = pair.into_inner().next().unwrap();
            let expr = build_expression(expr_pair, source)?;
            Ok(Stmt::Expr { expr, span })
        }
        _ => Err(ParseError::BuildError(
            format!("Unexpected statement rule: {:?}", pair.as_rule()),
            Some(span),
        )),
    }
}

fn optional_stmt_value(pair: Pair<Rule>, source: &str) -> ParseResult<Option<Expr>> {
    match pair.into_inner().find(|p| p.as_rule() == Rule::stmt_value) {
        Some(value) => {
            let expr_pair = value.into_inner().next().unwrap();
            Ok(Some(build_expression(expr_pair, source)?))
        }
        None => Ok(None),
    }
}

fn build_if_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();
    inner.next(); // kw_if

    let test = build_expression(inner.next().unwrap(), source)?;
    let then_s = build_block(inner.next().unwrap(), source)?;

    // elseif chains desugar into nested ifs, built from the innermost outward
    let mut branches = Vec::new();
    let mut else_s = None;
    for rest in inner {
        match rest.as_rule() {
            Rule::elseif_clause => {
                let branch_span = pair_to_span(&rest, source);
                let mut parts = rest.into_inner();
                parts.next(); // kw_elseif
                let branch_test = build_expression(parts.next().unwrap(), source)?;
                let branch_body = build_block(parts.next().unwrap(), source)?;
                branches.push((branch_test, branch_body, branch_span));
            }
            Rule::else_clause => {
                let mut parts = rest.into_inner();
                parts.next(); // kw_else
                else_s = Some(Box::new(build_block(parts.next().unwrap(), source)?));
            }
            _ => {}
        }
    }

    for (branch_test, branch_body, branch_span) in branches.into_iter().rev() {
        else_s = Some(Box::new(Stmt::If {
            test: branch_test,
            then_s: Box::new(branch_body),
            else_s,
            span: branch_span,
        }));
    }

    Ok(Stmt::If {
        test,
        then_s: Box::new(then_s),
        else_s,
        span,
    })
}

fn build_assign_stmt(pair: Pair<Rule>, source: &str) -> ParseResult<Stmt> {
    let span = pair_to_span(&pair, source);
    let mut inner = pair.into_inner();

    let var = variable_name(&inner.next().unwrap());

    let mut path = Vec::new();
    let mut value = None;

    for part in inner {
        match part.as_rule() {
            Rule::assign_path => {
                let segment_span = pair_to_span(&part, source);
                let segment = part.into_inner().next().unwrap();
                match segment.as_rule() {
                    Rule::identifier => path.push(MemberAccess::Prop {
                        property: segment.as_str().to_string(),
                        span: segment_span,
                    }),
                    _ => path.push(MemberAccess::Index {
                        expr: build_expression(segment, source)?,
                        span: segment_span,
                    }),
                }
            }
            Rule::expression => value = Some(build_expression(part, source)?),
            _ => {}
        }
    }

    let value = value.ok_or_else(|| {
        ParseError::BuildError("Assignment is missing a value".to_string(), Some(span))
    })?;

    Ok(Stmt::Assign {
        var,
        scope: AssignScope::Local,
        path,
        value,
        span,
    })
}

fn build_binary_expr(pair: Pair<Rule>, source: &str) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);
    let inner_pairs: Vec<_> = pair.into_inner().collect();

    if inner_pairs.is_empty() {
        return Err(ParseError::BuildError(
            "Empty binary expression".to_string(),
            Some(span),
        ));
    }

    let mut left = build_expression(inner_pairs[0].clone(), source)?;

    let mut i = 1;
    while i < inner_pairs.len() {
        let op = match inner_pairs[i].as_rule() {
            Rule::op_or => BinaryOp::Or,
            Rule::op_and => BinaryOp::And,
            Rule::op_eq => BinaryOp::Eq,
            Rule::op_ne => BinaryOp::Ne,
            Rule::op_lt => BinaryOp::Lt,
            Rule::op_lte => BinaryOp::Lte,
            Rule::op_gt => BinaryOp::Gt,
            Rule::op_gte => BinaryOp::Gte,
            Rule::op_add => BinaryOp::Add,
            Rule::op_sub => BinaryOp::Sub,
            Rule::op_mul => BinaryOp::Mul,
            Rule::op_div => BinaryOp::Div,
            Rule::op_mod => BinaryOp::Mod,
            other => {
                return Err(ParseError::BuildError(
                    format!("Expected operator at index {}, got {:?}", i, other),
                    Some(span),
                ))
            }
        };

        i += 1;
        if i >= inner_pairs.len() {
            return Err(ParseError::BuildError(
                "Missing right operand after operator".to_string(),
                Some(span),
            ));
        }

        let right = build_expression(inner_pairs[i].clone(), source)?;
        let new_span = left.span().merge(&right.span());
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: new_span,
        };

        i += 1;
    }

    Ok(left)
}

fn build_expression(pair: Pair<Rule>, source: &str) -> ParseResult<Expr> {
    let span = pair_to_span(&pair, source);

    match pair.as_rule() {
        Rule::expression | Rule::primary | Rule::literal => {
            let inner = pair.into_inner().next().unwrap();
            build_expression(inner, source)
        }
        Rule::or_expr
        | Rule::and_expr
        | Rule::equality_expr
        | Rule::comparison_expr
        | Rule::additive_expr
        | Rule::multiplicative_expr => build_binary_expr(pair, source),
        Rule::unary_expr => {
            let parts: Vec<_> = pair.into_inner().collect();
            let (operand_pair, ops) = parts.split_last().unwrap();
            let mut expr = build_expression(operand_pair.clone(), source)?;
            // prefix operators bind right-to-left
            for op_pair in ops.iter().rev() {
                let op = match op_pair.as_rule() {
                    Rule::op_not => UnaryOp::Not,
                    _ => UnaryOp::Neg,
                };
                expr = match (op, expr) {
                    (UnaryOp::Neg, Expr::LitNum { v, .. }) => Expr::LitNum { v: -v, span },
                    (op, operand) => Expr::Unary {
                        op,
                        operand: Box::new(operand),
                        span,
                    },
                };
            }
            Ok(expr)
        }
        Rule::postfix_expr => {
            let mut inner = pair.into_inner();
            let mut expr = build_expression(inner.next().unwrap(), source)?;

            for postfix_pair in inner {
                let postfix_span = pair_to_span(&postfix_pair, source);
                let access = postfix_pair.into_inner().next().unwrap();
                let new_span = expr.span().merge(&postfix_span);

                expr = match access.as_rule() {
                    Rule::member_access => {
                        let property = access.into_inner().next().unwrap().as_str().to_string();
                        Expr::Member {
                            object: Box::new(expr),
                            property,
                            span: new_span,
                        }
                    }
                    _ => {
                        let index_pair = access.into_inner().next().unwrap();
                        Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(build_expression(index_pair, source)?),
                            span: new_span,
                        }
                    }
                };
            }

            Ok(expr)
        }
        Rule::invoke_expr => {
            let mut inner = pair.into_inner();
            let dotted = inner.next().unwrap().as_str() == ".";
            let target_pair = inner.next().unwrap().into_inner().next().unwrap();
            let target = build_expression(target_pair, source)?;
            let args = match inner.next() {
                Some(arg_list) => build_arg_list(arg_list, source)?,
                None => Vec::new(),
            };
            Ok(Expr::Invoke {
                target: Box::new(target),
                args,
                dotted,
                span,
            })
        }
        Rule::call_expr => {
            let mut inner = pair.into_inner();
            let name = inner.next().unwrap().as_str().to_string();
            let args = match inner.next() {
                Some(arg_list) => build_arg_list(arg_list, source)?,
                None => Vec::new(),
            };
            Ok(Expr::Call { name, args, span })
        }
        Rule::list_lit => {
            let elements = match pair.into_inner().next() {
                Some(arg_list) => build_arg_list(arg_list, source)?,
                None => Vec::new(),
            };
            Ok(Expr::LitList { elements, span })
        }
        Rule::map_lit => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut parts = entry.into_inner();
                let key_pair = parts.next().unwrap().into_inner().next().unwrap();
                let key = match key_pair.as_rule() {
                    Rule::string => string_value(key_pair),
                    _ => key_pair.as_str().to_string(),
                };
                let value = build_expression(parts.next().unwrap(), source)?;
                entries.push((key, value));
            }
            Ok(Expr::LitMap { entries, span })
        }
        Rule::script_block_lit => {
            let body = build_script_body(pair.into_inner().next().unwrap(), source)?;
            Ok(Expr::ScriptBlock {
                body: Box::new(body),
                span,
            })
        }
        Rule::variable => Ok(Expr::Var {
            name: variable_name(&pair),
            span,
        }),
        Rule::number => {
            let num_str = pair.as_str();
            let value = num_str.parse::<f64>().map_err(|e| {
                ParseError::BuildError(
                    format!("Failed to parse number '{}': {}", num_str, e),
                    Some(span),
                )
            })?;
            Ok(Expr::LitNum { v: value, span })
        }
        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "$true",
            span,
        }),
        Rule::null_lit => Ok(Expr::LitNull { span }),
        Rule::string => Ok(Expr::LitStr {
            v: string_value(pair),
            span,
        }),
        _ => Err(ParseError::BuildError(
            format!("Unexpected expression rule: {:?}", pair.as_rule()),
            Some(span),
        )),
    }
}

fn build_arg_list(pair: Pair<Rule>, source: &str) -> ParseResult<Vec<Expr>> {
    pair.into_inner()
        .map(|expr_pair| build_expression(expr_pair, source))
        .collect()
}

/// `$name` -> `name`
fn variable_name(pair: &Pair<Rule>) -> String {
    pair.as_str().trim_start_matches('$').to_string()
}

/// Unescape a string literal
fn string_value(pair: Pair<Rule>) -> String {
    let quoted = pair.into_inner().next().unwrap();
    let is_single = quoted.as_rule() == Rule::sq_string;
    let raw = quoted.into_inner().next().map(|p| p.as_str()).unwrap_or("");

    if is_single {
        return raw.replace("''", "'");
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
