//! Variable analysis for the optimized tier
//!
//! Collects the names a script body assigns (parameters, assignment targets,
//! `foreach` bindings) into a slot layout, and detects all-scope declarations,
//! which cannot be resolved by static index. Nested function bodies and
//! script-block literals are separate scripts and are not visited.

use std::sync::Arc;

use indexmap::IndexSet;

use crate::slots::SlotLayout;
use crate::types::{AssignScope, ScriptAst, Stmt};

#[derive(Debug, Clone)]
pub struct VariableAnalysis {
    pub layout: Arc<SlotLayout>,
    pub has_all_scope: bool,
}

pub fn analyze(ast: &ScriptAst) -> VariableAnalysis {
    let mut locals: IndexSet<String> = IndexSet::new();
    let mut has_all_scope = false;

    for param in &ast.params {
        locals.insert(param.name.to_ascii_lowercase());
    }
    for (_, body) in ast.clauses() {
        collect(body, &mut locals, &mut has_all_scope);
    }

    VariableAnalysis {
        layout: Arc::new(SlotLayout::with_locals(locals.iter())),
        has_all_scope,
    }
}

fn collect(stmt: &Stmt, locals: &mut IndexSet<String>, has_all_scope: &mut bool) {
    match stmt {
        Stmt::Block { body, .. } => {
            for s in body {
                collect(s, locals, has_all_scope);
            }
        }
        Stmt::Assign { var, scope, .. } => match scope {
            AssignScope::AllScope => *has_all_scope = true,
            AssignScope::Local => {
                locals.insert(var.to_ascii_lowercase());
            }
        },
        Stmt::If { then_s, else_s, .. } => {
            collect(then_s, locals, has_all_scope);
            if let Some(else_s) = else_s {
                collect(else_s, locals, has_all_scope);
            }
        }
        Stmt::While { body, .. } => collect(body, locals, has_all_scope),
        Stmt::Foreach { binding, body, .. } => {
            locals.insert(binding.to_ascii_lowercase());
            collect(body, locals, has_all_scope);
        }
        Stmt::Function { .. }
        | Stmt::Return { .. }
        | Stmt::Exit { .. }
        | Stmt::Throw { .. }
        | Stmt::Using { .. }
        | Stmt::Expr { .. }
        | Stmt::Break { .. }
        | Stmt::Continue { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_script;
    use crate::slots::AutomaticVariable;

    #[test]
    fn test_layout_order_is_automatic_params_locals() {
        let ast = parse_script("param($a, $b) $c = 1\nforeach ($i in @(1)) { $a = $i }").unwrap();
        let analysis = analyze(&ast);
        let base = AutomaticVariable::ALL.len();

        assert!(!analysis.has_all_scope);
        assert_eq!(analysis.layout.index_of("a"), Some(base));
        assert_eq!(analysis.layout.index_of("b"), Some(base + 1));
        assert_eq!(analysis.layout.index_of("c"), Some(base + 2));
        assert_eq!(analysis.layout.index_of("i"), Some(base + 3));
        assert_eq!(analysis.layout.len(), base + 4);
    }

    #[test]
    fn test_all_scope_is_detected() {
        let ast = parse_script("if ($true) { allscope $x = 1 }").unwrap();
        assert!(analyze(&ast).has_all_scope);
    }

    #[test]
    fn test_nested_bodies_are_skipped() {
        let ast = parse_script("function f { allscope $x = 1; $y = 2 }\n$sb = { $z = 3 }").unwrap();
        let analysis = analyze(&ast);

        assert!(!analysis.has_all_scope);
        assert_eq!(analysis.layout.index_of("y"), None);
        assert_eq!(analysis.layout.index_of("z"), None);
        assert!(analysis.layout.index_of("sb").is_some());
    }
}
