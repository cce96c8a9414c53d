//! Tests for the script parser

use super::*;

// ============================================================================
// Helper Functions
// ============================================================================

fn parse(source: &str) -> ScriptAst {
    parse_script(source).expect("Parse should succeed")
}

fn end_body(script: &ScriptAst) -> &[Stmt] {
    match script.end.as_ref() {
        Some(Stmt::Block { body, .. }) => body,
        other => panic!("Expected end block, got {:?}", other),
    }
}

// ============================================================================
// Script Body Tests
// ============================================================================

#[test]
fn test_bare_body_becomes_end_clause() {
    let script = parse("$x = 1\n$x");

    assert!(script.begin.is_none());
    assert!(script.process.is_none());
    assert_eq!(end_body(&script).len(), 2);
}

#[test]
fn test_empty_script() {
    let script = parse("");
    assert!(end_body(&script).is_empty());
}

#[test]
fn test_named_clauses() {
    let script = parse(
        r#"
begin { $n = 0 }
process { $n = $n + 1 }
END { $n }
"#,
    );

    assert!(script.has_clause(Clause::Begin));
    assert!(script.has_clause(Clause::Process));
    assert!(script.has_clause(Clause::End));
    assert!(!script.has_clause(Clause::DynamicParam));
}

#[test]
fn test_duplicate_clause_is_rejected() {
    let err = parse_script("begin { 1 } begin { 2 }").unwrap_err();
    match err {
        ParseError::BuildError(msg, span) => {
            assert!(msg.contains("begin"));
            assert!(span.is_some());
        }
        other => panic!("Expected BuildError, got {:?}", other),
    }
}

#[test]
fn test_attributes_and_params() {
    let script = parse(
        r#"
[CmdletBinding()]
param([Parameter(Mandatory = $true)] $a, $b = 10)
$a + $b
"#,
    );

    assert!(script.has_attribute("cmdletbinding"));
    assert_eq!(script.params.len(), 2);
    assert_eq!(script.params[0].name, "a");
    assert_eq!(script.params[0].attributes[0].name, "Parameter");
    assert_eq!(
        script.params[0].attributes[0].args[0].name.as_deref(),
        Some("Mandatory")
    );
    assert!(matches!(
        script.params[1].default,
        Some(Expr::LitNum { v, .. }) if v == 10.0
    ));
}

#[test]
fn test_duplicate_parameter_is_rejected() {
    assert!(parse_script("param($a, $A) $a").is_err());
}

// ============================================================================
// Statement Tests
// ============================================================================

#[test]
fn test_return_value_must_be_on_same_line() {
    let script = parse("return\n$x = 1");
    let body = end_body(&script);

    assert_eq!(body.len(), 2);
    assert!(matches!(body[0], Stmt::Return { value: None, .. }));
    assert!(matches!(body[1], Stmt::Assign { .. }));
}

#[test]
fn test_exit_with_code() {
    let script = parse("exit 3");
    match &end_body(&script)[0] {
        Stmt::Exit {
            code: Some(Expr::LitNum { v, .. }),
            ..
        } => assert_eq!(*v, 3.0),
        other => panic!("Expected exit, got {:?}", other),
    }
}

#[test]
fn test_elseif_desugars_to_nested_if() {
    let script = parse("if ($a) { 1 } elseif ($b) { 2 } else { 3 }");
    match &end_body(&script)[0] {
        Stmt::If {
            else_s: Some(else_s),
            ..
        } => assert!(matches!(**else_s, Stmt::If { else_s: Some(_), .. })),
        other => panic!("Expected if, got {:?}", other),
    }
}

#[test]
fn test_allscope_assignment() {
    let script = parse("allscope $counter = 0");
    assert!(matches!(
        &end_body(&script)[0],
        Stmt::Assign {
            scope: AssignScope::AllScope,
            ..
        }
    ));
}

#[test]
fn test_assignment_path() {
    let script = parse("$m.inner[0] = 5");
    match &end_body(&script)[0] {
        Stmt::Assign { var, path, .. } => {
            assert_eq!(var, "m");
            assert_eq!(path.len(), 2);
            assert!(matches!(&path[0], MemberAccess::Prop { property, .. } if property == "inner"));
            assert!(matches!(&path[1], MemberAccess::Index { .. }));
        }
        other => panic!("Expected assignment, got {:?}", other),
    }
}

#[test]
fn test_function_and_using() {
    let script = parse(
        r#"
using module Tools.Core
function Get-Thing { param($x) $x * 2 }
Get-Thing(4)
"#,
    );
    let body = end_body(&script);

    assert!(matches!(&body[0], Stmt::Using { kind: UsingKind::Module, name, .. } if name == "Tools.Core"));
    match &body[1] {
        Stmt::Function { name, body, .. } => {
            assert_eq!(name, "Get-Thing");
            assert_eq!(body.params.len(), 1);
        }
        other => panic!("Expected function, got {:?}", other),
    }
    assert!(matches!(&body[2], Stmt::Expr { expr: Expr::Call { name, .. }, .. } if name == "Get-Thing"));
}

// ============================================================================
// Expression Tests
// ============================================================================

#[test]
fn test_operator_precedence() {
    let script = parse("1 + 2 * 3");
    match &end_body(&script)[0] {
        Stmt::Expr {
            expr: Expr::Binary { op, right, .. },
            ..
        } => {
            assert_eq!(*op, BinaryOp::Add);
            assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
        }
        other => panic!("Expected binary, got {:?}", other),
    }
}

#[test]
fn test_invoke_and_dot_source() {
    let script = parse("& $sb(1, 2)\n. { $y = 1 }()");
    let body = end_body(&script);

    assert!(matches!(&body[0], Stmt::Expr { expr: Expr::Invoke { dotted: false, args, .. }, .. } if args.len() == 2));
    assert!(matches!(&body[1], Stmt::Expr { expr: Expr::Invoke { dotted: true, .. }, .. }));
}

#[test]
fn test_literals() {
    let script = parse(r#"@(1, 'it''s', "a\tb", $null, $true, @{ k = 1; 'q' = 2 })"#);
    match &end_body(&script)[0] {
        Stmt::Expr {
            expr: Expr::LitList { elements, .. },
            ..
        } => {
            assert_eq!(elements.len(), 6);
            assert!(matches!(&elements[1], Expr::LitStr { v, .. } if v == "it's"));
            assert!(matches!(&elements[2], Expr::LitStr { v, .. } if v == "a\tb"));
            assert!(matches!(&elements[3], Expr::LitNull { .. }));
            assert!(matches!(&elements[5], Expr::LitMap { entries, .. } if entries.len() == 2));
        }
        other => panic!("Expected list, got {:?}", other),
    }
}

#[test]
fn test_negative_number_folds() {
    let script = parse("-4");
    assert!(matches!(
        &end_body(&script)[0],
        Stmt::Expr { expr: Expr::LitNum { v, .. }, .. } if *v == -4.0
    ));
}

#[test]
fn test_script_block_literal_with_clauses() {
    let script = parse("$sb = { process { $_ } }");
    match &end_body(&script)[0] {
        Stmt::Assign {
            value: Expr::ScriptBlock { body, .. },
            ..
        } => assert!(body.has_clause(Clause::Process)),
        other => panic!("Expected script block, got {:?}", other),
    }
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
fn test_parse_error_has_location() {
    let err = parse_script("$x = (1 +").unwrap_err();
    assert!(matches!(err, ParseError::PestError(_, Some(_))));
}

#[test]
fn test_spans_track_lines() {
    let script = parse("$a = 1\n$b = 2");
    let body = end_body(&script);
    assert_eq!(body[1].span().start_line, 1);
    assert_eq!(body[1].span().start_col, 0);
}
