//! Argument binding and caller-supplied overrides

use maplit::hashmap;

use super::helpers::{context, create, num, run_with_args, s};
use crate::errors::{BindingError, ScriptError};
use crate::invoke::{invoke_clause, InvokeOptions};
use crate::session::Pipe;
use crate::types::{Clause, Val};

#[test]
fn test_positional_and_default_binding() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "param($a, $b = 10) $a + $b");
    let output = Pipe::new();

    let invocation = invoke_clause(
        &mut ctx,
        &block,
        Clause::End,
        InvokeOptions::default()
            .with_args(vec![num(1.0)])
            .with_output(output.clone()),
    )
    .unwrap();

    let a = invocation.bindings.get("a").unwrap();
    assert_eq!(a.value, num(1.0));
    assert!(!a.was_defaulted);

    let b = invocation.bindings.get("B").unwrap();
    assert_eq!(b.value, num(10.0));
    assert!(b.was_defaulted);

    let bound = invocation.bindings.bound_parameters();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound.get("a"), Some(&num(1.0)));

    assert_eq!(output.take(), vec![num(11.0)]);
}

#[test]
fn test_bound_parameters_variable() {
    let output = run_with_args("param($a, $b = 10) $BoundParameters", vec![s("x")]);

    match &output[..] {
        [Val::Map(map)] => {
            assert_eq!(map.len(), 1);
            assert_eq!(map.get("a"), Some(&s("x")));
        }
        other => panic!("Expected one map, got {:?}", other),
    }
}

#[test]
fn test_default_sees_earlier_parameter() {
    let output = run_with_args("param($a, $b = $a * 2) $b", vec![num(4.0)]);
    assert_eq!(output, vec![num(8.0)]);
}

#[test]
fn test_missing_parameter_without_default_is_null() {
    let output = run_with_args("param($a, $b) $b == $null", vec![num(1.0)]);
    assert_eq!(output, vec![Val::Bool(true)]);
}

#[test]
fn test_overflow_arguments_land_in_args() {
    let output = run_with_args(
        "param($a) $args",
        vec![num(1.0), num(2.0), num(3.0)],
    );
    assert_eq!(output, vec![Val::List(vec![num(2.0), num(3.0)])]);
}

#[test]
fn test_variable_and_function_overrides() {
    let (engine, mut ctx) = context();
    let helper = create(&engine, "param($n) $n * 3");
    let block = create(&engine, "triple($base)");
    let output = Pipe::new();

    let options = InvokeOptions {
        variables: vec![("base".to_string(), num(5.0))],
        functions: vec![("triple".to_string(), helper)],
        ..InvokeOptions::default().with_output(output.clone())
    };
    block.invoke(&mut ctx, Clause::End, options).unwrap();

    assert_eq!(output.take(), vec![num(15.0)]);
    // the overrides lived in the invocation's scope only
    assert!(ctx.find_function("triple").is_none());
    assert!(ctx.get_variable("base").is_none());
}

#[test]
fn test_override_errors() {
    let (engine, mut ctx) = context();
    let helper = create(&engine, "1");
    let block = create(&engine, "2");

    let cases = hashmap! {
        "duplicate" => InvokeOptions {
            functions: vec![
                ("f".to_string(), helper.clone()),
                ("F".to_string(), helper.clone()),
            ],
            ..InvokeOptions::default()
        },
        "null function" => InvokeOptions {
            functions: vec![("  ".to_string(), helper.clone())],
            ..InvokeOptions::default()
        },
        "null variable" => InvokeOptions {
            variables: vec![("ok".to_string(), num(1.0)), (String::new(), num(2.0))],
            ..InvokeOptions::default()
        },
    };

    for (case, options) in cases {
        let depth = ctx.session_state().depth();
        let err = block.invoke(&mut ctx, Clause::End, options).unwrap_err();
        let expected = match case {
            "duplicate" => BindingError::DuplicateFunction("F".to_string()),
            "null function" => BindingError::NullFunctionName,
            _ => BindingError::NullVariable(1),
        };
        match err {
            ScriptError::Binding(actual) => assert_eq!(actual, expected, "case {}", case),
            other => panic!("case {}: expected binding error, got {:?}", case, other),
        }
        assert_eq!(ctx.session_state().depth(), depth, "case {}", case);
    }
}

#[test]
fn test_dynamic_parameters() {
    let (engine, mut ctx) = context();
    let block = create(
        &engine,
        "dynamicparam { @{ Name = 'web'; Replicas = 2 } } end { 1 }",
    );

    let params = block.dynamic_parameters(&mut ctx).unwrap();
    assert_eq!(params.get("Name"), Some(&s("web")));
    assert_eq!(params.get("Replicas"), Some(&num(2.0)));

    let none = create(&engine, "1");
    assert!(none.dynamic_parameters(&mut ctx).unwrap().is_empty());
}

#[test]
fn test_dynamic_parameters_shape_error() {
    let (engine, mut ctx) = context();

    for source in ["dynamicparam { 1 } end { }", "dynamicparam { @{ a = 1 }; @{ b = 2 } } end { }"] {
        let block = create(&engine, source);
        let err = block.dynamic_parameters(&mut ctx).unwrap_err();
        assert!(
            matches!(err, ScriptError::Binding(BindingError::DynamicParamShape(_))),
            "{}: {:?}",
            source,
            err
        );
    }
}
