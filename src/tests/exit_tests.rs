//! Exit handling for standalone and embedded scripts

use super::helpers::{context, create, num, s};
use crate::context::LAST_EXIT_CODE;
use crate::invoke::InvokeOptions;
use crate::runner::ClauseRunner;
use crate::session::Pipe;
use crate::types::{Clause, Outcome, Val};

fn standalone(output: &Pipe) -> InvokeOptions {
    InvokeOptions {
        standalone: true,
        ..InvokeOptions::default().with_output(output.clone())
    }
}

#[test]
fn test_standalone_exit_in_begin_is_absorbed() {
    let (engine, mut ctx) = context();
    let block = create(
        &engine,
        "begin { 'start'; exit 3 } process { 'item' } end { 'done' }",
    );
    let output = Pipe::new();

    let mut runner = ClauseRunner::new(&mut ctx, block, standalone(&output)).unwrap();

    assert_eq!(runner.begin(&mut ctx).unwrap(), Outcome::Exited(3));
    assert!(runner.is_finished());
    assert_eq!(ctx.last_exit_code(), Some(3));
    assert!(ctx.pipeline_failed());

    assert_eq!(runner.process(&mut ctx, Some(num(1.0))).unwrap(), Outcome::Completed);
    assert_eq!(runner.end(&mut ctx).unwrap(), Outcome::Completed);

    assert_eq!(output.take(), vec![s("start")]);
    assert_eq!(ctx.session_state().depth(), 1);
}

#[test]
fn test_zero_exit_does_not_fail_pipeline() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "exit");
    let output = Pipe::new();

    let outcome = block
        .invoke(&mut ctx, Clause::End, standalone(&output))
        .unwrap();

    assert_eq!(outcome, Outcome::Exited(0));
    assert_eq!(ctx.last_exit_code(), Some(0));
    assert!(!ctx.pipeline_failed());
}

#[test]
fn test_rethrow_exit_propagates() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "exit 4");
    let options = InvokeOptions {
        standalone: true,
        rethrow_exit: true,
        ..InvokeOptions::default()
    };

    let outcome = block.invoke(&mut ctx, Clause::End, options).unwrap();

    assert_eq!(outcome, Outcome::ExitRequested(4));
    assert_eq!(ctx.last_exit_code(), None);
    assert!(!ctx.pipeline_failed());
}

#[test]
fn test_embedded_exit_propagates() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "exit 7");

    let outcome = block
        .invoke(&mut ctx, Clause::End, InvokeOptions::default())
        .unwrap();

    assert_eq!(outcome, Outcome::ExitRequested(7));
    assert!(ctx.session_state().global().get_local(LAST_EXIT_CODE).is_none());
}

#[test]
fn test_exit_from_nested_function_reaches_standalone_script() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "function quit { exit 9 } 'a'; quit(); 'b'");
    let output = Pipe::new();

    let outcome = block
        .invoke(&mut ctx, Clause::End, standalone(&output))
        .unwrap();

    assert_eq!(outcome, Outcome::Exited(9));
    assert_eq!(output.take(), vec![s("a")]);
    assert_eq!(ctx.session_state().depth(), 1);
}

#[test]
fn test_exit_code_from_expression() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "param($code) exit $code + 1");
    let options = InvokeOptions {
        standalone: true,
        ..InvokeOptions::default().with_args(vec![num(1.0)])
    };

    let outcome = block.invoke(&mut ctx, Clause::End, options).unwrap();

    assert_eq!(outcome, Outcome::Exited(2));
    assert_eq!(
        ctx.session_state().global().get_local(LAST_EXIT_CODE),
        Some(Val::Num(2.0))
    );
}
