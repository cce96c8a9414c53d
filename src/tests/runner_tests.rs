//! Clause runner: begin/process/end over a stream of items

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::helpers::{context, create, num, run_pipeline, s, CountingEvents};
use crate::context::ExecutionContext;
use crate::engine::Engine;
use crate::invoke::InvokeOptions;
use crate::runner::ClauseRunner;
use crate::session::Pipe;
use crate::types::{Clause, Outcome, Val};

#[test]
fn test_slots_shared_across_clauses() {
    let (_engine, mut ctx) = context();
    let (outcome, output) = run_pipeline(
        &mut ctx,
        "begin { $sum = 0 } process { $sum = $sum + $_ } end { $sum }",
        vec![num(1.0), num(2.0), num(3.0)],
    )
    .unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(output, vec![num(6.0)]);
}

#[test]
fn test_end_receives_input_without_process() {
    let (_engine, mut ctx) = context();
    let (_, output) = run_pipeline(&mut ctx, "end { $input.count; $input }", vec![s("a"), s("b")])
        .unwrap();

    assert_eq!(output, vec![num(2.0), Val::List(vec![s("a"), s("b")])]);
}

#[test]
fn test_end_input_is_null_with_process() {
    let (_engine, mut ctx) = context();
    let (_, output) = run_pipeline(
        &mut ctx,
        "process { $input.count } end { $input == $null }",
        vec![num(1.0), num(2.0)],
    )
    .unwrap();

    assert_eq!(output, vec![num(1.0), num(1.0), Val::Bool(true)]);
}

#[test]
fn test_parameters_bound_once() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "param($scale) process { $_ * $scale }");
    let output = Pipe::new();
    let options = InvokeOptions::default()
        .with_args(vec![num(10.0)])
        .with_output(output.clone());

    let outcome = ClauseRunner::run(&mut ctx, block, options, vec![num(1.0), num(2.0)]).unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(output.take(), vec![num(10.0), num(20.0)]);
}

#[test]
fn test_scope_entered_once_for_all_clauses() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "begin { } process { } end { }");
    let mut runner = ClauseRunner::new(&mut ctx, block, InvokeOptions::default()).unwrap();
    assert!(runner.tier_is_optimized());

    runner.begin(&mut ctx).unwrap();
    assert_eq!(ctx.session_state().depth(), 2);
    runner.process(&mut ctx, Some(num(1.0))).unwrap();
    runner.process(&mut ctx, None).unwrap();
    assert_eq!(ctx.session_state().depth(), 2);

    runner.end(&mut ctx).unwrap();
    assert_eq!(ctx.session_state().depth(), 1);
    assert!(runner.is_finished());

    // finished runners ignore further calls
    assert_eq!(runner.end(&mut ctx).unwrap(), Outcome::Completed);
}

#[test]
fn test_error_in_process_leaves_scope() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "process { if ($_ == 2) { throw 'bad item' } }");
    let mut runner = ClauseRunner::new(&mut ctx, block, InvokeOptions::default()).unwrap();

    runner.process(&mut ctx, Some(num(1.0))).unwrap();
    let err = runner.process(&mut ctx, Some(num(2.0))).unwrap_err();

    assert_eq!(err.to_string(), "bad item");
    assert!(runner.is_finished());
    assert_eq!(ctx.session_state().depth(), 1);
}

#[test]
fn test_dispose_is_idempotent() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "begin { $x = 1 }");
    let mut runner = ClauseRunner::new(&mut ctx, block, InvokeOptions::default()).unwrap();

    runner.begin(&mut ctx).unwrap();
    runner.dispose(&mut ctx);
    runner.dispose(&mut ctx);

    assert_eq!(ctx.session_state().depth(), 1);
}

#[test]
fn test_dotted_runner_uses_unoptimized_tier() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "process { $last = $_ }");
    let mut runner = ClauseRunner::new(&mut ctx, block, InvokeOptions::dotted()).unwrap();

    assert!(!runner.tier_is_optimized());
    runner.process(&mut ctx, Some(s("x"))).unwrap();
    runner.process(&mut ctx, Some(s("y"))).unwrap();
    runner.end(&mut ctx).unwrap();

    assert_eq!(ctx.get_variable("last"), Some(s("y")));
}

#[test]
fn test_each_clause_reports_invocation_events() {
    let events = Arc::new(CountingEvents::default());
    let engine = Engine::builder().events(events.clone()).build();
    let mut ctx = ExecutionContext::new(engine.clone());
    let block = engine.create("test", "begin { } process { } end { }").unwrap();

    ClauseRunner::run(&mut ctx, block, InvokeOptions::default(), vec![num(1.0), num(2.0)])
        .unwrap();

    // begin, two process runs, end
    assert_eq!(events.invocations_started.load(Ordering::SeqCst), 4);
    assert_eq!(events.invocations_finished.load(Ordering::SeqCst), 4);
}

#[test]
fn test_logged_flag_belongs_to_handle() {
    let (engine, mut ctx) = context();
    let block = create(&engine, "1");
    let clone = block.clone();
    assert!(!block.is_logged());

    block.invoke(&mut ctx, Clause::End, InvokeOptions::default()).unwrap();
    block.invoke(&mut ctx, Clause::End, InvokeOptions::default()).unwrap();

    assert!(block.is_logged());
    assert!(!clone.is_logged());
}

#[test]
fn test_empty_stream_runs_process_once() {
    let (_engine, mut ctx) = context();
    let (outcome, output) =
        run_pipeline(&mut ctx, "process { 'p'; $_ == $null } end { 'e' }", vec![]).unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(output, vec![s("p"), Val::Bool(true), s("e")]);

    // same as calling the block from script
    let (_, output) = run_pipeline(
        &mut ctx,
        "$b = { process { 'p' } end { 'e' } }; & $b()",
        vec![],
    )
    .unwrap();
    assert_eq!(output, vec![s("p"), s("e")]);
}
